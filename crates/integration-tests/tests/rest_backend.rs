//! Table API and token handling of the REST client.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use clinic_auth::{
    BackendError, Filter, QueryApi, RestBackend, RpcApi, SessionApi, SessionEvent,
};
use clinic_integration_tests::{FakeBackendServer, within};

async fn setup() -> (FakeBackendServer, Arc<RestBackend>) {
    let server = FakeBackendServer::start().await.unwrap();
    let backend = Arc::new(RestBackend::new(&server.config().unwrap()).unwrap());
    (server, backend)
}

fn password(p: &str) -> SecretString {
    SecretString::from(p.to_string())
}

#[tokio::test]
async fn test_select_one_row_absent_and_duplicate() {
    let (server, backend) = setup().await;
    let user = server.add_user("dr.lee@clinic.example", "pw-7781");
    let other = server.add_user("nurse.kim@clinic.example", "pw-7782");
    server.set_role(&user, "user");
    server.set_role(&other, "user");
    server.add_role_row(&other, "admin");
    backend
        .sign_in_with_password("dr.lee@clinic.example", &password("pw-7781"))
        .await
        .unwrap();

    let row = backend
        .select_one("user_roles", &[Filter::eq("user_id", user.id)])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["role"], "user");

    let missing = backend
        .select_one("profiles", &[Filter::eq("id", user.id)])
        .await
        .unwrap();
    assert!(missing.is_none());

    let err = backend
        .select_one("user_roles", &[Filter::eq("user_id", other.id)])
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Cardinality(2)));

    let err = backend
        .select_one("no_such_table", &[Filter::eq("id", user.id)])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_anonymous_queries_see_nothing() {
    let (server, backend) = setup().await;
    let user = server.add_user("dr.lee@clinic.example", "pw-7781");
    server.set_profile(&user, "Dr. Lee");

    let row = backend
        .select_one("profiles", &[Filter::eq("id", user.id)])
        .await
        .unwrap();
    assert!(row.is_none());
}

#[tokio::test]
async fn test_procedures() {
    let (server, backend) = setup().await;
    let user = server.add_user("dr.lee@clinic.example", "pw-7781");
    server.confirm_admin(&user);

    let answer = backend
        .call("has_role", json!({ "_user_id": user.id, "_role": "admin" }))
        .await
        .unwrap();
    assert_eq!(answer, json!(true));

    let err = backend.call("drop_everything", json!({})).await.unwrap_err();
    assert!(err.is_not_found());

    // Audit writes need a signed-in caller and answer with no content.
    let err = backend
        .call("log_audit_event", json!({ "_action": "user_login" }))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Unauthorized));

    backend
        .sign_in_with_password("dr.lee@clinic.example", &password("pw-7781"))
        .await
        .unwrap();
    let answer = backend
        .call("log_audit_event", json!({ "_action": "user_login" }))
        .await
        .unwrap();
    assert!(answer.is_null());
    assert_eq!(server.audit_actions(), vec!["user_login"]);
}

#[tokio::test]
async fn test_expired_session_is_refreshed_on_probe() {
    let (server, backend) = setup().await;
    server.add_user("dr.lee@clinic.example", "pw-7781");
    // Inside the expiry leeway, so the session counts as expired at once.
    server.set_token_ttl(5);

    let first = backend
        .sign_in_with_password("dr.lee@clinic.example", &password("pw-7781"))
        .await
        .unwrap();
    let mut feed = backend.subscribe();

    server.set_token_ttl(3600);
    let fresh = backend.current_session().await.unwrap().unwrap();

    assert_eq!(fresh.user().id, first.user().id);
    assert_ne!(
        fresh.access_token().expose_secret(),
        first.access_token().expose_secret()
    );
    assert_eq!(server.grants(), vec!["password", "refresh_token"]);

    let initial = within(feed.recv()).await.unwrap();
    assert_eq!(initial.event, SessionEvent::InitialSession);
    let refreshed = within(feed.recv()).await.unwrap();
    assert_eq!(refreshed.event, SessionEvent::TokenRefreshed);
}

#[tokio::test]
async fn test_rejected_refresh_drops_session() {
    let (server, backend) = setup().await;
    let user = server.add_user("dr.lee@clinic.example", "pw-7781");
    server.set_token_ttl(5);

    backend
        .sign_in_with_password("dr.lee@clinic.example", &password("pw-7781"))
        .await
        .unwrap();
    let mut feed = backend.subscribe();
    server.revoke_sessions(&user);

    assert!(backend.current_session().await.unwrap().is_none());
    assert_eq!(server.grants(), vec!["password"]);

    let initial = within(feed.recv()).await.unwrap();
    assert_eq!(initial.event, SessionEvent::InitialSession);
    let dropped = within(feed.recv()).await.unwrap();
    assert_eq!(dropped.event, SessionEvent::SignedOut);
    assert!(dropped.session.is_none());
}

#[tokio::test]
async fn test_sign_out_with_revoked_token_still_signs_out() {
    let (server, backend) = setup().await;
    let user = server.add_user("dr.lee@clinic.example", "pw-7781");
    backend
        .sign_in_with_password("dr.lee@clinic.example", &password("pw-7781"))
        .await
        .unwrap();
    server.revoke_sessions(&user);

    backend.sign_out().await.unwrap();

    assert!(backend.current_session().await.unwrap().is_none());
    assert_eq!(server.logouts(), 0);
}
