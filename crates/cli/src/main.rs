//! Clinic CLI - sign in to the hosted backend and inspect the resolved
//! authorization state.
//!
//! # Usage
//!
//! ```bash
//! # Sign in and print who you are, your profile, and your effective role
//! clinic-cli login -e dr.lee@clinic.example
//!
//! # Same, then sign out again
//! clinic-cli login -e dr.lee@clinic.example --sign-out
//!
//! # Log every auth state change until Ctrl-C
//! clinic-cli watch -e dr.lee@clinic.example
//! ```
//!
//! # Environment Variables
//!
//! - `CLINIC_BACKEND_URL`, `CLINIC_BACKEND_ANON_KEY` - backend connection (required)
//! - `CLINIC_PASSWORD` - password, when `-p` is not given
//! - `CLINIC_LOG_JSON` - log as JSON instead of text
//! - `SENTRY_DSN` - enable error reporting
//!
//! Variables are also read from a `.env` file in the working directory.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use secrecy::SecretString;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "clinic-cli")]
#[command(author, version, about = "Clinic back-office auth tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Credentials {
    /// Account email address
    #[arg(short, long)]
    email: String,

    /// Account password
    #[arg(short, long, env = "CLINIC_PASSWORD", hide_env_values = true)]
    password: String,
}

impl Credentials {
    fn into_parts(self) -> (String, SecretString) {
        (self.email, SecretString::from(self.password))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and print the resolved auth state
    Login {
        #[command(flatten)]
        credentials: Credentials,

        /// Sign out again after printing
        #[arg(long)]
        sign_out: bool,
    },
    /// Sign in and log auth state changes until interrupted
    Watch {
        #[command(flatten)]
        credentials: Credentials,
    },
}

#[tokio::main]
async fn main() {
    // Both ring and aws-lc may be linked; pick one before any TLS happens.
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();

    let _sentry_guard = telemetry::init_sentry();
    telemetry::init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Login {
            credentials,
            sign_out,
        } => {
            let (email, password) = credentials.into_parts();
            commands::login::run(&email, &password, sign_out).await
        }
        Commands::Watch { credentials } => {
            let (email, password) = credentials.into_parts();
            commands::watch::run(&email, &password).await
        }
    }
}
