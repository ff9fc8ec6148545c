//! Clinic Core - Shared types library.
//!
//! This crate provides common types used across the clinic site components:
//! - `auth` - Session and role authorization for the back-office
//! - `cli` - Command-line tools for inspecting auth state
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe user IDs, emails, and roles

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
