//! Core types for the clinic site.
//!
//! This module provides type-safe wrappers for identity concepts.

pub mod email;
pub mod id;
pub mod role;

pub use email::{Email, EmailError};
pub use id::*;
pub use role::Role;
