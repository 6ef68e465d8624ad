//! Core domain types and utilities for the amber-turnstile platform.
//!
//! This crate provides the foundational ID types, error handling, and shared
//! utilities used by the identity library and the server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{RoleId, UserId};
