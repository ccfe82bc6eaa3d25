//! Domain models for the consent protocol.
//!
//! These are the core types shared across all crates.

pub mod access_token;
pub mod consent;
pub mod operator;
pub mod patient;
pub mod prescription;
