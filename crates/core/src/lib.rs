//! `stockbook-core`: domain building blocks shared by the other crates.
//!
//! This crate contains **pure domain** primitives (no IO, no client concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::RecordId;
