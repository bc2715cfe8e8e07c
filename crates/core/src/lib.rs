//! `fieldops-core` — shared domain building blocks.
//!
//! Pure domain primitives used by the job model and the client: the error
//! model and identifiers that are not owned by the job store.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::UserId;
