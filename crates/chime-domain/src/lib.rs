//! Domain types shared across the Chime scheduler crates.
//!
//! This crate contains only pure types with no framework dependencies.
//! Import in `usecase/` and `domain/` layers; `infra/` converts to and from them.

pub mod key;
pub mod recurrence;
pub mod request;
