//! Domain logic for the Atelier generation platform.
//!
//! Pure types and functions only — no I/O. Persistence lives in
//! `atelier-db`, provider integrations in `atelier-providers`.

pub mod breaker;
pub mod cost;
pub mod error;
pub mod lifecycle;
pub mod object_path;
pub mod recovery;
pub mod roles;
pub mod types;
