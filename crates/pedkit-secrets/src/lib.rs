//! pedkit-secrets: root of trust for stored key material
//!
//! The KEK never enters the key store. Its raw bytes live in a
//! [`SecurityElement`] (the platform keychain in production); the store only
//! holds a metadata record flagged as KEK storage and asks [`ActiveKek`] for
//! the wrapping key whenever it seals or opens material.

pub mod element;
pub mod error;
pub mod manager;

pub use element::{KeychainElement, MemoryElement, SecurityElement};
pub use error::{KekError, KekResult};
pub use manager::{algorithm_for_length, ActiveKek, KekManager, KekStatus};
