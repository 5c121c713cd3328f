//! pedkit-store: the key lifecycle store
//!
//! Tracks every key the daemon has injected, generated or assembled:
//!   - one record per KCV, with PED slot, type, algorithm and status
//!   - KEK (storage) and KTK (transport) roles, each held by at most one record
//!   - profiles referencing keys, which block deletion
//!   - key material sealed at rest whenever a wrapping key is available
//!
//! Persistence goes through [`KeyStoreBackend`]; the default is a JSON file
//! flushed atomically after every mutation.

pub mod backend;
pub mod deletion;
pub mod error;
pub mod migrate;
pub mod record;
pub mod store;

pub use backend::{JsonFileBackend, KeyStoreBackend, MemoryBackend, Profiles};
pub use deletion::{BlockedKey, DeletionCheck, DeletionReason, DeletionReport};
pub use error::{StoreError, StoreResult};
pub use migrate::MigrationSummary;
pub use record::{normalize_kcv, KekRole, KeyMaterial, KeyRecord, NewKey};
pub use store::{KeyStore, WrappingKeySource};
