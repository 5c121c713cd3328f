//! pedkit-ceremony: split-knowledge key assembly
//!
//! Two or three custodians each enter one component; the key is the XOR of
//! all components. Custodians verify their own component by its KCV, and the
//! assembled key is only ever persisted once every component is in.
//!
//! ```text
//! NotStarted ──start──▶ InProgress ──finalize──▶ Completed
//!      ▲                    │
//!      └──────cancel────────┘
//! ```

pub mod error;
pub mod session;

pub use error::{CeremonyError, CeremonyResult};
pub use session::{
    CeremonyOutcome, CeremonySession, CeremonyState, CeremonyStatus, ComponentReceipt,
};
