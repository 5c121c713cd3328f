//! pedkit-dispatch: host commands to PED and key store, and back.
//!
//! ```text
//!   link bytes ─► FrameCodec ─► MessageParser ─► Dispatcher ─┬─► Ped
//!        ▲                                                   └─► KeyStore
//!        └──────────────── framed reply ◄────────────────────────┘
//! ```
//!
//! [`LinkSession`] drives one link; any number of sessions may share a
//! [`Dispatcher`], which serializes access to its PED.

pub mod dispatcher;
pub mod error;
pub mod keymap;
pub mod link;

pub use dispatcher::Dispatcher;
pub use error::InjectError;
pub use link::{LinkSession, LinkStats};
