//! Core types for the Switchboard parameter broker.
//!
//! This crate defines the vocabulary shared by the broker and its devices:
//! peer addresses, request IDs, the command set and its frame layout, the
//! value blob codec and the configuration types. It contains no runtime state.

pub mod config;
pub mod error;
pub mod id;
pub mod protocol;
pub mod value;

pub use id::{PeerAddr, RequestId, ID_LEN};
pub use protocol::{Frames, Verb};
pub use value::ValueCodec;
