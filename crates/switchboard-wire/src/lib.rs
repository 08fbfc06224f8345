//! Switchboard transport layer.
//!
//! Moves multipart messages between the broker and its devices with
//! router-style addressing: the broker learns the sender's identity on every
//! inbound message and can address any identity it has seen.
//!
//! ## Architecture
//!
//! - **message**: length-prefixed multipart framing
//! - **transport**: the [`RouterTransport`], [`DealerLink`] and [`Connector`] traits
//! - **tcp**: TCP implementation ([`TcpRouter`], [`TcpConnector`])
//! - **memory**: in-process implementation ([`MemoryHub`]) over tokio channels

pub mod memory;
pub mod message;
pub mod tcp;
pub mod transport;

pub use memory::{MemoryConnector, MemoryHub, MemoryRouter};
pub use message::{read_frames, write_frames, MAX_FRAMES, MAX_MESSAGE_SIZE};
pub use tcp::{TcpConnector, TcpRouter};
pub use transport::{
    Connector, DealerLink, Envelope, RouterEvent, RouterTransport, WireError, LINK_QUEUE_DEPTH,
};
