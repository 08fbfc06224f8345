//! Switchboard broker.
//!
//! Admits devices with the `HI`/`BYE` handshake, forwards their GET/SET
//! requests to other members and routes each reply back to the requester
//! using the request ID as correlation key.
//!
//! ## Architecture
//!
//! - **membership**: the set of joined devices
//! - **correlation**: in-flight requests keyed by request ID, with staleness reaping
//! - **routing**: the transport-free routing rules ([`BrokerCore`])
//! - **broker**: the dispatch loop that drives the core over a [`RouterTransport`]
//!
//! [`RouterTransport`]: switchboard_wire::RouterTransport

pub mod broker;
pub mod correlation;
pub mod error;
pub mod membership;
pub mod routing;

pub use broker::Broker;
pub use correlation::{CorrelationEntry, CorrelationStore};
pub use error::{BrokerError, BrokerResult};
pub use membership::{MemberEntry, Membership};
pub use routing::{BrokerCore, Outbound};
