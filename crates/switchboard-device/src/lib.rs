//! Switchboard device.
//!
//! A [`Device`] is one named peer of the broker. It owns a single transport
//! endpoint, walks the join/leave state machine, sends the caller's GET/SET
//! requests through a timed [`CommandQueue`] and answers requests addressed
//! to it from its local [`ParamStore`].
//!
//! The device is driven by its owner: every call to [`Device::tick`] performs
//! at most one bounded poll and then returns, so it can be hosted by any
//! loop or timer.

pub mod command;
pub mod device;
pub mod error;
pub mod mailbox;
pub mod params;
pub mod state;

pub use command::{Command, CommandQueue, IdGenerator, Operation, Request};
pub use device::{Device, Outcome};
pub use error::{DeviceError, DeviceResult};
pub use params::{ParamStore, Params};
pub use state::{ConnectionState, LoopStatus};
