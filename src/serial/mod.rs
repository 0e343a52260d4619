//! Serial link to the window actuator.
//! This file declares the other files in this directory as sub-modules.

pub mod codec;
pub mod link;
pub mod memory;
pub mod protocol;
pub mod simulator;
pub mod transport;

pub use link::{ActuatorLink, LinkSettings, LinkState};
pub use transport::{PortProvider, SerialTransport, SystemPorts};
