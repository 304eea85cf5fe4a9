//! peer-room-sim library: the simulation behind the `peer-room-sim` binary.
//!
//! Exposed as a library so integration tests can drive simulations directly.

pub mod settings;
pub mod sim;

pub use settings::{DEFAULT_TOPIC, MembershipSnapshot, SimSettings};
pub use sim::{SimNode, Simulation};
