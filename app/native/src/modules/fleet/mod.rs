//! Managed virtual display fleet.
//!
//! The fleet keeps an ordered, persisted list of virtual display configs and
//! drives each one through its lifecycle on top of an unreliable OS display
//! subsystem:
//!
//! - [`manager`] - the state owner: create, enable, disable, destroy, edits,
//!   rebuilds and restore
//! - [`actor`] - single-task executor around the manager with a cloneable handle
//! - [`teardown`] - termination and offline confirmation of old displays
//! - [`topology`] - health evaluation, repair and stability sampling
//! - [`store`] - persistence of the config list
//! - [`os`] - the contract platform implementations provide
//! - [`sim`] - an in-process display subsystem for tests and the simulator

pub mod actor;
pub mod backoff;
pub mod error;
pub mod manager;
pub mod os;
pub mod sim;
pub mod store;
pub mod teardown;
pub mod topology;
pub mod types;

pub use actor::{FleetActor, FleetHandle};
pub use error::{FleetError, FleetResult};
pub use manager::{CreateRequest, DisplayStatus, FleetManager};
