//! Mirage - a managed fleet of virtual displays.
//!
//! The library keeps a persisted list of virtual display configs and drives
//! each display through its lifecycle on top of an OS display subsystem that
//! confirms teardown late, collapses new displays into mirror sets and moves
//! the main display around. See [`modules::fleet`] for the engine.

pub mod cli;
pub mod config;
pub mod error;
pub mod modules;
pub mod platform;
pub mod schema;
