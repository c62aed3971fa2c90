//! Application feature modules for Mirage.
//!
//! - [`fleet`] - virtual display fleet lifecycle and topology recovery

pub mod fleet;
