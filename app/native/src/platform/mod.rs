//! Host platform integrations.
//!
//! - `macos` - CoreGraphics topology inspection and repair (macOS only)
//!
//! Virtual display creation goes through a private framework and is not part
//! of this crate; hosts plug it in through
//! [`DisplayBackend`](crate::modules::fleet::os::DisplayBackend).

#[cfg(target_os = "macos")]
pub mod macos;

use std::sync::Arc;

use crate::modules::fleet::os::TopologyInspector;

/// Topology inspector of the host, if this platform has one.
#[must_use]
pub fn host_inspector() -> Option<Arc<dyn TopologyInspector>> {
    #[cfg(target_os = "macos")]
    {
        Some(Arc::new(macos::CoreGraphicsTopology::new()))
    }
    #[cfg(not(target_os = "macos"))]
    {
        None
    }
}
