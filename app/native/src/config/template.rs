//! Settings template generation.
//!
//! Generates a commented settings file documenting every option.

use std::fs;
use std::path::Path;

/// Generates a settings template with all options commented out.
#[must_use]
pub fn generate_config_template() -> String {
    r##"// Mirage Settings
// ===============
// This file uses JSONC format (JSON with comments).
// All options below are commented out and show their default values.
// Uncomment and modify the options you want to configure.

{
  // Where the display list is stored. Defaults to displays.json next to this file.
  // "storePath": "~/.config/mirage/displays.json",

  // "fleet": {
  //   // Vendor/product ids stamped on every managed display
  //   "identity": { "vendorId": 13398, "productId": 4660 },
  //
  //   // How long to wait for the OS to confirm a display was torn down (ms)
  //   "terminationTimeoutMs": 2000,
  //
  //   // How long to wait for a torn-down display to leave the topology (ms)
  //   "offlineTimeoutMs": 8000,
  //
  //   // Offline gate shared by every display during a coordinated rebuild (ms)
  //   "rebuildOfflineTimeoutMs": 10000,
  //
  //   // Pause before recreating displays during a rebuild (ms)
  //   "creationCooldownMs": 500,
  //
  //   // Creation retries after a confirmed teardown
  //   "cleanRetry": { "attempts": 3, "baseDelayMs": 250, "growing": false, "maxDelayMs": 250 },
  //
  //   // Creation retries when only the offline check succeeded
  //   "conservativeRetry": { "attempts": 10, "baseDelayMs": 250, "growing": true, "maxDelayMs": 2000 },
  //
  //   // Samples required before the topology counts as stable
  //   "stability": {
  //     "requiredSamples": 3,
  //     "deadlineMs": 6000,
  //     "initialIntervalMs": 50,
  //     "maxIntervalMs": 400
  //   },
  //
  //   // Repair passes before the final health check
  //   "maxRepairAttempts": 2,
  //
  //   // Horizontal gap between managed displays after a repair (px)
  //   "layoutGap": 0,
  //
  //   // Offline re-check interval while topology events arrive (ms)
  //   "eventPollIntervalMs": 500,
  //
  //   // Offline poll interval when topology events are unavailable (ms)
  //   "fallbackPollIntervalMs": 100
  // }
}
"##
    .to_string()
}

/// Creates a settings file with the template at the specified path.
///
/// Creates parent directories if they don't exist.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn create_config_file(path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, generate_config_template())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirageConfig;

    #[test]
    fn test_template_parses_to_defaults() {
        let template = generate_config_template();
        let stripped = json_comments::StripComments::new(template.as_bytes());
        let config: MirageConfig = serde_json::from_reader(stripped).unwrap();
        assert_eq!(config, MirageConfig::default());
    }

    #[test]
    fn test_template_mentions_every_fleet_option() {
        let template = generate_config_template();
        for key in [
            "terminationTimeoutMs",
            "offlineTimeoutMs",
            "rebuildOfflineTimeoutMs",
            "creationCooldownMs",
            "cleanRetry",
            "conservativeRetry",
            "stability",
            "maxRepairAttempts",
            "layoutGap",
            "fallbackPollIntervalMs",
        ] {
            assert!(template.contains(key), "missing {key}");
        }
    }

    #[test]
    fn test_create_config_file_creates_parents() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.jsonc");
        create_config_file(&path).unwrap();
        assert!(path.exists());
    }
}
