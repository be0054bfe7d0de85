/*
 * This file is part of Kinetune.
 *
 * Copyright (C) 2026 Kinetune contributors
 *
 * Kinetune is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Kinetune is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Kinetune. If not, see <https://www.gnu.org/licenses/>.
 */

//! The tunable sink: the single seam through which every controller touches
//! the system. Controllers never open sysfs files or spawn settings processes
//! themselves; they hand `(path, value)` pairs to a [`TunableSink`] and treat
//! the result as best-effort.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::{debug, warn};

/// External effector for kernel tunables, system properties and settings.
///
/// All writes are best-effort: a `false` return (or a failed property set)
/// is logged by the implementation and must never abort the caller's
/// remaining work.
#[cfg_attr(test, mockall::automock)]
pub trait TunableSink: Send + Sync {
    /// Write `value` to a sysfs/procfs tunable file. Returns write success.
    fn apply_tweak(&self, path: &Path, value: &str) -> bool;

    /// Set a system property (fire-and-forget).
    fn set_property(&self, key: &str, value: &str);

    /// Apply a system setting through the external settings facility.
    /// Returns true only if the facility reported success.
    fn set_setting(&self, property: &str, value: &str) -> bool;
}

/// Production sink writing to the live system.
pub struct SystemSink;

impl TunableSink for SystemSink {
    fn apply_tweak(&self, path: &Path, value: &str) -> bool {
        // Absent paths are a normal condition on heterogeneous kernels.
        if !path.exists() {
            debug!("tunable absent, skipping: {}", path.display());
            return false;
        }
        match fs::write(path, value) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to write {} to {}: {}", value, path.display(), e);
                false
            }
        }
    }

    fn set_property(&self, key: &str, value: &str) {
        match Command::new("setprop").arg(key).arg(value).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("setprop {} exited with {}", key, status),
            Err(e) => warn!("failed to run setprop {}: {}", key, e),
        }
    }

    fn set_setting(&self, property: &str, value: &str) -> bool {
        match Command::new("settings")
            .args(["put", "system", property, value])
            .status()
        {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!("settings put {} {} exited with {}", property, value, status);
                false
            }
            Err(e) => {
                warn!("failed to invoke settings for {}: {}", property, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn apply_tweak_writes_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("swappiness");
        fs::write(&path, "60").unwrap();

        let sink = SystemSink;
        assert!(sink.apply_tweak(&path, "100"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "100");
    }

    #[test]
    fn apply_tweak_skips_missing_path() {
        let dir = TempDir::new().unwrap();
        let sink = SystemSink;
        assert!(!sink.apply_tweak(&dir.path().join("nonexistent"), "1"));
    }

    #[test]
    fn mock_sink_records_expectations() {
        let mut mock = MockTunableSink::new();
        mock.expect_set_setting()
            .withf(|p, v| p == "min_refresh_rate" && v == "60.0")
            .return_const(true);
        assert!(mock.set_setting("min_refresh_rate", "60.0"));
    }
}
