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

//! Shared unit-test fixtures: a recording sink and fake sysfs/procfs trees.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tempfile::TempDir;

use crate::config::CpuConfig;
use crate::sink::TunableSink;

/// A [`TunableSink`] that records every call instead of touching the system.
/// Settings writes can be made to fail to exercise retry paths.
#[derive(Default)]
pub struct RecordingSink {
    tweaks: Mutex<Vec<(PathBuf, String)>>,
    settings: Mutex<Vec<(String, String)>>,
    fail_settings: AtomicBool,
}

impl RecordingSink {
    pub fn fail_settings(&self, fail: bool) {
        self.fail_settings.store(fail, Ordering::SeqCst);
    }

    pub fn wrote(&self, path: &Path, value: &str) -> bool {
        self.write_count(path, value) > 0
    }

    pub fn write_count(&self, path: &Path, value: &str) -> usize {
        self.tweaks
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, v)| p == path && v == value)
            .count()
    }

    pub fn set_setting_seen(&self, key: &str, value: &str) -> bool {
        self.set_setting_count(key, value) > 0
    }

    pub fn set_setting_count(&self, key: &str, value: &str) -> usize {
        self.settings
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, v)| k == key && v == value)
            .count()
    }
}

impl TunableSink for RecordingSink {
    fn apply_tweak(&self, path: &Path, value: &str) -> bool {
        self.tweaks
            .lock()
            .unwrap()
            .push((path.to_path_buf(), value.to_string()));
        true
    }

    fn set_property(&self, _key: &str, _value: &str) {}

    fn set_setting(&self, property: &str, value: &str) -> bool {
        if self.fail_settings.load(Ordering::SeqCst) {
            return false;
        }
        self.settings
            .lock()
            .unwrap()
            .push((property.to_string(), value.to_string()));
        true
    }
}

/// Build a fake cpufreq tree with one `cpuN` entry per `(min, max)` pair and
/// an empty thermal root, returning a [`CpuConfig`] pointing at it.
pub fn fake_cpu_tree(cores: &[(u64, u64)]) -> (TempDir, CpuConfig) {
    let dir = TempDir::new().unwrap();
    let cpu_root = dir.path().join("cpu");
    for (i, (min, max)) in cores.iter().enumerate() {
        let cpufreq = cpu_root.join(format!("cpu{i}")).join("cpufreq");
        fs::create_dir_all(&cpufreq).unwrap();
        fs::write(cpufreq.join("scaling_min_freq"), format!("{min}\n")).unwrap();
        fs::write(cpufreq.join("cpuinfo_max_freq"), format!("{max}\n")).unwrap();
    }
    let thermal_root = dir.path().join("thermal");
    fs::create_dir_all(&thermal_root).unwrap();

    let cfg = CpuConfig {
        cpu_root,
        thermal_root,
        boost_group_top_app: dir.path().join("top-app-boost"),
        boost_group_foreground: dir.path().join("foreground-boost"),
        ..CpuConfig::default()
    };
    (dir, cfg)
}

/// Add a CPU thermal zone reading `mdeg` to a tree built by
/// [`fake_cpu_tree`]. Call before constructing the controller; the sensor is
/// discovered once.
pub fn set_fake_temp(tree_root: &Path, mdeg: i64) {
    let zone = tree_root.join("thermal").join("thermal_zone0");
    fs::create_dir_all(&zone).unwrap();
    fs::write(zone.join("type"), "cpu-thermal\n").unwrap();
    fs::write(zone.join("temp"), format!("{mdeg}\n")).unwrap();
}

/// Write a minimal meminfo file and return its path.
pub fn fake_meminfo(dir: &Path, total_kb: u64, available_kb: u64) -> PathBuf {
    let path = dir.join("meminfo");
    fs::write(
        &path,
        format!(
            "MemTotal:       {total_kb} kB\n\
             MemFree:        {free} kB\n\
             MemAvailable:   {available_kb} kB\n\
             Buffers:        10240 kB\n",
            free = available_kb / 2,
        ),
    )
    .unwrap();
    path
}
