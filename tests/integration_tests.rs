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

//! Cross-module tests: whole-daemon wiring against fake sysfs/procfs trees,
//! with a recording sink standing in for the live system.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use kinetune::boost::{BoostDebouncer, BoostLevel};
use kinetune::config::{CpuConfig, MemoryConfig};
use kinetune::cpu::CpuBoostController;
use kinetune::memory::{MemoryPressureController, MemoryState};
use kinetune::sink::TunableSink;

/// Records every effector call; settings writes can be forced to fail.
#[derive(Default)]
struct RecordingSink {
    tweaks: Mutex<Vec<(PathBuf, String)>>,
    settings: Mutex<Vec<(String, String)>>,
    fail_settings: AtomicBool,
}

impl RecordingSink {
    fn write_count(&self, path: &Path, value: &str) -> usize {
        self.tweaks
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, v)| p == path && v == value)
            .count()
    }

    fn wrote(&self, path: &Path, value: &str) -> bool {
        self.write_count(path, value) > 0
    }

    fn last_setting(&self, key: &str) -> Option<String> {
        self.settings
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
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

struct Fixture {
    dir: TempDir,
    cpu_cfg: CpuConfig,
}

impl Fixture {
    /// Two little cores and two big cores, no thermal sensor.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cpu_root = dir.path().join("cpu");
        for (i, (min, max)) in [
            (300_000u64, 1_800_000u64),
            (300_000, 1_800_000),
            (500_000, 2_400_000),
            (500_000, 2_400_000),
        ]
        .iter()
        .enumerate()
        {
            let cpufreq = cpu_root.join(format!("cpu{i}")).join("cpufreq");
            fs::create_dir_all(&cpufreq).unwrap();
            fs::write(cpufreq.join("scaling_min_freq"), format!("{min}\n")).unwrap();
            fs::write(cpufreq.join("cpuinfo_max_freq"), format!("{max}\n")).unwrap();
        }
        let thermal_root = dir.path().join("thermal");
        fs::create_dir_all(&thermal_root).unwrap();

        let cpu_cfg = CpuConfig {
            cpu_root,
            thermal_root,
            boost_group_top_app: dir.path().join("top-app-boost"),
            boost_group_foreground: dir.path().join("foreground-boost"),
            ..CpuConfig::default()
        };
        Self { dir, cpu_cfg }
    }

    fn with_temp(self, mdeg: i64) -> Self {
        let zone = self.dir.path().join("thermal").join("thermal_zone0");
        fs::create_dir_all(&zone).unwrap();
        fs::write(zone.join("type"), "soc-thermal\n").unwrap();
        fs::write(zone.join("temp"), format!("{mdeg}\n")).unwrap();
        self
    }

    fn write_meminfo(&self, total_kb: u64, available_kb: u64) {
        fs::write(
            self.dir.path().join("meminfo"),
            format!("MemTotal: {total_kb} kB\nMemAvailable: {available_kb} kB\n"),
        )
        .unwrap();
    }

    fn memory_cfg(&self, interval_ms: u64) -> MemoryConfig {
        MemoryConfig {
            meminfo_path: self.dir.path().join("meminfo"),
            swappiness_path: self.dir.path().join("swappiness"),
            vfs_cache_pressure_path: self.dir.path().join("vfs_cache_pressure"),
            page_cluster_path: Some(self.dir.path().join("page-cluster")),
            sample_interval_ms: interval_ms,
            ..MemoryConfig::default()
        }
    }

    fn min_freq(&self, index: usize) -> PathBuf {
        self.cpu_cfg
            .cpu_root
            .join(format!("cpu{index}/cpufreq/scaling_min_freq"))
    }
}

#[test]
#[serial]
fn boost_lifecycle_restores_cpu_state() {
    let fx = Fixture::new();
    let sink = Arc::new(RecordingSink::default());
    let cpu = Arc::new(CpuBoostController::new(Arc::clone(&sink) as _, fx.cpu_cfg.clone()).unwrap());
    let boost = Arc::new(BoostDebouncer::new(cpu));
    boost.start();

    boost.request_boost(BoostLevel::Full, Duration::from_secs(60));
    assert_eq!(boost.current_level(), BoostLevel::Full);
    assert!(sink.wrote(&fx.cpu_cfg.boost_group_top_app, "20"));
    assert!(sink.wrote(&fx.min_freq(2), "2400000"));
    assert!(sink.wrote(&fx.min_freq(3), "2400000"));

    boost.stop();
    assert_eq!(boost.current_level(), BoostLevel::None);
    // Every core's original minimum is back, boost groups idle.
    assert!(sink.wrote(&fx.min_freq(0), "300000"));
    assert!(sink.wrote(&fx.min_freq(2), "500000"));
    assert!(sink.wrote(&fx.cpu_cfg.boost_group_top_app, "0"));
    assert!(sink.wrote(&fx.cpu_cfg.boost_group_foreground, "5"));
}

#[test]
#[serial]
fn hot_soc_caps_every_request() {
    let fx = Fixture::new().with_temp(70_000);
    let sink = Arc::new(RecordingSink::default());
    let cpu = Arc::new(CpuBoostController::new(Arc::clone(&sink) as _, fx.cpu_cfg.clone()).unwrap());
    let boost = Arc::new(BoostDebouncer::new(cpu));
    boost.start();

    boost.request_boost(BoostLevel::Full, Duration::from_secs(60));
    assert_eq!(boost.current_level(), BoostLevel::Light);
    assert!(!sink.wrote(&fx.cpu_cfg.boost_group_top_app, "20"));
    assert!(sink.wrote(&fx.cpu_cfg.boost_group_foreground, "10"));
    boost.stop();
}

#[test]
#[serial]
fn memory_controller_tracks_pressure_and_restores_mid() {
    let fx = Fixture::new();
    fx.write_meminfo(4_000_000, 600_000); // 15% available -> HIGH
    let sink = Arc::new(RecordingSink::default());
    let cfg = fx.memory_cfg(20);
    let memory = MemoryPressureController::new(Arc::clone(&sink) as _, cfg.clone());
    memory.start();

    thread::sleep(Duration::from_millis(150));
    assert_eq!(memory.current_state(), MemoryState::High);
    assert!(sink.wrote(&cfg.swappiness_path, "150"));
    assert!(sink.wrote(&cfg.vfs_cache_pressure_path, "200"));

    // Recovery past the hysteresis margin brings it back to MID once.
    fx.write_meminfo(4_000_000, 1_200_000); // 30%
    thread::sleep(Duration::from_millis(150));
    assert_eq!(memory.current_state(), MemoryState::Mid);
    assert_eq!(sink.write_count(&cfg.swappiness_path, "100"), 1);

    memory.stop();
    // Shutdown re-applies the MID profile as the safe default.
    assert_eq!(sink.write_count(&cfg.swappiness_path, "100"), 2);
}

#[test]
#[serial]
fn full_stack_shutdown_order_leaves_system_calm() {
    let fx = Fixture::new();
    fx.write_meminfo(4_000_000, 2_400_000); // 60% -> LOW
    let sink = Arc::new(RecordingSink::default());

    let cpu = Arc::new(CpuBoostController::new(Arc::clone(&sink) as _, fx.cpu_cfg.clone()).unwrap());
    let boost = Arc::new(BoostDebouncer::new(cpu));
    boost.start();
    let memory = MemoryPressureController::new(Arc::clone(&sink) as _, fx.memory_cfg(20));
    memory.start();

    boost.request_boost(BoostLevel::Medium, Duration::from_secs(60));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(boost.current_level(), BoostLevel::Medium);
    assert_eq!(memory.current_state(), MemoryState::Low);

    boost.stop();
    memory.stop();

    assert_eq!(boost.current_level(), BoostLevel::None);
    assert_eq!(memory.current_state(), MemoryState::Mid);
    assert!(sink.wrote(&fx.min_freq(2), "500000"));
    let mem_cfg = fx.memory_cfg(20);
    assert!(sink.wrote(&mem_cfg.swappiness_path, "100"));

    // Double stop stays quiet.
    let tweaks_before = sink.tweaks.lock().unwrap().len();
    boost.stop();
    memory.stop();
    assert_eq!(sink.tweaks.lock().unwrap().len(), tweaks_before);
}

#[test]
#[serial]
fn medium_boost_uses_half_max_floor() {
    let fx = Fixture::new();
    let sink = Arc::new(RecordingSink::default());
    let cpu = Arc::new(CpuBoostController::new(Arc::clone(&sink) as _, fx.cpu_cfg.clone()).unwrap());
    let boost = Arc::new(BoostDebouncer::new(cpu));

    boost.request_boost(BoostLevel::Medium, Duration::from_secs(5));
    assert!(sink.wrote(&fx.cpu_cfg.boost_group_top_app, "15"));
    assert!(sink.wrote(&fx.min_freq(2), "1200000"));
    // Little cores keep their own minimums.
    assert!(!sink.wrote(&fx.min_freq(0), "1200000"));
    assert_eq!(sink.last_setting("min_refresh_rate"), None);
}
