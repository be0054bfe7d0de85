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

//! Daemon configuration. Every threshold, path and interval the controllers
//! use lives here with defaults matching the stock policy, so a missing
//! config file yields the reference behavior.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::{CalibrationUnit, MemThresholds, MemoryCalibration, MemoryProfile};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub cpu: CpuConfig,
    pub memory: MemoryConfig,
    pub display: DisplayConfig,
}

/// CPU boost tiering: topology roots, thermal policy and the per-tier
/// scheduler boost-group values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CpuConfig {
    pub cpu_root: PathBuf,
    pub thermal_root: PathBuf,
    pub boost_group_top_app: PathBuf,
    pub boost_group_foreground: PathBuf,
    /// Millidegrees C at which requested tiers above LIGHT are clamped down.
    pub warning_temp_mdeg: i64,
    /// Millidegrees C at which every request is forced to NONE.
    pub critical_temp_mdeg: i64,
    pub idle_top_app_boost: u32,
    pub idle_foreground_boost: u32,
    pub light_foreground_boost: u32,
    pub medium_top_app_boost: u32,
    pub full_top_app_boost: u32,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            cpu_root: PathBuf::from("/sys/devices/system/cpu"),
            thermal_root: PathBuf::from("/sys/class/thermal"),
            boost_group_top_app: PathBuf::from("/dev/stune/top-app/schedtune.boost"),
            boost_group_foreground: PathBuf::from("/dev/stune/foreground/schedtune.boost"),
            warning_temp_mdeg: 65_000,
            critical_temp_mdeg: 75_000,
            idle_top_app_boost: 0,
            idle_foreground_boost: 5,
            light_foreground_boost: 10,
            medium_top_app_boost: 15,
            full_top_app_boost: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    pub meminfo_path: PathBuf,
    pub swappiness_path: PathBuf,
    pub vfs_cache_pressure_path: PathBuf,
    /// Optional third tunable; set to null to skip page-cluster writes.
    pub page_cluster_path: Option<PathBuf>,
    pub sample_interval_ms: u64,
    pub calibration: MemoryCalibration,
    pub profile_low: MemoryProfile,
    pub profile_mid: MemoryProfile,
    pub profile_high: MemoryProfile,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            meminfo_path: PathBuf::from("/proc/meminfo"),
            swappiness_path: PathBuf::from("/proc/sys/vm/swappiness"),
            vfs_cache_pressure_path: PathBuf::from("/proc/sys/vm/vfs_cache_pressure"),
            page_cluster_path: Some(PathBuf::from("/proc/sys/vm/page-cluster")),
            sample_interval_ms: 5_000,
            calibration: MemoryCalibration::default(),
            profile_low: MemoryProfile {
                swappiness: 20,
                vfs_cache_pressure: 50,
                page_cluster: Some(1),
            },
            profile_mid: MemoryProfile {
                swappiness: 100,
                vfs_cache_pressure: 100,
                page_cluster: Some(1),
            },
            profile_high: MemoryProfile {
                swappiness: 150,
                vfs_cache_pressure: 200,
                page_cluster: Some(0),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    /// Fixed touch device node. When null the daemon auto-discovers one
    /// under `input_dir` by multi-touch capability bits.
    pub device_path: Option<PathBuf>,
    pub input_dir: PathBuf,
    pub idle_timeout_ms: u64,
    pub low_refresh_hz: f32,
    pub high_refresh_hz: f32,
    pub setting_key: String,
    pub max_consecutive_errors: u32,
    pub reopen_cooldown_ms: u64,
    /// Feed gesture-derived boost pulses into the CPU controller while
    /// draining touch events. Off by default; event content is then ignored.
    pub gesture_boost: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            device_path: None,
            input_dir: PathBuf::from("/dev/input"),
            idle_timeout_ms: 4_000,
            low_refresh_hz: 60.0,
            high_refresh_hz: 90.0,
            setting_key: "min_refresh_rate".to_string(),
            max_consecutive_errors: 10,
            reopen_cooldown_ms: 1_000,
            gesture_boost: false,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/kinetune/config.json")
}

/// Load the daemon configuration. A missing file yields the defaults; a
/// present but malformed file is an error (a silently ignored typo in a
/// thermal threshold is worse than refusing to start).
pub fn load_config(path: Option<&Path>) -> Result<DaemonConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let data = fs::read_to_string(&path)?;
    let cfg: DaemonConfig = serde_json::from_str(&data)?;
    Ok(cfg)
}

pub fn validate_config(cfg: &DaemonConfig) -> std::result::Result<(), String> {
    if cfg.cpu.warning_temp_mdeg >= cfg.cpu.critical_temp_mdeg {
        return Err("cpu: warning_temp_mdeg must be below critical_temp_mdeg".to_string());
    }

    if cfg.memory.sample_interval_ms == 0 {
        return Err("memory: sample_interval_ms must be non-zero".to_string());
    }
    let th: &MemThresholds = &cfg.memory.calibration.thresholds;
    // The hysteresis band only works when the exit points sit between the
    // entry points: go_to_high <= return_from_high <= return_from_low <= go_to_low.
    if !(th.go_to_high <= th.return_to_mid_from_high
        && th.return_to_mid_from_high <= th.return_to_mid_from_low
        && th.return_to_mid_from_low <= th.go_to_low)
    {
        return Err("memory: thresholds do not form a hysteresis band".to_string());
    }
    if cfg.memory.calibration.unit == CalibrationUnit::Percent && th.go_to_low > 100 {
        return Err("memory: percent thresholds must be <= 100".to_string());
    }

    if cfg.display.idle_timeout_ms == 0 {
        return Err("display: idle_timeout_ms must be non-zero".to_string());
    }
    if cfg.display.low_refresh_hz >= cfg.display.high_refresh_hz {
        return Err("display: low_refresh_hz must be below high_refresh_hz".to_string());
    }
    if cfg.display.max_consecutive_errors == 0 {
        return Err("display: max_consecutive_errors must be non-zero".to_string());
    }
    if cfg.display.setting_key.is_empty() {
        return Err("display: setting_key must not be empty".to_string());
    }

    Ok(())
}
