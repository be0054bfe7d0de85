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

//! Thermal-aware CPU boost tiers. Topology (per-core frequency limits, the
//! big-core set, an optional CPU thermal sensor) is discovered once at
//! construction; every tier application re-reads the temperature and clamps
//! the requested tier before touching any tunable.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::boost::{AtomicRank, BoostLevel};
use crate::config::CpuConfig;
use crate::error::Result;
use crate::sink::TunableSink;

/// One logical CPU as discovered under `cpu_root`.
#[derive(Debug, Clone)]
pub struct CpuCore {
    pub index: usize,
    /// `scaling_min_freq` at daemon startup; restored on idle and shutdown.
    pub original_min: Option<u64>,
    pub max_freq: Option<u64>,
}

/// Immutable snapshot of the CPU and thermal topology.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    pub cores: Vec<CpuCore>,
    /// Indices of cores whose max frequency equals the global max.
    pub big_cores: Vec<usize>,
    pub medium_floor: Option<u64>,
    pub full_floor: Option<u64>,
    pub thermal_path: Option<PathBuf>,
}

impl CpuTopology {
    /// Scan `cpu_root` and `thermal_root` once. Missing pieces (no cpufreq,
    /// no matching thermal zone) leave the corresponding fields empty; only
    /// an unreadable CPU root is an error.
    pub fn discover(cfg: &CpuConfig) -> Result<Self> {
        let mut cores = Vec::new();
        for entry in fs::read_dir(&cfg.cpu_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(index) = extract_index(&name, "cpu") else {
                continue;
            };
            let cpufreq = entry.path().join("cpufreq");
            cores.push(CpuCore {
                index,
                original_min: read_freq(&cpufreq.join("scaling_min_freq")),
                max_freq: read_freq(&cpufreq.join("cpuinfo_max_freq")),
            });
        }
        cores.sort_by_key(|c| c.index);

        let global_max = cores.iter().filter_map(|c| c.max_freq).max();
        let big_cores = match global_max {
            Some(max) => cores
                .iter()
                .filter(|c| c.max_freq == Some(max))
                .map(|c| c.index)
                .collect(),
            None => Vec::new(),
        };

        let topo = Self {
            cores,
            big_cores,
            medium_floor: global_max.map(|m| m / 2),
            full_floor: global_max,
            thermal_path: find_cpu_thermal_zone(&cfg.thermal_root),
        };
        info!(
            "cpu topology: {} cores, {} big, thermal sensor {}",
            topo.cores.len(),
            topo.big_cores.len(),
            topo.thermal_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "absent".to_string()),
        );
        Ok(topo)
    }

    fn min_freq_path(&self, cfg: &CpuConfig, index: usize) -> PathBuf {
        cfg.cpu_root
            .join(format!("cpu{index}"))
            .join("cpufreq")
            .join("scaling_min_freq")
    }
}

/// Parse a trailing decimal index out of names like `cpu4` or
/// `thermal_zone12`. Returns `None` when the prefix does not match or no
/// digits follow it.
pub(crate) fn extract_index(name: &str, prefix: &str) -> Option<usize> {
    let rest = name.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

fn read_freq(path: &Path) -> Option<u64> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}

/// Pick the first thermal zone (sorted by index) whose type names the CPU
/// package and whose temp file is readable.
fn find_cpu_thermal_zone(thermal_root: &Path) -> Option<PathBuf> {
    let mut zones: Vec<(usize, PathBuf)> = fs::read_dir(thermal_root)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            extract_index(&name, "thermal_zone").map(|i| (i, entry.path()))
        })
        .collect();
    zones.sort_by_key(|(i, _)| *i);

    for (_, zone) in zones {
        let Ok(zone_type) = fs::read_to_string(zone.join("type")) else {
            continue;
        };
        let t = zone_type.trim().to_ascii_lowercase();
        if !(t.contains("cpu") || t.contains("cluster") || t.contains("soc")) {
            continue;
        }
        let temp = zone.join("temp");
        if read_millideg(&temp).is_some() {
            return Some(temp);
        }
    }
    None
}

fn read_millideg(path: &Path) -> Option<i64> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}

/// Applies boost tiers to scheduler boost groups and big-core frequency
/// floors, clamped by the live CPU temperature.
pub struct CpuBoostController {
    sink: Arc<dyn TunableSink>,
    cfg: CpuConfig,
    topology: CpuTopology,
    current: AtomicRank,
}

impl CpuBoostController {
    pub fn new(sink: Arc<dyn TunableSink>, cfg: CpuConfig) -> Result<Self> {
        let topology = CpuTopology::discover(&cfg)?;
        Ok(Self {
            sink,
            cfg,
            topology,
            current: AtomicRank::new(BoostLevel::None.rank()),
        })
    }

    pub fn topology(&self) -> &CpuTopology {
        &self.topology
    }

    /// Current temperature in millidegrees C, or `None` when the sensor is
    /// absent or unreadable. A missing reading never counts as hot.
    pub fn temperature_mdeg(&self) -> Option<i64> {
        let path = self.topology.thermal_path.as_deref()?;
        match read_millideg(path) {
            Some(t) => Some(t),
            None => {
                warn!("thermal sensor unreadable: {}", path.display());
                None
            }
        }
    }

    fn clamp_for_temperature(&self, requested: BoostLevel) -> BoostLevel {
        let Some(temp) = self.temperature_mdeg() else {
            return requested;
        };
        if temp >= self.cfg.critical_temp_mdeg {
            info!("critical temperature {} mC, forcing boost off", temp);
            return BoostLevel::None;
        }
        if temp >= self.cfg.warning_temp_mdeg && requested.outranks(BoostLevel::Light) {
            info!(
                "warning temperature {} mC, clamping {} to light",
                temp, requested
            );
            return BoostLevel::Light;
        }
        requested
    }

    /// Apply `requested`, clamped by temperature. Individual write failures
    /// are logged by the sink and never abort the remaining writes.
    pub fn apply_performance_boost(&self, requested: BoostLevel) {
        let effective = self.clamp_for_temperature(requested);
        debug!("applying boost tier {}", effective);
        match effective {
            BoostLevel::None => {
                self.restore_min_freqs();
                self.write_boost_group(
                    &self.cfg.boost_group_top_app,
                    self.cfg.idle_top_app_boost,
                );
                self.write_boost_group(
                    &self.cfg.boost_group_foreground,
                    self.cfg.idle_foreground_boost,
                );
            }
            BoostLevel::Light => {
                self.write_boost_group(
                    &self.cfg.boost_group_foreground,
                    self.cfg.light_foreground_boost,
                );
            }
            BoostLevel::Medium => {
                self.write_boost_group(
                    &self.cfg.boost_group_top_app,
                    self.cfg.medium_top_app_boost,
                );
                if let Some(floor) = self.topology.medium_floor {
                    self.raise_big_core_floors(floor);
                }
            }
            BoostLevel::Full => {
                self.write_boost_group(
                    &self.cfg.boost_group_top_app,
                    self.cfg.full_top_app_boost,
                );
                if let Some(floor) = self.topology.full_floor {
                    self.raise_big_core_floors(floor);
                }
            }
        }
        self.current.store(effective.rank());
    }

    /// Put every touched tunable back to its startup value and record the
    /// idle level. Used on boost expiry (via `apply_performance_boost(None)`)
    /// and on daemon shutdown.
    pub fn restore_defaults(&self) {
        self.restore_min_freqs();
        self.write_boost_group(
            &self.cfg.boost_group_top_app,
            self.cfg.idle_top_app_boost,
        );
        self.write_boost_group(
            &self.cfg.boost_group_foreground,
            self.cfg.idle_foreground_boost,
        );
        self.current.store(BoostLevel::None.rank());
    }

    pub fn current_level(&self) -> BoostLevel {
        BoostLevel::from_rank(self.current.load())
    }

    fn write_boost_group(&self, path: &Path, value: u32) {
        self.sink.apply_tweak(path, &value.to_string());
    }

    fn raise_big_core_floors(&self, floor: u64) {
        for &index in &self.topology.big_cores {
            let path = self.topology.min_freq_path(&self.cfg, index);
            self.sink.apply_tweak(&path, &floor.to_string());
        }
    }

    fn restore_min_freqs(&self) {
        for core in &self.topology.cores {
            let Some(original) = core.original_min else {
                continue;
            };
            let path = self.topology.min_freq_path(&self.cfg, core.index);
            self.sink.apply_tweak(&path, &original.to_string());
        }
    }
}
