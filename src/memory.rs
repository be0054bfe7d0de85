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

//! Memory-pressure hysteresis. A sampler thread reads available memory every
//! few seconds, runs it through an asymmetric four-state transition table and
//! rewrites the VM tunables only when the state actually changes, so steady
//! pressure near a threshold cannot flap the profile.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::boost::AtomicRank;
use crate::config::MemoryConfig;
use crate::sink::TunableSink;

/// Pressure regime. `Unknown` exists only before the first successful sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    Unknown,
    Low,
    Mid,
    High,
}

impl MemoryState {
    pub fn rank(self) -> u8 {
        match self {
            MemoryState::Unknown => 0,
            MemoryState::Low => 1,
            MemoryState::Mid => 2,
            MemoryState::High => 3,
        }
    }

    pub fn from_rank(rank: u8) -> Self {
        match rank {
            1 => MemoryState::Low,
            2 => MemoryState::Mid,
            3 => MemoryState::High,
            _ => MemoryState::Unknown,
        }
    }
}

impl std::fmt::Display for MemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryState::Unknown => "unknown",
            MemoryState::Low => "low-pressure",
            MemoryState::Mid => "mid-pressure",
            MemoryState::High => "high-pressure",
        };
        f.write_str(s)
    }
}

/// Unit the thresholds are expressed in. `Percent` compares
/// MemAvailable/MemTotal; `Kb` compares raw MemAvailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationUnit {
    #[default]
    Percent,
    Kb,
}

/// Asymmetric hysteresis thresholds over "availability" in the calibration
/// unit. Entry into HIGH/LOW happens at the outer pair, return to MID at the
/// inner pair, so each extreme state has a dead band on the way out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemThresholds {
    /// Below this, pressure is high (availability is scarce).
    pub go_to_high: i64,
    /// Above this, pressure is low (availability is plentiful).
    pub go_to_low: i64,
    pub return_to_mid_from_low: i64,
    pub return_to_mid_from_high: i64,
}

impl Default for MemThresholds {
    fn default() -> Self {
        Self {
            go_to_high: 20,
            go_to_low: 45,
            return_to_mid_from_low: 40,
            return_to_mid_from_high: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryCalibration {
    pub unit: CalibrationUnit,
    pub thresholds: MemThresholds,
}

/// VM tunable values applied when a state is entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryProfile {
    pub swappiness: u32,
    pub vfs_cache_pressure: u32,
    pub page_cluster: Option<u32>,
}

/// The transition table. Pure over its inputs and unit-agnostic: percent and
/// absolute-KB calibrations both feed it, only the threshold values differ.
pub fn next_state(current: MemoryState, availability: i64, th: &MemThresholds) -> MemoryState {
    match current {
        MemoryState::Unknown => {
            if availability < th.go_to_high {
                MemoryState::High
            } else if availability > th.go_to_low {
                MemoryState::Low
            } else {
                MemoryState::Mid
            }
        }
        MemoryState::High => {
            if availability >= th.return_to_mid_from_high {
                MemoryState::Mid
            } else {
                MemoryState::High
            }
        }
        MemoryState::Mid => {
            if availability < th.go_to_high {
                MemoryState::High
            } else if availability > th.go_to_low {
                MemoryState::Low
            } else {
                MemoryState::Mid
            }
        }
        MemoryState::Low => {
            if availability < th.return_to_mid_from_low {
                MemoryState::Mid
            } else {
                MemoryState::Low
            }
        }
    }
}

/// Parse MemTotal/MemAvailable out of a meminfo-format file and reduce them
/// to availability in the calibration unit. `None` on any read/parse problem
/// (the caller skips the tick).
fn read_availability(path: &Path, unit: CalibrationUnit) -> Option<i64> {
    let data = fs::read_to_string(path).ok()?;
    let mut total_kb: Option<i64> = None;
    let mut available_kb: Option<i64> = None;
    for line in data.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        if key != "MemTotal" && key != "MemAvailable" {
            continue;
        }
        let value: i64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
        if key == "MemTotal" {
            total_kb = Some(value);
        } else {
            available_kb = Some(value);
        }
        if total_kb.is_some() && available_kb.is_some() {
            break;
        }
    }
    let available = available_kb?;
    match unit {
        CalibrationUnit::Kb => Some(available),
        CalibrationUnit::Percent => {
            let total = total_kb?;
            if total <= 0 {
                return None;
            }
            Some(available * 100 / total)
        }
    }
}

/// Condvar-backed stop latch so the sampler sleeps interruptibly.
struct StopLatch {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopLatch {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn trip(&self) {
        *self.stopped.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn reset(&self) {
        *self.stopped.lock().unwrap() = false;
    }

    /// Sleep up to `dur`, waking early if tripped. Returns true when tripped.
    fn wait_timeout(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut stopped = self.stopped.lock().unwrap();
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(stopped, deadline - now).unwrap();
            stopped = guard;
        }
        true
    }
}

/// Periodic sampler driving VM profiles from the hysteresis state machine.
pub struct MemoryPressureController {
    sink: Arc<dyn TunableSink>,
    cfg: MemoryConfig,
    latch: Arc<StopLatch>,
    state: Arc<AtomicRank>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryPressureController {
    pub fn new(sink: Arc<dyn TunableSink>, cfg: MemoryConfig) -> Self {
        Self {
            sink,
            cfg,
            latch: Arc::new(StopLatch::new()),
            state: Arc::new(AtomicRank::new(MemoryState::Unknown.rank())),
            worker: Mutex::new(None),
        }
    }

    pub fn current_state(&self) -> MemoryState {
        MemoryState::from_rank(self.state.load())
    }

    /// Spawn the sampler thread. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        self.latch.reset();
        let sink = Arc::clone(&self.sink);
        let cfg = self.cfg.clone();
        let latch = Arc::clone(&self.latch);
        let state = Arc::clone(&self.state);
        let handle = thread::Builder::new()
            .name("kinetune-memory".to_string())
            .spawn(move || sampler_loop(&sink, &cfg, &latch, &state))
            .unwrap_or_else(|e| panic!("failed to spawn memory sampler: {e}"));
        *worker = Some(handle);
        info!("memory pressure controller started");
    }

    /// Stop the sampler, join it, and put the VM tunables back to the MID
    /// profile as the safe default. Idempotent.
    pub fn stop(&self) {
        let handle = self.worker.lock().unwrap().take();
        let Some(handle) = handle else { return };
        self.latch.trip();
        let _ = handle.join();
        apply_profile(&*self.sink, &self.cfg, &self.cfg.profile_mid, "restore");
        self.state.store(MemoryState::Mid.rank());
        info!("memory pressure controller stopped, MID profile restored");
    }
}

fn sampler_loop(
    sink: &Arc<dyn TunableSink>,
    cfg: &MemoryConfig,
    latch: &StopLatch,
    state: &AtomicRank,
) {
    let interval = Duration::from_millis(cfg.sample_interval_ms);
    let th = &cfg.calibration.thresholds;
    loop {
        let current = MemoryState::from_rank(state.load());
        match read_availability(&cfg.meminfo_path, cfg.calibration.unit) {
            Some(availability) => {
                let next = next_state(current, availability, th);
                if next != current {
                    info!(
                        "memory pressure {} -> {} (availability {})",
                        current, next, availability
                    );
                    let profile = match next {
                        MemoryState::Low => &cfg.profile_low,
                        MemoryState::High => &cfg.profile_high,
                        _ => &cfg.profile_mid,
                    };
                    apply_profile(&**sink, cfg, profile, "transition");
                    state.store(next.rank());
                } else {
                    debug!("memory pressure steady at {} ({})", current, availability);
                }
            }
            None => {
                // State is carried over; the next tick retries.
                warn!("meminfo unreadable, skipping sample");
            }
        }
        if latch.wait_timeout(interval) {
            return;
        }
    }
}

fn apply_profile(sink: &dyn TunableSink, cfg: &MemoryConfig, profile: &MemoryProfile, why: &str) {
    debug!(
        "applying vm profile ({why}): swappiness={} vfs_cache_pressure={}",
        profile.swappiness, profile.vfs_cache_pressure
    );
    sink.apply_tweak(&cfg.swappiness_path, &profile.swappiness.to_string());
    sink.apply_tweak(
        &cfg.vfs_cache_pressure_path,
        &profile.vfs_cache_pressure.to_string(),
    );
    if let (Some(path), Some(value)) = (&cfg.page_cluster_path, profile.page_cluster) {
        sink.apply_tweak(path, &value.to_string());
    }
}
