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

//! Boost request debouncing. Upstream signal sources (touch gestures, any
//! future callers) fire short-lived boost requests; the debouncer merges them
//! into a single expiry deadline that can be escalated or extended but never
//! shortened, and a worker thread drops the CPU back to idle when it passes.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cpu::CpuBoostController;

/// CPU boost tier, ordered by aggressiveness.
///
/// Ordering goes through [`BoostLevel::rank`] so reordering the variants can
/// never silently change comparison results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostLevel {
    None,
    Light,
    Medium,
    Full,
}

impl BoostLevel {
    pub fn rank(self) -> u8 {
        match self {
            BoostLevel::None => 0,
            BoostLevel::Light => 1,
            BoostLevel::Medium => 2,
            BoostLevel::Full => 3,
        }
    }

    /// Total inverse of [`rank`](Self::rank); unknown values map to `None`
    /// so a torn atomic read can never invent a boost.
    pub fn from_rank(rank: u8) -> Self {
        match rank {
            1 => BoostLevel::Light,
            2 => BoostLevel::Medium,
            3 => BoostLevel::Full,
            _ => BoostLevel::None,
        }
    }

    pub fn outranks(self, other: BoostLevel) -> bool {
        self.rank() > other.rank()
    }
}

impl PartialOrd for BoostLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BoostLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for BoostLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BoostLevel::None => "none",
            BoostLevel::Light => "light",
            BoostLevel::Medium => "medium",
            BoostLevel::Full => "full",
        };
        f.write_str(s)
    }
}

struct TimerState {
    deadline: Instant,
    stop: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// Merges concurrent boost requests into one expiry deadline and expires the
/// active boost from a dedicated worker thread.
///
/// Combine rule: a request outranking the effective level escalates and
/// resets the deadline; anything else can only extend it. The deadline is
/// monotonic (`Instant`), so wall-clock jumps cannot shorten a boost.
pub struct BoostDebouncer {
    cpu: Arc<CpuBoostController>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BoostDebouncer {
    pub fn new(cpu: Arc<CpuBoostController>) -> Self {
        Self {
            cpu,
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState {
                    deadline: Instant::now(),
                    stop: false,
                }),
                cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Request `level` for at least `duration` from now.
    ///
    /// Never shortens: if the request does not outrank the effective level
    /// and its candidate expiry is earlier than the current one, it is a
    /// no-op. Safe to call from any thread, before `start()` included.
    pub fn request_boost(&self, level: BoostLevel, duration: Duration) {
        let mut st = self.shared.state.lock().unwrap();
        let candidate = Instant::now() + duration;
        let current = self.cpu.current_level();
        if level.outranks(current) {
            // Escalate-and-reset: the stronger tier takes over with a fresh
            // deadline, even one earlier than the old tier's.
            debug!("boost escalate {} -> {} for {:?}", current, level, duration);
            self.cpu.apply_performance_boost(level);
            st.deadline = candidate;
        } else if candidate > st.deadline {
            debug!("boost extend at {} for {:?}", current, duration);
            st.deadline = candidate;
        }
        drop(st);
        self.shared.cv.notify_all();
    }

    /// Spawn the expiry worker. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        self.shared.state.lock().unwrap().stop = false;
        let shared = Arc::clone(&self.shared);
        let cpu = Arc::clone(&self.cpu);
        let handle = thread::Builder::new()
            .name("kinetune-boost".to_string())
            .spawn(move || expiry_loop(&shared, &cpu))
            .unwrap_or_else(|e| panic!("failed to spawn boost worker: {e}"));
        *worker = Some(handle);
        info!("boost debouncer started");
    }

    /// Stop the worker, join it, and restore the CPU to its idle defaults.
    /// Idempotent; a second call (or a call before `start()`) does nothing.
    pub fn stop(&self) {
        let handle = self.worker.lock().unwrap().take();
        let Some(handle) = handle else { return };
        self.shared.state.lock().unwrap().stop = true;
        self.shared.cv.notify_all();
        let _ = handle.join();
        self.cpu.restore_defaults();
        info!("boost debouncer stopped");
    }

    pub fn current_level(&self) -> BoostLevel {
        self.cpu.current_level()
    }
}

fn expiry_loop(shared: &Shared, cpu: &CpuBoostController) {
    let mut st = shared.state.lock().unwrap();
    loop {
        if st.stop {
            return;
        }
        if cpu.current_level() == BoostLevel::None {
            // Nothing armed; sleep until a request or stop arrives.
            st = shared.cv.wait(st).unwrap();
            continue;
        }
        let now = Instant::now();
        if now >= st.deadline {
            debug!("boost expired, dropping to idle");
            cpu.apply_performance_boost(BoostLevel::None);
            continue;
        }
        let remaining = st.deadline - now;
        let (guard, _timeout) = shared.cv.wait_timeout(st, remaining).unwrap();
        st = guard;
        // Deadline may have been extended while waiting; the loop re-checks
        // against the fresh value rather than trusting the timeout flag.
    }
}

/// Cross-thread mirror of a small state enum, stored as its rank.
pub(crate) struct AtomicRank(AtomicU8);

impl AtomicRank {
    pub fn new(rank: u8) -> Self {
        Self(AtomicU8::new(rank))
    }

    pub fn load(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn store(&self, rank: u8) {
        self.0.store(rank, Ordering::SeqCst);
    }
}
