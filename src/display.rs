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

//! Touch-driven display refresh. A monitor thread polls the touch input
//! device: any event raises the minimum refresh rate, a stretch of idle time
//! drops it back. While idle the wait is unbounded; a self-pipe in the poll
//! set lets `stop()` wake it deterministically.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::boost::{AtomicRank, BoostDebouncer, BoostLevel};
use crate::config::DisplayConfig;
use crate::cpu::extract_index;
use crate::error::{KinetuneError, Result};
use crate::sink::TunableSink;

const EV_KEY: u16 = 0x01;
const EV_ABS: u16 = 0x03;
const ABS_MT_POSITION_X: usize = 0x35;
const ABS_MT_POSITION_Y: usize = 0x36;
const BTN_TOOL_FINGER: u16 = 0x145;
const BTN_TOUCH: u16 = 0x14a;

/// EVIOCGBIT(ev, len): read `len` bytes of capability bits for event type
/// `ev` (0 queries the supported event types themselves).
const fn eviocgbit(ev: u32, len: u32) -> libc::c_ulong {
    ((2u64 << 30) | ((len as u64) << 16) | ((b'E' as u64) << 8) | (0x20 + ev as u64))
        as libc::c_ulong
}

fn test_bit(bits: &[u8], n: usize) -> bool {
    bits.get(n / 8).is_some_and(|b| b & (1 << (n % 8)) != 0)
}

/// Raw evdev record as the kernel writes it.
#[repr(C)]
#[derive(Clone, Copy)]
struct InputEvent {
    time: libc::timeval,
    type_: u16,
    code: u16,
    value: i32,
}

const EVENT_SIZE: usize = std::mem::size_of::<InputEvent>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Unknown,
    Low,
    High,
}

impl RefreshMode {
    pub fn rank(self) -> u8 {
        match self {
            RefreshMode::Unknown => 0,
            RefreshMode::Low => 1,
            RefreshMode::High => 2,
        }
    }

    pub fn from_rank(rank: u8) -> Self {
        match rank {
            1 => RefreshMode::Low,
            2 => RefreshMode::High,
            _ => RefreshMode::Unknown,
        }
    }
}

impl std::fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefreshMode::Unknown => "unknown",
            RefreshMode::Low => "low",
            RefreshMode::High => "high",
        };
        f.write_str(s)
    }
}

/// Scan `input_dir` for the first event node (sorted by index) advertising
/// multi-touch absolute axes.
pub fn find_touch_device(input_dir: &Path) -> Option<PathBuf> {
    let mut nodes: Vec<(usize, PathBuf)> = std::fs::read_dir(input_dir)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            extract_index(&name, "event").map(|i| (i, entry.path()))
        })
        .collect();
    nodes.sort_by_key(|(i, _)| *i);

    for (_, path) in nodes {
        let Ok(file) = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
        else {
            continue;
        };
        let fd = file.as_raw_fd();

        let mut ev_bits = [0u8; 4];
        let rc = unsafe {
            libc::ioctl(
                fd,
                eviocgbit(0, ev_bits.len() as u32),
                ev_bits.as_mut_ptr(),
            )
        };
        if rc < 0 || !test_bit(&ev_bits, EV_ABS as usize) {
            continue;
        }

        let mut abs_bits = [0u8; 8];
        let rc = unsafe {
            libc::ioctl(
                fd,
                eviocgbit(EV_ABS as u32, abs_bits.len() as u32),
                abs_bits.as_mut_ptr(),
            )
        };
        if rc >= 0
            && test_bit(&abs_bits, ABS_MT_POSITION_X)
            && test_bit(&abs_bits, ABS_MT_POSITION_Y)
        {
            info!("touch device: {}", path.display());
            return Some(path);
        }
    }
    None
}

/// Classifies drained touch events into boost pulses: a finger press is a
/// light tap, a fast vertical swipe earns a stronger, longer boost.
struct GestureTracker {
    last_y: Option<(i32, Instant)>,
}

impl GestureTracker {
    fn new() -> Self {
        Self { last_y: None }
    }

    fn on_event(
        &mut self,
        type_: u16,
        code: u16,
        value: i32,
        now: Instant,
    ) -> Option<(BoostLevel, Duration)> {
        match type_ {
            EV_KEY if (code == BTN_TOUCH || code == BTN_TOOL_FINGER) && value == 1 => {
                Some((BoostLevel::Light, Duration::from_millis(300)))
            }
            EV_ABS if code == ABS_MT_POSITION_Y as u16 => {
                let prev = self.last_y.replace((value, now));
                let (prev_y, prev_t) = prev?;
                let dy = (value - prev_y).abs();
                let dt = now.duration_since(prev_t);
                if dy > 20 && dt <= Duration::from_millis(30) {
                    Some((BoostLevel::Medium, Duration::from_millis(1000)))
                } else if dy > 5 {
                    Some((BoostLevel::Light, Duration::from_millis(500)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Switches the minimum refresh rate between a low and a high mode based on
/// touch activity, with an idle timeout debounce.
pub struct DisplayActivityController {
    sink: Arc<dyn TunableSink>,
    cfg: DisplayConfig,
    boost: Option<Arc<BoostDebouncer>>,
    mode: Arc<AtomicRank>,
    stop: Arc<AtomicBool>,
    wake: Mutex<Option<OwnedFd>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DisplayActivityController {
    /// `boost` feeds gesture-derived pulses when `cfg.gesture_boost` is on;
    /// `None` disables the feed regardless of config.
    pub fn new(
        sink: Arc<dyn TunableSink>,
        cfg: DisplayConfig,
        boost: Option<Arc<BoostDebouncer>>,
    ) -> Self {
        Self {
            sink,
            cfg,
            boost,
            mode: Arc::new(AtomicRank::new(RefreshMode::Unknown.rank())),
            stop: Arc::new(AtomicBool::new(false)),
            wake: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn current_mode(&self) -> RefreshMode {
        RefreshMode::from_rank(self.mode.load())
    }

    /// Resolve the touch device and spawn the monitor thread. Idempotent.
    /// Fails only when no touch device can be found.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return Ok(());
        }

        let device = match &self.cfg.device_path {
            Some(path) => path.clone(),
            None => find_touch_device(&self.cfg.input_dir).ok_or_else(|| {
                KinetuneError::HardwareNotFound(format!(
                    "no multi-touch device under {}",
                    self.cfg.input_dir.display()
                ))
            })?,
        };

        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        let (wake_rx, wake_tx) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        *self.wake.lock().unwrap() = Some(wake_tx);

        self.stop.store(false, Ordering::SeqCst);
        let monitor = Monitor {
            sink: Arc::clone(&self.sink),
            cfg: self.cfg.clone(),
            boost: if self.cfg.gesture_boost {
                self.boost.clone()
            } else {
                None
            },
            mode: Arc::clone(&self.mode),
            stop: Arc::clone(&self.stop),
            device,
            wake: wake_rx,
        };
        let handle = thread::Builder::new()
            .name("kinetune-display".to_string())
            .spawn(move || monitor.run())
            .unwrap_or_else(|e| panic!("failed to spawn display monitor: {e}"));
        *worker = Some(handle);
        info!("display activity controller started");
        Ok(())
    }

    /// Stop the monitor, join it, and force the low refresh mode. Idempotent.
    pub fn stop(&self) {
        let handle = self.worker.lock().unwrap().take();
        let Some(handle) = handle else { return };
        self.stop.store(true, Ordering::SeqCst);
        if let Some(wake) = self.wake.lock().unwrap().take() {
            let buf = [1u8];
            unsafe { libc::write(wake.as_raw_fd(), buf.as_ptr().cast(), 1) };
        }
        let _ = handle.join();
        // Unconditional: even a fail-static monitor leaves the panel low.
        let value = format!("{:.1}", self.cfg.low_refresh_hz);
        self.sink.set_setting(&self.cfg.setting_key, &value);
        self.mode.store(RefreshMode::Low.rank());
        info!("display activity controller stopped, refresh forced low");
    }
}

struct Monitor {
    sink: Arc<dyn TunableSink>,
    cfg: DisplayConfig,
    boost: Option<Arc<BoostDebouncer>>,
    mode: Arc<AtomicRank>,
    stop: Arc<AtomicBool>,
    device: PathBuf,
    wake: OwnedFd,
}

impl Monitor {
    fn run(&self) {
        let mut consecutive = 0u32;
        let mut last_activity: Option<Instant> = None;
        let mut gestures = GestureTracker::new();

        self.set_mode(RefreshMode::Low);

        'reopen: loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let mut file = match OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.device)
            {
                Ok(f) => f,
                Err(e) => {
                    warn!("cannot open {}: {}", self.device.display(), e);
                    if self.bump_errors(&mut consecutive) {
                        return;
                    }
                    continue 'reopen;
                }
            };

            loop {
                if self.stop.load(Ordering::SeqCst) {
                    return;
                }

                // While high, wake in time to apply the idle drop; while low
                // there is nothing to debounce, so wait for input forever.
                let timeout: libc::c_int = if self.current_mode() == RefreshMode::High {
                    let deadline = last_activity
                        .map(|t| t + Duration::from_millis(self.cfg.idle_timeout_ms));
                    match deadline {
                        Some(d) => {
                            let now = Instant::now();
                            if now >= d {
                                self.set_mode(RefreshMode::Low);
                                continue;
                            }
                            (d - now).as_millis().min(i32::MAX as u128) as libc::c_int
                        }
                        None => -1,
                    }
                } else {
                    -1
                };

                let mut fds = [
                    libc::pollfd {
                        fd: file.as_raw_fd(),
                        events: libc::POLLIN,
                        revents: 0,
                    },
                    libc::pollfd {
                        fd: self.wake.as_raw_fd(),
                        events: libc::POLLIN,
                        revents: 0,
                    },
                ];
                let rc = unsafe { libc::poll(fds.as_mut_ptr(), 2, timeout) };
                if rc < 0 {
                    let e = io::Error::last_os_error();
                    if e.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    warn!("poll failed on {}: {}", self.device.display(), e);
                    if self.bump_errors(&mut consecutive) {
                        return;
                    }
                    continue 'reopen;
                }
                if fds[1].revents & libc::POLLIN != 0 {
                    return;
                }
                if rc == 0 {
                    continue;
                }
                if fds[0].revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                    warn!("{} hung up", self.device.display());
                    if self.bump_errors(&mut consecutive) {
                        return;
                    }
                    continue 'reopen;
                }
                if fds[0].revents & libc::POLLIN == 0 {
                    continue;
                }

                match self.drain(&mut file, &mut gestures) {
                    Ok(true) => {
                        consecutive = 0;
                        last_activity = Some(Instant::now());
                        if self.current_mode() != RefreshMode::High {
                            self.set_mode(RefreshMode::High);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("read failed on {}: {}", self.device.display(), e);
                        if self.bump_errors(&mut consecutive) {
                            return;
                        }
                        continue 'reopen;
                    }
                }
            }
        }
    }

    /// Returns true when the error budget is exhausted and the monitor must
    /// give up (fail-static: the current mode is left as-is). Otherwise
    /// sleeps the reopen cooldown.
    fn bump_errors(&self, consecutive: &mut u32) -> bool {
        *consecutive += 1;
        if *consecutive >= self.cfg.max_consecutive_errors {
            error!(
                "{} consecutive input errors, giving up on {}",
                consecutive,
                self.device.display()
            );
            return true;
        }
        thread::sleep(Duration::from_millis(self.cfg.reopen_cooldown_ms));
        false
    }

    /// Read until the device would block. Returns whether any event arrived.
    /// `Ok(0)` from a character device means it disappeared underneath us.
    fn drain(&self, file: &mut File, gestures: &mut GestureTracker) -> io::Result<bool> {
        let mut buf = [0u8; EVENT_SIZE * 64];
        let mut any = false;
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "input device closed",
                    ))
                }
                Ok(n) => {
                    any = true;
                    if let Some(boost) = &self.boost {
                        let now = Instant::now();
                        for chunk in buf[..n].chunks_exact(EVENT_SIZE) {
                            let ev: InputEvent =
                                unsafe { std::ptr::read_unaligned(chunk.as_ptr().cast()) };
                            if let Some((level, dur)) =
                                gestures.on_event(ev.type_, ev.code, ev.value, now)
                            {
                                boost.request_boost(level, dur);
                            }
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(any),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn current_mode(&self) -> RefreshMode {
        RefreshMode::from_rank(self.mode.load())
    }

    /// No-op when already in `target`. The mode is only recorded after the
    /// settings write succeeds, so a failed write is retried on the next
    /// activity edge.
    fn set_mode(&self, target: RefreshMode) {
        if self.current_mode() == target {
            return;
        }
        let hz = match target {
            RefreshMode::High => self.cfg.high_refresh_hz,
            _ => self.cfg.low_refresh_hz,
        };
        let value = format!("{hz:.1}");
        if self.sink.set_setting(&self.cfg.setting_key, &value) {
            debug!("refresh mode -> {} ({} Hz)", target, value);
            self.mode.store(target.rank());
        } else {
            warn!("refresh setting write failed, staying {}", self.current_mode());
        }
    }
}
