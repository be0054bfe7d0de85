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

//! Kinetune - adaptive on-device resource controller for Linux
//!
//! Three feedback-control subsystems, each on its own worker thread:
//! thermal-aware CPU boost tiers with a debounced expiry timer, a
//! memory-pressure hysteresis machine driving VM tunables, and a
//! touch-driven display refresh switch. All hardware access goes through
//! the [`sink::TunableSink`] seam and is best-effort.

pub mod boost;
pub mod config;
pub mod cpu;
pub mod display;
pub mod error;
pub mod memory;
pub mod sink;

#[cfg(test)]
pub mod test_utils;
