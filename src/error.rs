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

//! Unified error handling for Kinetune.

use std::io;

/// Result type alias using KinetuneError
pub type Result<T> = std::result::Result<T, KinetuneError>;

#[derive(thiserror::Error, Debug)]
pub enum KinetuneError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}
