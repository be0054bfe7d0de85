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

//! kinetuned - the Kinetune daemon.
//!
//! Wires a [`SystemSink`] into the three controllers, starts their worker
//! threads and parks until SIGINT/SIGTERM, then stops them in reverse
//! dependency order so every touched tunable is restored.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use anyhow::{bail, Context};
use tracing::{info, warn};

use kinetune::boost::BoostDebouncer;
use kinetune::config::{load_config, validate_config};
use kinetune::cpu::CpuBoostController;
use kinetune::error::KinetuneError;
use kinetune::display::DisplayActivityController;
use kinetune::memory::MemoryPressureController;
use kinetune::sink::SystemSink;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("kinetuned {VERSION} - adaptive resource controller daemon");
    println!();
    println!("USAGE: kinetuned [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -c, --config PATH   Configuration file (default: /etc/kinetune/config.json)");
    println!("  -v, --version       Print version and exit");
    println!("  -h, --help          Print this help and exit");
    println!();
    println!("Log verbosity is controlled by KINETUNE_LOG (default: info).");
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("kinetuned {VERSION}");
                return Ok(());
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("Unknown argument: {arg}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let log_level = std::env::var("KINETUNE_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .init();

    info!("kinetuned {} starting", VERSION);

    // SAFETY: geteuid just returns the process's effective user id.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        bail!("kinetuned must run as root to write kernel tunables (euid {euid})");
    }

    let cfg = load_config(config_path.as_deref()).context("loading configuration")?;
    validate_config(&cfg)
        .map_err(KinetuneError::Config)
        .context("invalid configuration")?;

    let sink = Arc::new(SystemSink);

    let cpu = Arc::new(
        CpuBoostController::new(sink.clone(), cfg.cpu.clone())
            .context("discovering CPU topology")?,
    );
    let boost = Arc::new(BoostDebouncer::new(Arc::clone(&cpu)));
    boost.start();

    let memory = MemoryPressureController::new(sink.clone(), cfg.memory.clone());
    memory.start();

    let display = DisplayActivityController::new(
        sink.clone(),
        cfg.display.clone(),
        Some(Arc::clone(&boost)),
    );
    // A device-less system still gets CPU and memory control.
    if let Err(e) = display.start() {
        warn!("display controller disabled: {}", e);
    }

    info!("all controllers running");

    // Park until a termination signal trips the latch.
    let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            let (lock, cv) = &*shutdown;
            *lock.lock().unwrap() = true;
            cv.notify_all();
        })
        .context("installing signal handler")?;
    }
    {
        let (lock, cv) = &*shutdown;
        let mut stopped = lock.lock().unwrap();
        while !*stopped {
            stopped = cv.wait(stopped).unwrap();
        }
    }

    info!("shutdown signal received, restoring system state");
    display.stop();
    boost.stop();
    memory.stop();

    info!("kinetuned stopped");
    Ok(())
}
