// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! CLI entry point: `ossim <config-file>`, config and program paths
//! resolved under `input/` in the current directory, matching the
//! reference's `os [path to configure file]` usage line.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use ossim::harness;

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "ossim".to_string());
    let config_name = match args.next() {
        Some(name) => name,
        None => {
            println!("Usage: {} [path to configure file]", program);
            return ExitCode::FAILURE;
        }
    };

    match run(&config_name) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_name: &str) -> Result<()> {
    harness::run_from_config(Path::new("input"), config_name)
}
