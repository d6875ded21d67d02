// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Configuration file parsing (§6), in the spirit of the reference's
//! `read_config`: a handful of whitespace-separated lines, read with
//! `anyhow::Context` for CLI-facing error messages rather than `OsError`
//! (this layer runs before there is any simulation state to be wrong about).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::memphy::DEFAULT_PAGE_SIZE;
use crate::sched::Strategy;

/// Number of swap devices a run can configure, matching the reference's
/// `PAGING_MAX_MMSWP`.
pub const MAX_SWAP_DEVICES: usize = 4;

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub start_tick: u64,
    pub prog_path: PathBuf,
    pub priority: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub time_slot: u32,
    pub num_cpus: usize,
    pub page_size: usize,
    pub ram_size: usize,
    pub swap_sizes: Vec<usize>,
    pub scheduler: Strategy,
    pub processes: Vec<ProcessSpec>,
}

/// Default priority for a process line that omits one, used under
/// `Strategy::Plain` where priority is not normally supplied up front.
const DEFAULT_PRIORITY: u32 = 5;

/// `read_config`. `path` is resolved relative to `input/`, matching the
/// reference's `strcat(path, "input/")`.
pub fn load(input_dir: &Path, config_name: &str) -> Result<Config> {
    let path = input_dir.join(config_name);
    let text = fs::read_to_string(&path)
        .with_context(|| format!("cannot find configure file at {}", path.display()))?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines.next().context("configure file is empty, missing header line")?;
    let mut header_fields = header.split_whitespace();
    let time_slot: u32 = next_field(&mut header_fields, "time_slot")?;
    let num_cpus: usize = next_field(&mut header_fields, "num_cpus")?;
    let num_processes: usize = next_field(&mut header_fields, "num_processes")?;

    // Fixed, matching the reference's `PAGING_PAGESZ` constant; the optional
    // memory line configures RAM + swap sizes only (§6), not page size.
    let page_size = DEFAULT_PAGE_SIZE;
    let mut ram_size = DEFAULT_PAGE_SIZE * 16;
    let mut swap_sizes = vec![DEFAULT_PAGE_SIZE * 16; MAX_SWAP_DEVICES];
    let mut scheduler = Strategy::Mlq;

    let mut remaining: Vec<&str> = lines.collect();
    loop {
        let Some(&first) = remaining.first() else { break };
        let trimmed = first.trim();
        if let Some(rest) = trimmed.strip_prefix("scheduler") {
            scheduler = match rest.trim() {
                "plain" => Strategy::Plain,
                "mlq" | "" => Strategy::Mlq,
                other => bail!("unknown scheduler strategy '{}'", other),
            };
            remaining.remove(0);
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() == 1 + MAX_SWAP_DEVICES && fields.iter().all(|f| f.parse::<usize>().is_ok()) {
            ram_size = fields[0].parse().unwrap();
            swap_sizes = fields[1..].iter().map(|f| f.parse().unwrap()).collect();
            remaining.remove(0);
            continue;
        }
        break;
    }

    if remaining.len() < num_processes {
        bail!(
            "configure file declares {} processes but only {} lines remain",
            num_processes,
            remaining.len()
        );
    }

    let mut processes = Vec::with_capacity(num_processes);
    for line in remaining.into_iter().take(num_processes) {
        processes.push(parse_process_line(line)?);
    }

    Ok(Config { time_slot, num_cpus, page_size, ram_size, swap_sizes, scheduler, processes })
}

fn next_field<T: std::str::FromStr>(fields: &mut std::str::SplitWhitespace, name: &str) -> Result<T> {
    fields
        .next()
        .with_context(|| format!("configure file header is missing {}", name))?
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("configure file header field {} is not a valid number", name))
}

/// `<start_tick> <prog_basename> [<priority>]`; the program path is
/// resolved as `input/proc/<prog_basename>`.
fn parse_process_line(line: &str) -> Result<ProcessSpec> {
    let mut fields = line.split_whitespace();
    let start_tick: u64 = next_field(&mut fields, "start_tick")?;
    let basename = fields.next().context("process line is missing a program name")?;
    let priority = match fields.next() {
        Some(p) => p.parse().with_context(|| format!("invalid priority '{}'", p))?,
        None => DEFAULT_PRIORITY,
    };
    Ok(ProcessSpec { start_tick, prog_path: PathBuf::from("input/proc").join(basename), priority })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, name: &str, contents: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn parses_header_and_process_lines_without_memory_line() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "basic.cfg", "2 2 1\n0 p0.txt 3\n");
        let cfg = load(dir.path(), "basic.cfg").unwrap();
        assert_eq!(cfg.time_slot, 2);
        assert_eq!(cfg.num_cpus, 2);
        assert_eq!(cfg.processes.len(), 1);
        assert_eq!(cfg.processes[0].priority, 3);
        assert_eq!(cfg.processes[0].prog_path, PathBuf::from("input/proc/p0.txt"));
    }

    #[test]
    fn parses_optional_memory_line() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "mem.cfg", "1 1 1\n128 64 64 64 64\n0 p0.txt\n");
        let cfg = load(dir.path(), "mem.cfg").unwrap();
        assert_eq!(cfg.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(cfg.ram_size, 128);
        assert_eq!(cfg.swap_sizes, vec![64, 64, 64, 64]);
        assert_eq!(cfg.processes[0].priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn parses_scheduler_directive() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "sched.cfg", "1 1 1\nscheduler plain\n0 p0.txt\n");
        let cfg = load(dir.path(), "sched.cfg").unwrap();
        assert_eq!(cfg.scheduler, Strategy::Plain);
    }

    #[test]
    fn errors_when_fewer_process_lines_than_declared() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "short.cfg", "1 1 2\n0 p0.txt\n");
        assert!(load(dir.path(), "short.cfg").is_err());
    }
}
