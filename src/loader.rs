// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Guest program loading. The reference's loader is declared out of scope
//! as a component (spec §1), but something has to turn a program file into
//! an instruction stream for the crate to run end to end -- this is that
//! black box's interface, a plain line-oriented text encoding:
//!
//! ```text
//! # comments and blank lines are ignored
//! CALC
//! ALLOC 100 0
//! WRITE 65 0 10
//! READ 0 10
//! FREE 0
//! SYSCALL 5 0 0
//! ```
//!
//! One instruction per line: an opcode name followed by up to three
//! signed-integer arguments.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::proc::{Instruction, Opcode, Pcb, Pid};

fn parse_opcode(name: &str) -> Result<Opcode> {
    match name.to_ascii_uppercase().as_str() {
        "CALC" => Ok(Opcode::Calc),
        "ALLOC" => Ok(Opcode::Alloc),
        "FREE" => Ok(Opcode::Free),
        "READ" => Ok(Opcode::Read),
        "WRITE" => Ok(Opcode::Write),
        "SYSCALL" => Ok(Opcode::Syscall),
        other => bail!("unknown opcode '{}'", other),
    }
}

fn parse_line(line: &str) -> Result<Instruction> {
    let mut fields = line.split_whitespace();
    let opcode_name = fields.next().context("instruction line has no opcode")?;
    let opcode = parse_opcode(opcode_name)?;
    let mut args = [0i64; 3];
    for slot in args.iter_mut() {
        match fields.next() {
            Some(f) => *slot = f.parse().with_context(|| format!("invalid argument '{}'", f))?,
            None => break,
        }
    }
    if fields.next().is_some() {
        bail!("instruction '{}' takes at most 3 arguments", opcode_name);
    }
    Ok(Instruction::new(opcode, args))
}

/// Parse a program file into its instruction stream.
pub fn load_program(path: &Path) -> Result<Vec<Instruction>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot load program at {}", path.display()))?;
    let mut code = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let ins = parse_line(line).with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        code.push(ins);
    }
    Ok(code)
}

/// `load(path)` + PCB construction: parse the program and wrap it in a
/// fresh PCB with its own address space.
pub fn load_process(pid: Pid, path: &Path, priority: u32, page_size: usize) -> Result<Pcb> {
    let code = load_program(path)?;
    let path_str = path.to_string_lossy().into_owned();
    Ok(Pcb::new(pid, priority, path_str, code, page_size))
}
