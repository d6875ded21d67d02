// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! The syscall dispatcher: a dense numeric table routing a selector plus up
//! to two arguments to a handler, reached from the CPU loop's `Syscall`
//! opcode. Houses `memmap`'s four sub-operations and `killall` (§4.4).

use crate::error::{OsError, OsResult};
use crate::mm::{Memory, SwapDirection};
use crate::proc::Pcb;
use crate::sched::Scheduler;

/// `SYSMEM_INC_OP` — extend the caller's VMA.
pub const SYS_MEMMAP_INC: i64 = 1;
/// `SYSMEM_SWP_OP` — copy one frame between RAM and active swap.
pub const SYS_MEMMAP_SWP: i64 = 2;
/// `SYSMEM_IO_READ` — read a byte at a physical RAM address.
pub const SYS_MEMMAP_IO_READ: i64 = 3;
/// `SYSMEM_IO_WRITE` — write a byte at a physical RAM address.
pub const SYS_MEMMAP_IO_WRITE: i64 = 4;
/// `killall` — kill every queued process whose path matches a caller-owned
/// NUL-terminated string.
pub const SYS_KILLALL: i64 = 5;

/// Longest name `killall` will read out of the caller's region before
/// giving up (guards against a missing NUL terminator looping forever).
const MAX_NAME_LEN: usize = 256;

/// `syscall(pcb, nr, regs)`. `selector` is `args[0]` of a `Syscall`
/// instruction, `a1`/`a2` are `args[1]`/`args[2]`. An out-of-range selector
/// is a no-op per §4.4, returning `Ok(0)` rather than an error.
///
/// `killall` needs to reach across PCBs (to remove other queued instances
/// and reclaim their frames), so it alone takes the scheduler; the memmap
/// sub-operations only ever touch the caller's own address space.
#[allow(clippy::too_many_arguments)]
pub fn dispatch(
    pcb: &mut Pcb,
    memory: &mut Memory,
    scheduler: &mut Scheduler,
    selector: i64,
    a1: i64,
    a2: i64,
) -> OsResult<i64> {
    match selector {
        SYS_MEMMAP_INC => {
            let inc_bytes = nonneg(a1)? as usize;
            let old_sbrk = pcb.address_space.sbrk_inc(memory, inc_bytes)?;
            Ok(old_sbrk as i64)
        }
        SYS_MEMMAP_SWP => {
            let ram_fpn = nonneg(a1)? as u32;
            let swap_fpn = nonneg(a2)? as u32;
            pcb.address_space.swap_frame(memory, ram_fpn, swap_fpn, SwapDirection::RamToSwap)?;
            Ok(0)
        }
        SYS_MEMMAP_IO_READ => {
            let phys_addr = nonneg(a1)? as usize;
            Ok(memory.ram.read(phys_addr)? as i64)
        }
        SYS_MEMMAP_IO_WRITE => {
            let phys_addr = nonneg(a1)? as usize;
            let byte = (a2 & 0xFF) as u8;
            memory.ram.write(phys_addr, byte)?;
            Ok(0)
        }
        SYS_KILLALL => {
            let rgid = nonneg(a1)? as usize;
            let name = read_cstring(pcb, memory, rgid)?;
            Ok(kill_all(scheduler, memory, &name) as i64)
        }
        _ => Ok(0),
    }
}

fn nonneg(v: i64) -> OsResult<i64> {
    if v < 0 {
        Err(OsError::InvalidSize)
    } else {
        Ok(v)
    }
}

/// Read a NUL-terminated name out of the caller's own region `rgid`,
/// byte by byte through the paging engine (so a name spanning a page
/// boundary still pages in correctly).
fn read_cstring(pcb: &mut Pcb, memory: &mut Memory, rgid: usize) -> OsResult<String> {
    let mut bytes = Vec::new();
    for offset in 0..MAX_NAME_LEN {
        let byte = pcb.address_space.read(memory, rgid, offset)?;
        if byte == 0 {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.push(byte);
    }
    Err(OsError::StructuralViolation("killall name missing NUL terminator"))
}

/// Remove every queued process matching `name` and reclaim its frames.
/// Does not touch an instance currently executing on a CPU worker (§5, §9).
pub fn kill_all(scheduler: &mut Scheduler, memory: &mut Memory, name: &str) -> usize {
    let mut killed = scheduler.kill_all(name);
    let count = killed.len();
    for pcb in &mut killed {
        pcb.address_space.release_all_frames(memory);
    }
    count
}
