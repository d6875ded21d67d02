// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! The per-CPU executor: fetch/decode/dispatch plus the worker loop that
//! ties it to the scheduler and the timer (§4.6, §4.7).
//!
//! Argument layout per opcode follows the reference's `cpu.c::run`:
//! `ALLOC [size, rgid]`, `FREE [rgid]`, `READ [rgid, offset]`,
//! `WRITE [byte, rgid, offset]`, `SYSCALL [selector, a1, a2]`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::OsResult;
use crate::mm::Memory;
use crate::proc::{Instruction, Opcode, Pcb};
use crate::sched::Scheduler;
use crate::syscall;

/// `run(proc)` / `execute_one`: dispatch a single instruction. The two
/// stdout diagnostic lines are part of the external interface (§6) and
/// must be reproduced exactly.
pub fn execute_one(pcb: &mut Pcb, memory: &Mutex<Memory>, scheduler: &Mutex<Scheduler>) -> OsResult<i64> {
    let ins: Instruction = pcb.fetch()?;
    match ins.opcode {
        Opcode::Calc => Ok(0),

        Opcode::Alloc => {
            let size = ins.args[0] as usize;
            let rgid = ins.args[1] as usize;
            let mut mem = memory.lock().unwrap();
            match pcb.address_space.alloc(&mut mem, rgid, size) {
                Ok(addr) => {
                    println!("PID={} - Region={} - Address={:08x} - Size={} byte", pcb.pid, rgid, addr, size);
                    log::trace!("{}", pcb.address_space);
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("ALLOCATION FAILED for PID={} Region={} Size={}", pcb.pid, rgid, size);
                    Err(e)
                }
            }
        }

        Opcode::Free => {
            let rgid = ins.args[0] as usize;
            println!("PID={} - Region={}", pcb.pid, rgid);
            let mut mem = memory.lock().unwrap();
            let result = pcb.address_space.free(&mut mem, rgid);
            log::trace!("{}", pcb.address_space);
            result.map(|_| 0)
        }

        Opcode::Read => {
            let rgid = ins.args[0] as usize;
            let offset = ins.args[1] as usize;
            let mut mem = memory.lock().unwrap();
            let byte = pcb.address_space.read(&mut mem, rgid, offset)?;
            log::debug!("PID={} read region {} offset {}: {}", pcb.pid, rgid, offset, byte);
            Ok(byte as i64)
        }

        Opcode::Write => {
            let byte = ins.args[0] as u8;
            let rgid = ins.args[1] as usize;
            let offset = ins.args[2] as usize;
            let mut mem = memory.lock().unwrap();
            pcb.address_space.write(&mut mem, rgid, offset, byte)?;
            Ok(0)
        }

        Opcode::Syscall => {
            let selector = ins.args[0];
            let a1 = ins.args[1];
            let a2 = ins.args[2];
            let mut mem = memory.lock().unwrap();
            let mut sched = scheduler.lock().unwrap();
            syscall::dispatch(pcb, &mut mem, &mut sched, selector, a1, a2)
        }
    }
}

/// `cpu_routine`: pull a process, run it until its slot expires or it
/// finishes, hand it back. `tick` blocks until the next virtual slot and is
/// injected so the harness owns the actual timer.
pub fn run_worker(
    id: usize,
    time_slot: u32,
    scheduler: &Mutex<Scheduler>,
    memory: &Mutex<Memory>,
    done: &AtomicBool,
    mut tick: impl FnMut(),
) {
    let mut current: Option<Pcb> = None;
    let mut slot_left: u32 = 0;

    loop {
        if let Some(pcb) = current.as_ref() {
            if pcb.finished() {
                let mut finished = current.take().unwrap();
                log::info!("CPU {}: process {:2} has finished", id, finished.pid);
                {
                    let mut mem = memory.lock().unwrap();
                    finished.address_space.release_all_frames(&mut mem);
                }
                scheduler.lock().unwrap().retire(finished.pid);
                slot_left = 0;
            } else if slot_left == 0 {
                let expired = current.take().unwrap();
                if let Err(e) = scheduler.lock().unwrap().put_proc(expired) {
                    log::warn!("CPU {}: could not return expired process: {}", id, e);
                }
            }
        }

        if current.is_none() {
            current = scheduler.lock().unwrap().get_proc();
        }

        if current.is_none() {
            if done.load(Ordering::Acquire) {
                log::info!("CPU {} stopped", id);
                break;
            }
            tick();
            continue;
        }

        if slot_left == 0 {
            slot_left = time_slot;
            println!("CPU {}: Dispatched process {:2}", id, current.as_ref().unwrap().pid);
        }

        let pcb = current.as_mut().unwrap();
        if let Err(e) = execute_one(pcb, memory, scheduler) {
            log::warn!("CPU {}: PID {} instruction failed: {}", id, pcb.pid, e);
        }
        slot_left -= 1;
        tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memphy::{AccessMode, PhysDevice};
    use crate::sched::Strategy;
    use std::sync::atomic::AtomicBool;

    fn memory() -> Mutex<Memory> {
        Mutex::new(Memory::new(
            PhysDevice::new("ram", 256, 64, AccessMode::Random),
            vec![PhysDevice::new("swap0", 256, 64, AccessMode::Random)],
        ))
    }

    #[test]
    fn execute_one_runs_alloc_then_write_then_read() {
        let mem = memory();
        let sched = Mutex::new(Scheduler::new(Strategy::Mlq, 4));
        let code = vec![
            Instruction::new(Opcode::Alloc, [40, 0, 0]),
            Instruction::new(Opcode::Write, [9, 0, 5]),
            Instruction::new(Opcode::Read, [0, 5, 0]),
        ];
        let mut pcb = Pcb::new(1, 0, "p".to_string(), code, 64);
        execute_one(&mut pcb, &mem, &sched).unwrap();
        execute_one(&mut pcb, &mem, &sched).unwrap();
        let value = execute_one(&mut pcb, &mem, &sched).unwrap();
        assert_eq!(value, 9);
    }

    #[test]
    fn single_process_completes_within_expected_slots() {
        let mem = memory();
        let sched = Mutex::new(Scheduler::new(Strategy::Mlq, 4));
        let code = vec![Instruction::new(Opcode::Calc, [0, 0, 0]); 4];
        let pcb = Pcb::new(1, 0, "p".to_string(), code, 64);
        sched.lock().unwrap().add_proc(pcb).unwrap();
        let done = AtomicBool::new(true);
        let mut ticks = 0u32;
        run_worker(0, 2, &sched, &mem, &done, || ticks += 1);
        assert!(sched.lock().unwrap().is_empty());
        assert!(ticks >= 4);
    }
}
