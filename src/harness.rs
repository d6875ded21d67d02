// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! The concurrency/resource model (§5): a loader thread and `num_cpus` CPU
//! worker threads, all synchronized on a shared discrete-event timer and a
//! pair of mutexes (scheduler, physical memory). State is owned by an
//! `Arc<Harness>` built once in `main` and cloned into every worker closure,
//! rather than kept behind file-scope statics (§9), the way
//! `kernel::arch::hosted`'s own thread-spawning code passes its shared state
//! explicitly into `std::thread::Builder::new().spawn(..)` closures.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use anyhow::Result;

use crate::config::Config;
use crate::cpu;
use crate::loader;
use crate::memphy::{AccessMode, PhysDevice};
use crate::mm::Memory;
use crate::proc::Pid;
use crate::sched::{Scheduler, Strategy};

/// `attach_event`/`next_slot`/`start_timer`: a barrier-style discrete-event
/// clock. The virtual tick only advances once every attached participant
/// (each CPU worker plus the loader) has called [`Timer::next_slot`] for the
/// current round, mirroring the reference's per-thread `timer_id` all
/// driven off one shared clock.
pub struct Timer {
    state: Mutex<TimerState>,
    cvar: Condvar,
}

struct TimerState {
    tick: u64,
    arrived: usize,
    participants: usize,
}

impl Timer {
    pub fn new(participants: usize) -> Arc<Timer> {
        Arc::new(Timer {
            state: Mutex::new(TimerState { tick: 0, arrived: 0, participants }),
            cvar: Condvar::new(),
        })
    }

    pub fn current_tick(&self) -> u64 {
        self.state.lock().unwrap().tick
    }

    /// Block until every remaining participant has reached this round, then
    /// advance.
    pub fn next_slot(&self) {
        let mut state = self.state.lock().unwrap();
        let target = state.tick + 1;
        state.arrived += 1;
        if state.arrived >= state.participants {
            state.tick = target;
            state.arrived = 0;
            self.cvar.notify_all();
        } else {
            state = self.cvar.wait_while(state, |s| s.tick < target).unwrap();
        }
        let _ = state;
    }

    /// Mirrors the reference's `detach_event` before `pthread_exit`: a
    /// participant that will never call `next_slot` again drops out of the
    /// round count, so the barrier no longer waits on it. Without this, the
    /// last participant to finish would strand everyone else that is still
    /// blocked in `next_slot`.
    pub fn leave(&self) {
        let mut state = self.state.lock().unwrap();
        state.participants = state.participants.saturating_sub(1);
        if state.arrived >= state.participants {
            state.tick += 1;
            state.arrived = 0;
            self.cvar.notify_all();
        }
    }
}

/// Shared simulation state, built once per run.
pub struct Harness {
    pub scheduler: Mutex<Scheduler>,
    pub memory: Mutex<Memory>,
    pub done: AtomicBool,
    pub timer: Arc<Timer>,
    pub time_slot: u32,
    pub num_cpus: usize,
    pub page_size: usize,
    pub processes: Vec<crate::config::ProcessSpec>,
}

impl Harness {
    pub fn new(config: &Config) -> Self {
        let ram = PhysDevice::new("ram", config.ram_size, config.page_size, AccessMode::Random);
        let swap = config
            .swap_sizes
            .iter()
            .enumerate()
            .map(|(i, &sz)| PhysDevice::new(swap_name(i), sz, config.page_size, AccessMode::Random))
            .collect();
        Harness {
            scheduler: Mutex::new(Scheduler::with_default_levels(config.scheduler)),
            memory: Mutex::new(Memory::new(ram, swap)),
            done: AtomicBool::new(false),
            timer: Timer::new(config.num_cpus + 1),
            time_slot: config.time_slot,
            num_cpus: config.num_cpus,
            page_size: config.page_size,
            processes: config.processes.clone(),
        }
    }

    /// `main`: spawn the loader and every CPU worker, run to completion.
    pub fn run(self: Arc<Self>) -> Result<()> {
        let loader_harness = Arc::clone(&self);
        let loader_handle = thread::Builder::new()
            .name("loader".to_string())
            .spawn(move || loader_harness.run_loader())?;

        let mut cpu_handles = Vec::with_capacity(self.num_cpus);
        for id in 0..self.num_cpus {
            let h = Arc::clone(&self);
            cpu_handles.push(
                thread::Builder::new().name(format!("cpu-{}", id)).spawn(move || h.run_cpu(id))?,
            );
        }

        for handle in cpu_handles {
            handle.join().expect("CPU worker panicked");
        }
        loader_handle.join().expect("loader panicked");
        Ok(())
    }

    fn run_loader(&self) {
        log::info!("ld_routine");
        for (i, spec) in self.processes.iter().enumerate() {
            while self.timer.current_tick() < spec.start_tick {
                self.timer.next_slot();
            }
            match loader::load_process(i as Pid, &spec.prog_path, spec.priority, self.page_size) {
                Ok(pcb) => {
                    println!(
                        "\tLoaded a process at {}, PID: {} PRIO: {}",
                        spec.prog_path.display(),
                        pcb.pid,
                        pcb.priority
                    );
                    if let Err(e) = self.scheduler.lock().unwrap().add_proc(pcb) {
                        log::warn!("could not admit process {}: {}", i, e);
                    }
                }
                Err(e) => log::warn!("failed to load process {}: {:#}", i, e),
            }
            self.timer.next_slot();
        }
        self.done.store(true, Ordering::Release);
        self.timer.leave();
    }

    fn run_cpu(&self, id: usize) {
        cpu::run_worker(id, self.time_slot, &self.scheduler, &self.memory, &self.done, || self.timer.next_slot());
        self.timer.leave();
    }
}

fn swap_name(i: usize) -> &'static str {
    match i {
        0 => "swap0",
        1 => "swap1",
        2 => "swap2",
        3 => "swap3",
        _ => "swapN",
    }
}

/// Entry point used by `main`: load the configuration and run it to
/// completion. `input_dir` is the `input/` directory the config and program
/// paths are resolved against.
pub fn run_from_config(input_dir: &Path, config_name: &str) -> Result<()> {
    let config = crate::config::load(input_dir, config_name)?;
    Arc::new(Harness::new(&config)).run()
}
