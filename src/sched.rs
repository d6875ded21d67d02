// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! The CPU scheduler: a multilevel priority queue with slot-budgeted round
//! robin (the default), or a single ready/run queue with dynamic priority
//! (`Strategy::Plain`) -- a runtime choice standing in for the reference's
//! `MLQ_SCHED` compile-time switch (§9, §C.4 of the expanded spec).

use crate::error::OsResult;
use crate::proc::{Pcb, Pid, Queue, MAX_PRIO};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Mlq,
    Plain,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Mlq
    }
}

/// Scheduler state: MLQ ready queues with per-level slot budgets, or a
/// plain ready/run queue pair, plus a bookkeeping list of currently
/// running pids. Owned explicitly by the harness and passed to whichever
/// worker needs it, rather than living behind a file-scope static (§9).
pub struct Scheduler {
    strategy: Strategy,
    mlq_ready: Vec<Queue>,
    slot: Vec<u32>,
    slot_usage: Vec<u32>,
    ready_queue: Queue,
    run_queue: Queue,
    running_list: Vec<Pid>,
}

impl Scheduler {
    /// `init_scheduler`. `num_priority_levels` stands in for `MAX_PRIO`;
    /// it is a run parameter rather than a fixed constant so a
    /// configuration can size it to its own workload (the default, when a
    /// configuration doesn't say otherwise, is [`MAX_PRIO`]).
    pub fn new(strategy: Strategy, num_priority_levels: u32) -> Self {
        let levels = num_priority_levels.max(1) as usize;
        let slot: Vec<u32> = (0..levels).map(|i| num_priority_levels - i as u32).collect();
        let slot_usage = slot.clone();
        Scheduler {
            strategy,
            mlq_ready: (0..levels).map(|_| Queue::new()).collect(),
            slot,
            slot_usage,
            ready_queue: Queue::new(),
            run_queue: Queue::new(),
            running_list: Vec::new(),
        }
    }

    pub fn with_default_levels(strategy: Strategy) -> Self {
        Self::new(strategy, MAX_PRIO)
    }

    /// `queue_empty`.
    pub fn is_empty(&self) -> bool {
        match self.strategy {
            Strategy::Mlq => self.mlq_ready.iter().all(Queue::is_empty),
            Strategy::Plain => self.ready_queue.is_empty() && self.run_queue.is_empty(),
        }
    }

    fn level_for(&self, priority: u32) -> usize {
        (priority as usize).min(self.mlq_ready.len().saturating_sub(1))
    }

    /// `add_proc` — new arrival.
    pub fn add_proc(&mut self, pcb: Pcb) -> OsResult<()> {
        match self.strategy {
            Strategy::Mlq => {
                let level = self.level_for(pcb.priority);
                self.mlq_ready[level].enqueue(pcb)
            }
            Strategy::Plain => self.ready_queue.enqueue(pcb),
        }
    }

    /// `put_proc` — a process returns after its slice expired.
    pub fn put_proc(&mut self, pcb: Pcb) -> OsResult<()> {
        self.running_list.retain(|&p| p != pcb.pid);
        match self.strategy {
            Strategy::Mlq => {
                let level = self.level_for(pcb.priority);
                self.mlq_ready[level].enqueue(pcb)
            }
            Strategy::Plain => self.run_queue.enqueue(pcb),
        }
    }

    /// `get_proc` / `get_mlq_proc`.
    pub fn get_proc(&mut self) -> Option<Pcb> {
        let pcb = match self.strategy {
            Strategy::Mlq => self.get_mlq_proc(),
            Strategy::Plain => self.ready_queue.dequeue().or_else(|| self.run_queue.dequeue()),
        };
        if let Some(ref p) = pcb {
            self.running_list.push(p.pid);
        }
        pcb
    }

    fn get_mlq_proc(&mut self) -> Option<Pcb> {
        if self.slot_usage.iter().all(|&u| u == 0) {
            self.slot_usage = self.slot.clone();
        }
        for level in 0..self.mlq_ready.len() {
            if self.slot_usage[level] > 0 && !self.mlq_ready[level].is_empty() {
                self.slot_usage[level] -= 1;
                return self.mlq_ready[level].dequeue();
            }
        }
        None
    }

    /// Called when a process retires naturally (`pc == code.size`), so its
    /// pid is no longer considered "running" for bookkeeping purposes.
    pub fn retire(&mut self, pid: Pid) {
        self.running_list.retain(|&p| p != pid);
    }

    pub fn running_pids(&self) -> &[Pid] {
        &self.running_list
    }

    /// Remove every PCB matching `name` from the ready/run queues. Per
    /// §5, a process that is currently executing on a CPU worker is not
    /// preempted here -- only queued instances are removed.
    pub fn kill_all(&mut self, name: &str) -> Vec<Pcb> {
        match self.strategy {
            Strategy::Mlq => self.mlq_ready.iter_mut().flat_map(|q| q.remove_by_name(name)).collect(),
            Strategy::Plain => {
                let mut killed = self.ready_queue.remove_by_name(name);
                killed.extend(self.run_queue.remove_by_name(name));
                killed
            }
        }
    }
}
