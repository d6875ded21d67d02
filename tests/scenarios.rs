// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios and quantified invariants.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ossim::config::{Config, ProcessSpec};
use ossim::harness::Harness;
use ossim::memphy::{AccessMode, PhysDevice};
use ossim::mm::{AddressSpace, Memory};
use ossim::proc::{Instruction, Opcode, Pcb};
use ossim::sched::{Scheduler, Strategy};
use ossim::syscall;

fn write_program(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

fn memory(ram_bytes: usize, swap_bytes: usize, page_size: usize) -> Memory {
    Memory::new(
        PhysDevice::new("ram", ram_bytes, page_size, AccessMode::Random),
        vec![PhysDevice::new("swap0", swap_bytes, page_size, AccessMode::Random)],
    )
}

/// Scenario 1: single process, no paging.
#[test]
fn single_process_no_paging_completes_within_three_slots() {
    let dir = tempfile::tempdir().unwrap();
    let prog = write_program(dir.path(), "four_calcs.txt", "CALC\nCALC\nCALC\nCALC\n");
    let config = Config {
        time_slot: 2,
        num_cpus: 2,
        page_size: 64,
        ram_size: 256,
        swap_sizes: vec![256, 256, 256, 256],
        scheduler: Strategy::Mlq,
        processes: vec![ProcessSpec { start_tick: 0, prog_path: prog, priority: 0 }],
    };
    let harness = Arc::new(Harness::new(&config));
    harness.run().unwrap();
    assert!(harness.scheduler.lock().unwrap().is_empty());
}

/// Scenario 2: alloc/read/write within one page.
#[test]
fn alloc_read_write_within_one_page() {
    let mut mem = memory(256, 256, 64);
    let mut space = AddressSpace::new(64);

    let addr = space.alloc(&mut mem, 1, 40).unwrap();
    assert_eq!(addr, 0);
    space.write(&mut mem, 1, 10, 0x55).unwrap();
    let value = space.read(&mut mem, 1, 10).unwrap();
    assert_eq!(value, 0x55);
    assert_eq!(format!("{}", space), "Page Number: 0 -> Frame Number: 0\n");
}

/// Scenario 3: force swap. Accessing region 0 after a third region is
/// allocated (RAM only holds 2 frames) must fault, evict the FIFO head,
/// and still return the original byte.
#[test]
fn force_swap_evicts_fifo_head_and_preserves_original_byte() {
    let mut mem = memory(128, 256, 64);
    let mut space = AddressSpace::new(64);

    let r0 = space.alloc(&mut mem, 0, 64).unwrap();
    space.write(&mut mem, 0, 0, 0xAA).unwrap();
    let r1 = space.alloc(&mut mem, 1, 64).unwrap();
    space.write(&mut mem, 1, 0, 0xBB).unwrap();
    let r2 = space.alloc(&mut mem, 2, 64).unwrap();
    space.write(&mut mem, 2, 0, 0xCC).unwrap();
    assert!(r2 > r1 && r1 > r0);

    // Region 0 was the FIFO head and must have been evicted by now.
    assert_eq!(space.read(&mut mem, 0, 0).unwrap(), 0xAA);
    assert_eq!(space.read(&mut mem, 2, 0).unwrap(), 0xCC);
}

/// Scenario 4: killall.
#[test]
fn killall_removes_both_queued_instances_of_the_same_path() {
    let mut mem = memory(256, 256, 64);
    let mut sched = Scheduler::new(Strategy::Mlq, 4);

    let low = Pcb::new(1, 3, "shared".to_string(), Vec::<Instruction>::new(), 64);
    let high = Pcb::new(2, 1, "shared".to_string(), Vec::<Instruction>::new(), 64);
    sched.add_proc(low).unwrap();
    sched.add_proc(high).unwrap();

    let mut caller = Pcb::new(3, 0, "caller".to_string(), Vec::<Instruction>::new(), 64);
    caller.address_space.alloc(&mut mem, 0, 16).unwrap();
    for (i, b) in b"shared".iter().enumerate() {
        caller.address_space.write(&mut mem, 0, i, *b).unwrap();
    }

    let killed = syscall::dispatch(&mut caller, &mut mem, &mut sched, syscall::SYS_KILLALL, 0, 0).unwrap();
    assert_eq!(killed, 2);
    assert!(sched.is_empty());
}

/// Scenario 5: MLQ fairness over one replenishment cycle.
#[test]
fn mlq_fairness_dispatch_counts_are_three_two_one() {
    let mut sched = Scheduler::new(Strategy::Mlq, 3);
    for (pid, prio) in [(0u32, 0u32), (1, 1), (2, 2)] {
        sched.add_proc(Pcb::new(pid, prio, format!("p{}", pid), Vec::<Instruction>::new(), 64)).unwrap();
    }
    let mut counts = [0u32; 3];
    for _ in 0..6 {
        let p = sched.get_proc().unwrap();
        counts[p.priority as usize] += 1;
        sched.put_proc(p).unwrap();
    }
    assert_eq!(counts, [3, 2, 1]);
}

/// Scenario 6: region free + realloc, first-fit with a residual.
#[test]
fn free_then_realloc_reuses_region_and_leaves_residual() {
    let mut mem = memory(512, 256, 64);
    let mut space = AddressSpace::new(64);
    let first = space.alloc(&mut mem, 0, 100).unwrap();
    space.free(&mut mem, 0).unwrap();
    let second = space.alloc(&mut mem, 1, 50).unwrap();
    assert_eq!(second, first);
    // A further 50-byte allocation should still find the residual region
    // rather than growing the VMA again.
    let third = space.alloc(&mut mem, 2, 50).unwrap();
    assert_eq!(third, first + 50);
}

/// Frame conservation: every frame is either free or bound to exactly one
/// resident/swapped PTE.
#[test]
fn frame_conservation_holds_across_alloc_and_free() {
    let mut mem = memory(256, 256, 64);
    let total = mem.ram.num_frames();
    let mut space = AddressSpace::new(64);
    space.alloc(&mut mem, 0, 64).unwrap();
    space.alloc(&mut mem, 1, 128).unwrap();
    assert_eq!(mem.ram.free_frame_count() as u32 + 3, total);
    space.free(&mut mem, 0).unwrap();
    space.free(&mut mem, 1).unwrap();
    assert_eq!(mem.ram.free_frame_count() as u32, total);
}

/// Region disjointness: two live regions in the same process never overlap.
#[test]
fn region_disjointness_holds_for_distinct_allocations() {
    let mut mem = memory(512, 256, 64);
    let mut space = AddressSpace::new(64);
    let a = space.alloc(&mut mem, 0, 50).unwrap();
    let b = space.alloc(&mut mem, 1, 80).unwrap();
    let (a_start, a_end) = (a, a + 50);
    let (b_start, b_end) = (b, b + 80);
    assert!(a_end <= b_start || b_end <= a_start);
}

/// Round-trip: write then read yields the same byte even across an
/// intervening eviction/swap cycle.
#[test]
fn round_trip_survives_intervening_eviction() {
    let mut mem = memory(128, 256, 64);
    let mut space = AddressSpace::new(64);
    space.alloc(&mut mem, 0, 64).unwrap();
    space.write(&mut mem, 0, 3, 0x42).unwrap();
    space.alloc(&mut mem, 1, 64).unwrap();
    space.alloc(&mut mem, 2, 64).unwrap(); // forces region 0's page out
    assert_eq!(space.read(&mut mem, 0, 3).unwrap(), 0x42);
}

/// Termination: the harness exits once every submitted process has
/// completed, even with processes arriving at staggered ticks.
#[test]
fn harness_terminates_after_all_processes_complete() {
    let dir = tempfile::tempdir().unwrap();
    let p0 = write_program(dir.path(), "p0.txt", "CALC\nCALC\n");
    let p1 = write_program(dir.path(), "p1.txt", "CALC\n");
    let config = Config {
        time_slot: 1,
        num_cpus: 2,
        page_size: 64,
        ram_size: 256,
        swap_sizes: vec![256, 256, 256, 256],
        scheduler: Strategy::Mlq,
        processes: vec![
            ProcessSpec { start_tick: 0, prog_path: p0, priority: 0 },
            ProcessSpec { start_tick: 1, prog_path: p1, priority: 1 },
        ],
    };
    let harness = Arc::new(Harness::new(&config));
    harness.run().unwrap();
    assert!(harness.scheduler.lock().unwrap().is_empty());
}
