// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! OSSIM: a teaching-grade operating-system simulator. See `README`/spec
//! for the three core subsystems (paged virtual memory, MLQ scheduler,
//! simulated CPU loop) this crate implements; this root just wires the
//! modules together for both the `ossim` binary and the integration tests
//! under `tests/`.

pub mod config;
pub mod cpu;
pub mod error;
pub mod harness;
pub mod loader;
pub mod memphy;
pub mod mm;
pub mod proc;
pub mod sched;
pub mod syscall;
