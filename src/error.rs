// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Error kinds for the simulated core (§7 of the design spec).
//!
//! Every fallible operation in the paging engine, syscall dispatcher, and
//! scheduler returns `Result<T, OsError>` rather than panicking -- mirroring
//! the kernel's own `Result<T, xous_kernel::Error>` convention, where a
//! failure is always a typed status rather than an exception.

use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OsError {
    /// No free frame available on the target device.
    NoFreeFrame,
    /// No free frame available on the active swap device.
    NoFreeSwapFrame,
    /// The FIFO victim list was empty when a page fault needed one.
    NoVictimPage,
    /// A bounded queue (ready queue, run queue) was at capacity.
    QueueFull,
    /// A region id was out of range, or referred to an empty slot.
    InvalidRegion,
    /// A requested allocation size was not positive.
    InvalidSize,
    /// No free region in the free-region list was large enough, and the
    /// VMA could not be grown to cover it.
    NoFit,
    /// The instruction stream referenced an opcode the CPU doesn't know.
    UnknownOpcode(u32),
    /// The PCB referenced by an operation does not exist.
    ProcessNotFound,
    /// A structural invariant was violated (e.g. reading a PTE that was
    /// never marked resident or swapped).
    StructuralViolation(&'static str),
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsError::NoFreeFrame => write!(f, "no free frame"),
            OsError::NoFreeSwapFrame => write!(f, "no free swap frame"),
            OsError::NoVictimPage => write!(f, "no victim page available"),
            OsError::QueueFull => write!(f, "queue is full"),
            OsError::InvalidRegion => write!(f, "invalid region id"),
            OsError::InvalidSize => write!(f, "invalid size"),
            OsError::NoFit => write!(f, "no free region large enough"),
            OsError::UnknownOpcode(op) => write!(f, "unknown opcode {}", op),
            OsError::ProcessNotFound => write!(f, "process not found"),
            OsError::StructuralViolation(what) => write!(f, "structural invariant violated: {}", what),
        }
    }
}

impl std::error::Error for OsError {}

pub type OsResult<T> = Result<T, OsError>;
