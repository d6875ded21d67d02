// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Byte-addressable physical storage devices: RAM and swap.
//!
//! Each `PhysDevice` owns a flat byte array divided into fixed-size frames,
//! plus a LIFO list of free frame numbers. A device can run in "random"
//! mode (byte-indexed reads/writes anywhere in the array) or "sequential"
//! mode (reads/writes only advance a moving cursor) -- mirroring the
//! reference simulator's `rdmflg` toggle, which is wired per device rather
//! than per call.

use crate::error::{OsError, OsResult};

/// Default frame size in bytes, used when a configuration doesn't override
/// it. Matches the reference simulator's `PAGING_PAGESZ`.
pub const DEFAULT_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Reads/writes are indexed directly by address (RAM-like).
    Random,
    /// Reads/writes only ever touch the current cursor position, which
    /// advances (wrapping) after each access (swap-like).
    Sequential,
}

/// A single physical storage device: main RAM, or one of up to four swap
/// devices. The frame size is carried per-device rather than as a global
/// constant so a run can size RAM and swap around whatever `page_size` its
/// configuration specifies.
pub struct PhysDevice {
    name: &'static str,
    storage: Vec<u8>,
    mode: AccessMode,
    cursor: usize,
    free_frames: Vec<u32>,
    num_frames: u32,
    page_size: usize,
}

impl PhysDevice {
    pub fn new(name: &'static str, size_bytes: usize, page_size: usize, mode: AccessMode) -> Self {
        let num_frames = (size_bytes / page_size) as u32;
        // Free list is built tail-to-head in the reference, so frame 0
        // ends up on top and is handed out first.
        let mut free_frames: Vec<u32> = (0..num_frames).collect();
        free_frames.reverse();
        PhysDevice {
            name,
            storage: vec![0u8; size_bytes],
            mode,
            cursor: 0,
            free_frames,
            num_frames,
            page_size,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_frames.len()
    }

    /// Pop a frame off the free list (LIFO, like `MEMPHY_get_freefp`).
    pub fn get_free_frame(&mut self) -> OsResult<u32> {
        self.free_frames.pop().ok_or(OsError::NoFreeFrame)
    }

    /// Return a frame to the free list (`MEMPHY_put_freefp`).
    pub fn put_free_frame(&mut self, fpn: u32) {
        self.free_frames.push(fpn);
    }

    fn advance_cursor(&mut self) {
        self.cursor = (self.cursor + 1) % self.storage.len().max(1);
    }

    /// Read a single byte at `addr`. In `Sequential` mode `addr` is ignored
    /// and the device's internal cursor is used instead, matching
    /// `MEMPHY_read`'s branch on `rdmflg`.
    pub fn read(&mut self, addr: usize) -> OsResult<u8> {
        match self.mode {
            AccessMode::Random => self
                .storage
                .get(addr)
                .copied()
                .ok_or(OsError::StructuralViolation("read address out of range")),
            AccessMode::Sequential => {
                let byte = *self
                    .storage
                    .get(self.cursor)
                    .ok_or(OsError::StructuralViolation("cursor out of range"))?;
                self.advance_cursor();
                Ok(byte)
            }
        }
    }

    pub fn write(&mut self, addr: usize, value: u8) -> OsResult<()> {
        match self.mode {
            AccessMode::Random => {
                let slot = self
                    .storage
                    .get_mut(addr)
                    .ok_or(OsError::StructuralViolation("write address out of range"))?;
                *slot = value;
                Ok(())
            }
            AccessMode::Sequential => {
                let cursor = self.cursor;
                let slot = self
                    .storage
                    .get_mut(cursor)
                    .ok_or(OsError::StructuralViolation("cursor out of range"))?;
                *slot = value;
                self.advance_cursor();
                Ok(())
            }
        }
    }

    /// Copy one frame's worth of bytes from `src` at `src_fpn` into `self`
    /// at `dst_fpn`, byte by byte (`__swap_cp_page`). Both devices are
    /// expected to share the same page size within one simulation run.
    pub fn copy_frame_from(&mut self, src: &mut PhysDevice, src_fpn: u32, dst_fpn: u32) -> OsResult<()> {
        let page_size = self.page_size;
        for off in 0..page_size {
            let byte = src.read(src_fpn as usize * page_size + off)?;
            self.write(dst_fpn as usize * page_size + off, byte)?;
        }
        Ok(())
    }

    /// Emit the physical memory dump diagnostic (`MEMPHY_dump`). Gated by
    /// the caller on `log::log_enabled!(Trace)`; the format below -- two
    /// headers sandwiching the nonzero-byte list, then the rule line --
    /// must be reproduced exactly since it is a grading interface (§6).
    pub fn dump(&self) {
        println!("PHYSICAL MEMORY DUMP:");
        for (addr, byte) in self.storage.iter().enumerate() {
            if *byte != 0 {
                println!("BYTE {:08X}: {}", addr, byte);
            }
        }
        println!("PHYSICAL MEMORY DUMP:");
        println!("================================================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_list_hands_out_frame_zero_first() {
        let mut dev = PhysDevice::new("ram", DEFAULT_PAGE_SIZE * 4, DEFAULT_PAGE_SIZE, AccessMode::Random);
        assert_eq!(dev.get_free_frame().unwrap(), 0);
        assert_eq!(dev.get_free_frame().unwrap(), 1);
    }

    #[test]
    fn random_read_write_roundtrip() {
        let mut dev = PhysDevice::new("ram", DEFAULT_PAGE_SIZE * 2, DEFAULT_PAGE_SIZE, AccessMode::Random);
        dev.write(10, 42).unwrap();
        assert_eq!(dev.read(10).unwrap(), 42);
    }

    #[test]
    fn sequential_access_ignores_addr_and_advances() {
        let mut dev = PhysDevice::new("swap", DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE, AccessMode::Sequential);
        dev.write(0, 1).unwrap();
        dev.write(0, 2).unwrap();
        assert_eq!(dev.read(999).unwrap(), 1);
        assert_eq!(dev.read(999).unwrap(), 2);
    }

    #[test]
    fn out_of_frames_errors() {
        let mut dev = PhysDevice::new("ram", DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE, AccessMode::Random);
        assert!(dev.get_free_frame().is_ok());
        assert_eq!(dev.get_free_frame(), Err(OsError::NoFreeFrame));
    }

    #[test]
    fn copy_frame_between_devices() {
        let mut src = PhysDevice::new("ram", DEFAULT_PAGE_SIZE * 2, DEFAULT_PAGE_SIZE, AccessMode::Random);
        let mut dst = PhysDevice::new("swap", DEFAULT_PAGE_SIZE * 2, DEFAULT_PAGE_SIZE, AccessMode::Random);
        src.write(5, 7).unwrap();
        dst.copy_frame_from(&mut src, 0, 1).unwrap();
        assert_eq!(dst.read(DEFAULT_PAGE_SIZE + 5).unwrap(), 7);
    }
}
