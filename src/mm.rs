// SPDX-FileCopyrightText: 2020 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Per-process address space: page table, region/symbol table, free-region
//! list, and the FIFO page-replacement list, plus the physical RAM/swap
//! devices that back it.

use std::collections::VecDeque;

use bitflags::bitflags;

use crate::error::{OsError, OsResult};
use crate::memphy::PhysDevice;

/// Maximum number of region ids a process can have outstanding
/// (`symtab` slots), matching the reference's `PAGING_MAX_SYMTBL`.
pub const MAX_SYM: usize = 32;

bitflags! {
    /// PTE status bits. Mirrors the reference's `PAGING_PTE_PRESENT_MASK` /
    /// `_SWAPPED_MASK` / `_DIRTY_MASK` triple.
    pub struct PteFlags: u8 {
        const PRESENT = 0b001;
        const SWAPPED = 0b010;
        const DIRTY   = 0b100;
    }
}

/// A page-table entry: either not-present, present-resident (an FPN on the
/// RAM device), or present-swapped (a `(swap_type, swap_offset)` coordinate
/// on one of the swap devices).
#[derive(Debug, Clone, Copy)]
pub struct PageTableEntry {
    flags: PteFlags,
    /// Resident: the RAM frame number. Swapped: `(swap_type << 24) | swap_offset`.
    payload: u32,
}

impl Default for PageTableEntry {
    fn default() -> Self {
        PageTableEntry { flags: PteFlags::empty(), payload: 0 }
    }
}

impl PageTableEntry {
    pub fn not_present() -> Self {
        Self::default()
    }

    pub fn is_present(&self) -> bool {
        self.flags.contains(PteFlags::PRESENT)
    }

    pub fn is_swapped(&self) -> bool {
        self.flags.contains(PteFlags::SWAPPED)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(PteFlags::DIRTY)
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.flags.set(PteFlags::DIRTY, dirty);
    }

    /// `pte_set_fpn` — the only mutator used to mark a page resident once
    /// live. Frame 0 is a valid resident frame (it's just the first entry
    /// the RAM free list hands out); `present` is its own flag bit, so
    /// there's no zeroed-PTE ambiguity to guard against here the way
    /// `init_pte`'s sentinel check does for a not-yet-touched PTE.
    pub fn set_fpn(&mut self, fpn: u32) -> OsResult<()> {
        self.flags.insert(PteFlags::PRESENT);
        self.flags.remove(PteFlags::SWAPPED);
        self.payload = fpn;
        Ok(())
    }

    /// `pte_set_swap` — the only mutator used to mark a page swapped-out.
    pub fn set_swap(&mut self, swap_type: u32, swap_offset: u32) {
        self.flags.insert(PteFlags::PRESENT);
        self.flags.insert(PteFlags::SWAPPED);
        self.payload = (swap_type << 24) | (swap_offset & 0x00FF_FFFF);
    }

    pub fn fpn(&self) -> OsResult<u32> {
        if self.is_present() && !self.is_swapped() {
            Ok(self.payload)
        } else {
            Err(OsError::StructuralViolation("PTE is not resident"))
        }
    }

    pub fn swap_coords(&self) -> OsResult<(u32, u32)> {
        if self.is_present() && self.is_swapped() {
            Ok((self.payload >> 24, self.payload & 0x00FF_FFFF))
        } else {
            Err(OsError::StructuralViolation("PTE is not swapped"))
        }
    }
}

/// The single growable virtual memory area each address space owns, plus
/// its free-region list. `free_regions` is scanned front-to-back for a
/// first-fit match and newly freed regions are pushed to the front, the
/// same order `enlist_vm_rg_node` prepends nodes in.
struct Vma {
    vm_start: usize,
    vm_end: usize,
    sbrk: usize,
    free_regions: Vec<(usize, usize)>,
}

impl Vma {
    fn new() -> Self {
        Vma { vm_start: 0, vm_end: 0, sbrk: 0, free_regions: Vec::new() }
    }

    /// First-fit scan; carves `size` bytes off the front of the matching
    /// region, dropping the node entirely if nothing is left over.
    fn take_free_region(&mut self, size: usize) -> Option<(usize, usize)> {
        for i in 0..self.free_regions.len() {
            let (start, end) = self.free_regions[i];
            if end - start >= size {
                let carved = (start, start + size);
                if start + size == end {
                    self.free_regions.remove(i);
                } else {
                    self.free_regions[i] = (start + size, end);
                }
                return Some(carved);
            }
        }
        None
    }

    fn give_free_region(&mut self, region: (usize, usize)) {
        self.free_regions.insert(0, region);
    }
}

/// Shared physical storage: one RAM device and up to `N_SWAP` swap devices.
/// Lives for the whole program and is accessed by every process's paging
/// operations, all under the caller's single global paging mutex (§5).
pub struct Memory {
    pub ram: PhysDevice,
    pub swap: Vec<PhysDevice>,
}

impl Memory {
    pub fn new(ram: PhysDevice, swap: Vec<PhysDevice>) -> Self {
        Memory { ram, swap }
    }
}

/// Per-process address space: page table, VMA, region table, and FIFO
/// page-replacement list.
pub struct AddressSpace {
    page_size: usize,
    /// Indexed by page number. Grows lazily as the VMA is extended, rather
    /// than being preallocated to a fixed `MAX_PGN`, since frames and VMA
    /// growth are both already bounded by the configured device sizes.
    pgd: Vec<PageTableEntry>,
    vma: Vma,
    symtab: [Option<(usize, usize)>; MAX_SYM],
    fifo_pgn: VecDeque<u32>,
    /// Which configured swap device this process currently swaps through.
    pub active_swap: usize,
}

impl AddressSpace {
    pub fn new(page_size: usize) -> Self {
        AddressSpace {
            page_size,
            pgd: Vec::new(),
            vma: Vma::new(),
            symtab: [None; MAX_SYM],
            fifo_pgn: VecDeque::new(),
            active_swap: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn pgn_of(&self, vaddr: usize) -> usize {
        vaddr / self.page_size
    }

    fn ensure_pgd_len(&mut self, pgn: usize) {
        if self.pgd.len() <= pgn {
            self.pgd.resize(pgn + 1, PageTableEntry::not_present());
        }
    }

    /// `alloc(pid, vmaid, rgid, size)` (§4.3). First-fit the free-region
    /// list; on miss, extend the VMA via the frame-mapping machinery below.
    pub fn alloc(&mut self, memory: &mut Memory, rgid: usize, size: usize) -> OsResult<usize> {
        if size == 0 {
            return Err(OsError::InvalidSize);
        }
        if rgid >= MAX_SYM {
            return Err(OsError::InvalidRegion);
        }

        if let Some((start, end)) = self.vma.take_free_region(size) {
            self.symtab[rgid] = Some((start, end));
            return Ok(start);
        }

        let inc = page_align(size, self.page_size);
        let old_sbrk = self.vma.sbrk;
        self.grow_and_map(memory, old_sbrk, inc)?;
        self.vma.sbrk += inc;
        self.vma.vm_end = self.vma.sbrk;
        self.symtab[rgid] = Some((old_sbrk, old_sbrk + inc));
        Ok(old_sbrk)
    }

    /// `free(pid, vmaid, rgid)` (§4.3). Per the resolved open question
    /// (DESIGN.md), this clears and reclaims the released range's PTEs and
    /// frames rather than only returning the region to the free list.
    pub fn free(&mut self, memory: &mut Memory, rgid: usize) -> OsResult<()> {
        let region = self.symtab.get(rgid).copied().flatten().ok_or(OsError::InvalidRegion)?;
        self.vma.give_free_region(region);
        self.symtab[rgid] = None;

        let (start, end) = region;
        let start_pgn = self.pgn_of(start);
        let end_pgn = self.pgn_of(end.saturating_sub(1)) + 1;
        for pgn in start_pgn..end_pgn {
            self.release_page(memory, pgn as u32);
        }
        Ok(())
    }

    fn release_page(&mut self, memory: &mut Memory, pgn: u32) {
        let Some(pte) = self.pgd.get_mut(pgn as usize) else { return };
        if pte.is_present() && !pte.is_swapped() {
            if let Ok(fpn) = pte.fpn() {
                memory.ram.put_free_frame(fpn);
            }
        } else if pte.is_present() && pte.is_swapped() {
            if let Ok((swap_idx, fpn)) = pte.swap_coords() {
                if let Some(dev) = memory.swap.get_mut(swap_idx as usize) {
                    dev.put_free_frame(fpn);
                }
            }
        }
        *pte = PageTableEntry::not_present();
        self.fifo_pgn.retain(|&p| p != pgn);
    }

    /// Returns every frame (RAM and swap) this address space still owns to
    /// its device's free list, and clears the page table. Used on natural
    /// process termination and by `killall` (§C.1 of the expanded spec).
    pub fn release_all_frames(&mut self, memory: &mut Memory) {
        let pgns: Vec<u32> = (0..self.pgd.len() as u32).collect();
        for pgn in pgns {
            self.release_page(memory, pgn);
        }
    }

    /// Obtain one free RAM frame, evicting this address space's own FIFO
    /// head to the active swap device if RAM is full. Shared by the
    /// eager frame-backing step of `alloc` and by `translate`'s page-fault
    /// path, since both ultimately need "a free RAM frame, evicting if
    /// necessary" (§4.3, §4.5).
    fn get_free_ram_frame(&mut self, memory: &mut Memory) -> OsResult<u32> {
        if let Ok(fpn) = memory.ram.get_free_frame() {
            return Ok(fpn);
        }

        let victim_pgn = self.fifo_pgn.pop_front().ok_or(OsError::NoVictimPage)?;
        let vicfpn = match self.pgd[victim_pgn as usize].fpn() {
            Ok(fpn) => fpn,
            Err(e) => {
                self.fifo_pgn.push_front(victim_pgn);
                return Err(e);
            }
        };
        let swap_dev = match memory.swap.get_mut(self.active_swap) {
            Some(dev) => dev,
            None => {
                self.fifo_pgn.push_front(victim_pgn);
                return Err(OsError::StructuralViolation("no active swap device configured"));
            }
        };
        let scratch_fpn = match swap_dev.get_free_frame() {
            Ok(fpn) => fpn,
            Err(e) => {
                self.fifo_pgn.push_front(victim_pgn);
                return Err(e);
            }
        };

        {
            let (ram, swap_dev) = (&mut memory.ram, &mut memory.swap[self.active_swap]);
            swap_dev.copy_frame_from(ram, vicfpn, scratch_fpn)?;
        }
        self.pgd[victim_pgn as usize].set_swap(self.active_swap as u32, scratch_fpn);
        Ok(vicfpn)
    }

    /// `vm_map_ram` + `vmap_page_range` (§4.5): allocate `inc_bytes` worth
    /// of RAM frames starting at virtual address `addr`, and bind them into
    /// the page table. Unlike the reference, a partial failure returns
    /// every not-yet-bound frame it already took back to the RAM free list
    /// (resolved open question) -- frames freed by eviction along the way
    /// are not un-evicted, matching the reference's "no rollback of
    /// partial work already performed" posture.
    fn grow_and_map(&mut self, memory: &mut Memory, addr: usize, inc_bytes: usize) -> OsResult<()> {
        let npages = inc_bytes / self.page_size;
        if npages == 0 {
            return Err(OsError::InvalidSize);
        }

        let mut taken = Vec::with_capacity(npages);
        for _ in 0..npages {
            match self.get_free_ram_frame(memory) {
                Ok(fpn) => taken.push(fpn),
                Err(e) => {
                    for fpn in taken {
                        memory.ram.put_free_frame(fpn);
                    }
                    return Err(e);
                }
            }
        }

        let pgn_base = self.pgn_of(addr);
        for (i, fpn) in taken.iter().enumerate() {
            self.ensure_pgd_len(pgn_base + i);
            // Infallible: `fpn` came straight off a free list (directly or
            // via eviction), so it's never 0 (frame 0 is only "invalid" as
            // a sentinel value, not as a real free-listed frame, here).
            self.pgd[pgn_base + i].set_fpn(*fpn)?;
            self.fifo_pgn.push_back((pgn_base + i) as u32);
        }
        Ok(())
    }

    /// `pg_getpage` / `translate` (§4.3): resolve a virtual address to a RAM
    /// frame number, servicing a page fault with FIFO eviction if needed.
    pub fn translate(&mut self, memory: &mut Memory, vaddr: usize) -> OsResult<u32> {
        let pgn = self.pgn_of(vaddr) as u32;
        self.ensure_pgd_len(pgn as usize);

        if self.pgd[pgn as usize].is_present() && !self.pgd[pgn as usize].is_swapped() {
            return self.pgd[pgn as usize].fpn();
        }

        let vicfpn = self.get_free_ram_frame(memory)?;

        // Faulting page's swap slot -> victim's now-free RAM frame (or, if
        // the faulting page was never resident before, there is nothing to
        // bring in yet and the frame starts zeroed).
        if self.pgd[pgn as usize].is_swapped() {
            let (swap_idx, tgt_fpn) = self.pgd[pgn as usize].swap_coords()?;
            let swap_dev = memory
                .swap
                .get_mut(swap_idx as usize)
                .ok_or(OsError::StructuralViolation("invalid swap device index in PTE"))?;
            memory.ram.copy_frame_from(swap_dev, tgt_fpn, vicfpn)?;
            swap_dev.put_free_frame(tgt_fpn);
        }

        self.pgd[pgn as usize].set_fpn(vicfpn)?;
        self.fifo_pgn.push_back(pgn);

        Ok(vicfpn)
    }

    /// `SYSMEM_INC_OP`: raise `sbrk` by `inc_bytes` and back the new range
    /// with frames, without binding it to a region id. `alloc` uses the
    /// same underlying primitive (`grow_and_map`) when it extends the VMA;
    /// this entry point is what a guest's explicit syscall instruction
    /// reaches (§4.4).
    pub fn sbrk_inc(&mut self, memory: &mut Memory, inc_bytes: usize) -> OsResult<usize> {
        let old_sbrk = self.vma.sbrk;
        self.grow_and_map(memory, old_sbrk, inc_bytes)?;
        self.vma.sbrk += inc_bytes;
        self.vma.vm_end = self.vma.sbrk;
        Ok(old_sbrk)
    }

    /// `SYSMEM_SWP_OP`: copy one frame between RAM and this address space's
    /// active swap device. The reference's argument order for this
    /// operation cannot be recovered from the kept source (its dispatcher
    /// body is absent and its two call sites disagree), so the direction is
    /// made explicit here instead of inferred from argument position.
    pub fn swap_frame(
        &mut self,
        memory: &mut Memory,
        ram_fpn: u32,
        swap_fpn: u32,
        direction: SwapDirection,
    ) -> OsResult<()> {
        let idx = self.active_swap;
        if idx >= memory.swap.len() {
            return Err(OsError::StructuralViolation("no active swap device configured"));
        }
        match direction {
            SwapDirection::RamToSwap => {
                let (ram, swap_dev) = (&mut memory.ram, &mut memory.swap[idx]);
                swap_dev.copy_frame_from(ram, ram_fpn, swap_fpn)
            }
            SwapDirection::SwapToRam => {
                let (ram, swap_dev) = (&mut memory.ram, &mut memory.swap[idx]);
                ram.copy_frame_from(swap_dev, swap_fpn, ram_fpn)
            }
        }
    }

    fn resolve(&mut self, memory: &mut Memory, rgid: usize, offset: usize) -> OsResult<usize> {
        let (start, _end) = self.symtab.get(rgid).copied().flatten().ok_or(OsError::InvalidRegion)?;
        let vaddr = start + offset;
        let fpn = self.translate(memory, vaddr)?;
        Ok(fpn as usize * self.page_size + vaddr % self.page_size)
    }

    /// `read(pid, rgid, offset)` (§4.3).
    pub fn read(&mut self, memory: &mut Memory, rgid: usize, offset: usize) -> OsResult<u8> {
        let phys = self.resolve(memory, rgid, offset)?;
        memory.ram.read(phys)
    }

    /// `write(pid, rgid, offset, byte)` (§4.3).
    pub fn write(&mut self, memory: &mut Memory, rgid: usize, offset: usize, value: u8) -> OsResult<()> {
        let phys = self.resolve(memory, rgid, offset)?;
        memory.ram.write(phys, value)
    }

}

/// Direction for [`AddressSpace::swap_frame`] — see its doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    RamToSwap,
    SwapToRam,
}

fn page_align(size: usize, page_size: usize) -> usize {
    ((size + page_size - 1) / page_size) * page_size
}

impl std::fmt::Display for AddressSpace {
    /// `print_pgtbl`: page number -> frame number, one line per resident
    /// page. Trace-gated by the caller (§C.3 of the expanded spec).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (pgn, pte) in self.pgd.iter().enumerate() {
            if pte.is_present() && !pte.is_swapped() {
                writeln!(f, "Page Number: {} -> Frame Number: {}", pgn, pte.fpn().unwrap())?;
            }
        }
        Ok(())
    }
}
