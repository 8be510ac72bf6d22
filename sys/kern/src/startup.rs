// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup: RAM carve-up and first dispatch.
//!
//! The application hands over its process table and one RAM region. Working
//! up from the bottom of the region we place the PCB array, then the kernel
//! context (which contains the queue and list control blocks), then as many
//! pool blocks as fit; per-process stacks grow down from the top of the
//! region, 8-byte aligned. Nothing is ever freed.

use core::mem::MaybeUninit;

use abi::{ProcFlags, ProcInit, ProcState, Priority, BLOCK_SIZE, MAX_PROCS};

use crate::kernel::Kernel;
use crate::mem::Block;
use crate::proc::Pcb;

/// Validates `table`, builds the kernel in `ram_base..ram_base + ram_size`,
/// and dispatches the first process. Does not return.
///
/// `tick_divisor` is the number of CPU cycles per millisecond, used to
/// program the tick timer.
///
/// # Safety
///
/// The RAM region must be unused, writable, and disjoint from the kernel
/// image; `table` must describe entry points that are genuinely executable.
/// This is called exactly once, before interrupts are enabled.
pub unsafe fn start_rtx(
    table: &'static [ProcInit],
    ram_base: *mut u8,
    ram_size: usize,
    tick_divisor: u32,
) -> ! {
    uassert!(table.len() >= 3);
    uassert!(table.len() <= MAX_PROCS);

    // Slot 0 is the idle process, at its reserved priority; the last two
    // slots are the timer and UART i-services. Everything between is a
    // normal process at a normal priority.
    uassert_eq!(table[0].priority, u32::from(Priority::IDLE.0));
    for init in table {
        uassert!(!init.flags.intersects(ProcFlags::RESERVED));
        uassert!(init.stack_words >= MIN_STACK_WORDS);
    }
    uassert!(!table[0].flags.contains(ProcFlags::I_SERVICE));
    for init in &table[1..table.len() - 2] {
        uassert!(Priority(init.priority as u8).is_valid_for_process());
        uassert!(!init.flags.contains(ProcFlags::I_SERVICE));
    }
    for init in &table[table.len() - 2..] {
        uassert!(init.flags.contains(ProcFlags::I_SERVICE));
    }

    // Stacks come off the top of the region first, so we know where the
    // pool must stop.
    let ram_end = (ram_base as usize + ram_size) & !7;
    let mut stack_top = ram_end;
    let mut stack_tops = [0usize; MAX_PROCS];
    for (i, init) in table.iter().enumerate() {
        stack_tops[i] = stack_top;
        stack_top = (stack_top - init.stack_words as usize * 4) & !7;
    }
    let stack_base = stack_top;
    uassert!(stack_base > ram_base as usize);

    let scratch = core::slice::from_raw_parts_mut(
        ram_base,
        stack_base - ram_base as usize,
    );
    let mut alloc = BumpPointer(scratch);

    let procs =
        alloc.gimme_n(table.len(), |i| Pcb::from_descriptor(&table[i]));
    for (i, pcb) in procs.iter_mut().enumerate() {
        // Construct the initial exception frame on the process stack.
        crate::arch::reinitialize(pcb, stack_tops[i]);
    }

    // Reserve the kernel context before the pool so the pool can take
    // everything that remains.
    let kernel_slot = alloc.gimme(MaybeUninit::<Kernel>::uninit());
    let pool_len = alloc.remaining() / BLOCK_SIZE;
    let arena = alloc.gimme_n(pool_len, |_| Block::zeroed());

    let kernel = kernel_slot.write(Kernel::new(procs, arena));
    klog!(
        "rtx: {} processes, {} pool blocks",
        table.len(),
        pool_len
    );

    // Stash the kernel somewhere the syscall gate and interrupt handlers
    // can recover it.
    crate::arch::set_kernel(kernel);

    // Pick the first process: head of the ready queue, or idle if the
    // application declared no runnable processes.
    let first = match kernel.ready.pop() {
        Some((h, _)) => usize::from(h),
        None => 0,
    };
    kernel.procs[first].set_state(ProcState::Running);
    kernel.current = first;

    crate::arch::start_first_proc(tick_divisor, &mut kernel.procs[first])
}

/// Room for the hardware exception frame plus a little working space; a
/// stack smaller than this can't even be dispatched.
const MIN_STACK_WORDS: u32 = 16;

/// Dead-simple allocator for carving the RAM region up at boot.
struct BumpPointer(&'static mut [u8]);

impl BumpPointer {
    /// Splits off space for `n` values of type `T`, initializing each with
    /// `init`.
    pub fn gimme_n<T>(
        &mut self,
        n: usize,
        mut init: impl FnMut(usize) -> T,
    ) -> &'static mut [T] {
        use core::mem::{align_of, size_of};

        // Temporarily steal the entire allocation region from self. This
        // helps with lifetime inference issues.
        let free = core::mem::take(&mut self.0);

        // Bump the pointer up to the required alignment for T.
        let align_delta = free.as_ptr().align_offset(align_of::<T>());
        let (_discarded, free) = free.split_at_mut(align_delta);
        // Split off RAM for the Ts.
        let (allocated, free) = free.split_at_mut(n * size_of::<T>());

        // Put the rest of free memory back.
        self.0 = free;

        // `allocated` has the alignment and size of `n` `T`s, so we can
        // start treating it like that. However, we have to initialize it
        // first -- without dropping its current contents!
        let allocated = allocated.as_mut_ptr() as *mut T;
        for i in 0..n {
            unsafe {
                allocated.add(i).write(init(i));
            }
        }
        unsafe { core::slice::from_raw_parts_mut(allocated, n) }
    }

    /// Splits off space for a single `value`.
    pub fn gimme<T>(&mut self, value: T) -> &'static mut T {
        use core::mem::{align_of, size_of};

        let free = core::mem::take(&mut self.0);
        let align_delta = free.as_ptr().align_offset(align_of::<T>());
        let (_discarded, free) = free.split_at_mut(align_delta);
        let (allocated, free) = free.split_at_mut(size_of::<T>());
        self.0 = free;

        let allocated = allocated.as_mut_ptr() as *mut T;
        unsafe {
            allocated.write(value);
            &mut *allocated
        }
    }

    /// Bytes not yet handed out.
    pub fn remaining(&self) -> usize {
        self.0.len()
    }
}
