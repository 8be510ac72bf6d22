// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared fixtures for the kernel unit tests.
//!
//! The kernel's backing storage is `'static` by design, so the fixtures
//! leak: every test gets a fresh kernel carved out of leaked boxes instead
//! of a RAM region.

use abi::{ProcFlags, ProcInit, ProcState, Priority};

use crate::kernel::Kernel;
use crate::mem::Block;
use crate::proc::Pcb;

/// Leaks a pool arena of `n` blocks.
pub fn leak_blocks(n: usize) -> &'static mut [Block] {
    let blocks: Vec<Block> = (0..n).map(|_| Block::zeroed()).collect();
    Box::leak(blocks.into_boxed_slice())
}

/// Builds a kernel with the idle process, one normal process per entry of
/// `normal_prios` (at that priority, pids 1..), the timer and UART
/// i-services, and a pool of `blocks` blocks.
pub fn kernel_with(
    normal_prios: &[u8],
    blocks: usize,
) -> &'static mut Kernel {
    fn init(priority: u32, flags: ProcFlags) -> ProcInit {
        ProcInit {
            entry_point: 0,
            stack_words: 64,
            priority,
            flags,
        }
    }

    let mut table = Vec::new();
    table.push(init(u32::from(Priority::IDLE.0), ProcFlags::empty()));
    for &prio in normal_prios {
        table.push(init(u32::from(prio), ProcFlags::empty()));
    }
    table.push(init(0, ProcFlags::I_SERVICE)); // timer
    table.push(init(0, ProcFlags::I_SERVICE)); // uart
    let table: &'static [ProcInit] = Box::leak(table.into_boxed_slice());

    let procs: Vec<Pcb> = table.iter().map(Pcb::from_descriptor).collect();
    let procs = Box::leak(procs.into_boxed_slice());

    Box::leak(Box::new(Kernel::new(procs, leak_blocks(blocks))))
}

/// Performs startup's final step: dispatch the head of the ready queue (or
/// idle) as the running process.
pub fn dispatch_first(k: &mut Kernel) {
    let first = match k.ready.pop() {
        Some((h, _)) => usize::from(h),
        None => 0,
    };
    k.procs[first].set_state(ProcState::Running);
    k.current = first;
}
