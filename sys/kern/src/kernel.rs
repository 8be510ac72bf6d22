// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel context value.
//!
//! Everything the executive mutates at runtime -- the process table, the
//! block pool, the scheduling queues, the delayed-delivery list, the tick
//! counter, and the identity of the running process -- lives in one
//! [`Kernel`] value. Entry points (the syscall gate and the interrupt
//! handlers) recover a reference to it through the arch layer and pass it
//! down explicitly; nothing else in the kernel touches globals.

use abi::{ProcState, MAX_PROCS, NUM_PRIORITIES};
use pqueue::PriorityQueue;

use crate::mem::{Block, BlockPool};
use crate::proc::Pcb;
use crate::time::Tick;
use crate::timer::DelayList;

/// Queue type used for the ready queue and both blocked queues: one FIFO
/// bucket per process priority, holding process-table indices.
pub type ProcQueue = PriorityQueue<NUM_PRIORITIES, MAX_PROCS>;

/// The whole mutable state of the executive.
#[derive(Debug)]
pub struct Kernel {
    /// Process table. Slot 0 is the idle process; the last two slots are
    /// the timer and UART i-services.
    pub(crate) procs: &'static mut [Pcb],
    /// The message-block pool.
    pub(crate) pool: BlockPool,
    /// Processes that could run, bucketed by priority.
    pub(crate) ready: ProcQueue,
    /// Processes suspended in `request_memory`.
    pub(crate) mem_blocked: ProcQueue,
    /// Processes suspended in `receive`.
    pub(crate) recv_blocked: ProcQueue,
    /// Envelopes awaiting their delivery tick, sorted ascending.
    pub(crate) delayed: DelayList,
    /// The millisecond counter maintained by the timer i-service.
    pub(crate) ticks: Tick,
    /// Index of the process currently holding the CPU.
    pub(crate) current: usize,
}

impl Kernel {
    /// Assembles a kernel from a carved-up process table and pool arena and
    /// performs the initial enqueueing: normal processes go on the ready
    /// queue NEW, in table order within their priority buckets; i-services
    /// are marked READY but never enqueued; the idle process is neither.
    pub fn new(procs: &'static mut [Pcb], arena: &'static mut [Block]) -> Self {
        uassert!(procs.len() >= 3);
        uassert!(procs.len() <= MAX_PROCS);

        let mut k = Kernel {
            pool: BlockPool::new(arena),
            ready: ProcQueue::new(),
            mem_blocked: ProcQueue::new(),
            recv_blocked: ProcQueue::new(),
            delayed: DelayList::default(),
            ticks: Tick::ZERO,
            current: 0,
            procs,
        };

        for i in 1..k.procs.len() - 2 {
            let prio = k.procs[i].priority();
            let r = k.ready.push(i as u8, usize::from(prio.0));
            uassert!(r.is_ok());
        }
        let timer = k.timer_index();
        let uart = k.uart_index();
        k.procs[timer].set_state(ProcState::Ready);
        k.procs[uart].set_state(ProcState::Ready);
        k
    }

    /// Index of the timer i-service in the process table.
    pub fn timer_index(&self) -> usize {
        self.procs.len() - 2
    }

    /// Index of the UART i-service in the process table.
    pub fn uart_index(&self) -> usize {
        self.procs.len() - 1
    }

    /// Index of the process currently holding the CPU.
    pub fn current(&self) -> usize {
        self.current
    }

    /// The running process's control block.
    pub fn current_pcb(&self) -> &Pcb {
        &self.procs[self.current]
    }

    pub fn current_pcb_mut(&mut self) -> &mut Pcb {
        &mut self.procs[self.current]
    }

    /// The current kernel timestamp.
    pub fn now(&self) -> Tick {
        self.ticks
    }

    /// Validates a raw process id from a caller, returning a process-table
    /// index safe to use without further checking.
    pub fn valid_index(&self, raw: usize) -> Option<usize> {
        if raw < self.procs.len() {
            Some(raw)
        } else {
            None
        }
    }
}
