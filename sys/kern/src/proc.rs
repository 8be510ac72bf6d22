// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of processes.

use abi::{ProcFlags, ProcId, ProcInit, ProcState, Priority};

use crate::mem::MsgQueue;

/// Internal representation of a process: its control block.
///
/// The fields of this struct are private to the kernel so that state and
/// queue membership can only drift apart inside this crate.
#[repr(C)] // so location of SavedState is predictable
#[derive(Debug)]
pub struct Pcb {
    /// Saved machine state of the process.
    save: crate::arch::SavedState,
    // NOTE: it is critical that the above field appear first!
    /// Current priority of the process.
    priority: Priority,
    /// State used to make status and scheduling decisions.
    state: ProcState,
    /// FIFO of message envelopes delivered to this process.
    pub(crate) mailbox: MsgQueue,
    /// The init-table record used to create this process.
    descriptor: &'static ProcInit,
}

impl Pcb {
    /// Creates a `Pcb` in its initial state, filling in fields from
    /// `descriptor`.
    pub fn from_descriptor(descriptor: &'static ProcInit) -> Self {
        Pcb {
            save: crate::arch::SavedState::default(),
            priority: Priority(descriptor.priority as u8),
            state: ProcState::New,
            mailbox: MsgQueue::default(),
            descriptor,
        }
    }

    /// Returns this process's priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, p: Priority) {
        self.priority = p;
    }

    /// Returns this process's current scheduling state.
    pub fn state(&self) -> ProcState {
        self.state
    }

    pub(crate) fn set_state(&mut self, s: ProcState) {
        self.state = s;
    }

    /// Checks whether this process is an interrupt service.
    pub fn is_i_service(&self) -> bool {
        self.descriptor.flags.contains(ProcFlags::I_SERVICE)
    }

    /// Returns a reference to the init record used to create this process.
    pub fn descriptor(&self) -> &'static ProcInit {
        self.descriptor
    }

    /// Returns a reference to the saved machine state for the process.
    pub fn save(&self) -> &crate::arch::SavedState {
        &self.save
    }

    /// Returns a mutable reference to the saved machine state for the
    /// process.
    pub fn save_mut(&mut self) -> &mut crate::arch::SavedState {
        &mut self.save
    }
}

/// Interface that must be implemented by the `arch::SavedState` type. This
/// gives architecture-independent access to syscall arguments and results
/// for the rest of the kernel.
///
/// Argument and result slots are `usize`: addresses are opaque integers
/// sized to hold a pointer, and everything smaller rides along.
pub trait ArchState: Default {
    /// Reads syscall argument register 0.
    fn arg0(&self) -> usize;
    /// Reads syscall argument register 1.
    fn arg1(&self) -> usize;
    /// Reads syscall argument register 2.
    fn arg2(&self) -> usize;

    /// Reads the syscall descriptor (number).
    fn syscall_descriptor(&self) -> u32;

    /// Writes syscall return slot 0.
    fn ret0(&mut self, _: usize);
    /// Writes syscall return slot 1.
    fn ret1(&mut self, _: usize);

    /// Sets the status code returned by primitives that report one.
    fn set_status(&mut self, rc: u32) {
        self.ret0(rc as usize);
    }

    /// Sets the results of a completed `receive`: the payload address and
    /// the sending process.
    fn set_recv_result(&mut self, payload: usize, sender: ProcId) {
        self.ret0(payload);
        self.ret1(usize::from(sender.0));
    }

    /// Sets the result of a completed `request_memory`.
    fn set_alloc_result(&mut self, payload: usize) {
        self.ret0(payload);
    }
}

/// Identity a primitive runs on behalf of: which process-table slot, and
/// whether the code invoking it is an interrupt service.
///
/// I-services never block and never trigger a context switch themselves;
/// passing the kind down explicitly lets each primitive honor that without
/// anyone swapping a global current-process pointer around.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Caller {
    pub index: usize,
    pub kind: CallerKind,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CallerKind {
    /// A normal process, entering through the syscall gate.
    Process,
    /// An i-service body running in interrupt context.
    IService,
}

impl Caller {
    pub fn process(index: usize) -> Self {
        Caller {
            index,
            kind: CallerKind::Process,
        }
    }

    pub fn i_service(index: usize) -> Self {
        Caller {
            index,
            kind: CallerKind::IService,
        }
    }

    pub fn is_i_service(&self) -> bool {
        self.kind == CallerKind::IService
    }
}

/// Return value for operations that can have scheduling implications. This
/// is marked `must_use` because forgetting to actually consult the scheduler
/// after performing an operation that requires it would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextProc {
    /// It's fine to keep running whatever process we were just running.
    Same,
    /// The scheduler should re-evaluate; a process may have become ready
    /// that beats the current one.
    Other,
}

impl NextProc {
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (NextProc::Same, NextProc::Same) => NextProc::Same,
            _ => NextProc::Other,
        }
    }
}
