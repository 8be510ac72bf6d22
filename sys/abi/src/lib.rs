// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executive ABI definitions, shared between the kernel and applications.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{AsBytes, FromBytes, Unaligned};

/// Number of scheduling priority levels available to processes. Priorities
/// range over `0..NUM_PRIORITIES`, with 0 the most important.
pub const NUM_PRIORITIES: usize = 4;

/// Upper bound on the number of processes an application may declare,
/// including the idle process and the two i-services. The kernel's queues are
/// sized for this. (Note that changing this alters the ABI.)
pub const MAX_PROCS: usize = 16;

/// Size of one pool block, envelope header included.
pub const BLOCK_SIZE: usize = 128;

/// Size of the envelope header at the front of every block. The payload
/// address handed to processes points this far past the block base.
pub const ENVELOPE_SIZE: usize = 16;

/// Number of payload bytes in a block.
pub const PAYLOAD_SIZE: usize = BLOCK_SIZE - ENVELOPE_SIZE;

/// Names a process.
///
/// Process ids are assigned by position in the application's init table:
/// id 0 is the idle process, ids `1..n-2` are normal processes, and the last
/// two slots are the timer and UART i-services, in that order. Processes are
/// never destroyed, so an id stays valid forever.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ProcId(pub u8);

impl ProcId {
    /// The idle process occupies slot 0 by construction.
    pub const IDLE: Self = ProcId(0);

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// A process's scheduling priority: one of the `NUM_PRIORITIES` fixed
/// levels, where level 0 outranks everything and each step up the scale
/// matters less. The value 4 exists solely so the idle process can sit
/// beneath every schedulable level.
///
/// The comparison operators are intentionally unavailable here. With an
/// inverted scale, `a < b` would read as "a is less" while meaning "a wins",
/// and that trap has bitten before; the named methods below are the only
/// way to rank two priorities.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, AsBytes, Unaligned, Default,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Priority of the idle process, one step below the least important
    /// process priority. No other process may use it.
    pub const IDLE: Self = Priority(NUM_PRIORITIES as u8);

    /// True when `self` outranks `other` outright, i.e. the scheduler would
    /// never keep an `other`-level process running while a `self`-level one
    /// is ready.
    pub fn is_more_important_than(self, other: Self) -> bool {
        // Smaller number, bigger claim on the CPU.
        self.0 < other.0
    }

    /// True when `self` ranks at or above `other`. This is the round-robin
    /// test: an equal-level peer at the head of its bucket displaces the
    /// running process at a yield.
    pub fn is_at_least_as_important_as(self, other: Self) -> bool {
        self.0 <= other.0
    }

    /// Checks whether this is a priority a normal process may hold.
    pub fn is_valid_for_process(self) -> bool {
        usize::from(self.0) < NUM_PRIORITIES
    }
}

/// State used to make scheduling decisions.
///
/// A process appears on the queue matching its state: READY processes (and
/// NEW ones, which have simply never run) sit on the ready queue, blocked
/// processes on the corresponding blocked queue, and the RUNNING process on
/// none of them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProcState {
    /// Created but never dispatched; the initial exception frame is still
    /// intact on the process stack.
    New,
    /// Could be scheduled on the CPU.
    Ready,
    /// Currently executing. At most one process is in this state.
    Running,
    /// Suspended in `request_memory` until a block is released.
    BlockedOnMemory,
    /// Suspended in `receive` until a message arrives.
    BlockedOnReceive,
}

bitflags::bitflags! {
    /// Boolean attributes of a process-init record.
    #[derive(Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct ProcFlags: u32 {
        /// Process body is invoked by a hardware interrupt. I-services are
        /// never enqueued for scheduling and must not block.
        const I_SERVICE = 1 << 0;

        const RESERVED = !1;
    }
}

/// Record describing a single process, one entry of the table the
/// application hands to the kernel at startup.
#[derive(Clone, Debug)]
#[repr(C)]
pub struct ProcInit {
    /// Address of the process entry point. Placed in the program-counter
    /// slot of the initial exception frame.
    pub entry_point: u32,
    /// Size of the process stack in 32-bit words.
    pub stack_words: u32,
    /// Initial priority. Must be `Priority::IDLE` for slot 0 and a normal
    /// priority everywhere else.
    pub priority: u32,
    /// Attribute flags.
    pub flags: ProcFlags,
}

/// Message-type tags transported verbatim in envelopes. The kernel does not
/// interpret these; they are a convention between the processes layered on
/// top.
pub mod message {
    /// Untyped payload.
    pub const DEFAULT: u32 = 0;
    /// Command registration with the command dispatcher.
    pub const KCD_REG: u32 = 1;
    /// Console output for the display process.
    pub const CRT_DISPLAY: u32 = 2;
    /// A single keystroke from the UART i-service.
    pub const USER_INPUT: u32 = 3;
    /// A dispatched command line.
    pub const COMMAND: u32 = 4;
}

/// Success code returned in the first result register by primitives that
/// report a status.
pub const RC_OK: u32 = 0;

/// An argument was invalid: null payload, out-of-range process id, bad
/// priority, or a priority change aimed at the idle process or an i-service.
pub const RC_INVALID_ARG: u32 = !0;

/// A process was not found on the queue its state says it occupies. This
/// indicates a kernel-state inconsistency and is reported rather than
/// assumed away.
pub const RC_NOT_FOUND: u32 = !1;

/// The block pool is empty. Only the non-blocking allocation path returns
/// this; the blocking path suspends instead.
pub const RC_EXHAUSTED: u32 = !2;

/// Enumeration of syscall numbers.
#[repr(u32)]
pub enum Sysnum {
    Yield = 0,
    GetPriority = 1,
    SetPriority = 2,
    RequestMemory = 3,
    ReleaseMemory = 4,
    Send = 5,
    Receive = 6,
    DelayedSend = 7,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because the kernel doesn't currently depend on
/// `num-traits` and this seems okay.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Yield),
            1 => Ok(Self::GetPriority),
            2 => Ok(Self::SetPriority),
            3 => Ok(Self::RequestMemory),
            4 => Ok(Self::ReleaseMemory),
            5 => Ok(Self::Send),
            6 => Ok(Self::Receive),
            7 => Ok(Self::DelayedSend),
            _ => Err(()),
        }
    }
}
