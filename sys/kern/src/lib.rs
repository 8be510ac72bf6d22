// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Preemptive real-time executive kernel.
//!
//! This is the application-independent portion of the executive: process
//! lifecycle and context switching, the four-level priority scheduler,
//! mailbox IPC with delayed delivery, and the fixed-size block allocator,
//! together with the timer and UART interrupt services that feed them.
//!
//! The code outside of the `arch` module is portable: it operates on a
//! single [`kernel::Kernel`] context value and compiles for the host as well
//! as ARMv7-M, which is how the unit tests run.
//!
//! # Design principles
//!
//! 1. Everything is decided at startup. The application declares its
//!    processes in a fixed table and hands over one RAM region; the kernel
//!    carves PCBs, queues, pool, and stacks out of it once and never frees
//!    or resizes anything afterwards.
//! 2. `unsafe` stays at the edges. Raw memory shows up in exactly two
//!    places -- the boot-time carve-up and the arch entry/exit paths -- and
//!    the rest of the kernel manipulates ordinary owned state.
//! 3. Small N beats clever O. A system of at most sixteen processes does
//!    not earn linked-list tricks; shift-a-few-bytes scans are easier to
//!    convince yourself about.
//! 4. One context, threaded explicitly. Entry points recover the `Kernel`
//!    value and hand `&mut` down the call tree; primitive bodies never
//!    reach for a global.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod err;
pub mod ipc;
pub mod kernel;
pub mod mem;
pub mod proc;
pub mod sched;
pub mod startup;
pub mod syscalls;
pub mod time;
pub mod timer;
pub mod uart;

#[cfg(test)]
pub(crate) mod testutil;
