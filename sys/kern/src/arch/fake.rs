// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-in arch layer for non-ARM hosts.
//!
//! Lets the portable kernel core build and run its unit tests off-target.
//! The save area is a pair of plain argument/result arrays that tests can
//! poke directly; nothing here touches real hardware.

use core::ptr::NonNull;

use crate::kernel::Kernel;
use crate::proc::{ArchState, NextProc, Pcb};

macro_rules! klog {
    ($s:expr) => { println!($s) };
    ($s:expr, $($tt:tt)*) => { println!($s, $($tt)*) };
}

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

macro_rules! uassert_eq {
    ($cond1:expr, $cond2:expr) => {
        assert_eq!($cond1, $cond2)
    };
}

/// Host representation of saved machine state: syscall arguments and
/// results as plain arrays.
#[derive(Debug, Default)]
pub struct SavedState {
    pub args: [usize; 3],
    pub rets: [usize; 2],
    pub sysnum: u32,
}

impl ArchState for SavedState {
    fn arg0(&self) -> usize {
        self.args[0]
    }
    fn arg1(&self) -> usize {
        self.args[1]
    }
    fn arg2(&self) -> usize {
        self.args[2]
    }

    fn syscall_descriptor(&self) -> u32 {
        self.sysnum
    }

    fn ret0(&mut self, x: usize) {
        self.rets[0] = x;
    }
    fn ret1(&mut self, x: usize) {
        self.rets[1] = x;
    }
}

static mut KERNEL_PTR: Option<NonNull<Kernel>> = None;

pub unsafe fn set_kernel(kernel: &mut Kernel) {
    let prev = core::mem::replace(&mut KERNEL_PTR, Some(NonNull::from(kernel)));
    uassert_eq!(prev, None);
}

pub unsafe fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    let mut k = KERNEL_PTR.expect("kernel not started");
    body(k.as_mut())
}

pub unsafe fn set_current_proc(_pcb: &mut Pcb) {}

pub unsafe fn reinitialize(_pcb: &mut Pcb, _stack_top: usize) {
    // No exception frames to build on the host.
}

pub fn pend_context_switch() {}

pub unsafe fn isr_context(body: impl FnOnce(&mut Kernel) -> NextProc) {
    let hint = with_kernel(body);
    if hint != NextProc::Same {
        pend_context_switch();
    }
}

pub unsafe fn start_first_proc(_tick_divisor: u32, _pcb: &mut Pcb) -> ! {
    panic!("entering userland");
}

pub fn enable_irq(_n: u32) {}

pub fn disable_irq(_n: u32) {}
