// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall dispatch.
//!
//! The arch-specific gate saves the caller's registers into its PCB and
//! calls [`handle`]; arguments are read from, and results written to, the
//! saved state. A primitive that suspends its caller writes no result now --
//! the operation that later unblocks the process completes the syscall by
//! writing into this same save area before marking it ready.

use core::convert::TryFrom;

use abi::{Sysnum, RC_OK};

use crate::ipc;
use crate::kernel::Kernel;
use crate::mem;
use crate::proc::{ArchState, Caller, NextProc};
use crate::sched;

/// Executes the syscall recorded in the current process's saved state, then
/// consults the scheduler. Returns whether the current process changed, so
/// the gate knows to re-resolve its save-area pointer.
pub fn handle(k: &mut Kernel) -> bool {
    let caller = Caller::process(k.current());
    let nr = k.current_pcb().save().syscall_descriptor();

    let hint = match Sysnum::try_from(nr) {
        Ok(sysnum) => dispatch(k, caller, sysnum),
        Err(()) => {
            // Bogus syscall number. This kernel has no fault states, so the
            // caller just gets an error code back.
            k.current_pcb_mut().save_mut().set_status(abi::RC_INVALID_ARG);
            NextProc::Same
        }
    };

    sched::apply(k, hint)
}

fn dispatch(k: &mut Kernel, caller: Caller, sysnum: Sysnum) -> NextProc {
    match sysnum {
        Sysnum::Yield => {
            k.current_pcb_mut().save_mut().set_status(RC_OK);
            NextProc::Other
        }

        Sysnum::GetPriority => {
            let pid = k.current_pcb().save().arg0();
            let result = match sched::get_priority(k, pid) {
                Ok(prio) => u32::from(prio.0),
                Err(e) => e.response_code(),
            };
            k.current_pcb_mut().save_mut().set_status(result);
            NextProc::Same
        }

        Sysnum::SetPriority => {
            let pid = k.current_pcb().save().arg0();
            let prio = k.current_pcb().save().arg1();
            match sched::set_priority(k, pid, prio) {
                Ok(hint) => {
                    k.current_pcb_mut().save_mut().set_status(RC_OK);
                    hint
                }
                Err(e) => {
                    k.current_pcb_mut()
                        .save_mut()
                        .set_status(e.response_code());
                    NextProc::Same
                }
            }
        }

        Sysnum::RequestMemory => match mem::request(k, caller) {
            Some(addr) => {
                k.current_pcb_mut().save_mut().set_alloc_result(addr);
                NextProc::Same
            }
            // Suspended; the result is written by the release that wakes
            // us.
            None => NextProc::Other,
        },

        Sysnum::ReleaseMemory => {
            let addr = k.current_pcb().save().arg0();
            match mem::release(k, addr) {
                Ok(hint) => {
                    k.current_pcb_mut().save_mut().set_status(RC_OK);
                    hint
                }
                Err(e) => {
                    k.current_pcb_mut()
                        .save_mut()
                        .set_status(e.response_code());
                    NextProc::Same
                }
            }
        }

        Sysnum::Send => {
            let dest = k.current_pcb().save().arg0();
            let payload = k.current_pcb().save().arg1();
            match ipc::send(k, caller, dest, payload) {
                Ok(hint) => {
                    k.current_pcb_mut().save_mut().set_status(RC_OK);
                    hint
                }
                Err(e) => {
                    k.current_pcb_mut()
                        .save_mut()
                        .set_status(e.response_code());
                    NextProc::Same
                }
            }
        }

        Sysnum::Receive => match ipc::receive(k, caller) {
            Some((addr, sender)) => {
                k.current_pcb_mut().save_mut().set_recv_result(addr, sender);
                NextProc::Same
            }
            // Suspended; the result is written by the send that wakes us.
            None => NextProc::Other,
        },

        Sysnum::DelayedSend => {
            let dest = k.current_pcb().save().arg0();
            let payload = k.current_pcb().save().arg1();
            let delay = k.current_pcb().save().arg2() as u32;
            let result =
                match ipc::delayed_send(k, caller, dest, payload, delay) {
                    Ok(()) => RC_OK,
                    Err(e) => e.response_code(),
                };
            k.current_pcb_mut().save_mut().set_status(result);
            NextProc::Same
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{dispatch_first, kernel_with};

    fn syscall(k: &mut Kernel, nr: u32, args: [usize; 3]) -> bool {
        let save = k.current_pcb_mut().save_mut();
        save.sysnum = nr;
        save.args = args;
        handle(k)
    }

    fn ret0(k: &Kernel, index: usize) -> usize {
        k.procs[index].save().rets[0]
    }

    #[test]
    fn yield_always_succeeds_and_round_robins() {
        let k = kernel_with(&[2, 2], 0);
        dispatch_first(k);
        assert_eq!(k.current(), 1);

        assert!(syscall(k, Sysnum::Yield as u32, [0; 3]));
        assert_eq!(ret0(k, 1), RC_OK as usize);
        assert_eq!(k.current(), 2);
    }

    #[test]
    fn priority_syscalls_round_trip() {
        let k = kernel_with(&[2, 3], 0);
        dispatch_first(k);

        assert!(!syscall(k, Sysnum::GetPriority as u32, [2, 0, 0]));
        assert_eq!(ret0(k, 1), 3);

        assert!(!syscall(k, Sysnum::SetPriority as u32, [2, 2, 0]));
        assert_eq!(ret0(k, 1), RC_OK as usize);
        assert!(!syscall(k, Sysnum::GetPriority as u32, [2, 0, 0]));
        assert_eq!(ret0(k, 1), 2);
    }

    #[test]
    fn memory_syscalls_round_trip() {
        let k = kernel_with(&[2], 2);
        dispatch_first(k);

        assert!(!syscall(k, Sysnum::RequestMemory as u32, [0; 3]));
        let addr = ret0(k, 1);
        assert_ne!(addr, 0);

        assert!(!syscall(k, Sysnum::ReleaseMemory as u32, [addr, 0, 0]));
        assert_eq!(ret0(k, 1), RC_OK as usize);
        assert_eq!(k.pool.free_count(), 2);
    }

    #[test]
    fn send_and_receive_through_the_gate() {
        let k = kernel_with(&[2, 2], 2);
        dispatch_first(k);

        assert!(!syscall(k, Sysnum::RequestMemory as u32, [0; 3]));
        let addr = ret0(k, 1);

        assert!(!syscall(k, Sysnum::Send as u32, [2, addr, 0]));
        assert_eq!(ret0(k, 1), RC_OK as usize);

        // Switch to the receiver and collect the message.
        assert!(syscall(k, Sysnum::Yield as u32, [0; 3]));
        assert_eq!(k.current(), 2);
        assert!(!syscall(k, Sysnum::Receive as u32, [0; 3]));
        assert_eq!(ret0(k, 2), addr);
        assert_eq!(k.procs[2].save().rets[1], 1);
    }

    #[test]
    fn blocking_receive_switches_away() {
        let k = kernel_with(&[2, 2], 2);
        dispatch_first(k);

        assert!(syscall(k, Sysnum::Receive as u32, [0; 3]));
        assert_eq!(k.current(), 2);
        assert_eq!(k.procs[1].state(), abi::ProcState::BlockedOnReceive);
    }

    #[test]
    fn bogus_syscall_number_is_rejected() {
        let k = kernel_with(&[2], 0);
        dispatch_first(k);

        assert!(!syscall(k, 0xdead, [0; 3]));
        assert_eq!(ret0(k, 1), abi::RC_INVALID_ARG as usize);
    }
}
