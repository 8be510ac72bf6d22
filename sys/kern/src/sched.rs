// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler.
//!
//! Strict priority with FIFO within a level. The ready queue holds every
//! schedulable process except the one on the CPU; picking the next process
//! is a comparison between the queue's most important level and the current
//! process. The idle process is dispatched only when the queue is empty and
//! the current process cannot continue, and is itself never enqueued.

use abi::{ProcState, Priority};

use crate::err::UserError;
use crate::kernel::Kernel;
use crate::proc::NextProc;

/// Consults the selection rule and performs the bookkeeping half of a
/// context switch if it calls for one. Returns whether the current process
/// changed; the arch layer uses that to update its notion of the current
/// save area.
///
/// The rule: the head of the most important non-empty ready bucket wins if
/// it is at least as important as the current process, or if the current
/// process cannot continue. With an empty queue, a blocked current process
/// hands the CPU to idle. Otherwise nothing changes.
pub fn apply(k: &mut Kernel, hint: NextProc) -> bool {
    if hint == NextProc::Same {
        return false;
    }

    let cur = k.current;
    let cur_can_run = k.procs[cur].state() == ProcState::Running;
    let cur_prio = k.procs[cur].priority();

    let next = match k.ready.top_level() {
        Some(level)
            if !cur_can_run
                || Priority(level as u8)
                    .is_at_least_as_important_as(cur_prio) =>
        {
            let Some((h, _)) = k.ready.pop() else {
                unreachable!();
            };
            usize::from(h)
        }
        _ if cur_can_run => return false,
        _ => 0, // idle
    };

    // Dispose of the outgoing process. Blocked processes are already on
    // their queue; a preempted one re-joins the ready queue at the tail of
    // its bucket, unless it is idle or an i-service, which are never
    // enqueued.
    if k.procs[cur].state() == ProcState::Running {
        k.procs[cur].set_state(ProcState::Ready);
        if cur != 0 && !k.procs[cur].is_i_service() {
            let r = k.ready.push(cur as u8, usize::from(cur_prio.0));
            uassert!(r.is_ok());
        }
    }

    k.procs[next].set_state(ProcState::Running);
    k.current = next;
    true
}

/// Implementation of the `get_priority` primitive.
pub fn get_priority(k: &Kernel, pid: usize) -> Result<Priority, UserError> {
    let index = k.valid_index(pid).ok_or(UserError::InvalidArg)?;
    Ok(k.procs[index].priority())
}

/// Implementation of the `set_priority` primitive.
///
/// Moves the target to the tail of its new bucket on whichever queue its
/// state places it. Setting a process to the priority it already has is a
/// complete no-op. The returned hint asks for a reschedule only when the
/// change could disturb the running order: the current process changed its
/// own priority, or a ready process was promoted past the current one.
pub fn set_priority(
    k: &mut Kernel,
    pid: usize,
    priority: usize,
) -> Result<NextProc, UserError> {
    let target = k.valid_index(pid).ok_or(UserError::InvalidArg)?;
    if priority > u8::MAX as usize {
        return Err(UserError::InvalidArg);
    }
    let new = Priority(priority as u8);
    if !new.is_valid_for_process() {
        return Err(UserError::InvalidArg);
    }
    if target == 0 || k.procs[target].is_i_service() {
        return Err(UserError::InvalidArg);
    }

    let old = k.procs[target].priority();
    if old == new {
        return Ok(NextProc::Same);
    }

    let old_level = usize::from(old.0);
    let new_level = usize::from(new.0);
    let hint = match k.procs[target].state() {
        ProcState::New | ProcState::Ready => {
            if !k.ready.remove(target as u8, old_level) {
                return Err(UserError::NotFound);
            }
            let r = k.ready.push(target as u8, new_level);
            uassert!(r.is_ok());
            let cur_prio = k.procs[k.current].priority();
            if new.is_more_important_than(cur_prio) {
                NextProc::Other
            } else {
                NextProc::Same
            }
        }
        ProcState::Running => {
            // Only the current process is ever RUNNING; demoting (or
            // re-prioritizing) ourselves always warrants a second look.
            NextProc::Other
        }
        ProcState::BlockedOnMemory => {
            if !k.mem_blocked.remove(target as u8, old_level) {
                return Err(UserError::NotFound);
            }
            let r = k.mem_blocked.push(target as u8, new_level);
            uassert!(r.is_ok());
            NextProc::Same
        }
        ProcState::BlockedOnReceive => {
            if !k.recv_blocked.remove(target as u8, old_level) {
                return Err(UserError::NotFound);
            }
            let r = k.recv_blocked.push(target as u8, new_level);
            uassert!(r.is_ok());
            NextProc::Same
        }
    };

    k.procs[target].set_priority(new);
    Ok(hint)
}
