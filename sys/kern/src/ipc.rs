// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inter-process messaging.
//!
//! Messages are pool blocks. A sender fills a block's payload, then `send`
//! stamps the envelope and appends it to the destination mailbox. A
//! destination blocked in `receive` is woken on the spot: its suspended
//! syscall is completed by writing the payload address and sender into its
//! saved registers, and it goes back on the ready queue. There is no
//! kernel-side retry loop anywhere; blocking is a state, not a wait.
//!
//! `delayed_send` stamps a future delivery tick and parks the envelope in
//! the timer i-service's own mailbox; the timer moves it to the sorted
//! delayed list and performs an ordinary send when the tick arrives.

use abi::{ProcId, ProcState};

use crate::err::UserError;
use crate::kernel::Kernel;
use crate::mem::BlockHandle;
use crate::proc::{ArchState, Caller, NextProc};

/// Implementation of the `send` primitive.
///
/// Rejects a null or foreign payload address and an out-of-range
/// destination. On success the returned hint is `Other` exactly when the
/// destination was blocked in `receive` and is now ready, i.e. when the
/// scheduler might owe it the CPU.
pub fn send(
    k: &mut Kernel,
    caller: Caller,
    dest: usize,
    payload: usize,
) -> Result<NextProc, UserError> {
    let dest = k.valid_index(dest).ok_or(UserError::InvalidArg)?;
    let h = k.pool.handle_at_payload(payload)?;
    let env = k.pool.env_mut(h);
    env.sender = caller.index as u8;
    env.dest = dest as u8;
    Ok(deliver(k, dest, h))
}

/// Appends `h` to `dest`'s mailbox and unblocks `dest` if it is suspended in
/// `receive`. Shared by `send` and the timer's delayed delivery; the
/// envelope must already be stamped.
pub(crate) fn deliver(k: &mut Kernel, dest: usize, h: BlockHandle) -> NextProc {
    k.procs[dest].mailbox.push(&mut k.pool, h);

    if k.procs[dest].state() != ProcState::BlockedOnReceive {
        return NextProc::Same;
    }

    let prio = k.procs[dest].priority();
    let removed = k.recv_blocked.remove(dest as u8, usize::from(prio.0));
    uassert!(removed);

    // A process blocked in receive has an empty mailbox, so the head is the
    // envelope we just queued.
    let Some(msg) = k.procs[dest].mailbox.pop(&mut k.pool) else {
        unreachable!();
    };
    let addr = k.pool.payload_addr(msg);
    let sender = ProcId(k.pool.env(msg).sender);
    k.procs[dest].save_mut().set_recv_result(addr, sender);
    k.procs[dest].set_state(ProcState::Ready);
    let r = k.ready.push(dest as u8, usize::from(prio.0));
    uassert!(r.is_ok());
    NextProc::Other
}

/// Implementation of the blocking `receive` primitive.
///
/// Returns the payload address and sender of the head envelope, or `None`
/// after suspending the caller on the receive-blocked queue; in the latter
/// case the caller's syscall is completed later by whichever `send` wakes
/// it.
pub fn receive(k: &mut Kernel, caller: Caller) -> Option<(usize, ProcId)> {
    uassert!(!caller.is_i_service());
    let idx = caller.index;
    match k.procs[idx].mailbox.pop(&mut k.pool) {
        Some(h) => {
            let addr = k.pool.payload_addr(h);
            let sender = ProcId(k.pool.env(h).sender);
            Some((addr, sender))
        }
        None => {
            let prio = k.procs[idx].priority();
            k.procs[idx].set_state(ProcState::BlockedOnReceive);
            let r = k.recv_blocked.push(idx as u8, usize::from(prio.0));
            uassert!(r.is_ok());
            None
        }
    }
}

/// Non-blocking receive for i-services: dequeues the head envelope of
/// process `index`'s mailbox, staying in handle space.
pub fn receive_nb(k: &mut Kernel, index: usize) -> Option<BlockHandle> {
    k.procs[index].mailbox.pop(&mut k.pool)
}

/// Implementation of the `delayed_send` primitive.
///
/// Stamps the envelope with its final destination and delivery tick, then
/// parks it in the timer i-service's mailbox. A delay of zero is legal and
/// delivers on the next tick strictly after this call.
pub fn delayed_send(
    k: &mut Kernel,
    caller: Caller,
    dest: usize,
    payload: usize,
    delay_ms: u32,
) -> Result<(), UserError> {
    let dest = k.valid_index(dest).ok_or(UserError::InvalidArg)?;
    let h = k.pool.handle_at_payload(payload)?;
    let deliver_at = k.now().offset(delay_ms);
    let env = k.pool.env_mut(h);
    env.sender = caller.index as u8;
    env.dest = dest as u8;
    env.deliver_at = deliver_at;
    let timer = k.timer_index();
    k.procs[timer].mailbox.push(&mut k.pool, h);
    Ok(())
}
