// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The timer i-service.
//!
//! Runs from the 1 ms tick interrupt. Each tick advances the kernel clock,
//! files newly arrived `delayed_send` envelopes from the timer's own mailbox
//! into the delayed list, and performs an ordinary send for every envelope
//! whose tick has come. The insertion is stable: among envelopes with the
//! same delivery tick, the one filed first is delivered first, so equal
//! delays preserve call order.

use crate::ipc;
use crate::kernel::Kernel;
use crate::mem::{BlockHandle, BlockPool};
use crate::proc::NextProc;
use crate::time::Tick;

/// The delayed-delivery list: envelopes sorted ascending by delivery tick,
/// threaded through the pool's link fields like every other envelope list.
#[derive(Debug, Default)]
pub struct DelayList {
    head: Option<BlockHandle>,
}

impl DelayList {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Files `h` by its delivery tick, after any envelope already filed for
    /// the same tick.
    pub fn insert(&mut self, pool: &mut BlockPool, h: BlockHandle) {
        let at = pool.env(h).deliver_at;

        let insert_at_head = match self.head {
            None => true,
            Some(head) => pool.env(head).deliver_at > at,
        };
        if insert_at_head {
            pool.env_mut(h).link = self.head;
            self.head = Some(h);
            return;
        }

        // Walk to the last envelope with a tick not later than ours.
        let Some(mut cur) = self.head else {
            unreachable!();
        };
        while let Some(next) = pool.env(cur).link {
            if pool.env(next).deliver_at > at {
                break;
            }
            cur = next;
        }
        pool.env_mut(h).link = pool.env(cur).link;
        pool.env_mut(cur).link = Some(h);
    }

    /// Removes and returns the head envelope if its tick has arrived.
    pub fn pop_due(
        &mut self,
        pool: &mut BlockPool,
        now: Tick,
    ) -> Option<BlockHandle> {
        let h = self.head?;
        if pool.env(h).deliver_at > now {
            return None;
        }
        self.head = pool.env_mut(h).link.take();
        Some(h)
    }
}

/// Body of the timer i-service, invoked once per millisecond interrupt.
///
/// The interrupt entry acknowledges the hardware; this is everything after
/// that. The returned hint is applied at the interrupt epilogue -- the
/// i-service itself never switches.
pub fn tick(k: &mut Kernel) -> NextProc {
    k.ticks.advance();

    let timer = k.timer_index();
    while let Some(h) = ipc::receive_nb(k, timer) {
        k.delayed.insert(&mut k.pool, h);
    }

    let mut hint = NextProc::Same;
    let now = k.now();
    loop {
        // Field-level borrow: the delayed list and the pool are separate
        // pieces of the kernel.
        let Some(h) = k.delayed.pop_due(&mut k.pool, now) else {
            break;
        };
        let dest = usize::from(k.pool.env(h).dest);
        uassert!(dest < k.procs.len());
        // Delivery is a regular send performed by the timer, so the
        // receiver observes the timer as sender.
        k.pool.env_mut(h).sender = timer as u8;
        hint = hint.combine(ipc::deliver(k, dest, h));
    }
    hint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem;
    use crate::proc::Caller;
    use crate::testutil::kernel_with;
    use abi::ProcId;

    fn delayed(k: &mut Kernel, dest: usize, delay: u32) -> usize {
        let payload = mem::request(k, Caller::process(1)).unwrap();
        ipc::delayed_send(k, Caller::process(1), dest, payload, delay)
            .unwrap();
        payload
    }

    fn run_ticks(k: &mut Kernel, n: u32) -> NextProc {
        let mut hint = NextProc::Same;
        for _ in 0..n {
            hint = hint.combine(tick(k));
        }
        hint
    }

    #[test]
    fn shorter_delay_overtakes_longer_ones() {
        // m1 and m2 at 10 ms, then m3 at 5 ms: the receiver must see m3,
        // m1, m2.
        let k = kernel_with(&[2, 2], 4);
        let m1 = delayed(k, 2, 10);
        let m2 = delayed(k, 2, 10);
        let m3 = delayed(k, 2, 5);

        let _ = run_ticks(k, 10);

        let rx = Caller::process(2);
        let timer = ProcId(k.timer_index() as u8);
        for expected in [m3, m1, m2] {
            let (got, sender) = ipc::receive(k, rx).unwrap();
            assert_eq!(got, expected);
            assert_eq!(sender, timer);
        }
    }

    #[test]
    fn equal_delays_deliver_in_call_order() {
        let k = kernel_with(&[2, 2], 6);
        let sent: Vec<usize> = (0..4).map(|_| delayed(k, 2, 3)).collect();

        let _ = run_ticks(k, 3);

        let rx = Caller::process(2);
        for expected in sent {
            let (got, _) = ipc::receive(k, rx).unwrap();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn zero_delay_delivers_on_the_next_tick() {
        let k = kernel_with(&[2, 2], 4);
        let m = delayed(k, 2, 0);

        // Nothing is delivered until a tick actually fires.
        assert!(k.procs[2].mailbox.is_empty());
        let hint = tick(k);
        // Destination is not blocked, so no reschedule is requested...
        assert_eq!(hint, NextProc::Same);
        // ...but the message is waiting.
        let (got, _) = ipc::receive(k, Caller::process(2)).unwrap();
        assert_eq!(got, m);
    }

    #[test]
    fn delivery_unblocks_a_waiting_receiver() {
        let k = kernel_with(&[2, 2], 4);
        let _ = delayed(k, 2, 2);
        assert_eq!(ipc::receive(k, Caller::process(2)), None);

        assert_eq!(run_ticks(k, 1), NextProc::Same);
        let hint = tick(k);
        assert_eq!(hint, NextProc::Other);
        assert_eq!(k.procs[2].state(), abi::ProcState::Ready);
    }

    #[test]
    fn undelivered_messages_stay_sorted_across_ticks() {
        let k = kernel_with(&[2, 2], 6);
        let m_late = delayed(k, 2, 50);
        let m_early = delayed(k, 2, 2);

        let _ = run_ticks(k, 2);
        let (got, _) = ipc::receive(k, Caller::process(2)).unwrap();
        assert_eq!(got, m_early);
        assert!(k.procs[2].mailbox.is_empty());
        assert!(!k.delayed.is_empty());

        let _ = run_ticks(k, 48);
        let (got, _) = ipc::receive(k, Caller::process(2)).unwrap();
        assert_eq!(got, m_late);
        assert!(k.delayed.is_empty());
    }

    #[test]
    fn delay_list_insertion_is_stable() {
        let k = kernel_with(&[2], 6);
        // Build the list directly to check the structure: ticks 7, 5, 6,
        // 5 again.
        let mut handles = Vec::new();
        for at in [7u32, 5, 6, 5] {
            let h = mem::request_nb(k).unwrap();
            k.pool.env_mut(h).deliver_at = at.into();
            k.delayed.insert(&mut k.pool, h);
            handles.push(h);
        }

        let mut order = Vec::new();
        while let Some(h) = k.delayed.pop_due(&mut k.pool, 100.into()) {
            order.push(h);
        }
        // 5 (first filed), 5 (second filed), 6, 7.
        assert_eq!(order, [handles[1], handles[3], handles[2], handles[0]]);
    }
}
