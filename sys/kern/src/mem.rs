// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-size memory block pool and the envelope lists threaded through it.
//!
//! All message traffic rides on blocks from one static pool. A block is
//! `abi::BLOCK_SIZE` bytes: an envelope header at the front, payload behind
//! it. Processes only ever see the payload address; the kernel converts
//! between payload addresses and [`BlockHandle`]s at the boundary.
//!
//! The envelope header carries a single `link` field, and every list a block
//! can be on -- the free stack, a process mailbox, the delayed-delivery list
//! -- is threaded through that field. A block is therefore on at most one
//! list at a time by construction; a block on no list is a live allocation
//! owned by exactly one process.

use abi::{ProcState, BLOCK_SIZE, ENVELOPE_SIZE, PAYLOAD_SIZE};

use crate::err::UserError;
use crate::kernel::Kernel;
use crate::proc::{ArchState, Caller, NextProc};
use crate::time::Tick;

/// Names a block in the pool arena. Handles are never exposed to processes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct BlockHandle(u8);

impl BlockHandle {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Envelope header at the front of every block.
///
/// `sender`, `dest`, and `deliver_at` are only meaningful while the block is
/// in flight as a message; the message-type tag convention lives in the
/// payload, where user code can reach it.
#[derive(Debug)]
#[repr(C)]
pub struct Envelope {
    /// Intrusive link for whichever list currently holds the block.
    pub(crate) link: Option<BlockHandle>,
    /// Process that sent this message.
    pub(crate) sender: u8,
    /// Process this message is addressed to.
    pub(crate) dest: u8,
    /// Tick at which a delayed message becomes deliverable.
    pub(crate) deliver_at: Tick,
    /// Reserved; pads the header to `ENVELOPE_SIZE`.
    _reserved: [u8; 8],
}

/// One pool block: envelope header plus payload.
#[derive(Debug)]
#[repr(C)]
pub struct Block {
    env: Envelope,
    payload: [u8; PAYLOAD_SIZE],
}

const _: () = assert!(core::mem::size_of::<Envelope>() == ENVELOPE_SIZE);
const _: () = assert!(core::mem::size_of::<Block>() == BLOCK_SIZE);

impl Block {
    pub const fn zeroed() -> Self {
        Block {
            env: Envelope {
                link: None,
                sender: 0,
                dest: 0,
                deliver_at: Tick::ZERO,
                _reserved: [0; 8],
            },
            payload: [0; PAYLOAD_SIZE],
        }
    }
}

/// The pool: an arena of blocks and an intrusive LIFO stack of the free
/// ones.
#[derive(Debug)]
pub struct BlockPool {
    arena: &'static mut [Block],
    free: Option<BlockHandle>,
    free_count: usize,
}

impl BlockPool {
    /// Takes ownership of `arena` and pushes every block onto the free
    /// stack.
    pub fn new(arena: &'static mut [Block]) -> Self {
        uassert!(arena.len() <= usize::from(u8::MAX) + 1);
        let mut pool = BlockPool {
            free_count: arena.len(),
            arena,
            free: None,
        };
        for i in 0..pool.arena.len() {
            let h = BlockHandle(i as u8);
            pool.arena[i].env.link = pool.free;
            pool.free = Some(h);
        }
        pool
    }

    /// Pops the most recently freed block, if any.
    pub fn allocate(&mut self) -> Option<BlockHandle> {
        let h = self.free?;
        self.free = self.arena[h.index()].env.link.take();
        self.free_count -= 1;
        Some(h)
    }

    /// Pushes `h` back onto the free stack.
    ///
    /// Releasing a block that is still owned elsewhere is not checked and
    /// corrupts the pool.
    pub fn release(&mut self, h: BlockHandle) {
        self.arena[h.index()].env.link = self.free;
        self.free = Some(h);
        self.free_count += 1;
    }

    /// Number of blocks currently on the free stack.
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn env(&self, h: BlockHandle) -> &Envelope {
        &self.arena[h.index()].env
    }

    pub fn env_mut(&mut self, h: BlockHandle) -> &mut Envelope {
        &mut self.arena[h.index()].env
    }

    pub fn payload(&self, h: BlockHandle) -> &[u8; PAYLOAD_SIZE] {
        &self.arena[h.index()].payload
    }

    pub fn payload_mut(&mut self, h: BlockHandle) -> &mut [u8; PAYLOAD_SIZE] {
        &mut self.arena[h.index()].payload
    }

    /// The payload address handed to processes for block `h`.
    pub fn payload_addr(&self, h: BlockHandle) -> usize {
        self.arena[h.index()].payload.as_ptr() as usize
    }

    /// Converts a payload address from a process back into a handle.
    ///
    /// Null and anything that is not exactly the payload address of a block
    /// in this arena are rejected.
    pub fn handle_at_payload(
        &self,
        addr: usize,
    ) -> Result<BlockHandle, UserError> {
        let base = self.arena.as_ptr() as usize;
        let rel = addr.checked_sub(base).ok_or(UserError::InvalidArg)?;
        let index = rel / BLOCK_SIZE;
        if rel % BLOCK_SIZE != ENVELOPE_SIZE || index >= self.arena.len() {
            return Err(UserError::InvalidArg);
        }
        Ok(BlockHandle(index as u8))
    }
}

/// A FIFO of envelopes threaded through the pool's link fields. One of these
/// is a process mailbox.
#[derive(Debug, Default)]
pub struct MsgQueue {
    head: Option<BlockHandle>,
    tail: Option<BlockHandle>,
}

impl MsgQueue {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Appends `h` at the back of the queue.
    pub fn push(&mut self, pool: &mut BlockPool, h: BlockHandle) {
        pool.env_mut(h).link = None;
        match self.tail {
            Some(tail) => pool.env_mut(tail).link = Some(h),
            None => self.head = Some(h),
        }
        self.tail = Some(h);
    }

    /// Removes and returns the envelope at the front, if any.
    pub fn pop(&mut self, pool: &mut BlockPool) -> Option<BlockHandle> {
        let h = self.head?;
        self.head = pool.env_mut(h).link.take();
        if self.head.is_none() {
            self.tail = None;
        }
        Some(h)
    }
}

/// Implementation of the blocking `request_memory` primitive.
///
/// Returns the payload address of a block, or `None` after suspending the
/// caller on the memory-blocked queue; in the latter case the caller's
/// syscall is completed later by whichever `release_memory` wakes it.
pub fn request(k: &mut Kernel, caller: Caller) -> Option<usize> {
    uassert!(!caller.is_i_service());
    match k.pool.allocate() {
        Some(h) => Some(k.pool.payload_addr(h)),
        None => {
            let prio = k.procs[caller.index].priority();
            k.procs[caller.index].set_state(ProcState::BlockedOnMemory);
            let r = k
                .mem_blocked
                .push(caller.index as u8, usize::from(prio.0));
            uassert!(r.is_ok());
            None
        }
    }
}

/// Non-blocking allocation for i-services. Returns the raw handle; i-service
/// bodies stay in handle space until they hand a block to a process.
pub fn request_nb(k: &mut Kernel) -> Option<BlockHandle> {
    k.pool.allocate()
}

/// Implementation of the `release_memory` primitive.
pub fn release(k: &mut Kernel, payload: usize) -> Result<NextProc, UserError> {
    let h = k.pool.handle_at_payload(payload)?;
    Ok(release_block(k, h))
}

/// Returns `h` to the pool and, if a process is blocked waiting for memory,
/// completes its suspended `request_memory` with the released block and
/// marks it ready.
///
/// The returned hint is `Other` when a waiter was woken; the caller decides
/// what to do with it (processes yield, i-services defer to their epilogue).
pub(crate) fn release_block(k: &mut Kernel, h: BlockHandle) -> NextProc {
    k.pool.release(h);
    let Some((w, level)) = k.mem_blocked.pop() else {
        return NextProc::Same;
    };
    let w = usize::from(w);
    // The stack is LIFO, so the waiter receives the very block that was
    // just released.
    let Some(block) = k.pool.allocate() else {
        unreachable!();
    };
    let addr = k.pool.payload_addr(block);
    k.procs[w].save_mut().set_alloc_result(addr);
    k.procs[w].set_state(ProcState::Ready);
    let r = k.ready.push(w as u8, level);
    uassert!(r.is_ok());
    NextProc::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{kernel_with, leak_blocks};

    #[test]
    fn pool_initial_count() {
        let pool = BlockPool::new(leak_blocks(4));
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn pool_allocate_release_restores_count() {
        let mut pool = BlockPool::new(leak_blocks(3));
        let h = pool.allocate().unwrap();
        assert_eq!(pool.free_count(), 2);
        pool.release(h);
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn pool_is_lifo() {
        let mut pool = BlockPool::new(leak_blocks(2));
        let a = pool.allocate().unwrap();
        let addr_a = pool.payload_addr(a);
        pool.release(a);
        let b = pool.allocate().unwrap();
        assert_eq!(pool.payload_addr(b), addr_a);
    }

    #[test]
    fn pool_exhaustion() {
        let mut pool = BlockPool::new(leak_blocks(1));
        let h = pool.allocate().unwrap();
        assert_eq!(pool.allocate(), None);
        pool.release(h);
        assert!(pool.allocate().is_some());
    }

    #[test]
    fn payload_addr_round_trip() {
        let mut pool = BlockPool::new(leak_blocks(3));
        let h = pool.allocate().unwrap();
        let addr = pool.payload_addr(h);
        assert_eq!(pool.handle_at_payload(addr), Ok(h));
    }

    #[test]
    fn bogus_payload_addrs_are_rejected() {
        let mut pool = BlockPool::new(leak_blocks(2));
        let h = pool.allocate().unwrap();
        let addr = pool.payload_addr(h);
        assert_eq!(pool.handle_at_payload(0), Err(UserError::InvalidArg));
        assert_eq!(pool.handle_at_payload(addr + 1), Err(UserError::InvalidArg));
        // One whole block past the end of the arena.
        assert_eq!(
            pool.handle_at_payload(addr + 2 * BLOCK_SIZE),
            Err(UserError::InvalidArg)
        );
    }

    #[test]
    fn msg_queue_fifo() {
        let mut pool = BlockPool::new(leak_blocks(3));
        let mut q = MsgQueue::default();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        q.push(&mut pool, a);
        q.push(&mut pool, b);
        q.push(&mut pool, c);
        assert_eq!(q.pop(&mut pool), Some(a));
        assert_eq!(q.pop(&mut pool), Some(b));
        assert_eq!(q.pop(&mut pool), Some(c));
        assert_eq!(q.pop(&mut pool), None);
        assert!(q.is_empty());
    }

    #[test]
    fn request_blocks_when_empty_and_release_hands_over() {
        // Pool of one block shared by two processes: the backpressure
        // scenario. P1 takes the block, P2 blocks, P1 releases, and P2 must
        // observe the same payload address P1 held.
        let k = kernel_with(&[2, 2], 1);
        let p1 = Caller::process(1);
        let p2 = Caller::process(2);

        let addr = request(k, p1).unwrap();
        assert_eq!(request(k, p2), None);
        assert_eq!(k.procs[2].state(), ProcState::BlockedOnMemory);

        let hint = release(k, addr).unwrap();
        assert_eq!(hint, NextProc::Other);
        assert_eq!(k.procs[2].state(), ProcState::Ready);
        assert_eq!(k.procs[2].save().rets[0], addr);
        // The block is spoken for again.
        assert_eq!(k.pool.free_count(), 0);
    }

    #[test]
    fn release_wakes_highest_priority_waiter() {
        let k = kernel_with(&[1, 3, 0], 1);
        let addr = request(k, Caller::process(1)).unwrap();
        assert_eq!(request(k, Caller::process(2)), None);
        assert_eq!(request(k, Caller::process(3)), None);

        let _ = release(k, addr).unwrap();
        // The priority-0 process wins even though it blocked last.
        assert_eq!(k.procs[3].state(), ProcState::Ready);
        assert_eq!(k.procs[2].state(), ProcState::BlockedOnMemory);
    }

    #[test]
    fn release_null_fails() {
        let k = kernel_with(&[2], 1);
        assert_eq!(
            release(k, 0),
            Err(UserError::InvalidArg)
        );
    }

    #[test]
    fn release_without_waiters_keeps_running() {
        let k = kernel_with(&[2], 2);
        let addr = request(k, Caller::process(1)).unwrap();
        assert_eq!(release(k, addr), Ok(NextProc::Same));
        assert_eq!(k.pool.free_count(), 2);
    }
}
