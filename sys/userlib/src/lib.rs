// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-side support library for the executive.
//!
//! This contains the syscall stubs and safe wrappers, and re-exports the
//! contents of the `abi` crate that gets shared with the kernel.
//!
//! # Syscall stub implementations
//!
//! Each syscall consists of two parts: a public `sys_foo` function intended
//! for use by processes, and an internal `sys_foo_stub` in assembly. The
//! stubs exist because the syscall ABI passes arguments in r4-r6 and the
//! syscall number in r11 -- callee-saved registers that compiled code is
//! entitled to be using for its own purposes. Each stub spills the
//! callee-saved range, marshals its arguments, traps, and unspills, so the
//! kernel sees its arguments exactly where it expects them and the caller's
//! registers survive the trip.
//!
//! The kernel runs with interrupts leveled on entry; the gate itself never
//! re-enables them mid-primitive, so values read from the kernel are
//! consistent snapshots.
//!
//! On non-ARM targets this crate is just the `abi` re-export, which keeps
//! host builds of mixed workspaces working.

#![no_std]

pub use abi::*;

/// Error codes a primitive can hand back, decoded from the raw response
/// register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SysError {
    /// Null payload, out-of-range process id, bad priority, or a priority
    /// change aimed at the idle process or an i-service.
    InvalidArg,
    /// The target process was missing from the queue its state names.
    NotFound,
    /// The pool was empty (non-blocking allocation only).
    Exhausted,
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {

impl SysError {
    fn check(rc: u32) -> Result<(), SysError> {
        match rc {
            abi::RC_OK => Ok(()),
            abi::RC_NOT_FOUND => Err(SysError::NotFound),
            abi::RC_EXHAUSTED => Err(SysError::Exhausted),
            _ => Err(SysError::InvalidArg),
        }
    }
}

/// Voluntarily reinvokes the scheduler. May or may not switch; always
/// succeeds.
#[inline(always)]
pub fn sys_yield() {
    unsafe {
        sys_yield_stub();
    }
}

/// Reads the current priority of `pid`.
#[inline(always)]
pub fn sys_get_priority(pid: ProcId) -> Result<Priority, SysError> {
    let rc = unsafe { sys_get_priority_stub(u32::from(pid.0)) };
    // Priorities are tiny; anything else is an error code.
    if rc <= u32::from(Priority::IDLE.0) {
        Ok(Priority(rc as u8))
    } else {
        Err(SysError::InvalidArg)
    }
}

/// Changes the priority of `pid`. Fails for the idle process, i-services,
/// and priorities outside the process range.
#[inline(always)]
pub fn sys_set_priority(
    pid: ProcId,
    priority: Priority,
) -> Result<(), SysError> {
    let rc = unsafe {
        sys_set_priority_stub(u32::from(pid.0), u32::from(priority.0))
    };
    SysError::check(rc)
}

/// Allocates a message block, suspending until one is available. Returns
/// the payload address.
#[inline(always)]
pub fn sys_request_memory() -> *mut u8 {
    unsafe { sys_request_memory_stub() as *mut u8 }
}

/// Returns a block to the pool. Fails on null or foreign addresses.
#[inline(always)]
pub fn sys_release_memory(payload: *mut u8) -> Result<(), SysError> {
    let rc = unsafe { sys_release_memory_stub(payload as u32) };
    SysError::check(rc)
}

/// Sends the block at `payload` to `dest`'s mailbox.
#[inline(always)]
pub fn sys_send(dest: ProcId, payload: *mut u8) -> Result<(), SysError> {
    let rc = unsafe { sys_send_stub(u32::from(dest.0), payload as u32) };
    SysError::check(rc)
}

/// Receives the next message, suspending until one arrives. Returns the
/// payload address and the sender.
#[inline(always)]
pub fn sys_receive() -> (*mut u8, ProcId) {
    let packed = unsafe { sys_receive_stub() };
    (packed as u32 as *mut u8, ProcId((packed >> 32) as u8))
}

/// Canonical body for the idle process: a tight yield loop. The kernel
/// dispatches it only when nothing else is ready.
pub fn idle_loop() -> ! {
    loop {
        sys_yield();
    }
}

/// Sends the block at `payload` to `dest` after `delay_ms` milliseconds.
/// Cannot be cancelled once enqueued.
#[inline(always)]
pub fn sys_delayed_send(
    dest: ProcId,
    payload: *mut u8,
    delay_ms: u32,
) -> Result<(), SysError> {
    let rc = unsafe {
        sys_delayed_send_stub(u32::from(dest.0), payload as u32, delay_ms)
    };
    SysError::check(rc)
}

extern "C" {
    fn sys_yield_stub() -> u32;
    fn sys_get_priority_stub(pid: u32) -> u32;
    fn sys_set_priority_stub(pid: u32, priority: u32) -> u32;
    fn sys_request_memory_stub() -> u32;
    fn sys_release_memory_stub(payload: u32) -> u32;
    fn sys_send_stub(dest: u32, payload: u32) -> u32;
    fn sys_receive_stub() -> u64;
    fn sys_delayed_send_stub(dest: u32, payload: u32, delay_ms: u32) -> u32;
}

// The stubs themselves. Arguments arrive in r0-r2 per the C ABI and move
// into r4-r6 for the kernel; the syscall number rides in r11. Results come
// back in r4 (and r5 for receive) and move to the C ABI return registers.
// The numbers after `mov r11` are the `abi::Sysnum` discriminants.
core::arch::global_asm!(
    "
    .section .text.syscall_stubs
    .syntax unified

    .global sys_yield_stub
    .type sys_yield_stub, %function
    .thumb_func
sys_yield_stub:
    push {{r4-r11}}
    mov r11, #0            @ Sysnum::Yield
    svc #0
    mov r0, r4
    pop {{r4-r11}}
    bx lr

    .global sys_get_priority_stub
    .type sys_get_priority_stub, %function
    .thumb_func
sys_get_priority_stub:
    push {{r4-r11}}
    mov r4, r0
    mov r11, #1            @ Sysnum::GetPriority
    svc #0
    mov r0, r4
    pop {{r4-r11}}
    bx lr

    .global sys_set_priority_stub
    .type sys_set_priority_stub, %function
    .thumb_func
sys_set_priority_stub:
    push {{r4-r11}}
    mov r4, r0
    mov r5, r1
    mov r11, #2            @ Sysnum::SetPriority
    svc #0
    mov r0, r4
    pop {{r4-r11}}
    bx lr

    .global sys_request_memory_stub
    .type sys_request_memory_stub, %function
    .thumb_func
sys_request_memory_stub:
    push {{r4-r11}}
    mov r11, #3            @ Sysnum::RequestMemory
    svc #0
    mov r0, r4
    pop {{r4-r11}}
    bx lr

    .global sys_release_memory_stub
    .type sys_release_memory_stub, %function
    .thumb_func
sys_release_memory_stub:
    push {{r4-r11}}
    mov r4, r0
    mov r11, #4            @ Sysnum::ReleaseMemory
    svc #0
    mov r0, r4
    pop {{r4-r11}}
    bx lr

    .global sys_send_stub
    .type sys_send_stub, %function
    .thumb_func
sys_send_stub:
    push {{r4-r11}}
    mov r4, r0
    mov r5, r1
    mov r11, #5            @ Sysnum::Send
    svc #0
    mov r0, r4
    pop {{r4-r11}}
    bx lr

    .global sys_receive_stub
    .type sys_receive_stub, %function
    .thumb_func
sys_receive_stub:
    push {{r4-r11}}
    mov r11, #6            @ Sysnum::Receive
    svc #0
    mov r0, r4              @ payload address
    mov r1, r5              @ sender
    pop {{r4-r11}}
    bx lr

    .global sys_delayed_send_stub
    .type sys_delayed_send_stub, %function
    .thumb_func
sys_delayed_send_stub:
    push {{r4-r11}}
    mov r4, r0
    mov r5, r1
    mov r6, r2
    mov r11, #7            @ Sysnum::DelayedSend
    svc #0
    mov r0, r4
    pop {{r4-r11}}
    bx lr
    "
);

    }
}
