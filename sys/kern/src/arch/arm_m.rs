// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7-M.
//!
//! # Kernel entry and preemption
//!
//! Three exception handlers get us in and out of the kernel:
//!
//! - `SVCall` implements the `SVC` instruction used by the syscall gate.
//! - `SysTick` runs the timer i-service from the millisecond timer.
//! - `PendSV` performs context switches deferred from interrupts.
//!
//! `SVCall` does the full save/restore of callee-saved state around the
//! kernel, because most syscalls can block and the return may land in a
//! different process. Interrupt handlers (`SysTick`, and whatever IRQ the
//! board routes through [`isr_context`]) do not: they run as ordinary
//! functions, and if the i-service body reports that a more important
//! process may now be ready, they set PendSV pending. PendSV kicks in when
//! the last ISR unstacks, does the same save/restore dance as `SVCall`, and
//! reconsiders scheduling there. That keeps i-services fast, and means an
//! i-service never switches contexts itself -- the switch happens at the
//! interrupt epilogue, after the hardware is acknowledged.
//!
//! All kernel entry points run at a single leveled exception priority, so
//! none of them can preempt another; this is what lets the kernel hand out
//! `&mut` to its state without locks.
//!
//! # First dispatch
//!
//! A NEW process has an exception frame constructed at the top of its stack
//! and a synthetic EXC_RETURN in its save area, so the ordinary restore path
//! "returns" into its entry point. There is no separate first-run switch.

use core::ptr::NonNull;

use zerocopy::FromBytes;

use crate::kernel::Kernel;
use crate::proc::{ArchState, NextProc, Pcb};

/// Log things from kernel context. This macro is made visible to the rest
/// of the kernel by a chain of `#[macro_use]` attributes, but its
/// implementation is very architecture-specific at the moment.
///
/// There are two ways to log: via semihosting (the "klog-semihosting"
/// feature) or via the ARM's Instrumentation Trace Macrocell (the
/// "klog-itm" feature). If neither is enabled, klog! is stubbed out.
#[cfg(not(any(feature = "klog-semihosting", feature = "klog-itm")))]
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

#[cfg(feature = "klog-itm")]
macro_rules! klog {
    ($s:expr) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR.cast_mut()).stim[0];
            cortex_m::iprintln!(stim, $s);
        }
    };
    ($s:expr, $($tt:tt)*) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR.cast_mut()).stim[0];
            cortex_m::iprintln!(stim, $s, $($tt)*);
        }
    };
}

#[cfg(feature = "klog-semihosting")]
macro_rules! klog {
    ($s:expr) => { let _ = cortex_m_semihosting::hprintln!($s); };
    ($s:expr, $($tt:tt)*) => { let _ = cortex_m_semihosting::hprintln!($s, $($tt)*); };
}

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

macro_rules! uassert_eq {
    ($cond1:expr, $cond2:expr) => {
        if !($cond1 == $cond2) {
            panic!("Assertion failed!");
        }
    };
}

/// Global recording the kernel context's location, so exception handlers can
/// recover it.
#[no_mangle]
static mut KERNEL_PTR: Option<NonNull<Kernel>> = None;

/// Global recording the save area of the current process. The `SVCall` and
/// `PendSV` assembly reads and writes through this; it must always point at
/// the `SavedState` at the front of the current process's PCB.
#[no_mangle]
static mut CURRENT_PROC_PTR: Option<NonNull<Pcb>> = None;

/// ARMv7-M volatile registers that must be saved across context switches.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedState {
    // NOTE: the following fields must be kept contiguous!
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    psp: u32,
    exc_return: u32,
    // NOTE: the above fields must be kept contiguous!
}

/// Map the volatile registers to (architecture-independent) syscall
/// argument and return slots.
impl ArchState for SavedState {
    fn arg0(&self) -> usize {
        self.r4 as usize
    }
    fn arg1(&self) -> usize {
        self.r5 as usize
    }
    fn arg2(&self) -> usize {
        self.r6 as usize
    }

    fn syscall_descriptor(&self) -> u32 {
        self.r11
    }

    fn ret0(&mut self, x: usize) {
        self.r4 = x as u32;
    }
    fn ret1(&mut self, x: usize) {
        self.r5 = x as u32;
    }
}

/// Stuff placed on the stack at exception entry.
#[derive(Debug, FromBytes, Default)]
#[repr(C)]
pub struct ExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Initially we just set the Thumb Mode bit, the minimum required.
const INITIAL_PSR: u32 = 1 << 24;

/// EXC_RETURN value selecting thread mode on the process stack, no FPU
/// state.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Constructs the initial exception frame for `pcb` at the top of its
/// stack, so that the ordinary restore path dispatches it into its entry
/// point.
///
/// # Safety
///
/// `stack_top` must point just past a writable stack region large enough
/// for the frame.
pub unsafe fn reinitialize(pcb: &mut Pcb, stack_top: usize) {
    *pcb.save_mut() = SavedState::default();
    // Modern ARMv7-M machines require 8-byte stack alignment.
    uassert!(stack_top & 0x7 == 0);

    let frame_size = core::mem::size_of::<ExceptionFrame>();
    let frame = (stack_top - frame_size) as *mut ExceptionFrame;

    // Zero the whole frame, then fill in the bits we care about.
    frame.write(ExceptionFrame::default());
    (*frame).pc = pcb.descriptor().entry_point | 1; // thumb bit
    (*frame).xpsr = INITIAL_PSR;
    (*frame).lr = 0xFFFF_FFFF; // trap on return from the entry fn

    // The stack pointer starts at the base of this frame, *not* the stack
    // top; the restore consumes the frame.
    pcb.save_mut().psp = frame as u32;
    pcb.save_mut().exc_return = EXC_RETURN_THREAD_PSP;
}

/// Records `kernel` as the system-wide kernel context.
///
/// # Safety
///
/// This stashes a copy of the reference without revoking your right to use
/// it, which is a potential aliasing violation if you call `with_kernel`
/// while still holding it. The normal kernel entry sequences avoid this
/// issue.
pub unsafe fn set_kernel(kernel: &mut Kernel) {
    let prev = core::mem::replace(&mut KERNEL_PTR, Some(NonNull::from(kernel)));
    // Catch double-uses of this function.
    uassert_eq!(prev, None);
}

/// Manufactures a mutable reference to the kernel context from thin air and
/// hands it to `body`. This bypasses borrow checking and should only be
/// used at kernel entry points, then passed around.
///
/// # Safety
///
/// Use at a kernel entry point, exactly once per entry, to recover the
/// context stored by `set_kernel`.
pub unsafe fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    let mut k = KERNEL_PTR.expect("kernel not started");
    body(k.as_mut())
}

/// Records the address of `pcb` as the current process for the save/restore
/// assembly.
///
/// # Safety
///
/// This records a pointer that aliases the process table. As long as it is
/// only read by the entry/exit assembly, you'll be okay.
pub unsafe fn set_current_proc(pcb: &mut Pcb) {
    CURRENT_PROC_PTR = Some(NonNull::from(pcb));
}

unsafe fn update_current_proc(k: &mut Kernel) {
    let cur = k.current();
    set_current_proc(&mut k.procs[cur]);
}

/// Sets the PendSV exception pending, scheduling a context-switch pass for
/// when the current interrupt (and any chained ones) unstacks.
pub fn pend_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Runs an i-service body against the kernel context from a board interrupt
/// handler, deferring any requested context switch to PendSV.
///
/// This is how the board's UART IRQ handler invokes
/// [`crate::uart::interrupt`].
///
/// # Safety
///
/// Call only from an interrupt handler running at the leveled kernel
/// priority, after `start_rtx`.
pub unsafe fn isr_context(body: impl FnOnce(&mut Kernel) -> NextProc) {
    let hint = with_kernel(body);
    if hint != NextProc::Same {
        pend_context_switch();
    }
}

/// Starts the tick timer and dispatches the first process. Never returns.
pub unsafe fn start_first_proc(tick_divisor: u32, pcb: &mut Pcb) -> ! {
    // Set fault and exception priorities to reasonable settings. Our goal
    // here is to keep the kernel non-preemptive, which means all kernel
    // entry points (SVCall, PendSV, SysTick, board interrupt handlers)
    // must share one priority level. Fault handlers stay more important so
    // that we can detect faults in the kernel.
    {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        // Faults on.
        scb.shcsr.modify(|x| x | 0b111 << 16);
        // Usage, Bus, MemManage at 0 (highest configurable).
        scb.shpr[0].write(0x00);
        scb.shpr[1].write(0x00);
        scb.shpr[2].write(0x00);
        // SVCall, SysTick, PendSV at the floor.
        scb.shpr[7].write(0xFF);
        scb.shpr[10].write(0xFF);
        scb.shpr[11].write(0xFF);

        // Force all external interrupts down there too, so they can't
        // preempt the kernel.
        let nvic = &*cortex_m::peripheral::NVIC::PTR;
        // Interrupt count lives in ICTR, in blocks of 32.
        let ictr = (0xe000_e004 as *const u32).read_volatile();
        let irq_count = (ictr as usize & 0xF) * 32;
        for i in 0..irq_count {
            nvic.ipr[i].write(0xFF);
        }
    }

    {
        // Configure the millisecond tick.
        let syst = &*cortex_m::peripheral::SYST::PTR;
        // Program reload value.
        syst.rvr.write(tick_divisor - 1);
        // Clear current value.
        syst.cvr.write(0);
        // Enable counter and interrupt.
        syst.csr.modify(|v| v | 0b111);
    }

    set_current_proc(pcb);

    core::arch::asm!(
        "
        msr PSP, {sp}           @ set the process stack pointer
        ldm {save}, {{r4-r11}}  @ restore the callee-save registers
        svc #0xFF               @ branch into the first process (svc #
                                @ ignored)
        udf #0xad               @ should not return
        ",
        sp = in(reg) pcb.save().psp,
        save = in(reg) pcb.save() as *const SavedState,
        options(noreturn),
    )
}

// Handler for the Supervisor Call (SVC) instruction: the syscall gate.
//
// On kernel entry we deposit all callee-saved state into the current PCB --
// the hardware has already stacked the caller-saved half -- then run the
// portable syscall path. On the way out we reload from whatever PCB is
// current *now*, which may be a different one. The `1:` branch handles the
// very first dispatch, which arrives here from `start_first_proc` with the
// kernel-mode EXC_RETURN.
core::arch::global_asm!(
    "
    .section .text.SVCall
    .syntax unified
    .global SVCall
    .type SVCall, %function
    .thumb_func
SVCall:
    cmp lr, #0xFFFFFFF9     @ coming from inside the kernel?
    beq 1f                  @ if so, we are starting the first process

    @ store volatile state.
    @ first, get a pointer to the current PCB.
    movw r0, #:lower16:CURRENT_PROC_PTR
    movt r0, #:upper16:CURRENT_PROC_PTR
    ldr r1, [r0]
    @ fetch the process-mode stack pointer.
    @ fetching into r12 means the order in the stm below is right.
    mrs r12, PSP
    @ now, store volatile registers, plus the PSP in r12, plus LR.
    stm r1, {{r4-r12, lr}}

    bl syscall_entry

    @ we're returning back to *some* process, maybe not the same one.
    movw r0, #:lower16:CURRENT_PROC_PTR
    movt r0, #:upper16:CURRENT_PROC_PTR
    ldr r0, [r0]
    @ restore volatile registers, plus load PSP into r12
    ldm r0, {{r4-r12, lr}}
    msr PSP, r12

    @ resume
    bx lr

1:  @ starting up the first process.
    movs r0, #1             @ get bitmask to...
    msr CONTROL, r0         @ ...shed privs from thread mode.
                            @ no barrier here because exc return
                            @ serves as barrier

    mov lr, #0xFFFFFFFD     @ materialize EXC_RETURN value to
                            @ return into thread mode, PSP, no FP

    bx lr                   @ branch into the process
    "
);

/// The Rust side of the syscall gate, after all volatile registers have
/// been saved somewhere predictable.
#[no_mangle]
unsafe extern "C" fn syscall_entry() {
    with_kernel(|k| {
        if crate::syscalls::handle(k) {
            update_current_proc(k);
        }
    })
}

// Handler for PendSV: context switches deferred from interrupt handlers.
// Same save/restore dance as SVCall, without the first-dispatch branch.
core::arch::global_asm!(
    "
    .section .text.PendSV
    .syntax unified
    .global PendSV
    .type PendSV, %function
    .thumb_func
PendSV:
    movw r0, #:lower16:CURRENT_PROC_PTR
    movt r0, #:upper16:CURRENT_PROC_PTR
    ldr r1, [r0]
    mrs r12, PSP
    stm r1, {{r4-r12, lr}}

    bl pendsv_entry

    movw r0, #:lower16:CURRENT_PROC_PTR
    movt r0, #:upper16:CURRENT_PROC_PTR
    ldr r0, [r0]
    ldm r0, {{r4-r12, lr}}
    msr PSP, r12

    bx lr
    "
);

/// The Rust side of the PendSV handler: reconsider scheduling on behalf of
/// whichever i-service pended us.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    with_kernel(|k| {
        if crate::sched::apply(k, NextProc::Other) {
            update_current_proc(k);
        }
    })
}

/// Handler for the System Tick Timer interrupt: the timer i-service.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    // This runs at the leveled kernel priority, so it cannot preempt the
    // kernel -- only user code. Taking the kernel context is fine. The
    // SysTick counter reload acknowledges the hardware for us.
    isr_context(crate::timer::tick);
}

/// Enables interrupt `n` at the NVIC, for board support code bringing its
/// devices up.
pub fn enable_irq(n: u32) {
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg_num = (n / 32) as usize;
    let bit_mask = 1 << (n % 32);
    unsafe {
        nvic.iser[reg_num].write(bit_mask);
    }
}

/// Disables interrupt `n` at the NVIC.
pub fn disable_irq(n: u32) {
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg_num = (n / 32) as usize;
    let bit_mask = 1 << (n % 32);
    unsafe {
        nvic.icer[reg_num].write(bit_mask);
    }
}
