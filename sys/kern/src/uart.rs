// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The UART i-service.
//!
//! Byte-oriented producer/consumer glue between the serial port and the IPC
//! layer. Received bytes become single-keystroke USER_INPUT messages for the
//! command dispatcher; messages sent to the UART i-service's mailbox are
//! drained out the transmitter, one per transmit-holding-empty interrupt.
//!
//! The hardware itself is behind [`UartDevice`]: register access, baud
//! setup, and interrupt routing belong to the board support layer, which
//! calls [`interrupt`] from its IRQ handler. Everything here is
//! non-blocking; this body runs in interrupt context.

use abi::{message, ProcId};

use crate::ipc;
use crate::kernel::Kernel;
use crate::mem;
use crate::proc::{Caller, NextProc};

/// Payload layout convention for messages: a 4-byte message-type tag,
/// little-endian, followed by text.
pub const TAG_LEN: usize = 4;

/// Cause of a UART interrupt, as decoded from the hardware's interrupt
/// identification register by the board layer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UartCondition {
    /// A byte is waiting in the receive register.
    ReceiveDataAvailable,
    /// The transmit holding register can take another byte.
    TransmitHoldingEmpty,
    /// Anything else (line status, spurious); ignored.
    Other(u32),
}

/// The hardware surface the i-service consumes.
pub trait UartDevice {
    /// Decodes the pending interrupt cause. Reading the cause acknowledges
    /// the interrupt.
    fn condition(&mut self) -> UartCondition;
    /// Reads the received byte, clearing the receive interrupt.
    fn read(&mut self) -> u8;
    /// Writes one byte to the transmit data register.
    fn write(&mut self, byte: u8);
    /// Enables or disables the transmit-holding-empty interrupt.
    fn set_tx_interrupt(&mut self, enable: bool);
}

/// Body of the UART i-service, invoked from the board's UART IRQ handler.
///
/// `dispatcher` is the process that receives keystroke messages. The
/// returned hint is applied at the interrupt epilogue.
pub fn interrupt(
    k: &mut Kernel,
    uart: &mut impl UartDevice,
    dispatcher: ProcId,
) -> NextProc {
    match uart.condition() {
        UartCondition::ReceiveDataAvailable => rx_byte(k, uart, dispatcher),
        UartCondition::TransmitHoldingEmpty => tx_pump(k, uart),
        UartCondition::Other(cause) => {
            klog!("uart: ignoring interrupt cause {}", cause);
            NextProc::Same
        }
    }
}

fn rx_byte(
    k: &mut Kernel,
    uart: &mut impl UartDevice,
    dispatcher: ProcId,
) -> NextProc {
    let byte = uart.read();

    #[cfg(feature = "hotkeys")]
    match byte {
        b'!' => dump_queue(k, "ready", &k.ready),
        b'@' => dump_queue(k, "blocked-on-memory", &k.mem_blocked),
        b'#' => dump_queue(k, "blocked-on-receive", &k.recv_blocked),
        _ => (),
    }

    let Some(h) = mem::request_nb(k) else {
        // Out of blocks: the keystroke cannot become a message. Echo it raw
        // so the operator sees the console is alive, and drop it.
        uart.write(byte);
        klog!("uart: rx dropped, pool empty");
        return NextProc::Same;
    };

    let payload = k.pool.payload_mut(h);
    payload[..TAG_LEN].copy_from_slice(&message::USER_INPUT.to_le_bytes());
    payload[TAG_LEN] = byte;
    payload[TAG_LEN + 1] = 0;

    let caller = Caller::i_service(k.uart_index());
    let addr = k.pool.payload_addr(h);
    match ipc::send(k, caller, dispatcher.index(), addr) {
        Ok(hint) => hint,
        Err(_) => {
            // No such dispatcher; give the block back rather than leak it.
            klog!("uart: no dispatcher for input");
            mem::release_block(k, h)
        }
    }
}

fn tx_pump(k: &mut Kernel, uart: &mut impl UartDevice) -> NextProc {
    let uart_index = k.uart_index();
    let Some(h) = ipc::receive_nb(k, uart_index) else {
        // Nothing left to transmit; quiesce the interrupt.
        uart.set_tx_interrupt(false);
        return NextProc::Same;
    };

    // Pump the text out to the data register until NUL, then stop taking
    // TX interrupts until someone queues more output.
    let payload = k.pool.payload(h);
    for &byte in &payload[TAG_LEN..] {
        if byte == 0 {
            break;
        }
        uart.write(byte);
    }
    uart.set_tx_interrupt(false);

    // Releasing the block may wake a memory waiter; pass that along.
    mem::release_block(k, h)
}

#[cfg(feature = "hotkeys")]
fn dump_queue(k: &Kernel, name: &str, q: &crate::kernel::ProcQueue) {
    klog!("--- {} ---", name);
    for level in 0..abi::NUM_PRIORITIES {
        for h in q.level(level).iter() {
            klog!("process {} at priority {}", h, level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::kernel_with;
    use abi::ProcState;

    /// Scripted stand-in for the serial hardware.
    struct FakeUart {
        condition: UartCondition,
        rx: u8,
        tx: Vec<u8>,
        tx_interrupt: bool,
    }

    impl FakeUart {
        fn rx(byte: u8) -> Self {
            FakeUart {
                condition: UartCondition::ReceiveDataAvailable,
                rx: byte,
                tx: Vec::new(),
                tx_interrupt: true,
            }
        }

        fn tx_empty() -> Self {
            FakeUart {
                condition: UartCondition::TransmitHoldingEmpty,
                rx: 0,
                tx: Vec::new(),
                tx_interrupt: true,
            }
        }
    }

    impl UartDevice for FakeUart {
        fn condition(&mut self) -> UartCondition {
            self.condition
        }
        fn read(&mut self) -> u8 {
            self.rx
        }
        fn write(&mut self, byte: u8) {
            self.tx.push(byte);
        }
        fn set_tx_interrupt(&mut self, enable: bool) {
            self.tx_interrupt = enable;
        }
    }

    #[test]
    fn keystroke_becomes_user_input_message() {
        let k = kernel_with(&[2], 2);
        let mut uart = FakeUart::rx(b'x');

        let hint = interrupt(k, &mut uart, ProcId(1));
        assert_eq!(hint, NextProc::Same);

        let (addr, sender) =
            ipc::receive(k, Caller::process(1)).expect("keystroke message");
        assert_eq!(sender.index(), k.uart_index());
        let h = k.pool.handle_at_payload(addr).unwrap();
        let payload = k.pool.payload(h);
        assert_eq!(
            u32::from_le_bytes(payload[..TAG_LEN].try_into().unwrap()),
            message::USER_INPUT
        );
        assert_eq!(payload[TAG_LEN], b'x');
        assert_eq!(payload[TAG_LEN + 1], 0);
    }

    #[test]
    fn keystroke_wakes_blocked_dispatcher() {
        let k = kernel_with(&[1], 2);
        assert_eq!(ipc::receive(k, Caller::process(1)), None);

        let mut uart = FakeUart::rx(b'q');
        let hint = interrupt(k, &mut uart, ProcId(1));
        assert_eq!(hint, NextProc::Other);
        assert_eq!(k.procs[1].state(), ProcState::Ready);
    }

    #[test]
    fn keystroke_dropped_when_pool_empty() {
        let k = kernel_with(&[2], 1);
        // Exhaust the pool.
        let _held = mem::request_nb(k).unwrap();

        let mut uart = FakeUart::rx(b'z');
        let hint = interrupt(k, &mut uart, ProcId(1));
        assert_eq!(hint, NextProc::Same);
        // Echoed raw, nothing queued.
        assert_eq!(uart.tx, [b'z']);
        assert!(k.procs[1].mailbox.is_empty());
    }

    #[test]
    fn tx_drains_message_until_nul_and_releases() {
        let k = kernel_with(&[2], 2);
        let uart_index = k.uart_index();

        // Queue a console message to the i-service the way a display
        // process would.
        let h = mem::request_nb(k).unwrap();
        let payload = k.pool.payload_mut(h);
        payload[..TAG_LEN]
            .copy_from_slice(&message::CRT_DISPLAY.to_le_bytes());
        payload[TAG_LEN..TAG_LEN + 3].copy_from_slice(b"hi\n");
        payload[TAG_LEN + 3] = 0;
        let addr = k.pool.payload_addr(h);
        let _ = ipc::send(k, Caller::process(1), uart_index, addr).unwrap();

        let free_before = k.pool.free_count();
        let mut uart = FakeUart::tx_empty();
        let hint = interrupt(k, &mut uart, ProcId(1));
        assert_eq!(hint, NextProc::Same);
        assert_eq!(uart.tx, b"hi\n");
        assert!(!uart.tx_interrupt);
        assert_eq!(k.pool.free_count(), free_before + 1);
    }

    #[test]
    fn tx_release_can_wake_memory_waiter() {
        let k = kernel_with(&[2], 1);
        let uart_index = k.uart_index();

        // The only block is in flight to the UART; a process then blocks
        // waiting for memory.
        let h = mem::request_nb(k).unwrap();
        let payload = k.pool.payload_mut(h);
        payload[TAG_LEN] = 0;
        let addr = k.pool.payload_addr(h);
        let _ = ipc::send(k, Caller::i_service(k.timer_index()), uart_index, addr)
            .unwrap();
        assert_eq!(mem::request(k, Caller::process(1)), None);

        let mut uart = FakeUart::tx_empty();
        let hint = interrupt(k, &mut uart, ProcId(1));
        assert_eq!(hint, NextProc::Other);
        assert_eq!(k.procs[1].state(), ProcState::Ready);
    }

    #[test]
    fn tx_with_empty_mailbox_quiesces_interrupt() {
        let k = kernel_with(&[2], 1);
        let mut uart = FakeUart::tx_empty();
        let hint = interrupt(k, &mut uart, ProcId(1));
        assert_eq!(hint, NextProc::Same);
        assert!(uart.tx.is_empty());
        assert!(!uart.tx_interrupt);
    }

    #[test]
    fn unknown_interrupt_cause_is_ignored() {
        let k = kernel_with(&[2], 1);
        let mut uart = FakeUart::rx(0);
        uart.condition = UartCondition::Other(3);
        let hint = interrupt(k, &mut uart, ProcId(1));
        assert_eq!(hint, NextProc::Same);
    }
}
