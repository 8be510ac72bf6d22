// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Primitive bodies return `Result<_, UserError>` and let `?` carry caller
//! mistakes out to the syscall layer, which turns them into the response
//! codes defined in `abi`. Nothing in this kernel is fatal to a process:
//! every error is recoverable and the caller chooses its own retry policy.

/// An error committed by user code when invoking a primitive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UserError {
    /// An argument was invalid: null payload, out-of-range process id,
    /// priority outside the process range, or a priority change aimed at
    /// the idle process or an i-service.
    InvalidArg,
    /// A process was missing from the queue its state claims it occupies.
    /// If the kernel's state invariants hold this cannot happen; it is
    /// reported rather than assumed away.
    NotFound,
}

impl UserError {
    /// The response code delivered to the errant caller.
    pub fn response_code(self) -> u32 {
        match self {
            UserError::InvalidArg => abi::RC_INVALID_ARG,
            UserError::NotFound => abi::RC_NOT_FOUND,
        }
    }
}
