// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

/// In-kernel timestamp representation: the millisecond tick counter
/// maintained by the timer i-service.
///
/// The counter is 32 bits and wraps after about 49 days of uptime, which the
/// delayed-delivery ordering deliberately ignores.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
#[repr(transparent)]
pub struct Tick(u32);

impl Tick {
    pub const ZERO: Self = Tick(0);

    /// Advances the counter by one millisecond.
    pub fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// The timestamp `ms` milliseconds after `self`.
    pub fn offset(self, ms: u32) -> Self {
        Tick(self.0.wrapping_add(ms))
    }
}

impl From<u32> for Tick {
    fn from(v: u32) -> Self {
        Tick(v)
    }
}

impl From<Tick> for u32 {
    fn from(v: Tick) -> Self {
        v.0
    }
}
