// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! For this to work, each architecture support module must define the same
//! set of names: `SavedState`, the `klog!`/`uassert!` macros, the kernel
//! pointer plumbing, and the context-switch entry points.
//!
//! The `fake` module stands in on non-ARM hosts so the portable kernel core
//! builds and its unit tests run off-target.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        #[macro_use]
        pub mod arm_m;
        pub use arm_m::*;
    } else {
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    }
}
