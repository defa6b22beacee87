// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Register state captured when a signal was delivered.
//!
//! The operating system hands a signal handler an opaque execution context. The unwinder only
//! needs three registers out of it, exposed through [`RegisterView`]. One implementation exists
//! per supported OS/architecture pair; on other platforms no context can be decoded and callers
//! unwind without one.

use crate::shared::constants::MAX_FRAME_BYTES;

#[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
mod ucontext;

#[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
pub use ucontext::UContextView;

/// Read-only access to the registers of an interrupted thread.
pub trait RegisterView {
    /// RBP on x86-64, EBP on x86.
    fn base_pointer(&self) -> usize;
    /// RSP on x86-64, ESP on x86.
    fn stack_pointer(&self) -> usize;
    /// RIP on x86-64, EIP on x86.
    fn instruction_pointer(&self) -> usize;
}

/// Registers that have already been decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub bp: usize,
    pub sp: usize,
    pub ip: usize,
}

impl RegisterSnapshot {
    pub fn capture<C: RegisterView + ?Sized>(context: &C) -> Self {
        Self {
            bp: context.base_pointer(),
            sp: context.stack_pointer(),
            ip: context.instruction_pointer(),
        }
    }
}

impl RegisterView for RegisterSnapshot {
    fn base_pointer(&self) -> usize {
        self.bp
    }

    fn stack_pointer(&self) -> usize {
        self.sp
    }

    fn instruction_pointer(&self) -> usize {
        self.ip
    }
}

/// Returns the frame pointer of the interrupted frame, or 0 if unknown.
///
/// The base pointer is only trusted if it lies at or above the stack pointer and no more than
/// [`MAX_FRAME_BYTES`] away from it: code built without frame pointers may use the register for
/// anything. Otherwise the stack pointer is returned. It may or may not be the start of a frame;
/// if it is not, the walk records one frame of garbage and stops at the next check.
pub fn frame_pointer_hint<C: RegisterView + ?Sized>(context: Option<&C>) -> usize {
    let Some(context) = context else {
        return 0;
    };
    let bp = context.base_pointer();
    let sp = context.stack_pointer();
    if bp >= sp && bp - sp <= MAX_FRAME_BYTES {
        bp
    } else {
        sp
    }
}
