// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::RegisterView;
use libc::{c_void, ucontext_t};

#[cfg(target_arch = "x86_64")]
const BP: usize = libc::REG_RBP as usize;
#[cfg(target_arch = "x86_64")]
const SP: usize = libc::REG_RSP as usize;
#[cfg(target_arch = "x86_64")]
const IP: usize = libc::REG_RIP as usize;

#[cfg(target_arch = "x86")]
const BP: usize = libc::REG_EBP as usize;
#[cfg(target_arch = "x86")]
const SP: usize = libc::REG_ESP as usize;
#[cfg(target_arch = "x86")]
const IP: usize = libc::REG_EIP as usize;

/// Registers saved in a Linux `ucontext_t`, as passed to an `SA_SIGINFO` signal handler.
#[derive(Clone, Copy)]
pub struct UContextView<'a> {
    ucontext: &'a ucontext_t,
}

impl<'a> UContextView<'a> {
    pub fn new(ucontext: &'a ucontext_t) -> Self {
        Self { ucontext }
    }

    /// Wraps the opaque context pointer received by a signal handler. Returns `None` for null.
    ///
    /// # Safety
    /// A non-null `ucontext` must point to a `ucontext_t` that outlives `'a`.
    pub unsafe fn from_raw(ucontext: *const c_void) -> Option<Self> {
        // SAFETY: checked for null, validity is the caller's contract.
        unsafe { ucontext.cast::<ucontext_t>().as_ref() }.map(Self::new)
    }

    fn greg(&self, index: usize) -> usize {
        self.ucontext.uc_mcontext.gregs[index] as usize
    }
}

impl RegisterView for UContextView<'_> {
    fn base_pointer(&self) -> usize {
        self.greg(BP)
    }

    fn stack_pointer(&self) -> usize {
        self.greg(SP)
    }

    fn instruction_pointer(&self) -> usize {
        self.greg(IP)
    }
}

impl std::fmt::Debug for UContextView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UContextView")
            .field("bp", &format_args!("{:#x}", self.base_pointer()))
            .field("sp", &format_args!("{:#x}", self.stack_pointer()))
            .field("ip", &format_args!("{:#x}", self.instruction_pointer()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::frame_pointer_hint;

    #[test]
    fn test_null() {
        assert!(unsafe { UContextView::from_raw(std::ptr::null()) }.is_none());
    }

    #[test]
    fn test_registers() {
        // SAFETY: ucontext_t is plain old data.
        let mut uc: ucontext_t = unsafe { std::mem::zeroed() };
        uc.uc_mcontext.gregs[BP] = 0x7ff0_1000;
        uc.uc_mcontext.gregs[SP] = 0x7ff0_0f00;
        uc.uc_mcontext.gregs[IP] = 0x0040_1234;

        let view = unsafe { UContextView::from_raw(&uc as *const ucontext_t as *const c_void) }
            .expect("non-null context");
        assert_eq!(view.base_pointer(), 0x7ff0_1000);
        assert_eq!(view.stack_pointer(), 0x7ff0_0f00);
        assert_eq!(view.instruction_pointer(), 0x0040_1234);
        assert_eq!(frame_pointer_hint(Some(&view)), 0x7ff0_1000);

        uc.uc_mcontext.gregs[BP] = 0;
        assert_eq!(frame_pointer_hint(Some(&UContextView::new(&uc))), 0x7ff0_0f00);
    }
}
