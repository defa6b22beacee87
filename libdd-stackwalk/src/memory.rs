// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Raw memory access used while walking a stack.
//!
//! The unwinder follows pointers whose validity it is still in the process of establishing.
//! All reads of stack words go through [`read_word`], so the one place that reads memory without
//! prior validation is easy to find and to exclude from sanitizer instrumentation.

use std::mem::size_of;

/// Answers whether an address can be read without faulting.
///
/// Implementations must never fault, whatever the input, and must be async-signal-safe.
pub trait ReadabilityProbe {
    fn is_readable(&self, addr: usize) -> bool;
}

impl<F: Fn(usize) -> bool> ReadabilityProbe for F {
    fn is_readable(&self, addr: usize) -> bool {
        self(addr)
    }
}

/// Probes readability by letting the kernel copy the word for us.
///
/// `rt_sigprocmask` copies 8 bytes of user memory before validating its other arguments, so an
/// invalid `how` makes the call fail with `EFAULT` on unreadable memory and `EINVAL` otherwise,
/// without changing the signal mask.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallProbe;

impl ReadabilityProbe for SyscallProbe {
    #[cfg(target_os = "linux")]
    fn is_readable(&self, addr: usize) -> bool {
        // Checking 8 unaligned bytes could spill into the next page.
        let addr = addr & !7;
        if addr == 0 {
            return false;
        }
        let saved = errno::errno();
        // SAFETY: the kernel validates the user pointer; `how` is invalid so nothing is changed.
        let rval = unsafe {
            libc::syscall(
                libc::SYS_rt_sigprocmask,
                !0 as libc::c_long,
                addr as *const libc::c_void,
                std::ptr::null_mut::<libc::c_void>(),
                8 as libc::c_long,
            )
        };
        let readable = rval == 0 || errno::errno().0 != libc::EFAULT;
        errno::set_errno(saved);
        readable
    }

    #[cfg(not(target_os = "linux"))]
    fn is_readable(&self, _addr: usize) -> bool {
        false
    }
}

pub(crate) const WORD: usize = size_of::<usize>();

pub(crate) fn is_word_aligned(addr: usize) -> bool {
    addr & (WORD - 1) == 0
}

/// Reads the `index`-th machine word starting at `base`.
///
/// This is the only unchecked read in the unwinder. It is used for the frame record at a frame
/// pointer that has passed the transition checks, and for the words the trampoline pushed at the
/// interrupted stack pointer.
///
/// # Safety
/// `base + index * WORD` must be readable. The unwinder only calls this on addresses that are
/// either the live frame pointer or were accepted by the transition checks.
#[inline(always)]
pub(crate) unsafe fn read_word(base: usize, index: usize) -> usize {
    let addr = base.wrapping_add(index.wrapping_mul(WORD));
    // SAFETY: see the function contract. Volatile keeps the compiler from assuming anything
    // about memory it does not know to be initialized.
    unsafe { std::ptr::read_volatile(addr as *const usize) }
}
