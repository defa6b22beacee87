// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Analysis of the 32-bit Linux fast-syscall trampoline.
//!
//! `__kernel_vsyscall` does not always maintain a frame pointer. When a signal interrupts it,
//! the base pointer in the signal context is not a frame and the walk would stop right where a
//! crash in a syscall needs it most. Knowing how many registers the trampoline pushes lets the
//! validator find the caller's frame through the saved stack pointer instead.
//!
//! The analysis is process-wide and computed at most once per racing thread. It is stored in
//! atomics rather than a `OnceLock` because it may be first needed inside a signal handler, where
//! blocking on another thread (or on ourselves) is not an option. Threads that race compute the
//! same result, so redundant computation is accepted.

mod push_counter;
pub mod symbols;

pub use push_counter::count_push_instructions;
use symbols::{SymbolLookup, SymbolLookupError, STT_FUNC};

use crate::shared::constants::{
    KERNEL_RT_SIGRETURN_SYMBOL, KERNEL_SYMBOL_VERSION, KERNEL_VSYSCALL_SYMBOL, VSYSCALL_SCAN_BYTES,
};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use tracing::debug;

/// Whether the trampoline correction is relevant for this target.
pub(crate) const APPLIES: bool = cfg!(all(target_os = "linux", target_arch = "x86"));

/// Addresses of the VDSO trampolines and the number of registers `__kernel_vsyscall` pushes
/// before entering the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VdsoAnalysis {
    pub vsyscall: usize,
    pub rt_sigreturn: usize,
    /// 0 means no correction is needed.
    pub push_count: usize,
}

impl VdsoAnalysis {
    pub const NONE: Self = Self {
        vsyscall: 0,
        rt_sigreturn: 0,
        push_count: 0,
    };

    pub fn needs_correction(&self) -> bool {
        self.push_count != 0 && self.rt_sigreturn != 0
    }

    /// Whether `ip` lies in the inspected prefix of `__kernel_vsyscall`.
    pub fn in_vsyscall(&self, ip: usize) -> bool {
        self.vsyscall != 0 && ip >= self.vsyscall && ip - self.vsyscall < VSYSCALL_SCAN_BYTES
    }

    /// Resolves both trampolines through `lookup` and inspects the start of `__kernel_vsyscall`.
    ///
    /// A VDSO that is present but lacks either symbol trips a debug assertion; release builds
    /// fall back to no correction.
    ///
    /// # Safety
    /// Addresses returned by `lookup` must be readable for `VSYSCALL_SCAN_BYTES + 1` bytes.
    pub unsafe fn from_lookup<L: SymbolLookup + ?Sized>(lookup: &L) -> Self {
        let rt_sigreturn =
            lookup.lookup(KERNEL_RT_SIGRETURN_SYMBOL, KERNEL_SYMBOL_VERSION, STT_FUNC);
        let vsyscall = lookup.lookup(KERNEL_VSYSCALL_SYMBOL, KERNEL_SYMBOL_VERSION, STT_FUNC);
        match (rt_sigreturn, vsyscall) {
            (Ok(rt_sigreturn), Ok(vsyscall)) if rt_sigreturn != 0 && vsyscall != 0 => {
                // SAFETY: see the function contract.
                let code = unsafe {
                    std::slice::from_raw_parts(vsyscall as *const u8, VSYSCALL_SCAN_BYTES + 1)
                };
                Self {
                    vsyscall,
                    rt_sigreturn,
                    push_count: count_push_instructions(code),
                }
            }
            (Err(SymbolLookupError::ObjectNotPresent), _)
            | (_, Err(SymbolLookupError::ObjectNotPresent)) => Self::NONE,
            _ => {
                debug_assert!(false, "VDSO is present, but doesn't have expected symbols");
                Self::NONE
            }
        }
    }
}

const NOT_COMPUTED: usize = usize::MAX;

// `PUSH_COUNT` guards the other two: it is stored last with release ordering.
static PUSH_COUNT: AtomicUsize = AtomicUsize::new(NOT_COMPUTED);
static VSYSCALL: AtomicUsize = AtomicUsize::new(0);
static RT_SIGRETURN: AtomicUsize = AtomicUsize::new(0);

/// Returns the process-wide analysis, computing it on first use.
///
/// On targets other than 32-bit x86 Linux this is always [`VdsoAnalysis::NONE`].
pub fn analysis() -> VdsoAnalysis {
    if !APPLIES {
        return VdsoAnalysis::NONE;
    }
    let push_count = PUSH_COUNT.load(Acquire);
    if push_count != NOT_COMPUTED {
        return VdsoAnalysis {
            vsyscall: VSYSCALL.load(Relaxed),
            rt_sigreturn: RT_SIGRETURN.load(Relaxed),
            push_count,
        };
    }
    let computed = compute();
    VSYSCALL.store(computed.vsyscall, Relaxed);
    RT_SIGRETURN.store(computed.rt_sigreturn, Relaxed);
    PUSH_COUNT.store(computed.push_count, Release);
    computed
}

/// Computes the analysis ahead of time and logs it.
///
/// The analysis reads the mapped VDSO in place and is safe to compute lazily from a signal
/// handler; warming it up keeps the first context-aware unwind fast.
pub fn init() -> VdsoAnalysis {
    let analysis = analysis();
    if APPLIES {
        debug!(
            "VDSO analysis: __kernel_vsyscall at {:#x}, __kernel_rt_sigreturn at {:#x}, {} push instructions",
            analysis.vsyscall, analysis.rt_sigreturn, analysis.push_count
        );
    }
    analysis
}

#[cfg(target_os = "linux")]
fn compute() -> VdsoAnalysis {
    match symbols::VdsoImage::from_auxv() {
        // SAFETY: symbols of the mapped VDSO point into its mapped text.
        Ok(image) => unsafe { VdsoAnalysis::from_lookup(&image) },
        Err(SymbolLookupError::ObjectNotPresent) => VdsoAnalysis::NONE,
        Err(_) => {
            debug_assert!(false, "VDSO is present, but could not be parsed");
            VdsoAnalysis::NONE
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn compute() -> VdsoAnalysis {
    VdsoAnalysis::NONE
}
