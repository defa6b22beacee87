// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry points that unwind the calling thread's own stack.
//!
//! Every entry point reports its caller as the first frame: the walk starts at the entry point's
//! own frame record, whose return address lies in the caller. `skip_count` hides that many more
//! frames. All of them are async-signal-safe.

use crate::context::RegisterSnapshot;
use crate::memory::{is_word_aligned, SyscallProbe};
use crate::shared::configuration::{UnwindConfiguration, Unwinding};
use crate::shared::constants::MAX_FRAME_BYTES;
use crate::transition::FrameValidator;
use crate::unwind::{unwind_from, UnwindOutput, UnwindSummary};
use std::ffi::c_void;

/// Frame pointer register of the current function, 0 on unsupported architectures.
#[inline(always)]
pub fn current_frame_pointer() -> usize {
    let fp: usize;
    // SAFETY: copies a register.
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::asm!("mov {}, rbp", out(reg) fp, options(nomem, nostack, preserves_flags))
    };
    #[cfg(target_arch = "x86")]
    unsafe {
        std::arch::asm!("mov {}, ebp", out(reg) fp, options(nomem, nostack, preserves_flags))
    };
    #[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
    {
        fp = 0;
    }
    fp
}

#[inline(always)]
fn current_stack_pointer() -> usize {
    let sp: usize;
    // SAFETY: copies a register.
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags))
    };
    #[cfg(target_arch = "x86")]
    unsafe {
        std::arch::asm!("mov {}, esp", out(reg) sp, options(nomem, nostack, preserves_flags))
    };
    #[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
    {
        sp = 0;
    }
    sp
}

/// Code built without frame pointers leaves anything in the register; only start from a frame
/// that sits just above the stack pointer.
fn is_plausible_start(fp: usize, sp: usize) -> bool {
    fp != 0 && is_word_aligned(fp) && fp >= sp && fp - sp <= MAX_FRAME_BYTES
}

/// # Safety
/// A non-null `ucontext` must point to the platform's signal context structure.
unsafe fn decode_context(ucontext: *const c_void) -> Option<RegisterSnapshot> {
    #[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
    {
        crate::context::UContextView::from_raw(ucontext)
            .map(|view| RegisterSnapshot::capture(&view))
    }
    #[cfg(not(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64"))))]
    {
        let _ = ucontext;
        None
    }
}

// Must be inlined: the frame record read here has to be the entry point's own.
#[inline(always)]
unsafe fn unwind_here(
    config: &UnwindConfiguration,
    output: &mut UnwindOutput<'_>,
    ucontext: *const c_void,
) -> UnwindSummary {
    let fp = current_frame_pointer();
    if !is_plausible_start(fp, current_stack_pointer()) {
        return UnwindSummary {
            frames: 0,
            min_dropped_frames: config.count_dropped_frames().then_some(0),
        };
    }
    let context = decode_context(ucontext);
    let validator = FrameValidator::new(context.as_ref(), &SyscallProbe);
    unwind_from(fp, &validator, output, config)
}

fn trace_config(result: &[usize], skip_count: usize, count_dropped: bool) -> UnwindConfiguration {
    UnwindConfiguration::for_buffer(result.len(), skip_count, Unwinding::Strict, count_dropped)
}

// Frame sizes are collected for profiles that favour depth over confidence.
fn frames_config(result: &[usize], skip_count: usize, count_dropped: bool) -> UnwindConfiguration {
    UnwindConfiguration::for_buffer(result.len(), skip_count, Unwinding::Lax, count_dropped)
}

fn report_dropped(summary: &UnwindSummary, min_dropped_frames: Option<&mut usize>) {
    if let (Some(out), Some(dropped)) = (min_dropped_frames, summary.min_dropped_frames) {
        *out = dropped;
    }
}

/// Fills `result` with return addresses, innermost first. Returns the number written.
#[inline(never)]
pub fn get_stack_trace(result: &mut [usize], skip_count: usize) -> usize {
    let config = trace_config(result, skip_count, false);
    let mut output = UnwindOutput::new(result);
    // SAFETY: no context, the walk starts at this function's live frame.
    unsafe { unwind_here(&config, &mut output, std::ptr::null()) }.frames
}

/// Like [`get_stack_trace`], also storing the byte size of each frame in `sizes` (0 if unknown).
/// At most `min(result.len(), sizes.len())` frames are written.
///
/// Walks laxly: frames that only pass the readability check are reported too, with size 0 when
/// they do not sit above their callee.
#[inline(never)]
pub fn get_stack_frames(result: &mut [usize], sizes: &mut [usize], skip_count: usize) -> usize {
    let config = frames_config(result, skip_count, false);
    let mut output = UnwindOutput::with_sizes(result, sizes);
    // SAFETY: no context, the walk starts at this function's live frame.
    unsafe { unwind_here(&config, &mut output, std::ptr::null()) }.frames
}

/// Unwinds from inside a signal handler.
///
/// `ucontext` is the third argument of an `SA_SIGINFO` handler, or null. When
/// `min_dropped_frames` is given, it receives a lower bound on the frames that did not fit.
///
/// # Safety
/// A non-null `ucontext` must point to the context of the signal being handled.
#[inline(never)]
pub unsafe fn get_stack_trace_with_context(
    result: &mut [usize],
    skip_count: usize,
    ucontext: *const c_void,
    min_dropped_frames: Option<&mut usize>,
) -> usize {
    let config = trace_config(result, skip_count, min_dropped_frames.is_some());
    let mut output = UnwindOutput::new(result);
    let summary = unwind_here(&config, &mut output, ucontext);
    report_dropped(&summary, min_dropped_frames);
    summary.frames
}

/// [`get_stack_frames`] for signal handlers, see [`get_stack_trace_with_context`]. Walks laxly.
///
/// # Safety
/// A non-null `ucontext` must point to the context of the signal being handled.
#[inline(never)]
pub unsafe fn get_stack_frames_with_context(
    result: &mut [usize],
    sizes: &mut [usize],
    skip_count: usize,
    ucontext: *const c_void,
    min_dropped_frames: Option<&mut usize>,
) -> usize {
    let config = frames_config(result, skip_count, min_dropped_frames.is_some());
    let mut output = UnwindOutput::with_sizes(result, sizes);
    let summary = unwind_here(&config, &mut output, ucontext);
    report_dropped(&summary, min_dropped_frames);
    summary.frames
}

/// Unwinds according to `config`.
///
/// Sizes are only recorded when `config.collect_sizes()` is set and `sizes` is given.
///
/// # Safety
/// A non-null `ucontext` must point to the context of the signal being handled.
#[inline(never)]
pub unsafe fn capture(
    config: &UnwindConfiguration,
    addresses: &mut [usize],
    sizes: Option<&mut [usize]>,
    ucontext: *const c_void,
) -> UnwindSummary {
    let mut output = match sizes {
        Some(sizes) if config.collect_sizes() => UnwindOutput::with_sizes(addresses, sizes),
        _ => UnwindOutput::new(addresses),
    };
    unwind_here(config, &mut output, ucontext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::WORD;

    #[test]
    fn test_plausible_start() {
        let sp = 0x7ffe_0000;
        assert!(is_plausible_start(sp + 4 * WORD, sp));
        assert!(is_plausible_start(sp, sp));
        assert!(is_plausible_start(sp + MAX_FRAME_BYTES, sp));
        assert!(!is_plausible_start(0, sp));
        assert!(!is_plausible_start(sp + 1, sp));
        assert!(!is_plausible_start(sp - WORD, sp));
        assert!(!is_plausible_start(sp + MAX_FRAME_BYTES + WORD, sp));
    }

    #[test]
    fn test_buffer_configs() {
        let result = [0usize; 5];
        let trace = trace_config(&result, 2, true);
        assert_eq!(trace.unwinding(), Unwinding::Strict);
        assert_eq!(trace.max_depth(), 5);
        assert_eq!(trace.skip_count(), 2);
        assert!(trace.count_dropped_frames());

        let frames = frames_config(&result, 0, false);
        assert_eq!(frames.unwinding(), Unwinding::Lax);
        assert_eq!(frames.max_depth(), 5);
        assert!(!frames.count_dropped_frames());
    }

    #[test]
    fn test_null_context() {
        assert_eq!(unsafe { decode_context(std::ptr::null()) }, None);
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    #[cfg_attr(miri, ignore)]
    fn test_current_registers() {
        let fp = current_frame_pointer();
        let sp = current_stack_pointer();
        assert!(is_plausible_start(fp, sp), "fp {fp:#x} sp {sp:#x}");
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    #[cfg_attr(miri, ignore)]
    fn test_empty_buffer() {
        assert_eq!(get_stack_trace(&mut [], 0), 0);
        let mut dropped = usize::MAX;
        let frames =
            unsafe { get_stack_trace_with_context(&mut [], 0, std::ptr::null(), Some(&mut dropped)) };
        assert_eq!(frames, 0);
        assert!(dropped <= crate::shared::constants::MAX_DROPPED_FRAMES_COUNT);
    }
}
