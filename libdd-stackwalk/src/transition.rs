// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decides whether the step from one frame to its caller is plausible.
//!
//! The checks are best effort: a transition is either accepted or the walk stops there. Nothing
//! in here can fail in any other way, since the unwinder frequently runs while the process is
//! already crashing.

use crate::context::{frame_pointer_hint, RegisterView};
use crate::memory::{is_word_aligned, read_word, ReadabilityProbe};
use crate::shared::constants::{KERNEL_RESERVED_START, MAX_FRAME_BYTES};
use crate::vdso::{self, VdsoAnalysis};

/// Strictness of a single transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Require the caller's frame to be at a higher address, at most [`MAX_FRAME_BYTES`] away.
    /// Lax transitions only reject null and self-referencing frames, but probe readability.
    pub strict: bool,
    /// Consult the signal context, if the validator has one.
    pub with_context: bool,
}

impl WalkOptions {
    pub const STRICT: Self = Self {
        strict: true,
        with_context: true,
    };
    pub const LAX: Self = Self {
        strict: false,
        with_context: true,
    };
}

/// Computes caller frames, optionally with the help of a signal context.
pub struct FrameValidator<'a, C: RegisterView + ?Sized, P: ReadabilityProbe + ?Sized> {
    context: Option<&'a C>,
    // Frame pointer of the interrupted frame, 0 without a context.
    context_frame: usize,
    probe: &'a P,
    vdso: Option<VdsoAnalysis>,
}

impl<'a, C: RegisterView + ?Sized, P: ReadabilityProbe + ?Sized> FrameValidator<'a, C, P> {
    /// Without the `signal-context` feature the context is ignored.
    pub fn new(context: Option<&'a C>, probe: &'a P) -> Self {
        let context = if cfg!(feature = "signal-context") {
            context
        } else {
            None
        };
        Self {
            context,
            context_frame: frame_pointer_hint(context),
            probe,
            vdso: None,
        }
    }

    /// Uses `analysis` instead of the process-wide VDSO analysis.
    pub fn with_vdso_analysis(mut self, analysis: VdsoAnalysis) -> Self {
        self.vdso = Some(analysis);
        self
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Returns the caller's frame pointer, or `None` if the chain ends or looks bogus.
    ///
    /// # Safety
    /// The two-word frame record at `current` must be readable.
    pub unsafe fn next_frame(&self, current: usize, options: WalkOptions) -> Option<usize> {
        let context = if options.with_context {
            self.context
        } else {
            None
        };

        let mut next = read_word(current, 0);
        if let Some(context) = context {
            next = self.trampoline_corrected(current, next, context);
        }

        // Null and self-referencing frames end the chain, anchored or not.
        if next == 0 || next == current {
            return None;
        }
        // Frames anchored at the signal context skip the distance checks, so that a handler
        // running on an alternate signal stack still reaches the interrupted frames.
        let anchored = context.is_some() && next == self.context_frame;
        if options.strict && !anchored {
            // The stack grows down: callers live at higher addresses.
            if next < current {
                return None;
            }
            if next - current > MAX_FRAME_BYTES {
                return None;
            }
        }

        if !is_word_aligned(next) {
            return None;
        }
        if cfg!(target_arch = "x86") && next as u64 >= KERNEL_RESERVED_START {
            return None;
        }
        // Only the last, already degraded leg of a walk is lax, so the slower probe is fine.
        if !options.strict && !self.probe.is_readable(next) {
            return None;
        }
        Some(next)
    }

    /// Recovers the caller of `__kernel_vsyscall` when the signal arrived inside it.
    ///
    /// The signal handler's frame returns into `__kernel_rt_sigreturn`. If the frame it links to
    /// is the context's base pointer while the instruction pointer is still in the trampoline
    /// prologue, that base pointer was never set up as a frame. The trampoline saved the caller's
    /// frame pointer on the stack instead, `push_count - 1` words above the stack pointer.
    unsafe fn trampoline_corrected(&self, current: usize, next: usize, context: &C) -> usize {
        let vdso = match self.vdso {
            Some(analysis) => analysis,
            None if vdso::APPLIES => vdso::analysis(),
            None => VdsoAnalysis::NONE,
        };
        if !vdso.needs_correction() || read_word(current, 1) != vdso.rt_sigreturn {
            return next;
        }
        if next != context.base_pointer() || !vdso.in_vsyscall(context.instruction_pointer()) {
            return next;
        }
        let sp = context.stack_pointer();
        if sp == 0 || !is_word_aligned(sp) {
            return next;
        }
        // Check the saved frame pointer before following it, to avoid a second fault on top
        // of whatever corruption caused the first one.
        let saved = read_word(sp, vdso.push_count - 1);
        if self.probe.is_readable(saved) {
            saved
        } else {
            next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RegisterSnapshot;
    use crate::memory::WORD;
    #[cfg(target_os = "linux")]
    use crate::memory::SyscallProbe;
    use crate::test_utils::SyntheticStack;

    fn always(_: usize) -> bool {
        true
    }

    fn never(_: usize) -> bool {
        false
    }

    fn validator<'a, P: ReadabilityProbe>(
        context: Option<&'a RegisterSnapshot>,
        probe: &'a P,
    ) -> FrameValidator<'a, RegisterSnapshot, P> {
        FrameValidator::new(context, probe)
    }

    #[test]
    fn test_strict_follows_increasing_chain() {
        let stack = SyntheticStack::chain(3, 4);
        let v = validator(None, &never);
        unsafe {
            assert_eq!(v.next_frame(stack.frame(0), WalkOptions::STRICT), Some(stack.frame(1)));
            assert_eq!(v.next_frame(stack.frame(1), WalkOptions::STRICT), Some(stack.frame(2)));
            assert_eq!(v.next_frame(stack.frame(2), WalkOptions::STRICT), None);
        }
    }

    #[test]
    fn test_self_loop() {
        let mut stack = SyntheticStack::chain(2, 4);
        stack.set_next(0, stack.frame(0));
        let v = validator(None, &always);
        unsafe {
            assert_eq!(v.next_frame(stack.frame(0), WalkOptions::STRICT), None);
            assert_eq!(v.next_frame(stack.frame(0), WalkOptions::LAX), None);
        }
    }

    #[test]
    fn test_decreasing_chain() {
        let mut stack = SyntheticStack::chain(3, 4);
        stack.set_next(2, stack.frame(0));
        unsafe {
            assert_eq!(
                validator(None, &always).next_frame(stack.frame(2), WalkOptions::STRICT),
                None
            );
            assert_eq!(
                validator(None, &always).next_frame(stack.frame(2), WalkOptions::LAX),
                Some(stack.frame(0))
            );
            assert_eq!(
                validator(None, &never).next_frame(stack.frame(2), WalkOptions::LAX),
                None
            );
        }
        #[cfg(target_os = "linux")]
        assert_eq!(
            unsafe { validator(None, &SyscallProbe).next_frame(stack.frame(2), WalkOptions::LAX) },
            Some(stack.frame(0))
        );
    }

    #[test]
    fn test_oversized_gap() {
        let mut words = [0usize; 2];
        let base = words.as_ptr() as usize;
        let v = validator(None, &always);

        words[0] = base + MAX_FRAME_BYTES + WORD;
        assert_eq!(unsafe { v.next_frame(base, WalkOptions::STRICT) }, None);

        words[0] = base.wrapping_sub(MAX_FRAME_BYTES + WORD);
        assert_eq!(unsafe { v.next_frame(base, WalkOptions::STRICT) }, None);

        words[0] = base + MAX_FRAME_BYTES;
        assert_eq!(
            unsafe { v.next_frame(base, WalkOptions::STRICT) },
            Some(base + MAX_FRAME_BYTES)
        );
    }

    #[test]
    fn test_misaligned() {
        let mut stack = SyntheticStack::chain(2, 4);
        stack.set_next(0, stack.frame(1) + 1);
        let v = validator(None, &always);
        unsafe {
            assert_eq!(v.next_frame(stack.frame(0), WalkOptions::STRICT), None);
            assert_eq!(v.next_frame(stack.frame(0), WalkOptions::LAX), None);
        }
    }

    #[test]
    fn test_lax_rejects_null() {
        let stack = SyntheticStack::chain(1, 4);
        let v = validator(None, &always);
        assert_eq!(unsafe { v.next_frame(stack.frame(0), WalkOptions::LAX) }, None);
    }

    #[test]
    #[cfg(feature = "signal-context")]
    fn test_context_anchor_skips_distance_checks() {
        let mut stack = SyntheticStack::chain(3, 4);
        // Handler frame on an "alternate stack" above the interrupted frames.
        stack.set_next(2, stack.frame(0));
        let interrupted = RegisterSnapshot {
            bp: stack.frame(0),
            sp: stack.frame(0) - 4 * WORD,
            ip: 0x1234,
        };
        let v = validator(Some(&interrupted), &never).with_vdso_analysis(VdsoAnalysis::NONE);
        unsafe {
            assert_eq!(v.next_frame(stack.frame(2), WalkOptions::STRICT), Some(stack.frame(0)));
            let without_context = WalkOptions {
                strict: true,
                with_context: false,
            };
            assert_eq!(v.next_frame(stack.frame(2), without_context), None);
        }
    }

    #[test]
    #[cfg(feature = "signal-context")]
    fn test_anchored_self_loop_ends_chain() {
        let mut stack = SyntheticStack::chain(3, 4);
        stack.set_next(0, stack.frame(0));
        let interrupted = RegisterSnapshot {
            bp: stack.frame(0),
            sp: stack.frame(0) - 4 * WORD,
            ip: 0x1234,
        };
        let v = validator(Some(&interrupted), &always).with_vdso_analysis(VdsoAnalysis::NONE);
        unsafe {
            assert_eq!(v.next_frame(stack.frame(0), WalkOptions::STRICT), None);
            assert_eq!(v.next_frame(stack.frame(0), WalkOptions::LAX), None);
        }
    }

    #[test]
    #[cfg(feature = "signal-context")]
    fn test_trampoline_correction() {
        // Layout: [handler frame][interrupted stack: saved regs pushed by the trampoline]
        //         [caller frame of __kernel_vsyscall]
        let rt_sigreturn = 0xf7f0_1000usize;
        let vsyscall = 0xf7f0_2000usize;
        let mut stack = SyntheticStack::chain(3, 8);
        let handler = stack.frame(0);
        let caller = stack.frame(2);
        // The handler's frame links to the bogus base pointer and returns to rt_sigreturn.
        let bogus_bp = stack.frame(1) + 2 * WORD;
        stack.set_next(0, bogus_bp);
        stack.set_return_address(0, rt_sigreturn);
        // Trampoline pushed two registers; the last push (lowest address) is at sp.
        let sp = stack.frame(1);
        stack.set_word(sp, 0, 0x5555);
        stack.set_word(sp, 1, caller);

        let analysis = VdsoAnalysis {
            vsyscall,
            rt_sigreturn,
            push_count: 2,
        };
        let interrupted = RegisterSnapshot {
            bp: bogus_bp,
            sp,
            ip: vsyscall + 3,
        };
        let v = validator(Some(&interrupted), &always).with_vdso_analysis(analysis);
        assert_eq!(unsafe { v.next_frame(handler, WalkOptions::STRICT) }, Some(caller));

        // Outside the trampoline prologue the base pointer is taken at face value.
        let elsewhere = RegisterSnapshot {
            ip: vsyscall + 0x40,
            ..interrupted
        };
        let v = validator(Some(&elsewhere), &always).with_vdso_analysis(analysis);
        assert_eq!(unsafe { v.next_frame(handler, WalkOptions::STRICT) }, Some(bogus_bp));

        // An unreadable saved frame pointer is not followed.
        let v = validator(Some(&interrupted), &never).with_vdso_analysis(analysis);
        assert_eq!(unsafe { v.next_frame(handler, WalkOptions::STRICT) }, Some(bogus_bp));

        // No correction needed.
        let v = validator(Some(&interrupted), &always).with_vdso_analysis(VdsoAnalysis {
            push_count: 0,
            ..analysis
        });
        assert_eq!(unsafe { v.next_frame(handler, WalkOptions::STRICT) }, Some(bogus_bp));

        // Misaligned stack pointer.
        let misaligned = RegisterSnapshot {
            sp: sp + 1,
            ..interrupted
        };
        let v = validator(Some(&misaligned), &always).with_vdso_analysis(analysis);
        assert_eq!(unsafe { v.next_frame(handler, WalkOptions::STRICT) }, Some(bogus_bp));
    }
}
