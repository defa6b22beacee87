// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits shared by the extractor, the validator and the unwind driver.

/// Stack frames larger than this many bytes are assumed to be bogus.
///
/// Code built without frame pointers can leave an unrelated value in the base pointer register
/// that superficially looks like a frame; this bound rejects most of those.
pub const MAX_FRAME_BYTES: usize = 100_000;

/// Maximum number of frames walked after the output buffer is full, purely to report how many
/// frames were dropped.
pub const MAX_DROPPED_FRAMES_COUNT: usize = 1000;

/// Number of instruction bytes of `__kernel_vsyscall` inspected before giving up.
/// Up to one extra byte past this window may be read while decoding a two-byte opcode.
pub const VSYSCALL_SCAN_BYTES: usize = 10;

/// On 32-bit x86 the last two pages of the address space belong to kernel mappings.
pub const KERNEL_RESERVED_START: u64 = 0xffff_e000;

/// Default number of frames captured when no depth is configured.
pub const MAX_BACKTRACE_FRAMES: usize = 128;

/// Upper bound accepted for a configured depth.
pub const MAX_UNWIND_DEPTH: usize = 4096;

/// Symbol name and version of the 32-bit fast-syscall entry in the VDSO.
pub const KERNEL_VSYSCALL_SYMBOL: &str = "__kernel_vsyscall";
/// Symbol name and version of the 32-bit signal return trampoline in the VDSO.
pub const KERNEL_RT_SIGRETURN_SYMBOL: &str = "__kernel_rt_sigreturn";
pub const KERNEL_SYMBOL_VERSION: &str = "LINUX_2.5";

/// Selects `strict` or `lax` unwinding.
pub const DD_STACKWALK_UNWINDING: &str = "DD_STACKWALK_UNWINDING";
/// Overrides the configured maximum depth.
pub const DD_STACKWALK_MAX_DEPTH: &str = "DD_STACKWALK_MAX_DEPTH";
