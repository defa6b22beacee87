// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Frame-pointer stack unwinding for x86 and x86-64.
//!
//! The unwinder follows the chain of saved frame pointers of the current thread and reports one
//! return address (and optionally a frame size) per frame into buffers the caller owns. It does
//! not allocate, lock or log while walking, so it can be used from signal handlers, including
//! handlers for crashes caused by a corrupted stack.
//!
//! The walk is best effort. Every step from a frame to its caller must pass the checks in
//! [`transition`]; the first step that does not ends the trace early instead of faulting.
//!
//! # Usage
//!
//! ```no_run
//! let mut addresses = [0usize; 64];
//! let frames = libdd_stackwalk::get_stack_trace(&mut addresses, 0);
//! for address in &addresses[..frames] {
//!     println!("{address:#x}");
//! }
//! ```
//!
//! Inside an `SA_SIGINFO` signal handler, pass the context the kernel handed to the handler so
//! that the walk crosses from the handler (possibly on an alternate signal stack) into the
//! interrupted code:
//!
//! ```no_run
//! # use std::ffi::c_void;
//! extern "C" fn handler(_signum: i32, _info: *mut libc::siginfo_t, ucontext: *mut c_void) {
//!     let mut addresses = [0usize; 64];
//!     let mut dropped = 0;
//!     let frames = unsafe {
//!         libdd_stackwalk::get_stack_trace_with_context(
//!             &mut addresses,
//!             0,
//!             ucontext,
//!             Some(&mut dropped),
//!         )
//!     };
//!     // ... report addresses[..frames] ...
//! #   let _ = frames;
//! }
//! ```
//!
//! On 32-bit x86 Linux, [`vdso::init`] computes the analysis of the kernel's syscall trampoline
//! ahead of the first context-aware unwind.
//!
//! # Features
//!
//! - `frame-sizes` (default): record per-frame sizes when asked for.
//! - `signal-context` (default): use the signal context to anchor the walk and to recover frames
//!   interrupted inside `__kernel_vsyscall`.

pub mod api;
pub mod context;
pub mod frame;
pub mod memory;
mod shared;
#[cfg(test)]
mod test_utils;
pub mod transition;
pub mod unwind;
pub mod vdso;

pub use api::{
    capture, current_frame_pointer, get_stack_frames, get_stack_frames_with_context,
    get_stack_trace, get_stack_trace_with_context,
};
pub use context::{frame_pointer_hint, RegisterSnapshot, RegisterView};
pub use frame::FrameRecord;
pub use memory::{ReadabilityProbe, SyscallProbe};
pub use shared::configuration::{UnwindConfiguration, Unwinding};
pub use shared::constants::{MAX_BACKTRACE_FRAMES, MAX_DROPPED_FRAMES_COUNT, MAX_FRAME_BYTES};
pub use transition::{FrameValidator, WalkOptions};
pub use unwind::{unwind_from, UnwindOutput, UnwindSummary};
pub use vdso::VdsoAnalysis;

#[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
pub use context::UContextView;

#[cfg(feature = "benchmarking")]
pub use shared::constants;
