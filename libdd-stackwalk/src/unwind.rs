// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The frame-pointer walk itself.
//!
//! Starting from a known frame the driver follows the chain of saved frame pointers, records one
//! return address per accepted frame into caller-provided storage and stops at the first
//! transition the [`FrameValidator`] rejects. Nothing here allocates, locks or logs, so the walk
//! can run inside a signal handler.

use crate::context::RegisterView;
use crate::frame::FrameRecord;
use crate::memory::ReadabilityProbe;
use crate::shared::configuration::UnwindConfiguration;
use crate::shared::constants::MAX_DROPPED_FRAMES_COUNT;
use crate::transition::{FrameValidator, WalkOptions};

/// Caller-provided storage for a walk.
///
/// `sizes[i]` is the byte distance from frame `i` to its caller, 0 if unknown.
#[derive(Debug)]
pub struct UnwindOutput<'a> {
    addresses: &'a mut [usize],
    sizes: Option<&'a mut [usize]>,
}

impl<'a> UnwindOutput<'a> {
    pub fn new(addresses: &'a mut [usize]) -> Self {
        Self {
            addresses,
            sizes: None,
        }
    }

    /// Frame sizes are only recorded with the `frame-sizes` feature; without it `sizes` is left
    /// untouched.
    pub fn with_sizes(addresses: &'a mut [usize], sizes: &'a mut [usize]) -> Self {
        Self {
            addresses,
            sizes: cfg!(feature = "frame-sizes").then_some(sizes),
        }
    }

    /// Number of frames that fit.
    pub fn capacity(&self) -> usize {
        match &self.sizes {
            Some(sizes) => self.addresses.len().min(sizes.len()),
            None => self.addresses.len(),
        }
    }

    fn record(&mut self, n: usize, frame: &FrameRecord, next: usize) {
        self.addresses[n] = frame.return_address;
        if let Some(sizes) = self.sizes.as_deref_mut() {
            sizes[n] = frame.size_to(next);
        }
    }
}

/// Result of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnwindSummary {
    /// Number of entries written to the output.
    pub frames: usize,
    /// Lower bound on the frames that did not fit, capped at [`MAX_DROPPED_FRAMES_COUNT`].
    /// `None` unless requested.
    pub min_dropped_frames: Option<usize>,
}

/// Walks the frame chain starting at `start`.
///
/// At most `config.max_depth()` frames are written, fewer if `output` is smaller. The first
/// `config.skip_count()` accepted frames are walked but not recorded. A frame whose return
/// address is null ends the chain.
///
/// # Safety
/// `start` must be 0 or point to a readable frame record, typically the live frame pointer of
/// the calling thread.
pub unsafe fn unwind_from<C, P>(
    start: usize,
    validator: &FrameValidator<'_, C, P>,
    output: &mut UnwindOutput<'_>,
    config: &UnwindConfiguration,
) -> UnwindSummary
where
    C: RegisterView + ?Sized,
    P: ReadabilityProbe + ?Sized,
{
    let options = WalkOptions {
        strict: config.unwinding().is_strict(),
        with_context: validator.has_context(),
    };
    let max_depth = config.max_depth().min(output.capacity());
    let mut skip = config.skip_count();
    let mut frames = 0;
    let mut fp = start;

    while fp != 0 && frames < max_depth {
        let frame = FrameRecord::read(fp);
        if frame.return_address == 0 {
            // Some runtimes terminate the chain with a null return address.
            fp = 0;
            break;
        }
        let next = validator.next_frame(fp, options).unwrap_or(0);
        if skip > 0 {
            skip -= 1;
        } else {
            output.record(frames, &frame, next);
            frames += 1;
        }
        fp = next;
    }

    let min_dropped_frames = config.count_dropped_frames().then(|| {
        // Best effort: the frames we failed to record are worth a lax walk.
        let lax = WalkOptions {
            strict: false,
            ..options
        };
        let mut dropped = 0;
        while fp != 0 && dropped < MAX_DROPPED_FRAMES_COUNT {
            if FrameRecord::read(fp).return_address == 0 {
                break;
            }
            fp = validator.next_frame(fp, lax).unwrap_or(0);
            dropped += 1;
        }
        dropped
    });

    UnwindSummary {
        frames,
        min_dropped_frames,
    }
}
