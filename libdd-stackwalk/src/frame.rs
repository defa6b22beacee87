// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack frame representation for frame-pointer unwinding.
//!
//! On x86 and x86-64 a function prologue that keeps a frame pointer leaves a two-word record at
//! the frame pointer: the caller's frame pointer, followed by the return address into the caller.

use crate::memory::read_word;

/// The two-word record stored at a frame pointer.
///
/// # Fields
///
/// - `frame_pointer`: address of the record (RBP/EBP while the frame is active)
/// - `next_frame_pointer`: saved frame pointer of the caller (word 0)
/// - `return_address`: return address into the caller (word 1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRecord {
    pub frame_pointer: usize,
    pub next_frame_pointer: usize,
    pub return_address: usize,
}

impl FrameRecord {
    /// Reads the record at `frame_pointer`.
    ///
    /// # Safety
    /// Both words at `frame_pointer` must be readable.
    pub unsafe fn read(frame_pointer: usize) -> Self {
        Self {
            frame_pointer,
            next_frame_pointer: read_word(frame_pointer, 0),
            return_address: read_word(frame_pointer, 1),
        }
    }

    /// Byte distance to the caller's frame, or 0 ("unknown") when the caller's frame is not at a
    /// higher address.
    pub fn size_to(&self, next_frame_pointer: usize) -> usize {
        if next_frame_pointer > self.frame_pointer {
            next_frame_pointer - self.frame_pointer
        } else {
            0
        }
    }
}
