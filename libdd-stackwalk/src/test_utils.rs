// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::memory::WORD;

/// Heap-backed chain of frame records, laid out the way a downward-growing stack would be:
/// frame 0 is the innermost one and every caller lives at a higher address.
pub(crate) struct SyntheticStack {
    words: Vec<usize>,
    stride: usize,
}

impl SyntheticStack {
    pub(crate) const RETURN_ADDRESS_BASE: usize = 0x4000_0000;

    /// `frames` records, `stride` words apart. Frame `i` returns to `RETURN_ADDRESS_BASE + i`
    /// and the last frame links to null.
    pub(crate) fn chain(frames: usize, stride: usize) -> Self {
        assert!(stride >= 2);
        let mut stack = Self {
            words: vec![0; frames * stride + stride],
            stride,
        };
        for i in 0..frames {
            let next = if i + 1 < frames { stack.frame(i + 1) } else { 0 };
            stack.set_next(i, next);
            stack.set_return_address(i, Self::RETURN_ADDRESS_BASE + i);
        }
        stack
    }

    pub(crate) fn frame(&self, i: usize) -> usize {
        self.words.as_ptr() as usize + i * self.stride * WORD
    }

    pub(crate) fn return_address(i: usize) -> usize {
        Self::RETURN_ADDRESS_BASE + i
    }

    pub(crate) fn set_next(&mut self, i: usize, next: usize) {
        self.words[i * self.stride] = next;
    }

    pub(crate) fn set_return_address(&mut self, i: usize, ret: usize) {
        self.words[i * self.stride + 1] = ret;
    }

    /// Writes the word `index` words above `addr`, which must lie inside this stack.
    pub(crate) fn set_word(&mut self, addr: usize, index: usize, value: usize) {
        let offset = (addr - self.words.as_ptr() as usize) / WORD + index;
        self.words[offset] = value;
    }
}
