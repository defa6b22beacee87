// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counts the `push %reg` instructions at the start of `__kernel_vsyscall`.
//!
//! Known instruction sequences of the 32-bit trampoline:
//!
//! ```text
//! sysenter (Intel):        push %ecx; push %edx; push %ebp; mov %esp,%ebp; sysenter
//! syscall (AMD):           push %ebp; mov %ecx,%ebp; syscall
//! int $0x80 (legacy):      int $0x80; ret
//! ```
//!
//! This is not a disassembler: only the opcodes above are recognized.

use crate::shared::constants::VSYSCALL_SCAN_BYTES;

const MOV_REG_REG: u8 = 0x89;
// ModRM byte of `mov %esp,%ebp`.
const MODRM_ESP_EBP: u8 = 0xE5;
const TWO_BYTE_ESCAPE: u8 = 0x0F;
const SYSENTER: u8 = 0x34;
const SYSCALL: u8 = 0x05;
const INT: u8 = 0xCD;
const INT_SYSCALL_VECTOR: u8 = 0x80;

/// Returns how many registers the trampoline pushes before entering the kernel.
///
/// 0 means no correction is needed: the trampoline sets up a frame pointer, uses `int $0x80`, or
/// is not recognized. An unrecognized sequence trips a debug assertion.
///
/// `code` should hold at least [`VSYSCALL_SCAN_BYTES`] + 1 bytes; a shorter slice is treated as
/// not containing a terminating instruction.
pub fn count_push_instructions(code: &[u8]) -> usize {
    let byte = |i: usize| code.get(i).copied();
    let mut pushes = 0;
    let mut i = 0;
    while i < VSYSCALL_SCAN_BYTES {
        let Some(op) = byte(i) else { break };
        match (op, byte(i + 1)) {
            (MOV_REG_REG, Some(MODRM_ESP_EBP)) => return 0,
            (MOV_REG_REG, _) => {
                // Any other register move, skip its ModRM byte.
                i += 1;
            }
            (TWO_BYTE_ESCAPE, Some(SYSENTER | SYSCALL)) => return pushes,
            (0x50..=0x5F, _) => pushes += 1,
            (INT, Some(INT_SYSCALL_VECTOR)) => {
                debug_assert_eq!(pushes, 0, "push instructions before int $0x80");
                return 0;
            }
            _ => {
                debug_assert!(false, "unexpected instruction {op:#04x} in __kernel_vsyscall");
                return 0;
            }
        }
        i += 1;
    }
    debug_assert!(
        false,
        "did not find sysenter or syscall in the first {VSYSCALL_SCAN_BYTES} bytes of __kernel_vsyscall"
    );
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysenter_with_pushes() {
        assert_eq!(count_push_instructions(&[0x51, 0x52, 0x55, 0x0F, 0x34]), 3);
    }

    #[test]
    fn test_frame_pointer_trampoline() {
        assert_eq!(count_push_instructions(&[0x89, 0xE5, 0x0F, 0x34]), 0);
        // Intel sequence as shipped: the mov comes after the pushes.
        assert_eq!(
            count_push_instructions(&[0x51, 0x52, 0x55, 0x89, 0xE5, 0x0F, 0x34, 0xC3]),
            0
        );
    }

    #[test]
    fn test_syscall_with_register_move() {
        // push %ebp; mov %ecx,%ebp; syscall
        assert_eq!(count_push_instructions(&[0x55, 0x89, 0xCD, 0x0F, 0x05, 0xC3]), 1);
    }

    #[test]
    fn test_int80() {
        assert_eq!(count_push_instructions(&[0xCD, 0x80, 0xC3]), 0);
    }

    // The conservative fallback on unrecognized code is only observable in release builds;
    // debug builds assert.
    #[test]
    #[cfg(not(debug_assertions))]
    fn test_unexpected_instruction_falls_back_to_zero() {
        assert_eq!(count_push_instructions(&[0x51, 0x90, 0x0F, 0x34]), 0);
        assert_eq!(count_push_instructions(&[0x51; 16]), 0);
        assert_eq!(count_push_instructions(&[]), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unexpected instruction")]
    fn test_unexpected_instruction_asserts() {
        count_push_instructions(&[0x51, 0x90, 0x0F, 0x34]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "did not find sysenter or syscall")]
    fn test_missing_syscall_asserts() {
        count_push_instructions(&[0x51; 16]);
    }
}
