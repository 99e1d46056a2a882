//! Pick encodings for symbolic jumps
//!
//! Jumps in a composed method refer to labels, so their distances are only known once every
//! instruction has an offset, and offsets depend on how the jumps are encoded. Layout starts with
//! every jump in its compact 16-bit form and widens the ones that do not fit:
//!
//! ```text,ignore,no_run
//!     goto L                goto_w L
//!
//!     if* L         =>      ifnot* +8
//!                           goto_w L
//! ```
//!
//! ### Termination
//!
//! Widening makes the code longer, which can push other jumps out of range, so layout repeats
//! until no jump needs widening. Each pass widens at least one jump and a widened jump is never
//! reconsidered, so there are at most as many passes as there are jumps. Switch padding is
//! recomputed on every pass, so widenings do not need to preserve 4-byte alignment.

use super::composer::{ComposedInstruction, Label};
use super::instruction::switch_padding;
use super::opcodes::*;
use crate::jvm::Error;
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: RangeInclusive<i64> =
    RangeInclusive::new(i16::MIN as i64, i16::MAX as i64);

/// Largest code array accepted by the JVM
pub const MAX_CODE_LENGTH: u32 = 65535;

/// Encoding chosen for a jump
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum JumpForm {
    /// 16-bit relative offset
    Short,

    /// `goto_w` or `jsr_w`
    Wide,

    /// Inverted condition jumping over a `goto_w`
    Inverted,
}

pub struct Layout {
    /// Offset of every instruction, followed by the total code length
    pub offsets: Vec<u32>,

    /// Form of every instruction (only meaningful for jumps)
    pub forms: Vec<JumpForm>,
}

impl Layout {
    pub fn offset_of(&self, label: &Label, labels: &HashMap<Label, usize>) -> u32 {
        self.offsets[labels[label]]
    }
}

/// Lay out the instructions, widening oversized jumps until every jump fits its encoding
///
/// All labels used by the instructions must already be placed.
pub fn layout(
    instructions: &[ComposedInstruction],
    labels: &HashMap<Label, usize>,
    small_jump_range: &RangeInclusive<i64>,
) -> Result<Layout, Error> {
    let mut forms = vec![JumpForm::Short; instructions.len()];
    loop {
        let offsets = compute_offsets(instructions, &forms);
        let total = offsets[instructions.len()];
        if total > MAX_CODE_LENGTH {
            return Err(Error::MethodCodeOverflow(total as usize));
        }

        let mut widened = false;
        for (idx, instruction) in instructions.iter().enumerate() {
            if let ComposedInstruction::Branch { opcode, target } = instruction {
                if forms[idx] != JumpForm::Short {
                    continue;
                }
                let jump = offsets[labels[target]] as i64 - offsets[idx] as i64;
                if !small_jump_range.contains(&jump) {
                    forms[idx] = if is_unconditional(*opcode) {
                        JumpForm::Wide
                    } else {
                        JumpForm::Inverted
                    };
                    widened = true;
                }
            }
        }

        if !widened {
            return Ok(Layout { offsets, forms });
        }
        log::trace!("Widened oversized jumps, laying out again");
    }
}

fn compute_offsets(instructions: &[ComposedInstruction], forms: &[JumpForm]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset: u32 = 0;
    for (instruction, form) in instructions.iter().zip(forms) {
        offsets.push(offset);
        offset += match instruction {
            ComposedInstruction::Plain(instruction) => instruction.length(offset),
            ComposedInstruction::Branch { .. } => match form {
                JumpForm::Short => 3,
                JumpForm::Wide => 5,
                JumpForm::Inverted => 8,
            },
            ComposedInstruction::Switch { opcode, cases, .. } => {
                let (fixed, per_case) = if *opcode == TABLESWITCH {
                    (12, 4)
                } else {
                    (8, 8)
                };
                1 + switch_padding(offset) + fixed + per_case * cases.len() as u32
            }
        };
    }
    offsets.push(offset);
    offsets
}

/// Jumps which have a 32-bit form
pub fn is_unconditional(opcode: u8) -> bool {
    matches!(opcode, GOTO | GOTO_W | JSR | JSR_W)
}

/// Conditional jump taken exactly when `opcode` is not
pub fn invert_condition(opcode: u8) -> Option<u8> {
    let inverted = match opcode {
        IFEQ => IFNE,
        IFNE => IFEQ,
        IFLT => IFGE,
        IFGE => IFLT,
        IFGT => IFLE,
        IFLE => IFGT,
        IF_ICMPEQ => IF_ICMPNE,
        IF_ICMPNE => IF_ICMPEQ,
        IF_ICMPLT => IF_ICMPGE,
        IF_ICMPGE => IF_ICMPLT,
        IF_ICMPGT => IF_ICMPLE,
        IF_ICMPLE => IF_ICMPGT,
        IF_ACMPEQ => IF_ACMPNE,
        IF_ACMPNE => IF_ACMPEQ,
        IFNULL => IFNONNULL,
        IFNONNULL => IFNULL,
        _ => return None,
    };
    Some(inverted)
}
