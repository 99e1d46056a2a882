use super::Error;
use crate::jvm::code::opcodes::{JSR, JSR_W};
use crate::jvm::code::{ExceptionRange, Instruction};
use crate::jvm::ConstantPool;

/// Operand stack sizes at every instruction of a method
///
/// Stack sizes are counted in slots, so `long` and `double` values count twice.
#[derive(Debug)]
pub struct StackSizes {
    /// Offsets of the instructions, in increasing order
    offsets: Vec<u32>,

    /// Stack size before and after each instruction (`None` if unreachable)
    sizes: Vec<Option<(u32, u32)>>,

    /// Largest stack size reached anywhere
    pub max_stack: u32,

    /// Places where paths disagree about the stack size
    pub contradictions: Vec<Contradiction>,
}

/// Instruction reached with two different stack sizes
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Contradiction {
    pub offset: u32,
    pub expected: u32,
    pub found: u32,
}

impl StackSizes {
    fn index_of(&self, offset: u32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    fn sizes_at(&self, offset: u32) -> Option<(u32, u32)> {
        self.index_of(offset).and_then(|idx| self.sizes[idx])
    }

    pub fn is_reachable(&self, offset: u32) -> bool {
        self.sizes_at(offset).is_some()
    }

    /// Stack size before the instruction at `offset` executes
    pub fn before(&self, offset: u32) -> Option<u32> {
        self.sizes_at(offset).map(|(before, _)| before)
    }

    /// Stack size after the instruction at `offset` has executed
    ///
    /// For `jsr`, this is the size at the subroutine entry.
    pub fn after(&self, offset: u32) -> Option<u32> {
        self.sizes_at(offset).map(|(_, after)| after)
    }

    /// Fail on the first contradiction, if any
    pub fn check_consistent(&self) -> Result<(), Error> {
        match self.contradictions.first() {
            None => Ok(()),
            Some(contradiction) => Err(Error::InconsistentStack {
                offset: contradiction.offset,
                expected: contradiction.expected,
                found: contradiction.found,
            }),
        }
    }
}

/// Computes the operand stack size before every reachable instruction
///
/// This is a forward data-flow pass: code starts with an empty stack at offset 0, exception
/// handlers start with just the exception on the stack, and stack sizes flow to every successor
/// of an instruction. Instructions reached again with a different size are not revisited: the
/// mismatch is recorded and the pass carries on.
pub struct StackEffectAnalyzer<'a> {
    constants: &'a ConstantPool,
}

impl<'a> StackEffectAnalyzer<'a> {
    pub fn new(constants: &'a ConstantPool) -> StackEffectAnalyzer<'a> {
        StackEffectAnalyzer { constants }
    }

    /// Analyze decoded instructions (as produced by `decode_all`)
    pub fn analyze(
        &self,
        instructions: &[(u32, Instruction)],
        exception_table: &[ExceptionRange],
    ) -> Result<StackSizes, Error> {
        let mut result = StackSizes {
            offsets: instructions.iter().map(|(offset, _)| *offset).collect(),
            sizes: vec![None; instructions.len()],
            max_stack: 0,
            contradictions: vec![],
        };

        let mut worklist: Vec<(usize, u32)> = vec![];
        if !instructions.is_empty() {
            worklist.push((0, 0));
        }
        for range in exception_table.iter().rev() {
            let handler = result
                .index_of(range.handler_pc)
                .ok_or(Error::InvalidJumpTarget {
                    offset: range.start_pc,
                    target: range.handler_pc as i64,
                })?;
            worklist.push((handler, 1));
        }

        while let Some((idx, before)) = worklist.pop() {
            let (offset, instruction) = &instructions[idx];
            let offset = *offset;

            if let Some((expected, _)) = result.sizes[idx] {
                if expected != before {
                    log::trace!(
                        "Stack size at {} is both {} and {}",
                        offset,
                        expected,
                        before
                    );
                    result.contradictions.push(Contradiction {
                        offset,
                        expected,
                        found: before,
                    });
                }
                continue;
            }

            let (popped, pushed) = instruction.stack_effect(self.constants)?;
            if popped > before {
                return Err(Error::StackUnderflow { offset });
            }
            let after = before - popped + pushed;
            result.sizes[idx] = Some((before, after));
            result.max_stack = result.max_stack.max(before).max(after);

            let is_subroutine_call = matches!(instruction.canonical_opcode(), JSR | JSR_W);
            if instruction.falls_through() {
                let next = idx + 1;
                if next >= instructions.len() {
                    return Err(Error::InvalidJumpTarget {
                        offset,
                        target: offset as i64 + instruction.length(offset) as i64,
                    });
                }
                // Execution resumes after `jsr` once the subroutine has popped its return address
                let size = if is_subroutine_call { before } else { after };
                worklist.push((next, size));
            }
            for jump in instruction.jump_offsets() {
                let target = offset as i64 + jump as i64;
                let target_idx = u32::try_from(target)
                    .ok()
                    .and_then(|target| result.index_of(target))
                    .ok_or(Error::InvalidJumpTarget { offset, target })?;
                worklist.push((target_idx, after));
            }
        }

        Ok(result)
    }
}
