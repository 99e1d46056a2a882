use super::layout::{self, JumpForm, SIGNED_16BIT_JUMP_RANGE};
use super::opcodes::*;
use super::{ExceptionRange, Instruction, LineNumberEntry};
use crate::jvm::Error;
use std::collections::HashMap;

/// Offset in the original code of some fragment
///
/// Labels are how the composer relocates code: jumps, exception ranges, and line numbers all
/// refer to positions in the code they were copied from, and those positions get their new
/// offsets once the whole method is laid out.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Label {
    pub fragment: usize,
    pub offset: u32,
}

/// Instruction whose jump targets are still symbolic
pub enum ComposedInstruction {
    Plain(Instruction),
    Branch {
        opcode: u8,
        target: Label,
    },
    Switch {
        opcode: u8,
        default: Label,
        cases: Vec<(i32, Label)>,
    },
}

/// Result of composing a method body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedCode {
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionRange>,
    pub line_numbers: Vec<LineNumberEntry>,
}

/// Append-only builder for a new method body, assembled from fragments of existing code
///
/// Each fragment has its own offset space: instructions are appended along with the offset they
/// had in the code they come from, and jumps inside the fragment keep referring to those offsets.
/// Fragments nest, which is how an inlined body gets copied in the middle of its caller.
///
/// ```text,ignore,no_run
/// composer.begin_fragment();
/// composer.append_instruction(0, Instruction::simple(ICONST_0))?;
/// composer.begin_fragment();
/// // ...inlined code, with its own offsets...
/// composer.end_fragment()?;
/// composer.append_instruction(1, Instruction::simple(IRETURN))?;
/// composer.end_fragment()?;
/// let composed = composer.compose()?;
/// ```
#[derive(Default)]
pub struct CodeComposer {
    instructions: Vec<ComposedInstruction>,

    /// Position (index into `instructions`) of every placed label
    labels: HashMap<Label, usize>,

    /// Labels used by jumps, exception ranges, and line numbers
    references: Vec<Label>,

    open_fragments: Vec<usize>,
    next_fragment: usize,

    exceptions: Vec<(Label, Label, Label, u16)>,
    line_numbers: Vec<(Label, LineNumberEntry)>,
}

impl CodeComposer {
    pub fn new() -> CodeComposer {
        CodeComposer::default()
    }

    /// Start a fresh offset space, nested in the current one
    pub fn begin_fragment(&mut self) -> usize {
        let fragment = self.next_fragment;
        self.next_fragment += 1;
        self.open_fragments.push(fragment);
        fragment
    }

    /// Close the current fragment, checking that every label it referred to has been placed
    pub fn end_fragment(&mut self) -> Result<(), Error> {
        let fragment = self.open_fragments.pop().ok_or(Error::UnbalancedFragments)?;
        let unplaced = self.unplaced_labels(|label| label.fragment == fragment);
        if unplaced.is_empty() {
            Ok(())
        } else {
            Err(Error::UnplacedLabels(unplaced))
        }
    }

    fn current_fragment(&self) -> Result<usize, Error> {
        self.open_fragments
            .last()
            .copied()
            .ok_or(Error::UnbalancedFragments)
    }

    fn label(&self, offset: i64) -> Result<Label, Error> {
        let fragment = self.current_fragment()?;
        let offset = u32::try_from(offset).map_err(|_| Error::JumpOverflow {
            offset: 0,
            jump: offset,
        })?;
        Ok(Label { fragment, offset })
    }

    fn reference(&mut self, offset: i64) -> Result<Label, Error> {
        let label = self.label(offset)?;
        self.references.push(label);
        Ok(label)
    }

    /// Mark the current position as `old_offset` in the current fragment
    ///
    /// If the label was already placed, the earlier position is kept.
    pub fn append_label(&mut self, old_offset: u32) -> Result<(), Error> {
        let label = self.label(old_offset as i64)?;
        let position = self.instructions.len();
        self.labels.entry(label).or_insert(position);
        Ok(())
    }

    /// Append an instruction which was at `old_offset` in the current fragment
    ///
    /// Jump offsets are interpreted relative to `old_offset`, in the current fragment.
    pub fn append_instruction(
        &mut self,
        old_offset: u32,
        instruction: Instruction,
    ) -> Result<(), Error> {
        self.append_label(old_offset)?;
        let origin = old_offset as i64;
        let composed = match instruction {
            Instruction::Branch { opcode, offset } => ComposedInstruction::Branch {
                opcode,
                target: self.reference(origin + offset as i64)?,
            },
            Instruction::Switch {
                opcode,
                default,
                cases,
            } => {
                let default = self.reference(origin + default as i64)?;
                let mut relocated = Vec::with_capacity(cases.len());
                for (key, jump) in cases {
                    relocated.push((key, self.reference(origin + jump as i64)?));
                }
                ComposedInstruction::Switch {
                    opcode,
                    default,
                    cases: relocated,
                }
            }
            plain => ComposedInstruction::Plain(plain),
        };
        self.instructions.push(composed);
        Ok(())
    }

    /// Add an exception range, with offsets in the current fragment
    ///
    /// Ranges end up in the exception table in the order they were appended.
    pub fn append_exception(&mut self, range: ExceptionRange) -> Result<(), Error> {
        let start = self.reference(range.start_pc as i64)?;
        let end = self.reference(range.end_pc as i64)?;
        let handler = self.reference(range.handler_pc as i64)?;
        self.exceptions.push((start, end, handler, range.catch_type));
        Ok(())
    }

    /// Add a line number entry, with its start offset in the current fragment
    ///
    /// Entries that end up at the same offset keep the order in which they were inserted.
    pub fn insert_line_number(&mut self, entry: LineNumberEntry) -> Result<(), Error> {
        let label = self.reference(entry.start_pc as i64)?;
        self.line_numbers.push((label, entry));
        Ok(())
    }

    fn unplaced_labels(&self, include: impl Fn(&Label) -> bool) -> Vec<Label> {
        let mut unplaced: Vec<Label> = self
            .references
            .iter()
            .filter(|label| include(label) && !self.labels.contains_key(label))
            .copied()
            .collect();
        unplaced.sort();
        unplaced.dedup();
        unplaced
    }

    /// Lay out and encode everything appended so far
    ///
    /// Exception ranges which end up empty are dropped.
    pub fn compose(self) -> Result<ComposedCode, Error> {
        if !self.open_fragments.is_empty() {
            return Err(Error::UnbalancedFragments);
        }
        let unplaced = self.unplaced_labels(|_| true);
        if !unplaced.is_empty() {
            return Err(Error::UnplacedLabels(unplaced));
        }

        let layout = layout::layout(&self.instructions, &self.labels, &SIGNED_16BIT_JUMP_RANGE)?;
        let resolve = |label: &Label| layout.offset_of(label, &self.labels);

        let total_length = layout.offsets[self.instructions.len()];
        let mut code: Vec<u8> = Vec::with_capacity(total_length as usize);
        for (idx, composed) in self.instructions.iter().enumerate() {
            let offset = layout.offsets[idx];
            match composed {
                ComposedInstruction::Plain(instruction) => instruction.encode(offset, &mut code)?,
                ComposedInstruction::Branch { opcode, target } => {
                    let jump = resolve(target) as i64 - offset as i64;
                    encode_branch(*opcode, layout.forms[idx], offset, jump, &mut code)?;
                }
                ComposedInstruction::Switch {
                    opcode,
                    default,
                    cases,
                } => {
                    let relative = |label: &Label| (resolve(label) as i64 - offset as i64) as i32;
                    let switch = Instruction::Switch {
                        opcode: *opcode,
                        default: relative(default),
                        cases: cases
                            .iter()
                            .map(|(key, label)| (*key, relative(label)))
                            .collect(),
                    };
                    switch.encode(offset, &mut code)?;
                }
            }
            debug_assert_eq!(code.len() as u32, layout.offsets[idx + 1]);
        }

        let exception_table: Vec<ExceptionRange> = self
            .exceptions
            .iter()
            .map(|(start, end, handler, catch_type)| ExceptionRange {
                start_pc: resolve(start),
                end_pc: resolve(end),
                handler_pc: resolve(handler),
                catch_type: *catch_type,
            })
            .filter(|range| range.start_pc < range.end_pc)
            .collect();

        let mut line_numbers: Vec<LineNumberEntry> = self
            .line_numbers
            .iter()
            .map(|(label, entry)| LineNumberEntry {
                start_pc: resolve(label),
                ..entry.clone()
            })
            .collect();
        line_numbers.sort_by_key(|entry| entry.start_pc);

        Ok(ComposedCode {
            code,
            exception_table,
            line_numbers,
        })
    }
}

fn encode_branch(
    opcode: u8,
    form: JumpForm,
    offset: u32,
    jump: i64,
    code: &mut Vec<u8>,
) -> Result<(), Error> {
    let overflow = || Error::JumpOverflow { offset, jump };
    match form {
        JumpForm::Short => {
            let short_opcode = match opcode {
                GOTO_W => GOTO,
                JSR_W => JSR,
                other => other,
            };
            let jump = i16::try_from(jump).map_err(|_| overflow())?;
            Instruction::branch(short_opcode, jump as i32).encode(offset, code)
        }
        JumpForm::Wide => {
            let wide_opcode = if matches!(opcode, JSR | JSR_W) {
                JSR_W
            } else {
                GOTO_W
            };
            let jump = i32::try_from(jump).map_err(|_| overflow())?;
            Instruction::branch(wide_opcode, jump).encode(offset, code)
        }
        JumpForm::Inverted => {
            let inverted = layout::invert_condition(opcode).ok_or_else(overflow)?;
            Instruction::branch(inverted, 8).encode(offset, code)?;
            let jump = i32::try_from(jump - 3).map_err(|_| overflow())?;
            Instruction::branch(GOTO_W, jump).encode(offset + 3, code)
        }
    }
}
