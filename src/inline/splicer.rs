//! Splice callee bodies into their call sites
//!
//! Inlining a call rewrites the invoke instruction into three parts:
//!
//! ```text,ignore,no_run
//!     invokestatic Foo.bar(JI)I     =>    istore  N+2           // preamble: arguments are popped
//!                                         lstore  N             // into fresh local variables
//!
//!                                         ...body of bar...     // locals shifted by N, every
//!                                         goto    end           // return but the last one jumps
//!                                         ...                   // to the end
//!                                   end:
//! ```
//!
//! where `N` is the number of local variables of the method containing the call, so the inlined
//! body never touches the caller's own variables. Return values are left on the operand stack,
//! exactly where the invoke instruction would have left them.
//!
//! The inlined body gets its own composer fragment: its jumps and exception ranges keep referring
//! to the offsets of the original callee code and are only resolved once the whole method is laid
//! out. Calls inside the inlined body are themselves candidates for inlining.

use super::summary::check_anchors;
use super::{
    Error, InlineCandidate, InlineObserver, InlineabilityChecker, InliningContext, InliningPolicy,
    Nesting, ProgramInfo, Rejection, Settings, StackEffectAnalyzer, StackSizes,
};
use crate::jvm;
use crate::jvm::code::opcodes::*;
use crate::jvm::code::{
    decode_all, CodeAttribute, CodeComposer, ExceptionRange, Instruction, LineNumber,
    LineNumberEntry, MAX_CODE_LENGTH,
};
use crate::jvm::{
    BaseType, ClassPool, ConstantPool, FieldType, MemberKind, MethodDescriptor, MethodRef,
    ParseDescriptor, ProgramClass, ProgramMethod,
};
use crate::util::Width;

/// Counts of what the inliner did
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct InliningStatistics {
    /// Calls replaced by the body of their callee (including calls inside inlined bodies)
    pub call_sites_inlined: usize,

    /// Methods whose code was rewritten
    pub methods_changed: usize,

    /// Methods skipped because their code could not be analyzed
    pub methods_malformed: usize,

    /// Methods left untransformed because splicing failed
    pub methods_failed: usize,
}

/// Inlines calls, one method at a time
///
/// Every method is rewritten from its own code and the current code of the methods it calls, so
/// the order in which methods are visited determines how deeply calls end up inlined.
///
/// Rewritten methods lose their `StackMapTable`, along with their local variable tables. Classes
/// from Java 7 onwards only pass verification again once their stack map frames are recomputed
/// by a later preverification step.
pub struct MethodInliner<'s> {
    settings: &'s Settings,
    program: ProgramInfo,
    policy: Box<dyn InliningPolicy + 's>,
    observer: Option<Box<dyn InlineObserver + 's>>,
    statistics: InliningStatistics,
}

/// Result of splicing a method, before it is written back into the class pool
struct SplicedMethod {
    code: CodeAttribute,
    constants: ConstantPool,
    call_sites: usize,

    /// Offsets of the inlined calls in the original code
    call_offsets: Vec<u32>,
}

enum MethodOutcome {
    Unchanged,
    Malformed,
    Spliced(SplicedMethod),
}

impl<'s> MethodInliner<'s> {
    pub fn new(
        settings: &'s Settings,
        program: ProgramInfo,
        policy: impl InliningPolicy + 's,
    ) -> MethodInliner<'s> {
        MethodInliner {
            settings,
            program,
            policy: Box::new(policy),
            observer: None,
            statistics: InliningStatistics::default(),
        }
    }

    /// Get called back for every inlined call site
    pub fn with_observer(mut self, observer: impl InlineObserver + 's) -> MethodInliner<'s> {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Program facts, including refreshed summaries of the methods rewritten so far
    pub fn program(&self) -> &ProgramInfo {
        &self.program
    }

    pub fn statistics(&self) -> InliningStatistics {
        self.statistics
    }

    /// Inline calls in every method of the pool
    ///
    /// Only fails when `debug_failures` is set: otherwise methods that cannot be rewritten are
    /// just left as they were.
    pub fn run(&mut self, pool: &mut ClassPool) -> Result<InliningStatistics, Error> {
        self.statistics = InliningStatistics::default();
        let methods: Vec<MethodRef> = pool
            .classes()
            .flat_map(|class| {
                class
                    .methods
                    .iter()
                    .filter(|method| method.code.is_some())
                    .map(move |method| class.method_ref(method))
            })
            .collect();

        for method in &methods {
            self.visit_code_attribute(pool, method)?;
        }

        log::debug!(
            "Inlined {} call sites in {} methods ({} malformed, {} failed)",
            self.statistics.call_sites_inlined,
            self.statistics.methods_changed,
            self.statistics.methods_malformed,
            self.statistics.methods_failed
        );
        Ok(self.statistics)
    }

    /// Inline calls in one method, rewriting its code in place
    ///
    /// Returns whether the method changed.
    pub fn visit_code_attribute(
        &mut self,
        pool: &mut ClassPool,
        method: &MethodRef,
    ) -> Result<bool, Error> {
        let outcome = {
            let pool: &ClassPool = pool;
            let (class, program_method) = pool
                .method(method)
                .ok_or_else(|| Error::MissingMethod(method.clone()))?;
            match &program_method.code {
                None => return Ok(false),
                Some(code) => self.splice_method(pool, class, program_method, code),
            }
        };

        match outcome {
            Ok(MethodOutcome::Unchanged) => Ok(false),
            Ok(MethodOutcome::Malformed) => {
                self.statistics.methods_malformed += 1;
                Ok(false)
            }
            Ok(MethodOutcome::Spliced(spliced)) => {
                self.apply(pool, method, spliced)?;
                Ok(true)
            }
            Err(err) => {
                self.statistics.methods_failed += 1;
                log::error!("Leaving {} untransformed: {:?}", method, err);
                if self.settings.debug_failures {
                    Err(err)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn apply(
        &mut self,
        pool: &mut ClassPool,
        method: &MethodRef,
        spliced: SplicedMethod,
    ) -> Result<(), Error> {
        let missing = || Error::MissingMethod(method.clone());
        let class = pool.get_mut(&method.class).ok_or_else(missing)?;
        class.constants = spliced.constants;
        let target = class
            .find_method_mut(&method.name, &method.descriptor)
            .ok_or_else(missing)?;
        target.code = Some(spliced.code);

        self.statistics.call_sites_inlined += spliced.call_sites;
        self.statistics.methods_changed += 1;
        self.program.update_summary(pool, method);
        log::debug!("Inlined {} call sites into {}", spliced.call_sites, method);

        if let Some(observer) = &mut self.observer {
            let (class, found) = pool.method(method).ok_or_else(missing)?;
            for call_offset in spliced.call_offsets {
                observer.inlined(class, found, call_offset);
            }
        }
        Ok(())
    }

    fn splice_method(
        &self,
        pool: &ClassPool,
        class: &ProgramClass,
        method: &ProgramMethod,
        code: &CodeAttribute,
    ) -> Result<MethodOutcome, Error> {
        let target = class.method_ref(method);

        let analyzed = decode_all(&code.code)
            .map_err(Error::from)
            .and_then(|instructions| {
                let stack = StackEffectAnalyzer::new(&class.constants)
                    .analyze(&instructions, &code.exception_table)?;
                stack.check_consistent()?;
                check_anchors(&instructions, code)?;
                Ok((instructions, stack))
            });
        let (instructions, stack) = match analyzed {
            Ok(analyzed) => analyzed,
            Err(err) => {
                log::warn!("Not inlining into {}, malformed code: {:?}", target, err);
                return Ok(MethodOutcome::Malformed);
            }
        };

        let mut splice = Splice {
            pool,
            program: &self.program,
            checker: InlineabilityChecker::new(pool, &self.program, self.settings),
            policy: &*self.policy,
            settings: self.settings,
            class,
            method,
            target,
            composer: CodeComposer::new(),
            constants: class.constants.clone(),
            estimated_length: code.code_length(),
            max_locals: code.max_locals as u32,
            uninitialized_objects: 0,
            call_sites: 0,
            call_offsets: vec![],
        };

        let body = Body {
            nesting: &Nesting::TopLevel,
            class,
            code,
            stack,
            variable_offset: 0,
            covered_by_catch_all: true,
            last_offset: instructions.last().map(|(offset, _)| *offset),
        };
        splice.composer.begin_fragment();
        splice.copy_body(&body, &instructions, None)?;
        splice.composer.end_fragment()?;

        if splice.call_sites == 0 {
            return Ok(MethodOutcome::Unchanged);
        }
        match splice.finish(code)? {
            Some(spliced) => Ok(MethodOutcome::Spliced(spliced)),
            None => Ok(MethodOutcome::Unchanged),
        }
    }
}

/// Is every exception handler covering `offset` a catch-all handler? (true if none do)
fn covered_by_catch_all(exception_table: &[ExceptionRange], offset: u32) -> bool {
    exception_table
        .iter()
        .filter(|range| range.covers(offset))
        .all(ExceptionRange::is_catch_all)
}

fn store_opcode(parameter: &FieldType) -> u8 {
    match parameter {
        FieldType::Base(BaseType::Long) => LSTORE,
        FieldType::Base(BaseType::Float) => FSTORE,
        FieldType::Base(BaseType::Double) => DSTORE,
        FieldType::Base(_) => ISTORE,
        FieldType::Object(_) | FieldType::Array(_) => ASTORE,
    }
}

/// Working state while rewriting one method
///
/// Everything in here is scoped to one visit of a method: the class pool is only read, and the
/// new code and constants only get written back once the whole method has been spliced.
struct Splice<'p> {
    pool: &'p ClassPool,
    program: &'p ProgramInfo,
    checker: InlineabilityChecker<'p>,
    policy: &'p dyn InliningPolicy,
    settings: &'p Settings,

    /// Method being rewritten
    class: &'p ProgramClass,
    method: &'p ProgramMethod,
    target: MethodRef,

    composer: CodeComposer,

    /// Constants of the class being rewritten, extended with constants of inlined bodies
    constants: ConstantPool,

    /// Upper bound on the length of the rewritten code
    estimated_length: u32,

    max_locals: u32,
    uninitialized_objects: u32,

    call_sites: usize,
    call_offsets: Vec<u32>,
}

/// Code being copied, either the method being rewritten or an inlined body
struct Body<'n, 'p> {
    nesting: &'n Nesting<'n>,

    /// Class declaring the code (whose constant pool the code refers to)
    class: &'p ProgramClass,
    code: &'p CodeAttribute,
    stack: StackSizes,

    /// Added to every local variable index
    variable_offset: u32,

    /// Are all the exception handlers around the body's call site catch-all handlers?
    covered_by_catch_all: bool,

    last_offset: Option<u32>,
}

/// Invoke instruction which could be inlined
struct CallSite<'n, 'p> {
    nesting: &'n Nesting<'n>,
    constants: &'p ConstantPool,
    offset: u32,
    opcode: u8,
    index: u16,
    stack_depth_before: u32,
    empty_invoking_stack: bool,
    covered_by_catch_all: bool,

    /// Local variable offset and local variable count of the code containing the call
    variable_offset: u32,
    max_locals: u32,
}

/// Line numbers of a body, handed out in offset order as the instructions are copied
struct PendingLines<'c> {
    entries: Vec<&'c LineNumberEntry>,
    next: usize,
}

impl<'c> PendingLines<'c> {
    fn new(entries: &'c [LineNumberEntry]) -> PendingLines<'c> {
        let mut entries: Vec<&LineNumberEntry> = entries.iter().collect();
        entries.sort_by_key(|entry| entry.start_pc);
        PendingLines { entries, next: 0 }
    }

    /// Entries starting at or before `offset` which have not been handed out yet
    fn take_up_to(&mut self, offset: u32) -> &[&'c LineNumberEntry] {
        let start = self.next;
        while self.next < self.entries.len() && self.entries[self.next].start_pc <= offset {
            self.next += 1;
        }
        &self.entries[start..self.next]
    }
}

impl<'p> Splice<'p> {
    /// Copy the code of a body into the current fragment
    ///
    /// Line numbers are interleaved with the instructions, so that entries added while inlining a
    /// call stay ordered relative to the body's own entries at the same offsets.
    fn copy_body(
        &mut self,
        body: &Body<'_, 'p>,
        instructions: &[(u32, Instruction)],
        source: Option<&str>,
    ) -> Result<(), Error> {
        let mut lines = PendingLines::new(&body.code.line_numbers);
        for (offset, instruction) in instructions {
            for entry in lines.take_up_to(*offset) {
                self.insert_line_number(entry, source)?;
            }
            self.copy_instruction(body, *offset, instruction)?;
        }
        for entry in lines.take_up_to(u32::MAX) {
            self.insert_line_number(entry, source)?;
        }

        self.composer.append_label(body.code.code_length())?;
        for range in &body.code.exception_table {
            self.composer.append_exception(*range)?;
        }
        Ok(())
    }

    /// Copy a line number, tagging untagged lines with the source of the body
    fn insert_line_number(
        &mut self,
        entry: &LineNumberEntry,
        source: Option<&str>,
    ) -> Result<(), Error> {
        let source = match (entry.line, &entry.source) {
            (LineNumber::Line(_), None) => source.map(str::to_owned),
            _ => entry.source.clone(),
        };
        self.composer.insert_line_number(LineNumberEntry {
            start_pc: entry.start_pc,
            line: entry.line,
            source,
        })?;
        Ok(())
    }

    fn copy_instruction(
        &mut self,
        body: &Body<'_, 'p>,
        offset: u32,
        instruction: &Instruction,
    ) -> Result<(), Error> {
        let inlining = body.nesting.is_inlining();
        let copied = match instruction {
            Instruction::Simple { .. } if inlining && instruction.is_return() => {
                if body.last_offset == Some(offset) {
                    self.composer.append_label(offset)?;
                } else {
                    let exit = body.code.code_length() as i64 - offset as i64;
                    let exit = i32::try_from(exit).map_err(|_| jvm::Error::JumpOverflow {
                        offset,
                        jump: exit,
                    })?;
                    self.composer
                        .append_instruction(offset, Instruction::branch(GOTO, exit))?;
                }
                return Ok(());
            }

            Instruction::Variable {
                opcode,
                index,
                constant,
            } => {
                let shifted = u16::try_from(*index as u32 + body.variable_offset)
                    .map_err(|_| Error::LocalsOverflow(self.target.clone()))?;
                Instruction::Variable {
                    opcode: *opcode,
                    index: shifted,
                    constant: *constant,
                }
            }

            Instruction::Constant {
                opcode,
                index,
                operand,
            } => {
                if instruction.is_invoke() && *opcode != INVOKEDYNAMIC {
                    let sizes = (body.stack.before(offset), body.stack.after(offset));
                    if let (Some(before), Some(after)) = sizes {
                        let site = CallSite {
                            nesting: body.nesting,
                            constants: &body.class.constants,
                            offset,
                            opcode: *opcode,
                            index: *index,
                            stack_depth_before: before,
                            empty_invoking_stack: !inlining && after == 0,
                            covered_by_catch_all: body.covered_by_catch_all
                                && covered_by_catch_all(&body.code.exception_table, offset),
                            variable_offset: body.variable_offset,
                            max_locals: body.code.max_locals as u32,
                        };
                        if self.try_inline(&site)? {
                            return Ok(());
                        }
                    }
                }

                self.track_uninitialized(&body.class.constants, instruction)?;
                // Bodies from the class being rewritten already share its constants
                let index = if inlining && body.class.name != self.class.name {
                    self.constants.merge_from(&body.class.constants, *index)?
                } else {
                    *index
                };
                Instruction::Constant {
                    opcode: *opcode,
                    index,
                    operand: *operand,
                }
            }

            other => other.clone(),
        };
        self.composer.append_instruction(offset, copied)?;
        Ok(())
    }

    fn track_uninitialized(
        &mut self,
        constants: &ConstantPool,
        instruction: &Instruction,
    ) -> Result<(), Error> {
        match instruction {
            Instruction::Constant { opcode: NEW, .. } => self.uninitialized_objects += 1,
            Instruction::Constant {
                opcode: INVOKESPECIAL,
                index,
                ..
            } => {
                if constants.member_ref(*index)?.name == "<init>" {
                    self.uninitialized_objects = self.uninitialized_objects.saturating_sub(1);
                }
            }
            _ => (),
        }
        Ok(())
    }

    fn reject(&self, callee: &MethodRef, rejection: Rejection) -> Result<bool, Error> {
        log::trace!(
            "Not inlining {} into {}: {:?}",
            callee,
            self.target,
            rejection
        );
        Ok(false)
    }

    /// Try to replace the call with the body of the callee
    ///
    /// Returns whether the call was inlined. If not, nothing has been appended.
    fn try_inline(&mut self, site: &CallSite<'_, 'p>) -> Result<bool, Error> {
        let member = site.constants.member_ref(site.index)?;
        if member.kind == MemberKind::Field {
            return Err(jvm::Error::UnexpectedConstant {
                index: site.index,
                expected: "MethodRef",
            }
            .into());
        }
        let resolved = self
            .pool
            .resolve_method(member.class, member.name, member.descriptor);
        let (callee_class, callee_method) = match resolved {
            Some(resolved) => resolved,
            None => return Ok(false),
        };
        let callee = callee_class.method_ref(callee_method);

        let candidate = InlineCandidate {
            consuming_class: self.class,
            consuming_method: self.method,
            callee_class,
            callee_method,
            invoke_opcode: site.opcode,
            call_offset: site.offset,
            stack_depth_before: site.stack_depth_before,
        };
        let context = InliningContext {
            nesting: site.nesting,
            empty_invoking_stack: site.empty_invoking_stack,
            covered_by_catch_all: site.covered_by_catch_all,
            uninitialized_objects: self.uninitialized_objects,
        };
        if !self.checker.should_attempt_inline(&candidate, &context) {
            return Ok(false);
        }
        let callee_code = match &callee_method.code {
            Some(code) => code,
            None => return self.reject(&callee, Rejection::NoCode),
        };

        let allowed = self.policy.should_inline(
            self.class,
            self.method,
            callee_class,
            callee_method,
            callee_code,
            self.program,
        );
        if !allowed {
            return self.reject(&callee, Rejection::Policy);
        }

        let resulting_length = self.estimated_length + callee_code.code_length();
        if resulting_length >= self.settings.max_resulting_code_length
            || resulting_length > MAX_CODE_LENGTH
        {
            return self.reject(&callee, Rejection::ResultTooLong);
        }

        let descriptor = MethodDescriptor::parse(&callee_method.descriptor)
            .map_err(|_| jvm::Error::BadDescriptor(callee_method.descriptor.clone()))?;
        let parameter_length = descriptor.parameter_length(!callee_method.is_static()) as u32;
        let variable_offset = site.variable_offset + site.max_locals;
        let callee_locals = (callee_code.max_locals as u32).max(parameter_length);
        if variable_offset + callee_locals > u16::MAX as u32 {
            return self.reject(&callee, Rejection::TooManyLocals);
        }

        self.estimated_length = resulting_length;
        self.max_locals = self.max_locals.max(variable_offset + callee_locals);
        self.composer.append_label(site.offset)?;
        self.inline_body(
            site,
            callee_class,
            callee_method,
            callee_code,
            &callee,
            &descriptor,
            variable_offset,
        )
        .map_err(|cause| Error::Inlining {
            caller: self.target.clone(),
            callee: callee.clone(),
            cause: Box::new(cause),
        })?;

        self.call_sites += 1;
        if !site.nesting.is_inlining() {
            self.call_offsets.push(site.offset);
        }
        log::trace!(
            "Inlined {} into {} at offset {} (depth {})",
            callee,
            self.target,
            site.offset,
            site.nesting.depth()
        );
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn inline_body(
        &mut self,
        site: &CallSite<'_, 'p>,
        callee_class: &'p ProgramClass,
        callee_method: &'p ProgramMethod,
        callee_code: &'p CodeAttribute,
        callee: &MethodRef,
        descriptor: &MethodDescriptor,
        variable_offset: u32,
    ) -> Result<(), Error> {
        // Arguments are on the stack with the last one on top, so they are stored in reverse
        let mut preamble = vec![];
        let mut slot = descriptor.parameter_length(!callee_method.is_static()) as u32;
        for parameter in descriptor.parameters.iter().rev() {
            slot -= parameter.width() as u32;
            let index = (variable_offset + slot) as u16;
            preamble.push(Instruction::variable(store_opcode(parameter), index));
        }
        if !callee_method.is_static() {
            preamble.push(Instruction::variable(ASTORE, variable_offset as u16));
        }
        self.composer.begin_fragment();
        for (position, instruction) in preamble.into_iter().enumerate() {
            self.composer
                .append_instruction(position as u32, instruction)?;
        }
        self.composer.end_fragment()?;

        let instructions = decode_all(&callee_code.code)?;
        let stack = StackEffectAnalyzer::new(&callee_class.constants)
            .analyze(&instructions, &callee_code.exception_table)?;
        let nesting = Nesting::Inlining {
            method: callee,
            parent: site.nesting,
        };
        let body = Body {
            nesting: &nesting,
            class: callee_class,
            code: callee_code,
            stack,
            variable_offset,
            covered_by_catch_all: site.covered_by_catch_all,
            last_offset: instructions.last().map(|(offset, _)| *offset),
        };

        let (low, high) = callee_code.own_line_range().unwrap_or((0, 0));
        let source = format!("{}:{}:{}", callee, low, high);

        self.composer.begin_fragment();
        self.composer.insert_line_number(LineNumberEntry {
            start_pc: 0,
            line: LineNumber::Enter,
            source: Some(source.clone()),
        })?;
        self.copy_body(&body, &instructions, Some(&source))?;
        self.composer.insert_line_number(LineNumberEntry {
            start_pc: callee_code.code_length(),
            line: LineNumber::Exit,
            source: None,
        })?;
        self.composer.end_fragment()?;
        Ok(())
    }

    /// Lay out the new code and fill in the rest of the code attribute
    ///
    /// Returns `None` if the result ended up too long after all.
    fn finish(self, code: &CodeAttribute) -> Result<Option<SplicedMethod>, Error> {
        let composed = match self.composer.compose() {
            Ok(composed) => composed,
            Err(jvm::Error::MethodCodeOverflow(length)) => {
                log::debug!(
                    "Not inlining into {}, code would be {} bytes long",
                    self.target,
                    length
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let length = composed.code.len() as u32;
        if length > self.settings.max_resulting_code_length {
            log::debug!(
                "Not inlining into {}, code would be {} bytes long",
                self.target,
                length
            );
            return Ok(None);
        }

        let instructions = decode_all(&composed.code)?;
        let stack = StackEffectAnalyzer::new(&self.constants)
            .analyze(&instructions, &composed.exception_table)?;
        stack.check_consistent()?;
        let max_stack = stack.max_stack.max(code.max_stack as u32);
        let max_stack = u16::try_from(max_stack)
            .map_err(|_| jvm::Error::MethodCodeMaxStackOverflow(max_stack as usize))?;
        let max_locals = u16::try_from(self.max_locals)
            .map_err(|_| jvm::Error::MethodCodeMaxLocalsOverflow(self.max_locals as usize))?;

        let mut line_numbers = composed.line_numbers;
        if code.line_numbers.is_empty() && !line_numbers.is_empty() {
            line_numbers.insert(0, LineNumberEntry::line(0, 0));
        }

        let (dropped, attributes): (Vec<_>, Vec<_>) =
            code.attributes.iter().cloned().partition(|attribute| {
                CodeAttribute::OFFSET_DEPENDENT_ATTRIBUTES.contains(&attribute.name.as_str())
            });
        for attribute in &dropped {
            log::debug!("Dropping {} of {}", attribute.name, self.target);
        }

        Ok(Some(SplicedMethod {
            code: CodeAttribute {
                max_stack,
                max_locals,
                code: composed.code,
                exception_table: composed.exception_table,
                line_numbers,
                attributes,
            },
            constants: self.constants,
            call_sites: self.call_sites,
            call_offsets: self.call_offsets,
        }))
    }
}
