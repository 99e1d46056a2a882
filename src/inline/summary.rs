//! Facts about method bodies, computed once for the whole program
//!
//! The inliner never inspects the bodies of candidate methods while deciding whether to inline
//! them. Instead, every method with code is summarized upfront into a [`MethodSummary`] and those
//! summaries are looked up by [`MethodRef`]. When the inliner rewrites a method, only that
//! method's summary is recomputed.

use super::{Error, Settings, StackEffectAnalyzer};
use crate::jvm::code::opcodes::*;
use crate::jvm::code::{decode_all, CodeAttribute, Instruction};
use crate::jvm::{
    ClassPool, Constant, ConstantPool, FieldAccessFlags, MemberKind, MethodRef, ProgramClass,
    Visibility,
};
use bitflags::bitflags;
use std::collections::{HashMap, HashSet};

bitflags! {
    /// What a method body does that can make inlining it unsafe
    pub struct CodeFacts: u32 {
        /// References a private field or method
        const ACCESSES_PRIVATE = 0x0001;

        /// References a package-private class, field, or method
        const ACCESSES_PACKAGE = 0x0002;

        /// References a protected field or method
        const ACCESSES_PROTECTED = 0x0004;

        /// Calls a superclass method through `invokespecial`
        const INVOKES_SUPER = 0x0008;

        /// Uses `invokedynamic` or loads a dynamically-computed constant
        const INVOKES_DYNAMIC = 0x0010;

        /// Contains `monitorenter`
        const SYNCHRONIZED_BLOCK = 0x0020;

        /// Has a non-empty exception table
        const CATCHES_EXCEPTIONS = 0x0040;

        /// Some return leaves values on the stack besides the returned one
        const RETURNS_WITH_NON_EMPTY_STACK = 0x0080;

        /// Writes to a `final` field
        const ASSIGNS_FINAL_FIELD = 0x0100;

        /// Has a jump to an earlier offset
        const BACKWARD_BRANCH = 0x0200;

        /// Jumps backwards while an object it created is not yet initialized
        const BACKWARD_BRANCH_WITH_UNINITIALIZED = 0x0400;

        /// Code could not be decoded or analyzed
        const MALFORMED = 0x0800;
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MethodSummary {
    pub facts: CodeFacts,
    pub code_length: u32,
}

impl MethodSummary {
    pub fn has(&self, facts: CodeFacts) -> bool {
        self.facts.intersects(facts)
    }
}

/// Read-only view of the whole program used to decide what can be inlined
#[derive(Debug, Default)]
pub struct ProgramInfo {
    summaries: HashMap<MethodRef, MethodSummary>,

    /// Methods which must be left as they are (eg. entry points or reflectively used methods)
    kept: HashSet<MethodRef>,

    /// Program classes whose static initialization (or that of a superclass) may have side
    /// effects
    classes_with_initializer_side_effects: HashSet<String>,

    /// Number of call sites in the program resolving to each method
    invocation_counts: HashMap<MethodRef, u32>,
}

impl ProgramInfo {
    pub fn analyze(
        pool: &ClassPool,
        kept: impl IntoIterator<Item = MethodRef>,
        settings: &Settings,
    ) -> ProgramInfo {
        let mut info = ProgramInfo {
            kept: kept.into_iter().collect(),
            ..ProgramInfo::default()
        };

        for class in pool.classes() {
            let initializes_with_side_effects = |class: &ProgramClass| {
                class.has_class_initializer()
                    && !settings.side_effect_free_classes.contains(&class.name)
            };
            if std::iter::once(class)
                .chain(pool.superclasses(&class.name))
                .any(initializes_with_side_effects)
            {
                info.classes_with_initializer_side_effects
                    .insert(class.name.clone());
            }

            for method in &class.methods {
                let code = match &method.code {
                    Some(code) => code,
                    None => continue,
                };
                info.summaries
                    .insert(class.method_ref(method), summarize(pool, class, code));
                info.count_invocations(pool, class, code);
            }
        }

        log::debug!(
            "Summarized {} methods in {} classes",
            info.summaries.len(),
            pool.len()
        );
        info
    }

    fn count_invocations(&mut self, pool: &ClassPool, class: &ProgramClass, code: &CodeAttribute) {
        let instructions = match decode_all(&code.code) {
            Ok(instructions) => instructions,
            Err(_) => return,
        };
        for (_, instruction) in instructions {
            if let Some(callee) = resolve_invocation(pool, &class.constants, &instruction) {
                *self.invocation_counts.entry(callee).or_insert(0) += 1;
            }
        }
    }

    /// Recompute the summary of a method after its code has changed
    pub fn update_summary(&mut self, pool: &ClassPool, method: &MethodRef) {
        let summary = pool.method(method).and_then(|(class, found)| {
            let code = found.code.as_ref()?;
            Some(summarize(pool, class, code))
        });
        match summary {
            Some(summary) => {
                self.summaries.insert(method.clone(), summary);
            }
            None => {
                self.summaries.remove(method);
            }
        }
    }

    /// Summary of a method (absent for methods outside the pool or without code)
    pub fn summary(&self, method: &MethodRef) -> Option<&MethodSummary> {
        self.summaries.get(method)
    }

    pub fn is_kept(&self, method: &MethodRef) -> bool {
        self.kept.contains(method)
    }

    /// Can the static initialization of this class be triggered from anywhere without changing
    /// what the program does?
    ///
    /// Classes outside of the program are assumed to qualify.
    pub fn has_side_effect_free_initialization(&self, class_name: &str) -> bool {
        !self
            .classes_with_initializer_side_effects
            .contains(class_name)
    }

    pub fn invocation_count(&self, method: &MethodRef) -> u32 {
        self.invocation_counts.get(method).copied().unwrap_or(0)
    }
}

/// Method called by an invoke instruction, if it is in the pool
///
/// `invokedynamic` never resolves to a program method.
pub fn resolve_invocation(
    pool: &ClassPool,
    constants: &ConstantPool,
    instruction: &Instruction,
) -> Option<MethodRef> {
    match instruction {
        Instruction::Constant {
            opcode: INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE,
            index,
            ..
        } => {
            let member = constants.member_ref(*index).ok()?;
            let (class, method) =
                pool.resolve_method(member.class, member.name, member.descriptor)?;
            Some(class.method_ref(method))
        }
        _ => None,
    }
}

/// Class named by a `Class` constant, with array types reduced to their element class
///
/// Arrays of primitives do not name any class.
pub fn element_class_name(name: &str) -> Option<&str> {
    let element = name.trim_start_matches('[');
    if element.len() == name.len() {
        Some(name)
    } else {
        element.strip_prefix('L')?.strip_suffix(';')
    }
}

/// Summarize a method body, in the context of the class declaring it
pub fn summarize(pool: &ClassPool, class: &ProgramClass, code: &CodeAttribute) -> MethodSummary {
    let code_length = code.code_length();
    match summarize_facts(pool, class, code) {
        Ok(facts) => MethodSummary { facts, code_length },
        Err(err) => {
            log::warn!(
                "Malformed code in {} ({} bytes): {:?}",
                class.name,
                code_length,
                err
            );
            MethodSummary {
                facts: CodeFacts::MALFORMED,
                code_length,
            }
        }
    }
}

fn summarize_facts(
    pool: &ClassPool,
    class: &ProgramClass,
    code: &CodeAttribute,
) -> Result<CodeFacts, Error> {
    let constants = &class.constants;
    let instructions = decode_all(&code.code)?;
    let stack = StackEffectAnalyzer::new(constants).analyze(&instructions, &code.exception_table)?;
    stack.check_consistent()?;
    check_anchors(&instructions, code)?;

    let mut facts = CodeFacts::empty();
    if !code.exception_table.is_empty() {
        facts |= CodeFacts::CATCHES_EXCEPTIONS;
    }

    let mut uninitialized: u32 = 0;
    for (offset, instruction) in &instructions {
        match instruction {
            Instruction::Simple {
                opcode: MONITORENTER,
                ..
            } => facts |= CodeFacts::SYNCHRONIZED_BLOCK,

            Instruction::Simple { .. } if instruction.is_return() => {
                if let Some(before) = stack.before(*offset) {
                    if before != instruction.stack_pop_count(constants)? {
                        facts |= CodeFacts::RETURNS_WITH_NON_EMPTY_STACK;
                    }
                }
            }

            Instruction::Branch { .. } | Instruction::Switch { .. } => {
                if instruction.jump_offsets().iter().any(|jump| *jump < 0) {
                    facts |= CodeFacts::BACKWARD_BRANCH;
                    if uninitialized > 0 {
                        facts |= CodeFacts::BACKWARD_BRANCH_WITH_UNINITIALIZED;
                    }
                }
            }

            Instruction::Constant { opcode, index, .. } => {
                facts |= constant_facts(pool, constants, *opcode, *index)?;
                if *opcode == NEW {
                    uninitialized += 1;
                } else if *opcode == INVOKESPECIAL && constants.member_ref(*index)?.name == "<init>"
                {
                    uninitialized = uninitialized.saturating_sub(1);
                }
            }

            _ => (),
        }
    }
    Ok(facts)
}

/// Exception ranges and line numbers must start at instructions, otherwise they cannot be
/// relocated
pub(super) fn check_anchors(
    instructions: &[(u32, Instruction)],
    code: &CodeAttribute,
) -> Result<(), Error> {
    let mut anchors: HashSet<u32> = instructions.iter().map(|(offset, _)| *offset).collect();
    anchors.insert(code.code_length());

    let offsets = code
        .exception_table
        .iter()
        .flat_map(|range| [range.start_pc, range.end_pc, range.handler_pc])
        .chain(code.line_numbers.iter().map(|entry| entry.start_pc));
    for offset in offsets {
        if !anchors.contains(&offset) {
            return Err(Error::InvalidJumpTarget {
                offset,
                target: offset as i64,
            });
        }
    }
    Ok(())
}

/// Facts implied by an instruction referencing the constant pool
fn constant_facts(
    pool: &ClassPool,
    constants: &ConstantPool,
    opcode: u8,
    index: u16,
) -> Result<CodeFacts, Error> {
    let mut facts = CodeFacts::empty();
    match opcode {
        INVOKEDYNAMIC => facts |= CodeFacts::INVOKES_DYNAMIC,

        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
            let member = constants.member_ref(index)?;
            facts |= class_access(pool, member.class);
            if let Some((owner, field)) =
                pool.resolve_field(member.class, member.name, member.descriptor)
            {
                facts |= member_access(field.access_flags.visibility());
                facts |= class_access(pool, &owner.name);
                let is_write = matches!(opcode, PUTSTATIC | PUTFIELD);
                if is_write && field.access_flags.contains(FieldAccessFlags::FINAL) {
                    facts |= CodeFacts::ASSIGNS_FINAL_FIELD;
                }
            }
        }

        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
            let member = constants.member_ref(index)?;
            facts |= class_access(pool, member.class);
            let resolved = match member.kind {
                MemberKind::Field => None,
                MemberKind::Method | MemberKind::InterfaceMethod => {
                    pool.resolve_method(member.class, member.name, member.descriptor)
                }
            };
            let is_private = match resolved {
                Some((owner, method)) => {
                    facts |= member_access(method.access_flags.visibility());
                    facts |= class_access(pool, &owner.name);
                    method.access_flags.visibility() == Visibility::Private
                }
                None => false,
            };
            if opcode == INVOKESPECIAL && member.name != "<init>" && !is_private {
                facts |= CodeFacts::INVOKES_SUPER;
            }
        }

        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF | MULTIANEWARRAY => {
            facts |= class_access(pool, constants.class_name(index)?);
        }

        LDC | LDC_W | LDC2_W => match constants.get(index)? {
            Constant::Class(_) => facts |= class_access(pool, constants.class_name(index)?),
            Constant::Dynamic { .. } => facts |= CodeFacts::INVOKES_DYNAMIC,
            _ => (),
        },

        _ => (),
    }
    Ok(facts)
}

fn member_access(visibility: Visibility) -> CodeFacts {
    match visibility {
        Visibility::Private => CodeFacts::ACCESSES_PRIVATE,
        Visibility::Package => CodeFacts::ACCESSES_PACKAGE,
        Visibility::Protected => CodeFacts::ACCESSES_PROTECTED,
        Visibility::Public => CodeFacts::empty(),
    }
}

fn class_access(pool: &ClassPool, class_name: &str) -> CodeFacts {
    let class = element_class_name(class_name).and_then(|name| pool.get(name));
    match class {
        Some(class) if class.access_flags.visibility() == Visibility::Package => {
            CodeFacts::ACCESSES_PACKAGE
        }
        _ => CodeFacts::empty(),
    }
}

#[cfg(test)]
mod summary_tests {
    use super::*;
    use crate::jvm::code::{encode_all, LineNumberEntry};
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags, ProgramField, ProgramMethod, Version};

    fn method(name: &str, descriptor: &str, code: Option<CodeAttribute>) -> ProgramMethod {
        ProgramMethod {
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            code,
        }
    }

    fn code(instructions: &[Instruction]) -> CodeAttribute {
        CodeAttribute {
            max_stack: 4,
            max_locals: 4,
            code: encode_all(instructions).unwrap(),
            exception_table: vec![],
            line_numbers: vec![],
            attributes: vec![],
        }
    }

    fn summarize_in(
        class: &ProgramClass,
        pool: &ClassPool,
        instructions: &[Instruction],
    ) -> CodeFacts {
        summarize(pool, class, &code(instructions)).facts
    }

    #[test]
    fn member_accesses() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut pool = ClassPool::new();
        let mut class = ProgramClass::new("p/A", Some("java/lang/Object"), Version::JAVA8);
        class.fields.push(ProgramField {
            access_flags: FieldAccessFlags::PRIVATE | FieldAccessFlags::FINAL,
            name: String::from("secret"),
            descriptor: String::from("I"),
        });
        let mut helper = method("helper", "()V", None);
        helper.access_flags = MethodAccessFlags::STATIC;
        class.methods.push(helper);
        let field = class.constants.get_field_ref("p/A", "secret", "I").unwrap();
        let helper = class.constants.get_method_ref("p/A", "helper", "()V", false).unwrap();
        let outside = class
            .constants
            .get_method_ref("java/lang/Math", "abs", "(I)I", false)
            .unwrap();
        pool.insert(class.clone());

        let facts = summarize_in(
            &class,
            &pool,
            &[
                Instruction::constant(GETSTATIC, field),
                Instruction::constant(INVOKESTATIC, outside),
                Instruction::constant(PUTSTATIC, field),
                Instruction::constant(INVOKESTATIC, helper),
                Instruction::simple(RETURN),
            ],
        );
        assert_eq!(
            facts,
            CodeFacts::ACCESSES_PRIVATE
                | CodeFacts::ACCESSES_PACKAGE
                | CodeFacts::ASSIGNS_FINAL_FIELD
        );
    }

    #[test]
    fn package_private_classes() {
        let mut pool = ClassPool::new();
        let mut hidden = ProgramClass::new("p/Hidden", Some("java/lang/Object"), Version::JAVA8);
        hidden.access_flags = ClassAccessFlags::SUPER;
        pool.insert(hidden);
        let mut class = ProgramClass::new("p/A", Some("java/lang/Object"), Version::JAVA8);
        let array = class.constants.get_class("[[Lp/Hidden;").unwrap();
        pool.insert(class.clone());

        let facts = summarize_in(
            &class,
            &pool,
            &[
                Instruction::simple(ACONST_NULL),
                Instruction::constant(CHECKCAST, array),
                Instruction::simple(ARETURN),
            ],
        );
        assert_eq!(facts, CodeFacts::ACCESSES_PACKAGE);
    }

    #[test]
    fn control_flow_facts() {
        let pool = ClassPool::new();
        let mut class = ProgramClass::new("p/A", Some("java/lang/Object"), Version::JAVA8);
        let object = class.constants.get_class("java/lang/Object").unwrap();
        let init = class
            .constants
            .get_method_ref("java/lang/Object", "<init>", "()V", false)
            .unwrap();

        // Loop before the `new` object is initialized
        let facts = summarize_in(
            &class,
            &pool,
            &[
                Instruction::constant(NEW, object),
                Instruction::simple(DUP),
                Instruction::variable(ILOAD, 0),
                Instruction::branch(IFNE, -1),
                Instruction::constant(INVOKESPECIAL, init),
                Instruction::simple(ARETURN),
            ],
        );
        assert_eq!(
            facts,
            CodeFacts::BACKWARD_BRANCH | CodeFacts::BACKWARD_BRANCH_WITH_UNINITIALIZED
        );

        // Same loop once the object is initialized
        let facts = summarize_in(
            &class,
            &pool,
            &[
                Instruction::constant(NEW, object),
                Instruction::simple(DUP),
                Instruction::constant(INVOKESPECIAL, init),
                Instruction::variable(ILOAD, 0),
                Instruction::branch(IFNE, -1),
                Instruction::simple(ARETURN),
            ],
        );
        assert_eq!(facts, CodeFacts::BACKWARD_BRANCH);

        let facts = summarize_in(
            &class,
            &pool,
            &[
                Instruction::simple(ICONST_1),
                Instruction::simple(ICONST_2),
                Instruction::simple(IRETURN),
            ],
        );
        assert_eq!(facts, CodeFacts::RETURNS_WITH_NON_EMPTY_STACK);

        let facts = summarize_in(&class, &pool, &[Instruction::simple(POP)]);
        assert_eq!(facts, CodeFacts::MALFORMED);
    }

    #[test]
    fn dynamic_constants() {
        let pool = ClassPool::new();
        let mut class = ProgramClass::new("p/A", Some("java/lang/Object"), Version::JAVA11);
        let name_and_type = class.constants.get_name_and_type("value", "I").unwrap();
        let dynamic = class
            .constants
            .push(Constant::Dynamic {
                bootstrap_method: 7,
                name_and_type,
            })
            .unwrap();

        let facts = summarize_in(
            &class,
            &pool,
            &[Instruction::constant(LDC, dynamic), Instruction::simple(IRETURN)],
        );
        assert_eq!(facts, CodeFacts::INVOKES_DYNAMIC);
    }

    #[test]
    fn entries_off_instruction_boundaries() {
        let _ = env_logger::builder().is_test(true).try_init();
        let pool = ClassPool::new();
        let class = ProgramClass::new("p/A", Some("java/lang/Object"), Version::JAVA8);

        // `wide iload` is four bytes long
        let mut body = code(&[
            Instruction::variable(ILOAD, 300),
            Instruction::simple(IRETURN),
        ]);
        body.line_numbers = vec![LineNumberEntry::line(0, 8), LineNumberEntry::line(4, 9)];
        assert_eq!(summarize(&pool, &class, &body).facts, CodeFacts::empty());

        body.line_numbers.push(LineNumberEntry::line(1, 10));
        assert_eq!(summarize(&pool, &class, &body).facts, CodeFacts::MALFORMED);
    }

    #[test]
    fn program_info() {
        let mut pool = ClassPool::new();
        let mut noisy = ProgramClass::new("p/Noisy", Some("java/lang/Object"), Version::JAVA8);
        noisy
            .methods
            .push(method("<clinit>", "()V", Some(code(&[Instruction::simple(RETURN)]))));
        pool.insert(noisy);
        pool.insert(ProgramClass::new("p/Child", Some("p/Noisy"), Version::JAVA8));

        let mut caller = ProgramClass::new("p/Caller", Some("java/lang/Object"), Version::JAVA8);
        let target = caller
            .constants
            .get_method_ref("p/Caller", "target", "()V", false)
            .unwrap();
        let calls = code(&[
            Instruction::constant(INVOKESTATIC, target),
            Instruction::constant(INVOKESTATIC, target),
            Instruction::simple(RETURN),
        ]);
        caller.methods.push(method("run", "()V", Some(calls)));
        caller
            .methods
            .push(method("target", "()V", Some(code(&[Instruction::simple(RETURN)]))));
        pool.insert(caller);

        let run = MethodRef::new("p/Caller", "run", "()V");
        let target = MethodRef::new("p/Caller", "target", "()V");
        let mut settings = Settings::new();
        let info = ProgramInfo::analyze(&pool, vec![run.clone()], &settings);
        assert!(info.is_kept(&run));
        assert!(!info.is_kept(&target));
        assert_eq!(info.invocation_count(&target), 2);
        assert_eq!(info.invocation_count(&run), 0);
        assert_eq!(info.summary(&target).unwrap().code_length, 1);
        assert!(!info.has_side_effect_free_initialization("p/Noisy"));
        assert!(!info.has_side_effect_free_initialization("p/Child"));
        assert!(info.has_side_effect_free_initialization("p/Caller"));
        assert!(info.has_side_effect_free_initialization("java/lang/String"));

        settings
            .side_effect_free_classes
            .insert(String::from("p/Noisy"));
        let info = ProgramInfo::analyze(&pool, vec![], &settings);
        assert!(info.has_side_effect_free_initialization("p/Child"));
    }

    #[test]
    fn element_classes() {
        assert_eq!(element_class_name("p/A"), Some("p/A"));
        assert_eq!(element_class_name("[[Lp/A;"), Some("p/A"));
        assert_eq!(element_class_name("[I"), None);
    }
}
