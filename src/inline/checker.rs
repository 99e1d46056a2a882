use super::{CodeFacts, ProgramInfo, Settings};
use crate::jvm::code::opcodes::INVOKESTATIC;
use crate::jvm::{ClassPool, MethodAccessFlags, MethodRef, ProgramClass, ProgramMethod};

/// One call site which could be replaced by the body of the method it calls
///
/// The consuming method is always the method whose code is being rewritten, even when the call
/// site itself comes from a body that is already being inlined into it.
pub struct InlineCandidate<'a> {
    pub consuming_class: &'a ProgramClass,
    pub consuming_method: &'a ProgramMethod,
    pub callee_class: &'a ProgramClass,
    pub callee_method: &'a ProgramMethod,

    /// Invoke instruction of the call site
    pub invoke_opcode: u8,

    /// Offset of the call site, in the code the call site comes from
    pub call_offset: u32,

    /// Operand stack size just before the call
    pub stack_depth_before: u32,
}

/// Where the inliner is while visiting code
///
/// Each level of inlining borrows its parent, so the whole chain of methods being inlined is
/// available without any shared mutable state.
#[derive(Copy, Clone, Debug)]
pub enum Nesting<'a> {
    /// Copying the body of the method being rewritten
    TopLevel,

    /// Copying the body of `method`, which is itself being inlined
    Inlining {
        method: &'a MethodRef,
        parent: &'a Nesting<'a>,
    },
}

impl<'a> Nesting<'a> {
    pub fn is_inlining(&self) -> bool {
        matches!(self, Nesting::Inlining { .. })
    }

    /// Is the method already being inlined somewhere up the chain?
    pub fn contains(&self, method: &MethodRef) -> bool {
        let mut current = self;
        while let Nesting::Inlining {
            method: inlining,
            parent,
        } = current
        {
            if *inlining == method {
                return true;
            }
            current = *parent;
        }
        false
    }

    pub fn depth(&self) -> usize {
        match self {
            Nesting::TopLevel => 0,
            Nesting::Inlining { parent, .. } => 1 + parent.depth(),
        }
    }
}

/// Context of a call site that is not a property of the callee
#[derive(Copy, Clone, Debug)]
pub struct InliningContext<'a> {
    pub nesting: &'a Nesting<'a>,

    /// Is the operand stack empty once the call returns? Always false while inlining.
    pub empty_invoking_stack: bool,

    /// Is every exception handler covering the call site a catch-all handler?
    pub covered_by_catch_all: bool,

    /// Objects created with `new` but not yet initialized, at the call site
    pub uninitialized_objects: u32,
}

/// Reason a call site was not inlined
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Rejection {
    /// Callee can be overridden, so the call might not end up in its body
    VirtuallyDispatched,
    InterfaceMember,
    Synchronized,

    /// Native or abstract callee (or any other callee without code)
    NoCode,
    Constructor,
    SelfInlining,
    Recursive,

    /// Callee's class file is more recent than the consuming class file
    NewerClassVersion,
    Kept,
    SuperOrDynamicInvocation,
    BackwardBranchWithUninitialized,
    PrivateAccess,
    PackageAccess,

    /// Private members would be accessed from a subclass of their class
    PrivateAccessInSubclass,
    ProtectedAccess,
    SynchronizedBlock,
    AssignsFinalField,
    CatchesWithNonEmptyStack,
    ReturnsWithNonEmptyStack,
    ClassInitializerSideEffects,

    /// Callee code could not be analyzed
    MalformedCode,

    /// Invoke instruction does not match the callee (eg. `invokestatic` on an instance method)
    InvokeMismatch,

    /// Result would not fit in the code length budget
    ResultTooLong,

    /// Local variables of the inlined body would not fit in 16-bit slot indices
    TooManyLocals,

    /// Rejected by the inlining policy
    Policy,
}

/// Decides which call sites may be inlined without changing what the program does
///
/// This is only a necessary condition: the inlining policy then decides which of the allowed call
/// sites are worth inlining.
pub struct InlineabilityChecker<'a> {
    pool: &'a ClassPool,
    program: &'a ProgramInfo,
    settings: &'a Settings,
}

impl<'a> InlineabilityChecker<'a> {
    pub fn new(
        pool: &'a ClassPool,
        program: &'a ProgramInfo,
        settings: &'a Settings,
    ) -> InlineabilityChecker<'a> {
        InlineabilityChecker {
            pool,
            program,
            settings,
        }
    }

    pub fn should_attempt_inline(
        &self,
        candidate: &InlineCandidate,
        context: &InliningContext,
    ) -> bool {
        match self.check(candidate, context) {
            Ok(()) => true,
            Err(rejection) => {
                log::trace!(
                    "Not inlining {} into {}: {:?}",
                    candidate.callee_class.method_ref(candidate.callee_method),
                    candidate
                        .consuming_class
                        .method_ref(candidate.consuming_method),
                    rejection
                );
                false
            }
        }
    }

    /// Run through all of the conditions in order, stopping at the first one that fails
    pub fn check(
        &self,
        candidate: &InlineCandidate,
        context: &InliningContext,
    ) -> Result<(), Rejection> {
        let consuming_class = candidate.consuming_class;
        let callee_class = candidate.callee_class;
        let callee_method = candidate.callee_method;
        let callee = callee_class.method_ref(callee_method);
        let consuming = consuming_class.method_ref(candidate.consuming_method);
        let same_class = consuming_class.name == callee_class.name;
        let flags = callee_method.access_flags;

        let dispatch_free =
            MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC | MethodAccessFlags::FINAL;
        if !flags.intersects(dispatch_free) {
            return Err(Rejection::VirtuallyDispatched);
        }
        if callee_class.is_interface() {
            return Err(Rejection::InterfaceMember);
        }
        if (candidate.invoke_opcode == INVOKESTATIC) != callee_method.is_static() {
            return Err(Rejection::InvokeMismatch);
        }

        if flags.contains(MethodAccessFlags::SYNCHRONIZED) {
            return Err(Rejection::Synchronized);
        }
        let summary = match self.program.summary(&callee) {
            Some(summary)
                if callee_method.code.is_some()
                    && !flags.intersects(MethodAccessFlags::NATIVE | MethodAccessFlags::ABSTRACT) =>
            {
                summary
            }
            _ => return Err(Rejection::NoCode),
        };
        if summary.has(CodeFacts::MALFORMED) {
            return Err(Rejection::MalformedCode);
        }

        if callee_method.is_constructor() || callee_method.is_class_initializer() {
            return Err(Rejection::Constructor);
        }
        if callee == consuming {
            return Err(Rejection::SelfInlining);
        }
        if context.nesting.contains(&callee) {
            return Err(Rejection::Recursive);
        }
        if callee_class.version > consuming_class.version {
            return Err(Rejection::NewerClassVersion);
        }
        if self.program.is_kept(&callee) {
            return Err(Rejection::Kept);
        }
        if !same_class && summary.has(CodeFacts::INVOKES_SUPER | CodeFacts::INVOKES_DYNAMIC) {
            return Err(Rejection::SuperOrDynamicInvocation);
        }

        let branches_back_while_uninitialized = (context.uninitialized_objects > 0
            && summary.has(CodeFacts::BACKWARD_BRANCH))
            || summary.has(CodeFacts::BACKWARD_BRANCH_WITH_UNINITIALIZED);
        if branches_back_while_uninitialized {
            return Err(Rejection::BackwardBranchWithUninitialized);
        }

        let accesses_private = summary.has(CodeFacts::ACCESSES_PRIVATE);
        if !self.settings.allow_access_modification {
            if accesses_private && !same_class {
                return Err(Rejection::PrivateAccess);
            }
            if summary.has(CodeFacts::ACCESSES_PACKAGE)
                && consuming_class.package() != callee_class.package()
            {
                return Err(Rejection::PackageAccess);
            }
        }
        if accesses_private
            && self
                .pool
                .is_subclass_of(&consuming_class.name, &callee_class.name)
        {
            return Err(Rejection::PrivateAccessInSubclass);
        }
        if !same_class && summary.has(CodeFacts::ACCESSES_PROTECTED) {
            return Err(Rejection::ProtectedAccess);
        }

        if summary.has(CodeFacts::SYNCHRONIZED_BLOCK) && !context.covered_by_catch_all {
            return Err(Rejection::SynchronizedBlock);
        }
        if summary.has(CodeFacts::ASSIGNS_FINAL_FIELD) {
            return Err(Rejection::AssignsFinalField);
        }
        if summary.has(CodeFacts::CATCHES_EXCEPTIONS) && !context.empty_invoking_stack {
            return Err(Rejection::CatchesWithNonEmptyStack);
        }
        if summary.has(CodeFacts::RETURNS_WITH_NON_EMPTY_STACK) {
            return Err(Rejection::ReturnsWithNonEmptyStack);
        }
        if !same_class
            && !self
                .program
                .has_side_effect_free_initialization(&callee_class.name)
        {
            return Err(Rejection::ClassInitializerSideEffects);
        }

        Ok(())
    }
}

#[cfg(test)]
mod checker_tests {
    use super::*;
    use crate::jvm::code::encode_all;
    use crate::jvm::code::opcodes::*;
    use crate::jvm::code::{CodeAttribute, ExceptionRange, Instruction};
    use crate::jvm::{ClassAccessFlags, Version};

    fn code(instructions: &[Instruction]) -> CodeAttribute {
        CodeAttribute {
            max_stack: 2,
            max_locals: 2,
            code: encode_all(instructions).unwrap(),
            exception_table: vec![],
            line_numbers: vec![],
            attributes: vec![],
        }
    }

    fn static_method(name: &str, code: CodeAttribute) -> ProgramMethod {
        ProgramMethod {
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name: name.to_owned(),
            descriptor: String::from("()V"),
            code: Some(code),
        }
    }

    struct Fixture {
        pool: ClassPool,
        settings: Settings,
    }

    impl Fixture {
        fn new() -> Fixture {
            let _ = env_logger::builder().is_test(true).try_init();
            let mut pool = ClassPool::new();
            let mut caller =
                ProgramClass::new("p/Caller", Some("java/lang/Object"), Version::JAVA8);
            caller
                .methods
                .push(static_method("run", code(&[Instruction::simple(RETURN)])));
            pool.insert(caller);
            pool.insert(ProgramClass::new("p/Callee", Some("java/lang/Object"), Version::JAVA8));
            Fixture {
                pool,
                settings: Settings::new(),
            }
        }

        fn add_callee(&mut self, class_name: &str, method: ProgramMethod) {
            self.pool
                .get_mut(class_name)
                .unwrap()
                .methods
                .push(method);
        }

        fn check_with(
            &self,
            class_name: &str,
            method_name: &str,
            context: &InliningContext,
        ) -> Result<(), Rejection> {
            let program = ProgramInfo::analyze(&self.pool, vec![], &self.settings);
            let checker = InlineabilityChecker::new(&self.pool, &program, &self.settings);
            let consuming_class = self.pool.get("p/Caller").unwrap();
            let callee_class = self.pool.get(class_name).unwrap();
            let callee_method = callee_class.find_method(method_name, "()V").unwrap();
            let candidate = InlineCandidate {
                consuming_class,
                consuming_method: consuming_class.find_method("run", "()V").unwrap(),
                callee_class,
                callee_method,
                invoke_opcode: if callee_method.is_static() {
                    INVOKESTATIC
                } else {
                    INVOKEVIRTUAL
                },
                call_offset: 0,
                stack_depth_before: 0,
            };
            checker.check(&candidate, context)
        }

        fn check(&self, class_name: &str, method_name: &str) -> Result<(), Rejection> {
            let context = InliningContext {
                nesting: &Nesting::TopLevel,
                empty_invoking_stack: true,
                covered_by_catch_all: true,
                uninitialized_objects: 0,
            };
            self.check_with(class_name, method_name, &context)
        }
    }

    #[test]
    fn simple_static_method_passes() {
        let mut fixture = Fixture::new();
        fixture.add_callee("p/Callee", static_method("f", code(&[Instruction::simple(RETURN)])));
        assert_eq!(fixture.check("p/Callee", "f"), Ok(()));
    }

    #[test]
    fn method_flags() {
        let mut fixture = Fixture::new();
        let mut virtual_method = static_method("virtual", code(&[Instruction::simple(RETURN)]));
        virtual_method.access_flags = MethodAccessFlags::PUBLIC;
        fixture.add_callee("p/Callee", virtual_method);
        let mut synchronized = static_method("synchronized", code(&[Instruction::simple(RETURN)]));
        synchronized.access_flags |= MethodAccessFlags::SYNCHRONIZED;
        fixture.add_callee("p/Callee", synchronized);
        let mut native = static_method("native", code(&[]));
        native.access_flags |= MethodAccessFlags::NATIVE;
        native.code = None;
        fixture.add_callee("p/Callee", native);

        assert_eq!(
            fixture.check("p/Callee", "virtual"),
            Err(Rejection::VirtuallyDispatched)
        );
        assert_eq!(
            fixture.check("p/Callee", "synchronized"),
            Err(Rejection::Synchronized)
        );
        assert_eq!(fixture.check("p/Callee", "native"), Err(Rejection::NoCode));
    }

    #[test]
    fn self_and_recursive_inlining() {
        let mut fixture = Fixture::new();
        fixture.add_callee("p/Callee", static_method("f", code(&[Instruction::simple(RETURN)])));
        assert_eq!(fixture.check("p/Caller", "run"), Err(Rejection::SelfInlining));

        let f = MethodRef::new("p/Callee", "f", "()V");
        let nesting = Nesting::Inlining {
            method: &f,
            parent: &Nesting::TopLevel,
        };
        let context = InliningContext {
            nesting: &nesting,
            empty_invoking_stack: false,
            covered_by_catch_all: true,
            uninitialized_objects: 0,
        };
        assert_eq!(
            fixture.check_with("p/Callee", "f", &context),
            Err(Rejection::Recursive)
        );
        assert_eq!(nesting.depth(), 1);
        assert!(nesting.is_inlining());
    }

    #[test]
    fn class_versions() {
        let mut fixture = Fixture::new();
        fixture.pool.get_mut("p/Callee").unwrap().version = Version::JAVA11;
        fixture.add_callee("p/Callee", static_method("f", code(&[Instruction::simple(RETURN)])));
        assert_eq!(
            fixture.check("p/Callee", "f"),
            Err(Rejection::NewerClassVersion)
        );
    }

    #[test]
    fn backward_branch_with_uninitialized_objects() {
        let mut fixture = Fixture::new();
        let looping = code(&[
            Instruction::variable(ILOAD, 0),
            Instruction::branch(IFNE, -1),
            Instruction::simple(RETURN),
        ]);
        fixture.add_callee("p/Callee", static_method("loops", looping));
        assert_eq!(fixture.check("p/Callee", "loops"), Ok(()));

        let context = InliningContext {
            nesting: &Nesting::TopLevel,
            empty_invoking_stack: true,
            covered_by_catch_all: true,
            uninitialized_objects: 1,
        };
        assert_eq!(
            fixture.check_with("p/Callee", "loops", &context),
            Err(Rejection::BackwardBranchWithUninitialized)
        );
    }

    #[test]
    fn access_rules() {
        let mut fixture = Fixture::new();
        {
            let callee = fixture.pool.get_mut("p/Callee").unwrap();
            let private_helper = ProgramMethod {
                access_flags: MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC,
                name: String::from("helper"),
                descriptor: String::from("()V"),
                code: Some(code(&[Instruction::simple(RETURN)])),
            };
            callee.methods.push(private_helper);
            let helper = callee
                .constants
                .get_method_ref("p/Callee", "helper", "()V", false)
                .unwrap();
            let calls_private = code(&[
                Instruction::constant(INVOKESTATIC, helper),
                Instruction::simple(RETURN),
            ]);
            callee.methods.push(static_method("callsPrivate", calls_private));
        }
        assert_eq!(
            fixture.check("p/Callee", "callsPrivate"),
            Err(Rejection::PrivateAccess)
        );

        fixture.settings.allow_access_modification = true;
        assert_eq!(fixture.check("p/Callee", "callsPrivate"), Ok(()));

        // Even with access widening, private code is not inlined into subclasses
        fixture.pool.get_mut("p/Caller").unwrap().super_class = Some(String::from("p/Callee"));
        assert_eq!(
            fixture.check("p/Callee", "callsPrivate"),
            Err(Rejection::PrivateAccessInSubclass)
        );
    }

    #[test]
    fn package_access_across_packages() {
        let mut fixture = Fixture::new();
        let mut other = ProgramClass::new("q/Other", Some("java/lang/Object"), Version::JAVA8);
        let mut hidden = ProgramClass::new("q/Hidden", Some("java/lang/Object"), Version::JAVA8);
        hidden.access_flags = ClassAccessFlags::SUPER;
        fixture.pool.insert(hidden);
        let class = other.constants.get_class("q/Hidden").unwrap();
        let uses_hidden = code(&[
            Instruction::simple(ACONST_NULL),
            Instruction::constant(CHECKCAST, class),
            Instruction::simple(POP),
            Instruction::simple(RETURN),
        ]);
        other.methods.push(static_method("usesHidden", uses_hidden));
        fixture.pool.insert(other);
        assert_eq!(
            fixture.check("q/Other", "usesHidden"),
            Err(Rejection::PackageAccess)
        );
    }

    #[test]
    fn exception_handling_callees() {
        let mut fixture = Fixture::new();
        let mut catching = code(&[
            Instruction::simple(NOP),
            Instruction::simple(RETURN),
            Instruction::simple(POP),
            Instruction::simple(RETURN),
        ]);
        catching.exception_table.push(ExceptionRange {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 2,
            catch_type: 0,
        });
        fixture.add_callee("p/Callee", static_method("catching", catching));
        let monitor = code(&[
            Instruction::simple(ACONST_NULL),
            Instruction::simple(MONITORENTER),
            Instruction::simple(RETURN),
        ]);
        fixture.add_callee("p/Callee", static_method("monitor", monitor));

        let context = InliningContext {
            nesting: &Nesting::TopLevel,
            empty_invoking_stack: false,
            covered_by_catch_all: false,
            uninitialized_objects: 0,
        };
        assert_eq!(fixture.check("p/Callee", "catching"), Ok(()));
        assert_eq!(
            fixture.check_with("p/Callee", "catching", &context),
            Err(Rejection::CatchesWithNonEmptyStack)
        );
        assert_eq!(fixture.check("p/Callee", "monitor"), Ok(()));
        assert_eq!(
            fixture.check_with("p/Callee", "monitor", &context),
            Err(Rejection::SynchronizedBlock)
        );
    }

    #[test]
    fn static_initializers() {
        let mut fixture = Fixture::new();
        fixture.add_callee("p/Callee", static_method("f", code(&[Instruction::simple(RETURN)])));
        fixture.add_callee(
            "p/Callee",
            static_method("<clinit>", code(&[Instruction::simple(RETURN)])),
        );
        assert_eq!(
            fixture.check("p/Callee", "f"),
            Err(Rejection::ClassInitializerSideEffects)
        );

        fixture
            .settings
            .side_effect_free_classes
            .insert(String::from("p/Callee"));
        assert_eq!(fixture.check("p/Callee", "f"), Ok(()));
    }
}
