use super::ProgramInfo;
use crate::jvm::code::CodeAttribute;
use crate::jvm::{ProgramClass, ProgramMethod};

/// Decides which of the call sites that can be inlined are worth inlining
///
/// The policy only ever sees call sites which already passed the inlineability checks.
pub trait InliningPolicy {
    fn should_inline(
        &self,
        caller_class: &ProgramClass,
        caller_method: &ProgramMethod,
        callee_class: &ProgramClass,
        callee_method: &ProgramMethod,
        callee_code: &CodeAttribute,
        program: &ProgramInfo,
    ) -> bool;
}

/// Inline callees whose code is at most this many bytes long
pub struct ShortMethods(pub u32);

impl ShortMethods {
    /// Callees about as short as the call they replace
    pub const DEFAULT_MAX_CODE_LENGTH: u32 = 8;
}

impl Default for ShortMethods {
    fn default() -> ShortMethods {
        ShortMethods(Self::DEFAULT_MAX_CODE_LENGTH)
    }
}

impl InliningPolicy for ShortMethods {
    fn should_inline(
        &self,
        _caller_class: &ProgramClass,
        _caller_method: &ProgramMethod,
        _callee_class: &ProgramClass,
        _callee_method: &ProgramMethod,
        callee_code: &CodeAttribute,
        _program: &ProgramInfo,
    ) -> bool {
        callee_code.code_length() <= self.0
    }
}

/// Inline callees that are called from exactly one place in the whole program
pub struct SingleInvocation;

impl InliningPolicy for SingleInvocation {
    fn should_inline(
        &self,
        _caller_class: &ProgramClass,
        _caller_method: &ProgramMethod,
        callee_class: &ProgramClass,
        callee_method: &ProgramMethod,
        _callee_code: &CodeAttribute,
        program: &ProgramInfo,
    ) -> bool {
        program.invocation_count(&callee_class.method_ref(callee_method)) == 1
    }
}

/// Only inline callees declared in the same class as the caller
pub struct SameClass;

impl InliningPolicy for SameClass {
    fn should_inline(
        &self,
        caller_class: &ProgramClass,
        _caller_method: &ProgramMethod,
        callee_class: &ProgramClass,
        _callee_method: &ProgramMethod,
        _callee_code: &CodeAttribute,
        _program: &ProgramInfo,
    ) -> bool {
        caller_class.name == callee_class.name
    }
}

/// Inline everything that can be inlined
pub struct Everything;

impl InliningPolicy for Everything {
    fn should_inline(
        &self,
        _caller_class: &ProgramClass,
        _caller_method: &ProgramMethod,
        _callee_class: &ProgramClass,
        _callee_method: &ProgramMethod,
        _callee_code: &CodeAttribute,
        _program: &ProgramInfo,
    ) -> bool {
        true
    }
}

/// Inline when both policies agree
pub struct And<A, B>(pub A, pub B);

impl<A: InliningPolicy, B: InliningPolicy> InliningPolicy for And<A, B> {
    fn should_inline(
        &self,
        caller_class: &ProgramClass,
        caller_method: &ProgramMethod,
        callee_class: &ProgramClass,
        callee_method: &ProgramMethod,
        callee_code: &CodeAttribute,
        program: &ProgramInfo,
    ) -> bool {
        self.0.should_inline(
            caller_class,
            caller_method,
            callee_class,
            callee_method,
            callee_code,
            program,
        ) && self.1.should_inline(
            caller_class,
            caller_method,
            callee_class,
            callee_method,
            callee_code,
            program,
        )
    }
}

/// Inline when either policy does (eg. short methods or methods called only once)
pub struct Or<A, B>(pub A, pub B);

impl<A: InliningPolicy, B: InliningPolicy> InliningPolicy for Or<A, B> {
    fn should_inline(
        &self,
        caller_class: &ProgramClass,
        caller_method: &ProgramMethod,
        callee_class: &ProgramClass,
        callee_method: &ProgramMethod,
        callee_code: &CodeAttribute,
        program: &ProgramInfo,
    ) -> bool {
        self.0.should_inline(
            caller_class,
            caller_method,
            callee_class,
            callee_method,
            callee_code,
            program,
        ) || self.1.should_inline(
            caller_class,
            caller_method,
            callee_class,
            callee_method,
            callee_code,
            program,
        )
    }
}

/// Gets told about every call site that was inlined
///
/// Call offsets are the offsets of the invoke instructions in the code as it was before inlining.
pub trait InlineObserver {
    fn inlined(
        &mut self,
        caller_class: &ProgramClass,
        caller_method: &ProgramMethod,
        call_offset: u32,
    );
}

impl<F> InlineObserver for F
where
    F: FnMut(&ProgramClass, &ProgramMethod, u32),
{
    fn inlined(
        &mut self,
        caller_class: &ProgramClass,
        caller_method: &ProgramMethod,
        call_offset: u32,
    ) {
        self(caller_class, caller_method, call_offset)
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use crate::inline::Settings;
    use crate::jvm::{ClassPool, MethodAccessFlags, Version};

    fn method(name: &str, length: usize) -> ProgramMethod {
        ProgramMethod {
            access_flags: MethodAccessFlags::STATIC,
            name: name.to_owned(),
            descriptor: String::from("()V"),
            code: Some(CodeAttribute {
                max_stack: 0,
                max_locals: 0,
                code: vec![0; length],
                exception_table: vec![],
                line_numbers: vec![],
                attributes: vec![],
            }),
        }
    }

    fn decide(
        policy: &dyn InliningPolicy,
        caller: &ProgramClass,
        callee: &ProgramClass,
        name: &str,
    ) -> bool {
        let program = ProgramInfo::default();
        let callee_method = callee.find_method(name, "()V").unwrap();
        policy.should_inline(
            caller,
            &caller.methods[0],
            callee,
            callee_method,
            callee_method.code.as_ref().unwrap(),
            &program,
        )
    }

    #[test]
    fn combinators() {
        let mut caller = ProgramClass::new("p/A", None, Version::JAVA8);
        caller.methods.push(method("run", 1));
        let mut callee = ProgramClass::new("p/B", None, Version::JAVA8);
        callee.methods.push(method("short", 8));
        callee.methods.push(method("long", 9));

        assert!(decide(&ShortMethods::default(), &caller, &callee, "short"));
        assert!(!decide(&ShortMethods::default(), &caller, &callee, "long"));
        assert!(!decide(&SameClass, &caller, &callee, "short"));
        assert!(decide(&SameClass, &caller, &caller, "run"));
        assert!(decide(&Everything, &caller, &callee, "long"));
        assert!(!decide(&And(Everything, SameClass), &caller, &callee, "short"));
        assert!(decide(&Or(ShortMethods(8), SameClass), &caller, &callee, "short"));
        assert!(!decide(&SingleInvocation, &caller, &callee, "short"));
    }

    #[test]
    fn single_invocation() {
        let mut pool = ClassPool::new();
        let mut class = ProgramClass::new("p/A", None, Version::JAVA8);
        let target = class.constants.get_method_ref("p/A", "target", "()V", false).unwrap();
        let mut run = method("run", 0);
        run.code.as_mut().unwrap().code = vec![0xb8, (target >> 8) as u8, target as u8, 0xb1];
        class.methods.push(run);
        class.methods.push(method("target", 1));
        pool.insert(class);

        let program = ProgramInfo::analyze(&pool, vec![], &Settings::new());
        let class = pool.get("p/A").unwrap();
        let target = class.find_method("target", "()V").unwrap();
        assert!(SingleInvocation.should_inline(
            class,
            &class.methods[0],
            class,
            target,
            target.code.as_ref().unwrap(),
            &program
        ));
    }

    #[test]
    fn closures_observe() {
        let class = ProgramClass::new("p/A", None, Version::JAVA8);
        let run = method("run", 1);
        let mut seen = vec![];
        {
            let mut observer = |class: &ProgramClass, method: &ProgramMethod, offset: u32| {
                seen.push(format!("{}.{}@{}", class.name, method.name, offset))
            };
            observer.inlined(&class, &run, 4);
        }
        assert_eq!(seen, vec![String::from("p/A.run@4")]);
    }
}
