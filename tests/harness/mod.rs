#![allow(dead_code)]

use classinline::inline::{
    self, InliningPolicy, InliningStatistics, LineNumberLinearizer, MethodInliner, ProgramInfo,
    Settings,
};
use classinline::jvm::code::{decode_all, encode_all, CodeAttribute, Instruction};
use classinline::jvm::{
    self, ClassPool, MethodAccessFlags, MethodRef, ProgramClass, ProgramMethod, Version,
};

/// Program assembled instruction by instruction, on which the passes can be run
pub struct TestHarness {
    pub pool: ClassPool,
    pub settings: Settings,

    /// Methods which must not be inlined
    pub kept: Vec<MethodRef>,
}

impl TestHarness {
    pub fn new() -> TestHarness {
        let _ = env_logger::builder().is_test(true).try_init();
        TestHarness {
            pool: ClassPool::new(),
            settings: Settings::new(),
            kept: vec![],
        }
    }

    /// Add a class (replacing any class by the same name)
    pub fn add(&mut self, class: ProgramClass) {
        self.pool.insert(class);
    }

    /// Run the inliner over every method
    pub fn inline(
        &mut self,
        policy: impl InliningPolicy + 'static,
    ) -> Result<InliningStatistics, TestError> {
        let program = ProgramInfo::analyze(&self.pool, self.kept.clone(), &self.settings);
        let mut inliner = MethodInliner::new(&self.settings, program, policy);
        Ok(inliner.run(&mut self.pool)?)
    }

    pub fn linearize(&mut self) {
        LineNumberLinearizer::new(&self.settings).run(&mut self.pool);
    }

    pub fn code(&self, class: &str, name: &str, descriptor: &str) -> &CodeAttribute {
        self.pool
            .get(class)
            .and_then(|class| class.find_method(name, descriptor))
            .and_then(|method| method.code.as_ref())
            .unwrap_or_else(|| panic!("No code for {}.{}{}", class, name, descriptor))
    }

    /// Decoded instructions of a method
    pub fn instructions(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Vec<(u32, Instruction)> {
        decode_all(&self.code(class, name, descriptor).code).unwrap()
    }
}

/// Empty class extending `java/lang/Object`
pub fn class(name: &str) -> ProgramClass {
    ProgramClass::new(name, Some("java/lang/Object"), Version::JAVA8)
}

/// Add a reference to a method to the class constants
pub fn method_ref(class: &mut ProgramClass, owner: &str, name: &str, descriptor: &str) -> u16 {
    class
        .constants
        .get_method_ref(owner, name, descriptor, false)
        .unwrap()
}

/// Method with code assembled from `instructions`
pub fn method(
    access_flags: MethodAccessFlags,
    name: &str,
    descriptor: &str,
    max_locals: u16,
    instructions: &[Instruction],
) -> ProgramMethod {
    ProgramMethod {
        access_flags,
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        code: Some(CodeAttribute {
            max_stack: 4,
            max_locals,
            code: encode_all(instructions).unwrap(),
            exception_table: vec![],
            line_numbers: vec![],
            attributes: vec![],
        }),
    }
}

pub fn public_static() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
}

/// Ways a test can go wrong
#[derive(Debug)]
pub enum TestError {
    Bytecode(jvm::Error),
    Inlining(inline::Error),
}

impl From<jvm::Error> for TestError {
    fn from(err: jvm::Error) -> TestError {
        TestError::Bytecode(err)
    }
}

impl From<inline::Error> for TestError {
    fn from(err: inline::Error) -> TestError {
        TestError::Inlining(err)
    }
}
