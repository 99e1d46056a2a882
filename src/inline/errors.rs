use crate::jvm;
use crate::jvm::MethodRef;

#[derive(Debug)]
pub enum Error {
    Bytecode(jvm::Error),

    /// Two paths reach the same instruction with different operand stack sizes
    InconsistentStack {
        offset: u32,
        expected: u32,
        found: u32,
    },

    /// Instruction pops more values than there are on the operand stack
    StackUnderflow {
        offset: u32,
    },

    /// Jump, handler, or fallthrough leading outside of the instructions of the method
    InvalidJumpTarget {
        offset: u32,
        target: i64,
    },

    /// Method expected in the class pool is missing (eg. it was removed mid-pass)
    MissingMethod(MethodRef),

    /// Local variable slots for an inlined body do not fit in 16 bits
    LocalsOverflow(MethodRef),

    /// Failure while splicing `callee` into `caller`
    Inlining {
        caller: MethodRef,
        callee: MethodRef,
        cause: Box<Error>,
    },
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Bytecode(err)
    }
}
