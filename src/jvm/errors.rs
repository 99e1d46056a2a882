use super::code::Label;
use super::Constant;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    ConstantPoolOverflow {
        constant: Constant,
        offset: usize,
    },

    /// Index does not point at the start of a constant
    MissingConstant(u16),

    /// Constant exists but is of the wrong kind
    UnexpectedConstant {
        index: u16,
        expected: &'static str,
    },

    /// Constant tied to a bootstrap method of the class holding it (`Dynamic`, `InvokeDynamic`)
    BootstrapMethodConstant(u16),

    BadDescriptor(String),

    UnknownOpcode {
        opcode: u8,
        offset: u32,
    },

    /// `wide` prefix followed by an opcode that has no wide form
    InvalidWideOpcode {
        opcode: u8,
        offset: u32,
    },

    /// Code array ends in the middle of an instruction
    TruncatedInstruction {
        offset: u32,
    },

    /// Switch with a negative number of cases or with keys that cannot be encoded
    MalformedSwitch {
        offset: u32,
    },

    /// Relative jump that does not fit the instruction encoding
    JumpOverflow {
        offset: u32,
        jump: i64,
    },

    /// Operand that does not fit the instruction encoding (eg. `bipush 300`)
    OperandOverflow {
        offset: u32,
        opcode: u8,
    },

    MethodCodeOverflow(usize),
    MethodCodeMaxLocalsOverflow(usize),
    MethodCodeMaxStackOverflow(usize),
    LineNumberOverflow(u32),

    /// Labels which were referenced (by a jump, exception range, or line number) but never placed
    UnplacedLabels(Vec<Label>),

    /// Fragments were not properly closed or closed more often than opened
    UnbalancedFragments,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
