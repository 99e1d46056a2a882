//! Method code: decoded instructions, the `Code` attribute, and the composer used to assemble new
//! method bodies out of fragments of existing ones

mod attribute;
mod composer;
mod instruction;
mod layout;
pub mod opcodes;

pub use attribute::*;
pub use composer::*;
pub use instruction::*;
pub use layout::MAX_CODE_LENGTH;
