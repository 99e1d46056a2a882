//! Inlining passes
//!
//! Inlining runs in two phases over the whole program:
//!
//!   1. [`MethodInliner`] visits every method, replacing eligible calls with a copy of the callee
//!      body. Eligibility is decided by the [`InlineabilityChecker`] (calls that can be inlined
//!      without changing what the program does) and then an [`InliningPolicy`] (calls that are
//!      worth inlining). Inlined bodies are bracketed by sentinel line numbers.
//!
//!   2. [`LineNumberLinearizer`] shifts the line numbers of inlined bodies so that they don't
//!      collide with the lines around them, and resolves the sentinels.
//!
//! Both phases need facts about the whole program (which methods are kept, what each method's code
//! does, how often it is called): these are gathered up front into a [`ProgramInfo`].

mod checker;
mod errors;
mod line_numbers;
mod policy;
mod settings;
mod splicer;
mod stack;
mod summary;

pub use checker::*;
pub use errors::*;
pub use line_numbers::*;
pub use policy::*;
pub use settings::*;
pub use splicer::*;
pub use stack::*;
pub use summary::*;
