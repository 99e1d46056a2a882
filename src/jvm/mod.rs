//! Class file model
//!
//! Only the parts of the format that the inliner reads or rewrites are modelled in detail:
//! constant pools, member access flags and descriptors, and method code. Everything else about a
//! class is carried along in [`ProgramClass`].

mod access_flags;
mod binary_format;
pub mod code;
mod constants;
mod descriptors;
mod errors;
mod model;

pub use access_flags::*;
pub use binary_format::*;
pub use constants::*;
pub use descriptors::*;
pub use errors::*;
pub use model::*;
