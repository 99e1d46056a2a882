//! Bytecode-level method inlining for JVM class files
//!
//! The crate is split in two layers:
//!
//!   - [`jvm`] models the parts of the class file format the inliner touches: constant pools,
//!     access flags, descriptors, decoded instructions, code attributes, and a label-based
//!     [`jvm::code::CodeComposer`] for rebuilding method bodies.
//!
//!   - [`inline`] contains the passes: stack-size analysis, the eligibility checklist, the
//!     splicer that substitutes call sites by callee bodies, and the line-number linearizer that
//!     runs once all inlining is done.
//!
//! A typical pipeline looks like:
//!
//! ```text,ignore,no_run
//! let info = ProgramInfo::analyze(&pool, kept_methods, &settings);
//! let mut inliner = MethodInliner::new(&settings, info, ShortMethods::default());
//! inliner.run(&mut pool)?;
//! LineNumberLinearizer::new(&settings).run(&mut pool);
//! ```
//!
//! Rewritten methods come out without a `StackMapTable`, so classes targeting Java 7 or later need
//! their stack map frames recomputed before they verify.

pub mod inline;
pub mod jvm;
pub mod util;
