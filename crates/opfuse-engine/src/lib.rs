//! Super-instruction selection engine.
//!
//! Given a catalog of block structures (see `opfuse-catalog`), the engine
//! searches for the instruction set of bounded size with the highest
//! frequency-weighted savings. The per-block evaluator is a pure
//! dynamic program, fanned across worker threads by the parallel harness;
//! on top sit two drivers: a plain branch-and-bound search and a staged
//! solver that reuses smaller-budget solutions to sharpen its bounds.

pub mod eval;
pub mod parallel;
pub mod search;
pub mod set;
pub mod staged;

pub use eval::block_saving;
pub use parallel::total_savings;
pub use search::{
    branch_and_bound, upper_bound_extra_saving, InstructionInfo, Selection, SelectionProblem,
};
pub use set::{InstructionSet, SetMembership};
pub use staged::staged_search;
