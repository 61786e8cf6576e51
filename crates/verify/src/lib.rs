//! Differential execution harness for a bitcode / textual IR round-trip
//! tool.
//!
//! Artifacts are executed under a trusted interpreter and through the tool
//! under test; only the exit codes are compared.

pub mod cancel;
pub mod compare;
pub mod discover;
pub mod harness;
pub mod pool;
pub mod report;
pub mod scope;
pub mod suite;
pub mod tool;
pub mod toolchain;
