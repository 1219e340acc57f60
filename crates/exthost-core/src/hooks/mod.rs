//! Lifecycle hook bindings and execution.

mod runner;
mod table;

pub use runner::{HookDecision, HookOutcome, HookRunner};
pub use table::{GenerationHooks, HookBinding, HookBindingTable};
