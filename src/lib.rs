//! # Reactive Component Compiler
//!
//! Lowers a declarative component (state, methods, markup view) into
//! fine-grained update code. There is no virtual tree and no diffing: every
//! dynamic part of the view gets a slot, every method gets a statically
//! chosen epilogue, and events are resolved through 64-bit masks.
//!
//! ## Pipeline
//!
//! 1. **Validate**: names, event attributes, placeholders, member renders.
//! 2. **View regions**: slots, bindings, handlers, conditional and
//!    repetition regions with their ownership and creation ops.
//! 3. **Aggregate**: bindings on one slot fold into one update procedure;
//!    a dependency map indexes procedures and regions by variable.
//! 4. **Epilogues**: each method's write-set selects procedures, child
//!    refreshes, region resyncs and parent notifications, in that order.
//! 5. **Dispatch**: per event kind, a mask of handler slots and a switch.
//! 6. **Wiring**: change callbacks between owners, children and members.
//!    Components that tick, or build something that does, get a tick plan.
//! 7. **Emit**: one JavaScript class per component.
//!
//! The [`runtime`] module executes the same plans headlessly against a
//! [`runtime::RenderHost`].

pub mod aggregate;
pub mod ast;
pub mod cache;
pub mod codegen;
pub mod compile;
pub mod config;
pub mod deps;
pub mod discovery;
pub mod epilogue;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod regions;
pub mod router;
pub mod runtime;
pub mod session;
pub mod validate;
pub mod visitor;
pub mod wiring;
pub mod write_set;

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod codegen_tests;
#[cfg(test)]
mod runtime_tests;

pub use ast::Component;
pub use compile::{compile_all, compile_component, compile_dir, CompiledComponent};
pub use config::CompileOptions;
pub use error::{CompileResult, CompilerError};
pub use events::{EventKind, EventMask};
pub use runtime::{MemoryHost, Program, RenderHost, Runtime};
pub use session::ComponentRegistry;
