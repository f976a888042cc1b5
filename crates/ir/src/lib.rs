mod defs;
mod flatten;
mod module;

pub use defs::*;
pub use flatten::{flatten, Flattener, Node, UnexpectedElse};
pub use module::{FuncBody, FuncDecl, GlobalDecl, Module, ModuleBuilder, ModuleError, MAX_LOCALS};
