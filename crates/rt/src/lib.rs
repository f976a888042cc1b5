mod config;
mod error;
mod exec;
mod frame;
mod host;
mod instance;
mod machine;
mod memory_region;
mod numeric;
mod table;
mod trampoline;
mod value;

#[cfg(test)]
mod test_utils;

pub use config::MachineConfig;
pub use error::{ExecError, Trap};
pub use frame::{Frame, Label};
pub use host::{HostFunc, HostProxy, HostResult, IntoHostFunc, TypedProxy};
pub use instance::{ExternVal, Externs, ModuleInstance};
pub use machine::{ElementSegment, Func, Machine, ModuleFunc};
pub use memory_region::{MemoryRegion, MAX_PAGES, PAGE_SIZE};
pub use table::Table;
pub use trampoline::{Outcome, Trampolined};
pub use value::{Value, WasmType};
