/// Knobs for a [`crate::Machine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Instruction budget. `None` runs unmetered.
    pub fuel: Option<u64>,
    /// Maximum number of live frames before a call traps.
    pub max_call_depth: usize,
    /// Log every function call at debug level.
    pub debug: bool,
    /// Log every executed instruction at trace level.
    pub trace: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            fuel: None,
            max_call_depth: 10_000,
            debug: false,
            trace: false,
        }
    }
}

impl MachineConfig {
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}
