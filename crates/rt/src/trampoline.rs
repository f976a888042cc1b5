use crate::{
    error::{bail, trap, ExecError, Trap},
    machine::Machine,
    value::Value,
};

/// How a top-level call finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned(Vec<Value>),
    Exited(i32),
}

/// How a call through [`Machine::invoke_trampoline`] finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Trampolined {
    Returned(Vec<Value>),
    /// A longjmp unwound the callee; the caller's state has been restored.
    Unwound,
}

impl Machine {
    /// Call an exported function of `instance` as the embedder's entry
    /// point. A guest exit becomes [`Outcome::Exited`].
    pub fn call_export(
        &mut self,
        instance: usize,
        name: &str,
        args: &[Value],
    ) -> Result<Outcome, Trap> {
        let Some(addr) = self.exported_func(instance, name) else {
            bail!("no exported function named {name}");
        };
        match self.invoke(addr, args) {
            Ok(values) => Ok(Outcome::Returned(values)),
            Err(ExecError::Exit(code)) => {
                log::debug!("{name} exited with code {code}");
                Ok(Outcome::Exited(code))
            }
            Err(ExecError::Longjmp) => Err(trap!("longjmp escaped to top level")),
            Err(ExecError::Trap(trap)) => Err(trap),
        }
    }

    /// Invoke `addr` from inside a host function, catching a longjmp raised
    /// anywhere below it. On unwind the frame depth and the innermost
    /// frame's stack level go back to what they were on entry.
    pub fn invoke_trampoline(
        &mut self,
        addr: usize,
        args: &[Value],
    ) -> Result<Trampolined, ExecError> {
        let depth = self.frames.len();
        let level = self.frames.last().map(|frame| frame.stack_level());

        match self.invoke(addr, args) {
            Ok(values) => Ok(Trampolined::Returned(values)),
            Err(ExecError::Longjmp) => {
                self.frames.truncate(depth);
                if let (Some(frame), Some(level)) = (self.frames.last_mut(), level) {
                    frame.stack.truncate(level);
                }
                log::debug!("longjmp caught at frame depth {depth}");
                Ok(Trampolined::Unwound)
            }
            Err(err) => Err(err),
        }
    }
}
