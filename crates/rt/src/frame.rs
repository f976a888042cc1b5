use std::sync::Arc;

use derg_ir::Instr;

use crate::{
    error::{bail, trap, Trap},
    value::{Value, WasmType},
};

/// A branch destination inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    /// How many values a branch to this label carries.
    pub arity: usize,
    /// Where a branch to this label continues.
    pub target: usize,
    /// Operand stack height when the label was entered.
    pub height: usize,
}

/// One activation. Frames live in the machine's frame vector and point at
/// their caller by index.
///
/// A frame keeps running while its label stack is non-empty. The first label
/// pushed on a new frame is the terminal label, whose target is the end of
/// the code.
#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) func: Option<usize>,
    pub(crate) code: Arc<[Instr]>,
    pub(crate) instance: usize,
    pub(crate) locals: Vec<Value>,
    pub(crate) stack: Vec<Value>,
    pub(crate) labels: Vec<Label>,
    pub(crate) pc: usize,
    pub(crate) arity: usize,
    pub(crate) prev_frame: Option<usize>,
}

impl Frame {
    pub(crate) fn new(
        func: Option<usize>,
        code: Arc<[Instr]>,
        instance: usize,
        locals: Vec<Value>,
        arity: usize,
        prev_frame: Option<usize>,
    ) -> Self {
        Self {
            func,
            code,
            instance,
            locals,
            stack: Vec::new(),
            labels: Vec::new(),
            pc: 0,
            arity,
            prev_frame,
        }
    }

    /// A frame with no code that only collects values, used as the bottom of
    /// an invocation.
    pub(crate) fn entry(instance: usize, prev_frame: Option<usize>) -> Self {
        Self::new(None, Arc::from(Vec::new()), instance, Vec::new(), 0, prev_frame)
    }

    /// The store address of the running function, if any.
    pub fn func(&self) -> Option<usize> {
        self.func
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn prev_frame(&self) -> Option<usize> {
        self.prev_frame
    }

    pub fn locals(&self) -> &[Value] {
        &self.locals
    }

    pub fn has_label(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn local<T: WasmType>(&self, idx: usize) -> Result<T, Trap> {
        self.locals
            .get(idx)
            .map(|v| T::from_value(*v))
            .ok_or_else(|| trap!("local {idx} out of range"))
    }

    pub fn set_local(&mut self, idx: usize, value: impl Into<Value>) -> Result<(), Trap> {
        let Some(slot) = self.locals.get_mut(idx) else {
            bail!("local {idx} out of range");
        };
        *slot = value.into();
        Ok(())
    }

    pub fn stack_level(&self) -> usize {
        self.stack.len()
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    #[inline]
    pub fn push<T: WasmType>(&mut self, value: T) {
        self.stack.push(value.into_value());
    }

    #[inline]
    pub fn push_value(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop<T: WasmType>(&mut self) -> Result<T, Trap> {
        self.pop_value().map(T::from_value)
    }

    #[inline]
    pub fn pop_value(&mut self) -> Result<Value, Trap> {
        self.stack.pop().ok_or_else(|| trap!("stack underflow"))
    }

    pub(crate) fn peek_value(&self) -> Result<Value, Trap> {
        self.stack.last().copied().ok_or_else(|| trap!("stack underflow"))
    }

    /// Remove the top `count` values, keeping them in push order.
    pub(crate) fn pop_values(&mut self, count: usize) -> Result<Vec<Value>, Trap> {
        let Some(at) = self.stack.len().checked_sub(count) else {
            bail!("stack underflow");
        };
        Ok(self.stack.split_off(at))
    }

    pub(crate) fn push_label(&mut self, arity: usize, target: usize, params: usize) -> Result<(), Trap> {
        let Some(height) = self.stack.len().checked_sub(params) else {
            bail!("stack underflow");
        };
        self.labels.push(Label {
            arity,
            target,
            height,
        });
        Ok(())
    }

    pub(crate) fn pop_label(&mut self) -> Result<Label, Trap> {
        self.labels.pop().ok_or_else(|| trap!("label stack underflow"))
    }

    /// Branch to the label `depth` levels out: keep its arity's worth of
    /// values, unwind the stack to the label's height, drop the label and
    /// everything inside it, and jump.
    pub(crate) fn branch(&mut self, depth: u32) -> Result<(), Trap> {
        let Some(idx) = self.labels.len().checked_sub(depth as usize + 1) else {
            bail!("unknown label {depth}");
        };
        let Label {
            arity,
            target,
            height,
        } = self.labels[idx];

        let Some(keep_from) = self.stack.len().checked_sub(arity) else {
            bail!("stack underflow");
        };
        if keep_from < height {
            bail!("stack underflow");
        }

        self.stack.drain(height..keep_from);
        self.labels.truncate(idx);
        self.pc = target;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pop_values_keeps_order() -> anyhow::Result<()> {
        let mut frame = Frame::entry(0, None);
        frame.push(1i32);
        frame.push(2i32);
        frame.push(3i32);
        let values = frame.pop_values(2)?;
        assert_eq!(values, vec![Value::from(2i32), Value::from(3i32)]);
        assert!(frame.pop_values(2).is_err());
        Ok(())
    }

    #[test]
    fn test_branch_keeps_arity_values() -> anyhow::Result<()> {
        let mut frame = Frame::entry(0, None);
        frame.push_label(0, 100, 0)?;
        frame.push(7i32);
        frame.push_label(1, 50, 0)?;
        frame.push(8i32);
        frame.push(9i32);
        frame.push_label(0, 20, 0)?;

        frame.branch(1)?;
        assert_eq!(frame.pc(), 50);
        assert_eq!(frame.labels.len(), 1);
        assert_eq!(frame.stack(), &[Value::from(7i32), Value::from(9i32)]);
        assert!(frame.branch(1).is_err());
        Ok(())
    }

    #[test]
    fn test_locals() -> anyhow::Result<()> {
        let mut frame = Frame::new(None, Arc::from(Vec::new()), 0, vec![Value::NULL; 2], 0, None);
        frame.set_local(1, 5i64)?;
        assert_eq!(frame.local::<i64>(1)?, 5);
        assert!(frame.local::<i32>(2).is_err());
        Ok(())
    }
}
