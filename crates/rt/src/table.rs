use derg_ir::TableType;
use smallvec::SmallVec;

use crate::{
    error::{bail, Trap},
    value::Value,
};

/// A table of references. Entries start out null.
#[derive(Debug, Clone)]
pub struct Table {
    ty: TableType,
    values: SmallVec<[Value; 4]>,
}

impl Table {
    pub fn new(ty: TableType) -> Self {
        let len = ty.1.min() as usize;
        Self {
            ty,
            values: SmallVec::from_elem(Value::NULL, len),
        }
    }

    pub fn ty(&self) -> TableType {
        self.ty
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<Value> {
        self.values.get(idx).copied()
    }

    pub fn set(&mut self, idx: usize, value: Value) -> Result<(), Trap> {
        let Some(slot) = self.values.get_mut(idx) else {
            bail!("out of bounds table access");
        };
        *slot = value;
        Ok(())
    }

    pub(crate) fn check(&self, idx: usize, count: usize) -> Result<(), Trap> {
        if idx.checked_add(count).map_or(true, |end| end > self.len()) {
            bail!("out of bounds table access");
        }
        Ok(())
    }

    /// Grow by `delta` entries filled with `fill`. Returns the old size, or
    /// -1 if the table would exceed its maximum.
    pub fn grow(&mut self, delta: u32, fill: Value) -> i32 {
        let len = self.values.len();
        let max = self.ty.1.max().unwrap_or(u32::MAX) as usize;
        let Some(new_size) = len.checked_add(delta as usize) else {
            return -1;
        };
        if new_size > max {
            return -1;
        }
        self.values.resize(new_size, fill);
        len as i32
    }

    pub fn fill(&mut self, idx: usize, value: Value, count: usize) -> Result<(), Trap> {
        self.check(idx, count)?;
        self.values[idx..idx + count].fill(value);
        Ok(())
    }

    pub(crate) fn copy_within(&mut self, dst: usize, src: usize, count: usize) -> Result<(), Trap> {
        self.check(dst, count)?;
        self.check(src, count)?;
        self.values.copy_within(src..src + count, dst);
        Ok(())
    }

    pub(crate) fn write(&mut self, dst: usize, values: &[Value]) -> Result<(), Trap> {
        self.check(dst, values.len())?;
        self.values[dst..dst + values.len()].copy_from_slice(values);
        Ok(())
    }

    pub(crate) fn slice(&self, idx: usize, count: usize) -> Result<&[Value], Trap> {
        self.check(idx, count)?;
        Ok(&self.values[idx..idx + count])
    }
}

#[cfg(test)]
mod test {
    use derg_ir::{Limits, RefType};

    use super::*;

    #[test]
    fn test_grow() {
        let mut table = Table::new(TableType(RefType::FuncRef, Limits::Range(2, 4)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.grow(2, Value::func_ref(9)), 2);
        assert_eq!(table.get(3), Some(Value::func_ref(9)));
        assert_eq!(table.grow(1, Value::NULL), -1);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_bounds() {
        let mut table = Table::new(TableType(RefType::FuncRef, Limits::Min(1)));
        assert!(table.get(0).is_some_and(|v| v.is_null()));
        assert!(table.set(1, Value::NULL).is_err());
        assert!(table.fill(0, Value::NULL, 2).is_err());
        assert!(table.copy_within(0, 1, 0).is_ok());
    }
}
