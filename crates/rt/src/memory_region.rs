use derg_ir::Limits;

use crate::error::{bail, Trap};

const PAGE_SHIFT: usize = 16;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const MAX_PAGES: usize = 65536;

/// A linear memory: a zero-initialised byte buffer that grows by whole
/// pages.
#[derive(Debug)]
pub struct MemoryRegion {
    limits: Limits,
    page_count: usize,
    storage: Vec<u8>,
}

impl MemoryRegion {
    pub fn new(limits: Limits) -> Self {
        let page_count = limits.min() as usize;
        MemoryRegion {
            limits,
            page_count,
            storage: vec![0u8; page_count << PAGE_SHIFT],
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.page_count << PAGE_SHIFT
    }

    pub fn is_empty(&self) -> bool {
        self.page_count == 0
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn as_slice(&self) -> &[u8] {
        self.storage.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.storage.as_mut_slice()
    }

    fn check(&self, addr: usize, count: usize) -> Result<(), Trap> {
        if addr.checked_add(count).map_or(true, |end| end > self.len()) {
            bail!("out of bounds memory access");
        }
        Ok(())
    }

    /// Grow by `delta` pages and return the old page count, or `None` when
    /// the maximum would be exceeded.
    pub fn grow(&mut self, delta: usize) -> Option<usize> {
        let new_page_count = self.page_count.checked_add(delta)?;
        let max = self
            .limits
            .max()
            .map_or(MAX_PAGES, |max| (max as usize).min(MAX_PAGES));
        if new_page_count > max {
            return None;
        }

        self.storage.resize(new_page_count << PAGE_SHIFT, 0);
        let old_page_count = self.page_count;
        self.page_count = new_page_count;
        Some(old_page_count)
    }

    pub fn read(&self, addr: usize, count: usize) -> Result<&[u8], Trap> {
        self.check(addr, count)?;
        Ok(&self.storage[addr..addr + count])
    }

    pub fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), Trap> {
        self.check(addr, data.len())?;
        self.storage[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }

    #[inline]
    pub fn load<const U: usize>(&self, addr: usize) -> Result<[u8; U], Trap> {
        self.check(addr, U)?;
        let mut out = [0u8; U];
        out.copy_from_slice(&self.storage[addr..addr + U]);
        Ok(out)
    }

    #[inline]
    pub fn store<const U: usize>(&mut self, addr: usize, value: &[u8; U]) -> Result<(), Trap> {
        self.write(addr, value.as_slice())
    }

    pub fn fill_data(&mut self, val: u8, offset: usize, count: usize) -> Result<(), Trap> {
        self.check(offset, count)?;
        self.storage[offset..offset + count].fill(val);
        Ok(())
    }

    pub fn copy_overlapping_data(
        &mut self,
        offset: usize,
        from_offset: usize,
        count: usize,
    ) -> Result<(), Trap> {
        self.check(offset, count)?;
        self.check(from_offset, count)?;
        self.storage
            .copy_within(from_offset..from_offset + count, offset);
        Ok(())
    }
}
