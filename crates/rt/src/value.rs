use derg_ir::ValType;

/// One stack slot. The bits carry no type; the instruction or signature
/// that reads a value decides how to interpret it.
///
/// Scalars live in `lo`. A `v128` uses both halves. A reference keeps its
/// machine address in `lo` and a non-zero marker in `hi`, so the all-zero
/// value doubles as the null reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Value {
    pub lo: u64,
    pub hi: u64,
}

const REF_MARKER: u64 = 1;

impl Value {
    pub const NULL: Value = Value { lo: 0, hi: 0 };

    pub fn func_ref(addr: usize) -> Self {
        Value {
            lo: addr as u64,
            hi: REF_MARKER,
        }
    }

    /// The function address of a reference, or `None` for null.
    pub fn as_func_ref(&self) -> Option<usize> {
        if self.hi == 0 {
            None
        } else {
            Some(self.lo as usize)
        }
    }

    pub fn is_null(&self) -> bool {
        self.hi == 0
    }

    pub fn from_u128(v: u128) -> Self {
        Value {
            lo: v as u64,
            hi: (v >> 64) as u64,
        }
    }

    pub fn as_u128(&self) -> u128 {
        (self.hi as u128) << 64 | self.lo as u128
    }

    pub fn as_i32(&self) -> i32 {
        self.lo as u32 as i32
    }

    pub fn as_u32(&self) -> u32 {
        self.lo as u32
    }

    pub fn as_i64(&self) -> i64 {
        self.lo as i64
    }

    pub fn as_u64(&self) -> u64 {
        self.lo
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.lo as u32)
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.lo)
    }
}

/// A native type that has a fixed encoding as a [`Value`] and in linear
/// memory.
pub trait WasmType: Copy + Send + Sync + 'static {
    const VAL_TYPE: ValType;
    const SIZE: usize;

    fn from_value(value: Value) -> Self;
    fn into_value(self) -> Value;
    fn from_le_bytes(bytes: &[u8]) -> Self;
    fn write_le_bytes(self, out: &mut [u8]);
}

macro_rules! wasm_type {
    ($type:ty, $valtype:expr, $get:ident, |$v:ident| $lo:expr) => {
        impl WasmType for $type {
            const VAL_TYPE: ValType = $valtype;
            const SIZE: usize = std::mem::size_of::<$type>();

            #[inline]
            fn from_value(value: Value) -> Self {
                value.$get()
            }

            #[inline]
            fn into_value(self) -> Value {
                let $v = self;
                Value { lo: $lo, hi: 0 }
            }

            fn from_le_bytes(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$type>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$type>()]);
                <$type>::from_le_bytes(buf)
            }

            fn write_le_bytes(self, out: &mut [u8]) {
                out[..std::mem::size_of::<$type>()].copy_from_slice(&self.to_le_bytes());
            }
        }

        impl From<$type> for Value {
            fn from(value: $type) -> Self {
                value.into_value()
            }
        }
    };
}

wasm_type!(i32, ValType::I32, as_i32, |v| v as u32 as u64);
wasm_type!(u32, ValType::I32, as_u32, |v| v as u64);
wasm_type!(i64, ValType::I64, as_i64, |v| v as u64);
wasm_type!(u64, ValType::I64, as_u64, |v| v);
wasm_type!(f32, ValType::F32, as_f32, |v| v.to_bits() as u64);
wasm_type!(f64, ValType::F64, as_f64, |v| v.to_bits());

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_bits_are_shared() {
        let v = Value::from(-1i32);
        assert_eq!(v.as_u32(), u32::MAX);
        assert_eq!(v.lo, 0xffff_ffff);

        let v = Value::from(1.5f64);
        assert_eq!(v.as_u64(), 1.5f64.to_bits());
    }

    #[test]
    fn test_refs() {
        assert!(Value::NULL.is_null());
        assert_eq!(Value::NULL.as_func_ref(), None);
        assert_eq!(Value::func_ref(0).as_func_ref(), Some(0));
        assert!(!Value::func_ref(0).is_null());
    }

    #[test]
    fn test_le_bytes() {
        let mut buf = [0u8; 8];
        (-2i64).write_le_bytes(&mut buf);
        assert_eq!(<i64 as WasmType>::from_le_bytes(&buf), -2);
        assert_eq!(<u32 as WasmType>::from_le_bytes(&[1, 0, 0, 0, 9]), 1);
    }
}
