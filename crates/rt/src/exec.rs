use derg_ir::{BlockType, Instr, LabelIdx, LocalIdx, MemArg, MemIdx, SimdImm};

use crate::{
    error::{bail, trap, ExecError, Trap},
    frame::Frame,
    instance::ModuleInstance,
    machine::{Machine, Store},
    memory_region::MemoryRegion,
    numeric::*,
    table::Table,
    value::Value,
};

/// What the machine has to do after an instruction ran.
pub(crate) enum Flow {
    Continue,
    Call(usize),
}

macro_rules! unop {
    ($frame:ident, $t:ty, |$a:ident| $body:expr) => {{
        let $a = $frame.pop::<$t>()?;
        $frame.push($body);
    }};
}

macro_rules! binop {
    ($frame:ident, $t:ty, |$a:ident, $b:ident| $body:expr) => {{
        let $b = $frame.pop::<$t>()?;
        let $a = $frame.pop::<$t>()?;
        $frame.push($body);
    }};
}

/// Read a `$t` from memory and widen it to `$out`.
macro_rules! load {
    ($frame:ident, $mem:expr, $arg:expr, $t:ty, $out:ty) => {{
        let addr = effective_addr($frame, $arg)?;
        let bytes = $mem.load(addr)?;
        $frame.push(<$t>::from_le_bytes(bytes) as $out);
    }};
}

/// Pop a `$t` and write its low `$narrow` bytes to memory.
macro_rules! store {
    ($frame:ident, $mem:expr, $arg:expr, $t:ty, $narrow:ty) => {{
        let value = $frame.pop::<$t>()? as $narrow;
        let addr = effective_addr($frame, $arg)?;
        $mem.store(addr, &value.to_le_bytes())?;
    }};
}

fn block_arity(instance: &ModuleInstance, ty: &BlockType) -> Result<(usize, usize), Trap> {
    Ok(match ty {
        BlockType::Empty => (0, 0),
        BlockType::Val(_) => (0, 1),
        BlockType::TypeIndex(idx) => {
            let ty = instance.func_type(*idx)?;
            (ty.input_arity(), ty.output_arity())
        }
    })
}

fn effective_addr(frame: &mut Frame, arg: &MemArg) -> Result<usize, Trap> {
    let base = frame.pop::<u32>()? as usize;
    base.checked_add(arg.offset())
        .ok_or_else(|| trap!("out of bounds memory access"))
}

fn memory<'s>(
    store: &'s mut Store,
    instance: &ModuleInstance,
    idx: MemIdx,
) -> Result<&'s mut MemoryRegion, Trap> {
    let addr = instance.memory_addr(idx)?;
    store
        .memories
        .get_mut(addr)
        .ok_or_else(|| trap!("memory address {addr} out of range"))
}

fn mem0<'s>(store: &'s mut Store, instance: &ModuleInstance) -> Result<&'s mut MemoryRegion, Trap> {
    memory(store, instance, MemIdx(0))
}

fn table_at(tables: &mut [Table], addr: usize) -> Result<&mut Table, Trap> {
    tables
        .get_mut(addr)
        .ok_or_else(|| trap!("table address {addr} out of range"))
}

/// Pop the `[dst, src, count]` operands shared by the bulk memory and table
/// instructions.
fn pop_bulk(frame: &mut Frame) -> Result<(usize, usize, usize), Trap> {
    let count = frame.pop::<u32>()? as usize;
    let src = frame.pop::<u32>()? as usize;
    let dst = frame.pop::<u32>()? as usize;
    Ok((dst, src, count))
}

/// Run one instruction of the innermost frame. The frame's pc already
/// points past `instr` when any branch or call happens.
pub(crate) fn dispatch(machine: &mut Machine, instr: &Instr) -> Result<Flow, ExecError> {
    let Machine {
        store,
        instances,
        frames,
        ..
    } = machine;
    let Some(frame) = frames.last_mut() else {
        bail!("no frame to step");
    };
    let Some(instance) = instances.get(frame.instance) else {
        bail!("instance {} out of range", frame.instance);
    };

    frame.pc += 1;

    match instr {
        // Control Instructions
        Instr::Unreachable => bail!("unreachable"),
        Instr::Nop => {}

        Instr::Block { ty, target } => {
            let (params, results) = block_arity(instance, ty)?;
            frame.push_label(results, *target, params)?;
        }

        Instr::Loop { ty, target } => {
            let (params, _) = block_arity(instance, ty)?;
            frame.push_label(params, *target, params)?;
        }

        Instr::If {
            ty,
            target,
            else_target,
        } => {
            let cond = frame.pop::<i32>()?;
            let (params, results) = block_arity(instance, ty)?;
            if cond != 0 {
                frame.push_label(results, *target, params)?;
            } else if else_target == target {
                // No else arm: skip the whole construct.
                frame.pc = *target;
            } else {
                frame.push_label(results, *target, params)?;
                frame.pc = *else_target;
            }
        }

        Instr::Else { target } => {
            frame.pop_label()?;
            frame.pc = *target;
        }

        Instr::End => {
            frame.pop_label()?;
        }

        Instr::Br(LabelIdx(depth)) => frame.branch(*depth)?,

        Instr::BrIf(LabelIdx(depth)) => {
            if frame.pop::<i32>()? != 0 {
                frame.branch(*depth)?;
            }
        }

        Instr::BrTable(labels, default) => {
            let idx = frame.pop::<u32>()? as usize;
            let LabelIdx(depth) = labels.get(idx).unwrap_or(default);
            frame.branch(*depth)?;
        }

        Instr::Return => {
            let Some(depth) = frame.labels.len().checked_sub(1) else {
                bail!("label stack underflow");
            };
            frame.branch(depth as u32)?;
        }

        Instr::Call(idx) => return Ok(Flow::Call(instance.func_addr(*idx)?)),

        Instr::CallIndirect(type_idx, table_idx) => {
            let expected = instance.func_type(*type_idx)?;
            let table = table_at(&mut store.tables, instance.table_addr(*table_idx)?)?;
            let elem = frame.pop::<u32>()? as usize;

            let Some(value) = table.get(elem) else {
                bail!("undefined element");
            };
            let Some(addr) = value.as_func_ref() else {
                bail!("uninitialized element");
            };
            let Some(func) = store.funcs.get(addr) else {
                bail!("function address {addr} out of range");
            };
            if func.ty() != expected {
                bail!("indirect call type mismatch");
            }
            return Ok(Flow::Call(addr));
        }

        // Reference Instructions
        Instr::RefNull(_) => frame.push_value(Value::NULL),

        Instr::RefIsNull => {
            let value = frame.pop_value()?;
            frame.push(value.is_null() as i32);
        }

        Instr::RefFunc(idx) => frame.push_value(Value::func_ref(instance.func_addr(*idx)?)),

        // Parametric Instructions
        Instr::Drop => {
            frame.pop_value()?;
        }

        Instr::Select | Instr::SelectTyped(_) => {
            let cond = frame.pop::<i32>()?;
            let rhs = frame.pop_value()?;
            let lhs = frame.pop_value()?;
            frame.push_value(if cond != 0 { lhs } else { rhs });
        }

        // Variable Instructions
        Instr::LocalGet(LocalIdx(idx)) => {
            let Some(value) = frame.locals.get(*idx as usize).copied() else {
                bail!("local {idx} out of range");
            };
            frame.push_value(value);
        }

        Instr::LocalSet(LocalIdx(idx)) => {
            let value = frame.pop_value()?;
            frame.set_local(*idx as usize, value)?;
        }

        Instr::LocalTee(LocalIdx(idx)) => {
            let value = frame.peek_value()?;
            frame.set_local(*idx as usize, value)?;
        }

        Instr::GlobalGet(idx) => {
            let addr = instance.global_addr(*idx)?;
            let Some(value) = store.globals.get(addr).copied() else {
                bail!("global address {addr} out of range");
            };
            frame.push_value(value);
        }

        Instr::GlobalSet(idx) => {
            let addr = instance.global_addr(*idx)?;
            let value = frame.pop_value()?;
            let Some(slot) = store.globals.get_mut(addr) else {
                bail!("global address {addr} out of range");
            };
            *slot = value;
        }

        // Table Instructions
        Instr::TableGet(idx) => {
            let table = table_at(&mut store.tables, instance.table_addr(*idx)?)?;
            let elem = frame.pop::<u32>()? as usize;
            let Some(value) = table.get(elem) else {
                bail!("out of bounds table access");
            };
            frame.push_value(value);
        }

        Instr::TableSet(idx) => {
            let table = table_at(&mut store.tables, instance.table_addr(*idx)?)?;
            let value = frame.pop_value()?;
            let elem = frame.pop::<u32>()? as usize;
            table.set(elem, value)?;
        }

        Instr::TableInit(elem_idx, table_idx) => {
            let (dst, src, count) = pop_bulk(frame)?;
            let elem_addr = instance.elem_addr(*elem_idx)?;
            let Some(Some(segment)) = store.elements.get(elem_addr) else {
                bail!("element segment {} has been dropped", elem_idx.0);
            };
            let Some(values) = src
                .checked_add(count)
                .and_then(|end| segment.values.get(src..end))
            else {
                bail!("out of bounds table access");
            };
            let table = table_at(&mut store.tables, instance.table_addr(*table_idx)?)?;
            table.write(dst, values)?;
        }

        Instr::ElemDrop(idx) => {
            let addr = instance.elem_addr(*idx)?;
            if let Some(slot) = store.elements.get_mut(addr) {
                *slot = None;
            }
        }

        Instr::TableCopy(dst_idx, src_idx) => {
            let (dst, src, count) = pop_bulk(frame)?;
            let dst_addr = instance.table_addr(*dst_idx)?;
            let src_addr = instance.table_addr(*src_idx)?;
            if dst_addr == src_addr {
                table_at(&mut store.tables, dst_addr)?.copy_within(dst, src, count)?;
            } else {
                let values = table_at(&mut store.tables, src_addr)?
                    .slice(src, count)?
                    .to_vec();
                table_at(&mut store.tables, dst_addr)?.write(dst, &values)?;
            }
        }

        Instr::TableGrow(idx) => {
            let table = table_at(&mut store.tables, instance.table_addr(*idx)?)?;
            let delta = frame.pop::<u32>()?;
            let fill = frame.pop_value()?;
            frame.push(table.grow(delta, fill));
        }

        Instr::TableSize(idx) => {
            let table = table_at(&mut store.tables, instance.table_addr(*idx)?)?;
            frame.push(table.len() as i32);
        }

        Instr::TableFill(idx) => {
            let table = table_at(&mut store.tables, instance.table_addr(*idx)?)?;
            let count = frame.pop::<u32>()? as usize;
            let value = frame.pop_value()?;
            let at = frame.pop::<u32>()? as usize;
            table.fill(at, value, count)?;
        }

        // Memory Instructions
        Instr::I32Load(arg) => load!(frame, mem0(store, instance)?, arg, i32, i32),
        Instr::I64Load(arg) => load!(frame, mem0(store, instance)?, arg, i64, i64),
        Instr::F32Load(arg) => load!(frame, mem0(store, instance)?, arg, f32, f32),
        Instr::F64Load(arg) => load!(frame, mem0(store, instance)?, arg, f64, f64),
        Instr::I32Load8S(arg) => load!(frame, mem0(store, instance)?, arg, i8, i32),
        Instr::I32Load8U(arg) => load!(frame, mem0(store, instance)?, arg, u8, i32),
        Instr::I32Load16S(arg) => load!(frame, mem0(store, instance)?, arg, i16, i32),
        Instr::I32Load16U(arg) => load!(frame, mem0(store, instance)?, arg, u16, i32),
        Instr::I64Load8S(arg) => load!(frame, mem0(store, instance)?, arg, i8, i64),
        Instr::I64Load8U(arg) => load!(frame, mem0(store, instance)?, arg, u8, i64),
        Instr::I64Load16S(arg) => load!(frame, mem0(store, instance)?, arg, i16, i64),
        Instr::I64Load16U(arg) => load!(frame, mem0(store, instance)?, arg, u16, i64),
        Instr::I64Load32S(arg) => load!(frame, mem0(store, instance)?, arg, i32, i64),
        Instr::I64Load32U(arg) => load!(frame, mem0(store, instance)?, arg, u32, i64),

        Instr::I32Store(arg) => store!(frame, mem0(store, instance)?, arg, i32, i32),
        Instr::I64Store(arg) => store!(frame, mem0(store, instance)?, arg, i64, i64),
        Instr::F32Store(arg) => store!(frame, mem0(store, instance)?, arg, f32, f32),
        Instr::F64Store(arg) => store!(frame, mem0(store, instance)?, arg, f64, f64),
        Instr::I32Store8(arg) => store!(frame, mem0(store, instance)?, arg, i32, u8),
        Instr::I32Store16(arg) => store!(frame, mem0(store, instance)?, arg, i32, u16),
        Instr::I64Store8(arg) => store!(frame, mem0(store, instance)?, arg, i64, u8),
        Instr::I64Store16(arg) => store!(frame, mem0(store, instance)?, arg, i64, u16),
        Instr::I64Store32(arg) => store!(frame, mem0(store, instance)?, arg, i64, u32),

        Instr::MemorySize(idx) => {
            let mem = memory(store, instance, *idx)?;
            frame.push(mem.page_count() as i32);
        }

        Instr::MemoryGrow(idx) => {
            let mem = memory(store, instance, *idx)?;
            let delta = frame.pop::<u32>()? as usize;
            frame.push(mem.grow(delta).map_or(-1, |old| old as i32));
        }

        Instr::MemoryInit(data_idx, mem_idx) => {
            let (dst, src, count) = pop_bulk(frame)?;
            let mem_addr = instance.memory_addr(*mem_idx)?;
            let data_addr = instance.data_addr(*data_idx)?;
            let Some(Some(data)) = store.datas.get(data_addr) else {
                bail!("data segment {} has been dropped", data_idx.0);
            };
            let Some(bytes) = src.checked_add(count).and_then(|end| data.get(src..end)) else {
                bail!("out of bounds memory access");
            };
            let Some(mem) = store.memories.get_mut(mem_addr) else {
                bail!("memory address {mem_addr} out of range");
            };
            mem.write(dst, bytes)?;
        }

        Instr::DataDrop(idx) => {
            let addr = instance.data_addr(*idx)?;
            if let Some(slot) = store.datas.get_mut(addr) {
                *slot = None;
            }
        }

        Instr::MemoryCopy(dst_idx, src_idx) => {
            instance.memory_addr(*src_idx)?;
            let mem = memory(store, instance, *dst_idx)?;
            let (dst, src, count) = pop_bulk(frame)?;
            mem.copy_overlapping_data(dst, src, count)?;
        }

        Instr::MemoryFill(idx) => {
            let mem = memory(store, instance, *idx)?;
            let count = frame.pop::<u32>()? as usize;
            let value = frame.pop::<i32>()?;
            let at = frame.pop::<u32>()? as usize;
            mem.fill_data(value as u8, at, count)?;
        }

        // Numeric Instructions
        Instr::I32Const(v) => frame.push(*v),
        Instr::I64Const(v) => frame.push(*v),
        Instr::F32Const(bits) => frame.push(*bits),
        Instr::F64Const(bits) => frame.push(*bits),

        Instr::I32Eqz => unop!(frame, i32, |a| (a == 0) as i32),
        Instr::I32Eq => binop!(frame, i32, |a, b| (a == b) as i32),
        Instr::I32Ne => binop!(frame, i32, |a, b| (a != b) as i32),
        Instr::I32LtS => binop!(frame, i32, |a, b| (a < b) as i32),
        Instr::I32LtU => binop!(frame, u32, |a, b| (a < b) as i32),
        Instr::I32GtS => binop!(frame, i32, |a, b| (a > b) as i32),
        Instr::I32GtU => binop!(frame, u32, |a, b| (a > b) as i32),
        Instr::I32LeS => binop!(frame, i32, |a, b| (a <= b) as i32),
        Instr::I32LeU => binop!(frame, u32, |a, b| (a <= b) as i32),
        Instr::I32GeS => binop!(frame, i32, |a, b| (a >= b) as i32),
        Instr::I32GeU => binop!(frame, u32, |a, b| (a >= b) as i32),

        Instr::I64Eqz => unop!(frame, i64, |a| (a == 0) as i32),
        Instr::I64Eq => binop!(frame, i64, |a, b| (a == b) as i32),
        Instr::I64Ne => binop!(frame, i64, |a, b| (a != b) as i32),
        Instr::I64LtS => binop!(frame, i64, |a, b| (a < b) as i32),
        Instr::I64LtU => binop!(frame, u64, |a, b| (a < b) as i32),
        Instr::I64GtS => binop!(frame, i64, |a, b| (a > b) as i32),
        Instr::I64GtU => binop!(frame, u64, |a, b| (a > b) as i32),
        Instr::I64LeS => binop!(frame, i64, |a, b| (a <= b) as i32),
        Instr::I64LeU => binop!(frame, u64, |a, b| (a <= b) as i32),
        Instr::I64GeS => binop!(frame, i64, |a, b| (a >= b) as i32),
        Instr::I64GeU => binop!(frame, u64, |a, b| (a >= b) as i32),

        Instr::F32Eq => binop!(frame, f32, |a, b| (a == b) as i32),
        Instr::F32Ne => binop!(frame, f32, |a, b| (a != b) as i32),
        Instr::F32Lt => binop!(frame, f32, |a, b| (a < b) as i32),
        Instr::F32Gt => binop!(frame, f32, |a, b| (a > b) as i32),
        Instr::F32Le => binop!(frame, f32, |a, b| (a <= b) as i32),
        Instr::F32Ge => binop!(frame, f32, |a, b| (a >= b) as i32),

        Instr::F64Eq => binop!(frame, f64, |a, b| (a == b) as i32),
        Instr::F64Ne => binop!(frame, f64, |a, b| (a != b) as i32),
        Instr::F64Lt => binop!(frame, f64, |a, b| (a < b) as i32),
        Instr::F64Gt => binop!(frame, f64, |a, b| (a > b) as i32),
        Instr::F64Le => binop!(frame, f64, |a, b| (a <= b) as i32),
        Instr::F64Ge => binop!(frame, f64, |a, b| (a >= b) as i32),

        Instr::I32Clz => unop!(frame, i32, |a| a.leading_zeros() as i32),
        Instr::I32Ctz => unop!(frame, i32, |a| a.trailing_zeros() as i32),
        Instr::I32Popcnt => unop!(frame, i32, |a| a.count_ones() as i32),
        Instr::I32Add => binop!(frame, i32, |a, b| a.wrapping_add(b)),
        Instr::I32Sub => binop!(frame, i32, |a, b| a.wrapping_sub(b)),
        Instr::I32Mul => binop!(frame, i32, |a, b| a.wrapping_mul(b)),
        Instr::I32DivS => binop!(frame, i32, |a, b| {
            if b == 0 {
                bail!("integer divide by zero");
            }
            a.checked_div(b).ok_or_else(|| trap!("integer overflow"))?
        }),
        Instr::I32DivU => binop!(frame, u32, |a, b| {
            a.checked_div(b).ok_or_else(|| trap!("integer divide by zero"))?
        }),
        Instr::I32RemS => binop!(frame, i32, |a, b| {
            if b == 0 {
                bail!("integer divide by zero");
            }
            a.wrapping_rem(b)
        }),
        Instr::I32RemU => binop!(frame, u32, |a, b| {
            a.checked_rem(b).ok_or_else(|| trap!("integer divide by zero"))?
        }),
        Instr::I32And => binop!(frame, i32, |a, b| a & b),
        Instr::I32Ior => binop!(frame, i32, |a, b| a | b),
        Instr::I32Xor => binop!(frame, i32, |a, b| a ^ b),
        Instr::I32Shl => binop!(frame, i32, |a, b| a.wrapping_shl(b as u32)),
        Instr::I32ShrS => binop!(frame, i32, |a, b| a.wrapping_shr(b as u32)),
        Instr::I32ShrU => binop!(frame, u32, |a, b| a.wrapping_shr(b)),
        Instr::I32Rol => binop!(frame, u32, |a, b| a.rotate_left(b)),
        Instr::I32Ror => binop!(frame, u32, |a, b| a.rotate_right(b)),

        Instr::I64Clz => unop!(frame, i64, |a| a.leading_zeros() as i64),
        Instr::I64Ctz => unop!(frame, i64, |a| a.trailing_zeros() as i64),
        Instr::I64Popcnt => unop!(frame, i64, |a| a.count_ones() as i64),
        Instr::I64Add => binop!(frame, i64, |a, b| a.wrapping_add(b)),
        Instr::I64Sub => binop!(frame, i64, |a, b| a.wrapping_sub(b)),
        Instr::I64Mul => binop!(frame, i64, |a, b| a.wrapping_mul(b)),
        Instr::I64DivS => binop!(frame, i64, |a, b| {
            if b == 0 {
                bail!("integer divide by zero");
            }
            a.checked_div(b).ok_or_else(|| trap!("integer overflow"))?
        }),
        Instr::I64DivU => binop!(frame, u64, |a, b| {
            a.checked_div(b).ok_or_else(|| trap!("integer divide by zero"))?
        }),
        Instr::I64RemS => binop!(frame, i64, |a, b| {
            if b == 0 {
                bail!("integer divide by zero");
            }
            a.wrapping_rem(b)
        }),
        Instr::I64RemU => binop!(frame, u64, |a, b| {
            a.checked_rem(b).ok_or_else(|| trap!("integer divide by zero"))?
        }),
        Instr::I64And => binop!(frame, i64, |a, b| a & b),
        Instr::I64Ior => binop!(frame, i64, |a, b| a | b),
        Instr::I64Xor => binop!(frame, i64, |a, b| a ^ b),
        Instr::I64Shl => binop!(frame, i64, |a, b| a.wrapping_shl(b as u32)),
        Instr::I64ShrS => binop!(frame, i64, |a, b| a.wrapping_shr(b as u32)),
        Instr::I64ShrU => binop!(frame, u64, |a, b| a.wrapping_shr(b as u32)),
        Instr::I64Rol => binop!(frame, u64, |a, b| a.rotate_left((b & 63) as u32)),
        Instr::I64Ror => binop!(frame, u64, |a, b| a.rotate_right((b & 63) as u32)),

        Instr::F32Abs => unop!(frame, f32, |a| a.abs()),
        Instr::F32Neg => unop!(frame, f32, |a| -a),
        Instr::F32Ceil => unop!(frame, f32, |a| a.ceil()),
        Instr::F32Floor => unop!(frame, f32, |a| a.floor()),
        Instr::F32Trunc => unop!(frame, f32, |a| a.trunc()),
        Instr::F32NearestInt => unop!(frame, f32, |a| nearestf32(a)),
        Instr::F32Sqrt => unop!(frame, f32, |a| a.sqrt()),
        Instr::F32Add => binop!(frame, f32, |a, b| a + b),
        Instr::F32Sub => binop!(frame, f32, |a, b| a - b),
        Instr::F32Mul => binop!(frame, f32, |a, b| a * b),
        Instr::F32Div => binop!(frame, f32, |a, b| a / b),
        Instr::F32Min => binop!(frame, f32, |a, b| fminf32(a, b)),
        Instr::F32Max => binop!(frame, f32, |a, b| fmaxf32(a, b)),
        Instr::F32CopySign => binop!(frame, f32, |a, b| a.copysign(b)),

        Instr::F64Abs => unop!(frame, f64, |a| a.abs()),
        Instr::F64Neg => unop!(frame, f64, |a| -a),
        Instr::F64Ceil => unop!(frame, f64, |a| a.ceil()),
        Instr::F64Floor => unop!(frame, f64, |a| a.floor()),
        Instr::F64Trunc => unop!(frame, f64, |a| a.trunc()),
        Instr::F64NearestInt => unop!(frame, f64, |a| nearestf64(a)),
        Instr::F64Sqrt => unop!(frame, f64, |a| a.sqrt()),
        Instr::F64Add => binop!(frame, f64, |a, b| a + b),
        Instr::F64Sub => binop!(frame, f64, |a, b| a - b),
        Instr::F64Mul => binop!(frame, f64, |a, b| a * b),
        Instr::F64Div => binop!(frame, f64, |a, b| a / b),
        Instr::F64Min => binop!(frame, f64, |a, b| fminf64(a, b)),
        Instr::F64Max => binop!(frame, f64, |a, b| fmaxf64(a, b)),
        Instr::F64CopySign => binop!(frame, f64, |a, b| a.copysign(b)),

        Instr::I32ConvertI64 => unop!(frame, i64, |a| a as i32),
        Instr::I32SConvertF32 => unop!(frame, f32, |a| i32_trunc_f32(a)?),
        Instr::I32UConvertF32 => unop!(frame, f32, |a| u32_trunc_f32(a)?),
        Instr::I32SConvertF64 => unop!(frame, f64, |a| i32_trunc_f64(a)?),
        Instr::I32UConvertF64 => unop!(frame, f64, |a| u32_trunc_f64(a)?),
        Instr::I64SConvertI32 => unop!(frame, i32, |a| a as i64),
        Instr::I64UConvertI32 => unop!(frame, u32, |a| a as u64),
        Instr::I64SConvertF32 => unop!(frame, f32, |a| i64_trunc_f32(a)?),
        Instr::I64UConvertF32 => unop!(frame, f32, |a| u64_trunc_f32(a)?),
        Instr::I64SConvertF64 => unop!(frame, f64, |a| i64_trunc_f64(a)?),
        Instr::I64UConvertF64 => unop!(frame, f64, |a| u64_trunc_f64(a)?),
        Instr::F32SConvertI32 => unop!(frame, i32, |a| a as f32),
        Instr::F32UConvertI32 => unop!(frame, u32, |a| a as f32),
        Instr::F32SConvertI64 => unop!(frame, i64, |a| a as f32),
        Instr::F32UConvertI64 => unop!(frame, u64, |a| a as f32),
        Instr::F32ConvertF64 => unop!(frame, f64, |a| a as f32),
        Instr::F64SConvertI32 => unop!(frame, i32, |a| a as f64),
        Instr::F64UConvertI32 => unop!(frame, u32, |a| a as f64),
        Instr::F64SConvertI64 => unop!(frame, i64, |a| a as f64),
        Instr::F64UConvertI64 => unop!(frame, u64, |a| a as f64),
        Instr::F64ConvertF32 => unop!(frame, f32, |a| a as f64),

        // `as` saturates and maps NaN to zero.
        Instr::I32SConvertSatF32 => unop!(frame, f32, |a| a as i32),
        Instr::I32UConvertSatF32 => unop!(frame, f32, |a| a as u32),
        Instr::I32SConvertSatF64 => unop!(frame, f64, |a| a as i32),
        Instr::I32UConvertSatF64 => unop!(frame, f64, |a| a as u32),
        Instr::I64SConvertSatF32 => unop!(frame, f32, |a| a as i64),
        Instr::I64UConvertSatF32 => unop!(frame, f32, |a| a as u64),
        Instr::I64SConvertSatF64 => unop!(frame, f64, |a| a as i64),
        Instr::I64UConvertSatF64 => unop!(frame, f64, |a| a as u64),

        Instr::I32ReinterpretF32 | Instr::F32ReinterpretI32 => unop!(frame, u32, |a| a),
        Instr::I64ReinterpretF64 | Instr::F64ReinterpretI64 => unop!(frame, u64, |a| a),

        Instr::I32SExtendI8 => unop!(frame, i32, |a| a as i8 as i32),
        Instr::I32SExtendI16 => unop!(frame, i32, |a| a as i16 as i32),
        Instr::I64SExtendI8 => unop!(frame, i64, |a| a as i8 as i64),
        Instr::I64SExtendI16 => unop!(frame, i64, |a| a as i16 as i64),
        Instr::I64SExtendI32 => unop!(frame, i64, |a| a as i32 as i64),

        // Vector Instructions
        Instr::Simd(op, imm) => simd(frame, store, instance, *op, imm)?,
    }

    Ok(Flow::Continue)
}

fn v128_binop(frame: &mut Frame, op: impl Fn(u128, u128) -> u128) -> Result<(), Trap> {
    let rhs = frame.pop_value()?.as_u128();
    let lhs = frame.pop_value()?.as_u128();
    frame.push_value(Value::from_u128(op(lhs, rhs)));
    Ok(())
}

/// The executable part of the vector extension: whole-register loads,
/// stores, constants, bitwise ops, and two splats.
fn simd(
    frame: &mut Frame,
    store: &mut Store,
    instance: &ModuleInstance,
    op: u32,
    imm: &SimdImm,
) -> Result<(), Trap> {
    match (op, imm) {
        // v128.load
        (0x00, SimdImm::MemArg(arg)) => {
            let addr = effective_addr(frame, arg)?;
            let bytes = mem0(store, instance)?.load::<16>(addr)?;
            frame.push_value(Value::from_u128(u128::from_le_bytes(bytes)));
        }

        // v128.store
        (0x0b, SimdImm::MemArg(arg)) => {
            let value = frame.pop_value()?;
            let addr = effective_addr(frame, arg)?;
            mem0(store, instance)?.store(addr, &value.as_u128().to_le_bytes())?;
        }

        // v128.const
        (0x0c, SimdImm::V128(bytes)) => {
            frame.push_value(Value::from_u128(u128::from_le_bytes(*bytes)));
        }

        // i8x16.splat
        (0x0f, _) => {
            let lane = frame.pop::<u32>()? as u8;
            frame.push_value(Value::from_u128(u128::from_le_bytes([lane; 16])));
        }

        // i32x4.splat
        (0x11, _) => {
            let lane = frame.pop::<u32>()? as u128;
            frame.push_value(Value::from_u128(lane | lane << 32 | lane << 64 | lane << 96));
        }

        // v128.not
        (0x4d, _) => {
            let value = frame.pop_value()?.as_u128();
            frame.push_value(Value::from_u128(!value));
        }

        (0x4e, _) => v128_binop(frame, |a, b| a & b)?,
        (0x4f, _) => v128_binop(frame, |a, b| a & !b)?,
        (0x50, _) => v128_binop(frame, |a, b| a | b)?,
        (0x51, _) => v128_binop(frame, |a, b| a ^ b)?,

        _ => bail!("unsupported instruction"),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::{
        test_utils::{assert_return, assert_trap, WasmBuilder},
        value::Value,
    };

    const I32: u8 = 0x7f;
    const I64: u8 = 0x7e;

    #[test]
    fn test_loop_with_br_if() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let ty = wasm.ty(&[I32], &[I32]);
        #[rustfmt::skip]
        let f = wasm.func(ty, &[I32], &[
            0x02, 0x40, 0x03, 0x40,
            0x20, 0, 0x45, 0x0d, 1,
            0x20, 1, 0x20, 0, 0x6a, 0x21, 1,
            0x20, 0, 0x41, 1, 0x6b, 0x21, 0,
            0x0c, 0,
            0x0b, 0x0b,
            0x20, 1, 0x0b,
        ]);
        wasm.export_func("sum", f);

        assert_return(&wasm, "sum", &[Value::from(10i32)], &[Value::from(55i32)])?;
        assert_return(&wasm, "sum", &[Value::from(0i32)], &[Value::from(0i32)])?;
        Ok(())
    }

    #[test]
    fn test_if_else() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let ty = wasm.ty(&[I32], &[I32]);
        // if (result i32) 10 else 20 end
        let choose = wasm.func(ty, &[], &[0x20, 0, 0x04, I32, 0x41, 10, 0x05, 0x41, 20, 0x0b, 0x0b]);
        // if without else: the false case skips the arm
        let maybe = wasm.func(ty, &[I32], &[0x20, 0, 0x04, 0x40, 0x41, 5, 0x21, 1, 0x0b, 0x20, 1, 0x0b]);
        wasm.export_func("choose", choose);
        wasm.export_func("maybe", maybe);

        assert_return(&wasm, "choose", &[Value::from(1i32)], &[Value::from(10i32)])?;
        assert_return(&wasm, "choose", &[Value::from(0i32)], &[Value::from(20i32)])?;
        assert_return(&wasm, "maybe", &[Value::from(1i32)], &[Value::from(5i32)])?;
        assert_return(&wasm, "maybe", &[Value::from(0i32)], &[Value::from(0i32)])?;
        Ok(())
    }

    #[test]
    fn test_br_table_and_return() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let ty = wasm.ty(&[I32], &[I32]);
        #[rustfmt::skip]
        let f = wasm.func(ty, &[], &[
            0x02, 0x40, 0x02, 0x40, 0x02, 0x40,
            0x20, 0, 0x0e, 2, 0, 1, 2,
            0x0b, 0x41, 10, 0x0f,
            0x0b, 0x41, 11, 0x0f,
            0x0b, 0x41, 12, 0x0b,
        ]);
        wasm.export_func("f", f);

        assert_return(&wasm, "f", &[Value::from(0i32)], &[Value::from(10i32)])?;
        assert_return(&wasm, "f", &[Value::from(1i32)], &[Value::from(11i32)])?;
        assert_return(&wasm, "f", &[Value::from(2i32)], &[Value::from(12i32)])?;
        assert_return(&wasm, "f", &[Value::from(99i32)], &[Value::from(12i32)])?;
        Ok(())
    }

    #[test]
    fn test_select() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let ty = wasm.ty(&[I32], &[I32]);
        let f = wasm.func(ty, &[], &[0x41, 1, 0x41, 2, 0x20, 0, 0x1b, 0x0b]);
        wasm.export_func("f", f);

        assert_return(&wasm, "f", &[Value::from(7i32)], &[Value::from(1i32)])?;
        assert_return(&wasm, "f", &[Value::from(0i32)], &[Value::from(2i32)])?;
        Ok(())
    }

    #[test]
    fn test_call_indirect() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let nullary = wasm.ty(&[], &[I32]);
        let unary = wasm.ty(&[I32], &[I32]);
        let a = wasm.func(nullary, &[], &[0x41, 1, 0x0b]);
        let b = wasm.func(nullary, &[], &[0x41, 2, 0x0b]);
        let c = wasm.func(unary, &[], &[0x20, 0, 0x0b]);
        let f = wasm.func(unary, &[], &[0x20, 0, 0x11, nullary as u8, 0, 0x0b]);
        wasm.table(4, None);
        wasm.elem_active(&[0x41, 0], &[a, b, c]);
        wasm.export_func("f", f);

        assert_return(&wasm, "f", &[Value::from(1i32)], &[Value::from(2i32)])?;
        assert_trap(&wasm, "f", &[Value::from(2i32)], "indirect call type mismatch")?;
        assert_trap(&wasm, "f", &[Value::from(3i32)], "uninitialized element")?;
        assert_trap(&wasm, "f", &[Value::from(4i32)], "undefined element")?;
        Ok(())
    }

    #[test]
    fn test_memory_grow_and_bounds() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let unary = wasm.ty(&[I32], &[I32]);
        let nullary = wasm.ty(&[], &[I32]);
        wasm.memory(1, Some(2));
        let grow = wasm.func(unary, &[], &[0x20, 0, 0x40, 0, 0x0b]);
        // store8 -2 at 60, then add load8_u and load8_s of it
        #[rustfmt::skip]
        let bytes = wasm.func(nullary, &[], &[
            0x41, 60, 0x41, 0x7e, 0x3a, 0, 0,
            0x41, 60, 0x2d, 0, 0,
            0x41, 60, 0x2c, 0, 0,
            0x6a, 0x0b,
        ]);
        let past_end = wasm.func(nullary, &[], &[0x41, 0xff, 0xff, 0x03, 0x28, 2, 0, 0x0b]);
        let by_offset = wasm.func(nullary, &[], &[0x41, 0, 0x28, 2, 0x80, 0x80, 0x04, 0x0b]);
        wasm.export_func("grow", grow);
        wasm.export_func("bytes", bytes);
        wasm.export_func("past_end", past_end);
        wasm.export_func("by_offset", by_offset);

        assert_return(&wasm, "grow", &[Value::from(1i32)], &[Value::from(1i32)])?;
        assert_return(&wasm, "grow", &[Value::from(2i32)], &[Value::from(-1i32)])?;
        assert_return(&wasm, "bytes", &[], &[Value::from(252i32)])?;
        assert_trap(&wasm, "past_end", &[], "out of bounds memory access")?;
        assert_trap(&wasm, "by_offset", &[], "out of bounds memory access")?;
        Ok(())
    }

    #[test]
    fn test_integer_division_traps() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let ty = wasm.ty(&[I32, I32], &[I32]);
        let div = wasm.func(ty, &[], &[0x20, 0, 0x20, 1, 0x6d, 0x0b]);
        let rem = wasm.func(ty, &[], &[0x20, 0, 0x20, 1, 0x6f, 0x0b]);
        wasm.export_func("div", div);
        wasm.export_func("rem", rem);

        let args = |a: i32, b: i32| [Value::from(a), Value::from(b)];
        assert_return(&wasm, "div", &args(-7, 2), &[Value::from(-3i32)])?;
        assert_trap(&wasm, "div", &args(1, 0), "integer divide by zero")?;
        assert_trap(&wasm, "div", &args(i32::MIN, -1), "integer overflow")?;
        assert_return(&wasm, "rem", &args(i32::MIN, -1), &[Value::from(0i32)])?;
        assert_trap(&wasm, "rem", &args(1, 0), "integer divide by zero")?;
        Ok(())
    }

    #[test]
    fn test_conversions() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let widen_ty = wasm.ty(&[I32], &[I64]);
        let nullary = wasm.ty(&[], &[I32]);
        let widen = wasm.func(widen_ty, &[], &[0x20, 0, 0xad, 0x0b]);

        let mut saturate = vec![0x44];
        saturate.extend_from_slice(&1e10f64.to_le_bytes());
        saturate.extend_from_slice(&[0xfc, 2, 0x0b]);
        let saturate = wasm.func(nullary, &[], &saturate);

        let mut trapping = vec![0x44];
        trapping.extend_from_slice(&1e10f64.to_le_bytes());
        trapping.extend_from_slice(&[0xaa, 0x0b]);
        let trapping = wasm.func(nullary, &[], &trapping);

        wasm.export_func("widen", widen);
        wasm.export_func("saturate", saturate);
        wasm.export_func("trapping", trapping);

        assert_return(&wasm, "widen", &[Value::from(-1i32)], &[Value::from(4294967295i64)])?;
        assert_return(&wasm, "saturate", &[], &[Value::from(i32::MAX)])?;
        assert_trap(&wasm, "trapping", &[], "integer overflow")?;
        Ok(())
    }

    #[test]
    fn test_simd_bitwise() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let nullary = wasm.ty(&[], &[I32]);
        wasm.memory(1, None);

        // store (splat 7) ^ all-ones at 16, then read lane 1 back
        let mut body = vec![0x41, 16, 0x41, 7, 0xfd, 0x11, 0xfd, 0x0c];
        body.extend_from_slice(&[0xff; 16]);
        body.extend_from_slice(&[0xfd, 0x51, 0xfd, 0x0b, 4, 0, 0x41, 20, 0x28, 2, 0, 0x0b]);
        let xor = wasm.func(nullary, &[], &body);
        let unsupported = wasm.func(
            nullary,
            &[],
            &[0x41, 1, 0xfd, 0x0f, 0x41, 1, 0xfd, 0x0f, 0xfd, 0x6e, 0x1a, 0x41, 0, 0x0b],
        );
        wasm.export_func("xor", xor);
        wasm.export_func("unsupported", unsupported);

        assert_return(&wasm, "xor", &[], &[Value::from(-8i32)])?;
        assert_trap(&wasm, "unsupported", &[], "unsupported instruction")?;
        Ok(())
    }

    #[test]
    fn test_bulk_memory() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let nullary = wasm.ty(&[], &[I32]);
        wasm.memory(1, None);
        wasm.data_passive(b"derg");

        // memory.init bytes 1..4 to 0, drop the segment, read byte 0
        #[rustfmt::skip]
        let init = wasm.func(nullary, &[], &[
            0x41, 0, 0x41, 1, 0x41, 3, 0xfc, 8, 0, 0,
            0xfc, 9, 0,
            0x41, 0, 0x2d, 0, 0, 0x0b,
        ]);
        #[rustfmt::skip]
        let dropped = wasm.func(nullary, &[], &[
            0xfc, 9, 0,
            0x41, 0, 0x41, 0, 0x41, 1, 0xfc, 8, 0, 0,
            0x41, 0, 0x0b,
        ]);
        // fill 0..4 with 0x2a, copy it to 2..6, read 2..6
        #[rustfmt::skip]
        let fill_copy = wasm.func(nullary, &[], &[
            0x41, 0, 0x41, 0x2a, 0x41, 4, 0xfc, 11, 0,
            0x41, 2, 0x41, 0, 0x41, 4, 0xfc, 10, 0, 0,
            0x41, 2, 0x28, 2, 0, 0x0b,
        ]);
        wasm.export_func("init", init);
        wasm.export_func("dropped", dropped);
        wasm.export_func("fill_copy", fill_copy);

        assert_return(&wasm, "init", &[], &[Value::from(b'e' as i32)])?;
        assert_trap(&wasm, "dropped", &[], "data segment 0 has been dropped")?;
        assert_return(&wasm, "fill_copy", &[], &[Value::from(0x2a2a2a2ai32)])?;
        Ok(())
    }

    #[test]
    fn test_table_init_from_passive_segment() -> anyhow::Result<()> {
        let mut wasm = WasmBuilder::new();
        let nullary = wasm.ty(&[], &[I32]);
        let nine = wasm.func(nullary, &[], &[0x41, 9, 0x0b]);
        #[rustfmt::skip]
        let f = wasm.func(nullary, &[], &[
            0x41, 1, 0x41, 0, 0x41, 1, 0xfc, 12, 0, 0,
            0x41, 1, 0x11, nullary as u8, 0, 0x0b,
        ]);
        // elem.drop, then table.init from the dropped segment
        #[rustfmt::skip]
        let dropped = wasm.func(nullary, &[], &[
            0xfc, 13, 0,
            0x41, 0, 0x41, 0, 0x41, 1, 0xfc, 12, 0, 0,
            0xfc, 16, 0, 0x0b,
        ]);
        wasm.table(2, None);
        wasm.elem_passive(&[nine]);
        wasm.export_func("f", f);
        wasm.export_func("dropped", dropped);

        assert_return(&wasm, "f", &[], &[Value::from(9i32)])?;
        assert_trap(&wasm, "dropped", &[], "element segment 0 has been dropped")?;
        Ok(())
    }
}
