#![allow(dead_code)]

use crate::{
    error::ExecError,
    instance::Externs,
    machine::Machine,
    value::Value,
};

/// `fib(n)`: `if n < 2 { n } else { fib(n - 1) + fib(n - 2) }`, calling
/// itself as function 0.
pub(crate) const FIB_BODY: [u8; 27] = [
    0x20, 0, 0x41, 2, 0x48, 0x04, 0x7f, 0x20, 0, 0x05, 0x20, 0, 0x41, 1, 0x6b, 0x10, 0, 0x20,
    0, 0x41, 2, 0x6b, 0x10, 0, 0x6a, 0x0b, 0x0b,
];

fn write_u32(out: &mut Vec<u8>, value: u32) {
    leb128::write::unsigned(out, value as u64).expect("write to vec");
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    write_u32(out, name.len() as u32);
    out.extend_from_slice(name.as_bytes());
}

fn write_limits(out: &mut Vec<u8>, min: u32, max: Option<u32>) {
    match max {
        Some(max) => {
            out.push(1);
            write_u32(out, min);
            write_u32(out, max);
        }
        None => {
            out.push(0);
            write_u32(out, min);
        }
    }
}

fn write_vec(out: &mut Vec<u8>, items: &[Vec<u8>]) {
    write_u32(out, items.len() as u32);
    for item in items {
        out.extend_from_slice(item);
    }
}

/// Assembles a binary module section by section. Function, table, memory
/// and global indexes count imports first, so declare imports before
/// definitions.
#[derive(Default)]
pub(crate) struct WasmBuilder {
    types: Vec<Vec<u8>>,
    imports: Vec<Vec<u8>>,
    funcs: Vec<u32>,
    tables: Vec<Vec<u8>>,
    memories: Vec<Vec<u8>>,
    globals: Vec<Vec<u8>>,
    exports: Vec<Vec<u8>>,
    start: Option<u32>,
    elems: Vec<Vec<u8>>,
    code: Vec<Vec<u8>>,
    datas: Vec<Vec<u8>>,
    imported_funcs: u32,
}

impl WasmBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ty(&mut self, params: &[u8], results: &[u8]) -> u32 {
        let mut entry = vec![0x60];
        write_u32(&mut entry, params.len() as u32);
        entry.extend_from_slice(params);
        write_u32(&mut entry, results.len() as u32);
        entry.extend_from_slice(results);
        self.types.push(entry);
        self.types.len() as u32 - 1
    }

    pub(crate) fn import_func(&mut self, module: &str, name: &str, ty: u32) -> u32 {
        let mut entry = vec![];
        write_name(&mut entry, module);
        write_name(&mut entry, name);
        entry.push(0x00);
        write_u32(&mut entry, ty);
        self.imports.push(entry);
        self.imported_funcs += 1;
        self.imported_funcs - 1
    }

    pub(crate) fn import_table(&mut self, module: &str, name: &str, min: u32, max: Option<u32>) {
        let mut entry = vec![];
        write_name(&mut entry, module);
        write_name(&mut entry, name);
        entry.extend([0x01, 0x70]);
        write_limits(&mut entry, min, max);
        self.imports.push(entry);
    }

    pub(crate) fn import_memory(&mut self, module: &str, name: &str, min: u32, max: Option<u32>) {
        let mut entry = vec![];
        write_name(&mut entry, module);
        write_name(&mut entry, name);
        entry.push(0x02);
        write_limits(&mut entry, min, max);
        self.imports.push(entry);
    }

    /// Define a function. `locals` lists one value type per local; `body`
    /// must carry its closing `end`.
    pub(crate) fn func(&mut self, ty: u32, locals: &[u8], body: &[u8]) -> u32 {
        self.funcs.push(ty);

        let mut func = vec![];
        write_u32(&mut func, locals.len() as u32);
        for local in locals {
            write_u32(&mut func, 1);
            func.push(*local);
        }
        func.extend_from_slice(body);

        let mut entry = vec![];
        write_u32(&mut entry, func.len() as u32);
        entry.extend_from_slice(&func);
        self.code.push(entry);

        self.imported_funcs + self.funcs.len() as u32 - 1
    }

    pub(crate) fn table(&mut self, min: u32, max: Option<u32>) {
        let mut entry = vec![0x70];
        write_limits(&mut entry, min, max);
        self.tables.push(entry);
    }

    pub(crate) fn memory(&mut self, min: u32, max: Option<u32>) {
        let mut entry = vec![];
        write_limits(&mut entry, min, max);
        self.memories.push(entry);
    }

    /// `init` is a constant expression without its closing `end`.
    pub(crate) fn global(&mut self, valtype: u8, mutable: bool, init: &[u8]) {
        let mut entry = vec![valtype, mutable as u8];
        entry.extend_from_slice(init);
        entry.push(0x0b);
        self.globals.push(entry);
    }

    fn export(&mut self, name: &str, kind: u8, idx: u32) {
        let mut entry = vec![];
        write_name(&mut entry, name);
        entry.push(kind);
        write_u32(&mut entry, idx);
        self.exports.push(entry);
    }

    pub(crate) fn export_func(&mut self, name: &str, idx: u32) {
        self.export(name, 0x00, idx);
    }

    pub(crate) fn export_table(&mut self, name: &str, idx: u32) {
        self.export(name, 0x01, idx);
    }

    pub(crate) fn export_memory(&mut self, name: &str, idx: u32) {
        self.export(name, 0x02, idx);
    }

    pub(crate) fn export_global(&mut self, name: &str, idx: u32) {
        self.export(name, 0x03, idx);
    }

    pub(crate) fn start(&mut self, idx: u32) {
        self.start = Some(idx);
    }

    /// An active funcref segment for table 0. `offset` omits its `end`.
    pub(crate) fn elem_active(&mut self, offset: &[u8], funcs: &[u32]) {
        let mut entry = vec![0x00];
        entry.extend_from_slice(offset);
        entry.push(0x0b);
        write_u32(&mut entry, funcs.len() as u32);
        for func in funcs {
            write_u32(&mut entry, *func);
        }
        self.elems.push(entry);
    }

    pub(crate) fn elem_passive(&mut self, funcs: &[u32]) {
        let mut entry = vec![0x01, 0x00];
        write_u32(&mut entry, funcs.len() as u32);
        for func in funcs {
            write_u32(&mut entry, *func);
        }
        self.elems.push(entry);
    }

    /// An active segment for memory 0. `offset` omits its `end`.
    pub(crate) fn data_active(&mut self, offset: &[u8], bytes: &[u8]) {
        let mut entry = vec![0x00];
        entry.extend_from_slice(offset);
        entry.push(0x0b);
        write_u32(&mut entry, bytes.len() as u32);
        entry.extend_from_slice(bytes);
        self.datas.push(entry);
    }

    pub(crate) fn data_passive(&mut self, bytes: &[u8]) {
        let mut entry = vec![0x01];
        write_u32(&mut entry, bytes.len() as u32);
        entry.extend_from_slice(bytes);
        self.datas.push(entry);
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = b"\0asm\x01\0\0\0".to_vec();
        let mut section = |id: u8, payload: Vec<u8>| {
            out.push(id);
            write_u32(&mut out, payload.len() as u32);
            out.extend_from_slice(&payload);
        };
        let vec_of = |items: &[Vec<u8>]| {
            let mut payload = vec![];
            write_vec(&mut payload, items);
            payload
        };

        if !self.types.is_empty() {
            section(0x1, vec_of(&self.types));
        }
        if !self.imports.is_empty() {
            section(0x2, vec_of(&self.imports));
        }
        if !self.funcs.is_empty() {
            let mut payload = vec![];
            write_u32(&mut payload, self.funcs.len() as u32);
            for ty in &self.funcs {
                write_u32(&mut payload, *ty);
            }
            section(0x3, payload);
        }
        if !self.tables.is_empty() {
            section(0x4, vec_of(&self.tables));
        }
        if !self.memories.is_empty() {
            section(0x5, vec_of(&self.memories));
        }
        if !self.globals.is_empty() {
            section(0x6, vec_of(&self.globals));
        }
        if !self.exports.is_empty() {
            section(0x7, vec_of(&self.exports));
        }
        if let Some(start) = self.start {
            let mut payload = vec![];
            write_u32(&mut payload, start);
            section(0x8, payload);
        }
        if !self.elems.is_empty() {
            section(0x9, vec_of(&self.elems));
        }
        if !self.datas.is_empty() {
            let mut payload = vec![];
            write_u32(&mut payload, self.datas.len() as u32);
            section(0xc, payload);
        }
        if !self.code.is_empty() {
            section(0xa, vec_of(&self.code));
        }
        if !self.datas.is_empty() {
            section(0xb, vec_of(&self.datas));
        }
        out
    }
}

/// Instantiate `wasm` as "main" with no imports and call one of its exports.
pub(crate) fn call_main(
    wasm: &WasmBuilder,
    field: &str,
    args: &[Value],
) -> anyhow::Result<Result<Vec<Value>, ExecError>> {
    let mut machine = Machine::new();
    let instance = machine.load_module("main", &wasm.build(), &Externs::new())?;
    let addr = machine
        .exported_func(instance, field)
        .ok_or_else(|| anyhow::anyhow!(r#"no export named "{field}""#))?;
    Ok(machine.invoke(addr, args))
}

pub(crate) fn assert_return(
    wasm: &WasmBuilder,
    field: &str,
    args: &[Value],
    expected: &[Value],
) -> anyhow::Result<()> {
    let returned = call_main(wasm, field, args)?
        .map_err(|e| anyhow::anyhow!(r#"failed to call "{field}"; error="{e:?}""#))?;
    assert_eq!(
        returned, expected,
        r#"result mismatch; returned={returned:?}; expected={expected:?}"#
    );
    Ok(())
}

pub(crate) fn assert_trap(
    wasm: &WasmBuilder,
    field: &str,
    args: &[Value],
    text: &str,
) -> anyhow::Result<()> {
    match call_main(wasm, field, args)? {
        Ok(result) => {
            anyhow::bail!(r#"expected call of "{field}" to fail but got success; {result:?}"#)
        }
        Err(e) => {
            if !e.to_string().contains(text) {
                anyhow::bail!(r#"expected call of "{field}" to fail with "{text}" but got "{e:?}""#)
            }
        }
    }
    Ok(())
}
