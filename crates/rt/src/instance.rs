use std::collections::HashMap;

use derg_ir::{
    DataIdx, DataMode, ElemIdx, ElemKind, ElemMode, ExportDesc, Expr, FuncIdx, FuncType,
    GlobalIdx, ImportDesc, MemIdx, Module, TableIdx, TypeIdx,
};

use crate::{
    error::{bail, trap, ExecError, Trap},
    machine::{ElementSegment, Func, Machine, ModuleFunc},
    memory_region::MemoryRegion,
    table::Table,
    value::Value,
};

/// Something an instance exports, by machine address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternVal {
    Func(usize),
    Table(usize),
    Memory(usize),
    Global(usize),
}

/// Maps a module's local index spaces onto machine addresses.
#[derive(Debug, Clone, Default)]
pub struct ModuleInstance {
    pub(crate) name: String,
    pub(crate) types: Box<[FuncType]>,
    pub(crate) funcs: Vec<usize>,
    pub(crate) tables: Vec<usize>,
    pub(crate) memories: Vec<usize>,
    pub(crate) globals: Vec<usize>,
    pub(crate) elements: Vec<usize>,
    pub(crate) datas: Vec<usize>,
    pub(crate) exports: HashMap<String, ExternVal>,
    /// Set once initialisers and the start function have all succeeded.
    pub(crate) ready: bool,
}

fn lookup(addrs: &[usize], idx: u32, kind: &str) -> Result<usize, Trap> {
    addrs
        .get(idx as usize)
        .copied()
        .ok_or_else(|| trap!("{kind} index {idx} out of range"))
}

impl ModuleInstance {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exports(&self) -> impl Iterator<Item = (&str, ExternVal)> {
        self.exports.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn func_type(&self, TypeIdx(idx): TypeIdx) -> Result<&FuncType, Trap> {
        self.types
            .get(idx as usize)
            .ok_or_else(|| trap!("type index {idx} out of range"))
    }

    pub fn func_addr(&self, FuncIdx(idx): FuncIdx) -> Result<usize, Trap> {
        lookup(&self.funcs, idx, "function")
    }

    pub fn table_addr(&self, TableIdx(idx): TableIdx) -> Result<usize, Trap> {
        lookup(&self.tables, idx, "table")
    }

    /// Only memory zero is addressable.
    pub fn memory_addr(&self, MemIdx(idx): MemIdx) -> Result<usize, Trap> {
        if idx != 0 {
            bail!("Nonzero memory {idx} accessed.");
        }
        lookup(&self.memories, idx, "memory")
    }

    pub fn global_addr(&self, GlobalIdx(idx): GlobalIdx) -> Result<usize, Trap> {
        lookup(&self.globals, idx, "global")
    }

    pub fn elem_addr(&self, ElemIdx(idx): ElemIdx) -> Result<usize, Trap> {
        lookup(&self.elements, idx, "element segment")
    }

    pub fn data_addr(&self, DataIdx(idx): DataIdx) -> Result<usize, Trap> {
        lookup(&self.datas, idx, "data segment")
    }
}

/// Machine addresses satisfying a module's imports, one list per kind, in
/// import order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Externs {
    pub funcs: Vec<usize>,
    pub tables: Vec<usize>,
    pub memories: Vec<usize>,
    pub globals: Vec<usize>,
}

impl Externs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_func(mut self, addr: usize) -> Self {
        self.funcs.push(addr);
        self
    }

    pub fn with_table(mut self, addr: usize) -> Self {
        self.tables.push(addr);
        self
    }

    pub fn with_memory(mut self, addr: usize) -> Self {
        self.memories.push(addr);
        self
    }

    pub fn with_global(mut self, addr: usize) -> Self {
        self.globals.push(addr);
        self
    }

    /// Satisfy every import of `module` from exports of already
    /// instantiated named modules, falling back to registered host
    /// functions for function imports.
    pub fn resolve(machine: &mut Machine, module: &Module) -> Result<Self, Trap> {
        let mut externs = Externs::new();
        for import in module.imports() {
            let exported = machine
                .names
                .get(import.module())
                .and_then(|idx| machine.instances[*idx].exports.get(import.name()))
                .copied();

            match (import.desc(), exported) {
                (ImportDesc::Func(_), Some(ExternVal::Func(addr))) => externs.funcs.push(addr),
                (ImportDesc::Func(type_idx), None) => {
                    let expected = module
                        .types()
                        .get(type_idx.0 as usize)
                        .ok_or_else(|| trap!("type index {} out of range", type_idx.0))?;
                    let addr = machine.resolve_host_func(import.module(), import.name(), expected)?;
                    externs.funcs.push(addr);
                }
                (ImportDesc::Table(_), Some(ExternVal::Table(addr))) => externs.tables.push(addr),
                (ImportDesc::Mem(_), Some(ExternVal::Memory(addr))) => externs.memories.push(addr),
                (ImportDesc::Global(_), Some(ExternVal::Global(addr))) => {
                    externs.globals.push(addr)
                }
                _ => bail!("Could not resolve import {import}"),
            }
            log::debug!("resolved import {import}");
        }
        Ok(externs)
    }
}

impl Machine {
    /// Link `module` against `externs`, allocate everything it defines, run
    /// its initialisers and start function, and register it under `name`.
    ///
    /// If an initialiser or the start function fails, the instance is never
    /// handed out: it has no name and [`Machine::instance`] does not return
    /// it. Its store entries stay allocated; its functions remain callable
    /// through any imported table a segment already wrote them into.
    pub fn instantiate(
        &mut self,
        name: &str,
        module: &Module,
        externs: &Externs,
    ) -> Result<usize, ExecError> {
        self.check_imports(module, externs)?;

        let instance_idx = self.instances.len();
        let mut instance = ModuleInstance {
            name: name.to_string(),
            types: module.types().into(),
            funcs: externs.funcs.clone(),
            tables: externs.tables.clone(),
            memories: externs.memories.clone(),
            globals: externs.globals.clone(),
            ..Default::default()
        };

        for decl in module.funcs() {
            let Some(body) = &decl.body else { continue };
            instance.funcs.push(self.store.funcs.len());
            self.store.funcs.push(Func::Module(ModuleFunc {
                ty: decl.ty.clone(),
                locals: body.locals.clone(),
                code: body.code.clone(),
                instance: instance_idx,
                module: name.to_string(),
            }));
        }

        for ty in &module.tables()[module.num_imported_tables()..] {
            instance.tables.push(self.store.tables.len());
            self.store.tables.push(Table::new(*ty));
        }

        for ty in &module.memories()[module.num_imported_memories()..] {
            instance.memories.push(self.store.memories.len());
            self.store.memories.push(MemoryRegion::new(ty.0));
        }

        let mut global_inits = Vec::new();
        for decl in module.globals() {
            let Some(init) = &decl.init else { continue };
            let addr = self.store.globals.len();
            instance.globals.push(addr);
            self.store.globals.push(Value::default());
            global_inits.push((addr, init));
        }

        for segment in module.elements() {
            instance.elements.push(self.store.elements.len());
            self.store.elements.push(Some(ElementSegment {
                ty: segment.ty,
                values: vec![Value::NULL; segment.len()].into(),
            }));
        }

        for segment in module.datas() {
            instance.datas.push(self.store.datas.len());
            self.store.datas.push(Some(segment.bytes.clone()));
        }

        for export in module.exports() {
            let val = match *export.desc() {
                ExportDesc::Func(idx) => ExternVal::Func(instance.func_addr(idx)?),
                ExportDesc::Table(idx) => ExternVal::Table(instance.table_addr(idx)?),
                ExportDesc::Mem(idx) => ExternVal::Memory(instance.memory_addr(idx)?),
                ExportDesc::Global(idx) => ExternVal::Global(instance.global_addr(idx)?),
            };
            instance.exports.insert(export.name().to_string(), val);
        }

        self.instances.push(instance);
        log::debug!("allocated instance {instance_idx} ({name})");

        for (addr, init) in global_inits {
            let value = self.eval_const_expr(instance_idx, &init.0)?;
            self.store.globals[addr] = value;
        }

        self.init_elements(instance_idx, module)?;
        self.init_datas(instance_idx, module)?;

        if let Some(start) = module.start() {
            let addr = self.instances[instance_idx].func_addr(start)?;
            log::debug!("running start function {} of {name}", start.0);
            self.invoke(addr, &[])?;
        }

        self.instances[instance_idx].ready = true;
        self.names.insert(name.to_string(), instance_idx);
        Ok(instance_idx)
    }

    fn check_imports(&self, module: &Module, externs: &Externs) -> Result<(), Trap> {
        if externs.funcs.len() != module.num_imported_funcs()
            || externs.tables.len() != module.num_imported_tables()
            || externs.memories.len() != module.num_imported_memories()
            || externs.globals.len() != module.num_imported_globals()
        {
            let imports = module
                .imports()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            bail!(
                "Import count mismatch: got {} funcs, {} tables, {} memories, {} globals for imports [{imports}]",
                externs.funcs.len(),
                externs.tables.len(),
                externs.memories.len(),
                externs.globals.len(),
            );
        }

        let mut funcs = externs.funcs.iter();
        let mut tables = externs.tables.iter();
        let mut memories = externs.memories.iter();
        for import in module.imports() {
            match import.desc() {
                ImportDesc::Func(type_idx) => {
                    let expected = module
                        .types()
                        .get(type_idx.0 as usize)
                        .ok_or_else(|| trap!("type index {} out of range", type_idx.0))?;
                    let addr = funcs.next().copied().unwrap_or_default();
                    let Some(got) = self.func_type(addr) else {
                        bail!("Import {import}: no function at address {addr}");
                    };
                    if got != expected {
                        bail!("Import {import}: expected type {expected}, got {got}");
                    }
                }
                ImportDesc::Table(expected) => {
                    let addr = tables.next().copied().unwrap_or_default();
                    let Some(table) = self.table(addr) else {
                        bail!("Import {import}: no table at address {addr}");
                    };
                    if table.ty() != *expected {
                        bail!("Import {import}: expected {expected:?}, got {:?}", table.ty());
                    }
                }
                ImportDesc::Mem(expected) => {
                    let addr = memories.next().copied().unwrap_or_default();
                    let Some(memory) = self.memory(addr) else {
                        bail!("Import {import}: no memory at address {addr}");
                    };
                    if memory.limits() != expected.0 {
                        bail!("Import {import}: expected {:?}, got {:?}", expected.0, memory.limits());
                    }
                }
                ImportDesc::Global(_) => {
                    // TODO: compare against the global's declared type once
                    // globals carry one in the store.
                    log::debug!("not validating type of imported {import}");
                }
            }
        }
        Ok(())
    }

    fn eval_elem_values(
        &mut self,
        instance_idx: usize,
        kind: &ElemKind,
    ) -> Result<Vec<Value>, ExecError> {
        match kind {
            ElemKind::Indexes(idxs) => idxs
                .iter()
                .map(|idx| -> Result<Value, ExecError> {
                    let addr = self.instances[instance_idx].func_addr(*idx)?;
                    Ok(Value::func_ref(addr))
                })
                .collect(),
            ElemKind::Exprs(exprs) => exprs
                .iter()
                .map(|Expr(expr)| self.eval_const_expr(instance_idx, expr))
                .collect(),
        }
    }

    fn init_elements(&mut self, instance_idx: usize, module: &Module) -> Result<(), ExecError> {
        for (idx, segment) in module.elements().iter().enumerate() {
            let addr = self.instances[instance_idx].elements[idx];
            let values = self.eval_elem_values(instance_idx, &segment.kind)?;

            match &segment.mode {
                ElemMode::Active { table_idx, offset } => {
                    let offset = self.eval_const_expr(instance_idx, &offset.0)?.as_u32() as usize;
                    let table_addr = self.instances[instance_idx].table_addr(*table_idx)?;
                    let Some(table) = self.store.tables.get_mut(table_addr) else {
                        bail!("table address {table_addr} out of range");
                    };
                    table.write(offset, &values)?;
                    self.store.elements[addr] = None;
                }
                ElemMode::Declarative => {
                    self.store.elements[addr] = None;
                }
                ElemMode::Passive => {
                    if let Some(segment) = self.store.elements[addr].as_mut() {
                        segment.values = values.into();
                    }
                }
            }
        }
        Ok(())
    }

    fn init_datas(&mut self, instance_idx: usize, module: &Module) -> Result<(), ExecError> {
        for (idx, segment) in module.datas().iter().enumerate() {
            let DataMode::Active { mem_idx, offset } = &segment.mode else {
                continue;
            };
            let addr = self.instances[instance_idx].datas[idx];
            let offset = self.eval_const_expr(instance_idx, &offset.0)?.as_u32() as usize;
            let mem_addr = self.instances[instance_idx].memory_addr(*mem_idx)?;
            let Some(memory) = self.store.memories.get_mut(mem_addr) else {
                bail!("memory address {mem_addr} out of range");
            };
            memory.write(offset, &segment.bytes)?;
            self.store.datas[addr] = None;
        }
        Ok(())
    }

    pub fn exported(&self, instance: usize, name: &str) -> Option<ExternVal> {
        self.instance(instance)?.exports.get(name).copied()
    }

    pub fn exported_func(&self, instance: usize, name: &str) -> Option<usize> {
        match self.exported(instance, name)? {
            ExternVal::Func(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn exported_table(&self, instance: usize, name: &str) -> Option<usize> {
        match self.exported(instance, name)? {
            ExternVal::Table(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn exported_memory(&self, instance: usize, name: &str) -> Option<usize> {
        match self.exported(instance, name)? {
            ExternVal::Memory(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn exported_global(&self, instance: usize, name: &str) -> Option<usize> {
        match self.exported(instance, name)? {
            ExternVal::Global(addr) => Some(addr),
            _ => None,
        }
    }

    /// Decode `bytes`, instantiate the result as `name`, and run its start
    /// function.
    pub fn load_module(&mut self, name: &str, bytes: &[u8], externs: &Externs) -> anyhow::Result<usize> {
        let module = derg_codec::parse(bytes)?;
        Ok(self.instantiate(name, &module, externs)?)
    }
}
