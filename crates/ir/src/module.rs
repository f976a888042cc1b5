use std::sync::Arc;

use thiserror::Error;

use crate::defs::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    #[error("function section declares {functions} functions but the code section has {bodies}")]
    FunctionCodeMismatch { functions: usize, bodies: usize },

    #[error("type index {0} out of range")]
    TypeIndexOutOfRange(u32),

    #[error("function {func} declares more than {} locals", MAX_LOCALS)]
    TooManyLocals { func: usize },
}

/// Upper bound on the locals one function body may declare, parameters
/// excluded.
pub const MAX_LOCALS: u32 = 50_000;

/// The body of a function defined by the module itself.
#[derive(Debug, PartialEq, Clone)]
pub struct FuncBody {
    /// Declared locals, expanded one entry per slot. Parameters are not
    /// included.
    pub locals: Box<[ValType]>,
    pub code: Arc<[Instr]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FuncDecl {
    pub type_idx: TypeIdx,
    pub ty: FuncType,
    /// `None` for imported functions.
    pub body: Option<FuncBody>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct GlobalDecl {
    pub ty: GlobalType,
    /// `None` for imported globals.
    pub init: Option<Expr>,
}

/// A decoded module. Every index space lists imports first, then the
/// module's own definitions in declaration order.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Module {
    pub(crate) types: Box<[FuncType]>,
    pub(crate) imports: Box<[Import]>,
    pub(crate) funcs: Box<[FuncDecl]>,
    pub(crate) tables: Box<[TableType]>,
    pub(crate) memories: Box<[MemType]>,
    pub(crate) globals: Box<[GlobalDecl]>,
    pub(crate) elements: Box<[ElementSegmentSpec]>,
    pub(crate) datas: Box<[DataSegment]>,
    pub(crate) exports: Box<[Export]>,
    pub(crate) start: Option<FuncIdx>,
    pub(crate) data_count: Option<u32>,
    pub(crate) custom_sections: Vec<CustomSection>,
}

impl Module {
    pub fn types(&self) -> &[FuncType] {
        &self.types
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn funcs(&self) -> &[FuncDecl] {
        &self.funcs
    }

    pub fn tables(&self) -> &[TableType] {
        &self.tables
    }

    pub fn memories(&self) -> &[MemType] {
        &self.memories
    }

    pub fn globals(&self) -> &[GlobalDecl] {
        &self.globals
    }

    pub fn elements(&self) -> &[ElementSegmentSpec] {
        &self.elements
    }

    pub fn datas(&self) -> &[DataSegment] {
        &self.datas
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn start(&self) -> Option<FuncIdx> {
        self.start
    }

    pub fn data_count(&self) -> Option<u32> {
        self.data_count
    }

    pub fn custom_sections(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.custom_sections
            .iter()
            .map(|xs| (xs.name.as_str(), &*xs.bytes))
    }

    pub fn export(&self, name: &str) -> Option<&ExportDesc> {
        self.exports
            .iter()
            .find(|export| export.name() == name)
            .map(Export::desc)
    }

    fn count_imports(&self, pred: impl Fn(&ImportDesc) -> bool) -> usize {
        self.imports.iter().filter(|xs| pred(xs.desc())).count()
    }

    pub fn num_imported_funcs(&self) -> usize {
        self.count_imports(|xs| matches!(xs, ImportDesc::Func(_)))
    }

    pub fn num_imported_tables(&self) -> usize {
        self.count_imports(|xs| matches!(xs, ImportDesc::Table(_)))
    }

    pub fn num_imported_memories(&self) -> usize {
        self.count_imports(|xs| matches!(xs, ImportDesc::Mem(_)))
    }

    pub fn num_imported_globals(&self) -> usize {
        self.count_imports(|xs| matches!(xs, ImportDesc::Global(_)))
    }
}

/// Collects decoded sections and assembles them into a [`Module`].
#[derive(Default, Debug)]
pub struct ModuleBuilder {
    types: Box<[FuncType]>,
    imports: Box<[Import]>,
    functions: Box<[TypeIdx]>,
    tables: Box<[TableType]>,
    memories: Box<[MemType]>,
    globals: Box<[Global]>,
    exports: Box<[Export]>,
    start: Option<FuncIdx>,
    elements: Box<[ElementSegmentSpec]>,
    code: Box<[Code]>,
    datas: Box<[DataSegment]>,
    data_count: Option<u32>,
    custom_sections: Vec<CustomSection>,
}

impl ModuleBuilder {
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    pub fn custom_section(mut self, name: impl Into<String>, bytes: impl Into<Box<[u8]>>) -> Self {
        self.custom_sections.push(CustomSection {
            name: name.into(),
            bytes: bytes.into(),
        });
        self
    }
    pub fn type_section(mut self, xs: impl Into<Box<[FuncType]>>) -> Self {
        self.types = xs.into();
        self
    }
    pub fn import_section(mut self, xs: impl Into<Box<[Import]>>) -> Self {
        self.imports = xs.into();
        self
    }
    pub fn function_section(mut self, xs: impl Into<Box<[TypeIdx]>>) -> Self {
        self.functions = xs.into();
        self
    }
    pub fn table_section(mut self, xs: impl Into<Box<[TableType]>>) -> Self {
        self.tables = xs.into();
        self
    }
    pub fn memory_section(mut self, xs: impl Into<Box<[MemType]>>) -> Self {
        self.memories = xs.into();
        self
    }
    pub fn global_section(mut self, xs: impl Into<Box<[Global]>>) -> Self {
        self.globals = xs.into();
        self
    }
    pub fn export_section(mut self, xs: impl Into<Box<[Export]>>) -> Self {
        self.exports = xs.into();
        self
    }
    pub fn start_section(mut self, xs: FuncIdx) -> Self {
        self.start.replace(xs);
        self
    }
    pub fn element_section(mut self, xs: impl Into<Box<[ElementSegmentSpec]>>) -> Self {
        self.elements = xs.into();
        self
    }
    pub fn code_section(mut self, xs: impl Into<Box<[Code]>>) -> Self {
        self.code = xs.into();
        self
    }
    pub fn data_section(mut self, xs: impl Into<Box<[DataSegment]>>) -> Self {
        self.datas = xs.into();
        self
    }
    pub fn datacount_section(mut self, xs: u32) -> Self {
        self.data_count.replace(xs);
        self
    }

    fn func_type(types: &[FuncType], idx: TypeIdx) -> Result<FuncType, ModuleError> {
        types
            .get(idx.0 as usize)
            .cloned()
            .ok_or(ModuleError::TypeIndexOutOfRange(idx.0))
    }

    /// Join imports, the function section, and the code section into one
    /// function index space, and likewise for tables, memories, and globals.
    pub fn build(self) -> Result<Module, ModuleError> {
        let Self {
            types,
            imports,
            functions,
            tables,
            memories,
            globals,
            exports,
            start,
            elements,
            code,
            datas,
            data_count,
            custom_sections,
        } = self;

        if functions.len() != code.len() {
            return Err(ModuleError::FunctionCodeMismatch {
                functions: functions.len(),
                bodies: code.len(),
            });
        }

        let mut all_funcs = Vec::with_capacity(imports.len() + functions.len());
        let mut all_tables = Vec::with_capacity(tables.len());
        let mut all_memories = Vec::with_capacity(memories.len());
        let mut all_globals = Vec::with_capacity(globals.len());

        for import in imports.iter() {
            match import.desc() {
                ImportDesc::Func(type_idx) => all_funcs.push(FuncDecl {
                    type_idx: *type_idx,
                    ty: Self::func_type(&types, *type_idx)?,
                    body: None,
                }),
                ImportDesc::Table(ty) => all_tables.push(*ty),
                ImportDesc::Mem(ty) => all_memories.push(*ty),
                ImportDesc::Global(ty) => all_globals.push(GlobalDecl { ty: *ty, init: None }),
            }
        }

        for (type_idx, Code { locals, body }) in functions.iter().zip(Vec::from(code)) {
            let declared = locals.iter().try_fold(0u32, |sum, Local(count, _)| {
                sum.checked_add(*count).filter(|total| *total <= MAX_LOCALS)
            });
            if declared.is_none() {
                return Err(ModuleError::TooManyLocals {
                    func: all_funcs.len(),
                });
            }

            let locals = locals
                .iter()
                .flat_map(|Local(count, ty)| std::iter::repeat(*ty).take(*count as usize))
                .collect();

            all_funcs.push(FuncDecl {
                type_idx: *type_idx,
                ty: Self::func_type(&types, *type_idx)?,
                body: Some(FuncBody {
                    locals,
                    code: body.into(),
                }),
            });
        }

        all_tables.extend(tables.iter().copied());
        all_memories.extend(memories.iter().copied());
        all_globals.extend(Vec::from(globals).into_iter().map(|Global(ty, init)| GlobalDecl {
            ty,
            init: Some(init),
        }));

        Ok(Module {
            types,
            imports,
            funcs: all_funcs.into(),
            tables: all_tables.into(),
            memories: all_memories.into(),
            globals: all_globals.into(),
            elements,
            datas,
            exports,
            start,
            data_count,
            custom_sections,
        })
    }
}
