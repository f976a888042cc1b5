use std::fmt::Debug;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub enum RefType {
    #[default]
    FuncRef,
    ExternRef,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    Ref(RefType),
}

impl From<RefType> for ValType {
    fn from(value: RefType) -> Self {
        ValType::Ref(value)
    }
}

impl std::fmt::Display for ValType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValType::I32 => f.write_str("i32"),
            ValType::F32 => f.write_str("f32"),
            ValType::I64 => f.write_str("i64"),
            ValType::F64 => f.write_str("f64"),
            ValType::V128 => f.write_str("v128"),
            ValType::Ref(RefType::FuncRef) => f.write_str("funcref"),
            ValType::Ref(RefType::ExternRef) => f.write_str("externref"),
        }
    }
}

/// A function signature. Two signatures are compatible only if they are
/// structurally equal.
#[derive(Debug, PartialEq, Eq, Clone, Default, Hash)]
pub struct FuncType {
    pub params: Box<[ValType]>,
    pub results: Box<[ValType]>,
}

impl FuncType {
    pub fn new(params: impl Into<Box<[ValType]>>, results: impl Into<Box<[ValType]>>) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    pub fn input_arity(&self) -> usize {
        self.params.len()
    }

    pub fn output_arity(&self) -> usize {
        self.results.len()
    }
}

impl std::fmt::Display for FuncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (idx, ty) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(") -> (")?;
        for (idx, ty) in self.results.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Limits {
    Min(u32),
    Range(u32, u32),
}

impl Limits {
    pub fn min(&self) -> u32 {
        *match self {
            Limits::Min(min) => min,
            Limits::Range(min, _) => min,
        }
    }

    pub fn max(&self) -> Option<u32> {
        match self {
            Limits::Min(_) => None,
            Limits::Range(_, max) => Some(*max),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MemType(pub Limits);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TableType(pub RefType, pub Limits);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mutability {
    Const,
    Variable,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct GlobalType(pub ValType, pub Mutability);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlockType {
    Empty,
    Val(ValType),
    TypeIndex(TypeIdx),
}

/// # MemArg
///
/// A memarg comprises two elements: an alignment and an offset. Only memory
/// zero is addressable, so there is no memory index.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MemArg(pub u32, pub u32);

impl MemArg {
    pub fn offset(&self) -> usize {
        self.1 as usize
    }

    pub fn align(&self) -> usize {
        self.0 as usize
    }
}

/// Immediate operands of a `0xFD`-prefixed vector instruction.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SimdImm {
    None,
    MemArg(MemArg),
    MemArgLane(MemArg, u8),
    Lane(u8),
    Shuffle([u8; 16]),
    V128([u8; 16]),
}

/// A flattened instruction.
///
/// Structured control instructions carry absolute positions into the
/// function's code array: `target` is where a branch to the construct's label
/// lands, and `else_target` is where a false `if` condition continues.
#[derive(Debug, PartialEq, Clone)]
pub enum Instr {
    // Control Instructions
    Unreachable,
    Nop,
    Block { ty: BlockType, target: usize },
    Loop { ty: BlockType, target: usize },
    If { ty: BlockType, target: usize, else_target: usize },
    Else { target: usize },
    End,
    Br(LabelIdx),
    BrIf(LabelIdx),
    BrTable(Box<[LabelIdx]>, LabelIdx),
    Return,
    Call(FuncIdx),
    CallIndirect(TypeIdx, TableIdx),

    // Reference Instructions
    RefNull(RefType),
    RefIsNull,
    RefFunc(FuncIdx),

    // Parametric Instructions
    Drop,
    Select,
    SelectTyped(Box<[ValType]>),

    // Variable Instructions
    LocalGet(LocalIdx),
    LocalSet(LocalIdx),
    LocalTee(LocalIdx),
    GlobalGet(GlobalIdx),
    GlobalSet(GlobalIdx),

    // Table Instructions
    TableGet(TableIdx),
    TableSet(TableIdx),
    TableInit(ElemIdx, TableIdx),
    ElemDrop(ElemIdx),
    TableCopy(TableIdx, TableIdx),
    TableGrow(TableIdx),
    TableSize(TableIdx),
    TableFill(TableIdx),

    // Memory Instructions
    I32Load(MemArg),
    I64Load(MemArg),
    F32Load(MemArg),
    F64Load(MemArg),
    I32Load8S(MemArg),
    I32Load8U(MemArg),
    I32Load16S(MemArg),
    I32Load16U(MemArg),
    I64Load8S(MemArg),
    I64Load8U(MemArg),
    I64Load16S(MemArg),
    I64Load16U(MemArg),
    I64Load32S(MemArg),
    I64Load32U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    F32Store(MemArg),
    F64Store(MemArg),
    I32Store8(MemArg),
    I32Store16(MemArg),
    I64Store8(MemArg),
    I64Store16(MemArg),
    I64Store32(MemArg),
    MemorySize(MemIdx),
    MemoryGrow(MemIdx),
    MemoryInit(DataIdx, MemIdx),
    DataDrop(DataIdx),
    MemoryCopy(MemIdx, MemIdx),
    MemoryFill(MemIdx),

    // Numeric Instructions
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Ior,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rol,
    I32Ror,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Ior,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rol,
    I64Ror,
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32NearestInt,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32CopySign,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64NearestInt,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64CopySign,
    I32ConvertI64,
    I32SConvertF32,
    I32UConvertF32,
    I32SConvertF64,
    I32UConvertF64,
    I64SConvertI32,
    I64UConvertI32,
    I64SConvertF32,
    I64UConvertF32,
    I64SConvertF64,
    I64UConvertF64,
    F32SConvertI32,
    F32UConvertI32,
    F32SConvertI64,
    F32UConvertI64,
    F32ConvertF64,
    F64SConvertI32,
    F64UConvertI32,
    F64SConvertI64,
    F64UConvertI64,
    F64ConvertF32,
    I32SConvertSatF32,
    I32UConvertSatF32,
    I32SConvertSatF64,
    I32UConvertSatF64,
    I64SConvertSatF32,
    I64UConvertSatF32,
    I64SConvertSatF64,
    I64UConvertSatF64,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    I32SExtendI8,
    I32SExtendI16,
    I64SExtendI8,
    I64SExtendI16,
    I64SExtendI32,

    // Vector Instructions
    Simd(u32, SimdImm),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(transparent)]
pub struct TypeIdx(pub u32);
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct FuncIdx(pub u32);
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct TableIdx(pub u32);
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct MemIdx(pub u32);
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct GlobalIdx(pub u32);
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct ElemIdx(pub u32);
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct DataIdx(pub u32);
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct LocalIdx(pub u32);
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct LabelIdx(pub u32);

#[derive(Debug, PartialEq, Clone)]
pub struct Import {
    pub(crate) r#mod: String,
    pub(crate) nm: String,
    pub(crate) desc: ImportDesc,
}

impl Import {
    pub fn new(module: impl Into<String>, name: impl Into<String>, desc: ImportDesc) -> Self {
        Self {
            r#mod: module.into(),
            nm: name.into(),
            desc,
        }
    }

    pub fn module(&self) -> &str {
        &self.r#mod
    }

    pub fn name(&self) -> &str {
        &self.nm
    }

    pub fn desc(&self) -> &ImportDesc {
        &self.desc
    }
}

impl std::fmt::Display for Import {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.desc {
            ImportDesc::Func(_) => "func",
            ImportDesc::Table(_) => "table",
            ImportDesc::Mem(_) => "memory",
            ImportDesc::Global(_) => "global",
        };
        write!(f, "{} {}.{}", kind, self.r#mod, self.nm)
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ImportDesc {
    Func(TypeIdx),
    Table(TableType),
    Mem(MemType),
    Global(GlobalType),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Export {
    pub(crate) nm: String,
    pub(crate) desc: ExportDesc,
}

impl Export {
    pub fn new(name: impl Into<String>, desc: ExportDesc) -> Self {
        Self {
            nm: name.into(),
            desc,
        }
    }

    pub fn name(&self) -> &str {
        &self.nm
    }

    pub fn desc(&self) -> &ExportDesc {
        &self.desc
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ExportDesc {
    Func(FuncIdx),
    Table(TableIdx),
    Mem(MemIdx),
    Global(GlobalIdx),
}

/// A constant expression, already flattened and terminated by `end`.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Expr(pub Box<[Instr]>);

#[derive(Debug, PartialEq, Clone)]
pub enum ElemMode {
    Passive,
    Active { table_idx: TableIdx, offset: Expr },
    Declarative,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ElemKind {
    Indexes(Box<[FuncIdx]>),
    Exprs(Box<[Expr]>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ElementSegmentSpec {
    pub mode: ElemMode,
    pub ty: RefType,
    pub kind: ElemKind,
    /// The tag the segment was encoded with.
    pub flags: u8,
}

impl ElementSegmentSpec {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match &self.kind {
            ElemKind::Indexes(xs) => xs.len(),
            ElemKind::Exprs(xs) => xs.len(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.mode, ElemMode::Active { .. })
    }

    pub fn is_passive(&self) -> bool {
        matches!(self.mode, ElemMode::Passive)
    }

    pub fn is_declarative(&self) -> bool {
        matches!(self.mode, ElemMode::Declarative)
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Local(pub u32, pub ValType);

#[derive(Debug, PartialEq, Clone)]
pub struct Code {
    pub locals: Box<[Local]>,
    pub body: Box<[Instr]>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum DataMode {
    Passive,
    Active { mem_idx: MemIdx, offset: Expr },
}

#[derive(Debug, PartialEq, Clone)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Box<[u8]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Global(pub GlobalType, pub Expr);

#[derive(Debug, PartialEq, Clone)]
pub struct CustomSection {
    pub name: String,
    pub bytes: Box<[u8]>,
}
