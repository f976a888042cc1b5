use std::{collections::HashMap, sync::Arc};

use derg_ir::{FuncType, Instr, RefType, ValType};

use crate::{
    config::MachineConfig,
    error::{bail, trap, ExecError, Trap},
    exec::{self, Flow},
    frame::Frame,
    host::HostFunc,
    instance::{ExternVal, ModuleInstance},
    memory_region::MemoryRegion,
    table::Table,
    value::{Value, WasmType},
};

/// A function defined by an instantiated module.
#[derive(Debug, Clone)]
pub struct ModuleFunc {
    pub(crate) ty: FuncType,
    pub(crate) locals: Box<[ValType]>,
    pub(crate) code: Arc<[Instr]>,
    pub(crate) instance: usize,
    pub(crate) module: String,
}

#[derive(Debug, Clone)]
pub enum Func {
    Module(ModuleFunc),
    Host(HostFunc),
}

impl Func {
    pub fn ty(&self) -> &FuncType {
        match self {
            Func::Module(func) => &func.ty,
            Func::Host(func) => &func.ty,
        }
    }

    pub fn instance(&self) -> Option<usize> {
        match self {
            Func::Module(func) => Some(func.instance),
            Func::Host(_) => None,
        }
    }
}

/// An element segment after its values have been evaluated.
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub(crate) ty: RefType,
    pub(crate) values: Box<[Value]>,
}

impl ElementSegment {
    pub fn ty(&self) -> RefType {
        self.ty
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Everything instances allocate. Addresses are indices into these lists
/// and stay valid for the life of the machine; dropping a segment leaves
/// `None` in its slot.
#[derive(Debug, Default)]
pub(crate) struct Store {
    pub(crate) funcs: Vec<Func>,
    pub(crate) tables: Vec<Table>,
    pub(crate) memories: Vec<MemoryRegion>,
    pub(crate) globals: Vec<Value>,
    pub(crate) elements: Vec<Option<ElementSegment>>,
    pub(crate) datas: Vec<Option<Box<[u8]>>>,
}

#[derive(Debug, Default)]
pub struct Machine {
    pub(crate) store: Store,
    pub(crate) instances: Vec<ModuleInstance>,
    pub(crate) names: HashMap<String, usize>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) host_funcs: HashMap<String, HostFunc>,
    pub(crate) fuel: Option<u64>,
    pub(crate) config: MachineConfig,
}

impl Machine {
    pub fn new() -> Self {
        Self::with_config(MachineConfig::default())
    }

    pub fn with_config(config: MachineConfig) -> Self {
        Self {
            fuel: config.fuel,
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Remaining instruction budget, if metered.
    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel;
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// A fully initialised instance.
    pub fn instance(&self, idx: usize) -> Option<&ModuleInstance> {
        self.instances.get(idx).filter(|instance| instance.ready)
    }

    pub fn instance_by_name(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn func(&self, addr: usize) -> Option<&Func> {
        self.store.funcs.get(addr)
    }

    pub fn func_type(&self, addr: usize) -> Option<&FuncType> {
        self.store.funcs.get(addr).map(Func::ty)
    }

    pub fn table(&self, addr: usize) -> Option<&Table> {
        self.store.tables.get(addr)
    }

    pub fn table_mut(&mut self, addr: usize) -> Option<&mut Table> {
        self.store.tables.get_mut(addr)
    }

    pub fn memory(&self, addr: usize) -> Option<&MemoryRegion> {
        self.store.memories.get(addr)
    }

    pub fn memory_mut(&mut self, addr: usize) -> Option<&mut MemoryRegion> {
        self.store.memories.get_mut(addr)
    }

    pub fn global(&self, addr: usize) -> Option<Value> {
        self.store.globals.get(addr).copied()
    }

    pub fn set_global(&mut self, addr: usize, value: impl Into<Value>) -> Result<(), Trap> {
        let Some(slot) = self.store.globals.get_mut(addr) else {
            bail!("global address {addr} out of range");
        };
        *slot = value.into();
        Ok(())
    }

    /// Look up `module.name`: exports of a named instance first, then host
    /// functions already resolved into the store.
    pub fn get_func(&self, module: &str, name: &str) -> Option<usize> {
        let exported = self
            .names
            .get(module)
            .and_then(|idx| self.instances[*idx].exports.get(name));
        if let Some(ExternVal::Func(addr)) = exported {
            return Some(*addr);
        }

        self.store.funcs.iter().position(|func| match func {
            Func::Host(host) => host.module == module && host.name == name,
            Func::Module(_) => false,
        })
    }

    fn memory0(&self) -> Result<&MemoryRegion, Trap> {
        self.store
            .memories
            .first()
            .ok_or_else(|| trap!("no memory allocated"))
    }

    fn memory0_mut(&mut self) -> Result<&mut MemoryRegion, Trap> {
        self.store
            .memories
            .first_mut()
            .ok_or_else(|| trap!("no memory allocated"))
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8], Trap> {
        self.memory0()?.read(offset, len)
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Trap> {
        self.memory0_mut()?.write(offset, bytes)
    }

    pub fn load<T: WasmType>(&self, offset: usize) -> Result<T, Trap> {
        let bytes = self.read_bytes(offset, T::SIZE)?;
        Ok(T::from_le_bytes(bytes))
    }

    pub fn store<T: WasmType>(&mut self, offset: usize, value: T) -> Result<(), Trap> {
        let mut buf = [0u8; 8];
        value.write_le_bytes(&mut buf);
        self.write_bytes(offset, &buf[..T::SIZE])
    }

    /// Execute one instruction of the innermost frame.
    pub fn step(&mut self) -> Result<(), ExecError> {
        if let Some(fuel) = self.fuel.as_mut() {
            if *fuel == 0 {
                bail!("Step budget exceeded");
            }
            *fuel -= 1;
        }

        let Some(frame) = self.frames.last() else {
            bail!("no frame to step");
        };
        let code = frame.code.clone();
        let Some(instr) = code.get(frame.pc) else {
            bail!("pc {} out of range", frame.pc);
        };
        if self.config.trace {
            log::trace!("{:>6} {:?}", frame.pc, instr);
        }

        match exec::dispatch(self, instr)? {
            Flow::Continue => {}
            Flow::Call(addr) => self.call(addr)?,
        }

        if self
            .frames
            .last()
            .is_some_and(|frame| !frame.has_label() && frame.prev_frame.is_some())
        {
            self.end_frame()?;
        }
        Ok(())
    }

    /// Step until the frame chain is back down to `depth` frames.
    pub fn execute(&mut self, depth: usize) -> Result<(), ExecError> {
        while self.frames.len() > depth {
            self.step()?;
        }
        Ok(())
    }

    /// Pop the finished innermost frame and hand its results to the caller.
    fn end_frame(&mut self) -> Result<(), Trap> {
        let Some(frame) = self.frames.pop() else {
            bail!("no frame to end");
        };
        let Some(prev) = frame.prev_frame else {
            return Ok(());
        };
        let Some(at) = frame.stack.len().checked_sub(frame.arity) else {
            bail!("function left {} values, expected {}", frame.stack.len(), frame.arity);
        };
        let Some(caller) = self.frames.get_mut(prev) else {
            bail!("caller frame {prev} is gone");
        };
        caller.stack.extend_from_slice(&frame.stack[at..]);
        Ok(())
    }

    /// Move the callee's arguments off the innermost frame and start it. A
    /// module function gets a new frame that `step` runs to completion; a
    /// host function runs to completion right here.
    pub(crate) fn call(&mut self, addr: usize) -> Result<(), ExecError> {
        if self.frames.len() >= self.config.max_call_depth {
            bail!("call stack exhausted");
        }
        let Some(func) = self.store.funcs.get(addr) else {
            bail!("function address {addr} out of range");
        };
        let caller_idx = self.frames.len().checked_sub(1).ok_or_else(|| trap!("no caller frame"))?;

        match func {
            Func::Module(func) => {
                if self.config.debug {
                    log::debug!("calling {}#{addr} {}", func.module, func.ty);
                }
                let mut locals = self.frames[caller_idx].pop_values(func.ty.input_arity())?;
                locals.extend(func.locals.iter().map(|_| Value::default()));

                let mut frame = Frame::new(
                    Some(addr),
                    func.code.clone(),
                    func.instance,
                    locals,
                    func.ty.output_arity(),
                    Some(caller_idx),
                );
                frame.push_label(frame.arity, frame.code.len(), 0)?;
                self.frames.push(frame);
            }

            Func::Host(host) => {
                let proxy = host.proxy.clone();
                if self.config.debug {
                    log::debug!("invoking host function {}.{}", host.module, host.name);
                }

                let caller = &mut self.frames[caller_idx];
                let locals = caller.pop_values(proxy.num_args())?;
                let mut frame = Frame::new(
                    Some(addr),
                    Arc::from(Vec::new()),
                    caller.instance,
                    locals,
                    proxy.arity(),
                    Some(caller_idx),
                );
                frame.push_label(frame.arity, 0, 0)?;

                proxy.invoke(self, &mut frame)?;

                let Some(at) = frame.stack.len().checked_sub(frame.arity) else {
                    bail!("host function left too few values");
                };
                let Some(caller) = self.frames.get_mut(caller_idx) else {
                    bail!("caller frame {caller_idx} is gone");
                };
                caller.stack.extend_from_slice(&frame.stack[at..]);
            }
        }
        Ok(())
    }

    /// Call the function at `addr` with `args` and run it to completion.
    ///
    /// On any error the frame chain is cut back to where it was, so the
    /// machine stays usable.
    pub fn invoke(&mut self, addr: usize, args: &[Value]) -> Result<Vec<Value>, ExecError> {
        let Some(func) = self.store.funcs.get(addr) else {
            bail!("function address {addr} out of range");
        };
        let expected = func.ty().input_arity();
        if args.len() != expected {
            bail!("expected {expected} arguments, got {}", args.len());
        }

        let instance = func
            .instance()
            .or_else(|| self.frames.last().map(Frame::instance))
            .unwrap_or_default();

        let depth = self.frames.len();
        let mut entry = Frame::entry(instance, None);
        entry.stack.extend_from_slice(args);
        self.frames.push(entry);

        let result = self.call(addr).and_then(|()| self.execute(depth + 1));
        if let Err(err) = result {
            self.frames.truncate(depth);
            return Err(err);
        }

        let Some(entry) = self.frames.pop() else {
            bail!("entry frame is gone");
        };
        Ok(entry.stack)
    }

    /// Evaluate a constant expression in the context of `instance` as if it
    /// were the body of a function with no arguments or locals.
    pub(crate) fn eval_const_expr(&mut self, instance: usize, expr: &[Instr]) -> Result<Value, ExecError> {
        let depth = self.frames.len();
        let mut frame = Frame::new(None, Arc::from(expr), instance, Vec::new(), 1, None);
        frame.push_label(0, expr.len(), 0)?;
        self.frames.push(frame);

        let mut run = || {
            while self.frames.get(depth).is_some_and(Frame::has_label) {
                self.step()?;
            }
            Ok::<_, ExecError>(())
        };
        if let Err(err) = run() {
            self.frames.truncate(depth);
            return Err(err);
        }

        self.frames.truncate(depth + 1);
        let Some(frame) = self.frames.pop() else {
            bail!("constant expression frame is gone");
        };
        match frame.stack.as_slice() {
            [value] => Ok(*value),
            _ => bail!("Global init expr did not leave exactly one value on the stack"),
        }
    }
}
