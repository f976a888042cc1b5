use std::{marker::PhantomData, sync::Arc};

use derg_ir::{FuncType, ValType};

use crate::{
    error::{trap, ExecError, Trap},
    frame::Frame,
    machine::{Func, Machine},
    value::WasmType,
};

/// The native side of a host function.
///
/// Arguments arrive as the frame's locals, in declaration order. Results are
/// pushed onto the frame's operand stack; the last `arity()` values are
/// copied back to the caller.
pub trait HostProxy: Send + Sync {
    fn num_args(&self) -> usize;
    fn arity(&self) -> usize;
    fn invoke(&self, machine: &mut Machine, frame: &mut Frame) -> Result<(), ExecError>;
}

/// The return type of a typed host function: nothing, or one [`WasmType`].
pub trait HostResult: Send + 'static {
    const TYPES: &'static [ValType];

    fn push_onto(self, frame: &mut Frame);
}

impl HostResult for () {
    const TYPES: &'static [ValType] = &[];

    fn push_onto(self, _frame: &mut Frame) {}
}

macro_rules! host_result {
    ($($t:ty),*) => {
        $(
            impl HostResult for $t {
                const TYPES: &'static [ValType] = &[<$t as WasmType>::VAL_TYPE];

                fn push_onto(self, frame: &mut Frame) {
                    frame.push(self);
                }
            }
        )*
    };
}

host_result!(i32, u32, i64, u64, f32, f64);

/// Adapts a plain Rust closure to [`HostProxy`], reading each argument out
/// of the frame's locals through its [`WasmType`].
pub struct TypedProxy<F, Args, R> {
    func: F,
    _marker: PhantomData<fn(Args) -> R>,
}

impl<F, Args, R> TypedProxy<F, Args, R> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

/// Anything that can be registered with [`Machine::register_host_func`].
/// The signature is derived from the argument and result types.
pub trait IntoHostFunc<Args, R> {
    fn into_host_func(self) -> (FuncType, Arc<dyn HostProxy>);
}

macro_rules! typed_proxy {
    ($count:expr; $($arg:ident $idx:tt),*) => {
        impl<F, R, $($arg,)*> HostProxy for TypedProxy<F, ($($arg,)*), R>
        where
            F: Fn(&mut Machine, $($arg),*) -> Result<R, ExecError> + Send + Sync + 'static,
            R: HostResult,
            $($arg: WasmType,)*
        {
            fn num_args(&self) -> usize {
                $count
            }

            fn arity(&self) -> usize {
                R::TYPES.len()
            }

            #[allow(unused_variables)]
            fn invoke(&self, machine: &mut Machine, frame: &mut Frame) -> Result<(), ExecError> {
                let result = (self.func)(machine, $(frame.local::<$arg>($idx)?),*)?;
                result.push_onto(frame);
                Ok(())
            }
        }

        impl<F, R, $($arg,)*> IntoHostFunc<($($arg,)*), R> for F
        where
            F: Fn(&mut Machine, $($arg),*) -> Result<R, ExecError> + Send + Sync + 'static,
            R: HostResult,
            $($arg: WasmType,)*
        {
            fn into_host_func(self) -> (FuncType, Arc<dyn HostProxy>) {
                let params: Vec<ValType> = vec![$(<$arg as WasmType>::VAL_TYPE),*];
                let ty = FuncType::new(params, R::TYPES);
                (ty, Arc::new(TypedProxy::<F, ($($arg,)*), R>::new(self)))
            }
        }
    };
}

typed_proxy!(0;);
typed_proxy!(1; A0 0);
typed_proxy!(2; A0 0, A1 1);
typed_proxy!(3; A0 0, A1 1, A2 2);
typed_proxy!(4; A0 0, A1 1, A2 2, A3 3);
typed_proxy!(5; A0 0, A1 1, A2 2, A3 3, A4 4);

/// A registered native function.
#[derive(Clone)]
pub struct HostFunc {
    pub(crate) module: String,
    pub(crate) name: String,
    pub(crate) ty: FuncType,
    pub(crate) proxy: Arc<dyn HostProxy>,
}

impl HostFunc {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &FuncType {
        &self.ty
    }
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<host {}.{} {}>", self.module, self.name, self.ty)
    }
}

fn host_key(module: &str, name: &str) -> String {
    format!("{module}.{name}")
}

impl Machine {
    /// Register a closure as `module.name`. Its wasm signature comes from
    /// the closure's argument and return types.
    pub fn register_host_func<Args, R>(
        &mut self,
        module: &str,
        name: &str,
        func: impl IntoHostFunc<Args, R>,
    ) {
        let (ty, proxy) = func.into_host_func();
        self.register_raw_host_func(module, name, ty, proxy);
    }

    /// Register any [`HostProxy`] under an explicit signature.
    pub fn register_raw_host_func(
        &mut self,
        module: &str,
        name: &str,
        ty: FuncType,
        proxy: Arc<dyn HostProxy>,
    ) {
        let key = host_key(module, name);
        let func = HostFunc {
            module: module.to_string(),
            name: name.to_string(),
            ty,
            proxy,
        };
        if self.host_funcs.insert(key, func).is_some() {
            log::warn!("replaced host function {module}.{name}");
        }
    }

    /// Allocate a registered host function in the store and return its
    /// address. `expected` is the signature the importer asked for; it only
    /// feeds the error when nothing is registered under the key.
    pub fn resolve_host_func(
        &mut self,
        module: &str,
        name: &str,
        expected: &FuncType,
    ) -> Result<usize, Trap> {
        let key = host_key(module, name);
        let Some(func) = self.host_funcs.get(&key) else {
            return Err(trap!("Could not find host function {key} (expected {expected})"));
        };
        self.store.funcs.push(Func::Host(func.clone()));
        log::debug!("resolved host function {key}");
        Ok(self.store.funcs.len() - 1)
    }
}
