//! Built-in native functions.

use std::sync::OnceLock;
use std::time::Instant;

use crate::error::VmError;
use crate::vm::{VM, Value};

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// `clock()`: seconds elapsed since the runtime started, as a number.
pub fn clock(_args: &[Value]) -> Value {
    Value::Number(process_start().elapsed().as_secs_f64())
}

/// Bind every built-in as a global.
pub fn define_builtins(vm: &mut VM) -> Result<(), VmError> {
    process_start();
    vm.define_native("clock", clock)?;
    Ok(())
}
