use crate::config::RuntimeConfig;
use crate::error::VmError;
use crate::vm::gc::{self, GcStats, RootSource};
use crate::vm::object::{
    NativeFn, ObjClosure, ObjFunction, ObjNative, ObjString, ObjUpvalue, Object, UpvalueState,
    hash_str,
};
use crate::vm::{Chunk, GcRef, Heap, Table, Value};

/// A call frame: the closure being run and where its stack window starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub closure: GcRef,
    /// Stack index of slot zero (the callee itself).
    pub slot_base: usize,
}

/// Everything the collector treats as a root.
#[derive(Debug, Default)]
struct VmState {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Open upvalues as `(stack slot, upvalue)`, sorted by slot. One cell
    /// per captured slot, so every closure capturing it shares the cell.
    open_upvalues: Vec<(usize, GcRef)>,
    globals: Table,
}

impl RootSource for VmState {
    fn visit_stack(&self, visit: &mut dyn FnMut(Value)) {
        self.stack.iter().copied().for_each(visit);
    }

    fn visit_frames(&self, visit: &mut dyn FnMut(GcRef)) {
        self.frames.iter().map(|frame| frame.closure).for_each(visit);
    }

    fn visit_open_upvalues(&self, visit: &mut dyn FnMut(GcRef)) {
        self.open_upvalues.iter().map(|&(_, upvalue)| upvalue).for_each(visit);
    }

    fn visit_globals(&self, visit: &mut dyn FnMut(GcRef, Value)) {
        for (key, value) in self.globals.iter() {
            visit(key, value);
        }
    }

    fn retained_bytes(&self) -> usize {
        self.globals.heap_size()
    }
}

/// The npa virtual machine state.
///
/// Owns the heap, the string intern table and the mutator's roots. The
/// compiler and the dispatch loop drive it through these operations; every
/// operation that allocates may run a full collection first, so a value
/// must be reachable from a root (usually the operand stack) before any
/// call that allocates.
pub struct VM {
    heap: Heap,
    /// Intern table: every live string, mapped to `nil`.
    strings: Table,
    state: VmState,
    gc_stats: GcStats,
    config: RuntimeConfig,
}

impl VM {
    pub fn new() -> Self {
        Self::new_with_config(RuntimeConfig::default())
    }

    pub fn new_with_config(config: RuntimeConfig) -> Self {
        Self {
            heap: Heap::new_with_config(&config),
            strings: Table::new(),
            state: VmState {
                stack: Vec::with_capacity(256),
                frames: Vec::with_capacity(config.frames_max),
                ..Default::default()
            },
            gc_stats: GcStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The string intern table.
    pub fn strings(&self) -> &Table {
        &self.strings
    }

    pub fn globals(&self) -> &Table {
        &self.state.globals
    }

    pub fn gc_stats(&self) -> &GcStats {
        &self.gc_stats
    }

    pub fn collect_garbage(&mut self) {
        gc::collect(
            &mut self.heap,
            &self.state,
            &mut self.strings,
            &mut self.gc_stats,
        );
    }

    /// Render a value the way `print` shows it.
    pub fn format_value(&self, value: Value) -> String {
        self.heap.format_value(value)
    }

    // =========================================================================
    // Operand stack
    // =========================================================================

    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.state.stack.len() >= self.config.stack_max {
            return Err(VmError::StackOverflow);
        }
        self.state.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        self.state.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Look `distance` slots down from the top without popping.
    pub fn peek(&self, distance: usize) -> Result<Value, VmError> {
        let len = self.state.stack.len();
        if distance >= len {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.state.stack[len - 1 - distance])
    }

    pub fn stack_len(&self) -> usize {
        self.state.stack.len()
    }

    pub fn stack_slot(&self, slot: usize) -> Result<Value, VmError> {
        self.state
            .stack
            .get(slot)
            .copied()
            .ok_or(VmError::InvalidSlot(slot))
    }

    pub fn set_stack_slot(&mut self, slot: usize, value: Value) -> Result<(), VmError> {
        let cell = self
            .state
            .stack
            .get_mut(slot)
            .ok_or(VmError::InvalidSlot(slot))?;
        *cell = value;
        Ok(())
    }

    /// Drop every stack slot, frame and open upvalue, e.g. after a runtime
    /// error. Open upvalues are closed over their slot's current value
    /// first, so closures that escaped into globals keep what they captured
    /// instead of aliasing whatever later lands in the slot.
    pub fn reset_stack(&mut self) {
        for (slot, upvalue) in self.state.open_upvalues.drain(..) {
            // A slot already popped closes over nil.
            let value = self.state.stack.get(slot).copied().unwrap_or(Value::Nil);
            if let Some(cell) = self.heap.upvalue_mut(upvalue) {
                cell.close(value);
            }
        }
        self.state.stack.clear();
        self.state.frames.clear();
        self.state.open_upvalues.clear();
    }

    /// Run `f` with `values` pushed on the operand stack so a collection
    /// inside `f` sees them as roots. The stack is restored afterwards,
    /// whether or not `f` succeeds.
    fn with_roots<T>(
        &mut self,
        values: &[Value],
        f: impl FnOnce(&mut Self) -> Result<T, VmError>,
    ) -> Result<T, VmError> {
        let base = self.state.stack.len();
        for &value in values {
            if let Err(e) = self.push(value) {
                self.state.stack.truncate(base);
                return Err(e);
            }
        }
        let result = f(self);
        self.state.stack.truncate(base);
        result
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// The allocation safepoint: may collect, then places `object` in the
    /// heap. References held by `object` must already be rooted.
    fn allocate(&mut self, object: Object) -> Result<GcRef, VmError> {
        self.reserve(object.heap_size())?;
        Ok(self.heap.insert(object))
    }

    /// Make room for `size` more bytes. Collects when a cycle is due, and
    /// once more if the heap limit is in the way; fails if it still is.
    fn reserve(&mut self, size: usize) -> Result<(), VmError> {
        let mut collected = false;
        if self.heap.should_gc() {
            self.collect_garbage();
            collected = true;
        }
        if let Some(limit) = self.heap.heap_limit() {
            if self.heap.would_exceed_limit(size) && !collected && self.heap.gc_enabled() {
                self.collect_garbage();
            }
            if self.heap.would_exceed_limit(size) {
                return Err(VmError::OutOfMemory {
                    requested: size,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Check buffer growth (chunks, tables) against the heap limit. Growth
    /// is never a safepoint, so this does not collect.
    fn check_growth(&self, additional: usize) -> Result<(), VmError> {
        match self.heap.heap_limit() {
            Some(limit) if self.heap.would_exceed_limit(additional) => Err(VmError::OutOfMemory {
                requested: additional,
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Intern a copy of `chars`.
    pub fn copy_string(&mut self, chars: &str) -> Result<GcRef, VmError> {
        let hash = hash_str(chars);
        if let Some(interned) = self.strings.find_string(&self.heap, chars, hash) {
            return Ok(interned);
        }
        self.allocate_string(chars.into(), hash)
    }

    /// Intern `chars`, adopting the buffer. If an equal string is already
    /// interned the buffer is dropped and the existing string returned.
    pub fn take_string(&mut self, chars: String) -> Result<GcRef, VmError> {
        let hash = hash_str(&chars);
        if let Some(interned) = self.strings.find_string(&self.heap, &chars, hash) {
            return Ok(interned);
        }
        self.allocate_string(chars.into_boxed_str(), hash)
    }

    fn allocate_string(&mut self, chars: Box<str>, hash: u32) -> Result<GcRef, VmError> {
        let object = Object::String(ObjString::with_hash(chars, hash));
        // Collecting only tombstones intern entries, so the table's growth
        // is the same before and after `reserve`.
        self.reserve(object.heap_size() + self.strings.insert_growth())?;
        let string = self.heap.insert(object);
        let before = self.strings.heap_size();
        self.strings.set(&self.heap, string, Value::Nil);
        self.heap.account(before, self.strings.heap_size());
        Ok(string)
    }

    /// Allocate a function with an empty chunk.
    pub fn new_function(&mut self, name: Option<&str>, arity: u8) -> Result<GcRef, VmError> {
        let name = name.map(|n| self.copy_string(n)).transpose()?;
        let roots: Vec<Value> = name.into_iter().map(Value::Obj).collect();
        self.with_roots(&roots, |vm| {
            vm.allocate(Object::Function(ObjFunction {
                name,
                arity,
                ..ObjFunction::new()
            }))
        })
    }

    pub fn new_native(&mut self, name: &'static str, function: NativeFn) -> Result<GcRef, VmError> {
        self.allocate(Object::Native(ObjNative { name, function }))
    }

    /// Allocate a closure over `function` with every upvalue slot unset.
    pub fn new_closure(&mut self, function: GcRef) -> Result<GcRef, VmError> {
        let upvalue_count = self
            .heap
            .function(function)
            .ok_or(VmError::TypeMismatch {
                expected: "function",
            })?
            .upvalue_count;
        self.with_roots(&[Value::Obj(function)], |vm| {
            vm.allocate(Object::Closure(ObjClosure::new(function, upvalue_count)))
        })
    }

    /// Concatenate the two strings on top of the stack, replacing them with
    /// the result. Both operands stay on the stack while the result is
    /// allocated.
    pub fn concatenate(&mut self) -> Result<GcRef, VmError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        let chars = match (self.string_value(a), self.string_value(b)) {
            (Some(a), Some(b)) => {
                let mut chars = String::with_capacity(a.len() + b.len());
                chars.push_str(a.as_str());
                chars.push_str(b.as_str());
                chars
            }
            _ => return Err(VmError::TypeMismatch { expected: "string" }),
        };
        let result = self.take_string(chars)?;
        self.pop()?;
        self.pop()?;
        self.push(Value::Obj(result))?;
        Ok(result)
    }

    fn string_value(&self, value: Value) -> Option<&ObjString> {
        value.as_obj().and_then(|r| self.heap.string(r))
    }

    /// The contents of an interned string.
    pub fn string_chars(&self, string: GcRef) -> Option<&str> {
        self.heap.string(string).map(ObjString::as_str)
    }

    // =========================================================================
    // Chunks
    // =========================================================================

    fn chunk(&self, function: GcRef) -> Result<&Chunk, VmError> {
        self.heap
            .function(function)
            .map(|f| &f.chunk)
            .ok_or(VmError::TypeMismatch {
                expected: "function",
            })
    }

    fn chunk_mut(&mut self, function: GcRef) -> Result<&mut Chunk, VmError> {
        self.heap
            .function_mut(function)
            .map(|f| &mut f.chunk)
            .ok_or(VmError::TypeMismatch {
                expected: "function",
            })
    }

    /// Append a byte to a function's chunk.
    pub fn write_chunk(&mut self, function: GcRef, byte: u8, line: u32) -> Result<(), VmError> {
        self.check_growth(self.chunk(function)?.write_growth())?;
        let chunk = self.chunk_mut(function)?;
        let before = chunk.heap_size();
        chunk.write(byte, line);
        let after = chunk.heap_size();
        self.heap.account(before, after);
        Ok(())
    }

    /// Record how many upvalues closures over `function` capture.
    pub fn set_upvalue_count(&mut self, function: GcRef, count: usize) -> Result<(), VmError> {
        self.heap
            .function_mut(function)
            .ok_or(VmError::TypeMismatch {
                expected: "function",
            })?
            .upvalue_count = count;
        Ok(())
    }

    /// Add `value` to a function's constant pool and return its index.
    ///
    /// Growing the pool is an allocation safepoint, so both the value and
    /// the function are rooted on the stack for the duration. Indices must
    /// fit the one-byte operand.
    pub fn add_constant(&mut self, function: GcRef, value: Value) -> Result<usize, VmError> {
        self.with_roots(&[value, Value::Obj(function)], |vm| {
            let chunk = vm.chunk(function)?;
            if chunk.constants().len() > u8::MAX as usize {
                return Err(VmError::ConstantPoolOverflow);
            }
            let growth = chunk.constant_growth();
            vm.reserve(growth)?;
            let chunk = vm.chunk_mut(function)?;
            let before = chunk.heap_size();
            let index = chunk.add_constant(value);
            let after = chunk.heap_size();
            vm.heap.account(before, after);
            Ok(index)
        })
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    /// Return the open upvalue for `slot`, creating it if no closure has
    /// captured that slot yet.
    pub fn capture_upvalue(&mut self, slot: usize) -> Result<GcRef, VmError> {
        if slot >= self.state.stack.len() {
            return Err(VmError::InvalidSlot(slot));
        }
        match self
            .state
            .open_upvalues
            .binary_search_by_key(&slot, |&(s, _)| s)
        {
            Ok(i) => Ok(self.state.open_upvalues[i].1),
            Err(i) => {
                let upvalue = self.allocate(Object::Upvalue(ObjUpvalue::open(slot)))?;
                self.state.open_upvalues.insert(i, (slot, upvalue));
                Ok(upvalue)
            }
        }
    }

    /// Close every open upvalue at or above `from_slot`, copying the slot's
    /// current value into the cell.
    ///
    /// Every open upvalue must point below the stack top. If one does not
    /// (its slot was popped without closing it), nothing is closed and
    /// `InvalidSlot` is returned.
    pub fn close_upvalues(&mut self, from_slot: usize) -> Result<(), VmError> {
        if let Some(&(slot, _)) = self.state.open_upvalues.last() {
            if slot >= from_slot && slot >= self.state.stack.len() {
                return Err(VmError::InvalidSlot(slot));
            }
        }
        let split = self
            .state
            .open_upvalues
            .partition_point(|&(slot, _)| slot < from_slot);
        for (slot, upvalue) in self.state.open_upvalues.drain(split..) {
            let value = self.state.stack[slot];
            if let Some(cell) = self.heap.upvalue_mut(upvalue) {
                cell.close(value);
            }
        }
        Ok(())
    }

    pub fn open_upvalue_count(&self) -> usize {
        self.state.open_upvalues.len()
    }

    pub fn upvalue_get(&self, upvalue: GcRef) -> Result<Value, VmError> {
        match self.upvalue_state(upvalue)? {
            UpvalueState::Open(slot) => self.stack_slot(slot),
            UpvalueState::Closed(value) => Ok(value),
        }
    }

    pub fn upvalue_set(&mut self, upvalue: GcRef, value: Value) -> Result<(), VmError> {
        match self.upvalue_state(upvalue)? {
            UpvalueState::Open(slot) => self.set_stack_slot(slot, value),
            UpvalueState::Closed(_) => {
                if let Some(cell) = self.heap.upvalue_mut(upvalue) {
                    cell.state = UpvalueState::Closed(value);
                }
                Ok(())
            }
        }
    }

    fn upvalue_state(&self, upvalue: GcRef) -> Result<UpvalueState, VmError> {
        self.heap
            .upvalue(upvalue)
            .map(|cell| cell.state)
            .ok_or(VmError::TypeMismatch { expected: "upvalue" })
    }

    pub fn closure_function(&self, closure: GcRef) -> Result<GcRef, VmError> {
        self.heap
            .closure(closure)
            .map(|c| c.function)
            .ok_or(VmError::TypeMismatch { expected: "closure" })
    }

    pub fn closure_upvalue(&self, closure: GcRef, index: usize) -> Result<GcRef, VmError> {
        self.heap
            .closure(closure)
            .ok_or(VmError::TypeMismatch { expected: "closure" })?
            .upvalues
            .get(index)
            .copied()
            .flatten()
            .ok_or(VmError::InvalidRef)
    }

    pub fn set_closure_upvalue(
        &mut self,
        closure: GcRef,
        index: usize,
        upvalue: GcRef,
    ) -> Result<(), VmError> {
        let cell = self
            .heap
            .closure_mut(closure)
            .ok_or(VmError::TypeMismatch { expected: "closure" })?
            .upvalues
            .get_mut(index)
            .ok_or(VmError::InvalidRef)?;
        *cell = Some(upvalue);
        Ok(())
    }

    // =========================================================================
    // Call frames
    // =========================================================================

    /// Enter `closure`. The callee and its `arg_count` arguments must be the
    /// top `arg_count + 1` stack slots.
    pub fn call_frame(&mut self, closure: GcRef, arg_count: usize) -> Result<(), VmError> {
        if self.heap.closure(closure).is_none() {
            return Err(VmError::TypeMismatch { expected: "closure" });
        }
        if self.state.frames.len() >= self.config.frames_max {
            return Err(VmError::StackOverflow);
        }
        let slot_base = self
            .state
            .stack
            .len()
            .checked_sub(arg_count + 1)
            .ok_or(VmError::StackUnderflow)?;
        self.state.frames.push(CallFrame { closure, slot_base });
        Ok(())
    }

    /// Leave the current frame: close its upvalues, discard its stack
    /// window, and push `result` for the caller.
    pub fn return_frame(&mut self, result: Value) -> Result<(), VmError> {
        let frame = self.state.frames.pop().ok_or(VmError::NoFrame)?;
        self.close_upvalues(frame.slot_base)?;
        self.state.stack.truncate(frame.slot_base);
        self.push(result)
    }

    pub fn frame(&self) -> Option<&CallFrame> {
        self.state.frames.last()
    }

    pub fn frame_count(&self) -> usize {
        self.state.frames.len()
    }

    // =========================================================================
    // Globals and natives
    // =========================================================================

    /// Bind `name`, overwriting any previous binding.
    pub fn define_global(&mut self, name: GcRef, value: Value) -> Result<(), VmError> {
        self.store_global(name, value)
    }

    fn store_global(&mut self, name: GcRef, value: Value) -> Result<(), VmError> {
        self.check_growth(self.state.globals.insert_growth())?;
        let before = self.state.globals.heap_size();
        self.state.globals.set(&self.heap, name, value);
        self.heap.account(before, self.state.globals.heap_size());
        Ok(())
    }

    pub fn get_global(&self, name: GcRef) -> Result<Value, VmError> {
        self.state
            .globals
            .get(&self.heap, name)
            .ok_or_else(|| self.undefined(name))
    }

    /// Assign to an existing global. Assigning an undefined name is an
    /// error and leaves the table unchanged.
    pub fn set_global(&mut self, name: GcRef, value: Value) -> Result<(), VmError> {
        if !self.state.globals.contains_key(&self.heap, name) {
            return Err(self.undefined(name));
        }
        self.store_global(name, value)
    }

    pub fn delete_global(&mut self, name: GcRef) -> bool {
        self.state.globals.delete(&self.heap, name)
    }

    /// Look a global up by name without interning the name.
    pub fn lookup_global(&self, name: &str) -> Option<Value> {
        let key = self.strings.find_string(&self.heap, name, hash_str(name))?;
        self.state.globals.get(&self.heap, key)
    }

    fn undefined(&self, name: GcRef) -> VmError {
        VmError::UndefinedVariable {
            name: self.string_chars(name).unwrap_or("?").to_string(),
        }
    }

    /// Bind a host function as a global.
    pub fn define_native(&mut self, name: &'static str, function: NativeFn) -> Result<(), VmError> {
        let key = self.copy_string(name)?;
        self.with_roots(&[Value::Obj(key)], |vm| {
            let native = vm.new_native(name, function)?;
            vm.define_global(key, Value::Obj(native))
        })
    }

    pub fn call_native(&self, native: GcRef, args: &[Value]) -> Result<Value, VmError> {
        self.heap
            .native(native)
            .map(|n| n.call(args))
            .ok_or(VmError::TypeMismatch { expected: "native" })
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}
