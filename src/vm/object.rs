//! Heap object variants.

use std::fmt;
use std::mem;

use super::heap::GcRef;
use super::{Chunk, Value};

/// Host function callable from scripts. The slice carries the arguments.
pub type NativeFn = fn(args: &[Value]) -> Value;

/// Discriminant of an [`Object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
}

impl ObjectType {
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::String => "string",
            ObjectType::Function => "function",
            ObjectType::Native => "native",
            ObjectType::Closure => "closure",
            ObjectType::Upvalue => "upvalue",
        }
    }
}

/// A garbage-collected object.
#[derive(Debug)]
pub enum Object {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::String(_) => ObjectType::String,
            Object::Function(_) => ObjectType::Function,
            Object::Native(_) => ObjectType::Native,
            Object::Closure(_) => ObjectType::Closure,
            Object::Upvalue(_) => ObjectType::Upvalue,
        }
    }

    /// Approximate bytes owned by this object, including out-of-line buffers.
    pub fn heap_size(&self) -> usize {
        let payload = match self {
            Object::String(s) => s.chars.len(),
            Object::Function(f) => f.chunk.heap_size(),
            Object::Native(_) => 0,
            Object::Closure(c) => c.upvalues.capacity() * mem::size_of::<Option<GcRef>>(),
            Object::Upvalue(_) => 0,
        };
        mem::size_of::<Object>() + payload
    }

    /// Every handle this object refers to.
    pub fn references(&self) -> Vec<GcRef> {
        match self {
            Object::String(_) | Object::Native(_) => Vec::new(),
            Object::Function(f) => f
                .name
                .into_iter()
                .chain(f.chunk.constants().iter().filter_map(Value::as_obj))
                .collect(),
            Object::Closure(c) => std::iter::once(c.function)
                .chain(c.upvalues.iter().flatten().copied())
                .collect(),
            // An open upvalue points at a stack slot, which is a root already.
            Object::Upvalue(u) => match u.state {
                UpvalueState::Closed(value) => value.as_obj().into_iter().collect(),
                UpvalueState::Open(_) => Vec::new(),
            },
        }
    }
}

// =============================================================================
// Strings
// =============================================================================

/// An immutable string with its hash computed once at construction.
#[derive(Debug)]
pub struct ObjString {
    chars: Box<str>,
    hash: u32,
}

impl ObjString {
    pub fn new(chars: impl Into<Box<str>>) -> Self {
        let chars = chars.into();
        let hash = hash_str(&chars);
        Self { chars, hash }
    }

    /// Build from a buffer whose hash the caller already computed.
    pub(crate) fn with_hash(chars: Box<str>, hash: u32) -> Self {
        debug_assert_eq!(hash, hash_str(&chars));
        Self { chars, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

/// 32-bit FNV-1a over the UTF-8 bytes.
pub fn hash_str(s: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

// =============================================================================
// Functions
// =============================================================================

/// A compiled function. Owns its chunk.
#[derive(Debug, Default)]
pub struct ObjFunction {
    /// `None` for the top-level script.
    pub name: Option<GcRef>,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

impl ObjFunction {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct ObjNative {
    pub name: &'static str,
    pub function: NativeFn,
}

impl ObjNative {
    pub fn call(&self, args: &[Value]) -> Value {
        (self.function)(args)
    }
}

impl fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjNative({})", self.name)
    }
}

// =============================================================================
// Closures and upvalues
// =============================================================================

/// A function paired with the cells it captured. The function is shared;
/// the upvalue array is owned.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: GcRef,
    /// Filled slot by slot by the execution loop after allocation.
    pub upvalues: Vec<Option<GcRef>>,
}

impl ObjClosure {
    pub fn new(function: GcRef, upvalue_count: usize) -> Self {
        Self {
            function,
            upvalues: vec![None; upvalue_count],
        }
    }
}

/// Where an upvalue's value currently lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    /// The captured variable is still on the operand stack at this slot.
    Open(usize),
    /// The owning frame returned; the cell holds the value itself.
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
}

impl ObjUpvalue {
    pub fn open(slot: usize) -> Self {
        Self {
            state: UpvalueState::Open(slot),
        }
    }

    pub fn slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalueState::Open(_))
    }

    /// Move the value into the cell. Closing twice keeps the first value.
    pub fn close(&mut self, value: Value) {
        if self.is_open() {
            self.state = UpvalueState::Closed(value);
        }
    }
}
