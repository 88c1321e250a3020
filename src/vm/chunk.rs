use super::value::{ValueArray, grow_capacity};
use super::{Op, Value};

/// A compiled unit of bytecode: instructions with inline operands, one
/// source line per byte, and the constant pool the instructions index into.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<u32>,
    constants: ValueArray,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a byte and its source line. Both buffers grow together.
    pub fn write(&mut self, byte: u8, line: u32) {
        if self.code.len() == self.code.capacity() {
            let additional = grow_capacity(self.code.capacity()) - self.code.len();
            self.code.reserve_exact(additional);
            self.lines.reserve_exact(additional);
        }
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Bytes the next [`write`](Self::write) adds to the chunk's buffers.
    pub fn write_growth(&self) -> usize {
        if self.code.len() < self.code.capacity() {
            return 0;
        }
        let additional = grow_capacity(self.code.capacity()) - self.code.len();
        additional * (1 + std::mem::size_of::<u32>())
    }

    /// Bytes the next [`add_constant`](Self::add_constant) adds to the pool.
    pub fn constant_growth(&self) -> usize {
        self.constants.write_growth()
    }

    pub fn write_op(&mut self, op: Op, line: u32) {
        self.write(op.into(), line);
    }

    /// Append a value to the constant pool and return its index.
    ///
    /// This does not root `value`. Callers that can trigger a collection
    /// while holding an unrooted value should go through
    /// [`VM::add_constant`](super::VM::add_constant).
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.write(value);
        self.constants.len() - 1
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.code.capacity()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    pub fn line(&self, offset: usize) -> Option<u32> {
        self.lines.get(offset).copied()
    }

    pub fn constants(&self) -> &ValueArray {
        &self.constants
    }

    pub fn constant(&self, index: usize) -> Option<Value> {
        self.constants.get(index)
    }

    /// Bytes held by the chunk's buffers, for heap accounting.
    pub fn heap_size(&self) -> usize {
        self.code.capacity()
            + self.lines.capacity() * std::mem::size_of::<u32>()
            + self.constants.capacity() * std::mem::size_of::<Value>()
    }
}
