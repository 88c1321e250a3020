mod chunk;
mod gc;
mod heap;
mod ops;
mod table;
mod value;
mod vm;
pub mod debug;
pub mod natives;
pub mod object;

pub use chunk::Chunk;
pub use gc::{GcStats, RootSource, collect};
pub use heap::{GcRef, Heap, SweepReport};
pub use object::{
    NativeFn, ObjClosure, ObjFunction, ObjNative, ObjString, ObjUpvalue, Object, ObjectType, UpvalueState,
    hash_str,
};
pub use ops::Op;
pub use table::Table;
pub use value::{Value, ValueArray};
pub use vm::{CallFrame, VM};
