/// Bytecode operations.
///
/// Every opcode is one byte. Operands follow inline:
/// - constant/slot/argument operands are a single byte;
/// - jump offsets are a big-endian `u16`;
/// - `Closure` takes a constant index followed by an `(is_local, index)`
///   byte pair for each upvalue of the referenced function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    // ========================================
    // Constants and literals
    // ========================================
    Constant,
    Nil,
    True,
    False,

    // ========================================
    // Variables
    // ========================================
    Pop,
    GetLocal,
    SetLocal,
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    GetUpvalue,
    SetUpvalue,

    // ========================================
    // Comparison and arithmetic
    // ========================================
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,

    // ========================================
    // Statements and control flow
    // ========================================
    Print,
    Jump,
    JumpIfFalse,
    Loop,
    Call,
    Closure,
    CloseUpvalue,
    Return,
}

impl Op {
    const ALL: [Op; 29] = [
        Op::Constant,
        Op::Nil,
        Op::True,
        Op::False,
        Op::Pop,
        Op::GetLocal,
        Op::SetLocal,
        Op::GetGlobal,
        Op::DefineGlobal,
        Op::SetGlobal,
        Op::GetUpvalue,
        Op::SetUpvalue,
        Op::Equal,
        Op::Greater,
        Op::Less,
        Op::Add,
        Op::Subtract,
        Op::Multiply,
        Op::Divide,
        Op::Not,
        Op::Negate,
        Op::Print,
        Op::Jump,
        Op::JumpIfFalse,
        Op::Loop,
        Op::Call,
        Op::Closure,
        Op::CloseUpvalue,
        Op::Return,
    ];

    /// Mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            Op::Constant => "OP_CONSTANT",
            Op::Nil => "OP_NIL",
            Op::True => "OP_TRUE",
            Op::False => "OP_FALSE",
            Op::Pop => "OP_POP",
            Op::GetLocal => "OP_GET_LOCAL",
            Op::SetLocal => "OP_SET_LOCAL",
            Op::GetGlobal => "OP_GET_GLOBAL",
            Op::DefineGlobal => "OP_DEFINE_GLOBAL",
            Op::SetGlobal => "OP_SET_GLOBAL",
            Op::GetUpvalue => "OP_GET_UPVALUE",
            Op::SetUpvalue => "OP_SET_UPVALUE",
            Op::Equal => "OP_EQUAL",
            Op::Greater => "OP_GREATER",
            Op::Less => "OP_LESS",
            Op::Add => "OP_ADD",
            Op::Subtract => "OP_SUBTRACT",
            Op::Multiply => "OP_MULTIPLY",
            Op::Divide => "OP_DIVIDE",
            Op::Not => "OP_NOT",
            Op::Negate => "OP_NEGATE",
            Op::Print => "OP_PRINT",
            Op::Jump => "OP_JUMP",
            Op::JumpIfFalse => "OP_JUMP_IF_FALSE",
            Op::Loop => "OP_LOOP",
            Op::Call => "OP_CALL",
            Op::Closure => "OP_CLOSURE",
            Op::CloseUpvalue => "OP_CLOSE_UPVALUE",
            Op::Return => "OP_RETURN",
        }
    }

    /// Size of the fixed part of the encoding (opcode plus operands).
    /// `Closure` is followed by a variable-length upvalue list on top of this.
    pub fn encoded_len(self) -> usize {
        match self {
            Op::Constant
            | Op::GetLocal
            | Op::SetLocal
            | Op::GetGlobal
            | Op::DefineGlobal
            | Op::SetGlobal
            | Op::GetUpvalue
            | Op::SetUpvalue
            | Op::Call
            | Op::Closure => 2,
            Op::Jump | Op::JumpIfFalse | Op::Loop => 3,
            _ => 1,
        }
    }
}

impl From<Op> for u8 {
    fn from(op: Op) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Op::ALL.get(byte as usize).copied().ok_or(byte)
    }
}
