pub mod lexer;

pub use lexer::{Scanner, Token, TokenKind};

use crate::error::VmError;
use crate::vm::VM;

/// A lexical error found while scanning a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u32,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.message)
    }
}

/// Collect the error tokens of a scanned source as diagnostics.
pub fn diagnostics(tokens: &[Token<'_>]) -> Vec<Diagnostic> {
    tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Error)
        .map(|t| Diagnostic {
            line: t.line,
            message: t.lexeme.to_string(),
        })
        .collect()
}

/// Intern every identifier and string literal into the VM, the way the
/// compiler does when it emits name and string constants. String literals
/// are interned without their quotes.
pub fn intern_lexemes(vm: &mut VM, tokens: &[Token<'_>]) -> Result<usize, VmError> {
    let mut interned = 0;
    for token in tokens {
        let chars = match token.kind {
            TokenKind::Identifier => token.lexeme,
            TokenKind::String => token
                .lexeme
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(token.lexeme),
            _ => continue,
        };
        vm.copy_string(chars)?;
        interned += 1;
    }
    Ok(interned)
}
