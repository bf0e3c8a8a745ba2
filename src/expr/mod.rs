//! Expression language used by equation, integrator and table elements.
//!
//! ## Syntax
//!
//! ```text
//! GDP * 0.3 + lag(C, 1)
//! t < 10 ? _a : _b
//! integrate(income - spending)
//! ```
//!
//! | Term | Meaning |
//! |------|---------|
//! | `t`, `timestep`, `pi` | time, current step, constant |
//! | `_a` .. `_i` | element parameters |
//! | `_lasta`, `dadt` | committed parameter, its rate of change |
//! | `lastoutput` | output committed last timestep |
//! | any other name | computed value, then labeled node voltage, else 0 |
//!
//! Malformed expressions never abort a circuit: [`Expression::compile`]
//! keeps the error for display and evaluates to 0.

mod ast;
mod eval;
mod lexer;
mod parser;
mod state;

pub use ast::{BinaryOp, Expr, Function, UnaryOp, MAX_LAG_BUFFERS, PARAM_COUNT};
pub use eval::{EvalEnv, NoVariables, VariableSource, MIN_DIVISOR};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{parse, Parser};
pub use state::{ExprState, LAG_BUFFER_SIZE};

use tracing::warn;

/// A compiled expression that remembers its source text and any parse error.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    compiled: std::result::Result<Expr, String>,
}

impl Expression {
    /// Compile `source`, recovering from errors with a warning.
    pub fn compile(source: &str) -> Self {
        let compiled = parse(source).map_err(|e| {
            warn!(expression = source, error = %e, "expression failed to parse");
            e.to_string()
        });
        Self {
            source: source.to_string(),
            compiled,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> Option<&Expr> {
        self.compiled.as_ref().ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.compiled.as_ref().err().map(String::as_str)
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    /// Evaluate, or 0 when the source failed to parse.
    pub fn eval(&self, state: &mut ExprState, env: &EvalEnv<'_>) -> f64 {
        match &self.compiled {
            Ok(expr) => expr.eval(state, env),
            Err(_) => 0.0,
        }
    }

    /// Names this expression reads.
    pub fn references(&self) -> Vec<&str> {
        self.ast().map(Expr::references).unwrap_or_default()
    }
}
