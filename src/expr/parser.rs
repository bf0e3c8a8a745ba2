//! Recursive-descent parser for expressions.
//!
//! Precedence, loosest first:
//!
//! ```text
//! ternary   := or ( '?' ternary ':' ternary )?
//! or        := and ( '||' and )*
//! and       := equality ( '&&' equality )*
//! equality  := compare ( '==' compare )*
//! compare   := additive ( ('<' | '<=' | '>' | '>=' | '!=') additive )*
//! additive  := mult ( ('+' | '-') mult )*
//! mult      := unary ( ('*' | '/') unary )*
//! unary     := '+'? ( '!' unary | '-' unary | pow )
//! pow       := term ( '^' term )*
//! term      := number | '(' ternary ')' | keyword | call | identifier
//! ```

use super::ast::{BinaryOp, Expr, Function, UnaryOp, MAX_LAG_BUFFERS, PARAM_COUNT};
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{Result, SimError};

/// Parser for the expression language.
pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    lag_slots: usize,
}

impl<'a> Parser<'a> {
    /// Tokenize `source` and prepare to parse it.
    pub fn new(source: &'a str) -> Result<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            source,
            tokens,
            pos: 0,
            lag_slots: 0,
        })
    }

    /// Parse a complete expression; trailing input is an error.
    pub fn parse(mut self) -> Result<Expr> {
        if self.current().kind == TokenKind::Eof {
            return Err(self.error("empty expression"));
        }
        let expr = self.parse_ternary()?;
        if self.current().kind != TokenKind::Eof {
            return Err(self.error(format!("unexpected token '{}'", self.current().text)));
        }
        Ok(expr)
    }

    fn current(&self) -> &Token {
        // The token list always ends with Eof, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn skip(&mut self, kind: TokenKind) -> bool {
        if self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        if self.skip(kind) {
            Ok(())
        } else if self.current().kind == TokenKind::Eof {
            Err(self.error(format!("expected {} but reached end of input", what)))
        } else {
            Err(self.error(format!("expected {}, found '{}'", what, self.current().text)))
        }
    }

    fn error(&self, message: impl Into<String>) -> SimError {
        SimError::expression(self.source, self.current().position, message)
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if self.skip(TokenKind::Question) {
            let yes = self.parse_ternary()?;
            self.expect(TokenKind::Colon, "':'")?;
            let no = self.parse_ternary()?;
            return Ok(Expr::Ternary(Box::new(cond), Box::new(yes), Box::new(no)));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut e = self.parse_and()?;
        while self.skip(TokenKind::OrOr) {
            e = binary(BinaryOp::Or, e, self.parse_and()?);
        }
        Ok(e)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut e = self.parse_equality()?;
        while self.skip(TokenKind::AndAnd) {
            e = binary(BinaryOp::And, e, self.parse_equality()?);
        }
        Ok(e)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut e = self.parse_compare()?;
        while self.skip(TokenKind::EqualEqual) {
            e = binary(BinaryOp::Eq, e, self.parse_compare()?);
        }
        Ok(e)
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let mut e = self.parse_additive()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::Ge,
                TokenKind::NotEqual => BinaryOp::Ne,
                _ => return Ok(e),
            };
            self.advance();
            e = binary(op, e, self.parse_additive()?);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut e = self.parse_mult()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(e),
            };
            self.advance();
            e = binary(op, e, self.parse_mult()?);
        }
    }

    fn parse_mult(&mut self) -> Result<Expr> {
        let mut e = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(e),
            };
            self.advance();
            e = binary(op, e, self.parse_unary()?);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.skip(TokenKind::Plus);
        if self.skip(TokenKind::Bang) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.skip(TokenKind::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_pow()
    }

    fn parse_pow(&mut self) -> Result<Expr> {
        let mut e = self.parse_term()?;
        while self.skip(TokenKind::Caret) {
            e = binary(BinaryOp::Pow, e, self.parse_term()?);
        }
        Ok(e)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::OpenParen => {
                self.advance();
                let e = self.parse_ternary()?;
                self.expect(TokenKind::CloseParen, "')'")?;
                Ok(e)
            }
            TokenKind::Number => {
                self.advance();
                token
                    .text
                    .parse::<f64>()
                    .map(Expr::Number)
                    .map_err(|_| {
                        SimError::expression(
                            self.source,
                            token.position,
                            format!("invalid number '{}'", token.text),
                        )
                    })
            }
            TokenKind::Identifier => {
                self.advance();
                self.parse_identifier(&token.text)
            }
            TokenKind::Eof => Err(self.error("unexpected end of input")),
            _ => Err(self.error(format!("unrecognized token '{}'", token.text))),
        }
    }

    fn parse_identifier(&mut self, name: &str) -> Result<Expr> {
        let lower = name.to_ascii_lowercase();

        if let Some(e) = keyword(&lower) {
            return Ok(e);
        }

        // Functions only when called, so labels such as "step" stay usable.
        if self.current().kind == TokenKind::OpenParen {
            match lower.as_str() {
                "integrate" => {
                    let arg = self.parse_single_arg()?;
                    return Ok(Expr::Integrate(Box::new(arg)));
                }
                "diff" => {
                    let arg = self.parse_single_arg()?;
                    return Ok(Expr::Diff(Box::new(arg)));
                }
                "last" => return self.parse_last(),
                "lag" => return self.parse_lag(),
                _ => {}
            }
            if let Some(function) = Function::from_name(&lower) {
                return self.parse_call(function);
            }
        }

        Ok(Expr::NodeRef(name.to_string()))
    }

    fn parse_single_arg(&mut self) -> Result<Expr> {
        self.expect(TokenKind::OpenParen, "'('")?;
        let e = self.parse_ternary()?;
        self.expect(TokenKind::CloseParen, "')'")?;
        Ok(e)
    }

    fn parse_call(&mut self, function: Function) -> Result<Expr> {
        self.expect(TokenKind::OpenParen, "'('")?;
        let mut args = vec![self.parse_ternary()?];
        while self.skip(TokenKind::Comma) {
            args.push(self.parse_ternary()?);
        }
        self.expect(TokenKind::CloseParen, "')'")?;

        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|m| args.len() > m) {
            return Err(self.error(format!(
                "bad number of function args: {}",
                args.len()
            )));
        }
        Ok(Expr::Call(function, args))
    }

    fn parse_last(&mut self) -> Result<Expr> {
        self.expect(TokenKind::OpenParen, "'('")?;
        let token = self.current().clone();
        if token.kind != TokenKind::Identifier {
            return Err(self.error("last() expects a variable name"));
        }
        self.advance();
        self.expect(TokenKind::CloseParen, "')'")?;
        Ok(Expr::Last(token.text))
    }

    fn parse_lag(&mut self) -> Result<Expr> {
        self.expect(TokenKind::OpenParen, "'('")?;
        let input = self.parse_ternary()?;
        self.expect(TokenKind::Comma, "','")?;
        let delay = self.parse_ternary()?;
        self.expect(TokenKind::CloseParen, "')'")?;

        let slot = self.lag_slots;
        if slot >= MAX_LAG_BUFFERS {
            return Err(self.error(format!(
                "too many lag() calls in expression (max {})",
                MAX_LAG_BUFFERS
            )));
        }
        self.lag_slots += 1;
        Ok(Expr::Lag {
            input: Box::new(input),
            delay: Box::new(delay),
            slot,
        })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(op, Box::new(left), Box::new(right))
}

/// Map a lowercase identifier to a built-in variable.
fn keyword(lower: &str) -> Option<Expr> {
    match lower {
        "t" => return Some(Expr::Time),
        "timestep" => return Some(Expr::TimeStep),
        "lastoutput" => return Some(Expr::LastOutput),
        "pi" => return Some(Expr::Number(std::f64::consts::PI)),
        _ => {}
    }

    let bytes = lower.as_bytes();
    let param = |c: u8| {
        let idx = c.wrapping_sub(b'a') as usize;
        (idx < PARAM_COUNT).then_some(idx)
    };

    match bytes {
        // _a .. _i
        [b'_', c] => param(*c).map(Expr::Param),
        // _lasta .. _lasti
        [b'_', b'l', b'a', b's', b't', c] => param(*c).map(Expr::LastParam),
        // _dadt .. _didt
        [b'_', b'd', c, b'd', b't'] => param(*c).map(Expr::Derivative),
        // dadt .. didt
        [b'd', c, b'd', b't'] => param(*c).map(Expr::Derivative),
        _ => None,
    }
}

/// Parse an expression string.
pub fn parse(source: &str) -> Result<Expr> {
    Parser::new(source)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let e = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            e,
            binary(
                BinaryOp::Add,
                Expr::Number(1.0),
                binary(BinaryOp::Mul, Expr::Number(2.0), Expr::Number(3.0))
            )
        );
    }

    #[test]
    fn test_unary_minus_binds_looser_than_pow() {
        let e = parse("-x^2").unwrap();
        assert_eq!(
            e,
            Expr::Unary(
                UnaryOp::Neg,
                Box::new(binary(
                    BinaryOp::Pow,
                    Expr::NodeRef("x".into()),
                    Expr::Number(2.0)
                ))
            )
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(parse("T").unwrap(), Expr::Time);
        assert_eq!(parse("_c").unwrap(), Expr::Param(2));
        assert_eq!(parse("_LastB").unwrap(), Expr::LastParam(1));
        assert_eq!(parse("dadt").unwrap(), Expr::Derivative(0));
        assert_eq!(parse("_dcdt").unwrap(), Expr::Derivative(2));
        assert_eq!(parse("LastOutput").unwrap(), Expr::LastOutput);
        // Out of range letters are ordinary names
        assert_eq!(parse("_z").unwrap(), Expr::NodeRef("_z".into()));
    }

    #[test]
    fn test_function_names_need_parens() {
        assert_eq!(parse("step").unwrap(), Expr::NodeRef("step".into()));
        assert!(matches!(parse("step(t)").unwrap(), Expr::Call(Function::Step, _)));
    }

    #[test]
    fn test_lag_slots_are_sequential() {
        let e = parse("lag(a, 1) + lag(b, 2)").unwrap();
        let Expr::Binary(_, left, right) = e else {
            panic!("expected binary");
        };
        assert!(matches!(*left, Expr::Lag { slot: 0, .. }));
        assert!(matches!(*right, Expr::Lag { slot: 1, .. }));
    }

    #[test]
    fn test_errors_report_position() {
        let err = parse("1 + ").unwrap_err();
        assert!(matches!(err, SimError::ExpressionError { position: 4, .. }));

        assert!(parse("mod(1)").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("1 2").is_err());
        assert!(parse("").is_err());
        assert!(parse("last(1 + 2)").is_err());
    }
}
