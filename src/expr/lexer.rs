//! Lexer (tokenizer) for the expression language.

use crate::error::{Result, SimError};

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The token's text
    pub text: String,
    /// Byte offset of the token in the source
    pub position: usize,
}

/// Token types in the expression language.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    /// An identifier (variable, function or node name)
    Identifier,
    /// A number literal
    Number,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Bang,
    Question,
    Colon,
    Comma,
    OpenParen,
    CloseParen,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    NotEqual,
    AndAnd,
    OrOr,
    /// End of input
    Eof,
}

/// Lexer for tokenizing expression input.
pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    /// Tokenize the whole input, ending with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let (start, ch) = match self.chars.peek().copied() {
            Some(next) => next,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    position: self.input.len(),
                });
            }
        };

        if ch.is_ascii_digit() || (ch == '.' && self.digit_follows_dot(start)) {
            let text = self.read_number();
            return Ok(Token {
                kind: TokenKind::Number,
                text,
                position: start,
            });
        }

        if is_identifier_start(ch) {
            let text = self.read_identifier();
            return Ok(Token {
                kind: TokenKind::Identifier,
                text,
                position: start,
            });
        }

        self.chars.next();
        let kind = match ch {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '^' => TokenKind::Caret,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            '<' => self.followed_by('=', TokenKind::LessEqual, TokenKind::Less),
            '>' => self.followed_by('=', TokenKind::GreaterEqual, TokenKind::Greater),
            '!' => self.followed_by('=', TokenKind::NotEqual, TokenKind::Bang),
            '=' if self.eat('=') => TokenKind::EqualEqual,
            '&' if self.eat('&') => TokenKind::AndAnd,
            '|' if self.eat('|') => TokenKind::OrOr,
            _ => {
                return Err(SimError::expression(
                    self.input,
                    start,
                    format!("unexpected character '{}'", ch),
                ));
            }
        };

        let end = self.chars.peek().map(|(pos, _)| *pos).unwrap_or(self.input.len());
        Ok(Token {
            kind,
            text: self.input[start..end].to_string(),
            position: start,
        })
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if let Some(&(_, ch)) = self.chars.peek() {
            if ch == expected {
                self.chars.next();
                return true;
            }
        }
        false
    }

    fn followed_by(&mut self, expected: char, yes: TokenKind, no: TokenKind) -> TokenKind {
        if self.eat(expected) {
            yes
        } else {
            no
        }
    }

    fn digit_follows_dot(&self, dot: usize) -> bool {
        self.input[dot + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn read_identifier(&mut self) -> String {
        let mut text = String::new();
        while let Some(&(_, ch)) = self.chars.peek() {
            if is_identifier_char(ch) {
                text.push(ch);
                self.chars.next();
            } else {
                break;
            }
        }
        text
    }

    fn read_number(&mut self) -> String {
        let mut text = String::new();

        // Integer and decimal part
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                text.push(ch);
                self.chars.next();
            } else {
                break;
            }
        }

        // Exponent part, only if digits follow
        if let Some(&(pos, ch)) = self.chars.peek() {
            if ch == 'e' || ch == 'E' {
                let rest = &self.input[pos + 1..];
                let digits_at = if rest.starts_with('+') || rest.starts_with('-') {
                    1
                } else {
                    0
                };
                if rest[digits_at..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit())
                {
                    text.push(ch);
                    self.chars.next();
                    if digits_at == 1 {
                        if let Some((_, sign)) = self.chars.next() {
                            text.push(sign);
                        }
                    }
                    while let Some(&(_, d)) = self.chars.peek() {
                        if d.is_ascii_digit() {
                            text.push(d);
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        text
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '\\'
}

/// Identifier characters include the LaTeX-style `\` and braces so names
/// such as `\alpha` or `Y_{d}` survive tokenization.
fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '\\' | '{' | '}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_lexer_operators() {
        assert_eq!(
            kinds("a<=b && c!=d || !e"),
            vec![
                TokenKind::Identifier,
                TokenKind::LessEqual,
                TokenKind::Identifier,
                TokenKind::AndAnd,
                TokenKind::Identifier,
                TokenKind::NotEqual,
                TokenKind::Identifier,
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_numbers() {
        let tokens = Lexer::new("1.5e-3 .25 2e").tokenize().unwrap();
        assert_eq!(tokens[0].text, "1.5e-3");
        assert_eq!(tokens[1].text, ".25");
        // Trailing 'e' without digits is an identifier
        assert_eq!(tokens[2].text, "2");
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
        assert_eq!(tokens[3].text, "e");
    }

    #[test]
    fn test_lexer_latex_identifier() {
        let tokens = Lexer::new("Y_{d} + \\alpha").tokenize().unwrap();
        assert_eq!(tokens[0].text, "Y_{d}");
        assert_eq!(tokens[2].text, "\\alpha");
    }

    #[test]
    fn test_lexer_rejects_single_ampersand() {
        let err = Lexer::new("a & b").tokenize().unwrap_err();
        assert!(matches!(err, SimError::ExpressionError { position: 2, .. }));
    }
}
