//! Hand-written lexer for BX source text
//!
//! Produces positioned tokens; `//` starts a line comment. Illegal
//! characters are reported through the reporter and skipped so the parser
//! still sees the rest of the file.

use crate::ast::{Position, SourceRange};
use crate::reporter::Reporter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    /// An integer literal. The token text is a non-negative digit string;
    /// values in `[2^63, 2^64)` wrap to a negative `i64` here and are
    /// rejected by the checker's range rule.
    Number(i64),

    // Keywords
    Def,
    Int,
    Bool,
    Print,
    Var,
    True,
    False,
    If,
    Else,
    While,
    Break,
    Continue,
    Return,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Colon,
    Semicolon,
    Comma,
    Assign,

    // Operators
    PipePipe,
    AmpAmp,
    Pipe,
    Caret,
    Amp,
    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,
    Bang,
}

impl TokenKind {
    /// How the token reads in a diagnostic
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Number(value) => format!("number '{}'", value),
            TokenKind::Def => "'def'".to_string(),
            TokenKind::Int => "'int'".to_string(),
            TokenKind::Bool => "'bool'".to_string(),
            TokenKind::Print => "'print'".to_string(),
            TokenKind::Var => "'var'".to_string(),
            TokenKind::True => "'true'".to_string(),
            TokenKind::False => "'false'".to_string(),
            TokenKind::If => "'if'".to_string(),
            TokenKind::Else => "'else'".to_string(),
            TokenKind::While => "'while'".to_string(),
            TokenKind::Break => "'break'".to_string(),
            TokenKind::Continue => "'continue'".to_string(),
            TokenKind::Return => "'return'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Semicolon => "';'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Assign => "'='".to_string(),
            TokenKind::PipePipe => "'||'".to_string(),
            TokenKind::AmpAmp => "'&&'".to_string(),
            TokenKind::Pipe => "'|'".to_string(),
            TokenKind::Caret => "'^'".to_string(),
            TokenKind::Amp => "'&'".to_string(),
            TokenKind::EqEq => "'=='".to_string(),
            TokenKind::BangEq => "'!='".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Le => "'<='".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::Ge => "'>='".to_string(),
            TokenKind::Shl => "'<<'".to_string(),
            TokenKind::Shr => "'>>'".to_string(),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Percent => "'%'".to_string(),
            TokenKind::Tilde => "'~'".to_string(),
            TokenKind::Bang => "'!'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: SourceRange,
}

fn keyword(text: &str) -> Option<TokenKind> {
    match text {
        "def" => Some(TokenKind::Def),
        "int" => Some(TokenKind::Int),
        "bool" => Some(TokenKind::Bool),
        "print" => Some(TokenKind::Print),
        "var" => Some(TokenKind::Var),
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "while" => Some(TokenKind::While),
        "break" => Some(TokenKind::Break),
        "continue" => Some(TokenKind::Continue),
        "return" => Some(TokenKind::Return),
        _ => None,
    }
}

struct Lexer<'a, 'r> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    reporter: &'r mut Reporter,
}

impl<'a, 'r> Lexer<'a, 'r> {
    fn new(source: &'a str, reporter: &'r mut Reporter) -> Self {
        Lexer {
            chars: source.chars().peekable(),
            line: 0,
            column: 0,
            reporter,
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume the next char when it equals `expected`
    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn run(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }

            let start = self.position();
            if c == '/' {
                self.bump();
                if self.eat('/') {
                    // Line comment
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                tokens.push(self.finish(TokenKind::Slash, start));
                continue;
            }

            if c.is_ascii_digit() {
                tokens.push(self.lex_number(start));
                continue;
            }

            if c.is_ascii_alphabetic() || c == '_' {
                tokens.push(self.lex_word(start));
                continue;
            }

            self.bump();
            let kind = match c {
                '(' => Some(TokenKind::LParen),
                ')' => Some(TokenKind::RParen),
                '{' => Some(TokenKind::LBrace),
                '}' => Some(TokenKind::RBrace),
                ':' => Some(TokenKind::Colon),
                ';' => Some(TokenKind::Semicolon),
                ',' => Some(TokenKind::Comma),
                '+' => Some(TokenKind::Plus),
                '-' => Some(TokenKind::Minus),
                '*' => Some(TokenKind::Star),
                '%' => Some(TokenKind::Percent),
                '^' => Some(TokenKind::Caret),
                '~' => Some(TokenKind::Tilde),
                '=' => Some(if self.eat('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }),
                '!' => Some(if self.eat('=') {
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }),
                '<' => Some(if self.eat('<') {
                    TokenKind::Shl
                } else if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }),
                '>' => Some(if self.eat('>') {
                    TokenKind::Shr
                } else if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }),
                '&' => Some(if self.eat('&') {
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }),
                '|' => Some(if self.eat('|') {
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }),
                _ => None,
            };

            match kind {
                Some(kind) => tokens.push(self.finish(kind, start)),
                None => {
                    let range = SourceRange::new(start, self.position());
                    self.reporter
                        .report(format!("illegal character '{}'", c), Some(range));
                }
            }
        }
        tokens
    }

    fn finish(&self, kind: TokenKind, start: Position) -> Token {
        Token {
            kind,
            range: SourceRange::new(start, self.position()),
        }
    }

    fn lex_number(&mut self, start: Position) -> Token {
        let mut digits = String::new();
        while let Some(&c) = self.chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            digits.push(c);
            self.bump();
        }

        // Parse as u64 so a literal up to 2^64 - 1 survives lexing; the
        // wrap to i64 marks values >= 2^63 for the checker's range rule.
        let value = match digits.parse::<u64>() {
            Ok(value) => value as i64,
            Err(_) => {
                let range = SourceRange::new(start, self.position());
                self.reporter
                    .report(format!("integer literal '{}' is too large", digits), Some(range));
                0
            }
        };
        self.finish(TokenKind::Number(value), start)
    }

    fn lex_word(&mut self, start: Position) -> Token {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            text.push(c);
            self.bump();
        }
        let kind = keyword(&text).unwrap_or(TokenKind::Ident(text));
        self.finish(kind, start)
    }
}

/// Tokenize a whole source file, reporting lexical problems
pub fn tokenize(source: &str, reporter: &mut Reporter) -> Vec<Token> {
    Lexer::new(source, reporter).run()
}
