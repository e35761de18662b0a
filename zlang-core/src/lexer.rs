//! Line lexer for Z source.
//!
//! Z is line-oriented: each non-blank line is one instruction. The
//! lexer strips comments, measures indentation (tabs normalize to four
//! spaces), tolerates comma-, space- or mixed-separated operand lists,
//! and records whether the line carried a `;` statement terminator.
//! Block structure is left to the parser.

use crate::ast::CmpOp;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::span::{FileId, Span};

/// Spaces one tab counts for when measuring indentation.
const TAB_WIDTH: u32 = 4;

/// A token inside a single line.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Opcode word, identifier, type keyword or `AND`/`OR`/`NOT`.
    Word(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// `*name`
    Deref(String),
    Cmp(CmpOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    /// `..` range separator in `FOR`.
    DotDot,
    /// `->` return-type / result-binding marker.
    Arrow,
}

/// One lexed source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub indent: u32,
    pub tokens: Vec<Token>,
    pub span: Span,
    /// Whether the statement ended with `;`. Required for simple
    /// statements inside function bodies.
    pub terminated: bool,
}

/// Result of lexing a whole source file.
#[derive(Debug)]
pub struct LexResult {
    pub lines: Vec<Line>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lex a source file into lines of tokens. Blank and comment-only
/// lines are dropped. Lines that fail to lex are dropped too, with a
/// diagnostic recorded.
pub fn lex(file: FileId, source: &str) -> LexResult {
    let mut lines = Vec::new();
    let mut diagnostics = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        if let Some(line) = lex_line(file, line_no, raw, &mut diagnostics) {
            lines.push(line);
        }
    }
    LexResult { lines, diagnostics }
}

/// Lex one raw line. Returns `None` for blank/comment lines and for
/// lines with a lex error (recorded in `diags`).
pub fn lex_line(
    file: FileId,
    line_no: u32,
    raw: &str,
    diags: &mut Vec<Diagnostic>,
) -> Option<Line> {
    let span = Span::new(file, line_no);
    let indent = measure_indent(raw);
    let body = raw.trim();
    if body.is_empty() || body.starts_with("//") {
        return None;
    }

    let mut lx = LineLexer {
        chars: body.chars().collect(),
        pos: 0,
        span,
        tokens: Vec::new(),
        terminated: false,
    };
    match lx.run() {
        Ok(()) => {
            if lx.tokens.is_empty() {
                None
            } else {
                Some(Line {
                    indent,
                    tokens: lx.tokens,
                    span,
                    terminated: lx.terminated,
                })
            }
        }
        Err(diag) => {
            diags.push(diag);
            None
        }
    }
}

fn measure_indent(raw: &str) -> u32 {
    let mut indent = 0;
    for ch in raw.chars() {
        match ch {
            ' ' => indent += 1,
            '\t' => indent += TAB_WIDTH,
            _ => break,
        }
    }
    indent
}

struct LineLexer {
    chars: Vec<char>,
    pos: usize,
    span: Span,
    tokens: Vec<Token>,
    terminated: bool,
}

impl LineLexer {
    fn run(&mut self) -> Result<(), Diagnostic> {
        while let Some(ch) = self.peek() {
            match ch {
                c if c.is_whitespace() || c == ',' => {
                    self.bump();
                }
                ';' => {
                    // Statement terminator; anything after it on the
                    // same line is ignored.
                    self.terminated = true;
                    return Ok(());
                }
                '/' if self.peek_next() == Some('/') => return Ok(()),
                '"' => self.lex_string()?,
                '(' => self.punct(Token::LParen),
                ')' => self.punct(Token::RParen),
                '[' => self.punct(Token::LBracket),
                ']' => self.punct(Token::RBracket),
                ':' => self.punct(Token::Colon),
                '.' => {
                    if self.peek_next() == Some('.') {
                        self.bump();
                        self.bump();
                        self.tokens.push(Token::DotDot);
                    } else {
                        return Err(self.unexpected(ch));
                    }
                }
                '-' => {
                    if self.peek_next() == Some('>') {
                        self.bump();
                        self.bump();
                        self.tokens.push(Token::Arrow);
                    } else if self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
                        self.bump();
                        self.lex_number(true)?;
                    } else {
                        return Err(self.unexpected(ch));
                    }
                }
                '<' | '>' | '=' | '!' => self.lex_cmp(ch)?,
                '*' => {
                    self.bump();
                    if self.peek().is_some_and(is_ident_start) {
                        let name = self.lex_ident_text();
                        self.tokens.push(Token::Deref(name));
                    } else {
                        return Err(self.unexpected('*'));
                    }
                }
                c if c.is_ascii_digit() => self.lex_number(false)?,
                c if is_ident_start(c) => self.lex_word()?,
                other => return Err(self.unexpected(other)),
            }
        }
        Ok(())
    }

    fn lex_string(&mut self) -> Result<(), Diagnostic> {
        self.bump(); // opening quote
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            match ch {
                '"' => {
                    self.bump();
                    self.tokens.push(Token::Str(text));
                    return Ok(());
                }
                '\\' => {
                    self.bump();
                    match self.peek() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        Some(other) => {
                            text.push('\\');
                            text.push(other);
                        }
                        None => break,
                    }
                    self.bump();
                }
                other => {
                    text.push(other);
                    self.bump();
                }
            }
        }
        Err(Diagnostic::error(
            ErrorCode::SyntaxError,
            "unterminated string literal",
            self.span,
        ))
    }

    fn lex_number(&mut self, negative: bool) -> Result<(), Diagnostic> {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                if ch != '_' {
                    text.push(ch);
                }
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        // A '.' continues the number only when followed by a digit;
        // `1..10` keeps the `..` for the parser.
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if is_float {
            let value: f64 = text.parse().map_err(|_| {
                Diagnostic::error(
                    ErrorCode::SyntaxError,
                    format!("invalid numeric literal '{text}'"),
                    self.span,
                )
            })?;
            self.tokens
                .push(Token::Float(if negative { -value } else { value }));
        } else {
            let value: i64 = text.parse().map_err(|_| {
                Diagnostic::error(
                    ErrorCode::SyntaxError,
                    format!("numeric literal '{text}' is out of range"),
                    self.span,
                )
            })?;
            self.tokens
                .push(Token::Int(if negative { -value } else { value }));
        }
        Ok(())
    }

    fn lex_cmp(&mut self, first: char) -> Result<(), Diagnostic> {
        self.bump();
        let two = self.peek() == Some('=');
        let sym = match (first, two) {
            ('=', true) => "==",
            ('!', true) => "!=",
            ('<', true) => "<=",
            ('>', true) => ">=",
            ('<', false) => "<",
            ('>', false) => ">",
            _ => {
                return Err(Diagnostic::error(
                    ErrorCode::SyntaxError,
                    format!("unknown operator '{first}'"),
                    self.span,
                ));
            }
        };
        if two {
            self.bump();
        }
        let op = CmpOp::from_symbol(sym).expect("symbol table covers all comparison spellings");
        self.tokens.push(Token::Cmp(op));
        Ok(())
    }

    fn lex_word(&mut self) -> Result<(), Diagnostic> {
        let text = self.lex_ident_text();
        match text.as_str() {
            "true" => self.tokens.push(Token::Bool(true)),
            "false" => self.tokens.push(Token::Bool(false)),
            "True" | "False" => {
                return Err(Diagnostic::error(
                    ErrorCode::SyntaxError,
                    format!(
                        "invalid boolean literal '{text}': use '{}'",
                        text.to_ascii_lowercase()
                    ),
                    self.span,
                ));
            }
            _ => self.tokens.push(Token::Word(text)),
        }
        Ok(())
    }

    fn lex_ident_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                text.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        text
    }

    fn punct(&mut self, token: Token) {
        self.bump();
        self.tokens.push(token);
    }

    fn unexpected(&self, ch: char) -> Diagnostic {
        Diagnostic::error(
            ErrorCode::SyntaxError,
            format!("unexpected character '{ch}'"),
            self.span,
        )
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) {
        if self.pos < self.chars.len() {
            self.pos += 1;
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_one(raw: &str) -> Line {
        let mut diags = Vec::new();
        let line = lex_line(FileId(0), 1, raw, &mut diags);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        line.expect("line should lex")
    }

    #[test]
    fn commas_and_spaces_are_interchangeable() {
        let a = lex_one("ADD 1, 2, x");
        let b = lex_one("ADD 1 2 x");
        assert_eq!(a.tokens, b.tokens);
        assert_eq!(
            a.tokens,
            vec![
                Token::Word("ADD".into()),
                Token::Int(1),
                Token::Int(2),
                Token::Word("x".into()),
            ]
        );
    }

    #[test]
    fn strings_keep_spaces_and_escapes() {
        let line = lex_one(r#"PRINT "hello, world\n""#);
        assert_eq!(
            line.tokens,
            vec![
                Token::Word("PRINT".into()),
                Token::Str("hello, world\n".into()),
            ]
        );
    }

    #[test]
    fn comments_are_stripped_outside_strings() {
        let line = lex_one(r#"PRINT "a // b" // trailing"#);
        assert_eq!(
            line.tokens,
            vec![Token::Word("PRINT".into()), Token::Str("a // b".into())]
        );
        let mut diags = Vec::new();
        assert!(lex_line(FileId(0), 1, "// only a comment", &mut diags).is_none());
    }

    #[test]
    fn measures_indent_with_tabs_normalized() {
        let line = lex_one("\tMOV int x 1");
        assert_eq!(line.indent, 4);
        let line = lex_one("        MOV int x 1");
        assert_eq!(line.indent, 8);
    }

    #[test]
    fn semicolon_terminates_the_statement() {
        let line = lex_one("MOV x 1; anything after is ignored");
        assert!(line.terminated);
        assert_eq!(line.tokens.len(), 3);
        assert!(!lex_one("MOV x 1").terminated);
    }

    #[test]
    fn lexes_range_arrow_and_deref() {
        let line = lex_one("FOR i 1..10:");
        assert_eq!(
            line.tokens,
            vec![
                Token::Word("FOR".into()),
                Token::Word("i".into()),
                Token::Int(1),
                Token::DotDot,
                Token::Int(10),
                Token::Colon,
            ]
        );
        let line = lex_one("PRINT *p");
        assert_eq!(
            line.tokens,
            vec![Token::Word("PRINT".into()), Token::Deref("p".into())]
        );
        let line = lex_one("FN f(int a) -> int:");
        assert!(line.tokens.contains(&Token::Arrow));
    }

    #[test]
    fn negative_and_float_literals() {
        let line = lex_one("MOV double x -3.5");
        assert_eq!(line.tokens[3], Token::Float(-3.5));
        let line = lex_one("MOV int y -7");
        assert_eq!(line.tokens[3], Token::Int(-7));
    }

    #[test]
    fn rejects_unterminated_string() {
        let mut diags = Vec::new();
        let line = lex_line(FileId(0), 3, r#"PRINT "oops"#, &mut diags);
        assert!(line.is_none());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, ErrorCode::SyntaxError);
        assert!(diags[0].message.contains("unterminated"));
    }

    #[test]
    fn rejects_python_style_booleans() {
        let mut diags = Vec::new();
        let line = lex_line(FileId(0), 2, "MOV bool b True", &mut diags);
        assert!(line.is_none());
        assert!(diags[0].message.contains("'true'"));
    }
}
