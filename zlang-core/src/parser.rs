//! Instruction parser for Z.
//!
//! Consumes lexed lines and produces the structured instruction
//! stream. This is where block structure is resolved: `IF`, `ELIF`,
//! `ELSE`, `WHILE` and `FOR` open indentation blocks that close with a
//! synthesized `BLOCKEND` when indentation drops back; `FN` bodies
//! must be closed with an explicit `END`. Function signatures are
//! collected on the side so later stages can look them up by name.

use crate::ast::{CmpOp, Cond, FunctionSig, Instruction, Opcode, Operand, Param};
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::lexer::{self, Line, Token};
use crate::span::{FileId, Span};
use crate::types::ScalarType;

/// Parsed contents of one source file.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub instructions: Vec<Instruction>,
    pub functions: Vec<FunctionSig>,
}

/// Result of parsing a source file.
#[derive(Debug)]
pub struct ParseResult {
    pub file: ParsedFile,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a whole source file into instructions.
pub fn parse(file: FileId, source: &str) -> ParseResult {
    let lexed = lexer::lex(file, source);
    let mut parser = Parser {
        out: ParsedFile::default(),
        diagnostics: lexed.diagnostics,
        blocks: vec![BlockCtx {
            indent: 0,
            origin: BlockOrigin::TopLevel,
        }],
        expecting_block: None,
        in_function: false,
        labels_top: Vec::new(),
        labels_fn: Vec::new(),
        last_closed: None,
        last_span: Span::new(file, 1),
    };
    for line in &lexed.lines {
        parser.line(line);
    }
    parser.finish();
    ParseResult {
        file: parser.out,
        diagnostics: parser.diagnostics,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockOrigin {
    TopLevel,
    /// An `IF`/`ELIF`/`ELSE`/`WHILE`/`FOR` block; the opcode is kept
    /// so `ELIF`/`ELSE` chaining can be checked.
    Opener(Opcode),
    /// The body of a `FN`; closed only by `END`.
    FnBody,
}

#[derive(Debug)]
struct BlockCtx {
    indent: u32,
    origin: BlockOrigin,
}

struct Parser {
    out: ParsedFile,
    diagnostics: Vec<Diagnostic>,
    blocks: Vec<BlockCtx>,
    /// Set after a block-opening line; holds its origin until the
    /// first body line fixes the block's indentation level.
    expecting_block: Option<(BlockOrigin, Span)>,
    in_function: bool,
    labels_top: Vec<String>,
    labels_fn: Vec<String>,
    /// Opener kind of the most recently closed block, valid only
    /// until the next non-`BLOCKEND` instruction; used to validate
    /// `ELIF`/`ELSE` placement.
    last_closed: Option<Opcode>,
    last_span: Span,
}

impl Parser {
    fn line(&mut self, line: &Line) {
        self.last_span = line.span;
        let is_end_line = matches!(&line.tokens[0], Token::Word(w) if w.eq_ignore_ascii_case("END"))
            && line.tokens.len() == 1;

        // Open a pending block if the previous line demanded one.
        if let Some((origin, opened_at)) = self.expecting_block.take() {
            if line.indent > self.blocks.last().expect("root block").indent {
                self.blocks.push(BlockCtx {
                    indent: line.indent,
                    origin,
                });
            } else {
                self.error(
                    ErrorCode::SyntaxError,
                    "expected an indented block after this line",
                    opened_at,
                );
            }
        }

        // Close indentation blocks the current line has dedented out of.
        while line.indent < self.blocks.last().expect("root block").indent {
            let top = self.blocks.last().expect("root block");
            match top.origin {
                BlockOrigin::Opener(opcode) => {
                    self.blocks.pop();
                    self.emit(Instruction::new(Opcode::BlockEnd, Vec::new(), line.span));
                    self.last_closed = Some(opcode);
                }
                BlockOrigin::FnBody => {
                    if is_end_line {
                        // `END` may sit at any indentation at or below
                        // the body; it closes the function itself.
                        break;
                    }
                    self.error(
                        ErrorCode::SyntaxError,
                        "function body must be closed with END",
                        line.span,
                    );
                    self.blocks.pop();
                    self.close_function(line.span);
                }
                BlockOrigin::TopLevel => break,
            }
        }
        let top_indent = self.blocks.last().expect("root block").indent;
        if line.indent != top_indent
            && !(is_end_line && matches!(self.blocks.last().unwrap().origin, BlockOrigin::FnBody))
        {
            self.error(
                ErrorCode::SyntaxError,
                "inconsistent indentation",
                line.span,
            );
            return;
        }

        self.statement(line);
    }

    fn finish(&mut self) {
        let span = self.last_span;
        if self.expecting_block.take().is_some() {
            self.error(
                ErrorCode::SyntaxError,
                "expected an indented block after this line",
                span,
            );
        }
        while let Some(top) = self.blocks.last() {
            match top.origin {
                BlockOrigin::Opener(_) => {
                    self.blocks.pop();
                    self.emit(Instruction::new(Opcode::BlockEnd, Vec::new(), span));
                }
                BlockOrigin::FnBody => {
                    self.error(
                        ErrorCode::SyntaxError,
                        "function body must be closed with END",
                        span,
                    );
                    self.blocks.pop();
                    self.close_function(span);
                }
                BlockOrigin::TopLevel => break,
            }
        }
    }

    fn statement(&mut self, line: &Line) {
        let span = line.span;
        let first = &line.tokens[0];

        let word = match first {
            Token::Word(word) => word.clone(),
            _ => {
                self.error(ErrorCode::SyntaxError, "expected an opcode", span);
                return;
            }
        };

        let opcode = match Opcode::from_word(&word) {
            Some(op) => op,
            None => {
                // `name:` lines declare labels.
                if line.tokens.len() == 2 && line.tokens[1] == Token::Colon {
                    self.label(&word, span);
                    return;
                }
                self.error(
                    ErrorCode::UnknownOpcode,
                    format!("unknown opcode '{word}'"),
                    span,
                );
                return;
            }
        };

        if self.in_function && opcode == Opcode::Import {
            self.error(
                ErrorCode::SyntaxError,
                "IMPORT is only allowed at the top level",
                span,
            );
            return;
        }

        if self.in_function && opcode.is_simple_statement() && !line.terminated {
            self.error(
                ErrorCode::MissingTerminator,
                format!("statement '{opcode}' inside a function body must end with ';'"),
                span,
            );
        }

        let rest = &line.tokens[1..];
        match opcode {
            Opcode::Fn => self.fn_def(rest, span),
            Opcode::End => self.end(rest, span),
            Opcode::If | Opcode::While => self.cond_opener(opcode, rest, span),
            Opcode::Elif | Opcode::Else => self.elif_else(opcode, rest, span),
            Opcode::For => self.for_loop(rest, span),
            _ => {
                let before = self.diagnostics.len();
                match self.simple_operands(opcode, rest, span) {
                    Some(operands) => self.emit(Instruction::new(opcode, operands, span)),
                    None => {
                        if self.diagnostics.len() == before {
                            self.error(
                                ErrorCode::SyntaxError,
                                format!("malformed operand list for {opcode}"),
                                span,
                            );
                        }
                    }
                }
            }
        }
    }

    fn label(&mut self, name: &str, span: Span) {
        let labels = if self.in_function {
            &mut self.labels_fn
        } else {
            &mut self.labels_top
        };
        if labels.iter().any(|l| l == name) {
            self.error(
                ErrorCode::DuplicateLabel,
                format!("label '{name}' is already defined in this scope"),
                span,
            );
            return;
        }
        labels.push(name.to_string());
        self.emit(Instruction::new(
            Opcode::Label,
            vec![Operand::LabelRef(name.to_string())],
            span,
        ));
    }

    fn fn_def(&mut self, rest: &[Token], span: Span) {
        if self.in_function {
            self.error(
                ErrorCode::SyntaxError,
                "nested function definitions are not supported",
                span,
            );
            return;
        }
        if self.blocks.len() > 1 {
            self.error(
                ErrorCode::SyntaxError,
                "function definitions must be at the top level",
                span,
            );
            return;
        }
        let mut cur = Cursor::new(rest);
        let name = match cur.word() {
            Some(name) => name,
            None => {
                self.error(ErrorCode::SyntaxError, "FN requires a function name", span);
                return;
            }
        };

        let mut params = Vec::new();
        if cur.eat(&Token::LParen) {
            while !cur.eat(&Token::RParen) {
                let ty = cur.word().and_then(|w| ScalarType::from_keyword(&w));
                let pname = cur.word();
                match (ty, pname) {
                    (Some(ty), Some(pname)) => params.push(Param { ty, name: pname }),
                    _ => {
                        self.error(
                            ErrorCode::SyntaxError,
                            "function parameters require an explicit type (e.g. int n)",
                            span,
                        );
                        return;
                    }
                }
            }
        }
        let ret = if cur.eat(&Token::Arrow) {
            match cur.word().and_then(|w| ScalarType::from_keyword(&w)) {
                Some(ty) => Some(ty),
                None => {
                    self.error(
                        ErrorCode::SyntaxError,
                        "expected a return type after '->'",
                        span,
                    );
                    return;
                }
            }
        } else {
            None
        };
        cur.eat(&Token::Colon);
        if !cur.at_end() {
            self.error(
                ErrorCode::SyntaxError,
                "trailing tokens after function header",
                span,
            );
            return;
        }

        self.out.functions.push(FunctionSig {
            name: name.clone(),
            params,
            ret,
            span,
        });
        self.emit(Instruction::new(
            Opcode::Fn,
            vec![Operand::Ident(name)],
            span,
        ));
        self.in_function = true;
        self.labels_fn.clear();
        self.expecting_block = Some((BlockOrigin::FnBody, span));
    }

    fn end(&mut self, rest: &[Token], span: Span) {
        if !rest.is_empty() {
            self.error(ErrorCode::SyntaxError, "END takes no operands", span);
            return;
        }
        if !self.in_function {
            self.error(
                ErrorCode::SyntaxError,
                "END outside of a function definition",
                span,
            );
            return;
        }
        // Close any structured blocks still open inside the body.
        while matches!(
            self.blocks.last().map(|b| b.origin),
            Some(BlockOrigin::Opener(_))
        ) {
            self.blocks.pop();
            self.emit(Instruction::new(Opcode::BlockEnd, Vec::new(), span));
        }
        if matches!(
            self.blocks.last().map(|b| b.origin),
            Some(BlockOrigin::FnBody)
        ) {
            self.blocks.pop();
        }
        self.close_function(span);
    }

    fn close_function(&mut self, span: Span) {
        self.emit(Instruction::new(Opcode::End, Vec::new(), span));
        self.in_function = false;
        self.labels_fn.clear();
    }

    fn cond_opener(&mut self, opcode: Opcode, rest: &[Token], span: Span) {
        let mut cur = Cursor::new(strip_colon(rest));
        match self.cond(&mut cur) {
            Some(cond) if cur.at_end() => {
                self.emit(Instruction::new(opcode, vec![Operand::Cond(cond)], span));
                self.expecting_block = Some((BlockOrigin::Opener(opcode), span));
            }
            _ => self.error(
                ErrorCode::SyntaxError,
                format!("malformed condition on {opcode}"),
                span,
            ),
        }
    }

    fn elif_else(&mut self, opcode: Opcode, rest: &[Token], span: Span) {
        if !matches!(self.last_closed, Some(Opcode::If | Opcode::Elif)) {
            self.error(
                ErrorCode::SyntaxError,
                format!("{opcode} without a preceding IF block"),
                span,
            );
            return;
        }
        if opcode == Opcode::Else {
            if !strip_colon(rest).is_empty() {
                self.error(ErrorCode::SyntaxError, "ELSE takes no condition", span);
                return;
            }
            self.emit(Instruction::new(Opcode::Else, Vec::new(), span));
            self.expecting_block = Some((BlockOrigin::Opener(Opcode::Else), span));
        } else {
            self.cond_opener(Opcode::Elif, rest, span);
        }
    }

    fn for_loop(&mut self, rest: &[Token], span: Span) {
        let mut cur = Cursor::new(strip_colon(rest));
        let var = cur.word();
        let start = cur.value();
        let dots = cur.eat(&Token::DotDot);
        let end = cur.value();
        match (var, start, end) {
            (Some(var), Some(start), Some(end)) if dots && cur.at_end() => {
                self.emit(Instruction::new(
                    Opcode::For,
                    vec![Operand::Ident(var), start, end],
                    span,
                ));
                self.expecting_block = Some((BlockOrigin::Opener(Opcode::For), span));
            }
            _ => self.error(
                ErrorCode::SyntaxError,
                "FOR expects 'FOR var start..end'",
                span,
            ),
        }
    }

    /// Operand forms for everything that is not block structure.
    fn simple_operands(
        &mut self,
        opcode: Opcode,
        rest: &[Token],
        span: Span,
    ) -> Option<Vec<Operand>> {
        let mut cur = Cursor::new(rest);
        let operands = match opcode {
            Opcode::Mov => self.mov_operands(&mut cur, span)?,
            Opcode::Const => {
                let ty = cur.type_keyword();
                let name = cur.word();
                let value = cur.value();
                match (ty, name, value) {
                    (Some(ty), Some(name), Some(value)) => {
                        vec![Operand::TypeName(ty), Operand::Ident(name), value]
                    }
                    _ => {
                        self.error(
                            ErrorCode::SyntaxError,
                            "CONST requires a type, a name and a value (e.g. CONST int limit 10)",
                            span,
                        );
                        return None;
                    }
                }
            }
            Opcode::Arr => self.arr_operands(&mut cur, span)?,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let a = cur.value()?;
                let b = cur.value()?;
                match cur.word() {
                    Some(dest) => vec![a, b, Operand::Ident(dest)],
                    // Two-operand form: `ADD dest src`.
                    None if cur.at_end() => match a {
                        Operand::Ident(dest) => {
                            vec![Operand::Ident(dest.clone()), b, Operand::Ident(dest)]
                        }
                        _ => {
                            self.error(
                                ErrorCode::SyntaxError,
                                format!("{opcode} destination must be a variable"),
                                span,
                            );
                            return None;
                        }
                    },
                    None => {
                        self.error(
                            ErrorCode::SyntaxError,
                            format!("{opcode} expects 'src1 src2 dest'"),
                            span,
                        );
                        return None;
                    }
                }
            }
            Opcode::Inc | Opcode::Dec => vec![Operand::Ident(cur.word()?)],
            Opcode::Cmp => {
                let lhs = cur.value()?;
                // Accept both `CMP a b ==` and `CMP a == b`.
                if let Some(op) = cur.cmp_op() {
                    let rhs = cur.value()?;
                    vec![lhs, rhs, Operand::CmpOp(op)]
                } else {
                    let rhs = cur.value()?;
                    let op = cur.cmp_op()?;
                    vec![lhs, rhs, Operand::CmpOp(op)]
                }
            }
            Opcode::Jmp | Opcode::Jz | Opcode::Jnz => {
                vec![Operand::LabelRef(cur.word()?)]
            }
            Opcode::Ret => match cur.value() {
                Some(value) => vec![value],
                None => Vec::new(),
            },
            Opcode::Call => self.call_operands(&mut cur, span)?,
            Opcode::Ptr => {
                let ty = cur.type_keyword()?;
                let ptr = cur.word()?;
                let target = cur.word()?;
                vec![
                    Operand::TypeName(ty),
                    Operand::Ident(ptr),
                    Operand::Ident(target),
                ]
            }
            Opcode::Push => {
                let arr = cur.word()?;
                let value = cur.value()?;
                vec![Operand::Ident(arr), value]
            }
            Opcode::Pop => {
                let arr = cur.word()?;
                match cur.word() {
                    Some(dest) => vec![Operand::Ident(arr), Operand::Ident(dest)],
                    None => vec![Operand::Ident(arr)],
                }
            }
            Opcode::Len => {
                let arr = cur.word()?;
                let dest = cur.word()?;
                vec![Operand::Ident(arr), Operand::Ident(dest)]
            }
            Opcode::Print | Opcode::PrintStr => vec![cur.value()?],
            Opcode::Read => self.read_operands(&mut cur)?,
            Opcode::Error => vec![cur.string()?],
            Opcode::Halt => Vec::new(),
            Opcode::Import => vec![cur.string()?],
            _ => unreachable!("block structure handled before simple_operands"),
        };
        if !cur.at_end() {
            self.error(
                ErrorCode::SyntaxError,
                format!("too many operands for {opcode}"),
                span,
            );
            return None;
        }
        Some(operands)
    }

    fn mov_operands(&mut self, cur: &mut Cursor<'_>, span: Span) -> Option<Vec<Operand>> {
        if let Some(ty) = cur.type_keyword() {
            // Declaration: `MOV <type> <name> [value]`.
            let name = cur.word()?;
            let mut operands = vec![Operand::TypeName(ty), Operand::Ident(name)];
            if !cur.at_end() {
                operands.push(cur.value()?);
            }
            return Some(operands);
        }
        // Assignment: `MOV <dest> <value>`, destination may be `*p`.
        let dest = match cur.next() {
            Some(Token::Word(name)) => Operand::Ident(name.clone()),
            Some(Token::Deref(name)) => Operand::Deref(name.clone()),
            _ => {
                self.error(
                    ErrorCode::SyntaxError,
                    "MOV requires a destination variable",
                    span,
                );
                return None;
            }
        };
        let value = cur.value()?;
        Some(vec![dest, value])
    }

    fn arr_operands(&mut self, cur: &mut Cursor<'_>, span: Span) -> Option<Vec<Operand>> {
        let elem = match cur.word().and_then(|w| ScalarType::from_array_tag(&w)) {
            Some(elem) => elem,
            None => {
                self.error(
                    ErrorCode::SyntaxError,
                    "ARR requires an array type tag (Aint, Afloat, Adouble, Abool, Astring)",
                    span,
                );
                return None;
            }
        };
        let name = cur.word()?;
        let mut operands = vec![Operand::TypeName(elem), Operand::Ident(name)];
        if let Some(&Token::Int(cap)) = cur.peek() {
            cur.next();
            operands.push(Operand::Int(cap));
        }
        if cur.peek() == Some(&Token::LBracket) {
            cur.next();
            let mut items = Vec::new();
            loop {
                match cur.next() {
                    Some(Token::RBracket) => break,
                    Some(Token::Int(v)) => items.push(Operand::Int(*v)),
                    Some(Token::Float(v)) => items.push(Operand::Float(*v)),
                    Some(Token::Bool(v)) => items.push(Operand::Bool(*v)),
                    Some(Token::Str(v)) => items.push(Operand::Str(v.clone())),
                    _ => {
                        self.error(
                            ErrorCode::SyntaxError,
                            "array initializers may contain only literals",
                            span,
                        );
                        return None;
                    }
                }
            }
            operands.push(Operand::List(items));
        }
        Some(operands)
    }

    fn call_operands(&mut self, cur: &mut Cursor<'_>, span: Span) -> Option<Vec<Operand>> {
        let name = cur.word()?;
        let mut operands = vec![Operand::Ident(name)];
        if cur.eat(&Token::LParen) {
            while !cur.eat(&Token::RParen) {
                match cur.value() {
                    Some(arg) => operands.push(arg),
                    None => {
                        self.error(
                            ErrorCode::SyntaxError,
                            "malformed argument list in CALL",
                            span,
                        );
                        return None;
                    }
                }
            }
        }
        // Result binding: `-> var`, a bare trailing `var`, or nothing
        // (implicit discard).
        cur.eat(&Token::Arrow);
        let binding = match cur.next() {
            Some(Token::Word(w)) if w == "_" => Operand::Discard,
            Some(Token::Word(w)) => Operand::Ident(w.clone()),
            None => Operand::Discard,
            _ => {
                self.error(
                    ErrorCode::SyntaxError,
                    "CALL result must bind to a variable or '_'",
                    span,
                );
                return None;
            }
        };
        operands.push(binding);
        Some(operands)
    }

    fn read_operands(&mut self, cur: &mut Cursor<'_>) -> Option<Vec<Operand>> {
        let mut operands = Vec::new();
        if let Some(ty) = cur.type_keyword() {
            operands.push(Operand::TypeName(ty));
        }
        if let Some(&Token::Str(ref prompt)) = cur.peek() {
            operands.push(Operand::Str(prompt.clone()));
            cur.next();
        }
        operands.push(Operand::Ident(cur.word()?));
        Some(operands)
    }

    /// Condition grammar: `or := and (OR and)*`, `and := unary (AND
    /// unary)*`, `unary := [NOT] atom`, `atom := '(' or ')' | value
    /// [cmp value]`.
    fn cond(&mut self, cur: &mut Cursor<'_>) -> Option<Cond> {
        let mut lhs = self.cond_and(cur)?;
        while cur.eat_keyword("OR") {
            let rhs = self.cond_and(cur)?;
            lhs = Cond::Or(Box::new(lhs), Box::new(rhs));
        }
        Some(lhs)
    }

    fn cond_and(&mut self, cur: &mut Cursor<'_>) -> Option<Cond> {
        let mut lhs = self.cond_unary(cur)?;
        while cur.eat_keyword("AND") {
            let rhs = self.cond_unary(cur)?;
            lhs = Cond::And(Box::new(lhs), Box::new(rhs));
        }
        Some(lhs)
    }

    fn cond_unary(&mut self, cur: &mut Cursor<'_>) -> Option<Cond> {
        if cur.eat_keyword("NOT") {
            let inner = self.cond_unary(cur)?;
            return Some(Cond::Not(Box::new(inner)));
        }
        if cur.eat(&Token::LParen) {
            let inner = self.cond(cur)?;
            if !cur.eat(&Token::RParen) {
                return None;
            }
            return Some(inner);
        }
        let lhs = cur.value()?;
        if let Some(op) = cur.cmp_op() {
            let rhs = cur.value()?;
            Some(Cond::Cmp { lhs: Box::new(lhs), op, rhs: Box::new(rhs) })
        } else {
            Some(Cond::Truthy(Box::new(lhs)))
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        if instruction.opcode != Opcode::BlockEnd {
            self.last_closed = None;
        }
        self.out.instructions.push(instruction);
    }

    fn error(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::error(code, message, span));
    }
}

fn strip_colon(tokens: &[Token]) -> &[Token] {
    match tokens.last() {
        Some(Token::Colon) => &tokens[..tokens.len() - 1],
        _ => tokens,
    }
}

/// Small token cursor; `Option`-returning accessors keep the operand
/// builders terse.
struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Cursor<'a> {
        Cursor { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Word(w)) = self.peek() {
            if w.eq_ignore_ascii_case(keyword) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    /// Next token as an identifier word (not a type keyword).
    fn word(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token::Word(w)) if ScalarType::from_keyword(w).is_none() => {
                self.pos += 1;
                Some(w.clone())
            }
            _ => None,
        }
    }

    fn type_keyword(&mut self) -> Option<ScalarType> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let ty = ScalarType::from_keyword(w)?;
                self.pos += 1;
                Some(ty)
            }
            _ => None,
        }
    }

    fn cmp_op(&mut self) -> Option<CmpOp> {
        match self.peek() {
            Some(Token::Cmp(op)) => {
                self.pos += 1;
                Some(*op)
            }
            _ => None,
        }
    }

    fn string(&mut self) -> Option<Operand> {
        match self.peek() {
            Some(Token::Str(s)) => {
                self.pos += 1;
                Some(Operand::Str(s.clone()))
            }
            _ => None,
        }
    }

    /// Next token as a value operand: literal, identifier or deref.
    fn value(&mut self) -> Option<Operand> {
        let operand = match self.peek()? {
            Token::Int(v) => Operand::Int(*v),
            Token::Float(v) => Operand::Float(*v),
            Token::Bool(v) => Operand::Bool(*v),
            Token::Str(v) => Operand::Str(v.clone()),
            Token::Deref(name) => Operand::Deref(name.clone()),
            Token::Word(w) if ScalarType::from_keyword(w).is_none() => {
                Operand::Ident(w.clone())
            }
            _ => return None,
        };
        self.pos += 1;
        Some(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> ParsedFile {
        let result = parse(FileId(0), source);
        assert!(
            result.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            result.diagnostics
        );
        result.file
    }

    fn parse_err(source: &str) -> Vec<Diagnostic> {
        let result = parse(FileId(0), source);
        assert!(!result.diagnostics.is_empty(), "expected diagnostics");
        result.diagnostics
    }

    fn opcodes(file: &ParsedFile) -> Vec<Opcode> {
        file.instructions.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn dedent_closes_blocks() {
        let file = parse_ok("MOV int x 0\nWHILE x < 3:\n    INC x\nPRINT x\n");
        assert_eq!(
            opcodes(&file),
            vec![
                Opcode::Mov,
                Opcode::While,
                Opcode::Inc,
                Opcode::BlockEnd,
                Opcode::Print,
            ]
        );
    }

    #[test]
    fn eof_closes_open_blocks() {
        let file = parse_ok("IF 1 == 1:\n    PRINT 1\n");
        assert_eq!(
            opcodes(&file),
            vec![Opcode::If, Opcode::Print, Opcode::BlockEnd]
        );
    }

    #[test]
    fn elif_else_chain() {
        let file = parse_ok(
            "MOV int x 2\nIF x == 1:\n    PRINT 1\nELIF x == 2:\n    PRINT 2\nELSE:\n    PRINT 3\n",
        );
        assert_eq!(
            opcodes(&file),
            vec![
                Opcode::Mov,
                Opcode::If,
                Opcode::Print,
                Opcode::BlockEnd,
                Opcode::Elif,
                Opcode::Print,
                Opcode::BlockEnd,
                Opcode::Else,
                Opcode::Print,
                Opcode::BlockEnd,
            ]
        );
    }

    #[test]
    fn orphan_else_is_rejected() {
        let diags = parse_err("ELSE:\n    PRINT 1\n");
        assert!(diags[0].message.contains("without a preceding IF"));
    }

    #[test]
    fn function_records_signature_and_requires_end() {
        let file = parse_ok("FN add(int a, int b) -> int:\n    ADD a b r;\n    RET r;\nEND\n");
        assert_eq!(file.functions.len(), 1);
        let sig = &file.functions[0];
        assert_eq!(sig.name, "add");
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0].ty, ScalarType::Int);
        assert_eq!(sig.ret, Some(ScalarType::Int));
        assert_eq!(
            opcodes(&file),
            vec![Opcode::Fn, Opcode::Add, Opcode::Ret, Opcode::End]
        );
    }

    #[test]
    fn missing_end_is_rejected() {
        let diags = parse_err("FN f():\n    RET;\n");
        assert!(diags.iter().any(|d| d.message.contains("closed with END")));
    }

    #[test]
    fn missing_semicolon_in_function_body() {
        let diags = parse_err("FN f():\n    PRINT 1\nEND\n");
        assert_eq!(diags[0].code, ErrorCode::MissingTerminator);
        // Outside a function the terminator is optional.
        parse_ok("PRINT 1\n");
    }

    #[test]
    fn parses_call_result_bindings() {
        let file =
            parse_ok("FN f() -> int:\n    RET 1;\nEND\nCALL f() -> x\nCALL f() y\nCALL f()\n");
        let calls: Vec<_> = file
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::Call)
            .collect();
        assert_eq!(calls[0].operands.last(), Some(&Operand::Ident("x".into())));
        assert_eq!(calls[1].operands.last(), Some(&Operand::Ident("y".into())));
        assert_eq!(calls[2].operands.last(), Some(&Operand::Discard));
    }

    #[test]
    fn parses_for_range_forms() {
        for source in ["FOR i 1..10:\n    PRINT i\n", "FOR i 1 .. 10:\n    PRINT i\n"] {
            let file = parse_ok(source);
            assert_eq!(
                file.instructions[0].operands,
                vec![
                    Operand::Ident("i".into()),
                    Operand::Int(1),
                    Operand::Int(10)
                ]
            );
        }
    }

    #[test]
    fn parses_array_declarations() {
        let file = parse_ok("ARR Aint a 2 [1, 2]\nARR Adouble d\nARR Aint b [5]\n");
        assert_eq!(
            file.instructions[0].operands,
            vec![
                Operand::TypeName(ScalarType::Int),
                Operand::Ident("a".into()),
                Operand::Int(2),
                Operand::List(vec![Operand::Int(1), Operand::Int(2)]),
            ]
        );
        assert_eq!(file.instructions[1].operands.len(), 2);
        assert_eq!(
            file.instructions[2].operands[2],
            Operand::List(vec![Operand::Int(5)])
        );
    }

    #[test]
    fn labels_are_unique_per_scope() {
        let diags = parse_err("top:\nJMP top\ntop:\n");
        assert_eq!(diags[0].code, ErrorCode::DuplicateLabel);
        // The same label name may be reused inside a function scope.
        parse_ok("top:\nJMP top\nFN f():\n    top:\n    JMP top;\nEND\n");
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let diags = parse_err("FROB x y\n");
        assert_eq!(diags[0].code, ErrorCode::UnknownOpcode);
    }

    #[test]
    fn conditions_support_and_or_not() {
        let file = parse_ok("IF x < 10 AND NOT done:\n    PRINT x\n");
        match &file.instructions[0].operands[0] {
            Operand::Cond(Cond::And(lhs, rhs)) => {
                assert!(matches!(**lhs, Cond::Cmp { .. }));
                assert!(matches!(**rhs, Cond::Not(_)));
            }
            other => panic!("unexpected condition shape: {other:?}"),
        }
    }

    #[test]
    fn cmp_accepts_both_operand_orders() {
        let file = parse_ok("CMP x 10 <\nCMP x < 10\n");
        assert_eq!(file.instructions[0].operands, file.instructions[1].operands);
    }

    #[test]
    fn inconsistent_dedent_is_rejected() {
        let diags = parse_err("IF 1 == 1:\n        PRINT 1\n    PRINT 2\n");
        assert!(diags.iter().any(|d| d.message.contains("indentation")));
    }
}
