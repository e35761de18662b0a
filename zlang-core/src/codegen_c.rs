//! C backend.
//!
//! Translates the optimized, type-annotated stream into a single C
//! translation unit: a helper prelude, global declarations, function
//! prototypes, the function definitions, and `main` built from the
//! top-level code. Generation is purely structural and performs no
//! validation; the analyzer has already guaranteed the stream is
//! well-typed, so any impossibility here is an internal invariant
//! violation, not a user error.
//!
//! Runtime conditions that could not be ruled out statically are
//! guarded in the emitted code and terminate the process with the
//! matching diagnostic code: 42 for division by zero, 43 for array
//! bounds, 45 for int overflow.

use std::collections::HashMap;
use std::fmt::Write;

use crate::ast::{Cond, Instruction, Opcode, Operand};
use crate::diagnostic::ErrorCode;
use crate::semantics::{Analysis, TypedInstr};
use crate::span::Span;
use crate::symbols::{FunctionDef, Symbol, SymbolKind};
use crate::types::{ScalarType, Type};

const INDENT: &str = "    ";

/// C keywords and names claimed by the helper prelude; user
/// identifiers that collide are prefixed `z_`.
const RESERVED: &[&str] = &[
    // C keywords
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool",
    // prelude helpers
    "main", "cmp_flag", "error_exit", "print_int", "print_float", "print_double", "print_bool",
    "print_str", "print_ptr", "read_int", "read_float", "read_double", "read_str", "checked_add",
    "checked_sub", "checked_mul", "checked_div", "checked_mod",
];

/// Generate the complete C translation unit.
pub fn generate(analysis: &Analysis) -> String {
    let generator = Generator {
        analysis,
        array_inits: collect_array_inits(&analysis.instrs),
    };
    generator.run()
}

/// Literal initializers of `ARR` declarations, keyed by region and
/// name, so hoisted declarations can carry them.
fn collect_array_inits(
    instrs: &[TypedInstr],
) -> HashMap<(Option<String>, String), Vec<Operand>> {
    let mut inits = HashMap::new();
    let mut region: Option<String> = None;
    for typed in instrs {
        match typed.instr.opcode {
            Opcode::Fn => {
                region = typed
                    .instr
                    .operands
                    .first()
                    .and_then(|o| o.as_ident())
                    .map(String::from);
            }
            Opcode::End => region = None,
            Opcode::Arr => {
                let name = typed.instr.operands[1]
                    .as_ident()
                    .unwrap_or_default()
                    .to_string();
                let items = typed
                    .instr
                    .operands
                    .iter()
                    .find_map(|o| match o {
                        Operand::List(items) => Some(items.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                inits.insert((region.clone(), name), items);
            }
            _ => {}
        }
    }
    inits
}

struct Generator<'a> {
    analysis: &'a Analysis,
    array_inits: HashMap<(Option<String>, String), Vec<Operand>>,
}

impl<'a> Generator<'a> {
    fn run(&self) -> String {
        let mut out = String::new();
        self.prelude(&mut out);
        self.global_declarations(&mut out);
        self.prototypes(&mut out);
        self.definitions(&mut out);
        out
    }

    fn uses_arrays(&self) -> bool {
        let in_table = |syms: &crate::symbols::SymbolTable| syms.iter().any(|s| s.ty.is_array());
        in_table(&self.analysis.globals)
            || self
                .analysis
                .functions
                .values()
                .any(|f| in_table(&f.locals))
    }

    // ----- prelude ---------------------------------------------------

    fn prelude(&self, out: &mut String) {
        out.push_str(concat!(
            "#define _CRT_SECURE_NO_WARNINGS\n",
            "#include <stdio.h>\n",
            "#include <stdlib.h>\n",
            "#include <stdbool.h>\n",
            "#include <string.h>\n",
            "#include <limits.h>\n",
            "#include <math.h>\n",
            "\n",
            "/* Built-in helpers */\n",
            "void error_exit(int code, const char *msg) {\n",
            "    fprintf(stderr, \"Error [E%d]: %s\\n\", code, msg);\n",
            "    exit(code);\n",
            "}\n",
            "void print_int(int v) { printf(\"%d\\n\", v); }\n",
            "void print_float(float v) { printf(\"%g\\n\", (double)v); }\n",
            "void print_double(double v) { printf(\"%g\\n\", v); }\n",
            "void print_bool(bool v) { printf(\"%s\\n\", v ? \"true\" : \"false\"); }\n",
            "void print_str(const char *s) { printf(\"%s\\n\", s); }\n",
            "void print_ptr(const void *p) { printf(\"%p\\n\", p); }\n",
            "int read_int(const char *prompt) {\n",
            "    int v = 0;\n",
            "    printf(\"%s\", prompt);\n",
            "    if (scanf(\"%d\", &v) != 1) error_exit(2, \"failed to read an int\");\n",
            "    return v;\n",
            "}\n",
            "float read_float(const char *prompt) {\n",
            "    float v = 0;\n",
            "    printf(\"%s\", prompt);\n",
            "    if (scanf(\"%f\", &v) != 1) error_exit(2, \"failed to read a float\");\n",
            "    return v;\n",
            "}\n",
            "double read_double(const char *prompt) {\n",
            "    double v = 0;\n",
            "    printf(\"%s\", prompt);\n",
            "    if (scanf(\"%lf\", &v) != 1) error_exit(2, \"failed to read a number\");\n",
            "    return v;\n",
            "}\n",
            "const char *read_str(const char *prompt) {\n",
            "    static char buffer[1024];\n",
            "    printf(\"%s\", prompt);\n",
            "    if (scanf(\"%1023s\", buffer) != 1) error_exit(2, \"failed to read a string\");\n",
            "    return buffer;\n",
            "}\n",
            "int checked_add(int a, int b, const char *where) {\n",
            "    long long r = (long long)a + (long long)b;\n",
            "    if (r > INT_MAX || r < INT_MIN) error_exit(45, where);\n",
            "    return (int)r;\n",
            "}\n",
            "int checked_sub(int a, int b, const char *where) {\n",
            "    long long r = (long long)a - (long long)b;\n",
            "    if (r > INT_MAX || r < INT_MIN) error_exit(45, where);\n",
            "    return (int)r;\n",
            "}\n",
            "int checked_mul(int a, int b, const char *where) {\n",
            "    long long r = (long long)a * (long long)b;\n",
            "    if (r > INT_MAX || r < INT_MIN) error_exit(45, where);\n",
            "    return (int)r;\n",
            "}\n",
            "int checked_div(int a, int b, const char *where) {\n",
            "    if (b == 0) error_exit(42, where);\n",
            "    if (a == INT_MIN && b == -1) error_exit(45, where);\n",
            "    return a / b;\n",
            "}\n",
            "int checked_mod(int a, int b, const char *where) {\n",
            "    if (b == 0) error_exit(42, where);\n",
            "    if (a == INT_MIN && b == -1) error_exit(45, where);\n",
            "    return a % b;\n",
            "}\n",
        ));
        if self.uses_arrays() {
            out.push_str(concat!(
                "\n",
                "/* Array runtime */\n",
                "#define ARRAY_PUSH_FIXED(data, len, cap, value, where) \\\n",
                "    do { \\\n",
                "        if ((len) >= (size_t)(cap)) error_exit(43, where); \\\n",
                "        (data)[(len)++] = (value); \\\n",
                "    } while (0)\n",
                "#define ARRAY_PUSH_DYN(data, len, cap, value, where) \\\n",
                "    do { \\\n",
                "        if ((len) >= (cap)) { \\\n",
                "            size_t grow_cap = (cap) ? (cap) * 2 : 4; \\\n",
                "            void *grown = realloc((data), grow_cap * sizeof *(data)); \\\n",
                "            if (!grown) error_exit(43, where); \\\n",
                "            (data) = grown; \\\n",
                "            (cap) = grow_cap; \\\n",
                "        } \\\n",
                "        (data)[(len)++] = (value); \\\n",
                "    } while (0)\n",
                "#define ARRAY_POP(data, len, where) \\\n",
                "    ((len) == 0 ? (error_exit(43, where), (data)[0]) : (data)[--(len)])\n",
            ));
        }
        out.push('\n');
    }

    // ----- declarations ----------------------------------------------

    fn global_declarations(&self, out: &mut String) {
        if self.analysis.globals.is_empty() {
            return;
        }
        out.push_str("/* Global variables */\n");
        for sym in self.analysis.globals.iter() {
            self.declare(out, sym, None, "");
        }
        out.push('\n');
    }

    fn declare(&self, out: &mut String, sym: &Symbol, region: Option<&str>, indent: &str) {
        let name = c_ident(&sym.name);
        match &sym.ty {
            Type::Array { elem, capacity } => {
                let elem_c = scalar_c_type(*elem);
                let key = (region.map(String::from), sym.name.clone());
                let items = self.array_inits.get(&key);
                match capacity {
                    Some(cap) => {
                        let init = match items {
                            Some(items) if !items.is_empty() => format!(
                                " = {{{}}}",
                                items
                                    .iter()
                                    .map(|o| self.expr(o))
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            ),
                            _ => String::new(),
                        };
                        let len = items.map_or(0, |i| i.len());
                        let _ = writeln!(out, "{indent}{elem_c} {name}_data[{cap}]{init};");
                        let _ = writeln!(out, "{indent}size_t {name}_len = {len};");
                    }
                    None => {
                        let _ = writeln!(out, "{indent}{elem_c} *{name}_data = NULL;");
                        let _ = writeln!(out, "{indent}size_t {name}_len = 0;");
                        let _ = writeln!(out, "{indent}size_t {name}_cap = 0;");
                    }
                }
            }
            ty => {
                // `const char*` already carries its qualifier.
                let const_prefix = if sym.mutable || *ty == Type::Str {
                    ""
                } else {
                    "const "
                };
                let init = match (&sym.init, sym.mutable) {
                    (Some(lit), false) => self.expr(lit),
                    _ => zero_value(ty).to_string(),
                };
                let _ = writeln!(out, "{indent}{const_prefix}{} {name} = {init};", c_type(ty));
            }
        }
    }

    fn prototypes(&self, out: &mut String) {
        if self.analysis.functions.is_empty() {
            return;
        }
        out.push_str("/* Function prototypes */\n");
        for def in self.analysis.functions.values() {
            let _ = writeln!(out, "{};", signature(def));
        }
        out.push('\n');
    }

    // ----- function bodies and main ----------------------------------

    fn definitions(&self, out: &mut String) {
        let mut functions = String::new();
        let mut main_body: Vec<String> = Vec::new();
        let mut emitter = Emitter {
            owner: self,
            current: None,
            depth: 0,
        };

        for typed in &self.analysis.instrs {
            match typed.instr.opcode {
                Opcode::Fn => {
                    let name = typed.instr.operands[0].as_ident().unwrap_or_default();
                    let def = self
                        .analysis
                        .functions
                        .get(name)
                        .expect("analyzed function exists");
                    emitter.current = Some(def);
                    emitter.depth = 0;
                    let _ = writeln!(functions, "{} {{", signature(def));
                    for sym in def.locals.iter() {
                        if sym.kind == SymbolKind::Param {
                            continue;
                        }
                        self.declare(&mut functions, sym, Some(name), INDENT);
                    }
                    if def.uses_cmp {
                        let _ = writeln!(functions, "{INDENT}int cmp_flag = 0;");
                    }
                }
                Opcode::End => {
                    functions.push_str("}\n\n");
                    emitter.current = None;
                    emitter.depth = 0;
                }
                _ => {
                    let lines = emitter.lower(typed);
                    if emitter.current.is_some() {
                        for line in lines {
                            functions.push_str(&line);
                            functions.push('\n');
                        }
                    } else {
                        main_body.extend(lines);
                    }
                }
            }
        }

        out.push_str(&functions);
        out.push_str("int main(void) {\n");
        if self.analysis.top_uses_cmp {
            let _ = writeln!(out, "{INDENT}int cmp_flag = 0;");
        }
        for line in &main_body {
            out.push_str(line);
            out.push('\n');
        }
        let _ = writeln!(out, "{INDENT}return 0;");
        out.push_str("}\n");
    }

    // ----- expressions -----------------------------------------------

    fn expr(&self, operand: &Operand) -> String {
        match operand {
            Operand::Ident(name) => c_ident(name),
            Operand::Int(v) => v.to_string(),
            Operand::Float(v) => float_literal(*v),
            Operand::Bool(v) => v.to_string(),
            Operand::Str(s) => format!("\"{}\"", c_escape(s)),
            Operand::Deref(name) => format!("(*{})", c_ident(name)),
            other => unreachable!("operand {other:?} is not a value"),
        }
    }

    fn cond_expr(&self, cond: &Cond) -> String {
        match cond {
            Cond::Cmp { lhs, op, rhs } => {
                format!("{} {} {}", self.expr(lhs), op.c_symbol(), self.expr(rhs))
            }
            Cond::Truthy(op) => self.expr(op),
            Cond::Not(inner) => format!("!({})", self.cond_expr(inner)),
            Cond::And(a, b) => format!("({}) && ({})", self.cond_expr(a), self.cond_expr(b)),
            Cond::Or(a, b) => format!("({}) || ({})", self.cond_expr(a), self.cond_expr(b)),
        }
    }

    fn site(&self, span: Span) -> String {
        format!(
            "{}:{}",
            self.analysis.sources.path(span.file).display(),
            span.line
        )
    }
}

/// Lowers one instruction at a time, tracking block depth inside the
/// current region.
struct Emitter<'a> {
    owner: &'a Generator<'a>,
    current: Option<&'a FunctionDef>,
    depth: usize,
}

impl<'a> Emitter<'a> {
    fn lower(&mut self, typed: &TypedInstr) -> Vec<String> {
        let instr = &typed.instr;
        match instr.opcode {
            Opcode::BlockEnd => {
                self.depth = self.depth.saturating_sub(1);
                vec![self.line("}")]
            }
            Opcode::If | Opcode::Elif | Opcode::Else | Opcode::While | Opcode::For => {
                let line = self.block_opener(instr);
                let out = vec![self.line(&line)];
                self.depth += 1;
                out
            }
            _ => self
                .statement(typed)
                .into_iter()
                .map(|s| self.line(&s))
                .collect(),
        }
    }

    fn block_opener(&self, instr: &Instruction) -> String {
        let owner = self.owner;
        match instr.opcode {
            Opcode::If => format!("if ({}) {{", self.cond_of(instr)),
            Opcode::Elif => format!("else if ({}) {{", self.cond_of(instr)),
            Opcode::Else => "else {".to_string(),
            Opcode::While => format!("while ({}) {{", self.cond_of(instr)),
            Opcode::For => {
                let var = c_ident(instr.operands[0].as_ident().unwrap_or_default());
                let start = owner.expr(&instr.operands[1]);
                let end = owner.expr(&instr.operands[2]);
                format!("for (int {var} = {start}; {var} <= {end}; {var}++) {{")
            }
            _ => unreachable!("not a block opener"),
        }
    }

    fn cond_of(&self, instr: &Instruction) -> String {
        match instr.operands.first() {
            Some(Operand::Cond(cond)) => self.owner.cond_expr(cond),
            _ => unreachable!("condition operand missing"),
        }
    }

    fn statement(&self, typed: &TypedInstr) -> Vec<String> {
        let owner = self.owner;
        let instr = &typed.instr;
        let ops = &instr.operands;
        match instr.opcode {
            Opcode::Mov => {
                if matches!(ops.first(), Some(Operand::TypeName(_))) {
                    // Declaration; storage is hoisted, only the
                    // initial assignment happens here.
                    match ops.get(2) {
                        Some(init) => {
                            vec![format!(
                                "{} = {};",
                                c_ident(ops[1].as_ident().unwrap_or_default()),
                                owner.expr(init)
                            )]
                        }
                        None => Vec::new(),
                    }
                } else {
                    vec![format!("{} = {};", owner.expr(&ops[0]), owner.expr(&ops[1]))]
                }
            }
            // Constants are fully initialized in their hoisted
            // declaration.
            Opcode::Const => Vec::new(),
            Opcode::Arr => self.lower_arr(typed),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                self.lower_arith(typed)
            }
            Opcode::Inc => vec![format!("{}++;", owner.expr(&ops[0]))],
            Opcode::Dec => vec![format!("{}--;", owner.expr(&ops[0]))],
            Opcode::Cmp => {
                let op = match &ops[2] {
                    Operand::CmpOp(op) => *op,
                    _ => unreachable!("CMP operator missing"),
                };
                vec![format!(
                    "cmp_flag = ({} {} {});",
                    owner.expr(&ops[0]),
                    op.c_symbol(),
                    owner.expr(&ops[1])
                )]
            }
            Opcode::Jmp => vec![format!("goto {};", label_ident(&ops[0]))],
            Opcode::Jz => vec![format!("if (cmp_flag == 0) goto {};", label_ident(&ops[0]))],
            Opcode::Jnz => vec![format!("if (cmp_flag != 0) goto {};", label_ident(&ops[0]))],
            Opcode::Label => vec![format!("{}:;", label_ident(&ops[0]))],
            Opcode::Ret => match ops.first() {
                Some(value) => vec![format!("return {};", owner.expr(value))],
                None => vec!["return;".to_string()],
            },
            Opcode::Halt => {
                if self.current.is_some() {
                    vec!["exit(0);".to_string()]
                } else {
                    vec!["return 0;".to_string()]
                }
            }
            Opcode::Call => {
                let callee = fn_ident(ops[0].as_ident().unwrap_or_default());
                let args = ops[1..ops.len() - 1]
                    .iter()
                    .map(|o| owner.expr(o))
                    .collect::<Vec<_>>()
                    .join(", ");
                match ops.last() {
                    Some(Operand::Ident(dest)) => {
                        vec![format!("{} = {callee}({args});", c_ident(dest))]
                    }
                    // Discarded result: the call still runs for its
                    // side effects.
                    _ => vec![format!("{callee}({args});")],
                }
            }
            Opcode::Ptr => vec![format!(
                "{} = &{};",
                c_ident(ops[1].as_ident().unwrap_or_default()),
                c_ident(ops[2].as_ident().unwrap_or_default())
            )],
            Opcode::Push => self.lower_push(typed),
            Opcode::Pop => self.lower_pop(typed),
            Opcode::Len => {
                let arr = c_ident(ops[0].as_ident().unwrap_or_default());
                let dest = c_ident(ops[1].as_ident().unwrap_or_default());
                vec![format!("{dest} = (int){arr}_len;")]
            }
            Opcode::Print => vec![self.lower_print(typed)],
            Opcode::PrintStr => vec![format!("print_str({});", owner.expr(&ops[0]))],
            Opcode::Read => {
                let dest = c_ident(ops.last().and_then(|o| o.as_ident()).unwrap_or_default());
                let prompt = ops
                    .iter()
                    .find_map(|o| match o {
                        Operand::Str(s) => Some(c_escape(s)),
                        _ => None,
                    })
                    .unwrap_or_default();
                let reader = match typed.ty {
                    Some(Type::Int) => "read_int",
                    Some(Type::Float) => "read_float",
                    Some(Type::Str) => "read_str",
                    _ => "read_double",
                };
                vec![format!("{dest} = {reader}(\"{prompt}\");")]
            }
            Opcode::Error => {
                let code = ErrorCode::CustomError.as_u32();
                vec![format!("error_exit({code}, {});", owner.expr(&ops[0]))]
            }
            Opcode::Import | Opcode::Fn | Opcode::End | Opcode::BlockEnd => {
                unreachable!("structural opcode in statement position")
            }
            Opcode::If | Opcode::Elif | Opcode::Else | Opcode::While | Opcode::For => {
                unreachable!("block opener in statement position")
            }
        }
    }

    fn lower_arith(&self, typed: &TypedInstr) -> Vec<String> {
        let owner = self.owner;
        let ops = &typed.instr.operands;
        let a = owner.expr(&ops[0]);
        let b = owner.expr(&ops[1]);
        let dest = owner.expr(&ops[2]);
        let opcode = typed.instr.opcode;
        if typed.ty == Some(Type::Int) {
            // Int arithmetic carries its runtime guards: overflow for
            // add/sub/mul, zero divisor for div/mod.
            let helper = match opcode {
                Opcode::Add => "checked_add",
                Opcode::Sub => "checked_sub",
                Opcode::Mul => "checked_mul",
                Opcode::Div => "checked_div",
                Opcode::Mod => "checked_mod",
                _ => unreachable!(),
            };
            let what = match opcode {
                Opcode::Div | Opcode::Mod => "division by zero",
                _ => "int overflow",
            };
            let site = owner.site(typed.instr.span);
            return vec![format!(
                "{dest} = {helper}({a}, {b}, \"{what} at {site}\");"
            )];
        }
        let line = match opcode {
            Opcode::Add => format!("{dest} = {a} + {b};"),
            Opcode::Sub => format!("{dest} = {a} - {b};"),
            Opcode::Mul => format!("{dest} = {a} * {b};"),
            Opcode::Div => format!("{dest} = {a} / {b};"),
            Opcode::Mod => format!("{dest} = fmod({a}, {b});"),
            _ => unreachable!(),
        };
        vec![line]
    }

    fn lower_arr(&self, typed: &TypedInstr) -> Vec<String> {
        // Fixed arrays are fully initialized by their hoisted
        // declaration; dynamic arrays append their initializer here.
        let ops = &typed.instr.operands;
        let name = ops[1].as_ident().unwrap_or_default();
        match self.array_type(name) {
            Some(Type::Array { capacity: None, .. }) => {
                let items = ops.iter().find_map(|o| match o {
                    Operand::List(items) => Some(items),
                    _ => None,
                });
                let Some(items) = items else {
                    return Vec::new();
                };
                let arr = c_ident(name);
                let site = self.owner.site(typed.instr.span);
                items
                    .iter()
                    .map(|item| {
                        format!(
                            "ARRAY_PUSH_DYN({arr}_data, {arr}_len, {arr}_cap, {}, \"array allocation failed at {site}\");",
                            self.owner.expr(item)
                        )
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn lower_push(&self, typed: &TypedInstr) -> Vec<String> {
        let ops = &typed.instr.operands;
        let name = ops[0].as_ident().unwrap_or_default();
        let arr = c_ident(name);
        let value = self.owner.expr(&ops[1]);
        let site = self.owner.site(typed.instr.span);
        match self.array_type(name) {
            Some(Type::Array {
                capacity: Some(cap),
                ..
            }) => vec![format!(
                "ARRAY_PUSH_FIXED({arr}_data, {arr}_len, {cap}, {value}, \"array capacity exceeded at {site}\");"
            )],
            _ => vec![format!(
                "ARRAY_PUSH_DYN({arr}_data, {arr}_len, {arr}_cap, {value}, \"array allocation failed at {site}\");"
            )],
        }
    }

    fn lower_pop(&self, typed: &TypedInstr) -> Vec<String> {
        let ops = &typed.instr.operands;
        let arr = c_ident(ops[0].as_ident().unwrap_or_default());
        let site = self.owner.site(typed.instr.span);
        let pop = format!("ARRAY_POP({arr}_data, {arr}_len, \"pop from empty array at {site}\")");
        match ops.get(1) {
            Some(Operand::Ident(dest)) => vec![format!("{} = {pop};", c_ident(dest))],
            _ => vec![format!("(void){pop};")],
        }
    }

    fn lower_print(&self, typed: &TypedInstr) -> String {
        let value = self.owner.expr(&typed.instr.operands[0]);
        match &typed.ty {
            Some(Type::Int) => format!("print_int({value});"),
            Some(Type::Float) => format!("print_float({value});"),
            Some(Type::Bool) => format!("print_bool({value});"),
            Some(Type::Str) => format!("print_str({value});"),
            Some(Type::Pointer(_)) => format!("print_ptr((const void *){value});"),
            _ => format!("print_double({value});"),
        }
    }

    /// Resolve an array symbol in the current scope chain.
    fn array_type(&self, name: &str) -> Option<Type> {
        let sym = self
            .current
            .and_then(|f| f.locals.get(name))
            .or_else(|| self.owner.analysis.globals.get(name))?;
        Some(sym.ty.clone())
    }

    /// Region bodies start one level deep; `depth` counts block
    /// nesting inside the region.
    fn line(&self, text: &str) -> String {
        let mut line = INDENT.repeat(1 + self.depth);
        line.push_str(text);
        line
    }
}

// --------------------------------------------------------------------
// Naming and literals
// --------------------------------------------------------------------

fn c_ident(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("z_{name}")
    } else {
        name.to_string()
    }
}

/// User functions always carry the `z_` prefix so they can never
/// collide with `main`, the helpers, or each other's variables.
fn fn_ident(name: &str) -> String {
    format!("z_{name}")
}

fn label_ident(operand: &Operand) -> String {
    match operand {
        Operand::LabelRef(name) => {
            if RESERVED.contains(&name.as_str()) {
                format!("z_{name}")
            } else {
                name.clone()
            }
        }
        _ => unreachable!("label operand expected"),
    }
}

fn signature(def: &FunctionDef) -> String {
    let ret = match def.sig.ret {
        Some(scalar) => scalar_c_type(scalar).to_string(),
        None => "void".to_string(),
    };
    let params = if def.sig.params.is_empty() {
        "void".to_string()
    } else {
        def.sig
            .params
            .iter()
            .map(|p| format!("{} {}", scalar_c_type(p.ty), c_ident(&p.name)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{ret} {}({params})", fn_ident(&def.sig.name))
}

fn scalar_c_type(scalar: ScalarType) -> &'static str {
    match scalar {
        ScalarType::Int => "int",
        ScalarType::Float => "float",
        ScalarType::Double => "double",
        ScalarType::Bool => "bool",
        ScalarType::Str => "const char*",
    }
}

fn c_type(ty: &Type) -> String {
    match ty {
        Type::Int => "int".to_string(),
        Type::Float => "float".to_string(),
        Type::Double => "double".to_string(),
        Type::Bool => "bool".to_string(),
        Type::Str => "const char*".to_string(),
        Type::Pointer(inner) => format!("{}*", c_type(inner)),
        Type::Array { .. } => unreachable!("arrays are declared as data/len pairs"),
    }
}

fn zero_value(ty: &Type) -> &'static str {
    match ty {
        Type::Int => "0",
        Type::Float => "0.0f",
        Type::Double => "0.0",
        Type::Bool => "false",
        Type::Str => "NULL",
        Type::Pointer(_) => "NULL",
        Type::Array { .. } => unreachable!("arrays are declared as data/len pairs"),
    }
}

fn float_literal(v: f64) -> String {
    // `{:?}` keeps a decimal point or exponent, so the literal stays
    // a double in C.
    format!("{v:?}")
}

fn c_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}
