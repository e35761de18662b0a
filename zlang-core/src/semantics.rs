//! Symbol and semantic analysis.
//!
//! Walks the merged instruction stream in program order, builds the
//! global and per-function symbol tables, and validates every
//! instruction against the declaration, mutability, typing, array,
//! pointer and function rules. The output is the same stream
//! annotated with resolved types, which the optimizer and the code
//! generator consume without re-validating anything.
//!
//! The analyzer records the first hard error in each region (the top
//! level, or one function body) and then stops validating that
//! region, but keeps scanning the rest of the program so independent
//! errors surface in a single pass.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ast::{CmpOp, Cond, FunctionSig, Instruction, Opcode, Operand};
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::modules::Program;
use crate::span::{SourceMap, Span};
use crate::symbols::{FunctionDef, FunctionMap, Symbol, SymbolKind, SymbolTable};
use crate::types::{ScalarType, Type};

/// An instruction annotated with its resolved type: the operand type
/// for `PRINT`, the operation type for arithmetic, the declared type
/// for declarations. `None` for purely structural instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedInstr {
    pub instr: Instruction,
    pub ty: Option<Type>,
}

/// Validated, type-annotated program.
#[derive(Debug)]
pub struct Analysis {
    pub instrs: Vec<TypedInstr>,
    pub globals: SymbolTable,
    pub functions: FunctionMap,
    pub sources: SourceMap,
    /// Whether top-level code touches the comparison flag.
    pub top_uses_cmp: bool,
}

/// Result of semantic analysis. When `diagnostics` is non-empty the
/// analysis is partial and must not reach code generation.
#[derive(Debug)]
pub struct AnalyzeResult {
    pub analysis: Analysis,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn analyze(program: Program) -> AnalyzeResult {
    let labels = collect_labels(&program.instructions);
    let mut analyzer = Analyzer {
        sigs: program.functions,
        labels,
        out: Vec::with_capacity(program.instructions.len()),
        globals: SymbolTable::new(),
        functions: FunctionMap::new(),
        diagnostics: Vec::new(),
        current: None,
        top_errored: false,
        top_uses_cmp: false,
        loop_vars: Vec::new(),
        blocks: Vec::new(),
        array_lens: HashMap::new(),
    };
    for instruction in program.instructions {
        analyzer.instruction(instruction);
    }
    AnalyzeResult {
        analysis: Analysis {
            instrs: analyzer.out,
            globals: analyzer.globals,
            functions: analyzer.functions,
            sources: program.sources,
            top_uses_cmp: analyzer.top_uses_cmp,
        },
        diagnostics: analyzer.diagnostics,
    }
}

/// Labels per region (None = top level, Some = function name), used
/// to validate jump targets before their definitions are reached.
fn collect_labels(instructions: &[Instruction]) -> HashMap<Option<String>, HashSet<String>> {
    let mut labels: HashMap<Option<String>, HashSet<String>> = HashMap::new();
    let mut region: Option<String> = None;
    for instr in instructions {
        match instr.opcode {
            Opcode::Fn => {
                region = instr.operands.first().and_then(|o| o.as_ident()).map(String::from);
            }
            Opcode::End => region = None,
            Opcode::Label => {
                if let Some(Operand::LabelRef(name)) = instr.operands.first() {
                    labels.entry(region.clone()).or_default().insert(name.clone());
                }
            }
            _ => {}
        }
    }
    labels
}

/// Resolution of a name against the scope chain.
enum Target {
    LoopVar,
    Sym {
        ty: Type,
        mutable: bool,
    },
}

struct FnCtx {
    name: String,
    sig: FunctionSig,
    locals: SymbolTable,
    uses_cmp: bool,
    errored: bool,
    /// Index of the `FN` marker in `out`.
    start: usize,
}

struct BlockCtx {
    loop_var: Option<String>,
}

struct Analyzer {
    sigs: BTreeMap<String, FunctionSig>,
    labels: HashMap<Option<String>, HashSet<String>>,
    out: Vec<TypedInstr>,
    globals: SymbolTable,
    functions: FunctionMap,
    diagnostics: Vec<Diagnostic>,
    current: Option<FnCtx>,
    top_errored: bool,
    top_uses_cmp: bool,
    loop_vars: Vec<String>,
    blocks: Vec<BlockCtx>,
    /// Statically known array lengths; entries are dropped as soon as
    /// control flow makes the length uncertain.
    array_lens: HashMap<String, usize>,
}

impl Analyzer {
    fn instruction(&mut self, instr: Instruction) {
        let span = instr.span;

        // Structure is always tracked, even in errored regions.
        match instr.opcode {
            Opcode::Fn => {
                self.enter_function(&instr);
                self.out.push(TypedInstr { instr, ty: None });
                return;
            }
            Opcode::End => {
                self.out.push(TypedInstr { instr, ty: None });
                self.leave_function(span);
                return;
            }
            Opcode::BlockEnd => {
                if let Some(block) = self.blocks.pop() {
                    if let Some(var) = block.loop_var {
                        self.loop_vars.retain(|v| v != &var);
                    }
                }
                self.out.push(TypedInstr { instr, ty: None });
                return;
            }
            _ => {}
        }

        if self.region_errored() {
            if instr.opcode.opens_block() {
                self.blocks.push(BlockCtx { loop_var: None });
            }
            self.out.push(TypedInstr { instr, ty: None });
            return;
        }

        let ty = self.check(&instr);
        self.out.push(TypedInstr { instr, ty });
    }

    fn check(&mut self, instr: &Instruction) -> Option<Type> {
        let span = instr.span;
        let ops = &instr.operands;
        match instr.opcode {
            Opcode::Mov => self.check_mov(ops, span),
            Opcode::Const => self.check_const(ops, span),
            Opcode::Arr => self.check_arr(ops, span),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                self.check_arith(instr.opcode, ops, span)
            }
            Opcode::Inc | Opcode::Dec => self.check_incdec(instr.opcode, ops, span),
            Opcode::Cmp => self.check_cmp_instr(ops, span),
            Opcode::Jmp | Opcode::Jz | Opcode::Jnz => self.check_jump(instr.opcode, ops, span),
            Opcode::Label => {
                // A jump target: anything proven before it may be
                // stale when control arrives from elsewhere.
                self.array_lens.clear();
                None
            }
            Opcode::If | Opcode::While | Opcode::Elif => {
                if let Some(Operand::Cond(cond)) = ops.first() {
                    self.check_cond(cond, span);
                }
                self.blocks.push(BlockCtx { loop_var: None });
                self.array_lens.clear();
                None
            }
            Opcode::Else => {
                self.blocks.push(BlockCtx { loop_var: None });
                self.array_lens.clear();
                None
            }
            Opcode::For => self.check_for(ops, span),
            Opcode::Ret => self.check_ret(ops, span),
            Opcode::Call => self.check_call(ops, span),
            Opcode::Ptr => self.check_ptr(ops, span),
            Opcode::Push => self.check_push(ops, span),
            Opcode::Pop => self.check_pop(ops, span),
            Opcode::Len => self.check_len(ops, span),
            Opcode::Print => self.check_print(ops, span),
            Opcode::PrintStr => self.check_printstr(ops, span),
            Opcode::Read => self.check_read(ops, span),
            Opcode::Error | Opcode::Halt => None,
            Opcode::Import => None,
            Opcode::Fn | Opcode::End | Opcode::BlockEnd => unreachable!("handled structurally"),
        }
    }

    // ----- declarations and assignment -------------------------------

    fn check_mov(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        // Declaration: MOV <type> <name> [value]
        if let Some(Operand::TypeName(scalar)) = ops.first() {
            let ty = Type::scalar(*scalar);
            let name = ops[1].as_ident()?.to_string();
            let init = ops.get(2);
            if let Some(init) = init {
                let init_ty = self.operand_type(init, span)?;
                if !ty.accepts(&init_ty) {
                    return self.type_mismatch(
                        span,
                        format!("cannot initialize {ty} variable '{name}' with {init_ty}"),
                    );
                }
                self.check_int_fits(&ty, init, span)?;
            }
            self.declare_checked(name, ty.clone(), true, init.cloned(), span)?;
            return Some(ty);
        }

        // Store through a pointer: MOV *p value
        if let Some(Operand::Deref(ptr)) = ops.first() {
            let target_ty = self.deref_type(ptr, span)?;
            let src_ty = self.operand_type(&ops[1], span)?;
            if !target_ty.accepts(&src_ty) {
                return self.type_mismatch(
                    span,
                    format!("cannot store {src_ty} through a pointer to {target_ty}"),
                );
            }
            return Some(target_ty);
        }

        // Assignment or untyped declaration: MOV <name> <value>
        let name = ops[0].as_ident()?.to_string();
        let src_ty = self.operand_type(&ops[1], span)?;
        match self.resolve(&name) {
            Some(_) => {
                let dest_ty = self.check_assignable(&name, &src_ty, span)?;
                self.check_int_fits(&dest_ty, &ops[1], span)?;
                Some(dest_ty)
            }
            None => {
                // Untyped declarations default to double for numeric
                // initializers; strings and bools keep their own type.
                let ty = match src_ty {
                    Type::Str => Type::Str,
                    Type::Bool => Type::Bool,
                    ty if ty.is_numeric() => Type::Double,
                    other => {
                        return self.type_mismatch(
                            span,
                            format!("cannot infer a declaration for '{name}' from {other}"),
                        );
                    }
                };
                let init = ops[1].is_literal().then(|| ops[1].clone());
                self.declare_checked(name, ty.clone(), true, init, span)?;
                Some(ty)
            }
        }
    }

    fn check_const(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let ty = match ops.first() {
            Some(Operand::TypeName(scalar)) => Type::scalar(*scalar),
            _ => return None,
        };
        let name = ops[1].as_ident()?.to_string();
        let init = &ops[2];
        if !init.is_literal() {
            return self.type_mismatch(
                span,
                format!("initializer of constant '{name}' must be a literal"),
            );
        }
        let init_ty = self.operand_type(init, span)?;
        if !ty.accepts(&init_ty) {
            return self.type_mismatch(
                span,
                format!("cannot initialize {ty} constant '{name}' with {init_ty}"),
            );
        }
        self.check_int_fits(&ty, init, span)?;
        self.declare_checked(name, ty.clone(), false, Some(init.clone()), span)?;
        Some(ty)
    }

    fn check_arr(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let elem = match ops.first() {
            Some(Operand::TypeName(scalar)) => *scalar,
            _ => return None,
        };
        let name = ops[1].as_ident()?.to_string();
        let capacity = match ops.get(2) {
            Some(Operand::Int(cap)) => {
                if *cap < 0 {
                    self.error(
                        ErrorCode::OutOfBounds,
                        format!("array '{name}' cannot have a negative capacity"),
                        span,
                    );
                    return None;
                }
                Some(*cap as usize)
            }
            _ => None,
        };
        let init_at = if capacity.is_some() { 3 } else { 2 };
        let mut len = 0;
        if let Some(Operand::List(items)) = ops.get(init_at) {
            let elem_ty = Type::scalar(elem);
            for item in items {
                let item_ty = self.operand_type(item, span)?;
                if !elem_ty.accepts(&item_ty) {
                    return self.type_mismatch(
                        span,
                        format!("array '{name}' of {elem_ty} cannot hold a {item_ty} element"),
                    );
                }
                self.check_int_fits(&elem_ty, item, span)?;
            }
            len = items.len();
            if let Some(cap) = capacity {
                if len > cap {
                    self.error(
                        ErrorCode::OutOfBounds,
                        format!(
                            "array '{name}' holds at most {cap} elements but is initialized with {len}"
                        ),
                        span,
                    );
                    return None;
                }
            }
        }
        let ty = Type::Array { elem, capacity };
        self.declare_checked(name.clone(), ty.clone(), true, None, span)?;
        self.array_lens.insert(name, len);
        Some(ty)
    }

    // ----- arithmetic -------------------------------------------------

    fn check_arith(&mut self, opcode: Opcode, ops: &[Operand], span: Span) -> Option<Type> {
        let ta = self.operand_type(&ops[0], span)?;
        let tb = self.operand_type(&ops[1], span)?;
        for (ty, op) in [(&ta, &ops[0]), (&tb, &ops[1])] {
            if !ty.is_numeric() {
                return self.type_mismatch(
                    span,
                    format!("{opcode} requires numeric operands, {} is {ty}", describe(op)),
                );
            }
        }
        let is_div = matches!(opcode, Opcode::Div);
        if matches!(opcode, Opcode::Div | Opcode::Mod) {
            if let Some(divisor) = self.const_literal(&ops[1]) {
                if matches!(divisor, Operand::Int(0)) || matches!(divisor, Operand::Float(f) if f == 0.0)
                {
                    self.error(
                        ErrorCode::DivisionByZero,
                        format!("{opcode} by a constant zero"),
                        span,
                    );
                    return None;
                }
            }
        }
        let op_ty = if ta == Type::Int && tb == Type::Int {
            Type::Int
        } else {
            Type::Double
        };
        // Constant arithmetic must stay inside the int range.
        if op_ty == Type::Int {
            if let (Some(Operand::Int(a)), Some(Operand::Int(b))) =
                (self.const_literal(&ops[0]), self.const_literal(&ops[1]))
            {
                let folded = match opcode {
                    Opcode::Add => a.checked_add(b),
                    Opcode::Sub => a.checked_sub(b),
                    Opcode::Mul => a.checked_mul(b),
                    Opcode::Div => a.checked_div(b),
                    Opcode::Mod => a.checked_rem(b),
                    _ => None,
                };
                match folded {
                    Some(v) if i32::try_from(v).is_ok() => {}
                    _ => {
                        self.error(
                            ErrorCode::Overflow,
                            format!("constant {opcode} overflows the int range"),
                            span,
                        );
                        return None;
                    }
                }
            }
        }
        let dest = ops[2].as_ident()?.to_string();
        let result_ty = Type::arithmetic_result(&ta, &tb, is_div);
        self.write_dest(&dest, &result_ty, result_ty.clone(), span)?;
        Some(op_ty)
    }

    fn check_incdec(&mut self, opcode: Opcode, ops: &[Operand], span: Span) -> Option<Type> {
        let name = ops[0].as_ident()?.to_string();
        let ty = match self.resolve(&name) {
            Some(Target::LoopVar) => {
                return self.immutable(span, format!("loop variable '{name}' cannot be modified"));
            }
            Some(Target::Sym { ty, mutable }) => {
                if !mutable {
                    return self
                        .immutable(span, format!("cannot apply {opcode} to constant '{name}'"));
                }
                ty
            }
            None => return self.undefined(&name, span),
        };
        if !ty.is_numeric() {
            return self.type_mismatch(span, format!("{opcode} requires a numeric variable"));
        }
        Some(ty)
    }

    // ----- comparisons, jumps, conditions ----------------------------

    fn check_cmp_instr(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let op = match ops.get(2) {
            Some(Operand::CmpOp(op)) => *op,
            _ => return None,
        };
        self.check_comparison(&ops[0], op, &ops[1], span)?;
        self.set_uses_cmp();
        None
    }

    fn check_jump(&mut self, opcode: Opcode, ops: &[Operand], span: Span) -> Option<Type> {
        if let Some(Operand::LabelRef(label)) = ops.first() {
            let region = self.current.as_ref().map(|f| f.name.clone());
            let known = self
                .labels
                .get(&region)
                .is_some_and(|set| set.contains(label));
            if !known {
                self.error(
                    ErrorCode::UndefinedSymbol,
                    format!("label '{label}' is not defined in this scope"),
                    span,
                );
                return None;
            }
        }
        if matches!(opcode, Opcode::Jz | Opcode::Jnz) {
            self.set_uses_cmp();
        }
        self.array_lens.clear();
        None
    }

    fn check_cond(&mut self, cond: &Cond, span: Span) -> Option<()> {
        match cond {
            Cond::Cmp { lhs, op, rhs } => {
                self.check_comparison(lhs, *op, rhs, span)?;
            }
            Cond::Truthy(operand) => {
                let ty = self.operand_type(operand, span)?;
                if !(ty.is_numeric() || ty == Type::Bool) {
                    return self
                        .type_mismatch(span, format!("{ty} cannot be used as a condition"))
                        .map(|_: Type| ());
                }
            }
            Cond::Not(inner) => {
                self.check_cond(inner, span)?;
            }
            Cond::And(a, b) | Cond::Or(a, b) => {
                self.check_cond(a, span)?;
                self.check_cond(b, span)?;
            }
        }
        Some(())
    }

    fn check_comparison(
        &mut self,
        lhs: &Operand,
        op: CmpOp,
        rhs: &Operand,
        span: Span,
    ) -> Option<Type> {
        let tl = self.operand_type(lhs, span)?;
        let tr = self.operand_type(rhs, span)?;
        let compatible = (tl.is_numeric() && tr.is_numeric())
            || (tl == Type::Bool && tr == Type::Bool && matches!(op, CmpOp::Eq | CmpOp::Ne));
        if !compatible {
            return self.type_mismatch(span, format!("cannot compare {tl} with {tr}"));
        }
        Some(Type::Bool)
    }

    fn check_for(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let var = ops[0].as_ident()?.to_string();
        for bound in &ops[1..3] {
            let ty = self.operand_type(bound, span)?;
            if ty != Type::Int {
                return self.type_mismatch(
                    span,
                    format!("FOR bounds must be int, {} is {ty}", describe(bound)),
                );
            }
        }
        if self.resolve(&var).is_some() {
            self.error(
                ErrorCode::Redeclaration,
                format!("loop variable '{var}' shadows an existing declaration"),
                span,
            );
            return None;
        }
        self.loop_vars.push(var.clone());
        self.blocks.push(BlockCtx {
            loop_var: Some(var),
        });
        self.array_lens.clear();
        None
    }

    // ----- functions --------------------------------------------------

    fn enter_function(&mut self, instr: &Instruction) {
        let name = instr
            .operands
            .first()
            .and_then(|o| o.as_ident())
            .unwrap_or_default()
            .to_string();
        let sig = match self.sigs.get(&name) {
            Some(sig) => sig.clone(),
            None => {
                // A collided duplicate; the resolver already reported
                // it. Analyze the body against the surviving sig.
                FunctionSig {
                    name: name.clone(),
                    params: Vec::new(),
                    ret: None,
                    span: instr.span,
                }
            }
        };
        let mut locals = SymbolTable::new();
        let mut errored = false;
        for param in &sig.params {
            let declared = locals.declare(Symbol {
                name: param.name.clone(),
                ty: Type::scalar(param.ty),
                mutable: true,
                kind: SymbolKind::Param,
                declared_at: sig.span,
                init: None,
            });
            if !declared {
                self.diagnostics.push(Diagnostic::error(
                    ErrorCode::Redeclaration,
                    format!("duplicate parameter '{}' in function '{name}'", param.name),
                    sig.span,
                ));
                errored = true;
            }
        }
        self.current = Some(FnCtx {
            name,
            sig,
            locals,
            uses_cmp: false,
            errored,
            start: self.out.len(),
        });
        self.array_lens.clear();
    }

    fn leave_function(&mut self, span: Span) {
        let Some(ctx) = self.current.take() else {
            return;
        };
        if ctx.sig.ret.is_some() && !ctx.errored {
            let body = &self.out[ctx.start + 1..self.out.len() - 1];
            if !always_returns(body) {
                self.diagnostics.push(Diagnostic::error(
                    ErrorCode::MissingReturn,
                    format!(
                        "function '{}' declares a return type but does not return on every path",
                        ctx.name
                    ),
                    span,
                ));
            }
        }
        self.functions.insert(
            ctx.name.clone(),
            FunctionDef {
                sig: ctx.sig,
                locals: ctx.locals,
                uses_cmp: ctx.uses_cmp,
            },
        );
        self.array_lens.clear();
    }

    fn check_ret(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let ret = match &self.current {
            Some(ctx) => ctx.sig.ret,
            None => {
                self.error(
                    ErrorCode::SyntaxError,
                    "RET outside of a function definition",
                    span,
                );
                return None;
            }
        };
        match (ret, ops.first()) {
            (Some(rt), Some(value)) => {
                let ret_ty = Type::scalar(rt);
                let value_ty = self.operand_type(value, span)?;
                if !ret_ty.accepts(&value_ty) {
                    return self.type_mismatch(
                        span,
                        format!("cannot return {value_ty} from a function declared to return {ret_ty}"),
                    );
                }
                Some(ret_ty)
            }
            (Some(rt), None) => {
                self.type_mismatch::<Type>(
                    span,
                    format!("function must return a value of type {}", Type::scalar(rt)),
                );
                None
            }
            (None, Some(_)) => {
                self.type_mismatch::<Type>(span, "function has no declared return type".to_string());
                None
            }
            (None, None) => None,
        }
    }

    fn check_call(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let name = ops[0].as_ident()?.to_string();
        let sig = match self.sigs.get(&name) {
            Some(sig) => sig.clone(),
            None => {
                self.error(
                    ErrorCode::UndefinedSymbol,
                    format!("function '{name}' is not defined"),
                    span,
                );
                return None;
            }
        };
        let args = &ops[1..ops.len() - 1];
        if args.len() != sig.params.len() {
            return self.type_mismatch(
                span,
                format!(
                    "function '{name}' expects {} arguments, got {}",
                    sig.params.len(),
                    args.len()
                ),
            );
        }
        for (arg, param) in args.iter().zip(&sig.params) {
            let arg_ty = self.operand_type(arg, span)?;
            let param_ty = Type::scalar(param.ty);
            if !param_ty.accepts(&arg_ty) {
                return self.type_mismatch(
                    span,
                    format!(
                        "argument '{}' of '{name}' expects {param_ty}, got {arg_ty}",
                        param.name
                    ),
                );
            }
        }
        let ret_ty = match ops.last() {
            Some(Operand::Discard) => sig.ret.map(Type::scalar),
            Some(Operand::Ident(dest)) => match sig.ret {
                Some(rt) => {
                    let ret_ty = Type::scalar(rt);
                    let dest = dest.clone();
                    self.write_dest(&dest, &ret_ty, ret_ty.clone(), span)?;
                    Some(ret_ty)
                }
                None => {
                    return self.type_mismatch(
                        span,
                        format!("function '{name}' has no return value to bind"),
                    );
                }
            },
            _ => None,
        };
        // The callee may push to global arrays.
        self.array_lens.clear();
        ret_ty
    }

    // ----- pointers and arrays ---------------------------------------

    fn check_ptr(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let scalar = match ops.first() {
            Some(Operand::TypeName(scalar)) => *scalar,
            _ => return None,
        };
        let ptr_name = ops[1].as_ident()?.to_string();
        let target = ops[2].as_ident()?.to_string();
        let target_ty = Type::scalar(scalar);
        match self.resolve(&target) {
            None => return self.undefined(&target, span),
            Some(Target::LoopVar) => {
                return self.type_mismatch(
                    span,
                    format!("cannot take the address of loop variable '{target}'"),
                );
            }
            Some(Target::Sym { ty, .. }) => {
                if ty != target_ty {
                    return self.type_mismatch(
                        span,
                        format!("PTR target '{target}' is {ty}, expected {target_ty}"),
                    );
                }
            }
        }
        let ptr_ty = Type::Pointer(Box::new(target_ty));
        match self.resolve(&ptr_name) {
            None => {
                self.declare_checked(ptr_name, ptr_ty.clone(), true, None, span)?;
            }
            Some(Target::Sym { ty, mutable }) if ty == ptr_ty => {
                // Re-aiming an existing pointer of the same type.
                if !mutable {
                    return self
                        .immutable(span, format!("cannot re-aim constant pointer '{ptr_name}'"));
                }
            }
            Some(_) => {
                return self.type_mismatch(
                    span,
                    format!("'{ptr_name}' is already declared with a different type"),
                );
            }
        }
        Some(ptr_ty)
    }

    fn array_elem(&mut self, name: &str, span: Span) -> Option<(ScalarType, Option<usize>)> {
        match self.resolve(name) {
            Some(Target::Sym {
                ty: Type::Array { elem, capacity },
                ..
            }) => Some((elem, capacity)),
            Some(_) => {
                self.type_mismatch::<Type>(span, format!("'{name}' is not an array"));
                None
            }
            None => {
                self.undefined::<Type>(name, span);
                None
            }
        }
    }

    fn check_push(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let name = ops[0].as_ident()?.to_string();
        let (elem, capacity) = self.array_elem(&name, span)?;
        let elem_ty = Type::scalar(elem);
        let value_ty = self.operand_type(&ops[1], span)?;
        if !elem_ty.accepts(&value_ty) {
            return self.type_mismatch(
                span,
                format!("cannot push {value_ty} onto array '{name}' of {elem_ty}"),
            );
        }
        self.check_int_fits(&elem_ty, &ops[1], span)?;
        if let Some(len) = self.array_lens.get(&name).copied() {
            if let Some(cap) = capacity {
                if len >= cap {
                    self.error(
                        ErrorCode::OutOfBounds,
                        format!("push exceeds the fixed capacity {cap} of array '{name}'"),
                        span,
                    );
                    return None;
                }
            }
            self.array_lens.insert(name, len + 1);
        }
        Some(elem_ty)
    }

    fn check_pop(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let name = ops[0].as_ident()?.to_string();
        let (elem, _) = self.array_elem(&name, span)?;
        if let Some(len) = self.array_lens.get(&name).copied() {
            if len == 0 {
                self.error(
                    ErrorCode::OutOfBounds,
                    format!("pop from array '{name}' which is empty at this point"),
                    span,
                );
                return None;
            }
            self.array_lens.insert(name.clone(), len - 1);
        }
        let elem_ty = Type::scalar(elem);
        if let Some(dest) = ops.get(1).and_then(|o| o.as_ident()) {
            let dest = dest.to_string();
            self.write_dest(&dest, &elem_ty, elem_ty.clone(), span)?;
        }
        Some(elem_ty)
    }

    fn check_len(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let name = ops[0].as_ident()?.to_string();
        self.array_elem(&name, span)?;
        let dest = ops[1].as_ident()?.to_string();
        self.write_dest(&dest, &Type::Int, Type::Int, span)?;
        Some(Type::Int)
    }

    // ----- I/O --------------------------------------------------------

    fn check_print(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let ty = self.operand_type(&ops[0], span)?;
        if ty.is_array() {
            return self.type_mismatch(span, "an array cannot be printed directly".to_string());
        }
        Some(ty)
    }

    fn check_printstr(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let ty = self.operand_type(&ops[0], span)?;
        if ty != Type::Str {
            return self.type_mismatch(span, format!("PRINTSTR requires a string, got {ty}"));
        }
        Some(Type::Str)
    }

    fn check_read(&mut self, ops: &[Operand], span: Span) -> Option<Type> {
        let scalar = match ops.first() {
            Some(Operand::TypeName(scalar)) => *scalar,
            _ => ScalarType::Double,
        };
        if scalar == ScalarType::Bool {
            return self.type_mismatch(span, "READ cannot read a bool".to_string());
        }
        let ty = Type::scalar(scalar);
        let dest = ops.last().and_then(|o| o.as_ident())?.to_string();
        self.write_dest(&dest, &ty, ty.clone(), span)?;
        Some(ty)
    }

    // ----- shared helpers --------------------------------------------

    fn resolve(&self, name: &str) -> Option<Target> {
        if self.loop_vars.iter().any(|v| v == name) {
            return Some(Target::LoopVar);
        }
        if let Some(ctx) = &self.current {
            if let Some(sym) = ctx.locals.get(name) {
                return Some(Target::Sym {
                    ty: sym.ty.clone(),
                    mutable: sym.mutable,
                });
            }
        }
        self.globals.get(name).map(|sym| Target::Sym {
            ty: sym.ty.clone(),
            mutable: sym.mutable,
        })
    }

    fn operand_type(&mut self, operand: &Operand, span: Span) -> Option<Type> {
        match operand {
            Operand::Int(_) => Some(Type::Int),
            Operand::Float(_) => Some(Type::Double),
            Operand::Bool(_) => Some(Type::Bool),
            Operand::Str(_) => Some(Type::Str),
            Operand::Ident(name) => match self.resolve(name) {
                Some(Target::LoopVar) => Some(Type::Int),
                Some(Target::Sym { ty, .. }) => Some(ty),
                None => self.undefined(name, span),
            },
            Operand::Deref(name) => self.deref_type(name, span),
            _ => None,
        }
    }

    fn deref_type(&mut self, name: &str, span: Span) -> Option<Type> {
        match self.resolve(name) {
            Some(Target::Sym { ty, .. }) => match ty.pointee() {
                Some(inner) => Some(inner.clone()),
                None => {
                    self.type_mismatch(span, format!("'{name}' is {ty}, not a pointer"))
                }
            },
            Some(Target::LoopVar) => {
                self.type_mismatch(span, format!("loop variable '{name}' is not a pointer"))
            }
            None => self.undefined(name, span),
        }
    }

    /// Validate assignment to an existing name, returning its type.
    fn check_assignable(&mut self, name: &str, src_ty: &Type, span: Span) -> Option<Type> {
        match self.resolve(name) {
            Some(Target::LoopVar) => {
                self.immutable(span, format!("loop variable '{name}' cannot be assigned"))
            }
            Some(Target::Sym { ty, mutable }) => {
                if !mutable {
                    return self
                        .immutable(span, format!("cannot assign to constant '{name}'"));
                }
                if ty.is_array() {
                    return self.type_mismatch(
                        span,
                        format!("array '{name}' cannot be assigned as a whole"),
                    );
                }
                if !ty.accepts(src_ty) {
                    return self.type_mismatch(
                        span,
                        format!("cannot assign {src_ty} to {ty} variable '{name}'"),
                    );
                }
                Some(ty)
            }
            None => self.undefined(name, span),
        }
    }

    /// Validate a write destination, declaring it on first use.
    fn write_dest(
        &mut self,
        name: &str,
        value_ty: &Type,
        declare_ty: Type,
        span: Span,
    ) -> Option<()> {
        match self.resolve(name) {
            Some(_) => self.check_assignable(name, value_ty, span).map(|_| ()),
            None => self
                .declare_checked(name.to_string(), declare_ty, true, None, span)
                .map(|_| ()),
        }
    }

    fn declare_checked(
        &mut self,
        name: String,
        ty: Type,
        mutable: bool,
        init: Option<Operand>,
        span: Span,
    ) -> Option<()> {
        let kind = if self.current.is_some() {
            SymbolKind::Local
        } else {
            SymbolKind::Global
        };
        let symbol = Symbol {
            name: name.clone(),
            ty,
            mutable,
            kind,
            declared_at: span,
            init,
        };
        let declared = match &mut self.current {
            Some(ctx) => ctx.locals.declare(symbol),
            None => self.globals.declare(symbol),
        };
        if !declared {
            self.error(
                ErrorCode::Redeclaration,
                format!("'{name}' is already declared in this scope"),
                span,
            );
            return None;
        }
        Some(())
    }

    /// The literal a compile-time-constant operand evaluates to:
    /// literals themselves, or constants with a literal initializer.
    fn const_literal(&self, operand: &Operand) -> Option<Operand> {
        match operand {
            op if op.is_literal() => Some(op.clone()),
            Operand::Ident(name) => {
                if let Some(ctx) = &self.current {
                    if let Some(sym) = ctx.locals.get(name) {
                        return (!sym.mutable).then(|| sym.init.clone()).flatten();
                    }
                }
                let sym = self.globals.get(name)?;
                (!sym.mutable).then(|| sym.init.clone()).flatten()
            }
            _ => None,
        }
    }

    fn check_int_fits(&mut self, dest_ty: &Type, operand: &Operand, span: Span) -> Option<()> {
        if *dest_ty == Type::Int {
            if let Operand::Int(v) = operand {
                if i32::try_from(*v).is_err() {
                    self.error(
                        ErrorCode::Overflow,
                        format!("literal {v} does not fit the int range"),
                        span,
                    );
                    return None;
                }
            }
        }
        Some(())
    }

    fn set_uses_cmp(&mut self) {
        match &mut self.current {
            Some(ctx) => ctx.uses_cmp = true,
            None => self.top_uses_cmp = true,
        }
    }

    fn region_errored(&self) -> bool {
        match &self.current {
            Some(ctx) => ctx.errored,
            None => self.top_errored,
        }
    }

    fn error(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::error(code, message, span));
        match &mut self.current {
            Some(ctx) => ctx.errored = true,
            None => self.top_errored = true,
        }
    }

    fn type_mismatch<T>(&mut self, span: Span, message: String) -> Option<T> {
        self.error(ErrorCode::TypeMismatch, message, span);
        None
    }

    fn immutable<T>(&mut self, span: Span, message: String) -> Option<T> {
        self.error(ErrorCode::ImmutableAssignment, message, span);
        None
    }

    fn undefined<T>(&mut self, name: &str, span: Span) -> Option<T> {
        self.error(
            ErrorCode::UndefinedSymbol,
            format!("'{name}' is not declared"),
            span,
        );
        None
    }
}

fn describe(operand: &Operand) -> String {
    match operand {
        Operand::Ident(name) => format!("'{name}'"),
        Operand::Deref(name) => format!("'*{name}'"),
        Operand::Int(v) => format!("literal {v}"),
        Operand::Float(v) => format!("literal {v}"),
        Operand::Bool(v) => format!("literal {v}"),
        Operand::Str(_) => "a string literal".to_string(),
        _ => "operand".to_string(),
    }
}

/// Whether a body region is guaranteed to execute a `RET` (or `HALT`)
/// on every control path. Loops are assumed skippable; an `IF` chain
/// guarantees return only when it carries an `ELSE` and every branch
/// guarantees return.
fn always_returns(body: &[TypedInstr]) -> bool {
    let mut i = 0;
    while i < body.len() {
        match body[i].instr.opcode {
            Opcode::Ret | Opcode::Halt => return true,
            Opcode::If => {
                let (next, guaranteed) = scan_if_chain(body, i);
                if guaranteed {
                    return true;
                }
                i = next;
            }
            op if op.opens_block() => {
                i = skip_block(body, i);
            }
            _ => i += 1,
        }
    }
    false
}

/// Scan an `IF`/`ELIF`/`ELSE` chain starting at `start`. Returns the
/// index just past the chain and whether every branch (with an `ELSE`
/// present) always returns.
fn scan_if_chain(body: &[TypedInstr], start: usize) -> (usize, bool) {
    let mut i = start;
    let mut all_return = true;
    let mut has_else = false;
    loop {
        let opener = body[i].instr.opcode;
        let end = skip_block(body, i);
        let inner = if end > i + 1 { &body[i + 1..end - 1] } else { &body[..0] };
        if !always_returns(inner) {
            all_return = false;
        }
        if opener == Opcode::Else {
            has_else = true;
        }
        i = end;
        match body.get(i).map(|t| t.instr.opcode) {
            Some(Opcode::Elif) | Some(Opcode::Else) => continue,
            _ => break,
        }
    }
    (i, all_return && has_else)
}

/// Index just past the `BLOCKEND` matching the opener at `start`.
fn skip_block(body: &[TypedInstr], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < body.len() {
        let op = body[i].instr.opcode;
        if op.opens_block() {
            depth += 1;
        } else if op == Opcode::BlockEnd {
            depth -= 1;
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    body.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules;
    use std::path::Path;

    fn analyze_source(source: &str) -> AnalyzeResult {
        let resolved = modules::resolve_source(source, Path::new("test.z"));
        assert!(
            resolved.diagnostics.is_empty(),
            "parse diagnostics: {:?}",
            resolved.diagnostics
        );
        analyze(resolved.program)
    }

    fn expect_ok(source: &str) -> Analysis {
        let result = analyze_source(source);
        assert!(
            result.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            result.diagnostics
        );
        result.analysis
    }

    fn expect_code(source: &str, code: ErrorCode) {
        let result = analyze_source(source);
        assert!(
            result.diagnostics.iter().any(|d| d.code == code),
            "expected {code:?}, got {:?}",
            result.diagnostics
        );
    }

    #[test]
    fn redeclaration_is_rejected_even_with_same_type() {
        expect_code("MOV int x 1\nMOV int x 2\n", ErrorCode::Redeclaration);
        expect_code("MOV int x 1\nMOV double x 2\n", ErrorCode::Redeclaration);
    }

    #[test]
    fn constants_cannot_be_reassigned() {
        expect_code(
            "CONST int limit 10\nMOV limit 20\n",
            ErrorCode::ImmutableAssignment,
        );
        expect_code("CONST int c 1\nINC c\n", ErrorCode::ImmutableAssignment);
    }

    #[test]
    fn undefined_symbols_are_reported() {
        expect_code("PRINT nope\n", ErrorCode::UndefinedSymbol);
        expect_code("ADD x 1 y\n", ErrorCode::UndefinedSymbol);
        expect_code("JMP nowhere\n", ErrorCode::UndefinedSymbol);
    }

    #[test]
    fn untyped_declarations_default_to_double() {
        let analysis = expect_ok("MOV x 5\n");
        assert_eq!(analysis.globals.get("x").unwrap().ty, Type::Double);
        let analysis = expect_ok("MOV s \"hi\"\nMOV b true\n");
        assert_eq!(analysis.globals.get("s").unwrap().ty, Type::Str);
        assert_eq!(analysis.globals.get("b").unwrap().ty, Type::Bool);
    }

    #[test]
    fn one_type_per_symbol_for_its_lifetime() {
        expect_code("MOV x 5\nMOV x \"text\"\n", ErrorCode::TypeMismatch);
        expect_code("MOV int x 1\nMOV x true\n", ErrorCode::TypeMismatch);
    }

    #[test]
    fn constant_division_by_zero_is_compile_time() {
        expect_code("DIV 10 0 x\n", ErrorCode::DivisionByZero);
        expect_code("MOD 10 0 x\n", ErrorCode::DivisionByZero);
        expect_code("CONST int z 0\nDIV 10 z x\n", ErrorCode::DivisionByZero);
        // A mutable zero stays a runtime concern.
        expect_ok("MOV int d 0\nMOV int n 10\nDIV n d x\n");
    }

    #[test]
    fn constant_int_arithmetic_checks_overflow() {
        expect_code("MUL 2000000000 2 x\n", ErrorCode::Overflow);
        expect_code("MOV int big 2147483648\n", ErrorCode::Overflow);
        expect_ok("MOV int fine 2147483647\n");
    }

    #[test]
    fn fixed_array_capacity_is_enforced() {
        expect_code("ARR Aint a 2 [1, 2, 3]\n", ErrorCode::OutOfBounds);
        expect_ok("ARR Aint a 2 [1, 2]\n");
        expect_code("ARR Aint a 2 [1, 2]\nPUSH a 3\n", ErrorCode::OutOfBounds);
        expect_ok("ARR Aint a 3 [1, 2]\nPUSH a 3\n");
    }

    #[test]
    fn push_after_branch_defers_to_runtime() {
        // The static length is unknown after a branch, so the push is
        // legal at compile time and guarded at runtime instead.
        expect_ok(
            "ARR Aint a 2 [1, 2]\nMOV int x 0\nIF x == 1:\n    POP a\nPUSH a 9\n",
        );
    }

    #[test]
    fn pop_from_statically_empty_array() {
        expect_code("ARR Aint a 2\nPOP a\n", ErrorCode::OutOfBounds);
    }

    #[test]
    fn pointer_targets_must_match_declared_type() {
        expect_ok("MOV int x 42\nPTR int p x\nPRINT *p\n");
        expect_code("MOV double d 1\nPTR int p d\n", ErrorCode::TypeMismatch);
        expect_code("PTR int p ghost\n", ErrorCode::UndefinedSymbol);
    }

    #[test]
    fn deref_of_string_pointer_in_arithmetic_is_rejected() {
        expect_code(
            "MOV string s \"hi\"\nPTR string p s\nADD *p 1 x\n",
            ErrorCode::TypeMismatch,
        );
    }

    #[test]
    fn pointers_cannot_be_assigned_literals() {
        expect_code(
            "MOV int x 1\nPTR int p x\nMOV p 1234\n",
            ErrorCode::TypeMismatch,
        );
    }

    #[test]
    fn call_arity_and_binding_are_checked() {
        let ok = "FN add(int a, int b) -> int:\n    ADD a b r;\n    RET r;\nEND\nCALL add(1, 2) -> x\n";
        let analysis = expect_ok(ok);
        assert_eq!(analysis.globals.get("x").unwrap().ty, Type::Int);
        expect_code(
            "FN add(int a, int b) -> int:\n    ADD a b r;\n    RET r;\nEND\nCALL add(1) -> x\n",
            ErrorCode::TypeMismatch,
        );
        expect_code("CALL ghost(1) -> x\n", ErrorCode::UndefinedSymbol);
        expect_code(
            "FN hello():\n    PRINT \"hi\";\nEND\nCALL hello() -> x\n",
            ErrorCode::TypeMismatch,
        );
        // Discard binding is always allowed.
        expect_ok("FN f() -> int:\n    RET 1;\nEND\nCALL f() _\n");
    }

    #[test]
    fn missing_return_on_some_path() {
        expect_code(
            "FN f(int n) -> int:\n    IF n > 0:\n        RET 1;\nEND\n",
            ErrorCode::MissingReturn,
        );
        expect_ok(
            "FN f(int n) -> int:\n    IF n > 0:\n        RET 1;\n    ELSE:\n        RET 2;\nEND\n",
        );
        expect_ok("FN f() -> int:\n    RET 1;\nEND\n");
    }

    #[test]
    fn locals_are_invisible_outside_their_function() {
        expect_code(
            "FN f():\n    MOV int inner 1;\nEND\nPRINT inner\n",
            ErrorCode::UndefinedSymbol,
        );
    }

    #[test]
    fn globals_are_visible_inside_functions() {
        expect_ok("MOV int g 1\nFN f():\n    PRINT g;\nEND\nCALL f()\n");
    }

    #[test]
    fn loop_variables_are_scoped_and_immutable() {
        expect_ok("FOR i 1..3:\n    PRINT i\n");
        expect_code("FOR i 1..3:\n    MOV i 5\n", ErrorCode::ImmutableAssignment);
        expect_code("FOR i 1..3:\n    PRINT i\nPRINT i\n", ErrorCode::UndefinedSymbol);
        expect_code("MOV int i 0\nFOR i 1..3:\n    PRINT i\n", ErrorCode::Redeclaration);
    }

    #[test]
    fn analyzer_reports_errors_from_multiple_functions() {
        let result = analyze_source(
            "FN a():\n    PRINT ghost1;\nEND\nFN b():\n    PRINT ghost2;\nEND\n",
        );
        assert_eq!(result.diagnostics.len(), 2);
    }

    #[test]
    fn analyzer_stops_after_first_error_per_region() {
        let result = analyze_source("PRINT ghost1\nPRINT ghost2\n");
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn cmp_flag_usage_is_tracked_per_region() {
        let analysis = expect_ok(
            "loop:\nCMP 1 2 <\nJNZ loop\nFN f():\n    PRINT 1;\nEND\n",
        );
        assert!(analysis.top_uses_cmp);
        assert!(!analysis.functions.get("f").unwrap().uses_cmp);
    }

    #[test]
    fn annotates_print_with_operand_type() {
        let analysis = expect_ok("MOV int x 1\nPRINT x\n");
        let print = analysis
            .instrs
            .iter()
            .find(|t| t.instr.opcode == Opcode::Print)
            .unwrap();
        assert_eq!(print.ty, Some(Type::Int));
    }
}
