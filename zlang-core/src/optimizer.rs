//! Fixed-point optimization over the validated instruction stream.
//!
//! Four rewrites run to a fixed point, independently inside each
//! function body and each top-level block, never across function
//! boundaries: constant folding, constant propagation, dead-code
//! elimination and strength reduction. Every rewrite preserves
//! observable behavior: I/O order, returned values, and runtime error
//! conditions that cannot be proven impossible (an unprovable
//! overflow or division stays in the stream so its guard still
//! fires). This stage never raises a user diagnostic; the stream it
//! receives is already validated.

use std::collections::{HashMap, HashSet};

use crate::ast::{Cond, Instruction, Opcode, Operand};
use crate::semantics::{Analysis, TypedInstr};
use crate::symbols::SymbolTable;
use crate::types::Type;

/// Upper bound on fixed-point iterations; each pass shrinks or
/// preserves the stream, so this is only a backstop.
const MAX_PASSES: usize = 8;

pub fn optimize(analysis: Analysis) -> Analysis {
    let Analysis {
        instrs,
        globals,
        mut functions,
        sources,
        ..
    } = analysis;

    // Variables whose address is taken anywhere in the program are
    // never propagated or eliminated.
    let aliased: HashSet<String> = instrs
        .iter()
        .filter(|t| t.instr.opcode == Opcode::Ptr)
        .filter_map(|t| t.instr.operands.get(2).and_then(|o| o.as_ident()))
        .map(String::from)
        .collect();

    let mut out = Vec::with_capacity(instrs.len());
    let mut segment: Vec<TypedInstr> = Vec::new();
    let mut current_fn: Option<String> = None;

    for typed in instrs {
        match typed.instr.opcode {
            Opcode::Fn => {
                let region = Region::top(&globals, &aliased);
                flush(&mut out, &mut segment, &region);
                current_fn = typed
                    .instr
                    .operands
                    .first()
                    .and_then(|o| o.as_ident())
                    .map(String::from);
                out.push(typed);
            }
            Opcode::End => {
                let locals = current_fn
                    .take()
                    .and_then(|name| functions.get(&name).map(|f| f.locals.clone()));
                let region = match &locals {
                    Some(locals) => Region::function(&globals, locals, &aliased),
                    None => Region::top(&globals, &aliased),
                };
                flush(&mut out, &mut segment, &region);
                out.push(typed);
            }
            _ => segment.push(typed),
        }
    }
    let region = Region::top(&globals, &aliased);
    flush(&mut out, &mut segment, &region);

    // DCE may have removed the last use of the comparison flag.
    let top_uses_cmp = recount_cmp(&out, None);
    let names: Vec<String> = functions.keys().cloned().collect();
    for name in names {
        let uses = recount_cmp(&out, Some(name.as_str()));
        if let Some(def) = functions.get_mut(&name) {
            def.uses_cmp = uses;
        }
    }

    Analysis {
        instrs: out,
        globals,
        functions,
        sources,
        top_uses_cmp,
    }
}

fn flush(out: &mut Vec<TypedInstr>, segment: &mut Vec<TypedInstr>, region: &Region<'_>) {
    if segment.is_empty() {
        return;
    }
    let optimized = optimize_region(std::mem::take(segment), region);
    out.extend(optimized);
}

/// Facts about the region being optimized.
struct Region<'a> {
    globals: &'a SymbolTable,
    locals: Option<&'a SymbolTable>,
    aliased: &'a HashSet<String>,
}

impl<'a> Region<'a> {
    fn top(globals: &'a SymbolTable, aliased: &'a HashSet<String>) -> Region<'a> {
        Region {
            globals,
            locals: None,
            aliased,
        }
    }

    fn function(
        globals: &'a SymbolTable,
        locals: &'a SymbolTable,
        aliased: &'a HashSet<String>,
    ) -> Region<'a> {
        Region {
            globals,
            locals: Some(locals),
            aliased,
        }
    }

    /// Constants with literal initializers; these facts hold
    /// everywhere in the region.
    fn const_seed(&self) -> HashMap<String, Operand> {
        let mut seed = HashMap::new();
        for table in [Some(self.globals), self.locals].into_iter().flatten() {
            for sym in table.iter() {
                if !sym.mutable {
                    if let Some(init) = &sym.init {
                        if init.is_literal() {
                            seed.insert(sym.name.clone(), init.clone());
                        }
                    }
                }
            }
        }
        seed
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.is_some_and(|t| t.get(name).is_some())
    }
}

fn optimize_region(mut instrs: Vec<TypedInstr>, region: &Region<'_>) -> Vec<TypedInstr> {
    for _ in 0..MAX_PASSES {
        let before = instrs.clone();
        instrs = propagate_constants(instrs, region);
        instrs = fold_constants(instrs);
        instrs = reduce_strength(instrs);
        instrs = eliminate_dead_code(instrs, region);
        if instrs == before {
            break;
        }
    }
    instrs
}

// --------------------------------------------------------------------
// Constant propagation
// --------------------------------------------------------------------

/// Replace reads of variables proven to hold a single constant with
/// the literal itself. Constants seed the fact set; mutable facts are
/// dropped at every label, block boundary, call, read, or
/// reassignment, so only straight-line knowledge is used.
fn propagate_constants(instrs: Vec<TypedInstr>, region: &Region<'_>) -> Vec<TypedInstr> {
    let consts = region.const_seed();
    let mut known: HashMap<String, Operand> = HashMap::new();
    let mut out = Vec::with_capacity(instrs.len());

    let empty: HashMap<String, Operand> = HashMap::new();

    for typed in instrs {
        let TypedInstr { instr, ty } = typed;
        let mut operands = instr.operands;

        // Substitute in pure read positions.
        match instr.opcode {
            Opcode::Mov => {
                if matches!(operands.first(), Some(Operand::TypeName(_))) {
                    if let Some(init) = operands.get_mut(2) {
                        subst_operand(init, &consts, &known, region.aliased);
                    }
                } else if let Some(src) = operands.get_mut(1) {
                    subst_operand(src, &consts, &known, region.aliased);
                }
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Cmp => {
                for op in operands.iter_mut().take(2) {
                    subst_operand(op, &consts, &known, region.aliased);
                }
            }
            Opcode::If | Opcode::Elif => {
                // Entry conditions are evaluated once, on arrival.
                if let Some(Operand::Cond(cond)) = operands.first_mut() {
                    subst_cond(cond, &consts, &known, region.aliased);
                }
            }
            Opcode::While => {
                // Loop conditions re-evaluate on the back edge, so
                // only region-wide constants are safe there.
                if let Some(Operand::Cond(cond)) = operands.first_mut() {
                    subst_cond(cond, &consts, &empty, region.aliased);
                }
            }
            Opcode::For => {
                // The end bound re-evaluates every iteration in the
                // lowered loop, so only region-wide constants apply.
                for op in operands.iter_mut().skip(1) {
                    subst_operand(op, &consts, &empty, region.aliased);
                }
            }
            Opcode::Print | Opcode::PrintStr | Opcode::Ret => {
                if let Some(op) = operands.first_mut() {
                    subst_operand(op, &consts, &known, region.aliased);
                }
            }
            Opcode::Call => {
                let last = operands.len() - 1;
                for op in &mut operands[1..last] {
                    subst_operand(op, &consts, &known, region.aliased);
                }
            }
            Opcode::Push => {
                if let Some(op) = operands.get_mut(1) {
                    subst_operand(op, &consts, &known, region.aliased);
                }
            }
            _ => {}
        }

        // Update the fact set.
        match instr.opcode {
            Opcode::Mov => match (operands.first(), operands.get(1), operands.get(2)) {
                (Some(Operand::TypeName(_)), Some(Operand::Ident(name)), init) => {
                    match init {
                        Some(lit) if lit.is_literal() && !region.aliased.contains(name) => {
                            known.insert(name.clone(), lit.clone());
                        }
                        _ => {
                            known.remove(name);
                        }
                    }
                }
                (Some(Operand::Ident(name)), Some(src), _) => {
                    if src.is_literal() && !region.aliased.contains(name) {
                        known.insert(name.clone(), src.clone());
                    } else {
                        known.remove(name);
                    }
                }
                _ => {}
            },
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                if let Some(Operand::Ident(dest)) = operands.get(2) {
                    known.remove(dest);
                }
            }
            Opcode::Inc | Opcode::Dec | Opcode::Read => {
                if let Some(Operand::Ident(name)) = operands.last() {
                    known.remove(name);
                }
            }
            Opcode::Pop | Opcode::Len => {
                if let Some(Operand::Ident(dest)) = operands.get(1) {
                    known.remove(dest);
                }
            }
            Opcode::Call => {
                if let Some(Operand::Ident(dest)) = operands.last() {
                    known.remove(dest);
                }
                // The callee may reassign any global.
                known.retain(|name, _| region.is_local(name));
            }
            Opcode::Label
            | Opcode::If
            | Opcode::Elif
            | Opcode::Else
            | Opcode::While
            | Opcode::For
            | Opcode::BlockEnd => known.clear(),
            _ => {}
        }

        out.push(TypedInstr {
            instr: Instruction::new(instr.opcode, operands, instr.span),
            ty,
        });
    }
    out
}

fn subst_operand(
    op: &mut Operand,
    consts: &HashMap<String, Operand>,
    known: &HashMap<String, Operand>,
    aliased: &HashSet<String>,
) {
    if let Operand::Ident(name) = op {
        if aliased.contains(name.as_str()) {
            return;
        }
        if let Some(lit) = consts.get(name.as_str()).or_else(|| known.get(name.as_str())) {
            *op = lit.clone();
        }
    }
}

fn subst_cond(
    cond: &mut Cond,
    consts: &HashMap<String, Operand>,
    known: &HashMap<String, Operand>,
    aliased: &HashSet<String>,
) {
    match cond {
        Cond::Cmp { lhs, rhs, .. } => {
            subst_operand(lhs, consts, known, aliased);
            subst_operand(rhs, consts, known, aliased);
        }
        Cond::Truthy(op) => subst_operand(op, consts, known, aliased),
        Cond::Not(inner) => subst_cond(inner, consts, known, aliased),
        Cond::And(a, b) | Cond::Or(a, b) => {
            subst_cond(a, consts, known, aliased);
            subst_cond(b, consts, known, aliased);
        }
    }
}

// --------------------------------------------------------------------
// Constant folding
// --------------------------------------------------------------------

/// Replace arithmetic over literal operands with a direct assignment
/// of the computed value. Folds that would overflow `int` or divide
/// by zero are left in place so their runtime guards survive.
fn fold_constants(instrs: Vec<TypedInstr>) -> Vec<TypedInstr> {
    instrs
        .into_iter()
        .map(|typed| {
            let opcode = typed.instr.opcode;
            if !matches!(
                opcode,
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod
            ) {
                return typed;
            }
            let ops = &typed.instr.operands;
            let Some(folded) = fold_value(opcode, &typed.ty, &ops[0], &ops[1]) else {
                return typed;
            };
            let dest = ops[2].clone();
            mov_of(&typed, dest, folded)
        })
        .collect()
}

/// Build a `MOV dest value` carrying over span and type annotation.
fn mov_of(from: &TypedInstr, dest: Operand, value: Operand) -> TypedInstr {
    TypedInstr {
        instr: Instruction::new(Opcode::Mov, vec![dest, value], from.instr.span),
        ty: from.ty.clone(),
    }
}

fn fold_value(opcode: Opcode, ty: &Option<Type>, a: &Operand, b: &Operand) -> Option<Operand> {
    match ty {
        Some(Type::Int) => {
            let (Operand::Int(a), Operand::Int(b)) = (a, b) else {
                return None;
            };
            if *b == 0 && matches!(opcode, Opcode::Div | Opcode::Mod) {
                return None;
            }
            let value = match opcode {
                Opcode::Add => a.checked_add(*b),
                Opcode::Sub => a.checked_sub(*b),
                Opcode::Mul => a.checked_mul(*b),
                Opcode::Div => a.checked_div(*b),
                Opcode::Mod => a.checked_rem(*b),
                _ => None,
            }?;
            // Out-of-range folds keep their guarded instruction.
            i32::try_from(value).ok().map(|v| Operand::Int(v as i64))
        }
        Some(Type::Double) => {
            let a = as_f64(a)?;
            let b = as_f64(b)?;
            if b == 0.0 && matches!(opcode, Opcode::Div | Opcode::Mod) {
                return None;
            }
            let value = match opcode {
                Opcode::Add => a + b,
                Opcode::Sub => a - b,
                Opcode::Mul => a * b,
                Opcode::Div => a / b,
                Opcode::Mod => a % b,
                _ => return None,
            };
            Some(Operand::Float(value))
        }
        _ => None,
    }
}

fn as_f64(operand: &Operand) -> Option<f64> {
    match operand {
        Operand::Int(v) => Some(*v as f64),
        Operand::Float(v) => Some(*v),
        _ => None,
    }
}

// --------------------------------------------------------------------
// Strength reduction
// --------------------------------------------------------------------

/// Rewrite int multiplications and additions into cheaper forms.
/// Only `int`-typed operations are touched: their overflow guards are
/// equivalent on both sides of the rewrite, so behavior is unchanged.
fn reduce_strength(instrs: Vec<TypedInstr>) -> Vec<TypedInstr> {
    instrs
        .into_iter()
        .map(|typed| {
            if typed.ty != Some(Type::Int) {
                return typed;
            }
            let ops = &typed.instr.operands;
            match typed.instr.opcode {
                Opcode::Mul => {
                    let (lit, other) = match (&ops[0], &ops[1]) {
                        (Operand::Int(v), other) => (*v, other.clone()),
                        (other, Operand::Int(v)) => (*v, other.clone()),
                        _ => return typed,
                    };
                    if other.is_literal() {
                        return typed;
                    }
                    let dest = ops[2].clone();
                    match lit {
                        // x * 2 costs an add.
                        2 => TypedInstr {
                            instr: Instruction::new(
                                Opcode::Add,
                                vec![other.clone(), other, dest],
                                typed.instr.span,
                            ),
                            ty: typed.ty,
                        },
                        // x * 1 is a move.
                        1 => mov_of(&typed, dest, other),
                        _ => typed,
                    }
                }
                Opcode::Add | Opcode::Sub => {
                    // x + 0 and x - 0 are moves. Addition may carry
                    // the zero on either side.
                    let (zero_side, other) = match (&ops[0], &ops[1]) {
                        (Operand::Int(0), other) if typed.instr.opcode == Opcode::Add => {
                            (true, other.clone())
                        }
                        (other, Operand::Int(0)) => (true, other.clone()),
                        _ => (false, ops[0].clone()),
                    };
                    if !zero_side || other.is_literal() {
                        return typed;
                    }
                    let dest = ops[2].clone();
                    mov_of(&typed, dest, other)
                }
                _ => typed,
            }
        })
        .collect()
}

// --------------------------------------------------------------------
// Dead-code elimination
// --------------------------------------------------------------------

/// Remove instructions that provably never execute (straight-line
/// code after `RET`, `HALT` or `JMP`, until the next label or the end
/// of the enclosing block) and `MOV` stores to function locals that
/// are never read afterwards.
fn eliminate_dead_code(instrs: Vec<TypedInstr>, region: &Region<'_>) -> Vec<TypedInstr> {
    let reachable = strip_unreachable(instrs);
    strip_dead_stores(reachable, region)
}

fn strip_unreachable(instrs: Vec<TypedInstr>) -> Vec<TypedInstr> {
    let mut out = Vec::with_capacity(instrs.len());
    // Relative nesting depth while skipping a dead tail; None when
    // code is live.
    let mut dead_depth: Option<i32> = None;

    for typed in instrs {
        let opcode = typed.instr.opcode;
        if let Some(depth) = dead_depth.as_mut() {
            match opcode {
                op if op.opens_block() => {
                    *depth += 1;
                    continue;
                }
                Opcode::BlockEnd => {
                    if *depth == 0 {
                        // Closes the block the dead tail lives in; the
                        // end marker itself must survive.
                        dead_depth = None;
                        out.push(typed);
                    } else {
                        *depth -= 1;
                    }
                    continue;
                }
                Opcode::Label => {
                    if *depth == 0 {
                        // A jump may land here; code is live again.
                        dead_depth = None;
                        out.push(typed);
                    }
                    continue;
                }
                _ => continue,
            }
        }
        let terminates = matches!(opcode, Opcode::Ret | Opcode::Halt | Opcode::Jmp);
        out.push(typed);
        if terminates {
            dead_depth = Some(0);
        }
    }
    out
}

fn strip_dead_stores(instrs: Vec<TypedInstr>, region: &Region<'_>) -> Vec<TypedInstr> {
    if region.locals.is_none() {
        // Top-level variables are globals; functions called later may
        // read them, so their stores always survive.
        return instrs;
    }
    // Labels permit backward jumps that a linear liveness scan cannot
    // see; leave such regions alone.
    if instrs.iter().any(|t| t.instr.opcode == Opcode::Label) {
        return instrs;
    }
    let mut keep = vec![true; instrs.len()];
    // Loop nesting: a store inside a loop body may feed reads earlier
    // in the body on the next iteration.
    let mut block_is_loop: Vec<bool> = Vec::new();
    let mut loop_depth = 0usize;
    for (i, typed) in instrs.iter().enumerate() {
        let opcode = typed.instr.opcode;
        if opcode.opens_block() {
            let is_loop = matches!(opcode, Opcode::While | Opcode::For);
            block_is_loop.push(is_loop);
            if is_loop {
                loop_depth += 1;
            }
            continue;
        }
        if opcode == Opcode::BlockEnd {
            if block_is_loop.pop() == Some(true) {
                loop_depth -= 1;
            }
            continue;
        }
        if opcode != Opcode::Mov || loop_depth > 0 {
            continue;
        }
        // Only plain stores `MOV name value`; declarations keep their
        // initializing store, and writes through pointers always
        // survive.
        let Some(Operand::Ident(dest)) = typed.instr.operands.first() else {
            continue;
        };
        if !region.is_local(dest) || region.aliased.contains(dest.as_str()) {
            continue;
        }
        let read_later = instrs[i + 1..]
            .iter()
            .any(|later| reads_name(&later.instr, dest));
        if !read_later {
            keep[i] = false;
        }
    }
    instrs
        .into_iter()
        .zip(keep)
        .filter_map(|(t, k)| k.then_some(t))
        .collect()
}

/// Whether `instr` reads the value of `name`.
fn reads_name(instr: &Instruction, name: &str) -> bool {
    let reads_operand = |op: &Operand| match op {
        Operand::Ident(n) | Operand::Deref(n) => n == name,
        Operand::Cond(cond) => {
            let mut found = false;
            cond.for_each_operand(&mut |inner| {
                if let Operand::Ident(n) | Operand::Deref(n) = inner {
                    if n == name {
                        found = true;
                    }
                }
            });
            found
        }
        _ => false,
    };
    match instr.opcode {
        Opcode::Mov => {
            // `MOV x v` writes x but reads v; a declaration reads
            // only its initializer.
            if matches!(instr.operands.first(), Some(Operand::TypeName(_))) {
                instr.operands.get(2).is_some_and(reads_operand)
            } else {
                reads_operand(&instr.operands[1])
                    || matches!(instr.operands.first(), Some(Operand::Deref(n)) if n == name)
            }
        }
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Cmp => {
            instr.operands.iter().take(2).any(|o| reads_operand(o))
        }
        Opcode::Inc | Opcode::Dec => instr.operands.iter().any(|o| reads_operand(o)),
        Opcode::Call => {
            let last = instr.operands.len().saturating_sub(1);
            instr.operands[1..last].iter().any(|o| reads_operand(o))
        }
        _ => instr.operands.iter().any(|o| reads_operand(o)),
    }
}

fn recount_cmp(instrs: &[TypedInstr], function: Option<&str>) -> bool {
    let mut current: Option<String> = None;
    for typed in instrs {
        match typed.instr.opcode {
            Opcode::Fn => {
                current = typed
                    .instr
                    .operands
                    .first()
                    .and_then(|o| o.as_ident())
                    .map(String::from);
            }
            Opcode::End => current = None,
            Opcode::Cmp | Opcode::Jz | Opcode::Jnz => {
                if current.as_deref() == function {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules;
    use crate::semantics::analyze;
    use std::path::Path;

    fn optimized(source: &str) -> Analysis {
        let resolved = modules::resolve_source(source, Path::new("test.z"));
        assert!(resolved.diagnostics.is_empty(), "{:?}", resolved.diagnostics);
        let result = analyze(resolved.program);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        optimize(result.analysis)
    }

    fn ops_of(analysis: &Analysis) -> Vec<Opcode> {
        analysis.instrs.iter().map(|t| t.instr.opcode).collect()
    }

    #[test]
    fn folds_constant_arithmetic_into_a_move() {
        let analysis = optimized("ADD 10 20 x\nPRINT x\n");
        let mov = &analysis.instrs[0];
        assert_eq!(mov.instr.opcode, Opcode::Mov);
        assert_eq!(
            mov.instr.operands,
            vec![Operand::Ident("x".into()), Operand::Int(30)]
        );
        // The value then propagates into the print.
        let print = &analysis.instrs[1];
        assert_eq!(print.instr.operands, vec![Operand::Int(30)]);
    }

    #[test]
    fn propagates_constants_through_straight_line_code() {
        let analysis = optimized("MOV int x 5\nADD x 1 y\n");
        let add = analysis
            .instrs
            .iter()
            .find(|t| t.instr.opcode == Opcode::Mov && t.instr.operands.first() == Some(&Operand::Ident("y".into())))
            .expect("folded add");
        assert_eq!(add.instr.operands[1], Operand::Int(6));
    }

    #[test]
    fn does_not_propagate_across_a_while_condition() {
        let analysis = optimized("MOV int x 0\nWHILE x < 3:\n    INC x\nPRINT x\n");
        let cond = analysis
            .instrs
            .iter()
            .find(|t| t.instr.opcode == Opcode::While)
            .unwrap();
        match &cond.instr.operands[0] {
            Operand::Cond(Cond::Cmp { lhs, .. }) => {
                assert_eq!(lhs.as_ref(), &Operand::Ident("x".into()), "loop condition must re-read x");
            }
            other => panic!("unexpected condition: {other:?}"),
        }
        // The print after the loop must also re-read x.
        let print = analysis
            .instrs
            .iter()
            .find(|t| t.instr.opcode == Opcode::Print)
            .unwrap();
        assert_eq!(print.instr.operands[0], Operand::Ident("x".into()));
    }

    #[test]
    fn propagated_constants_respect_reassignment() {
        let analysis = optimized("MOV int x 5\nMOV x 7\nPRINT x\n");
        let print = analysis
            .instrs
            .iter()
            .find(|t| t.instr.opcode == Opcode::Print)
            .unwrap();
        assert_eq!(print.instr.operands[0], Operand::Int(7));
    }

    #[test]
    fn removes_unreachable_code_after_ret() {
        let analysis = optimized(
            "FN f() -> int:\n    RET 1;\n    PRINT 999;\nEND\nCALL f() -> x\nPRINT x\n",
        );
        assert!(
            !analysis
                .instrs
                .iter()
                .any(|t| t.instr.operands.contains(&Operand::Int(999))),
            "code after RET must be removed"
        );
    }

    #[test]
    fn keeps_code_after_a_label_target() {
        let analysis = optimized("JMP skip\nPRINT 1\nskip:\nPRINT 2\n");
        let prints: Vec<_> = analysis
            .instrs
            .iter()
            .filter(|t| t.instr.opcode == Opcode::Print)
            .collect();
        assert_eq!(prints.len(), 1);
        assert_eq!(prints[0].instr.operands[0], Operand::Int(2));
    }

    #[test]
    fn removes_dead_local_stores_but_keeps_globals() {
        let analysis = optimized(
            "FN f() -> int:\n    MOV int unused 1;\n    MOV unused 2;\n    RET 3;\nEND\nCALL f() -> x\nPRINT x\n",
        );
        let dead_movs = analysis
            .instrs
            .iter()
            .filter(|t| {
                t.instr.opcode == Opcode::Mov
                    && t.instr.operands.first() == Some(&Operand::Ident("unused".into()))
            })
            .count();
        assert_eq!(dead_movs, 0, "stores to a never-read local must go");

        // Globals may be read by any later call; stores stay.
        let analysis = optimized("MOV int g 1\nFN f():\n    PRINT g;\nEND\nMOV g 2\nCALL f()\n");
        let global_movs = analysis
            .instrs
            .iter()
            .filter(|t| t.instr.opcode == Opcode::Mov)
            .count();
        assert_eq!(global_movs, 2);
    }

    #[test]
    fn reduces_int_multiplication_by_two_to_addition() {
        let analysis = optimized("MOV int n 0\nREAD int \"n? \" n\nMUL n 2 d\nPRINT d\n");
        assert!(
            analysis
                .instrs
                .iter()
                .any(|t| t.instr.opcode == Opcode::Add
                    && t.instr.operands[0] == Operand::Ident("n".into())
                    && t.instr.operands[1] == Operand::Ident("n".into())),
            "n * 2 should become n + n: {:?}",
            ops_of(&analysis)
        );
    }

    #[test]
    fn leaves_double_multiplication_alone() {
        let analysis = optimized("MOV double n 0\nREAD double \"n? \" n\nMUL n 2 d\n");
        assert!(
            analysis
                .instrs
                .iter()
                .any(|t| t.instr.opcode == Opcode::Mul),
            "double multiply must not be rewritten"
        );
    }

    #[test]
    fn never_removes_io_or_unproven_guards() {
        let analysis = optimized("MOV int d 0\nREAD int \"d? \" d\nMOV int n 10\nDIV n d q\nPRINT q\n");
        assert!(
            analysis.instrs.iter().any(|t| t.instr.opcode == Opcode::Div),
            "division with an unproven divisor must survive"
        );
        let analysis = optimized("PRINT 1\nPRINT 1\n");
        let prints = analysis
            .instrs
            .iter()
            .filter(|t| t.instr.opcode == Opcode::Print)
            .count();
        assert_eq!(prints, 2, "duplicate prints are observable behavior");
    }

    #[test]
    fn optimization_is_idempotent() {
        let source = "MOV int x 5\nADD x 1 y\nFOR i 1..3:\n    PRINT i\nFN f(int n) -> int:\n    MUL n 2 m;\n    RET m;\nEND\nCALL f(21) -> r\nPRINT r\n";
        let once = optimized(source);
        let twice = optimize(optimized(source));
        assert_eq!(once.instrs, twice.instrs);
    }

    #[test]
    fn division_by_constant_folds_like_c() {
        // Int division truncates, exactly as the generated C would.
        let analysis = optimized("DIV 7 2 x\nPRINT x\n");
        let mov = &analysis.instrs[0];
        assert_eq!(
            mov.instr.operands,
            vec![Operand::Ident("x".into()), Operand::Int(3)]
        );
    }
}
