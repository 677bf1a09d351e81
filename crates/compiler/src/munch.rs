//! Maximal-munch lowering from the typed AST to TAC
//!
//! Boolean results live in control flow: boolean mode lowers an expression
//! against a pair of target labels and emits jumps instead of computing a
//! value. A 0/1 word is materialized only where a boolean is consumed as a
//! value. A single counter supplies both temporaries (`%<n>`) and labels
//! (`.L<n>`) across the whole compilation unit.
//!
//! Lowering runs strictly after a clean type check; a malformed or
//! unannotated tree here is a compiler bug and panics.

use crate::ast::{Block, Decl, ExprKind, Expression, Name, Operator, ProcDecl, Program, Statement, Type};
use crate::pretyper::ProcTable;
use crate::scope::Scope;
use crate::tac::{Arg, BodyItem, Instr, Opcode, TacDecl, TacProc, TacVar};

/// Continue/exit targets for the innermost loop
struct LoopLabels {
    continue_label: String,
    break_label: String,
}

/// What a name lowers to, and which procedure's frame owns it
#[derive(Clone)]
struct Binding {
    operand: String,
    depth: u32,
}

pub struct Muncher<'a> {
    procs: &'a ProcTable,
    counter: usize,
    loops: Vec<LoopLabels>,
    scope: Scope<Binding>,
    /// Depth of the procedure currently being lowered
    cur_depth: u32,
}

/// Lower a checked program to TAC
pub fn lower_program(program: &Program, procs: &ProcTable) -> Vec<TacDecl> {
    let mut muncher = Muncher {
        procs,
        counter: 0,
        loops: Vec::new(),
        scope: Scope::new(),
        cur_depth: 0,
    };

    let mut out = Vec::new();
    for decl in &program.decls {
        match decl {
            Decl::GlobVar(glob) => {
                let &ExprKind::Int(init) = &glob.init.kind else {
                    unreachable!("global initializer is not an integer literal");
                };
                let operand = format!("@{}", glob.name.value);
                muncher.scope.push(
                    glob.name.value.clone(),
                    Binding {
                        operand: operand.clone(),
                        depth: 0,
                    },
                );
                out.push(TacDecl::Var(TacVar {
                    name: operand,
                    init,
                }));
            }
            Decl::Proc(proc) => out.extend(muncher.lower_proc(proc)),
        }
    }
    out
}

impl<'a> Muncher<'a> {
    fn fresh_temp(&mut self) -> String {
        let n = self.counter;
        self.counter += 1;
        format!("%{}", n)
    }

    fn fresh_label(&mut self) -> String {
        let n = self.counter;
        self.counter += 1;
        format!(".L{}", n)
    }

    fn in_subscope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.scope.open();
        let result = f(self);
        self.scope.close();
        result
    }

    fn with_loop<R>(&mut self, labels: LoopLabels, f: impl FnOnce(&mut Self) -> R) -> R {
        self.loops.push(labels);
        let result = f(self);
        self.loops.pop();
        result
    }

    /// The operand a name lowers to at the current point of use; a
    /// variable owned by an enclosing procedure gets a `:<hops>` suffix
    fn resolve(&self, name: &Name) -> String {
        let binding = self
            .scope
            .lookup(&name.value)
            .unwrap_or_else(|| unreachable!("unresolved name '{}' after checking", name.value));
        if binding.operand.starts_with('@') || binding.depth == self.cur_depth {
            binding.operand.clone()
        } else {
            format!("{}:{}", binding.operand, self.cur_depth - binding.depth)
        }
    }

    /// Lower one procedure. The enclosing scope is live here, so the body
    /// can capture outer bindings. Returns the procedure followed by its
    /// nested procedures, so an owner frame always precedes its captives.
    fn lower_proc(&mut self, proc: &ProcDecl) -> Vec<TacDecl> {
        let saved_depth = std::mem::replace(&mut self.cur_depth, proc.depth);
        let saved_loops = std::mem::take(&mut self.loops);

        let (args, body, nested) = self.in_subscope(|muncher| {
            let mut args = Vec::new();
            for name in proc.param_names() {
                let operand = format!("%{}", name.value);
                muncher.scope.push(
                    name.value.clone(),
                    Binding {
                        operand: operand.clone(),
                        depth: proc.depth,
                    },
                );
                args.push(operand);
            }

            let mut body = Vec::new();
            let mut nested = Vec::new();
            for statement in &proc.body.statements {
                muncher.lower_statement(statement, &mut body, &mut nested);
            }
            (args, body, nested)
        });

        self.cur_depth = saved_depth;
        self.loops = saved_loops;

        let mut body = body;
        if proc.name.value == "main" {
            body.push(BodyItem::Instr(Instr::new(
                Opcode::Ret,
                vec![Arg::Imm(0)],
                None,
            )));
        }

        let mut out = vec![TacDecl::Proc(TacProc {
            name: format!("@{}", proc.name.value),
            depth: proc.depth,
            args,
            body,
        })];
        out.extend(nested);
        out
    }

    fn lower_block(
        &mut self,
        block: &Block,
        body: &mut Vec<BodyItem>,
        nested: &mut Vec<TacDecl>,
    ) {
        self.in_subscope(|muncher| {
            for statement in &block.statements {
                muncher.lower_statement(statement, body, nested);
            }
        });
    }

    fn lower_statement(
        &mut self,
        statement: &Statement,
        body: &mut Vec<BodyItem>,
        nested: &mut Vec<TacDecl>,
    ) {
        match statement {
            Statement::VarDecl { name, init, .. } => {
                let value = self.value(init, body);
                let temp = self.fresh_temp();
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Copy,
                    vec![Arg::Name(value)],
                    Some(temp.clone()),
                )));
                self.scope.push(
                    name.value.clone(),
                    Binding {
                        operand: temp,
                        depth: self.cur_depth,
                    },
                );
            }
            Statement::Assign { lhs, rhs } => {
                let value = self.value(rhs, body);
                let dest = self.resolve(lhs);
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Copy,
                    vec![Arg::Name(value)],
                    Some(dest),
                )));
            }
            Statement::Expr(expr) => {
                self.value_or_void(expr, body);
            }
            Statement::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let true_label = self.fresh_label();
                let false_label = self.fresh_label();
                let out_label = self.fresh_label();

                self.boolean(cond, &true_label, &false_label, body);
                body.push(BodyItem::Label(true_label));
                self.lower_block(then_branch, body, nested);
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::Name(out_label.clone())],
                    None,
                )));
                body.push(BodyItem::Label(false_label));
                if let Some(else_branch) = else_branch {
                    self.lower_block(else_branch, body, nested);
                }
                body.push(BodyItem::Label(out_label));
            }
            Statement::While { cond, body: loop_body } => {
                let cond_label = self.fresh_label();
                let body_label = self.fresh_label();
                let out_label = self.fresh_label();

                body.push(BodyItem::Label(cond_label.clone()));
                self.boolean(cond, &body_label, &out_label, body);
                body.push(BodyItem::Label(body_label));

                let labels = LoopLabels {
                    continue_label: cond_label.clone(),
                    break_label: out_label.clone(),
                };
                self.with_loop(labels, |muncher| {
                    muncher.lower_block(loop_body, body, nested);
                });

                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::Name(cond_label)],
                    None,
                )));
                body.push(BodyItem::Label(out_label));
            }
            Statement::Break { .. } => {
                let target = self
                    .loops
                    .last()
                    .unwrap_or_else(|| unreachable!("'break' outside a loop after checking"))
                    .break_label
                    .clone();
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::Name(target)],
                    None,
                )));
            }
            Statement::Continue { .. } => {
                let target = self
                    .loops
                    .last()
                    .unwrap_or_else(|| unreachable!("'continue' outside a loop after checking"))
                    .continue_label
                    .clone();
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::Name(target)],
                    None,
                )));
            }
            Statement::Block(block) => self.lower_block(block, body, nested),
            Statement::Return { value, .. } => {
                let args = match value {
                    Some(expr) => vec![Arg::Name(self.value(expr, body))],
                    None => vec![],
                };
                body.push(BodyItem::Instr(Instr::new(Opcode::Ret, args, None)));
            }
            Statement::Proc(proc) => nested.extend(self.lower_proc(proc)),
        }
    }

    /// Value mode for expressions the checker typed as int or bool
    fn value(&mut self, expr: &Expression, body: &mut Vec<BodyItem>) -> String {
        self.value_mode(expr, body, false)
            .unwrap_or_else(|| unreachable!("void expression used as a value"))
    }

    /// Value mode tolerating void results (expression statements)
    fn value_or_void(&mut self, expr: &Expression, body: &mut Vec<BodyItem>) -> Option<String> {
        self.value_mode(expr, body, false)
    }

    /// Lower `expr` to an operand holding its value. `force` bypasses the
    /// 0/1 materialization for calls, so boolean mode can reuse the plain
    /// call lowering without regress.
    fn value_mode(
        &mut self,
        expr: &Expression,
        body: &mut Vec<BodyItem>,
        force: bool,
    ) -> Option<String> {
        // A boolean produced by control flow is materialized here: t is 0
        // unless the expression's true exit is taken.
        let needs_materialization = match &expr.kind {
            ExprKind::OpApp { op, .. } => op.signature().1 == Type::Bool,
            ExprKind::Call { .. } => expr.ty == Some(Type::Bool) && !force,
            _ => false,
        };
        if needs_materialization {
            let true_label = self.fresh_label();
            let false_label = self.fresh_label();
            let temp = self.fresh_temp();
            body.push(BodyItem::Instr(Instr::new(
                Opcode::Const,
                vec![Arg::Imm(0)],
                Some(temp.clone()),
            )));
            self.boolean(expr, &true_label, &false_label, body);
            body.push(BodyItem::Label(true_label));
            body.push(BodyItem::Instr(Instr::new(
                Opcode::Const,
                vec![Arg::Imm(1)],
                Some(temp.clone()),
            )));
            body.push(BodyItem::Label(false_label));
            return Some(temp);
        }

        match &expr.kind {
            ExprKind::Var(name) => Some(self.resolve(name)),
            ExprKind::Int(value) => {
                let temp = self.fresh_temp();
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Const,
                    vec![Arg::Imm(*value)],
                    Some(temp.clone()),
                )));
                Some(temp)
            }
            ExprKind::Bool(value) => {
                let temp = self.fresh_temp();
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Const,
                    vec![Arg::Imm(i64::from(*value))],
                    Some(temp.clone()),
                )));
                Some(temp)
            }
            ExprKind::OpApp { op, args } => {
                let opcode = match op {
                    Operator::Opposite => Opcode::Neg,
                    Operator::BitNot => Opcode::Not,
                    Operator::Add => Opcode::Add,
                    Operator::Sub => Opcode::Sub,
                    Operator::Mul => Opcode::Mul,
                    Operator::Div => Opcode::Div,
                    Operator::Mod => Opcode::Mod,
                    Operator::Shl => Opcode::Shl,
                    Operator::Shr => Opcode::Shr,
                    Operator::BitAnd => Opcode::And,
                    Operator::BitOr => Opcode::Or,
                    Operator::BitXor => Opcode::Xor,
                    _ => unreachable!("boolean operator '{}' in value position", op.symbol()),
                };
                let operands: Vec<Arg> = args
                    .iter()
                    .map(|arg| Arg::Name(self.value(arg, body)))
                    .collect();
                let temp = self.fresh_temp();
                body.push(BodyItem::Instr(Instr::new(
                    opcode,
                    operands,
                    Some(temp.clone()),
                )));
                Some(temp)
            }
            ExprKind::Call { proc, args } => self.lower_call(proc, args, body),
            ExprKind::Print(arg) => {
                let arg_ty = arg.ty;
                let value = self.value(arg, body);
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Param,
                    vec![Arg::Imm(1), Arg::Name(value)],
                    None,
                )));
                let runtime = match arg_ty {
                    Some(Type::Bool) => "print_bool",
                    _ => "print_int",
                };
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Call,
                    vec![Arg::name(runtime), Arg::Imm(1)],
                    None,
                )));
                None
            }
        }
    }

    fn lower_call(
        &mut self,
        proc: &Name,
        args: &[Expression],
        body: &mut Vec<BodyItem>,
    ) -> Option<String> {
        let operands: Vec<String> = args.iter().map(|arg| self.value(arg, body)).collect();
        for (i, operand) in operands.iter().enumerate() {
            body.push(BodyItem::Instr(Instr::new(
                Opcode::Param,
                vec![Arg::Imm(i as i64 + 1), Arg::name(operand.clone())],
                None,
            )));
        }

        let sig = self
            .procs
            .get(&proc.value)
            .unwrap_or_else(|| unreachable!("call to unknown procedure after checking"));
        // Top-level callees get no static link; a nested callee receives
        // the frame `hops` levels up the caller's chain (0 = the caller's
        // own frame).
        let link_depth = if sig.depth == 0 {
            None
        } else {
            Some((self.cur_depth + 1).saturating_sub(sig.depth))
        };

        let result = (sig.ret != Type::Void).then(|| self.fresh_temp());
        body.push(BodyItem::Instr(Instr {
            opcode: Opcode::Call,
            args: vec![Arg::name(proc.value.clone()), Arg::Imm(args.len() as i64)],
            result: result.clone(),
            link_depth,
        }));
        result
    }

    /// Boolean mode: lower `expr` as a jump to `true_label` or
    /// `false_label`; no value is produced
    fn boolean(
        &mut self,
        expr: &Expression,
        true_label: &str,
        false_label: &str,
        body: &mut Vec<BodyItem>,
    ) {
        match &expr.kind {
            ExprKind::Var(name) => {
                let operand = self.resolve(name);
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jz,
                    vec![Arg::Name(operand), Arg::name(false_label)],
                    None,
                )));
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::name(true_label)],
                    None,
                )));
            }
            ExprKind::Bool(true) => {
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::name(true_label)],
                    None,
                )));
            }
            ExprKind::Bool(false) => {
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::name(false_label)],
                    None,
                )));
            }
            ExprKind::OpApp { op, args } if op.is_comparison() => {
                let lhs = self.value(&args[0], body);
                let rhs = self.value(&args[1], body);
                // t = rhs - lhs, so each comparison becomes a sign test
                let temp = self.fresh_temp();
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Sub,
                    vec![Arg::Name(rhs), Arg::Name(lhs)],
                    Some(temp.clone()),
                )));
                let jump = match op {
                    Operator::CmpEq => Opcode::Jz,
                    Operator::CmpNe => Opcode::Jnz,
                    Operator::CmpLt => Opcode::Jgt,
                    Operator::CmpLe => Opcode::Jge,
                    Operator::CmpGt => Opcode::Jlt,
                    Operator::CmpGe => Opcode::Jle,
                    _ => unreachable!(),
                };
                body.push(BodyItem::Instr(Instr::new(
                    jump,
                    vec![Arg::Name(temp), Arg::name(true_label)],
                    None,
                )));
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::name(false_label)],
                    None,
                )));
            }
            ExprKind::OpApp { op: Operator::BoolAnd, args } => {
                let mid_label = self.fresh_label();
                self.boolean(&args[0], &mid_label, false_label, body);
                body.push(BodyItem::Label(mid_label));
                self.boolean(&args[1], true_label, false_label, body);
            }
            ExprKind::OpApp { op: Operator::BoolOr, args } => {
                let mid_label = self.fresh_label();
                self.boolean(&args[0], true_label, &mid_label, body);
                body.push(BodyItem::Label(mid_label));
                self.boolean(&args[1], true_label, false_label, body);
            }
            ExprKind::OpApp { op: Operator::BoolNot, args } => {
                self.boolean(&args[0], false_label, true_label, body);
            }
            ExprKind::Call { .. } => {
                let temp = self
                    .value_mode(expr, body, true)
                    .unwrap_or_else(|| unreachable!("boolean call lowered to no value"));
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jz,
                    vec![Arg::Name(temp), Arg::name(false_label)],
                    None,
                )));
                body.push(BodyItem::Instr(Instr::new(
                    Opcode::Jmp,
                    vec![Arg::name(true_label)],
                    None,
                )));
            }
            _ => unreachable!("non-boolean expression in boolean position"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::pretyper::PreTyper;
    use crate::reporter::Reporter;
    use crate::typechecker::TypeChecker;

    fn lower(source: &str) -> Vec<TacDecl> {
        let mut reporter = Reporter::new();
        let mut program = Parser::new(source, &mut reporter).parse();
        let (globals, procs) = PreTyper::run(&program, &mut reporter);
        TypeChecker::check_program(&mut program, globals, &procs, &mut reporter);
        assert!(
            reporter.is_empty(),
            "diagnostics before lowering: {:?}",
            reporter.diagnostics()
        );
        lower_program(&program, &procs)
    }

    fn proc_body<'a>(decls: &'a [TacDecl], name: &str) -> &'a [BodyItem] {
        decls
            .iter()
            .find_map(|d| match d {
                TacDecl::Proc(p) if p.name == name => Some(p.body.as_slice()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no procedure {}", name))
    }

    fn instrs(body: &[BodyItem]) -> Vec<&Instr> {
        body.iter()
            .filter_map(|item| match item {
                BodyItem::Instr(i) => Some(i),
                BodyItem::Label(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_print_constant() {
        let decls = lower("def main() { print(42); }");
        let body = proc_body(&decls, "@main");
        let ops = instrs(body);
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0].opcode, Opcode::Const);
        assert_eq!(ops[0].args, vec![Arg::Imm(42)]);
        assert_eq!(ops[1].opcode, Opcode::Param);
        assert_eq!(ops[1].args[0], Arg::Imm(1));
        assert_eq!(ops[2].opcode, Opcode::Call);
        assert_eq!(ops[2].args[0], Arg::name("print_int"));
        assert_eq!(ops[2].args[1], Arg::Imm(1));
        assert_eq!(ops[2].link_depth, None);
        // main always ends in ret 0
        assert_eq!(ops[3].opcode, Opcode::Ret);
        assert_eq!(ops[3].args, vec![Arg::Imm(0)]);
    }

    #[test]
    fn test_print_bool_selects_runtime_routine() {
        let decls = lower("def main() { print(true); }");
        let body = proc_body(&decls, "@main");
        let call = instrs(body)
            .into_iter()
            .find(|i| i.opcode == Opcode::Call)
            .expect("call");
        assert_eq!(call.args[0], Arg::name("print_bool"));
    }

    #[test]
    fn test_arithmetic_precedence_shape() {
        let decls = lower("def main() { print(1 + 2 * 3); }");
        let body = proc_body(&decls, "@main");
        let ops = instrs(body);
        // consts 1, 2, 3 then mul before add
        let mul = ops.iter().position(|i| i.opcode == Opcode::Mul).unwrap();
        let add = ops.iter().position(|i| i.opcode == Opcode::Add).unwrap();
        assert!(mul < add);
    }

    #[test]
    fn test_short_circuit_and_defers_division() {
        let decls = lower(
            "def main() { var x = 0 : int;\n\
             if (x != 0 && 10 / x > 0) { print(1); } else { print(0); } }",
        );
        let body = proc_body(&decls, "@main");
        let ops = instrs(body);
        // The first comparison's conditional jump precedes the division
        let jnz = ops.iter().position(|i| i.opcode == Opcode::Jnz).unwrap();
        let div = ops.iter().position(|i| i.opcode == Opcode::Div).unwrap();
        assert!(jnz < div, "division must be guarded by the left operand");
    }

    #[test]
    fn test_comparison_jump_mapping() {
        let decls = lower("def main() { if (1 < 2) { } }");
        let body = proc_body(&decls, "@main");
        let ops = instrs(body);
        let sub = ops.iter().find(|i| i.opcode == Opcode::Sub).expect("sub");
        // t = rhs - lhs
        assert_eq!(sub.args.len(), 2);
        assert!(ops.iter().any(|i| i.opcode == Opcode::Jgt));
    }

    #[test]
    fn test_bool_materialization_writes_zero_then_one() {
        let decls = lower("def main() { var b = 1 < 2 : bool; print(b); }");
        let body = proc_body(&decls, "@main");
        let ops = instrs(body);
        let zero = ops
            .iter()
            .find(|i| i.opcode == Opcode::Const && i.args == vec![Arg::Imm(0)])
            .expect("const 0");
        let one = ops
            .iter()
            .find(|i| i.opcode == Opcode::Const && i.args == vec![Arg::Imm(1)])
            .expect("const 1");
        assert_eq!(zero.result, one.result, "both constants target one temp");
    }

    #[test]
    fn test_while_true_break_terminates() {
        let decls = lower("def main() { while (true) { break; } }");
        let body = proc_body(&decls, "@main");

        let labels: Vec<&str> = body
            .iter()
            .filter_map(|item| match item {
                BodyItem::Label(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        // cond, body and exit labels are all distinct
        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), labels.len());

        // break jumps to the exit label, which is defined after the loop
        let exit = labels[2];
        let jumps: Vec<&Instr> = instrs(body)
            .into_iter()
            .filter(|i| i.opcode == Opcode::Jmp)
            .collect();
        assert!(jumps.iter().any(|i| i.args[0] == Arg::name(exit)));
    }

    #[test]
    fn test_loop_with_continue_and_break() {
        let decls = lower(
            "def main() {\n\
             var i = 1 : int;\n\
             var sum = 0 : int;\n\
             while (i < 10) {\n\
                 if (i == 5) { break; }\n\
                 i = i + 1;\n\
                 if (i % 2 == 0) { continue; }\n\
                 sum = sum + i;\n\
             }\n\
             print(sum);\n\
             }",
        );
        let body = proc_body(&decls, "@main");
        // continue jumps to the condition label (first label emitted)
        let Some(BodyItem::Label(cond_label)) =
            body.iter().find(|i| matches!(i, BodyItem::Label(_)))
        else {
            unreachable!();
        };
        let jumps_to_cond = instrs(body)
            .into_iter()
            .filter(|i| i.opcode == Opcode::Jmp && i.args[0] == Arg::name(cond_label.clone()))
            .count();
        // one from continue, one closing the loop
        assert!(jumps_to_cond >= 2);
    }

    #[test]
    fn test_empty_branches_lower_cleanly() {
        let decls = lower("def main() { if (true) { } else { } }");
        let body = proc_body(&decls, "@main");
        let ops = instrs(body);
        // jmp true-target, jmp out, ret 0; nothing else
        assert!(ops.iter().all(|i| matches!(i.opcode, Opcode::Jmp | Opcode::Ret)));
    }

    #[test]
    fn test_globals_lower_to_var_and_at_operand() {
        let decls = lower(
            "var g = 7 : int;\n\
             def main() { g = g + 1; print(g); }",
        );
        assert!(matches!(&decls[0], TacDecl::Var(v) if v.name == "@g" && v.init == 7));
        let body = proc_body(&decls, "@main");
        let copy = instrs(body)
            .into_iter()
            .find(|i| i.opcode == Opcode::Copy)
            .expect("copy");
        assert_eq!(copy.result.as_deref(), Some("@g"));
    }

    #[test]
    fn test_params_lower_to_named_operands() {
        let decls = lower(
            "def f(x, y : int) : int { return x + y; }\n\
             def main() { print(f(2, 3)); }",
        );
        let TacDecl::Proc(f) = decls
            .iter()
            .find(|d| d.symbol() == "f")
            .expect("f lowered")
        else {
            panic!("expected proc");
        };
        assert_eq!(f.args, vec!["%x", "%y"]);
    }

    #[test]
    fn test_call_param_ordering_and_result() {
        let decls = lower(
            "def f(x, y : int) : int { return x; }\n\
             def main() { print(f(2, 3)); }",
        );
        let body = proc_body(&decls, "@main");
        let ops = instrs(body);
        let params: Vec<&&Instr> = ops.iter().filter(|i| i.opcode == Opcode::Param).collect();
        // two call params then the print param
        assert_eq!(params[0].args[0], Arg::Imm(1));
        assert_eq!(params[1].args[0], Arg::Imm(2));
        let call = ops
            .iter()
            .find(|i| i.opcode == Opcode::Call && i.args[0] == Arg::name("f"))
            .expect("call f");
        assert_eq!(call.args[1], Arg::Imm(2));
        assert!(call.result.is_some());
        assert_eq!(call.link_depth, None);
    }

    #[test]
    fn test_nested_procedure_capture_and_link_depth() {
        let decls = lower(
            "def outer() {\n\
             var captured = 7 : int;\n\
             def inner() { print(captured); }\n\
             inner();\n\
             }\n\
             def main() { outer(); }",
        );

        // owner frame precedes its captive in emission order
        let order: Vec<&str> = decls.iter().map(|d| d.symbol()).collect();
        assert_eq!(order, vec!["outer", "inner", "main"]);

        // inner reaches the captured variable through one hop
        let inner_body = proc_body(&decls, "@inner");
        let uses_capture = instrs(inner_body).into_iter().any(|i| {
            i.args
                .iter()
                .any(|a| matches!(a, Arg::Name(n) if n.ends_with(":1")))
        });
        assert!(uses_capture, "expected a :1 operand in inner");

        // outer calls inner passing its own frame (0 hops)
        let outer_body = proc_body(&decls, "@outer");
        let call_inner = instrs(outer_body)
            .into_iter()
            .find(|i| i.opcode == Opcode::Call && i.args[0] == Arg::name("inner"))
            .expect("call inner");
        assert_eq!(call_inner.link_depth, Some(0));

        // main calls the top-level outer with no static link
        let main_body = proc_body(&decls, "@main");
        let call_outer = instrs(main_body)
            .into_iter()
            .find(|i| i.opcode == Opcode::Call && i.args[0] == Arg::name("outer"))
            .expect("call outer");
        assert_eq!(call_outer.link_depth, None);
    }

    #[test]
    fn test_labels_unique_per_procedure() {
        let decls = lower(
            "def main() {\n\
             var i = 0 : int;\n\
             while (i < 3) {\n\
                 if (i == 1) { print(i); } else { print(0); }\n\
                 i = i + 1;\n\
             }\n\
             }",
        );
        for decl in &decls {
            if let TacDecl::Proc(proc) = decl {
                let mut labels: Vec<&String> = proc
                    .body
                    .iter()
                    .filter_map(|item| match item {
                        BodyItem::Label(l) => Some(l),
                        _ => None,
                    })
                    .collect();
                let total = labels.len();
                labels.sort();
                labels.dedup();
                assert_eq!(labels.len(), total, "duplicate label in {}", proc.name);
            }
        }
    }

    #[test]
    fn test_var_decl_copies_into_fresh_temp() {
        // binding to a fresh temp keeps x and y distinct storage
        let decls = lower(
            "def main() { var x = 1 : int; var y = x : int; y = 2; print(x); }",
        );
        let body = proc_body(&decls, "@main");
        let copies: Vec<&Instr> = instrs(body)
            .into_iter()
            .filter(|i| i.opcode == Opcode::Copy)
            .collect();
        // x's init, y's init from x's operand, and the assignment
        assert_eq!(copies.len(), 3);
        assert_ne!(copies[0].result, copies[1].result);
    }
}
