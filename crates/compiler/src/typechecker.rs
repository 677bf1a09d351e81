//! Static type checking
//!
//! Walks every top-level declaration with a scope of variable types, a
//! loop-depth counter, and the enclosing procedure's return type. Every
//! expression node is annotated with its inferred type; mismatches are
//! reported but checking continues so one run surfaces as many problems
//! as possible.

use crate::ast::{Block, Decl, ExprKind, Expression, ProcDecl, Program, Statement, Type};
use crate::pretyper::ProcTable;
use crate::reporter::Reporter;
use crate::scope::Scope;

pub struct TypeChecker<'a> {
    reporter: &'a mut Reporter,
    procs: &'a ProcTable,
    scope: Scope<Type>,
    loop_depth: u32,
    /// Return type of the procedure being checked; `Void` for subroutines
    current_ret: Type,
}

impl<'a> TypeChecker<'a> {
    /// Check the whole program. `globals` is the root scope produced by
    /// the pre-typing pass.
    pub fn check_program(
        program: &mut Program,
        globals: Scope<Type>,
        procs: &'a ProcTable,
        reporter: &'a mut Reporter,
    ) {
        let mut checker = TypeChecker {
            reporter,
            procs,
            scope: globals,
            loop_depth: 0,
            current_ret: Type::Void,
        };

        for decl in &mut program.decls {
            match decl {
                Decl::GlobVar(glob) => {
                    let expected = glob.ty;
                    checker.for_expression(&mut glob.init, Some(expected));
                }
                Decl::Proc(proc) => checker.check_proc(proc),
            }
        }
    }

    fn in_subscope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.scope.open();
        let result = f(self);
        self.scope.close();
        result
    }

    fn check_proc(&mut self, proc: &mut ProcDecl) {
        let saved_ret = std::mem::replace(
            &mut self.current_ret,
            proc.ret.unwrap_or(Type::Void),
        );
        let saved_loop = std::mem::replace(&mut self.loop_depth, 0);

        self.in_subscope(|checker| {
            for group in &proc.params {
                for name in &group.names {
                    if checker.scope.is_local(&name.value) {
                        checker.reporter.report(
                            format!("duplicate parameter '{}'", name.value),
                            name.range,
                        );
                    }
                    checker.scope.push(name.value.clone(), group.ty);
                }
            }
            for statement in &mut proc.body.statements {
                checker.check_statement(statement);
            }
        });

        self.current_ret = saved_ret;
        self.loop_depth = saved_loop;

        if proc.ret.is_some() && !block_always_returns(&proc.body) {
            self.reporter.report(
                format!("procedure '{}' does not return on every path", proc.name.value),
                proc.name.range,
            );
        }
    }

    fn check_block(&mut self, block: &mut Block) {
        self.in_subscope(|checker| {
            for statement in &mut block.statements {
                checker.check_statement(statement);
            }
        });
    }

    fn check_statement(&mut self, statement: &mut Statement) {
        match statement {
            Statement::VarDecl { name, init, ty } => {
                if self.scope.is_local(&name.value) {
                    self.reporter.report(
                        format!("'{}' is declared twice in the same scope", name.value),
                        name.range,
                    );
                }
                self.for_expression(init, Some(*ty));
                self.scope.push(name.value.clone(), *ty);
            }
            Statement::Assign { lhs, rhs } => {
                let expected = self.scope.lookup(&lhs.value).copied();
                if expected.is_none() {
                    self.reporter.report(
                        format!("variable '{}' assigned before declaration", lhs.value),
                        lhs.range,
                    );
                }
                self.for_expression(rhs, expected);
            }
            Statement::Expr(expr) => {
                self.for_expression(expr, None);
            }
            Statement::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.for_expression(cond, Some(Type::Bool));
                self.check_block(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_block(else_branch);
                }
            }
            Statement::While { cond, body } => {
                self.for_expression(cond, Some(Type::Bool));
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            Statement::Break { range } => {
                if self.loop_depth == 0 {
                    self.reporter
                        .report("'break' outside of a loop", *range);
                }
            }
            Statement::Continue { range } => {
                if self.loop_depth == 0 {
                    self.reporter
                        .report("'continue' outside of a loop", *range);
                }
            }
            Statement::Block(block) => self.check_block(block),
            Statement::Return { value, range } => match (value, self.current_ret) {
                (None, Type::Void) => {}
                (None, ret) => {
                    self.reporter.report(
                        format!("return without a value in a procedure returning {}", ret),
                        *range,
                    );
                }
                (Some(expr), Type::Void) => {
                    self.reporter
                        .report("return with a value in a subroutine", *range);
                    self.for_expression(expr, None);
                }
                (Some(expr), ret) => {
                    self.for_expression(expr, Some(ret));
                }
            },
            Statement::Proc(nested) => self.check_proc(nested),
        }
    }

    /// Infer and store the type of `expr`, then compare it against
    /// `expected` when one is given. A mismatch is reported but the
    /// computed type is kept for downstream robustness.
    fn for_expression(&mut self, expr: &mut Expression, expected: Option<Type>) {
        let computed = match &mut expr.kind {
            ExprKind::Var(name) => match self.scope.lookup(&name.value) {
                Some(ty) => Some(*ty),
                None => {
                    self.reporter.report(
                        format!("variable '{}' used before declaration", name.value),
                        name.range,
                    );
                    None
                }
            },
            ExprKind::Int(value) => {
                // The grammar only admits non-negative literal tokens, so a
                // negative value here is a lexer wrap-around of >= 2^63.
                if *value < 0 {
                    self.reporter
                        .report("integer literal out of range", expr.range);
                }
                Some(Type::Int)
            }
            ExprKind::Bool(_) => Some(Type::Bool),
            ExprKind::OpApp { op, args } => {
                let (arg_types, ret) = op.signature();
                assert_eq!(
                    args.len(),
                    arg_types.len(),
                    "operator '{}' applied to {} arguments",
                    op.symbol(),
                    args.len()
                );
                for (arg, &ty) in args.iter_mut().zip(arg_types) {
                    self.for_expression(arg, Some(ty));
                }
                Some(ret)
            }
            ExprKind::Call { proc, args } => match self.procs.get(&proc.value) {
                None => {
                    self.reporter.report(
                        format!("call to unknown procedure '{}'", proc.value),
                        proc.range,
                    );
                    for arg in args.iter_mut() {
                        self.for_expression(arg, None);
                    }
                    None
                }
                Some(sig) => {
                    if args.len() != sig.params.len() {
                        self.reporter.report(
                            format!(
                                "procedure '{}' expects {} argument(s), got {}",
                                proc.value,
                                sig.params.len(),
                                args.len()
                            ),
                            proc.range,
                        );
                        for arg in args.iter_mut() {
                            self.for_expression(arg, None);
                        }
                    } else {
                        let params = sig.params.clone();
                        for (arg, ty) in args.iter_mut().zip(params) {
                            self.for_expression(arg, Some(ty));
                        }
                    }
                    Some(sig.ret)
                }
            },
            ExprKind::Print(arg) => {
                self.for_expression(arg, None);
                if arg.ty == Some(Type::Void) {
                    self.reporter
                        .report("print expects an int or bool argument", arg.range);
                }
                Some(Type::Void)
            }
        };

        expr.ty = computed;
        if let (Some(expected), Some(computed)) = (expected, computed)
            && expected != computed
        {
            self.reporter.report(
                format!("type mismatch: expected {}, found {}", expected, computed),
                expr.range,
            );
        }
    }
}

/// Conservative "always returns" analysis: a return does; an if does when
/// both branches do; a block does when any statement in it does; nothing
/// else does. Loops never count, even `while (true)`.
fn always_returns(statement: &Statement) -> bool {
    match statement {
        Statement::Return { .. } => true,
        Statement::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => block_always_returns(then_branch) && block_always_returns(else_branch),
        Statement::Block(block) => block_always_returns(block),
        _ => false,
    }
}

fn block_always_returns(block: &Block) -> bool {
    block.statements.iter().any(always_returns)
}
