//! Signature gathering ahead of type checking
//!
//! One pass over the program collects every procedure signature (nested
//! procedures included) and every global variable into a top-level scope,
//! enforcing the single top-level namespace, literal-only global
//! initializers, and the existence and shape of `main`.

use std::collections::HashMap;

use crate::ast::{Block, Decl, ExprKind, GlobVarDecl, ProcDecl, Program, Statement, Type};
use crate::reporter::Reporter;
use crate::scope::Scope;

/// A procedure's callable shape plus its lexical depth
#[derive(Debug, Clone, PartialEq)]
pub struct ProcSig {
    pub params: Vec<Type>,
    /// `Void` for subroutines
    pub ret: Type,
    pub depth: u32,
}

/// All procedure signatures, keyed by name (one flat namespace)
pub type ProcTable = HashMap<String, ProcSig>;

pub struct PreTyper<'r> {
    reporter: &'r mut Reporter,
    globals: Scope<Type>,
    procs: ProcTable,
}

impl<'r> PreTyper<'r> {
    /// Gather signatures and globals, then verify `main`
    pub fn run(program: &Program, reporter: &'r mut Reporter) -> (Scope<Type>, ProcTable) {
        let mut pretyper = PreTyper {
            reporter,
            globals: Scope::new(),
            procs: ProcTable::new(),
        };

        for decl in &program.decls {
            match decl {
                Decl::Proc(proc) => pretyper.register_proc(proc),
                Decl::GlobVar(glob) => pretyper.register_global(glob),
            }
        }
        pretyper.check_main();

        (pretyper.globals, pretyper.procs)
    }

    fn register_proc(&mut self, proc: &ProcDecl) {
        let name = &proc.name.value;
        if self.procs.contains_key(name) || self.globals.is_local(name) {
            self.reporter.report(
                format!("'{}' is already declared at the top level", name),
                proc.name.range,
            );
        } else {
            self.procs.insert(
                name.clone(),
                ProcSig {
                    params: proc.param_types().collect(),
                    ret: proc.ret.unwrap_or(Type::Void),
                    depth: proc.depth,
                },
            );
        }

        self.register_nested(&proc.body);
    }

    /// Nested procedures share the flat signature table
    fn register_nested(&mut self, block: &Block) {
        for statement in &block.statements {
            match statement {
                Statement::Proc(nested) => self.register_proc(nested),
                Statement::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    self.register_nested(then_branch);
                    if let Some(else_branch) = else_branch {
                        self.register_nested(else_branch);
                    }
                }
                Statement::While { body, .. } => self.register_nested(body),
                Statement::Block(inner) => self.register_nested(inner),
                _ => {}
            }
        }
    }

    fn register_global(&mut self, glob: &GlobVarDecl) {
        let name = &glob.name.value;
        if !matches!(glob.init.kind, ExprKind::Int(_)) {
            self.reporter.report(
                format!("global '{}' must be initialized with an integer literal", name),
                glob.init.range,
            );
        }

        if self.globals.is_local(name) || self.procs.contains_key(name) {
            self.reporter.report(
                format!("'{}' is already declared at the top level", name),
                glob.name.range,
            );
            return;
        }
        self.globals.push(name.clone(), glob.ty);
    }

    fn check_main(&mut self) {
        match self.procs.get("main") {
            None => self.reporter.report("no 'main' procedure defined", None),
            Some(sig) => {
                if !sig.params.is_empty() {
                    self.reporter
                        .report("'main' must not take arguments", None);
                }
                if sig.ret != Type::Void {
                    self.reporter
                        .report("'main' must not return a value", None);
                }
            }
        }
    }
}
