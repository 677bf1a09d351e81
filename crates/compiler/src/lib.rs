//! BX Compiler Library
//!
//! Compiles BX source text to a typed AST, a three-address intermediate
//! representation (TAC) with a JSON dump, and native assembly for x86-64
//! Linux or ARM64 Darwin.
//!
//! The pipeline runs forward only, gated by reporter checkpoints: parse,
//! gather declarations, type check, lower to TAC, emit assembly. A stage
//! that leaves diagnostics behind halts the compilation, so the caller
//! sees every problem the earliest failing stage could find.
//!
//! ```rust,ignore
//! use bxc::{CompilerConfig, Reporter, compile_source};
//!
//! let mut reporter = Reporter::new();
//! let artifacts = compile_source("def main() { print(42); }",
//!                                &CompilerConfig::default(),
//!                                &mut reporter)?;
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod lexer;
pub mod munch;
pub mod parser;
pub mod pretyper;
pub mod reporter;
pub mod scope;
pub mod tac;
pub mod typechecker;

pub use ast::Program;
pub use codegen::{EmitError, Target};
pub use config::CompilerConfig;
pub use parser::Parser;
pub use pretyper::PreTyper;
pub use reporter::{Diagnostic, Reporter};
pub use tac::TacDecl;
pub use typechecker::TypeChecker;

/// Everything a successful compilation produces
pub struct Artifacts {
    pub tac: Vec<TacDecl>,
    /// Assembly text, unless the configuration stopped after TAC
    pub asm: Option<String>,
}

/// Compile BX source text.
///
/// Diagnostics accumulate in `reporter`; the returned error names the
/// stage that halted the pipeline. TAC and assembly are only produced
/// when every stage before them came out clean.
pub fn compile_source(
    source: &str,
    config: &CompilerConfig,
    reporter: &mut Reporter,
) -> Result<Artifacts, String> {
    reporter.section("parse");
    let checkpoint = reporter.checkpoint();
    let mut program = Parser::new(source, reporter).parse();
    if !reporter.clean_since(checkpoint) {
        return Err("parsing failed".to_string());
    }
    tracing::debug!(decls = program.decls.len(), "parsed");

    reporter.section("declarations");
    let checkpoint = reporter.checkpoint();
    let (globals, procs) = PreTyper::run(&program, reporter);
    if !reporter.clean_since(checkpoint) {
        return Err("declaration checking failed".to_string());
    }

    reporter.section("type check");
    let checkpoint = reporter.checkpoint();
    TypeChecker::check_program(&mut program, globals, &procs, reporter);
    if !reporter.clean_since(checkpoint) {
        return Err("type checking failed".to_string());
    }
    tracing::debug!("type check complete");

    let tac = munch::lower_program(&program, &procs);
    tracing::debug!(decls = tac.len(), "lowered to TAC");

    let asm = if config.tac_only {
        None
    } else {
        let text = codegen::lower_program(&tac, config.target).map_err(|e| e.to_string())?;
        tracing::debug!(backend = %config.target, "assembly emitted");
        Some(text)
    };

    Ok(Artifacts { tac, asm })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_source_produces_tac_and_asm() {
        let mut reporter = Reporter::new();
        let artifacts = compile_source(
            "def main() { print(42); }",
            &CompilerConfig::default().with_target(Target::X64Linux),
            &mut reporter,
        )
        .expect("compilation succeeds");
        assert!(reporter.is_empty());
        assert_eq!(artifacts.tac.len(), 1);
        assert!(artifacts.asm.unwrap().contains("callq\tprint_int"));
    }

    #[test]
    fn test_tac_only_skips_assembly() {
        let mut reporter = Reporter::new();
        let artifacts = compile_source(
            "def main() { }",
            &CompilerConfig::default().tac_only(),
            &mut reporter,
        )
        .expect("compilation succeeds");
        assert!(artifacts.asm.is_none());
    }

    #[test]
    fn test_parse_stage_halts_pipeline() {
        let mut reporter = Reporter::new();
        let result = compile_source("def main( {", &CompilerConfig::default(), &mut reporter);
        assert_eq!(result.err().as_deref(), Some("parsing failed"));
        assert!(!reporter.is_empty());
    }

    #[test]
    fn test_check_stage_halts_pipeline() {
        let mut reporter = Reporter::new();
        let result = compile_source(
            "def main() { var x = true : int; }",
            &CompilerConfig::default(),
            &mut reporter,
        );
        assert_eq!(result.err().as_deref(), Some("type checking failed"));
    }

    #[test]
    fn test_all_diagnostics_of_failing_stage_reported() {
        let mut reporter = Reporter::new();
        let _ = compile_source(
            "def main() { var x = true : int; var y = false : int; }",
            &CompilerConfig::default(),
            &mut reporter,
        );
        // both initializer mismatches surface, not just the first
        assert_eq!(reporter.len(), 2);
    }
}
