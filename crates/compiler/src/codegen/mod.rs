//! Assembly emission from TAC
//!
//! Two backends share one shape: slots for temporaries addressed off the
//! frame pointer, a fixed scratch-register scheme, and an always-two-words
//! static-link convention at every call site. Backends process procedures
//! in emission order (owners before their nested procedures) and keep the
//! finished enclosing frames around so captured references resolve against
//! the owning frame's slot assignment.

mod arm64_darwin;
mod x64_linux;

use std::collections::HashMap;

use crate::tac::TacDecl;

/// Error type for assembly emission.
///
/// Logical errors indicate malformed TAC (these surface as hard failures,
/// not diagnostics); format errors come from writing into the output
/// buffer and propagate with `?`.
#[derive(Debug)]
pub enum EmitError {
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmitError::Logic(message) => write!(f, "{}", message),
            EmitError::Format(e) => write!(f, "assembly generation error: {}", e),
        }
    }
}

impl std::error::Error for EmitError {}

impl From<String> for EmitError {
    fn from(message: String) -> Self {
        EmitError::Logic(message)
    }
}

impl From<std::fmt::Error> for EmitError {
    fn from(e: std::fmt::Error) -> Self {
        EmitError::Format(e)
    }
}

/// Supported target triples
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Target {
    /// x86-64 Linux, System V calling convention, GAS syntax
    X64Linux,
    /// ARM64 Darwin, AAPCS64 calling convention, Apple-LLVM syntax
    Arm64Darwin,
}

impl Target {
    /// The backend matching the build host, when it is one of the two
    pub fn host_default() -> Self {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            Target::Arm64Darwin
        }

        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            Target::X64Linux
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Target::X64Linux => "x64-linux",
            Target::Arm64Darwin => "arm64-darwin",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A finished procedure's frame layout, kept for its nested procedures
pub(crate) struct Frame {
    pub depth: u32,
    /// Temp name to slot index; slot `i` lives at offset `8*(i+1)` below
    /// the frame pointer
    pub slots: HashMap<String, usize>,
    /// Stack-passed parameter name to index above the link words
    pub stack_params: HashMap<String, usize>,
}

/// A TAC operand name split into its base name and static-link hop count
pub(crate) struct OperandRef<'a> {
    pub name: &'a str,
    pub hops: u32,
}

pub(crate) fn parse_operand(operand: &str) -> Result<OperandRef<'_>, EmitError> {
    match operand.rsplit_once(':') {
        None => Ok(OperandRef {
            name: operand,
            hops: 0,
        }),
        Some((name, hops)) => {
            let hops = hops
                .parse()
                .map_err(|_| EmitError::Logic(format!("malformed operand '{}'", operand)))?;
            Ok(OperandRef { name, hops })
        }
    }
}

/// Lower a TAC program to assembly text for the given target
pub fn lower_program(decls: &[TacDecl], target: Target) -> Result<String, EmitError> {
    match target {
        Target::X64Linux => x64_linux::lower(decls),
        Target::Arm64Darwin => arm64_darwin::lower(decls),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operand_suffix() {
        let plain = parse_operand("%7").unwrap();
        assert_eq!(plain.name, "%7");
        assert_eq!(plain.hops, 0);

        let captured = parse_operand("%captured:2").unwrap();
        assert_eq!(captured.name, "%captured");
        assert_eq!(captured.hops, 2);

        assert!(parse_operand("%x:nope").is_err());
    }

    #[test]
    fn test_target_names() {
        assert_eq!(Target::X64Linux.name(), "x64-linux");
        assert_eq!(Target::Arm64Darwin.name(), "arm64-darwin");
    }
}
