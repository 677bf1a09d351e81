//! Compiler configuration
//!
//! Options threaded from the CLI (or an embedding project) into the
//! pipeline: which backend to emit for and which artifacts to produce.

use crate::codegen::Target;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Backend to emit assembly for
    pub target: Target,
    /// Skip assembly emission and stop after TAC
    pub tac_only: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            target: Target::host_default(),
            tac_only: false,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn tac_only(mut self) -> Self {
        self.tac_only = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_target(Target::Arm64Darwin)
            .tac_only();
        assert_eq!(config.target, Target::Arm64Darwin);
        assert!(config.tac_only);
    }
}
