//! ARM64 Darwin backend (AAPCS64, Apple-LLVM syntax)
//!
//! Temporaries live at `[FP, #-8*(i+1)]`; offsets past the load/store
//! immediate range are materialized through `X15`. Scratch registers:
//! `X9`/`X10`/`X11` for ALU work, `X12` for static-link walks. Darwin
//! prefixes every user symbol with an underscore.
//!
//! Calls mirror the x64 two-word link convention: the caller reserves a
//! 16-byte pair holding (static link, 0) at the bottom of its outgoing
//! stack area, so the callee finds the link at `[FP, #16]` and
//! stack-passed arguments at `[FP, #8*(i+4)]`.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::tac::{Arg, BodyItem, Instr, Opcode, TacDecl, TacProc};

use super::{EmitError, Frame, parse_operand};

/// Incoming-argument registers X0..X7
const NPARAMS: usize = 8;

/// Largest frame-pointer-relative offset addressable without X15
const MAX_DIRECT_OFFSET: usize = 256;

pub(super) fn lower(decls: &[TacDecl]) -> Result<String, EmitError> {
    let mut out = String::new();
    let mut frames: Vec<Frame> = Vec::new();

    for decl in decls {
        match decl {
            TacDecl::Var(var) => {
                let name = decl.symbol();
                writeln!(&mut out, "\t.data")?;
                writeln!(&mut out, "\t.globl\t_{}", name)?;
                writeln!(&mut out, "_{}:", name)?;
                writeln!(&mut out, "\t.quad\t{}", var.init)?;
            }
            TacDecl::Proc(proc) => {
                while frames.last().is_some_and(|f| f.depth >= proc.depth) {
                    frames.pop();
                }
                let (text, frame) = ProcEmitter::new(proc, &frames).emit()?;
                out.push_str(&text);
                frames.push(frame);
            }
        }
    }
    Ok(out)
}

struct ProcEmitter<'a> {
    proc: &'a TacProc,
    parents: &'a [Frame],
    asm: String,
    temps: HashMap<String, usize>,
    stack_params: HashMap<String, usize>,
    pending: Vec<Arg>,
    end_label: String,
}

impl<'a> ProcEmitter<'a> {
    fn new(proc: &'a TacProc, parents: &'a [Frame]) -> Self {
        ProcEmitter {
            proc,
            parents,
            asm: String::new(),
            temps: HashMap::new(),
            stack_params: HashMap::new(),
            pending: Vec::new(),
            end_label: format!(".E_{}", proc.name.trim_start_matches('@')),
        }
    }

    fn emit(mut self) -> Result<(String, Frame), EmitError> {
        for (i, arg) in self.proc.args.iter().enumerate() {
            if i < NPARAMS {
                let slot = self.location(arg)?;
                self.ins("str", &[&format!("X{}", i), &slot])?;
            } else {
                self.stack_params.insert(arg.clone(), i - NPARAMS);
            }
        }

        for item in &self.proc.body {
            match item {
                BodyItem::Label(label) => writeln!(&mut self.asm, "{}:", label)?,
                BodyItem::Instr(instr) => self.emit_instr(instr)?,
            }
        }

        let name = self.proc.name.trim_start_matches('@');
        let mut nvars = self.temps.len();
        nvars += nvars & 1;

        let mut text = String::new();
        writeln!(&mut text, "\t.text")?;
        writeln!(&mut text, "\t.globl\t_{}", name)?;
        writeln!(&mut text, "_{}:", name)?;
        writeln!(&mut text, "\tstp\tFP, LR, [SP, #-16]!")?;
        writeln!(&mut text, "\tmov\tFP, SP")?;
        writeln!(&mut text, "\tsub\tSP, SP, #{}", 8 * nvars)?;
        text.push_str(&self.asm);
        writeln!(&mut text, "{}:", self.end_label)?;
        writeln!(&mut text, "\tmov\tSP, FP")?;
        writeln!(&mut text, "\tldp\tFP, LR, [SP], #16")?;
        writeln!(&mut text, "\tret")?;

        let frame = Frame {
            depth: self.proc.depth,
            slots: self.temps,
            stack_params: self.stack_params,
        };
        Ok((text, frame))
    }

    fn ins(&mut self, opcode: &str, args: &[&str]) -> Result<(), EmitError> {
        if args.is_empty() {
            writeln!(&mut self.asm, "\t{}", opcode)?;
        } else {
            writeln!(&mut self.asm, "\t{}\t{}", opcode, args.join(", "))?;
        }
        Ok(())
    }

    /// Memory location of a named operand, with any address
    /// materialization or static-link walk emitted first
    fn location(&mut self, operand: &str) -> Result<String, EmitError> {
        let operand = parse_operand(operand)?;
        if let Some(global) = operand.name.strip_prefix('@') {
            self.ins("adrp", &["X15", &format!("_{}@PAGE", global)])?;
            return Ok(format!("[X15, _{}@PAGEOFF]", global));
        }

        if operand.hops == 0 {
            if let Some(&index) = self.stack_params.get(operand.name) {
                return Ok(format!("[FP, #{}]", 8 * (index + 4)));
            }
            let next = self.temps.len();
            let slot = *self.temps.entry(operand.name.to_string()).or_insert(next);
            let offset = 8 * (slot + 1);
            if offset > MAX_DIRECT_OFFSET {
                self.ins("sub", &["X15", "FP", &format!("#{}", offset)])?;
                return Ok("[X15]".to_string());
            }
            return Ok(format!("[FP, #-{}]", offset));
        }

        self.ins("mov", &["X12", "FP"])?;
        for _ in 0..operand.hops {
            self.ins("ldr", &["X12", "[X12, #16]"])?;
        }
        let frame = self
            .parents
            .len()
            .checked_sub(operand.hops as usize)
            .and_then(|i| self.parents.get(i))
            .ok_or_else(|| {
                EmitError::Logic(format!("no enclosing frame at {} hops", operand.hops))
            })?;
        if let Some(&index) = frame.stack_params.get(operand.name) {
            return Ok(format!("[X12, #{}]", 8 * (index + 4)));
        }
        let slot = frame.slots.get(operand.name).ok_or_else(|| {
            EmitError::Logic(format!("'{}' not in the enclosing frame", operand.name))
        })?;
        let offset = 8 * (slot + 1);
        if offset > MAX_DIRECT_OFFSET {
            self.ins("sub", &["X15", "X12", &format!("#{}", offset)])?;
            return Ok("[X15]".to_string());
        }
        Ok(format!("[X12, #-{}]", offset))
    }

    /// Load an immediate into `reg` by `movz`/`movk` chunks of 16 bits;
    /// negative values wrap through two's complement
    fn load_imm(&mut self, reg: &str, value: i64) -> Result<(), EmitError> {
        let mut rest = value as u64;
        self.ins("movz", &[reg, &format!("#{}", rest & 0xffff)])?;
        rest >>= 16;
        let mut shift = 16;
        while rest != 0 {
            self.ins(
                "movk",
                &[reg, &format!("#{}", rest & 0xffff), &format!("lsl #{}", shift)],
            )?;
            rest >>= 16;
            shift += 16;
        }
        Ok(())
    }

    /// Load an operand (immediate or named) into `reg`
    fn load(&mut self, reg: &str, arg: &Arg) -> Result<(), EmitError> {
        match arg {
            Arg::Imm(value) => self.load_imm(reg, *value),
            Arg::Name(name) => {
                let loc = self.location(name)?;
                self.ins("ldr", &[reg, &loc])
            }
        }
    }

    fn store(&mut self, reg: &str, dst: &str) -> Result<(), EmitError> {
        let loc = self.location(dst)?;
        self.ins("str", &[reg, &loc])
    }

    fn result_of<'b>(&self, instr: &'b Instr) -> Result<&'b str, EmitError> {
        instr
            .result
            .as_deref()
            .ok_or_else(|| EmitError::Logic(format!("{}: missing result", instr.opcode)))
    }

    fn named_arg<'b>(&self, instr: &'b Instr, index: usize) -> Result<&'b str, EmitError> {
        match instr.args.get(index) {
            Some(Arg::Name(name)) => Ok(name),
            other => Err(EmitError::Logic(format!(
                "{}: expected a named operand, got {:?}",
                instr.opcode, other
            ))),
        }
    }

    fn emit_instr(&mut self, instr: &Instr) -> Result<(), EmitError> {
        match instr.opcode {
            Opcode::Const => {
                let Some(&Arg::Imm(value)) = instr.args.first() else {
                    return Err(EmitError::Logic("const without an immediate".to_string()));
                };
                self.load_imm("X9", value)?;
                let dst = self.result_of(instr)?.to_string();
                self.store("X9", &dst)?;
            }
            Opcode::Copy => {
                self.load("X9", &instr.args[0])?;
                let dst = self.result_of(instr)?.to_string();
                self.store("X9", &dst)?;
            }
            Opcode::Neg => self.alu1("neg", instr)?,
            Opcode::Not => self.alu1("mvn", instr)?,
            Opcode::Add => self.alu2("add", instr)?,
            Opcode::Sub => self.alu2("sub", instr)?,
            Opcode::Mul => self.alu2("mul", instr)?,
            Opcode::Div => self.alu2("sdiv", instr)?,
            Opcode::And => self.alu2("and", instr)?,
            Opcode::Or => self.alu2("orr", instr)?,
            Opcode::Xor => self.alu2("eor", instr)?,
            Opcode::Shl => self.alu2("lsl", instr)?,
            // Arithmetic right shift: sign-preserving
            Opcode::Shr => self.alu2("asr", instr)?,
            Opcode::Mod => {
                self.load("X9", &instr.args[0])?;
                self.load("X10", &instr.args[1])?;
                self.ins("sdiv", &["X11", "X9", "X10"])?;
                self.ins("mul", &["X11", "X11", "X10"])?;
                self.ins("sub", &["X11", "X9", "X11"])?;
                let dst = self.result_of(instr)?.to_string();
                self.store("X11", &dst)?;
            }
            Opcode::Jmp => {
                let label = self.named_arg(instr, 0)?.to_string();
                self.ins("b", &[&label])?;
            }
            Opcode::Jz => {
                self.load("X9", &instr.args[0])?;
                let label = self.named_arg(instr, 1)?.to_string();
                self.ins("cbz", &["X9", &label])?;
            }
            Opcode::Jnz => {
                self.load("X9", &instr.args[0])?;
                let label = self.named_arg(instr, 1)?.to_string();
                self.ins("cbnz", &["X9", &label])?;
            }
            Opcode::Jlt => self.sign_jump("b.lt", instr)?,
            Opcode::Jle => self.sign_jump("b.le", instr)?,
            Opcode::Jgt => self.sign_jump("b.gt", instr)?,
            Opcode::Jge => self.sign_jump("b.ge", instr)?,
            Opcode::Param => {
                let Some(&Arg::Imm(index)) = instr.args.first() else {
                    return Err(EmitError::Logic("param without an index".to_string()));
                };
                if index as usize != self.pending.len() + 1 {
                    return Err(EmitError::Logic(format!(
                        "param {} out of order at call argument {}",
                        index,
                        self.pending.len() + 1
                    )));
                }
                self.pending.push(instr.args[1].clone());
            }
            Opcode::Call => self.call(instr)?,
            Opcode::Ret => {
                if let Some(arg) = instr.args.first() {
                    self.load("X0", arg)?;
                }
                let end = self.end_label.clone();
                self.ins("b", &[&end])?;
            }
        }
        Ok(())
    }

    fn alu1(&mut self, opcode: &str, instr: &Instr) -> Result<(), EmitError> {
        self.load("X9", &instr.args[0])?;
        self.ins(opcode, &["X10", "X9"])?;
        let dst = self.result_of(instr)?.to_string();
        self.store("X10", &dst)?;
        Ok(())
    }

    fn alu2(&mut self, opcode: &str, instr: &Instr) -> Result<(), EmitError> {
        self.load("X9", &instr.args[0])?;
        self.load("X10", &instr.args[1])?;
        self.ins(opcode, &["X11", "X9", "X10"])?;
        let dst = self.result_of(instr)?.to_string();
        self.store("X11", &dst)?;
        Ok(())
    }

    fn sign_jump(&mut self, condition: &str, instr: &Instr) -> Result<(), EmitError> {
        self.load("X9", &instr.args[0])?;
        self.ins("cmp", &["X9", "#0"])?;
        let label = self.named_arg(instr, 1)?.to_string();
        self.ins(condition, &[&label])?;
        Ok(())
    }

    fn call(&mut self, instr: &Instr) -> Result<(), EmitError> {
        let callee = self.named_arg(instr, 0)?.to_string();
        let Some(&Arg::Imm(argc)) = instr.args.get(1) else {
            return Err(EmitError::Logic("call without an argument count".to_string()));
        };
        let pending = std::mem::take(&mut self.pending);
        if pending.len() != argc as usize {
            return Err(EmitError::Logic(format!(
                "call to {} expects {} argument(s), {} collected",
                callee,
                argc,
                pending.len()
            )));
        }

        // Outgoing area: a 16-byte (link, 0) pair at the bottom, then the
        // stack-passed arguments in 16-byte-aligned pairs above it.
        let qarg = pending.len().saturating_sub(NPARAMS);
        let arg_bytes = 16 * qarg.div_ceil(2);
        let total = arg_bytes + 16;
        self.ins("sub", &["SP", "SP", &format!("#{}", total)])?;

        match instr.link_depth {
            None => self.ins("str", &["XZR", "[SP]"])?,
            Some(0) => self.ins("str", &["FP", "[SP]"])?,
            Some(hops) => {
                self.ins("mov", &["X12", "FP"])?;
                for _ in 0..hops {
                    self.ins("ldr", &["X12", "[X12, #16]"])?;
                }
                self.ins("str", &["X12", "[SP]"])?;
            }
        }
        self.ins("str", &["XZR", "[SP, #8]"])?;

        for (i, arg) in pending.iter().skip(NPARAMS).enumerate() {
            self.load("X10", arg)?;
            self.ins("str", &["X10", &format!("[SP, #{}]", 16 + 8 * i)])?;
        }

        for (i, arg) in pending.iter().take(NPARAMS).enumerate() {
            self.load(&format!("X{}", i), arg)?;
        }

        self.ins("bl", &[&format!("_{}", callee)])?;
        self.ins("add", &["SP", "SP", &format!("#{}", total)])?;

        if let Some(dst) = instr.result.clone() {
            self.store("X0", &dst)?;
        }
        Ok(())
    }
}
