//! x86-64 Linux backend (System V, GAS syntax)
//!
//! Temporaries live at `-8*(i+1)(%rbp)`. Scratch registers are fixed:
//! `%r11` for ALU work, `%rax`/`%rdx` for multiplication and division,
//! `%rcx`/`%cl` for shift counts, `%r12` for static-link walks.
//!
//! Every call site pushes exactly two 8-byte link words (static link then
//! a zero pad, or two zeros for a top-level callee) immediately before
//! `callq`, so the callee always finds its static link at `24(%rbp)` and
//! stack-passed arguments at `8*(i+4)(%rbp)`.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::tac::{Arg, BodyItem, Instr, Opcode, TacDecl, TacProc};

use super::{EmitError, Frame, parse_operand};

/// Incoming-argument registers, in order
const PARAMS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

pub(super) fn lower(decls: &[TacDecl]) -> Result<String, EmitError> {
    let mut out = String::new();
    let mut frames: Vec<Frame> = Vec::new();

    for decl in decls {
        match decl {
            TacDecl::Var(var) => {
                let name = decl.symbol();
                writeln!(&mut out, "\t.data")?;
                writeln!(&mut out, "\t.globl\t{}", name)?;
                writeln!(&mut out, "{}:", name)?;
                writeln!(&mut out, "\t.quad\t{}", var.init)?;
            }
            TacDecl::Proc(proc) => {
                // Keep exactly the lexically-enclosing frames around
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
    /// Pending operands collected from `param` for the next `call`
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
        // Register arguments are stored to their slots on entry; the rest
        // arrive on the caller's stack above the link words.
        for (i, arg) in self.proc.args.iter().enumerate() {
            if i < PARAMS.len() {
                let slot = self.location(arg)?;
                self.ins("movq", &[PARAMS[i], &slot])?;
            } else {
                self.stack_params.insert(arg.clone(), i - PARAMS.len());
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
        writeln!(&mut text, "\t.globl\t{}", name)?;
        writeln!(&mut text, "{}:", name)?;
        writeln!(&mut text, "\tpushq\t%rbp")?;
        writeln!(&mut text, "\tmovq\t%rsp, %rbp")?;
        writeln!(&mut text, "\tsubq\t${}, %rsp", 8 * nvars)?;
        text.push_str(&self.asm);
        writeln!(&mut text, "{}:", self.end_label)?;
        writeln!(&mut text, "\tmovq\t%rbp, %rsp")?;
        writeln!(&mut text, "\tpopq\t%rbp")?;
        writeln!(&mut text, "\tretq")?;

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

    /// Memory location of a named operand. Globals are rip-relative;
    /// captured operands walk the static-link chain through `%r12` first
    /// (the walk is emitted here, just before the instruction that uses
    /// the returned location).
    fn location(&mut self, operand: &str) -> Result<String, EmitError> {
        let operand = parse_operand(operand)?;
        if let Some(global) = operand.name.strip_prefix('@') {
            return Ok(format!("{}(%rip)", global));
        }

        if operand.hops == 0 {
            if let Some(&index) = self.stack_params.get(operand.name) {
                return Ok(format!("{}(%rbp)", 8 * (index + 4)));
            }
            let next = self.temps.len();
            let slot = *self.temps.entry(operand.name.to_string()).or_insert(next);
            return Ok(format!("-{}(%rbp)", 8 * (slot + 1)));
        }

        self.ins("movq", &["%rbp", "%r12"])?;
        for _ in 0..operand.hops {
            self.ins("movq", &["24(%r12)", "%r12"])?;
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
            return Ok(format!("{}(%r12)", 8 * (index + 4)));
        }
        let slot = frame.slots.get(operand.name).ok_or_else(|| {
            EmitError::Logic(format!("'{}' not in the enclosing frame", operand.name))
        })?;
        Ok(format!("-{}(%r12)", 8 * (slot + 1)))
    }

    /// An operand usable where an instruction accepts reg/mem/imm
    fn value(&mut self, arg: &Arg) -> Result<String, EmitError> {
        match arg {
            Arg::Imm(value) => Ok(format!("${}", value)),
            Arg::Name(name) => self.location(name),
        }
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

    fn result<'b>(&self, instr: &'b Instr) -> Result<&'b str, EmitError> {
        instr
            .result
            .as_deref()
            .ok_or_else(|| EmitError::Logic(format!("{}: missing result", instr.opcode)))
    }

    fn emit_instr(&mut self, instr: &Instr) -> Result<(), EmitError> {
        match instr.opcode {
            Opcode::Const => {
                let Some(&Arg::Imm(value)) = instr.args.first() else {
                    return Err(EmitError::Logic("const without an immediate".to_string()));
                };
                let dst = self.result(instr)?.to_string();
                let dst = self.location(&dst)?;
                if i32::try_from(value).is_ok() {
                    self.ins("movq", &[&format!("${}", value), &dst])?;
                } else {
                    // movq only sign-extends 32-bit immediates
                    self.ins("movabsq", &[&format!("${}", value), "%r11"])?;
                    self.ins("movq", &["%r11", &dst])?;
                }
            }
            Opcode::Copy => {
                let src = self.value(&instr.args[0])?;
                self.ins("movq", &[&src, "%r11"])?;
                let dst = self.result(instr)?.to_string();
                let dst = self.location(&dst)?;
                self.ins("movq", &["%r11", &dst])?;
            }
            Opcode::Neg => self.alu1("negq", instr)?,
            Opcode::Not => self.alu1("notq", instr)?,
            Opcode::Add => self.alu2("addq", instr)?,
            Opcode::Sub => self.alu2("subq", instr)?,
            Opcode::And => self.alu2("andq", instr)?,
            Opcode::Or => self.alu2("orq", instr)?,
            Opcode::Xor => self.alu2("xorq", instr)?,
            Opcode::Mul => {
                let op1 = self.value(&instr.args[0])?;
                self.ins("movq", &[&op1, "%rax"])?;
                let op2 = self.value(&instr.args[1])?;
                self.ins("imulq", &[&op2])?;
                let dst = self.result(instr)?.to_string();
                let dst = self.location(&dst)?;
                self.ins("movq", &["%rax", &dst])?;
            }
            Opcode::Div => self.divide(instr, "%rax")?,
            Opcode::Mod => self.divide(instr, "%rdx")?,
            Opcode::Shl => self.shift("salq", instr)?,
            Opcode::Shr => self.shift("sarq", instr)?,
            Opcode::Jmp => {
                let label = self.named_arg(instr, 0)?.to_string();
                self.ins("jmp", &[&label])?;
            }
            Opcode::Jz => self.cond_jump("jz", instr)?,
            Opcode::Jnz => self.cond_jump("jnz", instr)?,
            Opcode::Jlt => self.cond_jump("jl", instr)?,
            Opcode::Jle => self.cond_jump("jle", instr)?,
            Opcode::Jgt => self.cond_jump("jg", instr)?,
            Opcode::Jge => self.cond_jump("jge", instr)?,
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
                match instr.args.first() {
                    Some(Arg::Imm(value)) => {
                        if i32::try_from(*value).is_ok() {
                            self.ins("movq", &[&format!("${}", value), "%rax"])?;
                        } else {
                            self.ins("movabsq", &[&format!("${}", value), "%rax"])?;
                        }
                    }
                    Some(Arg::Name(name)) => {
                        let loc = self.location(name)?;
                        self.ins("movq", &[&loc, "%rax"])?;
                    }
                    None => {}
                }
                let end = self.end_label.clone();
                self.ins("jmp", &[&end])?;
            }
        }
        Ok(())
    }

    fn alu1(&mut self, opcode: &str, instr: &Instr) -> Result<(), EmitError> {
        let src = self.value(&instr.args[0])?;
        self.ins("movq", &[&src, "%r11"])?;
        self.ins(opcode, &["%r11"])?;
        let dst = self.result(instr)?.to_string();
        let dst = self.location(&dst)?;
        self.ins("movq", &["%r11", &dst])?;
        Ok(())
    }

    fn alu2(&mut self, opcode: &str, instr: &Instr) -> Result<(), EmitError> {
        let op1 = self.value(&instr.args[0])?;
        self.ins("movq", &[&op1, "%r11"])?;
        let op2 = self.value(&instr.args[1])?;
        self.ins(opcode, &[&op2, "%r11"])?;
        let dst = self.result(instr)?.to_string();
        let dst = self.location(&dst)?;
        self.ins("movq", &["%r11", &dst])?;
        Ok(())
    }

    fn divide(&mut self, instr: &Instr, result_reg: &str) -> Result<(), EmitError> {
        let op1 = self.value(&instr.args[0])?;
        self.ins("movq", &[&op1, "%rax"])?;
        self.ins("cqto", &[])?;
        let op2 = self.value(&instr.args[1])?;
        self.ins("idivq", &[&op2])?;
        let dst = self.result(instr)?.to_string();
        let dst = self.location(&dst)?;
        self.ins("movq", &[result_reg, &dst])?;
        Ok(())
    }

    fn shift(&mut self, opcode: &str, instr: &Instr) -> Result<(), EmitError> {
        let op1 = self.value(&instr.args[0])?;
        self.ins("movq", &[&op1, "%r11"])?;
        let op2 = self.value(&instr.args[1])?;
        self.ins("movq", &[&op2, "%rcx"])?;
        self.ins(opcode, &["%cl", "%r11"])?;
        let dst = self.result(instr)?.to_string();
        let dst = self.location(&dst)?;
        self.ins("movq", &["%r11", &dst])?;
        Ok(())
    }

    fn cond_jump(&mut self, condition: &str, instr: &Instr) -> Result<(), EmitError> {
        let op = self.value(&instr.args[0])?;
        self.ins("cmpq", &["$0", &op])?;
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

        for (i, arg) in pending.iter().take(PARAMS.len()).enumerate() {
            let loc = self.value(arg)?;
            self.ins("movq", &[&loc, PARAMS[i]])?;
        }

        // Keep the stack 16-byte aligned: the stack args plus the two
        // link words must total a multiple of 16 at the callq.
        let qarg = pending.len().saturating_sub(PARAMS.len());
        if qarg & 1 == 1 {
            self.ins("subq", &["$8", "%rsp"])?;
        }
        for arg in pending.iter().skip(PARAMS.len()).rev() {
            let loc = self.value(arg)?;
            self.ins("pushq", &[&loc])?;
        }

        match instr.link_depth {
            None => {
                // Top-level callee: keep the uniform frame shape
                self.ins("pushq", &["$0"])?;
                self.ins("pushq", &["$0"])?;
            }
            Some(0) => {
                self.ins("pushq", &["%rbp"])?;
                self.ins("pushq", &["$0"])?;
            }
            Some(hops) => {
                self.ins("movq", &["%rbp", "%r12"])?;
                for _ in 0..hops {
                    self.ins("movq", &["24(%r12)", "%r12"])?;
                }
                self.ins("pushq", &["%r12"])?;
                self.ins("pushq", &["$0"])?;
            }
        }

        self.ins("callq", &[&callee])?;

        if qarg > 0 {
            self.ins("addq", &[&format!("${}", 8 * (qarg + (qarg & 1))), "%rsp"])?;
        }
        self.ins("addq", &["$16", "%rsp"])?;

        if let Some(dst) = instr.result.clone() {
            let loc = self.location(&dst)?;
            self.ins("movq", &["%rax", &loc])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tac::TacVar;

    fn instr(opcode: Opcode, args: Vec<Arg>, result: Option<&str>) -> BodyItem {
        BodyItem::Instr(Instr::new(opcode, args, result.map(str::to_string)))
    }

    fn proc(name: &str, depth: u32, args: Vec<&str>, body: Vec<BodyItem>) -> TacDecl {
        TacDecl::Proc(TacProc {
            name: format!("@{}", name),
            depth,
            args: args.into_iter().map(str::to_string).collect(),
            body,
        })
    }

    #[test]
    fn test_print_call_shape() {
        let decls = vec![proc(
            "main",
            0,
            vec![],
            vec![
                instr(Opcode::Const, vec![Arg::Imm(42)], Some("%0")),
                instr(Opcode::Param, vec![Arg::Imm(1), Arg::name("%0")], None),
                instr(Opcode::Call, vec![Arg::name("print_int"), Arg::Imm(1)], None),
                instr(Opcode::Ret, vec![Arg::Imm(0)], None),
            ],
        )];
        let asm = lower(&decls).unwrap();
        assert!(asm.contains("\t.globl\tmain"));
        assert!(asm.contains("\tmovq\t$42, -8(%rbp)"));
        assert!(asm.contains("\tmovq\t-8(%rbp), %rdi"));
        assert!(asm.contains("\tcallq\tprint_int"));
        // two zero link words for a top-level callee, restored after
        assert_eq!(asm.matches("\tpushq\t$0").count(), 2);
        assert!(asm.contains("\taddq\t$16, %rsp"));
        // main's ret 0 runs through the epilogue
        assert!(asm.contains("\tmovq\t$0, %rax"));
        assert!(asm.contains("\tjmp\t.E_main"));
        assert!(asm.contains(".E_main:"));
        assert!(asm.contains("\tretq"));
    }

    #[test]
    fn test_frame_size_rounded_even() {
        let decls = vec![proc(
            "main",
            0,
            vec![],
            vec![
                instr(Opcode::Const, vec![Arg::Imm(1)], Some("%0")),
                instr(Opcode::Const, vec![Arg::Imm(2)], Some("%1")),
                instr(Opcode::Const, vec![Arg::Imm(3)], Some("%2")),
            ],
        )];
        let asm = lower(&decls).unwrap();
        // three slots round up to four
        assert!(asm.contains("\tsubq\t$32, %rsp"));
    }

    #[test]
    fn test_stack_args_padded_for_alignment() {
        // Seven arguments: one goes on the stack, so an 8-byte pad keeps
        // the total pushed (pad + arg + two link words) a multiple of 16.
        let mut body = Vec::new();
        for i in 0..7 {
            body.push(instr(Opcode::Const, vec![Arg::Imm(i)], Some(&format!("%{}", i))));
        }
        for i in 0..7i64 {
            body.push(instr(
                Opcode::Param,
                vec![Arg::Imm(i + 1), Arg::name(format!("%{}", i))],
                None,
            ));
        }
        body.push(instr(Opcode::Call, vec![Arg::name("f"), Arg::Imm(7)], None));
        let decls = vec![proc("main", 0, vec![], body)];
        let asm = lower(&decls).unwrap();
        assert!(asm.contains("\tsubq\t$8, %rsp"));
        // restore: 8 * (1 + 1) for the padded stack arg, then the links
        assert!(asm.contains("\taddq\t$16, %rsp"));
    }

    #[test]
    fn test_division_uses_cqto_and_rdx_for_mod() {
        let decls = vec![proc(
            "main",
            0,
            vec![],
            vec![
                instr(Opcode::Const, vec![Arg::Imm(7)], Some("%0")),
                instr(Opcode::Const, vec![Arg::Imm(2)], Some("%1")),
                instr(Opcode::Mod, vec![Arg::name("%0"), Arg::name("%1")], Some("%2")),
            ],
        )];
        let asm = lower(&decls).unwrap();
        assert!(asm.contains("\tcqto"));
        assert!(asm.contains("\tidivq\t-16(%rbp)"));
        assert!(asm.contains("\tmovq\t%rdx, -24(%rbp)"));
    }

    #[test]
    fn test_shift_uses_cl() {
        let decls = vec![proc(
            "main",
            0,
            vec![],
            vec![
                instr(Opcode::Const, vec![Arg::Imm(1)], Some("%0")),
                instr(Opcode::Const, vec![Arg::Imm(3)], Some("%1")),
                instr(Opcode::Shr, vec![Arg::name("%0"), Arg::name("%1")], Some("%2")),
            ],
        )];
        let asm = lower(&decls).unwrap();
        assert!(asm.contains("\tmovq\t-16(%rbp), %rcx"));
        // arithmetic right shift preserves the sign
        assert!(asm.contains("\tsarq\t%cl, %r11"));
    }

    #[test]
    fn test_large_immediate_goes_through_movabsq() {
        let decls = vec![proc(
            "main",
            0,
            vec![],
            vec![instr(
                Opcode::Const,
                vec![Arg::Imm(1 << 40)],
                Some("%0"),
            )],
        )];
        let asm = lower(&decls).unwrap();
        assert!(asm.contains("\tmovabsq\t$1099511627776, %r11"));
    }

    #[test]
    fn test_conditional_jump_compares_against_zero() {
        let decls = vec![proc(
            "main",
            0,
            vec![],
            vec![
                instr(Opcode::Const, vec![Arg::Imm(5)], Some("%0")),
                instr(Opcode::Jgt, vec![Arg::name("%0"), Arg::name(".L1")], None),
                BodyItem::Label(".L1".to_string()),
            ],
        )];
        let asm = lower(&decls).unwrap();
        assert!(asm.contains("\tcmpq\t$0, -8(%rbp)"));
        assert!(asm.contains("\tjg\t.L1"));
        assert!(asm.contains(".L1:"));
    }

    #[test]
    fn test_static_link_walk_for_captured_operand() {
        let decls = vec![
            proc(
                "outer",
                0,
                vec![],
                vec![
                    instr(Opcode::Const, vec![Arg::Imm(7)], Some("%0")),
                    instr(Opcode::Copy, vec![Arg::name("%0")], Some("%1")),
                ],
            ),
            proc(
                "inner",
                1,
                vec![],
                vec![
                    instr(Opcode::Param, vec![Arg::Imm(1), Arg::name("%1:1")], None),
                    instr(Opcode::Call, vec![Arg::name("print_int"), Arg::Imm(1)], None),
                ],
            ),
        ];
        let asm = lower(&decls).unwrap();
        // one hop up the chain, then the owner's slot for %1
        assert!(asm.contains("\tmovq\t24(%r12), %r12"));
        assert!(asm.contains("\tmovq\t-16(%r12), %rdi"));
    }

    #[test]
    fn test_call_link_words() {
        let decls = vec![
            proc(
                "outer",
                0,
                vec![],
                vec![instr(Opcode::Call, vec![Arg::name("inner"), Arg::Imm(0)], None)],
            ),
            proc("inner", 1, vec![], vec![]),
        ];
        // link_depth 0: the caller passes its own frame
        let mut decls = decls;
        if let TacDecl::Proc(outer) = &mut decls[0]
            && let BodyItem::Instr(call) = &mut outer.body[0]
        {
            call.link_depth = Some(0);
        }
        let asm = lower(&decls).unwrap();
        assert!(asm.contains("\tpushq\t%rbp"));
        assert!(asm.contains("\tpushq\t$0"));
    }

    #[test]
    fn test_incoming_stack_params_addressed_above_links() {
        let decls = vec![proc(
            "f",
            0,
            vec!["%a", "%b", "%c", "%d", "%e", "%f", "%g", "%h"],
            vec![
                instr(Opcode::Copy, vec![Arg::name("%g")], Some("%0")),
                instr(Opcode::Copy, vec![Arg::name("%h")], Some("%1")),
            ],
        )];
        let asm = lower(&decls).unwrap();
        // seventh and eighth arguments: 32(%rbp) and 40(%rbp)
        assert!(asm.contains("\tmovq\t32(%rbp), %r11"));
        assert!(asm.contains("\tmovq\t40(%rbp), %r11"));
    }

    #[test]
    fn test_global_data_and_rip_access() {
        let decls = vec![
            TacDecl::Var(TacVar {
                name: "@g".to_string(),
                init: 7,
            }),
            proc(
                "main",
                0,
                vec![],
                vec![
                    instr(Opcode::Copy, vec![Arg::name("@g")], Some("%0")),
                    instr(Opcode::Ret, vec![Arg::Imm(0)], None),
                ],
            ),
        ];
        let asm = lower(&decls).unwrap();
        assert!(asm.contains("\t.data"));
        assert!(asm.contains("\t.globl\tg"));
        assert!(asm.contains("\t.quad\t7"));
        assert!(asm.contains("\tmovq\tg(%rip), %r11"));
    }
}
