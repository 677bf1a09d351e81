//! Three-address code: the in-memory IR and its JSON form
//!
//! A TAC program is a flat list of global variables and procedures. Each
//! procedure body is a sequence of instructions and first-class labels.
//! The JSON dump round-trips: serializing and parsing yields an identical
//! program.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    Const,
    Copy,
    Neg,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Jmp,
    Jz,
    Jnz,
    Jlt,
    Jle,
    Jgt,
    Jge,
    Param,
    Call,
    Ret,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Const => "const",
            Opcode::Copy => "copy",
            Opcode::Neg => "neg",
            Opcode::Not => "not",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Jmp => "jmp",
            Opcode::Jz => "jz",
            Opcode::Jnz => "jnz",
            Opcode::Jlt => "jlt",
            Opcode::Jle => "jle",
            Opcode::Jgt => "jgt",
            Opcode::Jge => "jge",
            Opcode::Param => "param",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An instruction operand: an immediate or a named operand (`%<n>`
/// temporaries, `%<arg>` parameters, `%<t>:<h>` captured references,
/// `@name` globals, `.L<n>` labels, procedure names on `call`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Imm(i64),
    Name(String),
}

impl Arg {
    pub fn name(s: impl Into<String>) -> Self {
        Arg::Name(s.into())
    }
}

impl std::fmt::Display for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Imm(value) => write!(f, "{}", value),
            Arg::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub opcode: Opcode,
    #[serde(default)]
    pub args: Vec<Arg>,
    #[serde(default)]
    pub result: Option<String>,
    /// Static-link hop count on `call`; `None` for top-level callees
    #[serde(default)]
    pub link_depth: Option<u32>,
}

impl Instr {
    pub fn new(opcode: Opcode, args: Vec<Arg>, result: Option<String>) -> Self {
        Instr {
            opcode,
            args,
            result,
            link_depth: None,
        }
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(result) = &self.result {
            write!(f, "{} = ", result)?;
        }
        write!(f, "{}", self.opcode)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", arg)?;
            } else {
                write!(f, ", {}", arg)?;
            }
        }
        Ok(())
    }
}

/// One body entry: an instruction, or a label definition
#[derive(Debug, Clone, PartialEq)]
pub enum BodyItem {
    Label(String),
    Instr(Instr),
}

impl Serialize for BodyItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Labels appear in the JSON body as bare strings ".L<n>:"
            BodyItem::Label(label) => serializer.serialize_str(&format!("{}:", label)),
            BodyItem::Instr(instr) => instr.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for BodyItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Label(String),
            Instr(Instr),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Label(label) => BodyItem::Label(label.trim_end_matches(':').to_string()),
            Repr::Instr(instr) => BodyItem::Instr(instr),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacVar {
    /// Global name with its `@` prefix, e.g. `@counter`
    #[serde(rename = "var")]
    pub name: String,
    pub init: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacProc {
    /// Procedure name with its `@` prefix, e.g. `@main`
    #[serde(rename = "proc")]
    pub name: String,
    /// Lexical depth, 0 for top-level procedures
    pub depth: u32,
    /// Parameter operands in order, e.g. `["%x", "%y"]`
    pub args: Vec<String>,
    pub body: Vec<BodyItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TacDecl {
    Var(TacVar),
    Proc(TacProc),
}

impl TacDecl {
    /// The declaration's symbol without the `@` prefix
    pub fn symbol(&self) -> &str {
        let name = match self {
            TacDecl::Var(var) => &var.name,
            TacDecl::Proc(proc) => &proc.name,
        };
        name.strip_prefix('@').unwrap_or(name)
    }
}

impl std::fmt::Display for TacDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TacDecl::Var(var) => writeln!(f, "var {} = {}", var.name, var.init),
            TacDecl::Proc(proc) => {
                writeln!(f, "proc {}({}):", proc.name, proc.args.join(", "))?;
                for item in &proc.body {
                    match item {
                        BodyItem::Label(label) => writeln!(f, "{}:", label)?,
                        BodyItem::Instr(instr) => writeln!(f, "    {}", instr)?,
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> Vec<TacDecl> {
        vec![
            TacDecl::Var(TacVar {
                name: "@counter".to_string(),
                init: -3,
            }),
            TacDecl::Proc(TacProc {
                name: "@main".to_string(),
                depth: 0,
                args: vec![],
                body: vec![
                    BodyItem::Instr(Instr::new(
                        Opcode::Const,
                        vec![Arg::Imm(42)],
                        Some("%0".to_string()),
                    )),
                    BodyItem::Instr(Instr::new(
                        Opcode::Param,
                        vec![Arg::Imm(1), Arg::name("%0")],
                        None,
                    )),
                    BodyItem::Instr(Instr::new(
                        Opcode::Call,
                        vec![Arg::name("print_int"), Arg::Imm(1)],
                        None,
                    )),
                    BodyItem::Label(".L1".to_string()),
                    BodyItem::Instr(Instr::new(Opcode::Jmp, vec![Arg::name(".L1")], None)),
                    BodyItem::Instr(Instr::new(Opcode::Ret, vec![Arg::Imm(0)], None)),
                ],
            }),
        ]
    }

    #[test]
    fn test_json_round_trip() {
        let program = sample_program();
        let json = serde_json::to_string(&program).expect("serialize");
        let parsed: Vec<TacDecl> = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, program);
    }

    #[test]
    fn test_labels_serialize_as_bare_strings() {
        let program = sample_program();
        let json = serde_json::to_value(&program).expect("serialize");
        let body = &json[1]["body"];
        assert_eq!(body[3], serde_json::json!(".L1:"));
    }

    #[test]
    fn test_instr_fields_always_present() {
        let instr = Instr::new(Opcode::Const, vec![Arg::Imm(7)], Some("%2".to_string()));
        let json = serde_json::to_value(&instr).expect("serialize");
        assert_eq!(json["opcode"], serde_json::json!("const"));
        assert_eq!(json["args"], serde_json::json!([7]));
        assert_eq!(json["result"], serde_json::json!("%2"));
        assert_eq!(json["link_depth"], serde_json::Value::Null);
    }

    #[test]
    fn test_var_and_proc_objects_distinguished() {
        let json = r#"[{"var": "@g", "init": 5},
                       {"proc": "@main", "depth": 0, "args": [], "body": []}]"#;
        let parsed: Vec<TacDecl> = serde_json::from_str(json).expect("parse");
        assert!(matches!(&parsed[0], TacDecl::Var(v) if v.init == 5));
        assert!(matches!(&parsed[1], TacDecl::Proc(p) if p.name == "@main"));
        assert_eq!(parsed[0].symbol(), "g");
        assert_eq!(parsed[1].symbol(), "main");
    }

    #[test]
    fn test_display_formatting() {
        let instr = Instr::new(
            Opcode::Sub,
            vec![Arg::name("%4"), Arg::name("%3")],
            Some("%5".to_string()),
        );
        assert_eq!(instr.to_string(), "%5 = sub %4, %3");

        let call = Instr::new(Opcode::Call, vec![Arg::name("print_int"), Arg::Imm(1)], None);
        assert_eq!(call.to_string(), "call print_int, 1");
    }
}
