//! BX Compiler CLI
//!
//! Compiles a `.bx` source file to a TAC JSON dump and native assembly.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{Shell, generate};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process;

use bxc::{CompilerConfig, Reporter, Target, compile_source};

#[derive(ClapParser)]
#[command(name = "bxc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "BX compiler - compile .bx programs to TAC and assembly", long_about = None)]
struct Cli {
    /// Input .bx source file
    input: Option<PathBuf>,

    /// Target to emit assembly for
    #[arg(long, value_enum, default_value_t = Target::host_default())]
    target: Target,

    /// Assembly output path ('-' for stdout; defaults to a sibling .s file)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print the TAC to stdout
    #[arg(long)]
    dump_tac: bool,

    /// Stop after writing the TAC JSON dump
    #[arg(long)]
    no_asm: bool,

    /// Generate a shell completion script and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "bxc", &mut io::stdout());
        return;
    }

    let Some(input) = cli.input else {
        eprintln!("error: no input file given");
        process::exit(2);
    };
    if input.extension().is_none_or(|e| e != "bx") {
        eprintln!("error: expected a '.bx' file, got {}", input.display());
        process::exit(2);
    }

    let source = match std::fs::read_to_string(&input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", input.display(), e);
            process::exit(1);
        }
    };

    let mut config = CompilerConfig::new().with_target(cli.target);
    if cli.no_asm {
        config = config.tac_only();
    }

    let mut reporter = Reporter::new();
    let artifacts = match compile_source(&source, &config, &mut reporter) {
        Ok(artifacts) => artifacts,
        Err(stage) => {
            for diagnostic in reporter.diagnostics() {
                eprintln!("[ error ] {}", diagnostic);
            }
            eprintln!("error: {}", stage);
            process::exit(1);
        }
    };

    if cli.dump_tac {
        for decl in &artifacts.tac {
            print!("{}", decl);
        }
    }

    let tac_path = input.with_extension("tac.json");
    if let Err(e) = write_tac_json(&artifacts.tac, &tac_path) {
        eprintln!("error: cannot write {}: {}", tac_path.display(), e);
        process::exit(1);
    }

    if let Some(asm) = &artifacts.asm {
        let asm_path = cli.output.unwrap_or_else(|| input.with_extension("s"));
        if asm_path == Path::new("-") {
            print!("{}", asm);
        } else if let Err(e) = std::fs::write(&asm_path, asm) {
            eprintln!("error: cannot write {}: {}", asm_path.display(), e);
            process::exit(1);
        } else {
            println!(
                "Compiled {} -> {} + {}",
                input.display(),
                tac_path.display(),
                asm_path.display()
            );
        }
    } else {
        println!("Compiled {} -> {}", input.display(), tac_path.display());
    }
}

fn write_tac_json(tac: &[bxc::TacDecl], path: &Path) -> io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, tac)?;
    writer.flush()
}
