//! the main compiler binary. takes a source file, an optional output format
//! (assembly by default), and optimization flags.
//!
//! run with `--help` for more info.

use std::io::IsTerminal;
use std::process::exit;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use minic::back;
use minic::common::arena::Arena;
use minic::common::Id;
use minic::diag::{Diagnostics, SourceManager};
use minic::driver;
use minic::front::{self, lex};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Output::Asm)]
    out: Output,
    /// write the result to this path instead of standard output
    #[arg(long)]
    output: Option<String>,
    /// turn on optimizations
    #[arg(short = 'O', default_value_t = false)]
    optimize: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// the three-address IR
    Ir,
    /// the machine IR, before register allocation
    Mir,
    /// the resulting assembly code
    Asm,
}

fn main() {
    use Output::*;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let input = match std::fs::read_to_string(&args.file) {
        Ok(input) => input,
        Err(err) => {
            eprintln!("error: cannot read '{}': {err}", args.file);
            exit(1);
        }
    };
    let file = Id::new(args.file.clone());
    let sources = SourceManager::new(&input, file);

    match args.out {
        Tokens => {
            let mut lexer = lex::Lexer::new(&input);
            loop {
                match lexer.next() {
                    Ok(Some(token)) => println!("{token}"),
                    Ok(None) => break,
                    Err(err) => {
                        eprintln!("{err}");
                        exit(1);
                    }
                }
            }
        }
        Ast => {
            let arena = Arena::new();
            match front::parse(&arena, file, &input) {
                Ok(program) => println!("{program:#?}"),
                Err(err) => {
                    eprintln!("{err}");
                    exit(1);
                }
            }
        }
        Ir => match build_ir(&input, &sources) {
            Ok(ir) => print!("{ir}"),
            Err(code) => exit(code),
        },
        Mir => {
            let ir = match build_ir(&input, &sources) {
                Ok(ir) => ir,
                Err(code) => exit(code),
            };
            match back::codegen::generate(&ir) {
                Ok(mir) => print!("{mir}"),
                Err(err) => {
                    eprintln!("{err}");
                    exit(1);
                }
            }
        }
        Asm => {
            let mut diags = Diagnostics::new();
            let result = driver::compile(&input, &sources, args.optimize, &mut diags);
            let colored = std::io::stderr().is_terminal();
            eprint!("{}", diags.render_all(colored));
            match result {
                Ok(asm) => emit_output(&asm, args.output.as_deref()),
                Err(driver::CompileError::Semantic(_)) => exit(1),
                Err(err) => {
                    eprintln!("{err}");
                    exit(1);
                }
            }
        }
    }
}

fn build_ir(input: &str, sources: &SourceManager) -> Result<minic::middle::ir::Program, i32> {
    let arena = Arena::new();
    let program = match front::parse(&arena, sources.file(), input) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{err}");
            return Err(1);
        }
    };
    let mut diags = Diagnostics::new();
    front::analyze(&program, sources, &mut diags);
    if diags.has_errors() {
        eprint!("{}", diags.render_all(std::io::stderr().is_terminal()));
        return Err(1);
    }
    Ok(front::lower(&program))
}

fn emit_output(asm: &str, path: Option<&str>) {
    match path {
        Some(path) => {
            if let Err(err) = std::fs::write(path, asm) {
                eprintln!("error: cannot write '{path}': {err}");
                exit(1);
            }
        }
        None => print!("{asm}"),
    }
}
