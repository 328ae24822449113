//! The compiler driver.  Takes a source file and prints the requested
//! stage: tokens, parse tree, symbol table, high-level IR, or (by
//! default) low-level x86-64 code.

use clap::Parser;

use cflat::back;
use cflat::common::{CompileError, Context, Result};
use cflat::front;
use cflat::front::lex::Lexer;
use cflat::middle;
use cflat::middle::cfg::ControlFlowGraph;
use cflat::middle::codegen::FunctionCode;
use cflat::middle::ir::format_hl_sequence;
use cflat::middle::{lvn, regalloc};

// clap's default help short flag would shadow -h (print high-level
// code), so help is reachable only through the usage text.
#[derive(Debug, Parser)]
#[command(version, about, disable_help_flag = true)]
struct Args {
    /// the input file
    file: String,
    /// print tokens
    #[arg(short = 'l', group = "mode")]
    tokens: bool,
    /// print the parse tree
    #[arg(short = 'p', group = "mode")]
    parse_tree: bool,
    /// perform semantic analysis and print the symbol table
    #[arg(short = 'a', group = "mode")]
    analyze: bool,
    /// print the result of high-level code generation
    #[arg(short = 'h', group = "mode")]
    highlevel: bool,
    /// turn on optimizations
    #[arg(short = 'O')]
    optimize: bool,
}

fn usage() -> ! {
    eprintln!(
        "Usage: cflatc [options...] <filename>\n\
         Options:\n\
         \x20 -l   print tokens\n\
         \x20 -p   print parse tree\n\
         \x20 -a   perform semantic analysis, print symbol table\n\
         \x20 -h   print results of high-level code generation\n\
         \x20 -O   enable optimizations"
    );
    std::process::exit(1);
}

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(_) => usage(),
    };
    if let Err(err) = run(&args) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let input = std::fs::read_to_string(&args.file)
        .map_err(|e| CompileError::runtime(format!("cannot read {}: {e}", args.file)))?;

    if args.tokens {
        let tokens = Lexer::new(&input, &args.file).tokenize()?;
        for tok in tokens {
            println!("{tok}");
        }
        return Ok(());
    }

    let mut unit = front::parse(&input, &args.file)?;
    if args.parse_tree {
        print!("{}", unit.tree_string());
        return Ok(());
    }

    let mut ctx = Context::new();
    front::analyze(&mut unit, &mut ctx)?;
    if args.analyze {
        print!("{}", ctx.symtab.dump());
        return Ok(());
    }

    middle::allocate_storage(&mut unit, &mut ctx)?;
    let funcs = middle::generate_unit(&unit, &mut ctx)?;

    if args.highlevel {
        for s in &ctx.strings {
            println!("{}: .string \"{}\"", s.label, s.raw);
        }
        for func in &funcs {
            let seq = if args.optimize {
                optimized_hl(func)?
            } else {
                func.iseq.clone()
            };
            println!("{}:", func.name);
            print!("{}", format_hl_sequence(&seq));
        }
        return Ok(());
    }

    let mut ll_funcs = Vec::new();
    for func in &funcs {
        ll_funcs.push(back::generate(func, args.optimize)?);
    }
    print!("{}", back::emit_module(&ll_funcs, &ctx));
    Ok(())
}

/// The high-level code after the optimization pipeline, with register
/// bindings decorating the operands.
fn optimized_hl(func: &FunctionCode) -> Result<cflat::middle::ir::HlSequence> {
    let cfg = ControlFlowGraph::build(&func.iseq)?;
    let cfg = lvn::optimize(&cfg);
    let alloc = regalloc::allocate(&cfg, func)?;
    Ok(alloc.cfg.create_instruction_sequence())
}
