//! Command-line driver for the Ace bytecode virtual machine (§6.5 "Command-line interface").
//!
//! Two subcommands, each a thin wrapper over a single [`ace_vm`] entry point:
//! - `run` loads a bytecode file and drives it to completion with
//!   [`ace_vm::dispatcher::run_thread`].
//! - `disassemble` renders a bytecode file to text with [`ace_vm::program::disassemble`],
//!   without executing anything.
//!
//! There is no bare `ace-cli <file>` form and no `-c`/compile-only form: both need a compiler
//! front end (lexer, parser, codegen) that lives outside this workspace, so a bare invocation
//! just prints the usage notice below rather than pretending to be a REPL.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use ace_vm::dispatcher::run_thread;
use ace_vm::program::{disassemble, Program};
use ace_vm::state::VMState;
use ace_vm::thread::ThreadId;
use ace_vm::VmError;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ace-cli", about = "Run or disassemble Ace bytecode files", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a bytecode file's main thread to completion.
    Run {
        /// Path to an already-assembled bytecode file.
        bytecode_file: PathBuf,
    },
    /// Decode a bytecode file into a human-readable listing without executing it.
    Disassemble {
        /// Path to an already-assembled bytecode file.
        bytecode_file: PathBuf,
        /// Write the listing here instead of standard output.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        print_usage_notice();
        return ExitCode::SUCCESS;
    };

    let result = match command {
        Command::Run { bytecode_file } => run(&bytecode_file),
        Command::Disassemble { bytecode_file, output } => {
            disassemble_file(&bytecode_file, output.as_deref()).map(|()| Outcome::Ok)
        }
    };

    match result {
        Ok(Outcome::Ok) => ExitCode::SUCCESS,
        // already reported through the VM's own output sink (§4.6, §7); stderr would just
        // print the same "unhandled exception: ..." line a second time.
        Ok(Outcome::UnhandledException) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("ace-cli: {err}");
            ExitCode::FAILURE
        }
    }
}

/// What a subcommand did, beyond the plain success/failure an `anyhow::Result` already carries
/// — specifically, whether `run` already wrote its own diagnostic to the output sink and so
/// `main` must not print anything further for it.
enum Outcome {
    Ok,
    UnhandledException,
}

fn print_usage_notice() {
    eprintln!("ace-cli: no subcommand given");
    eprintln!();
    eprintln!("usage:");
    eprintln!("    ace-cli run <bytecode-file>");
    eprintln!("    ace-cli disassemble <bytecode-file> [-o <output-file>]");
    eprintln!();
    eprintln!("ace-cli drives already-assembled bytecode; it does not compile Ace source.");
}

fn run(bytecode_file: &Path) -> anyhow::Result<Outcome> {
    let bytecode = std::fs::read(bytecode_file)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", bytecode_file.display()))?;
    let program = Arc::new(Program::new(bytecode, 0));
    let vm = Arc::new(VMState::new());

    match run_thread(&vm, &program, ThreadId::MAIN, program.entry_point) {
        Ok(()) => {
            if vm.lock().good {
                Ok(Outcome::Ok)
            } else {
                anyhow::bail!("program ran to completion but left the VM in a bad state")
            }
        }
        // run_thread already wrote the "unhandled exception: ..." line through the output
        // sink (Stdout here); there is nothing left for main to print.
        Err(VmError::Unhandled(_)) => Ok(Outcome::UnhandledException),
        Err(err) => Err(err.into()),
    }
}

fn disassemble_file(bytecode_file: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let bytecode = std::fs::read(bytecode_file)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", bytecode_file.display()))?;

    let mut listing = String::new();
    for line in disassemble(&bytecode) {
        listing.push_str(&format!("{:>6}: {}\n", line.address, line.text));
    }

    match output {
        Some(path) => std::fs::write(path, listing)
            .map_err(|e| anyhow::anyhow!("writing {}: {e}", path.display()))?,
        None => print!("{listing}"),
    }

    Ok(())
}
