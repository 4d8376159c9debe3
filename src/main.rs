//! Wisp runtime entry point.
//!
//! Grounded on the teacher's `main.rs` flag-handling shape (manual
//! `env::args()` dispatch, `-h/--help`/`-v/--version`, bare-path script
//! mode, no-args REPL) with the `.omgb`/embedded-interpreter bytecode-file
//! branch dropped — Wisp has no persisted bytecode format.

use std::env;
use std::fs;

use wisp_runtime::error::InterpretResult;
use wisp_runtime::vm::Vm;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn usage() -> String {
    format!(
        r#"Wisp v{0}

Usage:
    wisp                run the interactive REPL
    wisp <script>       run a Wisp source file

Options:
    -h, --help          show this help message and exit
    -v, --version       show the runtime version"#,
        VERSION
    )
}

fn run_file(path: &str) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Could not read file \"{}\": {}", path, e);
            return 74;
        }
    };
    let mut vm = Vm::new();
    match vm.interpret(&source) {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => 65,
        InterpretResult::RuntimeError => 70,
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() == 1 {
        wisp_runtime::repl::run();
        return;
    }

    if args[1] == "-h" || args[1] == "--help" {
        println!("{}", usage());
        return;
    }

    if args[1] == "-v" || args[1] == "--version" {
        println!("wisp {}", VERSION);
        return;
    }

    if args.len() > 2 {
        eprintln!("Usage: wisp [path]");
        std::process::exit(64);
    }

    std::process::exit(run_file(&args[1]));
}
