//! # Wisp REPL
//!
//! Interactive read-eval-print loop. Grounded on the teacher's `repl.rs`
//! brace-depth multi-line buffering almost verbatim, but in-process: the
//! teacher spawns a child process per block and diffs its stdout, which
//! exists only because OMG's REPL and script paths were two separate
//! embedded-bytecode entry points into the same binary. Wisp's compiler and
//! VM already live in-process, so each line is compiled and run directly
//! against one persistent [`Vm`] (globals carry over between lines, as
//! clox's `repl()` in `main.c` does).

use std::io::{self, Write};

use crate::vm::Vm;

pub fn run() {
    println!("Wisp {}", env!("CARGO_PKG_VERSION"));
    println!("Type `exit` or `quit` to leave.");

    let mut vm = Vm::new();
    let mut buffer: Vec<String> = Vec::new();
    let mut brace_depth: i32 = 0;

    loop {
        let prompt = if buffer.is_empty() { "> " } else { "... " };
        print!("{}", prompt);
        io::stdout().flush().ok();

        let mut line = String::new();
        if io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            println!();
            break;
        }

        let trimmed = line.trim();
        if buffer.is_empty() && (trimmed == "exit" || trimmed == "quit") {
            break;
        }

        let mut in_string = false;
        let mut escape = false;
        for ch in line.chars() {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '{' if !in_string => brace_depth += 1,
                '}' if !in_string => brace_depth -= 1,
                _ => {}
            }
        }

        buffer.push(line);
        if brace_depth > 0 {
            continue;
        }

        let source = buffer.join("");
        vm.interpret(&source);
        buffer.clear();
        brace_depth = 0;
    }
}
