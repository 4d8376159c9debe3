//! Full source-to-stdout scenarios, driven through the compiled `wisp`
//! binary rather than the library crate directly: `OP_PRINT` writes straight
//! to the process's real stdout (see `src/vm.rs`), so the only way to
//! observe it without reshaping the VM around an injected writer is to run
//! the program and capture its output, the same way the teacher's REPL
//! spawns a subprocess against a temp source file instead of reusing its
//! own in-process interpreter directly.

use std::fs;
use std::process::{Command, Output};

fn run_source(name: &str, source: &str) -> Output {
    let path = std::env::temp_dir().join(format!("wisp_e2e_{}_{}.wisp", std::process::id(), name));
    fs::write(&path, source).expect("failed to write temp source file");
    let output = Command::new(env!("CARGO_BIN_EXE_wisp"))
        .arg(&path)
        .output()
        .expect("failed to run wisp binary");
    let _ = fs::remove_file(&path);
    output
}

fn stdout(name: &str, source: &str) -> String {
    let output = run_source(name, source);
    assert!(output.status.success(), "expected success, stderr: {}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).expect("stdout was not utf8")
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(stdout("arith", "print 1 + 2 * 3;\n"), "7\n");
}

#[test]
fn global_string_concatenation() {
    let source = r#"
        var a = "hi";
        var b = " there";
        print a + b;
    "#;
    assert_eq!(stdout("strings", source), "hi there\n");
}

#[test]
fn lexical_scope_shadowing() {
    let source = r#"
        var x = 1;
        {
            var x = 2;
            print x;
        }
        print x;
    "#;
    assert_eq!(stdout("shadow", source), "2\n1\n");
}

#[test]
fn closure_captures_loop_variable() {
    let source = r#"
        fun makeCounter() {
            var count = 0;
            fun count_up() {
                count = count + 1;
                print count;
            }
            return count_up;
        }
        var counter = makeCounter();
        counter();
        counter();
        counter();
    "#;
    assert_eq!(stdout("closure", source), "1\n2\n3\n");
}

#[test]
fn class_with_initializer_and_method() {
    let source = r#"
        class A {
            init(n) {
                this.n = n;
            }
            show() {
                print this.n;
            }
        }
        A(42).show();
    "#;
    assert_eq!(stdout("class_init", source), "42\n");
}

#[test]
fn inheritance_with_super() {
    let source = r#"
        class A {
            speak() {
                print "A";
            }
        }
        class B < A {
            speak() {
                super.speak();
                print "B";
            }
        }
        B().speak();
    "#;
    assert_eq!(stdout("inherit", source), "A\nB\n");
}

#[test]
fn undefined_global_read_is_runtime_error() {
    let output = run_source("undef_global", "print missing;\n");
    assert_eq!(output.status.code(), Some(70));
}

#[test]
fn self_referencing_initializer_is_compile_error() {
    let output = run_source("self_init", "var a = a;\n");
    assert_eq!(output.status.code(), Some(65));
}

#[test]
fn top_level_return_is_compile_error() {
    let output = run_source("top_return", "return 1;\n");
    assert_eq!(output.status.code(), Some(65));
}

#[test]
fn calling_a_number_is_runtime_error() {
    let output = run_source("call_number", "var n = 1;\nn();\n");
    assert_eq!(output.status.code(), Some(70));
}
