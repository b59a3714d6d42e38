//! Determa CLI and REPL
//!
//! Usage:
//!   determa                  - Start interactive REPL
//!   determa script.det       - Execute a script file
//!   determa -d script.det    - Run with PDA debug tracing
//!   determa -h | --help      - Show help

use std::env;
use std::fs;
use std::process;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use determa::{Runtime, VERSION, VERSION_NAME};

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut pda_debug = false;
    let mut file: Option<&str> = None;

    for arg in &args[1..] {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return;
            }
            "-v" | "--version" => {
                print_version();
                return;
            }
            "-d" | "--pda-debug" => {
                pda_debug = true;
            }
            _ => {
                if file.is_some() || arg.starts_with('-') {
                    eprintln!("{} unknown argument '{}'", "Error:".red().bold(), arg);
                    print_help();
                    process::exit(1);
                }
                file = Some(arg.as_str());
            }
        }
    }

    match file {
        Some(path) => run_file(path, pda_debug),
        None => run_repl(pda_debug),
    }
}

fn print_version() {
    println!("{} v{} '{}'", "Determa".cyan().bold(), VERSION, VERSION_NAME);
    println!("{}", "A statically-typed, garbage-collected language.".dimmed());
}

fn print_help() {
    print_version();
    println!();
    println!("{}", "USAGE:".yellow());
    println!("  determa [options] [file]");
    println!();
    println!("{}", "OPTIONS:".yellow());
    println!("  {}        Show this help message", "-h, --help".green());
    println!("  {}     Show version information", "-v, --version".green());
    println!("  {}   Enable parser/PDA stack trace logging", "-d, --pda-debug".green());
    println!();
    println!("{}", "EXAMPLES:".yellow());
    println!("  {}                  Start interactive REPL", "determa".cyan());
    println!("  {}       Run a script file", "determa script.det".cyan());
    println!("  {}    Run with debug mode", "determa -d script.det".cyan());
}

fn run_file(path: &str, pda_debug: bool) {
    if !path.ends_with(".det") {
        println!("{} expected a '.det' file", "Warning:".yellow());
    }

    let source = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("{} cannot read file '{}': {}", "Error:".red().bold(), path, e);
            process::exit(1);
        }
    };

    let mut runtime = Runtime::new().with_pda_debug(pda_debug);

    if let Err(errors) = runtime.run(&source) {
        for error in errors {
            eprintln!("{}", error.to_string().red());
        }
        process::exit(1);
    }
}

fn run_repl(pda_debug: bool) {
    println!(
        "{} {} {}",
        "Determa".cyan().bold(),
        format!("v{} '{}'", VERSION, VERSION_NAME).cyan(),
        "- A statically-typed, garbage-collected language".dimmed()
    );
    println!(
        "Type {} to exit, {} for help\n",
        "exit".yellow(),
        "help".yellow()
    );

    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{} failed to start line editor: {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    // One session for the whole prompt: globals, types and heap persist
    let mut runtime = Runtime::new().with_pda_debug(pda_debug);

    loop {
        match rl.readline(&format!("{} ", "det>".green().bold())) {
            Ok(line) => {
                let line = line.trim();

                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    "exit" | "quit" => {
                        println!("{}", "Goodbye!".cyan());
                        break;
                    }
                    "help" => {
                        print_repl_help();
                        continue;
                    }
                    "clear" => {
                        print!("\x1B[2J\x1B[1;1H");
                        continue;
                    }
                    _ => {}
                }

                match runtime.run(line) {
                    Ok(Some(value)) => {
                        println!(
                            "{} {}",
                            "=>".dimmed(),
                            value.display(runtime.heap()).cyan()
                        );
                    }
                    Ok(None) => {}
                    Err(errors) => {
                        for error in errors {
                            eprintln!("{}", error.to_string().red());
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".dimmed());
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red().bold(), err);
                break;
            }
        }
    }
}

fn print_repl_help() {
    println!("{}", "REPL Commands:".yellow());
    println!("  exit, quit   Exit the REPL");
    println!("  clear        Clear the screen");
    println!("  help         Show this help\n");
    println!("{}", "Language Examples:".yellow());
    println!("  var x = 10;");
    println!("  print x + 1;");
    println!("  if x > 5 {{ print \"big\"; }} else {{ print \"small\"; }}");
    println!("  func double(n): int {{ return n * 2; }}");
    println!("  double(21);");
}
