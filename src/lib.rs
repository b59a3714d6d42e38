//! Determa - a small statically-typed, garbage-collected scripting language
//!
//! The pipeline runs each stage to completion before the next starts:
//! source → tokens → AST → type check → bytecode → VM execution.

pub mod token;
pub mod lexer;
pub mod parser;
pub mod ast;
pub mod symbol;
pub mod typechecker;
pub mod bytecode;
pub mod value;
pub mod gc;
pub mod compiler;
pub mod vm;
pub mod error;

pub use error::{DetError, Result};
pub use lexer::Lexer;
pub use parser::Parser;
pub use value::Value;

/// Version of the Determa language
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Release codename
pub const VERSION_NAME: &str = "Spruce";

/// A persistent language session: the VM (with its heap and global
/// slots), the type environment, and the global name→slot table all
/// survive across `run` calls, so an interactive prompt can build on
/// earlier lines. Independent pipelines get independent `Runtime`s.
pub struct Runtime {
    vm: vm::VM,
    symbols: symbol::SymbolTable,
    globals: compiler::Globals,
    pda_debug: bool,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            vm: vm::VM::new(),
            symbols: symbol::SymbolTable::new(),
            globals: compiler::Globals::new(),
            pda_debug: false,
        }
    }

    /// Enable the parser's PDA descent trace for this session
    pub fn with_pda_debug(mut self, enabled: bool) -> Self {
        self.pda_debug = enabled;
        self
    }

    /// Access the heap, e.g. to render a result value
    pub fn heap(&self) -> &gc::Heap {
        &self.vm.heap
    }

    /// Run a source string under this session's state.
    ///
    /// Returns `Some(value)` when the script produced a result (its last
    /// statement was an expression statement or a valued return), `None`
    /// otherwise. All collected errors of the failing stage are returned
    /// together; later stages do not run.
    pub fn run(&mut self, source: &str) -> std::result::Result<Option<Value>, Vec<DetError>> {
        let tokens = Lexer::new(source).tokenize();
        let program = Parser::new(tokens).with_trace(self.pda_debug).parse()?;

        // The checker works on a copy; commit only after a clean pass
        self.symbols = typechecker::TypeChecker::check(&program, &self.symbols)?;

        let (script, has_result) = compiler::Compiler::new(&mut self.globals, &mut self.vm.heap)
            .compile(&program)
            .map_err(|e| vec![e])?;

        let value = self.vm.interpret(script).map_err(|e| vec![e])?;

        Ok(if has_result { Some(value) } else { None })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to run Determa code in a fresh session
pub fn run(source: &str) -> std::result::Result<Option<Value>, Vec<DetError>> {
    Runtime::new().run(source)
}
