//! Compiler: AST → Bytecode
//!
//! A single recursive walk over the type-checked AST, emitting into a
//! per-function chunk. Names resolve to local stack slots (innermost
//! first) or to dense global slot indices; forward jumps are patched
//! after their targets are known.

use crate::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::bytecode::{Chunk, OpCode};
use crate::error::{DetError, ErrorKind, Result};
use crate::gc::{Handle, Heap};
use crate::token::Span;
use crate::value::{Function, Value};
use std::rc::Rc;

/// Per-function cap on locals; slots are single-byte operands
const LOCALS_MAX: usize = 256;

/// Persistent mapping from global names to dense slot indices. Lives on
/// the session context so an interactive prompt can keep referring to
/// globals declared on earlier lines. Redeclaring a name reuses its slot.
#[derive(Debug, Default)]
pub struct Globals {
    names: Vec<String>,
}

impl Globals {
    pub fn new() -> Self {
        Self { names: Vec::new() }
    }

    pub fn resolve(&self, name: &str) -> Option<u8> {
        self.names.iter().position(|n| n == name).map(|i| i as u8)
    }

    pub fn define(&mut self, name: &str, span: Span) -> Result<u8> {
        if let Some(slot) = self.resolve(name) {
            return Ok(slot);
        }
        if self.names.len() >= 256 {
            return Err(DetError::new(ErrorKind::TooManyGlobals, Some(span)));
        }
        self.names.push(name.to_string());
        Ok((self.names.len() - 1) as u8)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Local variable in scope
#[derive(Debug, Clone)]
struct Local {
    name: String,
    depth: usize,
}

/// Function being compiled
struct FunctionCompiler {
    name: Option<String>,
    arity: usize,
    chunk: Chunk,
    locals: Vec<Local>,
    scope_depth: usize,
}

impl FunctionCompiler {
    fn new(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            arity: 0,
            chunk: Chunk::new(),
            // Slot 0 is reserved for the callee itself. Naming it after
            // the function lets a body refer to itself (recursion) even
            // before the declaration finishes.
            locals: vec![Local {
                name: name.unwrap_or("").to_string(),
                depth: 0,
            }],
            scope_depth: 0,
        }
    }
}

/// The bytecode compiler
pub struct Compiler<'a> {
    /// Stack of function compilers (for nested declarations)
    compilers: Vec<FunctionCompiler>,
    globals: &'a mut Globals,
    heap: &'a mut Heap,
}

impl<'a> Compiler<'a> {
    pub fn new(globals: &'a mut Globals, heap: &'a mut Heap) -> Self {
        Self {
            compilers: vec![FunctionCompiler::new(None)],
            globals,
            heap,
        }
    }

    /// Compile a program into the implicit script function. Returns the
    /// function handle and whether the script leaves a result value on
    /// the stack (its last statement was an expression statement or a
    /// valued return).
    pub fn compile(&mut self, program: &Program) -> Result<(Handle, bool)> {
        let count = program.statements.len();
        let mut has_result = false;

        for (i, stmt) in program.statements.iter().enumerate() {
            let is_last = i + 1 == count;

            if is_last {
                match stmt {
                    // The final expression statement keeps its value on
                    // the stack: it becomes the script result
                    Stmt::Expr { expr } => {
                        self.compile_expr(expr)?;
                        self.emit(OpCode::Return, expr.span().line);
                        has_result = true;
                        continue;
                    }
                    Stmt::Return { value: Some(_), .. } => {
                        has_result = true;
                    }
                    _ => {}
                }
            }

            self.compile_stmt(stmt)?;
        }

        if !has_result {
            // Default script result
            let span = Span::new(0, 0, 0, 0);
            self.emit_constant(Value::Int(0), span)?;
            self.emit(OpCode::Return, 0);
        }

        let compiler = self.compilers.pop().expect("script compiler present");
        let function = Function::new(None, 0, Rc::new(compiler.chunk));
        Ok((self.heap.alloc_function(function), has_result))
    }

    // ==================== Statements ====================

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr { expr } => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop, expr.span().line);
            }

            Stmt::VarDecl { name, init, span } => {
                let Some(init) = init else {
                    return Err(DetError::new(
                        ErrorKind::MissingInitializer(name.clone()),
                        Some(*span),
                    ));
                };
                self.compile_expr(init)?;

                if self.current().scope_depth == 0 {
                    let slot = self.globals.define(name, *span)?;
                    self.emit(OpCode::SetGlobal, span.line);
                    self.emit_byte(slot, span.line);
                    self.emit(OpCode::Pop, span.line);
                } else {
                    // The initializer's value stays on the stack; its
                    // slot is the local
                    self.add_local(name, *span)?;
                }
            }

            Stmt::Print { expr, span } => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Print, span.line);
            }

            Stmt::Block { stmts, .. } => {
                self.begin_scope();
                for stmt in stmts {
                    self.compile_stmt(stmt)?;
                }
                self.end_scope();
            }

            Stmt::If { condition, then_branch, else_branch, span } => {
                self.compile_expr(condition)?;

                let then_jump = self.emit_jump(OpCode::JumpIfFalse, span.line);
                self.emit(OpCode::Pop, span.line);
                self.compile_stmt(then_branch)?;

                let else_jump = self.emit_jump(OpCode::Jump, span.line);

                self.patch_jump(then_jump, *span)?;
                self.emit(OpCode::Pop, span.line);

                if let Some(else_stmt) = else_branch {
                    self.compile_stmt(else_stmt)?;
                }

                self.patch_jump(else_jump, *span)?;
            }

            Stmt::While { condition, body, span } => {
                let loop_start = self.current().chunk.len();

                self.compile_expr(condition)?;
                let exit_jump = self.emit_jump(OpCode::JumpIfFalse, span.line);
                self.emit(OpCode::Pop, span.line);

                self.compile_stmt(body)?;
                self.emit_loop(loop_start, *span)?;

                self.patch_jump(exit_jump, *span)?;
                self.emit(OpCode::Pop, span.line);
            }

            Stmt::Func { name, params, body, span, .. } => {
                // Reserve the global slot before compiling the body so a
                // recursive reference resolves
                let global_slot = if self.current().scope_depth == 0 {
                    Some(self.globals.define(name, *span)?)
                } else {
                    None
                };

                let mut fc = FunctionCompiler::new(Some(name.as_str()));
                fc.arity = params.len();
                self.compilers.push(fc);
                self.begin_scope();

                for param in params {
                    self.add_local(param, *span)?;
                }

                self.compile_stmt(body)?;

                // Falling off the end returns the default value
                self.emit_constant(Value::Int(0), *span)?;
                self.emit(OpCode::Return, span.line);

                let compiler = self.compilers.pop().expect("function compiler present");
                let function = Function::new(
                    compiler.name.clone(),
                    compiler.arity,
                    Rc::new(compiler.chunk),
                );
                let handle = self.heap.alloc_function(function);

                if let Some(slot) = global_slot {
                    self.emit_constant(Value::Obj(handle), *span)?;
                    self.emit(OpCode::SetGlobal, span.line);
                    self.emit_byte(slot, span.line);
                    self.emit(OpCode::Pop, span.line);
                } else {
                    // A local function: the object on the stack is the
                    // local's slot
                    self.emit_constant(Value::Obj(handle), *span)?;
                    self.add_local(name, *span)?;
                }
            }

            Stmt::Return { value, span } => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_constant(Value::Int(0), *span)?,
                }
                self.emit(OpCode::Return, span.line);
            }
        }

        Ok(())
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Int { value, span } => {
                self.emit_constant(Value::Int(*value), *span)?;
            }

            Expr::Str { value, span } => {
                let handle = self.heap.alloc_string(value.clone());
                self.emit_constant(Value::Obj(handle), *span)?;
            }

            Expr::Bool { value, span } => {
                self.emit(if *value { OpCode::True } else { OpCode::False }, span.line);
            }

            Expr::Var { name, span } => {
                self.compile_name_load(name, *span)?;
            }

            Expr::Assign { name, value, span } => {
                self.compile_expr(value)?;

                if let Some(slot) = self.resolve_local(name) {
                    self.emit(OpCode::SetLocal, span.line);
                    self.emit_byte(slot, span.line);
                } else if let Some(slot) = self.globals.resolve(name) {
                    self.emit(OpCode::SetGlobal, span.line);
                    self.emit_byte(slot, span.line);
                } else {
                    return Err(DetError::new(
                        ErrorKind::UndefinedVariable(name.clone()),
                        Some(*span),
                    ));
                }
                // The assigned value stays on the stack: assignment is
                // an expression
            }

            Expr::Unary { op, operand, span } => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Neg => self.emit(OpCode::Negate, span.line),
                    UnaryOp::Not => self.emit(OpCode::Not, span.line),
                }
            }

            Expr::Binary { left, op, right, span } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;

                let line = span.line;
                match op {
                    BinaryOp::Add => self.emit(OpCode::Add, line),
                    BinaryOp::Sub => self.emit(OpCode::Subtract, line),
                    BinaryOp::Mul => self.emit(OpCode::Multiply, line),
                    BinaryOp::Div => self.emit(OpCode::Divide, line),
                    BinaryOp::Mod => self.emit(OpCode::Modulo, line),
                    BinaryOp::Eq => self.emit(OpCode::Equal, line),
                    BinaryOp::Lt => self.emit(OpCode::Less, line),
                    BinaryOp::Gt => self.emit(OpCode::Greater, line),
                    // The remaining comparisons desugar in bytecode
                    BinaryOp::Ne => {
                        self.emit(OpCode::Equal, line);
                        self.emit(OpCode::Not, line);
                    }
                    BinaryOp::Ge => {
                        self.emit(OpCode::Less, line);
                        self.emit(OpCode::Not, line);
                    }
                    BinaryOp::Le => {
                        self.emit(OpCode::Greater, line);
                        self.emit(OpCode::Not, line);
                    }
                }
            }

            Expr::Call { name, args, span } => {
                self.compile_name_load(name, *span)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(OpCode::Call, span.line);
                self.emit_byte(args.len() as u8, span.line);
            }
        }

        Ok(())
    }

    /// Push a named value: innermost locals first, then globals
    fn compile_name_load(&mut self, name: &str, span: Span) -> Result<()> {
        if let Some(slot) = self.resolve_local(name) {
            self.emit(OpCode::GetLocal, span.line);
            self.emit_byte(slot, span.line);
        } else if let Some(slot) = self.globals.resolve(name) {
            self.emit(OpCode::GetGlobal, span.line);
            self.emit_byte(slot, span.line);
        } else {
            return Err(DetError::new(
                ErrorKind::UndefinedVariable(name.to_string()),
                Some(span),
            ));
        }
        Ok(())
    }

    // ==================== Emit Helpers ====================

    fn current(&mut self) -> &mut FunctionCompiler {
        self.compilers
            .last_mut()
            .expect("compiler stack is never empty")
    }

    fn emit(&mut self, op: OpCode, line: usize) {
        self.current().chunk.write(op, line);
    }

    fn emit_byte(&mut self, byte: u8, line: usize) {
        self.current().chunk.write_byte(byte, line);
    }

    fn emit_constant(&mut self, value: Value, span: Span) -> Result<()> {
        let idx = self.current().chunk.add_constant(value);
        if idx > u8::MAX as usize {
            return Err(DetError::new(ErrorKind::TooManyConstants, Some(span)));
        }
        self.emit(OpCode::Constant, span.line);
        self.emit_byte(idx as u8, span.line);
        Ok(())
    }

    /// Emit a jump with a placeholder operand; returns the operand offset
    fn emit_jump(&mut self, op: OpCode, line: usize) -> usize {
        self.emit(op, line);
        self.current().chunk.write_u16(0xFFFF, line);
        self.current().chunk.len() - 2
    }

    /// Point a previously emitted jump at the current position
    fn patch_jump(&mut self, offset: usize, span: Span) -> Result<()> {
        let jump = self.current().chunk.len() - offset - 2;
        if jump > u16::MAX as usize {
            return Err(DetError::new(ErrorKind::JumpTooLarge, Some(span)));
        }
        self.current().chunk.patch_u16(offset, jump as u16);
        Ok(())
    }

    fn emit_loop(&mut self, loop_start: usize, span: Span) -> Result<()> {
        self.emit(OpCode::Loop, span.line);
        let offset = self.current().chunk.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err(DetError::new(ErrorKind::LoopTooLarge, Some(span)));
        }
        self.current().chunk.write_u16(offset as u16, span.line);
        Ok(())
    }

    // ==================== Scope Management ====================

    fn begin_scope(&mut self) {
        self.current().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current().scope_depth -= 1;

        // Pop locals belonging to the closed scope off the stack
        while !self.current().locals.is_empty()
            && self.current().locals.last().map_or(0, |l| l.depth) > self.current().scope_depth
        {
            self.emit(OpCode::Pop, 0);
            self.current().locals.pop();
        }
    }

    fn add_local(&mut self, name: &str, span: Span) -> Result<()> {
        if self.current().locals.len() >= LOCALS_MAX {
            return Err(DetError::new(ErrorKind::TooManyLocals, Some(span)));
        }
        let depth = self.current().scope_depth;
        self.current().locals.push(Local {
            name: name.to_string(),
            depth,
        });
        Ok(())
    }

    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        let compiler = self.current();
        for (i, local) in compiler.locals.iter().enumerate().rev() {
            if local.name == name {
                return Some(i as u8);
            }
        }
        None
    }
}
