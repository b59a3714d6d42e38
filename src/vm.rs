//! Stack-based Virtual Machine for Determa
//!
//! Executes bytecode over a single operand stack. Each active call is a
//! CallFrame whose base indexes into that stack; slot 0 of every frame
//! holds the callee. Runtime errors carry a stack trace and leave the VM
//! empty but usable, so an interactive session survives them.

use std::rc::Rc;

use crate::bytecode::{Chunk, OpCode};
use crate::error::{DetError, ErrorKind, Result};
use crate::gc::{Handle, Heap};
use crate::value::Value;

/// Operand stack capacity hint
pub const STACK_MAX: usize = 256;

/// Maximum call depth
pub const FRAMES_MAX: usize = 64;

/// Number of global variable slots
pub const GLOBALS_MAX: usize = 256;

/// One active function invocation
struct CallFrame {
    /// The function object being run
    function: Handle,

    /// The function's chunk, cached so dispatch never touches the heap
    chunk: Rc<Chunk>,

    /// Instruction offset into the chunk
    ip: usize,

    /// Stack index where this frame's slots begin (slot 0 = callee)
    base: usize,
}

/// The Virtual Machine
pub struct VM {
    /// Operand stack
    stack: Vec<Value>,

    /// Call frames
    frames: Vec<CallFrame>,

    /// Global variables, indexed by compiler-assigned slot
    globals: [Value; GLOBALS_MAX],

    /// Garbage collected heap
    pub heap: Heap,
}

impl VM {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: [Value::Int(0); GLOBALS_MAX],
            heap: Heap::new(),
        }
    }

    /// Run a compiled script function to completion. Returns the script
    /// result (the value left on the stack at halt).
    pub fn interpret(&mut self, script: Handle) -> Result<Value> {
        self.stack.clear();
        self.frames.clear();

        let chunk = match self.heap.get_function(script) {
            Some(function) => Rc::clone(&function.chunk),
            None => return Err(DetError::new(ErrorKind::NotAFunction, None)),
        };

        // The script function occupies slot 0 of the bottom frame
        self.stack.push(Value::Obj(script));
        self.frames.push(CallFrame {
            function: script,
            chunk,
            ip: 0,
            base: 0,
        });

        self.run()
    }

    /// Mark-and-sweep over everything reachable from the VM's roots:
    /// the operand stack, the globals array, and the function objects of
    /// live call frames (their chunk constants are traced from there).
    pub fn collect_garbage(&mut self) {
        for value in &self.stack {
            for child in value.children() {
                self.heap.mark(child);
            }
        }

        for value in self.globals.iter() {
            for child in value.children() {
                self.heap.mark(child);
            }
        }

        for frame in &self.frames {
            self.heap.mark(frame.function);
        }

        self.heap.trace_references();
        self.heap.sweep();
    }

    // ==================== Execution Loop ====================

    fn run(&mut self) -> Result<Value> {
        loop {
            if self.heap.wants_gc() {
                self.collect_garbage();
            }

            let instruction = OpCode::from(self.read_byte());

            match instruction {
                OpCode::Constant => {
                    let idx = self.read_byte() as usize;
                    let value = self.current_chunk().constants[idx];
                    self.push(value);
                }

                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),

                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetGlobal => {
                    let idx = self.read_byte() as usize;
                    self.push(self.globals[idx]);
                }

                OpCode::SetGlobal => {
                    let idx = self.read_byte() as usize;
                    // Assignment is an expression: the value stays put
                    self.globals[idx] = self.peek(0);
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().base;
                    self.push(self.stack[base + slot]);
                }

                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().base;
                    self.stack[base + slot] = self.peek(0);
                }

                OpCode::Add => {
                    let b = self.pop();
                    let a = self.pop();

                    match (a, b) {
                        (Value::Int(x), Value::Int(y)) => {
                            self.push(Value::Int(x.wrapping_add(y)));
                        }
                        (Value::Obj(ha), Value::Obj(hb)) => {
                            let joined = match (self.heap.get_string(ha), self.heap.get_string(hb))
                            {
                                (Some(sa), Some(sb)) => Some(format!("{}{}", sa, sb)),
                                _ => None,
                            };
                            let Some(joined) = joined else {
                                return Err(self.runtime_error(ErrorKind::AddTypeMismatch));
                            };
                            let handle = self.heap.alloc_string(joined);
                            self.push(Value::Obj(handle));
                        }
                        _ => return Err(self.runtime_error(ErrorKind::AddTypeMismatch)),
                    }
                }

                OpCode::Subtract => self.binary_int_op(i32::wrapping_sub)?,
                OpCode::Multiply => self.binary_int_op(i32::wrapping_mul)?,

                OpCode::Divide => {
                    let b = self.pop();
                    let a = self.pop();
                    match (a, b) {
                        (Value::Int(_), Value::Int(0)) => {
                            return Err(self.runtime_error(ErrorKind::DivisionByZero));
                        }
                        (Value::Int(x), Value::Int(y)) => self.push(Value::Int(x.wrapping_div(y))),
                        _ => return Err(self.runtime_error(ErrorKind::OperandsMustBeInts)),
                    }
                }

                OpCode::Modulo => {
                    let b = self.pop();
                    let a = self.pop();
                    match (a, b) {
                        (Value::Int(_), Value::Int(0)) => {
                            return Err(self.runtime_error(ErrorKind::ModuloByZero));
                        }
                        (Value::Int(x), Value::Int(y)) => self.push(Value::Int(x.wrapping_rem(y))),
                        _ => return Err(self.runtime_error(ErrorKind::OperandsMustBeInts)),
                    }
                }

                OpCode::Negate => {
                    let value = self.pop();
                    match value {
                        Value::Int(n) => self.push(Value::Int(n.wrapping_neg())),
                        _ => return Err(self.runtime_error(ErrorKind::OperandMustBeInt)),
                    }
                }

                OpCode::Not => {
                    let value = self.pop();
                    match value {
                        Value::Bool(b) => self.push(Value::Bool(!b)),
                        _ => return Err(self.runtime_error(ErrorKind::OperandMustBeBool)),
                    }
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    let equal = self.values_equal(a, b);
                    self.push(Value::Bool(equal));
                }

                OpCode::Greater => {
                    let b = self.pop();
                    let a = self.pop();
                    match (a, b) {
                        (Value::Int(x), Value::Int(y)) => self.push(Value::Bool(x > y)),
                        _ => return Err(self.runtime_error(ErrorKind::OperandsMustBeInts)),
                    }
                }

                OpCode::Less => {
                    let b = self.pop();
                    let a = self.pop();
                    match (a, b) {
                        (Value::Int(x), Value::Int(y)) => self.push(Value::Bool(x < y)),
                        _ => return Err(self.runtime_error(ErrorKind::OperandsMustBeInts)),
                    }
                }

                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.current_frame_mut().ip += offset;
                }

                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    // Pop-less: the branches pop the condition themselves
                    if self.peek(0) == Value::Bool(false) {
                        self.current_frame_mut().ip += offset;
                    }
                }

                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.current_frame_mut().ip -= offset;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count);
                    self.call_value(callee, arg_count)?;
                }

                OpCode::Print => {
                    let value = self.pop();
                    println!("{}", value.display(&self.heap));
                }

                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("active frame");

                    // Discard the callee, arguments and locals
                    self.stack.truncate(frame.base);

                    if self.frames.is_empty() {
                        // Leave the script result on the stack and halt
                        self.stack.push(result);
                        return Ok(result);
                    }

                    self.push(result);
                }
            }
        }
    }

    // ==================== Calls ====================

    /// Stack layout at entry: [.. callee arg1 .. argN]
    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<()> {
        let Value::Obj(handle) = callee else {
            return Err(self.runtime_error(ErrorKind::NotAFunction));
        };

        let function = self
            .heap
            .get_function(handle)
            .map(|f| (f.arity, Rc::clone(&f.chunk)));
        let Some((arity, chunk)) = function else {
            return Err(self.runtime_error(ErrorKind::NotAFunction));
        };

        if arg_count != arity {
            return Err(self.runtime_error(ErrorKind::WrongArity(arity, arg_count)));
        }

        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error(ErrorKind::StackOverflow));
        }

        self.frames.push(CallFrame {
            function: handle,
            chunk,
            ip: 0,
            base: self.stack.len() - arg_count - 1,
        });

        Ok(())
    }

    // ==================== Equality & Arithmetic ====================

    /// Deep equality: tags first, then values. Heap objects take a
    /// same-handle fast path (interned strings always hit it) before
    /// byte comparison. Cross-type and function comparisons are false.
    fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Obj(ha), Value::Obj(hb)) => {
                if ha == hb {
                    return true;
                }
                match (self.heap.get_string(ha), self.heap.get_string(hb)) {
                    (Some(sa), Some(sb)) => sa.len() == sb.len() && sa == sb,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn binary_int_op(&mut self, op: impl Fn(i32, i32) -> i32) -> Result<()> {
        let b = self.pop();
        let a = self.pop();

        match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                self.push(Value::Int(op(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error(ErrorKind::OperandsMustBeInts)),
        }
    }

    // ==================== Errors ====================

    /// Build a runtime error with a stack trace, then reset the VM so
    /// the session stays usable.
    fn runtime_error(&mut self, kind: ErrorKind) -> DetError {
        let mut trace = Vec::new();

        for frame in self.frames.iter().rev() {
            // ip sits one past the faulting instruction
            let instruction = frame.ip.saturating_sub(1);
            let line = frame.chunk.lines.get(instruction).copied().unwrap_or(0);

            let name = self
                .heap
                .get_function(frame.function)
                .and_then(|f| f.name.clone());

            match name {
                Some(name) => trace.push(format!("[line {}] in {}()", line, name)),
                None => trace.push(format!("[line {}] in script", line)),
            }
        }

        self.stack.clear();
        self.frames.clear();

        DetError::new(kind, None).with_trace(trace)
    }

    // ==================== Helpers ====================

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("active frame");
        let byte = frame.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("active frame");
        let value = frame.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn current_chunk(&self) -> &Chunk {
        &self.frames.last().expect("active frame").chunk
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("active frame")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("active frame")
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, Globals};
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    /// Compile and run without the type checker, so runtime checks can
    /// be exercised directly
    fn run_vm(source: &str) -> (Result<Value>, VM) {
        let tokens = Lexer::new(source).tokenize();
        let program = Parser::new(tokens).parse().expect("parse failed");

        let mut vm = VM::new();
        let mut globals = Globals::new();
        let (script, _) = Compiler::new(&mut globals, &mut vm.heap)
            .compile(&program)
            .expect("compile failed");

        let result = vm.interpret(script);
        (result, vm)
    }

    fn run_ok(source: &str) -> Value {
        let (result, _) = run_vm(source);
        result.expect("execution failed")
    }

    fn run_err(source: &str) -> DetError {
        let (result, _) = run_vm(source);
        result.expect_err("expected runtime error")
    }

    #[test]
    fn test_arithmetic_via_return() {
        assert_eq!(run_ok("return 1 + 2;"), Value::Int(3));
        assert_eq!(run_ok("return -5 + 10;"), Value::Int(5));
        assert_eq!(run_ok("return 10 - 3;"), Value::Int(7));
        assert_eq!(run_ok("return 4 * 5;"), Value::Int(20));
        assert_eq!(run_ok("return 20 / 4;"), Value::Int(5));
        assert_eq!(run_ok("return 7 % 3;"), Value::Int(1));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(run_ok("var x = 10; var y = 20; x + y * 2;"), Value::Int(50));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run_ok("1 < 2;"), Value::Bool(true));
        assert_eq!(run_ok("2 <= 1;"), Value::Bool(false));
        assert_eq!(run_ok("5 > 3;"), Value::Bool(true));
        assert_eq!(run_ok("3 >= 4;"), Value::Bool(false));
        assert_eq!(run_ok("2 == 2;"), Value::Bool(true));
        assert_eq!(run_ok("1 != 2;"), Value::Bool(true));
    }

    #[test]
    fn test_string_concatenation_and_equality() {
        let (result, vm) = run_vm("\"Hello \" + \"World\";");
        let value = result.expect("execution failed");
        let Value::Obj(handle) = value else {
            panic!("expected heap value");
        };
        assert_eq!(
            vm.heap.get_string(handle).map(String::as_str),
            Some("Hello World")
        );

        assert_eq!(run_ok("\"a\" + \"b\" == \"ab\";"), Value::Bool(true));
        assert_eq!(run_ok("\"a\" == \"b\";"), Value::Bool(false));
    }

    #[test]
    fn test_locals_and_shadowing() {
        assert_eq!(run_ok("var a = 10; { var a = 99; } a;"), Value::Int(10));
        assert_eq!(run_ok("var a = 1; { var b = 2; a = a + b; } a;"), Value::Int(3));
    }

    #[test]
    fn test_if_else_and_elif() {
        let source = "
            var r = 0;
            var x = 7;
            if x > 10 { r = 1; }
            elif x > 5 { r = 2; }
            else { r = 3; }
            r;
        ";
        assert_eq!(run_ok(source), Value::Int(2));
    }

    #[test]
    fn test_while_loop() {
        let source = "
            var sum = 0;
            var i = 1;
            while i <= 5 {
                sum += i;
                i += 1;
            }
            sum;
        ";
        assert_eq!(run_ok(source), Value::Int(15));
    }

    #[test]
    fn test_function_call() {
        let source = "func add(a, b): int { return a + b; } add(400, 700);";
        assert_eq!(run_ok(source), Value::Int(1100));
    }

    #[test]
    fn test_recursion() {
        let source = "
            func fib(n): int {
                if n <= 1 { return n; }
                return fib(n - 1) + fib(n - 2);
            }
            fib(8);
        ";
        assert_eq!(run_ok(source), Value::Int(21));
    }

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(
            run_ok("2147483647 + 1;"),
            Value::Int(i32::MIN)
        );
    }

    #[test]
    fn test_division_by_zero() {
        let err = run_err("1 / 0;");
        assert!(matches!(err.kind, ErrorKind::DivisionByZero));
        assert_eq!(err.trace, vec!["[line 1] in script".to_string()]);
    }

    #[test]
    fn test_modulo_by_zero() {
        let err = run_err("1 % 0;");
        assert!(matches!(err.kind, ErrorKind::ModuloByZero));
    }

    #[test]
    fn test_wrong_arity_at_runtime() {
        // The type checker normally rejects this; the VM still verifies
        let err = run_err("func f(a, b): int { return a; } f(1);");
        assert!(matches!(err.kind, ErrorKind::WrongArity(2, 1)));
        assert!(err.trace.iter().any(|l| l.contains("in script")));
    }

    #[test]
    fn test_calling_non_function() {
        let err = run_err("var x = 1; x(2);");
        assert!(matches!(err.kind, ErrorKind::NotAFunction));
    }

    #[test]
    fn test_stack_overflow() {
        let err = run_err("func f(): int { return f(); } f();");
        assert!(matches!(err.kind, ErrorKind::StackOverflow));
        // Every live frame shows up in the trace
        assert_eq!(err.trace.len(), FRAMES_MAX);
    }

    #[test]
    fn test_vm_usable_after_runtime_error() {
        let source = "1 / 0;";
        let tokens = Lexer::new(source).tokenize();
        let program = Parser::new(tokens).parse().expect("parse failed");

        let mut vm = VM::new();
        let mut globals = Globals::new();
        let (script, _) = Compiler::new(&mut globals, &mut vm.heap)
            .compile(&program)
            .expect("compile failed");
        assert!(vm.interpret(script).is_err());

        // Same VM runs the next script cleanly
        let tokens = Lexer::new("return 2 + 2;").tokenize();
        let program = Parser::new(tokens).parse().expect("parse failed");
        let (script, _) = Compiler::new(&mut globals, &mut vm.heap)
            .compile(&program)
            .expect("compile failed");
        assert_eq!(vm.interpret(script).expect("run failed"), Value::Int(4));
    }

    #[test]
    fn test_gc_collects_unrooted_string() {
        let mut vm = VM::new();
        let handle = vm.heap.alloc_string("garbage".to_string());
        let before = vm.heap.bytes_allocated;
        assert!(before > 0);

        vm.collect_garbage();

        assert!(vm.heap.bytes_allocated < before);
        assert_eq!(vm.heap.live_count(), 0);
        assert!(vm.heap.get_string(handle).is_none());
    }

    #[test]
    fn test_gc_preserves_rooted_string() {
        let mut vm = VM::new();
        let handle = vm.heap.alloc_string("treasure".to_string());
        vm.stack.push(Value::Obj(handle));
        let before = vm.heap.bytes_allocated;

        vm.collect_garbage();

        assert_eq!(vm.heap.bytes_allocated, before);
        assert_eq!(
            vm.heap.get_string(handle).map(String::as_str),
            Some("treasure")
        );

        // Pop the root and collect again: now it goes
        vm.stack.pop();
        vm.collect_garbage();
        assert!(vm.heap.bytes_allocated < before);
        assert_eq!(vm.heap.live_count(), 0);
    }

    #[test]
    fn test_gc_preserves_globals() {
        let mut vm = VM::new();
        let handle = vm.heap.alloc_string("kept".to_string());
        vm.globals[0] = Value::Obj(handle);

        vm.collect_garbage();

        assert_eq!(vm.heap.get_string(handle).map(String::as_str), Some("kept"));
    }

    #[test]
    fn test_gc_clears_marks_after_cycle() {
        let mut vm = VM::new();
        let handle = vm.heap.alloc_string("kept".to_string());
        vm.stack.push(Value::Obj(handle));

        vm.collect_garbage();

        assert!(!vm.heap.is_marked(handle));
    }

    #[test]
    fn test_script_result_stays_on_stack() {
        let (result, vm) = run_vm("return 40 + 2;");
        assert_eq!(result.expect("run failed"), Value::Int(42));
        assert_eq!(vm.stack.first().copied(), Some(Value::Int(42)));
    }
}
