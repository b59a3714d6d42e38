//! Runtime value types for Determa

use std::fmt;
use std::rc::Rc;

use crate::bytecode::Chunk;
use crate::gc::{Handle, Heap};

/// A first-class runtime value. Booleans and integers are inline;
/// everything variable-sized lives on the garbage-collected heap behind
/// a handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Obj(Handle),
}

impl Value {
    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Obj(handle) => {
                if heap.get_string(*handle).is_some() {
                    "str"
                } else {
                    "function"
                }
            }
        }
    }

    /// Render the value the way `print` does
    pub fn display(&self, heap: &Heap) -> String {
        match self {
            Value::Int(n) => format!("{}", n),
            Value::Bool(b) => format!("{}", b),
            Value::Obj(handle) => {
                if let Some(s) = heap.get_string(*handle) {
                    s.clone()
                } else if let Some(f) = heap.get_function(*handle) {
                    match &f.name {
                        Some(name) => format!("<fn {}>", name),
                        None => "<script>".to_string(),
                    }
                } else {
                    "<collected>".to_string()
                }
            }
        }
    }

    /// Heap handles referenced by this value (GC root helper)
    pub fn children(&self) -> Vec<Handle> {
        match self {
            Value::Obj(handle) => vec![*handle],
            _ => vec![],
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            // Cannot resolve the handle without the heap
            Value::Obj(handle) => write!(f, "<obj {}>", handle.0),
        }
    }
}

/// A compiled function: its declared arity, an optional name, and the
/// bytecode chunk it runs. The top-level script is an unnamed zero-arity
/// function.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<String>,
    pub arity: usize,
    pub chunk: Rc<Chunk>,
}

impl Function {
    pub fn new(name: Option<String>, arity: usize, chunk: Rc<Chunk>) -> Self {
        Self { name, arity, chunk }
    }

    /// Handles reachable from this function: everything in its constant
    /// pool (nested functions, string literals)
    pub fn children(&self) -> Vec<Handle> {
        self.chunk
            .constants
            .iter()
            .flat_map(|v| v.children())
            .collect()
    }
}
