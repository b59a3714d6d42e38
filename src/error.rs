//! Error types for the Determa language
//!
//! Provides structured error handling with source locations. Runtime
//! errors additionally carry a call-stack trace.

use crate::token::Span;
use std::fmt;

/// Error kinds in Determa
#[derive(Debug, Clone)]
pub enum ErrorKind {
    // Lexer errors (surface as error tokens, reported by the parser)
    UnexpectedCharacter,
    UnterminatedString,
    IntegerTooLarge,

    // Parser errors
    ExpectedToken(&'static str),
    ExpectedExpression,
    InvalidAssignmentTarget,
    InvalidReturnType,

    // Type errors
    UndefinedVariable(String),
    Redeclaration(String),
    MissingInitializer(String),
    VoidInitializer(String),
    PrintVoid,
    TypeMismatch(String, String),
    NonBoolCondition(String),
    ReturnTypeMismatch(String, String),
    NotCallable(String),
    FunctionAsValue(String),
    WrongArity(usize, usize),

    // Compile errors
    TooManyConstants,
    TooManyGlobals,
    TooManyLocals,
    JumpTooLarge,
    LoopTooLarge,

    // Runtime errors
    OperandsMustBeInts,
    OperandMustBeInt,
    OperandMustBeBool,
    AddTypeMismatch,
    DivisionByZero,
    ModuloByZero,
    NotAFunction,
    StackOverflow,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnexpectedCharacter => write!(f, "Unexpected character."),
            ErrorKind::UnterminatedString => write!(f, "Unterminated string."),
            ErrorKind::IntegerTooLarge => write!(f, "Integer literal too large."),
            ErrorKind::ExpectedToken(msg) => write!(f, "{}", msg),
            ErrorKind::ExpectedExpression => write!(f, "Expected expression."),
            ErrorKind::InvalidAssignmentTarget => write!(f, "Invalid assignment target."),
            ErrorKind::InvalidReturnType => write!(f, "Invalid return type."),
            ErrorKind::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            ErrorKind::Redeclaration(name) => {
                write!(f, "Variable '{}' already declared in this scope.", name)
            }
            ErrorKind::MissingInitializer(name) => write!(
                f,
                "Variable '{}' requires an initializer for type inference.",
                name
            ),
            ErrorKind::VoidInitializer(name) => {
                write!(f, "Cannot initialize variable '{}' with a void expression.", name)
            }
            ErrorKind::PrintVoid => write!(f, "Cannot print a void expression."),
            ErrorKind::TypeMismatch(expected, found) => {
                write!(f, "Type mismatch: expected {}, got {}.", expected, found)
            }
            ErrorKind::NonBoolCondition(found) => {
                write!(f, "Condition must be a bool, got {}.", found)
            }
            ErrorKind::ReturnTypeMismatch(expected, found) => {
                write!(f, "Return type mismatch: expected {}, got {}.", expected, found)
            }
            ErrorKind::NotCallable(name) => write!(f, "'{}' is not a function.", name),
            ErrorKind::FunctionAsValue(name) => {
                write!(f, "Function '{}' must be called.", name)
            }
            ErrorKind::WrongArity(expected, got) => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            ErrorKind::TooManyConstants => write!(f, "Too many constants in one chunk."),
            ErrorKind::TooManyGlobals => write!(f, "Too many global variables."),
            ErrorKind::TooManyLocals => write!(f, "Too many local variables in function."),
            ErrorKind::JumpTooLarge => write!(f, "Too much code to jump over."),
            ErrorKind::LoopTooLarge => write!(f, "Loop body too large."),
            ErrorKind::OperandsMustBeInts => write!(f, "Operands must be integers."),
            ErrorKind::OperandMustBeInt => write!(f, "Operand must be an integer."),
            ErrorKind::OperandMustBeBool => write!(f, "Operand must be a boolean."),
            ErrorKind::AddTypeMismatch => {
                write!(f, "Operands must be two integers or two strings.")
            }
            ErrorKind::DivisionByZero => write!(f, "Division by zero."),
            ErrorKind::ModuloByZero => write!(f, "Modulo by zero."),
            ErrorKind::NotAFunction => write!(f, "Can only call functions."),
            ErrorKind::StackOverflow => write!(f, "Stack overflow."),
        }
    }
}

/// A Determa error with location information
#[derive(Debug, Clone)]
pub struct DetError {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    /// Offending token text, or "end" at EOF
    pub at: Option<String>,
    /// Call-stack trace lines for runtime errors
    pub trace: Vec<String>,
}

impl DetError {
    pub fn new(kind: ErrorKind, span: Option<Span>) -> Self {
        Self {
            kind,
            span,
            at: None,
            trace: Vec::new(),
        }
    }

    pub fn at_token(mut self, lexeme: impl Into<String>) -> Self {
        self.at = Some(lexeme.into());
        self
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Display for DetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.trace.is_empty() {
            write!(f, "{}", self.kind)?;
            for line in &self.trace {
                write!(f, "\n{}", line)?;
            }
            return Ok(());
        }

        if let Some(span) = &self.span {
            write!(f, "[Line {}] Error", span.line)?;
        } else {
            write!(f, "Error")?;
        }
        if let Some(at) = &self.at {
            if at == "end" {
                write!(f, " at end")?;
            } else {
                write!(f, " at '{}'", at)?;
            }
        }
        write!(f, ": {}", self.kind)
    }
}

impl std::error::Error for DetError {}

/// Result type for Determa operations
pub type Result<T> = std::result::Result<T, DetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_format() {
        let err = DetError::new(
            ErrorKind::ExpectedToken("Expected ';' after expression"),
            Some(Span::new(0, 1, 3, 5)),
        )
        .at_token("}");
        assert_eq!(
            err.to_string(),
            "[Line 3] Error at '}': Expected ';' after expression"
        );
    }

    #[test]
    fn test_error_at_end() {
        let err = DetError::new(ErrorKind::ExpectedExpression, Some(Span::new(0, 0, 1, 1)))
            .at_token("end");
        assert_eq!(err.to_string(), "[Line 1] Error at end: Expected expression.");
    }

    #[test]
    fn test_runtime_error_trace() {
        let err = DetError::new(ErrorKind::DivisionByZero, None)
            .with_trace(vec!["[line 1] in script".to_string()]);
        assert_eq!(err.to_string(), "Division by zero.\n[line 1] in script");
    }
}
