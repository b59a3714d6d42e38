//! Static type checker for Determa
//!
//! A single recursive pass over the AST. Expression types are inferred
//! bottom-up; statements are validated against the scoped symbol table.
//! Errors are collected and the walk continues so several problems can
//! surface in one run; `DataType::Error` propagates silently upward to
//! avoid cascading reports.
//!
//! The checker works on a copy of the caller's symbol table and only
//! hands the updated table back on success, so a failed check leaves the
//! persistent session state untouched.

use crate::ast::{BinaryOp, DataType, Expr, Program, Stmt, UnaryOp};
use crate::error::{DetError, ErrorKind};
use crate::symbol::SymbolTable;
use crate::token::Span;

/// Internal state for the type-checking pass
pub struct TypeChecker {
    symbols: SymbolTable,
    errors: Vec<DetError>,
    /// Declared return types of the enclosing functions, innermost last
    function_returns: Vec<DataType>,
}

impl TypeChecker {
    /// Run the complete pass. Returns the updated symbol table on
    /// success, or every collected error.
    pub fn check(
        program: &Program,
        symbols: &SymbolTable,
    ) -> std::result::Result<SymbolTable, Vec<DetError>> {
        let mut tc = Self {
            symbols: symbols.clone(),
            errors: Vec::new(),
            function_returns: Vec::new(),
        };

        for stmt in &program.statements {
            tc.check_statement(stmt);
        }

        if tc.errors.is_empty() {
            Ok(tc.symbols)
        } else {
            Err(tc.errors)
        }
    }

    fn error(&mut self, kind: ErrorKind, span: Span) {
        self.errors.push(DetError::new(kind, Some(span)));
    }

    // ==================== Expressions ====================

    fn check_expression(&mut self, expr: &Expr) -> DataType {
        match expr {
            Expr::Int { .. } => DataType::Int,
            Expr::Str { .. } => DataType::Str,
            Expr::Bool { .. } => DataType::Bool,

            Expr::Var { name, span } => {
                let symbol = self.symbols.lookup(name).map(|s| (s.ty, s.arity));
                match symbol {
                    Some((_, Some(_))) => {
                        self.error(ErrorKind::FunctionAsValue(name.clone()), *span);
                        DataType::Error
                    }
                    Some((ty, None)) => ty,
                    None => {
                        self.error(ErrorKind::UndefinedVariable(name.clone()), *span);
                        DataType::Error
                    }
                }
            }

            Expr::Unary { op, operand, span } => {
                let ty = self.check_expression(operand);
                if ty == DataType::Error {
                    return DataType::Error;
                }

                let expected = match op {
                    UnaryOp::Neg => DataType::Int,
                    UnaryOp::Not => DataType::Bool,
                };

                if ty == expected {
                    expected
                } else {
                    self.error(
                        ErrorKind::TypeMismatch(expected.to_string(), ty.to_string()),
                        *span,
                    );
                    DataType::Error
                }
            }

            Expr::Binary { left, op, right, span } => {
                let lt = self.check_expression(left);
                let rt = self.check_expression(right);

                // Propagate without piling on a second report
                if lt == DataType::Error || rt == DataType::Error {
                    return DataType::Error;
                }

                match op {
                    BinaryOp::Add => {
                        if lt == DataType::Int && rt == DataType::Int {
                            DataType::Int
                        } else if lt == DataType::Str && rt == DataType::Str {
                            DataType::Str
                        } else {
                            self.error(
                                ErrorKind::TypeMismatch(
                                    "two ints or two strs".to_string(),
                                    format!("{} and {}", lt, rt),
                                ),
                                *span,
                            );
                            DataType::Error
                        }
                    }

                    BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                        if lt == DataType::Int && rt == DataType::Int {
                            DataType::Int
                        } else {
                            self.error(
                                ErrorKind::TypeMismatch(
                                    "two ints".to_string(),
                                    format!("{} and {}", lt, rt),
                                ),
                                *span,
                            );
                            DataType::Error
                        }
                    }

                    BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                        if lt == DataType::Int && rt == DataType::Int {
                            DataType::Bool
                        } else {
                            self.error(
                                ErrorKind::TypeMismatch(
                                    "two ints".to_string(),
                                    format!("{} and {}", lt, rt),
                                ),
                                *span,
                            );
                            DataType::Error
                        }
                    }

                    BinaryOp::Eq | BinaryOp::Ne => {
                        if lt != rt {
                            self.error(
                                ErrorKind::TypeMismatch(lt.to_string(), rt.to_string()),
                                *span,
                            );
                            DataType::Error
                        } else if lt == DataType::Void {
                            self.error(
                                ErrorKind::TypeMismatch(
                                    "non-void operands".to_string(),
                                    "void".to_string(),
                                ),
                                *span,
                            );
                            DataType::Error
                        } else {
                            DataType::Bool
                        }
                    }
                }
            }

            Expr::Assign { name, value, span } => {
                let vt = self.check_expression(value);

                let symbol = self.symbols.lookup(name).map(|s| (s.ty, s.arity));
                let target = match symbol {
                    Some((_, Some(_))) => {
                        self.error(ErrorKind::FunctionAsValue(name.clone()), *span);
                        return DataType::Error;
                    }
                    Some((ty, None)) => ty,
                    None => {
                        self.error(ErrorKind::UndefinedVariable(name.clone()), *span);
                        return DataType::Error;
                    }
                };

                if vt == DataType::Error {
                    return DataType::Error;
                }

                if vt != target {
                    self.error(
                        ErrorKind::TypeMismatch(target.to_string(), vt.to_string()),
                        *span,
                    );
                    return DataType::Error;
                }

                target
            }

            Expr::Call { name, args, span } => {
                let symbol = self.symbols.lookup(name).map(|s| (s.ty, s.arity));
                let (arity, return_type) = match symbol {
                    Some((ty, Some(arity))) => (arity, ty),
                    Some((_, None)) => {
                        self.error(ErrorKind::NotCallable(name.clone()), *span);
                        return DataType::Error;
                    }
                    None => {
                        self.error(ErrorKind::UndefinedVariable(name.clone()), *span);
                        return DataType::Error;
                    }
                };

                if args.len() != arity {
                    self.error(ErrorKind::WrongArity(arity, args.len()), *span);
                }

                // Parameters are int-typed; hold arguments to that
                for arg in args {
                    let at = self.check_expression(arg);
                    if at != DataType::Error && at != DataType::Int {
                        self.error(
                            ErrorKind::TypeMismatch(DataType::Int.to_string(), at.to_string()),
                            arg.span(),
                        );
                    }
                }

                return_type
            }
        }
    }

    // ==================== Statements ====================

    fn check_statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr { expr } => {
                self.check_expression(expr);
            }

            Stmt::VarDecl { name, init, span } => {
                let Some(init) = init else {
                    self.error(ErrorKind::MissingInitializer(name.clone()), *span);
                    return;
                };

                let ty = self.check_expression(init);
                if ty == DataType::Error {
                    return;
                }
                if ty == DataType::Void {
                    self.error(ErrorKind::VoidInitializer(name.clone()), *span);
                    return;
                }

                if !self.symbols.define(name, ty, None) {
                    self.error(ErrorKind::Redeclaration(name.clone()), *span);
                }
            }

            Stmt::Print { expr, span } => {
                let ty = self.check_expression(expr);
                if ty == DataType::Void {
                    self.error(ErrorKind::PrintVoid, *span);
                }
            }

            Stmt::Block { stmts, .. } => {
                self.symbols.enter_scope();
                for stmt in stmts {
                    self.check_statement(stmt);
                }
                self.symbols.exit_scope();
            }

            Stmt::If { condition, then_branch, else_branch, span } => {
                let ct = self.check_expression(condition);
                if ct != DataType::Error && ct != DataType::Bool {
                    self.error(ErrorKind::NonBoolCondition(ct.to_string()), *span);
                }

                self.check_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_statement(else_branch);
                }
            }

            Stmt::While { condition, body, span } => {
                let ct = self.check_expression(condition);
                if ct != DataType::Error && ct != DataType::Bool {
                    self.error(ErrorKind::NonBoolCondition(ct.to_string()), *span);
                }

                self.check_statement(body);
            }

            Stmt::Func { name, params, return_type, body, span } => {
                // The name goes into the enclosing scope first so the
                // body can recurse
                if !self.symbols.define(name, *return_type, Some(params.len())) {
                    self.error(ErrorKind::Redeclaration(name.clone()), *span);
                }

                self.symbols.enter_scope();
                for param in params {
                    if !self.symbols.define(param, DataType::Int, None) {
                        self.error(ErrorKind::Redeclaration(param.clone()), *span);
                    }
                }

                self.function_returns.push(*return_type);
                self.check_statement(body);
                self.function_returns.pop();

                self.symbols.exit_scope();
            }

            Stmt::Return { value, span } => {
                let actual = match value {
                    Some(expr) => self.check_expression(expr),
                    None => DataType::Void,
                };

                // A top-level return is unconstrained: it just sets the
                // script result
                let Some(&expected) = self.function_returns.last() else {
                    return;
                };

                if actual != DataType::Error && actual != expected {
                    self.error(
                        ErrorKind::ReturnTypeMismatch(expected.to_string(), actual.to_string()),
                        *span,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn check(source: &str) -> std::result::Result<SymbolTable, Vec<DetError>> {
        let tokens = Lexer::new(source).tokenize();
        let program = Parser::new(tokens).parse().expect("parse failed");
        TypeChecker::check(&program, &SymbolTable::new())
    }

    fn check_ok(source: &str) {
        if let Err(errors) = check(source) {
            panic!("expected clean check, got: {:?}", errors);
        }
    }

    fn check_errs(source: &str) -> Vec<DetError> {
        check(source).expect_err("expected type errors")
    }

    #[test]
    fn test_var_decl_and_access() {
        check_ok("var x = 10; print x + 1;");
    }

    #[test]
    fn test_undefined_variable() {
        let errors = check_errs("var x = 10; print y;");
        assert!(errors
            .iter()
            .any(|e| matches!(&e.kind, ErrorKind::UndefinedVariable(n) if n == "y")));
    }

    #[test]
    fn test_missing_initializer() {
        let errors = check_errs("var x;");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::MissingInitializer(_))));
    }

    #[test]
    fn test_depth_zero_redeclaration_allowed() {
        check_ok("var x = 10; var x = \"now a string\"; print x + \"!\";");
    }

    #[test]
    fn test_inner_redeclaration_rejected() {
        let errors = check_errs("{ var x = 1; var x = 2; }");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::Redeclaration(_))));
    }

    #[test]
    fn test_shadowing_allowed() {
        check_ok("var x = 1; { var x = true; print !x; } print x + 1;");
    }

    #[test]
    fn test_string_concatenation_allowed() {
        check_ok("print \"a\" + \"b\";");
    }

    #[test]
    fn test_string_subtraction_rejected() {
        let errors = check_errs("print \"a\" - \"b\";");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::TypeMismatch(_, _))));
    }

    #[test]
    fn test_not_on_int_rejected() {
        let errors = check_errs("print !1;");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::TypeMismatch(_, _))));
    }

    #[test]
    fn test_non_bool_condition_rejected() {
        let errors = check_errs("if 1 { print 1; }");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::NonBoolCondition(_))));
    }

    #[test]
    fn test_print_void_rejected() {
        let errors = check_errs("func f() { return; } print f();");
        assert!(errors.iter().any(|e| matches!(e.kind, ErrorKind::PrintVoid)));
    }

    #[test]
    fn test_assignment_type_mismatch() {
        let errors = check_errs("var x = 1; x = \"nope\";");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::TypeMismatch(_, _))));
    }

    #[test]
    fn test_equality_requires_same_types() {
        let errors = check_errs("print 1 == \"one\";");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::TypeMismatch(_, _))));
    }

    #[test]
    fn test_function_call_and_recursion() {
        check_ok(
            "func fib(n): int { if n <= 1 { return n; } return fib(n - 1) + fib(n - 2); } \
             print fib(8);",
        );
    }

    #[test]
    fn test_call_arity_checked() {
        let errors = check_errs("func add(a, b): int { return a + b; } add(1);");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::WrongArity(2, 1))));
    }

    #[test]
    fn test_return_type_mismatch() {
        let errors = check_errs("func f(): int { return \"text\"; }");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::ReturnTypeMismatch(_, _))));
    }

    #[test]
    fn test_calling_a_variable_rejected() {
        let errors = check_errs("var x = 1; x(2);");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::NotCallable(_))));
    }

    #[test]
    fn test_function_as_value_rejected() {
        let errors = check_errs("func f(): int { return 1; } var x = f;");
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::FunctionAsValue(_))));
    }

    #[test]
    fn test_multiple_errors_surface_together() {
        let errors = check_errs("print a; print b;");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_successful_check_commits_table() {
        let table = check("var x = 1;").expect("check failed");
        assert_eq!(
            table.lookup("x").map(|s| s.ty),
            Some(DataType::Int)
        );
    }
}
