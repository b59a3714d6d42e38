//! High-level function tests: calls, composition, recursion

use determa::{run, Value};

fn run_ok(source: &str) -> Value {
    run(source)
        .expect("execution failed")
        .expect("script produced no result")
}

#[test]
fn test_add_function() {
    let result = run_ok(
        "func add(a, b): int {
             return a + b;
         }
         add(400, 700);",
    );
    assert_eq!(result, Value::Int(1100));
}

#[test]
fn test_function_composition() {
    let result = run_ok(
        "func twice(x): int {
             return x * 2;
         }
         func quad(x): int {
             return twice(twice(x));
         }
         quad(5);",
    );
    assert_eq!(result, Value::Int(20));
}

#[test]
fn test_recursive_fibonacci() {
    let result = run_ok(
        "func fib(n): int {
             if n <= 1 {
                 return n;
             }
             return fib(n - 1) + fib(n - 2);
         }
         fib(10);",
    );
    assert_eq!(result, Value::Int(55));
}

#[test]
fn test_early_return_in_branches() {
    let result = run_ok(
        "func sign(n): int {
             if n > 0 { return 1; }
             elif n < 0 { return 0 - 1; }
             return 0;
         }
         sign(0 - 17) + sign(42) + sign(0);",
    );
    assert_eq!(result, Value::Int(0));
}

#[test]
fn test_function_arguments_are_locals() {
    // Mutating a parameter must not leak into the caller
    let result = run_ok(
        "var n = 10;
         func bump(n): int {
             n = n + 1;
             return n;
         }
         bump(n) + n;",
    );
    assert_eq!(result, Value::Int(21));
}

#[test]
fn test_bool_returning_function() {
    let result = run_ok(
        "func is_even(n): bool {
             return n % 2 == 0;
         }
         is_even(8);",
    );
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn test_local_function_in_block() {
    let result = run_ok(
        "var r = 0;
         {
             func double(x): int { return x * 2; }
             r = double(21);
         }
         r;",
    );
    assert_eq!(result, Value::Int(42));
}

#[test]
fn test_void_function_for_side_effects() {
    let result = run_ok(
        "var total = 0;
         func accumulate(n) {
             total = total + n;
             return;
         }
         accumulate(10);
         accumulate(32);
         total;",
    );
    assert_eq!(result, Value::Int(42));
}
