//! End-to-end evaluator tests
//!
//! Each test runs a complete program through the interpreter: parse, entry
//! actor, evaluation, kernel shutdown.

use slug_runtime::value::Value;
use slug_runtime::{Interp, Object, Settings};

fn run(source: &str) -> Object {
    let interp = Interp::new(Settings::new(".", "main"));
    interp
        .run_source(source, "<test>", "main")
        .expect("program should run")
}

fn run_int(source: &str) -> i64 {
    let result = run(source);
    match &result.value {
        Value::Number(n) => n.to_i64(),
        other => panic!("expected a number, got {:?} from {:?}", other, result),
    }
}

fn run_str(source: &str) -> String {
    let result = run(source);
    match &result.value {
        Value::Str(s) => s.to_string(),
        other => panic!("expected a string, got {:?} from {:?}", other, result),
    }
}

// -------------------------------------------------------------------
// Expressions
// -------------------------------------------------------------------

#[test]
fn test_arithmetic() {
    assert_eq!(run("1 + 2 * 3").inspect(), "7");
    assert_eq!(run("1.2 + 3.4").inspect(), "4.6");
    assert_eq!(run("10 / 4").inspect(), "2.5");
    assert_eq!(run("7 % 3").inspect(), "1");
    assert_eq!(run("1 << 10").inspect(), "1024");
}

#[test]
fn test_comparisons_and_booleans() {
    assert_eq!(run("1 < 2").inspect(), "true");
    assert_eq!(run("\"abc\" < \"abd\"").inspect(), "true");
    assert_eq!(run("1 == \"1\"").inspect(), "false");
    assert_eq!(run("true && false").inspect(), "false");
    assert_eq!(run("false || true").inspect(), "true");
}

#[test]
fn test_boolean_short_circuit_skips_rhs() {
    // boom is unbound; short-circuit must not evaluate it
    assert_eq!(run("false && boom()").inspect(), "false");
    assert_eq!(run("true || boom()").inspect(), "true");
    assert!(run("true && boom()").is_error());
}

#[test]
fn test_prefix_operators() {
    assert_eq!(run("!true").inspect(), "false");
    assert_eq!(run("!nil").inspect(), "true");
    assert_eq!(run("!0").inspect(), "false");
    assert_eq!(run("-(2 + 3)").inspect(), "-5");
    assert_eq!(run("~b\"\\x0f\"").inspect(), "b\"\\xf0\"");
}

#[test]
fn test_string_operations() {
    assert_eq!(run_str("\"ab\" + \"cd\""), "abcd");
    assert_eq!(run_str("\"ab\" * 3"), "ababab");
    assert_eq!(run_str("\"n = \" + 42"), "n = 42");
    assert_eq!(run_str("\"hello\"[1]"), "e");
    assert_eq!(run_str("\"hello\"[-1]"), "o");
    assert_eq!(run_str("\"hello\"[1:4]"), "ell");
}

#[test]
fn test_list_operations() {
    assert_eq!(run("[1, 2] :+ 3").inspect(), "[1, 2, 3]");
    assert_eq!(run("0 +: [1, 2]").inspect(), "[0, 1, 2]");
    assert_eq!(run("[1] + [2, 3]").inspect(), "[1, 2, 3]");
    assert_eq!(run("[10, 20, 30][-1]").inspect(), "30");
    assert_eq!(run("[10, 20, 30][9]").inspect(), "nil");
    assert_eq!(run("[1, 2, 3, 4, 5][1:4:2]").inspect(), "[2, 4]");
    assert_eq!(run_int("len([1, 2] + [3])"), 3);
}

#[test]
fn test_list_length_is_additive() {
    assert_eq!(run("len([1, 2] + [3, 4, 5]) == len([1, 2]) + len([3, 4, 5])").inspect(), "true");
}

#[test]
fn test_bytes_operations() {
    assert_eq!(run("b\"\\x01\" + b\"\\x02\"").inspect(), "b\"\\x01\\x02\"");
    assert_eq!(run("b\"\\x01\" :+ 255").inspect(), "b\"\\x01\\xff\"");
    assert_eq!(run_int("b\"\\x07\\x08\"[1]"), 8);
    assert_eq!(run("b\"\\x01\" == b\"\\x01\"").inspect(), "true");
}

#[test]
fn test_map_literal_and_index() {
    assert_eq!(run_int("{a: 1, \"b\": 2}[\"a\"]"), 1);
    assert_eq!(run("{a: 1}[\"missing\"]").inspect(), "nil");
    assert_eq!(run_int("len({a: 1, b: 2})"), 2);
    assert!(run("{[1]: 2}").is_error());
}

#[test]
fn test_if_else() {
    assert_eq!(run_str("if 1 < 2 { \"yes\" } else { \"no\" }"), "yes");
    assert_eq!(run("if false { 1 }").inspect(), "nil");
    assert_eq!(run_int("if false { 1 } else if true { 2 } else { 3 }"), 2);
}

#[test]
fn test_type_mismatch_is_an_error() {
    let result = run("\"a\" - 1");
    match &result.value {
        Value::Error(e) => {
            assert!(e.message.contains("STRING"));
            assert!(e.message.contains("NUMBER"));
        }
        other => panic!("expected error, got {:?}", other),
    }
}

// -------------------------------------------------------------------
// Bindings
// -------------------------------------------------------------------

#[test]
fn test_let_and_assignment() {
    assert_eq!(run_int("let x = 1\nx = x + 1\nx"), 2);
}

#[test]
fn test_assignment_to_undefined_fails() {
    let result = run("y = 1");
    assert!(result.is_error());
    assert!(result.inspect().contains("identifier not found"));
}

#[test]
fn test_constants_cannot_be_assigned() {
    let result = run("const pi = 3\npi = 4");
    assert!(result.inspect().contains("constant"));
}

#[test]
fn test_invalid_assignment_target() {
    assert!(run("5 = 3").inspect().contains("invalid assignment target"));
}

#[test]
fn test_identifier_not_found() {
    assert!(run("missing").inspect().contains("identifier not found"));
}

#[test]
fn test_destructuring_let() {
    assert_eq!(run_int("let [a, b] = [1, 2]\na + b"), 3);
    assert_eq!(run("let [h, ...t] = [1, 2, 3]\nt").inspect(), "[2, 3]");
    assert_eq!(run_int("let {a, b: [x]} = {a: 1, b: [9]}\na + x"), 10);
}

// -------------------------------------------------------------------
// Functions
// -------------------------------------------------------------------

#[test]
fn test_function_call_and_closure() {
    let source = r#"
fn make_counter() {
  let n = 0
  fn() {
    n = n + 1
    n
  }
}
let tick = make_counter()
tick()
tick()
tick()
"#;
    assert_eq!(run_int(source), 3);
}

#[test]
fn test_default_and_variadic_params() {
    assert_eq!(run_int("fn f(a, b = 10) { a + b }\nf(1)"), 11);
    assert_eq!(run_int("fn f(a, b = 10) { a + b }\nf(1, 2)"), 3);
    assert_eq!(run_int("fn f(...xs) { len(xs) }\nf(1, 2, 3)"), 3);
    assert_eq!(run("fn f(a) { a }\nf()").inspect(), "nil");
}

#[test]
fn test_spread_call_arguments() {
    assert_eq!(run_int("fn add3(a, b, c) { a + b + c }\nlet xs = [1, 2, 3]\nadd3(...xs)"), 6);
}

#[test]
fn test_too_many_arguments_is_an_error() {
    assert!(run("fn f(a) { a }\nf(1, 2)").inspect().contains("wrong number of arguments"));
}

#[test]
fn test_return_exits_early() {
    assert_eq!(run_int("fn f() {\n  return 1\n  2\n}\nf()"), 1);
}

#[test]
fn test_function_groups_dispatch_by_arity() {
    let source = r#"
fn area(r) { r * r }
fn area(w, h) { w * h }
area(3) + area(2, 5)
"#;
    assert_eq!(run_int(source), 19);
}

#[test]
fn test_function_group_no_match() {
    let source = "fn f(a) { a }\nfn f(a, b) { a + b }\nf(1, 2, 3)";
    assert!(run(source).inspect().contains("no signature"));
}

#[test]
fn test_not_a_function() {
    assert!(run("let x = 1\nx()").inspect().contains("not a function"));
}

// -------------------------------------------------------------------
// Tail calls
// -------------------------------------------------------------------

#[test]
fn test_recur_deep_accumulator() {
    // 10000 levels of tail recursion must not grow the host stack
    let source = r#"
fn sum(n, acc) {
  if n == 0 { acc } else { recur(n - 1, acc + n) }
}
sum(10000, 0)
"#;
    assert_eq!(run_int(source), 50_005_000);
}

#[test]
fn test_factorial_by_accumulator_trampolines() {
    let source = r#"
fn fact(n, acc) {
  if n == 0 { acc } else { recur(n - 1, acc * n) }
}
fact(10000, 1)
"#;
    let result = run(source);
    match &result.value {
        Value::Number(n) => assert!(!n.is_nan()),
        other => panic!("expected a number, got {:?}", other),
    }
}

#[test]
fn test_named_self_tail_call() {
    let source = r#"
fn countdown(n) {
  if n == 0 { "done" } else { countdown(n - 1) }
}
countdown(50000)
"#;
    assert_eq!(run_str(source), "done");
}

#[test]
fn test_recur_outside_function_is_an_error() {
    assert!(run("recur(1)").inspect().contains("recur outside"));
}

// -------------------------------------------------------------------
// Pattern matching
// -------------------------------------------------------------------

#[test]
fn test_match_spread_scenario() {
    assert_eq!(run("match [1, 2, 3, 4] { [h, ...t] => t }").inspect(), "[2, 3, 4]");
}

#[test]
fn test_match_literal_and_wildcard() {
    let source = "match 2 { 1 => \"one\"\n 2 => \"two\"\n _ => \"many\" }";
    assert_eq!(run_str(source), "two");
    assert_eq!(run_str("match 9 { 1 => \"one\"\n _ => \"many\" }"), "many");
}

#[test]
fn test_match_no_case_yields_nil() {
    assert_eq!(run("match 9 { 1 => \"one\" }").inspect(), "nil");
}

#[test]
fn test_match_alternation_and_guard() {
    let source = "match 2 { 1 | 2 | 3 => \"small\"\n _ => \"big\" }";
    assert_eq!(run_str(source), "small");
    let source = "match 10 { x if x > 5 => \"big\"\n _ => \"small\" }";
    assert_eq!(run_str(source), "big");
}

#[test]
fn test_match_pinned_identifier() {
    let source = r#"
let expected = 5
fn check(x) {
  match x {
    ^expected => "eq"
    _ => "ne"
  }
}
check(5) + check(6)
"#;
    assert_eq!(run_str(source), "eqne");
}

#[test]
fn test_pin_cannot_be_shadowed_by_pattern_variable() {
    // the pin resolves in the enclosing scope even though the case binds x
    let source = r#"
let x = 1
match [1, 2] {
  [^x, y] => y
  _ => "no"
}
"#;
    assert_eq!(run_int(source), 2);
}

#[test]
fn test_failed_match_installs_no_bindings() {
    // [a, b, c] fails against [1, 2]; a must stay unbound afterwards
    let source = "match [1, 2] { [a, b, c] => a\n _ => 0 }\na";
    assert!(run(source).inspect().contains("identifier not found"));
}

#[test]
fn test_match_map_patterns() {
    assert_eq!(
        run_int("match {a: 1, b: 2} { {a: x, ...rest} => x + len(rest) }"),
        2
    );
    // exact pattern rejects extra keys
    let source = "match {a: 1, b: 2} { {= a: x} => x\n _ => -1 }";
    assert_eq!(run_int(source), -1);
    let source = "match {a: 1} { {= a: x} => x\n _ => -1 }";
    assert_eq!(run_int(source), 1);
    // select-all copies string-keyed pairs into scope
    assert_eq!(run_int("match {a: 3, b: 4} { {*} => a + b }"), 7);
}

#[test]
fn test_match_bytes_as_list_pattern() {
    assert_eq!(run_int("match b\"\\x01\\x02\\x03\" { [h, ...t] => h + len(t) }"), 3);
}

#[test]
fn test_match_case_body_scoping() {
    // bindings from one case do not leak into the next
    let source = r#"
let r = match 1 { x => x + 1 }
match 2 { y => r + y }
"#;
    assert_eq!(run_int(source), 4);
}

// -------------------------------------------------------------------
// Errors, throw, catch
// -------------------------------------------------------------------

#[test]
fn test_throw_uncaught_carries_trace() {
    let source = "fn boom() {\n  throw {code: 7}\n}\nboom()";
    let result = run(source);
    match &result.value {
        Value::RuntimeError(re) => {
            assert_eq!(re.payload.inspect(), "{\"code\": 7}");
            assert!(!re.trace.is_empty(), "throw must capture a stack trace");
            // most recent frame first
            assert_eq!(re.trace[0].function, "boom");
        }
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[test]
fn test_catch_binds_payload() {
    let source = "try { throw {code: 42} } catch { {code: c} => c }";
    assert_eq!(run_int(source), 42);
}

#[test]
fn test_catch_rethrows_unmatched_payload() {
    let source = "try { throw {code: 2} } catch { {code: 1} => \"one\" }";
    assert!(matches!(run(source).value, Value::RuntimeError(_)));
}

#[test]
fn test_plain_errors_are_not_catchable() {
    let source = "try { missing } catch { _ => \"caught\" }";
    assert!(run(source).inspect().contains("identifier not found"));
}

#[test]
fn test_error_short_circuits_siblings() {
    // the error from the first element aborts list construction
    assert!(run("[missing, 1, 2]").is_error());
    assert!(run("1 + missing").is_error());
}

// -------------------------------------------------------------------
// Defer
// -------------------------------------------------------------------

#[test]
fn test_defer_runs_lifo() {
    let source = r#"
let out = []
fn f() {
  defer (fn() { out = out :+ 1 })()
  defer (fn() { out = out :+ 2 })()
  defer (fn() { out = out :+ 3 })()
  "done"
}
f()
out
"#;
    assert_eq!(run(source).inspect(), "[3, 2, 1]");
}

#[test]
fn test_defer_runs_on_throw_then_error_surfaces() {
    let source = r#"
let out = []
fn f() {
  defer (fn() { out = out :+ 1 })()
  defer (fn() { out = out :+ 2 })()
  defer (fn() { out = out :+ 3 })()
  throw {code: 9}
}
let caught = try { f() } catch { {code: c} => c }
[caught, out]
"#;
    assert_eq!(run(source).inspect(), "[9, [3, 2, 1]]");
}

#[test]
fn test_failing_defer_replaces_result() {
    let source = "fn f() {\n  defer boom()\n  \"ok\"\n}\nf()";
    assert!(run(source).inspect().contains("identifier not found"));
}

#[test]
fn test_block_scope_defer() {
    let source = r#"
let out = []
if true {
  defer (fn() { out = out :+ "deferred" })()
  out = out :+ "body"
}
out
"#;
    assert_eq!(run(source).inspect(), "[\"body\", \"deferred\"]");
}

// -------------------------------------------------------------------
// Builtins
// -------------------------------------------------------------------

#[test]
fn test_value_builtins() {
    assert_eq!(run_int("len(\"héllo\")"), 5);
    assert_eq!(run_str("type(1)"), "NUMBER");
    assert_eq!(run_str("type([])"), "LIST");
    assert_eq!(run_str("string(42)"), "42");
    assert_eq!(run_str("inspect(\"x\")"), "\"x\"");
    assert_eq!(run_int("first([7, 8])"), 7);
    assert_eq!(run("rest([7, 8])").inspect(), "[8]");
    assert_eq!(run("keys({b: 2, a: 1})").inspect(), "[\"a\", \"b\"]");
    assert_eq!(run("values({b: 2, a: 1})").inspect(), "[1, 2]");
}

#[test]
fn test_slice_builtin_makes_slice_values() {
    assert_eq!(run("[1, 2, 3, 4][slice(1, 3, nil)]").inspect(), "[2, 3]");
    assert_eq!(run_str("type(slice(1, nil, nil))"), "SLICE");
}

// -------------------------------------------------------------------
// Foreign functions
// -------------------------------------------------------------------

fn answer(_ctx: &mut slug_runtime::foreign::EvaluatorContext<'_>, _args: Vec<Object>) -> Object {
    Object::int(42)
}

fn panics(_ctx: &mut slug_runtime::foreign::EvaluatorContext<'_>, _args: Vec<Object>) -> Object {
    panic!("native failure")
}

#[test]
fn test_foreign_declaration_and_call() {
    let interp = Interp::new(Settings::new(".", "main"));
    interp.shared.foreign.register("main.answer", answer);
    let result = interp
        .run_source("foreign fn answer()\nanswer()", "<test>", "main")
        .expect("run");
    assert_eq!(result.inspect(), "42");
}

#[test]
fn test_unknown_foreign_declaration() {
    let result = run("foreign fn nonexistent()");
    assert!(result.inspect().contains("unknown foreign function"));
}

#[test]
fn test_foreign_panic_is_recovered() {
    let interp = Interp::new(Settings::new(".", "main"));
    interp.shared.foreign.register("main.panics", panics);
    let result = interp
        .run_source("foreign fn panics()\npanics()", "<test>", "main")
        .expect("run");
    match &result.value {
        Value::Error(e) => {
            assert!(e.message.contains("main.panics"));
            assert!(e.message.contains("native failure"));
        }
        other => panic!("expected error, got {:?}", other),
    }
}
