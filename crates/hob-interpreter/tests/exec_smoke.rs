use std::cell::Cell;
use std::rc::Rc;

use hob_interpreter::{
    execute, execute_named, execute_with_funcs, render, render_to_string, FuncMap, RenderError,
};
use hob_parser::parse_str;
use hob_value::{Callable, Object, Value};

fn int_of(v: &Value) -> i64 {
    match v {
        Value::Int(n, _) => *n,
        Value::Uint(n, _) => *n as i64,
        other => panic!("expected an integer, got {:?}", other),
    }
}

fn add_func() -> Value {
    Value::Func(Callable::fixed("add", 2, |args| {
        Ok(Value::from(int_of(&args[0]) + int_of(&args[1])))
    }))
}

fn run_with(src: &str, data: Value, funcs: FuncMap) -> String {
    let tmpl = parse_str("test", src).expect("parse");
    let mut out = Vec::new();
    execute_with_funcs(&tmpl, &mut out, data, &funcs).expect("render");
    String::from_utf8(out).unwrap()
}

fn run(src: &str, data: Value) -> String {
    run_with(src, data, FuncMap::new())
}

fn run_err(src: &str, data: Value) -> RenderError {
    let tmpl = parse_str("test", src).expect("parse");
    let mut out = Vec::new();
    execute(&tmpl, &mut out, data).expect_err("expected a render error")
}

#[test]
fn field_lookup_on_record() {
    let mut o = Object::new();
    o.insert("name", "Joe");
    assert_eq!(run("{{.name}}", Value::object(o)), "Joe");
}

#[test]
fn pipe_feeds_last_argument() {
    let mut funcs = FuncMap::new();
    funcs.insert("add".to_string(), add_func());
    assert_eq!(run_with("{{ 1 | add 2 }}", Value::Nil, funcs), "3");
}

#[test]
fn method_call_then_field() {
    let mut o = Object::new();
    o.insert(
        "getOther",
        Value::Func(Callable::fixed("getOther", 1, |args| {
            let mut inner = Object::new();
            inner.insert("i", args[0].clone());
            Ok(Value::object(inner))
        })),
    );
    assert_eq!(run("{{ (.getOther 12).i }}", Value::object(o)), "12");
}

#[test]
fn branch_scopes_shadow_and_restore() {
    let src = "{{$x := 1}}{{if true}}{{$x := 2}}{{$x}}{{end}} {{$x}}";
    assert_eq!(run(src, Value::Nil), "2 1");
}

#[test]
fn range_with_key_and_value() {
    let src = "{{range $i,$e := .}} {{$i}}=>{{$e}}{{end}}";
    let data = Value::from(vec![5i64, 10, 15]);
    assert_eq!(run(src, data), " 0=>5 1=>10 2=>15");
}

#[test]
fn break_leaves_the_loop() {
    let src = "{{range .}}{{if ge . 10}}{{break}}{{end}}{{.}}{{end}}";
    let data = Value::from(vec![5i64, 10, 15]);
    assert_eq!(run(src, data), "5");
}

#[test]
fn continue_skips_an_iteration() {
    let src = "{{range .}}{{if eq . 10}}{{continue}}{{end}}{{.}}{{end}}";
    let data = Value::from(vec![5i64, 10, 15]);
    assert_eq!(run(src, data), "515");
}

#[test]
fn trim_markers_strip_adjacent_whitespace() {
    assert_eq!(run("  {{- \"a\" -}}  ", Value::Nil), "a");
    assert_eq!(run("XXX \t{{- \"E\" -}}\n YYY", Value::Nil), "XXXEYYY");
    // Trimming is only observable at the marked edges.
    assert_eq!(run("a {{\"b\"}} c", Value::Nil), "a b c");
}

#[test]
fn template_call_binds_dot_and_root() {
    let src = "{{define \"a\"}}{{.}} {{$}}{{end}}{{template \"a\" 12}}";
    assert_eq!(run(src, Value::Nil), "12 12");
}

#[test]
fn or_short_circuits_lazily() {
    let count = Rc::new(Cell::new(0i64));
    let value = Rc::new(Cell::new(1i64));
    let c = count.clone();
    let v = value.clone();
    let t = Value::Func(Callable::fixed("t", 0, move |_| {
        c.set(c.get() + 1);
        let cur = v.get();
        v.set(cur + 1);
        Ok(Value::from(cur))
    }));
    let mut funcs = FuncMap::new();
    funcs.insert("t".to_string(), t);
    assert_eq!(run_with("{{ or (t) (t) }}", Value::Nil, funcs), "1");
    // The first argument was truthy, so the second was never evaluated.
    assert_eq!(count.get(), 1);
}

#[test]
fn and_scans_until_falsy() {
    let count = Rc::new(Cell::new(0i64));
    let c = count.clone();
    let t = Value::Func(Callable::fixed("t", 0, move |_| {
        c.set(c.get() + 1);
        Ok(Value::from(c.get()))
    }));
    let mut funcs = FuncMap::new();
    funcs.insert("t".to_string(), t);
    // Every argument is truthy: and returns the last one evaluated.
    assert_eq!(run_with("{{ and (t) (t) }}", Value::Nil, funcs), "2");
    assert_eq!(count.get(), 2);
}

#[test]
fn and_or_failure_mid_scan_aborts() {
    let boom = Value::Func(Callable::fixed("boom", 0, |_| {
        Err(hob_value::ValueError::Function("boom".to_string()))
    }));
    let mut funcs = FuncMap::new();
    funcs.insert("boom".to_string(), boom);
    let tmpl = parse_str("test", "{{ or false (boom) }}").unwrap();
    let mut out = Vec::new();
    let err = execute_with_funcs(&tmpl, &mut out, Value::Nil, &funcs).unwrap_err();
    assert!(matches!(err, RenderError::Value(_)));
}

#[test]
fn print_spacing_rules() {
    let src = "{{ print \"a\" \"b\" }}|{{ print 1 2 }}|{{ print 1 \"a\" }}";
    assert_eq!(run(src, Value::Nil), "ab|1 2|1a");
}

#[test]
fn with_sees_unchanged_root() {
    let mut o = Object::new();
    o.insert("a", 1i64);
    o.insert("b", "R");
    assert_eq!(run("{{with .a}}{{$.b}}{{end}}", Value::object(o)), "R");
}

#[test]
fn with_replaces_dot_and_restores_it() {
    let mut o = Object::new();
    o.insert("a", 5i64);
    assert_eq!(run("{{with .a}}{{.}}{{end}}{{.a}}", Value::object(o)), "55");
}

#[test]
fn with_falsy_takes_else() {
    assert_eq!(run("{{with 0}}x{{else}}y{{end}}", Value::Nil), "y");
}

#[test]
fn define_then_call_renders_body() {
    assert_eq!(run("{{define \"a\"}}B{{end}}{{template \"a\"}}", Value::Nil), "B");
}

#[test]
fn template_without_pipeline_gets_nil() {
    assert_eq!(run("{{define \"a\"}}x{{.}}y{{end}}{{template \"a\"}}", Value::Nil), "xy");
}

#[test]
fn block_defines_and_invokes() {
    assert_eq!(run("{{block \"hdr\" \"T\"}}[{{.}}]{{end}}", Value::Nil), "[T]");
}

#[test]
fn else_if_chain() {
    let src = "{{if .a}}1{{else if .b}}2{{else}}3{{end}}";
    let mut o = Object::new();
    o.insert("a", false);
    o.insert("b", true);
    assert_eq!(run(src, Value::object(o)), "2");
    let mut o = Object::new();
    o.insert("a", false);
    o.insert("b", false);
    assert_eq!(run(src, Value::object(o)), "3");
}

#[test]
fn range_else_on_empty() {
    assert_eq!(run("{{range .}}x{{else}}empty{{end}}", Value::seq(vec![])), "empty");
}

#[test]
fn range_over_map_is_key_ordered() {
    let data = Value::map(vec![
        (Value::from("b"), Value::from(2i64)),
        (Value::from("a"), Value::from(1i64)),
    ]);
    assert_eq!(run("{{range $k,$v := .}}{{$k}}={{$v}};{{end}}", data), "a=1;b=2;");
}

#[test]
fn range_over_int_and_string() {
    assert_eq!(run("{{range 3}}{{.}}{{end}}", Value::Nil), "012");
    assert_eq!(run("{{range $i,$c := \"aß\"}}{{$i}}:{{$c}} {{end}}", Value::Nil), "0:a 1:ß ");
}

#[test]
fn range_body_runs_once_per_element() {
    let data = Value::from(vec![1i64, 2, 3, 4]);
    assert_eq!(run("{{range .}}x{{end}}", data), "xxxx");
}

#[test]
fn range_decls_do_not_leak() {
    let err = run_err("{{range $i := .}}{{end}}{{$i}}", Value::from(vec![1i64]));
    assert!(matches!(err, RenderError::UndefinedVariable(name) if name == "i"));
}

#[test]
fn assignment_updates_existing_binding() {
    assert_eq!(run("{{$x := 1}}{{$x = 2}}{{$x}}", Value::Nil), "2");
}

#[test]
fn assignment_inside_branch_survives() {
    // `=` writes through to the outer binding; `:=` would shadow.
    assert_eq!(run("{{$x := 1}}{{if true}}{{$x = 2}}{{end}}{{$x}}", Value::Nil), "2");
}

#[test]
fn assignment_to_undeclared_fails() {
    let err = run_err("{{$nope = 1}}", Value::Nil);
    assert!(matches!(err, RenderError::UndeclaredAssign(name) if name == "nope"));
}

#[test]
fn undefined_variable_fails() {
    let err = run_err("{{$ghost}}", Value::Nil);
    assert!(matches!(err, RenderError::UndefinedVariable(name) if name == "ghost"));
}

#[test]
fn unknown_template_fails() {
    let err = run_err("{{template \"nope\"}}", Value::Nil);
    assert!(matches!(err, RenderError::UnknownTemplate(name) if name == "nope"));
}

#[test]
fn unknown_function_is_nil() {
    assert_eq!(run("[{{nosuch}}]", Value::Nil), "[]");
    // A nil head swallows its arguments and yields nil.
    assert_eq!(run("[{{nosuch 1 2}}]", Value::Nil), "[]");
}

#[test]
fn literal_with_arguments_fails() {
    let err = run_err("{{1 2}}", Value::Nil);
    assert!(matches!(err, RenderError::NotAFunction(_)));
    let err = run_err("{{1 | 2}}", Value::Nil);
    assert!(matches!(err, RenderError::NotAFunction(_)));
}

#[test]
fn arity_mismatch_fails() {
    let mut funcs = FuncMap::new();
    funcs.insert("add".to_string(), add_func());
    let tmpl = parse_str("test", "{{add 1}}").unwrap();
    let mut out = Vec::new();
    let err = execute_with_funcs(&tmpl, &mut out, Value::Nil, &funcs).unwrap_err();
    assert!(matches!(err, RenderError::Value(hob_value::ValueError::Arity { .. })));
}

#[test]
fn user_function_failure_surfaces() {
    let boom = Value::Func(Callable::fixed("boom", 0, |_| {
        Err(hob_value::ValueError::Function("user says no".to_string()))
    }));
    let mut funcs = FuncMap::new();
    funcs.insert("boom".to_string(), boom);
    let tmpl = parse_str("test", "a{{boom}}b").unwrap();
    let mut out = Vec::new();
    let err = execute_with_funcs(&tmpl, &mut out, Value::Nil, &funcs).unwrap_err();
    assert!(err.to_string().contains("user says no"));
    // Output already emitted is not retracted.
    assert_eq!(String::from_utf8(out).unwrap(), "a");
}

#[test]
fn nil_field_chain_stops_silently() {
    let mut o = Object::new();
    o.insert("a", Value::Nil);
    assert_eq!(run("[{{.a.b.c}}]", Value::object(o)), "[]");
}

#[test]
fn missing_field_fails() {
    let o = Object::new();
    let err = run_err("{{.ghost}}", Value::object(o));
    assert!(matches!(err, RenderError::Value(hob_value::ValueError::NoSuchField(_))));
}

#[test]
fn zero_arg_method_is_invoked_in_chain() {
    let mut inner = Object::new();
    inner.insert("n", 7i64);
    let inner = Value::object(inner);
    let mut o = Object::new();
    let captured = inner.clone();
    o.insert(
        "next",
        Value::Func(Callable::fixed("next", 0, move |_| Ok(captured.clone()))),
    );
    assert_eq!(run("{{.next.n}}", Value::object(o)), "7");
}

#[test]
fn index_and_len_builtins() {
    let mut o = Object::new();
    o.insert("xs", Value::from(vec![10i64, 20, 30]));
    let data = Value::object(o);
    assert_eq!(run("{{index .xs 1}}", data.clone()), "20");
    assert_eq!(run("{{len .xs}}", data), "3");
}

#[test]
fn index_out_of_range_fails() {
    let err = run_err("{{index . 5}}", Value::from(vec![1i64]));
    assert!(matches!(err, RenderError::Value(hob_value::ValueError::OutOfRange { .. })));
}

#[test]
fn literal_rendering() {
    assert_eq!(run("{{'a'}} {{1.5}} {{3.0}} {{true}} {{\"s\"}}", Value::Nil), "a 1.5 3 true s");
}

#[test]
fn attached_functions_are_visible() {
    let tmpl = parse_str("test", "{{double 21}}").unwrap();
    tmpl.register_func(
        "double",
        Callable::fixed("double", 1, |args| Ok(Value::from(int_of(&args[0]) * 2))),
    );
    assert_eq!(render_to_string(&tmpl, Value::Nil).unwrap(), "42");
}

#[test]
fn execute_time_funcs_shadow_attached() {
    let tmpl = parse_str("test", "{{f}}").unwrap();
    tmpl.register_func("f", Callable::fixed("f", 0, |_| Ok(Value::from("attached"))));
    let mut funcs = FuncMap::new();
    funcs.insert(
        "f".to_string(),
        Value::Func(Callable::fixed("f", 0, |_| Ok(Value::from("supplied")))),
    );
    let mut out = Vec::new();
    execute_with_funcs(&tmpl, &mut out, Value::Nil, &funcs).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "supplied");
}

#[test]
fn execute_named_runs_a_sub_template() {
    let tmpl = parse_str("test", "root{{define \"part\"}}P={{.}}{{end}}").unwrap();
    let mut out = Vec::new();
    execute_named(&tmpl, &mut out, "part", Value::from(9i64)).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "P=9");
}

#[test]
fn one_shot_render() {
    assert_eq!(render("t", "n={{.}}", Value::from(5i64)).unwrap(), "n=5");
    let err = render("t", "{{", Value::Nil).unwrap_err();
    assert!(matches!(err, RenderError::Parse(_)));
}

#[test]
fn nested_range_break_only_exits_inner() {
    let src = "{{range .}}{{range .}}{{if ge . 2}}{{break}}{{end}}{{.}}{{end}};{{end}}";
    let data = Value::seq(vec![
        Value::from(vec![1i64, 2, 3]),
        Value::from(vec![0i64, 5]),
    ]);
    assert_eq!(run(src, data), "1;0;");
}

#[test]
fn variadic_user_function_packs_arguments() {
    let joiner = Value::Func(Callable::variadic("join", 0, |args| {
        let parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Ok(Value::string(parts.join("-")))
    }));
    let mut funcs = FuncMap::new();
    funcs.insert("join".to_string(), joiner);
    assert_eq!(run_with("{{join 1 2 3}}", Value::Nil, funcs), "1-2-3");
}
