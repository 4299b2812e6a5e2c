//! Built-in functions. `and` and `or` are special forms handled by the
//! command evaluator and never reach this table.

use std::cmp::Ordering;

use hob_value::{Callable, Value, ValueError};

/// Resolve a builtin by name. Called after user globals, so a user function
/// of the same name wins.
pub fn lookup(name: &str) -> Option<Value> {
    let c = match name {
        "not" => Callable::fixed("not", 1, |args| Ok(Value::Bool(!args[0].truthy()))),
        "call" => Callable::variadic("call", 1, |args| args[0].invoke(&args[1..])),
        "index" => Callable::variadic("index", 2, |args| {
            let mut cur = args[0].clone();
            for key in &args[1..] {
                cur = cur.index(key)?;
            }
            Ok(cur)
        }),
        "len" => Callable::fixed("len", 1, |args| {
            args[0].length().map(|n| Value::from(n as i64))
        }),
        "print" => Callable::variadic("print", 0, print_fn),
        "println" => Callable::variadic("println", 0, println_fn),
        "eq" => Callable::variadic("eq", 2, |args| {
            Ok(Value::Bool(args[1..].iter().any(|a| *a == args[0])))
        }),
        "ne" => Callable::variadic("ne", 2, |args| {
            Ok(Value::Bool(args[1..].iter().all(|a| *a != args[0])))
        }),
        "lt" => compare("lt", Ordering::is_lt),
        "le" => compare("le", Ordering::is_le),
        "gt" => compare("gt", Ordering::is_gt),
        "ge" => compare("ge", Ordering::is_ge),
        _ => return None,
    };
    Some(Value::Func(c))
}

fn compare(name: &'static str, pick: fn(Ordering) -> bool) -> Callable {
    Callable::fixed(name, 2, move |args| {
        args[0].try_cmp(&args[1]).map(|o| Value::Bool(pick(o)))
    })
}

/// Concatenates the text of all operands, adding a space between two
/// neighbors only when neither is a string.
fn print_fn(args: &[Value]) -> Result<Value, ValueError> {
    let mut out = String::new();
    for (i, a) in args.iter().enumerate() {
        if i > 0 && !matches!(args[i - 1], Value::Str(_)) && !matches!(a, Value::Str(_)) {
            out.push(' ');
        }
        out.push_str(&a.to_string());
    }
    Ok(Value::string(out))
}

/// Space between every pair of operands, newline at the end.
fn println_fn(args: &[Value]) -> Result<Value, ValueError> {
    let mut out = String::new();
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&a.to_string());
    }
    out.push('\n');
    Ok(Value::string(out))
}
