//! Hob interpreter.
//! Walks a parsed template against a data value: maintains `.`, `$`, the
//! LIFO variable stack, evaluates pipelines command by command, and emits
//! text to the caller's sink. Loop control (`break`/`continue`) travels as
//! an explicit signal returned by node execution, honored by `range`.

use std::collections::BTreeMap;
use std::io::Write;

use hob_ast::{Branch, Command, Expr, Node, Pipeline, Template};
use hob_value::{Value, ValueError};
use thiserror::Error;

mod builtins;

// ===================== Errors =====================

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("parse failed:\n{0}")]
    Parse(String),

    #[error("undefined variable ${0}")]
    UndefinedVariable(String),

    #[error("cannot assign to undeclared variable ${0}")]
    UndeclaredAssign(String),

    #[error("template '{0}' is not defined")]
    UnknownTemplate(String),

    #[error("can't give arguments to non-function {0}")]
    NotAFunction(&'static str),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

// ===================== Public API =====================

/// Function map supplied at execute time; names shadow functions attached to
/// the template.
pub type FuncMap = BTreeMap<String, Value>;

/// Render the template's root body against `data`.
pub fn execute(tmpl: &Template, out: &mut dyn Write, data: Value) -> Result<(), RenderError> {
    let root = tmpl.root();
    run(tmpl, out, &root, data, None)
}

/// Render a named sub-template from the common table.
pub fn execute_named(
    tmpl: &Template,
    out: &mut dyn Write,
    name: &str,
    data: Value,
) -> Result<(), RenderError> {
    let body =
        tmpl.lookup(name).ok_or_else(|| RenderError::UnknownTemplate(name.to_string()))?;
    run(tmpl, out, &body, data, None)
}

/// Render with an execute-time function map.
pub fn execute_with_funcs(
    tmpl: &Template,
    out: &mut dyn Write,
    data: Value,
    funcs: &FuncMap,
) -> Result<(), RenderError> {
    let root = tmpl.root();
    run(tmpl, out, &root, data, Some(funcs))
}

pub fn render_to_string(tmpl: &Template, data: Value) -> Result<String, RenderError> {
    let mut buf = Vec::new();
    execute(tmpl, &mut buf, data)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// One-shot: parse `source` and render it against `data`.
pub fn render(name: &str, source: &str, data: Value) -> Result<String, RenderError> {
    let tmpl = hob_parser::parse_str(name, source)
        .map_err(|diags| RenderError::Parse(hob_diagnostics::join(&diags)))?;
    render_to_string(&tmpl, data)
}

fn run(
    tmpl: &Template,
    out: &mut dyn Write,
    body: &[Node],
    data: Value,
    funcs: Option<&FuncMap>,
) -> Result<(), RenderError> {
    let mut ctx = Context::new(tmpl, data, funcs);
    ctx.exec_block(out, body)?;
    Ok(())
}

// ===================== Context =====================

/// Outcome of executing a node or block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Signal {
    Normal,
    Break,
    Continue,
}

/// One evaluation. Not reusable and not thread-safe; concurrent renders of
/// the same template each get their own context.
struct Context<'t> {
    tmpl: &'t Template,
    funcs: Option<&'t FuncMap>,
    dot: Value,
    root: Value,
    /// LIFO stack of (name, value). The bottom entry is the unnamed binding
    /// of the root value, so looking up the empty name yields `$`.
    vars: Vec<(String, Value)>,
}

impl<'t> Context<'t> {
    fn new(tmpl: &'t Template, data: Value, funcs: Option<&'t FuncMap>) -> Self {
        Self {
            tmpl,
            funcs,
            dot: data.clone(),
            root: data.clone(),
            vars: vec![(String::new(), data)],
        }
    }

    // ---- Variable stack ----

    fn mark(&self) -> usize {
        self.vars.len()
    }

    fn pop_to(&mut self, mark: usize) {
        self.vars.truncate(mark);
    }

    fn push_var(&mut self, name: &str, value: Value) {
        self.vars.push((name.to_string(), value));
    }

    fn get_var(&self, name: &str) -> Result<Value, RenderError> {
        for (n, v) in self.vars.iter().rev() {
            if n == name {
                return Ok(v.clone());
            }
        }
        Err(RenderError::UndefinedVariable(name.to_string()))
    }

    fn set_var(&mut self, name: &str, value: Value) -> Result<(), RenderError> {
        for (n, v) in self.vars.iter_mut().rev() {
            if n == name {
                *v = value;
                return Ok(());
            }
        }
        Err(RenderError::UndeclaredAssign(name.to_string()))
    }

    // ---- Node execution ----

    fn exec_block(&mut self, out: &mut dyn Write, nodes: &[Node]) -> Result<Signal, RenderError> {
        for node in nodes {
            match self.exec_node(out, node)? {
                Signal::Normal => {}
                sig => return Ok(sig),
            }
        }
        Ok(Signal::Normal)
    }

    fn exec_node(&mut self, out: &mut dyn Write, node: &Node) -> Result<Signal, RenderError> {
        match node {
            Node::Text(t) => {
                out.write_all(t.as_bytes())?;
                Ok(Signal::Normal)
            }
            Node::Action(p) => {
                let value = self.eval_pipeline(p)?;
                // A declaring action only mutates the stack.
                if p.decls.is_empty() {
                    write!(out, "{}", value)?;
                }
                Ok(Signal::Normal)
            }
            Node::If(b) => {
                let mark = self.mark();
                let cond = self.eval_pipeline(&b.pipeline)?;
                let sig = if cond.truthy() {
                    self.exec_block(out, &b.body)?
                } else {
                    self.exec_block(out, &b.else_body)?
                };
                self.pop_to(mark);
                Ok(sig)
            }
            Node::With(b) => {
                let mark = self.mark();
                let value = self.eval_pipeline(&b.pipeline)?;
                let sig = if value.truthy() {
                    let saved = std::mem::replace(&mut self.dot, value);
                    let sig = self.exec_block(out, &b.body)?;
                    self.dot = saved;
                    sig
                } else {
                    self.exec_block(out, &b.else_body)?
                };
                self.pop_to(mark);
                Ok(sig)
            }
            Node::Range(b) => self.exec_range(out, b),
            Node::Call { name, pipeline } => {
                self.exec_template_call(out, name, pipeline.as_ref())?;
                Ok(Signal::Normal)
            }
            Node::Break => Ok(Signal::Break),
            Node::Continue => Ok(Signal::Continue),
        }
    }

    fn exec_range(&mut self, out: &mut dyn Write, b: &Branch) -> Result<Signal, RenderError> {
        let mark = self.mark();
        let subject = self.eval_commands(&b.pipeline.commands)?;
        if !subject.truthy() {
            let sig = self.exec_block(out, &b.else_body)?;
            self.pop_to(mark);
            return Ok(sig);
        }

        let decls = &b.pipeline.decls;
        let assigns = b.pipeline.is_assign;
        let decl_base = self.mark();
        if !assigns {
            for name in decls {
                self.push_var(name, Value::Nil);
            }
        }

        for (key, value) in subject.iterate()? {
            match decls.len() {
                2 => {
                    if assigns {
                        self.set_var(&decls[0], key)?;
                        self.set_var(&decls[1], value.clone())?;
                    } else {
                        self.vars[decl_base].1 = key;
                        self.vars[decl_base + 1].1 = value.clone();
                    }
                }
                1 => {
                    if assigns {
                        self.set_var(&decls[0], value.clone())?;
                    } else {
                        self.vars[decl_base].1 = value.clone();
                    }
                }
                _ => {}
            }
            let iter_mark = self.mark();
            let saved = std::mem::replace(&mut self.dot, value);
            let sig = self.exec_block(out, &b.body)?;
            self.dot = saved;
            self.pop_to(iter_mark);
            if sig == Signal::Break {
                break;
            }
        }
        self.pop_to(mark);
        Ok(Signal::Normal)
    }

    fn exec_template_call(
        &mut self,
        out: &mut dyn Write,
        name: &str,
        pipeline: Option<&Pipeline>,
    ) -> Result<(), RenderError> {
        let body =
            self.tmpl.lookup(name).ok_or_else(|| RenderError::UnknownTemplate(name.to_string()))?;
        let arg = match pipeline {
            Some(p) => self.eval_pipeline(p)?,
            None => Value::Nil,
        };
        tracing::trace!(template = %name, "invoking template");
        // The callee gets its own context: fresh stack, `.` and `$` bound to
        // the argument, same sink. Nothing of ours is mutated.
        let mut child = Context::new(self.tmpl, arg, self.funcs);
        child.exec_block(out, &body)?;
        Ok(())
    }

    // ---- Pipelines and commands ----

    fn eval_pipeline(&mut self, p: &Pipeline) -> Result<Value, RenderError> {
        let value = self.eval_commands(&p.commands)?;
        for name in &p.decls {
            if p.is_assign {
                self.set_var(name, value.clone())?;
            } else {
                self.push_var(name, value.clone());
            }
        }
        Ok(value)
    }

    fn eval_commands(&mut self, commands: &[Command]) -> Result<Value, RenderError> {
        let mut piped: Option<Value> = None;
        for cmd in commands {
            let value = self.eval_command(cmd, piped.as_ref())?;
            piped = Some(value);
        }
        Ok(piped.unwrap_or(Value::Nil))
    }

    fn eval_command(&mut self, cmd: &Command, piped: Option<&Value>) -> Result<Value, RenderError> {
        // `and`/`or` are the only special forms: their arguments evaluate
        // lazily, left to right.
        if let Expr::Ident(name) = &cmd.args[0] {
            if name == "and" || name == "or" {
                return self.eval_and_or(name == "or", &cmd.args[1..], piped);
            }
        }
        let head = self.eval_expr(&cmd.args[0])?;
        if head.is_nil() {
            return Ok(Value::Nil);
        }
        if head.is_callable() {
            let mut args = Vec::with_capacity(cmd.args.len());
            for a in &cmd.args[1..] {
                args.push(self.eval_expr(a)?);
            }
            if let Some(extra) = piped {
                args.push(extra.clone());
            }
            return Ok(head.invoke(&args)?);
        }
        if cmd.args.len() > 1 || piped.is_some() {
            return Err(RenderError::NotAFunction(head.type_name()));
        }
        Ok(head)
    }

    /// Short-circuit scan: return the first argument whose truthiness hits
    /// the target (`or` wants truthy, `and` wants falsy); otherwise the last
    /// evaluated argument, or the piped value when one is present.
    fn eval_and_or(
        &mut self,
        target: bool,
        args: &[Expr],
        piped: Option<&Value>,
    ) -> Result<Value, RenderError> {
        let mut last = Value::Nil;
        for a in args {
            last = self.eval_expr(a)?;
            if last.truthy() == target {
                return Ok(last);
            }
        }
        if let Some(extra) = piped {
            return Ok(extra.clone());
        }
        Ok(last)
    }

    // ---- Expressions ----

    fn eval_expr(&mut self, e: &Expr) -> Result<Value, RenderError> {
        match e {
            Expr::Dot => Ok(self.dot.clone()),
            Expr::Root => Ok(self.root.clone()),
            Expr::Var(name) => self.get_var(name),
            Expr::Ident(name) => Ok(self.resolve_ident(name)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Str(s) => Ok(Value::string(s.clone())),
            Expr::Number(n) => Ok(n.to_value()),
            Expr::Char(c, w) => Ok(Value::Char(*c, *w)),
            Expr::Field(base, names) => {
                let start = match base {
                    Some(b) => self.eval_expr(b)?,
                    None => self.dot.clone(),
                };
                self.traverse_fields(start, names)
            }
            Expr::Pipeline(p) => self.eval_pipeline(p),
        }
    }

    /// Dotted chain: a nil anywhere ends the walk silently; a zero-argument
    /// callable is invoked before the next name applies.
    fn traverse_fields(&self, mut cur: Value, names: &[String]) -> Result<Value, RenderError> {
        for name in names {
            if cur.is_nil() {
                return Ok(Value::Nil);
            }
            if let Some(c) = cur.as_callable() {
                if c.required() == 0 {
                    cur = c.invoke(&[])?;
                    if cur.is_nil() {
                        return Ok(Value::Nil);
                    }
                }
            }
            cur = cur.member(name)?;
        }
        Ok(cur)
    }

    /// User globals first (execute-time map shadows attached ones), then
    /// builtins; unknown names are nil.
    fn resolve_ident(&self, name: &str) -> Value {
        if let Some(m) = self.funcs {
            if let Some(v) = m.get(name) {
                return v.clone();
            }
        }
        if let Some(v) = self.tmpl.func(name) {
            return v;
        }
        builtins::lookup(name).unwrap_or(Value::Nil)
    }
}
