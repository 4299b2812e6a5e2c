//! Abstract syntax tree for hob templates.
//!
//! Everything here is passive data built by `hob-parser` and walked by
//! `hob-interpreter`: expressions, commands, pipelines, nodes, and the
//! `Template` handle with its shared common table of named templates.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use hob_value::{Callable, CharWidth, FloatWidth, IntWidth, Value};

// ===================== Expressions =====================

/// A numeric literal, classified at parse time into the narrowest kind that
/// holds it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NumberLit {
    Int(i64, IntWidth),
    Uint(u64, IntWidth),
    Float(f64, FloatWidth),
}

impl NumberLit {
    pub fn to_value(self) -> Value {
        match self {
            NumberLit::Int(n, w) => Value::Int(n, w),
            NumberLit::Uint(n, w) => Value::Uint(n, w),
            NumberLit::Float(n, w) => Value::Float(n, w),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// The current subject, `.`.
    Dot,
    /// The root subject, `$`.
    Root,
    /// `$name` — variable lookup in the scope stack.
    Var(String),
    /// Dotted member chain; `base` absent means the chain starts at `.`.
    Field(Option<Box<Expr>>, Vec<String>),
    /// Bare identifier: a function name resolved at evaluation time.
    Ident(String),
    Bool(bool),
    Str(String),
    Number(NumberLit),
    Char(char, CharWidth),
    /// Parenthesized sub-pipeline.
    Pipeline(Box<Pipeline>),
}

/// One command: whitespace-separated arguments, first argument is the
/// callee candidate. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub args: Vec<Expr>,
}

/// `$a, $b := cmd | cmd | …`. `decls` has up to two names (two only in a
/// `range` header); `is_assign` distinguishes `=` from `:=`.
#[derive(Clone, Debug, PartialEq)]
pub struct Pipeline {
    pub is_assign: bool,
    pub decls: Vec<String>,
    pub commands: Vec<Command>,
}

// ===================== Nodes =====================

#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    pub pipeline: Pipeline,
    pub body: Vec<Node>,
    pub else_body: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Text(String),
    Action(Pipeline),
    If(Branch),
    With(Branch),
    Range(Branch),
    Call { name: String, pipeline: Option<Pipeline> },
    Break,
    Continue,
}

/// True when the block would render nothing structural: no nodes, or only
/// whitespace-only text.
pub fn block_is_empty(nodes: &[Node]) -> bool {
    nodes.iter().all(|n| match n {
        Node::Text(t) => t.chars().all(char::is_whitespace),
        _ => false,
    })
}

// ===================== Template =====================

/// A parsed block. Immutable after parse; shared, not copied.
pub type Block = Rc<Vec<Node>>;

/// State shared by every template of one parse tree: the name → body table
/// (the root has an entry under its own name) and the globals function map.
#[derive(Debug, Default)]
pub struct Common {
    pub templates: BTreeMap<String, Block>,
    pub globals: BTreeMap<String, Value>,
}

#[derive(Debug)]
pub struct Template {
    name: String,
    root: Block,
    common: Rc<RefCell<Common>>,
}

impl Template {
    /// Empty template carrying a fresh common table with a self-entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_parts(name, Vec::new(), Common::default())
    }

    /// Assemble a template from a parsed root block and the common table the
    /// parse filled in. Installs the self-entry.
    pub fn from_parts(name: impl Into<String>, root: Vec<Node>, common: Common) -> Self {
        let name = name.into();
        let root: Block = Rc::new(root);
        let common = Rc::new(RefCell::new(common));
        common.borrow_mut().templates.insert(name.clone(), root.clone());
        Self { name, root, common }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> Block {
        self.root.clone()
    }

    /// No nodes, or only whitespace-only text nodes.
    pub fn is_empty(&self) -> bool {
        block_is_empty(&self.root)
    }

    /// Body of a named template from the common table.
    pub fn lookup(&self, name: &str) -> Option<Block> {
        self.common.borrow().templates.get(name).cloned()
    }

    /// The named sub-template as a `Template` sharing this common table.
    pub fn get_sub(&self, name: &str) -> Option<Template> {
        let root = self.lookup(name)?;
        Some(Template { name: name.to_string(), root, common: self.common.clone() })
    }

    /// Names in the common table, in table order.
    pub fn sub_names(&self) -> Vec<String> {
        self.common.borrow().templates.keys().cloned().collect()
    }

    /// Register (or replace) a named body. Last writer wins.
    pub fn register(&self, name: impl Into<String>, body: Block) {
        let name = name.into();
        if self.common.borrow().templates.contains_key(&name) {
            tracing::debug!(template = %name, "replacing template body");
        }
        self.common.borrow_mut().templates.insert(name, body);
    }

    /// Attach a function to the globals map shared by this parse tree.
    pub fn register_func(&self, name: impl Into<String>, f: Callable) {
        self.common.borrow_mut().globals.insert(name.into(), Value::Func(f));
    }

    /// Globals lookup used during evaluation.
    pub fn func(&self, name: &str) -> Option<Value> {
        self.common.borrow().globals.get(name).cloned()
    }

    /// Merge another parse result into this template (the streaming-parse
    /// rule): unknown names are inserted; an existing entry is overwritten
    /// only when the incoming body is non-empty. The incoming root arrives
    /// through its own self-entry. Globals stay ours.
    pub fn absorb(&mut self, other: &Template) {
        if Rc::ptr_eq(&self.common, &other.common) {
            return;
        }
        let incoming = other.common.borrow();
        let mut table = self.common.borrow_mut();
        for (name, body) in &incoming.templates {
            match table.templates.get(name) {
                None => {
                    table.templates.insert(name.clone(), body.clone());
                }
                Some(_) if !block_is_empty(body) => {
                    tracing::debug!(template = %name, "merge replaces template body");
                    table.templates.insert(name.clone(), body.clone());
                }
                Some(_) => {}
            }
        }
        if let Some(root) = table.templates.get(&self.name) {
            self.root = root.clone();
        }
        drop(table);
    }

    /// Canonical source for the whole parse tree: the root body first, then
    /// every other named template as a `define` block. Re-parseable.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for node in self.root.iter() {
            out.push_str(&node.to_string());
        }
        let common = self.common.borrow();
        for (name, body) in &common.templates {
            if *name == self.name {
                continue;
            }
            out.push_str(&format!("{{{{define {}}}}}", quote(name)));
            for node in body.iter() {
                out.push_str(&node.to_string());
            }
            out.push_str("{{end}}");
        }
        out
    }
}

/// Cloning copies the common table (bodies stay shared) so the clone's
/// table is independent; the self-entry keying makes the clone's root its
/// own entry without extra bookkeeping.
impl Clone for Template {
    fn clone(&self) -> Self {
        let src = self.common.borrow();
        let common = Common { templates: src.templates.clone(), globals: src.globals.clone() };
        Self {
            name: self.name.clone(),
            root: self.root.clone(),
            common: Rc::new(RefCell::new(common)),
        }
    }
}

// ===================== Canonical syntax =====================

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Dot => write!(f, "."),
            Expr::Root => write!(f, "$"),
            Expr::Var(name) => write!(f, "${}", name),
            Expr::Field(base, names) => {
                match base.as_deref() {
                    None => {}
                    Some(Expr::Pipeline(p)) => write!(f, "({})", p)?,
                    Some(other) => write!(f, "{}", other)?,
                }
                for n in names {
                    write!(f, ".{}", n)?;
                }
                Ok(())
            }
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Str(s) => write!(f, "{}", quote(s)),
            Expr::Number(NumberLit::Int(n, _)) => write!(f, "{}", n),
            Expr::Number(NumberLit::Uint(n, _)) => write!(f, "{}", n),
            // Debug form keeps the decimal point so the literal re-parses
            // as a float.
            Expr::Number(NumberLit::Float(n, FloatWidth::W32)) => write!(f, "{:?}", *n as f32),
            Expr::Number(NumberLit::Float(n, FloatWidth::W64)) => write!(f, "{:?}", n),
            Expr::Char(c, _) => match c {
                '\n' => write!(f, "'\\n'"),
                '\r' => write!(f, "'\\r'"),
                '\t' => write!(f, "'\\t'"),
                '\'' => write!(f, "'\\''"),
                '\\' => write!(f, "'\\\\'"),
                _ => write!(f, "'{}'", c),
            },
            Expr::Pipeline(p) => write!(f, "({})", p),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", a)?;
        }
        Ok(())
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.decls.is_empty() {
            for (i, d) in self.decls.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "${}", d)?;
            }
            write!(f, " {} ", if self.is_assign { "=" } else { ":=" })?;
        }
        for (i, c) in self.commands.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    for n in nodes {
        write!(f, "{}", n)?;
    }
    Ok(())
}

fn write_branch(f: &mut fmt::Formatter<'_>, kw: &str, b: &Branch) -> fmt::Result {
    write!(f, "{{{{{} {}}}}}", kw, b.pipeline)?;
    write_block(f, &b.body)?;
    if !b.else_body.is_empty() {
        write!(f, "{{{{else}}}}")?;
        write_block(f, &b.else_body)?;
    }
    write!(f, "{{{{end}}}}")
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(t) => write!(f, "{}", t),
            Node::Action(p) => write!(f, "{{{{{}}}}}", p),
            Node::If(b) => write_branch(f, "if", b),
            Node::With(b) => write_branch(f, "with", b),
            Node::Range(b) => write_branch(f, "range", b),
            Node::Call { name, pipeline: Some(p) } => {
                write!(f, "{{{{template {} {}}}}}", quote(name), p)
            }
            Node::Call { name, pipeline: None } => write!(f, "{{{{template {}}}}}", quote(name)),
            Node::Break => write!(f, "{{{{break}}}}"),
            Node::Continue => write!(f, "{{{{continue}}}}"),
        }
    }
}

// ===================== Tests =====================
