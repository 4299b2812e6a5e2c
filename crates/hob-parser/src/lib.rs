//! Hob template parser.
//! Text mode accumulates literal bytes until an open delimiter; action mode
//! dispatches on the leading keyword (`if`, `with`, `range`, `define`,
//! `block`, `template`, `else`, `end`, `break`, `continue`) and otherwise
//! parses a pipeline. Nested bodies are parsed recursively; a body parse
//! reports how it was terminated and the caller decides whether that
//! terminator was legal there.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;

use hob_ast::{Block, Branch, Command, Common, Expr, Node, Pipeline, Template};
use hob_diagnostics::{Diagnostic, Span};

pub mod scan;

use scan::{is_ident_start, scan_char, scan_number, scan_string, Scanner};

pub const DEFAULT_OPEN: &str = "{{";
pub const DEFAULT_CLOSE: &str = "}}";

pub type ParseResult<T> = Result<T, Vec<Diagnostic>>;

type PResult<T> = Result<T, Diagnostic>;

// ===================== Public API =====================

/// Parse a template with the default `{{` `}}` delimiters.
pub fn parse_str(name: &str, source: &str) -> ParseResult<Template> {
    parse_with_delims(name, source, DEFAULT_OPEN, DEFAULT_CLOSE)
}

/// Parse with an overridden delimiter pair. Nested `define`/`block` bodies
/// inherit the pair.
pub fn parse_with_delims(
    name: &str,
    source: &str,
    open: &str,
    close: &str,
) -> ParseResult<Template> {
    if open.is_empty() || close.is_empty() {
        return Err(vec![Diagnostic::error(
            "bad-delims",
            "delimiters must be non-empty",
            Span::point(name, 0, 1, 1),
        )]);
    }
    Parser::new(name, source, open, close).run().map_err(|d| vec![d])
}

/// Parse a template file. The scoped read releases the handle on all paths.
pub fn parse_file(name: &str, path: impl AsRef<Path>) -> ParseResult<Template> {
    let source = fs::read_to_string(path.as_ref()).map_err(|e| {
        vec![Diagnostic::error(
            "io",
            format!("failed to read {}: {}", path.as_ref().display(), e),
            Span::point(name, 0, 1, 1),
        )]
    })?;
    parse_str(name, &source)
}

/// Parse from any byte stream.
pub fn parse_reader(name: &str, mut reader: impl Read) -> ParseResult<Template> {
    let mut source = String::new();
    reader.read_to_string(&mut source).map_err(|e| {
        vec![Diagnostic::error(
            "io",
            format!("failed to read template stream: {}", e),
            Span::point(name, 0, 1, 1),
        )]
    })?;
    parse_str(name, &source)
}

/// Parse `source` and merge the result into `tmpl`: new names are added,
/// existing names are replaced only by a structurally non-empty body.
pub fn extend_str(tmpl: &mut Template, source: &str) -> ParseResult<()> {
    extend_with_delims(tmpl, source, DEFAULT_OPEN, DEFAULT_CLOSE)
}

pub fn extend_with_delims(
    tmpl: &mut Template,
    source: &str,
    open: &str,
    close: &str,
) -> ParseResult<()> {
    let name = tmpl.name().to_string();
    let fresh = parse_with_delims(&name, source, open, close)?;
    tmpl.absorb(&fresh);
    Ok(())
}

pub fn extend_file(tmpl: &mut Template, path: impl AsRef<Path>) -> ParseResult<()> {
    let name = tmpl.name().to_string();
    let fresh = parse_file(&name, path)?;
    tmpl.absorb(&fresh);
    Ok(())
}

pub fn extend_reader(tmpl: &mut Template, reader: impl Read) -> ParseResult<()> {
    let name = tmpl.name().to_string();
    let fresh = parse_reader(&name, reader)?;
    tmpl.absorb(&fresh);
    Ok(())
}

// ===================== Parser =====================

/// How a body parse was terminated.
#[derive(Debug)]
enum Term {
    Eof,
    End,
    Else,
    ElseIf(Pipeline),
}

/// Result of one action.
enum Parsed {
    Node(Node),
    /// `define` registers a template without emitting a node.
    Nothing,
    Term(Term),
}

struct Parser<'s> {
    sc: Scanner<'s>,
    open: String,
    close: String,
    close_trim: String,
    templates: BTreeMap<String, Block>,
    /// Set by a ` -}}` marker: strip leading whitespace off the next text.
    trim_next: bool,
    range_depth: u32,
}

impl<'s> Parser<'s> {
    fn new(name: &'s str, source: &'s str, open: &str, close: &str) -> Self {
        Self {
            sc: Scanner::new(name, source),
            open: open.to_string(),
            close: close.to_string(),
            close_trim: format!("-{}", close),
            templates: BTreeMap::new(),
            trim_next: false,
            range_depth: 0,
        }
    }

    fn run(mut self) -> PResult<Template> {
        let (nodes, term) = self.parse_block()?;
        match term {
            Term::Eof => {
                let common = Common { templates: self.templates, globals: BTreeMap::new() };
                Ok(Template::from_parts(self.sc.name(), nodes, common))
            }
            Term::End => Err(self.err("stray-end", "unexpected end action")),
            Term::Else | Term::ElseIf(_) => {
                Err(self.err("stray-else", "unexpected else action"))
            }
        }
    }

    fn err(&self, category: &'static str, msg: impl Into<String>) -> Diagnostic {
        Diagnostic::error(category, msg, self.sc.here())
    }

    fn define(&mut self, name: String, body: Vec<Node>) {
        if self.templates.contains_key(&name) {
            tracing::debug!(template = %name, "redefining sub-template");
        } else {
            tracing::debug!(template = %name, "registered sub-template");
        }
        self.templates.insert(name, Rc::new(body));
    }

    // ---- Text and action modes ----

    fn parse_block(&mut self) -> PResult<(Vec<Node>, Term)> {
        let mut nodes = Vec::new();
        loop {
            let (mut text, found) = self.sc.take_until(&self.open);
            if self.trim_next {
                text = text.trim_start().to_string();
                self.trim_next = false;
            }
            if !found {
                if !text.is_empty() {
                    nodes.push(Node::Text(text));
                }
                return Ok((nodes, Term::Eof));
            }
            // Left trim marker: `-` plus whitespace just inside the open
            // delimiter strips trailing whitespace off the preceding text.
            if self.sc.peek() == Some(b'-')
                && matches!(self.sc.peek_at(1), Some(b) if b.is_ascii_whitespace())
            {
                self.sc.bump();
                text = text.trim_end().to_string();
            }
            if !text.is_empty() {
                nodes.push(Node::Text(text));
            }
            match self.parse_action()? {
                Parsed::Node(n) => nodes.push(n),
                Parsed::Nothing => {}
                Parsed::Term(t) => return Ok((nodes, t)),
            }
        }
    }

    fn parse_action(&mut self) -> PResult<Parsed> {
        self.sc.skip_ws();
        let kw_mark = self.sc.mark();
        let ident = self.sc.read_ident();
        match ident.as_str() {
            "if" => self.parse_branch("if"),
            "with" => self.parse_branch("with"),
            "range" => self.parse_branch("range"),
            "block" => self.parse_block_action(),
            "define" => self.parse_define(),
            "template" => self.parse_template_call(),
            "end" => {
                self.end_action()?;
                Ok(Parsed::Term(Term::End))
            }
            "else" => {
                self.sc.skip_ws();
                let m = self.sc.mark();
                if self.sc.read_ident() == "if" {
                    let p = self.parse_pipeline(false)?;
                    self.end_action()?;
                    Ok(Parsed::Term(Term::ElseIf(p)))
                } else {
                    self.sc.reset(m);
                    self.end_action()?;
                    Ok(Parsed::Term(Term::Else))
                }
            }
            "break" => {
                if self.range_depth == 0 {
                    return Err(self.err("break-outside-range", "break is only allowed inside range"));
                }
                self.end_action()?;
                Ok(Parsed::Node(Node::Break))
            }
            "continue" => {
                if self.range_depth == 0 {
                    return Err(
                        self.err("continue-outside-range", "continue is only allowed inside range")
                    );
                }
                self.end_action()?;
                Ok(Parsed::Node(Node::Continue))
            }
            _ => {
                // Not a keyword: put the identifier back and read a pipeline.
                self.sc.reset(kw_mark);
                let p = self.parse_pipeline(false)?;
                self.end_action()?;
                Ok(Parsed::Node(Node::Action(p)))
            }
        }
    }

    fn parse_branch(&mut self, kw: &'static str) -> PResult<Parsed> {
        let is_range = kw == "range";
        let pipeline = self.parse_pipeline(is_range)?;
        self.end_action()?;
        if is_range {
            self.range_depth += 1;
        }
        let (body, term) = self.parse_block()?;
        if is_range {
            self.range_depth -= 1;
        }
        let else_body = self.parse_else_arm(term, kw)?;
        let branch = Branch { pipeline, body, else_body };
        Ok(Parsed::Node(match kw {
            "if" => Node::If(branch),
            "with" => Node::With(branch),
            _ => Node::Range(branch),
        }))
    }

    /// Handle the terminator of a branch body: nothing, a plain else arm, or
    /// an `else if` chain (one `end` closes the whole chain).
    fn parse_else_arm(&mut self, term: Term, kw: &'static str) -> PResult<Vec<Node>> {
        match term {
            Term::End => Ok(Vec::new()),
            Term::Else => {
                let (nodes, term) = self.parse_block()?;
                match term {
                    Term::End => Ok(nodes),
                    Term::Eof => Err(self.unclosed(kw)),
                    Term::Else | Term::ElseIf(_) => {
                        Err(self.err("stray-else", "unexpected second else"))
                    }
                }
            }
            Term::ElseIf(pipeline) => Ok(vec![self.finish_if_chain(pipeline)?]),
            Term::Eof => Err(self.unclosed(kw)),
        }
    }

    fn finish_if_chain(&mut self, pipeline: Pipeline) -> PResult<Node> {
        let (body, term) = self.parse_block()?;
        let else_body = self.parse_else_arm(term, "if")?;
        Ok(Node::If(Branch { pipeline, body, else_body }))
    }

    fn parse_define(&mut self) -> PResult<Parsed> {
        let name = self.parse_template_name()?;
        self.end_action()?;
        let saved = std::mem::replace(&mut self.range_depth, 0);
        let (body, term) = self.parse_block()?;
        self.range_depth = saved;
        match term {
            Term::End => {}
            Term::Eof => return Err(self.unclosed("define")),
            Term::Else | Term::ElseIf(_) => {
                return Err(self.err("stray-else", "unexpected else in define"))
            }
        }
        self.define(name, body);
        Ok(Parsed::Nothing)
    }

    /// `block "name" pipeline`: define the body under the name and emit the
    /// call in place.
    fn parse_block_action(&mut self) -> PResult<Parsed> {
        let name = self.parse_template_name()?;
        let pipeline = self.parse_pipeline(false)?;
        self.end_action()?;
        let saved = std::mem::replace(&mut self.range_depth, 0);
        let (body, term) = self.parse_block()?;
        self.range_depth = saved;
        match term {
            Term::End => {}
            Term::Eof => return Err(self.unclosed("block")),
            Term::Else | Term::ElseIf(_) => {
                return Err(self.err("stray-else", "unexpected else in block"))
            }
        }
        self.define(name.clone(), body);
        Ok(Parsed::Node(Node::Call { name, pipeline: Some(pipeline) }))
    }

    fn parse_template_call(&mut self) -> PResult<Parsed> {
        let name = self.parse_template_name()?;
        self.sc.skip_ws();
        let pipeline = if self.at_terminator() || self.sc.at_eof() {
            None
        } else {
            Some(self.parse_pipeline(false)?)
        };
        self.end_action()?;
        Ok(Parsed::Node(Node::Call { name, pipeline }))
    }

    fn parse_template_name(&mut self) -> PResult<String> {
        self.sc.skip_ws();
        match scan_string(&mut self.sc) {
            Ok(Some(s)) => Ok(s),
            Ok(None) => {
                Err(self.err("bad-template-name", "template name must be a string literal"))
            }
            Err(msg) => Err(self.err("bad-string", msg)),
        }
    }

    fn unclosed(&self, kw: &str) -> Diagnostic {
        self.err("unexpected-eof", format!("unexpected EOF: unclosed {}", kw))
    }

    // ---- Action endings ----

    /// True at the close delimiter or a right trim marker.
    fn at_terminator(&self) -> bool {
        self.sc.starts_with(&self.close) || self.sc.starts_with(&self.close_trim)
    }

    fn end_action(&mut self) -> PResult<()> {
        self.sc.skip_ws();
        // Right trim marker requires whitespace before the dash.
        if self.sc.starts_with(&self.close_trim) && self.sc.prev_is_space() {
            let marker = self.close_trim.clone();
            self.sc.eat_str(&marker);
            self.trim_next = true;
            return Ok(());
        }
        if self.sc.eat_str(&self.close.clone()) {
            return Ok(());
        }
        if self.sc.at_eof() {
            Err(self.err("unexpected-eof", "unexpected EOF: unclosed action"))
        } else {
            Err(self.err(
                "unclosed-action",
                format!("expected {} to close action", self.close),
            ))
        }
    }

    // ---- Pipelines ----

    fn parse_pipeline(&mut self, allow_two_decls: bool) -> PResult<Pipeline> {
        self.sc.skip_ws();
        let (decls, is_assign) = self.parse_decls(allow_two_decls)?;
        let mut commands = Vec::new();
        loop {
            self.sc.skip_ws();
            commands.push(self.parse_command()?);
            self.sc.skip_ws();
            if !self.sc.eat(b'|') {
                break;
            }
        }
        Ok(Pipeline { is_assign, decls, commands })
    }

    /// `$a :=`, `$a =`, or `$a, $b :=` in a range header. Backtracks when
    /// the dollar term turns out to be a plain variable reference.
    fn parse_decls(&mut self, allow_two: bool) -> PResult<(Vec<String>, bool)> {
        let start = self.sc.mark();
        if !self.sc.eat(b'$') {
            return Ok((Vec::new(), false));
        }
        let first = self.sc.read_ident();
        if first.is_empty() {
            self.sc.reset(start);
            return Ok((Vec::new(), false));
        }
        let mut decls = vec![first];
        self.sc.skip_ws();
        if self.sc.eat(b',') {
            self.sc.skip_ws();
            if !self.sc.eat(b'$') {
                self.sc.reset(start);
                return Ok((Vec::new(), false));
            }
            let second = self.sc.read_ident();
            if second.is_empty() {
                self.sc.reset(start);
                return Ok((Vec::new(), false));
            }
            decls.push(second);
            self.sc.skip_ws();
        }
        let is_assign = if self.sc.eat_str(":=") {
            false
        } else if self.sc.eat(b'=') {
            true
        } else {
            self.sc.reset(start);
            return Ok((Vec::new(), false));
        };
        if decls.len() == 2 && !allow_two {
            return Err(self.err(
                "too-many-decls",
                "two variable declarations are only allowed in range",
            ));
        }
        Ok((decls, is_assign))
    }

    fn parse_command(&mut self) -> PResult<Command> {
        let mut args = Vec::new();
        loop {
            self.sc.skip_ws();
            if self.at_operand_end() {
                break;
            }
            args.push(self.parse_operand()?);
        }
        if args.is_empty() {
            return Err(self.err("empty-command", "empty command in pipeline"));
        }
        Ok(Command { args })
    }

    fn at_operand_end(&self) -> bool {
        self.sc.at_eof()
            || self.sc.peek() == Some(b'|')
            || self.sc.peek() == Some(b')')
            || self.at_terminator()
    }

    /// term ('.' IDENT)* — trailing member access binds to any term.
    fn parse_operand(&mut self) -> PResult<Expr> {
        let mut e = self.parse_term()?;
        while self.sc.peek() == Some(b'.') && is_ident_start(self.sc.peek_at(1)) {
            self.sc.bump();
            let name = self.sc.read_ident();
            e = match e {
                Expr::Field(base, mut names) => {
                    names.push(name);
                    Expr::Field(base, names)
                }
                other => Expr::Field(Some(Box::new(other)), vec![name]),
            };
        }
        Ok(e)
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        match self.sc.peek() {
            Some(b'.') => {
                if is_ident_start(self.sc.peek_at(1)) {
                    let mut names = Vec::new();
                    while self.sc.peek() == Some(b'.') && is_ident_start(self.sc.peek_at(1)) {
                        self.sc.bump();
                        names.push(self.sc.read_ident());
                    }
                    Ok(Expr::Field(None, names))
                } else {
                    self.sc.bump();
                    Ok(Expr::Dot)
                }
            }
            Some(b'$') => {
                self.sc.bump();
                let name = self.sc.read_ident();
                if name.is_empty() {
                    Ok(Expr::Root)
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(b'(') => {
                self.sc.bump();
                let p = self.parse_pipeline(false)?;
                self.sc.skip_ws();
                if !self.sc.eat(b')') {
                    return Err(self.err("unclosed-paren", "expected ')' to close sub-pipeline"));
                }
                Ok(Expr::Pipeline(Box::new(p)))
            }
            Some(b'"') | Some(b'`') => match scan_string(&mut self.sc) {
                Ok(Some(s)) => Ok(Expr::Str(s)),
                Ok(None) => unreachable!("scan_string at quote"),
                Err(msg) => Err(self.err("bad-string", msg)),
            },
            Some(b'\'') => match scan_char(&mut self.sc) {
                Ok(Some((c, w))) => Ok(Expr::Char(c, w)),
                Ok(None) => unreachable!("scan_char at quote"),
                Err(msg) => Err(self.err("bad-char", msg)),
            },
            Some(b) if b.is_ascii_digit() || b == b'+' || b == b'-' => {
                match scan_number(&mut self.sc) {
                    Ok(Some(n)) => Ok(Expr::Number(n)),
                    Ok(None) => Err(self.err(
                        "unexpected-token",
                        format!("unexpected character '{}' in action", b as char),
                    )),
                    Err(msg) => Err(self.err("bad-number", msg)),
                }
            }
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                let name = self.sc.read_ident();
                match name.as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    _ => Ok(Expr::Ident(name)),
                }
            }
            Some(b) => Err(self.err(
                "unexpected-token",
                format!("unexpected character '{}' in action", b as char),
            )),
            None => Err(self.err("unexpected-eof", "unexpected EOF: unclosed action")),
        }
    }
}
