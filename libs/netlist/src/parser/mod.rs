//! SPICE-family netlist parser.
//!
//! The parser is line-oriented and best-effort: physical lines are joined
//! into logical lines (`+` continuations), each logical line is tokenized
//! and dispatched on its leading token, and a line that cannot be
//! classified is recorded as a [`ParseIssue`] and skipped. Malformed input
//! never aborts a parse.
//!
//! CDL conventions (`/` before the subcircuit name on `X` lines) and
//! HSPICE conventions (single-quoted expressions containing spaces) are
//! handled uniformly; no dialect selection is required.


use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use arcstr::ArcStr;
use itertools::Itertools;
use nom::bytes::complete::{take_till, take_while};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, IssueSet, Severity};
use crate::{Circuit, Component, ComponentKind, Model, Params, Subckt};

/// An error that makes a parse impossible to start.
///
/// Errors on individual lines are reported as [`ParseIssue`]s instead.
#[derive(Debug, Error)]
pub enum ParserError {
    /// Error trying to read the given file.
    #[error("failed to read netlist at `{path:?}`: {err}")]
    FailedToRead {
        /// The path we attempted to read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// Data associated with one parse invocation.
#[derive(Debug)]
pub struct Parsed {
    /// The parsed circuit.
    pub circuit: Circuit,
    /// Issues encountered while parsing.
    pub issues: IssueSet<ParseIssue>,
    /// The file path at the root of the include tree, if the input came
    /// from a file.
    pub root: Option<PathBuf>,
}

/// A diagnostic produced while parsing one logical line.
#[derive(Debug)]
pub struct ParseIssue {
    /// The 1-based number of the first physical line of the offending
    /// logical line.
    pub line: usize,
    /// The logical line text.
    pub text: ArcStr,
    /// What went wrong.
    pub cause: IssueCause,
}

/// The cause of a [`ParseIssue`].
#[derive(Debug)]
pub enum IssueCause {
    /// The leading token does not select a known statement or device.
    UnknownStatement,
    /// A `.SUBCKT` line without a subcircuit name.
    MissingSubcktName,
    /// A device line with too few tokens for its kind.
    MissingField(&'static str),
    /// An `.INCLUDE` target could not be read.
    IncludeFailed {
        /// The resolved path we attempted to read.
        path: PathBuf,
        /// The underlying error, rendered.
        err: String,
    },
    /// An `.INCLUDE` target is already being parsed.
    CircularInclude(PathBuf),
}

impl Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: ", self.line)?;
        match &self.cause {
            IssueCause::UnknownStatement => write!(f, "unrecognized statement")?,
            IssueCause::MissingSubcktName => write!(f, ".SUBCKT requires a name")?,
            IssueCause::MissingField(field) => write!(f, "missing {field}")?,
            IssueCause::IncludeFailed { path, err } => {
                write!(f, "failed to read include `{path:?}`: {err}")?
            }
            IssueCause::CircularInclude(path) => {
                write!(f, "circular include of `{path:?}`")?
            }
        }
        write!(f, ": `{}`", self.text)
    }
}

impl Diagnostic for ParseIssue {
    fn severity(&self) -> Severity {
        match self.cause {
            IssueCause::MissingSubcktName => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

/// An iterator over the logical lines of a netlist.
///
/// Yields `(line_number, text)` pairs, where the number is the 1-based
/// position of the first physical line contributing to the logical line.
/// Comments are stripped and `+` continuations are merged.
pub struct LogicalLines<'a> {
    lines: std::str::Lines<'a>,
    lineno: usize,
    buffer: Option<(usize, String)>,
    done: bool,
}

impl<'a> LogicalLines<'a> {
    /// Creates an iterator over the logical lines of `text`.
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            lineno: 0,
            buffer: None,
            done: false,
        }
    }
}

impl Iterator for LogicalLines<'_> {
    type Item = (usize, String);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let Some(raw) = self.lines.next() else {
                self.done = true;
                return self.buffer.take();
            };
            self.lineno += 1;
            let line = strip_comments(raw);
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('+') {
                let rest = rest.trim_start();
                match &mut self.buffer {
                    Some((_, buf)) => {
                        buf.push(' ');
                        buf.push_str(rest);
                    }
                    // A continuation with nothing to continue starts a
                    // fresh logical line.
                    None => self.buffer = Some((self.lineno, rest.to_string())),
                }
            } else if let Some(prev) = self.buffer.replace((self.lineno, line.to_string())) {
                return Some(prev);
            }
        }
    }
}

/// Strips full-line (`*`) and inline (`$`) comments, trimming whitespace.
///
/// Everything after a `$` is dropped, including CDL comment-coded
/// parameters; connectivity is unaffected.
fn strip_comments(raw: &str) -> &str {
    let line = raw.trim();
    if line.starts_with('*') {
        return "";
    }
    match line.find('$') {
        Some(idx) => line[..idx].trim_end(),
        None => line,
    }
}

/// Splits one logical line into whitespace-delimited tokens.
///
/// A single-quoted run, together with any non-whitespace material abutting
/// it, is kept as one token with its quotes intact: `w='1u + 2u'` is a
/// single token.
pub fn tokenize(line: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rem = line;
    loop {
        let (rest, _) = take_while::<_, _, ()>(char::is_whitespace)(rem).unwrap();
        if rest.is_empty() {
            break;
        }
        let (rest, token) = take_token(rest);
        tokens.push(token);
        rem = rest;
    }
    tokens
}

/// Takes one token from the start of `input`, honoring single quotes.
fn take_token(input: &str) -> (&str, &str) {
    let mut rem = input;
    loop {
        let (rest, _) =
            take_till::<_, _, ()>(|c: char| c.is_whitespace() || c == '\'')(rem).unwrap();
        match rest.strip_prefix('\'') {
            Some(quoted) => {
                let (after, _) = take_till::<_, _, ()>(|c| c == '\'')(quoted).unwrap();
                rem = after.strip_prefix('\'').unwrap_or(after);
            }
            None => {
                rem = rest;
                break;
            }
        }
    }
    let end = input.len() - rem.len();
    (&input[end..], &input[..end])
}

/// Parses SPICE-family netlist text into a [`Circuit`].
pub struct Parser {
    circuit: Circuit,
    scope_stack: Vec<Subckt>,
    include_stack: Vec<PathBuf>,
    issues: IssueSet<ParseIssue>,
}

impl Parser {
    fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            circuit: Circuit::new(name),
            scope_stack: Vec::new(),
            include_stack: Vec::new(),
            issues: IssueSet::new(),
        }
    }

    /// Parses the given text under the given circuit name.
    ///
    /// Best-effort: lines that cannot be parsed are skipped and reported
    /// on the returned issue set. `.INCLUDE` targets are recorded but not
    /// opened, since string input has no filesystem anchor.
    pub fn parse(name: impl Into<ArcStr>, text: &str) -> Parsed {
        let mut parser = Self::new(name);
        parser.parse_str(text);
        parser.finish(None)
    }

    /// Parses the netlist file at the given path.
    ///
    /// The default circuit name is derived from the file stem. `.INCLUDE`
    /// targets are read and parsed recursively, with relative paths
    /// resolved against the including file.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Parsed, ParserError> {
        let path = path.as_ref();
        tracing::debug!("reading netlist file: {:?}", path);
        let text = std::fs::read_to_string(path).map_err(|err| ParserError::FailedToRead {
            path: path.into(),
            err,
        })?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("top");
        let mut parser = Self::new(name);
        parser.include_stack.push(path.to_path_buf());
        parser.parse_str(&text);
        Ok(parser.finish(Some(path.to_path_buf())))
    }

    fn finish(mut self, root: Option<PathBuf>) -> Parsed {
        // Scopes left open at EOF are flushed as if terminated by `.ENDS`.
        while let Some(subckt) = self.scope_stack.pop() {
            self.circuit.add_subckt(subckt);
        }
        Parsed {
            circuit: self.circuit,
            issues: self.issues,
            root,
        }
    }

    fn parse_str(&mut self, text: &str) {
        for (lineno, line) in LogicalLines::new(text) {
            self.parse_line(lineno, &line);
        }
    }

    fn parse_line(&mut self, lineno: usize, line: &str) {
        let tokens = tokenize(line);
        let Some(&first) = tokens.first() else {
            return;
        };
        if first.starts_with('.') {
            self.parse_directive(lineno, line, &tokens);
        } else {
            match parse_component(&tokens) {
                Ok(component) => self.add_component(component),
                Err(cause) => self.report(lineno, line, cause),
            }
        }
    }

    fn report(&mut self, lineno: usize, line: &str, cause: IssueCause) {
        self.issues.add(ParseIssue {
            line: lineno,
            text: ArcStr::from(line),
            cause,
        });
    }

    fn add_component(&mut self, component: Component) {
        match self.scope_stack.last_mut() {
            Some(subckt) => subckt.components.push(component),
            None => self.circuit.components.push(component),
        }
    }

    fn parse_directive(&mut self, lineno: usize, line: &str, tokens: &[&str]) {
        let directive = tokens[0];
        if directive.eq_ignore_ascii_case(".subckt") {
            self.start_subckt(lineno, line, tokens);
        } else if directive.eq_ignore_ascii_case(".ends") {
            // A stray `.ENDS` with no open scope is a no-op.
            if let Some(subckt) = self.scope_stack.pop() {
                self.circuit.add_subckt(subckt);
            }
        } else if directive.eq_ignore_ascii_case(".model") {
            self.parse_model(tokens);
        } else if directive.eq_ignore_ascii_case(".param") {
            self.parse_param(tokens);
        } else if directive.eq_ignore_ascii_case(".include") {
            self.parse_include(lineno, line, tokens, true);
        } else if directive.eq_ignore_ascii_case(".lib") {
            // `.LIB` lines may carry a trailing section name, so the path
            // is recorded but never opened.
            self.parse_include(lineno, line, tokens, false);
        }
        // Other directives (.TRAN, .OP, .END, ...) are irrelevant to
        // connectivity and ignored.
    }

    fn start_subckt(&mut self, lineno: usize, line: &str, tokens: &[&str]) {
        let Some(&name) = tokens.get(1) else {
            self.report(lineno, line, IssueCause::MissingSubcktName);
            return;
        };
        let mut subckt = Subckt::new(name);
        // Inline key=value pairs are parameter defaults, not ports.
        for &token in &tokens[2..] {
            match token.split_once('=') {
                Some((k, v)) => {
                    subckt.parameters.insert(ArcStr::from(k), ArcStr::from(v));
                }
                None => subckt.ports.push(ArcStr::from(token)),
            }
        }
        self.scope_stack.push(subckt);
    }

    fn parse_model(&mut self, tokens: &[&str]) {
        let (Some(&name), Some(&model_type)) = (tokens.get(1), tokens.get(2)) else {
            return;
        };
        let mut model = Model {
            name: ArcStr::from(name),
            model_type: ArcStr::from(model_type),
            parameters: Default::default(),
        };
        // Parameter lists are often parenthesized; parens may end up
        // attached to the first key or last value token.
        let paren = |c| c == '(' || c == ')';
        for &token in &tokens[3..] {
            if let Some((k, v)) = token.split_once('=') {
                let (k, v) = (k.trim_matches(paren), v.trim_matches(paren));
                model.parameters.insert(ArcStr::from(k), ArcStr::from(v));
            }
        }
        self.circuit.add_model(model);
    }

    fn parse_param(&mut self, tokens: &[&str]) {
        for &token in &tokens[1..] {
            if let Some((k, v)) = token.split_once('=') {
                let v = strip_quotes(v);
                let parameters = match self.scope_stack.last_mut() {
                    Some(subckt) => &mut subckt.parameters,
                    None => &mut self.circuit.parameters,
                };
                parameters.insert(ArcStr::from(k), ArcStr::from(v));
            }
        }
    }

    fn parse_include(&mut self, lineno: usize, line: &str, tokens: &[&str], follow: bool) {
        let raw = tokens[1..].iter().join(" ");
        if raw.is_empty() {
            self.report(lineno, line, IssueCause::MissingField("include path"));
            return;
        }
        self.circuit.includes.push(ArcStr::from(raw.as_str()));
        if follow {
            self.follow_include(lineno, line, &raw);
        }
    }

    /// Reads and parses an `.INCLUDE` target into the current circuit.
    ///
    /// Only meaningful when the input came from a file; string input has
    /// no directory to resolve relative paths against, so the path is
    /// recorded without being opened.
    fn follow_include(&mut self, lineno: usize, line: &str, raw: &str) {
        let Some(current) = self.include_stack.last() else {
            return;
        };
        let mut path = PathBuf::from(strip_quotes(raw));
        if path.is_relative() {
            if let Some(parent) = current.parent() {
                path = parent.join(path);
            }
        }
        if self.include_stack.contains(&path) {
            self.report(lineno, line, IssueCause::CircularInclude(path));
            return;
        }
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!("reading included file: {:?}", path);
                self.include_stack.push(path);
                self.parse_str(&text);
                self.include_stack.pop();
            }
            Err(err) => self.report(
                lineno,
                line,
                IssueCause::IncludeFailed {
                    path,
                    err: err.to_string(),
                },
            ),
        }
    }
}

/// Strips one layer of matching surrounding quotes.
fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    for quote in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Parses a device line into a component, dispatching on the first
/// letter of the instance name.
fn parse_component(tokens: &[&str]) -> Result<Component, IssueCause> {
    let name = tokens[0];
    let leading = name.chars().next().unwrap().to_ascii_uppercase();
    match leading {
        'R' | 'C' | 'L' => two_node_device(tokens, leading),
        'M' => model_device(tokens, 4, |model| ComponentKind::Mos { model }),
        // 4-node BJTs are not distinguished; the substrate node would be
        // taken as the model name.
        'Q' => model_device(tokens, 3, |model| ComponentKind::Bjt { model }),
        'D' => model_device(tokens, 2, |model| ComponentKind::Diode { model }),
        'V' | 'I' => source_device(tokens, leading),
        'X' => instance_device(tokens),
        _ => Err(IssueCause::UnknownStatement),
    }
}

fn build(name: &str, nodes: &[&str], kind: ComponentKind, rest: &[&str]) -> Component {
    let mut params = Params::new();
    for &token in rest {
        match token.split_once('=') {
            Some((k, v)) => params.insert(k, v),
            None => params.push_extra(token),
        }
    }
    Component {
        name: ArcStr::from(name),
        nodes: nodes.iter().map(|&n| ArcStr::from(n)).collect(),
        params,
        kind,
    }
}

/// R/C/L: exactly two nodes, then a value token (defaulting to `0`).
fn two_node_device(tokens: &[&str], leading: char) -> Result<Component, IssueCause> {
    if tokens.len() < 3 {
        return Err(IssueCause::MissingField("node"));
    }
    let value = ArcStr::from(*tokens.get(3).unwrap_or(&"0"));
    let kind = match leading {
        'R' => ComponentKind::Res { value },
        'C' => ComponentKind::Cap { value },
        _ => ComponentKind::Ind { value },
    };
    Ok(build(tokens[0], &tokens[1..3], kind, tokens.get(4..).unwrap_or_default()))
}

/// M/Q/D: a fixed node count, then a required model token.
fn model_device(
    tokens: &[&str],
    node_count: usize,
    kind: impl FnOnce(ArcStr) -> ComponentKind,
) -> Result<Component, IssueCause> {
    if tokens.len() < node_count + 2 {
        return Err(IssueCause::MissingField("model"));
    }
    let model = ArcStr::from(tokens[node_count + 1]);
    Ok(build(
        tokens[0],
        &tokens[1..node_count + 1],
        kind(model),
        &tokens[node_count + 2..],
    ))
}

/// V/I: two nodes, then a DC value. A leading `DC` keyword is skipped;
/// for voltage sources a trailing `AC <value>` pair is captured.
fn source_device(tokens: &[&str], leading: char) -> Result<Component, IssueCause> {
    if tokens.len() < 3 {
        return Err(IssueCause::MissingField("node"));
    }
    let mut idx = 3;
    if tokens.get(idx).is_some_and(|t| t.eq_ignore_ascii_case("dc")) && tokens.len() > idx + 1 {
        idx += 1;
    }
    let dc = ArcStr::from(*tokens.get(idx).unwrap_or(&"0"));
    idx = (idx + 1).min(tokens.len());
    let kind = if leading == 'V' {
        let mut ac = None;
        if tokens.get(idx).is_some_and(|t| t.eq_ignore_ascii_case("ac")) && tokens.len() > idx + 1 {
            ac = Some(ArcStr::from(tokens[idx + 1]));
            idx += 2;
        }
        ComponentKind::Vsource { dc, ac }
    } else {
        ComponentKind::Isource { dc }
    };
    Ok(build(
        tokens[0],
        &tokens[1..3],
        kind,
        tokens.get(idx..).unwrap_or_default(),
    ))
}

/// X: a variable-length node list, then the subcircuit name.
///
/// Two resolution rules: CDL style puts a `/` between the nodes and the
/// name; plain SPICE style puts the name immediately before the first
/// `key=value` token (or last, if there are no parameters).
fn instance_device(tokens: &[&str]) -> Result<Component, IssueCause> {
    let (nodes, child, rest) = match tokens.iter().position(|&t| t == "/") {
        Some(slash) => {
            let Some(&child) = tokens.get(slash + 1) else {
                return Err(IssueCause::MissingField("subcircuit name"));
            };
            (&tokens[1..slash], child, &tokens[slash + 2..])
        }
        None => {
            let boundary = tokens
                .iter()
                .position(|t| t.contains('='))
                .unwrap_or(tokens.len());
            if boundary < 2 {
                return Err(IssueCause::MissingField("subcircuit name"));
            }
            (&tokens[1..boundary - 1], tokens[boundary - 1], &tokens[boundary..])
        }
    };
    Ok(build(
        tokens[0],
        nodes,
        ComponentKind::Instance {
            child: ArcStr::from(child),
        },
        rest,
    ))
}
