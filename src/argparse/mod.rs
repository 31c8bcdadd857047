//! # Argument Parser
//!
//! Uniform parsing of operator arguments: declared positionals (required
//! then optional) and named options with or without values. Input is the
//! operator invocation span plus already-tokenised shell-style arguments;
//! output is a bag of typed values, or an `error` diagnostic carrying the
//! usage string and a docs link.
//!
//! Ambiguity rule: if any declared positional is an expression, short
//! options are disabled, since `-x` could open a negated expression.

use std::collections::HashMap;

use crate::data::Duration;
use crate::diag::{Diagnostic, Located, Span};

/// The value kind a declared argument converts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    UInt64,
    Int64,
    Duration,
    /// An expression in textual form; parsing is the query language's job.
    Expression,
}

impl ArgKind {
    fn describe(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::UInt64 => "unsigned integer",
            ArgKind::Int64 => "integer",
            ArgKind::Duration => "duration",
            ArgKind::Expression => "expression",
        }
    }
}

/// A parsed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    UInt64(u64),
    Int64(i64),
    Duration(Duration),
    Expression(String),
    Flag,
}

#[derive(Debug, Clone)]
struct PositionalSpec {
    meta: String,
    kind: ArgKind,
    required: bool,
}

#[derive(Debug, Clone)]
struct NamedSpec {
    /// All accepted spellings, e.g. `["--within", "-w"]`.
    names: Vec<String>,
    meta: String,
    kind: Option<ArgKind>,
}

impl NamedSpec {
    fn canonical(&self) -> &str {
        &self.names[0]
    }

    fn matches(&self, token: &str) -> bool {
        self.names.iter().any(|n| n == token)
    }
}

/// Declarative argument parser for one operator invocation.
pub struct ArgumentParser {
    name: String,
    docs: Option<String>,
    positional: Vec<PositionalSpec>,
    named: Vec<NamedSpec>,
}

/// The parsed argument bag.
#[derive(Debug, Default)]
pub struct Arguments {
    values: HashMap<String, Located<ArgValue>>,
}

impl Arguments {
    fn insert(&mut self, key: &str, value: Located<ArgValue>) {
        self.values.insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Located<ArgValue>> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<Located<String>> {
        match self.values.get(key) {
            Some(Located {
                inner: ArgValue::String(s),
                span,
            }) => Some(Located::new(s.clone(), *span)),
            _ => None,
        }
    }

    pub fn get_uint64(&self, key: &str) -> Option<Located<u64>> {
        match self.values.get(key) {
            Some(Located {
                inner: ArgValue::UInt64(v),
                span,
            }) => Some(Located::new(*v, *span)),
            _ => None,
        }
    }

    pub fn get_int64(&self, key: &str) -> Option<Located<i64>> {
        match self.values.get(key) {
            Some(Located {
                inner: ArgValue::Int64(v),
                span,
            }) => Some(Located::new(*v, *span)),
            _ => None,
        }
    }

    pub fn get_duration(&self, key: &str) -> Option<Located<Duration>> {
        match self.values.get(key) {
            Some(Located {
                inner: ArgValue::Duration(v),
                span,
            }) => Some(Located::new(*v, *span)),
            _ => None,
        }
    }

    pub fn get_expression(&self, key: &str) -> Option<Located<String>> {
        match self.values.get(key) {
            Some(Located {
                inner: ArgValue::Expression(s),
                span,
            }) => Some(Located::new(s.clone(), *span)),
            _ => None,
        }
    }

    pub fn get_flag(&self, key: &str) -> bool {
        matches!(
            self.values.get(key),
            Some(Located {
                inner: ArgValue::Flag,
                ..
            })
        )
    }
}

impl ArgumentParser {
    pub fn new(name: impl Into<String>) -> Self {
        ArgumentParser {
            name: name.into(),
            docs: None,
            positional: Vec::new(),
            named: Vec::new(),
        }
    }

    pub fn with_docs(mut self, docs: impl Into<String>) -> Self {
        self.docs = Some(docs.into());
        self
    }

    /// Declares a required positional.
    ///
    /// # Panics
    /// Panics if a required positional follows an optional one; optional
    /// positionals must trail all required ones.
    pub fn positional(mut self, meta: impl Into<String>, kind: ArgKind) -> Self {
        assert!(
            self.positional.iter().all(|p| p.required),
            "required positional after optional positional"
        );
        self.positional.push(PositionalSpec {
            meta: meta.into(),
            kind,
            required: true,
        });
        self
    }

    /// Declares an optional positional; must trail all required ones.
    pub fn optional_positional(mut self, meta: impl Into<String>, kind: ArgKind) -> Self {
        self.positional.push(PositionalSpec {
            meta: meta.into(),
            kind,
            required: false,
        });
        self
    }

    /// Declares a named option with a value, e.g. `"--within|-w"`.
    pub fn named(mut self, names: &str, meta: impl Into<String>, kind: ArgKind) -> Self {
        self.named.push(NamedSpec {
            names: split_names(names),
            meta: meta.into(),
            kind: Some(kind),
        });
        self
    }

    /// Declares a boolean flag without a value.
    pub fn flag(mut self, names: &str) -> Self {
        self.named.push(NamedSpec {
            names: split_names(names),
            meta: String::new(),
            kind: None,
        });
        self
    }

    /// The usage string shown in diagnostics.
    pub fn usage(&self) -> String {
        let mut usage = self.name.clone();
        for p in &self.positional {
            if p.required {
                usage.push_str(&format!(" <{}>", p.meta));
            } else {
                usage.push_str(&format!(" [<{}>]", p.meta));
            }
        }
        for n in &self.named {
            match n.kind {
                Some(_) => usage.push_str(&format!(" [{} <{}>]", n.names.join("|"), n.meta)),
                None => usage.push_str(&format!(" [{}]", n.names.join("|"))),
            }
        }
        usage
    }

    fn error(&self, message: impl Into<String>, span: Span) -> Diagnostic {
        let mut diagnostic = Diagnostic::error(message)
            .primary(span)
            .usage(self.usage());
        if let Some(docs) = &self.docs {
            diagnostic = diagnostic.docs(docs.clone());
        }
        diagnostic
    }

    /// Parses tokenised arguments against the declaration.
    pub fn parse(
        &self,
        invocation: Span,
        tokens: &[Located<String>],
    ) -> Result<Arguments, Diagnostic> {
        // Short flags may not be mixed with positional expressions.
        let short_options_enabled = !self
            .positional
            .iter()
            .any(|p| p.kind == ArgKind::Expression);
        let mut arguments = Arguments::default();
        let mut positional_values: Vec<Located<String>> = Vec::new();
        let mut cursor = 0;
        while cursor < tokens.len() {
            let token = &tokens[cursor];
            cursor += 1;
            let text = token.inner.as_str();
            let is_long = text.starts_with("--") && text.len() > 2;
            let is_short =
                short_options_enabled && text.starts_with('-') && !is_long && text.len() > 1
                    // A lone `-` or a negative number is a positional.
                    && !text[1..].starts_with(|c: char| c.is_ascii_digit());
            if !is_long && !is_short {
                positional_values.push(token.clone());
                continue;
            }
            // `--name=value` splits here; `--name value` consumes the next
            // token below.
            let (name, inline_value) = match text.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (text, None),
            };
            let spec = match self.named.iter().find(|s| s.matches(name)) {
                Some(spec) => spec,
                None => {
                    return Err(self.error(format!("unknown option `{name}`"), token.span));
                }
            };
            if arguments.contains(spec.canonical()) {
                return Err(
                    self.error(format!("duplicate argument `{name}`"), token.span)
                );
            }
            match spec.kind {
                None => {
                    if inline_value.is_some() {
                        return Err(
                            self.error(format!("flag `{name}` takes no value"), token.span)
                        );
                    }
                    arguments.insert(spec.canonical(), Located::new(ArgValue::Flag, token.span));
                }
                Some(kind) => {
                    let value = match inline_value {
                        Some(value) => Located::new(value.to_string(), token.span),
                        None => {
                            let next = tokens.get(cursor).ok_or_else(|| {
                                self.error(
                                    format!("option `{name}` expects a value"),
                                    token.span,
                                )
                            })?;
                            cursor += 1;
                            next.clone()
                        }
                    };
                    let converted = self.convert(kind, &value)?;
                    arguments.insert(spec.canonical(), converted);
                }
            }
        }
        // Assign positionals in declaration order.
        if positional_values.len() > self.positional.len() {
            let excess = &positional_values[self.positional.len()];
            return Err(self.error(
                format!("unexpected argument `{}`", excess.inner),
                excess.span,
            ));
        }
        for (spec, value) in self.positional.iter().zip(&positional_values) {
            let converted = self.convert(spec.kind, value)?;
            arguments.insert(&spec.meta, converted);
        }
        for spec in &self.positional[positional_values.len()..] {
            if spec.required {
                return Err(self.error(
                    format!("missing required argument `<{}>`", spec.meta),
                    invocation,
                ));
            }
        }
        Ok(arguments)
    }

    fn convert(
        &self,
        kind: ArgKind,
        value: &Located<String>,
    ) -> Result<Located<ArgValue>, Diagnostic> {
        let converted = match kind {
            ArgKind::String => ArgValue::String(value.inner.clone()),
            ArgKind::Expression => ArgValue::Expression(value.inner.clone()),
            ArgKind::UInt64 => match value.inner.parse::<u64>() {
                Ok(v) => ArgValue::UInt64(v),
                Err(_) => {
                    return Err(self.error(
                        format!(
                            "could not parse `{}` as {}",
                            value.inner,
                            kind.describe()
                        ),
                        value.span,
                    ))
                }
            },
            ArgKind::Int64 => match value.inner.parse::<i64>() {
                Ok(v) => ArgValue::Int64(v),
                Err(_) => {
                    return Err(self.error(
                        format!(
                            "could not parse `{}` as {}",
                            value.inner,
                            kind.describe()
                        ),
                        value.span,
                    ))
                }
            },
            ArgKind::Duration => match Duration::parse(&value.inner) {
                Some(v) => ArgValue::Duration(v),
                None => {
                    return Err(self.error(
                        format!(
                            "could not parse `{}` as {}",
                            value.inner,
                            kind.describe()
                        ),
                        value.span,
                    ))
                }
            },
        };
        Ok(Located::new(converted, value.span))
    }
}

fn split_names(names: &str) -> Vec<String> {
    let names: Vec<String> = names.split('|').map(str::to_string).collect();
    assert!(!names.is_empty());
    for name in &names {
        assert!(name.starts_with('-'), "option name must start with `-`");
    }
    names
}
