//! Lossy per-file syntax tree
//!
//! Only the statement shapes the bundler cares about are represented: imports,
//! exports, function-like declarations and top-level calls. Declaration bodies are
//! not parsed; they are kept as token ranges plus the byte span of the whole
//! statement, which is enough to measure them and to copy their text verbatim.

use once_cell::sync::Lazy;
use regex::Regex;

static COMPONENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^create[A-Z]").expect("component name pattern is valid"));

/// Byte range into the original source text (end exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Slice the source text covered by this span
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or_default()
    }
}

/// Token-index range of a declaration body, from the opening to the closing token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodySpan {
    pub start: usize,
    pub end: usize,
}

impl BodySpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a declaration is a UI component factory or an ordinary function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Component,
    Function,
}

impl DeclarationKind {
    /// Classify a declared name by the `create<Upper>...` factory convention
    pub fn classify(name: &str) -> Self {
        if name.len() > 6 && COMPONENT_NAME.is_match(name) {
            Self::Component
        } else {
            Self::Function
        }
    }
}

/// A function-like top-level declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub name: String,
    pub params: Vec<String>,
    pub body_span: BodySpan,
    /// Source text of the declaration, without any leading `export`
    pub span: Span,
    /// Distinct identifiers referenced inside the body
    pub references: Vec<String>,
    /// Set by the optimizer for components small enough to inline downstream
    pub inline: bool,
}

impl Declaration {
    pub fn is_component(&self) -> bool {
        self.kind == DeclarationKind::Component
    }
}

/// An import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Named identifiers seen before the source literal
    pub specifiers: Vec<String>,
    /// Module source as written, `None` when no source was found before end of file
    pub source: Option<String>,
    /// Graph key of the imported file, filled in by the module loader
    pub resolved: Option<String>,
    pub span: Span,
    /// Recorded for `export { ... } from '<source>'`; the export emits the binding
    pub reexport: bool,
}

impl Import {
    pub fn is_style(&self) -> bool {
        self.source
            .as_deref()
            .is_some_and(|s| s.ends_with(".css") || s.ends_with(".scss"))
    }
}

/// An export statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub is_default: bool,
    pub declaration: Option<Declaration>,
    /// Names listed in `export { ... }` or the identifier after `export default`
    pub specifiers: Vec<String>,
    /// Local binding behind each entry of `specifiers`, differing only for `a as b`
    pub locals: Vec<String>,
    /// Module source of `export { ... } from '<source>'`
    pub source: Option<String>,
    pub span: Span,
    /// Span of the exported value for `export default <expr>`
    pub value_span: Option<Span>,
}

impl Export {
    /// Names this export makes visible to importers
    pub fn exported_names(&self) -> Vec<&str> {
        if self.is_default {
            return vec!["default"];
        }
        match &self.declaration {
            Some(decl) => vec![decl.name.as_str()],
            None => self.specifiers.iter().map(String::as_str).collect(),
        }
    }

    /// `(local, exported)` pairs of a specifier export
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.specifiers.iter().enumerate().map(|(idx, exported)| {
            let local = self.locals.get(idx).unwrap_or(exported);
            (local.as_str(), exported.as_str())
        })
    }

    /// Keep only the specifiers whose exported name passes `keep`, returning how many were dropped
    pub fn retain_specifiers(&mut self, keep: impl Fn(&str) -> bool) -> usize {
        let before = self.specifiers.len();
        let (locals, specifiers): (Vec<String>, Vec<String>) = self
            .bindings()
            .filter(|(_, exported)| keep(exported))
            .map(|(local, exported)| (local.to_owned(), exported.to_owned()))
            .unzip();
        self.locals = locals;
        self.specifiers = specifiers;
        before - self.specifiers.len()
    }
}

/// A top-level call such as `console.log(x)` or a bare `debugger`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatement {
    /// Dotted callee path, e.g. `console.log`
    pub callee: String,
    pub span: Span,
}

/// Top-level statement kept in the program body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Declaration(Declaration),
    Call(CallStatement),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Self::Declaration(decl) => decl.span,
            Self::Call(call) => call.span,
        }
    }
}

/// Parsed representation of one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub file: String,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
    /// Every component declaration in the file, exported or not
    pub components: Vec<Declaration>,
    /// Non-import, non-export top-level statements
    pub body: Vec<Statement>,
    /// Distinct identifiers referenced outside imports and function bodies
    pub references: Vec<String>,
    /// Source ranges dropped by the optimizer, omitted when code is emitted
    pub removed: Vec<Span>,
}

impl Program {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            imports: Vec::new(),
            exports: Vec::new(),
            components: Vec::new(),
            body: Vec::new(),
            references: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Names of all top-level function declarations in the body
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.body.iter().filter_map(|stmt| match stmt {
            Statement::Declaration(decl) if !decl.is_component() => Some(decl.name.as_str()),
            _ => None,
        })
    }

    /// Every declaration in the file, exported or not
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        let exported = self.exports.iter().filter_map(|e| e.declaration.as_ref());
        let local = self.body.iter().filter_map(|stmt| match stmt {
            Statement::Declaration(decl) => Some(decl),
            Statement::Call(_) => None,
        });
        exported.chain(local)
    }
}
