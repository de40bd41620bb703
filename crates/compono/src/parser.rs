//! Single-pass statement parser
//!
//! Recognises four statement shapes: imports, exports, function-like declarations
//! and everything else. The last shape is skipped token by token, except that
//! balanced `{ ... }` blocks are skipped whole and top-level calls are recorded so
//! later passes can strip debug output. A statement that fails to parse is
//! abandoned and parsing resumes one token after where it started.

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::{
    ast::{
        BodySpan, CallStatement, Declaration, DeclarationKind, Export, Import, Program, Span,
        Statement,
    },
    lexer::{Token, TokenKind, tokenize},
};

/// Parse one source file into a [`Program`]
pub fn parse_source(source: &str, file: &str) -> Program {
    let mut parser = Parser::new(tokenize(source));
    let mut program = parser.parse_program(file);
    program.references = parser.top_level_references(&program);
    debug!(
        "Parsed '{file}': {} imports, {} exports, {} components, {} body statements",
        program.imports.len(),
        program.exports.len(),
        program.components.len(),
        program.body.len()
    );
    program
}

/// Result of parsing a `function`/`const`/`let`/`var` statement
#[derive(Debug)]
enum Declared {
    Function(Declaration),
    /// Non-function binding; only its name and extent are kept
    Variable { name: String, span: Span },
}

#[derive(Debug)]
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn at(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx)
    }

    fn peek(&self) -> Option<&Token> {
        self.at(self.pos)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn bump_if(&mut self, pred: impl Fn(&Token) -> bool) -> bool {
        if self.peek().is_some_and(pred) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// End offset of the most recently consumed token
    fn last_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|idx| self.at(idx))
            .map_or(0, Token::end_offset)
    }

    fn parse_program(&mut self, file: &str) -> Program {
        let mut program = Program::new(file);

        while !self.is_eof() {
            let start = self.pos;
            match self.parse_statement(&mut program) {
                Ok(()) if self.pos > start => {}
                Ok(()) => self.pos = start + 1,
                Err(err) => {
                    trace!("Recovering from parse error in '{file}': {err}");
                    self.pos = start + 1;
                }
            }
        }

        program
    }

    fn parse_statement(&mut self, program: &mut Program) -> Result<()> {
        let Some(token) = self.peek() else {
            return Ok(());
        };

        if token.is_keyword("import") {
            let import = self.parse_import();
            program.imports.push(import);
        } else if token.is_keyword("export") {
            let export = self.parse_export()?;
            if let Some(decl) = export.declaration.as_ref().filter(|d| d.is_component()) {
                program.components.push(decl.clone());
            }
            if let Some(source) = &export.source {
                program.imports.push(Import {
                    specifiers: export.locals.clone(),
                    source: Some(source.clone()),
                    resolved: None,
                    span: export.span,
                    reexport: true,
                });
            }
            program.exports.push(export);
        } else if self.at_declaration_start() {
            let start = self.pos;
            match self.parse_declaration()? {
                Some(Declared::Function(decl)) => {
                    if decl.is_component() {
                        program.components.push(decl.clone());
                    }
                    program.body.push(Statement::Declaration(decl));
                }
                // Plain bindings stay in the source text untouched.
                Some(Declared::Variable { .. }) => {}
                None => self.pos = start + 1,
            }
        } else {
            self.parse_fallback(program);
        }
        Ok(())
    }

    fn at_declaration_start(&self) -> bool {
        let Some(token) = self.peek() else {
            return false;
        };
        matches!(
            (token.kind, token.value.as_str()),
            (TokenKind::Keyword, "function" | "const" | "let" | "var")
        ) || (token.kind == TokenKind::Identifier
            && token.value == "async"
            && self
                .at(self.pos + 1)
                .is_some_and(|t| t.is_keyword("function")))
    }

    /// `import` followed by identifiers up to `from '<source>'` or a bare string
    fn parse_import(&mut self) -> Import {
        let start = self.tokens[self.pos].position.offset;
        self.pos += 1;

        let mut specifiers = Vec::new();
        let mut source = None;
        let mut skip_alias = false;

        while let Some(token) = self.peek() {
            if token.is_keyword("from") {
                self.pos += 1;
                if let Some(contents) = self.peek().and_then(Token::string_contents) {
                    source = Some(contents.to_owned());
                    self.pos += 1;
                }
                break;
            }
            if let Some(contents) = token.string_contents() {
                source = Some(contents.to_owned());
                self.pos += 1;
                break;
            }
            if token.kind.is_name() {
                if token.value == "as" {
                    skip_alias = true;
                } else if skip_alias {
                    skip_alias = false;
                } else {
                    specifiers.push(token.value.clone());
                }
            }
            self.pos += 1;
        }

        if source.is_none() {
            trace!("Import without a source at offset {start}");
        }
        self.bump_if(|t| t.is_punct(";"));

        Import {
            specifiers,
            source,
            resolved: None,
            span: Span::new(start, self.last_end()),
            reexport: false,
        }
    }

    fn parse_export(&mut self) -> Result<Export> {
        let start = self.tokens[self.pos].position.offset;
        self.pos += 1;

        let is_default = self.bump_if(|t| t.kind == TokenKind::Identifier && t.value == "default");
        let mut export = Export {
            is_default,
            declaration: None,
            specifiers: Vec::new(),
            locals: Vec::new(),
            source: None,
            span: Span::default(),
            value_span: None,
        };

        if self.at_declaration_start() {
            let decl_start = self.pos;
            match self.parse_declaration()? {
                Some(Declared::Function(decl)) => export.declaration = Some(decl),
                Some(Declared::Variable { name, span }) => {
                    export.specifiers.push(name);
                    export.value_span = Some(span);
                }
                None if is_default => {
                    self.pos = decl_start;
                    export.value_span = Some(self.parse_default_value()?);
                }
                None => bail!("Unsupported export declaration at offset {start}"),
            }
        } else if !is_default && self.peek().is_some_and(|t| t.is_punct("{")) {
            self.parse_export_list(&mut export)?;
        } else if is_default {
            if let Some(token) = self.peek().filter(|t| t.kind.is_name()) {
                let ends_here = self
                    .at(self.pos + 1)
                    .is_none_or(|next| next.is_punct(";") || next.position.line > token.position.line);
                if ends_here {
                    export.specifiers.push(token.value.clone());
                }
            }
            export.value_span = Some(self.parse_default_value()?);
        } else {
            bail!("Unsupported export form at offset {start}");
        }

        self.bump_if(|t| t.is_punct(";"));
        export.span = Span::new(start, self.last_end());
        Ok(export)
    }

    /// `{ a, b as c }` with an optional trailing `from '<source>'`
    fn parse_export_list(&mut self, export: &mut Export) -> Result<()> {
        self.pos += 1;
        loop {
            let Some(token) = self.peek() else {
                bail!("Unterminated export list");
            };
            if token.is_punct("}") {
                self.pos += 1;
                break;
            }
            if token.kind.is_name() {
                if token.value == "as" {
                    if let Some(alias) = self.at(self.pos + 1).filter(|t| t.kind.is_name()) {
                        let alias = alias.value.clone();
                        if let Some(last) = export.specifiers.last_mut() {
                            *last = alias;
                        }
                        self.pos += 1;
                    }
                } else {
                    export.locals.push(token.value.clone());
                    export.specifiers.push(token.value.clone());
                }
            }
            self.pos += 1;
        }

        if self.bump_if(|t| t.is_keyword("from")) {
            if let Some(contents) = self.peek().and_then(Token::string_contents) {
                export.source = Some(contents.to_owned());
                self.pos += 1;
            }
        }
        Ok(())
    }

    fn parse_default_value(&mut self) -> Result<Span> {
        let Some(first) = self.peek() else {
            bail!("Missing value after 'export default'");
        };
        let start = first.position.offset;
        let last = self.expression_end(self.pos);
        self.pos = last + 1;
        Ok(Span::new(start, self.last_end()))
    }

    fn parse_declaration(&mut self) -> Result<Option<Declared>> {
        let start_token = &self.tokens[self.pos];
        let start = start_token.position.offset;

        if start_token.kind == TokenKind::Identifier {
            // async function
            self.pos += 1;
        }
        if self.bump_if(|t| t.is_keyword("function")) {
            self.bump_if(|t| t.is_operator("*"));
            let Some(name) = self.peek().filter(|t| t.kind.is_name()).map(|t| t.value.clone())
            else {
                return Ok(None);
            };
            self.pos += 1;
            return self.parse_function_rest(name, start).map(Some);
        }

        // const / let / var
        self.pos += 1;
        let Some(name) = self.peek().filter(|t| t.kind.is_name()).map(|t| t.value.clone()) else {
            return Ok(None);
        };
        self.pos += 1;
        if !self.bump_if(|t| t.is_operator("=")) {
            let last = self.expression_end(self.pos.saturating_sub(1));
            self.pos = last + 1;
            self.bump_if(|t| t.is_punct(";"));
            return Ok(Some(Declared::Variable {
                name,
                span: Span::new(start, self.last_end()),
            }));
        }

        if self.bump_if(|t| t.kind == TokenKind::Identifier && t.value == "async") {
            trace!("Async initializer for '{name}'");
        }
        if self.bump_if(|t| t.is_keyword("function")) {
            self.bump_if(|t| t.is_operator("*"));
            self.bump_if(|t| t.kind.is_name());
            return self.parse_function_rest(name, start).map(Some);
        }
        if let Some(arrow) = self.try_parse_arrow(&name, start)? {
            return Ok(Some(Declared::Function(arrow)));
        }

        let last = self.expression_end(self.pos);
        self.pos = last + 1;
        self.bump_if(|t| t.is_punct(";"));
        Ok(Some(Declared::Variable {
            name,
            span: Span::new(start, self.last_end()),
        }))
    }

    /// Parameters and body of a `function` once its name has been consumed
    fn parse_function_rest(&mut self, name: String, start: usize) -> Result<Declared> {
        if !self.peek().is_some_and(|t| t.is_punct("(")) {
            bail!("Expected '(' after function name '{name}'");
        }
        let params = self.parse_params()?;
        if !self.peek().is_some_and(|t| t.is_punct("{")) {
            bail!("Expected '{{' to open the body of '{name}'");
        }
        let body_span = self.skip_block()?;
        self.bump_if(|t| t.is_punct(";"));
        Ok(Declared::Function(self.make_declaration(
            name,
            params,
            body_span,
            Span::new(start, self.last_end()),
        )))
    }

    /// `(a, b) => ...` or `a => ...`; returns `None` when the initializer is not an arrow
    fn try_parse_arrow(&mut self, name: &str, start: usize) -> Result<Option<Declaration>> {
        let checkpoint = self.pos;
        let params = match self.peek() {
            Some(t) if t.is_punct("(") => self.parse_params()?,
            Some(t) if t.kind.is_name() => {
                let param = t.value.clone();
                self.pos += 1;
                vec![param]
            }
            _ => return Ok(None),
        };
        if !self.bump_if(|t| t.is_keyword("=>")) {
            self.pos = checkpoint;
            return Ok(None);
        }

        let body_span = if self.peek().is_some_and(|t| t.is_punct("{")) {
            self.skip_block()?
        } else {
            let first = self.pos;
            let last = self.expression_end(first);
            self.pos = last + 1;
            BodySpan {
                start: first,
                end: last,
            }
        };
        self.bump_if(|t| t.is_punct(";"));
        Ok(Some(self.make_declaration(
            name.to_owned(),
            params,
            body_span,
            Span::new(start, self.last_end()),
        )))
    }

    /// Consume a parenthesised parameter list, keeping plain parameter names
    fn parse_params(&mut self) -> Result<Vec<String>> {
        let open = self.pos;
        let close = self.matching_close(open)?;
        let mut params = Vec::new();
        let mut depth = 0usize;
        for idx in open..close {
            let token = &self.tokens[idx];
            match token.value.as_str() {
                "(" | "{" | "[" if token.kind == TokenKind::Punctuation => depth += 1,
                ")" | "}" | "]" if token.kind == TokenKind::Punctuation => {
                    depth = depth.saturating_sub(1);
                }
                _ if depth == 1 && token.kind.is_name() => {
                    let prev = &self.tokens[idx - 1];
                    if prev.is_punct("(") || prev.is_punct(",") || prev.is_operator("...") {
                        params.push(token.value.clone());
                    }
                }
                _ => {}
            }
        }
        self.pos = close + 1;
        Ok(params)
    }

    /// Consume a `{ ... }` block, returning the token indices of both braces
    fn skip_block(&mut self) -> Result<BodySpan> {
        let open = self.pos;
        let close = self.matching_close(open)?;
        self.pos = close + 1;
        Ok(BodySpan {
            start: open,
            end: close,
        })
    }

    /// Index of the token closing the group opened at `open`
    fn matching_close(&self, open: usize) -> Result<usize> {
        let mut depth = 0usize;
        for (idx, token) in self.tokens.iter().enumerate().skip(open) {
            if token.kind != TokenKind::Punctuation {
                continue;
            }
            match token.value.as_str() {
                "(" | "{" | "[" => depth += 1,
                ")" | "}" | "]" => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Ok(idx);
                    }
                }
                _ => {}
            }
        }
        bail!(
            "Unterminated group opened at offset {}",
            self.tokens[open].position.offset
        )
    }

    /// Index of the last token of the expression starting at `from`
    ///
    /// Stops before a `;` or an unbalanced closer at depth zero, and before a
    /// statement keyword that begins a new line.
    fn expression_end(&self, from: usize) -> usize {
        let mut depth = 0usize;
        let mut last = from;
        for idx in from..self.tokens.len() {
            let token = &self.tokens[idx];
            if depth == 0 && idx > from {
                let new_line = token.position.line > self.tokens[idx - 1].position.line;
                let starts_statement = token.kind == TokenKind::Keyword
                    && matches!(
                        token.value.as_str(),
                        "import" | "export" | "function" | "const" | "let" | "var"
                    );
                if token.is_punct(";") || (new_line && starts_statement) {
                    break;
                }
            }
            if token.kind == TokenKind::Punctuation {
                match token.value.as_str() {
                    "(" | "{" | "[" => depth += 1,
                    ")" | "}" | "]" => {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    ";" if depth == 0 => break,
                    _ => {}
                }
            }
            last = idx;
        }
        last
    }

    fn make_declaration(
        &self,
        name: String,
        params: Vec<String>,
        body_span: BodySpan,
        span: Span,
    ) -> Declaration {
        let end = (body_span.end + 1).min(self.tokens.len());
        let references = distinct_names(self.tokens.get(body_span.start..end).unwrap_or_default());
        Declaration {
            kind: DeclarationKind::classify(&name),
            name,
            params,
            body_span,
            span,
            references,
            inline: false,
        }
    }

    /// Names used by top-level code outside imports and function declarations
    fn top_level_references(&self, program: &Program) -> Vec<String> {
        let mut excluded: Vec<Span> = program.imports.iter().map(|i| i.span).collect();
        excluded.extend(
            program
                .exports
                .iter()
                .filter_map(|e| e.declaration.as_ref().map(|d| d.span)),
        );
        excluded.extend(program.body.iter().filter_map(|stmt| match stmt {
            Statement::Declaration(decl) => Some(decl.span),
            Statement::Call(_) => None,
        }));

        let top_level: Vec<Token> = self
            .tokens
            .iter()
            .filter(|t| {
                let offset = t.position.offset;
                !excluded
                    .iter()
                    .any(|span| span.start <= offset && offset < span.end)
            })
            .cloned()
            .collect();
        distinct_names(&top_level)
    }

    /// Whether the current token begins a new statement
    fn at_statement_boundary(&self) -> bool {
        let Some(prev) = self.pos.checked_sub(1).and_then(|idx| self.at(idx)) else {
            return true;
        };
        let current_line = self.peek().map_or(0, |t| t.position.line);
        prev.is_punct(";") || prev.is_punct("}") || prev.position.line < current_line
    }

    fn parse_fallback(&mut self, program: &mut Program) {
        let Some(token) = self.peek() else {
            return;
        };

        if token.is_punct("{") {
            if let Ok(close) = self.matching_close(self.pos) {
                self.pos = close + 1;
                return;
            }
        } else if token.kind.is_name() && self.at_statement_boundary() {
            if let Some(call) = self.parse_call() {
                trace!("Recorded top-level call to '{}'", call.callee);
                program.body.push(Statement::Call(call));
                return;
            }
        }
        self.pos += 1;
    }

    /// `a.b.c(...)` or a bare `debugger`, consuming it on success
    fn parse_call(&mut self) -> Option<CallStatement> {
        let start_idx = self.pos;
        let first = &self.tokens[start_idx];
        let start = first.position.offset;

        if first.value == "debugger" {
            self.pos += 1;
            self.bump_if(|t| t.is_punct(";"));
            return Some(CallStatement {
                callee: "debugger".to_owned(),
                span: Span::new(start, self.last_end()),
            });
        }

        let mut callee = first.value.clone();
        let mut idx = start_idx + 1;
        while let (Some(dot), Some(part)) = (self.at(idx), self.at(idx + 1)) {
            if !dot.is_punct(".") || !(part.kind.is_name() || part.kind == TokenKind::Keyword) {
                break;
            }
            callee.push('.');
            callee.push_str(&part.value);
            idx += 2;
        }

        if !self.at(idx).is_some_and(|t| t.is_punct("(")) {
            return None;
        }
        let close = self.matching_close(idx).ok()?;
        let closer = &self.tokens[close];
        let ends_statement = self.at(close + 1).is_none_or(|next| {
            next.is_punct(";") || next.is_punct("}") || next.position.line > closer.position.line
        });
        if !ends_statement {
            return None;
        }
        self.pos = close + 1;
        self.bump_if(|t| t.is_punct(";"));
        Some(CallStatement {
            callee,
            span: Span::new(start, self.last_end()),
        })
    }
}

/// Words the lexer reports as identifiers that never name a binding
const RESERVED_WORDS: &[&str] = &[
    "as", "async", "await", "break", "case", "catch", "class", "continue", "debugger", "default",
    "delete", "do", "else", "extends", "false", "finally", "for", "if", "in", "instanceof", "new",
    "null", "of", "return", "super", "switch", "this", "throw", "true", "try", "typeof",
    "undefined", "void", "while", "with", "yield",
];

/// Distinct identifier names in token order, skipping property accesses
fn distinct_names(tokens: &[Token]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (idx, token) in tokens.iter().enumerate() {
        let is_property = idx > 0 && tokens[idx - 1].is_punct(".");
        if token.kind.is_name()
            && !is_property
            && !RESERVED_WORDS.contains(&token.value.as_str())
            && !names.contains(&token.value)
        {
            names.push(token.value.clone());
        }
    }
    names
}
