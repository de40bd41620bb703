//! Lexer for component modules
//!
//! Turns source text into a flat token stream. Whitespace and comments are skipped
//! without producing tokens. Every other position is matched against a fixed list
//! of patterns in priority order and the first pattern that matches wins, even when
//! a later pattern would produce a longer token. Text that matches nothing is
//! skipped one character at a time, so the lexer never fails and always terminates.

use once_cell::sync::Lazy;
use regex::Regex;

/// Category of a lexed token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Quoted string or template literal, quotes included
    String,
    /// Numeric literal
    Number,
    /// One of `import`, `export`, `from`, `function`, `const`, `let`, `var`, `=>`
    Keyword,
    /// Identifier following the `create<Upper>` factory naming convention
    Component,
    /// Any other identifier
    Identifier,
    Operator,
    Punctuation,
}

impl TokenKind {
    /// Whether the token names something (plain identifier or component factory)
    pub fn is_name(self) -> bool {
        matches!(self, Self::Identifier | Self::Component)
    }
}

/// Location of a token in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourcePosition {
    /// Byte offset of the first character
    pub offset: usize,
    /// 1-based line number
    pub line: usize,
    /// 1-based column, counted in characters
    pub column: usize,
}

/// A single lexical unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub position: SourcePosition,
}

impl Token {
    /// Byte offset just past the end of this token
    pub fn end_offset(&self) -> usize {
        self.position.offset + self.value.len()
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.value == keyword
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.value == punct
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.value == op
    }

    /// Returns the unquoted contents of a string literal token
    pub fn string_contents(&self) -> Option<&str> {
        if self.kind != TokenKind::String || self.value.len() < 2 {
            return None;
        }
        Some(&self.value[1..self.value.len() - 1])
    }
}

/// Patterns consumed without emitting a token
static SKIP_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        anchored(r"\s+"),
        anchored(r"//[^\n]*"),
        anchored(r"/\*[\s\S]*?\*/"),
    ]
});

/// Token patterns in priority order; the first match wins
static TOKEN_PATTERNS: Lazy<Vec<(TokenKind, Regex)>> = Lazy::new(|| {
    vec![
        (
            TokenKind::String,
            anchored(r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|`(?:[^`\\]|\\[\s\S])*`"#),
        ),
        (
            TokenKind::Number,
            anchored(r"0[xX][0-9a-fA-F]+|\d+(?:\.\d+)?(?:[eE][+-]?\d+)?"),
        ),
        (
            TokenKind::Keyword,
            anchored(r"(?:import|export|from|function|const|let|var)\b|=>"),
        ),
        (TokenKind::Component, anchored(r"create[A-Z][A-Za-z0-9_$]*")),
        (TokenKind::Identifier, anchored(r"[A-Za-z_$][A-Za-z0-9_$]*")),
        (
            TokenKind::Operator,
            anchored(
                r"===|!==|\*\*=|\.\.\.|&&=|\|\|=|\?\?=|&&|\|\||\?\?|\?\.|==|!=|<=|>=|\+\+|--|\+=|-=|\*=|/=|%=|\*\*|[+\-*/%=<>!&|^~?]",
            ),
        ),
        (TokenKind::Punctuation, anchored(r"[{}()\[\];,.:]")),
    ]
});

fn anchored(pattern: &str) -> Regex {
    Regex::new(&format!("^(?:{pattern})")).expect("lexer patterns are valid regular expressions")
}

/// Streaming tokenizer over a source string
#[derive(Debug)]
pub struct Lexer<'src> {
    source: &'src str,
    offset: usize,
    line: usize,
    column: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    fn current_position(&self) -> SourcePosition {
        SourcePosition {
            offset: self.offset,
            line: self.line,
            column: self.column,
        }
    }

    /// Move past `len` bytes, keeping line and column in sync
    fn advance(&mut self, len: usize) {
        let consumed = &self.source[self.offset..self.offset + len];
        for ch in consumed.chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.offset += len;
    }

    /// Skip whitespace and comments, returning whether anything was consumed
    fn skip_trivia(&mut self) -> bool {
        let rest = &self.source[self.offset..];
        let skipped = SKIP_PATTERNS
            .iter()
            .find_map(|re| re.find(rest).map(|m| m.end()))
            .filter(|&len| len > 0);
        if let Some(len) = skipped {
            self.advance(len);
            true
        } else {
            false
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        while self.offset < self.source.len() {
            if self.skip_trivia() {
                continue;
            }

            let rest = &self.source[self.offset..];
            let matched = TOKEN_PATTERNS.iter().find_map(|(kind, re)| {
                re.find(rest)
                    .filter(|m| !m.is_empty())
                    .map(|m| (*kind, m.end()))
            });

            match matched {
                Some((kind, len)) => {
                    let position = self.current_position();
                    let value = rest[..len].to_owned();
                    self.advance(len);
                    return Some(Token {
                        kind,
                        value,
                        position,
                    });
                }
                None => {
                    let skipped = rest.chars().next().map_or(1, char::len_utf8);
                    log::trace!(
                        "Skipping unrecognised character {:?} at {}:{}",
                        &rest[..skipped],
                        self.line,
                        self.column
                    );
                    self.advance(skipped);
                }
            }
        }
        None
    }
}

/// Tokenize a complete source string
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds_and_values(source: &str) -> Vec<(TokenKind, String)> {
        tokenize(source)
            .into_iter()
            .map(|t| (t.kind, t.value))
            .collect()
    }

    #[test]
    fn test_import_statement() {
        let tokens = kinds_and_values("import { createButton, helper } from './b.js';");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Keyword, "import".into()),
                (TokenKind::Punctuation, "{".into()),
                (TokenKind::Component, "createButton".into()),
                (TokenKind::Punctuation, ",".into()),
                (TokenKind::Identifier, "helper".into()),
                (TokenKind::Punctuation, "}".into()),
                (TokenKind::Keyword, "from".into()),
                (TokenKind::String, "'./b.js'".into()),
                (TokenKind::Punctuation, ";".into()),
            ]
        );
    }

    #[test]
    fn test_comments_and_whitespace_are_skipped() {
        let tokens = kinds_and_values("// line\n/* block\n comment */ const x = 1;");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Keyword, "const".into()),
                (TokenKind::Identifier, "x".into()),
                (TokenKind::Operator, "=".into()),
                (TokenKind::Number, "1".into()),
                (TokenKind::Punctuation, ";".into()),
            ]
        );
    }

    #[test]
    fn test_keyword_requires_word_boundary() {
        let tokens = kinds_and_values("imports exporter");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Identifier, "imports".into()),
                (TokenKind::Identifier, "exporter".into()),
            ]
        );
    }

    #[test]
    fn test_arrow_is_keyword_not_operator() {
        let tokens = kinds_and_values("(a) => a");
        assert_eq!(tokens[3], (TokenKind::Keyword, "=>".into()));
    }

    #[test]
    fn test_priority_order_misclassifies_property_keywords() {
        // First match wins: a property named like a keyword still lexes as a keyword.
        let tokens = kinds_and_values("obj.from");
        assert_eq!(tokens[2], (TokenKind::Keyword, "from".into()));
    }

    #[test]
    fn test_unknown_characters_are_skipped() {
        let tokens = kinds_and_values("a # @ b");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Identifier, "a".into()),
                (TokenKind::Identifier, "b".into()),
            ]
        );
    }

    #[test]
    fn test_positions_strictly_increase() {
        let source = "export function createCard(props) {\n  return `x ${props}`; // hi\n}\n#é€ 0x1F 'unterminated";
        let tokens = tokenize(source);
        assert!(!tokens.is_empty());
        for pair in tokens.windows(2) {
            assert!(pair[0].position.offset < pair[1].position.offset);
            assert!(pair[0].end_offset() <= pair[1].position.offset);
        }
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = tokenize("a\n  bb");
        assert_eq!(
            tokens[1].position,
            SourcePosition {
                offset: 4,
                line: 2,
                column: 3
            }
        );
    }

    #[test]
    fn test_terminates_on_arbitrary_input() {
        let inputs = ["", "\"", "/*", "`", "\\", "€€€", "'a\nb'", "=>=>", "...."];
        for input in inputs {
            let tokens = tokenize(input);
            assert!(tokens.len() <= input.len());
        }
    }

    #[test]
    fn test_string_contents() {
        let tokens = tokenize("\"./a.css\"");
        assert_eq!(tokens[0].string_contents(), Some("./a.css"));
    }
}
