use regex::Regex;
use lazy_static::lazy_static;
use crate::utils::{quote, lex_error};
use crate::error::UrpcError;

lazy_static! {
    pub static ref TOKEN_REGEX: Regex = Regex::new(concat!(
        r#"("""(?:[^"]|"[^"]|""[^"])*"{0,2}""""#,
        r#"|"(?:\\.|[^"\\\n])*""#,
        r"|/\*(?:[^*]|\*+[^*/])*\*+/",
        r"|//[^\n]*",
        r"|-?\d+(?:\.\d+)?",
        r"|[A-Za-z_][A-Za-z0-9_]*",
        r"|\.\.\.",
        r"|[{}()\[\]<>:;,=?.]",
        r"|\s+)",
    )).unwrap();
}

pub const KEYWORDS: &[&str] = &[
    "import", "type", "enum", "const", "pattern", "rpc", "proc", "stream", "map", "deprecated",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Ident,
    Str,
    Int,
    Float,
    Bool,
    Docstring,
    Comment,
    Symbol,
    Eof,
}

/// `text` is the raw source slice; `end_line`/`end_column` point just past
/// the last character.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind:       TokenKind,
    pub text:       String,
    pub line:       usize,
    pub column:     usize,
    pub end_line:   usize,
    pub end_column: usize,
}

impl Token {
    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    pub fn is_symbol(&self, text: &str) -> bool {
        self.is(TokenKind::Symbol, text)
    }

    pub fn is_keyword(&self, text: &str) -> bool {
        self.is(TokenKind::Keyword, text)
    }

    /// Identifiers and keywords; the parser accepts both as member names.
    pub fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Ident | TokenKind::Keyword)
    }

    /// Text used in "found ..." messages.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of file".to_string(),
            _ => quote(&self.text),
        }
    }

    /// Unescaped contents of a string literal.
    pub fn string_value(&self) -> String {
        let inner = self
            .text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(&self.text);
        unescape(inner)
    }

    /// Raw contents of a `"""` docstring.
    pub fn docstring_body(&self) -> &str {
        self.text
            .strip_prefix("\"\"\"")
            .and_then(|t| t.strip_suffix("\"\"\""))
            .unwrap_or(&self.text)
    }

    /// Text of a `//` comment without the slashes.
    pub fn comment_body(&self) -> &str {
        self.text.strip_prefix("//").unwrap_or(&self.text)
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n')   => out.push('\n'),
            Some('t')   => out.push('\t'),
            Some('r')   => out.push('\r'),
            Some(other) => out.push(other),
            None        => out.push('\\'),
        }
    }
    out
}

fn classify(part: &str) -> Option<TokenKind> {
    let first = part.chars().next()?;
    let kind = if part.starts_with("\"\"\"") && part.len() >= 6 {
        TokenKind::Docstring
    } else if first == '"' {
        TokenKind::Str
    } else if part.starts_with("/*") || first.is_whitespace() {
        return None;
    } else if part.starts_with("//") {
        TokenKind::Comment
    } else if first == '-' || first.is_ascii_digit() {
        if part.contains('.') { TokenKind::Float } else { TokenKind::Int }
    } else if first.is_ascii_alphabetic() || first == '_' {
        if part == "true" || part == "false" {
            TokenKind::Bool
        } else if KEYWORDS.contains(&part) {
            TokenKind::Keyword
        } else {
            TokenKind::Ident
        }
    } else {
        TokenKind::Symbol
    };
    Some(kind)
}

fn gap_error(rest: &str, line: usize, column: usize) -> UrpcError {
    let msg = if rest.starts_with('"') {
        "unterminated string".to_string()
    } else if rest.starts_with("/*") {
        "unterminated block comment".to_string()
    } else {
        let c = rest.chars().next().unwrap_or(' ');
        format!("illegal character {}", quote(&c.to_string()))
    };
    lex_error(&msg, line, column)
}

fn advance(part: &str, line: &mut usize, column: &mut usize) {
    let newline_count = part.matches('\n').count();
    if newline_count > 0 {
        *line += newline_count;
        if let Some(last_line_part) = part.split('\n').last() {
            *column = last_line_part.chars().count() + 1;
        }
    } else {
        *column += part.chars().count();
    }
}

/// Splits schema text into tokens. Whitespace and block comments are
/// dropped, `//` comments are kept for doc attachment, and an `Eof` token is
/// always last.
pub fn tokenize_schema(text: &str) -> Result<Vec<Token>, UrpcError> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut column = 1;
    let mut last_end = 0;

    for mat in TOKEN_REGEX.find_iter(text) {
        let start = mat.start();
        let part  = mat.as_str();

        if start > last_end {
            return Err(gap_error(&text[last_end..], line, column));
        }

        // `""` directly followed by a quote is an opening `"""` with no end.
        if part == "\"\"" && text[mat.end()..].starts_with('"') {
            return Err(lex_error("unterminated docstring", line, column));
        }

        let (start_line, start_column) = (line, column);
        advance(part, &mut line, &mut column);

        if let Some(kind) = classify(part) {
            tokens.push(Token {
                kind,
                text:       part.to_string(),
                line:       start_line,
                column:     start_column,
                end_line:   line,
                end_column: column,
            });
        }

        last_end = mat.end();
    }

    if last_end != text.len() {
        return Err(gap_error(&text[last_end..], line, column));
    }

    tokens.push(Token {
        kind:       TokenKind::Eof,
        text:       String::new(),
        line,
        column,
        end_line:   line,
        end_column: column,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(TokenKind, String)> {
        tokenize_schema(input)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_tokenize_simple() {
        let got = tokenize_schema("type User { id: int; }").unwrap();
        let summary: Vec<(&str, usize, usize)> =
            got.iter().map(|t| (t.text.as_str(), t.line, t.column)).collect();
        assert_eq!(
            summary,
            vec![
                ("type", 1, 1),
                ("User", 1, 6),
                ("{", 1, 11),
                ("id", 1, 13),
                (":", 1, 15),
                ("int", 1, 17),
                (";", 1, 20),
                ("}", 1, 22),
                ("", 1, 23),
            ]
        );
        assert_eq!(got[0].kind, TokenKind::Keyword);
        assert_eq!(got[5].kind, TokenKind::Ident);
        assert_eq!(got[8].kind, TokenKind::Eof);
    }

    #[test]
    fn test_tokenize_literals() {
        assert_eq!(
            kinds(r#"-3 2.5 true "a\"b" map"#),
            vec![
                (TokenKind::Int, "-3".into()),
                (TokenKind::Float, "2.5".into()),
                (TokenKind::Bool, "true".into()),
                (TokenKind::Str, r#""a\"b""#.into()),
                (TokenKind::Keyword, "map".into()),
                (TokenKind::Eof, "".into()),
            ]
        );
        assert_eq!(
            kinds("...Base deprecated"),
            vec![
                (TokenKind::Symbol, "...".into()),
                (TokenKind::Ident, "Base".into()),
                (TokenKind::Keyword, "deprecated".into()),
                (TokenKind::Eof, "".into()),
            ]
        );
        let toks = tokenize_schema(r#""tab\there""#).unwrap();
        assert_eq!(toks[0].string_value(), "tab\there");
    }

    #[test]
    fn test_tokenize_comments_and_docstrings() {
        let input = "/* skipped\n */ // note\n\"\"\"\n  Doc \"quoted\"\n\"\"\"\nrpc";
        let toks = tokenize_schema(input).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Comment);
        assert_eq!(toks[0].comment_body(), " note");
        assert_eq!((toks[0].line, toks[0].column), (2, 5));
        assert_eq!(toks[1].kind, TokenKind::Docstring);
        assert_eq!(toks[1].docstring_body(), "\n  Doc \"quoted\"\n");
        assert_eq!((toks[1].end_line, toks[1].end_column), (5, 4));
        assert_eq!((toks[2].text.as_str(), toks[2].line), ("rpc", 6));
    }

    #[test]
    fn test_docstring_ending_in_quotes() {
        let toks = tokenize_schema("\"\"\" Say \"hi\"\"\"\"\ntype A { x: int }").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Docstring);
        assert_eq!(toks[0].docstring_body(), " Say \"hi\"");
        assert!(toks[1].is_keyword("type"));

        let toks = tokenize_schema("\"\"\"a \"\"b\"\"\"\"\" \"\"\" next \"\"\"").unwrap();
        assert_eq!(toks[0].docstring_body(), "a \"\"b\"\"");
        assert_eq!(toks[1].docstring_body(), " next ");
    }

    #[test]
    fn test_tokenize_errors() {
        let cases = [
            ("type A { x: int @ }", "illegal character \"@\"", 1, 17),
            ("const A = \"abc\nx", "unterminated string", 1, 11),
            ("type A {}\n/* open", "unterminated block comment", 2, 1),
            ("\"\"\" never closed", "unterminated docstring", 1, 1),
        ];
        for (input, expected, line, column) in cases {
            match tokenize_schema(input) {
                Err(UrpcError::LexError { msg, location }) => {
                    assert_eq!(msg, expected, "input {:?}", input);
                    assert_eq!((location.line, location.column), (line, column), "input {:?}", input);
                }
                other => panic!("expected a LexError for {:?} but got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_columns_count_characters() {
        let toks = tokenize_schema("\"héllo\" x").unwrap();
        assert_eq!(toks[1].column, 9);
    }
}
