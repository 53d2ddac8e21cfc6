use crate::error::{Location, UrpcError};

/// JSON-style quoting for names and token text in messages.
pub fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

pub fn lex_error(msg: &str, line: usize, column: usize) -> UrpcError {
    UrpcError::LexError {
        msg:      msg.to_string(),
        location: Location::at(line, column),
    }
}

pub fn parse_error(expected: &str, found: &str, line: usize, column: usize) -> UrpcError {
    UrpcError::ParseError {
        expected: expected.to_string(),
        found:    found.to_string(),
        location: Location::at(line, column),
    }
}

pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
