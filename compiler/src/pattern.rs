use lazy_static::lazy_static;
use regex::Regex;
use urpc_schema::{Pattern, Segment};

use crate::utils::quote;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// A checked pattern template, split into literal and placeholder pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    pub segments:     Vec<Segment>,
    /// Distinct placeholder names in order of first occurrence.
    pub placeholders: Vec<String>,
}

impl CompiledTemplate {
    pub fn into_pattern(self, name: &str, template: &str, doc: String) -> Pattern {
        let mut pattern =
            Pattern::with_placeholders(name.to_string(), template.to_string(), self.placeholders, self.segments);
        pattern.doc = doc;
        pattern
    }
}

/// Splits `template` into segments. Placeholders are `{identifier}`; the
/// error message names the first malformed brace.
pub fn compile_pattern(template: &str) -> Result<CompiledTemplate, String> {
    let mut segments = Vec::new();
    let mut placeholders: Vec<String> = Vec::new();
    let mut literal = String::new();
    let mut open: Option<(usize, String)> = None;

    for (i, c) in template.char_indices() {
        match open.as_mut() {
            None => match c {
                '{' => open = Some((i, String::new())),
                '}' => return Err(format!("unexpected \"}}\" at offset {}", i)),
                c => literal.push(c),
            },
            Some((start, name)) => match c {
                '{' => return Err(format!("nested \"{{\" in placeholder starting at offset {}", start)),
                '}' => {
                    if name.is_empty() {
                        return Err(format!("empty placeholder at offset {}", start));
                    }
                    if !IDENTIFIER.is_match(name) {
                        return Err(format!("invalid placeholder name {}: must be a valid identifier", quote(name)));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    if !placeholders.contains(name) {
                        placeholders.push(name.clone());
                    }
                    segments.push(Segment::Placeholder(std::mem::take(name)));
                    open = None;
                }
                c => name.push(c),
            },
        }
    }

    if let Some((start, name)) = open {
        return Err(format!("unclosed placeholder {} at offset {}", quote(&format!("{{{}", name)), start));
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(CompiledTemplate { segments, placeholders })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_segments() {
        let compiled = compile_pattern("events.users.{userId}.{eventType}").unwrap();
        assert_eq!(
            compiled.segments,
            vec![
                Segment::Literal("events.users.".into()),
                Segment::Placeholder("userId".into()),
                Segment::Literal(".".into()),
                Segment::Placeholder("eventType".into()),
            ]
        );
        assert_eq!(compiled.placeholders, vec!["userId", "eventType"]);
    }

    #[test]
    fn test_repeated_and_adjacent_placeholders() {
        let compiled = compile_pattern("{a}{b}-{a}").unwrap();
        assert_eq!(compiled.placeholders, vec!["a", "b"]);
        assert_eq!(compiled.segments.len(), 4);

        let pattern = compiled.into_pattern("P", "{a}{b}-{a}", "Doc.".into());
        assert_eq!(pattern.doc, "Doc.");
        assert_eq!(pattern.render(&["x", "y"]).unwrap(), "xy-x");
    }

    #[test]
    fn test_pattern_keeps_compiled_placeholders() {
        let compiled = compile_pattern("orders.{region}.{orderId}.{region}").unwrap();
        let expected = compiled.placeholders.clone();
        let pattern = compiled.into_pattern("OrderTopic", "orders.{region}.{orderId}.{region}", String::new());
        assert_eq!(pattern.placeholders, expected);
        assert_eq!(pattern.placeholders, vec!["region", "orderId"]);
        assert_eq!(pattern.render(&["eu", "o-1"]).unwrap(), "orders.eu.o-1.eu");
    }

    #[test]
    fn test_static_template() {
        let compiled = compile_pattern("system.health").unwrap();
        assert!(compiled.placeholders.is_empty());
        assert_eq!(compiled.segments, vec![Segment::Literal("system.health".into())]);
        assert!(compile_pattern("").unwrap().segments.is_empty());
    }

    #[test]
    fn test_invalid_templates() {
        let cases = [
            ("events.{userId", "unclosed placeholder"),
            ("events.{a{b}}", "nested"),
            ("events.}", "unexpected"),
            ("events.{}", "empty placeholder"),
            ("events.{1abc}", "invalid placeholder name \"1abc\""),
            ("events.{user-id}", "invalid placeholder name"),
        ];
        for (template, needle) in cases {
            let err = compile_pattern(template).unwrap_err();
            assert!(err.contains(needle), "{:?}: {}", template, err);
        }
    }
}
