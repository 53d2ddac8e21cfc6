use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::PatternError;
use crate::ir::Deprecation;

/// One piece of a pattern template, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A named string template such as `events.users.{userId}.{eventType}`.
///
/// `placeholders` lists each distinct placeholder once, in order of first
/// occurrence; it is also the parameter order of [`Pattern::render`]. A
/// placeholder that appears several times in the template is bound to a
/// single parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub name:         String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc:          String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated:   Option<Deprecation>,
    pub template:     String,
    pub placeholders: Vec<String>,
    pub segments:     Vec<Segment>,
}

impl Pattern {
    pub fn new(name: String, template: String, segments: Vec<Segment>) -> Self {
        let mut placeholders: Vec<String> = Vec::new();
        for segment in &segments {
            if let Segment::Placeholder(p) = segment {
                if !placeholders.contains(p) {
                    placeholders.push(p.clone());
                }
            }
        }

        Pattern::with_placeholders(name, template, placeholders, segments)
    }

    /// Builds a pattern whose distinct placeholder list is already known.
    pub fn with_placeholders(
        name: String,
        template: String,
        placeholders: Vec<String>,
        segments: Vec<Segment>,
    ) -> Self {
        Pattern {
            name,
            doc: String::new(),
            deprecated: None,
            template,
            placeholders,
            segments,
        }
    }

    /// A pattern without placeholders always renders its template.
    pub fn is_static(&self) -> bool {
        self.placeholders.is_empty()
    }

    pub fn literal_segments(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(text) => Some(text.as_str()),
                Segment::Placeholder(_) => None,
            })
            .collect()
    }

    /// Renders the template with positional arguments, one per entry of
    /// `placeholders`. Values are inserted verbatim.
    pub fn render(&self, args: &[&str]) -> Result<String, PatternError> {
        if args.len() != self.placeholders.len() {
            return Err(PatternError::ArgumentCount {
                pattern:  self.name.clone(),
                expected: self.placeholders.len(),
                got:      args.len(),
            });
        }

        let bound: HashMap<&str, &str> = self
            .placeholders
            .iter()
            .map(String::as_str)
            .zip(args.iter().copied())
            .collect();

        self.render_with(|name| bound.get(name).copied())
    }

    /// Renders the template looking each placeholder up by name.
    pub fn render_map(&self, values: &HashMap<String, String>) -> Result<String, PatternError> {
        self.render_with(|name| values.get(name).map(String::as_str))
    }

    fn render_with<'v>(&self, lookup: impl Fn(&str) -> Option<&'v str>) -> Result<String, PatternError> {
        let mut out = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = lookup(name).ok_or_else(|| PatternError::MissingValue {
                        pattern:     self.name.clone(),
                        placeholder: name.clone(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}
