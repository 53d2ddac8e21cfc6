//! Naming conventions: declarations, procedures, streams and enum members
//! are PascalCase, fields camelCase and constants UPPER_SNAKE_CASE.

use std::path::Path;

use crate::{
    error::{Location, UrpcError},
    types::{Decl, ObjectBody, TypeExprKind},
    utils::quote,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    PascalCase,
    CamelCase,
    UpperSnakeCase,
}

impl Convention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Convention::PascalCase     => "PascalCase",
            Convention::CamelCase      => "camelCase",
            Convention::UpperSnakeCase => "UPPER_SNAKE_CASE",
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Convention::PascalCase     => is_pascal_case(name),
            Convention::CamelCase      => is_camel_case(name),
            Convention::UpperSnakeCase => is_upper_snake_case(name),
        }
    }
}

/// Uppercase first letter, no underscores.
pub fn is_pascal_case(name: &str) -> bool {
    name.chars().next().map_or(false, char::is_uppercase) && !name.contains('_')
}

/// Lowercase first letter, no underscores.
pub fn is_camel_case(name: &str) -> bool {
    name.chars().next().map_or(false, char::is_lowercase) && !name.contains('_')
}

/// Uppercase letters and digits in words joined by single underscores.
pub fn is_upper_snake_case(name: &str) -> bool {
    if !name.chars().next().map_or(false, char::is_uppercase) {
        return false;
    }
    if name.ends_with('_') || name.contains("__") {
        return false;
    }
    name.chars()
        .all(|c| c == '_' || c.is_ascii_digit() || (c.is_alphabetic() && c.is_uppercase()))
}

/// Reports every name in `decl` that breaks its convention.
pub fn check_names(file: &Path, decl: &Decl, errors: &mut Vec<UrpcError>) {
    let mut check = |convention: Convention, subject: String, name: &str, line: usize, column: usize| {
        if !convention.matches(name) {
            errors.push(UrpcError::InvalidName {
                subject,
                name: name.to_string(),
                convention,
                location: Location::new(file, line, column),
            });
        }
    };

    let start = decl.span().start;
    match decl {
        Decl::Type(t) => {
            check(Convention::PascalCase, format!("type name {}", quote(&t.name)), &t.name, start.line, start.column);
            check_fields(&t.body, &format!("type {}", quote(&t.name)), &mut check);
        }
        Decl::Enum(e) => {
            check(Convention::PascalCase, format!("enum name {}", quote(&e.name)), &e.name, start.line, start.column);
            for member in &e.members {
                check(
                    Convention::PascalCase,
                    format!("enum member {} in enum {}", quote(&member.name), quote(&e.name)),
                    &member.name,
                    member.span.start.line,
                    member.span.start.column,
                );
            }
        }
        Decl::Const(c) => {
            check(Convention::UpperSnakeCase, format!("constant name {}", quote(&c.name)), &c.name, start.line, start.column);
        }
        Decl::Pattern(p) => {
            check(Convention::PascalCase, format!("pattern name {}", quote(&p.name)), &p.name, start.line, start.column);
        }
        Decl::Rpc(r) => {
            check(Convention::PascalCase, format!("rpc name {}", quote(&r.name)), &r.name, start.line, start.column);
            let ops = r
                .procs
                .iter()
                .map(|op| ("procedure", op))
                .chain(r.streams.iter().map(|op| ("stream", op)));
            for (kind, op) in ops {
                check(
                    Convention::PascalCase,
                    format!("{} name {} in rpc {}", kind, quote(&op.name), quote(&r.name)),
                    &op.name,
                    op.span.start.line,
                    op.span.start.column,
                );
            }
        }
    }
}

fn check_fields(
    body: &ObjectBody,
    owner: &str,
    check: &mut impl FnMut(Convention, String, &str, usize, usize),
) {
    for field in body.fields() {
        check(
            Convention::CamelCase,
            format!("field {} in {}", quote(&field.name), owner),
            &field.name,
            field.span.start.line,
            field.span.start.column,
        );
        let mut expr = &field.type_expr;
        loop {
            match &expr.kind {
                TypeExprKind::Array(inner) | TypeExprKind::Map(inner) => expr = inner,
                TypeExprKind::Object(inline) => {
                    check_fields(inline, &format!("inline object {}", quote(&field.name)), check);
                    break;
                }
                TypeExprKind::Named(_) => break,
            }
        }
    }
}
