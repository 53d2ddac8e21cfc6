//! AST produced by the parser. Every node carries its source span; doc
//! strings are already normalized.

use std::fmt;

pub use urpc_schema::{Deprecation, EnumKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line:   usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Pos,
    pub end:   Pos,
}

impl Span {
    pub fn new(line: usize, column: usize, end_line: usize, end_column: usize) -> Self {
        Span {
            start: Pos { line, column },
            end:   Pos { line: end_line, column: end_column },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaFile {
    pub imports: Vec<Import>,
    pub decls:   Vec<Decl>,
    /// `"""` docstrings at top level that are not attached to a declaration.
    pub docs:    Vec<StandaloneDoc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandaloneDoc {
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Type(TypeDecl),
    Enum(EnumDecl),
    Const(ConstDecl),
    Pattern(PatternDecl),
    Rpc(RpcDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Type(d)    => &d.name,
            Decl::Enum(d)    => &d.name,
            Decl::Const(d)   => &d.name,
            Decl::Pattern(d) => &d.name,
            Decl::Rpc(d)     => &d.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Type(d)    => d.span,
            Decl::Enum(d)    => d.span,
            Decl::Const(d)   => d.span,
            Decl::Pattern(d) => d.span,
            Decl::Rpc(d)     => d.span,
        }
    }

    pub fn doc(&self) -> &str {
        match self {
            Decl::Type(d)    => &d.doc,
            Decl::Enum(d)    => &d.doc,
            Decl::Const(d)   => &d.doc,
            Decl::Pattern(d) => &d.doc,
            Decl::Rpc(d)     => &d.doc,
        }
    }

    pub fn deprecated(&self) -> Option<&Deprecation> {
        match self {
            Decl::Type(d)    => d.deprecated.as_ref(),
            Decl::Enum(d)    => d.deprecated.as_ref(),
            Decl::Const(d)   => d.deprecated.as_ref(),
            Decl::Pattern(d) => d.deprecated.as_ref(),
            Decl::Rpc(d)     => d.deprecated.as_ref(),
        }
    }

    /// Keyword that introduces the declaration.
    pub fn kind(&self) -> &'static str {
        match self {
            Decl::Type(_)    => "type",
            Decl::Enum(_)    => "enum",
            Decl::Const(_)   => "const",
            Decl::Pattern(_) => "pattern",
            Decl::Rpc(_)     => "rpc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name:       String,
    pub doc:        String,
    pub deprecated: Option<Deprecation>,
    pub body:       ObjectBody,
    pub span:       Span,
}

/// Fields and `...Name` spreads of a type or inline object, in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectBody {
    pub members: Vec<Member>,
}

impl ObjectBody {
    pub fn fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Field(f) => Some(f),
            Member::Spread(_) => None,
        })
    }

    pub fn spreads(&self) -> impl Iterator<Item = &Spread> {
        self.members.iter().filter_map(|m| match m {
            Member::Spread(s) => Some(s),
            Member::Field(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Field(FieldDecl),
    Spread(Spread),
}

/// `...Name`: copies every field of the named type into the enclosing body.
#[derive(Debug, Clone, PartialEq)]
pub struct Spread {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name:      String,
    pub type_expr: TypeExpr,
    pub optional:  bool,
    pub doc:       String,
    pub span:      Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    /// A primitive (`string`, `int`, ...) or a declared name.
    Named(String),
    Array(Box<TypeExpr>),
    Map(Box<TypeExpr>),
    /// An inline `{ ... }` object.
    Object(ObjectBody),
}

impl TypeExpr {
    /// The bare name when the expression is not an array or map.
    pub fn as_named(&self) -> Option<&str> {
        match &self.kind {
            TypeExprKind::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeExprKind::Named(name) => write!(f, "{}", name),
            TypeExprKind::Array(item) => write!(f, "{}[]", item),
            TypeExprKind::Map(value)  => write!(f, "map<{}>", value),
            TypeExprKind::Object(body) => {
                write!(f, "{{")?;
                for (i, member) in body.members.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    match member {
                        Member::Field(field) => {
                            let mark = if field.optional { "?" } else { "" };
                            write!(f, "{}{}{}: {}", sep, field.name, mark, field.type_expr)?;
                        }
                        Member::Spread(spread) => write!(f, "{}...{}", sep, spread.name)?,
                    }
                }
                write!(f, " }}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name:       String,
    pub doc:        String,
    pub deprecated: Option<Deprecation>,
    pub members:    Vec<EnumMemberDecl>,
    pub span:       Span,
}

impl EnumDecl {
    /// `Int` when the first explicit value is an integer, `String` otherwise.
    pub fn kind(&self) -> EnumKind {
        match self.members.iter().find_map(|m| m.value.as_ref()) {
            Some(EnumLiteral::Int(_)) => EnumKind::Int,
            _ => EnumKind::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMemberDecl {
    pub name:  String,
    pub value: Option<EnumLiteral>,
    pub doc:   String,
    pub span:  Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumLiteral {
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub name:       String,
    pub doc:        String,
    pub deprecated: Option<Deprecation>,
    pub type_expr:  Option<TypeExpr>,
    pub value:      Literal,
    pub span:       Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Literal {
    pub fn describe(&self) -> &'static str {
        match self {
            Literal::Str(_)   => "string",
            Literal::Int(_)   => "int",
            Literal::Float(_) => "float",
            Literal::Bool(_)  => "bool",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternDecl {
    pub name:       String,
    pub doc:        String,
    pub deprecated: Option<Deprecation>,
    pub template:   String,
    pub span:       Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcDecl {
    pub name:       String,
    pub doc:        String,
    pub deprecated: Option<Deprecation>,
    pub procs:      Vec<OperationDecl>,
    pub streams:    Vec<OperationDecl>,
    pub span:       Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDecl {
    pub name:       String,
    pub doc:        String,
    pub deprecated: Option<Deprecation>,
    pub input:      TypeExpr,
    pub output:     TypeExpr,
    pub span:       Span,
}
