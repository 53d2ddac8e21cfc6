use crate::{
    doc::normalize_doc,
    error::UrpcError,
    tokenizer::{Token, TokenKind},
    types::{
        ConstDecl, Decl, Deprecation, EnumDecl, EnumLiteral, EnumMemberDecl, FieldDecl, Import,
        Literal, Member, ObjectBody, OperationDecl, PatternDecl, RpcDecl, SchemaFile, Span, Spread,
        StandaloneDoc, TypeDecl, TypeExpr, TypeExprKind,
    },
    utils::parse_error,
};

const DECL_KEYWORDS: &[&str] = &["type", "enum", "const", "pattern", "rpc", "deprecated"];

/// Parses a token stream (as produced by `tokenize_schema`) into a
/// [`SchemaFile`]. The first syntax error aborts the whole file.
pub fn parse_schema(tokens: &[Token]) -> Result<SchemaFile, UrpcError> {
    let mut parser = Parser::new(tokens);
    parser.parse_file()
}

struct Parser {
    /// Everything except `//` comments; ends with `Eof`.
    tokens:       Vec<Token>,
    /// Comment block attached to the token at the same index, if any.
    comment_docs: Vec<Option<String>>,
    index:        usize,
}

impl Parser {
    fn new(raw: &[Token]) -> Self {
        let mut tokens: Vec<Token> = Vec::with_capacity(raw.len());
        let mut comment_docs = Vec::with_capacity(raw.len());
        let mut run: Vec<&Token> = Vec::new();
        let mut prev_end_line: Option<usize> = None;

        for tok in raw {
            if tok.kind == TokenKind::Comment {
                // Trailing comments never document anything.
                if prev_end_line == Some(tok.line) {
                    run.clear();
                    continue;
                }
                if run.last().map_or(false, |last| last.line + 1 != tok.line) {
                    run.clear();
                }
                run.push(tok);
                continue;
            }

            let attached = match run.last() {
                Some(last) if last.line + 1 == tok.line => {
                    let body: Vec<&str> = run.iter().map(|c| c.comment_body()).collect();
                    Some(normalize_doc(Some(&body.join("\n"))))
                }
                _ => None,
            };
            run.clear();
            prev_end_line = Some(tok.end_line);
            tokens.push(tok.clone());
            comment_docs.push(attached);
        }

        if tokens.last().map_or(true, |t| t.kind != TokenKind::Eof) {
            let (line, column) = tokens.last().map_or((1, 1), |t| (t.end_line, t.end_column));
            tokens.push(Token {
                kind:       TokenKind::Eof,
                text:       String::new(),
                line,
                column,
                end_line:   line,
                end_column: column,
            });
            comment_docs.push(None);
        }

        Parser { tokens, comment_docs, index: 0 }
    }

    // Cursor

    fn current_token(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.index.min(last)]
    }

    fn peek_token(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.index + 1).min(last)]
    }

    fn bump(&mut self) -> Token {
        let tok = self.current_token().clone();
        if tok.kind != TokenKind::Eof {
            self.index += 1;
        }
        tok
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.current_token().is_symbol(symbol) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<Token, UrpcError> {
        if self.current_token().is_symbol(symbol) {
            Ok(self.bump())
        } else {
            Err(self.unexpected_token(&format!("\"{}\"", symbol)))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<Token, UrpcError> {
        if self.current_token().is_keyword(keyword) {
            Ok(self.bump())
        } else {
            Err(self.unexpected_token(&format!("\"{}\"", keyword)))
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, expected: &str) -> Result<Token, UrpcError> {
        if self.current_token().kind == kind {
            Ok(self.bump())
        } else {
            Err(self.unexpected_token(expected))
        }
    }

    fn expect_ident(&mut self) -> Result<Token, UrpcError> {
        self.expect_kind(TokenKind::Ident, "identifier")
    }

    fn expect_name(&mut self) -> Result<Token, UrpcError> {
        if self.current_token().is_name() {
            Ok(self.bump())
        } else {
            Err(self.unexpected_token("name"))
        }
    }

    fn eat_separator(&mut self) {
        if !self.eat_symbol(";") {
            self.eat_symbol(",");
        }
    }

    fn unexpected_token(&self, expected: &str) -> UrpcError {
        let tok = self.current_token();
        parse_error(expected, &tok.describe(), tok.line, tok.column)
    }

    fn span_from(&self, start: &Token) -> Span {
        let end = if self.index == 0 {
            start
        } else {
            &self.tokens[(self.index - 1).min(self.tokens.len() - 1)]
        };
        Span::new(start.line, start.column, end.end_line, end.end_column)
    }

    /// Consumes any docstrings in front of a member and returns the doc that
    /// applies to it. A docstring only counts when it ends on the line above
    /// the member or on the member's own line.
    fn leading_doc(&mut self) -> String {
        let mut doc: Option<String> = None;
        while self.current_token().kind == TokenKind::Docstring {
            let tok = self.bump();
            let next_line = self.current_token().line;
            doc = if next_line <= tok.end_line + 1 {
                Some(normalize_doc(Some(tok.docstring_body())))
            } else {
                None
            };
        }
        match doc {
            Some(doc) => doc,
            None => self
                .comment_docs
                .get(self.index)
                .cloned()
                .flatten()
                .unwrap_or_default(),
        }
    }

    // File

    fn parse_file(&mut self) -> Result<SchemaFile, UrpcError> {
        let mut file = SchemaFile::default();

        loop {
            let tok = self.current_token().clone();
            match tok.kind {
                TokenKind::Eof => break,
                TokenKind::Docstring => {
                    let next = self.peek_token();
                    let attaches = next.line <= tok.end_line + 1
                        && DECL_KEYWORDS.iter().any(|k| next.is_keyword(k));
                    if attaches {
                        let doc = self.leading_doc();
                        let decl = self.parse_decl(doc)?;
                        file.decls.push(decl);
                    } else {
                        self.bump();
                        file.docs.push(StandaloneDoc {
                            text: normalize_doc(Some(tok.docstring_body())),
                            span: Span::new(tok.line, tok.column, tok.end_line, tok.end_column),
                        });
                    }
                }
                TokenKind::Keyword if tok.text == "import" => {
                    self.bump();
                    let path = self.expect_kind(TokenKind::Str, "import path string")?;
                    file.imports.push(Import {
                        path: path.string_value(),
                        span: self.span_from(&tok),
                    });
                    self.eat_separator();
                }
                TokenKind::Keyword if DECL_KEYWORDS.contains(&tok.text.as_str()) => {
                    let doc = self.leading_doc();
                    let decl = self.parse_decl(doc)?;
                    file.decls.push(decl);
                }
                _ => return Err(self.unexpected_token("declaration")),
            }
        }

        Ok(file)
    }

    fn parse_decl(&mut self, doc: String) -> Result<Decl, UrpcError> {
        let deprecated = self.parse_deprecation()?;
        let keyword = self.current_token().clone();
        if keyword.kind != TokenKind::Keyword {
            return Err(self.unexpected_token("declaration"));
        }
        let decl = match keyword.text.as_str() {
            "type"    => Decl::Type(self.parse_type(doc, deprecated)?),
            "enum"    => Decl::Enum(self.parse_enum(doc, deprecated)?),
            "const"   => Decl::Const(self.parse_const(doc, deprecated)?),
            "pattern" => Decl::Pattern(self.parse_pattern(doc, deprecated)?),
            "rpc"     => Decl::Rpc(self.parse_rpc(doc, deprecated)?),
            _         => return Err(self.unexpected_token("declaration")),
        };
        Ok(decl)
    }

    /// `deprecated` or `deprecated("message")` in front of a declaration.
    fn parse_deprecation(&mut self) -> Result<Option<Deprecation>, UrpcError> {
        if !self.current_token().is_keyword("deprecated") {
            return Ok(None);
        }
        self.bump();
        let mut message = String::new();
        if self.eat_symbol("(") {
            message = self.expect_kind(TokenKind::Str, "deprecation message string")?.string_value();
            self.expect_symbol(")")?;
        }
        Ok(Some(Deprecation { message }))
    }

    // Declarations

    fn parse_type(&mut self, doc: String, deprecated: Option<Deprecation>) -> Result<TypeDecl, UrpcError> {
        let start = self.expect_keyword("type")?;
        let name = self.expect_ident()?;
        let body = self.parse_object_body()?;

        Ok(TypeDecl {
            name: name.text,
            doc,
            deprecated,
            body,
            span: self.span_from(&start),
        })
    }

    /// `{ (field | ...Name)* }`, shared by type declarations and inline objects.
    fn parse_object_body(&mut self) -> Result<ObjectBody, UrpcError> {
        self.expect_symbol("{")?;

        let mut members = Vec::new();
        loop {
            let doc = self.leading_doc();
            if self.eat_symbol("}") {
                break;
            }

            if self.current_token().is_symbol("...") {
                let start = self.bump();
                let target = self.expect_ident()?;
                let span = self.span_from(&start);
                self.eat_separator();
                members.push(Member::Spread(Spread { name: target.text, span }));
                continue;
            }

            let field_name = self.expect_name()?;
            let optional = self.eat_symbol("?");
            self.expect_symbol(":")?;
            let type_expr = self.parse_type_expr()?;
            let span = self.span_from(&field_name);
            self.eat_separator();

            members.push(Member::Field(FieldDecl {
                name: field_name.text,
                type_expr,
                optional,
                doc,
                span,
            }));
        }

        Ok(ObjectBody { members })
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr, UrpcError> {
        let start = self.current_token().clone();

        let mut expr = if start.is_symbol("{") {
            let body = self.parse_object_body()?;
            TypeExpr {
                kind: TypeExprKind::Object(body),
                span: self.span_from(&start),
            }
        } else if start.is_keyword("map") {
            self.bump();
            self.expect_symbol("<")?;
            let value = self.parse_type_expr()?;
            self.expect_symbol(">")?;
            TypeExpr {
                kind: TypeExprKind::Map(Box::new(value)),
                span: self.span_from(&start),
            }
        } else {
            let name = self.expect_kind(TokenKind::Ident, "type")?;
            TypeExpr {
                kind: TypeExprKind::Named(name.text),
                span: self.span_from(&start),
            }
        };

        while self.eat_symbol("[") {
            self.expect_symbol("]")?;
            expr = TypeExpr {
                kind: TypeExprKind::Array(Box::new(expr)),
                span: self.span_from(&start),
            };
        }

        Ok(expr)
    }

    fn parse_enum(&mut self, doc: String, deprecated: Option<Deprecation>) -> Result<EnumDecl, UrpcError> {
        let start = self.expect_keyword("enum")?;
        let name = self.expect_ident()?;
        self.expect_symbol("{")?;

        let mut members = Vec::new();
        loop {
            let doc = self.leading_doc();
            if self.eat_symbol("}") {
                break;
            }
            let member = self.expect_name()?;
            let value = if self.eat_symbol("=") {
                let tok = self.current_token().clone();
                match tok.kind {
                    TokenKind::Str => {
                        self.bump();
                        Some(EnumLiteral::Str(tok.string_value()))
                    }
                    TokenKind::Int => {
                        self.bump();
                        Some(EnumLiteral::Int(parse_int(&tok)?))
                    }
                    _ => return Err(self.unexpected_token("string or integer")),
                }
            } else {
                None
            };
            let span = self.span_from(&member);
            self.eat_separator();

            members.push(EnumMemberDecl {
                name: member.text,
                value,
                doc,
                span,
            });
        }

        Ok(EnumDecl {
            name: name.text,
            doc,
            deprecated,
            members,
            span: self.span_from(&start),
        })
    }

    fn parse_const(&mut self, doc: String, deprecated: Option<Deprecation>) -> Result<ConstDecl, UrpcError> {
        let start = self.expect_keyword("const")?;
        let name = self.expect_ident()?;
        let type_expr = if self.eat_symbol(":") {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        self.expect_symbol("=")?;

        let tok = self.current_token().clone();
        let value = match tok.kind {
            TokenKind::Str   => Literal::Str(tok.string_value()),
            TokenKind::Int   => Literal::Int(parse_int(&tok)?),
            TokenKind::Float => Literal::Float(tok.text.parse::<f64>().map_err(|_| {
                parse_error("float", &tok.describe(), tok.line, tok.column)
            })?),
            TokenKind::Bool  => Literal::Bool(tok.text == "true"),
            _ => return Err(self.unexpected_token("literal")),
        };
        self.bump();
        let span = self.span_from(&start);
        self.eat_separator();

        Ok(ConstDecl {
            name: name.text,
            doc,
            deprecated,
            type_expr,
            value,
            span,
        })
    }

    fn parse_pattern(&mut self, doc: String, deprecated: Option<Deprecation>) -> Result<PatternDecl, UrpcError> {
        let start = self.expect_keyword("pattern")?;
        let name = self.expect_ident()?;
        self.expect_symbol("=")?;
        let template = self.expect_kind(TokenKind::Str, "pattern string")?;
        let span = self.span_from(&start);
        self.eat_separator();

        Ok(PatternDecl {
            name: name.text,
            doc,
            deprecated,
            template: template.string_value(),
            span,
        })
    }

    fn parse_rpc(&mut self, doc: String, deprecated: Option<Deprecation>) -> Result<RpcDecl, UrpcError> {
        let start = self.expect_keyword("rpc")?;
        let name = self.expect_ident()?;
        self.expect_symbol("{")?;

        let mut procs = Vec::new();
        let mut streams = Vec::new();
        loop {
            let doc = self.leading_doc();
            if self.eat_symbol("}") {
                break;
            }
            let op_deprecated = self.parse_deprecation()?;
            let keyword = self.current_token().clone();
            let is_stream = if keyword.is_keyword("proc") {
                false
            } else if keyword.is_keyword("stream") {
                true
            } else {
                return Err(self.unexpected_token("\"proc\" or \"stream\""));
            };
            self.bump();

            let op_name = self.expect_name()?;
            self.expect_symbol("(")?;
            let input = self.parse_type_expr()?;
            self.expect_symbol(")")?;
            let output = self.parse_type_expr()?;
            let span = self.span_from(&keyword);
            self.eat_separator();

            let op = OperationDecl {
                name: op_name.text,
                doc,
                deprecated: op_deprecated,
                input,
                output,
                span,
            };
            if is_stream {
                streams.push(op);
            } else {
                procs.push(op);
            }
        }

        Ok(RpcDecl {
            name: name.text,
            doc,
            deprecated,
            procs,
            streams,
            span: self.span_from(&start),
        })
    }
}

fn parse_int(tok: &Token) -> Result<i64, UrpcError> {
    tok.text
        .parse::<i64>()
        .map_err(|_| parse_error("64-bit integer", &tok.describe(), tok.line, tok.column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize_schema;

    fn parse(text: &str) -> SchemaFile {
        parse_schema(&tokenize_schema(text).unwrap()).unwrap()
    }

    fn parse_err(text: &str) -> UrpcError {
        parse_schema(&tokenize_schema(text).unwrap()).unwrap_err()
    }

    #[test]
    fn test_parse_type() {
        let file = parse("type User {\n  id: string\n  email?: string;\n  tags: string[][], scores: map<float>\n  type: int\n}");
        let Decl::Type(user) = &file.decls[0] else { panic!("expected a type") };
        assert_eq!(user.name, "User");
        let fields: Vec<&FieldDecl> = user.body.fields().collect();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "tags", "scores", "type"]);
        assert!(fields[1].optional);
        assert!(!fields[0].optional);

        let TypeExprKind::Array(inner) = &fields[2].type_expr.kind else { panic!("expected array") };
        assert!(matches!(&inner.kind, TypeExprKind::Array(_)));
        let TypeExprKind::Map(value) = &fields[3].type_expr.kind else { panic!("expected map") };
        assert_eq!(value.as_named(), Some("float"));

        assert_eq!(user.span.start.line, 1);
        assert_eq!(user.span.end.line, 6);
        assert_eq!(fields[0].span.start.column, 3);
        assert!(user.deprecated.is_none());
    }

    #[test]
    fn test_parse_spreads_and_inline_objects() {
        let file = parse(
            "type Order {\n  ...Audit\n  id: string\n  location?: {\n    lat: float\n    ...Geo\n  }\n  lines: { sku: string, qty: int }[]\n}",
        );
        let Decl::Type(order) = &file.decls[0] else { panic!("expected a type") };
        assert!(matches!(&order.body.members[0], Member::Spread(s) if s.name == "Audit"));
        let spread: Vec<&Spread> = order.body.spreads().collect();
        assert_eq!((spread[0].span.start.line, spread[0].span.start.column), (2, 3));

        let fields: Vec<&FieldDecl> = order.body.fields().collect();
        assert_eq!(fields.len(), 3);
        assert!(fields[1].optional);
        let TypeExprKind::Object(location) = &fields[1].type_expr.kind else { panic!("expected an inline object") };
        assert_eq!(location.fields().count(), 1);
        assert_eq!(location.spreads().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["Geo"]);

        let TypeExprKind::Array(line) = &fields[2].type_expr.kind else { panic!("expected array") };
        assert!(matches!(line.kind, TypeExprKind::Object(_)));
        assert_eq!(fields[2].type_expr.to_string(), "{ sku: string, qty: int }[]");
    }

    #[test]
    fn test_parse_deprecated() {
        let file = parse(
            "\"\"\" Old limit. \"\"\"\ndeprecated(\"Use NEW_LIMIT instead\") const OLD_LIMIT = 100\n\
             deprecated\ntype Legacy { x: int }\n\
             rpc Svc {\n  \"\"\" Old call. \"\"\"\n  deprecated proc Old(Legacy) Legacy\n  proc New(Legacy) Legacy\n}",
        );
        let Decl::Const(limit) = &file.decls[0] else { panic!("expected a const") };
        assert_eq!(limit.doc, "Old limit.");
        assert_eq!(limit.deprecated, Some(Deprecation { message: "Use NEW_LIMIT instead".into() }));
        assert_eq!(file.decls[1].deprecated(), Some(&Deprecation::default()));

        let Decl::Rpc(svc) = &file.decls[2] else { panic!("expected an rpc") };
        assert!(svc.deprecated.is_none());
        assert_eq!(svc.procs[0].doc, "Old call.");
        assert!(svc.procs[0].deprecated.is_some());
        assert!(svc.procs[1].deprecated.is_none());

        match parse_err("deprecated(42) type A { x: int }") {
            UrpcError::ParseError { expected, .. } => assert_eq!(expected, "deprecation message string"),
            other => panic!("unexpected {:?}", other),
        }
        match parse_err("deprecated import \"a.urpc\"") {
            UrpcError::ParseError { expected, .. } => assert_eq!(expected, "declaration"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_imports_and_decls() {
        let file = parse(
            "import \"./common.urpc\"\nimport \"other.urpc\";\n\
             enum Color { Red, Green = \"green\" }\n\
             enum Level { Low = 1 High = 2 }\n\
             const MAX: int = 10\nconst NAME = \"svc\"\nconst RATIO = 0.5\nconst ON = true\n\
             pattern Topic = \"events.{id}\"\n\
             rpc Users { proc Get(In) Out stream Watch(In) Event }",
        );
        let imports: Vec<&str> = file.imports.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(imports, vec!["./common.urpc", "other.urpc"]);

        let kinds: Vec<&str> = file.decls.iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec!["enum", "enum", "const", "const", "const", "const", "pattern", "rpc"]);

        let Decl::Enum(color) = &file.decls[0] else { panic!() };
        assert_eq!(color.members[0].value, None);
        assert_eq!(color.members[1].value, Some(EnumLiteral::Str("green".into())));
        assert_eq!(color.kind(), urpc_schema::EnumKind::String);
        let Decl::Enum(level) = &file.decls[1] else { panic!() };
        assert_eq!(level.kind(), urpc_schema::EnumKind::Int);

        let Decl::Const(max) = &file.decls[2] else { panic!() };
        assert_eq!(max.type_expr.as_ref().and_then(|t| t.as_named()), Some("int"));
        assert_eq!(max.value, Literal::Int(10));
        let Decl::Const(ratio) = &file.decls[4] else { panic!() };
        assert_eq!(ratio.value, Literal::Float(0.5));

        let Decl::Pattern(topic) = &file.decls[6] else { panic!() };
        assert_eq!(topic.template, "events.{id}");

        let Decl::Rpc(users) = &file.decls[7] else { panic!() };
        assert_eq!(users.procs[0].name, "Get");
        assert_eq!(users.streams[0].name, "Watch");
        assert_eq!(users.streams[0].output.as_named(), Some("Event"));
    }

    #[test]
    fn test_docstrings_attach() {
        let file = parse(
            "\"\"\"\n  Standalone overview.\n\"\"\"\n\n\
             \"\"\" A user. \"\"\"\ntype User {\n  \"\"\" The id. \"\"\"\n  id: string\n\n  // Display name.\n  // Second line.\n  name: string // trailing\n  age: int\n}",
        );
        assert_eq!(file.docs.len(), 1);
        assert_eq!(file.docs[0].text, "Standalone overview.");
        let Decl::Type(user) = &file.decls[0] else { panic!() };
        assert_eq!(user.doc, "A user.");
        let fields: Vec<&FieldDecl> = user.body.fields().collect();
        assert_eq!(fields[0].doc, "The id.");
        assert_eq!(fields[1].doc, "Display name.\nSecond line.");
        assert_eq!(fields[2].doc, "");
    }

    #[test]
    fn test_detached_comment_is_not_a_doc() {
        let file = parse("// header comment\n\ntype A { x: int }\n// Doc for B\ntype B { y: int }");
        assert_eq!(file.decls[0].doc(), "");
        assert_eq!(file.decls[1].doc(), "Doc for B");
    }

    #[test]
    fn test_parse_errors() {
        match parse_err("type User { id string }") {
            UrpcError::ParseError { expected, found, location } => {
                assert_eq!(expected, "\":\"");
                assert_eq!(found, "\"string\"");
                assert_eq!((location.line, location.column), (1, 16));
            }
            other => panic!("unexpected {:?}", other),
        }

        match parse_err("type User {") {
            UrpcError::ParseError { found, .. } => assert_eq!(found, "end of file"),
            other => panic!("unexpected {:?}", other),
        }

        match parse_err("rpc Svc { call Get(A) B }") {
            UrpcError::ParseError { expected, .. } => assert_eq!(expected, "\"proc\" or \"stream\""),
            other => panic!("unexpected {:?}", other),
        }

        match parse_err("user { }") {
            UrpcError::ParseError { expected, .. } => assert_eq!(expected, "declaration"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
