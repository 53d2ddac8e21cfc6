use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;
use urpc_schema::{
    ConstValue, Constant, Enum, EnumKind, EnumMember, EnumValue, Field, Operation, OperationKind,
    Pattern, Primitive, Rpc, Schema, Type, TypeRef,
};

use crate::{
    builder::SourceFile,
    error::{Location, UrpcError},
    naming::check_names,
    pattern::compile_pattern,
    types::{
        ConstDecl, Decl, EnumDecl, EnumLiteral, FieldDecl, Literal, Member, ObjectBody, OperationDecl,
        PatternDecl, RpcDecl, Span, Spread, TypeDecl, TypeExpr, TypeExprKind,
    },
    utils::quote,
};

/// Merges the declarations of `files` (in order), validates them and lowers
/// them to a [`Schema`]. Every problem found is reported; one error comes
/// back as itself and several as `UrpcError::Diagnostics`.
pub fn verify_schema(files: &[SourceFile]) -> Result<Schema, UrpcError> {
    let mut errors = Vec::new();
    let verifier = Verifier::merge(files, &mut errors);

    let mut schema = Schema::default();
    let mut type_locations = HashMap::new();

    for &(file, decl) in &verifier.decls {
        check_names(file, decl, &mut errors);
        match decl {
            Decl::Type(t) => {
                type_locations.insert(t.name.clone(), location(file, t.span));
                schema.types.push(verifier.check_type(file, t, &mut errors));
            }
            Decl::Enum(e) => schema.enums.push(verifier.check_enum(file, e, &mut errors)),
            Decl::Const(c) => {
                if let Some(constant) = verifier.check_const(file, c, &mut errors) {
                    schema.constants.push(constant);
                }
            }
            Decl::Pattern(p) => {
                if let Some(pattern) = check_pattern(file, p, &mut errors) {
                    schema.patterns.push(pattern);
                }
            }
            Decl::Rpc(r) => {
                let (rpc, operations) = verifier.check_rpc(file, r, &mut errors);
                schema.rpcs.push(rpc);
                for op in operations {
                    match op.kind {
                        OperationKind::Proc   => schema.catalog.procedures.push(op),
                        OperationKind::Stream => schema.catalog.streams.push(op),
                    }
                }
            }
        }
    }

    verifier.check_spread_cycles(&mut errors);
    check_recursion(&mut schema.types, &type_locations, &mut errors);

    schema.docs = files
        .iter()
        .flat_map(|f| f.ast.docs.iter().map(|d| d.text.clone()))
        .collect();

    if let Some(err) = UrpcError::from_many(errors) {
        debug!(errors = err.diagnostics().len(), "schema verification failed");
        return Err(err);
    }

    debug!(
        types = schema.types.len(),
        enums = schema.enums.len(),
        procedures = schema.catalog.procedures.len(),
        streams = schema.catalog.streams.len(),
        "schema verified"
    );
    Ok(schema)
}

fn location(file: &Path, span: Span) -> Location {
    Location::new(file, span.start.line, span.start.column)
}

struct Verifier<'a> {
    /// Merged declarations in file order, first definition of each name.
    decls:   Vec<(&'a Path, &'a Decl)>,
    symbols: HashMap<&'a str, &'a Decl>,
    /// Types whose spreads are being expanded, innermost last.
    expanding: RefCell<Vec<&'a str>>,
}

impl<'a> Verifier<'a> {
    fn merge(files: &'a [SourceFile], errors: &mut Vec<UrpcError>) -> Self {
        let mut decls = Vec::new();
        let mut symbols = HashMap::new();
        let mut seen: HashMap<&str, Location> = HashMap::new();

        for file in files {
            for decl in &file.ast.decls {
                let here = location(&file.path, decl.span());
                if let Some(first) = seen.get(decl.name()) {
                    errors.push(UrpcError::DuplicateDeclaration {
                        name:   decl.name().to_string(),
                        kind:   decl.kind().to_string(),
                        first:  first.clone(),
                        second: here,
                    });
                    continue;
                }
                seen.insert(decl.name(), here);
                symbols.insert(decl.name(), decl);
                decls.push((file.path.as_path(), decl));
            }
        }

        Verifier { decls, symbols, expanding: RefCell::default() }
    }

    /// Lowers a type expression. `owner` names the enclosing field for
    /// diagnostics inside inline objects.
    fn resolve(&self, file: &Path, owner: &str, expr: &TypeExpr, errors: &mut Vec<UrpcError>) -> Option<TypeRef> {
        match &expr.kind {
            TypeExprKind::Named(name) => {
                if let Some(primitive) = Primitive::from_name(name) {
                    return Some(TypeRef::Primitive { primitive });
                }
                match self.symbols.get(name.as_str()) {
                    Some(Decl::Type(t)) => Some(TypeRef::Type { name: t.name.clone() }),
                    Some(Decl::Enum(e)) => Some(TypeRef::Enum { name: e.name.clone(), enum_kind: e.kind() }),
                    _ => {
                        errors.push(UrpcError::UnknownType {
                            name:     name.clone(),
                            location: location(file, expr.span),
                        });
                        None
                    }
                }
            }
            TypeExprKind::Array(item) => self
                .resolve(file, owner, item, errors)
                .map(|item| TypeRef::Array { item: Box::new(item) }),
            TypeExprKind::Map(value) => self
                .resolve(file, owner, value, errors)
                .map(|value| TypeRef::Map { value: Box::new(value) }),
            TypeExprKind::Object(body) => Some(TypeRef::Object {
                fields: self.lower_members(file, owner, body, errors),
            }),
        }
    }

    // Types

    fn check_type(&self, file: &Path, decl: &'a TypeDecl, errors: &mut Vec<UrpcError>) -> Type {
        self.expanding.borrow_mut().push(decl.name.as_str());
        let fields = self.lower_members(file, &decl.name, &decl.body, errors);
        self.expanding.borrow_mut().pop();

        Type {
            name:       decl.name.clone(),
            doc:        decl.doc.clone(),
            deprecated: decl.deprecated.clone(),
            fields,
        }
    }

    /// Lowers the fields of a type or inline object, expanding each
    /// `...Name` spread in place.
    fn lower_members(&self, file: &Path, owner: &str, body: &ObjectBody, errors: &mut Vec<UrpcError>) -> Vec<Field> {
        let mut taken = HashSet::new();
        let mut skip = HashSet::new();
        for (i, field) in body.fields().enumerate() {
            if !taken.insert(field.name.as_str()) {
                errors.push(UrpcError::DuplicateField {
                    type_name: owner.to_string(),
                    field:     field.name.clone(),
                    location:  location(file, field.span),
                });
                skip.insert(i);
            }
        }

        let mut fields = Vec::new();
        let mut direct = 0;
        for member in &body.members {
            match member {
                Member::Field(field) => {
                    direct += 1;
                    if skip.contains(&(direct - 1)) {
                        continue;
                    }
                    if let Some(lowered) = self.lower_field(file, owner, field, errors) {
                        fields.push(lowered);
                    }
                }
                Member::Spread(spread) => {
                    let Some(Decl::Type(target)) = self.symbols.get(spread.name.as_str()).copied() else {
                        errors.push(UrpcError::SpreadTypeNotFound {
                            spread:   spread.name.clone(),
                            location: location(file, spread.span),
                        });
                        continue;
                    };
                    // Cycles are reported by check_spread_cycles.
                    if self.expanding.borrow().contains(&target.name.as_str()) {
                        continue;
                    }

                    let mut visiting = self.expanding.borrow().clone();
                    visiting.push(target.name.as_str());
                    let flattened = self.flatten(target, &mut visiting);

                    self.expanding.borrow_mut().push(target.name.as_str());
                    for field in flattened {
                        if !taken.insert(field.name.as_str()) {
                            errors.push(UrpcError::SpreadFieldConflict {
                                owner:    owner.to_string(),
                                spread:   spread.name.clone(),
                                field:    field.name.clone(),
                                location: location(file, spread.span),
                            });
                            continue;
                        }
                        // Problems inside the spread type are reported where it is declared.
                        if let Some(lowered) = self.lower_field(file, &target.name, field, &mut Vec::new()) {
                            fields.push(lowered);
                        }
                    }
                    self.expanding.borrow_mut().pop();
                }
            }
        }
        fields
    }

    fn lower_field(&self, file: &Path, owner: &str, field: &FieldDecl, errors: &mut Vec<UrpcError>) -> Option<Field> {
        let scope = format!("{}.{}", owner, field.name);
        let type_ref = self.resolve(file, &scope, &field.type_expr, errors)?;
        Some(Field {
            name:     field.name.clone(),
            doc:      field.doc.clone(),
            optional: field.optional,
            indirect: false,
            type_ref,
        })
    }

    /// Every field `decl` ends up with, spreads expanded recursively. Spreads
    /// already on `visiting` are skipped.
    fn flatten(&self, decl: &'a TypeDecl, visiting: &mut Vec<&'a str>) -> Vec<&'a FieldDecl> {
        let mut fields = Vec::new();
        for member in &decl.body.members {
            match member {
                Member::Field(field) => fields.push(field),
                Member::Spread(spread) => {
                    if visiting.contains(&spread.name.as_str()) {
                        continue;
                    }
                    if let Some(Decl::Type(target)) = self.symbols.get(spread.name.as_str()).copied() {
                        visiting.push(target.name.as_str());
                        fields.extend(self.flatten(target, visiting));
                        visiting.pop();
                    }
                }
            }
        }
        fields
    }

    /// Reports each cycle of types spreading into one another once.
    fn check_spread_cycles(&self, errors: &mut Vec<UrpcError>) {
        let types: Vec<(&Path, &TypeDecl)> = self
            .decls
            .iter()
            .filter_map(|(file, decl)| match decl {
                Decl::Type(t) => Some((*file, t)),
                _ => None,
            })
            .collect();
        let index: HashMap<&str, usize> = types
            .iter()
            .enumerate()
            .map(|(i, (_, t))| (t.name.as_str(), i))
            .collect();

        let graph: Vec<Vec<Edge>> = types
            .iter()
            .enumerate()
            .map(|(from, (_, t))| {
                let mut spreads = Vec::new();
                collect_spreads(&t.body, &mut spreads);
                spreads
                    .into_iter()
                    .enumerate()
                    .filter_map(|(field, spread)| {
                        let to = *index.get(spread.name.as_str())?;
                        Some(Edge { from, field, to, container: false, optional: false })
                    })
                    .collect()
            })
            .collect();

        for_each_cycle(&graph, |cycle| {
            if let (Some(first), Some(last)) = (cycle.first(), cycle.last()) {
                let mut names: Vec<String> = cycle.iter().map(|e| types[e.from].1.name.clone()).collect();
                names.push(types[last.to].1.name.clone());
                let (file, decl) = types[first.from];
                errors.push(UrpcError::SpreadCycle {
                    cycle:    names,
                    location: location(file, decl.span),
                });
            }
        });
    }

    // Enums

    fn check_enum(&self, file: &Path, decl: &EnumDecl, errors: &mut Vec<UrpcError>) -> Enum {
        let kind = decl.kind();
        let mut names = HashSet::new();
        let mut values: HashMap<EnumValue, &str> = HashMap::new();
        let mut members = Vec::new();

        for member in &decl.members {
            let here = location(file, member.span);
            if !names.insert(member.name.as_str()) {
                errors.push(UrpcError::DuplicateEnumMember {
                    enum_name: decl.name.clone(),
                    member:    member.name.clone(),
                    location:  here,
                });
                continue;
            }

            let value = match (kind, &member.value) {
                (EnumKind::String, None)                      => EnumValue::String(member.name.clone()),
                (EnumKind::String, Some(EnumLiteral::Str(s))) => EnumValue::String(s.clone()),
                (EnumKind::Int, Some(EnumLiteral::Int(i)))    => EnumValue::Int(*i),
                (EnumKind::Int, None) => {
                    errors.push(UrpcError::InvalidEnum {
                        name:     decl.name.clone(),
                        msg:      format!("int enum requires explicit values for all members, but {} has none", quote(&member.name)),
                        location: here,
                    });
                    continue;
                }
                (_, Some(_)) => {
                    errors.push(UrpcError::InvalidEnum {
                        name:     decl.name.clone(),
                        msg:      format!("member {} mixes string and integer values", quote(&member.name)),
                        location: here,
                    });
                    continue;
                }
            };

            if let Some(other) = values.get(&value) {
                errors.push(UrpcError::DuplicateEnumValue {
                    enum_name: decl.name.clone(),
                    member:    member.name.clone(),
                    other:     other.to_string(),
                    value:     display_enum_value(&value),
                    location:  here,
                });
                continue;
            }
            values.insert(value.clone(), member.name.as_str());

            members.push(EnumMember {
                name: member.name.clone(),
                doc:  member.doc.clone(),
                value,
            });
        }

        Enum {
            name:       decl.name.clone(),
            doc:        decl.doc.clone(),
            deprecated: decl.deprecated.clone(),
            kind,
            members,
        }
    }

    // Constants

    fn check_const(&self, file: &Path, decl: &ConstDecl, errors: &mut Vec<UrpcError>) -> Option<Constant> {
        let type_ref = match &decl.type_expr {
            Some(expr) => self.resolve(file, &decl.name, expr, errors)?,
            None => TypeRef::Primitive { primitive: literal_primitive(&decl.value) },
        };

        let invalid = |msg: String| UrpcError::InvalidConstant {
            name:     decl.name.clone(),
            msg,
            location: location(file, decl.span),
        };

        let value = match (&type_ref, &decl.value) {
            (TypeRef::Primitive { primitive }, literal) => match (primitive, literal) {
                (Primitive::String, Literal::Str(s))   => ConstValue::String(s.clone()),
                (Primitive::Datetime, Literal::Str(s)) => ConstValue::String(s.clone()),
                (Primitive::Int, Literal::Int(i))      => ConstValue::Int(*i),
                (Primitive::Float, Literal::Float(f))  => ConstValue::Float(*f),
                (Primitive::Float, Literal::Int(i))    => ConstValue::Float(*i as f64),
                (Primitive::Bool, Literal::Bool(b))    => ConstValue::Bool(*b),
                (primitive, literal) => {
                    errors.push(invalid(format!(
                        "expected a {} literal but found a {} literal",
                        primitive.as_str(),
                        literal.describe()
                    )));
                    return None;
                }
            },
            (TypeRef::Enum { name, .. }, literal) => match self.enum_member_value(name, literal) {
                Some(value) => value,
                None => {
                    errors.push(invalid(format!("value is not a member of enum {}", quote(name))));
                    return None;
                }
            },
            _ => {
                let shown = decl.type_expr.as_ref().map(|e| e.to_string()).unwrap_or_default();
                errors.push(invalid(format!(
                    "constants must have a primitive or enum type, found {}",
                    quote(&shown)
                )));
                return None;
            }
        };

        Some(Constant {
            name:       decl.name.clone(),
            doc:        decl.doc.clone(),
            deprecated: decl.deprecated.clone(),
            type_ref,
            value,
        })
    }

    fn enum_member_value(&self, enum_name: &str, literal: &Literal) -> Option<ConstValue> {
        let Some(Decl::Enum(decl)) = self.symbols.get(enum_name) else {
            return None;
        };
        decl.members.iter().find_map(|member| match (&member.value, literal) {
            (Some(EnumLiteral::Int(v)), Literal::Int(i)) if v == i => Some(ConstValue::Int(*i)),
            (Some(EnumLiteral::Str(v)), Literal::Str(s)) if v == s => Some(ConstValue::String(s.clone())),
            (None, Literal::Str(s)) if member.name == *s => Some(ConstValue::String(s.clone())),
            _ => None,
        })
    }

    // RPC services

    fn check_rpc(&self, file: &Path, decl: &RpcDecl, errors: &mut Vec<UrpcError>) -> (Rpc, Vec<Operation>) {
        let mut names = HashSet::new();
        let mut operations = Vec::new();

        let all = decl
            .procs
            .iter()
            .map(|op| (op, OperationKind::Proc))
            .chain(decl.streams.iter().map(|op| (op, OperationKind::Stream)));

        for (op, kind) in all {
            if !names.insert(op.name.as_str()) {
                errors.push(UrpcError::DuplicateOperation {
                    rpc:       decl.name.clone(),
                    operation: op.name.clone(),
                    location:  location(file, op.span),
                });
                continue;
            }

            let input = self.operation_type(file, decl, op, &op.input, "input", errors);
            let output = self.operation_type(file, decl, op, &op.output, "output", errors);
            if let (Some(input), Some(output)) = (input, output) {
                let mut lowered = Operation::new(&decl.name, &op.name, kind, &input, &output);
                lowered.doc = op.doc.clone();
                lowered.deprecated = op.deprecated.clone();
                operations.push(lowered);
            }
        }

        let rpc = Rpc {
            name:       decl.name.clone(),
            doc:        decl.doc.clone(),
            deprecated: decl.deprecated.clone(),
        };
        (rpc, operations)
    }

    fn operation_type(
        &self,
        file: &Path,
        rpc: &RpcDecl,
        op: &OperationDecl,
        expr: &TypeExpr,
        role: &str,
        errors: &mut Vec<UrpcError>,
    ) -> Option<String> {
        let invalid = |found: String| UrpcError::InvalidOperationType {
            rpc:       rpc.name.clone(),
            operation: op.name.clone(),
            role:      role.to_string(),
            found,
            location:  location(file, expr.span),
        };

        let Some(name) = expr.as_named() else {
            errors.push(invalid(expr.to_string()));
            return None;
        };

        match self.symbols.get(name) {
            Some(Decl::Type(_)) => Some(name.to_string()),
            Some(other) => {
                errors.push(invalid(format!("{} {}", other.kind(), name)));
                None
            }
            None if Primitive::from_name(name).is_some() => {
                errors.push(invalid(name.to_string()));
                None
            }
            None => {
                errors.push(UrpcError::UnknownType {
                    name:     name.to_string(),
                    location: location(file, expr.span),
                });
                None
            }
        }
    }
}

/// Spreads of `body` and of every inline object nested in its fields.
fn collect_spreads<'b>(body: &'b ObjectBody, out: &mut Vec<&'b Spread>) {
    for member in &body.members {
        match member {
            Member::Spread(spread) => out.push(spread),
            Member::Field(field) => {
                let mut expr = &field.type_expr;
                loop {
                    match &expr.kind {
                        TypeExprKind::Array(inner) | TypeExprKind::Map(inner) => expr = inner,
                        TypeExprKind::Object(inline) => {
                            collect_spreads(inline, out);
                            break;
                        }
                        TypeExprKind::Named(_) => break,
                    }
                }
            }
        }
    }
}

fn literal_primitive(literal: &Literal) -> Primitive {
    match literal {
        Literal::Str(_)   => Primitive::String,
        Literal::Int(_)   => Primitive::Int,
        Literal::Float(_) => Primitive::Float,
        Literal::Bool(_)  => Primitive::Bool,
    }
}

fn display_enum_value(value: &EnumValue) -> String {
    match value {
        EnumValue::Int(i)    => i.to_string(),
        EnumValue::String(s) => quote(s),
    }
}

// Patterns

fn check_pattern(file: &Path, decl: &PatternDecl, errors: &mut Vec<UrpcError>) -> Option<Pattern> {
    match compile_pattern(&decl.template) {
        Ok(compiled) => {
            let mut pattern = compiled.into_pattern(&decl.name, &decl.template, decl.doc.clone());
            pattern.deprecated = decl.deprecated.clone();
            Some(pattern)
        }
        Err(msg) => {
            errors.push(UrpcError::InvalidPattern {
                name:     decl.name.clone(),
                msg,
                location: location(file, decl.span),
            });
            None
        }
    }
}

// Recursive types

#[derive(Debug, Clone, Copy)]
struct Edge {
    from:      usize,
    field:     usize,
    to:        usize,
    container: bool,
    optional:  bool,
}

/// Collects the types a field reaches, looking through arrays, maps and
/// inline objects. A reference is optional when any field on the way is.
fn field_targets<'t>(type_ref: &'t TypeRef, container: bool, optional: bool, out: &mut Vec<(&'t str, bool, bool)>) {
    match type_ref {
        TypeRef::Type { name }   => out.push((name, container, optional)),
        TypeRef::Array { item }  => field_targets(item, true, optional, out),
        TypeRef::Map { value }   => field_targets(value, true, optional, out),
        TypeRef::Object { fields } => {
            for f in fields {
                field_targets(&f.type_ref, container, optional || f.optional, out);
            }
        }
        _ => {}
    }
}

/// Marks the field that closes each reference cycle as `indirect` and
/// reports cycles made only of required fields: such a value could never
/// be constructed. Arrays and maps do not break a cycle.
fn check_recursion(types: &mut [Type], locations: &HashMap<String, Location>, errors: &mut Vec<UrpcError>) {
    let index: HashMap<&str, usize> = types
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let graph: Vec<Vec<Edge>> = types
        .iter()
        .enumerate()
        .map(|(from, t)| {
            let mut edges = Vec::new();
            for (field, f) in t.fields.iter().enumerate() {
                let mut targets = Vec::new();
                field_targets(&f.type_ref, false, f.optional, &mut targets);
                for (target, container, optional) in targets {
                    if let Some(&to) = index.get(target) {
                        edges.push(Edge { from, field, to, container, optional });
                    }
                }
            }
            edges
        })
        .collect();

    let mut indirect = Vec::new();
    for_each_cycle(&graph, |cycle| {
        if let Some(closing) = cycle.last() {
            if !closing.container {
                indirect.push((closing.from, closing.field));
            }
        }
    });

    let required: Vec<Vec<Edge>> = graph
        .iter()
        .map(|edges| edges.iter().copied().filter(|e| !e.optional).collect())
        .collect();

    let mut cycles = Vec::new();
    for_each_cycle(&required, |cycle| {
        let mut names: Vec<String> = cycle
            .iter()
            .map(|e| format!("{}.{}", types[e.from].name, types[e.from].fields[e.field].name))
            .collect();
        if let (Some(first), Some(last)) = (cycle.first(), cycle.last()) {
            names.push(types[last.to].name.clone());
            cycles.push((first.from, names));
        }
    });

    for (from, field) in indirect {
        types[from].fields[field].indirect = true;
    }
    for (from, cycle) in cycles {
        let location = locations
            .get(&types[from].name)
            .cloned()
            .unwrap_or_else(|| Location::at(1, 1));
        errors.push(UrpcError::RecursiveType { cycle, location });
    }
}

/// Depth-first search over `graph` in node order, calling `on_cycle` with
/// the edge path of every cycle closed by a back-edge.
fn for_each_cycle(graph: &[Vec<Edge>], mut on_cycle: impl FnMut(&[Edge])) {
    #[derive(Clone, Copy, PartialEq)]
    enum Color { White, Gray, Black }

    fn visit(
        node: usize,
        graph: &[Vec<Edge>],
        colors: &mut [Color],
        stack: &mut Vec<usize>,
        path: &mut Vec<Edge>,
        on_cycle: &mut dyn FnMut(&[Edge]),
    ) {
        colors[node] = Color::Gray;
        stack.push(node);
        for edge in &graph[node] {
            path.push(*edge);
            match colors[edge.to] {
                Color::White => visit(edge.to, graph, colors, stack, path, on_cycle),
                Color::Gray => {
                    if let Some(start) = stack.iter().position(|n| *n == edge.to) {
                        on_cycle(&path[start..]);
                    }
                }
                Color::Black => {}
            }
            path.pop();
        }
        stack.pop();
        colors[node] = Color::Black;
    }

    let mut colors = vec![Color::White; graph.len()];
    let mut stack = Vec::new();
    let mut path = Vec::new();
    for node in 0..graph.len() {
        if colors[node] == Color::White {
            visit(node, graph, &mut colors, &mut stack, &mut path, &mut on_cycle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;
    use crate::tokenizer::tokenize_schema;
    use urpc_schema::Deprecation;
    use std::path::PathBuf;

    fn source(path: &str, text: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from(path),
            ast:  parse_schema(&tokenize_schema(text).unwrap()).unwrap(),
        }
    }

    fn verify(text: &str) -> Result<Schema, UrpcError> {
        verify_schema(&[source("/s/main.urpc", text)])
    }

    fn errors(text: &str) -> Vec<String> {
        let err = verify(text).unwrap_err();
        err.diagnostics().iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_lowering() {
        let schema = verify(
            "enum Role { Admin, Guest = \"guest\" }\n\
             type User { id: string\n role: Role\n tags?: string[]\n meta: map<int> }\n\
             const MAX = 3\nconst DEFAULT_ROLE: Role = \"Admin\"\n\
             pattern Topic = \"users.{id}\"\n\
             rpc Users { proc Get(User) User\n stream Watch(User) User }",
        )
        .unwrap();

        let role = schema.get_enum("Role").unwrap();
        assert_eq!(role.members[0].value, EnumValue::String("Admin".into()));
        assert_eq!(role.members[1].value, EnumValue::String("guest".into()));

        let user = schema.get_type("User").unwrap();
        assert_eq!(
            user.get_field("role").unwrap().type_ref,
            TypeRef::Enum { name: "Role".into(), enum_kind: EnumKind::String }
        );
        assert!(user.get_field("tags").unwrap().optional);
        assert!(matches!(user.get_field("meta").unwrap().type_ref, TypeRef::Map { .. }));

        assert_eq!(schema.get_constant("MAX").unwrap().value, ConstValue::Int(3));
        assert_eq!(
            schema.get_constant("DEFAULT_ROLE").unwrap().value,
            ConstValue::String("Admin".into())
        );
        assert_eq!(schema.get_pattern("Topic").unwrap().placeholders, vec!["id"]);
        assert_eq!(schema.catalog.paths(), vec!["/Users/Get", "/Users/Watch"]);
        assert_eq!(schema.catalog.streams[0].kind, OperationKind::Stream);
    }

    #[test]
    fn test_duplicate_declaration_across_files() {
        let files = [
            source("/s/main.urpc", "type User { id: string }"),
            source("/s/other.urpc", "\n\nenum User { A }"),
        ];
        match verify_schema(&files) {
            Err(UrpcError::DuplicateDeclaration { name, kind, first, second }) => {
                assert_eq!(name, "User");
                assert_eq!(kind, "enum");
                assert_eq!(first.to_string(), "/s/main.urpc:1:1");
                assert_eq!(second.to_string(), "/s/other.urpc:3:1");
            }
            other => panic!("expected a duplicate declaration but got {:?}", other),
        }
    }

    #[test]
    fn test_rpc_names_share_the_namespace() {
        let errs = errors("type Users { id: int }\nrpc Users { }");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("rpc \"Users\" is already declared"), "{}", errs[0]);
    }

    #[test]
    fn test_errors_are_collected_in_order() {
        let errs = errors(
            "type A { x: int\n x: string\n y: Missing }\n\
             enum E { A = 1\n B = 1\n A = 2 }\n\
             pattern P = \"a.{b\"",
        );
        assert_eq!(errs.len(), 5, "{:#?}", errs);
        assert!(errs[0].contains("field \"x\" is declared twice"));
        assert!(errs[1].contains("unknown type \"Missing\""));
        assert!(errs[2].contains("reuses value 1 of \"A\""));
        assert!(errs[3].contains("enum member \"A\" is declared twice"));
        assert!(errs[4].contains("invalid pattern \"P\""));
    }

    #[test]
    fn test_enum_rules() {
        let errs = errors("enum Level { Low = 1\n High }");
        assert!(errs[0].contains("requires explicit values"), "{:?}", errs);

        let errs = errors("enum Mixed { A = \"a\"\n B = 2 }");
        assert!(errs[0].contains("mixes string and integer values"), "{:?}", errs);

        let errs = errors("enum Dup { A\n B = \"A\" }");
        assert!(errs[0].contains("reuses value \"A\""), "{:?}", errs);
    }

    #[test]
    fn test_constant_rules() {
        let errs = errors("const A: int = \"x\"");
        assert!(errs[0].contains("expected a int literal but found a string literal"), "{:?}", errs);

        let errs = errors("enum E { A }\nconst B: E = \"Z\"");
        assert!(errs[0].contains("not a member of enum \"E\""), "{:?}", errs);

        let errs = errors("type T { x: int }\nconst C: T = 1");
        assert!(errs[0].contains("primitive or enum type"), "{:?}", errs);

        let schema = verify("const F: float = 2").unwrap();
        assert_eq!(schema.constants[0].value, ConstValue::Float(2.0));
    }

    #[test]
    fn test_operation_rules() {
        let errs = errors(
            "enum E { A }\ntype In { x: int }\n\
             rpc S { proc A(In) In\n proc A(In) In\n proc B(E) In\n proc C(In[]) In\n proc D(string) Nope }",
        );
        assert_eq!(errs.len(), 5, "{:#?}", errs);
        assert!(errs[0].contains("operation \"A\" is declared twice in rpc \"S\""));
        assert!(errs[1].contains("S.B must use a type declaration for its input, found \"enum E\""));
        assert!(errs[2].contains("found \"In[]\""));
        assert!(errs[3].contains("found \"string\""));
        assert!(errs[4].contains("unknown type \"Nope\""));
    }

    #[test]
    fn test_recursive_types() {
        let schema = verify("type Node { value: int\n next?: Node\n children?: Node[] }").unwrap();
        let node = schema.get_type("Node").unwrap();
        assert!(node.get_field("next").unwrap().indirect);
        assert!(!node.get_field("children").unwrap().indirect);

        let schema = verify("type A { b: B }\ntype B { a?: A }").unwrap();
        assert!(!schema.get_type("A").unwrap().get_field("b").unwrap().indirect);
        assert!(schema.get_type("B").unwrap().get_field("a").unwrap().indirect);

        match verify("type A { b: B }\ntype B { a: A }") {
            Err(UrpcError::RecursiveType { cycle, location }) => {
                assert_eq!(cycle, vec!["A.b", "B.a", "A"]);
                assert_eq!(location.line, 1);
            }
            other => panic!("expected a recursive type error but got {:?}", other),
        }
    }

    #[test]
    fn test_collections_do_not_break_cycles() {
        let errs = errors("type Tree { children: Tree[] }");
        assert_eq!(errs.len(), 1, "{:#?}", errs);
        assert!(errs[0].contains("recursive type without an optional field: Tree.children -> Tree"), "{}", errs[0]);

        let errs = errors("type Index { entries: map<Index> }");
        assert!(errs[0].contains("Index.entries -> Index"), "{:?}", errs);

        let errs = errors("type A { meta: { parent: A } }");
        assert!(errs[0].contains("A.meta -> A"), "{:?}", errs);

        let schema = verify("type A { meta: { parent?: A } }").unwrap();
        assert!(schema.get_type("A").unwrap().get_field("meta").unwrap().indirect);
    }

    #[test]
    fn test_required_cycle_behind_optional_path() {
        let errs = errors("type A { c?: C\n b: B }\ntype B { a: A }\ntype C { b: B }");
        assert_eq!(errs.len(), 1, "{:#?}", errs);
        assert!(errs[0].contains("A.b -> B.a -> A"), "{}", errs[0]);
    }

    #[test]
    fn test_spreads() {
        let schema = verify(
            "type Audit { createdAt: datetime\n updatedAt?: datetime }\n\
             type Base { id: string\n ...Audit }\n\
             type User { name: string\n ...Base\n email?: string }",
        )
        .unwrap();
        let user = schema.get_type("User").unwrap();
        let names: Vec<&str> = user.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "id", "createdAt", "updatedAt", "email"]);
        assert!(user.get_field("updatedAt").unwrap().optional);
    }

    #[test]
    fn test_spread_errors() {
        let errs = errors("type A { ...Missing }\nenum E { X }\ntype B { ...E }");
        assert_eq!(errs.len(), 2, "{:#?}", errs);
        assert!(errs[0].contains("1:10: spread references undefined type \"Missing\""), "{}", errs[0]);
        assert!(errs[1].contains("spread references undefined type \"E\""), "{}", errs[1]);

        let errs = errors("type Base { id: string }\ntype User { id: int\n ...Base }");
        assert_eq!(errs.len(), 1, "{:#?}", errs);
        assert!(
            errs[0].contains("field \"id\" from spread \"Base\" conflicts with an existing field in \"User\""),
            "{}",
            errs[0]
        );

        let errs = errors("type A { x: int }\ntype B { x: string }\ntype C { ...A\n ...B }");
        assert!(errs[0].contains("field \"x\" from spread \"B\""), "{:?}", errs);

        match verify("type A { a: int\n ...B }\ntype B { b: int\n ...A }") {
            Err(UrpcError::SpreadCycle { cycle, location }) => {
                assert_eq!(cycle, vec!["A", "B", "A"]);
                assert_eq!(location.line, 1);
            }
            other => panic!("expected a spread cycle but got {:?}", other),
        }

        let errs = errors("type A { x: int\n inner: { ...A } }");
        assert!(errs.iter().any(|e| e.contains("circular spread dependency detected: A -> A")), "{:?}", errs);
    }

    #[test]
    fn test_inline_objects() {
        let schema = verify(
            "type Point { x: float\n y: float }\n\
             type Order { id: string\n lines: { sku: string\n qty: int\n ...Point }[]\n meta?: { note: string } }",
        )
        .unwrap();
        let order = schema.get_type("Order").unwrap();
        let TypeRef::Array { item } = &order.get_field("lines").unwrap().type_ref else {
            panic!("lines should be an array");
        };
        let TypeRef::Object { fields } = item.as_ref() else {
            panic!("lines should hold inline objects");
        };
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["sku", "qty", "x", "y"]);
        assert!(matches!(order.get_field("meta").unwrap().type_ref, TypeRef::Object { .. }));

        let errs = errors("type Order { meta: { note: string\n note: int\n kind: Missing } }");
        assert_eq!(errs.len(), 2, "{:#?}", errs);
        assert!(errs[0].contains("field \"note\" is declared twice in type \"Order.meta\""), "{}", errs[0]);
        assert!(errs[1].contains("unknown type \"Missing\""), "{}", errs[1]);
    }

    #[test]
    fn test_deprecation_is_lowered() {
        let schema = verify(
            "deprecated(\"use V2\")\ntype Old { x: int }\n\
             deprecated\nenum Color { Red }\n\
             deprecated\nconst LIMIT = 1\n\
             deprecated(\"gone\")\npattern Topic = \"a.{b}\"\n\
             deprecated\nrpc Legacy { deprecated(\"use Get\") proc Fetch(Old) Old\n proc Get(Old) Old }",
        )
        .unwrap();
        assert_eq!(schema.get_type("Old").unwrap().deprecated, Some(Deprecation::new("use V2")));
        assert_eq!(schema.get_enum("Color").unwrap().deprecated, Some(Deprecation::default()));
        assert_eq!(schema.get_constant("LIMIT").unwrap().deprecated, Some(Deprecation::default()));
        assert_eq!(schema.get_pattern("Topic").unwrap().deprecated, Some(Deprecation::new("gone")));
        assert!(schema.rpcs[0].deprecated.is_some());
        assert_eq!(schema.catalog.procedures[0].deprecated, Some(Deprecation::new("use Get")));
        assert_eq!(schema.catalog.procedures[1].deprecated, None);
    }

    #[test]
    fn test_naming_conventions() {
        let err = verify(
            "type user_info { Name: string\n meta: { Inner_x: int } }\n\
             enum color { red }\n\
             const maxSize = 1\n\
             pattern topic = \"a\"\n\
             rpc users { proc get_user(user_info) user_info\n stream watch(user_info) user_info }",
        )
        .unwrap_err();
        let all = err.diagnostics();
        let found: Vec<(Option<&str>, String)> = all.iter().map(|e| (e.code(), e.to_string())).collect();
        let expect = [
            ("E101", "type name \"user_info\" must be in PascalCase"),
            ("E102", "field \"Name\" in type \"user_info\" must be in camelCase"),
            ("E102", "field \"Inner_x\" in inline object \"meta\" must be in camelCase"),
            ("E101", "enum name \"color\" must be in PascalCase"),
            ("E104", "enum member \"red\" in enum \"color\" must be in PascalCase"),
            ("E103", "constant name \"maxSize\" must be in UPPER_SNAKE_CASE"),
            ("E101", "pattern name \"topic\" must be in PascalCase"),
            ("E101", "rpc name \"users\" must be in PascalCase"),
            ("E101", "procedure name \"get_user\" in rpc \"users\" must be in PascalCase"),
            ("E101", "stream name \"watch\" in rpc \"users\" must be in PascalCase"),
        ];
        assert_eq!(found.len(), expect.len(), "{:#?}", found);
        for ((code, msg), (want_code, want_msg)) in found.iter().zip(expect) {
            assert_eq!(*code, Some(want_code), "{}", msg);
            assert!(msg.contains(want_msg), "{} should contain {}", msg, want_msg);
        }
    }

    #[test]
    fn test_standalone_docs() {
        let schema = verify("\"\"\" Overview \"\"\"\n\ntype A { x: int }").unwrap();
        assert_eq!(schema.docs, vec!["Overview"]);
    }
}
