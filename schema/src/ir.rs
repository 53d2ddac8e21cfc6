use serde::{Deserialize, Serialize};

use crate::pattern::Pattern;

/// Root of the IR. Collections keep the merged declaration order of the
/// source files (entry file first, then imports depth-first).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub types:     Vec<Type>,
    pub enums:     Vec<Enum>,
    pub constants: Vec<Constant>,
    pub patterns:  Vec<Pattern>,
    pub rpcs:      Vec<Rpc>,
    pub catalog:   Catalog,
    /// Standalone docstrings that are not attached to any declaration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docs:      Vec<String>,
}

impl Schema {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn get_type(&self, name: &str) -> Option<&Type> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn get_enum(&self, name: &str) -> Option<&Enum> {
        self.enums.iter().find(|e| e.name == name)
    }

    pub fn get_constant(&self, name: &str) -> Option<&Constant> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn get_pattern(&self, name: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.name == name)
    }
}

/// Set on declarations marked `deprecated` or `deprecated("message")`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deprecation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Deprecation {
    pub fn new(message: impl Into<String>) -> Self {
        Deprecation { message: message.into() }
    }
}

// ── Types ───────────────────────────────────────────────────────────

/// A declared type. Spreads are already expanded: `fields` holds the
/// type's own fields and the fields it spreads in, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Type {
    pub name:       String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc:        String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecation>,
    pub fields:     Vec<Field>,
}

impl Type {
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name:     String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc:      String,
    #[serde(default)]
    pub optional: bool,
    /// Set on the edge that closes a reference cycle between types. Targets
    /// must store such a field behind a pointer, box or nullable reference.
    #[serde(default)]
    pub indirect: bool,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Primitive {
    String,
    Int,
    Float,
    Bool,
    Datetime,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string"   => Some(Primitive::String),
            "int"      => Some(Primitive::Int),
            "float"    => Some(Primitive::Float),
            "bool"     => Some(Primitive::Bool),
            "datetime" => Some(Primitive::Datetime),
            _          => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::String   => "string",
            Primitive::Int      => "int",
            Primitive::Float    => "float",
            Primitive::Bool     => "bool",
            Primitive::Datetime => "datetime",
        }
    }
}

/// A fully resolved type reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TypeRef {
    Primitive {
        primitive: Primitive,
    },
    Type {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    Enum {
        name:      String,
        enum_kind: EnumKind,
    },
    Array {
        item: Box<TypeRef>,
    },
    Map {
        value: Box<TypeRef>,
    },
    /// An inline `{ ... }` object with its spreads expanded.
    Object {
        fields: Vec<Field>,
    },
}

impl TypeRef {
    /// Name of the user declaration this reference points at, looking through
    /// arrays and maps.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            TypeRef::Primitive { .. }          => None,
            TypeRef::Type { name }             => Some(name),
            TypeRef::Enum { name, .. }         => Some(name),
            TypeRef::Array { item }            => item.declared_name(),
            TypeRef::Map { value }             => value.declared_name(),
            TypeRef::Object { .. }             => None,
        }
    }
}

// ── Enums ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnumKind {
    String,
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enum {
    pub name:       String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc:        String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecation>,
    pub kind:       EnumKind,
    pub members:    Vec<EnumMember>,
}

impl Enum {
    pub fn get_member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumMember {
    pub name:  String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc:   String,
    /// The value that goes on the wire.
    pub value: EnumValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumValue {
    Int(i64),
    String(String),
}

// ── Constants ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constant {
    pub name:       String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc:        String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecation>,
    #[serde(rename = "type")]
    pub type_ref:   TypeRef,
    pub value:      ConstValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

// ── RPC services ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rpc {
    pub name:       String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc:        String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Proc,
    Stream,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Proc => "proc",
            OperationKind::Stream => "stream",
        }
    }
}

/// A `proc` or `stream` of an rpc service. `input` and `output` name
/// declared types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub rpc_name: String,
    pub name:     String,
    pub kind:       OperationKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc:        String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecation>,
    pub input:      String,
    pub output:     String,
    pub path:       String,
}

pub type Procedure = Operation;
pub type Stream = Operation;

impl Operation {
    pub fn new(rpc_name: &str, name: &str, kind: OperationKind, input: &str, output: &str) -> Self {
        Operation {
            rpc_name: rpc_name.to_owned(),
            name:     name.to_owned(),
            kind,
            doc:        String::new(),
            deprecated: None,
            input:      input.to_owned(),
            output:     output.to_owned(),
            path:       operation_path(rpc_name, name),
        }
    }
}

/// Canonical wire path of an operation.
pub fn operation_path(rpc_name: &str, op_name: &str) -> String {
    format!("/{}/{}", rpc_name, op_name)
}

/// Every procedure and stream of the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub procedures: Vec<Procedure>,
    pub streams:    Vec<Stream>,
}

impl Catalog {
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.procedures.iter().chain(self.streams.iter())
    }

    pub fn find(&self, rpc_name: &str, op_name: &str) -> Option<&Operation> {
        self.operations()
            .find(|op| op.rpc_name == rpc_name && op.name == op_name)
    }

    pub fn find_by_path(&self, path: &str) -> Option<&Operation> {
        self.operations().find(|op| op.path == path)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.operations().map(|op| op.path.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_path() {
        let op = Operation::new("Users", "GetUser", OperationKind::Proc, "GetUserInput", "User");
        assert_eq!(op.path, "/Users/GetUser");
        assert_eq!(operation_path("Chat", "Messages"), "/Chat/Messages");
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = Catalog {
            procedures: vec![Operation::new("Users", "GetUser", OperationKind::Proc, "In", "Out")],
            streams:    vec![Operation::new("Chat", "Messages", OperationKind::Stream, "In", "Out")],
        };
        assert_eq!(catalog.paths(), vec!["/Users/GetUser", "/Chat/Messages"]);
        assert_eq!(catalog.find("Chat", "Messages").map(|o| o.kind), Some(OperationKind::Stream));
        assert!(catalog.find_by_path("/Users/Missing").is_none());
    }

    #[test]
    fn test_type_ref_json_shape() {
        let field = Field {
            name:     "tags".into(),
            doc:      String::new(),
            optional: true,
            indirect: false,
            type_ref: TypeRef::Array {
                item: Box::new(TypeRef::Enum { name: "Tag".into(), enum_kind: EnumKind::Int }),
            },
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "tags",
                "optional": true,
                "indirect": false,
                "type": {
                    "kind": "array",
                    "item": { "kind": "enum", "name": "Tag", "enumKind": "int" }
                }
            })
        );
        let back: Field = serde_json::from_value(json).unwrap();
        assert_eq!(back, field);
        assert_eq!(back.type_ref.declared_name(), Some("Tag"));
    }

    #[test]
    fn test_inline_object_and_deprecation_json() {
        let mut op = Operation::new("Users", "List", OperationKind::Proc, "ListInput", "ListOutput");
        op.deprecated = Some(Deprecation::new("use Search"));
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["deprecated"], serde_json::json!({ "message": "use Search" }));

        op.deprecated = Some(Deprecation::default());
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["deprecated"], serde_json::json!({}));
        assert_eq!(serde_json::from_value::<Operation>(json).unwrap(), op);

        let location = TypeRef::Object {
            fields: vec![Field {
                name:     "lat".into(),
                doc:      String::new(),
                optional: false,
                indirect: false,
                type_ref: TypeRef::Primitive { primitive: Primitive::Float },
            }],
        };
        let json = serde_json::to_value(&location).unwrap();
        assert_eq!(json["kind"], "object");
        assert_eq!(json["fields"][0]["type"]["primitive"], "float");
        assert_eq!(location.declared_name(), None);
    }

    #[test]
    fn test_enum_value_json() {
        assert_eq!(serde_json::to_string(&EnumValue::Int(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&EnumValue::String("a".into())).unwrap(), "\"a\"");
    }
}
