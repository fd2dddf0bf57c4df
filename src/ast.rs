//! Typed syntax tree for parsed Solidity sources
//!
//! Trees are lifted from the JSON emitted by `@solidity-parser/parser` (or any
//! parser producing the same `type`-tagged objects). Kinds that fingerprinting
//! looks into get a variant of their own; every other kind is kept verbatim in
//! [`SyntaxNode::Other`] and hashed exactly as parsed.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Node kind tags as written by the parser
pub mod kind {
    pub const SOURCE_UNIT: &str = "SourceUnit";
    pub const CONTRACT_DEFINITION: &str = "ContractDefinition";
    pub const INHERITANCE_SPECIFIER: &str = "InheritanceSpecifier";
    pub const FUNCTION_DEFINITION: &str = "FunctionDefinition";
    pub const MODIFIER_DEFINITION: &str = "ModifierDefinition";
    pub const EVENT_DEFINITION: &str = "EventDefinition";
    pub const STRUCT_DEFINITION: &str = "StructDefinition";
    pub const STATE_VARIABLE_DECLARATION: &str = "StateVariableDeclaration";
    pub const VARIABLE_DECLARATION: &str = "VariableDeclaration";
    pub const USING_FOR_DECLARATION: &str = "UsingForDeclaration";
    pub const USER_DEFINED_TYPE_NAME: &str = "UserDefinedTypeName";
    pub const IDENTIFIER: &str = "Identifier";
    pub const MEMBER_ACCESS: &str = "MemberAccess";
    pub const FUNCTION_CALL: &str = "FunctionCall";
    pub const STRING_LITERAL: &str = "StringLiteral";
}

/// Source location keys, dropped on ingest
const LOCATION_KEYS: [&str; 2] = ["loc", "range"];

/// Errors raised while lifting parser JSON into a typed tree
#[derive(Debug, Error)]
pub enum AstError {
    #[error("expected a syntax node (JSON object with a string `type` field)")]
    NotANode,

    #[error("{kind} node is missing field `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{kind}.{field} has an unexpected shape")]
    InvalidField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("unknown contract kind `{0}`")]
    UnknownContractKind(String),
}

/// Remaining fields of a node, keyed by their parser name
pub type Attrs = BTreeMap<String, Attr>;

/// A node field the pipeline does not model explicitly
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    List(Vec<Attr>),
    Map(Attrs),
    Node(Box<SyntaxNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Contract,
    Interface,
    Library,
    Abstract,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Interface => "interface",
            Self::Library => "library",
            Self::Abstract => "abstract",
        }
    }

    fn parse(s: &str) -> Result<Self, AstError> {
        match s {
            "contract" => Ok(Self::Contract),
            "interface" => Ok(Self::Interface),
            "library" => Ok(Self::Library),
            "abstract" => Ok(Self::Abstract),
            other => Err(AstError::UnknownContractKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceUnit {
    pub children: Vec<SyntaxNode>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractDefinition {
    pub name: String,
    pub kind: ContractKind,
    pub base_contracts: Vec<SyntaxNode>,
    pub sub_nodes: Vec<SyntaxNode>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InheritanceSpecifier {
    pub base_name: Box<SyntaxNode>,
    pub arguments: Vec<SyntaxNode>,
    pub attrs: Attrs,
}

/// Kinds whose only inspected field is their name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Named {
    pub name: Option<String>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventDefinition {
    pub name: Option<String>,
    pub is_anonymous: Option<bool>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructDefinition {
    pub name: Option<String>,
    pub members: Vec<SyntaxNode>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateVariableDeclaration {
    pub variables: Vec<SyntaxNode>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UsingForDeclaration {
    pub library_name: Option<String>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserDefinedTypeName {
    pub name_path: String,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberAccess {
    pub expression: Box<SyntaxNode>,
    pub member_name: String,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub expression: Box<SyntaxNode>,
    pub arguments: Vec<SyntaxNode>,
    pub attrs: Attrs,
}

impl FunctionCall {
    /// `require(..)` or `assert(..)` called through a plain identifier
    pub fn is_assertion(&self) -> bool {
        matches!(
            self.expression.as_ref(),
            SyntaxNode::Identifier(id) if matches!(id.name.as_deref(), Some("require" | "assert"))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringLiteral {
    pub value: String,
    pub attrs: Attrs,
}

/// One node of a parsed Solidity tree
#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxNode {
    SourceUnit(SourceUnit),
    ContractDefinition(ContractDefinition),
    InheritanceSpecifier(InheritanceSpecifier),
    FunctionDefinition(Named),
    ModifierDefinition(Named),
    EventDefinition(EventDefinition),
    StructDefinition(StructDefinition),
    StateVariableDeclaration(StateVariableDeclaration),
    VariableDeclaration(Named),
    UsingForDeclaration(UsingForDeclaration),
    UserDefinedTypeName(UserDefinedTypeName),
    Identifier(Named),
    MemberAccess(MemberAccess),
    FunctionCall(FunctionCall),
    StringLiteral(StringLiteral),
    /// Any kind not listed above, kept as parsed
    Other { kind: String, attrs: Attrs },
}

/// Borrowed view of one node field
#[derive(Debug, Clone, Copy)]
enum Field<'a> {
    Text(Option<&'a str>),
    Bool(Option<bool>),
    Node(&'a SyntaxNode),
    Nodes(&'a [SyntaxNode]),
    Attr(&'a Attr),
}

impl SyntaxNode {
    /// Parse the parser's JSON output into a typed tree
    pub fn from_json(value: Value) -> Result<Self, AstError> {
        match value {
            Value::Object(object) => Self::from_object(object),
            _ => Err(AstError::NotANode),
        }
    }

    /// The parser's `type` tag
    pub fn kind_name(&self) -> &str {
        match self {
            Self::SourceUnit(_) => kind::SOURCE_UNIT,
            Self::ContractDefinition(_) => kind::CONTRACT_DEFINITION,
            Self::InheritanceSpecifier(_) => kind::INHERITANCE_SPECIFIER,
            Self::FunctionDefinition(_) => kind::FUNCTION_DEFINITION,
            Self::ModifierDefinition(_) => kind::MODIFIER_DEFINITION,
            Self::EventDefinition(_) => kind::EVENT_DEFINITION,
            Self::StructDefinition(_) => kind::STRUCT_DEFINITION,
            Self::StateVariableDeclaration(_) => kind::STATE_VARIABLE_DECLARATION,
            Self::VariableDeclaration(_) => kind::VARIABLE_DECLARATION,
            Self::UsingForDeclaration(_) => kind::USING_FOR_DECLARATION,
            Self::UserDefinedTypeName(_) => kind::USER_DEFINED_TYPE_NAME,
            Self::Identifier(_) => kind::IDENTIFIER,
            Self::MemberAccess(_) => kind::MEMBER_ACCESS,
            Self::FunctionCall(_) => kind::FUNCTION_CALL,
            Self::StringLiteral(_) => kind::STRING_LITERAL,
            Self::Other { kind, .. } => kind,
        }
    }

    /// Serialize back into the parser's JSON shape. Keys are inserted in
    /// lexicographic order, so the result is canonical with or without
    /// `serde_json`'s `preserve_order`.
    pub fn to_json(&self) -> Value {
        let object = self
            .fields()
            .into_iter()
            .map(|(key, field)| (key.to_string(), field.to_json()))
            .collect::<Map<_, _>>();
        Value::Object(object)
    }

    /// Every field of this node, including the `type` tag, sorted by key
    fn fields(&self) -> Vec<(&str, Field<'_>)> {
        let (mut fields, attrs): (Vec<(&str, Field<'_>)>, &Attrs) = match self {
            Self::SourceUnit(n) => (vec![("children", Field::Nodes(&n.children))], &n.attrs),
            Self::ContractDefinition(n) => (
                vec![
                    ("name", Field::Text(Some(&n.name))),
                    ("kind", Field::Text(Some(n.kind.as_str()))),
                    ("baseContracts", Field::Nodes(&n.base_contracts)),
                    ("subNodes", Field::Nodes(&n.sub_nodes)),
                ],
                &n.attrs,
            ),
            Self::InheritanceSpecifier(n) => (
                vec![
                    ("baseName", Field::Node(&n.base_name)),
                    ("arguments", Field::Nodes(&n.arguments)),
                ],
                &n.attrs,
            ),
            Self::FunctionDefinition(n)
            | Self::ModifierDefinition(n)
            | Self::VariableDeclaration(n)
            | Self::Identifier(n) => (vec![("name", Field::Text(n.name.as_deref()))], &n.attrs),
            Self::EventDefinition(n) => (
                vec![
                    ("name", Field::Text(n.name.as_deref())),
                    ("isAnonymous", Field::Bool(n.is_anonymous)),
                ],
                &n.attrs,
            ),
            Self::StructDefinition(n) => (
                vec![
                    ("name", Field::Text(n.name.as_deref())),
                    ("members", Field::Nodes(&n.members)),
                ],
                &n.attrs,
            ),
            Self::StateVariableDeclaration(n) => {
                (vec![("variables", Field::Nodes(&n.variables))], &n.attrs)
            }
            Self::UsingForDeclaration(n) => (
                vec![("libraryName", Field::Text(n.library_name.as_deref()))],
                &n.attrs,
            ),
            Self::UserDefinedTypeName(n) => {
                (vec![("namePath", Field::Text(Some(&n.name_path)))], &n.attrs)
            }
            Self::MemberAccess(n) => (
                vec![
                    ("expression", Field::Node(&n.expression)),
                    ("memberName", Field::Text(Some(&n.member_name))),
                ],
                &n.attrs,
            ),
            Self::FunctionCall(n) => (
                vec![
                    ("expression", Field::Node(&n.expression)),
                    ("arguments", Field::Nodes(&n.arguments)),
                ],
                &n.attrs,
            ),
            Self::StringLiteral(n) => (vec![("value", Field::Text(Some(&n.value)))], &n.attrs),
            Self::Other { attrs, .. } => (Vec::new(), attrs),
        };

        fields.push(("type", Field::Text(Some(self.kind_name()))));
        fields.extend(attrs.iter().map(|(key, attr)| (key.as_str(), Field::Attr(attr))));
        fields.sort_by(|a, b| a.0.cmp(b.0));
        fields
    }

    /// Direct child nodes, typed fields first, then nodes nested in attributes
    pub fn children_mut(&mut self) -> Vec<&mut SyntaxNode> {
        let mut out = Vec::new();
        let attrs = match self {
            Self::SourceUnit(n) => {
                out.extend(n.children.iter_mut());
                &mut n.attrs
            }
            Self::ContractDefinition(n) => {
                out.extend(n.base_contracts.iter_mut());
                out.extend(n.sub_nodes.iter_mut());
                &mut n.attrs
            }
            Self::InheritanceSpecifier(n) => {
                out.push(n.base_name.as_mut());
                out.extend(n.arguments.iter_mut());
                &mut n.attrs
            }
            Self::FunctionDefinition(n)
            | Self::ModifierDefinition(n)
            | Self::VariableDeclaration(n)
            | Self::Identifier(n) => &mut n.attrs,
            Self::EventDefinition(n) => &mut n.attrs,
            Self::StructDefinition(n) => {
                out.extend(n.members.iter_mut());
                &mut n.attrs
            }
            Self::StateVariableDeclaration(n) => {
                out.extend(n.variables.iter_mut());
                &mut n.attrs
            }
            Self::UsingForDeclaration(n) => &mut n.attrs,
            Self::UserDefinedTypeName(n) => &mut n.attrs,
            Self::MemberAccess(n) => {
                out.push(n.expression.as_mut());
                &mut n.attrs
            }
            Self::FunctionCall(n) => {
                out.push(n.expression.as_mut());
                out.extend(n.arguments.iter_mut());
                &mut n.attrs
            }
            Self::StringLiteral(n) => &mut n.attrs,
            Self::Other { attrs, .. } => attrs,
        };
        for attr in attrs.values_mut() {
            attr.collect_nodes_mut(&mut out);
        }
        out
    }

    /// Pre-order traversal: `visit` sees a node before any of its children
    pub fn walk_mut<F: FnMut(&mut SyntaxNode)>(&mut self, visit: &mut F) {
        visit(self);
        for child in self.children_mut() {
            child.walk_mut(visit);
        }
    }

    fn from_object(mut object: Map<String, Value>) -> Result<Self, AstError> {
        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(AstError::NotANode),
        };
        for key in LOCATION_KEYS {
            object.remove(key);
        }

        let node = match kind.as_str() {
            kind::SOURCE_UNIT => {
                let mut f = Fields::new(kind::SOURCE_UNIT, object);
                Self::SourceUnit(SourceUnit {
                    children: f.nodes("children")?,
                    attrs: f.finish()?,
                })
            }
            kind::CONTRACT_DEFINITION => {
                let mut f = Fields::new(kind::CONTRACT_DEFINITION, object);
                Self::ContractDefinition(ContractDefinition {
                    name: f.text("name")?,
                    kind: ContractKind::parse(&f.text("kind")?)?,
                    base_contracts: f.nodes("baseContracts")?,
                    sub_nodes: f.required_nodes("subNodes")?,
                    attrs: f.finish()?,
                })
            }
            kind::INHERITANCE_SPECIFIER => {
                let mut f = Fields::new(kind::INHERITANCE_SPECIFIER, object);
                Self::InheritanceSpecifier(InheritanceSpecifier {
                    base_name: f.node("baseName")?,
                    arguments: f.nodes("arguments")?,
                    attrs: f.finish()?,
                })
            }
            kind::FUNCTION_DEFINITION => {
                Self::FunctionDefinition(Named::parse(kind::FUNCTION_DEFINITION, object)?)
            }
            kind::MODIFIER_DEFINITION => {
                Self::ModifierDefinition(Named::parse(kind::MODIFIER_DEFINITION, object)?)
            }
            kind::VARIABLE_DECLARATION => {
                Self::VariableDeclaration(Named::parse(kind::VARIABLE_DECLARATION, object)?)
            }
            kind::IDENTIFIER => Self::Identifier(Named::parse(kind::IDENTIFIER, object)?),
            kind::EVENT_DEFINITION => {
                let mut f = Fields::new(kind::EVENT_DEFINITION, object);
                Self::EventDefinition(EventDefinition {
                    name: f.opt_text("name")?,
                    is_anonymous: f.opt_bool("isAnonymous")?,
                    attrs: f.finish()?,
                })
            }
            kind::STRUCT_DEFINITION => {
                let mut f = Fields::new(kind::STRUCT_DEFINITION, object);
                Self::StructDefinition(StructDefinition {
                    name: f.opt_text("name")?,
                    members: f.nodes("members")?,
                    attrs: f.finish()?,
                })
            }
            kind::STATE_VARIABLE_DECLARATION => {
                let mut f = Fields::new(kind::STATE_VARIABLE_DECLARATION, object);
                Self::StateVariableDeclaration(StateVariableDeclaration {
                    variables: f.nodes("variables")?,
                    attrs: f.finish()?,
                })
            }
            kind::USING_FOR_DECLARATION => {
                let mut f = Fields::new(kind::USING_FOR_DECLARATION, object);
                Self::UsingForDeclaration(UsingForDeclaration {
                    library_name: f.opt_text("libraryName")?,
                    attrs: f.finish()?,
                })
            }
            kind::USER_DEFINED_TYPE_NAME => {
                let mut f = Fields::new(kind::USER_DEFINED_TYPE_NAME, object);
                Self::UserDefinedTypeName(UserDefinedTypeName {
                    name_path: f.text("namePath")?,
                    attrs: f.finish()?,
                })
            }
            kind::MEMBER_ACCESS => {
                let mut f = Fields::new(kind::MEMBER_ACCESS, object);
                Self::MemberAccess(MemberAccess {
                    expression: f.node("expression")?,
                    member_name: f.text("memberName")?,
                    attrs: f.finish()?,
                })
            }
            kind::FUNCTION_CALL => {
                let mut f = Fields::new(kind::FUNCTION_CALL, object);
                Self::FunctionCall(FunctionCall {
                    expression: f.node("expression")?,
                    arguments: f.nodes("arguments")?,
                    attrs: f.finish()?,
                })
            }
            kind::STRING_LITERAL => {
                let mut f = Fields::new(kind::STRING_LITERAL, object);
                Self::StringLiteral(StringLiteral {
                    value: f.text("value")?,
                    attrs: f.finish()?,
                })
            }
            _ => Self::Other {
                attrs: attrs_from_object(object)?,
                kind,
            },
        };
        Ok(node)
    }
}

impl TryFrom<Value> for SyntaxNode {
    type Error = AstError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

impl Serialize for SyntaxNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SyntaxNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(D::Error::custom)
    }
}

impl Named {
    fn parse(kind: &'static str, object: Map<String, Value>) -> Result<Self, AstError> {
        let mut f = Fields::new(kind, object);
        Ok(Self {
            name: f.opt_text("name")?,
            attrs: f.finish()?,
        })
    }
}

impl Attr {
    fn from_json(value: Value) -> Result<Self, AstError> {
        let attr = match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(object) if matches!(object.get("type"), Some(Value::String(_))) => {
                Self::Node(Box::new(SyntaxNode::from_object(object)?))
            }
            Value::Object(object) => Self::Map(attrs_from_object(object)?),
        };
        Ok(attr)
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Text(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(attrs) => Value::Object(
                attrs
                    .iter()
                    .map(|(key, attr)| (key.clone(), attr.to_json()))
                    .collect(),
            ),
            Self::Node(node) => node.to_json(),
        }
    }

    fn collect_nodes_mut<'a>(&'a mut self, out: &mut Vec<&'a mut SyntaxNode>) {
        match self {
            Self::Node(node) => out.push(node.as_mut()),
            Self::List(items) => {
                for item in items {
                    item.collect_nodes_mut(out);
                }
            }
            Self::Map(attrs) => {
                for attr in attrs.values_mut() {
                    attr.collect_nodes_mut(out);
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::Text(_) => {}
        }
    }
}

impl Field<'_> {
    fn to_json(self) -> Value {
        match self {
            Field::Text(text) => text.map_or(Value::Null, |s| Value::String(s.to_string())),
            Field::Bool(flag) => flag.map_or(Value::Null, Value::Bool),
            Field::Node(node) => node.to_json(),
            Field::Nodes(nodes) => Value::Array(nodes.iter().map(SyntaxNode::to_json).collect()),
            Field::Attr(attr) => attr.to_json(),
        }
    }
}

fn attrs_from_object(object: Map<String, Value>) -> Result<Attrs, AstError> {
    object
        .into_iter()
        .map(|(key, value)| Ok((key, Attr::from_json(value)?)))
        .collect()
}

/// Pulls typed fields out of a node object; whatever is left becomes attributes
struct Fields {
    kind: &'static str,
    object: Map<String, Value>,
}

impl Fields {
    fn new(kind: &'static str, object: Map<String, Value>) -> Self {
        Self { kind, object }
    }

    fn missing(&self, field: &'static str) -> AstError {
        AstError::MissingField {
            kind: self.kind,
            field,
        }
    }

    fn invalid(&self, field: &'static str) -> AstError {
        AstError::InvalidField {
            kind: self.kind,
            field,
        }
    }

    fn text(&mut self, field: &'static str) -> Result<String, AstError> {
        self.opt_text(field)?.ok_or_else(|| self.missing(field))
    }

    fn opt_text(&mut self, field: &'static str) -> Result<Option<String>, AstError> {
        match self.object.remove(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.invalid(field)),
        }
    }

    fn opt_bool(&mut self, field: &'static str) -> Result<Option<bool>, AstError> {
        match self.object.remove(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(_) => Err(self.invalid(field)),
        }
    }

    fn node(&mut self, field: &'static str) -> Result<Box<SyntaxNode>, AstError> {
        match self.object.remove(field) {
            None | Some(Value::Null) => Err(self.missing(field)),
            Some(value @ Value::Object(_)) => Ok(Box::new(SyntaxNode::from_json(value)?)),
            Some(_) => Err(self.invalid(field)),
        }
    }

    /// A list of nodes; absent or null reads as empty
    fn nodes(&mut self, field: &'static str) -> Result<Vec<SyntaxNode>, AstError> {
        match self.object.remove(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items.into_iter().map(SyntaxNode::from_json).collect(),
            Some(_) => Err(self.invalid(field)),
        }
    }

    fn required_nodes(&mut self, field: &'static str) -> Result<Vec<SyntaxNode>, AstError> {
        if !self.object.contains_key(field) {
            return Err(self.missing(field));
        }
        self.nodes(field)
    }

    fn finish(self) -> Result<Attrs, AstError> {
        attrs_from_object(self.object)
    }
}
