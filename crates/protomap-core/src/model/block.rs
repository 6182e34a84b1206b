//! Structural model of rendered blocks.

use super::types::{FieldType, NamedType};
use crate::build::indexer::{format_reservations, reserved_keys_str, Reservation};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Kind of a [`Block`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockType {
    /// `message`
    Message,
    /// `enum`
    Enum,
    /// `oneof`, nested inside a message
    Oneof,
    /// `service`
    Service,
}

impl BlockType {
    /// The proto keyword
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Message => "message",
            BlockType::Enum => "enum",
            BlockType::Oneof => "oneof",
            BlockType::Service => "service",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a proto option
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// `true` / `false`
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// Quoted string literal
    Str(String),
    /// Bare identifier such as an enum value
    Ident(String),
}

impl OptionValue {
    /// Parses the right-hand side of an option line (`true`, `3`, `"x"`, `SPEED`)
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => return OptionValue::Bool(true),
            "false" => return OptionValue::Bool(false),
            _ => {}
        }
        if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            return OptionValue::Str(inner.to_string());
        }
        if let Ok(n) = raw.parse::<i64>() {
            return OptionValue::Int(n);
        }
        if let Ok(x) = raw.parse::<f64>() {
            return OptionValue::Float(x);
        }
        OptionValue::Ident(raw.to_string())
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(n) => write!(f, "{}", n),
            OptionValue::Float(x) => write!(f, "{}", x),
            OptionValue::Str(s) => write!(f, "\"{}\"", s),
            OptionValue::Ident(s) => f.write_str(s),
        }
    }
}

/// Ordered option map
pub type ProtoOptions = BTreeMap<String, OptionValue>;

/// Renders one option as `key = value`
pub fn format_option(key: &str, value: &OptionValue) -> String {
    format!("{} = {}", key, value)
}

/// Reserved numbers and names of a message or enum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedSet {
    /// Merged numeric reservations, ascending
    pub numbers: Vec<Reservation>,
    /// Reserved field names in declaration order
    pub names: Vec<String>,
}

impl ReservedSet {
    /// Rendered numeric reservations (`1,2,5 to 8`)
    pub fn index_str(&self) -> String {
        format_reservations(&self.numbers)
    }

    /// Rendered reserved names (`"a", "b"`)
    pub fn keys_str(&self) -> String {
        reserved_keys_str(&self.names)
    }

    /// True when nothing is reserved
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty() && self.names.is_empty()
    }
}

/// A message field or enum member
#[derive(Debug, Clone)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Resolved type; `None` only for enum members
    pub ftype: Option<FieldType>,
    /// Field number (0 until resolved)
    pub number: i64,
    /// Comment text
    pub comment: String,
    /// Field options
    pub options: ProtoOptions,
}

impl Field {
    /// Creates a typed message field
    pub fn new(name: impl Into<String>, ftype: FieldType, number: i64) -> Self {
        Self {
            name: name.into(),
            ftype: Some(ftype),
            number,
            comment: String::new(),
            options: ProtoOptions::new(),
        }
    }

    /// Creates an enum member
    pub fn member(name: impl Into<String>, number: i64) -> Self {
        Self {
            name: name.into(),
            ftype: None,
            number,
            comment: String::new(),
            options: ProtoOptions::new(),
        }
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.ftype == other.ftype && self.number == other.number
    }
}

impl Eq for Field {}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.ftype.hash(state);
        self.number.hash(state);
    }
}

/// An RPC method of a service block
#[derive(Debug, Clone)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Request message
    pub request_type: NamedType,
    /// Response message
    pub response_type: NamedType,
    /// Client streams requests
    pub request_stream: bool,
    /// Server streams responses
    pub response_stream: bool,
    /// Comment text
    pub comment: String,
    /// Method options
    pub options: ProtoOptions,
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.request_type.name == other.request_type.name
            && self.response_type.name == other.response_type.name
            && self.request_stream == other.request_stream
            && self.response_stream == other.response_stream
    }
}

impl Eq for Method {}

impl Hash for Method {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.request_type.name.hash(state);
        self.response_type.name.hash(state);
        self.request_stream.hash(state);
        self.response_stream.hash(state);
    }
}

/// Anything that can sit inside a block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockItem {
    /// Field or enum member
    Field(Field),
    /// Service method
    Method(Method),
    /// Nested block (oneof group)
    Block(Block),
}

impl BlockItem {
    /// Name of the item
    pub fn name(&self) -> &str {
        match self {
            BlockItem::Field(f) => &f.name,
            BlockItem::Method(m) => &m.name,
            BlockItem::Block(b) => &b.name,
        }
    }

    /// Sort key: the field number, or the smallest number inside a group
    pub fn number(&self) -> i64 {
        match self {
            BlockItem::Field(f) => f.number,
            BlockItem::Method(_) => 0,
            BlockItem::Block(b) => b.number(),
        }
    }
}

impl From<Field> for BlockItem {
    fn from(value: Field) -> Self {
        BlockItem::Field(value)
    }
}

impl From<Method> for BlockItem {
    fn from(value: Method) -> Self {
        BlockItem::Method(value)
    }
}

impl From<Block> for BlockItem {
    fn from(value: Block) -> Self {
        BlockItem::Block(value)
    }
}

/// A named protobuf construct
#[derive(Debug, Clone)]
pub struct Block {
    /// File the block is rendered into (always ends in `.proto`)
    pub protofile: String,
    /// Package, if any
    pub package: Option<String>,
    /// Block name
    pub name: String,
    /// Block kind
    pub block_type: BlockType,
    fields: Vec<BlockItem>,
    /// Comment text
    pub comment: String,
    /// Block options
    pub options: ProtoOptions,
    /// Reserved numbers and names
    pub reserved: ReservedSet,
}

/// Appends `.proto` unless already present
pub fn normalize_protofile(protofile: &str) -> String {
    format!("{}.proto", protofile.strip_suffix(".proto").unwrap_or(protofile))
}

impl Block {
    /// Creates a block after checking that `fields` fit `block_type`
    pub fn new(
        protofile: &str,
        package: Option<String>,
        name: impl Into<String>,
        block_type: BlockType,
        fields: Vec<BlockItem>,
    ) -> Result<Self> {
        let name = name.into();
        check_contents(&name, block_type, &fields)?;
        Ok(Self {
            protofile: normalize_protofile(protofile),
            package: package.filter(|p| !p.is_empty()),
            name,
            block_type,
            fields,
            comment: String::new(),
            options: ProtoOptions::new(),
            reserved: ReservedSet::default(),
        })
    }

    /// Sets the comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Sets the options
    pub fn with_options(mut self, options: ProtoOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the reserved numbers and names
    pub fn with_reserved(mut self, reserved: ReservedSet) -> Self {
        self.reserved = reserved;
        self
    }

    /// Contained items in order
    pub fn fields(&self) -> &[BlockItem] {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Vec<BlockItem> {
        &mut self.fields
    }

    /// Number of direct items
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the block holds nothing
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates direct items
    pub fn iter(&self) -> std::slice::Iter<'_, BlockItem> {
        self.fields.iter()
    }

    /// Smallest field number found inside (0 when empty)
    pub fn number(&self) -> i64 {
        self.fields.iter().map(BlockItem::number).min().unwrap_or(0)
    }

    /// Rendered numeric reservations
    pub fn reserved_index(&self) -> String {
        self.reserved.index_str()
    }

    /// Rendered reserved names
    pub fn reserved_keys(&self) -> String {
        self.reserved.keys_str()
    }

    /// Named types referenced by fields and methods, recursively
    pub fn referenced_types(&self) -> Vec<&NamedType> {
        let mut out = Vec::new();
        for item in &self.fields {
            match item {
                BlockItem::Field(f) => {
                    if let Some(ty) = &f.ftype {
                        out.extend(ty.named_types());
                    }
                }
                BlockItem::Method(m) => {
                    out.push(&m.request_type);
                    out.push(&m.response_type);
                }
                BlockItem::Block(b) => out.extend(b.referenced_types()),
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a Block {
    type Item = &'a BlockItem;
    type IntoIter = std::slice::Iter<'a, BlockItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.protofile == other.protofile
            && self.package == other.package
            && self.name == other.name
            && self.block_type == other.block_type
            && self.fields == other.fields
    }
}

impl Eq for Block {}

impl Hash for Block {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protofile.hash(state);
        self.package.hash(state);
        self.name.hash(state);
        self.block_type.hash(state);
        self.fields.hash(state);
    }
}

fn check_contents(name: &str, block_type: BlockType, fields: &[BlockItem]) -> Result<()> {
    for item in fields {
        let problem = match (block_type, item) {
            (BlockType::Service, BlockItem::Method(_)) => None,
            (BlockType::Service, _) => Some("service blocks hold methods only"),
            (BlockType::Enum, BlockItem::Field(f)) if f.ftype.is_none() => None,
            (BlockType::Enum, BlockItem::Field(_)) => Some("enum members can't have a type"),
            (BlockType::Enum, _) => Some("enum blocks hold members only"),
            (BlockType::Message | BlockType::Oneof, BlockItem::Method(_)) => {
                Some("methods are only allowed in service blocks")
            }
            (BlockType::Message | BlockType::Oneof, BlockItem::Field(f)) if f.ftype.is_none() => {
                Some("fields must have a type")
            }
            (BlockType::Message, BlockItem::Block(b)) if b.block_type != BlockType::Oneof => {
                Some("only oneof groups can be nested")
            }
            (BlockType::Oneof, BlockItem::Block(_)) => Some("oneof groups can't be nested"),
            _ => None,
        };
        if let Some(problem) = problem {
            return Err(Error::invalid_block(
                name,
                block_type.as_str(),
                format!("{} (found \"{}\")", problem, item.name()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{NamedKind, Scalar};

    fn named(name: &str) -> NamedType {
        NamedType {
            name: name.into(),
            kind: NamedKind::Message,
            protofile: "svc.proto".into(),
            package: None,
        }
    }

    fn method(name: &str) -> Method {
        Method {
            name: name.into(),
            request_type: named("Req"),
            response_type: named("Resp"),
            request_stream: false,
            response_stream: false,
            comment: String::new(),
            options: ProtoOptions::new(),
        }
    }

    fn int_field(name: &str, number: i64) -> Field {
        Field::new(name, FieldType::Scalar(Scalar::Int32), number)
    }

    #[test]
    fn test_service_rejects_fields() {
        let err = Block::new(
            "svc",
            None,
            "Svc",
            BlockType::Service,
            vec![int_field("id", 1).into()],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBlock { block_type: "service", .. }));

        assert!(Block::new("svc", None, "Svc", BlockType::Service, vec![method("get").into()]).is_ok());
    }

    #[test]
    fn test_enum_rejects_typed_fields() {
        let err = Block::new("e", None, "E", BlockType::Enum, vec![int_field("A", 0).into()]);
        assert!(err.is_err());
        assert!(Block::new("e", None, "E", BlockType::Enum, vec![Field::member("A", 0).into()]).is_ok());
    }

    #[test]
    fn test_message_rejects_methods_and_untyped() {
        assert!(Block::new("m", None, "M", BlockType::Message, vec![method("x").into()]).is_err());
        assert!(Block::new("m", None, "M", BlockType::Message, vec![Field::member("x", 1).into()]).is_err());
        assert!(Block::new("m", None, "M", BlockType::Oneof, vec![Field::member("x", 1).into()]).is_err());
    }

    #[test]
    fn test_protofile_is_normalized() {
        let a = Block::new("users", Some(String::new()), "A", BlockType::Message, vec![]).unwrap();
        let b = Block::new("users.proto", None, "A", BlockType::Message, vec![]).unwrap();
        assert_eq!(a.protofile, "users.proto");
        assert_eq!(a.package, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_ignores_comment_and_options() {
        let a = Block::new("m", None, "M", BlockType::Message, vec![int_field("a", 1).into()]).unwrap();
        let b = a.clone().with_comment("hello");
        assert_eq!(a, b);

        let mut c = a.clone();
        c.fields_mut().push(int_field("b", 2).into());
        assert_ne!(a, c);
    }

    #[test]
    fn test_oneof_number_is_min_of_fields() {
        let oneof = Block::new(
            "m",
            None,
            "choice",
            BlockType::Oneof,
            vec![int_field("a", 7).into(), int_field("b", 3).into()],
        )
        .unwrap();
        assert_eq!(BlockItem::from(oneof).number(), 3);
    }

    #[test]
    fn test_option_values() {
        assert_eq!(OptionValue::parse("true"), OptionValue::Bool(true));
        assert_eq!(OptionValue::parse(" 12 "), OptionValue::Int(12));
        assert_eq!(OptionValue::parse("\"v\""), OptionValue::Str("v".into()));
        assert_eq!(OptionValue::parse("SPEED"), OptionValue::Ident("SPEED".into()));
        assert_eq!(format_option("opt1", &OptionValue::Str("value1".into())), "opt1 = \"value1\"");
        assert_eq!(format_option("deprecated", &OptionValue::Bool(true)), "deprecated = true");
        assert_eq!(format_option("optimize_for", &OptionValue::Ident("SPEED".into())), "optimize_for = SPEED");
    }
}
