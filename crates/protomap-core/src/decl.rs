//! Declarations handed over by the host introspection layer.
//!
//! These structs are the narrow input contract of the library: whatever
//! reflection system produced them, the block builders and the compiler
//! only ever see names, declared types and loosely typed metadata.
//!
//! Metadata that the host may get wrong (comments, options, explicit
//! indexes, oneof keys, enum values) is kept as [`serde_json::Value`] so
//! the build rules can report a type error instead of failing to load.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn empty_text() -> Value {
    Value::String(String::new())
}

/// A `reserved` entry on a message or enum declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReservedEntry {
    /// A single field number
    Index(i64),
    /// An inclusive `[start, end]` range of field numbers
    Range([i64; 2]),
    /// A reserved field name
    Name(String),
}

/// Per-field metadata attached by the host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSpecDecl {
    /// Field comment; must be a string
    pub comment: Value,
    /// Field options; must be an object of bool/string values
    pub options: Value,
    /// Explicit field number; `0` or absent means "allocate one"
    pub index: Value,
    /// Oneof group key; must be a string when present
    pub oneof: Option<Value>,
}

/// One field of a message declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Field name
    pub name: String,
    /// Declared type expression (`int32`, `list<User>`, `map<str, Role>`)
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
    /// Optional field metadata
    #[serde(default)]
    pub spec: Option<FieldSpecDecl>,
}

impl FieldDecl {
    /// Creates a field with a declared type and no metadata
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty.into()),
            spec: None,
        }
    }

    /// Attaches field metadata
    pub fn with_spec(mut self, spec: FieldSpecDecl) -> Self {
        self.spec = Some(spec);
        self
    }
}

/// A message class declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDecl {
    /// Type name
    pub name: String,
    /// Own protofile override
    pub protofile: Option<String>,
    /// Own package override
    pub package: Option<String>,
    /// Block comment
    pub comment: Value,
    /// Block options
    pub options: Value,
    /// Reserved numbers, ranges and names
    pub reserved: Vec<ReservedEntry>,
    /// Fields in declaration order
    pub fields: Vec<FieldDecl>,
}

impl MessageDecl {
    /// Creates an empty message declaration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the protofile
    pub fn protofile(mut self, protofile: impl Into<String>) -> Self {
        self.protofile = Some(protofile.into());
        self
    }

    /// Sets the package
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Appends a field
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    /// Appends a reserved entry
    pub fn reserve(mut self, entry: ReservedEntry) -> Self {
        self.reserved.push(entry);
        self
    }
}

/// One member of an enum declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumMemberDecl {
    /// Member name
    pub name: String,
    /// Member value; must be a non-negative integer
    pub value: Value,
}

/// An enumeration declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumDecl {
    /// Type name
    pub name: String,
    /// Own protofile override
    pub protofile: Option<String>,
    /// Own package override
    pub package: Option<String>,
    /// Block comment
    pub comment: Value,
    /// Block options
    pub options: Value,
    /// Reserved numbers, ranges and names
    pub reserved: Vec<ReservedEntry>,
    /// Members in declaration order
    pub members: Vec<EnumMemberDecl>,
}

impl EnumDecl {
    /// Creates an empty enum declaration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends a member
    pub fn member(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.members.push(EnumMemberDecl {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Appends a reserved entry
    pub fn reserve(mut self, entry: ReservedEntry) -> Self {
        self.reserved.push(entry);
        self
    }
}

/// A declared message or enum type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeDecl {
    /// A message class
    Message(MessageDecl),
    /// An enumeration
    Enum(EnumDecl),
}

impl TypeDecl {
    /// Declared type name
    pub fn name(&self) -> &str {
        match self {
            TypeDecl::Message(m) => &m.name,
            TypeDecl::Enum(e) => &e.name,
        }
    }

    /// Own protofile override
    pub fn protofile(&self) -> Option<&str> {
        match self {
            TypeDecl::Message(m) => m.protofile.as_deref(),
            TypeDecl::Enum(e) => e.protofile.as_deref(),
        }
    }

    /// Own package override
    pub fn package(&self) -> Option<&str> {
        match self {
            TypeDecl::Message(m) => m.package.as_deref(),
            TypeDecl::Enum(e) => e.package.as_deref(),
        }
    }

    /// True for message declarations
    pub fn is_message(&self) -> bool {
        matches!(self, TypeDecl::Message(_))
    }
}

impl From<MessageDecl> for TypeDecl {
    fn from(value: MessageDecl) -> Self {
        TypeDecl::Message(value)
    }
}

impl From<EnumDecl> for TypeDecl {
    fn from(value: EnumDecl) -> Self {
        TypeDecl::Enum(value)
    }
}

/// Registry of every declared type, looked up by name
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<String, TypeDecl>,
}

impl Schema {
    /// Creates an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration, replacing any previous one with the same name
    pub fn insert(&mut self, decl: impl Into<TypeDecl>) {
        let decl = decl.into();
        self.types.insert(decl.name().to_string(), decl);
    }

    /// Chained form of [`Schema::insert`]
    pub fn with(mut self, decl: impl Into<TypeDecl>) -> Self {
        self.insert(decl);
        self
    }

    /// Looks up a declaration
    pub fn get(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }

    /// Number of declared types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when nothing is declared
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterates declarations ordered by name
    pub fn iter(&self) -> impl Iterator<Item = &TypeDecl> {
        self.types.values()
    }
}

impl FromIterator<TypeDecl> for Schema {
    fn from_iter<T: IntoIterator<Item = TypeDecl>>(iter: T) -> Self {
        let mut schema = Schema::new();
        for decl in iter {
            schema.insert(decl);
        }
        schema
    }
}

/// Collection origin of a method argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// An async stream of the base type
    Stream,
    /// A list of the base type
    List,
    /// A mapping to the base type
    Map,
}

/// Introspected description of a request or response argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaType {
    /// Name of the underlying message type
    pub basetype: String,
    /// Wrapper around the base type, if any
    #[serde(default)]
    pub origin: Option<Origin>,
    /// Package of the base type
    #[serde(default)]
    pub package: String,
    /// Path of the file declaring the base type
    #[serde(default)]
    pub proto_path: Option<String>,
}

impl MetaType {
    /// Creates a plain (non-streamed) argument
    pub fn new(basetype: impl Into<String>) -> Self {
        Self {
            basetype: basetype.into(),
            origin: None,
            package: String::new(),
            proto_path: None,
        }
    }

    /// Marks the argument as streamed
    pub fn stream(mut self) -> Self {
        self.origin = Some(Origin::Stream);
        self
    }

    /// Sets the package
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    /// Sets the proto path
    pub fn proto_path(mut self, path: impl Into<String>) -> Self {
        self.proto_path = Some(path.into());
        self
    }

    /// True when the argument is a stream of its base type
    pub fn is_stream(&self) -> bool {
        self.origin == Some(Origin::Stream)
    }
}

/// One RPC handler of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDecl {
    /// Handler name
    pub name: String,
    /// The handler itself yields a stream of responses
    #[serde(default)]
    pub streams: bool,
    /// Request arguments as introspected
    #[serde(default)]
    pub requests: Vec<MetaType>,
    /// Return type as introspected
    #[serde(default)]
    pub response: Option<MetaType>,
    /// Method comment; must be a string
    #[serde(default = "empty_text")]
    pub comments: Value,
    /// Option lines such as `deprecated = true`
    #[serde(default)]
    pub options: Vec<String>,
}

impl MethodDecl {
    /// Creates a unary method
    pub fn new(name: impl Into<String>, request: MetaType, response: MetaType) -> Self {
        Self {
            name: name.into(),
            streams: response.is_stream(),
            requests: vec![request],
            response: Some(response),
            comments: empty_text(),
            options: Vec::new(),
        }
    }
}

/// A service as handed over by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDecl {
    /// Service name
    pub name: String,
    /// Module (protofile stem) the service is rendered into
    pub module: String,
    /// Proto package
    #[serde(default)]
    pub package: String,
    /// Service option lines
    #[serde(default)]
    pub options: Vec<String>,
    /// Service comment; must be a string
    #[serde(default = "empty_text")]
    pub comments: Value,
    /// Handlers in declaration order
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

impl ServiceDecl {
    /// Creates a service with no methods
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        package: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            package: package.into(),
            options: Vec::new(),
            comments: empty_text(),
            methods: Vec::new(),
        }
    }

    /// Appends a method
    pub fn method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }
}

/// A JSON document bundling services and declared types
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Services to compile
    pub services: Vec<ServiceDecl>,
    /// Message and enum declarations
    pub types: Vec<TypeDecl>,
}

impl Manifest {
    /// Appends another manifest
    pub fn merge(&mut self, other: Manifest) {
        self.services.extend(other.services);
        self.types.extend(other.types);
    }

    /// Groups services by package, keeping declaration order within a package
    pub fn services_by_package(&self) -> BTreeMap<String, Vec<ServiceDecl>> {
        let mut packages: BTreeMap<String, Vec<ServiceDecl>> = BTreeMap::new();
        for service in &self.services {
            packages
                .entry(service.package.clone())
                .or_default()
                .push(service.clone());
        }
        packages
    }

    /// Builds the type registry
    pub fn schema(&self) -> Schema {
        self.types.iter().cloned().collect()
    }
}
