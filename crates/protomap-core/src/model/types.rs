//! Declared and resolved field types.
//!
//! A [`TypeRef`] is what the introspection layer reports for a field
//! (`int32`, `list<User>`, `map<string, Role>`, ...). Building a block
//! resolves it against the declaration [`crate::decl::Schema`] into a
//! [`FieldType`], which knows whether a name is a message or an enum and
//! where that type lives.

use std::fmt;

/// Protobuf scalar value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    /// 64-bit float
    Double,
    /// 32-bit float
    Float,
    /// Signed 32-bit varint
    Int32,
    /// Signed 64-bit varint
    Int64,
    /// Unsigned 32-bit varint
    Uint32,
    /// Unsigned 64-bit varint
    Uint64,
    /// Zigzag 32-bit varint
    Sint32,
    /// Zigzag 64-bit varint
    Sint64,
    /// Fixed-width unsigned 32-bit
    Fixed32,
    /// Fixed-width unsigned 64-bit
    Fixed64,
    /// Fixed-width signed 32-bit
    Sfixed32,
    /// Fixed-width signed 64-bit
    Sfixed64,
    /// Boolean
    Bool,
    /// UTF-8 string
    String,
    /// Raw bytes
    Bytes,
}

impl Scalar {
    /// Every scalar, in declaration order
    pub const ALL: [Scalar; 15] = [
        Scalar::Double,
        Scalar::Float,
        Scalar::Int32,
        Scalar::Int64,
        Scalar::Uint32,
        Scalar::Uint64,
        Scalar::Sint32,
        Scalar::Sint64,
        Scalar::Fixed32,
        Scalar::Fixed64,
        Scalar::Sfixed32,
        Scalar::Sfixed64,
        Scalar::Bool,
        Scalar::String,
        Scalar::Bytes,
    ];

    /// The proto keyword for this scalar
    pub fn as_str(&self) -> &'static str {
        match self {
            Scalar::Double => "double",
            Scalar::Float => "float",
            Scalar::Int32 => "int32",
            Scalar::Int64 => "int64",
            Scalar::Uint32 => "uint32",
            Scalar::Uint64 => "uint64",
            Scalar::Sint32 => "sint32",
            Scalar::Sint64 => "sint64",
            Scalar::Fixed32 => "fixed32",
            Scalar::Fixed64 => "fixed64",
            Scalar::Sfixed32 => "sfixed32",
            Scalar::Sfixed64 => "sfixed64",
            Scalar::Bool => "bool",
            Scalar::String => "string",
            Scalar::Bytes => "bytes",
        }
    }

    /// Parses a proto keyword or a host primitive alias.
    ///
    /// Aliases: `str` → string, `int` → int64, `float` → float,
    /// `bool` → bool, `bytes` → bytes. Matching is exact, so a declared
    /// type such as `Bytes` or `Double` stays a named type.
    pub fn parse(name: &str) -> Option<Self> {
        let scalar = match name {
            "str" => Scalar::String,
            "int" => Scalar::Int64,
            other => *Self::ALL.iter().find(|s| s.as_str() == other)?,
        };
        Some(scalar)
    }

    /// Whether this scalar may be used as a map key
    pub fn is_map_key(&self) -> bool {
        !matches!(self, Scalar::Double | Scalar::Float | Scalar::Bytes)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field type as declared by the host, before resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A scalar or primitive alias
    Scalar(Scalar),
    /// A named message or enum type (or something unsupported)
    Named(String),
    /// `list<T>`
    List(Box<TypeRef>),
    /// `map<K, V>`
    Map(Box<TypeRef>, Box<TypeRef>),
}

impl TypeRef {
    /// Parses a declared type expression such as `map<string, list<User>>`.
    ///
    /// Returns `None` when the expression is syntactically broken
    /// (unbalanced brackets, wrong generic arity, empty names).
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let Some(open) = input.find('<') else {
            if input.contains(['>', ',']) || input.contains(char::is_whitespace) {
                return None;
            }
            return Some(match Scalar::parse(input) {
                Some(scalar) => TypeRef::Scalar(scalar),
                None => TypeRef::Named(input.to_string()),
            });
        };

        let inner = input[open + 1..].strip_suffix('>')?;
        let head = input[..open].trim().to_ascii_lowercase();
        let args = split_generic_args(inner)?;

        match (head.as_str(), args.as_slice()) {
            ("list" | "vec", [elem]) => Some(TypeRef::List(Box::new(Self::parse(elem)?))),
            ("map" | "dict", [key, value]) => Some(TypeRef::Map(
                Box::new(Self::parse(key)?),
                Box::new(Self::parse(value)?),
            )),
            _ => None,
        }
    }

    /// Named types referenced anywhere in this type, outermost first
    pub fn named_types(&self) -> Vec<&str> {
        match self {
            TypeRef::Scalar(_) => Vec::new(),
            TypeRef::Named(name) => vec![name.as_str()],
            TypeRef::List(elem) => elem.named_types(),
            TypeRef::Map(key, value) => {
                let mut names = key.named_types();
                names.extend(value.named_types());
                names
            }
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Scalar(s) => write!(f, "{}", s),
            TypeRef::Named(name) => write!(f, "{}", name),
            TypeRef::List(elem) => write!(f, "list<{}>", elem),
            TypeRef::Map(key, value) => write!(f, "map<{}, {}>", key, value),
        }
    }
}

/// Splits `a, map<b, c>` at top-level commas
fn split_generic_args(inner: &str) -> Option<Vec<&str>> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut last = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                args.push(inner[last..i].trim());
                last = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    args.push(inner[last..].trim());
    Some(args)
}

/// Whether a named type is a message or an enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKind {
    /// A message type
    Message,
    /// An enum type
    Enum,
}

/// A resolved reference to a message or enum
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedType {
    /// Declared name
    pub name: String,
    /// Message or enum
    pub kind: NamedKind,
    /// File the type is rendered into
    pub protofile: String,
    /// Package of that file, if any
    pub package: Option<String>,
}

impl NamedType {
    /// The name as seen from `package`: qualified only when the packages differ
    pub fn qualified_from(&self, package: Option<&str>) -> String {
        match self.package.as_deref() {
            Some(own) if !own.is_empty() && Some(own) != package => {
                format!("{}.{}", own, self.name)
            }
            _ => self.name.clone(),
        }
    }

    /// Fully qualified descriptor name (`.pkg.Name`)
    pub fn full_name(&self) -> String {
        match self.package.as_deref() {
            Some(pkg) if !pkg.is_empty() => format!(".{}.{}", pkg, self.name),
            _ => format!(".{}", self.name),
        }
    }
}

/// A resolved field type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Scalar value
    Scalar(Scalar),
    /// Message or enum value
    Named(NamedType),
    /// `repeated T`
    Repeated(Box<FieldType>),
    /// `map<K, V>`
    Map(Scalar, Box<FieldType>),
}

impl FieldType {
    /// Renders the type as it appears in a field declaration
    pub fn proto_str(&self, package: Option<&str>) -> String {
        match self {
            FieldType::Scalar(s) => s.as_str().to_string(),
            FieldType::Named(named) => named.qualified_from(package),
            FieldType::Repeated(elem) => format!("repeated {}", elem.proto_str(package)),
            FieldType::Map(key, value) => {
                format!("map<{}, {}>", key.as_str(), value.proto_str(package))
            }
        }
    }

    /// Every named type referenced by this field
    pub fn named_types(&self) -> Vec<&NamedType> {
        match self {
            FieldType::Scalar(_) => Vec::new(),
            FieldType::Named(named) => vec![named],
            FieldType::Repeated(elem) | FieldType::Map(_, elem) => elem.named_types(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_aliases() {
        assert_eq!(Scalar::parse("str"), Some(Scalar::String));
        assert_eq!(Scalar::parse("int"), Some(Scalar::Int64));
        assert_eq!(Scalar::parse("float"), Some(Scalar::Float));
        assert_eq!(Scalar::parse("double"), Some(Scalar::Double));
        assert_eq!(Scalar::parse("uint32"), Some(Scalar::Uint32));
        assert_eq!(Scalar::parse("Path"), None);
        for declared in ["Bytes", "String", "Bool", "Float", "Double", "Int", "UInt32"] {
            assert_eq!(Scalar::parse(declared), None);
        }
        assert_eq!(TypeRef::parse("Bytes"), Some(TypeRef::Named("Bytes".into())));
    }

    #[test]
    fn test_map_keys() {
        assert!(Scalar::String.is_map_key());
        assert!(Scalar::Int32.is_map_key());
        assert!(Scalar::Bool.is_map_key());
        assert!(!Scalar::Bytes.is_map_key());
        assert!(!Scalar::Float.is_map_key());
        assert!(!Scalar::Double.is_map_key());
    }

    #[test]
    fn test_parse_type_refs() {
        assert_eq!(TypeRef::parse("int32"), Some(TypeRef::Scalar(Scalar::Int32)));
        assert_eq!(TypeRef::parse("User"), Some(TypeRef::Named("User".into())));
        assert_eq!(
            TypeRef::parse("list<User>"),
            Some(TypeRef::List(Box::new(TypeRef::Named("User".into()))))
        );
        assert_eq!(
            TypeRef::parse("map<string, list<int>>"),
            Some(TypeRef::Map(
                Box::new(TypeRef::Scalar(Scalar::String)),
                Box::new(TypeRef::List(Box::new(TypeRef::Scalar(Scalar::Int64))))
            ))
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(TypeRef::parse(""), None);
        assert_eq!(TypeRef::parse("list<User"), None);
        assert_eq!(TypeRef::parse("map<string>"), None);
        assert_eq!(TypeRef::parse("tuple<str, str>"), None);
        assert_eq!(TypeRef::parse("two words"), None);
    }

    #[test]
    fn test_display_round_trips_declared_form() {
        let ty = TypeRef::parse("map< string ,User >").unwrap();
        assert_eq!(ty.to_string(), "map<string, User>");
    }

    #[test]
    fn test_qualified_from() {
        let named = NamedType {
            name: "User".into(),
            kind: NamedKind::Message,
            protofile: "user.proto".into(),
            package: Some("accounts".into()),
        };
        assert_eq!(named.qualified_from(Some("accounts")), "User");
        assert_eq!(named.qualified_from(Some("billing")), "accounts.User");
        assert_eq!(named.qualified_from(None), "accounts.User");
        assert_eq!(named.full_name(), ".accounts.User");

        let ty = FieldType::Map(Scalar::String, Box::new(FieldType::Named(named)));
        assert_eq!(ty.proto_str(Some("billing")), "map<string, accounts.User>");
    }
}
