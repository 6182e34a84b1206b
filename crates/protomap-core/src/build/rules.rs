//! Checks applied to declarations before a block is built.
//!
//! Every check appends to a problem list instead of returning early so a
//! single build reports everything wrong with a declaration.

use crate::decl::{Schema, TypeDecl};
use crate::error::Problem;
use crate::model::{
    normalize_protofile, FieldType, NamedKind, NamedType, OptionValue, ProtoOptions, TypeRef,
};
use serde_json::Value;
use std::fmt;

/// What a piece of metadata is attached to, for error messages
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    kind: &'static str,
    name: &'a str,
}

impl<'a> Subject<'a> {
    /// Metadata on a field
    pub fn field(name: &'a str) -> Self {
        Self { kind: "Field", name }
    }

    /// Metadata on a message or enum header
    pub fn class(name: &'a str) -> Self {
        Self { kind: "Class", name }
    }

    /// Metadata on a service method
    pub fn method(name: &'a str) -> Self {
        Self { kind: "Method", name }
    }

    fn wrong_type(&self, what: &str, found: impl fmt::Display) -> Problem {
        Problem::type_error(format!(
            "{} \"{}\" {} has a wrong type. Found {}",
            self.kind, self.name, what, found
        ))
    }
}

/// File and package a declared type is rendered into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Home {
    /// Normalized protofile
    pub protofile: String,
    /// Package, `None` when empty
    pub package: Option<String>,
}

impl Home {
    /// Creates a home, normalizing the protofile and dropping an empty package
    pub fn new(protofile: &str, package: Option<&str>) -> Self {
        Self {
            protofile: normalize_protofile(protofile),
            package: package.filter(|p| !p.is_empty()).map(str::to_string),
        }
    }

    /// Home of `decl`: its own overrides, else what it inherits
    pub fn of(decl: &TypeDecl, inherited: &Home) -> Self {
        Self::overridden(decl.protofile(), decl.package(), inherited)
    }

    /// Applies optional protofile/package overrides on top of `inherited`
    pub fn overridden(protofile: Option<&str>, package: Option<&str>, inherited: &Home) -> Self {
        Self {
            protofile: protofile
                .map(normalize_protofile)
                .unwrap_or_else(|| inherited.protofile.clone()),
            package: match package {
                Some(pkg) => Some(pkg).filter(|p| !p.is_empty()).map(str::to_string),
                None => inherited.package.clone(),
            },
        }
    }
}

/// Comment text; absent and null comments are empty
pub fn comment_text(value: &Value, subject: Subject<'_>, problems: &mut Vec<Problem>) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => {
            problems.push(subject.wrong_type("comment", other));
            String::new()
        }
    }
}

/// Options object whose values must be bools or strings
pub fn option_map(value: &Value, subject: Subject<'_>, problems: &mut Vec<Problem>) -> ProtoOptions {
    let mut options = ProtoOptions::new();
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::Bool(b) => {
                        options.insert(key.clone(), OptionValue::Bool(*b));
                    }
                    Value::String(s) => {
                        options.insert(key.clone(), OptionValue::Str(s.clone()));
                    }
                    other => problems.push(subject.wrong_type("options", other)),
                }
            }
        }
        other => problems.push(subject.wrong_type("options", other)),
    }
    options
}

/// Option lines (`key = value`) as attached to services and methods
pub fn option_lines(lines: &[String], subject: Subject<'_>, problems: &mut Vec<Problem>) -> ProtoOptions {
    let mut options = ProtoOptions::new();
    for line in lines {
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
                options.insert(key.trim().to_string(), OptionValue::parse(value));
            }
            _ => problems.push(subject.wrong_type("options", format!("\"{}\"", line))),
        }
    }
    options
}

/// Oneof group key; must be a string
pub fn oneof_key(value: &Value, subject: Subject<'_>, problems: &mut Vec<Problem>) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        other => {
            problems.push(subject.wrong_type("key", other));
            None
        }
    }
}

fn is_element(ty: &TypeRef) -> bool {
    matches!(ty, TypeRef::Scalar(_) | TypeRef::Named(_))
}

/// Parses and shape-checks a declared field type
pub fn check_type(ty: Option<&str>, field: &str) -> Result<TypeRef, Problem> {
    let Some(raw) = ty else {
        return Err(Problem::type_error(format!(
            "Field \"{}\" has no type Annotation",
            field
        )));
    };
    let Some(parsed) = TypeRef::parse(raw) else {
        return Err(Problem::type_error(format!(
            "Field \"{}\" is not a type. Found {}",
            field, raw
        )));
    };

    match &parsed {
        TypeRef::List(elem) if !is_element(elem) => Err(Problem::type_error(format!(
            "Field \"{}\" type is not allowed. Found {}",
            field, parsed
        ))),
        TypeRef::Map(key, _) if !matches!(**key, TypeRef::Scalar(s) if s.is_map_key()) => {
            Err(Problem::type_error(format!(
                "Field \"{}\" is a dict with not allowed key type. Found \"{}\" as dict key",
                field, key
            )))
        }
        TypeRef::Map(_, value) if !is_element(value) => Err(Problem::type_error(format!(
            "Field \"{}\" type is not allowed. Found {}",
            field, parsed
        ))),
        _ => Ok(parsed),
    }
}

/// Resolves named types of a checked [`TypeRef`] against the schema.
///
/// A referenced type lives in its own home when it declares one and in
/// `inherited` otherwise.
pub fn resolve_type(
    ty: &TypeRef,
    field: &str,
    schema: &Schema,
    inherited: &Home,
) -> Result<FieldType, Problem> {
    match ty {
        TypeRef::Scalar(s) => Ok(FieldType::Scalar(*s)),
        TypeRef::Named(name) => {
            let decl = schema.get(name).ok_or_else(|| {
                Problem::type_error(format!(
                    "Field \"{}\" type is not allowed. Found {}",
                    field, name
                ))
            })?;
            Ok(FieldType::Named(named_type(decl, inherited)))
        }
        TypeRef::List(elem) => Ok(FieldType::Repeated(Box::new(resolve_type(
            elem, field, schema, inherited,
        )?))),
        TypeRef::Map(key, value) => {
            let TypeRef::Scalar(key) = **key else {
                return Err(Problem::type_error(format!(
                    "Field \"{}\" is a dict with not allowed key type. Found \"{}\" as dict key",
                    field, key
                )));
            };
            Ok(FieldType::Map(
                key,
                Box::new(resolve_type(value, field, schema, inherited)?),
            ))
        }
    }
}

/// Reference to a declared type as seen from `inherited`
pub fn named_type(decl: &TypeDecl, inherited: &Home) -> NamedType {
    let home = Home::of(decl, inherited);
    NamedType {
        name: decl.name().to_string(),
        kind: if decl.is_message() {
            NamedKind::Message
        } else {
            NamedKind::Enum
        },
        protofile: home.protofile,
        package: home.package,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{EnumDecl, MessageDecl};
    use crate::error::ProblemKind;
    use crate::model::Scalar;
    use serde_json::json;

    #[test]
    fn test_comment_rules() {
        let mut problems = Vec::new();
        assert_eq!(comment_text(&json!("hi"), Subject::field("a"), &mut problems), "hi");
        assert_eq!(comment_text(&Value::Null, Subject::field("a"), &mut problems), "");
        assert!(problems.is_empty());

        comment_text(&json!(3.5), Subject::field("a"), &mut problems);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::Type);
        assert!(problems[0].message.contains("comment"));
    }

    #[test]
    fn test_option_rules() {
        let mut problems = Vec::new();
        let opts = option_map(
            &json!({"deprecated": true, "json_name": "x", "bad": 3}),
            Subject::field("a"),
            &mut problems,
        );
        assert_eq!(opts.len(), 2);
        assert_eq!(problems.len(), 1);

        option_map(&json!(["x"]), Subject::class("A"), &mut problems);
        assert_eq!(problems.len(), 2);
        assert!(problems[1].message.starts_with("Class \"A\" options"));
    }

    #[test]
    fn test_option_lines() {
        let mut problems = Vec::new();
        let opts = option_lines(
            &["deprecated = true".to_string(), "broken".to_string()],
            Subject::method("get"),
            &mut problems,
        );
        assert_eq!(opts.get("deprecated"), Some(&OptionValue::Bool(true)));
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn test_oneof_key_must_be_string() {
        let mut problems = Vec::new();
        assert_eq!(oneof_key(&json!("k"), Subject::field("a"), &mut problems), Some("k".into()));
        assert_eq!(oneof_key(&json!(1), Subject::field("a"), &mut problems), None);
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn test_check_type_shapes() {
        assert!(check_type(Some("list<int32>"), "a").is_ok());
        assert!(check_type(Some("map<string, User>"), "a").is_ok());
        assert!(check_type(None, "a").unwrap_err().message.contains("no type Annotation"));
        assert!(check_type(Some("list<list<int>>"), "a").is_err());
        assert!(check_type(Some("list<map<str, int>>"), "a").is_err());
        assert!(check_type(Some("map<str, list<int>>"), "a").is_err());
        assert!(check_type(Some("map<bytes, int>"), "a")
            .unwrap_err()
            .message
            .contains("not allowed key type"));
        assert!(check_type(Some("map<float, int>"), "a").is_err());
        assert!(check_type(Some("map<User, int>"), "a").is_err());
    }

    #[test]
    fn test_resolve_type_homes() {
        let schema = Schema::new()
            .with(MessageDecl::new("User").protofile("users").package("acme"))
            .with(EnumDecl::new("Role"));
        let home = Home::new("main", Some("app"));

        let user = resolve_type(&TypeRef::Named("User".into()), "u", &schema, &home).unwrap();
        let FieldType::Named(user) = user else { panic!("expected named type") };
        assert_eq!(user.protofile, "users.proto");
        assert_eq!(user.package.as_deref(), Some("acme"));

        let roles = check_type(Some("map<str, Role>"), "r").unwrap();
        let roles = resolve_type(&roles, "r", &schema, &home).unwrap();
        let FieldType::Map(Scalar::String, value) = roles else { panic!("expected map") };
        let FieldType::Named(role) = *value else { panic!("expected named value") };
        assert_eq!(role.kind, NamedKind::Enum);
        assert_eq!(role.protofile, "main.proto");
        assert_eq!(role.package.as_deref(), Some("app"));

        assert!(resolve_type(&TypeRef::Named("Ghost".into()), "g", &schema, &home).is_err());
    }
}
