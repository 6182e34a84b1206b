//! Block builders.
//!
//! Turns declarations into fully indexed, type-checked [`Block`]s:
//!
//! - [`make_msgblock`] / [`make_enumblock`] build one message or enum
//! - [`cls_map`] / [`cls_to_blocks`] discover and build every type
//!   reachable from a root message
//! - [`service::make_service_block`] builds a service of methods
//!
//! A builder never returns a partial block. Every problem found in a
//! declaration is collected into one [`BlockError`].

pub mod indexer;
pub mod rules;
pub mod service;

use crate::decl::{EnumDecl, MessageDecl, Schema, TypeDecl};
use crate::error::{BlockError, Error, Problem, Result};
use crate::model::{Block, BlockItem, BlockType, Field, ProtoOptions, ReservedSet, TypeRef};
use crate::MAX_FIELD_NUMBER;
use indexer::{extract_reserveds, Indexer, GOOGLE_RESERVED};
use rules::{check_type, comment_text, oneof_key, option_map, resolve_type, Home, Subject};
use serde_json::Value;
use tracing::{debug, trace};

pub use indexer::Reservation;
pub use service::{make_method, make_service_block};

fn is_auto_index(index: &Value) -> bool {
    index.is_null() || index.as_i64() == Some(0)
}

/// Checks explicit field numbers against the reserved set, each other and
/// the legal range. Every violation is reported.
pub fn validate_field_indexes(field_indexes: &[(String, Value)], indexer: &Indexer) -> Vec<Problem> {
    let mut problems = Vec::new();

    for (name, index) in field_indexes {
        if index.is_u64() && index.as_i64().is_none() {
            problems.push(Problem::value_error(format!(
                "Field \"{}\" has an index of: \"{}\" which is out of range (from 1 to {})",
                name, index, MAX_FIELD_NUMBER
            )));
            continue;
        }
        let Some(number) = index.as_i64() else {
            problems.push(Problem::type_error(format!(
                "Field \"{}\" has a non integer index: \"{}\"",
                name, index
            )));
            continue;
        };

        if indexer.contains(number) {
            problems.push(Problem::value_error(format!(
                "Field \"{}\" has an index of: \"{}\" which is reserved",
                name, number
            )));
        }

        let shared = field_indexes
            .iter()
            .filter(|(_, other)| other.as_i64() == Some(number))
            .count();
        if shared > 1 {
            problems.push(Problem::value_error(format!(
                "Field \"{}\" has a duplicated index of: \"{}\"",
                name, number
            )));
        }

        if !(1..=i64::from(MAX_FIELD_NUMBER)).contains(&number) {
            problems.push(Problem::value_error(format!(
                "Field \"{}\" has an index of: \"{}\" which is out of range (from 1 to {})",
                name, number, MAX_FIELD_NUMBER
            )));
        }
    }

    problems
}

/// Checks reserved numbers against the legal range `lowest..=highest`
pub fn validate_reserved(reserved: &[Reservation], lowest: i64, highest: i64) -> Vec<Problem> {
    reserved
        .iter()
        .filter_map(|reservation| {
            let (lo, hi) = reservation.bounds();
            if lo >= lowest && hi <= highest {
                return None;
            }
            let shown = match reservation {
                Reservation::Single(n) => n.to_string(),
                Reservation::Range(_) => format!("{} to {}", lo, hi),
            };
            Some(Problem::value_error(format!(
                "Reserved index \"{}\" is out of range (from {} to {})",
                shown, lowest, highest
            )))
        })
        .collect()
}

/// Gives every field still numbered 0 the next free number, depth first
pub fn resolve_indexes(block: &mut Block, indexer: &mut Indexer) {
    for item in block.fields_mut() {
        match item {
            BlockItem::Field(field) if field.number == 0 => field.number = indexer.allocate(),
            BlockItem::Block(nested) => resolve_indexes(nested, indexer),
            _ => {}
        }
    }
}

/// Orders items by field number (oneof groups by their lowest member)
pub fn sort_block(block: &mut Block) {
    for item in block.fields_mut().iter_mut() {
        if let BlockItem::Block(nested) = item {
            sort_block(nested);
        }
    }
    block.fields_mut().sort_by_key(BlockItem::number);
}

/// Builds a message block.
///
/// The message lives in its own protofile/package when it declares one and
/// in `inherited` otherwise; referenced types without their own home follow
/// the message.
pub fn make_msgblock(decl: &MessageDecl, schema: &Schema, inherited: &Home) -> Result<Block> {
    let home = Home::overridden(decl.protofile.as_deref(), decl.package.as_deref(), inherited);
    let mut problems = Vec::new();

    let (reserved_idx, reserved_keys) = extract_reserveds(&decl.reserved);
    problems.extend(validate_reserved(&reserved_idx, 1, i64::from(MAX_FIELD_NUMBER)));
    let header = Subject::class(&decl.name);
    let comment = comment_text(&decl.comment, header, &mut problems);
    let options = option_map(&decl.options, header, &mut problems);

    let mut field_indexes: Vec<(String, Value)> = Vec::new();
    let mut items: Vec<BlockItem> = Vec::new();
    let mut oneofs: Vec<(String, Vec<Field>)> = Vec::new();

    for field in &decl.fields {
        let ftype = match check_type(field.ty.as_deref(), &field.name)
            .and_then(|ty| resolve_type(&ty, &field.name, schema, &home))
        {
            Ok(ftype) => ftype,
            Err(problem) => {
                problems.push(problem);
                continue;
            }
        };

        let subject = Subject::field(&field.name);
        let (fcomment, foptions, index, group) = match &field.spec {
            Some(spec) => (
                comment_text(&spec.comment, subject, &mut problems),
                option_map(&spec.options, subject, &mut problems),
                spec.index.clone(),
                spec.oneof
                    .as_ref()
                    .and_then(|key| oneof_key(key, subject, &mut problems)),
            ),
            None => (String::new(), ProtoOptions::new(), Value::Null, None),
        };

        if !is_auto_index(&index) {
            field_indexes.push((field.name.clone(), index.clone()));
        }

        let built = Field {
            name: field.name.clone(),
            ftype: Some(ftype),
            number: index.as_i64().unwrap_or(0),
            comment: fcomment,
            options: foptions,
        };

        match group {
            Some(key) => match oneofs.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(built),
                None => oneofs.push((key, vec![built])),
            },
            None => items.push(built.into()),
        }
    }

    let mut indexer = Indexer::with_reserved(1, reserved_idx.iter().cloned());
    indexer.reserve(GOOGLE_RESERVED);
    problems.extend(validate_field_indexes(&field_indexes, &indexer));

    BlockError::check(&decl.name, "class", problems)?;

    for (key, members) in oneofs {
        let members = members.into_iter().map(BlockItem::from).collect();
        let group = Block::new(&home.protofile, home.package.clone(), key, BlockType::Oneof, members)?;
        items.push(group.into());
    }

    let reserved = ReservedSet {
        numbers: Indexer::with_reserved(1, reserved_idx).merged(),
        names: reserved_keys,
    };
    let mut block = Block::new(&home.protofile, home.package, &decl.name, BlockType::Message, items)?
        .with_comment(comment)
        .with_options(options)
        .with_reserved(reserved);

    for (_, index) in &field_indexes {
        if let Some(number) = index.as_i64() {
            indexer.reserve(number);
        }
    }
    resolve_indexes(&mut block, &mut indexer);
    sort_block(&mut block);

    debug!(
        block = %block.name,
        protofile = %block.protofile,
        fields = block.len(),
        "built message block"
    );
    Ok(block)
}

/// Builds an enum block; member values must be non-negative integers
pub fn make_enumblock(decl: &EnumDecl, inherited: &Home) -> Result<Block> {
    let home = Home::overridden(decl.protofile.as_deref(), decl.package.as_deref(), inherited);
    let mut problems = Vec::new();
    let mut members = Vec::with_capacity(decl.members.len());

    for member in &decl.members {
        match member.value.as_i64() {
            Some(value) if value >= 0 => members.push(Field::member(&member.name, value).into()),
            Some(value) => problems.push(Problem::value_error(format!(
                "Enum member \"{}\" has a negative value: \"{}\"",
                member.name, value
            ))),
            None => problems.push(Problem::type_error(format!(
                "Enum member \"{}\" has a non integer value: \"{}\"",
                member.name, member.value
            ))),
        }
    }

    let header = Subject::class(&decl.name);
    let comment = comment_text(&decl.comment, header, &mut problems);
    let options = option_map(&decl.options, header, &mut problems);

    let (reserved_idx, reserved_keys) = extract_reserveds(&decl.reserved);
    problems.extend(validate_reserved(&reserved_idx, 0, i64::from(i32::MAX)));

    BlockError::check(&decl.name, "enum", problems)?;

    // Enum values start at 0, so 0 is a reservable number here.
    let reserved = ReservedSet {
        numbers: Indexer::with_reserved(0, reserved_idx).merged(),
        names: reserved_keys,
    };

    let block = Block::new(&home.protofile, home.package, &decl.name, BlockType::Enum, members)?
        .with_comment(comment)
        .with_options(options)
        .with_reserved(reserved);
    debug!(name = %block.name, members = block.len(), "built enum block");
    Ok(block)
}

/// Discovers every type transitively reachable from `root`, each paired
/// with the home it is rendered into.
///
/// Types are visited once by name, so recursive and mutually recursive
/// messages terminate. Names without a declaration are skipped here and
/// reported when the referencing message is built.
pub fn cls_map<'a>(root: &str, schema: &'a Schema, inherited: &Home) -> Result<Vec<(&'a TypeDecl, Home)>> {
    let mut visited = Vec::new();
    visit(root, schema, inherited, &mut visited)?;
    Ok(visited)
}

fn visit<'a>(
    name: &str,
    schema: &'a Schema,
    inherited: &Home,
    visited: &mut Vec<(&'a TypeDecl, Home)>,
) -> Result<()> {
    if visited.iter().any(|(decl, _)| decl.name() == name) {
        return Ok(());
    }
    let decl = schema.get(name).ok_or_else(|| Error::unknown_type(name))?;
    let home = Home::of(decl, inherited);
    trace!(ty = name, protofile = %home.protofile, "discovered type");
    visited.push((decl, home.clone()));

    if let TypeDecl::Message(message) = decl {
        for field in &message.fields {
            let Some(ty) = field.ty.as_deref().and_then(TypeRef::parse) else {
                continue;
            };
            for nested in ty.named_types() {
                if schema.get(nested).is_some() {
                    visit(nested, schema, &home, visited)?;
                }
            }
        }
    }
    Ok(())
}

/// Builds one block per type reachable from `root`.
///
/// Without an `inherited` home the root must declare its own protofile.
pub fn cls_to_blocks(root: &str, schema: &Schema, inherited: Option<&Home>) -> Result<Vec<Block>> {
    let decl = schema.get(root).ok_or_else(|| Error::unknown_type(root))?;
    let root_home = match (inherited, decl.protofile()) {
        (Some(home), _) => Home::of(decl, home),
        (None, Some(protofile)) => Home::new(protofile, decl.package()),
        (None, None) => {
            return Err(Error::MissingProtofile {
                name: root.to_string(),
            })
        }
    };

    cls_map(root, schema, &root_home)?
        .into_iter()
        .map(|(decl, home)| match decl {
            TypeDecl::Message(message) => make_msgblock(message, schema, &home),
            TypeDecl::Enum(enumeration) => make_enumblock(enumeration, &home),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{FieldDecl, FieldSpecDecl, ReservedEntry};
    use crate::error::ProblemKind;
    use crate::model::{FieldType, NamedKind, Scalar};
    use serde_json::json;
    use std::collections::HashSet;

    fn home() -> Home {
        Home::new("main", None)
    }

    fn indexed(index: Value) -> FieldSpecDecl {
        FieldSpecDecl {
            index,
            ..Default::default()
        }
    }

    fn in_oneof(key: &str) -> FieldSpecDecl {
        FieldSpecDecl {
            oneof: Some(json!(key)),
            ..Default::default()
        }
    }

    fn block_error(err: Error) -> BlockError {
        match err {
            Error::Block(err) => err,
            other => panic!("expected block error, got {other:?}"),
        }
    }

    fn numbers(block: &Block) -> Vec<i64> {
        let mut out = Vec::new();
        for item in block {
            match item {
                BlockItem::Field(f) => out.push(f.number),
                BlockItem::Block(b) => out.extend(numbers(b)),
                BlockItem::Method(_) => {}
            }
        }
        out
    }

    #[test]
    fn test_validate_field_indexes() {
        let mut indexer = Indexer::with_reserved(1, [5i64..=7]);
        indexer.reserve(GOOGLE_RESERVED);
        let field_indexes = vec![
            ("a".to_string(), json!(3)),
            ("b".to_string(), json!(3)),
            ("c".to_string(), json!(3)),
            ("d".to_string(), json!(6)),
            ("e".to_string(), json!("x")),
            ("f".to_string(), json!(536_870_912i64)),
            ("g".to_string(), json!(1950)),
            ("h".to_string(), json!(9)),
        ];

        let problems = validate_field_indexes(&field_indexes, &indexer);
        let dupes = problems.iter().filter(|p| p.message.contains("duplicated")).count();
        assert_eq!(dupes, 3);
        assert!(problems.iter().any(|p| p.message.contains("\"d\"") && p.message.contains("reserved")));
        assert!(problems.iter().any(|p| p.kind == ProblemKind::Type && p.message.contains("\"e\"")));
        assert!(problems.iter().any(|p| p.message.contains("\"f\"") && p.message.contains("out of range")));
        assert!(problems.iter().any(|p| p.message.contains("\"g\"") && p.message.contains("reserved")));
        assert!(!problems.iter().any(|p| p.message.contains("\"h\"")));
        assert_eq!(problems.len(), 7);
    }

    #[test]
    fn test_msgblock_assigns_numbers_around_explicit_and_reserved() {
        let decl = MessageDecl::new("User")
            .reserve(ReservedEntry::Index(1))
            .reserve(ReservedEntry::Range([3, 4]))
            .reserve(ReservedEntry::Name("legacy".into()))
            .field(FieldDecl::new("id", "int"))
            .field(FieldDecl::new("name", "str").with_spec(indexed(json!(2))))
            .field(FieldDecl::new("email", "str"))
            .field(FieldDecl::new("tags", "list<str>"));

        let block = make_msgblock(&decl, &Schema::new(), &home()).unwrap();
        let names: Vec<_> = block.iter().map(BlockItem::name).collect();
        assert_eq!(names, vec!["name", "id", "email", "tags"]);
        assert_eq!(numbers(&block), vec![2, 5, 6, 7]);
        assert_eq!(block.reserved_index(), "1,3,4");
        assert_eq!(block.reserved_keys(), "\"legacy\"");
        assert_eq!(block.protofile, "main.proto");
    }

    #[test]
    fn test_msgblock_numbers_are_unique() {
        let mut decl = MessageDecl::new("Wide");
        for i in 0..40 {
            let field = FieldDecl::new(format!("f{i}"), "int32");
            decl = match i % 7 {
                0 => decl.field(field.with_spec(indexed(json!(i + 1)))),
                _ => decl.field(field),
            };
        }
        let block = make_msgblock(&decl, &Schema::new(), &home()).unwrap();
        let nums = numbers(&block);
        let unique: HashSet<_> = nums.iter().collect();
        assert_eq!(unique.len(), 40);
        let mut sorted = nums.clone();
        sorted.sort_unstable();
        assert_eq!(nums, sorted);
    }

    #[test]
    fn test_msgblock_groups_oneofs() {
        let mut decl = MessageDecl::new("Choice");
        for name in ["a", "b", "c", "d"] {
            decl = decl.field(FieldDecl::new(name, "str").with_spec(in_oneof("pick")));
        }
        decl = decl
            .field(FieldDecl::new("x", "int"))
            .field(FieldDecl::new("y", "bool"));

        let block = make_msgblock(&decl, &Schema::new(), &home()).unwrap();
        let groups: Vec<_> = block
            .iter()
            .filter_map(|item| match item {
                BlockItem::Block(b) => Some(b),
                _ => None,
            })
            .collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 4);
        assert_eq!(groups[0].block_type, BlockType::Oneof);
        assert!(groups[0].comment.is_empty());
        assert!(groups[0].options.is_empty());
        assert_eq!(block.len(), 3);
    }

    #[test]
    fn test_msgblock_collects_every_problem() {
        let decl = MessageDecl {
            name: "Broken".into(),
            comment: json!(12),
            fields: vec![
                FieldDecl {
                    name: "untyped".into(),
                    ty: None,
                    spec: None,
                },
                FieldDecl::new("bad_map", "map<bytes, str>"),
                FieldDecl::new("ghost", "Ghost"),
                FieldDecl::new("a", "int").with_spec(indexed(json!(4))),
                FieldDecl::new("b", "int").with_spec(indexed(json!(4))),
                FieldDecl::new("c", "int").with_spec(FieldSpecDecl {
                    options: json!({"deprecated": 1}),
                    ..Default::default()
                }),
            ],
            ..Default::default()
        };

        let err = block_error(make_msgblock(&decl, &Schema::new(), &home()).unwrap_err());
        assert_eq!(err.kind, "class");
        assert_eq!(err.name, "Broken");
        assert_eq!(err.len(), 7);
        assert!(err.to_string().starts_with("7 errors found on class \"Broken\""));
    }

    #[test]
    fn test_msgblock_resolves_nested_types() {
        let schema = Schema::new()
            .with(MessageDecl::new("Address").package("geo"))
            .with(EnumDecl::new("Role").member("ADMIN", 0));
        let decl = MessageDecl::new("User")
            .field(FieldDecl::new("home", "Address"))
            .field(FieldDecl::new("roles", "map<str, Role>"));

        let block = make_msgblock(&decl, &schema, &Home::new("users", Some("acme"))).unwrap();
        let BlockItem::Field(home_field) = &block.fields()[0] else { panic!("expected field") };
        let Some(FieldType::Named(address)) = &home_field.ftype else { panic!("expected named") };
        assert_eq!(address.package.as_deref(), Some("geo"));
        assert_eq!(address.protofile, "users.proto");

        let BlockItem::Field(roles) = &block.fields()[1] else { panic!("expected field") };
        let Some(FieldType::Map(Scalar::String, value)) = &roles.ftype else { panic!("expected map") };
        assert!(matches!(&**value, FieldType::Named(n) if n.kind == NamedKind::Enum));
    }

    #[test]
    fn test_enumblock() {
        let decl = EnumDecl::new("Role").member("USER", 0).member("ADMIN", 1);
        let block = make_enumblock(&decl, &home()).unwrap();
        assert_eq!(block.block_type, BlockType::Enum);
        assert_eq!(numbers(&block), vec![0, 1]);

        let decl = EnumDecl::new("Bad")
            .member("NEG", -1)
            .member("TEXT", "x")
            .member("OK", 2);
        let err = block_error(make_enumblock(&decl, &home()).unwrap_err());
        assert_eq!(err.kind, "enum");
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn test_reserved_numbers_out_of_range() {
        let decl = MessageDecl::new("Req")
            .reserve(ReservedEntry::Index(0))
            .reserve(ReservedEntry::Range([5, i64::MAX]))
            .reserve(ReservedEntry::Range([10, 20]))
            .field(FieldDecl::new("id", "int"));
        let err = block_error(make_msgblock(&decl, &Schema::new(), &home()).unwrap_err());
        assert_eq!(err.len(), 2);
        assert!(err.problems.iter().all(|p| p.kind == ProblemKind::Value));
        assert!(err.problems[0].message.contains("\"0\" is out of range"));
        assert!(err.problems[1].message.contains(&format!("\"5 to {}\"", i64::MAX)));

        let decl = EnumDecl::new("Role")
            .member("USER", 0)
            .reserve(ReservedEntry::Index(0))
            .reserve(ReservedEntry::Range([-3, -1]));
        let err = block_error(make_enumblock(&decl, &home()).unwrap_err());
        assert_eq!(err.len(), 1);
        assert!(err.problems[0].message.contains("\"-3 to -1\""));
    }

    #[test]
    fn test_index_above_i64_is_out_of_range() {
        let field_indexes = vec![("big".to_string(), json!(u64::MAX))];
        let problems = validate_field_indexes(&field_indexes, &Indexer::new(1));
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::Value);
        assert!(problems[0].message.contains("out of range"));
    }

    #[test]
    fn test_cls_map_handles_cycles() {
        let schema = Schema::new()
            .with(MessageDecl::new("Node").protofile("graph").field(FieldDecl::new("next", "Node")).field(FieldDecl::new("edges", "list<Edge>")))
            .with(MessageDecl::new("Edge").field(FieldDecl::new("to", "Node")).field(FieldDecl::new("kind", "Kind")))
            .with(EnumDecl { protofile: Some("kinds".into()), ..EnumDecl::new("Kind") }.member("A", 0));

        let found = cls_map("Node", &schema, &Home::new("graph", None)).unwrap();
        let names: Vec<_> = found.iter().map(|(decl, _)| decl.name()).collect();
        assert_eq!(names, vec!["Node", "Edge", "Kind"]);
        assert_eq!(found[1].1.protofile, "graph.proto");
        assert_eq!(found[2].1.protofile, "kinds.proto");
    }

    #[test]
    fn test_cls_to_blocks() {
        let schema = Schema::new()
            .with(MessageDecl::new("Order").protofile("orders").package("shop").field(FieldDecl::new("items", "list<Item>")))
            .with(MessageDecl::new("Item").field(FieldDecl::new("sku", "str")))
            .with(MessageDecl::new("Loose"));

        let blocks = cls_to_blocks("Order", &schema, None).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.protofile == "orders.proto"));
        assert!(blocks.iter().all(|b| b.package.as_deref() == Some("shop")));

        assert!(matches!(
            cls_to_blocks("Loose", &schema, None),
            Err(Error::MissingProtofile { .. })
        ));
        assert!(matches!(
            cls_to_blocks("Nope", &schema, None),
            Err(Error::UnknownType { .. })
        ));
    }
}
