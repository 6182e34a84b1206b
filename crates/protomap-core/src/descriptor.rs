//! Descriptor export.
//!
//! Converts [`ProtoBlocks`] files into `prost_types` descriptors so they can
//! be checked by building a [`DescriptorPool`], the same way `protoc` would
//! link them.

use crate::error::{Error, Result};
use crate::model::{Block, BlockItem, BlockType, Field, FieldType, NamedKind, Scalar};
use crate::protobuilder::ProtoBlocks;
use bytes::BytesMut;
use prost::Message;
use prost_reflect::DescriptorPool;
use prost_types::descriptor_proto::ReservedRange;
use prost_types::enum_descriptor_proto::EnumReservedRange;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    OneofDescriptorProto, ServiceDescriptorProto,
};
use tracing::debug;

fn scalar_type(scalar: Scalar) -> Type {
    match scalar {
        Scalar::Double => Type::Double,
        Scalar::Float => Type::Float,
        Scalar::Int32 => Type::Int32,
        Scalar::Int64 => Type::Int64,
        Scalar::Uint32 => Type::Uint32,
        Scalar::Uint64 => Type::Uint64,
        Scalar::Sint32 => Type::Sint32,
        Scalar::Sint64 => Type::Sint64,
        Scalar::Fixed32 => Type::Fixed32,
        Scalar::Fixed64 => Type::Fixed64,
        Scalar::Sfixed32 => Type::Sfixed32,
        Scalar::Sfixed64 => Type::Sfixed64,
        Scalar::Bool => Type::Bool,
        Scalar::String => Type::String,
        Scalar::Bytes => Type::Bytes,
    }
}

fn number(n: i64, owner: &str) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::descriptor_build(format!("number {} of {} out of range", n, owner)))
}

/// `my_field` → `MyFieldEntry`
fn map_entry_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len() + 5);
    let mut upper = true;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            name.extend(c.to_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name.push_str("Entry");
    name
}

/// Sets type and type name of a singular field
fn set_type(field: &mut FieldDescriptorProto, ftype: &FieldType) {
    match ftype {
        FieldType::Scalar(s) => field.set_type(scalar_type(*s)),
        FieldType::Named(named) => {
            field.set_type(match named.kind {
                NamedKind::Message => Type::Message,
                NamedKind::Enum => Type::Enum,
            });
            field.type_name = Some(named.full_name());
        }
        // Nested collections are rejected when blocks are built
        FieldType::Repeated(inner) | FieldType::Map(_, inner) => set_type(field, inner),
    }
}

struct MessageBuilder<'a> {
    scope: String,
    proto: DescriptorProto,
    block: &'a Block,
}

impl<'a> MessageBuilder<'a> {
    fn new(block: &'a Block) -> Self {
        let scope = match block.package.as_deref() {
            Some(pkg) => format!(".{}.{}", pkg, block.name),
            None => format!(".{}", block.name),
        };
        Self {
            scope,
            proto: DescriptorProto {
                name: Some(block.name.clone()),
                ..Default::default()
            },
            block,
        }
    }

    fn add_field(&mut self, field: &Field, oneof_index: Option<i32>) -> Result<()> {
        let Some(ftype) = &field.ftype else {
            return Err(Error::descriptor_build(format!(
                "field \"{}\" of {} has no type",
                field.name, self.block.name
            )));
        };
        let mut proto = FieldDescriptorProto {
            name: Some(field.name.clone()),
            number: Some(number(field.number, &self.block.name)?),
            oneof_index,
            ..Default::default()
        };

        match ftype {
            FieldType::Map(key, value) => {
                let entry = map_entry_name(&field.name);
                let mut key_field = FieldDescriptorProto {
                    name: Some("key".into()),
                    number: Some(1),
                    ..Default::default()
                };
                key_field.set_label(Label::Optional);
                key_field.set_type(scalar_type(*key));
                let mut value_field = FieldDescriptorProto {
                    name: Some("value".into()),
                    number: Some(2),
                    ..Default::default()
                };
                value_field.set_label(Label::Optional);
                set_type(&mut value_field, value);

                self.proto.nested_type.push(DescriptorProto {
                    name: Some(entry.clone()),
                    field: vec![key_field, value_field],
                    options: Some(MessageOptions {
                        map_entry: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
                proto.set_label(Label::Repeated);
                proto.set_type(Type::Message);
                proto.type_name = Some(format!("{}.{}", self.scope, entry));
            }
            FieldType::Repeated(_) => {
                proto.set_label(Label::Repeated);
                set_type(&mut proto, ftype);
            }
            _ => {
                proto.set_label(Label::Optional);
                set_type(&mut proto, ftype);
            }
        }
        self.proto.field.push(proto);
        Ok(())
    }

    fn build(mut self) -> Result<DescriptorProto> {
        for item in self.block {
            match item {
                BlockItem::Field(field) => self.add_field(field, None)?,
                BlockItem::Block(oneof) if oneof.block_type == BlockType::Oneof => {
                    let index = i32::try_from(self.proto.oneof_decl.len())
                        .map_err(|_| Error::descriptor_build("too many oneofs"))?;
                    self.proto.oneof_decl.push(OneofDescriptorProto {
                        name: Some(oneof.name.clone()),
                        ..Default::default()
                    });
                    for member in oneof {
                        if let BlockItem::Field(field) = member {
                            self.add_field(field, Some(index))?;
                        }
                    }
                }
                other => {
                    return Err(Error::invalid_block(
                        &self.block.name,
                        "message",
                        format!("unexpected item \"{}\"", other.name()),
                    ))
                }
            }
        }

        for reservation in &self.block.reserved.numbers {
            let (lo, hi) = reservation.bounds();
            // Message reserved ranges are end-exclusive
            let end = hi.checked_add(1).ok_or_else(|| {
                Error::descriptor_build(format!("reserved number {} of {} out of range", hi, self.block.name))
            })?;
            self.proto.reserved_range.push(ReservedRange {
                start: Some(number(lo, &self.block.name)?),
                end: Some(number(end, &self.block.name)?),
            });
        }
        self.proto.reserved_name = self.block.reserved.names.clone();
        Ok(self.proto)
    }
}

fn enum_descriptor(block: &Block) -> Result<EnumDescriptorProto> {
    let mut proto = EnumDescriptorProto {
        name: Some(block.name.clone()),
        reserved_name: block.reserved.names.clone(),
        ..Default::default()
    };
    for item in block {
        if let BlockItem::Field(member) = item {
            proto.value.push(EnumValueDescriptorProto {
                name: Some(member.name.clone()),
                number: Some(number(member.number, &block.name)?),
                ..Default::default()
            });
        }
    }
    for reservation in &block.reserved.numbers {
        let (lo, hi) = reservation.bounds();
        // Enum reserved ranges are inclusive
        proto.reserved_range.push(EnumReservedRange {
            start: Some(number(lo, &block.name)?),
            end: Some(number(hi, &block.name)?),
        });
    }
    Ok(proto)
}

fn service_descriptor(block: &Block) -> ServiceDescriptorProto {
    let method = block
        .iter()
        .filter_map(|item| match item {
            BlockItem::Method(m) => Some(MethodDescriptorProto {
                name: Some(m.name.clone()),
                input_type: Some(m.request_type.full_name()),
                output_type: Some(m.response_type.full_name()),
                client_streaming: Some(m.request_stream),
                server_streaming: Some(m.response_stream),
                ..Default::default()
            }),
            _ => None,
        })
        .collect();
    ServiceDescriptorProto {
        name: Some(block.name.clone()),
        method,
        ..Default::default()
    }
}

/// Converts one block file into a file descriptor
pub fn to_file_descriptor(file: &ProtoBlocks) -> Result<FileDescriptorProto> {
    let mut proto = FileDescriptorProto {
        name: Some(file.protofile.clone()),
        package: file.package.clone(),
        dependency: file.imports.iter().cloned().collect(),
        syntax: Some("proto3".to_string()),
        ..Default::default()
    };

    for block in &file.blocks {
        match block.block_type {
            BlockType::Message => proto.message_type.push(MessageBuilder::new(block).build()?),
            BlockType::Enum => proto.enum_type.push(enum_descriptor(block)?),
            BlockType::Service => proto.service.push(service_descriptor(block)),
            BlockType::Oneof => {
                return Err(Error::invalid_block(
                    &block.name,
                    "oneof",
                    "oneof blocks must be nested in a message",
                ))
            }
        }
    }
    Ok(proto)
}

/// Converts every file
pub fn to_file_descriptors(files: &[ProtoBlocks]) -> Result<Vec<FileDescriptorProto>> {
    files.iter().map(to_file_descriptor).collect()
}

/// Links a set of files into a descriptor pool.
///
/// Every dependency must be part of the set.
pub fn verify(files: &[FileDescriptorProto]) -> Result<DescriptorPool> {
    let set = FileDescriptorSet {
        file: files.to_vec(),
    };

    let mut buf = BytesMut::with_capacity(set.encoded_len());
    set.encode(&mut buf).map_err(|e| {
        Error::descriptor_build(format!("failed to encode descriptor set: {}", e))
    })?;

    let pool = DescriptorPool::decode(buf.freeze()).map_err(|e| {
        Error::descriptor_build(format!("failed to decode descriptor pool: {}", e))
    })?;
    debug!(files = files.len(), messages = pool.all_messages().count(), "descriptor pool built");
    Ok(pool)
}
