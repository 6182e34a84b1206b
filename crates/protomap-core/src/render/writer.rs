//! Extensible block visitors.
//!
//! [`walk`] drives a [`ProtoWriter`] over a set of block files, calling one
//! method per element.

use crate::model::{Block, BlockItem, BlockType, Field, Method};
use crate::protobuilder::ProtoBlocks;
use std::fmt::Result;

/// Trait for visiting proto elements.
///
/// Every method defaults to a no-op; implement the ones you need.
///
/// # Example
///
/// ```ignore
/// use protomap_core::render::{walk, ProtoWriter};
///
/// struct Names(Vec<String>);
///
/// impl ProtoWriter for Names {
///     fn write_message(&mut self, block: &Block) -> Result {
///         self.0.push(block.name.clone());
///         Ok(())
///     }
/// }
/// ```
pub trait ProtoWriter {
    /// Visit a file
    fn write_file(&mut self, file: &ProtoBlocks) -> Result {
        let _ = file;
        Ok(())
    }

    /// Visit a message block
    fn write_message(&mut self, block: &Block) -> Result {
        let _ = block;
        Ok(())
    }

    /// Visit an enum block
    fn write_enum(&mut self, block: &Block) -> Result {
        let _ = block;
        Ok(())
    }

    /// Visit a oneof block
    fn write_oneof(&mut self, block: &Block) -> Result {
        let _ = block;
        Ok(())
    }

    /// Visit a service block
    fn write_service(&mut self, block: &Block) -> Result {
        let _ = block;
        Ok(())
    }

    /// Visit a message field or enum member
    fn write_field(&mut self, field: &Field) -> Result {
        let _ = field;
        Ok(())
    }

    /// Visit a service method
    fn write_method(&mut self, method: &Method) -> Result {
        let _ = method;
        Ok(())
    }
}

/// A no-op writer
pub struct NullWriter;

impl ProtoWriter for NullWriter {}

/// A writer that counts elements
#[derive(Debug, Default)]
pub struct StatsWriter {
    /// Number of files
    pub file_count: usize,
    /// Number of messages
    pub message_count: usize,
    /// Number of fields and enum members
    pub field_count: usize,
    /// Number of enums
    pub enum_count: usize,
    /// Number of services
    pub service_count: usize,
    /// Number of methods
    pub method_count: usize,
}

impl ProtoWriter for StatsWriter {
    fn write_file(&mut self, _file: &ProtoBlocks) -> Result {
        self.file_count += 1;
        Ok(())
    }

    fn write_message(&mut self, _block: &Block) -> Result {
        self.message_count += 1;
        Ok(())
    }

    fn write_enum(&mut self, _block: &Block) -> Result {
        self.enum_count += 1;
        Ok(())
    }

    fn write_service(&mut self, _block: &Block) -> Result {
        self.service_count += 1;
        Ok(())
    }

    fn write_field(&mut self, _field: &Field) -> Result {
        self.field_count += 1;
        Ok(())
    }

    fn write_method(&mut self, _method: &Method) -> Result {
        self.method_count += 1;
        Ok(())
    }
}

fn walk_block<W: ProtoWriter + ?Sized>(writer: &mut W, block: &Block) -> Result {
    match block.block_type {
        BlockType::Message => writer.write_message(block)?,
        BlockType::Enum => writer.write_enum(block)?,
        BlockType::Oneof => writer.write_oneof(block)?,
        BlockType::Service => writer.write_service(block)?,
    }
    for item in block {
        match item {
            BlockItem::Field(field) => writer.write_field(field)?,
            BlockItem::Method(method) => writer.write_method(method)?,
            BlockItem::Block(nested) => walk_block(writer, nested)?,
        }
    }
    Ok(())
}

/// Visits every file, block and item in order
pub fn walk<W: ProtoWriter + ?Sized>(writer: &mut W, files: &[ProtoBlocks]) -> Result {
    for file in files {
        writer.write_file(file)?;
        for block in &file.blocks {
            walk_block(writer, block)?;
        }
    }
    Ok(())
}
