//! Schema model: field types and blocks.
//!
//! - [`types`]: scalars, declared type expressions and resolved field types
//! - [`block`]: fields, methods and the [`Block`] tree built from declarations

pub mod block;
pub mod types;

pub use block::{
    format_option, normalize_protofile, Block, BlockItem, BlockType, Field, Method, OptionValue,
    ProtoOptions, ReservedSet,
};
pub use types::{FieldType, NamedKind, NamedType, Scalar, TypeRef};
