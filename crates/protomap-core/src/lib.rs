//! # protomap-core
//!
//! A library for mapping type declarations onto validated Protocol Buffer schemas.
//!
//! This crate provides the core functionality for:
//! - Building indexed message, enum and service blocks from declarations
//! - Grouping blocks into proto files by package
//! - Compiling service declarations through validator and setter passes
//! - Rendering `.proto` source and exporting file descriptors
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`decl`]: Serializable declarations (the input)
//! - [`model`]: Blocks, fields, methods and resolved types
//! - [`build`]: Field numbering and block builders
//! - [`protobuilder`]: File and package bucketing
//! - [`compiler`]: The multi-pass service compiler
//! - [`render`]: Proto text output
//! - [`descriptor`]: `prost-types` export and verification
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protomap_core::{compile_service, CompileConfig, Manifest};
//! use std::fs;
//!
//! let manifest: Manifest = serde_json::from_str(&fs::read_to_string("services.json")?)?;
//!
//! let compiled = compile_service(&manifest.services_by_package(), &CompileConfig::default())?;
//! for file in compiled.iter() {
//!     println!("// {}\n{}", file.qual_name(), file.content);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`compiler::CompilerPass`]: Add validation or rewriting passes
//! - [`compiler::CustomPass`]: Closure-based method checks
//! - [`ProtoWriter`]: Visit rendered block files
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod build;
pub mod compiler;
pub mod decl;
pub mod descriptor;
pub mod error;
pub mod model;
pub mod protobuilder;
pub mod render;

// Re-export primary types for convenience
pub use build::{cls_to_blocks, make_enumblock, make_msgblock, make_service_block};
pub use compiler::{
    compile_service, CompilationError, CompileConfig, CompiledProtos, Compiler, NameCase,
    ProtoPackage,
};
pub use decl::{Manifest, Schema, ServiceDecl, TypeDecl};
pub use error::{Error, Result};
pub use model::{Block, BlockItem, BlockType};
pub use protobuilder::{ProtoBlocks, Protobuilder};
pub use render::{NullWriter, ProtoWriter, Renderer, RendererConfig, StatsWriter};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;
