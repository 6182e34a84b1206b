//! Grouping of blocks into output files.
//!
//! Blocks with a package share one bucket per package; blocks without one
//! get a bucket per protofile. A protofile may belong to a single package
//! (or to none), never to both.

use crate::build::cls_to_blocks;
use crate::build::rules::Home;
use crate::decl::Schema;
use crate::error::{Error, Result};
use crate::model::{Block, BlockItem, NamedType, ProtoOptions};
use crate::render::Renderer;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

const NO_PACKAGE: &str = "NOPACKAGE";

/// Blocks rendered into one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtoBlocks {
    /// Output file name
    pub protofile: String,
    /// Package, if any
    pub package: Option<String>,
    /// File comment
    pub comment: String,
    /// File options
    pub options: ProtoOptions,
    /// Files this one imports
    pub imports: BTreeSet<String>,
    /// Blocks in registration order
    pub blocks: Vec<Block>,
}

impl ProtoBlocks {
    /// Creates an empty file
    pub fn new(protofile: impl Into<String>, package: Option<String>) -> Self {
        Self {
            protofile: protofile.into(),
            package,
            ..Default::default()
        }
    }

    /// True when the file holds a block declared for `protofile`
    pub fn holds_file(&self, protofile: &str) -> bool {
        self.blocks.iter().any(|b| b.protofile == protofile)
    }

    /// Finds a top-level block by name
    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }
}

/// Accumulates the blocks of one bucket
#[derive(Debug, Clone)]
pub struct ProtoBlocksBuilder {
    file: ProtoBlocks,
}

impl ProtoBlocksBuilder {
    /// Creates a builder for an empty file
    pub fn new(protofile: impl Into<String>, package: Option<String>) -> Self {
        Self {
            file: ProtoBlocks::new(protofile, package),
        }
    }

    /// Adds a block; an identical block is ignored, a differing block with
    /// the same name is a conflict
    pub fn add(&mut self, block: Block) -> Result<()> {
        if let Some(existing) = self.file.block(&block.name) {
            if *existing != block {
                return Err(Error::BlockConflict {
                    block: block.name,
                    protofile: self.file.protofile.clone(),
                    package: self.file.package.clone().unwrap_or_default(),
                });
            }
            trace!(block = %block.name, "identical block already registered");
            return Ok(());
        }
        self.file.blocks.push(block);
        Ok(())
    }

    /// The file built so far
    pub fn file(&self) -> &ProtoBlocks {
        &self.file
    }
}

/// Buckets blocks into files
#[derive(Debug, Clone, Default)]
pub struct Protobuilder {
    packs: BTreeMap<String, ProtoBlocksBuilder>,
    files: BTreeMap<String, ProtoBlocksBuilder>,
}

impl Protobuilder {
    /// Creates an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket of `protofile` in `package`, created on first use.
    ///
    /// Fails when the protofile is already registered under another package,
    /// or with and without a package.
    pub fn get_protoblock(
        &mut self,
        protofile: &str,
        package: Option<&str>,
    ) -> Result<&mut ProtoBlocksBuilder> {
        let package = package.filter(|p| !p.is_empty());
        let existing: BTreeSet<&str> = self
            .packs
            .iter()
            .filter(|(_, builder)| builder.file.holds_file(protofile))
            .map(|(pack, _)| pack.as_str())
            .collect();

        match package {
            Some(package) => {
                if !existing.is_empty() && existing.iter().any(|p| *p != package) {
                    return Err(Error::file_conflict(protofile, format!("{:?}", existing), package));
                }
                if self.files.contains_key(protofile) {
                    return Err(Error::file_conflict(protofile, NO_PACKAGE, package));
                }
            }
            None => {
                if !existing.is_empty() {
                    return Err(Error::file_conflict(protofile, format!("{:?}", existing), NO_PACKAGE));
                }
            }
        }

        let (container, key) = match package {
            Some(package) => (&mut self.packs, package),
            None => (&mut self.files, protofile),
        };
        let builder = container.entry(key.to_string()).or_insert_with(|| {
            debug!(protofile, package = package.unwrap_or(""), "new proto bucket");
            ProtoBlocksBuilder::new(protofile, package.map(str::to_string))
        });
        Ok(builder)
    }

    /// Registers a block in its bucket
    pub fn add(&mut self, block: Block) -> Result<()> {
        let package = block.package.clone();
        let protofile = block.protofile.clone();
        self.get_protoblock(&protofile, package.as_deref())?.add(block)
    }

    /// Registers a service block and every type its methods reach
    pub fn add_service(&mut self, service: Block, schema: &Schema) -> Result<()> {
        let mut roots: Vec<NamedType> = Vec::new();
        for item in service.iter() {
            if let BlockItem::Method(method) = item {
                for ty in [&method.request_type, &method.response_type] {
                    if !roots.iter().any(|r| r.name == ty.name) {
                        roots.push(ty.clone());
                    }
                }
            }
        }
        self.add(service)?;

        for root in roots {
            let home = Home::new(&root.protofile, root.package.as_deref());
            for block in cls_to_blocks(&root.name, schema, Some(&home))? {
                self.add(block)?;
            }
        }
        Ok(())
    }

    /// Registers a declared type and every type it reaches
    pub fn add_message(&mut self, root: &str, schema: &Schema) -> Result<()> {
        for block in cls_to_blocks(root, schema, None)? {
            self.add(block)?;
        }
        Ok(())
    }

    fn locate<'a>(&'a self, ty: &'a NamedType) -> &'a str {
        let bucket = match ty.package.as_deref() {
            Some(package) => self.packs.get(package),
            None => self.files.get(&ty.protofile),
        };
        bucket.map_or(ty.protofile.as_str(), |b| b.file.protofile.as_str())
    }

    /// Files with imports resolved; files without a package come first
    pub fn build(&self) -> Vec<ProtoBlocks> {
        self.files
            .values()
            .chain(self.packs.values())
            .map(|builder| {
                let mut file = builder.file.clone();
                for block in &builder.file.blocks {
                    for ty in block.referenced_types() {
                        let target = self.locate(ty);
                        if target != file.protofile {
                            file.imports.insert(target.to_string());
                        }
                    }
                }
                file
            })
            .collect()
    }

    /// Rendered files keyed by output file name
    pub fn render(&self, renderer: &Renderer) -> BTreeMap<String, String> {
        self.build()
            .into_iter()
            .map(|file| {
                let text = renderer.render_blocks_file(&file);
                (file.protofile, text)
            })
            .collect()
    }
}
