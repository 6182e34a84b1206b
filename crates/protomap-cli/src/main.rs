//! protomap - Generate Protocol Buffer definitions from declaration manifests
//!
//! This tool reads JSON manifests describing services and message types,
//! validates them and writes the resulting `.proto` source files.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use protomap_core::descriptor::{to_file_descriptors, verify};
use protomap_core::render::walk;
use protomap_core::{
    compile_service, make_service_block, CompileConfig, Manifest, NameCase, Protobuilder, Renderer,
    RendererConfig, StatsWriter,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Generate Protocol Buffer definitions from declaration manifests
#[derive(Parser, Debug)]
#[command(name = "protomap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Input and output flags shared by every subcommand
#[derive(Args, Debug)]
struct Common {
    #[command(flatten)]
    input: InputMode,

    /// Output directory for generated .proto files
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Dry run - don't write files, just show what would be generated
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files with differing content
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single manifest
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of manifests (*.json)
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile services through the validator and setter passes
    Services(ServicesArgs),
    /// Build message, enum and service blocks into proto files
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct ServicesArgs {
    #[command(flatten)]
    common: Common,

    /// Case applied to service and method names (snake, camel, pascal)
    #[arg(long, default_value = "none")]
    name_case: String,

    /// Maximum comment line width
    #[arg(long, default_value = "80")]
    comment_width: usize,

    /// Keep comments that already are proto comments
    #[arg(long)]
    keep_comments: bool,

    /// Prefix stripped from import paths
    #[arg(long)]
    proto_root: Option<String>,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    #[command(flatten)]
    common: Common,

    /// Check the generated files by building a descriptor pool
    #[arg(long)]
    verify: bool,
}

/// Counts what happened to each generated file
#[derive(Debug, Default)]
struct WriteStats {
    written: usize,
    unchanged: usize,
    skipped: usize,
}

impl WriteStats {
    fn print_summary(&self) {
        info!(
            "Summary: {} written, {} unchanged, {} skipped",
            self.written, self.unchanged, self.skipped
        );
    }
}

/// Outcome of writing one file
#[derive(Debug, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    Unchanged,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Command::Services(args) => {
            let manifest = load_input(&args.common.input)?;
            let files = generate_services(&manifest, args)?;
            emit(&args.common, cli.verbose, files)
        }
        Command::Schema(args) => {
            let manifest = load_input(&args.common.input)?;
            let files = generate_schema(&manifest, args)?;
            emit(&args.common, cli.verbose, files)
        }
    }
}

/// Loads the manifest(s) named by the input mode
fn load_input(input: &InputMode) -> Result<Manifest> {
    if let Some(ref file) = input.file {
        if !file.is_file() {
            bail!("Input file does not exist: {}", file.display());
        }
        load_manifest(file)
    } else if let Some(ref directory) = input.directory {
        load_directory(directory)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    trace!("Reading {}", path.display());
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))
}

/// Merges every manifest found below `directory`
fn load_directory(directory: &Path) -> Result<Manifest> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }
    info!("Scanning directory: {}", directory.display());

    let mut manifest = Manifest::default();
    let mut loaded = 0;
    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_manifest(path) {
            continue;
        }
        debug!("Loading manifest: {}", path.display());
        manifest.merge(load_manifest(path)?);
        loaded += 1;
    }

    if loaded == 0 {
        warn!("No manifests found in {}", directory.display());
    }
    info!("Loaded {} manifests", loaded);
    Ok(manifest)
}

/// True for visible `*.json` files
fn is_manifest(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    let json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    !hidden && json
}

/// Compiles every service; returns `(relative path, content)` pairs
fn generate_services(manifest: &Manifest, args: &ServicesArgs) -> Result<Vec<(String, String)>> {
    let mut config = CompileConfig::new()
        .name_case(NameCase::parse(&args.name_case))
        .max_comment_width(args.comment_width)
        .always_format(!args.keep_comments);
    if let Some(ref root) = args.proto_root {
        config = config.proto_root(root.clone());
    }

    match compile_service(&manifest.services_by_package(), &config) {
        Ok(compiled) => Ok(compiled
            .iter()
            .map(|file| (file.qual_name(), file.content.to_string()))
            .collect()),
        Err(err) => {
            for ctx in err.failed() {
                eprintln!("{}", ctx);
            }
            Err(err).context("Service compilation failed")
        }
    }
}

/// Builds services and declared types into block files
fn generate_schema(manifest: &Manifest, args: &SchemaArgs) -> Result<Vec<(String, String)>> {
    let schema = manifest.schema();
    let mut builder = Protobuilder::new();

    for service in &manifest.services {
        let block = make_service_block(service, &schema)
            .with_context(|| format!("Failed to build service: {}", service.name))?;
        builder
            .add_service(block, &schema)
            .with_context(|| format!("Failed to register service: {}", service.name))?;
    }
    for decl in schema.iter().filter(|d| d.protofile().is_some()) {
        builder
            .add_message(decl.name(), &schema)
            .with_context(|| format!("Failed to register type: {}", decl.name()))?;
    }

    let files = builder.build();
    let mut stats = StatsWriter::default();
    walk(&mut stats, &files).context("Failed to collect statistics")?;
    info!(
        "Built {} files: {} messages, {} enums, {} services, {} methods, {} fields",
        stats.file_count,
        stats.message_count,
        stats.enum_count,
        stats.service_count,
        stats.method_count,
        stats.field_count
    );

    if args.verify {
        let descriptors = to_file_descriptors(&files)?;
        let pool = verify(&descriptors).context("Generated files do not form a valid schema")?;
        info!("Verified {} files", pool.files().len());
    }

    Ok(builder
        .render(&Renderer::new(RendererConfig::default()))
        .into_iter()
        .collect())
}

/// Writes or prints every generated file
fn emit(common: &Common, verbose: u8, files: Vec<(String, String)>) -> Result<()> {
    let mut stats = WriteStats::default();
    for (name, content) in files {
        let output_path = common.output.join(&name);
        if common.dry_run {
            println!("Would write: {}", output_path.display());
            if verbose > 0 {
                println!("---");
                println!("{}", content);
                println!("---");
            }
            continue;
        }
        match write_proto_file(&output_path, &content, common.force) {
            Ok(WriteOutcome::Written) => {
                println!("Wrote {}", output_path.display());
                stats.written += 1;
            }
            Ok(WriteOutcome::Unchanged) => {
                debug!("Unchanged: {}", output_path.display());
                stats.unchanged += 1;
            }
            Err(e) => {
                error!("Failed to write {}: {:#}", output_path.display(), e);
                stats.skipped += 1;
            }
        }
    }

    if !common.dry_run {
        stats.print_summary();
        if stats.skipped > 0 {
            bail!("{} files were not written", stats.skipped);
        }
    }
    Ok(())
}

/// Short content digest (first 8 chars of blake3)
fn content_hash(content: &[u8]) -> String {
    let hash = blake3::hash(content);
    hash.to_hex()[..8].to_string()
}

/// Writes a proto file; identical existing content is left alone
fn write_proto_file(output_path: &Path, content: &str, force: bool) -> Result<WriteOutcome> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if output_path.exists() {
        let existing = fs::read(output_path)
            .with_context(|| format!("Failed to read file: {}", output_path.display()))?;
        if blake3::hash(&existing) == blake3::hash(content.as_bytes()) {
            return Ok(WriteOutcome::Unchanged);
        }
        if !force {
            bail!(
                "File already exists with different content (hash: {}): {} (use --force to overwrite)",
                content_hash(&existing),
                output_path.display()
            );
        }
    }

    fs::write(output_path, content)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;
    Ok(WriteOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
        "services": [{
            "name": "Users",
            "module": "users",
            "package": "acme",
            "methods": [{
                "name": "get",
                "requests": [{"basetype": "Query", "proto_path": "users.proto"}],
                "response": {"basetype": "User", "proto_path": "users.proto"}
            }]
        }]
    }"#;

    fn common() -> Common {
        Common {
            input: InputMode {
                file: None,
                directory: None,
            },
            output: PathBuf::from("."),
            dry_run: true,
            force: false,
        }
    }

    #[test]
    fn test_write_proto_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("acme/users.proto");

        assert_eq!(write_proto_file(&path, "a", false).unwrap(), WriteOutcome::Written);
        assert_eq!(write_proto_file(&path, "a", false).unwrap(), WriteOutcome::Unchanged);

        let err = write_proto_file(&path, "b", false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "a");

        assert_eq!(write_proto_file(&path, "b", true).unwrap(), WriteOutcome::Written);
        assert_eq!(fs::read_to_string(&path).unwrap(), "b");
    }

    #[test]
    fn test_content_hash() {
        let hash1 = content_hash(b"hello");
        let hash2 = content_hash(b"hello");
        let hash3 = content_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 8);
    }

    #[test]
    fn test_is_manifest() {
        assert!(is_manifest(Path::new("/tmp/services.json")));
        assert!(is_manifest(Path::new("/tmp/SERVICES.JSON")));
        assert!(!is_manifest(Path::new("/tmp/.hidden.json")));
        assert!(!is_manifest(Path::new("/tmp/notes.txt")));
    }

    #[test]
    fn test_load_directory_merges_manifests() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.json"), MANIFEST).unwrap();
        fs::create_dir(temp_dir.path().join("nested")).unwrap();
        fs::write(temp_dir.path().join("nested/b.json"), MANIFEST).unwrap();
        fs::write(temp_dir.path().join(".skip.json"), "not json").unwrap();
        fs::write(temp_dir.path().join("readme.md"), "not json").unwrap();

        let manifest = load_directory(temp_dir.path()).unwrap();
        assert_eq!(manifest.services.len(), 2);
    }

    #[test]
    fn test_generate_services() {
        let manifest: Manifest = serde_json::from_str(MANIFEST).unwrap();
        let args = ServicesArgs {
            common: common(),
            name_case: "pascal".to_string(),
            comment_width: 80,
            keep_comments: false,
            proto_root: None,
        };

        let files = generate_services(&manifest, &args).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "acme/users.proto");
        assert!(files[0].1.contains("rpc Get(Query) returns (User);"));
    }

    #[test]
    fn test_generate_services_reports_failure() {
        let mut manifest: Manifest = serde_json::from_str(MANIFEST).unwrap();
        manifest.services[0].name = "bad name".to_string();
        let args = ServicesArgs {
            common: common(),
            name_case: "none".to_string(),
            comment_width: 80,
            keep_comments: false,
            proto_root: None,
        };

        assert!(generate_services(&manifest, &args).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
