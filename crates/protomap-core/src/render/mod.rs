//! Proto text rendering.
//!
//! [`Renderer`] turns compiled [`ProtoTemplate`]s and [`ProtoBlocks`] files
//! into `.proto` source. Output goes through an indenting writer over any
//! [`std::fmt::Write`]; the `render_*` methods collect into a `String`.
//!
//! The [`ProtoWriter`] trait is a visitor over block files, used for
//! statistics and alternative outputs.

mod writer;

use crate::compiler::{MethodTemplate, ProtoTemplate, ServiceTemplate};
use crate::model::{format_option, Block, BlockItem, BlockType, Field, Method, ProtoOptions};
use crate::protobuilder::ProtoBlocks;
use std::fmt::Write as FmtWrite;

pub use writer::{walk, NullWriter, ProtoWriter, StatsWriter};

/// Header written on top of compiled service files
pub const GENERATED_HEADER: &str = "/* \"Generated .proto file\" */";

/// Configuration for rendering
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Indentation string (default: 2 spaces)
    pub indent_str: String,
    /// First line of compiled service files
    pub header: String,
    /// Longest comment kept on a single `//` line
    pub comment_width: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            indent_str: "  ".to_string(),
            header: GENERATED_HEADER.to_string(),
            comment_width: 80,
        }
    }
}

impl RendererConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }

    /// Sets the header line
    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    /// Sets the single-line comment width
    pub fn comment_width(mut self, width: usize) -> Self {
        self.comment_width = width;
        self
    }
}

/// Formats a block comment.
///
/// Proto comments pass through (an unclosed `/*` gets closed). Short
/// single lines become `// text`, anything else a ` * ` prefixed block.
pub fn format_block_comment(raw: &str, line_limit: usize) -> String {
    let stripped = raw.trim();
    if stripped.starts_with("//") || (stripped.starts_with("/*") && stripped.ends_with("*/")) {
        return stripped.to_string();
    }
    if stripped.starts_with("/*") {
        return format!("{} */", stripped);
    }
    if !stripped.contains('\n') && stripped.chars().count() <= line_limit {
        return format!("// {}", stripped);
    }
    let body: Vec<String> = stripped
        .lines()
        .map(|line| format!(" * {}", line.trim()))
        .collect();
    format!("/*\n{}\n */", body.join("\n"))
}

/// Renders templates and block files to proto source
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    /// Creates a renderer
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    /// The active configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Renders a compiled service file; a template without services renders
    /// to an empty string
    pub fn render_template(&self, template: &ProtoTemplate) -> String {
        let mut output = String::new();
        self.write_template(&mut output, template)
            .expect("String write cannot fail");
        output
    }

    /// Writes a compiled service file
    pub fn write_template(&self, w: &mut impl FmtWrite, template: &ProtoTemplate) -> std::fmt::Result {
        if template.services.is_empty() {
            return Ok(());
        }
        TextWriter::new(w, &self.config).write_template(template)
    }

    /// Renders a single field, method or nested block as seen from `package`
    pub fn render_item(&self, item: &BlockItem, package: Option<&str>) -> String {
        let mut output = String::new();
        TextWriter::new(&mut output, &self.config)
            .write_item(item, package)
            .expect("String write cannot fail");
        output
    }

    /// Renders a top-level block
    pub fn render_block(&self, block: &Block) -> String {
        let mut output = String::new();
        TextWriter::new(&mut output, &self.config)
            .write_block(block, block.package.as_deref())
            .expect("String write cannot fail");
        output
    }

    /// Renders a whole block file
    pub fn render_blocks_file(&self, file: &ProtoBlocks) -> String {
        let mut output = String::new();
        self.write_blocks_file(&mut output, file)
            .expect("String write cannot fail");
        output
    }

    /// Writes a whole block file
    pub fn write_blocks_file(&self, w: &mut impl FmtWrite, file: &ProtoBlocks) -> std::fmt::Result {
        TextWriter::new(w, &self.config).write_blocks_file(file)
    }
}

/// Indenting proto writer
struct TextWriter<'a, W: FmtWrite> {
    writer: &'a mut W,
    config: &'a RendererConfig,
    indent_level: usize,
}

impl<'a, W: FmtWrite> TextWriter<'a, W> {
    fn new(writer: &'a mut W, config: &'a RendererConfig) -> Self {
        Self {
            writer,
            config,
            indent_level: 0,
        }
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn write_indent(&mut self) -> std::fmt::Result {
        for _ in 0..self.indent_level {
            write!(self.writer, "{}", self.config.indent_str)?;
        }
        Ok(())
    }

    fn writeln(&mut self, s: &str) -> std::fmt::Result {
        self.write_indent()?;
        writeln!(self.writer, "{}", s)
    }

    /// Writes every line of an already formatted comment
    fn write_comment_lines(&mut self, comment: &str) -> std::fmt::Result {
        for line in comment.lines() {
            self.writeln(line)?;
        }
        Ok(())
    }

    fn write_block_comment(&mut self, comment: &str) -> std::fmt::Result {
        if comment.trim().is_empty() {
            return Ok(());
        }
        let formatted = format_block_comment(comment, self.config.comment_width);
        self.write_comment_lines(&formatted)
    }

    fn write_preamble(&mut self, syntax: u32, package: Option<&str>) -> std::fmt::Result {
        writeln!(self.writer, "syntax = \"proto{}\";", syntax)?;
        writeln!(self.writer)?;

        if let Some(package) = package.filter(|p| !p.is_empty()) {
            writeln!(self.writer, "package {};", package)?;
            writeln!(self.writer)?;
        }
        Ok(())
    }

    fn write_imports<'i>(&mut self, imports: impl IntoIterator<Item = &'i String>) -> std::fmt::Result {
        let mut wrote = false;
        for import in imports {
            writeln!(self.writer, "import \"{}\";", import)?;
            wrote = true;
        }
        if wrote {
            writeln!(self.writer)?;
        }
        Ok(())
    }

    fn write_template(&mut self, template: &ProtoTemplate) -> std::fmt::Result {
        writeln!(self.writer, "{}", self.config.header)?;
        self.write_comment_lines(&template.comments)?;
        self.write_preamble(template.syntax, Some(&template.package))?;
        self.write_imports(&template.imports)?;

        if !template.options.is_empty() {
            for line in &template.options {
                writeln!(self.writer, "option {};", line.trim().trim_end_matches(';'))?;
            }
            writeln!(self.writer)?;
        }

        for (i, service) in template.services.iter().enumerate() {
            if i > 0 {
                writeln!(self.writer)?;
            }
            self.write_service_template(service)?;
        }
        Ok(())
    }

    fn write_service_template(&mut self, service: &ServiceTemplate) -> std::fmt::Result {
        if let Some(comment) = service.comments.as_text() {
            self.write_comment_lines(comment)?;
        }
        self.writeln(&format!("service {} {{", service.name))?;
        self.indent();
        for line in &service.options {
            self.writeln(&format!("option {};", line.trim().trim_end_matches(';')))?;
        }
        for method in &service.methods {
            self.write_method_template(method)?;
        }
        self.dedent();
        self.writeln("}")
    }

    fn write_method_template(&mut self, method: &MethodTemplate) -> std::fmt::Result {
        if let Some(comment) = method.comments.as_text() {
            self.write_comment_lines(comment)?;
        }
        let signature = rpc_signature(
            &method.name,
            method.request_str.as_deref().unwrap_or_default(),
            method.request_stream,
            method.response_str.as_deref().unwrap_or_default(),
            method.response_stream,
        );
        if method.options.is_empty() {
            return self.writeln(&format!("{};", signature));
        }
        self.writeln(&format!("{}{{", signature))?;
        self.indent();
        for line in &method.options {
            self.writeln(&format!("option {};", line.trim().trim_end_matches(';')))?;
        }
        self.dedent();
        self.writeln("};")
    }

    fn write_blocks_file(&mut self, file: &ProtoBlocks) -> std::fmt::Result {
        self.write_block_comment(&file.comment)?;
        self.write_preamble(3, file.package.as_deref())?;
        self.write_imports(&file.imports)?;

        if !file.options.is_empty() {
            for (key, value) in &file.options {
                writeln!(self.writer, "option {};", format_option(key, value))?;
            }
            writeln!(self.writer)?;
        }

        for (i, block) in file.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(self.writer)?;
            }
            self.write_block(block, file.package.as_deref())?;
        }
        Ok(())
    }

    fn write_block(&mut self, block: &Block, package: Option<&str>) -> std::fmt::Result {
        self.write_block_comment(&block.comment)?;
        self.writeln(&format!("{} {} {{", block.block_type, block.name))?;
        self.indent();

        for (key, value) in &block.options {
            self.writeln(&format!("option {};", format_option(key, value)))?;
        }
        if block.block_type != BlockType::Oneof {
            if !block.reserved.numbers.is_empty() {
                self.writeln(&format!("reserved {};", block.reserved_index()))?;
            }
            if !block.reserved.names.is_empty() {
                self.writeln(&format!("reserved {};", block.reserved_keys()))?;
            }
        }

        for item in block.iter() {
            self.write_item(item, package)?;
        }

        self.dedent();
        self.writeln("}")
    }

    fn write_item(&mut self, item: &BlockItem, package: Option<&str>) -> std::fmt::Result {
        match item {
            BlockItem::Field(field) => self.write_field(field, package),
            BlockItem::Method(method) => self.write_method(method, package),
            BlockItem::Block(block) => self.write_block(block, package),
        }
    }

    fn write_field(&mut self, field: &Field, package: Option<&str>) -> std::fmt::Result {
        self.write_block_comment(&field.comment)?;
        self.write_indent()?;
        if let Some(ftype) = &field.ftype {
            write!(self.writer, "{} ", ftype.proto_str(package))?;
        }
        write!(self.writer, "{} = {}", field.name, field.number)?;
        write_field_options(&mut *self.writer, &field.options)?;
        writeln!(self.writer, ";")
    }

    fn write_method(&mut self, method: &Method, package: Option<&str>) -> std::fmt::Result {
        self.write_block_comment(&method.comment)?;
        let signature = rpc_signature(
            &method.name,
            &method.request_type.qualified_from(package),
            method.request_stream,
            &method.response_type.qualified_from(package),
            method.response_stream,
        );
        if method.options.is_empty() {
            return self.writeln(&format!("{};", signature));
        }
        self.writeln(&format!("{}{{", signature))?;
        self.indent();
        for (key, value) in &method.options {
            self.writeln(&format!("option {};", format_option(key, value)))?;
        }
        self.dedent();
        self.writeln("};")
    }
}

fn write_field_options(w: &mut impl FmtWrite, options: &ProtoOptions) -> std::fmt::Result {
    if options.is_empty() {
        return Ok(());
    }
    let rendered: Vec<String> = options.iter().map(|(k, v)| format_option(k, v)).collect();
    write!(w, " [{}]", rendered.join(", "))
}

fn rpc_signature(
    name: &str,
    request: &str,
    request_stream: bool,
    response: &str,
    response_stream: bool,
) -> String {
    let stream = |flag: bool| if flag { "stream " } else { "" };
    format!(
        "rpc {}({}{}) returns ({}{})",
        name,
        stream(request_stream),
        request,
        stream(response_stream),
        response
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Comment;
    use crate::decl::{MetaType, MethodDecl, ServiceDecl};
    use crate::model::{FieldType, NamedKind, NamedType, OptionValue, ReservedSet, Scalar};
    use pretty_assertions::assert_eq;

    fn simple_template() -> ProtoTemplate {
        let decl = ServiceDecl::new("simple", "module", "my.package").method(MethodDecl::new(
            "ping",
            MetaType::new("Empty"),
            MetaType::new("Empty"),
        ));
        let mut service = ServiceTemplate::from_decl(0, &decl);
        service.comments = Comment::from("// Simple Service");
        let method = &mut service.methods[0];
        method.comments = Comment::from("// Ping method");
        method.request_str = Some("empty.Empty".into());
        method.response_str = Some("empty.Empty".into());

        let mut template = ProtoTemplate::new("module", "my.package", 3);
        template.comments = "// comment".into();
        template.imports.insert("google/protobuf/empty.proto".into());
        template.services.push(service);
        template
    }

    #[test]
    fn test_render_template() {
        let out = Renderer::default().render_template(&simple_template());
        let expected = r#"/* "Generated .proto file" */
// comment
syntax = "proto3";

package my.package;

import "google/protobuf/empty.proto";

// Simple Service
service simple {
  // Ping method
  rpc ping(empty.Empty) returns (empty.Empty);
}
"#;
        assert_eq!(out, expected);
    }

    #[test]
    fn test_render_method_options_and_streams() {
        let mut template = simple_template();
        let method = &mut template.services[0].methods[0];
        method.options.push("deprecated = true".into());
        method.response_stream = true;

        let out = Renderer::default().render_template(&template);
        assert!(out.contains(
            "  rpc ping(empty.Empty) returns (stream empty.Empty){\n    option deprecated = true;\n  };\n"
        ));
    }

    #[test]
    fn test_render_empty_template() {
        let template = ProtoTemplate::new("module", "pkg", 3);
        assert_eq!(Renderer::default().render_template(&template), "");
    }

    #[test]
    fn test_format_block_comment() {
        assert_eq!(format_block_comment("// done", 80), "// done");
        assert_eq!(format_block_comment("/* done */", 80), "/* done */");
        assert_eq!(format_block_comment("/* open", 80), "/* open */");
        assert_eq!(format_block_comment(" short ", 80), "// short");
        assert_eq!(
            format_block_comment("first\n  second", 80),
            "/*\n * first\n * second\n */"
        );
        assert_eq!(format_block_comment("abcdef", 3), "/*\n * abcdef\n */");
    }

    #[test]
    fn test_render_block() {
        let color = NamedType {
            name: "Color".into(),
            kind: NamedKind::Enum,
            protofile: "colors.proto".into(),
            package: Some("paint".into()),
        };
        let mut name = Field::new("name", FieldType::Scalar(Scalar::String), 1);
        name.options.insert("deprecated".into(), OptionValue::Bool(true));
        name.comment = "Display name".into();
        let tags = Field::new(
            "tags",
            FieldType::Repeated(Box::new(FieldType::Scalar(Scalar::String))),
            2,
        );
        let oneof = Block::new(
            "item",
            None,
            "choice",
            BlockType::Oneof,
            vec![
                Field::new("color", FieldType::Named(color), 3).into(),
                Field::new("code", FieldType::Scalar(Scalar::Int32), 4).into(),
            ],
        )
        .unwrap();

        let block = Block::new(
            "item",
            None,
            "Item",
            BlockType::Message,
            vec![name.into(), tags.into(), oneof.into()],
        )
        .unwrap()
        .with_reserved(ReservedSet {
            numbers: vec![5i64.into(), (7i64..=9i64).into()],
            names: vec!["old".into()],
        });

        let expected = r#"message Item {
  reserved 5,7 to 9;
  reserved "old";
  // Display name
  string name = 1 [deprecated = true];
  repeated string tags = 2;
  oneof choice {
    paint.Color color = 3;
    int32 code = 4;
  }
}
"#;
        assert_eq!(Renderer::default().render_block(&block), expected);
    }

    #[test]
    fn test_render_enum_item() {
        let member = BlockItem::Field(Field::member("ADMIN", 0));
        assert_eq!(Renderer::default().render_item(&member, None), "ADMIN = 0;\n");
    }

    #[test]
    fn test_render_blocks_file() {
        let block = Block::new(
            "users",
            Some("acme".into()),
            "Role",
            BlockType::Enum,
            vec![Field::member("ADMIN", 0).into()],
        )
        .unwrap();
        let mut file = ProtoBlocks::new("users.proto", Some("acme".into()));
        file.imports.insert("common.proto".into());
        file.options
            .insert("java_package".into(), OptionValue::Str("com.acme".into()));
        file.blocks.push(block);

        let expected = r#"syntax = "proto3";

package acme;

import "common.proto";

option java_package = "com.acme";

enum Role {
  ADMIN = 0;
}
"#;
        assert_eq!(Renderer::default().render_blocks_file(&file), expected);
    }
}
