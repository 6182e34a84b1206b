//! Setter passes. They bring validated templates into renderable form.

use super::{
    walk_methods, Comment, CompileErrorCode, CompilerContext, CompilerPass, MethodTemplate,
    ServiceScope, ServiceTemplate,
};
use crate::decl::MetaType;
use regex::Regex;
use std::sync::OnceLock;

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("static pattern compiles"))
}

static SEPARATORS: OnceLock<Regex> = OnceLock::new();
static DASH_OR_SPACE: OnceLock<Regex> = OnceLock::new();
static LOWER_UPPER: OnceLock<Regex> = OnceLock::new();
static UNDERSCORES: OnceLock<Regex> = OnceLock::new();

fn setter_error(ctx: &mut CompilerContext, scope: &str, location: &str, message: String) {
    ctx.get_report(scope)
        .report_error(CompileErrorCode::SetterPassError, location, Some(message));
}

/// Attaches every service to the template of its module
#[derive(Debug, Default)]
pub struct ServiceSetter;

impl CompilerPass for ServiceSetter {
    fn name(&self) -> &'static str {
        "ServiceSetter"
    }

    fn visit_service(&mut self, service: &mut ServiceTemplate, ctx: &mut CompilerContext) {
        let Some(module) = ctx.state_mut(&service.module) else {
            let message = format!("ServiceSetter: module '{}' not found", service.module);
            setter_error(ctx, &service.name, &service.name, message);
            return;
        };
        if module.attached_ids().any(|id| id == service.id) {
            let message = format!(
                "ServiceSetter: service already attached to module '{}'",
                service.module
            );
            setter_error(ctx, &service.name, &service.name, message);
            return;
        }
        module.attached.push((service.id, service.name.clone()));
    }
}

/// Fills the rendered request/response types and their stream flags
#[derive(Debug, Default)]
pub struct TypeSetter;

impl TypeSetter {
    /// Type as seen from a service in `package`
    pub fn type_str(meta: &MetaType, package: &str) -> String {
        if meta.package.is_empty() || meta.package == package {
            meta.basetype.clone()
        } else {
            format!("{}.{}", meta.package, meta.basetype)
        }
    }
}

impl CompilerPass for TypeSetter {
    fn name(&self) -> &'static str {
        "TypeSetter"
    }

    fn visit_method(
        &mut self,
        scope: &ServiceScope,
        method: &mut MethodTemplate,
        ctx: &mut CompilerContext,
    ) {
        let (Some(request), Some(response)) = (method.request_types.first(), &method.response_type)
        else {
            setter_error(
                ctx,
                &scope.name,
                &method.name,
                "TypeSetter.visit_method: missing request or response type".to_string(),
            );
            return;
        };
        method.request_str = Some(Self::type_str(request, &scope.package));
        method.request_stream = request.is_stream();
        method.response_str = Some(Self::type_str(response, &scope.package));
        method.response_stream = response.is_stream();
    }
}

/// Case applied to service and method names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NameCase {
    /// Names are kept as declared
    #[default]
    None,
    /// `snake_case`
    Snake,
    /// `camelCase`
    Camel,
    /// `PascalCase`
    Pascal,
}

impl NameCase {
    /// Parses a loose strategy name such as `"Snake-Case"` or `"pascal"`.
    ///
    /// Anything not mentioning snake, camel or pascal keeps names as is.
    pub fn parse(strategy: &str) -> Self {
        let normalized: String = strategy
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_lowercase();
        if normalized.contains("snake") {
            Self::Snake
        } else if normalized.contains("camel") {
            Self::Camel
        } else if normalized.contains("pascal") {
            Self::Pascal
        } else {
            Self::None
        }
    }

    /// Applies the case to `name`
    pub fn apply(&self, name: &str) -> String {
        match self {
            Self::None => name.to_string(),
            Self::Snake => to_snake_case(name),
            Self::Camel => to_camel_case(name),
            Self::Pascal => to_pascal_case(name),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => {
            let rest = chars.as_str().to_lowercase();
            first.to_uppercase().chain(rest.chars()).collect()
        }
        None => String::new(),
    }
}

fn split_words(name: &str) -> Vec<&str> {
    pattern(&SEPARATORS, r"[_\-\s]+").split(name).collect()
}

/// `"getUser Name"` → `"get_user_name"`
pub fn to_snake_case(name: &str) -> String {
    let name = pattern(&DASH_OR_SPACE, r"[\-\s]+").replace_all(name, "_");
    let name = pattern(&LOWER_UPPER, r"([a-z0-9])([A-Z])").replace_all(&name, "${1}_${2}");
    let name = pattern(&UNDERSCORES, r"__+").replace_all(&name, "_");
    name.to_lowercase()
}

/// `"get_user_name"` → `"getUserName"`
pub fn to_camel_case(name: &str) -> String {
    let words = split_words(name);
    let Some((first, rest)) = words.split_first() else {
        return String::new();
    };
    let mut chars = first.chars();
    let mut out: String = match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    };
    for word in rest {
        out.push_str(&capitalize(word));
    }
    out
}

/// `"get_user_name"` → `"GetUserName"`
pub fn to_pascal_case(name: &str) -> String {
    split_words(name).into_iter().map(capitalize).collect()
}

/// Renames services and methods
#[derive(Debug, Default)]
pub struct NameSetter {
    case: NameCase,
}

impl NameSetter {
    /// Creates a setter applying `case`
    pub fn new(case: NameCase) -> Self {
        Self { case }
    }
}

impl CompilerPass for NameSetter {
    fn name(&self) -> &'static str {
        "NameSetter"
    }

    fn visit_service(&mut self, service: &mut ServiceTemplate, ctx: &mut CompilerContext) {
        if self.case == NameCase::None {
            return;
        }
        service.name = self.case.apply(&service.name);
        walk_methods(self, service, ctx);
    }

    fn visit_method(
        &mut self,
        _scope: &ServiceScope,
        method: &mut MethodTemplate,
        _ctx: &mut CompilerContext,
    ) {
        method.name = self.case.apply(&method.name);
    }
}

/// Collects the files each module has to import
#[derive(Debug, Default)]
pub struct ImportsSetter {
    proto_root: Option<String>,
}

impl ImportsSetter {
    /// Creates a setter stripping `proto_root` from import paths
    pub fn new(proto_root: Option<String>) -> Self {
        Self { proto_root }
    }

    fn import_path<'a>(&self, path: &'a str) -> &'a str {
        match self.proto_root.as_deref() {
            Some(root) if !root.is_empty() => path
                .strip_prefix(root)
                .map_or(path, |rest| rest.trim_start_matches('/')),
            _ => path,
        }
    }

    fn add_import(&self, scope: &ServiceScope, method: &str, meta: &MetaType, ctx: &mut CompilerContext) {
        let Some(path) = meta.proto_path.as_deref().filter(|p| !p.is_empty()) else {
            let message = format!("ImportsSetter: '{}' has no proto path", meta.basetype);
            setter_error(ctx, &scope.name, method, message);
            return;
        };
        let import = self.import_path(path);
        let Some(module) = ctx.state_mut(&scope.module) else {
            let message = format!("ImportsSetter: module '{}' not found", scope.module);
            setter_error(ctx, &scope.name, method, message);
            return;
        };
        if import != module.file_name() {
            module.imports.insert(import.to_string());
        }
    }
}

impl CompilerPass for ImportsSetter {
    fn name(&self) -> &'static str {
        "ImportsSetter"
    }

    fn visit_method(
        &mut self,
        scope: &ServiceScope,
        method: &mut MethodTemplate,
        ctx: &mut CompilerContext,
    ) {
        for meta in method.request_types.first().into_iter().chain(&method.response_type) {
            self.add_import(scope, &method.name, meta, ctx);
        }
    }
}

/// Greedy word wrap; words longer than `width` are split
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();

    for mut word in text.split_whitespace() {
        loop {
            let len = word.chars().count();
            let used = line.chars().count();
            let needed = if line.is_empty() { len } else { used + 1 + len };
            if needed <= width {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.push_str(word);
                break;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
                continue;
            }
            let split = word.char_indices().nth(width).map_or(word.len(), |(i, _)| i);
            lines.push(word[..split].to_string());
            word = &word[split..];
            if word.is_empty() {
                break;
            }
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Normalizes a comment to proto syntax.
///
/// Short single lines become `// text`; anything else is wrapped to
/// `max_chars` inside `/* */`. Unless `always_format` is set, text that
/// already is a proto comment is kept.
pub fn format_comment(text: &str, max_chars: usize, always_format: bool) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    if !always_format
        && (text.starts_with("//") || (text.starts_with("/*") && text.ends_with("*/")))
    {
        return text.to_string();
    }

    let text = text.strip_prefix("//").unwrap_or(text).trim();
    let text = text.strip_prefix("/*").unwrap_or(text).trim();
    let text = text.strip_suffix("*/").unwrap_or(text).trim();

    if text.chars().count() <= max_chars && !text.contains('\n') {
        return format!("// {}", text);
    }
    format!("/*\n{}\n*/", wrap(text, max_chars).join("\n"))
}

/// Formats module, service and method comments
#[derive(Debug)]
pub struct CommentSetter {
    max_chars: usize,
    always_format: bool,
}

impl Default for CommentSetter {
    fn default() -> Self {
        Self::new(super::MAXCHAR_PER_LINE, true)
    }
}

impl CommentSetter {
    /// Creates a setter wrapping at `max_chars`
    pub fn new(max_chars: usize, always_format: bool) -> Self {
        Self {
            max_chars,
            always_format,
        }
    }

    fn format(&self, comment: &mut Comment) {
        if let Comment::Text(text) = comment {
            *text = format_comment(text, self.max_chars, self.always_format);
        }
    }
}

impl CompilerPass for CommentSetter {
    fn name(&self) -> &'static str {
        "CommentSetter"
    }

    fn visit_service(&mut self, service: &mut ServiceTemplate, ctx: &mut CompilerContext) {
        if let Some(module) = ctx.state_mut(&service.module) {
            module.comments = format_comment(&module.comments, self.max_chars, self.always_format);
        }
        self.format(&mut service.comments);
        walk_methods(self, service, ctx);
    }

    fn visit_method(
        &mut self,
        _scope: &ServiceScope,
        method: &mut MethodTemplate,
        _ctx: &mut CompilerContext,
    ) {
        self.format(&mut method.comments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{make_compiler_context, CompilationUnit};
    use crate::decl::{MethodDecl, ServiceDecl};
    use pretty_assertions::assert_eq;

    fn unit(services: Vec<ServiceDecl>) -> CompilationUnit {
        let package = services[0].package.clone();
        make_compiler_context(&package, &services, 3).unwrap()
    }

    #[test]
    fn test_service_setter_attaches_once() {
        let (mut services, mut ctx) = unit(vec![
            ServiceDecl::new("a", "mod1", "pkg"),
            ServiceDecl::new("b", "mod2", "pkg"),
        ]);
        ServiceSetter.execute(&mut services, &mut ctx);
        assert!(ctx.is_empty());
        assert_eq!(ctx.state("mod1").unwrap().attached_ids().collect::<Vec<_>>(), vec![0]);
        assert_eq!(ctx.state("mod2").unwrap().attached_ids().collect::<Vec<_>>(), vec![1]);

        ServiceSetter.execute(&mut services, &mut ctx);
        assert_eq!(ctx.len(), 2);
        assert!(ctx.error_codes().iter().all(|c| *c == CompileErrorCode::SetterPassError));
    }

    #[test]
    fn test_type_setter_qualifies_foreign_packages() {
        let method = MethodDecl::new(
            "get",
            MetaType::new("Req").package("pkg"),
            MetaType::new("Empty").package("google.protobuf").stream(),
        );
        let (mut services, mut ctx) = unit(vec![ServiceDecl::new("svc", "mod", "pkg").method(method)]);
        TypeSetter.execute(&mut services, &mut ctx);

        let method = &services[0].methods[0];
        assert_eq!(method.request_str.as_deref(), Some("Req"));
        assert_eq!(method.response_str.as_deref(), Some("google.protobuf.Empty"));
        assert!(!method.request_stream);
        assert!(method.response_stream);
    }

    #[test]
    fn test_type_setter_reports_missing_types() {
        let mut method = MethodDecl::new("get", MetaType::new("Req"), MetaType::new("Resp"));
        method.response = None;
        let (mut services, mut ctx) = unit(vec![ServiceDecl::new("svc", "mod", "").method(method)]);
        TypeSetter.execute(&mut services, &mut ctx);
        assert_eq!(ctx.error_codes(), vec![CompileErrorCode::SetterPassError]);
    }

    #[test]
    fn test_name_case_parse() {
        assert_eq!(NameCase::parse("snake_case"), NameCase::Snake);
        assert_eq!(NameCase::parse(" Camel-Case "), NameCase::Camel);
        assert_eq!(NameCase::parse("PASCAL"), NameCase::Pascal);
        assert_eq!(NameCase::parse("no_transform"), NameCase::None);
    }

    #[test]
    fn test_case_transforms() {
        assert_eq!(to_snake_case("getUserName"), "get_user_name");
        assert_eq!(to_snake_case("Get User-Name"), "get_user_name");
        assert_eq!(to_snake_case("already__snake"), "already_snake");
        assert_eq!(to_camel_case("get_user_name"), "getUserName");
        assert_eq!(to_camel_case("GetUser"), "getUser");
        assert_eq!(to_pascal_case("get_user-name"), "GetUserName");
        assert_eq!(to_pascal_case("AlreadyPascalCase"), "Alreadypascalcase");
    }

    #[test]
    fn test_name_setter() {
        let service = ServiceDecl::new("user_service", "mod", "").method(MethodDecl::new(
            "get_user",
            MetaType::new("A"),
            MetaType::new("B"),
        ));
        let (mut services, mut ctx) = unit(vec![service]);
        NameSetter::new(NameCase::Pascal).execute(&mut services, &mut ctx);
        assert_eq!(services[0].name, "UserService");
        assert_eq!(services[0].methods[0].name, "GetUser");
    }

    #[test]
    fn test_imports_setter() {
        let service = ServiceDecl::new("svc", "users", "")
            .method(MethodDecl::new(
                "get",
                MetaType::new("Req").proto_path("protos/users.proto"),
                MetaType::new("Resp").proto_path("protos/common/types.proto"),
            ))
            .method(MethodDecl::new(
                "ping",
                MetaType::new("Empty").proto_path("google/protobuf/empty.proto"),
                MetaType::new("Empty").proto_path("google/protobuf/empty.proto"),
            ));
        let (mut services, mut ctx) = unit(vec![service]);
        ImportsSetter::new(Some("protos".into())).execute(&mut services, &mut ctx);

        let imports: Vec<_> = ctx.state("users").unwrap().imports.iter().cloned().collect();
        assert_eq!(imports, vec!["common/types.proto", "google/protobuf/empty.proto"]);
    }

    #[test]
    fn test_format_comment() {
        assert_eq!(format_comment("   ", 80, true), "");
        assert_eq!(format_comment("hello", 80, true), "// hello");
        assert_eq!(format_comment("// hello", 80, true), "// hello");
        assert_eq!(format_comment("/* hello */", 80, true), "// hello");
        assert_eq!(format_comment("/* keep */", 80, false), "/* keep */");
        assert_eq!(format_comment("//keep", 80, false), "//keep");
        assert_eq!(
            format_comment("one two three four", 9, true),
            "/*\none two\nthree\nfour\n*/"
        );
        assert_eq!(format_comment("first\nsecond", 80, true), "/*\nfirst second\n*/");
    }

    #[test]
    fn test_wrap_splits_long_words() {
        assert_eq!(wrap("abcdefgh ij", 3), vec!["abc", "def", "gh", "ij"]);
    }

    #[test]
    fn test_comment_setter() {
        let mut method = MethodDecl::new("get", MetaType::new("A"), MetaType::new("B"));
        method.comments = serde_json::json!("Fetch a user");
        let mut service = ServiceDecl::new("svc", "mod", "").method(method);
        service.comments = serde_json::json!("");
        let (mut services, mut ctx) = unit(vec![service]);
        ctx.state_mut("mod").unwrap().comments = "Users module".into();

        CommentSetter::default().execute(&mut services, &mut ctx);
        assert_eq!(ctx.state("mod").unwrap().comments, "// Users module");
        assert_eq!(services[0].comments.as_text(), Some(""));
        assert_eq!(services[0].methods[0].comments.as_text(), Some("// Fetch a user"));
    }
}
