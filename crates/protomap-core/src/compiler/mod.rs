//! Multi-pass service compiler.
//!
//! Services are grouped by package into compilation units. Each unit owns
//! a list of [`ServiceTemplate`]s and a [`CompilerContext`] holding the
//! reports and one [`ProtoTemplate`] per module.
//!
//! Two stages run over every unit, in order:
//!
//! 1. validators, which only report (see [`validators`])
//! 2. setters, which bring the templates into renderable form (see [`setters`])
//!
//! All passes of a stage run over all units before the error count is
//! checked; a nonzero count stops the pipeline with a [`CompilationError`]
//! carrying every context. Setters never run after a failed validation.

mod report;
pub mod setters;
mod template;
pub mod validators;

use crate::decl::ServiceDecl;
use crate::render::Renderer;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, trace};

pub use report::{CompileError, CompileErrorCode, CompileReport};
pub use setters::{
    format_comment, CommentSetter, ImportsSetter, NameCase, NameSetter, ServiceSetter, TypeSetter,
};
pub use template::{Comment, MethodTemplate, ProtoTemplate, ServiceTemplate};
pub use validators::{
    BlockNameValidator, CommentsValidator, CustomPass, FieldNameValidator, ImportsValidator,
    TypeValidator,
};

/// Default comment width used by the comment setter
pub const MAXCHAR_PER_LINE: usize = 80;

/// Identity of the service whose methods are being visited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceScope {
    /// Service name (the report key)
    pub name: String,
    /// Service package
    pub package: String,
    /// Service module
    pub module: String,
}

impl From<&ServiceTemplate> for ServiceScope {
    fn from(service: &ServiceTemplate) -> Self {
        Self {
            name: service.name.clone(),
            package: service.package.clone(),
            module: service.module.clone(),
        }
    }
}

/// A validator or setter.
///
/// [`CompilerPass::execute`] resets the pass, visits every service and then
/// calls [`CompilerPass::finish`]. The default service visit dispatches
/// every method to [`CompilerPass::visit_method`].
pub trait CompilerPass {
    /// Pass name, for logs
    fn name(&self) -> &'static str;

    /// Clears per-unit state
    fn reset(&mut self) {}

    /// Called after every service of a unit was visited
    fn finish(&mut self, ctx: &mut CompilerContext) {
        let _ = ctx;
    }

    /// Visits a service
    fn visit_service(&mut self, service: &mut ServiceTemplate, ctx: &mut CompilerContext) {
        walk_methods(self, service, ctx);
    }

    /// Visits one method of the service described by `scope`
    fn visit_method(
        &mut self,
        scope: &ServiceScope,
        method: &mut MethodTemplate,
        ctx: &mut CompilerContext,
    ) {
        let _ = (scope, method, ctx);
    }

    /// Runs the pass over one compilation unit
    fn execute(&mut self, services: &mut [ServiceTemplate], ctx: &mut CompilerContext) {
        trace!(pass = self.name(), unit = ctx.name(), "running compiler pass");
        self.reset();
        for service in services.iter_mut() {
            self.visit_service(service, ctx);
        }
        self.finish(ctx);
    }
}

/// Dispatches every method of `service` to `pass`
pub fn walk_methods<P: CompilerPass + ?Sized>(
    pass: &mut P,
    service: &mut ServiceTemplate,
    ctx: &mut CompilerContext,
) {
    let scope = ServiceScope::from(&*service);
    for method in service.methods.iter_mut() {
        pass.visit_method(&scope, method, ctx);
    }
}

/// Reports and module state of one compilation unit
#[derive(Debug, Clone, Default)]
pub struct CompilerContext {
    name: String,
    reports: BTreeMap<String, CompileReport>,
    state: BTreeMap<String, ProtoTemplate>,
}

impl CompilerContext {
    /// Creates a context without module state
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a context holding the given module templates
    pub fn with_state(name: impl Into<String>, templates: impl IntoIterator<Item = ProtoTemplate>) -> Self {
        Self {
            name: name.into(),
            reports: BTreeMap::new(),
            state: templates
                .into_iter()
                .map(|t| (t.module.clone(), t))
                .collect(),
        }
    }

    /// Unit name (the package)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Report of `scope`, created on first use
    pub fn get_report(&mut self, scope: &str) -> &mut CompileReport {
        self.reports
            .entry(scope.to_string())
            .or_insert_with(|| CompileReport::new(scope))
    }

    /// Report of `scope`, if one was created
    pub fn report(&self, scope: &str) -> Option<&CompileReport> {
        self.reports.get(scope)
    }

    /// Every report, ordered by scope name
    pub fn reports(&self) -> impl Iterator<Item = &CompileReport> {
        self.reports.values()
    }

    /// Template of `module`
    pub fn state(&self, module: &str) -> Option<&ProtoTemplate> {
        self.state.get(module)
    }

    /// Mutable template of `module`
    pub fn state_mut(&mut self, module: &str) -> Option<&mut ProtoTemplate> {
        self.state.get_mut(module)
    }

    /// Every module template, ordered by module name
    pub fn templates(&self) -> impl Iterator<Item = &ProtoTemplate> {
        self.state.values()
    }

    /// Consumes the context, returning its module templates
    pub fn into_templates(self) -> impl Iterator<Item = ProtoTemplate> {
        self.state.into_values()
    }

    /// Total number of errors across all reports
    pub fn len(&self) -> usize {
        self.reports.values().map(CompileReport::len).sum()
    }

    /// True when no error was reported
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when at least one error was reported
    pub fn has_errors(&self) -> bool {
        !self.is_empty()
    }

    /// Codes of every reported error
    pub fn error_codes(&self) -> Vec<CompileErrorCode> {
        self.reports
            .values()
            .flat_map(|r| r.errors().iter().map(|e| e.code))
            .collect()
    }
}

impl fmt::Display for CompilerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in self.reports.values() {
            write!(f, "{}", report)?;
        }
        Ok(())
    }
}

/// Validation failed; holds every compilation unit's context
#[derive(Debug)]
pub struct CompilationError {
    /// Contexts of all units, failed or not
    pub contexts: Vec<CompilerContext>,
}

impl CompilationError {
    /// Sum of errors across all contexts
    pub fn total_errors(&self) -> usize {
        self.contexts.iter().map(CompilerContext::len).sum()
    }

    /// Contexts that reported at least one error
    pub fn failed(&self) -> impl Iterator<Item = &CompilerContext> {
        self.contexts.iter().filter(|ctx| ctx.has_errors())
    }
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Compilation failed with {} errors across {} packages.",
            self.total_errors(),
            self.contexts.len()
        )
    }
}

impl std::error::Error for CompilationError {}

/// Options of the setter stage
#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Case applied to service and method names
    pub name_case: NameCase,
    /// Comment wrap width
    pub max_comment_width: usize,
    /// Re-format comments that already look like proto comments
    pub always_format: bool,
    /// Proto syntax version
    pub syntax: u32,
    /// Prefix stripped from import paths
    pub proto_root: Option<String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            name_case: NameCase::None,
            max_comment_width: MAXCHAR_PER_LINE,
            always_format: true,
            syntax: 3,
            proto_root: None,
        }
    }
}

impl CompileConfig {
    /// Creates a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name case
    pub fn name_case(mut self, case: NameCase) -> Self {
        self.name_case = case;
        self
    }

    /// Sets the comment width
    pub fn max_comment_width(mut self, width: usize) -> Self {
        self.max_comment_width = width;
        self
    }

    /// Sets whether pre-formatted comments are re-formatted
    pub fn always_format(mut self, always: bool) -> Self {
        self.always_format = always;
        self
    }

    /// Sets the syntax version
    pub fn syntax(mut self, syntax: u32) -> Self {
        self.syntax = syntax;
        self
    }

    /// Sets the import root
    pub fn proto_root(mut self, root: impl Into<String>) -> Self {
        self.proto_root = Some(root.into());
        self
    }
}

/// Services and context of one package
pub type CompilationUnit = (Vec<ServiceTemplate>, CompilerContext);

/// Creates the unit of one package: a template per service and a context
/// holding one empty [`ProtoTemplate`] per distinct module.
///
/// Returns `None` for an empty service list.
pub fn make_compiler_context(
    package: &str,
    services: &[ServiceDecl],
    syntax: u32,
) -> Option<CompilationUnit> {
    if services.is_empty() {
        return None;
    }

    let mut modules: Vec<&str> = Vec::new();
    for service in services {
        if !modules.contains(&service.module.as_str()) {
            modules.push(&service.module);
        }
    }

    let templates = modules
        .iter()
        .map(|module| ProtoTemplate::new(*module, package, syntax));
    let ctx = CompilerContext::with_state(package, templates);
    let services = services
        .iter()
        .enumerate()
        .map(|(id, decl)| ServiceTemplate::from_decl(id, decl))
        .collect();
    Some((services, ctx))
}

/// Runs every pass over every unit; returns the cumulative error count
pub fn run_compiler_passes(
    units: &mut [CompilationUnit],
    passes: &mut [Box<dyn CompilerPass>],
) -> usize {
    for pass in passes.iter_mut() {
        for (services, ctx) in units.iter_mut() {
            pass.execute(services, ctx);
        }
    }
    units.iter().map(|(_, ctx)| ctx.len()).sum()
}

/// The validator stage, in execution order
pub fn make_validators(custom: Option<CustomPass>) -> Vec<Box<dyn CompilerPass>> {
    vec![
        Box::new(TypeValidator),
        Box::new(BlockNameValidator::default()),
        Box::new(ImportsValidator),
        Box::new(FieldNameValidator::default()),
        Box::new(CommentsValidator),
        Box::new(custom.unwrap_or_default()),
    ]
}

/// The setter stage, in execution order
pub fn make_setters(config: &CompileConfig) -> Vec<Box<dyn CompilerPass>> {
    vec![
        Box::new(ServiceSetter),
        Box::new(TypeSetter),
        Box::new(NameSetter::new(config.name_case)),
        Box::new(ImportsSetter::new(config.proto_root.clone())),
        Box::new(CommentSetter::new(config.max_comment_width, config.always_format)),
    ]
}

/// Rendered output: package → module → proto text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledProtos {
    packages: BTreeMap<String, BTreeMap<String, String>>,
}

/// One rendered file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoPackage<'a> {
    /// Proto package (may be empty)
    pub package: &'a str,
    /// Module name
    pub module: &'a str,
    /// Rendered text
    pub content: &'a str,
}

impl ProtoPackage<'_> {
    /// Relative output path: package segments as directories, then the module
    pub fn qual_name(&self) -> String {
        let mut path: Vec<&str> = self.package.split('.').filter(|s| !s.is_empty()).collect();
        let file = format!("{}.proto", self.module);
        path.push(&file);
        path.join("/")
    }
}

impl CompiledProtos {
    pub(crate) fn insert(&mut self, package: &str, module: &str, content: String) {
        self.packages
            .entry(package.to_string())
            .or_default()
            .insert(module.to_string(), content);
    }

    /// Rendered text of one module
    pub fn get(&self, package: &str, module: &str) -> Option<&str> {
        self.packages.get(package)?.get(module).map(String::as_str)
    }

    /// Modules of one package
    pub fn package(&self, package: &str) -> Option<&BTreeMap<String, String>> {
        self.packages.get(package)
    }

    /// Every rendered file, ordered by package then module
    pub fn iter(&self) -> impl Iterator<Item = ProtoPackage<'_>> {
        self.packages.iter().flat_map(|(package, modules)| {
            modules.iter().map(move |(module, content)| ProtoPackage {
                package,
                module,
                content,
            })
        })
    }

    /// Number of rendered files
    pub fn len(&self) -> usize {
        self.packages.values().map(BTreeMap::len).sum()
    }

    /// True when nothing was rendered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The underlying map
    pub fn into_inner(self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.packages
    }
}

/// Service compiler: validators, setters, rendering
pub struct Compiler {
    config: CompileConfig,
    renderer: Renderer,
    custom: Option<CustomPass>,
}

impl Compiler {
    /// Creates a compiler with the default renderer
    pub fn new(config: CompileConfig) -> Self {
        Self {
            config,
            renderer: Renderer::default(),
            custom: None,
        }
    }

    /// Uses `renderer` for the output
    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Adds a caller-defined check to the validator stage
    pub fn with_custom_pass(mut self, pass: CustomPass) -> Self {
        self.custom = Some(pass);
        self
    }

    /// Compiles services grouped by package.
    ///
    /// On failure every non-empty report is logged and nothing is rendered.
    pub fn compile(
        self,
        services: &BTreeMap<String, Vec<ServiceDecl>>,
    ) -> Result<CompiledProtos, CompilationError> {
        let mut units: Vec<CompilationUnit> = services
            .iter()
            .filter_map(|(package, list)| make_compiler_context(package, list, self.config.syntax))
            .collect();
        debug!(units = units.len(), "compiling services");

        let stages = [make_validators(self.custom), make_setters(&self.config)];
        for mut stage in stages {
            let total = run_compiler_passes(&mut units, &mut stage);
            if total > 0 {
                let err = CompilationError {
                    contexts: units.into_iter().map(|(_, ctx)| ctx).collect(),
                };
                for ctx in err.failed() {
                    error!("{}", ctx);
                }
                return Err(err);
            }
        }

        let mut compiled = CompiledProtos::default();
        for (services, ctx) in units {
            let mut slots: Vec<Option<ServiceTemplate>> = services.into_iter().map(Some).collect();
            for mut template in ctx.into_templates() {
                let ids: Vec<usize> = template.attached_ids().collect();
                for id in ids {
                    if let Some(service) = slots.get_mut(id).and_then(Option::take) {
                        template.services.push(service);
                    }
                }
                if template.services.is_empty() {
                    continue;
                }
                let rendered = self.renderer.render_template(&template);
                compiled.insert(&template.package, &template.module, rendered);
            }
        }
        debug!(files = compiled.len(), "compilation finished");
        Ok(compiled)
    }
}

/// Compiles services with the default validators, setters and renderer
pub fn compile_service(
    services: &BTreeMap<String, Vec<ServiceDecl>>,
    config: &CompileConfig,
) -> Result<CompiledProtos, CompilationError> {
    Compiler::new(config.clone()).compile(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{MetaType, MethodDecl};

    fn unary(name: &str) -> MethodDecl {
        MethodDecl::new(
            name,
            MetaType::new("Req").proto_path("msgs.proto"),
            MetaType::new("Resp").proto_path("msgs.proto"),
        )
    }

    fn packages(services: Vec<ServiceDecl>) -> BTreeMap<String, Vec<ServiceDecl>> {
        let mut map: BTreeMap<String, Vec<ServiceDecl>> = BTreeMap::new();
        for service in services {
            map.entry(service.package.clone()).or_default().push(service);
        }
        map
    }

    #[test]
    fn test_context_reports_are_lazy() {
        let mut ctx = CompilerContext::new("pkg");
        assert!(ctx.report("svc").is_none());
        assert_eq!(ctx.get_report("svc").len(), 0);
        assert!(ctx.report("svc").is_some());
        assert_eq!(ctx.len(), 0);
        assert!(ctx.to_string().contains("No compile errors found"));

        ctx.get_report("svc")
            .report_error(CompileErrorCode::DuplicatedName, "test", None);
        ctx.get_report("other")
            .report_error(CompileErrorCode::InvalidName, "x", None);
        assert_eq!(ctx.len(), 2);
        assert!(ctx.has_errors());
        assert_eq!(
            ctx.error_codes(),
            vec![CompileErrorCode::InvalidName, CompileErrorCode::DuplicatedName]
        );
        let shown = ctx.to_string();
        assert!(shown.contains("Compile Report for: svc"));
        assert!(shown.contains("E104"));
        assert!(shown.contains("Duplicated name:"));
    }

    #[test]
    fn test_make_compiler_context() {
        assert!(make_compiler_context("pkg", &[], 3).is_none());

        let services = vec![
            ServiceDecl::new("a", "mod1", "pkg"),
            ServiceDecl::new("b", "mod2", "pkg"),
            ServiceDecl::new("c", "mod1", "pkg"),
        ];
        let (templates, ctx) = make_compiler_context("pkg", &services, 3).unwrap();
        assert_eq!(templates.len(), 3);
        assert_eq!(templates[2].id, 2);
        assert_eq!(ctx.templates().count(), 2);
        assert_eq!(ctx.state("mod1").unwrap().package, "pkg");
        assert_eq!(ctx.name(), "pkg");
    }

    #[test]
    fn test_validators_stop_before_setters() {
        let services = packages(vec![ServiceDecl::new("bad name", "mod", "").method(unary("ping"))]);
        let mut units: Vec<CompilationUnit> = services
            .iter()
            .filter_map(|(p, s)| make_compiler_context(p, s, 3))
            .collect();

        let errors = run_compiler_passes(&mut units, &mut make_validators(None));
        assert_eq!(errors, 1);
        let ctx = &units[0].1;
        assert_eq!(ctx.error_codes(), vec![CompileErrorCode::InvalidName]);
        assert!(ctx.state("mod").unwrap().imports.is_empty());

        let err = compile_service(&services, &CompileConfig::default()).unwrap_err();
        assert_eq!(err.total_errors(), 1);
        assert!(err.contexts.iter().all(|ctx| ctx.templates().all(ProtoTemplate::is_empty)));
        assert_eq!(
            err.to_string(),
            "Compilation failed with 1 errors across 1 packages."
        );
    }

    #[test]
    fn test_all_validators_run_before_stopping() {
        let mut method = unary("ping");
        method.comments = serde_json::json!(7);
        let services = packages(vec![
            ServiceDecl::new("message", "mod", "a").method(method),
            ServiceDecl::new("ok", "mod", "b").method(unary("1bad")),
        ]);

        let err = compile_service(&services, &CompileConfig::default()).unwrap_err();
        assert_eq!(err.contexts.len(), 2);
        assert_eq!(err.total_errors(), 3);
        assert_eq!(err.failed().count(), 2);
    }

    #[test]
    fn test_compiled_protos_qual_name() {
        let mut compiled = CompiledProtos::default();
        compiled.insert("acme.users", "users", "x".into());
        compiled.insert("", "root", "y".into());

        let names: Vec<_> = compiled.iter().map(|p| p.qual_name()).collect();
        assert_eq!(names, vec!["root.proto", "acme/users/users.proto"]);
        assert_eq!(compiled.get("", "root"), Some("y"));
        assert_eq!(compiled.len(), 2);
    }
}
