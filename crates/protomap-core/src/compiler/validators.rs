//! Validator passes. They report into the context and never touch the
//! templates.

use super::{walk_methods, CompileErrorCode, CompilerContext, CompilerPass, MethodTemplate, ServiceScope, ServiceTemplate};
use crate::decl::MetaType;
use std::collections::BTreeSet;

/// Words a service or method may not be named after
pub const RESERVED_WORDS: &[&str] = &[
    "syntax", "import", "weak", "public", "package", "option", "message", "enum", "service",
    "rpc", "returns", "stream", "oneof", "map", "reserved", "extensions", "extend", "to", "max",
    "repeated", "optional", "required", "group", "true", "false", "inf", "nan", "double",
    "float", "int32", "int64", "uint32", "uint64", "sint32", "sint64", "fixed32", "fixed64",
    "sfixed32", "sfixed64", "bool", "string", "bytes",
];

/// True for `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// True for dot separated identifiers
pub fn is_package_name(package: &str) -> bool {
    package.split('.').all(is_identifier)
}

/// Checks a name; `false` when an error was reported
fn check_name(ctx: &mut CompilerContext, scope: &str, name: &str) -> bool {
    let code = if !is_identifier(name) {
        CompileErrorCode::InvalidName
    } else if RESERVED_WORDS.contains(&name) {
        CompileErrorCode::ReservedName
    } else {
        return true;
    };
    ctx.get_report(scope).report_error(code, name, None);
    false
}

/// Request arity, response presence and streaming consistency
#[derive(Debug, Default)]
pub struct TypeValidator;

impl TypeValidator {
    fn check_requests(requests: &[MetaType]) -> Option<String> {
        match requests.len() {
            0 => Some("Method must define a request message.".to_string()),
            1 => None,
            _ => {
                let streamed: BTreeSet<&str> = requests
                    .iter()
                    .filter(|r| r.is_stream())
                    .map(|r| r.basetype.as_str())
                    .collect();
                if streamed.len() == 1 {
                    Some("Stream and Single request mixed in the args".to_string())
                } else {
                    let names: Vec<&str> = requests.iter().map(|r| r.basetype.as_str()).collect();
                    Some(format!(
                        "Only one request message allowed per method. Found {:?}",
                        names
                    ))
                }
            }
        }
    }
}

impl CompilerPass for TypeValidator {
    fn name(&self) -> &'static str {
        "TypeValidator"
    }

    fn visit_method(
        &mut self,
        scope: &ServiceScope,
        method: &mut MethodTemplate,
        ctx: &mut CompilerContext,
    ) {
        let report = ctx.get_report(&scope.name);
        if let Some(msg) = Self::check_requests(&method.request_types) {
            report.report_error(CompileErrorCode::MethodInvalidRequestType, &method.name, Some(msg));
        }

        if method.response_type.is_none() {
            report.report_error(
                CompileErrorCode::MethodInvalidResponseType,
                &method.name,
                Some("Response type is 'None'".to_string()),
            );
        }
        let returns_stream = method.response_type.as_ref().is_some_and(MetaType::is_stream);
        if method.streams != returns_stream {
            report.report_error(CompileErrorCode::MethodNotConsistentToReturn, &method.name, None);
        }
    }
}

/// Service names and packages of a unit
#[derive(Debug, Default)]
pub struct BlockNameValidator {
    seen: BTreeSet<String>,
    packages: BTreeSet<String>,
}

impl CompilerPass for BlockNameValidator {
    fn name(&self) -> &'static str {
        "BlockNameValidator"
    }

    fn reset(&mut self) {
        self.seen.clear();
        self.packages.clear();
    }

    fn visit_service(&mut self, service: &mut ServiceTemplate, ctx: &mut CompilerContext) {
        if check_name(ctx, &service.name, &service.name) && !self.seen.insert(service.name.clone()) {
            ctx.get_report(&service.name)
                .report_error(CompileErrorCode::DuplicatedName, &service.name, None);
        }

        if !service.package.is_empty()
            && self.packages.insert(service.package.clone())
            && !is_package_name(&service.package)
        {
            ctx.get_report(&service.name)
                .report_error(CompileErrorCode::InvalidPackage, &service.package, None);
        }
    }
}

/// Method names of each service
#[derive(Debug, Default)]
pub struct FieldNameValidator {
    seen: BTreeSet<String>,
}

impl CompilerPass for FieldNameValidator {
    fn name(&self) -> &'static str {
        "FieldNameValidator"
    }

    fn visit_service(&mut self, service: &mut ServiceTemplate, ctx: &mut CompilerContext) {
        self.seen.clear();
        walk_methods(self, service, ctx);
    }

    fn visit_method(
        &mut self,
        scope: &ServiceScope,
        method: &mut MethodTemplate,
        ctx: &mut CompilerContext,
    ) {
        if check_name(ctx, &scope.name, &method.name) && !self.seen.insert(method.name.clone()) {
            ctx.get_report(&scope.name)
                .report_error(CompileErrorCode::DuplicatedName, &method.name, None);
        }
    }
}

/// Every argument type must name the file it lives in
#[derive(Debug, Default)]
pub struct ImportsValidator;

impl ImportsValidator {
    fn check(ctx: &mut CompilerContext, scope: &str, method: &str, which: &str, meta: &MetaType) {
        if meta.proto_path.as_deref().is_some_and(|p| !p.is_empty()) {
            return;
        }
        ctx.get_report(scope).report_error(
            CompileErrorCode::InvalidClassProtoPath,
            method,
            Some(format!(
                "{} class '{}' has no proto_path associated",
                which, meta.basetype
            )),
        );
    }
}

impl CompilerPass for ImportsValidator {
    fn name(&self) -> &'static str {
        "ImportsValidator"
    }

    fn visit_method(
        &mut self,
        scope: &ServiceScope,
        method: &mut MethodTemplate,
        ctx: &mut CompilerContext,
    ) {
        if let Some(request) = method.request_types.first() {
            Self::check(ctx, &scope.name, &method.name, "Request", request);
        }
        if let Some(response) = &method.response_type {
            Self::check(ctx, &scope.name, &method.name, "Response", response);
        }
    }
}

/// Service and method comments must be text
#[derive(Debug, Default)]
pub struct CommentsValidator;

impl CompilerPass for CommentsValidator {
    fn name(&self) -> &'static str {
        "CommentsValidator"
    }

    fn visit_service(&mut self, service: &mut ServiceTemplate, ctx: &mut CompilerContext) {
        if service.comments.as_text().is_none() {
            ctx.get_report(&service.name)
                .report_error(CompileErrorCode::InvalidComment, &service.name, None);
        }
        walk_methods(self, service, ctx);
    }

    fn visit_method(
        &mut self,
        scope: &ServiceScope,
        method: &mut MethodTemplate,
        ctx: &mut CompilerContext,
    ) {
        if method.comments.as_text().is_none() {
            ctx.get_report(&scope.name)
                .report_error(CompileErrorCode::InvalidComment, &method.name, None);
        }
    }
}

type MethodCheck = Box<dyn FnMut(&MethodTemplate) -> Vec<String>>;
type Hook = Box<dyn FnMut()>;

/// Caller-defined method check; every returned message becomes an E902
pub struct CustomPass {
    check: MethodCheck,
    on_reset: Option<Hook>,
    on_finish: Option<Hook>,
}

impl CustomPass {
    /// Wraps a method check
    pub fn new(check: impl FnMut(&MethodTemplate) -> Vec<String> + 'static) -> Self {
        Self {
            check: Box::new(check),
            on_reset: None,
            on_finish: None,
        }
    }

    /// Runs `hook` before each unit
    pub fn on_reset(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_reset = Some(Box::new(hook));
        self
    }

    /// Runs `hook` after each unit
    pub fn on_finish(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_finish = Some(Box::new(hook));
        self
    }
}

impl Default for CustomPass {
    fn default() -> Self {
        Self::new(|_| Vec::new())
    }
}

impl CompilerPass for CustomPass {
    fn name(&self) -> &'static str {
        "CustomPass"
    }

    fn reset(&mut self) {
        if let Some(hook) = self.on_reset.as_mut() {
            hook();
        }
    }

    fn finish(&mut self, _ctx: &mut CompilerContext) {
        if let Some(hook) = self.on_finish.as_mut() {
            hook();
        }
    }

    fn visit_method(
        &mut self,
        scope: &ServiceScope,
        method: &mut MethodTemplate,
        ctx: &mut CompilerContext,
    ) {
        let findings = (self.check)(method);
        if findings.is_empty() {
            return;
        }
        let report = ctx.get_report(&scope.name);
        for message in findings {
            report.report_error(CompileErrorCode::RuntimePossibleError, &method.name, Some(message));
        }
    }
}
