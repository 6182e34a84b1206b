//! Render-oriented service trees mutated by the compiler passes.

use crate::decl::{MetaType, MethodDecl, ServiceDecl};
use serde_json::Value;
use std::collections::BTreeSet;

/// A comment as supplied by the host
#[derive(Debug, Clone, PartialEq)]
pub enum Comment {
    /// Comment text
    Text(String),
    /// Anything that is not text; rejected by the comments validator
    Invalid(Value),
}

impl Comment {
    /// The text, if this is a text comment
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Comment::Text(s) => Some(s),
            Comment::Invalid(_) => None,
        }
    }
}

impl Default for Comment {
    fn default() -> Self {
        Comment::Text(String::new())
    }
}

impl From<Value> for Comment {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Comment::Text(s),
            other => Comment::Invalid(other),
        }
    }
}

impl From<&str> for Comment {
    fn from(value: &str) -> Self {
        Comment::Text(value.to_string())
    }
}

/// One RPC of a [`ServiceTemplate`]
#[derive(Debug, Clone, PartialEq)]
pub struct MethodTemplate {
    /// Method name
    pub name: String,
    /// Method comment
    pub comments: Comment,
    /// Option lines
    pub options: Vec<String>,
    /// The handler yields a stream
    pub streams: bool,
    /// Introspected request arguments
    pub request_types: Vec<MetaType>,
    /// Introspected return type
    pub response_type: Option<MetaType>,
    /// Set by the type setter
    pub request_stream: bool,
    /// Set by the type setter
    pub response_stream: bool,
    /// Request type as rendered, set by the type setter
    pub request_str: Option<String>,
    /// Response type as rendered, set by the type setter
    pub response_str: Option<String>,
}

impl From<&MethodDecl> for MethodTemplate {
    fn from(decl: &MethodDecl) -> Self {
        Self {
            name: decl.name.clone(),
            comments: decl.comments.clone().into(),
            options: decl.options.clone(),
            streams: decl.streams,
            request_types: decl.requests.clone(),
            response_type: decl.response.clone(),
            request_stream: false,
            response_stream: false,
            request_str: None,
            response_str: None,
        }
    }
}

/// A service being compiled
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTemplate {
    /// Position of the service inside its compilation unit
    pub id: usize,
    /// Service name
    pub name: String,
    /// Proto package
    pub package: String,
    /// Module the service is rendered into
    pub module: String,
    /// Service comment
    pub comments: Comment,
    /// Option lines
    pub options: Vec<String>,
    /// Methods in declaration order
    pub methods: Vec<MethodTemplate>,
}

impl ServiceTemplate {
    /// Creates the template of a declared service
    pub fn from_decl(id: usize, decl: &ServiceDecl) -> Self {
        Self {
            id,
            name: decl.name.clone(),
            package: decl.package.clone(),
            module: decl.module.clone(),
            comments: decl.comments.clone().into(),
            options: decl.options.clone(),
            methods: decl.methods.iter().map(MethodTemplate::from).collect(),
        }
    }
}

/// One output file
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoTemplate {
    /// File comment
    pub comments: String,
    /// Proto syntax version (3)
    pub syntax: u32,
    /// Proto package
    pub package: String,
    /// Module name (file stem)
    pub module: String,
    /// Import paths, sorted and deduplicated
    pub imports: BTreeSet<String>,
    /// Services, filled once all passes succeeded
    pub services: Vec<ServiceTemplate>,
    /// File option lines
    pub options: Vec<String>,
    /// Services attached by the service setter, as `(id, name)`
    pub(crate) attached: Vec<(usize, String)>,
}

impl ProtoTemplate {
    /// Creates an empty template for a module
    pub fn new(module: impl Into<String>, package: impl Into<String>, syntax: u32) -> Self {
        Self {
            comments: String::new(),
            syntax,
            package: package.into(),
            module: module.into(),
            imports: BTreeSet::new(),
            services: Vec::new(),
            options: Vec::new(),
            attached: Vec::new(),
        }
    }

    /// Relative path of the rendered file
    pub fn file_name(&self) -> String {
        format!("{}.proto", self.module)
    }

    /// True when no service was attached
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.attached.is_empty()
    }

    /// Ids of attached services in attach order
    pub fn attached_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.attached.iter().map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comment_from_value() {
        assert_eq!(Comment::from(json!("hi")).as_text(), Some("hi"));
        assert_eq!(Comment::from(json!(null)).as_text(), None);
        assert_eq!(Comment::from(json!(1.5)), Comment::Invalid(json!(1.5)));
    }

    #[test]
    fn test_service_template_from_decl() {
        let decl = ServiceDecl::new("svc", "mod", "pkg").method(MethodDecl::new(
            "ping",
            MetaType::new("Empty"),
            MetaType::new("Empty"),
        ));
        let template = ServiceTemplate::from_decl(3, &decl);
        assert_eq!(template.id, 3);
        assert_eq!(template.comments, Comment::Text(String::new()));
        assert_eq!(template.methods.len(), 1);
        assert_eq!(template.methods[0].request_str, None);
    }

    #[test]
    fn test_proto_template() {
        let template = ProtoTemplate::new("users", "acme", 3);
        assert!(template.is_empty());
        assert_eq!(template.file_name(), "users.proto");
    }
}
