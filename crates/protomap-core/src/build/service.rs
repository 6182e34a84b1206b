//! Service and method blocks.

use super::rules::{comment_text, named_type, option_lines, Home, Subject};
use crate::decl::{MetaType, MethodDecl, Schema, ServiceDecl};
use crate::error::{BlockError, Problem, Result};
use crate::model::{Block, BlockItem, BlockType, Method, NamedType};
use tracing::debug;

fn argument_problem(which: &str, reason: impl AsRef<str>) -> Problem {
    Problem::type_error(format!(
        "Error on {} argument type. {}",
        which,
        reason.as_ref()
    ))
}

/// Resolves a request/response argument to a declared message
fn check_argument(
    meta: Option<&MetaType>,
    which: &str,
    schema: &Schema,
    inherited: &Home,
    problems: &mut Vec<Problem>,
) -> Option<NamedType> {
    let Some(meta) = meta else {
        problems.push(argument_problem(which, "Argument type is None"));
        return None;
    };
    let Some(decl) = schema.get(&meta.basetype) else {
        problems.push(argument_problem(
            which,
            format!("Argument is not a type: {}", meta.basetype),
        ));
        return None;
    };
    if !decl.is_message() {
        problems.push(argument_problem(
            which,
            format!("Argument is not a message: {}", meta.basetype),
        ));
        return None;
    }

    let fallback = Home::overridden(
        meta.proto_path.as_deref(),
        Some(meta.package.as_str()).filter(|p| !p.is_empty()),
        inherited,
    );
    Some(named_type(decl, &fallback))
}

/// Builds a service method.
///
/// Exactly one request and a response are required, both resolving to
/// message declarations. Arguments without a home of their own live in
/// `inherited` (the service's file).
pub fn make_method(decl: &MethodDecl, schema: &Schema, inherited: &Home) -> Result<Method> {
    let mut problems = Vec::new();

    if decl.requests.len() > 1 {
        problems.push(argument_problem(
            "request",
            format!(
                "Only one request message allowed per method. Found {}",
                decl.requests.len()
            ),
        ));
    }
    let request = decl.requests.first();
    let request_type = check_argument(request, "request", schema, inherited, &mut problems);
    let response_type =
        check_argument(decl.response.as_ref(), "response", schema, inherited, &mut problems);

    let subject = Subject::method(&decl.name);
    let comment = comment_text(&decl.comments, subject, &mut problems);
    let options = option_lines(&decl.options, subject, &mut problems);

    match (request_type, response_type) {
        (Some(request_type), Some(response_type)) if problems.is_empty() => Ok(Method {
            name: decl.name.clone(),
            request_type,
            response_type,
            request_stream: request.is_some_and(MetaType::is_stream),
            response_stream: decl.response.as_ref().is_some_and(MetaType::is_stream),
            comment,
            options,
        }),
        _ => Err(BlockError::new(&decl.name, "method", problems).into()),
    }
}

/// Builds a service block holding one method per handler.
///
/// Problems of every method are reported together.
pub fn make_service_block(decl: &ServiceDecl, schema: &Schema) -> Result<Block> {
    let home = Home::new(&decl.module, Some(decl.package.as_str()));
    let mut problems = Vec::new();
    let mut methods = Vec::with_capacity(decl.methods.len());

    for method in &decl.methods {
        match make_method(method, schema, &home) {
            Ok(method) => methods.push(BlockItem::Method(method)),
            Err(crate::Error::Block(err)) => problems.extend(err.problems),
            Err(other) => return Err(other),
        }
    }

    let subject = Subject::class(&decl.name);
    let comment = comment_text(&decl.comments, subject, &mut problems);
    let options = option_lines(&decl.options, subject, &mut problems);

    BlockError::check(&decl.name, "service", problems)?;

    let block = Block::new(&home.protofile, home.package, &decl.name, BlockType::Service, methods)?
        .with_comment(comment)
        .with_options(options);
    debug!(service = %block.name, methods = block.len(), "built service block");
    Ok(block)
}
