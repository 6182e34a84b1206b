//! Accumulated compiler diagnostics.

use std::fmt;

/// Taxonomy of validation and setter failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompileErrorCode {
    /// E101: not a valid proto identifier
    InvalidName,
    /// E102: name collides with a proto keyword or scalar type
    ReservedName,
    /// E103: package is not a dotted identifier
    InvalidPackage,
    /// E104: name used twice in the same scope
    DuplicatedName,
    /// E201: argument type has no proto path to import
    InvalidClassProtoPath,
    /// E401: comment is not text
    InvalidComment,
    /// E801: request arity or streaming mix
    MethodInvalidRequestType,
    /// E804: missing or unusable response
    MethodInvalidResponseType,
    /// E805: handler streaming mode disagrees with its return type
    MethodNotConsistentToReturn,
    /// E901: a setter pass could not finish its job
    SetterPassError,
    /// E902: finding from a caller-defined pass
    RuntimePossibleError,
}

impl CompileErrorCode {
    /// Short code such as `E104`
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidName => "E101",
            Self::ReservedName => "E102",
            Self::InvalidPackage => "E103",
            Self::DuplicatedName => "E104",
            Self::InvalidClassProtoPath => "E201",
            Self::InvalidComment => "E401",
            Self::MethodInvalidRequestType => "E801",
            Self::MethodInvalidResponseType => "E804",
            Self::MethodNotConsistentToReturn => "E805",
            Self::SetterPassError => "E901",
            Self::RuntimePossibleError => "E902",
        }
    }

    /// Message used when the reporter gives none
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::InvalidName => "Invalid name:",
            Self::ReservedName => "Name is a reserved word:",
            Self::InvalidPackage => "Invalid package name:",
            Self::DuplicatedName => "Duplicated name:",
            Self::InvalidClassProtoPath => "Class has no proto path",
            Self::InvalidComment => "Comment must be a string",
            Self::MethodInvalidRequestType => "Invalid request type",
            Self::MethodInvalidResponseType => "Invalid response type",
            Self::MethodNotConsistentToReturn => "Invalid Streaming mode return type",
            Self::SetterPassError => "Setter pass failed",
            Self::RuntimePossibleError => "Custom pass reported a problem",
        }
    }
}

impl fmt::Display for CompileErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One reported diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Error code
    pub code: CompileErrorCode,
    /// Where it was found (service, method or package name)
    pub location: String,
    /// Human readable message
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.code, self.message, self.location)
    }
}

/// Diagnostics of one scope (one service)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    name: String,
    errors: Vec<CompileError>,
}

impl CompileReport {
    /// Creates an empty report
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            errors: Vec::new(),
        }
    }

    /// Scope name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records an error; `message` overrides the code's default text
    pub fn report_error(
        &mut self,
        code: CompileErrorCode,
        location: impl Into<String>,
        message: Option<String>,
    ) {
        self.errors.push(CompileError {
            code,
            location: location.into(),
            message: message.unwrap_or_else(|| code.default_message().to_string()),
        });
    }

    /// Recorded errors in order
    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// Number of errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when nothing was reported
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compile Report for: {}", self.name)?;
        if self.errors.is_empty() {
            return writeln!(f, "  No compile errors found");
        }
        for error in &self.errors {
            writeln!(f, "  {}", error)?;
        }
        Ok(())
    }
}
