//! Error types for the protomap-core library.
//!
//! Two tiers exist. Structural errors ([`Error`]) abort the construction of
//! a block, a bucket or a descriptor and are returned immediately. Validation
//! findings are accumulated in [`crate::compiler::CompileReport`]s and only
//! become an [`Error::Compilation`] at a pipeline stage boundary.

use crate::compiler::CompilationError;
use std::fmt;
use thiserror::Error;

/// Result type alias for protomap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all protomap operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A block could not be built; carries every problem found
    #[error(transparent)]
    Block(#[from] BlockError),

    /// A block's fields do not match its block type
    #[error("invalid {block_type} block '{block}': {details}")]
    InvalidBlock {
        /// Name of the offending block
        block: String,
        /// Declared block type
        block_type: &'static str,
        /// What was wrong with its contents
        details: String,
    },

    /// A protofile was claimed by two different packages (or by none and one)
    #[error("protofile \"{protofile}\" already exists in package {existing} and can't be registered for package \"{requested}\"")]
    FileConflict {
        /// The contested protofile
        protofile: String,
        /// Package(s) already holding the file
        existing: String,
        /// Package that tried to claim it
        requested: String,
    },

    /// Two blocks with the same name but different content met in one bucket
    #[error("conflicting block \"{block}\" found in file \"{protofile}\", package \"{package}\" with differing content")]
    BlockConflict {
        /// Name of the block
        block: String,
        /// Bucket protofile
        protofile: String,
        /// Bucket package (empty when none)
        package: String,
    },

    /// A root type declares no protofile and none was inherited
    #[error("type \"{name}\" has no protofile")]
    MissingProtofile {
        /// Name of the declaration
        name: String,
    },

    /// A referenced type name has no declaration
    #[error("unknown type \"{name}\"")]
    UnknownType {
        /// The unresolved name
        name: String,
    },

    /// Failed to build a descriptor pool from exported files
    #[error("failed to build file descriptor: {0}")]
    DescriptorBuild(String),

    /// Validation failed at a pipeline stage boundary
    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

impl Error {
    /// Creates a new invalid block error
    pub fn invalid_block(
        block: impl Into<String>,
        block_type: &'static str,
        details: impl Into<String>,
    ) -> Self {
        Self::InvalidBlock {
            block: block.into(),
            block_type,
            details: details.into(),
        }
    }

    /// Creates a new file conflict error
    pub fn file_conflict(
        protofile: impl Into<String>,
        existing: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::FileConflict {
            protofile: protofile.into(),
            existing: existing.into(),
            requested: requested.into(),
        }
    }

    /// Creates a new unknown type error
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates a new descriptor build error
    pub fn descriptor_build(msg: impl Into<String>) -> Self {
        Self::DescriptorBuild(msg.into())
    }

    /// Number of underlying problems this error stands for
    pub fn problem_count(&self) -> usize {
        match self {
            Self::Block(err) => err.len(),
            Self::Compilation(err) => err.total_errors(),
            _ => 1,
        }
    }
}

/// Category of a single build problem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    /// Something has the wrong type (annotation, spec value, index)
    Type,
    /// Something has a well-typed but illegal value
    Value,
}

/// One problem found while building a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Problem category
    pub kind: ProblemKind,
    /// Human readable description
    pub message: String,
}

impl Problem {
    /// Creates a type problem
    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            kind: ProblemKind::Type,
            message: message.into(),
        }
    }

    /// Creates a value problem
    pub fn value_error(message: impl Into<String>) -> Self {
        Self {
            kind: ProblemKind::Value,
            message: message.into(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            ProblemKind::Type => "TypeError",
            ProblemKind::Value => "ValueError",
        };
        write!(f, "{}: {}", tag, self.message)
    }
}

/// Every problem found while mapping one declaration onto a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockError {
    /// Name of the declaration
    pub name: String,
    /// What was being built ("class", "enum", "method", ...)
    pub kind: &'static str,
    /// All problems, in discovery order
    pub problems: Vec<Problem>,
}

impl BlockError {
    /// Creates a block error from the collected problems
    pub fn new(name: impl Into<String>, kind: &'static str, problems: Vec<Problem>) -> Self {
        Self {
            name: name.into(),
            kind,
            problems,
        }
    }

    /// Number of problems
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    /// True when no problem was recorded
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Returns `Ok(())` when `problems` is empty, the aggregated error otherwise
    pub fn check(
        name: impl Into<String>,
        kind: &'static str,
        problems: Vec<Problem>,
    ) -> std::result::Result<(), Self> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Self::new(name, kind, problems))
        }
    }
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} errors found on {} \"{}\" block mapping: [",
            self.problems.len(),
            self.kind,
            self.name
        )?;
        for (i, problem) in self.problems.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", problem)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for BlockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_error_display() {
        let err = BlockError::new(
            "Hello",
            "class",
            vec![
                Problem::type_error("Field \"a\" has no type Annotation"),
                Problem::value_error("Field \"b\" has a duplicated index of: \"3\""),
            ],
        );
        let msg = err.to_string();
        assert!(msg.starts_with("2 errors found on class \"Hello\""));
        assert!(msg.contains("TypeError: Field \"a\""));
        assert!(msg.contains("ValueError: Field \"b\""));
    }

    #[test]
    fn test_check_passes_without_problems() {
        assert!(BlockError::check("A", "class", vec![]).is_ok());
        let err = BlockError::check("A", "enum", vec![Problem::type_error("x")]).unwrap_err();
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn test_problem_count() {
        let err: Error = BlockError::new("A", "class", vec![Problem::type_error("x"); 3]).into();
        assert_eq!(err.problem_count(), 3);
        assert_eq!(Error::unknown_type("Foo").problem_count(), 1);
        assert!(Error::unknown_type("Foo").to_string().contains("Foo"));
    }
}
