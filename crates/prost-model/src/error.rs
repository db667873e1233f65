use std::fmt;

use crate::violation::Violation;

/// Top-level error type returned by compilation and model operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// One or more model values were rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A descriptor could not be compiled into a schema.
    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

/// Returned when one or more values fail model validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The list of violations found.
    pub violations: Vec<Violation>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.violations.len() {
            0 => Ok(()),
            1 => write!(f, "validation error: {}", self.violations[0]),
            _ => {
                write!(f, "validation errors:")?;
                for v in &self.violations {
                    write!(f, "\n - {v}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub(crate) fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub(crate) fn single(violation: Violation) -> Self {
        Self {
            violations: vec![violation],
        }
    }

    pub(crate) fn violations_mut(&mut self) -> &mut Vec<Violation> {
        &mut self.violations
    }
}

/// Returned when a descriptor graph cannot be compiled.
///
/// Compilation errors abort the whole root compilation; nothing built during
/// the failed run is cached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CompilationError {
    /// A referenced type could not be resolved in the descriptor pool.
    #[error("descriptor resolution error: {cause}")]
    DescriptorResolution {
        /// Description of the unresolved reference.
        cause: String,
    },

    /// A comment directive was unknown or failed to evaluate.
    #[error("template directive error: `{token}` on {field}: {cause}")]
    TemplateDirective {
        /// The literal directive token as written in the source.
        token: String,
        /// Fully-qualified name of the field carrying the directive.
        field: String,
        /// Why the directive could not be resolved.
        cause: String,
    },

    /// Eager default construction would recurse through a message cycle.
    #[error("cyclic default error: eager defaults cycle through {}", .path.join(" -> "))]
    CyclicDefault {
        /// Message names along the cycle, ending where it started.
        path: Vec<String>,
    },

    /// The compiler configuration is inconsistent.
    #[error("invalid configuration: {cause}")]
    InvalidConfig {
        /// Description of the problem.
        cause: String,
    },
}

impl CompilationError {
    pub(crate) fn resolution(cause: impl Into<String>) -> Self {
        Self::DescriptorResolution {
            cause: cause.into(),
        }
    }
}

/// Merge violations from a sub-evaluation into an accumulator.
///
/// Returns `(should_continue, accumulated_error)`.
/// If `fail_fast` is true, stops on the first violation.
pub(crate) fn merge_violations(
    acc: Option<Error>,
    new_err: Result<(), Error>,
    fail_fast: bool,
) -> (bool, Option<Error>) {
    let new_err = match new_err {
        Ok(()) => return (true, acc),
        Err(e) => e,
    };

    match new_err {
        Error::Compilation(_) => (false, Some(new_err)),
        Error::Validation(new_val) => {
            if fail_fast {
                return (false, Some(Error::Validation(new_val)));
            }
            match acc {
                Some(Error::Validation(mut existing)) => {
                    existing.violations.extend(new_val.violations);
                    (true, Some(Error::Validation(existing)))
                }
                _ => (true, Some(Error::Validation(new_val))),
            }
        }
    }
}

/// Prefix every violation path in a failed result with `segment`.
pub(crate) fn prepend_path(result: Result<(), Error>, segment: &str) -> Result<(), Error> {
    match result {
        Err(Error::Validation(mut ve)) => {
            for violation in ve.violations_mut() {
                violation.prepend_path(segment);
            }
            Err(Error::Validation(ve))
        }
        other => other,
    }
}
