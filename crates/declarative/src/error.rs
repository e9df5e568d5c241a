//! Error types for catalog compilation and reconciliation.
//!
//! Errors fall into two groups. Pre-flight errors (validation, cycles,
//! parameter binding) are raised before anything touches the host and stop
//! the whole run. Runtime errors (apply failures and the blocked resources
//! they cause) are recorded per resource in the run report.

use crate::resource::ResourceId;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of errors, used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed resource or component declaration.
    Validation,
    /// Unsatisfiable ordering.
    Cycle,
    /// Parameter binding failed.
    Parameter,
    /// A resource failed to apply.
    Apply,
    /// A resource was not attempted because a dependency failed.
    Dependency,
}

impl ErrorCategory {
    /// Get a user-friendly description of this category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid declaration",
            Self::Cycle => "Dependency cycle",
            Self::Parameter => "Parameter binding failed",
            Self::Apply => "Apply failed",
            Self::Dependency => "Dependency failed",
        }
    }
}

/// Errors raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A resource or component declaration is malformed.
    #[error("invalid {subject}: {message}")]
    Validation {
        /// Resource id, component label, or reference that failed.
        subject: String,
        /// What is wrong with it.
        message: String,
    },

    /// The ordering edges form a cycle.
    #[error("dependency cycle: {}", format_cycle(.members))]
    Cycle {
        /// Members of the cycle, in edge order.
        members: Vec<ResourceId>,
    },

    /// A required parameter has no override, no external value and no default.
    #[error("parameter {component}::{name} is required but has no value")]
    UnresolvedParameter {
        /// Component the parameter belongs to.
        component: String,
        /// Parameter name.
        name: String,
    },

    /// An override names a parameter the component does not declare.
    #[error("{component} does not accept a parameter named '{name}'")]
    UnknownParameter {
        /// Component being declared.
        component: String,
        /// Offending parameter name.
        name: String,
    },

    /// A parameter value has the wrong type for how it is used.
    #[error("parameter {component}::{name} must be {expected}, got {found}")]
    ParameterType {
        /// Component the parameter belongs to.
        component: String,
        /// Parameter name.
        name: String,
        /// Expected type.
        expected: &'static str,
        /// Actual value, rendered.
        found: String,
    },

    /// Applying a resource failed.
    #[error("failed to apply {resource}: {message}")]
    Apply {
        /// Resource that failed.
        resource: ResourceId,
        /// Underlying failure.
        message: String,
    },

    /// A resource was not attempted because a dependency failed.
    #[error("{resource} not applied: dependency {failed} failed")]
    DependencyFailed {
        /// Resource that was blocked.
        resource: ResourceId,
        /// Root failure that blocked it.
        failed: ResourceId,
    },
}

impl Error {
    /// Build a validation error.
    pub fn validation(subject: impl ToString, message: impl Into<String>) -> Self {
        Self::Validation {
            subject: subject.to_string(),
            message: message.into(),
        }
    }

    /// The category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Cycle { .. } => ErrorCategory::Cycle,
            Self::UnresolvedParameter { .. }
            | Self::UnknownParameter { .. }
            | Self::ParameterType { .. } => ErrorCategory::Parameter,
            Self::Apply { .. } => ErrorCategory::Apply,
            Self::DependencyFailed { .. } => ErrorCategory::Dependency,
        }
    }

    /// Whether this error stops the run before any resource is applied.
    #[must_use]
    pub fn is_preflight(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::Cycle | ErrorCategory::Parameter
        )
    }
}

fn format_cycle(members: &[ResourceId]) -> String {
    let mut parts: Vec<String> = members.iter().map(ToString::to_string).collect();
    if let Some(first) = members.first() {
        parts.push(first.to_string());
    }
    parts.join(" => ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Kind;

    #[test]
    fn test_cycle_message_closes_loop() {
        let err = Error::Cycle {
            members: vec![
                ResourceId::new(Kind::File, "/a"),
                ResourceId::new(Kind::Service, "b"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle: File[/a] => Service[b] => File[/a]"
        );
    }

    #[test]
    fn test_preflight_classification() {
        assert!(Error::validation("File[/x]", "bad").is_preflight());
        assert!(
            Error::UnresolvedParameter {
                component: "percona::db".into(),
                name: "user".into(),
            }
            .is_preflight()
        );
        assert!(
            !Error::Apply {
                resource: ResourceId::new(Kind::Exec, "x"),
                message: "exit 1".into(),
            }
            .is_preflight()
        );
    }
}
