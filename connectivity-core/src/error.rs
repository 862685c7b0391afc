// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The connectivity runtime's error taxonomy (spec §7).
//!
//! One [`ConnectivityError`] wraps a [`ConnectivityErrorKind`] naming the semantic category,
//! plus optional structured context, so callers can match on [`ConnectivityError::kind`]
//! without downcasting a boxed trait object.

use std::fmt;

use thiserror::Error;

/// An error produced anywhere in the connectivity runtime.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ConnectivityError {
    kind: ConnectivityErrorKind,
    /// True if this error was identified synchronously, before any I/O was attempted.
    pub is_shallow: bool,
    /// True if this error was detected by a remote component rather than locally.
    pub is_remote: bool,
    /// Name of the property/placeholder/field this error concerns, if applicable.
    pub property_name: Option<String>,
    /// Value of the property/placeholder/field this error concerns, if applicable.
    pub property_value: Option<String>,
}

impl ConnectivityError {
    /// Construct a new error of the given kind with no additional context.
    #[must_use]
    pub fn new(kind: ConnectivityErrorKind) -> Self {
        Self {
            kind,
            is_shallow: true,
            is_remote: false,
            property_name: None,
            property_value: None,
        }
    }

    /// Attach a property name/value pair identifying what this error concerns.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.property_name = Some(name.into());
        self.property_value = Some(value.into());
        self
    }

    /// Mark this error as having been detected by a remote component.
    #[must_use]
    pub fn remote(mut self) -> Self {
        self.is_remote = true;
        self
    }

    /// Mark this error as having surfaced only after I/O was attempted (not synchronously).
    #[must_use]
    pub fn deep(mut self) -> Self {
        self.is_shallow = false;
        self
    }

    /// The semantic category of this error.
    #[must_use]
    pub fn kind(&self) -> &ConnectivityErrorKind {
        &self.kind
    }
}

/// Semantic categories of [`ConnectivityError`], per spec §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityErrorKind {
    /// A connection, source, target, or mapping definition failed protocol-specific or
    /// placeholder-namespace validation. Fails the open/test operation synchronously.
    ConnectionConfigurationInvalid,
    /// A mapper produced more signals/messages than the configured per-mapping limit, or a
    /// mapper invocation otherwise failed.
    MessageMappingFailed,
    /// A placeholder template referenced a namespace/name that could not be resolved in strict
    /// mode.
    UnresolvedPlaceholder {
        /// The unresolved `ns:name` token.
        token: String,
    },
    /// An inbound message's resolved enforcement input did not match any resolved filter.
    ConnectionSignalIdEnforcementFailed,
    /// A downstream collaborator reported the addressed thing does not exist or is not
    /// accessible. Surfaced from outside the core; never raised internally.
    ThingNotAccessible,
    /// A transient I/O failure from the underlying protocol client (connection reset, broker
    /// unavailable, etc).
    TransientIo,
}

impl fmt::Display for ConnectivityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityErrorKind::ConnectionConfigurationInvalid => {
                write!(f, "connection configuration is invalid")
            }
            ConnectivityErrorKind::MessageMappingFailed => write!(f, "message mapping failed"),
            ConnectivityErrorKind::UnresolvedPlaceholder { token } => {
                write!(f, "unresolved placeholder: {token}")
            }
            ConnectivityErrorKind::ConnectionSignalIdEnforcementFailed => {
                write!(f, "signal id enforcement failed")
            }
            ConnectivityErrorKind::ThingNotAccessible => write!(f, "thing is not accessible"),
            ConnectivityErrorKind::TransientIo => write!(f, "transient I/O failure"),
        }
    }
}
