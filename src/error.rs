// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{borrow::Cow, fmt::Display};

pub type Result<T> = ::std::result::Result<T, Error>;

/// The category of failure raised by the query subsystem.
///
/// `IndexMissing` is deliberately absent from this enum: a missing index at
/// plan time is handled internally by falling back to a full table scan
/// (`spec.md` §4.5 / §7) and never escapes as an `Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A caller-supplied argument was structurally invalid (empty collection
    /// name, wrong arity for an intrinsic function, ...).
    InvalidArgument,

    /// The parser or evaluator encountered a construct the query layer does
    /// not support (unsupported node kind, unknown function name, array
    /// indexing, a conditional whose test depends on the row, ...).
    NotSupported,

    /// A terminal or the executor observed a caller-supplied cancellation
    /// flag set between row deliveries.
    Cancelled,

    /// `Evaluate` was asked to coerce a non-boolean `Constant` to a boolean.
    InvalidState,

    /// `First`/`Single`/`ElementAt` (and friends) were applied to a stream
    /// that did not have enough rows to satisfy the operator's contract.
    SequenceEmpty,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "invalid argument"),
            ErrorKind::NotSupported => write!(f, "construct not supported by the query layer"),
            ErrorKind::Cancelled => write!(f, "query cancelled"),
            ErrorKind::InvalidState => write!(f, "invalid evaluator state"),
            ErrorKind::SequenceEmpty => write!(f, "sequence contained no matching element"),
        }
    }
}

impl ErrorKind {
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::from(self).with_source(source)
    }

    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::from(self).with_message(message)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    message: Option<Cow<'static, str>>,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            message: None,
        }
    }
}

impl Error {
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.source.as_ref()?;
        Some(&**source)
    }
}
