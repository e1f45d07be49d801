// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt, num::ParseIntError};

/// An error that occurs while parsing a [`SourceLocation`](crate::SourceLocation) from its
/// `path:line` form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocationParseError {
    input: String,
    kind: SourceLocationParseErrorKind,
}

impl SourceLocationParseError {
    pub(crate) fn new(input: impl Into<String>, kind: SourceLocationParseErrorKind) -> Self {
        Self {
            input: input.into(),
            kind,
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SourceLocationParseErrorKind {
    MissingSeparator,
    EmptyPath,
    InvalidLine(ParseIntError),
    ZeroLine,
}

impl fmt::Display for SourceLocationParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            SourceLocationParseErrorKind::MissingSeparator => {
                write!(f, "location `{}` is not of the form `path:line`", self.input)
            }
            SourceLocationParseErrorKind::EmptyPath => {
                write!(f, "location `{}` has an empty path", self.input)
            }
            SourceLocationParseErrorKind::InvalidLine(_) => {
                write!(f, "location `{}` has an invalid line number", self.input)
            }
            SourceLocationParseErrorKind::ZeroLine => {
                write!(f, "location `{}` has line 0 (lines start at 1)", self.input)
            }
        }
    }
}

impl error::Error for SourceLocationParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            SourceLocationParseErrorKind::InvalidLine(err) => Some(err),
            SourceLocationParseErrorKind::MissingSeparator
            | SourceLocationParseErrorKind::EmptyPath
            | SourceLocationParseErrorKind::ZeroLine => None,
        }
    }
}
