// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{SourceLocationParseError, SourceLocationParseErrorKind};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Identifies one test case as the driving harness knows it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestIdentity {
    /// The external test-management key (for example `QA-123`), if any.
    #[serde(default)]
    pub key: Option<String>,

    /// The human-readable test name. Always present.
    pub name: String,

    /// The class, feature file or suite the test belongs to. Used to match class-level retry
    /// overrides.
    #[serde(default)]
    pub class: Option<String>,

    /// Where the test is defined. Tests without a location can't be relaunched through the rerun
    /// artifact.
    #[serde(default)]
    pub location: Option<SourceLocation>,

    /// A retry budget attached to this test itself. Takes precedence over every configured
    /// override.
    #[serde(default)]
    pub retries: Option<u32>,
}

impl TestIdentity {
    /// Creates an identity with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            key: None,
            name: name.into(),
            class: None,
            location: None,
            retries: None,
        }
    }

    /// Sets the external key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the class or feature.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Sets the source location.
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets a test-level retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// The key this test is tracked under: `key:<external key>` if there is one, otherwise
    /// `name:<name>`.
    ///
    /// The prefixes keep the two kinds apart, so an unkeyed test named `QA-1` never shares a record
    /// with the test whose external key is `QA-1`.
    pub fn storage_key(&self) -> String {
        match &self.key {
            Some(key) => format!("key:{key}"),
            None => format!("name:{}", self.name),
        }
    }
}

/// A `path:line` location, the unit written to the rerun artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceLocation {
    path: String,
    line: u32,
}

impl SourceLocation {
    /// Creates a new location. `line` is 1-based.
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }

    /// The file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The 1-based line number.
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

impl FromStr for SourceLocation {
    type Err = SourceLocationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on the last colon so Windows drive letters stay part of the path.
        let Some((path, line)) = s.rsplit_once(':') else {
            return Err(SourceLocationParseError::new(
                s,
                SourceLocationParseErrorKind::MissingSeparator,
            ));
        };
        if path.is_empty() {
            return Err(SourceLocationParseError::new(
                s,
                SourceLocationParseErrorKind::EmptyPath,
            ));
        }
        let line: u32 = line.parse().map_err(|err| {
            SourceLocationParseError::new(s, SourceLocationParseErrorKind::InvalidLine(err))
        })?;
        if line == 0 {
            return Err(SourceLocationParseError::new(
                s,
                SourceLocationParseErrorKind::ZeroLine,
            ));
        }
        Ok(Self::new(path, line))
    }
}

impl TryFrom<String> for SourceLocation {
    type Error = SourceLocationParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceLocation> for String {
    fn from(value: SourceLocation) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("features/checkout.feature:12", "features/checkout.feature", 12; "plain")]
    #[test_case(r"C:\suite\login.feature:3", r"C:\suite\login.feature", 3; "drive letter")]
    #[test_case("a:b:7", "a:b", 7; "colon in path")]
    fn parse_valid(input: &str, path: &str, line: u32) {
        let location: SourceLocation = input.parse().unwrap();
        assert_eq!(location.path(), path);
        assert_eq!(location.line(), line);
        assert_eq!(location.to_string(), input);
    }

    #[test_case("checkout.feature"; "no separator")]
    #[test_case(":12"; "empty path")]
    #[test_case("checkout.feature:"; "empty line")]
    #[test_case("checkout.feature:twelve"; "non-numeric line")]
    #[test_case("checkout.feature:0"; "zero line")]
    fn parse_invalid(input: &str) {
        let err = input.parse::<SourceLocation>().unwrap_err();
        assert_eq!(err.input(), input);
    }

    #[test]
    fn storage_key_prefers_external_key() {
        let test = TestIdentity::new("Checkout");
        assert_eq!(test.storage_key(), "name:Checkout");
        let test = test.with_key("QA-7");
        assert_eq!(test.storage_key(), "key:QA-7");
    }

    #[test]
    fn storage_keys_of_names_and_external_keys_are_disjoint() {
        let unkeyed = TestIdentity::new("QA-7");
        let keyed = TestIdentity::new("Checkout").with_key("QA-7");
        assert_ne!(unkeyed.storage_key(), keyed.storage_key());
    }

    #[test]
    fn identity_deserializes_location_from_string() {
        let test: TestIdentity = serde_json::from_str(
            r#"{ "name": "Checkout", "location": "features/checkout.feature:4", "retries": 2 }"#,
        )
        .unwrap();
        assert_eq!(
            test.location,
            Some(SourceLocation::new("features/checkout.feature", 4))
        );
        assert_eq!(test.retries, Some(2));
        assert_eq!(test.key, None);
    }
}
