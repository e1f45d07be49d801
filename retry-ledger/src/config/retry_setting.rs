// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Deserialize;
use std::{cmp::Ordering, fmt};

/// Type for the `retries` config key: how many times a failing test is relaunched.
///
/// Accepted either as a plain number (`retries = 2`) or as a table (`retries = { count = 2,
/// enabled = false }`).
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetrySetting {
    /// Maximum number of additional attempts after the first one.
    pub count: u32,

    /// Whether retries apply. Disabling retries is the same as a count of zero.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for RetrySetting {
    #[inline]
    fn default() -> Self {
        Self::new(0)
    }
}

impl RetrySetting {
    /// Creates a new, enabled setting with the given count.
    pub fn new(count: u32) -> Self {
        Self {
            count,
            enabled: true,
        }
    }

    /// Returns the number of retries this setting grants, taking `enabled` into account.
    pub fn effective_count(&self) -> u32 {
        if self.enabled { self.count } else { 0 }
    }
}

pub(in crate::config) fn deserialize_retry_setting<'de, D>(
    deserializer: D,
) -> Result<RetrySetting, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl<'de2> serde::de::Visitor<'de2> for V {
        type Value = RetrySetting;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "a table ({{ count = 2, enabled = true }}) or a number (2)"
            )
        }

        // Note that TOML uses i64, not u64.
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            match v.cmp(&0) {
                Ordering::Greater | Ordering::Equal => {
                    let v = u32::try_from(v).map_err(|_| {
                        serde::de::Error::invalid_value(
                            serde::de::Unexpected::Signed(v),
                            &"a positive u32",
                        )
                    })?;
                    Ok(RetrySetting::new(v))
                }
                Ordering::Less => Err(serde::de::Error::invalid_value(
                    serde::de::Unexpected::Signed(v),
                    &self,
                )),
            }
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let v = u32::try_from(v).map_err(|_| {
                serde::de::Error::invalid_value(
                    serde::de::Unexpected::Unsigned(v),
                    &"a positive u32",
                )
            })?;
            Ok(RetrySetting::new(v))
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de2>,
        {
            RetrySetting::deserialize(serde::de::value::MapAccessDeserializer::new(map))
        }
    }

    deserializer.deserialize_any(V)
}

pub(in crate::config) fn deserialize_opt_retry_setting<'de, D>(
    deserializer: D,
) -> Result<Option<RetrySetting>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_retry_setting(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LedgerConfig,
        errors::{ConfigParseErrorKind, DisplayErrorChain},
    };
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use test_case::test_case;

    fn parse(contents: &str) -> Result<LedgerConfig, crate::errors::ConfigParseError> {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("retry-ledger.toml");
        std::fs::write(&path, contents).unwrap();
        LedgerConfig::from_sources(dir.path(), Some(path.as_path()))
    }

    #[test]
    fn parse_retries_valid() {
        let config = parse(indoc! {r#"
            [retries]
            enabled = true
            count = 2

            [[overrides]]
            class = "features/checkout.feature"
            retries = 4

            [[overrides]]
            test = "Checkout with coupon"
            retries = { count = 1, enabled = false }
        "#})
        .expect("config is valid");

        assert_eq!(
            config.retries(),
            RetrySetting {
                count: 2,
                enabled: true
            }
        );
        let overrides = config.overrides();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[0].class(), Some("features/checkout.feature"));
        assert_eq!(overrides[0].retries(), RetrySetting::new(4));
        assert_eq!(overrides[1].test(), Some("Checkout with coupon"));
        assert_eq!(overrides[1].retries().effective_count(), 0);
    }

    #[test_case(
        indoc! {r#"
            [[overrides]]
            class = "checkout"
            retries = -1
        "#},
        "invalid value: integer `-1`"
        ; "negative count")]
    #[test_case(
        indoc! {r#"
            [[overrides]]
            class = "checkout"
            retries = { enabled = true }
        "#},
        "count"
        ; "table without count")]
    #[test_case(
        indoc! {r#"
            [[overrides]]
            class = "checkout"
            retries = { count = 1, backoff = "fixed" }
        "#},
        "unknown field `backoff`"
        ; "unknown table key")]
    #[test_case(
        indoc! {r#"
            [[overrides]]
            class = "checkout"
            retries = "three"
        "#},
        "a table ({ count = 2, enabled = true }) or a number (2)"
        ; "string count")]
    fn parse_retries_invalid(contents: &str, expected_message: &str) {
        let error = parse(contents).expect_err("config is invalid");
        assert!(
            matches!(error.kind(), ConfigParseErrorKind::DeserializeError { .. }),
            "expected a deserialize error, found {error:?}"
        );
        let message = DisplayErrorChain::new(&error).to_string();
        assert!(
            message.contains(expected_message),
            "error message `{message}` contains `{expected_message}`"
        );
    }

    #[test]
    fn disabled_setting_grants_no_retries() {
        let setting = RetrySetting {
            count: 5,
            enabled: false,
        };
        assert_eq!(setting.effective_count(), 0);
        assert_eq!(RetrySetting::new(5).effective_count(), 5);
    }
}
