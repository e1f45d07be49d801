// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    ControlFlags, RetryPolicy, RetrySetting,
    retry_setting::{deserialize_opt_retry_setting, deserialize_retry_setting},
};
use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Overall configuration for retry-ledger.
///
/// This is the root data structure for retry-ledger configuration. Most runs use
/// [`LedgerConfig::from_sources`]; per-process switches come from [`ControlFlags`] and are applied
/// on top when building a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    workspace_root: Utf8PathBuf,
    store_dir: Utf8PathBuf,
    retries: RetrySetting,
    overrides: Vec<RetryOverride>,
    rerun: RerunSettings,
    reporting: ReportingSettings,
}

impl LedgerConfig {
    /// The default location of the config within the path: `.config/retry-ledger.toml`, used to
    /// read the config from the given directory.
    pub const CONFIG_PATH: &'static str = ".config/retry-ledger.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the config from the given file, or if not specified from `.config/retry-ledger.toml`
    /// in the workspace root. A missing default file is not an error; a missing explicit file is.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            let keys: Vec<_> = unknown.into_iter().collect();
            warn!(
                config_file = %config_file,
                "ignoring unknown configuration keys: {}",
                keys.join(", "),
            );
        }

        Self::from_deserialized(workspace_root, deserialized)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))
    }

    /// Returns the default config, with paths resolved against `workspace_root`.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let (deserialized, unknown) =
            Self::build_and_deserialize_config(&Self::make_default_config())
                .expect("default config is always valid");
        assert!(
            unknown.is_empty(),
            "found unknown keys in default config: {unknown:?}"
        );
        Self::from_deserialized(workspace_root.into(), deserialized)
            .expect("default config is always valid")
    }

    /// Returns the workspace root paths are resolved against.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the directory holding the attempt store and the persisted execution id.
    pub fn store_dir(&self) -> &Utf8Path {
        &self.store_dir
    }

    /// Returns the global retry setting from the config file.
    pub fn retries(&self) -> RetrySetting {
        self.retries
    }

    /// Returns the configured retry overrides, in file order.
    pub fn overrides(&self) -> &[RetryOverride] {
        &self.overrides
    }

    /// Returns the rerun artifact settings.
    pub fn rerun(&self) -> &RerunSettings {
        &self.rerun
    }

    /// Returns the reporting settings.
    pub fn reporting(&self) -> &ReportingSettings {
        &self.reporting
    }

    /// Builds the retry policy for this process, applying control flags over the config file.
    pub fn retry_policy(&self, flags: &ControlFlags) -> RetryPolicy {
        let mut global = self.retries;
        if let Some(enabled) = flags.retry_enabled {
            global.enabled = enabled;
        }
        if let Some(count) = flags.max_retries {
            global.count = count;
        }
        RetryPolicy::new(global, self.overrides.clone())
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn from_deserialized(
        workspace_root: Utf8PathBuf,
        deserialized: LedgerConfigDeserialize,
    ) -> Result<Self, ConfigParseErrorKind> {
        let overrides = deserialized
            .overrides
            .into_iter()
            .enumerate()
            .map(|(index, data)| RetryOverride::new(index + 1, data))
            .collect::<Result<Vec<_>, _>>()?;

        let resolve = |path: Utf8PathBuf| workspace_root.join(path);
        let reporting = deserialized.reporting;

        Ok(Self {
            store_dir: resolve(deserialized.store.dir),
            retries: deserialized.retries,
            overrides,
            rerun: RerunSettings {
                path: resolve(deserialized.rerun.path),
                immediate: deserialized.rerun.immediate,
            },
            reporting: ReportingSettings {
                project: reporting.project,
                summary: reporting.summary,
                plain_report: reporting.plain_report.map(resolve),
                consolidated_report: resolve(reporting.consolidated_report),
                outbox_dir: resolve(reporting.outbox_dir),
            },
            workspace_root,
        })
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(LedgerConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: LedgerConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key. Drop it from the config error since
                // the path is reported separately.
                let path = error.path().to_string();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError { path, error }
            })?;

        Ok((config, ignored))
    }
}

/// Where and how the rerun artifact is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RerunSettings {
    /// The artifact path.
    pub path: Utf8PathBuf,

    /// Rewrite the artifact after every retriable failure rather than only at run end.
    pub immediate: bool,
}

/// Settings for the final report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportingSettings {
    /// The project new executions are created in.
    pub project: String,

    /// The summary given to new executions.
    pub summary: String,

    /// The per-attempt report written by the test harness, if any.
    pub plain_report: Option<Utf8PathBuf>,

    /// Where the consolidated report is written.
    pub consolidated_report: Utf8PathBuf,

    /// The outbox directory used by [`OutboxReportingService`](crate::reporter::OutboxReportingService).
    pub outbox_dir: Utf8PathBuf,
}

/// A retry budget that applies to a test or to a whole class of tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryOverride {
    test: Option<String>,
    class: Option<String>,
    retries: RetrySetting,
}

impl RetryOverride {
    /// Creates an override for a single test, matched by name or external key.
    pub fn for_test(test: impl Into<String>, retries: RetrySetting) -> Self {
        Self {
            test: Some(test.into()),
            class: None,
            retries,
        }
    }

    /// Creates an override for every test in a class or feature.
    pub fn for_class(class: impl Into<String>, retries: RetrySetting) -> Self {
        Self {
            test: None,
            class: Some(class.into()),
            retries,
        }
    }

    fn new(index: usize, data: RetryOverrideDeserialize) -> Result<Self, ConfigParseErrorKind> {
        if data.test.is_none() && data.class.is_none() {
            return Err(ConfigParseErrorKind::InvalidOverride {
                index,
                reason: "at least one of `test` or `class` must be specified",
            });
        }
        let Some(retries) = data.retries else {
            return Err(ConfigParseErrorKind::InvalidOverride {
                index,
                reason: "`retries` must be specified",
            });
        };
        Ok(Self {
            test: data.test,
            class: data.class,
            retries,
        })
    }

    /// The test name or key this override is restricted to.
    pub fn test(&self) -> Option<&str> {
        self.test.as_deref()
    }

    /// The class or feature this override is restricted to.
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    /// The retry setting granted by this override.
    pub fn retries(&self) -> RetrySetting {
        self.retries
    }

    /// Returns true if this override names a specific test (as opposed to only a class).
    pub(crate) fn is_test_level(&self) -> bool {
        self.test.is_some()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LedgerConfigDeserialize {
    store: StoreConfigDeserialize,
    #[serde(deserialize_with = "deserialize_retry_setting")]
    retries: RetrySetting,
    #[serde(default)]
    overrides: Vec<RetryOverrideDeserialize>,
    rerun: RerunConfigDeserialize,
    reporting: ReportingConfigDeserialize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoreConfigDeserialize {
    dir: Utf8PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RetryOverrideDeserialize {
    #[serde(default)]
    test: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_retry_setting")]
    retries: Option<RetrySetting>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RerunConfigDeserialize {
    path: Utf8PathBuf,
    immediate: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReportingConfigDeserialize {
    project: String,
    summary: String,
    #[serde(default)]
    plain_report: Option<Utf8PathBuf>,
    consolidated_report: Utf8PathBuf,
    outbox_dir: Utf8PathBuf,
}
