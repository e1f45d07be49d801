// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Options and state shared by every subcommand.

use crate::{ExpectedError, Result, output::OutputContext};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use retry_ledger::config::{ControlFlags, LedgerConfig};

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct CommonOpts {
    /// Directory relative paths in the config are resolved against [default: current directory].
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = "RETRY_LEDGER_WORKSPACE_ROOT"
    )]
    pub(crate) workspace_root: Option<Utf8PathBuf>,

    #[clap(flatten)]
    pub(crate) output: crate::output::OutputOpts,

    #[clap(flatten)]
    pub(crate) config_opts: ConfigOpts,
}

impl CommonOpts {
    pub(crate) fn workspace_root(&self) -> Result<Utf8PathBuf> {
        match &self.workspace_root {
            Some(root) => Ok(root.clone()),
            None => {
                let dir = std::env::current_dir()
                    .map_err(|error| ExpectedError::CurrentDirFailed { error })?;
                Utf8PathBuf::try_from(dir).map_err(|error| ExpectedError::CurrentDirInvalidUtf8 {
                    path: error.into_path_buf(),
                })
            }
        }
    }
}

/// Configuration options.
#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
pub(crate) struct ConfigOpts {
    /// Config file [default: workspace-root/.config/retry-ledger.toml].
    #[arg(long, global = true, value_name = "PATH", env = "RETRY_LEDGER_CONFIG")]
    pub(crate) config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    /// Reads the config with the given options.
    pub(crate) fn make_config(&self, workspace_root: &Utf8Path) -> Result<LedgerConfig> {
        Ok(LedgerConfig::from_sources(
            workspace_root,
            self.config_file.as_deref(),
        )?)
    }
}

/// Everything a subcommand needs: the resolved config, the control flags from the environment
/// and the output context.
#[derive(Debug)]
pub(crate) struct BaseApp {
    pub(crate) output: OutputContext,
    pub(crate) config: LedgerConfig,
    pub(crate) flags: ControlFlags,
}

impl BaseApp {
    pub(crate) fn new<F>(common: &CommonOpts, output: OutputContext, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspace_root = common.workspace_root()?;
        let config = common.config_opts.make_config(&workspace_root)?;
        let flags = ControlFlags::from_lookup(lookup)?;
        Ok(Self {
            output,
            config,
            flags,
        })
    }
}
