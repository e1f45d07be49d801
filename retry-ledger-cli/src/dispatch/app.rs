// Copyright (c) The retry-ledger Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level application and command routing.

use super::{
    commands::{
        DispatchOpts, ExecutionIdOpts, IngestOpts, RerunOpts, StatusOpts, exec_classify,
        exec_reset,
    },
    common::{BaseApp, CommonOpts},
};
use crate::{
    Result,
    output::{OutputContext, OutputWriter},
};
use clap::Subcommand;

/// Retry coordination and result aggregation for BDD test runs.
///
/// A shell driver runs the test harness, feeds its lifecycle events to `retry-ledger ingest`, and
/// relaunches the harness with the rerun artifact while `retry-ledger rerun --check` exits with
/// code 4.
#[derive(Debug, clap::Parser)]
#[command(
    version,
    bin_name = "retry-ledger",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct LedgerApp {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    command: Command,
}

impl LedgerApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.common.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        self.exec_with_env(output, output_writer, |name| std::env::var(name).ok())
    }

    /// Executes the app, reading control flags through `lookup` instead of the environment.
    pub(crate) fn exec_with_env<F>(
        self,
        output: OutputContext,
        output_writer: &mut OutputWriter,
        lookup: F,
    ) -> Result<i32>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = BaseApp::new(&self.common, output, lookup)?;
        match self.command {
            Command::Ingest(opts) => opts.exec(&base),
            Command::Status(opts) => opts.exec(&base, output_writer),
            Command::Classify => exec_classify(&base, output_writer),
            Command::Rerun(opts) => opts.exec(&base, output_writer),
            Command::ExecutionId(opts) => opts.exec(&base, output_writer),
            Command::Dispatch(opts) => opts.exec(&base),
            Command::Reset => exec_reset(&base),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply lifecycle events from one test process invocation
    ///
    /// Events are JSON objects, one per line, tagged with an `event` field: `run-started`,
    /// `started`, `passed-finished`, `failed-finished` or `run-finished`. Unless
    /// RETRY_LEDGER_RERUN is set, retry state from an earlier run is cleared first.
    Ingest(IngestOpts),

    /// Show the aggregated record of every test
    Status(StatusOpts),

    /// Print whether the current run is single-run or retry-bearing
    Classify,

    /// List scenarios waiting to be relaunched
    Rerun(RerunOpts),

    /// Print the execution id shared by the current run
    ExecutionId(ExecutionIdOpts),

    /// Dispatch the final report from the persisted attempt history
    Dispatch(DispatchOpts),

    /// Remove all retry state
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use camino_tempfile::Utf8TempDir;
    use clap::Parser;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use retry_ledger_metadata::LedgerExitCode;
    use std::collections::HashMap;

    const CONFIG: &str = indoc! {r#"
        [retries]
        enabled = true
        count = 2

        [reporting]
        project = "QA"
    "#};

    const FIRST_RUN: &str = indoc! {r#"
        {"event":"run-started"}
        {"event":"started","test":{"name":"Checkout","key":"QA-1","location":"features/checkout.feature:5"}}
        {"event":"failed-finished","test":{"name":"Checkout","key":"QA-1","location":"features/checkout.feature:5"},"duration-millis":120,"message":"cart empty"}

        {"event":"started","test":{"name":"Login","key":"QA-2","location":"features/login.feature:2"}}
        {"event":"passed-finished","test":{"name":"Login","key":"QA-2","location":"features/login.feature:2"},"duration-millis":40}
        {"event":"run-finished"}
    "#};

    const SECOND_RUN: &str = indoc! {r#"
        {"event":"run-started"}
        {"event":"started","test":{"name":"Checkout","key":"QA-1","location":"features/checkout.feature:5"}}
        {"event":"passed-finished","test":{"name":"Checkout","key":"QA-1","location":"features/checkout.feature:5"},"duration-millis":90}
        {"event":"run-finished"}
    "#};

    struct Workspace {
        dir: Utf8TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = Utf8TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join(".config")).unwrap();
            std::fs::write(dir.path().join(".config/retry-ledger.toml"), CONFIG).unwrap();
            Self { dir }
        }

        fn root(&self) -> &Utf8Path {
            self.dir.path()
        }

        fn write_events(&self, name: &str, contents: &str) -> String {
            let path = self.root().join(name);
            std::fs::write(&path, contents).unwrap();
            path.into_string()
        }

        fn run(&self, args: &[&str], env: &[(&str, &str)]) -> (Result<i32>, String) {
            let mut argv = vec!["retry-ledger", "--workspace-root", self.root().as_str()];
            argv.extend_from_slice(args);
            let app = LedgerApp::try_parse_from(argv).unwrap();

            let env: HashMap<String, String> = env
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            let mut writer = OutputWriter::Test { stdout: Vec::new() };
            let result = app.exec_with_env(OutputContext::for_tests(), &mut writer, |name| {
                env.get(name).cloned()
            });
            (result, writer.stdout_string())
        }
    }

    #[test]
    fn shell_driver_retry_loop() {
        let workspace = Workspace::new();
        let first = workspace.write_events("first.jsonl", FIRST_RUN);
        let second = workspace.write_events("second.jsonl", SECOND_RUN);

        let (result, _) = workspace.run(&["ingest", &first], &[]);
        assert_eq!(result.unwrap(), LedgerExitCode::OK);

        let (result, stdout) = workspace.run(&["rerun", "--check"], &[]);
        assert_eq!(result.unwrap(), LedgerExitCode::RERUN_PENDING);
        assert_eq!(stdout, "features/checkout.feature:5\n");

        let (result, _) = workspace.run(
            &["ingest", &second],
            &[
                ("RETRY_LEDGER_RERUN", "1"),
                ("RETRY_LEDGER_FINAL_ATTEMPT", "true"),
            ],
        );
        assert_eq!(result.unwrap(), LedgerExitCode::OK);

        let (result, stdout) = workspace.run(&["rerun", "--check"], &[]);
        assert_eq!(result.unwrap(), LedgerExitCode::OK);
        assert_eq!(stdout, "");

        let (_, stdout) = workspace.run(&["classify"], &[]);
        assert_eq!(stdout, "retry-bearing\n");

        let (_, stdout) = workspace.run(&["status"], &[]);
        assert_eq!(
            stdout,
            indoc! {"
                FLAKY QA-1 Checkout (2 attempts, 1 failed)
                 PASS QA-2 Login (1 attempt, 0 failed)
                2 tests: 2 passed (1 flaky), 0 failed, 3 attempts [retry-bearing]
            "}
        );

        let consolidated = workspace
            .root()
            .join("target/retry-ledger/consolidated-junit.xml");
        assert!(consolidated.is_file(), "consolidated report written");

        let outbox = workspace.root().join("target/retry-ledger/outbox");
        let statuses = std::fs::read_dir(&outbox)
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("status-")
            })
            .count();
        assert_eq!(statuses, 2);
    }

    #[test]
    fn fresh_ingest_discards_previous_run() {
        let workspace = Workspace::new();
        let first = workspace.write_events("first.jsonl", FIRST_RUN);

        workspace.run(&["ingest", &first], &[]).0.unwrap();
        workspace.run(&["ingest", &first], &[]).0.unwrap();

        let (_, stdout) = workspace.run(&["status", "--json"], &[]);
        let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
        assert_eq!(status["summary"]["totalAttempts"], 2);
        assert_eq!(status["records"]["key:QA-1"]["failedAttempts"], 1);
    }

    #[test]
    fn invalid_event_reports_line_number() {
        let workspace = Workspace::new();
        let events = workspace.write_events(
            "bad.jsonl",
            indoc! {r#"
                {"event":"run-started"}
                {"event":"paused"}
            "#},
        );

        let (result, _) = workspace.run(&["ingest", &events], &[]);
        let error = result.unwrap_err();
        assert_eq!(error.process_exit_code(), LedgerExitCode::INGEST_FAILED);
        assert!(
            matches!(error, crate::ExpectedError::EventParseError { line_number: 2, .. }),
            "{error:?}"
        );
    }

    #[test]
    fn invalid_control_flag_is_a_setup_error() {
        let workspace = Workspace::new();
        let (result, _) = workspace.run(&["classify"], &[("RETRY_LEDGER_MAX_RETRIES", "many")]);
        assert_eq!(
            result.unwrap_err().process_exit_code(),
            LedgerExitCode::SETUP_ERROR
        );
    }

    #[test]
    fn execution_id_and_reset() {
        let workspace = Workspace::new();

        let (_, stdout) = workspace.run(&["execution-id"], &[]);
        assert_eq!(stdout, "");

        let (_, created) = workspace.run(&["execution-id", "--create"], &[]);
        assert!(created.starts_with("QA-LOCAL-"), "{created}");
        let (_, again) = workspace.run(&["execution-id"], &[]);
        assert_eq!(again, created);

        let (_, overridden) = workspace.run(
            &["execution-id"],
            &[("RETRY_LEDGER_EXECUTION_ID", "QA-77")],
        );
        assert_eq!(overridden, "QA-77\n");

        assert_eq!(workspace.run(&["reset"], &[]).0.unwrap(), LedgerExitCode::OK);
        let (_, stdout) = workspace.run(&["execution-id"], &[]);
        assert_eq!(stdout, "");
    }

    #[test]
    fn dispatch_requires_final_attempt() {
        let workspace = Workspace::new();
        let first = workspace.write_events("first.jsonl", FIRST_RUN);
        let second = workspace.write_events("second.jsonl", SECOND_RUN);
        workspace.run(&["ingest", &first], &[]).0.unwrap();
        workspace
            .run(&["ingest", &second], &[("RETRY_LEDGER_RERUN", "1")])
            .0
            .unwrap();

        let outbox = workspace.root().join("target/retry-ledger/outbox");
        let count_statuses = || {
            std::fs::read_dir(&outbox)
                .map(|entries| {
                    entries
                        .filter(|entry| {
                            entry
                                .as_ref()
                                .unwrap()
                                .file_name()
                                .to_string_lossy()
                                .starts_with("status-")
                        })
                        .count()
                })
                .unwrap_or(0)
        };

        workspace.run(&["dispatch"], &[]).0.unwrap();
        assert_eq!(count_statuses(), 0);

        workspace.run(&["dispatch", "--final-attempt"], &[]).0.unwrap();
        assert_eq!(count_statuses(), 2);
    }
}
