//! End-of-run summary table and exit codes.

use std::fmt::Write as _;

use upkeep_runner::{JobState, RunSummary};

/// Exit code when every enabled plugin succeeded.
pub const EXIT_OK: i32 = 0;
/// Exit code when any plugin failed, even under continue-on-error.
pub const EXIT_FAILED: i32 = 1;
/// Exit code for configuration errors (bad graph, unknown plugin).
pub const EXIT_CONFIG: i32 = 2;
/// Exit code when the user interrupted the run.
pub const EXIT_INTERRUPTED: i32 = 130;

/// The process exit code for a finished run.
pub fn exit_code(summary: &RunSummary, user_interrupted: bool) -> i32 {
    if user_interrupted || summary.cancelled > 0 {
        EXIT_INTERRUPTED
    } else if summary.failed > 0 {
        EXIT_FAILED
    } else {
        EXIT_OK
    }
}

/// Render the summary table printed after the run.
pub fn format_summary(summary: &RunSummary) -> String {
    let name_width = summary
        .outcomes
        .iter()
        .map(|o| o.name.len())
        .max()
        .unwrap_or(6)
        .max(6);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<name_width$}  {:<10}  {:>8}  {:>9}  error",
        "plugin", "state", "packages", "time"
    );
    for outcome in &summary.outcomes {
        let _ = writeln!(
            out,
            "{:<name_width$}  {:<10}  {:>8}  {:>8.1}s  {}",
            outcome.name,
            outcome.state.to_string(),
            outcome.packages_updated,
            outcome.wall_time.as_secs_f64(),
            outcome.error.as_deref().unwrap_or("-"),
        );
    }
    let _ = writeln!(
        out,
        "\nsuccessful={} failed={} skipped={} cancelled={} in {:.1}s",
        summary.successful,
        summary.failed,
        summary.skipped,
        summary.cancelled,
        summary.wall_time.as_secs_f64(),
    );
    out
}
