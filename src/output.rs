//! # Output
//!
//! Terminal presentation for the commands: color/emoji selection, stage
//! progress bars and the end-of-run summary.
//!
//! ## Respecting User Preferences
//!
//! Color (and with it, emoji) is controlled by:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals
//!
//! Progress bars are only drawn on a terminal, and never with `--quiet`.

use std::env;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::stages::RunSummary;

/// Longest failure reason printed in the summary, in characters.
const SUMMARY_REASON_CHARS: usize = 400;

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
    /// Suppress progress and summaries on stdout.
    pub quiet: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// # Arguments
    /// * `color_flag` - The value of the --color CLI flag: "always", "never", or "auto"
    ///
    /// In auto mode, colors are disabled if `NO_COLOR` is set, `CLICOLOR=0`,
    /// `TERM=dumb`, or stdout is not a TTY (unless `CLICOLOR_FORCE=1`).
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self {
            use_color,
            quiet: false,
        }
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn detect_color_support() -> bool {
        // Presence alone disables colors, even when empty
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    #[cfg(test)]
    pub fn with_color() -> Self {
        Self {
            use_color: true,
            quiet: false,
        }
    }

    #[cfg(test)]
    pub fn without_color() -> Self {
        Self {
            use_color: false,
            quiet: false,
        }
    }

    /// Progress bar for `len` packages, hidden when quiet or not on a
    /// terminal.
    pub fn progress_bar(&self, len: usize, stage: &str) -> ProgressBar {
        if self.quiet || !console::Term::stdout().is_term() {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{prefix:>8} [{bar:30}] {pos}/{len} {wide_msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(stage.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns the emoji when colors are enabled, otherwise the plain text.
///
/// # Example
/// ```rust,ignore
/// let config = OutputConfig::from_env_and_flag("auto");
/// println!("{} Installing...", emoji(&config, "📦", "[INSTALL]"));
/// ```
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// Renders the end-of-run summary: counts, then one line per failure with
/// its reason truncated.
pub fn format_summary(config: &OutputConfig, title: &str, summary: &RunSummary) -> String {
    let mut text = format!(
        "\n{} {}: {} passed, {} failed, {} skipped\n",
        emoji(config, "📊", "[SUMMARY]"),
        title,
        summary.passed,
        summary.failed,
        summary.skipped
    );
    for (package, reason) in &summary.failures {
        text.push_str(&format!(
            "  {} {}: {}\n",
            emoji(config, "❌", "[FAIL]"),
            package,
            truncate_reason(reason)
        ));
    }
    text
}

/// Prints [`format_summary`] unless quiet.
pub fn print_summary(config: &OutputConfig, title: &str, summary: &RunSummary) {
    if !config.quiet {
        print!("{}", format_summary(config, title, summary));
    }
}

/// First line of `reason`, capped at [`SUMMARY_REASON_CHARS`].
fn truncate_reason(reason: &str) -> String {
    let first = reason.lines().next().unwrap_or_default();
    if first.chars().count() <= SUMMARY_REASON_CHARS {
        return first.to_string();
    }
    let mut cut: String = first.chars().take(SUMMARY_REASON_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_always() {
        let config = OutputConfig::from_env_and_flag("always");
        assert!(config.use_color);
    }

    #[test]
    fn test_color_never() {
        let config = OutputConfig::from_env_and_flag("never");
        assert!(!config.use_color);
    }

    #[test]
    fn test_emoji_helper() {
        assert_eq!(emoji(&OutputConfig::with_color(), "📦", "[PKG]"), "📦");
        assert_eq!(emoji(&OutputConfig::without_color(), "📦", "[PKG]"), "[PKG]");
    }

    #[test]
    fn test_summary_lists_failures_with_first_line_only() {
        let summary = RunSummary {
            passed: 3,
            failed: 1,
            skipped: 2,
            failures: vec![(
                "is-regex".to_string(),
                "Test failed with exit code 1\n--- stderr ---\nboom".to_string(),
            )],
        };
        let text = format_summary(&OutputConfig::without_color(), "test", &summary);
        assert!(text.contains("[SUMMARY] test: 3 passed, 1 failed, 2 skipped"));
        assert!(text.contains("[FAIL] is-regex: Test failed with exit code 1\n"));
        assert!(!text.contains("boom"));
    }

    #[test]
    fn test_truncate_reason() {
        let long = "x".repeat(SUMMARY_REASON_CHARS + 10);
        let cut = truncate_reason(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), SUMMARY_REASON_CHARS + 3);
    }

    #[test]
    fn test_quiet_progress_bar_is_hidden() {
        let config = OutputConfig::without_color().with_quiet(true);
        assert!(config.progress_bar(5, "install").is_hidden());
    }
}
