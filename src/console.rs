//! Terminal helpers shared by the command-line tools.

use crossterm::style::Stylize;
use env_logger::Env;

/// Installs the logger. `RUST_LOG` overrides the default `warn` level.
pub fn init_logging() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();
}

/// `[PASS]` in green or `[FAIL]` in red.
pub fn verdict(passed: bool) -> String {
    if passed {
        "[PASS]".green().bold().to_string()
    } else {
        "[FAIL]".red().bold().to_string()
    }
}

/// Colours a whole summary line by outcome.
pub fn highlight(text: &str, passed: bool) -> String {
    if passed {
        text.green().to_string()
    } else {
        text.red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_names_the_outcome() {
        assert!(verdict(true).contains("PASS"));
        assert!(verdict(false).contains("FAIL"));
    }

    #[test]
    fn highlight_keeps_text() {
        assert!(highlight("ALL TESTS PASSED", true).contains("ALL TESTS PASSED"));
    }
}
