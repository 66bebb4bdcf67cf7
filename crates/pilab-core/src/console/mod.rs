//! Operator console: command parsing, help text and the output sink.

mod reader;

use std::io::Write;

use crate::catalog::{Catalog, ExperimentId};

pub use reader::read_commands;

/// Where operator-facing text goes. Diagnostics go to `tracing` instead.
pub trait Console: Send + Sync {
    fn line(&self, text: &str);
}

const _: () = {
    fn _assert_object_safe(_: &dyn Console) {}
};

/// Writes to stdout, one line per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn line(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not take the supervisor down.
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `v`
    Cycle,
    /// `1`, `2`, `3`
    Select(ExperimentId),
    /// `s`
    Status,
    /// `r`
    Restart,
    /// `q`
    Quit,
    /// `h`
    Help,
    Blank,
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse a line. Case-insensitive; surrounding whitespace is ignored.
    /// Experiment numbers outside `catalog` are [`ConsoleCommand::Unknown`].
    pub fn parse(line: &str, catalog: &Catalog) -> Self {
        let input = line.trim().to_ascii_lowercase();
        match input.as_str() {
            "" => ConsoleCommand::Blank,
            "v" => ConsoleCommand::Cycle,
            "s" => ConsoleCommand::Status,
            "r" => ConsoleCommand::Restart,
            "q" => ConsoleCommand::Quit,
            "h" => ConsoleCommand::Help,
            other => match catalog.parse_id(other) {
                Some(id) => ConsoleCommand::Select(id),
                None => ConsoleCommand::Unknown(line.trim().to_string()),
            },
        }
    }
}

/// Catalog listing and command summary printed by `h`.
pub fn help_text(catalog: &Catalog) -> String {
    let mut out = String::from("Available experiments:\n");
    for entry in catalog.entries() {
        let file = entry
            .program
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push_str(&format!("  {}  {} - {}\n", entry.id, file, entry.name));
        out.push_str(&format!("      {}\n", entry.description));
    }
    let numbers: Vec<String> = catalog.entries().iter().map(|e| e.id.to_string()).collect();
    out.push_str("\nCommands:\n");
    out.push_str("  v = cycle to the next experiment\n");
    out.push_str(&format!("  {} = jump to that experiment\n", numbers.join(",")));
    out.push_str("  s = show current status\n");
    out.push_str("  r = restart current experiment\n");
    out.push_str("  q = quit with graceful shutdown\n");
    out.push_str("  h = show this help\n");
    out.push_str("\nButton: short press = next experiment, hold 5s = shut down");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn parses_verbs_case_insensitively() {
        let catalog = Catalog::standard(Path::new("/lab"));
        assert_eq!(ConsoleCommand::parse("V\n", &catalog), ConsoleCommand::Cycle);
        assert_eq!(ConsoleCommand::parse("  s ", &catalog), ConsoleCommand::Status);
        assert_eq!(ConsoleCommand::parse("R", &catalog), ConsoleCommand::Restart);
        assert_eq!(ConsoleCommand::parse("q", &catalog), ConsoleCommand::Quit);
        assert_eq!(ConsoleCommand::parse("H", &catalog), ConsoleCommand::Help);
        assert_eq!(ConsoleCommand::parse("   ", &catalog), ConsoleCommand::Blank);
    }

    #[test]
    fn parses_experiment_numbers_from_catalog() {
        let catalog = Catalog::standard(Path::new("/lab"));
        assert_eq!(
            ConsoleCommand::parse("2", &catalog),
            ConsoleCommand::Select(ExperimentId::OledCalculator)
        );
        assert_eq!(
            ConsoleCommand::parse("4", &catalog),
            ConsoleCommand::Unknown("4".to_string())
        );
        assert_eq!(
            ConsoleCommand::parse(" quit ", &catalog),
            ConsoleCommand::Unknown("quit".to_string())
        );
    }

    #[test]
    fn help_lists_every_experiment() {
        let catalog = Catalog::standard(Path::new("/lab"));
        let help = help_text(&catalog);
        assert!(help.contains("1  ex1.py - LED Color Lottery System"));
        assert!(help.contains("3  ex3.py - Quantum Toffoli Gate"));
        assert!(help.contains("1,2,3 = jump to that experiment"));
    }
}
