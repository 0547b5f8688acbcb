//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use smarthome_core::Connectivity;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Connectivity label, colored when `color` is set.
pub fn connectivity(state: Connectivity, color: bool) -> String {
    let label = state.to_string();
    if !color {
        return label;
    }
    match state {
        Connectivity::Connected => label.green().to_string(),
        Connectivity::PartiallyDown => label.yellow().to_string(),
        Connectivity::AllDown => label.red().bold().to_string(),
        Connectivity::Unknown => label.dimmed().to_string(),
    }
}

/// `on` / `off` / empty for an optional switch state.
pub fn power(state: Option<bool>, color: bool) -> String {
    match (state, color) {
        (Some(true), true) => "on".green().to_string(),
        (Some(false), true) => "off".dimmed().to_string(),
        (Some(true), false) => "on".into(),
        (Some(false), false) => "off".into(),
        (None, _) => String::new(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Item {
        id: &'static str,
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "ID")]
        id: String,
    }

    fn render(format: &OutputFormat) -> String {
        let data = [Item { id: "a" }, Item { id: "b" }];
        render_list(format, &data, |i| Row { id: i.id.into() }, |i| i.id.into()).unwrap()
    }

    #[test]
    fn formats() {
        assert_eq!(render(&OutputFormat::Plain), "a\nb");
        assert_eq!(render(&OutputFormat::JsonCompact), r#"[{"id":"a"},{"id":"b"}]"#);
        assert!(render(&OutputFormat::Table).contains("ID"));
    }

    #[test]
    fn uncolored_labels() {
        assert_eq!(connectivity(Connectivity::AllDown, false), "all_down");
        assert_eq!(power(Some(true), false), "on");
        assert_eq!(power(None, false), "");
    }
}
