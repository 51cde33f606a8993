//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use clap::ValueEnum;
use netrules_config::OutputSection;
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};
use crate::error::CliError;

// ── Resolved output settings ─────────────────────────────────────────

/// Output settings after merging flags over the `[output]` section.
#[derive(Debug, Clone, Copy)]
pub struct Ui {
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
    /// Results of mutating commands give way to the recorded router
    /// commands.
    pub dry_run: bool,
}

impl Ui {
    pub fn resolve(global: &GlobalOpts, section: &OutputSection) -> Result<Self, CliError> {
        let format = match global.output {
            Some(format) => format,
            None => OutputFormat::from_str(&section.format, true).map_err(|reason| {
                CliError::Validation {
                    field: "output.format".into(),
                    reason,
                }
            })?,
        };
        let color = match global.color {
            Some(mode) => mode,
            None => ColorMode::from_str(&section.color, true).map_err(|reason| {
                CliError::Validation {
                    field: "output.color".into(),
                    reason,
                }
            })?,
        };
        Ok(Self {
            format,
            color: should_color(color),
            quiet: global.quiet,
            dry_run: global.dry_run,
        })
    }

    pub fn success(&self, message: &str) {
        print_success(message, self.color, self.quiet);
    }

    pub fn warning(&self, message: &str) {
        print_warning(message, self.color);
    }

    pub fn print(&self, output: &str) {
        print_output(output, self.quiet);
    }

    /// Print the result of a mutating command.
    pub fn result(&self, output: &str) {
        if !self.dry_run {
            self.print(output);
        }
    }
}

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Confirmation line on stderr, e.g. after a rule was created.
pub fn print_success(message: &str, color: bool, quiet: bool) {
    if quiet {
        return;
    }
    if color {
        eprintln!("{} {message}", "✓".green().bold());
    } else {
        eprintln!("{message}");
    }
}

/// Warning line on stderr. Printed even in quiet mode.
pub fn print_warning(message: &str, color: bool) {
    if color {
        eprintln!("{} {message}", "!".yellow().bold());
    } else {
        eprintln!("warning: {message}");
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `yaml`: serializes via serde_yaml
/// - `plain`: calls `id_fn` on each item to emit one identifier per line
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(render_table(&rows))
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(data.iter().map(&id_fn).collect::<Vec<_>>().join("\n")),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses a custom `detail_fn` that returns a pre-formatted
/// string, since single-item detail views don't use the `Tabled` derive.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(id_fn(data)),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> Result<String, CliError> {
    if compact {
        Ok(serde_json::to_string(data)?)
    } else {
        Ok(serde_json::to_string_pretty(data)?)
    }
}

fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    serde_yaml::to_string(data).map_err(|e| CliError::Render(e.to_string()))
}
