//! Table output formatting for CLI commands
//!
//! Formats beam heads and reward summaries using comfy-table, with
//! value-graded colors when the terminal supports them.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use super::{format_value, truncate};
use crate::domain::models::Program;

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Format beam heads, best first
    pub fn format_programs(&self, programs: &[Program]) -> String {
        let mut table = self.create_base_table();

        table.set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Parent").add_attribute(Attribute::Bold),
            Cell::new("Depth").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
            Cell::new("Advantage").add_attribute(Attribute::Bold),
            Cell::new("Code").add_attribute(Attribute::Bold),
        ]);

        let best = programs.first().and_then(|p| p.value);
        for (rank, program) in programs.iter().enumerate() {
            let value = format_value(program.value);
            let value_cell = if self.use_colors {
                Cell::new(value).fg(value_color(program.value, best))
            } else {
                Cell::new(value)
            };

            let first_line = program
                .code
                .lines()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("");

            table.add_row(vec![
                Cell::new(rank + 1),
                Cell::new(program.id.map_or_else(|| "-".to_string(), |id| id.to_string())),
                Cell::new(
                    program
                        .parent_id
                        .map_or_else(|| "-".to_string(), |id| id.to_string()),
                ),
                Cell::new(program.depth),
                value_cell,
                Cell::new(format_value(program.advantage)),
                Cell::new(truncate(first_line, 50)),
            ]);
        }

        table.to_string()
    }

    /// Format labelled statistics as a two-column table
    pub fn format_key_values(&self, rows: &[(&str, String)]) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Metric").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);
        for (label, value) in rows {
            table.add_row(vec![Cell::new(label), Cell::new(value)]);
        }
        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Green for the beam leader, yellow for anything within half of it
fn value_color(value: Option<f64>, best: Option<f64>) -> Color {
    match (value, best) {
        (Some(v), Some(b)) if v >= b => Color::Green,
        (Some(v), Some(b)) if b > 0.0 && v >= b / 2.0 => Color::Yellow,
        (Some(_), _) => Color::White,
        (None, _) => Color::DarkGrey,
    }
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    if env::var("TERM").is_ok_and(|term| term == "dumb") {
        return false;
    }
    console::colors_enabled()
}
