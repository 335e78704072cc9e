use serde::Serialize;

pub trait OutputFormatter {
    fn format_text(&self) -> String;
    fn format_json(&self, pretty: bool) -> crate::Result<String>;
}

pub fn print_output<T: OutputFormatter>(
    data: &T,
    as_json: bool,
    json_pretty: bool,
) -> crate::Result<()> {
    let output = if as_json {
        data.format_json(json_pretty)?
    } else {
        data.format_text()
    };

    println!("{}", output);
    Ok(())
}

pub fn to_json<T: Serialize>(data: &T, pretty: bool) -> crate::Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(data)?)
    } else {
        Ok(serde_json::to_string(data)?)
    }
}

pub mod text {
    use colored::Colorize;

    pub fn success(msg: &str) -> String {
        format!("{} {}", "✓".green().bold(), msg)
    }

    pub fn error(msg: &str) -> String {
        format!("{} {}", "✗".red().bold(), msg)
    }

    pub fn warning(msg: &str) -> String {
        format!("{} {}", "⚠".yellow().bold(), msg)
    }

    pub fn info(msg: &str) -> String {
        format!("{} {}", "ℹ".blue().bold(), msg)
    }

    pub fn bullet(msg: &str) -> String {
        format!("  • {}", msg)
    }

    pub fn section(title: &str) -> String {
        format!("\n{}\n{}", title.bold(), "─".repeat(title.chars().count()))
    }

    pub fn key_value(key: &str, value: &str) -> String {
        format!("  {}: {}", key.bold(), value)
    }

    /// Indents every line of a multi-line block.
    pub fn block(content: &str) -> String {
        content
            .lines()
            .map(|line| format!("    {}", line.dimmed()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub(super) fn table_header(columns: &[&str]) -> String {
        let header = columns
            .iter()
            .map(|c| format!("{:12}", c.bold()))
            .collect::<Vec<_>>()
            .join(" ");
        let divider = "─".repeat(columns.len() * 13);
        format!("{}\n{}", header, divider)
    }

    pub(super) fn table_row(values: &[String]) -> String {
        values
            .iter()
            .map(|v| format!("{:12}", v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Cuts `s` to at most `max_len` characters, marking the cut with "...".
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }

    pub fn format_duration_ms(ms: u64) -> String {
        if ms >= 1000 {
            format!("{:.2}s", ms as f64 / 1000.0)
        } else {
            format!("{}ms", ms)
        }
    }
}

pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn row(mut self, row: Vec<String>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn build(self) -> String {
        let mut output = String::new();

        if !self.headers.is_empty() {
            output.push_str(&text::table_header(
                &self.headers.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            ));
            output.push('\n');
        }

        for row in self.rows {
            output.push_str(&text::table_row(&row));
            output.push('\n');
        }

        output
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
