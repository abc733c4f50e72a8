//! Diagnostic records and their terminal rendering.
//!
//! The collector is append-only during a run.  The back end never parses
//! diagnostics, it only appends to them.

use ansi_term::Colour;
use derive_more::Display;

use crate::common::Id;

/// Begin/end positions are 1-based (line, column) pairs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SourceLocation {
    pub file: Id,
    pub begin: (u32, u32),
    pub end: (u32, u32),
}

impl SourceLocation {
    pub fn new(file: Id, begin: (u32, u32), end: (u32, u32)) -> SourceLocation {
        SourceLocation { file, begin, end }
    }

    pub fn start_line(&self) -> u32 {
        self.begin.0
    }

    pub fn start_col(&self) -> u32 {
        self.begin.1
    }

    pub fn end_line(&self) -> u32 {
        self.end.0
    }

    pub fn end_col(&self) -> u32 {
        self.end.1
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Severity {
    #[display("error")]
    Error,
    #[display("warning")]
    Warning,
    #[display("note")]
    Note,
    #[display("hint")]
    Hint,
}

impl Severity {
    fn colour(self) -> Colour {
        match self {
            Severity::Error => Colour::Red,
            Severity::Warning => Colour::Yellow,
            Severity::Note => Colour::Blue,
            Severity::Hint => Colour::Green,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: SourceLocation,
    pub message: String,
    pub code_snippet: Option<String>,
    pub fix_suggestion: Option<String>,
}

impl Diagnostic {
    fn render(&self, colored: bool) -> String {
        let mut out = String::new();
        let severity = if colored {
            self.severity.colour().bold().paint(self.severity.to_string()).to_string()
        } else {
            self.severity.to_string()
        };
        out.push_str(&format!(
            "{}:{}:{}: {}: {}\n",
            self.location.file,
            self.location.start_line(),
            self.location.start_col(),
            severity,
            self.message
        ));

        if let Some(snippet) = &self.code_snippet {
            out.push_str(&format!("  {snippet}\n"));
            let start = self.location.start_col().max(1) as usize;
            let mut width = self.location.end_col().saturating_sub(self.location.start_col()) as usize;
            if width == 0 || self.location.start_line() != self.location.end_line() {
                width = 1;
            }
            let carets = "^".repeat(width);
            let carets = if colored {
                self.severity.colour().paint(carets).to_string()
            } else {
                carets
            };
            out.push_str(&format!("  {}{}\n", " ".repeat(start - 1), carets));
        }

        if let Some(fix) = &self.fix_suggestion {
            let note = format!("note: {fix}");
            let note = if colored { Colour::Green.paint(note).to_string() } else { note };
            out.push_str(&format!("  {note}\n"));
        }

        out
    }
}

/// Serves per-line snippets of the compiled source.
pub struct SourceManager {
    file: Id,
    lines: Vec<String>,
}

impl SourceManager {
    pub fn new(source: &str, file: Id) -> SourceManager {
        SourceManager {
            file,
            lines: source.split('\n').map(str::to_owned).collect(),
        }
    }

    pub fn file(&self) -> Id {
        self.file
    }

    /// `line` is 1-based.
    pub fn line(&self, line: u32) -> Option<&str> {
        if line == 0 {
            return None;
        }
        self.lines.get(line as usize - 1).map(String::as_str)
    }

    /// The first line covered by `loc`.
    pub fn snippet(&self, loc: &SourceLocation) -> Option<&str> {
        self.line(loc.start_line())
    }
}

/// Append-only collector for a single compilation.
#[derive(Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    fn push(&mut self, severity: Severity, location: SourceLocation, message: String) {
        self.records.push(Diagnostic {
            severity,
            location,
            message,
            code_snippet: None,
            fix_suggestion: None,
        });
    }

    pub fn emit_error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push(Severity::Error, location, message.into());
    }

    pub fn emit_warning(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push(Severity::Warning, location, message.into());
    }

    pub fn emit_note(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push(Severity::Note, location, message.into());
    }

    pub fn emit_hint(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push(Severity::Hint, location, message.into());
    }

    /// Attach a fix suggestion to the most recent record.
    pub fn suggest_fix(&mut self, suggestion: impl Into<String>) {
        if let Some(last) = self.records.last_mut() {
            last.fix_suggestion = Some(suggestion.into());
        }
    }

    /// Attach a source snippet to the most recent record.
    pub fn add_source_context(&mut self, snippet: impl Into<String>) {
        if let Some(last) = self.records.last_mut() {
            last.code_snippet = Some(snippet.into());
        }
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.records.iter().filter(|d| d.severity == Severity::Error).count()
    }

    pub fn warning_count(&self) -> usize {
        self.records.iter().filter(|d| d.severity == Severity::Warning).count()
    }

    /// Render every record plus a summary line.
    pub fn render_all(&self, colored: bool) -> String {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&record.render(colored));
            out.push('\n');
        }

        let errors = self.error_count();
        let warnings = self.warning_count();
        if errors > 0 || warnings > 0 {
            let mut summary = String::new();
            if errors > 0 {
                summary.push_str(&format!("{errors} error{}", if errors > 1 { "s" } else { "" }));
            }
            if errors > 0 && warnings > 0 {
                summary.push_str(" and ");
            }
            if warnings > 0 {
                summary.push_str(&format!("{warnings} warning{}", if warnings > 1 { "s" } else { "" }));
            }
            summary.push_str(" generated.");
            if colored {
                summary = ansi_term::Style::new().bold().paint(summary).to_string();
            }
            out.push_str(&summary);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::new(Id::new("test.c".into()), (2, 5), (2, 8))
    }

    #[test]
    fn collector_is_append_only() {
        let mut diags = Diagnostics::new();
        diags.emit_error(loc(), "bad thing");
        diags.emit_warning(loc(), "iffy thing");
        diags.suggest_fix("do the good thing");
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.records()[1].fix_suggestion.as_deref(), Some("do the good thing"));
    }

    #[test]
    fn plain_rendering_has_location_and_carets() {
        let mut diags = Diagnostics::new();
        diags.emit_error(loc(), "bad thing");
        diags.add_source_context("int x = y;");
        let rendered = diags.render_all(false);
        assert!(rendered.contains("test.c:2:5: error: bad thing"));
        assert!(rendered.contains("int x = y;"));
        assert!(rendered.contains("    ^^^"));
        assert!(rendered.contains("1 error generated."));
    }

    #[test]
    fn source_manager_serves_lines() {
        let sm = SourceManager::new("a\nbb\nccc", Id::new("f.c".into()));
        assert_eq!(sm.line(2), Some("bb"));
        assert_eq!(sm.line(4), None);
        assert_eq!(sm.snippet(&SourceLocation::new(sm.file(), (3, 1), (3, 2))), Some("ccc"));
    }
}
