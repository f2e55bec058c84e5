/// File exports and the tabular upload formats the workspace accepts.
///
/// CSV handling follows RFC 4180: fields containing a comma, quote or line
/// break are quoted, quotes are doubled. The reader accepts both `\n` and
/// `\r\n` record separators and quoted fields spanning lines.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::checklist::checklist_to_markdown;
use crate::error::AppError;
use crate::guidance::structure;
use crate::mapping::AliasTable;
use crate::model::{ApplicationRecord, ChecklistItem, FieldValue, GuidanceDomain, CANONICAL_FIELDS};
use crate::reports::render_application_markdown;
use crate::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UploadFormat {
    Json,
    Csv,
}

impl UploadFormat {
    pub fn from_file_name(name: &str) -> Result<Self, AppError> {
        let lower = name.trim().to_lowercase();
        if lower.ends_with(".json") {
            Ok(UploadFormat::Json)
        } else if lower.ends_with(".csv") {
            Ok(UploadFormat::Csv)
        } else {
            Err(AppError::Upload(format!(
                "unsupported file type: {name} (expected .json or .csv)"
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

#[derive(Debug, Default)]
pub struct CsvWriter {
    out: String,
}

impl CsvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut first = true;
        for field in fields {
            if !first {
                self.out.push(',');
            }
            first = false;
            push_field(&mut self.out, field.as_ref());
        }
        self.out.push('\n');
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Split CSV text into rows of fields. Blank lines are skipped.
pub fn read_csv(text: &str) -> Result<Vec<Vec<String>>, AppError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    let mut line = 1usize;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(AppError::Upload(format!(
            "unterminated quoted CSV field (line {line})"
        )));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// Rows after the header, each zipped with the header names. Short rows are
/// padded with empty strings.
pub fn read_csv_records(text: &str) -> Result<(Vec<String>, Vec<Vec<(String, String)>>), AppError> {
    let mut rows = read_csv(text)?.into_iter();
    let Some(header) = rows.next() else {
        return Ok((Vec::new(), Vec::new()));
    };
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
    let records = rows
        .map(|row| {
            header
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or_default()))
                .collect()
        })
        .collect();
    Ok((header, records))
}

pub fn records_to_csv(records: &[ApplicationRecord]) -> String {
    let mut w = CsvWriter::new();
    w.row(CANONICAL_FIELDS.iter());
    for record in records {
        w.row(record.fields().map(|(_, v)| match v {
            FieldValue::Flag(b) => b.to_string(),
            FieldValue::Text(s) => s.clone(),
        }));
    }
    w.finish()
}

pub fn records_to_json(records: &[ApplicationRecord]) -> Result<String, AppError> {
    Ok(serde_json::to_string_pretty(records)?)
}

pub fn mapping_to_csv(table: &AliasTable) -> String {
    let mut w = CsvWriter::new();
    w.row(["alias", "standard_key"]);
    for (alias, standard_key) in table.to_rows() {
        w.row([alias, standard_key]);
    }
    w.finish()
}

pub fn checklist_to_csv(items: &[ChecklistItem]) -> String {
    let mut w = CsvWriter::new();
    w.row(["section", "item", "expected", "notes"]);
    for it in items {
        w.row([&it.section, &it.item, &it.expected, &it.notes]);
    }
    w.finish()
}

/// What a user can download from the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExportTarget {
    /// The application under review.
    Application,
    /// Every standardized case of the loaded dataset.
    Cases,
    Mapping,
    Checklist,
    /// Effective guidance of a domain.
    Guidance,
    WorkflowOutput,
    /// The latest 510(k) review memo.
    K510Review,
    History,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExportFile {
    pub file_name: String,
    pub mime_type: String,
    pub content: String,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
        }
    }

    fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Markdown => "text/markdown",
        }
    }
}

/// Render `target` from the session in `format`.
pub fn export(
    state: &SessionState,
    target: ExportTarget,
    format: ExportFormat,
    domain: GuidanceDomain,
) -> Result<ExportFile, AppError> {
    use ExportFormat::{Csv, Json, Markdown};

    let (stem, content) = match (target, format) {
        (ExportTarget::Application, Json) => (
            "tw_application",
            serde_json::to_string_pretty(&state.application)?,
        ),
        (ExportTarget::Application, Markdown) => (
            "tw_application",
            render_application_markdown(&state.application, state.settings.language),
        ),
        (ExportTarget::Application, Csv) => (
            "tw_application",
            records_to_csv(std::slice::from_ref(&state.application)),
        ),
        (ExportTarget::Cases, Json) => ("tw_cases", records_to_json(&state.cases)?),
        (ExportTarget::Cases, Csv) => ("tw_cases", records_to_csv(&state.cases)),
        (ExportTarget::Mapping, Json) => (
            "tw_field_mapping",
            serde_json::to_string_pretty(&state.aliases)?,
        ),
        (ExportTarget::Mapping, Csv) => ("tw_field_mapping", mapping_to_csv(&state.aliases)),
        (ExportTarget::Checklist, Json) => (
            "k510_checklist",
            serde_json::to_string_pretty(&state.checklist)?,
        ),
        (ExportTarget::Checklist, Csv) => ("k510_checklist", checklist_to_csv(&state.checklist)),
        (ExportTarget::Checklist, Markdown) => {
            ("k510_checklist", checklist_to_markdown(&state.checklist))
        }
        (ExportTarget::Guidance, Markdown) => (
            guidance_stem(domain),
            state.effective_guidance(domain).to_string(),
        ),
        (ExportTarget::Guidance, Json) => (
            guidance_stem(domain),
            serde_json::to_string_pretty(&structure(state.effective_guidance(domain)))?,
        ),
        (ExportTarget::Guidance, Csv) => (
            guidance_stem(domain),
            structure(state.effective_guidance(domain)).to_summary_csv(),
        ),
        (ExportTarget::WorkflowOutput, Markdown) => {
            ("workflow_output", state.workflow.final_output().to_string())
        }
        (ExportTarget::K510Review, Markdown) => ("k510_review_report", state.k510.report.clone()),
        (ExportTarget::History, Json) => (
            "history",
            serde_json::to_string_pretty(state.history.events())?,
        ),
        (target, format) => {
            return Err(AppError::UnsupportedExport(format!(
                "{target:?} as {}",
                format.extension()
            )))
        }
    };

    Ok(ExportFile {
        file_name: format!("{stem}.{}", format.extension()),
        mime_type: format.mime_type().to_string(),
        content,
    })
}

fn guidance_stem(domain: GuidanceDomain) -> &'static str {
    match domain {
        GuidanceDomain::Tw => "tw_guidance",
        GuidanceDomain::K510 => "k510_guidance",
    }
}
