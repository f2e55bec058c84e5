/// Guidance markdown: normalization, merging, section structuring and diff.
///
/// Every function here is pure. Structuring never fails; a section that
/// cannot be located comes back empty.
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use submission_common::history::hex_lower;

use crate::export::CsvWriter;
use crate::model::{GuidanceDocument, StructuredGuidance};

pub const EXTRA_RULES_HEADING: &str = "## 自訂追加規則";
const MERGE_SEPARATOR: &str = "\n\n---\n\n";

static BLANK_RUNS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static SECTION_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{#([A-Za-z_]+)\}\s*$").expect("valid regex"));
static NUMBERED_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.(.*)$").expect("valid regex"));

/// CRLF to LF, trim, collapse runs of three or more newlines to one blank line.
pub fn normalize_markdown(markdown: &str) -> String {
    let unix = markdown.replace("\r\n", "\n");
    BLANK_RUNS_RE.replace_all(unix.trim(), "\n\n").into_owned()
}

/// Hex SHA-256 of the normalized markdown.
pub fn fingerprint(markdown: &str) -> String {
    hex_lower(&Sha256::digest(normalize_markdown(markdown).as_bytes()))
}

impl GuidanceDocument {
    pub fn new(id: impl Into<String>, title: impl Into<String>, markdown: impl Into<String>) -> Self {
        let markdown = markdown.into();
        Self {
            id: id.into(),
            title: title.into(),
            fingerprint: fingerprint(&markdown),
            markdown,
        }
    }
}

/// Concatenate documents in the given order, separated by horizontal rules,
/// with optional extra rules appended under their own heading.
pub fn merge<S: AsRef<str>>(documents: &[S], extra_rules: &str) -> String {
    let mut parts: Vec<String> = documents
        .iter()
        .map(|d| normalize_markdown(d.as_ref()))
        .filter(|d| !d.is_empty())
        .collect();

    if !extra_rules.trim().is_empty() {
        parts.push(format!(
            "{EXTRA_RULES_HEADING}\n{}",
            normalize_markdown(extra_rules)
        ));
    }
    normalize_markdown(&parts.join(MERGE_SEPARATOR))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Purpose,
    RequiredDocuments,
    ConsistencyChecks,
    CommonDefects,
    OutputFormat,
}

impl Section {
    const ALL: [Section; 5] = [
        Section::Purpose,
        Section::RequiredDocuments,
        Section::ConsistencyChecks,
        Section::CommonDefects,
        Section::OutputFormat,
    ];

    fn tag(self) -> &'static str {
        match self {
            Section::Purpose => "purpose",
            Section::RequiredDocuments => "required_documents",
            Section::ConsistencyChecks => "consistency_checks",
            Section::CommonDefects => "common_defects",
            Section::OutputFormat => "output_format",
        }
    }

    fn heading_pattern(self) -> &'static str {
        match self {
            Section::Purpose => r"審查目的|Purpose|^##\s*0\.",
            Section::RequiredDocuments => r"必要文件清單|Required (Documents|Inputs|Docs)|^##\s*1\.",
            Section::ConsistencyChecks => r"關鍵欄位檢核|一致性|Consistency|^##\s*[23]\.",
            Section::CommonDefects => r"常見缺失|Common (Defects|Gaps|Deficiencies)|^##\s*4\.",
            Section::OutputFormat => r"建議輸出格式|Output Format|^##\s*5\.",
        }
    }

    fn heading_regex(self) -> &'static Regex {
        static HEADING_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
            Section::ALL
                .iter()
                .map(|s| Regex::new(s.heading_pattern()).expect("valid regex"))
                .collect()
        });
        &HEADING_RES[self as usize]
    }
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn is_level_two(line: &str) -> bool {
    line.trim_start().starts_with("## ")
}

/// Body of one section: the lines after its heading up to the next level-2
/// heading. A heading tagged `{#name}` wins over heading-text matching, and
/// tagged headings are never matched by text for another section.
fn find_section(lines: &[&str], section: Section) -> String {
    let heading_re = section.heading_regex();

    let tag_of = |line: &str| SECTION_TAG_RE.captures(line).map(|c| c[1].to_string());

    let start = lines
        .iter()
        .position(|l| is_heading(l) && tag_of(*l).as_deref() == Some(section.tag()))
        .or_else(|| {
            lines.iter().position(|l| {
                is_heading(l) && tag_of(*l).is_none() && heading_re.is_match(l.trim())
            })
        });
    let Some(start) = start else {
        return String::new();
    };

    let body: Vec<&str> = lines[start + 1..]
        .iter()
        .take_while(|l| !is_level_two(l))
        .copied()
        .collect();
    normalize_markdown(&body.join("\n"))
}

/// Items of `1.`-style numbered lists and `- ` bullets, in source order.
/// Decimal prefixes such as `1.5` are not list markers.
pub fn extract_list_items(section: &str) -> Vec<String> {
    section
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            if let Some(caps) = NUMBERED_ITEM_RE.captures(line) {
                let rest = caps.get(1).map_or("", |m| m.as_str());
                if rest.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                Some(rest.trim().to_string())
            } else {
                line.strip_prefix("- ").map(|rest| rest.trim().to_string())
            }
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// Split guidance markdown into its five review sections.
pub fn structure(markdown: &str) -> StructuredGuidance {
    let normalized = normalize_markdown(markdown);
    let lines: Vec<&str> = normalized.lines().collect();

    StructuredGuidance {
        purpose: find_section(&lines, Section::Purpose),
        required_documents: extract_list_items(&find_section(&lines, Section::RequiredDocuments)),
        consistency_checks: extract_list_items(&find_section(&lines, Section::ConsistencyChecks)),
        common_defects: extract_list_items(&find_section(&lines, Section::CommonDefects)),
        output_format: find_section(&lines, Section::OutputFormat),
        raw: markdown.to_string(),
    }
}

impl StructuredGuidance {
    /// One header row and one data row; list sections joined with ` | `.
    pub fn to_summary_csv(&self) -> String {
        let mut w = CsvWriter::new();
        w.row([
            "purpose",
            "required_documents",
            "consistency_checks",
            "common_defects",
            "output_format",
        ])
        .row([
            self.purpose.clone(),
            self.required_documents.join(" | "),
            self.consistency_checks.join(" | "),
            self.common_defects.join(" | "),
            self.output_format.clone(),
        ]);
        w.finish()
    }

    pub fn required_documents_csv(&self) -> String {
        let mut w = CsvWriter::new();
        w.row(["doc_item", "required"]);
        for doc in &self.required_documents {
            w.row([doc.as_str(), "true"]);
        }
        w.finish()
    }
}

fn with_trailing_newline(text: &str) -> String {
    let mut owned = text.replace("\r\n", "\n");
    if !owned.is_empty() && !owned.ends_with('\n') {
        owned.push('\n');
    }
    owned
}

/// Line-based unified diff with `A.md`/`B.md` headers; `""` when identical.
pub fn diff(a: &str, b: &str) -> String {
    let a = with_trailing_newline(a);
    let b = with_trailing_newline(b);
    let text_diff = TextDiff::from_lines(a.as_str(), b.as_str());
    text_diff
        .unified_diff()
        .context_radius(3)
        .header("A.md", "B.md")
        .to_string()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const K510_MEMO: &str = "# 510(k) Review Memo\n\n## 0. Purpose\nScreen a traditional 510(k) for completeness.\n\n## 1. Required Inputs\n1. Device description\n2. Predicate comparison table\n3. Labeling\n\n## 2. Consistency Checks\n- Indications match predicate\n- Product code consistent\n\n## 3. Common Gaps\n1. Missing biocompatibility summary\n\n## 4. Output Format\nA markdown table with findings.";

    const TW_SYRINGE: &str = "## 0. 審查目的\n確認查驗登記申請資料完整。\n\n## 1. 必要文件清單\n1. 申請書\n2. 醫療器材商許可執照\n3. 原廠授權登記書\n\n## 2. 關鍵欄位檢核\n- 中英文品名一致\n- 製造廠名稱與地址一致\n\n## 4. 常見缺失\n- 仿單未附中文版本\n\n## 5. 建議輸出格式\n以表格列出缺失。";

    #[test]
    fn normalize_collapses_blank_runs() {
        assert_eq!(normalize_markdown("\r\n a\r\n\r\n\r\n\r\nb\n\n\n"), "a\n\nb");
        assert_eq!(normalize_markdown("  "), "");
    }

    #[test]
    fn numbered_required_documents_in_source_order() {
        let md = "## 0. Purpose\nCheck things.\n\n## 1. Required docs\n1. Form A\n2. Form B\nnot an item\n3. Form C\n";
        let s = structure(md);
        assert_eq!(s.required_documents, vec!["Form A", "Form B", "Form C"]);
        assert_eq!(s.purpose, "Check things.");
    }

    #[test]
    fn k510_sample_sections() {
        let s = structure(K510_MEMO);
        assert_eq!(s.purpose, "Screen a traditional 510(k) for completeness.");
        assert_eq!(s.required_documents.len(), 3);
        assert_eq!(
            s.consistency_checks,
            vec!["Indications match predicate", "Product code consistent"]
        );
        assert_eq!(s.common_defects, vec!["Missing biocompatibility summary"]);
        assert_eq!(s.output_format, "A markdown table with findings.");
    }

    #[test]
    fn tw_sample_sections() {
        let s = structure(TW_SYRINGE);
        assert_eq!(s.required_documents[2], "原廠授權登記書");
        assert_eq!(s.consistency_checks.len(), 2);
        assert_eq!(s.common_defects, vec!["仿單未附中文版本"]);
        assert_eq!(s.output_format, "以表格列出缺失。");
    }

    #[test]
    fn missing_sections_are_empty() {
        let s = structure("# Notes\nnothing structured here");
        assert_eq!(s.purpose, "");
        assert!(s.required_documents.is_empty());
        assert!(s.consistency_checks.is_empty());
        assert!(s.common_defects.is_empty());
        assert_eq!(s.output_format, "");
        assert_eq!(s.raw, "# Notes\nnothing structured here");
    }

    #[test]
    fn structure_is_idempotent_on_raw() {
        for md in [K510_MEMO, TW_SYRINGE, "", "\n\n## 1. x\n- a\n\n\n\n- b\n"] {
            let once = structure(md);
            assert_eq!(structure(&once.raw), once);
        }
    }

    #[test]
    fn explicit_tags_take_precedence() {
        let md = "## Background {#purpose}\nWhy we review.\n\n## 2. Things people forget {#common_defects}\n- stale labeling\n\n## 3. Cross checks\n- names match\n";
        let s = structure(md);
        assert_eq!(s.purpose, "Why we review.");
        assert_eq!(s.common_defects, vec!["stale labeling"]);
        assert_eq!(s.consistency_checks, vec!["names match"]);
    }

    #[test]
    fn body_lines_are_not_headings() {
        let md = "Purpose of this file is testing.\n\n## 0. 審查目的\nreal purpose";
        assert_eq!(structure(md).purpose, "real purpose");
    }

    #[test]
    fn list_items_skip_decimals_and_blanks() {
        let items = extract_list_items("1. first\n1.5 mm needle\n-\n- \n  - second  \n2.third\ntext");
        assert_eq!(items, vec!["first", "second", "third"]);
    }

    #[test]
    fn merge_of_disjoint_sections_keeps_both() {
        let d1 = "## 0. Purpose\nScreen the file.\n\n## 1. Required Inputs\n1. Cover letter";
        let d2 = "## 4. Common Gaps\n- No predicate\n\n## 5. Output Format\nTable.";
        let merged = merge(&[d1, d2], "");
        assert!(merged.contains("\n\n---\n\n"));

        let s = structure(&merged);
        assert!(!s.purpose.is_empty());
        assert_eq!(s.required_documents, vec!["Cover letter"]);
        assert_eq!(s.common_defects, vec!["No predicate"]);
        assert_eq!(s.output_format, "Table.");
    }

    #[test]
    fn merge_drops_blank_documents_and_appends_rules() {
        let merged = merge(&["  ", "## A\nbody\n\n\n\n"], "  - always check UDI\n");
        assert_eq!(merged, "## A\nbody\n\n---\n\n## 自訂追加規則\n- always check UDI");
        assert_eq!(merge::<&str>(&[], " "), "");
    }

    #[test]
    fn diff_of_identical_text_is_empty() {
        assert_eq!(diff(K510_MEMO, K510_MEMO), "");
        assert_eq!(diff("", ""), "");
    }

    #[test]
    fn diff_reports_changed_lines() {
        let out = diff("a\nb\nc", "a\nB\nc");
        assert!(out.starts_with("--- A.md\n+++ B.md\n@@"));
        assert!(out.contains("\n-b\n+B\n"));
    }

    #[test]
    fn fingerprint_ignores_blank_line_noise() {
        let a = GuidanceDocument::new("tw_x", "X", "## A\n\n\n\nbody");
        let b = GuidanceDocument::new("tw_x", "X", "## A\n\nbody\n");
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
        assert_ne!(a.fingerprint, fingerprint("## B\n\nbody"));
    }

    #[test]
    fn summary_and_required_docs_csv() {
        let s = structure(K510_MEMO);
        let summary = s.to_summary_csv();
        assert!(summary.starts_with("purpose,required_documents,"));
        assert!(summary.contains("Device description | Predicate comparison table | Labeling"));

        let docs = s.required_documents_csv();
        assert_eq!(
            docs,
            "doc_item,required\nDevice description,true\nPredicate comparison table,true\nLabeling,true\n"
        );
    }

    #[test]
    fn heading_regexes_line_up_with_sections() {
        for section in Section::ALL {
            assert_eq!(section.heading_regex().as_str(), section.heading_pattern());
        }
    }
}
