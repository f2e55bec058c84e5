/// Rule-based standardization of uploaded application records.
///
/// A record with arbitrary keys (localized labels, camelCase exports, the
/// canonical names themselves) is renamed through an editable alias table and
/// coerced into an `ApplicationRecord`. Unknown keys are dropped, missing
/// fields are back-filled, booleans and dates are normalized. Nothing here
/// fails on malformed input: the worst case is an all-default record.
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::AppError;
use crate::export::{read_csv, read_csv_records, UploadFormat};
use crate::model::{is_bool_field, is_canonical, ApplicationRecord, CANONICAL_FIELDS};

/// Aliases seen in TFDA form exports and hand-made spreadsheets.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("公文文號", "doc_no"),
    ("docNo", "doc_no"),
    ("電子流水號", "e_no"),
    ("eNo", "e_no"),
    ("申請日", "apply_date"),
    ("applyDate", "apply_date"),
    ("案件類型", "case_type"),
    ("醫療器材類型", "device_category"),
    ("案件種類", "case_kind"),
    ("產地", "origin"),
    ("產品等級", "product_class"),
    ("有無類似品", "similar"),
    ("替代條款", "replace_flag"),
    ("前次申請案號", "prior_app_no"),
    ("中文名稱", "name_zh"),
    ("品名(中)", "name_zh"),
    ("英文名稱", "name_en"),
    ("品名(英)", "name_en"),
    ("適應症", "indications"),
    ("規格", "spec_comp"),
    ("主類別", "main_cat"),
    ("品項代碼", "item_code"),
    ("品項名稱", "item_name"),
    ("統一編號", "uniform_id"),
    ("醫療器材商名稱", "firm_name"),
    ("醫療器材商地址", "firm_addr"),
    ("負責人", "resp_name"),
    ("聯絡人", "contact_name"),
    ("電話", "contact_tel"),
    ("傳真", "contact_fax"),
    ("電子郵件", "contact_email"),
    ("製造方式", "manu_type"),
    ("製造廠名稱", "manu_name"),
    ("製造國別", "manu_country"),
    ("製造廠地址", "manu_addr"),
    ("已確認證照相符", "confirm_match"),
];

/// Tokens accepted as `true` for boolean fields, compared case-insensitively.
pub const DEFAULT_AFFIRMATIVE_TOKENS: &[&str] = &["true", "1", "yes", "y", "是", "有"];

/// Editable alias → canonical field dictionary.
///
/// Not injective: many aliases may map to one field. Bulk edits are
/// last-write-wins per alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.extend(
            DEFAULT_ALIASES
                .iter()
                .map(|(a, f)| (a.to_string(), f.to_string())),
        );
        table
    }

    /// Exact match first, then the whitespace-trimmed key.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .or_else(|| self.entries.get(key.trim()))
            .map(String::as_str)
    }

    pub fn insert(&mut self, alias: impl Into<String>, field: impl Into<String>) {
        self.entries.insert(alias.into(), field.into());
    }

    pub fn remove(&mut self, alias: &str) -> Option<String> {
        self.entries.remove(alias)
    }

    /// Bulk edit; later entries overwrite earlier ones with the same alias.
    pub fn extend<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (alias, field) in entries {
            self.entries.insert(alias, field);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(a, f)| (a.as_str(), f.as_str()))
    }

    /// Build from `(alias, standard_key)` rows; both sides trimmed, blank rows skipped.
    pub fn from_rows<I, A, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (A, S)>,
        A: AsRef<str>,
        S: AsRef<str>,
    {
        let mut table = Self::empty();
        for (alias, field) in rows {
            let alias = alias.as_ref().trim();
            let field = field.as_ref().trim();
            if !alias.is_empty() && !field.is_empty() {
                table.insert(alias, field);
            }
        }
        table
    }

    /// Rows sorted by standard key, then alias.
    pub fn to_rows(&self) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|(a, f)| (a.clone(), f.clone()))
            .collect();
        rows.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    /// Aliases whose target is not a canonical field; these never take effect.
    pub fn dangling(&self) -> Vec<(&str, &str)> {
        self.iter().filter(|(_, f)| !is_canonical(f)).collect()
    }

    /// Accepts a JSON object, a JSON list of `{alias, standard_key}`, a CSV
    /// with `alias,standard_key` headers, or any CSV with at least two columns.
    pub fn parse_upload(content: &str, format: UploadFormat) -> Result<Self, AppError> {
        match format {
            UploadFormat::Json => match serde_json::from_str::<Value>(content)? {
                Value::Object(map) => Ok(Self::from_rows(
                    map.iter().map(|(k, v)| (k.clone(), value_to_text(v))),
                )),
                Value::Array(items) => Ok(Self::from_rows(items.iter().filter_map(|x| {
                    let alias = x.get("alias")?;
                    let field = x.get("standard_key")?;
                    Some((value_to_text(alias), value_to_text(field)))
                }))),
                _ => Ok(Self::empty()),
            },
            UploadFormat::Csv => {
                let rows = read_csv(content)?;
                let Some(header) = rows.first() else {
                    return Ok(Self::empty());
                };
                let alias_col = header.iter().position(|h| h.trim() == "alias");
                let key_col = header.iter().position(|h| h.trim() == "standard_key");
                let (a, s) = match (alias_col, key_col) {
                    (Some(a), Some(s)) => (a, s),
                    _ if header.len() >= 2 => (0, 1),
                    _ => return Ok(Self::empty()),
                };
                Ok(Self::from_rows(rows.iter().skip(1).map(|r| {
                    (
                        r.get(a).map(String::as_str).unwrap_or(""),
                        r.get(s).map(String::as_str).unwrap_or(""),
                    )
                })))
            }
        }
    }
}

/// Tunable coercion and batch-failure policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MappingPolicy {
    /// Lower-cased tokens read as `true` for boolean fields.
    pub affirmative_tokens: Vec<String>,
    /// A record needs at least this many non-empty raw values to be judged at all.
    pub failure_min_populated: usize,
    /// Judged records with at least this many blank critical fields are skipped.
    pub failure_min_missing: usize,
}

impl Default for MappingPolicy {
    fn default() -> Self {
        Self {
            affirmative_tokens: DEFAULT_AFFIRMATIVE_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            failure_min_populated: 3,
            failure_min_missing: 7,
        }
    }
}

impl MappingPolicy {
    pub fn is_affirmative(&self, token: &str) -> bool {
        let token = token.trim().to_lowercase();
        self.affirmative_tokens.iter().any(|t| *t == token)
    }

    pub fn to_bool(&self, value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            other => self.is_affirmative(&value_to_text(other)),
        }
    }
}

/// Textual form of a raw value: `null` → `""`, containers → compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

static STRICT_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{4})[/.\-](\d{1,2})[/.\-](\d{1,2})\s*$").expect("valid regex")
});
static EMBEDDED_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("valid regex"));

/// Normalize to `YYYY-MM-DD`; anything unparseable becomes `""`.
pub fn normalize_date(value: &Value) -> String {
    let text = value_to_text(value);
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let ymd = |y: &str, m: &str, d: &str| -> String {
        match (y.parse::<i32>(), m.parse::<u32>(), d.parse::<u32>()) {
            (Ok(y), Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(y, m, d)
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            _ => String::new(),
        }
    };

    if let Some(caps) = STRICT_DATE_RE.captures(text) {
        return ymd(&caps[1], &caps[2], &caps[3]);
    }
    if let Some(caps) = EMBEDDED_DATE_RE.captures(text) {
        return ymd(&caps[1], &caps[2], &caps[3]);
    }
    String::new()
}

/// Standardize one raw record into the canonical schema.
pub fn standardize(raw: &Value, table: &AliasTable, policy: &MappingPolicy) -> ApplicationRecord {
    let mut record = ApplicationRecord::empty();
    let Some(map) = raw.as_object() else {
        debug!("raw record is not an object, returning defaults");
        return record;
    };

    let mut assigned: HashMap<&str, &Value> = HashMap::new();
    for (key, value) in map {
        let target = if is_canonical(key) {
            Some(key.as_str())
        } else {
            table.lookup(key)
        };
        match target {
            Some(field) if is_canonical(field) => {
                assigned.insert(field, value);
            }
            Some(field) => debug!(key = %key, target = field, "alias targets a non-canonical field, ignored"),
            None => debug!(key = %key, "unmapped key dropped"),
        }
    }

    for field in CANONICAL_FIELDS {
        let Some(value) = assigned.get(field) else {
            continue;
        };
        if is_bool_field(field) {
            record.set_flag(field, policy.to_bool(value));
        } else if *field == "apply_date" {
            record.set_text(field, normalize_date(value));
        } else {
            record.set_text(field, value_to_text(value));
        }
    }
    record
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchFailure {
    pub row_index: usize,
    pub reason: String,
    pub missing_fields: Vec<String>,
    pub raw_keys: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub records: Vec<ApplicationRecord>,
    pub failures: Vec<BatchFailure>,
}

/// Standardize many records, skipping the ones that look like garbage:
/// enough populated raw values, yet too many critical fields still blank.
pub fn standardize_batch(
    records: &[Value],
    table: &AliasTable,
    policy: &MappingPolicy,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for (row_index, raw) in records.iter().enumerate() {
        let Some(map) = raw.as_object() else {
            outcome.failures.push(BatchFailure {
                row_index,
                reason: "record is not a JSON object".to_string(),
                missing_fields: Vec::new(),
                raw_keys: Vec::new(),
            });
            continue;
        };

        let record = standardize(raw, table, policy);
        let missing = record.missing_critical();
        let populated = map
            .values()
            .filter(|v| !value_to_text(v).trim().is_empty())
            .count();

        if populated >= policy.failure_min_populated && missing.len() >= policy.failure_min_missing {
            outcome.failures.push(BatchFailure {
                row_index,
                reason: "Too many critical fields missing after rule mapping; skipped.".to_string(),
                missing_fields: missing.iter().map(|f| f.to_string()).collect(),
                raw_keys: map.keys().cloned().collect(),
            });
            continue;
        }
        outcome.records.push(record);
    }

    info!(
        ok = outcome.records.len(),
        skipped = outcome.failures.len(),
        "batch standardization complete"
    );
    outcome
}

/// Raw case records from an uploaded file: a JSON object or list of objects,
/// or a CSV whose header row names the keys.
pub fn parse_cases_upload(content: &str, format: UploadFormat) -> Result<Vec<Value>, AppError> {
    match format {
        UploadFormat::Json => Ok(match serde_json::from_str::<Value>(content)? {
            Value::Array(items) => items.into_iter().filter(Value::is_object).collect(),
            obj @ Value::Object(_) => vec![obj],
            _ => Vec::new(),
        }),
        UploadFormat::Csv => {
            let (_, rows) = read_csv_records(content)?;
            Ok(rows
                .into_iter()
                .map(|row| {
                    Value::Object(
                        row.into_iter()
                            .map(|(k, v)| (k, Value::String(v)))
                            .collect(),
                    )
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{FieldValue, BOOL_FIELDS};

    fn defaults() -> (AliasTable, MappingPolicy) {
        (AliasTable::with_defaults(), MappingPolicy::default())
    }

    #[test]
    fn alias_renames_and_junk_is_dropped() {
        let mut table = AliasTable::empty();
        table.insert("公文文號", "doc_no");
        let raw = json!({"公文文號": "DOC-1", "junk_field": "ignored"});
        let record = standardize(&raw, &table, &MappingPolicy::default());

        assert_eq!(record.text("doc_no"), "DOC-1");
        assert!(record.get("junk_field").is_none());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("junk_field").is_none());
        for (field, value) in record.fields() {
            match field {
                "doc_no" => {}
                f if BOOL_FIELDS.contains(&f) => assert_eq!(value, &FieldValue::Flag(false)),
                _ => assert_eq!(value, &FieldValue::Text(String::new())),
            }
        }
    }

    #[test]
    fn output_key_set_is_exactly_canonical() {
        let (table, policy) = defaults();
        for raw in [
            json!({}),
            json!(null),
            json!([1, 2]),
            json!({"doc_no": 5, "extra": {"nested": [1]}, "電話": "02-1234"}),
        ] {
            let json = serde_json::to_value(standardize(&raw, &table, &policy)).unwrap();
            let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
            assert_eq!(keys, CANONICAL_FIELDS);
        }
    }

    #[test]
    fn trimmed_alias_lookup() {
        let (table, policy) = defaults();
        let record = standardize(&json!({"  中文名稱 ": "注射器"}), &table, &policy);
        assert_eq!(record.text("name_zh"), "注射器");
    }

    #[test]
    fn canonical_key_wins_over_nothing_and_last_write_wins() {
        let (table, policy) = defaults();
        let raw: Value =
            serde_json::from_str(r#"{"doc_no": "first", "公文文號": "second"}"#).unwrap();
        assert_eq!(standardize(&raw, &table, &policy).text("doc_no"), "second");
    }

    #[test]
    fn alias_to_unknown_field_is_ignored() {
        let mut table = AliasTable::empty();
        table.insert("Colour", "colour");
        let record = standardize(&json!({"Colour": "red"}), &table, &MappingPolicy::default());
        assert_eq!(serde_json::to_value(&record).unwrap().as_object().unwrap().len(), CANONICAL_FIELDS.len());
        assert_eq!(table.dangling(), vec![("Colour", "colour")]);
    }

    #[test]
    fn boolean_tokens() {
        let policy = MappingPolicy::default();
        for yes in ["true", "TRUE", "1", "yes", "Yes", "y", "Y", " 是 ", "有"] {
            assert!(policy.to_bool(&json!(yes)), "{yes} should be true");
        }
        for no in ["false", "0", "no", "n", "否", "無", "", "checked", "2"] {
            assert!(!policy.to_bool(&json!(no)), "{no} should be false");
        }
        assert!(policy.to_bool(&json!(true)));
        assert!(policy.to_bool(&json!(1)));
        assert!(!policy.to_bool(&json!(null)));
        assert!(!policy.to_bool(&json!({"a": 1})));
    }

    #[test]
    fn policy_tokens_are_extensible() {
        let mut policy = MappingPolicy::default();
        policy.affirmative_tokens.push("勾選".to_string());
        let record = standardize(
            &json!({"已確認證照相符": "勾選", "cert_raps": "Y", "cert_ahwp": "no"}),
            &AliasTable::with_defaults(),
            &policy,
        );
        assert!(record.flag("confirm_match"));
        assert!(record.flag("cert_raps"));
        assert!(!record.flag("cert_ahwp"));
    }

    #[test]
    fn dates_are_normalized() {
        assert_eq!(normalize_date(&json!("2026/3/5")), "2026-03-05");
        assert_eq!(normalize_date(&json!("2026.03.12")), "2026-03-12");
        assert_eq!(normalize_date(&json!(" 2026-03-12 ")), "2026-03-12");
        assert_eq!(normalize_date(&json!("申請於 2026-01-31 送件")), "2026-01-31");
        assert_eq!(normalize_date(&json!("2026-02-30")), "");
        assert_eq!(normalize_date(&json!("March 5")), "");
        assert_eq!(normalize_date(&json!(null)), "");
    }

    #[test]
    fn non_string_values_are_stringified() {
        let (table, policy) = defaults();
        let record = standardize(
            &json!({"uniform_id": 24813579, "spec_comp": ["PGA", "PP"], "manu_note": null, "name_en": true}),
            &table,
            &policy,
        );
        assert_eq!(record.text("uniform_id"), "24813579");
        assert_eq!(record.text("spec_comp"), r#"["PGA","PP"]"#);
        assert_eq!(record.text("manu_note"), "");
        assert_eq!(record.text("name_en"), "true");
    }

    #[test]
    fn garbage_record_is_skipped_in_batch() {
        let (table, policy) = defaults();
        let garbage = json!({
            "doc_no": "D-1", "name_en": "Widget",
            "k1": "a", "k2": "b", "k3": "c", "k4": "d",
            "k5": "e", "k6": "f", "k7": "g", "k8": "h"
        });
        let sparse = json!({"doc_no": "D-2", "note": "draft"});
        let outcome = standardize_batch(&[garbage, sparse, json!("not a record")], &table, &policy);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].text("doc_no"), "D-2");
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].row_index, 0);
        assert!(outcome.failures[0].missing_fields.len() >= 8);
        assert_eq!(outcome.failures[0].raw_keys.len(), 10);
        assert_eq!(outcome.failures[1].row_index, 2);
    }

    #[test]
    fn failure_thresholds_are_tunable() {
        let table = AliasTable::with_defaults();
        let raw = json!({"a": "1", "b": "2", "c": "3"});
        let strict = MappingPolicy::default();
        assert_eq!(standardize_batch(&[raw.clone()], &table, &strict).failures.len(), 1);

        let lenient = MappingPolicy {
            failure_min_missing: 14,
            ..MappingPolicy::default()
        };
        assert_eq!(standardize_batch(&[raw], &table, &lenient).records.len(), 1);
    }

    #[test]
    fn mapping_upload_variants() {
        let from_obj = AliasTable::parse_upload(r#"{"Firm": "firm_name"}"#, UploadFormat::Json).unwrap();
        assert_eq!(from_obj.lookup("Firm"), Some("firm_name"));

        let from_list = AliasTable::parse_upload(
            r#"[{"alias": "Tel", "standard_key": "contact_tel"}, {"alias": "", "standard_key": "x"}, 3]"#,
            UploadFormat::Json,
        )
        .unwrap();
        assert_eq!(from_list.len(), 1);

        let with_header = AliasTable::parse_upload(
            "standard_key,alias\ncontact_fax, Fax \n",
            UploadFormat::Csv,
        )
        .unwrap();
        assert_eq!(with_header.lookup("Fax"), Some("contact_fax"));

        let two_col = AliasTable::parse_upload("from,to\nE-mail,contact_email\n", UploadFormat::Csv).unwrap();
        assert_eq!(two_col.lookup("E-mail"), Some("contact_email"));
    }

    #[test]
    fn rows_sorted_by_standard_key_then_alias() {
        let table = AliasTable::from_rows([("b", "name_zh"), ("a", "name_zh"), ("z", "doc_no")]);
        let rows = table.to_rows();
        assert_eq!(rows[0], ("z".to_string(), "doc_no".to_string()));
        assert_eq!(rows[1].0, "a");
        assert_eq!(rows[2].0, "b");
    }

    #[test]
    fn bulk_edit_is_last_write_wins() {
        let mut table = AliasTable::with_defaults();
        table.extend([
            ("電話".to_string(), "contact_fax".to_string()),
            ("電話".to_string(), "contact_tel".to_string()),
        ]);
        assert_eq!(table.lookup("電話"), Some("contact_tel"));
    }

    #[test]
    fn cases_upload_json_and_csv() {
        let json_cases = parse_cases_upload(r#"[{"doc_no": "A"}, 1, {"doc_no": "B"}]"#, UploadFormat::Json).unwrap();
        assert_eq!(json_cases.len(), 2);
        let single = parse_cases_upload(r#"{"doc_no": "A"}"#, UploadFormat::Json).unwrap();
        assert_eq!(single.len(), 1);

        let csv_cases = parse_cases_upload("公文文號,產地\nDOC-9,輸入\n", UploadFormat::Csv).unwrap();
        let record = standardize(&csv_cases[0], &AliasTable::with_defaults(), &MappingPolicy::default());
        assert_eq!(record.text("doc_no"), "DOC-9");
        assert_eq!(record.text("origin"), "輸入");
    }
}
