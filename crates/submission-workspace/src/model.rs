use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Canonical fields of a TW class II/III premarket application, in form order.
pub const CANONICAL_FIELDS: &[&str] = &[
    "doc_no",
    "e_no",
    "apply_date",
    "case_type",
    "device_category",
    "case_kind",
    "origin",
    "product_class",
    "similar",
    "replace_flag",
    "prior_app_no",
    "name_zh",
    "name_en",
    "indications",
    "spec_comp",
    "main_cat",
    "item_code",
    "item_name",
    "uniform_id",
    "firm_name",
    "firm_addr",
    "resp_name",
    "contact_name",
    "contact_tel",
    "contact_fax",
    "contact_email",
    "confirm_match",
    "cert_raps",
    "cert_ahwp",
    "cert_other",
    "manu_type",
    "manu_name",
    "manu_country",
    "manu_addr",
    "manu_note",
    "auth_applicable",
    "auth_desc",
    "cfs_applicable",
    "cfs_desc",
    "qms_applicable",
    "qms_desc",
    "similar_info",
    "labeling_info",
    "tech_file_info",
    "preclinical_info",
    "preclinical_replace",
    "clinical_just",
    "clinical_info",
];

pub const BOOL_FIELDS: &[&str] = &["confirm_match", "cert_raps", "cert_ahwp"];

/// Fields whose absence makes a record suspect during batch standardization.
pub const CRITICAL_FIELDS: &[&str] = &[
    "e_no",
    "case_type",
    "device_category",
    "origin",
    "product_class",
    "name_zh",
    "firm_name",
    "firm_addr",
    "contact_name",
    "contact_tel",
    "contact_email",
    "manu_name",
    "manu_addr",
];

/// Firm and contact fields shared by every case of the same company.
pub const COMPANY_FIELDS: &[&str] = &[
    "uniform_id",
    "firm_name",
    "firm_addr",
    "resp_name",
    "contact_name",
    "contact_tel",
    "contact_fax",
    "contact_email",
];

pub fn is_canonical(field: &str) -> bool {
    CANONICAL_FIELDS.contains(&field)
}

pub fn is_bool_field(field: &str) -> bool {
    BOOL_FIELDS.contains(&field)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

/// A standardized application record.
///
/// Always holds exactly the canonical field set: text fields default to `""`,
/// boolean fields to `false`. Only constructible empty or through the mapping
/// standardizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRecord {
    values: Vec<FieldValue>,
}

impl Default for ApplicationRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl ApplicationRecord {
    pub fn empty() -> Self {
        let values = CANONICAL_FIELDS
            .iter()
            .map(|f| {
                if is_bool_field(f) {
                    FieldValue::Flag(false)
                } else {
                    FieldValue::Text(String::new())
                }
            })
            .collect();
        Self { values }
    }

    fn index_of(field: &str) -> Option<usize> {
        CANONICAL_FIELDS.iter().position(|f| *f == field)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        Self::index_of(field).map(|i| &self.values[i])
    }

    /// Text value of a field; `""` for boolean or unknown fields.
    pub fn text(&self, field: &str) -> &str {
        match self.get(field) {
            Some(FieldValue::Text(s)) => s,
            _ => "",
        }
    }

    pub fn flag(&self, field: &str) -> bool {
        matches!(self.get(field), Some(FieldValue::Flag(true)))
    }

    /// Returns `false` when the field is not a canonical text field.
    pub fn set_text(&mut self, field: &str, value: impl Into<String>) -> bool {
        match Self::index_of(field) {
            Some(i) if !is_bool_field(field) => {
                self.values[i] = FieldValue::Text(value.into());
                true
            }
            _ => false,
        }
    }

    /// Returns `false` when the field is not a canonical boolean field.
    pub fn set_flag(&mut self, field: &str, value: bool) -> bool {
        match Self::index_of(field) {
            Some(i) if is_bool_field(field) => {
                self.values[i] = FieldValue::Flag(value);
                true
            }
            _ => false,
        }
    }

    /// Fields in canonical order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        CANONICAL_FIELDS.iter().copied().zip(self.values.iter())
    }

    /// Critical fields whose text is blank.
    pub fn missing_critical(&self) -> Vec<&'static str> {
        CRITICAL_FIELDS
            .iter()
            .copied()
            .filter(|f| self.text(f).trim().is_empty())
            .collect()
    }

    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.fields()
            .map(|(k, v)| {
                let value = match v {
                    FieldValue::Flag(b) => serde_json::Value::Bool(*b),
                    FieldValue::Text(s) => serde_json::Value::String(s.clone()),
                };
                (k.to_string(), value)
            })
            .collect()
    }
}

impl Serialize for ApplicationRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (k, v) in self.fields() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Regulatory domain a guidance document or dataset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum GuidanceDomain {
    /// Taiwan TFDA premarket registration.
    #[serde(rename = "tw")]
    Tw,
    /// US FDA 510(k).
    #[serde(rename = "k510")]
    K510,
}

impl GuidanceDomain {
    /// Section id prefix that routes a bundled guidance block to this domain.
    pub fn id_prefix(self) -> &'static str {
        match self {
            GuidanceDomain::Tw => "tw_",
            GuidanceDomain::K510 => "k510_",
        }
    }

    pub fn for_id(id: &str) -> Option<Self> {
        [GuidanceDomain::Tw, GuidanceDomain::K510]
            .into_iter()
            .find(|d| id.starts_with(d.id_prefix()))
    }
}

/// An authored guidance document. Never mutated in place; merges produce new documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GuidanceDocument {
    pub id: String,
    pub title: String,
    pub markdown: String,
    /// Hex SHA-256 of the normalized markdown.
    pub fingerprint: String,
}

/// Sections extracted from a guidance document. The raw markdown stays authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredGuidance {
    pub purpose: String,
    pub required_documents: Vec<String>,
    pub consistency_checks: Vec<String>,
    pub common_defects: Vec<String>,
    pub output_format: String,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChecklistItem {
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub notes: String,
}

/// Named set of raw TW case records, as shipped in the default dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwCaseSet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cases: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecklistSet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultDatasets {
    #[serde(default)]
    pub tw_cases: BTreeMap<String, TwCaseSet>,
    #[serde(default)]
    pub k510_checklists: BTreeMap<String, ChecklistSet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_has_every_canonical_field() {
        let record = ApplicationRecord::empty();
        assert_eq!(record.fields().count(), CANONICAL_FIELDS.len());
        assert!(!record.flag("confirm_match"));
        assert_eq!(record.text("doc_no"), "");
        assert_eq!(record.missing_critical().len(), CRITICAL_FIELDS.len());
    }

    #[test]
    fn setters_respect_field_kinds() {
        let mut record = ApplicationRecord::empty();
        assert!(record.set_text("firm_name", "曜澄醫療器材股份有限公司"));
        assert!(!record.set_text("cert_raps", "yes"));
        assert!(!record.set_text("not_a_field", "x"));
        assert!(record.set_flag("cert_raps", true));
        assert!(!record.set_flag("firm_name", true));
        assert!(record.flag("cert_raps"));
        assert!(!record.missing_critical().contains(&"firm_name"));
    }

    #[test]
    fn serializes_in_canonical_order() {
        let mut record = ApplicationRecord::empty();
        record.set_text("doc_no", "DOC-1");
        let json = serde_json::to_value(&record).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), CANONICAL_FIELDS.len());
        assert_eq!(keys[0], "doc_no");
        assert_eq!(json["doc_no"], "DOC-1");
        assert_eq!(json["cert_ahwp"], false);
    }

    #[test]
    fn domain_routing_by_prefix() {
        assert_eq!(GuidanceDomain::for_id("tw_guidance_suture"), Some(GuidanceDomain::Tw));
        assert_eq!(GuidanceDomain::for_id("k510_guidance_review_memo"), Some(GuidanceDomain::K510));
        assert_eq!(GuidanceDomain::for_id("eu_mdr_notes"), None);
    }
}
