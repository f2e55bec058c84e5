/// Review helpers over the current application record.
use std::collections::BTreeMap;

use chrono::Utc;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;

use crate::config::Language;
use crate::error::AppError;
use crate::export::{read_csv_records, UploadFormat};
use crate::mapping::value_to_text;
use crate::model::{ApplicationRecord, FieldValue, COMPANY_FIELDS};

/// Fields a form-complete application must fill, with their zh-TW and
/// English form labels.
pub const REQUIRED_FIELDS: &[(&str, &str, &str)] = &[
    ("e_no", "電子流水號", "Electronic serial no."),
    ("case_type", "案件類型", "Case type"),
    ("device_category", "醫療器材類型", "Device category"),
    ("origin", "產地", "Origin"),
    ("product_class", "產品等級", "Product class"),
    ("name_zh", "中文名稱", "Chinese name"),
    ("name_en", "英文名稱", "English name"),
    ("uniform_id", "統一編號", "Business ID no."),
    ("firm_name", "醫療器材商名稱", "Firm name"),
    ("firm_addr", "醫療器材商地址", "Firm address"),
    ("resp_name", "負責人姓名", "Responsible person"),
    ("contact_name", "聯絡人姓名", "Contact name"),
    ("contact_tel", "電話", "Phone"),
    ("contact_email", "電子郵件", "Email"),
    ("manu_name", "製造廠名稱", "Manufacturer name"),
    ("manu_addr", "製造廠地址", "Manufacturer address"),
];

const IMPORT_ORIGIN: &str = "輸入";
const APPLICABLE: &str = "適用";

/// Fraction of required fields that are filled, in `[0, 1]`.
pub fn completeness(record: &ApplicationRecord) -> f64 {
    let filled = REQUIRED_FIELDS
        .iter()
        .filter(|(f, _, _)| !record.text(f).trim().is_empty())
        .count();
    filled as f64 / REQUIRED_FIELDS.len() as f64
}

/// Labels of required fields left blank, in form order.
pub fn missing_required_labels(record: &ApplicationRecord, language: Language) -> Vec<String> {
    REQUIRED_FIELDS
        .iter()
        .filter(|(f, _, _)| record.text(f).trim().is_empty())
        .map(|(_, zh, en)| language.pick(zh, en).to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct MissingItemsReport {
    /// Labels of required fields left blank.
    pub missing_required_fields: Vec<String>,
    pub guidance_readiness: Vec<String>,
    pub optional_recommendations: Vec<String>,
    pub generated_at: String,
}

pub fn missing_items_report(
    record: &ApplicationRecord,
    guidance_markdown: &str,
    language: Language,
) -> MissingItemsReport {
    let text = |zh: &str, en: &str| language.pick(zh, en).to_string();

    let mut guidance_readiness = Vec::new();
    if guidance_markdown.trim().is_empty() {
        guidance_readiness.push(text(
            "尚未提供預審/形式審查指引（建議提供）",
            "No screening guidance provided yet (recommended)",
        ));
    }

    let applicable = |field: &str| record.text(field).trim() == APPLICABLE;
    let mut optional_recommendations = Vec::new();
    if record.text("origin") == IMPORT_ORIGIN {
        if !applicable("auth_applicable") {
            optional_recommendations.push(text(
                "輸入案通常需原廠授權（auth_applicable 建議為「適用」或說明例外）",
                "Import cases usually need the manufacturer's authorization (set auth_applicable to 「適用」 or explain the exception)",
            ));
        }
        if !applicable("cfs_applicable") {
            optional_recommendations.push(text(
                "輸入案通常需 CFS（cfs_applicable 建議為「適用」或說明例外）",
                "Import cases usually need a CFS (set cfs_applicable to 「適用」 or explain the exception)",
            ));
        }
    }
    if !applicable("qms_applicable") {
        optional_recommendations.push(text(
            "QMS/ISO 13485 證明建議標註適用（qms_applicable）",
            "Mark the QMS/ISO 13485 certificate as applicable (qms_applicable)",
        ));
    }

    MissingItemsReport {
        missing_required_fields: missing_required_labels(record, language),
        guidance_readiness,
        optional_recommendations,
        generated_at: Utc::now().to_rfc3339(),
    }
}

enum DraftLine {
    /// Heading level, zh-TW and English text.
    Heading(usize, &'static str, &'static str),
    /// `- label: value`
    Field(&'static str, &'static str, &'static str),
    /// `- label: <applicable> / <description>`
    Attachment(&'static str, &'static str, &'static str, &'static str),
    /// The field's value as a paragraph.
    Body(&'static str),
}

use DraftLine::{Attachment, Body, Field, Heading};

const APPLICATION_DRAFT: &[DraftLine] = &[
    Heading(1, "第二、三等級醫療器材查驗登記申請書（線上草稿）", "Class II/III Medical Device Registration Application (Online Draft)"),
    Heading(2, "一、案件基本資料", "1. Case Information"),
    Field("doc_no", "公文文號", "Document no."),
    Field("e_no", "電子流水號", "Electronic serial no."),
    Field("apply_date", "申請日", "Application date"),
    Field("case_type", "案件類型", "Case type"),
    Field("device_category", "醫療器材類型", "Device category"),
    Field("case_kind", "案件種類", "Case kind"),
    Field("origin", "產地", "Origin"),
    Field("product_class", "產品等級", "Product class"),
    Field("similar", "有無類似品", "Similar product"),
    Field("replace_flag", "替代臨床前測試及品質管制資料", "Alternative preclinical and QC data"),
    Field("prior_app_no", "前次申請案號", "Prior application no."),
    Heading(2, "二、醫療器材基本資訊", "2. Device Information"),
    Field("name_zh", "中文名稱", "Chinese name"),
    Field("name_en", "英文名稱", "English name"),
    Field("indications", "效能/用途/適應症", "Indications for use"),
    Field("spec_comp", "型號/規格/主要成分", "Models/specifications/main components"),
    Heading(3, "分類分級品項", "Classification"),
    Field("main_cat", "主類別", "Main category"),
    Field("item_code", "代碼", "Item code"),
    Field("item_name", "名稱", "Item name"),
    Heading(2, "三、醫療器材商資料", "3. Firm Information"),
    Field("uniform_id", "統一編號", "Business ID no."),
    Field("firm_name", "名稱", "Name"),
    Field("firm_addr", "地址", "Address"),
    Field("resp_name", "負責人", "Responsible person"),
    Field("contact_name", "聯絡人", "Contact"),
    Field("contact_tel", "電話", "Phone"),
    Field("contact_fax", "傳真", "Fax"),
    Field("contact_email", "電子郵件", "Email"),
    Field("confirm_match", "已確認證照相符", "License details confirmed"),
    Heading(2, "四、製造廠資訊", "4. Manufacturer Information"),
    Field("manu_type", "製造方式", "Manufacturing type"),
    Field("manu_name", "製造廠名稱", "Manufacturer name"),
    Field("manu_country", "製造國別", "Country of manufacture"),
    Field("manu_addr", "製造廠地址", "Manufacturer address"),
    Field("manu_note", "製造說明", "Manufacturing notes"),
    Heading(2, "附件摘要（如適用）", "Attachments (if applicable)"),
    Attachment("auth_applicable", "auth_desc", "原廠授權", "Manufacturer authorization"),
    Attachment("cfs_applicable", "cfs_desc", "製售證明", "Certificate of free sale"),
    Attachment("qms_applicable", "qms_desc", "QMS/QSD", "QMS/QSD"),
    Heading(3, "類似品摘要", "Similar Products"),
    Body("similar_info"),
    Heading(3, "標籤/說明書擬稿重點", "Labeling and IFU Highlights"),
    Body("labeling_info"),
    Heading(3, "技術檔案摘要", "Technical File Summary"),
    Body("tech_file_info"),
    Heading(3, "臨床前測試與品質管制摘要", "Preclinical Testing and QC Summary"),
    Body("preclinical_info"),
    Heading(3, "替代資料說明", "Alternative Data Explanation"),
    Body("preclinical_replace"),
    Heading(3, "臨床證據", "Clinical Evidence"),
    Field("clinical_just", "適用性", "Applicability"),
    Field("clinical_info", "摘要", "Summary"),
];

/// Markdown draft of the application form. Blank fields read as
/// 「（未填）」 (or "(not provided)"), and a formal-check warning listing the
/// missing required fields follows the title.
pub fn render_application_markdown(record: &ApplicationRecord, language: Language) -> String {
    let value = |field: &str| -> String {
        match record.get(field) {
            Some(FieldValue::Flag(true)) => language.pick("是", "Yes").to_string(),
            Some(FieldValue::Flag(false)) => language.pick("否", "No").to_string(),
            Some(FieldValue::Text(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ if field == "prior_app_no" => language.pick("不適用", "N/A").to_string(),
            _ => language.pick("（未填）", "(not provided)").to_string(),
        }
    };
    let colon = language.pick("：", ": ");
    let missing = missing_required_labels(record, language);

    let mut lines: Vec<String> = Vec::new();
    for line in APPLICATION_DRAFT {
        match *line {
            Heading(level, zh, en) => {
                if !lines.is_empty() {
                    lines.push(String::new());
                }
                lines.push(format!("{} {}", "#".repeat(level), language.pick(zh, en)));
                if level == 1 && !missing.is_empty() {
                    lines.push(String::new());
                    lines.push(format!(
                        "> {}",
                        language.pick(
                            "以下基本欄位尚未完整（形式檢查）：",
                            "The following required fields are incomplete (formal check):"
                        )
                    ));
                    lines.extend(missing.iter().map(|label| format!("> - {label}")));
                }
            }
            Field(field, zh, en) => {
                lines.push(format!("- {}{colon}{}", language.pick(zh, en), value(field)));
            }
            Attachment(applicable, desc, zh, en) => lines.push(format!(
                "- {}{colon}{} / {}",
                language.pick(zh, en),
                value(applicable),
                value(desc)
            )),
            Body(field) => lines.push(value(field)),
        }
    }
    lines.join("\n")
}

/// Firm and contact details shared across a company's applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CompanyTemplate {
    pub template_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Company fields carried by this template; absent fields are left alone on apply.
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl CompanyTemplate {
    pub fn from_record(name: &str, record: &ApplicationRecord) -> Self {
        Self {
            template_name: name.trim().to_string(),
            created_at: Some(Utc::now().to_rfc3339()),
            fields: COMPANY_FIELDS
                .iter()
                .map(|f| (f.to_string(), record.text(f).to_string()))
                .collect(),
        }
    }

    /// Company fields and the template name from a loose JSON object; other keys are ignored.
    pub fn from_json(obj: &serde_json::Map<String, Value>) -> Self {
        let text = |key: &str| obj.get(key).map(value_to_text);
        Self {
            template_name: text("template_name").unwrap_or_default(),
            created_at: text("created_at").filter(|s| !s.is_empty()),
            fields: COMPANY_FIELDS
                .iter()
                .filter_map(|f| text(*f).map(|v| (f.to_string(), v)))
                .collect(),
        }
    }

    /// Template values overwrite the record's company fields.
    pub fn apply_to(&self, record: &mut ApplicationRecord) {
        for (field, value) in &self.fields {
            record.set_text(field, value.as_str());
        }
    }
}

/// Templates from an upload: a JSON object, a JSON list of objects, or CSV rows.
/// Unnamed templates are numbered after `existing`.
pub fn parse_templates_upload(
    content: &str,
    format: UploadFormat,
    existing: usize,
) -> Result<Vec<CompanyTemplate>, AppError> {
    let mut templates: Vec<CompanyTemplate> = match format {
        UploadFormat::Json => match serde_json::from_str::<Value>(content)? {
            Value::Object(obj) => vec![CompanyTemplate::from_json(&obj)],
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_object)
                .map(CompanyTemplate::from_json)
                .collect(),
            _ => {
                return Err(AppError::Upload(
                    "JSON must be a list of template objects".to_string(),
                ))
            }
        },
        UploadFormat::Csv => {
            let (_, rows) = read_csv_records(content)?;
            rows.into_iter()
                .map(|row| {
                    let obj = row
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect();
                    CompanyTemplate::from_json(&obj)
                })
                .collect()
        }
    };

    for (i, tpl) in templates.iter_mut().enumerate() {
        if tpl.template_name.trim().is_empty() {
            tpl.template_name = format!("Template {}", existing + i + 1);
        }
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_import_case() -> ApplicationRecord {
        let mut record = ApplicationRecord::empty();
        for (field, _, _) in REQUIRED_FIELDS {
            record.set_text(field, "x");
        }
        record.set_text("origin", "輸入");
        record
    }

    #[test]
    fn completeness_counts_required_fields() {
        assert_eq!(completeness(&ApplicationRecord::empty()), 0.0);
        let mut record = filled_import_case();
        assert_eq!(completeness(&record), 1.0);
        record.set_text("name_en", "  ");
        record.set_text("manu_addr", "");
        assert_eq!(completeness(&record), 14.0 / 16.0);
    }

    #[test]
    fn report_lists_labels_and_recommendations() {
        let mut record = filled_import_case();
        record.set_text("contact_email", "");
        record.set_text("auth_applicable", "適用");

        let report = missing_items_report(&record, "", Language::ZhTw);
        assert_eq!(report.missing_required_fields, vec!["電子郵件"]);
        assert_eq!(report.guidance_readiness.len(), 1);
        assert_eq!(report.optional_recommendations.len(), 2);
        assert!(report.optional_recommendations[0].contains("CFS"));
        assert!(report.optional_recommendations[1].contains("qms_applicable"));
        assert!(chrono::DateTime::parse_from_rfc3339(&report.generated_at).is_ok());
    }

    #[test]
    fn domestic_case_only_gets_qms_hint() {
        let mut record = filled_import_case();
        record.set_text("origin", "國產");
        record.set_text("qms_applicable", "適用");
        let report = missing_items_report(&record, "## 0. 審查目的\n...", Language::ZhTw);
        assert!(report.missing_required_fields.is_empty());
        assert!(report.guidance_readiness.is_empty());
        assert!(report.optional_recommendations.is_empty());
    }

    #[test]
    fn template_round_trip_onto_another_record() {
        let mut source = ApplicationRecord::empty();
        source.set_text("firm_name", "曜澄醫療器材股份有限公司");
        source.set_text("contact_tel", "02-2258-6600");
        source.set_text("name_zh", "縫合線");
        let tpl = CompanyTemplate::from_record(" Yaocheng ", &source);
        assert_eq!(tpl.template_name, "Yaocheng");
        assert_eq!(tpl.fields.len(), COMPANY_FIELDS.len());

        let mut target = ApplicationRecord::empty();
        target.set_text("firm_name", "Old Firm");
        target.set_text("name_zh", "注射器");
        tpl.apply_to(&mut target);
        assert_eq!(target.text("firm_name"), "曜澄醫療器材股份有限公司");
        assert_eq!(target.text("contact_tel"), "02-2258-6600");
        assert_eq!(target.text("name_zh"), "注射器");
    }

    #[test]
    fn partial_template_leaves_other_fields() {
        let obj = serde_json::json!({"template_name": "T", "firm_addr": "新北市", "name_zh": "ignored"});
        let tpl = CompanyTemplate::from_json(obj.as_object().unwrap());
        assert_eq!(tpl.fields.len(), 1);

        let mut record = ApplicationRecord::empty();
        record.set_text("firm_name", "Keep");
        tpl.apply_to(&mut record);
        assert_eq!(record.text("firm_name"), "Keep");
        assert_eq!(record.text("firm_addr"), "新北市");
        assert_eq!(record.text("name_zh"), "");
    }

    #[test]
    fn templates_upload_names_unnamed_entries() {
        let tpls = parse_templates_upload(
            r#"[{"firm_name": "A"}, {"template_name": "B", "uniform_id": 24813579}, 5]"#,
            UploadFormat::Json,
            2,
        )
        .unwrap();
        assert_eq!(tpls.len(), 2);
        assert_eq!(tpls[0].template_name, "Template 3");
        assert_eq!(tpls[1].fields["uniform_id"], "24813579");

        let csv = parse_templates_upload("template_name,firm_name\n,C\n", UploadFormat::Csv, 0).unwrap();
        assert_eq!(csv[0].template_name, "Template 1");
        assert!(parse_templates_upload("3", UploadFormat::Json, 0).is_err());
    }

    #[test]
    fn english_report_uses_english_labels() {
        let mut record = filled_import_case();
        record.set_text("contact_email", "");

        let zh = missing_items_report(&record, "", Language::ZhTw);
        let en = missing_items_report(&record, "", Language::En);
        assert_eq!(en.missing_required_fields, vec!["Email"]);
        assert_ne!(en.missing_required_fields, zh.missing_required_fields);
        assert_eq!(en.guidance_readiness, vec!["No screening guidance provided yet (recommended)"]);
        assert_eq!(en.optional_recommendations.len(), zh.optional_recommendations.len());
        assert!(en.optional_recommendations[0].starts_with("Import cases"));
    }

    #[test]
    fn draft_marks_blanks_and_warns_on_missing_fields() {
        let mut record = ApplicationRecord::empty();
        record.set_text("name_zh", "一次性無菌注射器");
        record.set_text("auth_applicable", "適用");

        let md = render_application_markdown(&record, Language::ZhTw);
        assert!(md.starts_with("# 第二、三等級醫療器材查驗登記申請書（線上草稿）\n\n> 以下基本欄位尚未完整（形式檢查）：\n> - 電子流水號\n"));
        assert!(md.contains("- 公文文號：（未填）"));
        assert!(md.contains("- 中文名稱：一次性無菌注射器"));
        assert!(md.contains("- 前次申請案號：不適用"));
        assert!(md.contains("- 已確認證照相符：否"));
        assert!(md.contains("- 原廠授權：適用 / （未填）"));
        assert!(md.contains("### 類似品摘要\n（未填）"));
        assert!(!md.contains("> - 中文名稱"));
        assert_eq!(md.matches("\n> - ").count(), REQUIRED_FIELDS.len() - 1);
    }

    #[test]
    fn complete_draft_has_no_warning() {
        let mut record = filled_import_case();
        record.set_flag("confirm_match", true);
        let md = render_application_markdown(&record, Language::ZhTw);
        assert!(!md.contains("形式檢查"));
        assert!(md.contains("- 產地：輸入"));
        assert!(md.contains("- 已確認證照相符：是"));
    }

    #[test]
    fn english_draft_differs() {
        let record = ApplicationRecord::empty();
        let zh = render_application_markdown(&record, Language::ZhTw);
        let en = render_application_markdown(&record, Language::En);
        assert_ne!(zh, en);
        assert!(en.starts_with("# Class II/III Medical Device Registration Application (Online Draft)"));
        assert!(en.contains("> - Electronic serial no."));
        assert!(en.contains("- Document no.: (not provided)"));
        assert!(en.contains("- Prior application no.: N/A"));
        assert!(!en.contains("未填"));
    }
}
