/// 510(k) review checklists: upload parsing and markdown rendering.
use serde_json::Value;

use crate::error::AppError;
use crate::export::{read_csv_records, UploadFormat};
use crate::mapping::value_to_text;
use crate::model::ChecklistItem;

/// Column name variants accepted on upload.
fn column_for(name: &str) -> Option<&'static str> {
    match name.trim() {
        "section" | "Section" | "SECTION" => Some("section"),
        "item" | "Item" | "ITEM" | "Requirement" => Some("item"),
        "expected" | "Expected" | "EXPECTED" => Some("expected"),
        "notes" | "Notes" | "NOTE" | "Finding" => Some("notes"),
        _ => None,
    }
}

fn item_from_pairs<'a, I>(pairs: I) -> ChecklistItem
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut item = ChecklistItem::default();
    for (key, value) in pairs {
        let slot = match column_for(key) {
            Some("section") => &mut item.section,
            Some("item") => &mut item.item,
            Some("expected") => &mut item.expected,
            Some("notes") => &mut item.notes,
            _ => continue,
        };
        *slot = value.trim().to_string();
    }
    item
}

fn is_blank(item: &ChecklistItem) -> bool {
    [&item.section, &item.item, &item.expected, &item.notes]
        .iter()
        .all(|s| s.trim().is_empty())
}

/// JSON (a list of items, or `{"items": [...]}`) or CSV with a header row.
/// Cells are trimmed, missing columns become `""`, and rows with every
/// column blank are dropped.
pub fn parse_checklist_upload(content: &str, format: UploadFormat) -> Result<Vec<ChecklistItem>, AppError> {
    let items: Vec<ChecklistItem> = match format {
        UploadFormat::Json => {
            let parsed: Value = serde_json::from_str(content)?;
            let list = match parsed {
                Value::Array(list) => list,
                Value::Object(mut map) => match map.remove("items") {
                    Some(Value::Array(list)) => list,
                    _ => {
                        return Err(AppError::Upload(
                            "checklist JSON must be a list or an object with an \"items\" list".to_string(),
                        ))
                    }
                },
                _ => {
                    return Err(AppError::Upload(
                        "checklist JSON must be a list or an object with an \"items\" list".to_string(),
                    ))
                }
            };
            list.iter()
                .filter_map(Value::as_object)
                .map(|obj| item_from_pairs(obj.iter().map(|(k, v)| (k.as_str(), value_to_text(v)))))
                .collect()
        }
        UploadFormat::Csv => {
            let (_, rows) = read_csv_records(content)?;
            rows.iter()
                .map(|row| item_from_pairs(row.iter().map(|(k, v)| (k.as_str(), v.clone()))))
                .collect()
        }
    };
    Ok(items.into_iter().filter(|it| !is_blank(it)).collect())
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Markdown table of the checklist; `""` for an empty checklist.
pub fn checklist_to_markdown(items: &[ChecklistItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut lines = vec![
        "| Section | Item | Expected | Notes |".to_string(),
        "|---|---|---|---|".to_string(),
    ];
    lines.extend(items.iter().map(|it| {
        format!(
            "| {} | {} | {} | {} |",
            cell(&it.section),
            cell(&it.item),
            cell(&it.expected),
            cell(&it.notes)
        )
    }));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_list_and_wrapped_items() {
        let list = parse_checklist_upload(
            r#"[{"Section": "Labeling", "Requirement": "IFU review", "EXPECTED": "Consistent"}]"#,
            UploadFormat::Json,
        )
        .unwrap();
        assert_eq!(
            list,
            vec![ChecklistItem {
                section: "Labeling".into(),
                item: "IFU review".into(),
                expected: "Consistent".into(),
                notes: String::new(),
            }]
        );

        let wrapped = parse_checklist_upload(
            r#"{"items": [{"section": "Admin", "item": "Cover letter", "Finding": "ok"}, {"notes": ""}]}"#,
            UploadFormat::Json,
        )
        .unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].notes, "ok");
    }

    #[test]
    fn json_of_wrong_shape_is_rejected() {
        assert!(parse_checklist_upload(r#"{"rows": []}"#, UploadFormat::Json).is_err());
        assert!(parse_checklist_upload("42", UploadFormat::Json).is_err());
        assert!(parse_checklist_upload("[", UploadFormat::Json).is_err());
    }

    #[test]
    fn csv_with_aliases_and_blank_rows() {
        let csv = "SECTION,ITEM,Expected\nPerformance,Bench testing,Adequate\n,,\nRisk,Risk analysis,\n";
        let items = parse_checklist_upload(csv, UploadFormat::Csv).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].section, "Risk");
        assert_eq!(items[1].expected, "");
        assert_eq!(items[0].notes, "");
    }

    #[test]
    fn markdown_table() {
        assert_eq!(checklist_to_markdown(&[]), "");
        let items = vec![ChecklistItem {
            section: "Indications".into(),
            item: "IFU | label".into(),
            expected: "Consistent".into(),
            notes: "line1\nline2".into(),
        }];
        assert_eq!(
            checklist_to_markdown(&items),
            "| Section | Item | Expected | Notes |\n|---|---|---|---|\n| Indications | IFU \\| label | Consistent | line1 line2 |"
        );
    }

    #[test]
    fn cells_are_trimmed() {
        let csv = "section,item,expected,notes\n  Sterility , EO residuals ,  ISO 10993-7\t, \n";
        let items = parse_checklist_upload(csv, UploadFormat::Csv).unwrap();
        assert_eq!(
            items,
            vec![ChecklistItem {
                section: "Sterility".into(),
                item: "EO residuals".into(),
                expected: "ISO 10993-7".into(),
                notes: String::new(),
            }]
        );

        let json = parse_checklist_upload(r#"[{"item": "  Labeling\n"}]"#, UploadFormat::Json).unwrap();
        assert_eq!(json[0].item, "Labeling");
    }
}
