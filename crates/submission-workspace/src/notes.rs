/// Note keeper helpers: AI keyword extraction and keyword highlighting.
use serde_json::Value;
use submission_common::router::CompletionRequest;

use crate::error::AppError;

pub const KEYWORD_AGENT: &str = "keyword_extractor";
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#FF7F50";

/// Ask for the 10-15 strongest keywords of a note as `{"keywords": [...]}`.
pub fn keyword_request(note: &str, system_prompt: &str, model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        system_prompt: system_prompt.to_string(),
        user_prompt: format!(
            "Extract the TOP 10-15 high-signal keywords/entities from the note below.

Rules:
- Prefer: proper nouns, standards (ISO/IEC), guidance names, device names, test names, endpoints, regulatory terms, dates, key metrics.
- Output MUST be JSON only: {{\"keywords\":[\"...\"]}}

NOTE:
{note}
"
        ),
        max_tokens: 1500,
        temperature: 0.1,
    }
}

/// Keywords from model output. Chatter around the JSON is tolerated by
/// falling back to the outermost `{...}` slice. A missing or non-list
/// `keywords` value yields no keywords.
pub fn parse_keywords(raw: &str) -> Result<Vec<String>, AppError> {
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(v) => v,
        Err(_) => {
            let slice = match (raw.find('{'), raw.rfind('}')) {
                (Some(start), Some(end)) if start < end => &raw[start..=end],
                _ => {
                    return Err(AppError::Upload(
                        "model output contains no JSON object".to_string(),
                    ))
                }
            };
            serde_json::from_str(slice)?
        }
    };

    let keywords = match value.get("keywords") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    Ok(keywords)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Keywords with ASCII letters or digits only match as whole words; others
/// (CJK terms) match anywhere.
fn matches_at(text: &str, at: usize, keyword: &str) -> bool {
    if !text[at..].starts_with(keyword) {
        return false;
    }
    if !keyword.chars().any(|c| c.is_ascii_alphanumeric()) {
        return true;
    }
    let before = text[..at].chars().next_back();
    let after = text[at + keyword.len()..].chars().next();
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}

/// HTML-escape `text` and wrap every keyword occurrence in a bold colored
/// span. Longer keywords win where matches overlap.
pub fn highlight_keywords_html(text: &str, keywords: &[String], color: &str) -> String {
    let mut kws: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    kws.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    kws.dedup();

    let color = escape_html(color);
    let mut out = String::with_capacity(text.len());
    let mut at = 0;
    while at < text.len() {
        if let Some(kw) = kws.iter().find(|kw| matches_at(text, at, kw)) {
            out.push_str(&format!(
                "<span style=\"color:{color};font-weight:800;\">{}</span>",
                escape_html(kw)
            ));
            at += kw.len();
            continue;
        }
        // `at` always sits on a char boundary
        let Some(c) = text[at..].chars().next() else {
            break;
        };
        out.push_str(&escape_html(c.encode_utf8(&mut [0; 4])));
        at += c.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kws(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn clean_json_parses() {
        let keywords = parse_keywords(r#"{"keywords": ["ISO 10993", " EO sterilization ", "", 7]}"#).unwrap();
        assert_eq!(keywords, vec!["ISO 10993", "EO sterilization"]);
    }

    #[test]
    fn chatter_falls_back_to_outer_braces() {
        let raw = "Sure! Here you go:\n```json\n{\"keywords\": [\"510(k)\", \"predicate {K123456}\"]}\n```\nAnything else?";
        assert_eq!(parse_keywords(raw).unwrap(), vec!["510(k)", "predicate {K123456}"]);
    }

    #[test]
    fn unusable_output() {
        assert!(parse_keywords("no json at all").is_err());
        assert!(parse_keywords("} backwards {").is_err());
        assert!(parse_keywords("{\"keywords\": \"ISO\"}").unwrap().is_empty());
        assert!(parse_keywords("{\"other\": []}").unwrap().is_empty());
    }

    #[test]
    fn highlights_whole_words_and_cjk() {
        let html = highlight_keywords_html(
            "ISO 14971 and ISO 14971-2; 滅菌確效 done",
            &kws(&["ISO 14971", "滅菌確效"]),
            DEFAULT_HIGHLIGHT_COLOR,
        );
        assert_eq!(
            html,
            "<span style=\"color:#FF7F50;font-weight:800;\">ISO 14971</span> and ISO 14971-2; \
<span style=\"color:#FF7F50;font-weight:800;\">滅菌確效</span> done"
        );
    }

    #[test]
    fn escapes_before_highlighting() {
        let html = highlight_keywords_html("<b>EO</b> & span", &kws(&["EO", "span", "b"]), "red");
        assert_eq!(
            html,
            "&lt;<span style=\"color:red;font-weight:800;\">b</span>&gt;\
<span style=\"color:red;font-weight:800;\">EO</span>&lt;/<span style=\"color:red;font-weight:800;\">b</span>&gt; \
&amp; <span style=\"color:red;font-weight:800;\">span</span>"
        );
    }

    #[test]
    fn longer_keywords_win() {
        let html = highlight_keywords_html("Class II device", &kws(&["Class", "Class II"]), "red");
        assert!(html.starts_with("<span style=\"color:red;font-weight:800;\">Class II</span>"));
        assert_eq!(html.matches("<span").count(), 1);
    }

    #[test]
    fn nothing_to_highlight() {
        assert_eq!(highlight_keywords_html("a < b", &[], "red"), "a &lt; b");
    }

    #[test]
    fn keyword_request_shape() {
        let req = keyword_request("EO sterilized catheter", "You extract keywords.", "gemini-2.5-flash");
        assert_eq!(req.max_tokens, 1500);
        assert_eq!(req.temperature, 0.1);
        assert!(req.user_prompt.contains("{\"keywords\":[\"...\"]}"));
        assert!(req.user_prompt.ends_with("NOTE:\nEO sterilized catheter\n"));
    }
}
