//! Prompts for certificate extraction and vision OCR.
//!
//! Every prompt lives here so tests can inspect them without a live model.

/// Output keys the extraction model is asked for, in table order.
///
/// These are the serde names of [`crate::record::PatentRecord`].
pub const FIELD_KEYS: [&str; 6] = ["专利号", "专利名称", "专利权人", "专利类型", "发明人", "申请日"];

/// System instruction sent to every extraction backend.
pub const EXTRACTION_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that extracts JSON data from text. Output ONLY valid JSON.";

/// Build the user prompt for one certificate.
///
/// `text` is expected to be truncated already; see
/// [`crate::config::PipelineConfig::max_input_chars`].
pub fn extraction_prompt(text: &str) -> String {
    format!(
        r#"You are a professional patent analyst. Extract the following information from the provided OCR text of a Patent Certificate.
The text may contain OCR errors, please correct them based on context.

Required Fields:
- Patent Number (专利号): Format usually starts with ZL...
- Patent Name (专利名称): Title of the patent.
- Patent Holder (专利权人): The owner/applicant.
- Patent Type (专利类型): e.g., 发明, 实用新型, 外观设计.
- Inventor (发明人): List of inventors.
- Application Date (申请日): Format YYYY-MM-DD.

Return ONLY a valid JSON object with these keys: {keys}.
If a field is not found, set it to null.

OCR Text:
{text}"#,
        keys = FIELD_KEYS
            .iter()
            .map(|k| format!("\"{k}\""))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// System prompt for transcribing a rasterised certificate page with a
/// vision model instead of Tesseract.
pub const VISION_OCR_PROMPT: &str = r#"You are an OCR engine. Transcribe ALL text visible on this scanned patent certificate page, in reading order.

Rules:
- Preserve Chinese and English text exactly as printed
- Keep numbers, dates and patent numbers (e.g. ZL2020202178118) verbatim
- One line of output per printed line
- Output ONLY the transcribed text, no commentary, no Markdown fences"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_lists_every_key_and_the_text() {
        let p = extraction_prompt("证书号第123号");
        for key in FIELD_KEYS {
            assert!(p.contains(&format!("\"{key}\"")), "missing {key}");
        }
        assert!(p.ends_with("证书号第123号"));
    }

    #[test]
    fn system_prompt_demands_json() {
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("ONLY valid JSON"));
    }
}
