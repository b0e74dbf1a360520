//! Rendering of a form response as a Telegram MarkdownV2 message.

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use teloxide::utils::markdown::{bold, escape};
use tracing::warn;

use crate::forms::catalog::{table_row_key, QuestionLabels};
use crate::forms::model::{Answer, FileRef, FormResponse, TableCells, NO_ANSWER};
use crate::forms::{bounded, DriveApi};

pub const HEADER: &str = "New response:";
pub const UNKNOWN_FILE: &str = "unknown";

/// File id → display name, resolved ahead of rendering.
pub type FileNames = HashMap<String, String>;

pub struct ResponseFormatter {
    view_base_url: String,
}

impl ResponseFormatter {
    pub fn new(view_base_url: &str) -> Self {
        Self {
            view_base_url: view_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn viewer_url(&self, file_id: &str) -> String {
        format!("{}/{}/view", self.view_base_url, file_id)
    }

    /// Render one response. Slots come out in slot-id order; a slot without a
    /// label is shown under its raw id.
    pub fn format(
        &self,
        response: &FormResponse,
        labels: &QuestionLabels,
        files: &FileNames,
    ) -> String {
        let mut out = format!("{}\n", bold(&escape(HEADER)));

        for (slot_id, answer) in response.answers() {
            let label = labels.get(slot_id).map(String::as_str).unwrap_or(slot_id);
            self.render_answer(&mut out, slot_id, label, &answer, labels, files);
        }

        out
    }

    fn render_answer(
        &self,
        out: &mut String,
        slot_id: &str,
        label: &str,
        answer: &Answer,
        labels: &QuestionLabels,
        files: &FileNames,
    ) {
        match answer {
            Answer::Text(values)
            | Answer::Checkbox(values)
            | Answer::Radio(values)
            | Answer::Scale(values)
            | Answer::Date(values)
            | Answer::Time(values)
            | Answer::Dropdown(values) => {
                let _ = writeln!(out, "{}: {}", escape(label), escape(&values.join(", ")));
            }
            Answer::FileUpload(refs) => {
                let _ = writeln!(out, "{}:", escape(label));
                for file in refs {
                    self.render_file(out, file, files);
                }
            }
            Answer::Table(cells) => {
                let _ = writeln!(out, "{}:", escape(label));
                render_table(out, slot_id, cells, labels);
            }
            Answer::None => {
                let _ = writeln!(out, "{}: {}", escape(label), escape(NO_ANSWER));
            }
        }
    }

    fn render_file(&self, out: &mut String, file: &FileRef, files: &FileNames) {
        let name = files
            .get(&file.file_id)
            .map(String::as_str)
            .or(file.file_name.as_deref())
            .unwrap_or(UNKNOWN_FILE);
        let _ = writeln!(out, "  File name: {}", escape(name));
        let _ = writeln!(out, "  File URL: {}", escape(&self.viewer_url(&file.file_id)));
    }
}

fn render_table(out: &mut String, table_id: &str, cells: &TableCells, labels: &QuestionLabels) {
    for (row_id, columns) in cells {
        let row_key = table_row_key(table_id, row_id);
        let row_label = labels.get(&row_key).map(String::as_str).unwrap_or(row_id);
        for (col_id, value) in columns {
            let col_label = labels.get(col_id).map(String::as_str).unwrap_or(col_id);
            let _ = writeln!(
                out,
                "  Row {}: Column {}: {}",
                escape(row_label),
                escape(col_label),
                escape(value)
            );
        }
    }
}

/// Look up display names for every uploaded file in a response. Failed
/// lookups are logged and left out; the formatter falls back on its own.
pub async fn resolve_file_names(
    drive: &dyn DriveApi,
    response: &FormResponse,
    timeout: Duration,
) -> FileNames {
    let mut names = FileNames::new();

    for (_, answer) in response.answers() {
        let Answer::FileUpload(refs) = answer else {
            continue;
        };
        for file in refs {
            if names.contains_key(&file.file_id) {
                continue;
            }
            match bounded(timeout, drive.file_name(&file.file_id)).await {
                Ok(name) => {
                    names.insert(file.file_id.clone(), name);
                }
                Err(e) => warn!("Failed to resolve name of file {}: {}", file.file_id, e),
            }
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDrive;

    fn response(answers: serde_json::Value) -> FormResponse {
        serde_json::from_value(serde_json::json!({
            "responseId": "r1",
            "createTime": "2026-05-01T12:00:00Z",
            "answers": answers
        }))
        .unwrap()
    }

    fn labels(pairs: &[(&str, &str)]) -> QuestionLabels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn formatter() -> ResponseFormatter {
        ResponseFormatter::new("https://drive.google.com/file/d/")
    }

    #[test]
    fn test_short_answer_line() {
        let r = response(serde_json::json!({
            "q1": { "textAnswers": { "answers": [{ "value": "Alice" }] } }
        }));
        let text = formatter().format(&r, &labels(&[("q1", "Name")]), &FileNames::new());
        assert!(text.starts_with("*New response:*\n"));
        assert!(text.contains("Name: Alice"));
    }

    #[test]
    fn test_table_line_has_row_column_and_value() {
        let r = response(serde_json::json!({
            "t1": { "tableAnswers": { "answers": {
                "row1": { "answers": { "c1": { "value": "42" } } }
            } } }
        }));
        let l = labels(&[("t1", "Scores"), ("t1_row1", "Row A"), ("c1", "Col A")]);
        let text = formatter().format(&r, &l, &FileNames::new());

        assert!(text.contains("Scores:\n"));
        let line = text
            .lines()
            .find(|l| l.contains("42"))
            .expect("table cell line");
        assert!(line.contains("Row A"));
        assert!(line.contains("Col A"));
    }

    #[test]
    fn test_format_is_deterministic() {
        let r = response(serde_json::json!({
            "b": { "checkboxAnswers": { "answers": [{ "value": "x" }, { "value": "y" }] } },
            "a": { "scaleAnswers": { "answers": [{ "value": "5" }] } },
            "c": { "dateAnswers": { "answers": [{ "value": "2026-05-01" }] } }
        }));
        let l = labels(&[("a", "Rating"), ("b", "Picks")]);
        let first = formatter().format(&r, &l, &FileNames::new());
        let second = formatter().format(&r, &l, &FileNames::new());
        assert_eq!(first, second);
        assert!(first.contains("Picks: x, y"));
        // no label: raw id, with MarkdownV2 escaping of the value
        assert!(first.contains("c: 2026\\-05\\-01"));
    }

    #[test]
    fn test_unknown_kind_renders_placeholder() {
        let r = response(serde_json::json!({ "q9": {} }));
        let text = formatter().format(&r, &labels(&[("q9", "Mood")]), &FileNames::new());
        assert!(text.contains("Mood: No answer"));
    }

    #[test]
    fn test_user_content_is_escaped() {
        let r = response(serde_json::json!({
            "q1": { "textAnswers": { "answers": [{ "value": "*bold* [link](x)" }] } }
        }));
        let text = formatter().format(&r, &labels(&[("q1", "Note_1")]), &FileNames::new());
        assert!(text.contains("Note\\_1: \\*bold\\* \\[link\\]\\(x\\)"));
    }

    #[test]
    fn test_file_upload_uses_resolved_name_then_fallbacks() {
        let r = response(serde_json::json!({
            "up": { "fileUploadAnswers": { "answers": [
                { "fileId": "f1", "fileName": "original.pdf" },
                { "fileId": "f2", "fileName": "carried.png" },
                { "fileId": "f3" }
            ] } }
        }));
        let mut files = FileNames::new();
        files.insert("f1".to_string(), "cv".to_string());

        let text = formatter().format(&r, &labels(&[("up", "Upload")]), &files);
        assert!(text.contains("Upload:\n"));
        assert!(text.contains("File name: cv\n"));
        assert!(text.contains("File name: carried\\.png"));
        assert!(text.contains("File name: unknown"));
        assert!(text.contains("drive\\.google\\.com/file/d/f1/view"));
    }

    #[tokio::test]
    async fn test_resolve_file_names_skips_failures() {
        let r = response(serde_json::json!({
            "up": { "fileUploadAnswers": { "answers": [
                { "fileId": "known" }, { "fileId": "broken" }
            ] } }
        }));
        let drive = FakeDrive::with_names(&[("known", "report.docx")]);
        let names = resolve_file_names(&drive, &r, Duration::from_secs(1)).await;
        assert_eq!(names.get("known").map(String::as_str), Some("report.docx"));
        assert!(!names.contains_key("broken"));
    }
}
