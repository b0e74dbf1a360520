use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A form schema as returned by `forms.get`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    #[serde(default)]
    pub items: Vec<Item>,
}

/// One schema item. The API marks the item kind by which `*Item` field is
/// present; [`Item::kind`] turns that into an enum.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub question_item: Option<QuestionItem>,
    #[serde(default)]
    pub question_group_item: Option<QuestionGroupItem>,
    #[serde(default)]
    pub table_item: Option<TableItem>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuestionItem {
    #[serde(default)]
    pub question: Option<Question>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub row_question: Option<RowQuestion>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RowQuestion {
    #[serde(default)]
    pub title: Option<String>,
}

/// Grid question: one `Question` per row.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuestionGroupItem {
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableItem {
    pub table: Table,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub question_id: String,
    #[serde(default)]
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub row_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

pub enum ItemKind<'a> {
    Question(&'a str),
    QuestionGroup(&'a QuestionGroupItem),
    Table(&'a Table),
    /// Text, image, video, page break and anything else without answers.
    Display,
}

impl Item {
    pub fn kind(&self) -> ItemKind<'_> {
        if let Some(id) = self
            .question_item
            .as_ref()
            .and_then(|q| q.question.as_ref())
            .and_then(|q| q.question_id.as_deref())
        {
            return ItemKind::Question(id);
        }
        if let Some(table) = &self.table_item {
            return ItemKind::Table(&table.table);
        }
        if let Some(group) = &self.question_group_item {
            return ItemKind::QuestionGroup(group);
        }
        ItemKind::Display
    }
}

/// A submitted response. `answers` is empty in some list payloads; the poll
/// loop always fetches the detailed body before formatting.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormResponse {
    pub response_id: String,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub answers: BTreeMap<String, RawAnswer>,
}

impl FormResponse {
    pub fn answers(&self) -> impl Iterator<Item = (&str, Answer)> + '_ {
        self.answers
            .iter()
            .map(|(slot, raw)| (slot.as_str(), Answer::from(raw)))
    }
}

/// Wire shape of an answer: exactly one of the `*Answers` fields is expected.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawAnswer {
    #[serde(default)]
    pub text_answers: Option<ValueList>,
    #[serde(default)]
    pub file_upload_answers: Option<FileList>,
    #[serde(default)]
    pub checkbox_answers: Option<ValueList>,
    #[serde(default)]
    pub table_answers: Option<TableAnswers>,
    #[serde(default)]
    pub radio_answers: Option<ValueList>,
    #[serde(default)]
    pub scale_answers: Option<ValueList>,
    #[serde(default)]
    pub date_answers: Option<ValueList>,
    #[serde(default)]
    pub time_answers: Option<ValueList>,
    #[serde(default)]
    pub dropdown_answers: Option<ValueList>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValueList {
    #[serde(default)]
    pub answers: Option<Vec<ValueAnswer>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValueAnswer {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileList {
    #[serde(default)]
    pub answers: Option<Vec<FileRef>>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TableAnswers {
    #[serde(default)]
    pub answers: Option<BTreeMap<String, TableRowAnswers>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TableRowAnswers {
    #[serde(default)]
    pub answers: BTreeMap<String, ValueAnswer>,
}

/// Placeholder for a missing value or an answer of unknown shape.
pub const NO_ANSWER: &str = "No answer";

/// Row id → column id → value.
pub type TableCells = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(Vec<String>),
    Checkbox(Vec<String>),
    FileUpload(Vec<FileRef>),
    Table(TableCells),
    Radio(Vec<String>),
    Scale(Vec<String>),
    Date(Vec<String>),
    Time(Vec<String>),
    Dropdown(Vec<String>),
    None,
}

fn values(list: &[ValueAnswer]) -> Vec<String> {
    list.iter()
        .map(|a| a.value.clone().unwrap_or_else(|| NO_ANSWER.to_string()))
        .collect()
}

impl From<&RawAnswer> for Answer {
    fn from(raw: &RawAnswer) -> Self {
        fn present(list: &Option<ValueList>) -> Option<&[ValueAnswer]> {
            list.as_ref().and_then(|l| l.answers.as_deref())
        }

        if let Some(list) = present(&raw.text_answers) {
            return Answer::Text(values(list));
        }
        if let Some(files) = raw
            .file_upload_answers
            .as_ref()
            .and_then(|f| f.answers.as_ref())
        {
            return Answer::FileUpload(files.clone());
        }
        if let Some(list) = present(&raw.checkbox_answers) {
            return Answer::Checkbox(values(list));
        }
        if let Some(rows) = raw.table_answers.as_ref().and_then(|t| t.answers.as_ref()) {
            let cells = rows
                .iter()
                .map(|(row_id, row)| {
                    let cols = row
                        .answers
                        .iter()
                        .map(|(col_id, a)| {
                            let value = a.value.clone().unwrap_or_else(|| NO_ANSWER.to_string());
                            (col_id.clone(), value)
                        })
                        .collect();
                    (row_id.clone(), cols)
                })
                .collect();
            return Answer::Table(cells);
        }
        if let Some(list) = present(&raw.radio_answers) {
            return Answer::Radio(values(list));
        }
        if let Some(list) = present(&raw.scale_answers) {
            return Answer::Scale(values(list));
        }
        if let Some(list) = present(&raw.date_answers) {
            return Answer::Date(values(list));
        }
        if let Some(list) = present(&raw.time_answers) {
            return Answer::Time(values(list));
        }
        if let Some(list) = present(&raw.dropdown_answers) {
            return Answer::Dropdown(values(list));
        }
        Answer::None
    }
}
