use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::forms::model::{Form, ItemKind};
use crate::forms::{bounded, FormsApi};

/// Answer-slot id → human label.
pub type QuestionLabels = HashMap<String, String>;

pub const UNTITLED: &str = "Untitled";

/// Composite slot id for one row of a table question.
pub fn table_row_key(table_question_id: &str, row_id: &str) -> String {
    format!("{}_{}", table_question_id, row_id)
}

/// Flatten a form schema into slot labels.
pub fn labels_from_form(form: &Form) -> QuestionLabels {
    let mut labels = QuestionLabels::new();

    for item in &form.items {
        let title = item.title.as_deref().unwrap_or(UNTITLED);
        match item.kind() {
            ItemKind::Question(question_id) => {
                labels.insert(question_id.to_string(), title.to_string());
            }
            ItemKind::Table(table) => {
                labels.insert(table.question_id.clone(), title.to_string());
                for row in &table.rows {
                    labels.insert(
                        table_row_key(&table.question_id, &row.row_id),
                        row.title.clone().unwrap_or_else(|| UNTITLED.to_string()),
                    );
                }
            }
            ItemKind::QuestionGroup(group) => {
                if let Some(item_id) = &item.item_id {
                    labels.insert(item_id.clone(), title.to_string());
                }
                for question in &group.questions {
                    if let Some(question_id) = &question.question_id {
                        let row_title = question
                            .row_question
                            .as_ref()
                            .and_then(|r| r.title.as_deref())
                            .unwrap_or(UNTITLED);
                        labels.insert(question_id.clone(), format!("{}: {}", title, row_title));
                    }
                }
            }
            ItemKind::Display => {
                if let Some(item_id) = &item.item_id {
                    labels.insert(item_id.clone(), title.to_string());
                }
            }
        }
    }

    labels
}

/// Fetch the current schema of a form and flatten it. A failed fetch yields
/// an empty map so formatting falls back to raw slot ids.
pub async fn resolve(forms: &dyn FormsApi, form_id: &str, timeout: Duration) -> QuestionLabels {
    match bounded(timeout, forms.get_form(form_id)).await {
        Ok(form) => labels_from_form(&form),
        Err(e) => {
            warn!("Failed to load questions of form {}: {}", form_id, e);
            QuestionLabels::new()
        }
    }
}
