//! In-process fakes of the external seams, for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::forms::model::{Form, FormResponse};
use crate::forms::{DriveApi, FetchError, FormsApi};
use crate::platform::{DeliveryError, DeliverySink, FormatMode};

pub fn response(id: &str, create_time: &str, answers: serde_json::Value) -> FormResponse {
    serde_json::from_value(serde_json::json!({
        "responseId": id,
        "createTime": create_time,
        "answers": answers
    }))
    .unwrap()
}

#[derive(Default)]
pub struct FakeForms {
    forms: Mutex<HashMap<String, Form>>,
    responses: Mutex<HashMap<String, Vec<FormResponse>>>,
    pub failing_lists: Mutex<HashSet<String>>,
    pub failing_details: Mutex<HashSet<String>>,
    pub denied_forms: Mutex<HashSet<String>>,
    pub slow_forms: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
}

impl FakeForms {
    pub fn add_form(&self, form_id: &str, items: serde_json::Value) {
        let form: Form = serde_json::from_value(serde_json::json!({
            "formId": form_id,
            "items": items
        }))
        .unwrap();
        self.forms.lock().unwrap().insert(form_id.to_string(), form);
    }

    pub fn add_response(&self, form_id: &str, response: FormResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(form_id.to_string())
            .or_default()
            .push(response);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormsApi for FakeForms {
    async fn list_responses(&self, form_id: &str) -> Result<Vec<FormResponse>, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let slow = self.slow_forms.lock().unwrap().contains(form_id);
        if slow {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.failing_lists.lock().unwrap().contains(form_id) {
            return Err(FetchError::Transient("list unavailable".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(form_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_response(
        &self,
        form_id: &str,
        response_id: &str,
    ) -> Result<FormResponse, FetchError> {
        if self.failing_details.lock().unwrap().contains(response_id) {
            return Err(FetchError::Transient("detail unavailable".to_string()));
        }
        self.responses
            .lock()
            .unwrap()
            .get(form_id)
            .and_then(|list| list.iter().find(|r| r.response_id == response_id).cloned())
            .ok_or(FetchError::NotFound)
    }

    async fn get_form(&self, form_id: &str) -> Result<Form, FetchError> {
        if self.denied_forms.lock().unwrap().contains(form_id) {
            return Err(FetchError::Denied("403".to_string()));
        }
        self.forms
            .lock()
            .unwrap()
            .get(form_id)
            .cloned()
            .ok_or(FetchError::NotFound)
    }
}

#[derive(Default)]
pub struct FakeDrive {
    names: HashMap<String, String>,
}

impl FakeDrive {
    pub fn with_names(pairs: &[(&str, &str)]) -> Self {
        Self {
            names: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl DriveApi for FakeDrive {
    async fn file_name(&self, file_id: &str) -> Result<String, FetchError> {
        self.names.get(file_id).cloned().ok_or(FetchError::NotFound)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(i64, String, FormatMode)>>,
    pub failing: Mutex<HashSet<i64>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(i64, String, FormatMode)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn send(
        &self,
        destination_id: i64,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(&destination_id) {
            return Err(DeliveryError::Rejected("chat not found".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination_id, text.to_string(), mode));
        Ok(())
    }
}
