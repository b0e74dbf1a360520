pub mod catalog;
pub mod google;
pub mod model;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::forms::model::{Form, FormResponse};

/// Failure of a call to the form or file API.
///
/// `NotFound` and `Denied` are permanent for the referenced object; the rest
/// are expected to clear up on a later tick.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("not found")]
    NotFound,

    #[error("access denied: {0}")]
    Denied(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetchError::NotFound | FetchError::Denied(_))
    }
}

/// Source of forms and their responses.
#[async_trait]
pub trait FormsApi: Send + Sync {
    /// All responses of a form, following pagination to the end.
    async fn list_responses(&self, form_id: &str) -> Result<Vec<FormResponse>, FetchError>;

    async fn get_response(
        &self,
        form_id: &str,
        response_id: &str,
    ) -> Result<FormResponse, FetchError>;

    async fn get_form(&self, form_id: &str) -> Result<Form, FetchError>;
}

/// File metadata lookup, used for file-upload answers.
#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn file_name(&self, file_id: &str) -> Result<String, FetchError>;
}

/// Bound an external call so one slow request cannot stall a whole tick.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(limit)),
    }
}
