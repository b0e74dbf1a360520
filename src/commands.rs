//! Bind, unbind and list, independent of the chat platform.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tracing::{info, warn};

use crate::forms::{bounded, FetchError, FormsApi};
use crate::store::{legacy, Subscription, SubscriptionStore};

pub const CONNECT_USAGE: &str = "Send the form link as /connect <form url or id> [destination chat id]. \
     Without a destination id, responses are posted to this chat.";
pub const DELETE_USAGE: &str = "Send the form link as /delete <form url or id>.";
pub const NOTHING_BOUND: &str = "No forms are bound to this chat yet.";

/// Where responses of a newly bound form should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// The chat the command was sent from.
    CurrentChat,
    /// Another chat, given by id.
    Explicit(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub form_id: String,
    pub destination: Destination,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BindOutcome {
    Created { warning: Option<String> },
    /// Existing binding; the delivered set is kept, the destination updated.
    Updated,
    Rejected(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum UnbindOutcome {
    Removed,
    NothingBound,
    NotBound,
}

fn form_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"forms/d/([A-Za-z0-9_-]+)").expect("form url pattern is valid")
    })
}

fn bare_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{10,}$").expect("form id pattern is valid"))
}

/// Extract a form id from an edit URL or accept a bare id.
pub fn parse_form_ref(input: &str) -> Option<String> {
    let input = input.trim();
    if let Some(caps) = form_url_pattern().captures(input) {
        return Some(caps[1].to_string());
    }
    if bare_id_pattern().is_match(input) {
        return Some(input.to_string());
    }
    None
}

pub fn edit_url(form_id: &str) -> String {
    format!("https://docs.google.com/forms/d/{}/edit", form_id)
}

pub fn parse_connect_args(args: &str) -> Result<BindRequest, &'static str> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (form, destination) = match parts.as_slice() {
        [form] => (*form, Destination::CurrentChat),
        [form, dest] => {
            let id = dest.parse::<i64>().map_err(|_| CONNECT_USAGE)?;
            (*form, Destination::Explicit(id))
        }
        _ => return Err(CONNECT_USAGE),
    };
    let form_id = parse_form_ref(form).ok_or(CONNECT_USAGE)?;
    Ok(BindRequest {
        form_id,
        destination,
    })
}

pub fn parse_delete_args(args: &str) -> Result<String, &'static str> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [form] => parse_form_ref(form).ok_or(DELETE_USAGE),
        _ => Err(DELETE_USAGE),
    }
}

/// Command handlers shared by every chat front end.
pub struct Commands {
    store: SubscriptionStore,
    forms: Arc<dyn FormsApi>,
    legacy_sent_ids_path: PathBuf,
    call_timeout: Duration,
}

impl Commands {
    pub fn new(
        store: SubscriptionStore,
        forms: Arc<dyn FormsApi>,
        legacy_sent_ids_path: PathBuf,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            forms,
            legacy_sent_ids_path,
            call_timeout,
        }
    }

    /// Bind `form_id` for `requester`, delivering to `destination_id`.
    pub async fn bind(
        &self,
        requester_chat_id: i64,
        destination_id: i64,
        form_id: &str,
    ) -> Result<BindOutcome> {
        let mut warning = None;
        match bounded(self.call_timeout, self.forms.get_form(form_id)).await {
            Ok(_) => {}
            Err(FetchError::NotFound) => {
                return Ok(BindOutcome::Rejected(format!(
                    "Form {} does not exist or is not shared with the bot.",
                    form_id
                )))
            }
            Err(FetchError::Denied(reason)) => {
                warn!("Access to form {} denied: {}", form_id, reason);
                return Ok(BindOutcome::Rejected(format!(
                    "The bot has no access to form {}.",
                    form_id
                )));
            }
            Err(e) => {
                warn!("Could not verify form {}: {}", form_id, e);
                warning = Some("The form could not be checked right now; it will be polled anyway.".to_string());
            }
        }

        if self
            .store
            .set_destination(requester_chat_id, form_id, destination_id)
            .await?
        {
            info!(
                "Form {} of chat {} now delivers to {}",
                form_id, requester_chat_id, destination_id
            );
            return Ok(BindOutcome::Updated);
        }

        let mut sub = Subscription::new(requester_chat_id, form_id, destination_id);
        match legacy::load_sent_ids(&self.legacy_sent_ids_path).await {
            Ok(ids) => sub.delivered = ids,
            Err(e) => warn!("Ignoring legacy sent ids: {:#}", e),
        }
        self.store.put(&sub).await?;
        info!(
            "Bound form {} for chat {} (destination {})",
            form_id, requester_chat_id, destination_id
        );
        Ok(BindOutcome::Created { warning })
    }

    pub async fn unbind(&self, requester_chat_id: i64, form_id: &str) -> Result<UnbindOutcome> {
        if self.store.get(requester_chat_id).await?.is_empty() {
            return Ok(UnbindOutcome::NothingBound);
        }
        if self.store.remove(requester_chat_id, Some(form_id)).await? == 0 {
            return Ok(UnbindOutcome::NotBound);
        }
        info!("Unbound form {} from chat {}", form_id, requester_chat_id);
        Ok(UnbindOutcome::Removed)
    }

    /// Remove every binding of a requester; returns how many went.
    pub async fn reset(&self, requester_chat_id: i64) -> Result<usize> {
        let removed = self.store.remove(requester_chat_id, None).await?;
        info!("Removed {} binding(s) of chat {}", removed, requester_chat_id);
        Ok(removed)
    }

    pub async fn list(&self, requester_chat_id: i64) -> Result<Vec<Subscription>> {
        self.store.get(requester_chat_id).await
    }
}

pub fn describe_bind(form_id: &str, destination_id: i64, outcome: &BindOutcome) -> String {
    match outcome {
        BindOutcome::Created { warning: None } => {
            format!("Form {} is now bound to chat {}.", form_id, destination_id)
        }
        BindOutcome::Created {
            warning: Some(warning),
        } => format!(
            "Form {} is now bound to chat {}.\n{}",
            form_id, destination_id, warning
        ),
        BindOutcome::Updated => format!(
            "Form {} was already bound; responses now go to chat {}.",
            form_id, destination_id
        ),
        BindOutcome::Rejected(reason) => reason.clone(),
    }
}

pub fn describe_unbind(form_id: &str, outcome: &UnbindOutcome) -> String {
    match outcome {
        UnbindOutcome::Removed => format!("Form {} removed.", form_id),
        UnbindOutcome::NothingBound => NOTHING_BOUND.to_string(),
        UnbindOutcome::NotBound => "This form is not bound to this chat.".to_string(),
    }
}

pub fn describe_list(subscriptions: &[Subscription]) -> String {
    if subscriptions.is_empty() {
        return NOTHING_BOUND.to_string();
    }
    let mut message = String::from("Bound forms:\n");
    for (index, sub) in subscriptions.iter().enumerate() {
        message.push_str(&format!(
            "{}. {} -> chat {}\n",
            index + 1,
            edit_url(&sub.form_id),
            sub.destination_id
        ));
    }
    message
}
