//! The poll-diff-deliver loop.
//!
//! Every tick reloads subscriptions from the store, lists each form's
//! responses, keeps the ones that are neither delivered nor older than the
//! process baseline, and delivers them one by one. An id is recorded only
//! after its message was accepted by the sink, so a crash in between means a
//! redelivery, never a loss.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::format::{resolve_file_names, ResponseFormatter};
use crate::forms::catalog;
use crate::forms::model::FormResponse;
use crate::forms::{bounded, DriveApi, FormsApi};
use crate::platform::{DeliverySink, FormatMode};
use crate::store::{Subscription, SubscriptionStore};

#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Upper bound for every external call made during a tick.
    pub call_timeout: Duration,
    pub drive_view_base_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub subscriptions: usize,
    pub delivered: usize,
    /// Responses left for a later tick (detail fetch or delivery failed).
    pub deferred: usize,
    /// Subscriptions whose processing hit a list, delivery or store failure.
    pub failed: usize,
    /// The previous tick was still running.
    pub skipped: bool,
}

#[derive(Debug, Default)]
struct SubscriptionOutcome {
    delivered: usize,
    deferred: usize,
    failed: bool,
}

pub struct Poller {
    store: SubscriptionStore,
    forms: Arc<dyn FormsApi>,
    drive: Arc<dyn DriveApi>,
    sink: Arc<dyn DeliverySink>,
    formatter: ResponseFormatter,
    baseline: DateTime<Utc>,
    call_timeout: Duration,
    running: Mutex<()>,
}

impl Poller {
    pub fn new(
        store: SubscriptionStore,
        forms: Arc<dyn FormsApi>,
        drive: Arc<dyn DriveApi>,
        sink: Arc<dyn DeliverySink>,
        settings: PollSettings,
        baseline: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            forms,
            drive,
            sink,
            formatter: ResponseFormatter::new(&settings.drive_view_base_url),
            baseline,
            call_timeout: settings.call_timeout,
            running: Mutex::new(()),
        }
    }

    pub fn baseline(&self) -> DateTime<Utc> {
        self.baseline
    }

    /// Whether a listed response still has to be delivered for `sub`.
    pub fn is_new(&self, sub: &Subscription, response: &FormResponse) -> bool {
        !sub.is_delivered(&response.response_id) && response.create_time > self.baseline
    }

    /// Run one pass over every subscription. Fails only when the
    /// subscriptions themselves cannot be loaded.
    pub async fn tick(&self) -> Result<TickReport> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Previous poll tick is still running, skipping this one");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let subscriptions = self
            .store
            .list_all()
            .await
            .context("Failed to load subscriptions")?;

        let mut report = TickReport {
            subscriptions: subscriptions.len(),
            ..TickReport::default()
        };

        for sub in subscriptions {
            let outcome = self.poll_subscription(sub).await;
            report.delivered += outcome.delivered;
            report.deferred += outcome.deferred;
            if outcome.failed {
                report.failed += 1;
            }
        }

        if report.delivered > 0 || report.failed > 0 {
            info!(
                "Poll tick: {} subscription(s), {} delivered, {} deferred, {} failed",
                report.subscriptions, report.delivered, report.deferred, report.failed
            );
        } else {
            debug!("Poll tick: {} subscription(s), nothing new", report.subscriptions);
        }

        Ok(report)
    }

    async fn poll_subscription(&self, mut sub: Subscription) -> SubscriptionOutcome {
        let mut outcome = SubscriptionOutcome::default();

        let responses = match bounded(self.call_timeout, self.forms.list_responses(&sub.form_id)).await
        {
            Ok(responses) => responses,
            Err(e) if e.is_permanent() => {
                error!(
                    "Form {} of chat {} is no longer readable: {}",
                    sub.form_id, sub.requester_chat_id, e
                );
                outcome.failed = true;
                return outcome;
            }
            Err(e) => {
                warn!("Failed to list responses of form {}: {}", sub.form_id, e);
                outcome.failed = true;
                return outcome;
            }
        };

        let mut fresh: Vec<FormResponse> = responses
            .into_iter()
            .filter(|r| self.is_new(&sub, r))
            .collect();
        if fresh.is_empty() {
            return outcome;
        }
        // Stable: responses created in the same instant keep the API order.
        fresh.sort_by_key(|r| r.create_time);

        debug!(
            "Form {} has {} new response(s) for chat {}",
            sub.form_id,
            fresh.len(),
            sub.requester_chat_id
        );

        let labels = catalog::resolve(self.forms.as_ref(), &sub.form_id, self.call_timeout).await;

        let total = fresh.len();
        for (index, listed) in fresh.iter().enumerate() {
            let detail = match bounded(
                self.call_timeout,
                self.forms.get_response(&sub.form_id, &listed.response_id),
            )
            .await
            {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(
                        "Failed to fetch response {} of form {}: {}",
                        listed.response_id, sub.form_id, e
                    );
                    outcome.deferred += 1;
                    continue;
                }
            };

            let files = resolve_file_names(self.drive.as_ref(), &detail, self.call_timeout).await;
            let text = self.formatter.format(&detail, &labels, &files);

            let sent = tokio::time::timeout(
                self.call_timeout,
                self.sink.send(sub.destination_id, &text, FormatMode::MarkdownV2),
            )
            .await;
            let failure = match sent {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {:?}", self.call_timeout)),
            };
            if let Some(reason) = failure {
                error!(
                    "Failed to deliver response {} of form {} to chat {}: {}",
                    listed.response_id, sub.form_id, sub.destination_id, reason
                );
                outcome.deferred += total - index;
                outcome.failed = true;
                break;
            }

            match self.store.record_delivered(&mut sub, &listed.response_id).await {
                Ok(true) => outcome.delivered += 1,
                Ok(false) => {
                    outcome.delivered += 1;
                    info!(
                        "Form {} was unbound from chat {} during delivery, stopping",
                        sub.form_id, sub.requester_chat_id
                    );
                    break;
                }
                Err(e) => {
                    outcome.delivered += 1;
                    outcome.failed = true;
                    error!(
                        "Failed to record response {} of form {} as delivered: {:#}",
                        listed.response_id, sub.form_id, e
                    );
                    break;
                }
            }
        }

        outcome
    }
}
