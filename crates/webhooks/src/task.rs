//! Delivery task records and attempt classification.

use std::time::Duration;

use {
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

use crate::event::WebhookBody;

/// Lifecycle of one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Waiting for its initial hold to elapse.
    Pending,
    /// At least one attempt failed; a retry is scheduled.
    Retrying,
    /// A 2xx response was received.
    Success,
    /// Retries are exhausted.
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// One attempted notification.
///
/// Invariants: `completed_at` is set iff the status is terminal;
/// `next_retry_at` is set iff the status is `Retrying`.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub id: Uuid,
    pub session_id: String,
    pub url: String,
    pub method: reqwest::Method,
    pub body: WebhookBody,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Initial hold: the task is not attempted before this instant.
    pub not_before: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Guard against a second scan picking the task mid-attempt.
    pub(crate) in_flight: bool,
}

impl DeliveryTask {
    pub fn new(
        session_id: &str,
        url: String,
        body: WebhookBody,
        max_retries: u32,
        hold: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            url,
            method: reqwest::Method::POST,
            body,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            max_retries,
            not_before: now + chrono::Duration::from_std(hold).unwrap_or_default(),
            next_retry_at: None,
            status_code: None,
            response_time_ms: None,
            last_error: None,
            created_at: now,
            sent_at: None,
            completed_at: None,
            in_flight: false,
        }
    }

    /// Whether the task should be attempted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            DeliveryStatus::Pending => now >= self.not_before,
            DeliveryStatus::Retrying => self.next_retry_at.is_some_and(|at| now >= at),
            DeliveryStatus::Success | DeliveryStatus::Failed => false,
        }
    }

    /// Record one delivery attempt.
    ///
    /// A non-2xx response and a transport failure (timeout, refused
    /// connection, DNS) classify identically.
    pub fn record_attempt(&mut self, outcome: AttemptOutcome, base_retry_delay: Duration) {
        let now = Utc::now();
        if self.sent_at.is_none() {
            self.sent_at = Some(now);
        }
        self.status_code = outcome.status_code;
        self.response_time_ms = Some(outcome.response_time_ms);

        if outcome.is_success() {
            self.status = DeliveryStatus::Success;
            self.next_retry_at = None;
            self.last_error = None;
            self.completed_at = Some(now);
            return;
        }

        self.last_error = Some(outcome.describe());
        self.retry_count += 1;
        if self.retry_count < self.max_retries {
            self.status = DeliveryStatus::Retrying;
            let delay = retry_delay(base_retry_delay, self.retry_count);
            self.next_retry_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        } else {
            self.status = DeliveryStatus::Failed;
            self.next_retry_at = None;
            self.completed_at = Some(now);
        }
    }
}

/// Result of a single HTTP attempt, before classification.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub transport_error: Option<String>,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        self.status_code.is_some_and(|c| (200..300).contains(&c))
    }

    fn describe(&self) -> String {
        match (self.status_code, &self.transport_error) {
            (Some(code), _) => format!("http status {code}"),
            (None, Some(err)) => err.clone(),
            (None, None) => "delivery failed".to_string(),
        }
    }
}

/// Exponential backoff for webhook redelivery: `base * 2^(n-1)`.
pub fn retry_delay(base: Duration, retry_count: u32) -> Duration {
    base * 2u32.saturating_pow(retry_count.saturating_sub(1))
}
