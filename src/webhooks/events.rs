//! Inbound webhook events.
//!
//! An [`Event`] is received once, routed once, and then dropped; nothing about
//! it is persisted. [`EventFamily`] is the closed set of event types the relay
//! knows how to render, with an explicit [`EventFamily::Other`] arm so that
//! unknown types still flow through the pipeline.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::payload::Payload;

/// An authenticated webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The `X-GitHub-Event` header value (e.g. "pull_request").
    pub event_type: String,

    /// The JSON body.
    pub payload: Value,

    /// When the delivery was accepted by the HTTP layer.
    pub received_at: DateTime<Utc>,

    /// The `X-GitHub-Delivery` header value, kept for log correlation.
    pub delivery_id: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Event {
            event_type: event_type.into(),
            payload,
            received_at: Utc::now(),
            delivery_id: None,
        }
    }

    pub fn with_delivery_id(mut self, delivery_id: impl Into<String>) -> Self {
        self.delivery_id = Some(delivery_id.into());
        self
    }

    pub fn family(&self) -> EventFamily {
        EventFamily::from_event_type(&self.event_type)
    }

    pub fn payload(&self) -> Payload<'_> {
        Payload::new(&self.payload)
    }
}

/// The event types the relay renders, plus a fallback for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Push,
    PullRequest,
    Issues,
    Release,
    DeploymentStatus,
    WorkflowRun,
    WorkflowJob,
    CheckRun,
    CheckSuite,
    /// Wiki page edits.
    Gollum,
    /// Any other event type, carrying the raw header value (possibly empty).
    Other(String),
}

impl EventFamily {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "push" => EventFamily::Push,
            "pull_request" => EventFamily::PullRequest,
            "issues" => EventFamily::Issues,
            "release" => EventFamily::Release,
            "deployment_status" => EventFamily::DeploymentStatus,
            "workflow_run" => EventFamily::WorkflowRun,
            "workflow_job" => EventFamily::WorkflowJob,
            "check_run" => EventFamily::CheckRun,
            "check_suite" => EventFamily::CheckSuite,
            "gollum" => EventFamily::Gollum,
            other => EventFamily::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventFamily::Push => "push",
            EventFamily::PullRequest => "pull_request",
            EventFamily::Issues => "issues",
            EventFamily::Release => "release",
            EventFamily::DeploymentStatus => "deployment_status",
            EventFamily::WorkflowRun => "workflow_run",
            EventFamily::WorkflowJob => "workflow_job",
            EventFamily::CheckRun => "check_run",
            EventFamily::CheckSuite => "check_suite",
            EventFamily::Gollum => "gollum",
            EventFamily::Other(raw) => raw,
        }
    }
}
