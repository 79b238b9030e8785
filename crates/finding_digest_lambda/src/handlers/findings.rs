use std::time::Instant;

use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::adapters::model::SummaryModel;
use crate::adapters::notify::Notifier;
use crate::config::DigestConfig;
use crate::runtime::contract::{
    decode_envelope, decode_model_response, finding_fingerprint, fixed_success_response,
    ContractError, ModelRequest, ModelUsage,
};
use crate::runtime::templates::{build_email_body, build_email_subject, build_prompt};

const COMPONENT: &str = "finding_handler";
const SQS_EVENT_SOURCE: &str = "aws:sqs";
/// Log label for a record without an SQS message id.
const UNIDENTIFIED_RECORD: &str = "unidentified";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    ServiceCall,
    Decode,
    MissingField,
    Other,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceCall => "service_call",
            Self::Decode => "decode",
            Self::MissingField => "missing_field",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("service call failed: {0}")]
    ServiceCall(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("unexpected error: {0}")]
    Other(String),
}

impl RecordError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::ServiceCall(_) => FailureCategory::ServiceCall,
            Self::Decode(_) => FailureCategory::Decode,
            Self::MissingField(_) => FailureCategory::MissingField,
            Self::Other(_) => FailureCategory::Other,
        }
    }
}

impl From<ContractError> for RecordError {
    fn from(error: ContractError) -> Self {
        let message = error.to_string();
        match error {
            ContractError::InvalidJson(_)
            | ContractError::NotAnObject(_)
            | ContractError::InvalidResponse(_) => Self::Decode(message),
            ContractError::MissingField(_) => Self::MissingField(message),
            ContractError::Serialization(_) => Self::Other(message),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{0} failed record(s) have no SQS message id; failing the whole batch")]
    UnidentifiedFailures(usize),

    #[error("failed to serialize invocation response: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// One unit of work: a queue message, or a finding delivered straight to the function.
///
/// `message_id` is only ever an SQS `messageId`; direct deliveries have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub message_id: Option<String>,
    pub body: Option<String>,
}

impl BatchRecord {
    pub fn log_label(&self) -> &str {
        self.message_id.as_deref().unwrap_or(UNIDENTIFIED_RECORD)
    }

    pub fn fingerprint(&self) -> String {
        self.body
            .as_deref()
            .map(finding_fingerprint)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub finding_id: String,
    pub notification_id: String,
    pub stop_reason: Option<String>,
    pub truncated: bool,
    pub usage: Option<ModelUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub message_id: Option<String>,
    pub category: FailureCategory,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub processed: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Builds the value returned to the invoker.
    ///
    /// Without partial batch reporting this is always the fixed success payload.
    /// With it, a failure that cannot be tied to a message id fails the whole
    /// invocation so the event-source mapping retries every message.
    pub fn into_response(self, report_batch_item_failures: bool) -> Result<Value, BatchError> {
        if !report_batch_item_failures {
            return serde_json::to_value(fixed_success_response())
                .map_err(BatchError::Serialization);
        }

        let unidentified = self
            .failures
            .iter()
            .filter(|failure| failure.message_id.is_none())
            .count();
        if unidentified > 0 {
            return Err(BatchError::UnidentifiedFailures(unidentified));
        }

        let response = SqsBatchResponse {
            batch_item_failures: self
                .failures
                .into_iter()
                .filter_map(|failure| failure.message_id)
                .map(|item_identifier| BatchItemFailure { item_identifier })
                .collect(),
        };
        serde_json::to_value(response).map_err(BatchError::Serialization)
    }
}

pub fn is_queue_batch(event: &Value) -> bool {
    event.get("Records").and_then(Value::as_array).is_some()
}

/// Splits an invocation payload into records.
///
/// Anything without a `Records` array is taken as a single EventBridge
/// finding. A `Records` payload that is not a valid SQS event fails as a whole.
pub fn decode_batch(event: &Value) -> Result<Vec<BatchRecord>, RecordError> {
    if !is_queue_batch(event) {
        return Ok(vec![BatchRecord {
            message_id: None,
            body: Some(event.to_string()),
        }]);
    }

    let batch = SqsEvent::deserialize(event)
        .map_err(|error| RecordError::Decode(format!("invalid SQS event: {error}")))?;

    Ok(batch
        .records
        .into_iter()
        .map(|message| {
            let record = BatchRecord {
                message_id: message.message_id,
                body: message.body,
            };
            if message.event_source.as_deref() != Some(SQS_EVENT_SOURCE) {
                warn!(
                    component = COMPONENT,
                    event = "unexpected_event_source",
                    message_id = record.log_label(),
                    fingerprint = %record.fingerprint(),
                    event_source = message.event_source.as_deref().unwrap_or("missing"),
                    "record did not come from SQS"
                );
            }
            record
        })
        .collect())
}

pub fn process_record(
    record: &BatchRecord,
    config: &DigestConfig,
    generated_at: &str,
    model: &impl SummaryModel,
    notifier: &impl Notifier,
) -> Result<RecordOutcome, RecordError> {
    let body = record
        .body
        .as_deref()
        .ok_or_else(|| RecordError::MissingField("SQS record body must be a string".to_string()))?;

    let envelope = decode_envelope(body)?;
    let fields = envelope.summary_fields();

    let request = ModelRequest::for_prompt(build_prompt(body), &config.model).to_bytes()?;
    let response = model
        .invoke_model(&config.model.model_id, &request)
        .map_err(RecordError::ServiceCall)?;
    let response = decode_model_response(&response)?;
    let summary = response.summary()?;

    let subject = build_email_subject(&fields);
    let message = build_email_body(&fields, &summary, generated_at);
    let notification_id = notifier
        .publish(&subject, &message)
        .map_err(RecordError::ServiceCall)?;

    Ok(RecordOutcome {
        finding_id: fields.finding_id,
        notification_id,
        truncated: response.truncated(),
        stop_reason: response.stop_reason,
        usage: response.usage,
    })
}

/// Processes every record of an invocation in order.
///
/// A failed record is logged and recorded in the report; it never stops the
/// remaining records from being processed.
pub fn handle_finding_batch(
    event: &Value,
    config: &DigestConfig,
    generated_at: &str,
    model: &impl SummaryModel,
    notifier: &impl Notifier,
) -> BatchReport {
    let started_at = Instant::now();
    let mut report = BatchReport::default();

    let records = match decode_batch(event) {
        Ok(records) => records,
        Err(batch_error) => {
            let category = batch_error.category();
            error!(
                component = COMPONENT,
                event = "batch_undecodable",
                category = category.as_str(),
                error = %batch_error,
                "failed to decode invocation payload"
            );
            report.failures.push(RecordFailure {
                message_id: None,
                category,
                message: batch_error.to_string(),
            });
            Vec::new()
        }
    };
    report.received = records.len();

    for record in &records {
        let fingerprint = record.fingerprint();

        match process_record(record, config, generated_at, model, notifier) {
            Ok(outcome) => {
                report.processed += 1;
                let input_tokens = outcome.usage.as_ref().map(|usage| usage.input_tokens);
                let output_tokens = outcome.usage.as_ref().map(|usage| usage.output_tokens);
                if outcome.truncated {
                    warn!(
                        component = COMPONENT,
                        event = "summary_truncated",
                        message_id = record.log_label(),
                        fingerprint = %fingerprint,
                        max_tokens = config.model.max_tokens,
                        output_tokens,
                        "model stopped at the token limit"
                    );
                }
                info!(
                    component = COMPONENT,
                    event = "finding_notified",
                    message_id = record.log_label(),
                    fingerprint = %fingerprint,
                    finding_id = %outcome.finding_id,
                    notification_id = %outcome.notification_id,
                    stop_reason = outcome.stop_reason.as_deref().unwrap_or("unknown"),
                    input_tokens,
                    output_tokens,
                    "published finding summary"
                );
            }
            Err(record_error) => {
                let category = record_error.category();
                error!(
                    component = COMPONENT,
                    event = "record_failed",
                    message_id = record.log_label(),
                    fingerprint = %fingerprint,
                    category = category.as_str(),
                    error = %record_error,
                    "failed to process finding"
                );
                report.failures.push(RecordFailure {
                    message_id: record.message_id.clone(),
                    category,
                    message: record_error.to_string(),
                });
            }
        }
    }

    info!(
        component = COMPONENT,
        event = "batch_completed",
        received = report.received,
        processed = report.processed,
        failed = report.failed(),
        duration_ms = started_at.elapsed().as_millis() as u64,
        "finished finding batch"
    );

    report
}
