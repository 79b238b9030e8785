use std::sync::Mutex;

use finding_digest_lambda::adapters::model::SummaryModel;
use finding_digest_lambda::adapters::notify::Notifier;
use finding_digest_lambda::config::DigestConfig;
use finding_digest_lambda::handlers::findings::{handle_finding_batch, BatchError, FailureCategory};
use serde_json::{json, Value};

const GENERATED_AT: &str = "2026-02-14T10:00:00+00:00";

struct ScriptedModel {
    calls: Mutex<Vec<(String, Value)>>,
    reply: Result<Value, String>,
}

impl ScriptedModel {
    fn replying(text: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: Ok(json!({
                "id": "msg_01",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": text}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 812, "output_tokens": 96}
            })),
        }
    }

    fn with_reply(reply: Result<Value, String>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply,
        }
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("poisoned mutex").clone()
    }
}

impl SummaryModel for ScriptedModel {
    fn invoke_model(&self, model_id: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let request: Value = serde_json::from_slice(body).expect("request should be json");
        self.calls
            .lock()
            .expect("poisoned mutex")
            .push((model_id.to_string(), request));
        self.reply
            .clone()
            .map(|value| serde_json::to_vec(&value).expect("reply should serialize"))
    }
}

struct RecordingNotifier {
    published: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn published(&self) -> Vec<(String, String)> {
        self.published.lock().expect("poisoned mutex").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, subject: &str, message: &str) -> Result<String, String> {
        if self.fail {
            return Err("AuthorizationError: not allowed to publish".to_string());
        }
        let mut published = self.published.lock().expect("poisoned mutex");
        published.push((subject.to_string(), message.to_string()));
        Ok(format!("notification-{}", published.len()))
    }
}

fn sample_finding(id: &str) -> Value {
    json!({
        "version": "0",
        "id": id,
        "detail-type": "GuardDuty Finding",
        "source": "aws.guardduty",
        "account": "123456789012",
        "time": "2026-02-14T09:58:11Z",
        "region": "eu-central-1",
        "resources": [],
        "detail": {
            "schemaVersion": "2.0",
            "accountId": "123456789012",
            "region": "eu-central-1",
            "id": id,
            "type": "CryptoCurrency:EC2/BitcoinTool.B!DNS",
            "severity": 8,
            "title": "EC2 instance is querying a domain name associated with Bitcoin."
        }
    })
}

fn sqs_event(bodies: &[&str]) -> Value {
    let records: Vec<Value> = bodies
        .iter()
        .enumerate()
        .map(|(index, body)| {
            json!({
                "messageId": format!("message-{index}"),
                "receiptHandle": "handle",
                "body": body,
                "eventSource": "aws:sqs",
                "eventSourceARN": "arn:aws:sqs:eu-central-1:123456789012:findings",
                "awsRegion": "eu-central-1"
            })
        })
        .collect();
    json!({ "Records": records })
}

fn config() -> DigestConfig {
    DigestConfig::new("arn:aws:sns:eu-central-1:123456789012:finding-digest")
}

#[test]
fn email_body_contains_account_finding_and_region() {
    let body = sample_finding("finding-abc").to_string();
    let event = sqs_event(&[&body]);
    let model = ScriptedModel::replying("A crypto-mining tool is running on the instance.");
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.received, 1);
    assert_eq!(report.processed, 1);
    assert!(report.failures.is_empty());

    let published = notifier.published();
    assert_eq!(published.len(), 1);
    let (subject, message) = &published[0];
    assert_eq!(
        subject,
        "GuardDuty Finding (High): CryptoCurrency:EC2/BitcoinTool.B!DNS in eu-central-1"
    );
    assert!(message.contains("123456789012"));
    assert!(message.contains("finding-abc"));
    assert!(message.contains("eu-central-1"));
    assert!(message.contains("A crypto-mining tool is running on the instance."));
    assert!(message.contains("Observed at: 2026-02-14T09:58:11Z"));
    assert!(message.contains(GENERATED_AT));
}

#[test]
fn prompt_embeds_raw_finding_and_uses_configured_model() {
    let body = sample_finding("finding-abc").to_string();
    let event = sqs_event(&[&body]);
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();
    let mut config = config();
    config.model.model_id = "anthropic.claude-3-sonnet-20240229-v1:0".to_string();
    config.model.max_tokens = 400;

    handle_finding_batch(&event, &config, GENERATED_AT, &model, &notifier);

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    let (model_id, request) = &calls[0];
    assert_eq!(model_id, "anthropic.claude-3-sonnet-20240229-v1:0");
    assert_eq!(request["max_tokens"], json!(400));
    let prompt = request["messages"][0]["content"][0]["text"]
        .as_str()
        .expect("prompt should be text");
    assert!(prompt.contains(&body));
}

#[test]
fn malformed_record_does_not_abort_later_records() {
    let first = sample_finding("finding-1").to_string();
    let third = sample_finding("finding-3").to_string();
    let event = sqs_event(&[&first, "this is not json", &third]);
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.received, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].message_id.as_deref(), Some("message-1"));
    assert_eq!(report.failures[0].category, FailureCategory::Decode);

    let published = notifier.published();
    assert_eq!(published.len(), 2);
    assert!(published[0].1.contains("finding-1"));
    assert!(published[1].1.contains("finding-3"));
    assert_eq!(model.calls().len(), 2);
}

#[test]
fn response_is_fixed_success_payload_even_when_every_record_fails() {
    let event = sqs_event(&["not json", "[]"]);
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.failed(), 2);
    assert!(model.calls().is_empty());
    assert_eq!(
        report.into_response(false).expect("response"),
        json!({"statusCode": 200, "body": "\"Successfully processed findings\""})
    );
}

#[test]
fn model_failure_is_a_service_call_error_and_skips_publish() {
    let body = sample_finding("finding-abc").to_string();
    let event = sqs_event(&[&body]);
    let model = ScriptedModel::with_reply(Err("ThrottlingException: slow down".to_string()));
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].category, FailureCategory::ServiceCall);
    assert!(report.failures[0].message.contains("ThrottlingException"));
    assert!(notifier.published().is_empty());
}

#[test]
fn publish_failure_is_a_service_call_error() {
    let body = sample_finding("finding-abc").to_string();
    let event = sqs_event(&[&body]);
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::failing();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.processed, 0);
    assert_eq!(report.failures[0].category, FailureCategory::ServiceCall);
}

#[test]
fn response_without_text_block_is_a_missing_field_error() {
    let body = sample_finding("finding-abc").to_string();
    let event = sqs_event(&[&body]);
    let model = ScriptedModel::with_reply(Ok(json!({"content": [], "stop_reason": "max_tokens"})));
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.failures[0].category, FailureCategory::MissingField);
    assert!(notifier.published().is_empty());
}

#[test]
fn record_without_body_is_a_missing_field_error() {
    let event = json!({
        "Records": [
            {"messageId": "no-body", "eventSource": "aws:sqs"}
        ]
    });
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.failures[0].message_id.as_deref(), Some("no-body"));
    assert_eq!(report.failures[0].category, FailureCategory::MissingField);
}

#[test]
fn missing_envelope_fields_use_sentinels_in_email() {
    let event = sqs_event(&["{\"detail\": {\"type\": \"Recon:EC2/Portscan\"}}"]);
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.processed, 1);
    let (_, message) = &notifier.published()[0];
    assert!(message.contains("Account ID: Unknown Account"));
    assert!(message.contains("Finding ID: Unknown Finding ID"));
    assert!(message.contains("Region: Unknown Region"));
}

#[test]
fn direct_eventbridge_delivery_is_processed_as_single_record() {
    let event = sample_finding("finding-direct");
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.received, 1);
    assert_eq!(report.processed, 1);
    assert!(notifier.published()[0].1.contains("finding-direct"));
}

#[test]
fn partial_batch_mode_reports_failed_message_ids() {
    let body = sample_finding("finding-ok").to_string();
    let event = sqs_event(&[&body, "{broken"]);
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();
    let mut config = config();
    config.report_batch_item_failures = true;

    let report = handle_finding_batch(&event, &config, GENERATED_AT, &model, &notifier);

    assert_eq!(
        report
            .into_response(config.report_batch_item_failures)
            .expect("response"),
        json!({"batchItemFailures": [{"itemIdentifier": "message-1"}]})
    );
}

#[test]
fn truncated_summary_is_still_published() {
    let body = sample_finding("finding-long").to_string();
    let event = sqs_event(&[&body]);
    let model = ScriptedModel::with_reply(Ok(json!({
        "content": [{"type": "text", "text": "The instance started resolving"}],
        "stop_reason": "max_tokens",
        "usage": {"input_tokens": 812, "output_tokens": 1000}
    })));
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.processed, 1);
    assert!(notifier.published()[0]
        .1
        .contains("The instance started resolving"));
}

#[test]
fn undecodable_queue_event_fails_the_whole_partial_batch() {
    let event = json!({
        "Records": [
            {"messageId": "message-0", "eventSource": "aws:sqs", "body": {"nested": true}}
        ]
    });
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.received, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].message_id, None);
    assert_eq!(report.failures[0].category, FailureCategory::Decode);
    assert!(model.calls().is_empty());

    let error = report
        .clone()
        .into_response(true)
        .expect_err("batch should fail");
    assert!(matches!(error, BatchError::UnidentifiedFailures(1)));
    assert_eq!(
        report.into_response(false).expect("response"),
        json!({"statusCode": 200, "body": "\"Successfully processed findings\""})
    );
}

#[test]
fn failed_direct_delivery_never_becomes_an_item_identifier() {
    let event = sample_finding("finding-direct");
    let model = ScriptedModel::with_reply(Err("ThrottlingException: slow down".to_string()));
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.failures[0].message_id, None);
    assert!(matches!(
        report.into_response(true),
        Err(BatchError::UnidentifiedFailures(1))
    ));
}

#[test]
fn queue_record_without_message_id_fails_the_whole_partial_batch() {
    let body = sample_finding("finding-ok").to_string();
    let event = json!({
        "Records": [
            {"messageId": "message-0", "eventSource": "aws:sqs", "body": body},
            {"eventSource": "aws:sqs", "body": "not json"}
        ]
    });
    let model = ScriptedModel::replying("summary");
    let notifier = RecordingNotifier::new();

    let report = handle_finding_batch(&event, &config(), GENERATED_AT, &model, &notifier);

    assert_eq!(report.processed, 1);
    assert_eq!(report.failures[0].message_id, None);
    assert!(report.into_response(true).is_err());
}
