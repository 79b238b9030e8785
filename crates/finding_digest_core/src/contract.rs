use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::settings::ModelSettings;

pub const ANTHROPIC_BEDROCK_VERSION: &str = "bedrock-2023-05-31";
pub const UNKNOWN_ACCOUNT: &str = "Unknown Account";
pub const UNKNOWN_FINDING_ID: &str = "Unknown Finding ID";
pub const UNKNOWN_REGION: &str = "Unknown Region";
pub const UNKNOWN_FINDING_TYPE: &str = "Unknown Finding Type";
pub const SUCCESS_BODY: &str = "Successfully processed findings";

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("record body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("record body must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("model response is not valid JSON: {0}")]
    InvalidResponse(#[source] serde_json::Error),

    #[error("model response is missing field '{0}'")]
    MissingField(&'static str),

    #[error("failed to serialize model request: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// GuardDuty finding as delivered by EventBridge.
///
/// Envelope fields are kept optional; sentinels are applied only when the
/// fields are rendered (see [`FindingEnvelope::summary_fields`]).
#[derive(Debug, Clone, PartialEq)]
pub struct FindingEnvelope {
    pub account: Option<String>,
    pub id: Option<String>,
    pub region: Option<String>,
    pub detail_type: Option<String>,
    pub time: Option<String>,
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindingSummaryFields {
    pub account: String,
    pub finding_id: String,
    pub region: String,
    pub finding_type: String,
    pub severity: Option<f64>,
    pub title: Option<String>,
    pub observed_at: Option<String>,
}

pub fn decode_envelope(body: &str) -> Result<FindingEnvelope, ContractError> {
    let value: Value = serde_json::from_str(body).map_err(ContractError::InvalidJson)?;
    let object = match value {
        Value::Object(object) => object,
        other => return Err(ContractError::NotAnObject(json_kind(&other))),
    };

    Ok(FindingEnvelope {
        account: string_field(&object, "account"),
        id: string_field(&object, "id"),
        region: string_field(&object, "region"),
        detail_type: string_field(&object, "detail-type"),
        time: string_field(&object, "time"),
        detail: object.get("detail").cloned().unwrap_or(Value::Null),
    })
}

impl FindingEnvelope {
    pub fn summary_fields(&self) -> FindingSummaryFields {
        let detail = self.detail.as_object();
        let finding_type = detail
            .and_then(|detail| string_field(detail, "type"))
            .or_else(|| self.detail_type.clone())
            .unwrap_or_else(|| UNKNOWN_FINDING_TYPE.to_string());

        FindingSummaryFields {
            account: self
                .account
                .clone()
                .unwrap_or_else(|| UNKNOWN_ACCOUNT.to_string()),
            finding_id: self
                .id
                .clone()
                .unwrap_or_else(|| UNKNOWN_FINDING_ID.to_string()),
            region: self
                .region
                .clone()
                .unwrap_or_else(|| UNKNOWN_REGION.to_string()),
            finding_type,
            severity: detail
                .and_then(|detail| detail.get("severity"))
                .and_then(Value::as_f64),
            title: detail.and_then(|detail| string_field(detail, "title")),
            observed_at: self.time.clone(),
        }
    }
}

/// Maps a GuardDuty severity score onto the console's severity bands.
pub fn severity_label(score: f64) -> &'static str {
    if score >= 9.0 {
        "Critical"
    } else if score >= 7.0 {
        "High"
    } else if score >= 4.0 {
        "Medium"
    } else {
        "Low"
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

/// Anthropic Messages request body accepted by Bedrock `InvokeModel`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRequest {
    pub anthropic_version: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub messages: Vec<ModelMessage>,
}

impl ModelRequest {
    pub fn for_prompt(prompt: impl Into<String>, settings: &ModelSettings) -> Self {
        Self {
            anthropic_version: ANTHROPIC_BEDROCK_VERSION.to_string(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            messages: vec![ModelMessage {
                role: "user".to_string(),
                content: vec![ContentBlock::text(prompt)],
            }],
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ContractError> {
        serde_json::to_vec(self).map_err(ContractError::Serialization)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelResponse {
    #[serde(default)]
    pub content: Option<Vec<ContentBlock>>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<ModelUsage>,
}

impl ModelResponse {
    /// True when generation stopped at the token limit.
    pub fn truncated(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }

    /// Joins every text block of the response; a response without one is an error.
    pub fn summary(&self) -> Result<String, ContractError> {
        let content = self
            .content
            .as_ref()
            .ok_or(ContractError::MissingField("content"))?;

        let texts: Vec<&str> = content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect();

        if texts.is_empty() {
            return Err(ContractError::MissingField("content[].text"));
        }

        Ok(texts.join("\n\n"))
    }
}

pub fn decode_model_response(body: &[u8]) -> Result<ModelResponse, ContractError> {
    serde_json::from_slice(body).map_err(ContractError::InvalidResponse)
}

pub fn extract_summary(body: &[u8]) -> Result<String, ContractError> {
    decode_model_response(body)?.summary()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

pub fn fixed_success_response() -> InvocationResponse {
    InvocationResponse {
        status_code: 200,
        body: Value::from(SUCCESS_BODY).to_string(),
    }
}

pub fn finding_fingerprint(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}
