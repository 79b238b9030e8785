use std::fmt::Display;
use std::str::FromStr;

use crate::runtime::settings::ModelSettings;

pub const TOPIC_ARN_VAR: &str = "SNS_TOPIC_ARN";
pub const MODEL_ID_VAR: &str = "BEDROCK_MODEL_ID";
pub const MAX_TOKENS_VAR: &str = "BEDROCK_MAX_TOKENS";
pub const TEMPERATURE_VAR: &str = "BEDROCK_TEMPERATURE";
pub const TOP_P_VAR: &str = "BEDROCK_TOP_P";
pub const REPORT_FAILURES_VAR: &str = "REPORT_BATCH_ITEM_FAILURES";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be configured")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Function configuration, read once per cold start.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestConfig {
    pub topic_arn: String,
    pub model: ModelSettings,
    pub report_batch_item_failures: bool,
}

impl DigestConfig {
    pub fn new(topic_arn: impl Into<String>) -> Self {
        Self {
            topic_arn: topic_arn.into(),
            model: ModelSettings::default(),
            report_batch_item_failures: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let topic_arn =
            non_empty(&lookup, TOPIC_ARN_VAR).ok_or(ConfigError::Missing(TOPIC_ARN_VAR))?;

        let defaults = ModelSettings::default();
        let model_id = non_empty(&lookup, MODEL_ID_VAR).unwrap_or(defaults.model_id);
        let max_tokens = parse_var(&lookup, MAX_TOKENS_VAR, defaults.max_tokens)?;
        if max_tokens == 0 {
            return Err(invalid(MAX_TOKENS_VAR, "0", "must be positive"));
        }
        let temperature = parse_unit_interval(&lookup, TEMPERATURE_VAR, defaults.temperature)?;
        let top_p = parse_unit_interval(&lookup, TOP_P_VAR, defaults.top_p)?;

        let report_batch_item_failures = match non_empty(&lookup, REPORT_FAILURES_VAR) {
            Some(raw) => parse_flag(REPORT_FAILURES_VAR, &raw)?,
            None => false,
        };

        Ok(Self {
            topic_arn,
            model: ModelSettings {
                model_id,
                max_tokens,
                temperature,
                top_p,
            },
            report_batch_item_failures,
        })
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match non_empty(lookup, name) {
        Some(raw) => raw
            .parse()
            .map_err(|error: T::Err| invalid(name, &raw, error.to_string())),
        None => Ok(default),
    }
}

fn parse_unit_interval(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: f64,
) -> Result<f64, ConfigError> {
    let value: f64 = parse_var(lookup, name, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(name, &value.to_string(), "must be between 0 and 1"));
    }
    Ok(value)
}

fn parse_flag(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(name, raw, "expected true or false")),
    }
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}
