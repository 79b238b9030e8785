use aws_sdk_bedrockruntime::primitives::Blob;
use chrono::Utc;
use finding_digest_lambda::adapters::model::SummaryModel;
use finding_digest_lambda::adapters::notify::Notifier;
use finding_digest_lambda::config::DigestConfig;
use finding_digest_lambda::handlers::findings::{handle_finding_batch, is_queue_batch};
use finding_digest_lambda::telemetry::init_tracing;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::{error, info};

struct BedrockSummaryModel {
    client: aws_sdk_bedrockruntime::Client,
}

impl SummaryModel for BedrockSummaryModel {
    fn invoke_model(&self, model_id: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let client = self.client.clone();
        let model_id = model_id.to_string();
        let request_body = body.to_vec();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .invoke_model()
                    .model_id(model_id)
                    .content_type("application/json")
                    .accept("application/json")
                    .body(Blob::new(request_body))
                    .send()
                    .await
                    .map(|output| output.body().as_ref().to_vec())
                    .map_err(|error| {
                        format!(
                            "failed to invoke bedrock model: {}",
                            aws_sdk_bedrockruntime::error::DisplayErrorContext(&error)
                        )
                    })
            })
        })
    }
}

struct SnsNotifier {
    topic_arn: String,
    client: aws_sdk_sns::Client,
}

impl Notifier for SnsNotifier {
    fn publish(&self, subject: &str, message: &str) -> Result<String, String> {
        let client = self.client.clone();
        let topic_arn = self.topic_arn.clone();
        let subject = subject.to_string();
        let message = message.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .publish()
                    .topic_arn(topic_arn)
                    .subject(subject)
                    .message(message)
                    .send()
                    .await
                    .map(|output| output.message_id().unwrap_or_default().to_string())
                    .map_err(|error| {
                        format!(
                            "failed to publish to sns topic: {}",
                            aws_sdk_sns::error::DisplayErrorContext(&error)
                        )
                    })
            })
        })
    }
}

struct RuntimeDependencies {
    config: DigestConfig,
    model: BedrockSummaryModel,
    notifier: SnsNotifier,
}

async fn handle_request(
    event: LambdaEvent<Value>,
    deps: &RuntimeDependencies,
) -> Result<Value, Error> {
    info!(
        component = "finding_digest",
        event = "invocation_started",
        request_id = %event.context.request_id,
        queue_batch = is_queue_batch(&event.payload),
        "received finding event"
    );

    let generated_at = Utc::now().to_rfc3339();
    let report = handle_finding_batch(
        &event.payload,
        &deps.config,
        &generated_at,
        &deps.model,
        &deps.notifier,
    );

    report
        .into_response(deps.config.report_batch_item_failures)
        .map_err(|batch_error| {
            error!(
                component = "finding_digest",
                event = "invocation_failed",
                request_id = %event.context.request_id,
                error = %batch_error,
                "returning an error so every message is retried"
            );
            Error::from(batch_error)
        })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing()
        .map_err(|error| Error::from(format!("failed to install log subscriber: {error}")))?;

    let config = DigestConfig::from_env().map_err(|error| Error::from(error.to_string()))?;
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let deps = RuntimeDependencies {
        model: BedrockSummaryModel {
            client: aws_sdk_bedrockruntime::Client::new(&aws_config),
        },
        notifier: SnsNotifier {
            topic_arn: config.topic_arn.clone(),
            client: aws_sdk_sns::Client::new(&aws_config),
        },
        config,
    };

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_request(event, deps).await
    }))
    .await
}
