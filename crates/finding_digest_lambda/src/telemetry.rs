use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// JSON subscriber with event fields flattened to the top level and no timestamps.
pub fn build_subscriber<W>(env_filter: EnvFilter, make_writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_target(false)
        .without_time()
        .with_writer(make_writer);

    tracing_subscriber::registry().with(env_filter).with(fmt_layer)
}

/// Installs the JSON log subscriber used by the Lambda binary.
///
/// `RUST_LOG` overrides the level. Timestamps are left to CloudWatch.
pub fn init_tracing() -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    build_subscriber(env_filter, std::io::stdout).try_init()
}
