use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt;
use tracing_subscriber::Registry;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFilterLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogFilterLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFilterLevel::Trace => f.write_str("trace"),
            LogFilterLevel::Debug => f.write_str("debug"),
            LogFilterLevel::Info => f.write_str("info"),
            LogFilterLevel::Warn => f.write_str("warn"),
            LogFilterLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilter {
    pub crate_name: String,
    pub filter_level: LogFilterLevel,
}

// Crate names use underscores, the form the compiler gives them as targets.
const DEFAULT_CRATE_NAMES: [&str; 5] = [
    "sift_aggregation",
    "sift_config",
    "sift_error",
    "sift_tracing",
    "sift_types",
];

pub(crate) fn global_filter_directives(custom_filters: &[LogFilter]) -> String {
    let default_filters = DEFAULT_CRATE_NAMES
        .iter()
        .map(|s| format!("{s}=trace"))
        .collect::<Vec<_>>()
        .join(",");
    let mut directives = format!("error,{default_filters}");
    for custom_filter in custom_filters {
        directives.push_str(&format!(
            ",{}={}",
            custom_filter.crate_name, custom_filter.filter_level
        ));
    }
    directives
}

pub fn init_global_filter_layer(
    custom_filters: &[LogFilter],
) -> Box<dyn Layer<Registry> + Send + Sync> {
    EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| global_filter_directives(custom_filters)),
    )
    .boxed()
}

pub fn init_stdout_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
    fmt::layer().pretty().with_target(false).boxed()
}

/// Installs the given layers as the global subscriber. Returns false if a global
/// subscriber was already installed, which is common in tests.
pub fn init_tracing(layers: Vec<Box<dyn Layer<Registry> + Send + Sync>>) -> bool {
    let Some(layers) = layers
        .into_iter()
        .reduce(|a, b| Box::new(a.and_then(b)))
    else {
        return false;
    };
    let subscriber = tracing_subscriber::registry().with(layers);
    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => {
            tracing::info!("Global tracing subscriber set");
            true
        }
        Err(_) => false,
    }
}

pub fn init_panic_tracing_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();

        let payload = if let Some(s) = payload.downcast_ref::<&str>() {
            Some(&**s)
        } else {
            payload.downcast_ref::<String>().map(|s| s.as_str())
        };

        tracing::error!(
            panic.payload = payload,
            panic.location = panic_info.location().map(|l| l.to_string()),
            panic.backtrace = tracing::field::display(std::backtrace::Backtrace::capture()),
            "A panic occurred"
        );

        prev_hook(panic_info);
    }));
}

pub fn init_stdout_tracing(custom_filters: &[LogFilter]) -> bool {
    let layers = vec![
        // The global filter applies to all subsequent layers
        init_global_filter_layer(custom_filters),
        init_stdout_layer(),
    ];
    let installed = init_tracing(layers);
    if installed {
        init_panic_tracing_hook();
    }
    installed
}
