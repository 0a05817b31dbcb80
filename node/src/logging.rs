//! # Structured Logging
//!
//! Translates the `--log <csv>` category switch into a `tracing_subscriber`
//! `EnvFilter` directive string. Every subsystem logs under a `target` of
//! the form `node::<category>`; categories named on the command line are
//! raised to `trace`, everything else stays at `warn`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maps a `--log` category to the `tracing` target it gates.
fn category_target(category: &str) -> Option<&'static str> {
    match category {
        "err" => Some("node::err"),
        "log" => Some("node::log"),
        "udp" => Some("node::udp"),
        "msg" => Some("node::msg"),
        "p2p" => Some("node::p2p"),
        "gsp" => Some("node::gsp"),
        "sch" => Some("node::sch"),
        "blc" => Some("node::blc"),
        "p2d" => Some("node::p2d"),
        _ => None,
    }
}

/// Builds the `EnvFilter` directive string for a `--log` CSV value.
///
/// `all` (or an empty string) falls back to the crate-wide default
/// (`warn`, overridable via `RUST_LOG`). Any unrecognised category is
/// ignored rather than rejected — a typo in `--log` should never stop the
/// node from starting.
fn build_directive(categories: &str) -> String {
    let mut directive = String::from("warn");

    for raw in categories.split(',') {
        let category = raw.trim();
        if category.is_empty() || category == "all" {
            continue;
        }
        if let Some(target) = category_target(category) {
            directive.push(',');
            directive.push_str(target);
            directive.push_str("=trace");
        }
    }

    directive
}

/// Initializes the global `tracing` subscriber from the `--log` switch.
///
/// `RUST_LOG`, when set, overrides the computed directive entirely — the
/// same precedence the teacher's logging module gives the environment.
pub fn init_logging(log_categories: &str) {
    let default_directive = build_directive(log_categories);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .init();

    tracing::info!(directive = %default_directive, "logging initialized");
}
