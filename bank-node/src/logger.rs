use anyhow::{Context, Result};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

const RUST_LOG_ENV: &str = "RUST_LOG";

/// Initializes the tracing subscriber, writing to `log.txt` in `dir` in
/// append mode, matching spec.md's log file semantics
/// (`logging.basicConfig(filename='log.txt', filemode='a', ...)`).
///
/// Returns the [`tracing_appender::non_blocking::WorkerGuard`] that must be
/// held for the lifetime of the process; dropping it stops the writer
/// thread and truncates any buffered log lines.
pub fn init_tracing(
    dir: &std::path::Path,
    json_format: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(dir, "log.txt");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::new("")
        .add_directive(Directive::from(tracing::metadata::LevelFilter::INFO))
        .add_directive("sled=warn".parse()?);

    let filter = match std::env::var_os(RUST_LOG_ENV).map(|s| s.into_string()) {
        Some(Ok(env)) => {
            let mut filter = filter;
            for directive in env.split(',') {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(err) => eprintln!("WARN ignoring log directive `{directive}`: {err}"),
                }
            }
            filter
        }
        _ => filter,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);

    let fmt_layer = if json_format {
        fmt_layer.json().with_timer(UtcTime::rfc_3339()).boxed()
    } else {
        fmt_layer.with_timer(UtcTime::rfc_3339()).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to init tracing")?;

    tracing::info!("initialized logger");

    Ok(guard)
}
