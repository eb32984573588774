use std::io::{Error, Write};
use std::sync::{Once, OnceLock};
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::PanicHookInfo,
};

use tap_config::Environment;
use thiserror::Error;
use tracing::field::display;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// JSON field carrying the project reference.
const PROJECT_KEY_IN_LOG: &str = "project";
/// JSON field carrying the run id.
const RUN_ID_KEY_IN_LOG: &str = "run_id";

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

/// Keeps buffered log lines alive until dropped.
///
/// Hold the value returned by [`init_tracing`] until the process exits, otherwise lines
/// still queued for the log file are lost.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Enables console tracing in tests when `ENABLE_TRACING` is set:
///
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an explicit environment we would default to prod and log into files.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}

static PROJECT_REF: OnceLock<String> = OnceLock::new();
static RUN_ID: OnceLock<String> = OnceLock::new();

/// Sets the project reference injected into JSON log lines. Only the first call has an effect.
pub fn set_global_project_ref(project_ref: String) {
    let _ = PROJECT_REF.set(project_ref);
}

pub fn get_global_project_ref() -> Option<&'static str> {
    PROJECT_REF.get().map(|s| s.as_str())
}

/// Sets the run id injected into JSON log lines. Only the first call has an effect.
///
/// Meant for processes executing a single run, like `tap-runner`. Processes hosting many runs
/// rely on the `run_id` span field instead.
pub fn set_global_run_id(run_id: String) {
    let _ = RUN_ID.set(run_id);
}

pub fn get_global_run_id() -> Option<&'static str> {
    RUN_ID.get().map(|s| s.as_str())
}

/// Writer adding the global project and run id fields to JSON log lines that lack them.
struct TopLevelFieldsWriter<W> {
    inner: W,
}

impl<W> TopLevelFieldsWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }
}

fn inject_field(
    map: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
    value: Option<&str>,
) -> bool {
    match value {
        Some(value) if !map.contains_key(key) => {
            map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
            true
        }
        _ => false,
    }
}

impl<W> Write for TopLevelFieldsWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(json_str) = std::str::from_utf8(buf)
            && let Ok(serde_json::Value::Object(mut map)) =
                serde_json::from_str::<serde_json::Value>(json_str)
        {
            let project_added =
                inject_field(&mut map, PROJECT_KEY_IN_LOG, get_global_project_ref());
            let run_id_added = inject_field(&mut map, RUN_ID_KEY_IN_LOG, get_global_run_id());

            if (project_added || run_id_added)
                && let Ok(modified) = serde_json::to_string(&map)
            {
                let output = if json_str.ends_with('\n') {
                    format!("{modified}\n")
                } else {
                    modified
                };

                // The caller expects the length of its own buffer back.
                self.inner.write_all(output.as_bytes())?;
                return Ok(buf.len());
            }
        }

        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Initializes tracing for the application.
///
/// Production-like environments log JSON into daily rotated files under `logs/`, development
/// logs pretty-printed lines to the console. The level defaults to `info` and can be changed
/// through `RUST_LOG`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_top_level_fields(app_name, None, None)
}

/// Like [`init_tracing`], additionally injecting `project` and `run_id` into JSON log lines.
pub fn init_tracing_with_top_level_fields(
    app_name: &str,
    project_ref: Option<String>,
    run_id: Option<String>,
) -> Result<LogFlusher, TracingError> {
    if let Some(project_ref) = project_ref {
        set_global_project_ref(project_ref);
    }

    if let Some(run_id) = run_id {
        set_global_run_id(run_id);
    }

    // Forward records of crates logging through `log` into tracing.
    LogTracer::init()?;

    let is_prod = Environment::load()?.is_prod();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if is_prod {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(5)
        .build("logs")?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || TopLevelFieldsWriter::new(file_appender.make_writer()))
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Routes panics through tracing before running the previously installed hook.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        payload.location = location,
        panic.backtrace = backtrace.map(display),
        panic.note = note,
        "a panic occurred",
    );
}
