//! Catalog discovery: running a tap with `--discover` and reading the streams it offers.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, TapError, TapResult};
use crate::process::{TapInvocation, TapLauncher, TapMode, TapProcess};
use crate::tap_error;
use crate::types::Value;

/// Number of leading bytes of invalid output quoted in errors.
const OUTPUT_PREFIX_BYTES: usize = 200;

/// A stream described by a tap catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogStream {
    pub tap_stream_id: String,
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<serde_json::Value>,
}

impl CatalogStream {
    /// Name of the stream in RECORD messages, falling back to the stream id.
    pub fn stream_name(&self) -> &str {
        self.stream.as_deref().unwrap_or(&self.tap_stream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    streams: Vec<CatalogStream>,
}

/// Catalog produced by a tap in discovery mode.
///
/// The raw document is kept so it can be handed back to the tap unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub streams: Vec<CatalogStream>,
    raw: serde_json::Value,
}

impl Catalog {
    pub fn parse(output: &str) -> TapResult<Self> {
        let raw: serde_json::Value = serde_json::from_str(output).map_err(|err| {
            tap_error!(
                ErrorKind::DeserializationError,
                "Discovery output is not valid JSON",
                format!("{err}, output starts with: {}", output_prefix(output))
            )
        })?;

        let document = CatalogDocument::deserialize(&raw).map_err(|err| {
            tap_error!(
                ErrorKind::DeserializationError,
                "Discovery output is not a catalog",
                err
            )
        })?;

        Ok(Self {
            streams: document.streams,
            raw,
        })
    }

    pub fn stream(&self, tap_stream_id: &str) -> Option<&CatalogStream> {
        self.streams
            .iter()
            .find(|stream| stream.tap_stream_id == tap_stream_id)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.raw
    }

    /// Writes the catalog document to `path`, ready to be passed with `--catalog`.
    pub async fn write_to(&self, path: &Path) -> TapResult<()> {
        let contents = serde_json::to_vec_pretty(&self.raw)?;
        tokio::fs::write(path, contents).await?;

        info!(path = %path.display(), streams = self.streams.len(), "catalog written");

        Ok(())
    }
}

fn output_prefix(output: &str) -> &str {
    if output.len() <= OUTPUT_PREFIX_BYTES {
        return output;
    }

    let mut end = OUTPUT_PREFIX_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }

    &output[..end]
}

/// Runs `invocation` in discovery mode and parses the catalog it prints.
///
/// The tap must exit successfully within `timeout`.
#[tracing::instrument(skip_all, fields(program = %invocation.program))]
pub async fn discover<L>(
    launcher: &L,
    invocation: &TapInvocation,
    timeout: Duration,
) -> TapResult<Catalog>
where
    L: TapLauncher,
{
    let invocation = invocation.clone().with_state(None).with_mode(TapMode::Discover);
    let mut process = launcher.spawn(&invocation).await?;

    // The tap may close its output and keep running, so the exit is bounded too.
    let collected = tokio::time::timeout(timeout, async {
        let output = read_output(&mut process).await?;
        let exit = process.wait().await?;
        Ok::<_, TapError>((output, exit))
    })
    .await;

    let (output, exit) = match collected {
        Ok(Ok(collected)) => collected,
        Ok(Err(err)) => {
            let _ = process.terminate().await;
            let _ = process.wait().await;
            return Err(err);
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "discovery timed out");
            process.terminate().await?;
            let exit = process.wait().await?;
            return Err(tap_error!(
                ErrorKind::WallClockTimeout,
                "Discovery did not finish in time",
                exit.describe()
            ));
        }
    };

    if !exit.success() {
        error!(exit = %exit.describe(), "discovery failed");
        return Err(tap_error!(
            ErrorKind::ProcessError,
            "Tap discovery failed",
            exit.describe()
        ));
    }

    let catalog = Catalog::parse(&output)?;
    if catalog.streams.is_empty() {
        warn!("tap discovered no streams");
    }

    for stream in &catalog.streams {
        info!(tap_stream_id = %stream.tap_stream_id, "discovered stream");
    }

    Ok(catalog)
}

/// Discovers the catalog into `invocation.catalog_path` when that file does not exist yet.
///
/// Returns the discovered catalog, or `None` when no catalog is configured or the file is
/// already there.
pub async fn ensure_catalog<L>(
    launcher: &L,
    invocation: &TapInvocation,
    timeout: Duration,
) -> TapResult<Option<Catalog>>
where
    L: TapLauncher,
{
    let Some(path) = &invocation.catalog_path else {
        return Ok(None);
    };

    if tokio::fs::try_exists(path).await? {
        debug!(path = %path.display(), "catalog already present, skipping discovery");
        return Ok(None);
    }

    info!(path = %path.display(), "catalog missing, running discovery");
    let catalog = discover(launcher, invocation, timeout).await?;
    catalog.write_to(path).await?;

    Ok(Some(catalog))
}

async fn read_output<P: TapProcess>(process: &mut P) -> TapResult<String> {
    let mut output = String::new();

    while let Some(line) = process.next_line().await? {
        let line = line.map_err(|err| {
            tap_error!(
                ErrorKind::DeserializationError,
                "Discovery output is not readable",
                err
            )
        })?;

        output.push_str(&line);
        output.push('\n');
    }

    Ok(output)
}
