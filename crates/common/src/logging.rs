// Steptrace - EVM Execution Trace Reconstruction
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Logging setup shared by the steptrace binary and the test suites
//!
//! Everything goes through `tracing`. `RUST_LOG` overrides the default level;
//! HTTP client crates are held at `warn` so a `debug` run shows the trace
//! engine rather than connection pooling.

use eyre::{Result, WrapErr};
use std::{env, fs, path::PathBuf, sync::Once};
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Crates whose debug output drowns the trace engine's own logs
const NOISY_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "wiremock=warn"];

/// Directory under the system temp dir holding rolled log files
const LOG_DIR_NAME: &str = "steptrace-logs";

/// Initialize logging for a steptrace component
///
/// Installs a pretty stderr layer and, if `enable_file_logging` is set, a
/// daily-rotated plain-text file under `$TMPDIR/steptrace-logs/<component>/`.
/// Fails if a global subscriber is already installed.
///
/// # Examples
/// ```rust,no_run
/// use steptrace_common::logging;
///
/// fn main() -> eyre::Result<()> {
///     logging::init_logging("steptrace", false)?;
///     tracing::info!("Application started");
///     Ok(())
/// }
/// ```
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true)
        .pretty()
        .with_filter(quiet_filter(Level::INFO)?);

    let log_dir = enable_file_logging.then(|| create_log_directory(component_name)).transpose()?;
    let file_layer = match &log_dir {
        Some(dir) => {
            let (writer, guard) =
                non_blocking(rolling::daily(dir, format!("{component_name}.log")));
            // The guard flushes on drop; logging lives for the whole process.
            std::mem::forget(guard);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_timer(LocalTime::rfc_3339())
                .with_ansi(false)
                .with_filter(default_env_filter(Level::DEBUG)?);
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .wrap_err("Failed to initialize tracing subscriber")?;

    tracing::info!(
        component = component_name,
        log_dir = ?log_dir.as_ref().map(|dir| dir.display().to_string()),
        "Logging initialized"
    );
    tracing::debug!(args = ?env::args().collect::<Vec<_>>(), "command line");
    Ok(())
}

/// `RUST_LOG` if set and valid, otherwise `default_level`
fn default_env_filter(default_level: Level) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.as_str()))
        .wrap_err("Failed to create environment filter")
}

/// [`default_env_filter`] with the HTTP stack capped at `warn`
fn quiet_filter(default_level: Level) -> Result<EnvFilter> {
    Ok(NOISY_TARGETS
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(default_env_filter(default_level)?, EnvFilter::add_directive))
}

fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = env::temp_dir().join(LOG_DIR_NAME).join(component_name);
    fs::create_dir_all(&log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
    Ok(log_dir)
}

/// Initialize compact console logging through the test writer
pub fn init_simple_logging(level: Level) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(quiet_filter(level)?)
        .with_target(false)
        .with_test_writer()
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {}", e))
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Logging for tests; safe to call from every test
///
/// ```rust
/// use steptrace_common::logging;
///
/// logging::ensure_test_logging(None);
/// tracing::info!("Running test");
/// ```
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        // A subscriber installed elsewhere makes this fail, which is fine for tests
        let _ = init_simple_logging(default_level.unwrap_or(Level::INFO));
    });
}
