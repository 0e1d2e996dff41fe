//! Logging setup for the daemon.
//!
//! Binaries call [`init_journald_or_stdout`] once at startup to install a
//! subscriber. Library code imports `crate::tracing::prelude::*` for the
//! level macros.
//!
//! Levels used across the crate: raw miner output at TRACE, failed network
//! fetches at DEBUG, lifecycle transitions at INFO, anything the operator
//! should act on at WARN or above. Filtering follows `RUST_LOG`, defaulting
//! to INFO.

use std::fmt;

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{
        FmtContext, FormatEvent, FormatFields,
        format::{DefaultFields, Writer as FmtWriter},
        time::FormatTime,
    },
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Prefix stripped from our own targets in console output.
const CRATE_PREFIX: &str = "minerwatch::";

/// Whether stderr is the journal stream systemd handed us.
///
/// `JOURNAL_STREAM` holds "device:inode" of the journal socket; it only
/// counts if stderr still points at that same file, i.e. was not
/// redirected by whoever launched us.
#[cfg(target_os = "linux")]
fn stderr_is_journal_stream() -> bool {
    use std::os::unix::io::AsRawFd;

    let Ok(value) = std::env::var("JOURNAL_STREAM") else {
        return false;
    };
    let Some((dev, ino)) = value.split_once(':') else {
        return false;
    };
    let (Ok(dev), Ok(ino)) = (dev.parse::<u64>(), ino.parse::<u64>()) else {
        return false;
    };

    let fd = std::io::stderr().as_raw_fd();
    // SAFETY: fstat only writes into the zeroed buffer we own.
    let mut stat: nix::libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { nix::libc::fstat(fd, &mut stat) } != 0 {
        return false;
    }
    stat.st_dev as u64 == dev && stat.st_ino as u64 == ino
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

/// Initialize logging.
///
/// Under systemd, log to journald; otherwise to stdout.
pub fn init_journald_or_stdout() {
    #[cfg(target_os = "linux")]
    {
        if stderr_is_journal_stream() {
            match tracing_journald::layer() {
                Ok(layer) => {
                    tracing_subscriber::registry()
                        .with(env_filter())
                        .with(layer)
                        .init();
                    return;
                }
                Err(e) => {
                    eprintln!("Failed to initialize journald logging ({e}), using stdout.")
                }
            }
        }
    }

    use_stdout();
    trace!("Logging to stdout");
}

fn use_stdout() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimer)
                .with_target(true)
                .fmt_fields(DefaultFields::new())
                .event_format(ConsoleFormatter),
        )
        .init();
}

/// Single-line console format with colored level, short target and the
/// structured fields dimmed on a second line.
struct ConsoleFormatter;

/// Collects an event's message and fields as strings.
#[derive(Default)]
struct FieldCollector {
    fields: Vec<(String, String)>,
    message: Option<String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let formatted = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(formatted);
            return;
        }
        // Some("x") -> x
        let cleaned = match formatted.strip_prefix("Some(") {
            Some(inner) => inner.strip_suffix(')').unwrap_or(inner).to_string(),
            None => formatted,
        };
        self.fields.push((field.name().to_string(), cleaned));
    }
}

/// Short display form of an event target.
fn short_target<'a>(target: &'a str, fields: &'a [(String, String)]) -> &'a str {
    if let Some(ours) = target.strip_prefix(CRATE_PREFIX) {
        return ours;
    }
    if target == "log" {
        // Events bridged from the `log` crate carry the real target as a field.
        if let Some((_, real)) = fields.iter().find(|(k, _)| k == "log.target") {
            return real.trim_matches('"');
        }
    }
    target
}

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: FmtWriter<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;

        let (color, label) = match *event.metadata().level() {
            Level::ERROR => ("\x1b[31m", "ERROR"),
            Level::WARN => ("\x1b[33m", "WARN "),
            Level::INFO => ("\x1b[32m", "INFO "),
            Level::DEBUG => ("\x1b[34m", "DEBUG"),
            Level::TRACE => ("\x1b[35m", "TRACE"),
        };
        write!(writer, " {}{}\x1b[0m ", color, label)?;

        write!(
            writer,
            "{}: ",
            short_target(event.metadata().target(), &visitor.fields)
        )?;

        if let Some(msg) = &visitor.message {
            write!(writer, "{}", msg.trim_matches('"'))?;
        }

        let mut shown = visitor
            .fields
            .iter()
            .filter(|(k, _)| !k.starts_with("log."))
            .peekable();
        if shown.peek().is_some() {
            // Align under the target column: "HH:MM:SS LEVEL ".
            write!(writer, "\n\x1b[90m               ")?;
            for (i, (key, value)) in shown.enumerate() {
                if i > 0 {
                    write!(writer, ", ")?;
                }
                write!(writer, "{}={}", key, value.trim_matches('"'))?;
            }
            write!(writer, "\x1b[0m")?;
        }

        writeln!(writer)
    }
}

/// Local wall-clock time to the second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut FmtWriter<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
