//! Classification of miner log lines.
//!
//! The miner binary only speaks free-form text. Everything the supervisor
//! knows about pool connectivity, work and shares is recovered here by
//! pattern matching individual lines. These functions are pure: no state,
//! no I/O, so they can be exercised without a running process.
//!
//! The patterns track the output of cpuminer-style miners, e.g.:
//!
//! ```text
//! [2025-01-01 12:00:00] Stratum connection established
//! [2025-01-01 12:00:00] stratum extranonce1 0x3fa2b1c0, extranonce2 size 8
//! [2025-01-01 12:00:01] New Job 6a3b from solo.ckpool.org, Block 880123
//! [2025-01-01 12:00:31] Hash rate 4 threads (13.16Mh/s)
//! [2025-01-01 12:00:31] TTF @ 13.79 Mh/s  block: 10y
//! [2025-01-01 12:05:12] 1 Submitted Diff 0.0012, Block 880123, Job 6a3b accepted
//! ```
//!
//! These are heuristics over a human-oriented log, not a protocol contract.
//! A future miner release that rewords its output will silently stop
//! producing some events.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::HashRate;

/// Pool connectivity transition observed in a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The miner is (re)connecting to the pool.
    Connecting,
    /// The pool connection is up and delivering work.
    Established,
    /// Authentication or connection failed; the session cannot continue.
    Failed,
}

/// Mining outcome observed in a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerEvent {
    /// The miner reports a solved block.
    BlockFound,
    /// The pool accepted a share.
    ShareAccepted,
}

/// Everything recognised in a single line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLine {
    pub hashrate: Option<HashRate>,
    pub block_height: Option<u64>,
    pub extranonce: Option<String>,
    pub job_id: Option<String>,
    pub connection: Option<ConnectionEvent>,
    pub event: Option<MinerEvent>,
}

impl ParsedLine {
    /// Run every classifier over `line`.
    pub fn parse(line: &str) -> Self {
        Self {
            hashrate: parse_hashrate(line),
            block_height: parse_block_height(line),
            extranonce: parse_extranonce(line),
            job_id: parse_job_id(line),
            connection: classify_connection(line),
            event: classify_event(line),
        }
    }
}

// Periodic report: "Hash rate 4 threads (13.16Mh/s)"
static REPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(([\d.]+)\s*([kKmMgG]?)[hH]/s\)").expect("valid report pattern")
});

// Estimate: "TTF @ 13.79 Mh/s"
static TTF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"TTF @\s*([\d.]+)\s*([kKmMgG]?)[hH]/s").expect("valid TTF pattern")
});

// Anything else that looks like "123.45 kH/s"
static GENERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\d.]+)\s*([kKmMgG]?)[hH]/s").expect("valid hashrate pattern")
});

static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Block\s+(\d+)").expect("valid block pattern"));

static EXTRANONCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)stratum extranonce1\s+0x([0-9a-f]+)").expect("valid extranonce pattern")
});

static JOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Job\s+([0-9a-fA-F]+)").expect("valid job pattern"));

/// Convert the (number, prefix) captures of a hashrate pattern.
fn capture_hashrate(re: &Regex, line: &str) -> Option<HashRate> {
    let caps = re.captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let prefix = caps.get(2).map_or("", |m| m.as_str());
    HashRate::from_prefixed(value, prefix)
}

/// Extract a hashrate sample.
///
/// Patterns are tried in order: the parenthesised periodic report, then the
/// TTF estimate (only on lines mentioning "ttf"), then any bare `<n> h/s`
/// (only on lines that do NOT mention "ttf"). The first pattern that yields
/// a number wins. Non-positive rates are discarded.
pub fn parse_hashrate(line: &str) -> Option<HashRate> {
    let lower = line.to_lowercase();
    let has_ttf = lower.contains("ttf");

    let rate = capture_hashrate(&REPORT_RE, line)
        .or_else(|| {
            if has_ttf {
                capture_hashrate(&TTF_RE, line)
            } else {
                None
            }
        })
        .or_else(|| {
            if lower.contains("h/s") && !has_ttf {
                capture_hashrate(&GENERIC_RE, line)
            } else {
                None
            }
        })?;

    if rate.is_zero() { None } else { Some(rate) }
}

/// Extract a chain height from "Block <digits>". The keyword is
/// case-sensitive, so "block found" never matches.
pub fn parse_block_height(line: &str) -> Option<u64> {
    let caps = BLOCK_RE.captures(line)?;
    caps[1].parse().ok()
}

/// Extract the pool-assigned extranonce1 (hex, without `0x`).
pub fn parse_extranonce(line: &str) -> Option<String> {
    EXTRANONCE_RE.captures(line).map(|caps| caps[1].to_string())
}

/// Extract a job identifier from "Job <hex>".
pub fn parse_job_id(line: &str) -> Option<String> {
    JOB_RE.captures(line).map(|caps| caps[1].to_string())
}

/// Classify pool connectivity. Failure is checked first so a line that
/// also mentions new work still counts as a failure.
pub fn classify_connection(line: &str) -> Option<ConnectionEvent> {
    let lower = line.to_lowercase();

    if lower.contains("stratum authentication failed") || lower.contains("stratum connection failed")
    {
        Some(ConnectionEvent::Failed)
    } else if lower.contains("stratum connection established")
        || lower.contains("new stratum diff")
        || lower.contains("new work")
    {
        Some(ConnectionEvent::Established)
    } else if lower.contains("stratum connect") {
        Some(ConnectionEvent::Connecting)
    } else {
        None
    }
}

/// Classify block and share outcomes.
///
/// "accepted" alone is a share; lines mentioning "block" or "yay" are
/// excluded from the share rule so a block announcement is not counted
/// twice.
pub fn classify_event(line: &str) -> Option<MinerEvent> {
    let lower = line.to_lowercase();

    if lower.contains("block found") || lower.contains("yay!!!") {
        Some(MinerEvent::BlockFound)
    } else if lower.contains("accepted") && !lower.contains("block") && !lower.contains("yay") {
        Some(MinerEvent::ShareAccepted)
    } else {
        None
    }
}
