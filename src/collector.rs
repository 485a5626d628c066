//! Periodic scrape of upstream agent internals, exported as gauges.
//!
//! The configured `upstream-info` command is run on an interval and
//! its `section:`/`field = value` output is turned into one gauge per
//! numeric field, named `glimpse_agent.upstream.<section>_<field>`.
//! The same loop publishes process counters (CPU, memory, open file
//! descriptors) for the co-located upstream agent process, read from
//! `/proc` under `glimpse_agent.upstream.process.*`.

use std::collections::HashMap;
use std::time::Duration;

use metrics::gauge;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::Error;

/// Interval between upstream info scrapes.
const SCRAPE_INTERVAL: Duration = Duration::from_secs(10);

/// Non-numeric or unstable fields the scrape skips.
const IGNORED_FIELDS: [&str; 5] = ["arch", "os", "state", "version", "last_contact"];

/// Output sections the scrape skips entirely.
const IGNORED_SECTIONS: [&str; 1] = ["build"];

/// Command pattern used to locate the upstream agent process.
const UPSTREAM_PROCESS_PATTERN: &str = "consul agent";

/// Kernel clock ticks per second for `/proc` CPU fields.
const CLOCK_TICKS_PER_SECOND: f64 = 100.0;

/// Kernel page size for `/proc` rss fields.
const PAGE_SIZE_BYTES: u64 = 4096;

/// Scrapes upstream agent internals into the metrics registry.
pub struct UpstreamCollector {
    command: Vec<String>,
}

impl UpstreamCollector {
    /// Create a collector running the given info command, e.g.
    /// `consul info`.
    pub fn new(info: &str) -> Self {
        Self {
            command: info.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Scrape on an interval until the task is dropped.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(SCRAPE_INTERVAL);

        loop {
            interval.tick().await;

            match self.scrape().await {
                Ok(stats) => {
                    debug!(stats = stats.len(), "scraped upstream info");
                    for (name, value) in stats {
                        gauge!(format!("glimpse_agent.upstream.{name}")).set(value as f64);
                    }
                }
                Err(err) => warn!(error = %err, "upstream info scrape failed"),
            }

            match scrape_process().await {
                Ok((stats, open_fds)) => {
                    gauge!("glimpse_agent.upstream.process.cpu_seconds_total")
                        .set(stats.cpu_seconds);
                    gauge!("glimpse_agent.upstream.process.virtual_memory_bytes")
                        .set(stats.virtual_memory_bytes as f64);
                    gauge!("glimpse_agent.upstream.process.resident_memory_bytes")
                        .set(stats.resident_memory_bytes as f64);
                    if let Some(fds) = open_fds {
                        gauge!("glimpse_agent.upstream.process.open_fds").set(fds as f64);
                    }
                }
                Err(err) => warn!(error = %err, "upstream process scrape failed"),
            }
        }
    }

    async fn scrape(&self) -> Result<HashMap<String, i64>, Error> {
        let Some((bin, args)) = self.command.split_first() else {
            return Err(Error::Collector("empty upstream-info command".to_string()));
        };

        let output = Command::new(bin).args(args).output().await?;
        if !output.status.success() {
            return Err(Error::Collector(format!(
                "{bin} exited with {}",
                output.status
            )));
        }

        parse_info_stats(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Process counters read from `/proc/<pid>/stat`.
#[derive(Debug, PartialEq)]
struct ProcessStats {
    cpu_seconds: f64,
    virtual_memory_bytes: u64,
    resident_memory_bytes: u64,
}

/// Read process counters for the upstream agent process.
async fn scrape_process() -> Result<(ProcessStats, Option<usize>), Error> {
    let pid = find_upstream_pid().await?;
    let stat = tokio::fs::read_to_string(format!("/proc/{pid}/stat")).await?;
    let stats = parse_proc_stat(&stat)?;
    let open_fds = count_open_fds(pid).await;
    Ok((stats, open_fds))
}

async fn find_upstream_pid() -> Result<u32, Error> {
    let output = Command::new("pgrep")
        .args(["-f", UPSTREAM_PROCESS_PATTERN])
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::Collector(format!(
            "could not find pid of {UPSTREAM_PROCESS_PATTERN:?}"
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .and_then(|line| line.trim().parse().ok())
        .ok_or_else(|| {
            Error::Collector(format!(
                "could not parse pid of {UPSTREAM_PROCESS_PATTERN:?}"
            ))
        })
}

async fn count_open_fds(pid: u32) -> Option<usize> {
    let mut dir = tokio::fs::read_dir(format!("/proc/{pid}/fd")).await.ok()?;
    let mut count = 0;
    while let Ok(Some(_)) = dir.next_entry().await {
        count += 1;
    }
    Some(count)
}

/// Parse a `/proc/<pid>/stat` line into process counters.
///
/// The command field is parenthesized and may contain spaces, so
/// parsing starts after the closing parenthesis.
fn parse_proc_stat(stat: &str) -> Result<ProcessStats, Error> {
    let rest = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| Error::Collector("malformed stat line".to_string()))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // Zero-indexed from the state field: utime 11, stime 12, vsize 20,
    // rss 21 (in pages).
    let utime = stat_field(&fields, 11)?;
    let stime = stat_field(&fields, 12)?;
    let vsize = stat_field(&fields, 20)?;
    let rss = stat_field(&fields, 21)?;

    Ok(ProcessStats {
        cpu_seconds: (utime + stime) as f64 / CLOCK_TICKS_PER_SECOND,
        virtual_memory_bytes: vsize,
        resident_memory_bytes: rss * PAGE_SIZE_BYTES,
    })
}

fn stat_field(fields: &[&str], index: usize) -> Result<u64, Error> {
    fields
        .get(index)
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| Error::Collector(format!("stat field {index} missing or not numeric")))
}

/// Parse `section:`/`field = value` info output into named counters.
///
/// Booleans and `never` map to 1/0; any other non-numeric value is an
/// error.
fn parse_info_stats(output: &str) -> Result<HashMap<String, i64>, Error> {
    let mut stats = HashMap::new();
    let mut section = String::new();

    for line in output.lines() {
        let line = line.trim();

        if let Some(name) = line.strip_suffix(':') {
            section = name.to_string();
        }

        if IGNORED_SECTIONS.contains(&section.as_str()) {
            continue;
        }

        let Some((field, value)) = line.split_once('=') else {
            continue;
        };
        let (field, value) = (field.trim(), value.trim());

        if IGNORED_FIELDS.contains(&field) {
            continue;
        }

        let parsed = match value {
            "true" => 1,
            "false" | "never" => 0,
            _ => value
                .parse()
                .map_err(|_| Error::Collector(format!("{field} = {value:?} is not numeric")))?,
        };

        stats.insert(format!("{section}_{field}"), parsed);
    }

    Ok(stats)
}
