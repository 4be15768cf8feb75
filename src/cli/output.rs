//! Output formatting for CLI commands
//!
//! Human-readable, JSON and quiet renderings of command results.

use clap::ValueEnum;
use serde_json::json;

use crate::cache::coordinator::CacheStatsSnapshot;
use crate::cache::file::FileStat;
use crate::cache::purge::PurgeReport;

/// Output format options
#[derive(Clone, Debug, PartialEq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Human,
    /// JSON output
    Json,
    /// Quiet mode (minimal output)
    Quiet,
}

fn pretty(value: serde_json::Value) -> String {
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

/// Byte counts for one `cat` pass, relative to the pass before
pub fn format_cat_pass(
    pass: usize,
    bytes: u64,
    delta: &CacheStatsSnapshot,
    format: &OutputFormat,
) -> String {
    match format {
        OutputFormat::Human => format!(
            "Pass {}: {} bytes (ram {}, disk {}, fetched {}, uncached {})",
            pass,
            bytes,
            delta.bytes_from_ram,
            delta.bytes_from_disk,
            delta.bytes_fetched,
            delta.bytes_bypassed
        ),
        OutputFormat::Json => json!({
            "pass": pass,
            "bytes": bytes,
            "from_ram": delta.bytes_from_ram,
            "from_disk": delta.bytes_from_disk,
            "fetched": delta.bytes_fetched,
            "uncached": delta.bytes_bypassed,
        })
        .to_string(),
        OutputFormat::Quiet => format!("{:.3}", delta.hit_ratio()),
    }
}

/// Format a `stat` result
pub fn format_file_stat(path: &str, stat: Option<&FileStat>, format: &OutputFormat) -> String {
    let Some(stat) = stat else {
        return match format {
            OutputFormat::Human => format!("{}: not cached", path),
            OutputFormat::Json => "null".to_string(),
            OutputFormat::Quiet => String::new(),
        };
    };
    let last_access = stat
        .last_access
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    match format {
        OutputFormat::Human => format!(
            "{}:\n  size: {} bytes\n  cached: {} bytes{}\n  accesses: {}",
            path,
            stat.size,
            stat.cached_bytes,
            if stat.complete { " (complete)" } else { "" },
            stat.access_count
        ),
        OutputFormat::Json => pretty(json!({
            "path": path,
            "size": stat.size,
            "cached_bytes": stat.cached_bytes,
            "complete": stat.complete,
            "access_count": stat.access_count,
            "last_access_secs": last_access,
        })),
        OutputFormat::Quiet => stat.cached_bytes.to_string(),
    }
}

/// Format a purge pass report
pub fn format_purge_report(report: &PurgeReport, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => {
            let mut out = format!(
                "Occupancy: {} -> {} bytes\nEvicted: {} file(s), {} bytes freed",
                report.occupancy_before,
                report.occupancy_after,
                report.evicted.len(),
                report.bytes_freed
            );
            if !report.triggered {
                out.push_str("\nHigh-water mark not reached");
            }
            for path in &report.deferred {
                out.push_str(&format!("\nDeferred (in use): {}", path));
            }
            if report.errors > 0 {
                out.push_str(&format!("\nRemoval errors: {}", report.errors));
            }
            out
        }
        OutputFormat::Json => pretty(json!({
            "occupancy_before": report.occupancy_before,
            "occupancy_after": report.occupancy_after,
            "triggered": report.triggered,
            "evicted": report.evicted,
            "bytes_freed": report.bytes_freed,
            "deferred": report.deferred,
            "errors": report.errors,
        })),
        OutputFormat::Quiet => report.bytes_freed.to_string(),
    }
}

/// Print output unless the format asks for nothing
pub fn print_output(content: &str) {
    if !content.is_empty() {
        println!("{}", content);
    }
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("Error: {}", message);
}
