//! Human, JSON, and machine-stream rendering of scan results.

use colored::Colorize;
use std::collections::{BTreeMap, HashSet};

use crate::scanner::{Detection, ScanResult, Severity};

// ---------------------------------------------------------------------------
// Summary display
// ---------------------------------------------------------------------------

/// Print the scan header line: file/byte counts and duration.
pub fn print_scan_summary(result: &ScanResult, format: &str) {
    if format == "json" {
        // The full result is printed by print_detections in JSON mode.
        return;
    }
    println!(
        "\n  {} {} files, {} bytes in {}ms — {} detection(s)",
        "Scanned:".bold(),
        result.files_scanned,
        result.bytes_scanned,
        result.duration_ms,
        result.detections.len()
    );
}

/// Print detections grouped by file, or the whole result as JSON.
pub fn print_detections(result: &ScanResult, format: &str) {
    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(result).unwrap_or_default()
        );
        return;
    }

    if result.detections.is_empty() {
        println!("  {}", "No cryptographic usage detected.".dimmed());
        return;
    }

    let mut by_file: BTreeMap<&str, Vec<&Detection>> = BTreeMap::new();
    for d in &result.detections {
        by_file.entry(d.file.as_str()).or_default().push(d);
    }

    for (file, dets) in by_file {
        println!("\n  {}", file.bold());
        for d in dets {
            let severity = match d.severity {
                Severity::Low => format!("{}", "low ".dimmed()),
                Severity::Med => format!("{}", "med ".yellow()),
                Severity::High => format!("{}", "high".red().bold()),
            };
            println!(
                "    [{}] {} {} ({} @ {})",
                severity,
                d.algorithm,
                d.matched.as_str().dimmed(),
                d.evidence,
                d.locus
            );
        }
    }
}

/// Print per-severity counts and the number of distinct files with evidence.
pub fn print_severity_summary(result: &ScanResult, format: &str) {
    if format == "json" {
        return;
    }
    let mut low = 0;
    let mut med = 0;
    let mut high = 0;
    for d in &result.detections {
        match d.severity {
            Severity::Low => low += 1,
            Severity::Med => med += 1,
            Severity::High => high += 1,
        }
    }
    let files: HashSet<&str> = result.detections.iter().map(|d| d.file.as_str()).collect();

    println!();
    if high > 0 {
        println!(
            "  {}",
            format!("{} high-severity detection(s)", high).red().bold()
        );
    }
    if med > 0 {
        println!("  {}", format!("{} medium-severity detection(s)", med).yellow());
    }
    if low > 0 {
        println!("  {} low-severity detection(s)", low);
    }
    println!("  {} file(s) with evidence", files.len());
}

// ---------------------------------------------------------------------------
// Machine stream framing
// ---------------------------------------------------------------------------

pub fn stream_progress(path: &str, files_done: u64, files_total: u64) {
    println!("PROGRESS:FILE:{}:{}:{}", path, files_done, files_total);
}

pub fn stream_detection(d: &Detection) {
    println!(
        "DETECTION:{},{},{},{},{},{}",
        d.file, d.locus, d.algorithm, d.matched, d.evidence, d.severity
    );
}

pub fn stream_summary(result: &ScanResult) {
    let mut low = 0;
    let mut med = 0;
    let mut high = 0;
    for d in &result.detections {
        match d.severity {
            Severity::Low => low += 1,
            Severity::Med => med += 1,
            Severity::High => high += 1,
        }
    }
    let files: HashSet<&str> = result.detections.iter().map(|d| d.file.as_str()).collect();
    println!("SUMMARY:TOTAL:{}", result.detections.len());
    println!("SUMMARY:SEVERITY:low:{}", low);
    println!("SUMMARY:SEVERITY:medium:{}", med);
    println!("SUMMARY:SEVERITY:high:{}", high);
    println!("SUMMARY:FILES:{}", files.len());
}
