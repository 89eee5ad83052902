//! Filesystem traversal and the parallel scan scheduler.
//!
//! Enumeration builds the full candidate list up front so progress totals
//! are fixed, then a worker pool claims indices from an atomic counter.
//! Workers share nothing per file; the only coordination is the claim
//! counter, the two progress counters, and a mutex that serializes the
//! `on_detect` / `on_progress` callbacks so listeners observe a totally
//! ordered stream. Cancellation is polled at the loop head and again
//! before each claim.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use walkdir::WalkDir;

use super::profile::{self, ScanOptions, ScanProfile};
use super::{
    ast, certs, file_size, is_jar_like_ext, is_versioned_so_name, lowercase_ext,
    quick_is_executable_by_header, Detection, ScanResult, Scanner,
};

/// Whether the dispatcher has an analyzer for this path.
fn is_candidate(path: &Path) -> bool {
    let display = path.to_string_lossy();
    let ext = lowercase_ext(&display);
    if certs::is_cert_or_key_ext(&ext) || certs::looks_like_pem(path) {
        return true;
    }
    if ast::SourceLang::from_ext(&ext).is_some() {
        return true;
    }
    if ext == ".class" || is_jar_like_ext(&ext) {
        return true;
    }
    is_versioned_so_name(&display)
        || matches!(ext.as_str(), ".dll" | ".exe" | ".a" | ".ld")
        || quick_is_executable_by_header(path)
}

fn roots_for(root: &Path, opt: &ScanOptions) -> Vec<PathBuf> {
    if opt.profile == ScanProfile::InstitutionStrict && root == Path::new("/") {
        let preferred: Vec<PathBuf> = profile::PREFERRED_ROOT_DIRS
            .iter()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .collect();
        if !preferred.is_empty() {
            return preferred;
        }
    }
    vec![root.to_path_buf()]
}

fn enumerate<C>(root: &Path, opt: &ScanOptions, is_cancelled: &C) -> Vec<PathBuf>
where
    C: Fn() -> bool,
{
    let mut files = Vec::new();
    for r in roots_for(root, opt) {
        if r.is_file() {
            if is_candidate(&r) && passes_globs(&r, opt) {
                files.push(r);
            }
            continue;
        }
        if !r.is_dir() {
            continue;
        }
        let walker = WalkDir::new(&r).follow_links(false);
        let walker = if opt.recurse {
            walker
        } else {
            walker.max_depth(1)
        };
        let iter = walker.into_iter().filter_entry(|e| {
            // Do not descend into excluded directories.
            !(e.file_type().is_dir()
                && profile::should_skip_path(&e.path().to_string_lossy(), opt))
        });
        for entry in iter {
            if is_cancelled() {
                return files;
            }
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if profile::should_skip_path(&path.to_string_lossy(), opt) {
                continue;
            }
            if !is_candidate(path) || !passes_globs(path, opt) {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }
    files
}

fn passes_globs(path: &Path, opt: &ScanOptions) -> bool {
    let s = path.to_string_lossy();
    if !opt.include_globs.is_empty() && !profile::glob_matches(&s, &opt.include_globs) {
        return false;
    }
    if profile::glob_matches(&s, &opt.exclude_globs) {
        return false;
    }
    true
}

fn worker_count() -> usize {
    let hw = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (hw * 2).clamp(2, 32)
}

/// Scan `root` with the given options, streaming detections and progress
/// through the callbacks. `is_cancelled` is polled between files; once it
/// returns true, each worker exits after at most its file in flight.
pub fn scan_path<D, P, C>(
    scanner: &Scanner,
    root: &Path,
    opt: &ScanOptions,
    on_detect: D,
    on_progress: P,
    is_cancelled: C,
) where
    D: Fn(&Detection) + Sync,
    P: Fn(&str, u64, u64, u64, u64) + Sync,
    C: Fn() -> bool + Sync,
{
    let opt = profile::effective_options(root, opt);

    // A regular-file root is dispatched directly, bypassing candidacy.
    if root.is_file() {
        let size = file_size(root);
        let detections = scanner.scan_file(root, &opt);
        for d in &detections {
            on_detect(d);
        }
        on_progress(&root.to_string_lossy(), 1, 1, size, size);
        return;
    }

    let files = enumerate(root, &opt, &is_cancelled);
    let total_files = files.len() as u64;
    let total_bytes: u64 = files.iter().map(|f| file_size(f)).sum();

    let next_index = AtomicUsize::new(0);
    let files_done = AtomicU64::new(0);
    let bytes_done = AtomicU64::new(0);
    let callback_lock: Mutex<()> = Mutex::new(());

    std::thread::scope(|scope| {
        for _ in 0..worker_count() {
            scope.spawn(|| loop {
                if is_cancelled() {
                    break;
                }
                let i = next_index.fetch_add(1, Ordering::SeqCst);
                if i >= files.len() {
                    break;
                }
                if is_cancelled() {
                    break;
                }
                let path = &files[i];
                let size = file_size(path);
                let detections = scanner.scan_file(path, &opt);
                {
                    let _guard = callback_lock
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    for d in &detections {
                        on_detect(d);
                    }
                    on_progress(
                        &path.to_string_lossy(),
                        files_done.load(Ordering::SeqCst) + 1,
                        total_files,
                        bytes_done.load(Ordering::SeqCst) + size,
                        total_bytes,
                    );
                    // Counters advance after the callbacks return, still
                    // under the lock: the final progress call is guaranteed
                    // to report files_done == files_total.
                    files_done.fetch_add(1, Ordering::SeqCst);
                    bytes_done.fetch_add(size, Ordering::SeqCst);
                }
            });
        }
    });
}

/// Collect a whole scan into a `ScanResult`.
pub fn run_scan(scanner: &Scanner, root: &Path, opt: &ScanOptions) -> ScanResult {
    let started_at = Utc::now();
    let start = Instant::now();
    let detections: Mutex<Vec<Detection>> = Mutex::new(Vec::new());
    let totals: Mutex<(u64, u64)> = Mutex::new((0, 0));

    scan_path(
        scanner,
        root,
        opt,
        |d| {
            detections
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(d.clone());
        },
        |_path, files_done, _files_total, bytes_done, _bytes_total| {
            *totals.lock().unwrap_or_else(|p| p.into_inner()) = (files_done, bytes_done);
        },
        || false,
    );

    let (files_scanned, bytes_scanned) = *totals.lock().unwrap_or_else(|p| p.into_inner());
    ScanResult {
        detections: detections.into_inner().unwrap_or_else(|p| p.into_inner()),
        files_scanned,
        bytes_scanned,
        duration_ms: start.elapsed().as_millis() as u64,
        started_at,
    }
}
