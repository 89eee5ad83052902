//! ZIP-family archive walking.
//!
//! Enumerates a jar/war/apk-style container and analyzes the entries the
//! inner analyzers understand: `.class` entries get the class-file pipeline,
//! `.java` entries get the Java AST extractor. Entries are addressed as
//! `archive::entry`, and offsets in their detections refer to the entry's
//! decompressed bytes. Profile limits bound entry sizes, total uncompressed
//! bytes, and entry count.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::ast::{self, SourceLang};
use super::profile::ScanOptions;
use super::{lowercase_ext, Detection, Scanner};

pub fn scan_archive(scanner: &Scanner, path: &Path, opt: &ScanOptions) -> Vec<Detection> {
    let mut out = Vec::new();
    let Ok(file) = File::open(path) else {
        return out;
    };
    let Ok(mut zip) = zip::ZipArchive::new(file) else {
        return out;
    };

    let limits = opt.archive_limits();
    let mut seen_entries: u64 = 0;
    let mut total_uncompressed: u64 = 0;

    for i in 0..zip.len() {
        let Ok(mut entry) = zip.by_index(i) else {
            continue;
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let ext = lowercase_ext(&name);
        if ext != ".class" && ext != ".java" {
            continue;
        }

        seen_entries += 1;
        if limits.max_entries != 0 && seen_entries > limits.max_entries {
            break;
        }
        let size = entry.size();
        let per_entry_cap = if ext == ".java" {
            limits.max_entry_java
        } else {
            limits.max_entry_class
        };
        if per_entry_cap != 0 && size > per_entry_cap {
            continue;
        }
        if limits.max_total_uncompressed != 0
            && total_uncompressed + size > limits.max_total_uncompressed
        {
            break;
        }

        let mut data = Vec::with_capacity(size as usize);
        if entry.read_to_end(&mut data).is_err() {
            continue;
        }
        total_uncompressed += data.len() as u64;

        let display = format!("{}::{}", path.to_string_lossy(), name);
        if ext == ".class" {
            out.extend(scanner.scan_class_like_bytes(&display, &data));
        } else {
            let source = String::from_utf8_lossy(&data);
            let symbols = ast::collect_symbols(&display, &source, SourceLang::Java);
            out.extend(ast::match_symbols(&symbols, &scanner.registry));
        }
    }
    out
}
