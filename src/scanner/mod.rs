pub mod archive;
pub mod ast;
pub mod certs;
pub mod classfile;
pub mod dynlink;
pub mod postprocess;
pub mod profile;
pub mod strings;
pub mod walk;

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patterns::{ByteKind, Registry};
use profile::ScanOptions;

/// Severity of an individual detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Med,
    High,
}

impl Severity {
    pub fn parse(name: &str) -> Option<Severity> {
        match name.to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "med" | "medium" => Some(Severity::Med),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Med => write!(f, "med"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// How a detection was obtained. Orthogonal to severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Text,
    Api,
    Pem,
    Oid,
    CurveParam,
    Prime,
    Bytes,
    Import,
    Ast,
    Bytecode,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceKind::Text => "text",
            EvidenceKind::Api => "api",
            EvidenceKind::Pem => "pem",
            EvidenceKind::Oid => "oid",
            EvidenceKind::CurveParam => "curve_param",
            EvidenceKind::Prime => "prime",
            EvidenceKind::Bytes => "bytes",
            EvidenceKind::Import => "import",
            EvidenceKind::Ast => "ast",
            EvidenceKind::Bytecode => "bytecode",
        };
        write!(f, "{}", s)
    }
}

/// A single piece of cryptographic-usage evidence.
///
/// `locus` is a byte offset into the source file's bytes, except for `ast`
/// and `bytecode` evidence where it is a 1-based source line. Archive
/// entries are addressed as `archive::entry` in `file`, and their offsets
/// refer to the entry's decompressed bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub file: String,
    pub locus: usize,
    pub algorithm: String,
    pub matched: String,
    pub evidence: EvidenceKind,
    pub severity: Severity,
}

/// The result of a complete scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub detections: Vec<Detection>,
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

pub const IMPORTED_WEAK_CRYPTO: &str = "ImportedWeakCrypto";

/// Library-name keywords that mark an ELF DT_NEEDED entry as crypto-related.
const ELF_CRYPTO_LIBS: &[&str] = &[
    "crypto", "openssl", "mbed", "wolf", "gnutls", "nss", "gcrypt", "sodium", "nettle", "botan",
];

/// DLL-name keywords that mark a PE import as crypto-related.
const PE_CRYPTO_DLLS: &[&str] = &[
    "crypt", "bcrypt", "crypt32", "ncrypt", "schannel", "secur32", "libcrypto", "openssl",
];

/// Imported-function substrings that flag weak or deprecated primitives.
const WEAK_IMPORT_FUNCS: &[&str] =
    &["md5", "sha1", "des_", "rc4", "rc2", "rsa_generate_key", "seed"];

/// Curve-parameter patterns named for the group order ("n") false-positive
/// heavily on unrelated data and are suppressed in binary scans.
fn is_curve_order_name(name: &str) -> bool {
    name.contains(" n)")
}

pub fn lowercase_ext(path: &str) -> String {
    match path.rfind('.') {
        Some(pos) => path[pos..].to_lowercase(),
        None => String::new(),
    }
}

pub fn is_jar_like_ext(ext: &str) -> bool {
    matches!(
        ext,
        ".jar" | ".zip" | ".war" | ".ear" | ".apk" | ".aar" | ".jmod"
    )
}

pub fn is_versioned_so_name(name: &str) -> bool {
    name.ends_with(".so") || name.contains(".so.")
}

fn is_binary_ext(ext: &str) -> bool {
    matches!(ext, ".so" | ".dll" | ".exe" | ".a" | ".ld")
}

/// Sniff the first four bytes for an ELF or PE magic.
pub fn quick_is_executable_by_header(path: &Path) -> bool {
    use std::io::Read;
    let Ok(mut f) = fs::File::open(path) else {
        return false;
    };
    let mut h = [0u8; 4];
    let Ok(n) = f.read(&mut h) else {
        return false;
    };
    if n < 4 {
        return false;
    }
    (h[0] == 0x7F && h[1] == b'E' && h[2] == b'L' && h[3] == b'F') || (h[0] == b'M' && h[1] == b'Z')
}

pub(crate) fn read_all_bytes(path: &Path) -> Option<Vec<u8>> {
    fs::read(path).ok()
}

pub(crate) fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Whether `off` lies within `win` bytes (either side) of a sorted anchor.
fn near_any(anchors: &[usize], off: usize, win: usize) -> bool {
    if anchors.is_empty() {
        return false;
    }
    let idx = anchors.partition_point(|&a| a < off);
    if idx < anchors.len() && anchors[idx] - off <= win {
        return true;
    }
    if idx > 0 && off - anchors[idx - 1] <= win {
        return true;
    }
    false
}

/// The per-file analysis pipeline: dispatches each file to the analyzers its
/// shape calls for, holding the shared pattern registry.
pub struct Scanner {
    pub registry: Registry,
}

impl Scanner {
    pub fn new(registry: Registry) -> Scanner {
        Scanner { registry }
    }

    /// Analyze one file, choosing analyzers from its extension, magic
    /// header, and contents. Unreadable files contribute no detections.
    pub fn scan_file(&self, path: &Path, opt: &ScanOptions) -> Vec<Detection> {
        let display = path.to_string_lossy().to_string();
        let ext = lowercase_ext(&display);

        if certs::is_cert_or_key_ext(&ext) || certs::looks_like_pem(path) {
            let Some(data) = read_all_bytes(path) else {
                return Vec::new();
            };
            return certs::scan_cert_bytes(&display, &data, &self.registry);
        }

        if let Some(lang) = ast::SourceLang::from_ext(&ext) {
            let Some(data) = read_all_bytes(path) else {
                return Vec::new();
            };
            let source = String::from_utf8_lossy(&data);
            let symbols = ast::collect_symbols(&display, &source, lang);
            return ast::match_symbols(&symbols, &self.registry);
        }

        if ext == ".class" {
            let Some(data) = read_all_bytes(path) else {
                return Vec::new();
            };
            return self.scan_class_like_bytes(&display, &data);
        }

        if is_jar_like_ext(&ext) {
            if !opt.deep_jar {
                return Vec::new();
            }
            return archive::scan_archive(self, path, opt);
        }

        self.scan_binary_file(path)
    }

    /// String + regex hits over a buffer, one detection per match.
    fn text_detections(&self, display: &str, data: &[u8]) -> Vec<Detection> {
        let runs = strings::extract_ascii_strings(data, 4);
        strings::scan_strings(&runs, &self.registry.regex)
            .into_iter()
            .map(|hit| Detection {
                file: display.to_string(),
                locus: hit.offset,
                algorithm: hit.pattern.name.clone(),
                matched: hit.matched,
                evidence: hit.pattern.evidence,
                severity: hit.pattern.severity,
            })
            .collect()
    }

    /// Byte-needle hits with OID-anchor windowing: OID hits pass through and
    /// double as anchors; curve-parameter and prime hits are kept only with
    /// an anchor within `CTX_WINDOW` bytes.
    fn byte_detections(&self, display: &str, data: &[u8]) -> Vec<Detection> {
        const CTX_WINDOW: usize = 2048;
        let hits = strings::scan_bytes(data, &self.registry.bytes);

        let mut anchors: Vec<usize> = hits
            .iter()
            .filter(|h| h.pattern.kind == ByteKind::Oid)
            .map(|h| h.offset)
            .collect();
        anchors.sort_unstable();
        anchors.dedup();

        let mut out = Vec::new();
        for hit in &hits {
            match hit.pattern.kind {
                ByteKind::Oid => {}
                ByteKind::CurveParam | ByteKind::Prime => {
                    if is_curve_order_name(&hit.pattern.name) {
                        continue;
                    }
                    if !near_any(&anchors, hit.offset, CTX_WINDOW) {
                        continue;
                    }
                }
                ByteKind::Bytes => continue,
            }
            out.push(Detection {
                file: display.to_string(),
                locus: hit.offset,
                algorithm: hit.pattern.name.clone(),
                matched: hit.rendered(),
                evidence: hit.pattern.kind.evidence(),
                severity: hit.pattern.kind.severity(),
            });
        }
        out
    }

    /// Class files get the same byte/string scans as any opaque blob, plus
    /// the constant-pool rules.
    pub fn scan_class_like_bytes(&self, display: &str, data: &[u8]) -> Vec<Detection> {
        let mut out = self.text_detections(display, data);
        out.extend(self.byte_detections(display, data));
        out.extend(classfile::scan_class_bytes(display, data));
        out
    }

    pub(crate) fn scan_binary_file(&self, path: &Path) -> Vec<Detection> {
        let display = path.to_string_lossy().to_string();
        match read_all_bytes(path) {
            Some(data) => self.scan_binary_bytes(&display, &data),
            None => Vec::new(),
        }
    }

    /// The whole-file binary analyzer: strings + windowed byte scan, then
    /// dynamic-link imports for ELF/PE images, then the postprocessor.
    pub fn scan_binary_bytes(&self, display: &str, data: &[u8]) -> Vec<Detection> {
        let mut results = self.text_detections(display, data);
        results.extend(self.byte_detections(display, data));

        let ext = lowercase_ext(display);
        let is_bin = dynlink::is_elf(data)
            || dynlink::is_pe(data)
            || is_binary_ext(&ext)
            || is_versioned_so_name(display);

        if is_bin {
            if dynlink::is_elf(data) {
                for imp in dynlink::parse_elf(data) {
                    let low = imp.lib.to_lowercase();
                    let severity = if ELF_CRYPTO_LIBS.iter().any(|k| low.contains(k)) {
                        Severity::Med
                    } else {
                        Severity::Low
                    };
                    results.push(Detection {
                        file: display.to_string(),
                        locus: 0,
                        algorithm: "ELF DT_NEEDED".to_string(),
                        matched: imp.lib,
                        evidence: EvidenceKind::Import,
                        severity,
                    });
                }
            } else if dynlink::is_pe(data) {
                let api_patterns = self.registry.api_only();
                for imp in dynlink::parse_pe(data) {
                    let low = imp.lib.to_lowercase();
                    let severity = if PE_CRYPTO_DLLS.iter().any(|k| low.contains(k)) {
                        Severity::Med
                    } else {
                        Severity::Low
                    };
                    results.push(Detection {
                        file: display.to_string(),
                        locus: 0,
                        algorithm: "PE IMPORT".to_string(),
                        matched: imp.lib.clone(),
                        evidence: EvidenceKind::Import,
                        severity,
                    });
                    for func in &imp.funcs {
                        for pattern in &api_patterns {
                            if pattern.regex.is_match(func) {
                                results.push(Detection {
                                    file: display.to_string(),
                                    locus: 0,
                                    algorithm: pattern.name.clone(),
                                    matched: func.clone(),
                                    evidence: EvidenceKind::Api,
                                    severity: pattern.severity,
                                });
                            }
                        }
                        let fl = func.to_lowercase();
                        if WEAK_IMPORT_FUNCS.iter().any(|k| fl.contains(k)) {
                            results.push(Detection {
                                file: display.to_string(),
                                locus: 0,
                                algorithm: IMPORTED_WEAK_CRYPTO.to_string(),
                                matched: func.clone(),
                                evidence: EvidenceKind::Api,
                                severity: Severity::Med,
                            });
                        }
                    }
                }
            }
        }

        postprocess::postprocess(results)
    }
}
