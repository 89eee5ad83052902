//! Pattern registry loaded from a JSON definitions file.
//!
//! The file carries three arrays: `regex` (named regular expressions run
//! over extracted strings and AST call sites), `bytes` (hex-encoded needles
//! searched in raw buffers, tagged with a semantic type), and `ast_rules`
//! (call-site rules for the source-language analyzers). A broken entry is
//! dropped with a warning; it never stops a scan.
//!
//! The file path comes from `CRYPTO_PATTERNS`, falling back to
//! `patterns.json` in the working directory.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::scanner::{EvidenceKind, Severity};

pub const PATTERNS_ENV: &str = "CRYPTO_PATTERNS";
pub const PATTERNS_DEFAULT: &str = "patterns.json";

/// A compiled text pattern. Severity and evidence kind are derived from the
/// pattern name at load time and fixed for every match.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    pub name: String,
    pub regex: Regex,
    pub evidence: EvidenceKind,
    pub severity: Severity,
}

/// Semantic tag of a byte needle, controlling evidence kind and severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteKind {
    Oid,
    CurveParam,
    Prime,
    Bytes,
}

impl ByteKind {
    fn from_tag(tag: &str) -> ByteKind {
        match tag {
            "oid" | "asn1-oid" | "asn1_oid" => ByteKind::Oid,
            "curve_param" => ByteKind::CurveParam,
            "prime" => ByteKind::Prime,
            _ => ByteKind::Bytes,
        }
    }

    pub fn evidence(self) -> EvidenceKind {
        match self {
            ByteKind::Oid => EvidenceKind::Oid,
            ByteKind::CurveParam => EvidenceKind::CurveParam,
            ByteKind::Prime => EvidenceKind::Prime,
            ByteKind::Bytes => EvidenceKind::Bytes,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ByteKind::Oid => Severity::High,
            ByteKind::CurveParam | ByteKind::Prime => Severity::Med,
            ByteKind::Bytes => Severity::Low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BytePattern {
    pub name: String,
    pub bytes: Vec<u8>,
    pub kind: ByteKind,
}

/// A call-site rule for the AST analyzers.
#[derive(Debug, Clone)]
pub struct AstRule {
    pub id: String,
    pub lang: String,
    pub kind: String,
    pub callee: String,
    pub callees: Vec<String>,
    pub arg_index: i64,
    pub kw: String,
    pub arg_regex: Option<Regex>,
    pub kw_value_regex: Option<Regex>,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Default)]
pub struct Registry {
    pub regex: Vec<RegexPattern>,
    pub bytes: Vec<BytePattern>,
    pub ast_rules: Vec<AstRule>,
    pub source: String,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Name classification
// ---------------------------------------------------------------------------

/// Severity of a text-pattern match, keyed on the pattern's name.
pub fn severity_for_pattern_name(name: &str) -> Severity {
    if name.contains("OID dotted") {
        return Severity::High;
    }
    if name.contains("PEM Header") {
        return Severity::Med;
    }
    if name.contains("API (OpenSSL)")
        || name.contains("API (Windows CNG/CAPI)")
        || name.contains("API (libgcrypt)")
    {
        return Severity::Med;
    }
    if name.contains("MD5") || name.contains("SHA-1") {
        return Severity::Med;
    }
    Severity::Low
}

/// Evidence kind of a text-pattern match, keyed on the pattern's name.
pub fn evidence_for_pattern_name(name: &str) -> EvidenceKind {
    let lower = name.to_lowercase();
    if lower.contains("oid") {
        EvidenceKind::Oid
    } else if lower.contains("pem") {
        EvidenceKind::Pem
    } else if lower.contains("api") {
        EvidenceKind::Api
    } else {
        EvidenceKind::Text
    }
}

// ---------------------------------------------------------------------------
// JSON file shape
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_syntax() -> String {
    "ECMAScript".to_string()
}

#[derive(Deserialize)]
struct RegexSpec {
    #[serde(default)]
    name: String,
    #[serde(default)]
    pattern: String,
    #[serde(default = "default_true")]
    icase: bool,
    #[serde(default)]
    literal: bool,
    #[serde(default = "default_syntax")]
    syntax: String,
}

#[derive(Deserialize)]
struct BytesSpec {
    #[serde(default)]
    name: String,
    #[serde(default)]
    hex: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct AstRuleSpec {
    #[serde(default)]
    id: String,
    #[serde(default)]
    lang: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    callee: String,
    #[serde(default)]
    callees: Vec<String>,
    #[serde(default = "minus_one")]
    arg_index: i64,
    #[serde(default)]
    kw: String,
    #[serde(default)]
    kw_value_regex: String,
    #[serde(default)]
    arg_regex: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: String,
}

fn minus_one() -> i64 {
    -1
}

#[derive(Deserialize)]
struct PatternsFile {
    #[serde(default)]
    regex: Vec<RegexSpec>,
    #[serde(default)]
    bytes: Vec<BytesSpec>,
    #[serde(default)]
    ast_rules: Vec<AstRuleSpec>,
}

/// Parse a hex string into bytes, tolerating `0x`/`X` separators, commas,
/// and whitespace. A lone `x`/`X` discards the digit accumulated before it.
pub fn parse_hex_bytes(s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut tok = String::with_capacity(2);
    for c in s.chars() {
        if c.is_ascii_hexdigit() {
            tok.push(c);
            if tok.len() == 2 {
                if let Ok(b) = u8::from_str_radix(&tok, 16) {
                    out.push(b);
                }
                tok.clear();
            }
        } else if c == 'x' || c == 'X' {
            tok.clear();
        }
    }
    out
}

fn compile_rule_regex(
    pattern: &str,
    rule_id: &str,
    what: &str,
    warnings: &mut Vec<String>,
) -> Option<Regex> {
    if pattern.is_empty() {
        return None;
    }
    match RegexBuilder::new(pattern).build() {
        Ok(re) => Some(re),
        Err(err) => {
            warnings.push(format!("[ast_rules] '{}' bad {}: {}", rule_id, what, err));
            None
        }
    }
}

fn compile_regex(spec: &RegexSpec, warnings: &mut Vec<String>) -> Option<Regex> {
    if spec.syntax != "ECMAScript" && spec.syntax != "extended" && spec.syntax != "basic" {
        warnings.push(format!(
            "[regex] '{}': unknown syntax '{}', compiling anyway",
            spec.name, spec.syntax
        ));
    } else if spec.syntax != "ECMAScript" {
        // POSIX flavors funnel through the one supported syntax.
        warnings.push(format!(
            "[regex] '{}': syntax '{}' treated as default flavor",
            spec.name, spec.syntax
        ));
    }
    let pattern = if spec.literal {
        regex::escape(&spec.pattern)
    } else {
        spec.pattern.clone()
    };
    match RegexBuilder::new(&pattern)
        .case_insensitive(spec.icase)
        .build()
    {
        Ok(re) => Some(re),
        Err(err) => {
            warnings.push(format!("[regex] skip '{}': {}", spec.name, err));
            None
        }
    }
}

impl Registry {
    /// Load from `$CRYPTO_PATTERNS`, falling back to `patterns.json`.
    /// Never fails: an unreadable or unparsable file yields a registry with
    /// the built-in AST rules and a warning.
    pub fn load() -> Registry {
        let path = std::env::var(PATTERNS_ENV).unwrap_or_else(|_| PATTERNS_DEFAULT.to_string());
        Registry::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Registry {
        match fs::read_to_string(path) {
            Ok(text) => {
                let mut registry = Registry::from_json_str(&text);
                registry.source = path.display().to_string();
                registry
            }
            Err(err) => {
                let mut registry = Registry {
                    source: path.display().to_string(),
                    ..Registry::default()
                };
                registry
                    .warnings
                    .push(format!("cannot open {}: {}", path.display(), err));
                registry.ast_rules = default_ast_rules();
                registry
            }
        }
    }

    pub fn from_json_str(text: &str) -> Registry {
        let mut registry = Registry::default();
        let file: PatternsFile = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(err) => {
                registry.warnings.push(format!("JSON parse error: {}", err));
                registry.ast_rules = default_ast_rules();
                return registry;
            }
        };

        for spec in &file.regex {
            if spec.name.is_empty() || spec.pattern.is_empty() {
                continue;
            }
            if let Some(regex) = compile_regex(spec, &mut registry.warnings) {
                registry.regex.push(RegexPattern {
                    name: spec.name.clone(),
                    regex,
                    evidence: evidence_for_pattern_name(&spec.name),
                    severity: severity_for_pattern_name(&spec.name),
                });
            }
        }

        for spec in &file.bytes {
            if spec.name.is_empty() || spec.hex.is_empty() {
                continue;
            }
            let bytes = parse_hex_bytes(&spec.hex);
            if bytes.is_empty() {
                registry
                    .warnings
                    .push(format!("[bytes] empty needle for '{}'", spec.name));
                continue;
            }
            registry.bytes.push(BytePattern {
                name: spec.name.clone(),
                bytes,
                kind: ByteKind::from_tag(&spec.kind),
            });
        }

        for spec in file.ast_rules {
            let arg_regex =
                compile_rule_regex(&spec.arg_regex, &spec.id, "arg_regex", &mut registry.warnings);
            let kw_value_regex = compile_rule_regex(
                &spec.kw_value_regex,
                &spec.id,
                "kw_value_regex",
                &mut registry.warnings,
            );
            registry.ast_rules.push(AstRule {
                id: spec.id,
                lang: spec.lang,
                kind: spec.kind,
                callee: spec.callee,
                callees: spec.callees,
                arg_index: spec.arg_index,
                kw: spec.kw,
                arg_regex,
                kw_value_regex,
                message: spec.message,
                severity: Severity::parse(&spec.severity).unwrap_or(Severity::Low),
            });
        }

        if registry.ast_rules.is_empty() {
            registry.ast_rules = default_ast_rules();
        }
        registry
    }

    /// The subset of text patterns run against PE imported-function names:
    /// API, PEM, and OID patterns only.
    pub fn api_only(&self) -> Vec<&RegexPattern> {
        self.regex
            .iter()
            .filter(|p| {
                matches!(
                    p.evidence,
                    EvidenceKind::Api | EvidenceKind::Pem | EvidenceKind::Oid
                )
            })
            .collect()
    }

    /// Byte patterns whose kind is an OID type.
    pub fn oid_bytes(&self) -> Vec<&BytePattern> {
        self.bytes
            .iter()
            .filter(|p| p.kind == ByteKind::Oid)
            .collect()
    }
}

/// Built-in AST rules, used when the patterns file defines none.
pub fn default_ast_rules() -> Vec<AstRule> {
    fn rule(
        id: &str,
        lang: &str,
        kind: &str,
        callee: &str,
        callees: &[&str],
        arg_regex: &str,
        message: &str,
        severity: Severity,
    ) -> AstRule {
        AstRule {
            id: id.to_string(),
            lang: lang.to_string(),
            kind: kind.to_string(),
            callee: callee.to_string(),
            callees: callees.iter().map(|s| s.to_string()).collect(),
            arg_index: if arg_regex.is_empty() { -1 } else { 0 },
            kw: String::new(),
            arg_regex: if arg_regex.is_empty() {
                None
            } else {
                RegexBuilder::new(arg_regex).build().ok()
            },
            kw_value_regex: None,
            message: message.to_string(),
            severity,
        }
    }

    vec![
        rule(
            "cpp_des_api",
            "cpp",
            "call",
            "",
            &["DES_set_key", "DES_ecb_encrypt"],
            "",
            "DES usage",
            Severity::High,
        ),
        rule(
            "cpp_rc4_api",
            "cpp",
            "call",
            "",
            &["RC4_set_key", "EVP_rc4"],
            "",
            "RC4 usage",
            Severity::High,
        ),
        rule(
            "cpp_md5_api",
            "cpp",
            "call",
            "",
            &["MD5", "MD5_Init", "EVP_md5"],
            "",
            "MD5 usage",
            Severity::Med,
        ),
        rule(
            "cpp_sha1_api",
            "cpp",
            "call",
            "",
            &["SHA1", "SHA1_Init", "EVP_sha1"],
            "",
            "SHA1 usage",
            Severity::Med,
        ),
        rule(
            "java_md_getInstance",
            "java",
            "call_fullname+arg",
            "MessageDigest.getInstance",
            &[],
            "(?i)MD5|SHA-1|SHA1",
            "Weak hash (MD5/SHA1)",
            Severity::Med,
        ),
        rule(
            "java_cipher_getInstance_weak",
            "java",
            "call_fullname+arg",
            "Cipher.getInstance",
            &[],
            "(?i)(AES/ECB|DES/ECB|DES$|DESede/ECB|RC4|ARCFOUR|ARC4)",
            "Weak/ECB cipher mode",
            Severity::High,
        ),
        rule(
            "java_kpg_rsa_1024",
            "java",
            "call_fullname+arg",
            "KeyPairGenerator.initialize",
            &[],
            "\\b1024\\b",
            "RSA 1024-bit",
            Severity::Med,
        ),
        rule(
            "py_hashlib_md5",
            "python",
            "call_fullname",
            "hashlib.md5",
            &[],
            "",
            "MD5 usage",
            Severity::Med,
        ),
        rule(
            "py_hashlib_sha1",
            "python",
            "call_fullname",
            "hashlib.sha1",
            &[],
            "",
            "SHA1 usage",
            Severity::Med,
        ),
        rule(
            "py_hashlib_new_weak",
            "python",
            "call_fullname+arg",
            "hashlib.new",
            &[],
            "(?i)md5|sha1",
            "Weak hash via hashlib.new",
            Severity::Med,
        ),
        rule(
            "py_des_arc4",
            "python",
            "call",
            "",
            &[
                "DES.new",
                "ARC4.new",
                "Crypto.Cipher.DES.new",
                "Cryptodome.Cipher.DES.new",
            ],
            "",
            "DES/RC4 usage",
            Severity::High,
        ),
    ]
}

/// Names seen in a registry, for duplicate diagnostics in `patterns` output.
pub fn duplicate_names(registry: &Registry) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dupes = Vec::new();
    for name in registry
        .regex
        .iter()
        .map(|p| &p.name)
        .chain(registry.bytes.iter().map(|p| &p.name))
    {
        if !seen.insert(name.clone()) {
            dupes.push(name.clone());
        }
    }
    dupes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_by_name() {
        assert_eq!(severity_for_pattern_name("OID dotted (generic)"), Severity::High);
        assert_eq!(severity_for_pattern_name("PEM Header"), Severity::Med);
        assert_eq!(severity_for_pattern_name("API (OpenSSL)"), Severity::Med);
        assert_eq!(severity_for_pattern_name("MD5 (name)"), Severity::Med);
        assert_eq!(severity_for_pattern_name("Blowfish (name)"), Severity::Low);

        assert_eq!(evidence_for_pattern_name("OID dotted"), EvidenceKind::Oid);
        assert_eq!(evidence_for_pattern_name("PEM Header"), EvidenceKind::Pem);
        assert_eq!(evidence_for_pattern_name("API (libgcrypt)"), EvidenceKind::Api);
        assert_eq!(evidence_for_pattern_name("DES (name)"), EvidenceKind::Text);
    }

    #[test]
    fn hex_parsing_tolerates_separators() {
        assert_eq!(parse_hex_bytes("2A 86 48"), vec![0x2A, 0x86, 0x48]);
        assert_eq!(parse_hex_bytes("0x2A,0x86,0x48"), vec![0x2A, 0x86, 0x48]);
        assert_eq!(parse_hex_bytes("2a8648"), vec![0x2A, 0x86, 0x48]);
        assert!(parse_hex_bytes("zz").is_empty());
    }

    #[test]
    fn bad_regex_is_dropped_with_warning() {
        let json = r#"{
            "regex": [
                {"name": "good", "pattern": "md5"},
                {"name": "bad", "pattern": "(unclosed"}
            ]
        }"#;
        let registry = Registry::from_json_str(json);
        assert_eq!(registry.regex.len(), 1);
        assert_eq!(registry.regex[0].name, "good");
        assert!(registry.warnings.iter().any(|w| w.contains("bad")));
    }

    #[test]
    fn literal_flag_escapes_metacharacters() {
        let json = r#"{"regex": [{"name": "lit", "pattern": "a.b*", "literal": true}]}"#;
        let registry = Registry::from_json_str(json);
        assert!(registry.regex[0].regex.is_match("a.b*"));
        assert!(!registry.regex[0].regex.is_match("axbb"));
    }

    #[test]
    fn icase_defaults_on() {
        let json = r#"{"regex": [{"name": "n", "pattern": "OpenSSL"}]}"#;
        let registry = Registry::from_json_str(json);
        assert!(registry.regex[0].regex.is_match("openssl"));
        let json = r#"{"regex": [{"name": "n", "pattern": "OpenSSL", "icase": false}]}"#;
        let registry = Registry::from_json_str(json);
        assert!(!registry.regex[0].regex.is_match("openssl"));
    }

    #[test]
    fn empty_needles_are_dropped() {
        let json = r#"{"bytes": [
            {"name": "ok", "hex": "06 09", "type": "oid"},
            {"name": "nope", "hex": "xyzq", "type": "oid"}
        ]}"#;
        let registry = Registry::from_json_str(json);
        assert_eq!(registry.bytes.len(), 1);
        assert_eq!(registry.bytes[0].kind, ByteKind::Oid);
        assert!(registry.warnings.iter().any(|w| w.contains("nope")));
    }

    #[test]
    fn byte_kind_aliases() {
        assert_eq!(ByteKind::from_tag("asn1-oid"), ByteKind::Oid);
        assert_eq!(ByteKind::from_tag("asn1_oid"), ByteKind::Oid);
        assert_eq!(ByteKind::from_tag("curve_param"), ByteKind::CurveParam);
        assert_eq!(ByteKind::from_tag("whatever"), ByteKind::Bytes);
    }

    #[test]
    fn api_only_subset() {
        let json = r#"{"regex": [
            {"name": "API (OpenSSL)", "pattern": "EVP_"},
            {"name": "PEM Header", "pattern": "BEGIN"},
            {"name": "OID dotted", "pattern": "1\\.2"},
            {"name": "DES (name)", "pattern": "des"}
        ]}"#;
        let registry = Registry::from_json_str(json);
        let api: Vec<&str> = registry.api_only().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(api, vec!["API (OpenSSL)", "PEM Header", "OID dotted"]);
    }

    #[test]
    fn missing_ast_rules_fall_back_to_builtin() {
        let registry = Registry::from_json_str("{}");
        assert!(!registry.ast_rules.is_empty());
        assert!(registry.ast_rules.iter().any(|r| r.id == "py_hashlib_md5"));
    }
}
