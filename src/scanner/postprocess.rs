//! Cross-analyzer evidence deduplication for one binary scan.
//!
//! API-name and import evidence is the strongest signal a binary scan
//! produces; plain-text string matches that merely echo an API name or a
//! linked library add noise and are suppressed. OID and curve-parameter
//! evidence collapses to one detection per algorithm / curve family.

use std::collections::HashSet;

use super::{Detection, EvidenceKind, IMPORTED_WEAK_CRYPTO};

/// Normalized curve family of a curve-parameter algorithm name, used to
/// collapse the per-parameter needles of one curve.
fn curve_family(alg: &str) -> String {
    let s = alg.to_lowercase();
    for family in [
        "secp256",
        "secp384",
        "secp521",
        "brainpoolp256",
        "brainpoolp384",
        "brainpoolp512",
        "prime256v1",
    ] {
        if s.contains(family) {
            return family.to_string();
        }
    }
    alg.to_string()
}

/// Library basename token: path stripped, trailing `.dll`/`.so` removed.
fn import_lib_token(name: &str) -> String {
    let s = name.to_lowercase();
    let base = match s.rfind(['/', '\\']) {
        Some(p) => &s[p + 1..],
        None => &s,
    };
    if base.ends_with(".dll") || base.ends_with(".so") {
        match base.rfind('.') {
            Some(dot) => base[..dot].to_string(),
            None => base.to_string(),
        }
    } else {
        base.to_string()
    }
}

pub fn postprocess(detections: Vec<Detection>) -> Vec<Detection> {
    let mut api_funcs: HashSet<String> = HashSet::new();
    let mut import_tokens: HashSet<String> = HashSet::new();
    for d in &detections {
        match d.evidence {
            EvidenceKind::Api => {
                // ImportedWeakCrypto markers carry api evidence too; they
                // must not feed the set they are filtered against.
                if d.algorithm != IMPORTED_WEAK_CRYPTO {
                    api_funcs.insert(d.matched.to_lowercase());
                }
            }
            EvidenceKind::Import => {
                import_tokens.insert(import_lib_token(&d.matched));
            }
            _ => {}
        }
    }

    let mut filtered = Vec::new();
    let mut seen_keys: HashSet<(EvidenceKind, String, String)> = HashSet::new();
    let mut seen_oid_algs: HashSet<String> = HashSet::new();
    let mut seen_curve_families: HashSet<String> = HashSet::new();

    for d in detections {
        match d.evidence {
            EvidenceKind::Oid => {
                if !seen_oid_algs.insert(d.algorithm.clone()) {
                    continue;
                }
            }
            EvidenceKind::CurveParam => {
                if !seen_curve_families.insert(curve_family(&d.algorithm)) {
                    continue;
                }
            }
            EvidenceKind::Text => {
                let m = d.matched.to_lowercase();
                if api_funcs.contains(&m) {
                    continue;
                }
                if api_funcs
                    .iter()
                    .any(|f| f.contains(&m) || m.contains(f.as_str()))
                {
                    continue;
                }
                if import_tokens.contains(&m) {
                    continue;
                }
            }
            _ => {
                if d.algorithm == IMPORTED_WEAK_CRYPTO
                    && api_funcs.contains(&d.matched.to_lowercase())
                {
                    continue;
                }
            }
        }
        let key = (d.evidence, d.algorithm.clone(), d.matched.to_lowercase());
        if seen_keys.insert(key) {
            filtered.push(d);
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Severity;

    fn det(evidence: EvidenceKind, algorithm: &str, matched: &str) -> Detection {
        Detection {
            file: "bin".to_string(),
            locus: 0,
            algorithm: algorithm.to_string(),
            matched: matched.to_string(),
            evidence,
            severity: Severity::Low,
        }
    }

    #[test]
    fn oid_keeps_first_per_algorithm() {
        let out = postprocess(vec![
            det(EvidenceKind::Oid, "OID md5", "06082A864886F70D0205"),
            det(EvidenceKind::Oid, "OID md5", "06082A864886F70D0205"),
            det(EvidenceKind::Oid, "OID sha1", "06052B0E03021A"),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn curve_params_collapse_per_family() {
        let out = postprocess(vec![
            det(EvidenceKind::CurveParam, "secp256r1 p (curve param)", "AA"),
            det(EvidenceKind::CurveParam, "secp256r1 b (curve param)", "BB"),
            det(EvidenceKind::CurveParam, "brainpoolP384r1 p (curve param)", "CC"),
        ]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|d| d.algorithm.contains("secp256")));
        assert!(out.iter().any(|d| d.algorithm.contains("brainpoolP384")));
    }

    #[test]
    fn text_echoing_api_names_is_dropped() {
        let out = postprocess(vec![
            det(EvidenceKind::Api, "API (OpenSSL)", "MD5_Init"),
            det(EvidenceKind::Text, "MD5 (name)", "md5_init"),
            det(EvidenceKind::Text, "MD5 (name)", "md5"),
            det(EvidenceKind::Text, "DES (name)", "des_unrelated_token_xyz"),
        ]);
        // "md5_init" equals an API name, "md5" substring-overlaps one.
        let texts: Vec<_> = out
            .iter()
            .filter(|d| d.evidence == EvidenceKind::Text)
            .collect();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].matched, "des_unrelated_token_xyz");
    }

    #[test]
    fn text_equal_to_import_basename_is_dropped() {
        let out = postprocess(vec![
            det(EvidenceKind::Import, "PE IMPORT", "libs/ADVAPI32.dll"),
            det(EvidenceKind::Text, "advapi (name)", "advapi32"),
        ]);
        let texts: Vec<_> = out
            .iter()
            .filter(|d| d.evidence == EvidenceKind::Text)
            .collect();
        assert!(texts.is_empty());
    }

    #[test]
    fn imported_weak_crypto_yields_to_api_match() {
        let out = postprocess(vec![
            det(EvidenceKind::Api, "API (Windows CNG/CAPI)", "CryptCreateHash"),
            det(EvidenceKind::Api, IMPORTED_WEAK_CRYPTO, "CryptCreateHash"),
            det(EvidenceKind::Api, IMPORTED_WEAK_CRYPTO, "MD5_Update"),
        ]);
        let weak: Vec<_> = out
            .iter()
            .filter(|d| d.algorithm == IMPORTED_WEAK_CRYPTO)
            .collect();
        assert_eq!(weak.len(), 1);
        assert_eq!(weak[0].matched, "MD5_Update");
    }

    #[test]
    fn dedup_key_is_kind_algorithm_lower_match() {
        let out = postprocess(vec![
            det(EvidenceKind::Api, "API (OpenSSL)", "EVP_md5"),
            det(EvidenceKind::Api, "API (OpenSSL)", "evp_MD5"),
            det(EvidenceKind::Bytes, "API (OpenSSL)", "EVP_md5"),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn postprocess_is_idempotent() {
        let input = vec![
            det(EvidenceKind::Api, "API (OpenSSL)", "MD5_Init"),
            det(EvidenceKind::Text, "MD5 (name)", "md5string"),
            det(EvidenceKind::Oid, "OID md5", "06082A864886F70D0205"),
            det(EvidenceKind::Oid, "OID md5", "06082A864886F70D0205"),
            det(EvidenceKind::CurveParam, "secp384r1 p (curve param)", "AA"),
            det(EvidenceKind::Import, "ELF DT_NEEDED", "libcrypto.so.3"),
        ];
        let once = postprocess(input);
        let twice = postprocess(once.clone());
        let key = |d: &Detection| (d.evidence, d.algorithm.clone(), d.matched.clone());
        assert_eq!(
            once.iter().map(key).collect::<Vec<_>>(),
            twice.iter().map(key).collect::<Vec<_>>()
        );
    }
}
