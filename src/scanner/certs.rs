//! X.509 certificate and certificate-request analysis.
//!
//! Attempts, in order: DER certificate, PEM certificate, PEM CSR, DER CSR.
//! The first successful parse yields two `oid` detections: the signature
//! algorithm at `med` and the subject public-key algorithm at `high`. When
//! nothing parses, the buffer falls back to a raw scan over the OID-typed
//! byte patterns.

use std::fs;
use std::io::Read;
use std::path::Path;

use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use crate::patterns::Registry;
use crate::scanner::strings;

use super::{Detection, EvidenceKind};

/// Extensions handled by this analyzer.
pub fn is_cert_or_key_ext(ext: &str) -> bool {
    matches!(
        ext,
        ".cer" | ".crt" | ".der" | ".pem" | ".p7b" | ".p7c" | ".pfx" | ".p12" | ".key" | ".pub"
            | ".csr"
    )
}

fn is_pem_line(line: &str) -> bool {
    line.contains("-----BEGIN ") || line.contains("-----END ")
}

/// At least two PEM armor lines anywhere in the text.
pub fn is_pem_text(text: &str) -> bool {
    let mut found = 0;
    for line in text.lines() {
        if is_pem_line(line) {
            found += 1;
            if found >= 2 {
                return true;
            }
        }
    }
    false
}

/// Sniff the first 4 KiB of a file for PEM armor.
pub fn looks_like_pem(path: &Path) -> bool {
    let Ok(mut f) = fs::File::open(path) else {
        return false;
    };
    let mut buf = vec![0u8; 4096];
    let Ok(n) = f.read(&mut buf) else {
        return false;
    };
    buf.truncate(n);
    is_pem_text(&String::from_utf8_lossy(&buf))
}

/// Well-known public-key algorithm OIDs and their short names.
fn public_key_short_name(oid: &str) -> Option<&'static str> {
    match oid {
        "1.2.840.113549.1.1.1" => Some("rsaEncryption"),
        "1.2.840.10045.2.1" => Some("id-ecPublicKey"),
        "1.2.840.10040.4.1" => Some("dsaEncryption"),
        "1.2.840.10046.2.1" => Some("dhpublicnumber"),
        "1.3.101.110" => Some("X25519"),
        "1.3.101.111" => Some("X448"),
        "1.3.101.112" => Some("ED25519"),
        "1.3.101.113" => Some("ED448"),
        _ => None,
    }
}

struct ExtractedOids {
    sig_alg: String,
    pubkey_alg: String,
}

fn oids_from_cert(cert: &X509Certificate<'_>) -> ExtractedOids {
    ExtractedOids {
        sig_alg: cert.signature_algorithm.algorithm.to_id_string(),
        pubkey_alg: cert
            .tbs_certificate
            .subject_pki
            .algorithm
            .algorithm
            .to_id_string(),
    }
}

fn oids_from_csr(csr: &X509CertificationRequest<'_>) -> ExtractedOids {
    ExtractedOids {
        sig_alg: csr.signature_algorithm.algorithm.to_id_string(),
        pubkey_alg: csr
            .certification_request_info
            .subject_pki
            .algorithm
            .algorithm
            .to_id_string(),
    }
}

/// Analyze a certificate/key/CSR buffer and emit `oid` detections.
pub fn scan_cert_bytes(display: &str, data: &[u8], registry: &Registry) -> Vec<Detection> {
    let mut out = Vec::new();

    let mut push = |alg: &str, matched: &str, severity: super::Severity| {
        out.push(Detection {
            file: display.to_string(),
            locus: 0,
            algorithm: alg.to_string(),
            matched: matched.to_string(),
            evidence: EvidenceKind::Oid,
            severity,
        });
    };

    let mut emit = |oids: ExtractedOids, sig_label: &str| {
        push(sig_label, &oids.sig_alg, super::Severity::Med);
        let sn = public_key_short_name(&oids.pubkey_alg).unwrap_or(&oids.pubkey_alg);
        push(sn, &oids.pubkey_alg, super::Severity::High);
    };

    if let Ok((_, cert)) = X509Certificate::from_der(data) {
        emit(oids_from_cert(&cert), "x509.sig_alg");
    } else if let Ok((_, pem)) = parse_x509_pem(data) {
        if let Ok((_, cert)) = X509Certificate::from_der(&pem.contents) {
            emit(oids_from_cert(&cert), "x509.sig_alg");
        } else if let Ok((_, csr)) = X509CertificationRequest::from_der(&pem.contents) {
            emit(oids_from_csr(&csr), "csr.sig_alg");
        }
    } else if let Ok((_, csr)) = X509CertificationRequest::from_der(data) {
        emit(oids_from_csr(&csr), "csr.sig_alg");
    }

    if out.is_empty() {
        // Nothing parsed: raw OID-needle scan over the buffer.
        let oid_patterns: Vec<crate::patterns::BytePattern> =
            registry.oid_bytes().into_iter().cloned().collect();
        for hit in strings::scan_bytes(data, &oid_patterns) {
            out.push(Detection {
                file: display.to_string(),
                locus: hit.offset,
                algorithm: hit.pattern.name.clone(),
                matched: hit.rendered(),
                evidence: hit.pattern.kind.evidence(),
                severity: hit.pattern.kind.severity(),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::Registry;
    use crate::scanner::Severity;
    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine;

    // -- tiny DER builder ---------------------------------------------------

    fn der_len(len: usize) -> Vec<u8> {
        if len < 0x80 {
            vec![len as u8]
        } else if len <= 0xFF {
            vec![0x81, len as u8]
        } else {
            vec![0x82, (len >> 8) as u8, (len & 0xFF) as u8]
        }
    }

    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend(der_len(content.len()));
        out.extend_from_slice(content);
        out
    }

    fn seq(children: &[Vec<u8>]) -> Vec<u8> {
        let content: Vec<u8> = children.iter().flatten().copied().collect();
        tlv(0x30, &content)
    }

    fn oid(bytes: &[u8]) -> Vec<u8> {
        tlv(0x06, bytes)
    }

    fn integer(v: u8) -> Vec<u8> {
        tlv(0x02, &[v])
    }

    fn null() -> Vec<u8> {
        tlv(0x05, &[])
    }

    fn utc(s: &str) -> Vec<u8> {
        tlv(0x17, s.as_bytes())
    }

    fn bit_string(bits: &[u8]) -> Vec<u8> {
        let mut content = vec![0u8];
        content.extend_from_slice(bits);
        tlv(0x03, &content)
    }

    const OID_SHA256_RSA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0B];
    const OID_EC_PUBKEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];
    const OID_P256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];

    /// A minimal v1 certificate: sha256WithRSAEncryption signature algorithm,
    /// P-256 EC public key, empty issuer/subject names.
    fn minimal_cert_der() -> Vec<u8> {
        let alg_id = seq(&[oid(OID_SHA256_RSA), null()]);
        let empty_name = seq(&[]);
        let validity = seq(&[utc("240101000000Z"), utc("340101000000Z")]);
        let spki_alg = seq(&[oid(OID_EC_PUBKEY), oid(OID_P256)]);
        // An uncompressed point prefix plus arbitrary coordinate bytes.
        let mut point = vec![0x04];
        point.extend(std::iter::repeat(0x5A).take(64));
        let spki = seq(&[spki_alg, bit_string(&point)]);
        let tbs = seq(&[
            integer(1),
            alg_id.clone(),
            empty_name.clone(),
            validity,
            empty_name,
            spki,
        ]);
        seq(&[tbs, alg_id, bit_string(&[0x00; 32])])
    }

    fn pem_wrap(label: &str, der: &[u8]) -> String {
        let b64 = B64.encode(der);
        let mut out = format!("-----BEGIN {}-----\n", label);
        for chunk in b64.as_bytes().chunks(64) {
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push('\n');
        }
        out.push_str(&format!("-----END {}-----\n", label));
        out
    }

    fn registry_with_oids() -> Registry {
        Registry::from_json_str(
            r#"{"bytes": [
                {"name": "OID sha256WithRSAEncryption", "hex": "06 09 2A 86 48 86 F7 0D 01 01 0B", "type": "oid"},
                {"name": "OID id-ecPublicKey", "hex": "06 07 2A 86 48 CE 3D 02 01", "type": "oid"}
            ]}"#,
        )
    }

    #[test]
    fn der_certificate_yields_sig_and_pubkey_oids() {
        let der = minimal_cert_der();
        let dets = scan_cert_bytes("cert.der", &der, &registry_with_oids());
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].algorithm, "x509.sig_alg");
        assert_eq!(dets[0].matched, "1.2.840.113549.1.1.11");
        assert_eq!(dets[0].severity, Severity::Med);
        assert_eq!(dets[0].evidence, EvidenceKind::Oid);
        assert_eq!(dets[1].algorithm, "id-ecPublicKey");
        assert_eq!(dets[1].matched, "1.2.840.10045.2.1");
        assert_eq!(dets[1].severity, Severity::High);
    }

    #[test]
    fn pem_certificate_extracts_same_oids_as_der() {
        let der = minimal_cert_der();
        let pem = pem_wrap("CERTIFICATE", &der);
        let from_pem = scan_cert_bytes("cert.pem", pem.as_bytes(), &registry_with_oids());
        let from_der = scan_cert_bytes("cert.der", &der, &registry_with_oids());
        let oids = |dets: &[Detection]| -> Vec<String> {
            dets.iter().map(|d| d.matched.clone()).collect()
        };
        assert_eq!(oids(&from_pem), oids(&from_der));
    }

    #[test]
    fn unparsable_buffer_falls_back_to_oid_needles() {
        // Raw DER-encoded OID bytes without any certificate structure.
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&[0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0B]);
        let dets = scan_cert_bytes("blob.key", &data, &registry_with_oids());
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].algorithm, "OID sha256WithRSAEncryption");
        assert_eq!(dets[0].evidence, EvidenceKind::Oid);
        assert_eq!(dets[0].locus, 16);
    }

    #[test]
    fn garbage_without_needles_is_silent() {
        let dets = scan_cert_bytes("noise.pem", b"not a certificate at all", &registry_with_oids());
        assert!(dets.is_empty());
    }

    #[test]
    fn pem_text_detection() {
        assert!(is_pem_text(
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n"
        ));
        assert!(!is_pem_text("-----BEGIN CERTIFICATE-----"));
        assert!(!is_pem_text("BEGIN CERTIFICATE"));
    }

    #[test]
    fn cert_extensions() {
        for ext in [".cer", ".crt", ".der", ".pem", ".p12", ".key", ".pub", ".csr"] {
            assert!(is_cert_or_key_ext(ext), "{ext}");
        }
        assert!(!is_cert_or_key_ext(".txt"));
    }
}
