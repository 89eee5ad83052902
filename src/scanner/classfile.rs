//! JVM class-file constant-pool reader.
//!
//! Walks the constant pool collecting UTF-8 strings and integer literals,
//! then reports weak-crypto usage when the class references the relevant
//! JCA entry points together with a weak algorithm name or key size.
//! Truncated or malformed pools end the walk cleanly with no detections.

use std::collections::HashSet;

use super::{Detection, EvidenceKind, Severity};

pub fn is_class_file(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0] == 0xCA && buf[1] == 0xFE && buf[2] == 0xBA && buf[3] == 0xBE
}

fn r16(b: &[u8], off: usize) -> Option<u16> {
    let s = b.get(off..off + 2)?;
    Some(u16::from_be_bytes([s[0], s[1]]))
}

fn r32(b: &[u8], off: usize) -> Option<u32> {
    let s = b.get(off..off + 4)?;
    Some(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

/// The UTF-8 strings and integer constants of a class file's constant pool.
#[derive(Debug, Default)]
pub struct ConstantPool {
    pub utf8: HashSet<String>,
    pub ints: HashSet<i32>,
}

/// Decode the constant pool, following each tag's width. Returns whatever
/// was collected up to the first malformed or truncated entry.
pub fn read_constant_pool(buf: &[u8]) -> ConstantPool {
    let mut pool = ConstantPool::default();
    if buf.len() < 16 || !is_class_file(buf) {
        return pool;
    }
    let mut off = 8usize;
    let Some(cp_count) = r16(buf, off) else {
        return pool;
    };
    off += 2;

    let mut i = 1u16;
    while i < cp_count {
        let Some(&tag) = buf.get(off) else {
            return pool;
        };
        off += 1;
        match tag {
            // Utf8: u16 length + bytes
            1 => {
                let Some(len) = r16(buf, off) else {
                    return pool;
                };
                off += 2;
                let Some(bytes) = buf.get(off..off + len as usize) else {
                    return pool;
                };
                pool.utf8.insert(String::from_utf8_lossy(bytes).into_owned());
                off += len as usize;
            }
            // Integer
            3 => {
                let Some(v) = r32(buf, off) else {
                    return pool;
                };
                pool.ints.insert(v as i32);
                off += 4;
            }
            // Float
            4 => {
                if buf.len() < off + 4 {
                    return pool;
                }
                off += 4;
            }
            // Long / Double occupy two pool slots
            5 | 6 => {
                if buf.len() < off + 8 {
                    return pool;
                }
                off += 8;
                i += 1;
            }
            // Class / String / MethodType
            7 | 8 | 16 => {
                if buf.len() < off + 2 {
                    return pool;
                }
                off += 2;
            }
            // Fieldref / Methodref / InterfaceMethodref / NameAndType / InvokeDynamic
            9 | 10 | 11 | 12 | 18 => {
                if buf.len() < off + 4 {
                    return pool;
                }
                off += 4;
            }
            // MethodHandle
            15 => {
                if buf.len() < off + 3 {
                    return pool;
                }
                off += 3;
            }
            _ => return pool,
        }
        i += 1;
    }
    pool
}

/// Co-occurrence rules over the constant pool. Each detection carries
/// locus 0 and `bytecode` evidence.
pub fn scan_class_bytes(display: &str, buf: &[u8]) -> Vec<Detection> {
    let mut out = Vec::new();
    let pool = read_constant_pool(buf);
    if pool.utf8.is_empty() {
        return out;
    }

    let has = |s: &str| pool.utf8.contains(s);
    let has_any = |names: &[&str]| names.iter().any(|n| has(n));

    let mut add = |alg: &str, matched: &str, severity: Severity| {
        out.push(Detection {
            file: display.to_string(),
            locus: 0,
            algorithm: alg.to_string(),
            matched: matched.to_string(),
            evidence: EvidenceKind::Bytecode,
            severity,
        });
    };

    if (has("java/security/MessageDigest") || has("java.security.MessageDigest"))
        && has("getInstance")
        && has_any(&["MD5", "SHA1", "SHA-1"])
    {
        add(
            "Java: MessageDigest.getInstance(MD5|SHA-1)",
            "MD5|SHA1",
            Severity::Med,
        );
    }

    if (has("javax/crypto/Cipher") || has("javax.crypto.Cipher"))
        && has("getInstance")
        && has_any(&["DES/ECB", "RC4", "AES/ECB"])
    {
        add(
            "Java: Cipher.getInstance(DES/ECB|RC4|AES/ECB)",
            "modes",
            Severity::High,
        );
    }

    if (has("java/security/Signature") || has("java.security.Signature"))
        && has("getInstance")
        && has_any(&["MD5withRSA", "SHA1withRSA", "SHA-1withRSA"])
    {
        add(
            "Java: Signature.getInstance(MD5withRSA|SHA1withRSA)",
            "MD5|SHA1",
            Severity::Med,
        );
    }

    if (has("java/security/KeyPairGenerator") || has("java.security.KeyPairGenerator"))
        && (has("initialize") || has("java/security/KeyPairGenerator.initialize"))
        && [512, 768, 1024].iter().any(|k| pool.ints.contains(k))
    {
        add(
            "Java: KeyPairGenerator.initialize(weak key size)",
            "512|768|1024",
            Severity::Med,
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a class file whose constant pool holds the given UTF-8 strings
    /// and integers.
    fn class_with(utf8: &[&str], ints: &[i32]) -> Vec<u8> {
        let mut b: Vec<u8> = vec![0xCA, 0xFE, 0xBA, 0xBE];
        b.extend_from_slice(&[0, 0, 0, 52]); // minor/major
        let count = (utf8.len() + ints.len() + 1) as u16;
        b.extend_from_slice(&count.to_be_bytes());
        for s in utf8 {
            b.push(1);
            b.extend_from_slice(&(s.len() as u16).to_be_bytes());
            b.extend_from_slice(s.as_bytes());
        }
        for v in ints {
            b.push(3);
            b.extend_from_slice(&v.to_be_bytes());
        }
        // Pad so the header length check passes for tiny pools.
        while b.len() < 16 {
            b.push(0);
        }
        b
    }

    #[test]
    fn weak_cipher_mode_detected() {
        let buf = class_with(&["javax/crypto/Cipher", "getInstance", "DES/ECB"], &[]);
        let dets = scan_class_bytes("Weak.class", &buf);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].algorithm, "Java: Cipher.getInstance(DES/ECB|RC4|AES/ECB)");
        assert_eq!(dets[0].matched, "modes");
        assert_eq!(dets[0].severity, Severity::High);
        assert_eq!(dets[0].evidence, EvidenceKind::Bytecode);
        assert_eq!(dets[0].locus, 0);
    }

    #[test]
    fn weak_digest_and_keysize_detected() {
        let buf = class_with(
            &[
                "java/security/MessageDigest",
                "java/security/KeyPairGenerator",
                "getInstance",
                "initialize",
                "MD5",
            ],
            &[1024],
        );
        let dets = scan_class_bytes("Weak.class", &buf);
        let algs: Vec<&str> = dets.iter().map(|d| d.algorithm.as_str()).collect();
        assert!(algs.contains(&"Java: MessageDigest.getInstance(MD5|SHA-1)"));
        assert!(algs.contains(&"Java: KeyPairGenerator.initialize(weak key size)"));
    }

    #[test]
    fn strong_algorithms_are_silent() {
        let buf = class_with(
            &["java/security/MessageDigest", "getInstance", "SHA-256"],
            &[2048, 4096],
        );
        assert!(scan_class_bytes("Strong.class", &buf).is_empty());
    }

    #[test]
    fn long_and_double_consume_two_slots() {
        // count = 4: Long (2 slots) then one Utf8.
        let mut b: Vec<u8> = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
        b.extend_from_slice(&4u16.to_be_bytes());
        b.push(5);
        b.extend_from_slice(&[0; 8]);
        b.push(1);
        b.extend_from_slice(&3u16.to_be_bytes());
        b.extend_from_slice(b"MD5");
        let pool = read_constant_pool(&b);
        assert!(pool.utf8.contains("MD5"));
    }

    #[test]
    fn truncated_pool_halts_cleanly() {
        let full = class_with(&["javax/crypto/Cipher", "getInstance", "RC4"], &[512]);
        for cut in 0..full.len() {
            let _ = scan_class_bytes("Trunc.class", &full[..cut]);
        }
        // Unknown tag halts the walk.
        let mut bad: Vec<u8> = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
        bad.extend_from_slice(&3u16.to_be_bytes());
        bad.push(99);
        bad.extend_from_slice(&[0; 8]);
        assert!(read_constant_pool(&bad).utf8.is_empty());
    }
}
