//! Call-site extraction for C/C++, Java, and Python sources.
//!
//! Sources are parsed with tree-sitter; call nodes are reduced to
//! `AstSymbol` records (callee, trailing identifier, decoded first
//! argument) which the loaded regex patterns and AST rules are matched
//! against. A file that fails to parse contributes no symbols.

use tree_sitter::{Node, Parser};

use crate::patterns::{AstRule, Registry};

use super::{Detection, EvidenceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLang {
    Cpp,
    Java,
    Python,
}

impl SourceLang {
    pub fn from_ext(ext: &str) -> Option<SourceLang> {
        match ext {
            ".c" | ".cc" | ".cpp" | ".cxx" | ".h" | ".hpp" | ".hh" => Some(SourceLang::Cpp),
            ".java" => Some(SourceLang::Java),
            ".py" => Some(SourceLang::Python),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceLang::Cpp => "cpp",
            SourceLang::Java => "java",
            SourceLang::Python => "python",
        }
    }

    fn grammar(self) -> tree_sitter::Language {
        match self {
            SourceLang::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            SourceLang::Java => tree_sitter_java::LANGUAGE.into(),
            SourceLang::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    fn call_kind(self) -> &'static str {
        match self {
            SourceLang::Cpp => "call_expression",
            SourceLang::Java => "method_invocation",
            SourceLang::Python => "call",
        }
    }
}

/// One call site, reduced to the fields the matchers consume.
#[derive(Debug, Clone)]
pub struct AstSymbol {
    pub file: String,
    pub line: usize,
    pub lang: SourceLang,
    pub callee_full: String,
    pub callee_base: String,
    pub first_arg: String,
}

/// Trailing identifier of a callee expression: the maximal run of
/// `[A-Za-z0-9_]` at the end.
fn base_name_of(s: &str) -> String {
    let bytes = s.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut end = bytes.len();
    while end > 0 && !is_ident(bytes[end - 1]) {
        end -= 1;
    }
    let mut start = end;
    while start > 0 && is_ident(bytes[start - 1]) {
        start -= 1;
    }
    s[start..end].to_string()
}

/// Decode a quoted string/char literal: backslash escapes pass the next
/// character through verbatim. Non-literals come back as the raw token.
fn decode_first_arg(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(q @ ('"' | '\'')) if trimmed.len() >= 2 => {
            let mut out = String::new();
            let mut iter = chars;
            while let Some(c) = iter.next() {
                if c == '\\' {
                    if let Some(next) = iter.next() {
                        out.push(next);
                    }
                    continue;
                }
                if c == q {
                    break;
                }
                out.push(c);
            }
            out
        }
        _ => trimmed.to_string(),
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Java: the callee is the textual head of the invocation before `(`, and
/// the first argument is parsed out of the same segment.
fn java_symbol(node: Node<'_>, source: &str, file: &str) -> Option<AstSymbol> {
    let seg = node_text(node, source);
    let head = match seg.find('(') {
        Some(p) => seg[..p].trim(),
        None => seg.trim(),
    };
    if head.is_empty() {
        return None;
    }
    let first_arg = seg
        .find('(')
        .map(|p| java_first_arg(&seg[p + 1..]))
        .unwrap_or_default();
    Some(AstSymbol {
        file: file.to_string(),
        line: node.start_position().row + 1,
        lang: SourceLang::Java,
        callee_full: head.to_string(),
        callee_base: base_name_of(head),
        first_arg,
    })
}

/// First argument of a Java call segment: a decoded string/char literal or
/// a bare identifier run, else empty.
fn java_first_arg(after_paren: &str) -> String {
    let s = after_paren.trim_start();
    let mut chars = s.chars();
    match chars.next() {
        Some(q @ ('"' | '\'')) => {
            let mut out = String::new();
            let mut iter = chars;
            while let Some(c) = iter.next() {
                if c == '\\' {
                    if let Some(next) = iter.next() {
                        out.push(next);
                    }
                    continue;
                }
                if c == q {
                    return out;
                }
                out.push(c);
            }
            String::new()
        }
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
            let mut out = String::new();
            out.push(c);
            for c in chars {
                if c.is_ascii_alphanumeric() || c == '_' {
                    out.push(c);
                } else {
                    break;
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// C/C++ and Python: the call node exposes `function` and `arguments`
/// fields directly.
fn field_symbol(node: Node<'_>, source: &str, file: &str, lang: SourceLang) -> Option<AstSymbol> {
    let callee_full = match node.child_by_field_name("function") {
        Some(f) => node_text(f, source).trim().to_string(),
        None => {
            let seg = node_text(node, source);
            match seg.find('(') {
                Some(p) => seg[..p].trim().to_string(),
                None => String::new(),
            }
        }
    };
    if callee_full.is_empty() {
        return None;
    }
    let first_arg = node
        .child_by_field_name("arguments")
        .and_then(|args| args.named_child(0))
        .map(|a| decode_first_arg(node_text(a, source)))
        .unwrap_or_default();
    let callee_base = base_name_of(&callee_full);
    Some(AstSymbol {
        file: file.to_string(),
        line: node.start_position().row + 1,
        lang,
        callee_full: callee_full.clone(),
        callee_base: if callee_base.is_empty() {
            callee_full
        } else {
            callee_base
        },
        first_arg,
    })
}

/// Parse a source buffer and collect every call site.
pub fn collect_symbols(file: &str, source: &str, lang: SourceLang) -> Vec<AstSymbol> {
    let mut out = Vec::new();
    if source.is_empty() {
        return out;
    }
    let mut parser = Parser::new();
    if parser.set_language(&lang.grammar()).is_err() {
        return out;
    }
    let Some(tree) = parser.parse(source, None) else {
        return out;
    };

    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if node.kind() == lang.call_kind() {
            let symbol = match lang {
                SourceLang::Java => java_symbol(node, source, file),
                _ => field_symbol(node, source, file, lang),
            };
            if let Some(s) = symbol {
                out.push(s);
            }
        }
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                if child.is_named() {
                    stack.push(child);
                }
            }
        }
    }
    out
}

fn fullname_hit(name: &str, full: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    full == name || full.ends_with(&format!(".{}", name))
}

/// Evaluate one AST rule against one symbol. Returns the matched string.
fn rule_match(rule: &AstRule, sym: &AstSymbol) -> Option<String> {
    if rule.lang != sym.lang.as_str() {
        return None;
    }
    // Keyword-argument filters are accepted at load but not extractable
    // from the collected symbols.
    if !rule.kw.is_empty() {
        return None;
    }
    let names = || {
        rule.callees
            .iter()
            .map(|s| s.as_str())
            .chain(std::iter::once(rule.callee.as_str()))
            .filter(|s| !s.is_empty())
    };
    match rule.kind.as_str() {
        "call" => names()
            .any(|n| sym.callee_full == n || sym.callee_base == n)
            .then(|| sym.callee_full.clone()),
        "call_fullname" => names()
            .any(|n| fullname_hit(n, &sym.callee_full))
            .then(|| sym.callee_full.clone()),
        "call_fullname+arg" => {
            if rule.arg_index > 0 {
                return None;
            }
            let named = names().any(|n| fullname_hit(n, &sym.callee_full));
            if !named || sym.first_arg.is_empty() {
                return None;
            }
            let re = rule.arg_regex.as_ref()?;
            re.is_match(&sym.first_arg).then(|| sym.first_arg.clone())
        }
        _ => None,
    }
}

/// Match every symbol against the regex patterns (over the candidate list
/// `[callee_full, callee_base, first_arg]`) and the AST rules.
pub fn match_symbols(symbols: &[AstSymbol], registry: &Registry) -> Vec<Detection> {
    let mut out = Vec::new();
    for sym in symbols {
        let mut candidates: Vec<&str> = vec![&sym.callee_full];
        if sym.callee_base != sym.callee_full {
            candidates.push(&sym.callee_base);
        }
        if !sym.first_arg.is_empty() {
            candidates.push(&sym.first_arg);
        }
        for candidate in &candidates {
            for pattern in &registry.regex {
                if let Some(m) = pattern.regex.find(candidate) {
                    out.push(Detection {
                        file: sym.file.clone(),
                        locus: sym.line,
                        algorithm: pattern.name.clone(),
                        matched: m.as_str().to_string(),
                        evidence: EvidenceKind::Ast,
                        severity: pattern.severity,
                    });
                }
            }
        }
        for rule in &registry.ast_rules {
            if let Some(matched) = rule_match(rule, sym) {
                out.push(Detection {
                    file: sym.file.clone(),
                    locus: sym.line,
                    algorithm: if rule.message.is_empty() {
                        rule.id.clone()
                    } else {
                        rule.message.clone()
                    },
                    matched,
                    evidence: EvidenceKind::Ast,
                    severity: rule.severity,
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::Registry;
    use crate::scanner::Severity;

    fn registry() -> Registry {
        Registry::from_json_str(
            r#"{"regex": [
                {"name": "MD5 (name)", "pattern": "\\bmd5\\b"},
                {"name": "API (OpenSSL)", "pattern": "\\b(DES_set_key|EVP_md5|MD5_Init)\\b"}
            ]}"#,
        )
    }

    #[test]
    fn python_call_site_with_line() {
        let src = "import hashlib\n\nh = hashlib.md5(b\"x\")\n";
        let syms = collect_symbols("weak.py", src, SourceLang::Python);
        let md5: Vec<_> = syms.iter().filter(|s| s.callee_base == "md5").collect();
        assert_eq!(md5.len(), 1);
        assert_eq!(md5[0].callee_full, "hashlib.md5");
        assert_eq!(md5[0].line, 3);
    }

    #[test]
    fn python_md5_matches_regex_and_rule() {
        let src = "import hashlib\nhashlib.md5(b\"x\")\n";
        let syms = collect_symbols("weak.py", src, SourceLang::Python);
        let dets = match_symbols(&syms, &registry());
        let regex_hits: Vec<_> = dets
            .iter()
            .filter(|d| d.algorithm == "MD5 (name)")
            .collect();
        assert!(!regex_hits.is_empty());
        assert_eq!(regex_hits[0].evidence, EvidenceKind::Ast);
        assert_eq!(regex_hits[0].severity, Severity::Med);
        assert_eq!(regex_hits[0].locus, 2);
        // Built-in rule fires as well.
        assert!(dets.iter().any(|d| d.algorithm == "MD5 usage"));
    }

    #[test]
    fn cpp_call_with_string_literal_arg() {
        let src = "int main() {\n  DES_set_key(key, &sched);\n  EVP_get_digestbyname(\"md5\");\n}\n";
        let syms = collect_symbols("weak.c", src, SourceLang::Cpp);
        let des: Vec<_> = syms
            .iter()
            .filter(|s| s.callee_base == "DES_set_key")
            .collect();
        assert_eq!(des.len(), 1);
        assert_eq!(des[0].line, 2);
        let byname: Vec<_> = syms
            .iter()
            .filter(|s| s.callee_base == "EVP_get_digestbyname")
            .collect();
        assert_eq!(byname[0].first_arg, "md5");
    }

    #[test]
    fn cpp_rule_hits_des() {
        let src = "void f() { DES_set_key(k, s); }\n";
        let syms = collect_symbols("weak.c", src, SourceLang::Cpp);
        let dets = match_symbols(&syms, &registry());
        assert!(dets.iter().any(|d| d.algorithm == "DES usage" && d.severity == Severity::High));
        assert!(dets.iter().any(|d| d.algorithm == "API (OpenSSL)"));
    }

    #[test]
    fn java_cipher_getinstance_arg_rule() {
        let src = "class A { void f() throws Exception { Cipher c = Cipher.getInstance(\"DES/ECB/PKCS5Padding\"); } }\n";
        let syms = collect_symbols("A.java", src, SourceLang::Java);
        let call: Vec<_> = syms
            .iter()
            .filter(|s| s.callee_full == "Cipher.getInstance")
            .collect();
        assert_eq!(call.len(), 1);
        assert_eq!(call[0].first_arg, "DES/ECB/PKCS5Padding");
        assert_eq!(call[0].callee_base, "getInstance");
        let dets = match_symbols(&syms, &registry());
        assert!(dets
            .iter()
            .any(|d| d.algorithm == "Weak/ECB cipher mode" && d.severity == Severity::High));
    }

    #[test]
    fn escaped_quotes_decode_verbatim() {
        assert_eq!(decode_first_arg("\"a\\\"b\""), "a\"b");
        assert_eq!(decode_first_arg("'x'"), "x");
        assert_eq!(decode_first_arg("1024"), "1024");
        assert_eq!(decode_first_arg("  spaced  "), "spaced");
    }

    #[test]
    fn base_name_trailing_identifier() {
        assert_eq!(base_name_of("hashlib.md5"), "md5");
        assert_eq!(base_name_of("ns::func"), "func");
        assert_eq!(base_name_of("obj->call"), "call");
        assert_eq!(base_name_of("plain"), "plain");
        assert_eq!(base_name_of("f()"), "f");
    }

    #[test]
    fn unparsable_source_yields_no_symbols() {
        // tree-sitter is error-tolerant; even garbage parses to a tree, so
        // the collector just finds no call sites.
        let syms = collect_symbols("x.py", "@@@ %%% |||", SourceLang::Python);
        assert!(syms.is_empty());
    }
}
