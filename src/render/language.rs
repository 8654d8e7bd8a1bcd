use std::sync::OnceLock;

use regex::Regex;

/// Ordered (pattern, tag) pairs; the first pattern that matches names the block.
/// More specific languages sit before the ones whose keywords they share.
pub const LANGUAGE_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)^\s*(<!doctype html|<html\b|<(div|span|body|head|p|ul|section|script)\b)", "html"),
    (r#"^\s*[\{\[]\s*("[^"]*"\s*:|\{|\[|"[^"]*"\s*[,\]])"#, "json"),
    (r"(?m)^\s*(def \w+\(.*\)\s*:|class \w+(\(.*\))?:|from [\w.]+ import |import \w+$|print\()", "python"),
    (r"(?m)(\bfn \w+|\blet mut\b|\bimpl\b.*\{|^\s*use \w+::|println!\()", "rust"),
    (r"(?m)(^\s*package \w+$|\bfunc \w*\(|:= )", "go"),
    (r"(public|private|protected)\s+(static\s+)?(class|void|int|String)\b|System\.out\.print", "java"),
    (r"(?m)(^\s*#include\s*<\w+>\s*$[\s\S]*\bstd::|\bstd::\w+|\bcout\s*<<)", "cpp"),
    (r"(?m)(^\s*#include\s*[<\x22]|\bprintf\s*\(|\bint main\s*\()", "c"),
    (r"(?i)\b(select\s+[\w*,\s]+\s+from|insert\s+into|update\s+\w+\s+set|delete\s+from|create\s+table)\b", "sql"),
    (r"(?m)(^#!/bin/(ba|z)?sh|^\s*\$ |^\s*(sudo|apt(-get)?|brew|npm|cargo|git|cd|ls|echo|export|curl) )", "bash"),
    (r"(?m)^\s*[.#]?[\w-]+(\s*[,>]\s*[.#]?[\w-]+)*\s*\{\s*[\w-]+\s*:[^;{}]*;", "css"),
    (r"(\b(const|let|var)\s+\w+\s*=|\bfunction\b|=>|console\.\w+\(|document\.\w+)", "javascript"),
];

fn compiled() -> &'static [(Regex, &'static str)] {
    static TABLE: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        LANGUAGE_PATTERNS
            .iter()
            .filter_map(|(pattern, tag)| match Regex::new(pattern) {
                Ok(regex) => Some((regex, *tag)),
                Err(e) => {
                    tracing::error!("skipping language pattern for {}: {}", tag, e);
                    None
                }
            })
            .collect()
    })
}

/// Best guess at the language of an untagged code block.
pub fn detect_language(code: &str) -> Option<&'static str> {
    compiled()
        .iter()
        .find(|(regex, _)| regex.is_match(code))
        .map(|(_, tag)| *tag)
}
