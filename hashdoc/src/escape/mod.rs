// Escaping of stored values for the index query syntax

/// Characters that separate terms or carry meaning in index queries.
pub const INDEX_PUNCTUATION: &[char] = &[
    ',', '.', '<', '>', '{', '}', '[', ']', '"', '\'', ':', ';', '!', '@', '#', '$', '%', '^',
    '&', '*', '(', ')', '-', '+', '=', '~', '|', '/',
];

pub fn is_index_punctuation(c: char) -> bool {
    INDEX_PUNCTUATION.contains(&c)
}

/// Backslash-prefix every index punctuation character of `s`.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if is_index_punctuation(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Strip every backslash from `s`.
///
/// Literal backslashes in the original value are lost, so values that
/// contain them do not survive `escape` followed by `unescape`.
pub fn unescape(s: &str) -> String {
    s.chars().filter(|&c| c != '\\').collect()
}
