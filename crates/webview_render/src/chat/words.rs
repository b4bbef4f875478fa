//! Word tokenizer used to budget progressive rendering.
//!
//! A word is, in priority order: a markdown link with its target and
//! optional title, one Han ideograph, a run of `=`, a run of `+`, a run of
//! `-`, or a run of anything else that is not whitespace or `|`.

use std::sync::LazyLock;

use regex::Regex;

use crate::compile_regex;

static WORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(concat!(
        // link text, allowing escaped brackets and one level of nesting
        r#"\[(?:\\\]|[^\[\]]|\[[^\]]*\])*\]"#,
        // target and optional title
        r#"\(\s*<?(?:[^\s>)]|\\\))*>?(?:\s+(?:"(?:\\"|[^"])*"|'(?:\\'|[^'])*'))?\s*\)"#,
        r#"|\p{Han}|=+|\++|-+|[^\s|\p{Han}=+\-]+"#,
    ))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordCountResult {
    /// The consumed prefix of the input.
    pub value: String,
    pub returned_word_count: usize,
    pub is_full_string: bool,
    pub total_word_count: usize,
}

/// Take the prefix of `text` spanning its first `count` words.
///
/// Asking for at least as many words as exist returns the whole string,
/// trailing whitespace included.
pub fn get_n_words(text: &str, count: usize) -> WordCountResult {
    let matches: Vec<_> = WORD_REGEX.find_iter(text).collect();
    let taken = &matches[..count.min(matches.len())];

    let end = if count >= matches.len() {
        text.len()
    } else {
        taken.last().map_or(0, |word| word.end())
    };
    let value = text[..end].to_string();
    let returned_word_count = match taken.len() {
        0 if !value.is_empty() => 1,
        n => n,
    };

    WordCountResult {
        is_full_string: end >= text.len(),
        returned_word_count,
        total_word_count: matches.len(),
        value,
    }
}

pub fn count_words(text: &str) -> usize {
    WORD_REGEX.find_iter(text).count()
}
