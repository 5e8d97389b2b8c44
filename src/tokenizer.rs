use crate::index::TermSet;
use crate::traits::Tokenizer;

/// The tokenizer used when none is configured.
///
/// Splits on anything that is not alphanumeric (whitespace, punctuation,
/// underscores, symbols) and lowercases each word. `normalize` additionally
/// trims surrounding non-alphanumeric characters, so query words such as
/// `"@Deprecated"` or `"TODO:"` hit the terms `deprecated` and `todo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTokenizer;

impl Tokenizer for DefaultTokenizer {
    fn tokenize(&self, content: &str) -> TermSet {
        content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    fn normalize(&self, word: &str) -> String {
        word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::terms_for;

    #[test]
    fn splits_on_whitespace_and_punctuation() {
        let terms = DefaultTokenizer.tokenize("Hello, world! hello_again\tTODO: fix");
        let mut sorted: Vec<_> = terms.into_iter().collect();
        sorted.sort();
        assert_eq!(sorted, ["again", "fix", "hello", "todo", "world"]);
    }

    #[test]
    fn empty_content_yields_no_terms() {
        assert!(DefaultTokenizer.tokenize("").is_empty());
        assert!(DefaultTokenizer.tokenize(" \n\t ,.;").is_empty());
    }

    #[test]
    fn normalize_trims_markers_and_lowercases() {
        assert_eq!(DefaultTokenizer.normalize("@Deprecated"), "deprecated");
        assert_eq!(DefaultTokenizer.normalize("TODO:"), "todo");
        assert_eq!(DefaultTokenizer.normalize("!!!"), "");
    }

    #[test]
    fn unicode_words_are_kept_whole() {
        let terms = DefaultTokenizer.tokenize("Привет мир straße");
        assert!(terms.contains("привет"));
        assert!(terms.contains("straße"));
    }

    #[test]
    fn terms_for_normalizes_custom_tokens() {
        struct Raw;
        impl Tokenizer for Raw {
            fn tokenize(&self, content: &str) -> TermSet {
                content.split(' ').map(str::to_owned).collect()
            }
            fn normalize(&self, word: &str) -> String {
                word.to_uppercase()
            }
        }

        let terms = terms_for(&Raw, "a  b");
        let mut sorted: Vec<_> = terms.into_iter().collect();
        sorted.sort();
        assert_eq!(sorted, ["A", "B"], "empty token from double space is dropped");
    }
}
