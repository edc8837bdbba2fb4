use regex::RegexBuilder;

use crate::error::{Result, StoreError};

/// A glob pattern (`*` matches any run of characters, `?` a single one),
/// compiled to an anchored regex. Used by source preferences and by the
/// match filter.
#[derive(Debug, Clone)]
pub(crate) struct Glob {
    regex: regex::Regex,
}

impl Glob {
    pub(crate) fn new(pattern: &str, caseless: bool) -> Result<Self> {
        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                _ => translated.push_str(&regex::escape(&ch.to_string())),
            }
        }
        translated.push('$');
        let regex = RegexBuilder::new(&translated)
            .case_insensitive(caseless)
            .build()
            .map_err(|e| StoreError::InvalidArgument(format!("bad glob pattern: {e}")))?;
        Ok(Self { regex })
    }

    pub(crate) fn matches(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_and_question() {
        let g = Glob::new("plugin/*", false).unwrap();
        assert!(g.matches("plugin/id3v2"));
        assert!(!g.matches("server"));

        let g = Glob::new("s?c", false).unwrap();
        assert!(g.matches("src"));
        assert!(!g.matches("sc"));
    }

    #[test]
    fn literal_metacharacters_are_escaped() {
        let g = Glob::new("a.b+c", false).unwrap();
        assert!(g.matches("a.b+c"));
        assert!(!g.matches("aXb+c"));
    }

    #[test]
    fn caseless_matching() {
        let g = Glob::new("FooBar*", true).unwrap();
        assert!(g.matches("foobarbaz"));
    }
}
