use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use regex::Regex;
use stagechain::prelude::*;
use std::iter::Peekable;
use std::str::Chars;
use tracing::warn;

use super::LsContext;

/// Translates a shell glob into an anchored regex.
///
/// `*` and `?` never match `/`. Classes support ranges and negation with a
/// leading `^` or `!`. A backslash escapes the next character.
pub fn glob_to_regex(glob: &str) -> anyhow::Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() * 2 + 2);
    pattern.push('^');

    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            '[' => push_class(&mut chars, &mut pattern)
                .with_context(|| format!("invalid pattern {glob:?}"))?,
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| anyhow!("invalid pattern {glob:?}: trailing backslash"))?;
                push_literal(&mut pattern, escaped);
            }
            other => push_literal(&mut pattern, other),
        }
    }
    pattern.push('$');

    Regex::new(&pattern).with_context(|| format!("invalid pattern {glob:?}"))
}

fn push_literal(pattern: &mut String, c: char) {
    pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
}

fn push_class(chars: &mut Peekable<Chars<'_>>, pattern: &mut String) -> anyhow::Result<()> {
    pattern.push('[');
    if chars.next_if(|&c| c == '^' || c == '!').is_some() {
        pattern.push('^');
    }

    let mut empty = true;
    loop {
        match chars.next() {
            None => bail!("unterminated character class"),
            Some(']') if empty => bail!("empty character class"),
            Some(']') => break,
            Some('-') => pattern.push('-'),
            Some('\\') => {
                let escaped = chars.next().ok_or_else(|| anyhow!("trailing backslash"))?;
                push_literal(pattern, escaped);
            }
            Some(c) => push_literal(pattern, c),
        }
        empty = false;
    }

    pattern.push(']');
    Ok(())
}

enum Matcher {
    All,
    Pattern(Regex),
    /// The wildcard did not compile; nothing passes.
    Invalid,
}

impl Matcher {
    fn compile(wildcard: &str) -> Self {
        if wildcard.is_empty() || wildcard == "*" {
            return Self::All;
        }
        match glob_to_regex(wildcard) {
            Ok(regex) => Self::Pattern(regex),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "dropping every file");
                Self::Invalid
            }
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Pattern(regex) => regex.is_match(name),
            Self::Invalid => false,
        }
    }
}

/// Keeps the file names matching the context wildcard.
#[derive(Debug, Default)]
pub struct FilterFiles;

#[async_trait]
impl Stage<LsContext> for FilterFiles {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        "FilterFiles"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        input: Option<StageReceiver<String>>,
        output: StageSender<String>,
        ctx: &LsContext,
    ) -> Result<(), StageError> {
        let Some(mut input) = input else {
            return Ok(());
        };

        // Read on the first item, once the wildcard is known to be settled.
        let mut matcher = None;
        while let Some(envelope) = input.recv().await? {
            if !envelope.is_ok() {
                output.send(envelope).await?;
                continue;
            }
            let matcher = matcher.get_or_insert_with(|| Matcher::compile(&ctx.wildcard()));
            if matcher.matches(&envelope.item) {
                output.send(envelope).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stagechain::stream::bounded;
    use std::sync::Arc;

    #[test]
    fn test_star_and_question_mark() {
        let re = glob_to_regex("*.txt").unwrap();
        assert!(re.is_match("a.txt"));
        assert!(re.is_match(".txt"));
        assert!(!re.is_match("a.txt.bak"));
        assert!(!re.is_match("dir/a.txt"));

        let re = glob_to_regex("file?.rs").unwrap();
        assert!(re.is_match("file1.rs"));
        assert!(!re.is_match("file10.rs"));
    }

    #[test]
    fn test_classes() {
        let re = glob_to_regex("[a-c]*").unwrap();
        assert!(re.is_match("apple"));
        assert!(!re.is_match("dog"));

        let re = glob_to_regex("[^a-c]*").unwrap();
        assert!(re.is_match("dog"));
        assert!(!re.is_match("apple"));

        let re = glob_to_regex("[!x]").unwrap();
        assert!(re.is_match("y"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let re = glob_to_regex("a+b(1).txt").unwrap();
        assert!(re.is_match("a+b(1).txt"));
        assert!(!re.is_match("aab1xtxt"));

        let re = glob_to_regex(r"\*").unwrap();
        assert!(re.is_match("*"));
        assert!(!re.is_match("x"));
    }

    #[test]
    fn test_invalid_globs() {
        assert!(glob_to_regex("[abc").is_err());
        assert!(glob_to_regex("[]").is_err());
        assert!(glob_to_regex("[z-a]").is_err());
        assert!(glob_to_regex("oops\\").is_err());
    }

    async fn run_filter(wildcard: &str, names: &[&str]) -> Vec<String> {
        let ctx = LsContext::new(None, ".");
        ctx.set_wildcard(wildcard);
        let cancel = Arc::new(CancellationToken::new());

        let (in_tx, in_rx) = bounded(16, cancel.clone());
        for name in names {
            in_tx.send_item((*name).to_string()).await.unwrap();
        }
        drop(in_tx);
        let (tx, mut rx) = bounded(16, cancel.clone());

        FilterFiles.process(&cancel, Some(in_rx), tx, &ctx).await.unwrap();

        let mut kept = Vec::new();
        while let Some(envelope) = rx.recv().await.unwrap() {
            kept.push(envelope.item);
        }
        kept
    }

    #[tokio::test]
    async fn test_filter_by_wildcard() {
        let kept = run_filter("*.txt", &["a.txt", "b.rs", "c.txt"]).await;
        assert_eq!(kept, vec!["a.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_trivial_wildcards_keep_everything() {
        assert_eq!(run_filter("*", &["a", "b"]).await, vec!["a", "b"]);
        assert_eq!(run_filter("", &["a", "b"]).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_invalid_wildcard_drops_everything() {
        assert!(run_filter("[oops", &["a", "[oops"]).await.is_empty());
    }
}
