use async_trait::async_trait;
use stagechain::prelude::*;
use std::path::Path;
use tracing::debug;

use super::LsContext;

/// Marker emitted once the wildcard is settled.
pub const ARGUMENTS_PARSED: &str = "arguments parsed";

/// Source stage turning the pattern argument into a wildcard.
#[derive(Debug, Default)]
pub struct ParseArguments;

/// Characters that make an argument a glob rather than a file name.
const GLOB_CHARS: &[char] = &['*', '?', '['];

/// Works out the wildcard for `argument`, resolving file names against `dir`.
///
/// A glob is used as is. An existing file with an extension turns into
/// `*.<ext>`. Anything else is used verbatim, and no argument means `*`.
pub async fn resolve_wildcard(argument: Option<&str>, dir: &Path) -> String {
    let Some(argument) = argument else {
        return "*".to_string();
    };
    if argument.contains(GLOB_CHARS) {
        return argument.to_string();
    }

    let path = dir.join(argument);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => match path.extension() {
            Some(ext) => format!("*.{}", ext.to_string_lossy()),
            None => argument.to_string(),
        },
        _ => argument.to_string(),
    }
}

#[async_trait]
impl Stage<LsContext> for ParseArguments {
    type Input = ();
    type Output = String;

    fn name(&self) -> &str {
        "ParseArguments"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        _input: Option<StageReceiver<()>>,
        output: StageSender<String>,
        ctx: &LsContext,
    ) -> Result<(), StageError> {
        let wildcard = resolve_wildcard(ctx.argument(), ctx.dir()).await;
        debug!(%wildcard, "wildcard resolved");
        ctx.set_wildcard(wildcard);
        output.send_item(ARGUMENTS_PARSED.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_no_argument_matches_everything() {
        assert_eq!(resolve_wildcard(None, Path::new(".")).await, "*");
    }

    #[tokio::test]
    async fn test_glob_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_wildcard(Some("*.rs"), dir.path()).await, "*.rs");
        assert_eq!(resolve_wildcard(Some("file?.[ch]"), dir.path()).await, "file?.[ch]");
    }

    #[tokio::test]
    async fn test_existing_file_becomes_extension_glob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("content.sh"), "echo").unwrap();
        std::fs::write(dir.path().join("Makefile"), "all:").unwrap();

        assert_eq!(resolve_wildcard(Some("content.sh"), dir.path()).await, "*.sh");
        assert_eq!(resolve_wildcard(Some("Makefile"), dir.path()).await, "Makefile");
    }

    #[tokio::test]
    async fn test_missing_file_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub.d")).unwrap();

        assert_eq!(resolve_wildcard(Some("ghost.txt"), dir.path()).await, "ghost.txt");
        assert_eq!(resolve_wildcard(Some("sub.d"), dir.path()).await, "sub.d");
    }
}
