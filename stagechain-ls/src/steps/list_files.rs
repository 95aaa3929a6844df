use async_trait::async_trait;
use stagechain::prelude::*;
use tracing::debug;

use super::LsContext;

/// Emits the name of every entry in the context directory, sorted.
///
/// Waits for the upstream marker first so the listing starts only after the
/// wildcard has been settled.
#[derive(Debug, Default)]
pub struct ListFiles;

#[async_trait]
impl Stage<LsContext> for ListFiles {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        "ListFiles"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        input: Option<StageReceiver<String>>,
        output: StageSender<String>,
        ctx: &LsContext,
    ) -> Result<(), StageError> {
        if let Some(mut input) = input {
            // Only the arrival of the marker matters.
            let _ = input.recv().await?;
        }

        let mut entries = tokio::fs::read_dir(ctx.dir()).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        debug!(dir = %ctx.dir().display(), entries = names.len(), "directory read");

        for name in names {
            output.send_item(name).await?;
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

    #[tokio::test]
    async fn test_lists_sorted_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt", "c.rs"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let ctx = LsContext::new(None, dir.path());
        let cancel = Arc::new(CancellationToken::new());

        let (marker_tx, marker_rx) = bounded(1, cancel.clone());
        marker_tx.send_item("go".to_string()).await.unwrap();
        drop(marker_tx);
        let (tx, mut rx) = bounded(8, cancel.clone());

        ListFiles.process(&cancel, Some(marker_rx), tx, &ctx).await.unwrap();

        let mut names = Vec::new();
        while let Some(envelope) = rx.recv().await.unwrap() {
            names.push(envelope.item);
        }
        assert_eq!(names, vec!["a.txt", "b.txt", "c.rs"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LsContext::new(None, dir.path().join("nope"));
        let cancel = Arc::new(CancellationToken::new());
        let (tx, _rx) = bounded(8, cancel.clone());

        let err = ListFiles.process(&cancel, None, tx, &ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Io(_)));
    }
}
