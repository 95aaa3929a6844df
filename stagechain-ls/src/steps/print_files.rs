use async_trait::async_trait;
use parking_lot::Mutex;
use stagechain::prelude::*;
use std::io::{self, Write};

use super::LsContext;

/// Writes each file name on its own line and forwards it.
#[derive(Debug)]
pub struct PrintFiles<W> {
    out: Mutex<W>,
}

impl PrintFiles<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> PrintFiles<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: Write + Send + 'static> Stage<LsContext> for PrintFiles<W> {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        "PrintFiles"
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        input: Option<StageReceiver<String>>,
        output: StageSender<String>,
        _ctx: &LsContext,
    ) -> Result<(), StageError> {
        let Some(mut input) = input else {
            return Ok(());
        };
        while let Some(envelope) = input.recv().await? {
            if envelope.is_ok() {
                writeln!(self.out.lock(), "{}", envelope.item)?;
            }
            output.send(envelope).await?;
        }
        self.out.lock().flush()?;
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
    async fn test_prints_and_forwards() {
        let ctx = LsContext::new(None, ".");
        let cancel = Arc::new(CancellationToken::new());
        let (in_tx, in_rx) = bounded(4, cancel.clone());
        in_tx.send_item("a.txt".to_string()).await.unwrap();
        in_tx.send_item("b.txt".to_string()).await.unwrap();
        drop(in_tx);
        let (tx, mut rx) = bounded(4, cancel.clone());

        let stage = PrintFiles::new(Vec::new());
        stage.process(&cancel, Some(in_rx), tx, &ctx).await.unwrap();

        assert_eq!(String::from_utf8(stage.into_inner()).unwrap(), "a.txt\nb.txt\n");
        assert_eq!(rx.recv().await.unwrap().unwrap().item, "a.txt");
    }
}
