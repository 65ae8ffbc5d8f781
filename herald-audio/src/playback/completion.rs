use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// One-shot completion signals keyed by correlation id
#[derive(Default)]
pub struct CompletionRegistry {
    waiters: DashMap<String, Vec<oneshot::Sender<()>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ident: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(ident.to_string()).or_default().push(tx);
        rx
    }

    /// Release every waiter of `ident`. Returns how many were waiting.
    pub fn complete(&self, ident: &str) -> usize {
        let Some((_, senders)) = self.waiters.remove(ident) else {
            return 0;
        };
        let n = senders.len();
        for tx in senders {
            let _ = tx.send(());
        }
        debug!(target: "playback", ident = %ident, waiters = n, "Completed");
        n
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    /// Wait for a registered signal. `false` means the wait expired.
    pub async fn wait(rx: oneshot::Receiver<()>, limit: Duration) -> bool {
        // A dropped sender also counts as released
        timeout(limit, rx).await.is_ok()
    }
}
