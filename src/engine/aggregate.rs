use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Drains a result stream into an ordered unique set.
pub struct Aggregator<R> {
    rx: mpsc::Receiver<R>,
    seen: BTreeSet<R>,
}

impl<R: Ord> Aggregator<R> {
    pub fn new(rx: mpsc::Receiver<R>) -> Self {
        Self {
            rx,
            seen: BTreeSet::new(),
        }
    }

    /// Collect until every sender is gone or `cancel` fires.
    ///
    /// On cancellation, results already buffered in the channel are kept.
    pub async fn collect(mut self, cancel: &CancellationToken) -> Vec<R> {
        loop {
            tokio::select! {
                biased;
                item = self.rx.recv() => match item {
                    Some(r) => {
                        self.seen.insert(r);
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    self.rx.close();
                    while let Ok(r) = self.rx.try_recv() {
                        self.seen.insert(r);
                    }
                    break;
                }
            }
        }
        self.seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicates_are_dropped_and_output_sorted() {
        let (tx, rx) = mpsc::channel(8);
        for item in ["b", "a", "a", "c"] {
            tx.send(item.to_string()).await.unwrap();
        }
        drop(tx);

        let out = Aggregator::new(rx).collect(&CancellationToken::new()).await;
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancellation_keeps_buffered_results() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(2u32).await.unwrap();
        tx.send(1u32).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        // Sender still alive: only cancellation can end the collection.
        let out = Aggregator::new(rx).collect(&cancel).await;
        assert_eq!(out, vec![1, 2]);
        assert!(tx.is_closed());
    }
}
