use courier_core::types::{Payload, RecipientResult};
use std::time::Duration;
use tracing::debug;

use crate::gateway::ProviderGateway;

/// Split `targets` into ordered groups of at most `size` recipients.
pub fn split_targets(targets: &[String], size: usize) -> Vec<Vec<String>> {
    targets
        .chunks(size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Sends recipient lists to the provider in paced, ordered chunks.
#[derive(Debug, Clone, Copy)]
pub struct BatchSplitter {
    chunk_size: usize,
    delay: Duration,
}

impl BatchSplitter {
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            delay,
        }
    }

    /// Results come back in recipient order. Chunk k starts only after chunk
    /// k-1 has returned and the delay has elapsed.
    pub async fn send_all(
        &self,
        gateway: &ProviderGateway,
        recipients: &[String],
        payload: &Payload,
    ) -> Vec<RecipientResult> {
        let mut results = Vec::with_capacity(recipients.len());
        for (index, chunk) in recipients.chunks(self.chunk_size).enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            debug!(chunk = index, size = chunk.len(), "splitter: sending chunk");
            results.extend(gateway.send_chunk(chunk, payload).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::RecordingProvider;
    use std::sync::Arc;

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tok-{}", i)).collect()
    }

    #[test]
    fn test_split_targets_sizes() {
        let sizes: Vec<usize> = split_targets(&tokens(250), 100)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_split_targets_preserves_order() {
        let groups = split_targets(&tokens(5), 2);
        let flattened: Vec<String> = groups.into_iter().flatten().collect();
        assert_eq!(flattened, tokens(5));
    }

    #[test]
    fn test_split_targets_zero_size_is_one() {
        assert_eq!(split_targets(&tokens(3), 0).len(), 3);
    }

    #[tokio::test]
    async fn test_send_all_chunks_in_order() {
        let provider = Arc::new(RecordingProvider::default());
        let gateway = ProviderGateway::new(provider.clone(), Duration::from_secs(1));
        let splitter = BatchSplitter::new(2, Duration::from_millis(5));

        let results = splitter
            .send_all(&gateway, &tokens(5), &Payload::new("Hi", "There"))
            .await;

        let chunk_sizes: Vec<usize> = provider.chunks().iter().map(Vec::len).collect();
        assert_eq!(chunk_sizes, vec![2, 2, 1]);
        let recipients: Vec<String> = results.into_iter().map(|r| r.recipient).collect();
        assert_eq!(recipients, tokens(5));
    }
}
