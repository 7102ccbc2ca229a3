use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use tokio::sync::Notify;
use tracing::error;

/// Maximum number of chunks queued before the queue is dumped
pub const QUEUE_MAX_CHUNKS: usize = 2048;

/// Result of pushing a chunk into a [`ChunkQueue`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The chunk was queued
    Queued,
    /// The queue was full; its contents and the new chunk were discarded
    Flushed { dropped: usize },
}

/// Bounded queue of audio chunks between a satellite and its pipeline
///
/// Producers never block. A consumer that finds the queue empty waits until
/// the next push.
pub struct ChunkQueue {
    buffer: Mutex<HeapRb<Vec<u8>>>,
    notify: Notify,
}

impl ChunkQueue {
    /// Create a new queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(HeapRb::new(capacity.max(1))),
            notify: Notify::new(),
        }
    }

    /// Enqueue a chunk, or clear the queue if it's full
    pub fn push(&self, chunk: Vec<u8>) -> PushOutcome {
        let mut buffer = self.buffer.lock();
        if buffer.try_push(chunk).is_ok() {
            drop(buffer);
            self.notify.notify_one();
            return PushOutcome::Queued;
        }

        error!("Chunk queue full, dumping contents");
        let dropped = buffer.occupied_len() + 1;
        buffer.clear();
        PushOutcome::Flushed { dropped }
    }

    /// Pop a chunk without waiting
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.buffer.lock().try_pop()
    }

    /// Wait for the next chunk
    pub async fn pop(&self) -> Vec<u8> {
        loop {
            if let Some(chunk) = self.try_pop() {
                return chunk;
            }
            self.notify.notified().await;
        }
    }

    /// Get the number of chunks waiting
    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Drop everything queued
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    /// Get the capacity of the queue
    pub fn capacity(&self) -> usize {
        self.buffer.lock().capacity().get()
    }
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new(QUEUE_MAX_CHUNKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_push_pop_in_order() {
        let queue = ChunkQueue::new(8);
        assert_eq!(queue.push(vec![1]), PushOutcome::Queued);
        assert_eq!(queue.push(vec![2]), PushOutcome::Queued);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(vec![1]));
        assert_eq!(queue.try_pop(), Some(vec![2]));
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_dumps_contents() {
        let queue = ChunkQueue::new(3);
        for i in 0..3u8 {
            assert_eq!(queue.push(vec![i]), PushOutcome::Queued);
        }

        assert_eq!(queue.push(vec![9]), PushOutcome::Flushed { dropped: 4 });
        assert!(queue.is_empty());

        // The queue is usable again afterwards
        assert_eq!(queue.push(vec![10]), PushOutcome::Queued);
        assert_eq!(queue.try_pop(), Some(vec![10]));
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(ChunkQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(vec![7, 7]);

        let chunk = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer not woken")
            .unwrap();
        assert_eq!(chunk, vec![7, 7]);
    }
}
