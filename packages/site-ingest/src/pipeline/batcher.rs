//! Cap-bounded embedding batches.
//!
//! A batch closes when the next item would break one of three caps,
//! checked in a fixed order: item count, raw content bytes, then estimated
//! embedding bytes. An item that breaks a cap on its own is sent alone.

use crate::types::context::{BatchBudget, EmbeddingModelSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_items: usize,
    pub max_content_bytes: usize,
    pub max_embedding_bytes: usize,
    pub bytes_per_embedding: usize,
}

impl BatchLimits {
    pub fn new(budget: &BatchBudget, model: &EmbeddingModelSpec) -> Self {
        Self {
            max_items: budget.batch_size.max(1),
            max_content_bytes: budget.max_batch_content_bytes,
            max_embedding_bytes: budget.max_batch_embedding_bytes,
            bytes_per_embedding: model.bytes_per_embedding(),
        }
    }
}

/// Which cap stopped an item from joining a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cap {
    Items,
    ContentBytes,
    EmbeddingBytes,
}

/// One chunk waiting to be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    /// Index of the owning page in the preparer's slot table
    pub page: usize,
    /// Position of the chunk within its page
    pub index: usize,
    pub text: String,
    /// Already failed once
    pub retried: bool,
}

#[derive(Debug)]
pub struct BatchPlanner {
    limits: BatchLimits,
    current: Vec<PendingChunk>,
    content_bytes: usize,
}

impl BatchPlanner {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            current: Vec::new(),
            content_bytes: 0,
        }
    }

    /// The first cap `chunk` would break if added to the open batch.
    pub fn blocking_cap(&self, chunk: &PendingChunk) -> Option<Cap> {
        let items = self.current.len() + 1;
        if items > self.limits.max_items {
            return Some(Cap::Items);
        }
        if self.content_bytes + chunk.text.len() > self.limits.max_content_bytes {
            return Some(Cap::ContentBytes);
        }
        if items.saturating_mul(self.limits.bytes_per_embedding) > self.limits.max_embedding_bytes {
            return Some(Cap::EmbeddingBytes);
        }
        None
    }

    /// Add a chunk. Returns the batch it closed, if any.
    pub fn push(&mut self, chunk: PendingChunk) -> Option<Vec<PendingChunk>> {
        let closed = match self.blocking_cap(&chunk) {
            Some(_) if !self.current.is_empty() => Some(self.take()),
            _ => None,
        };
        self.add(chunk);
        closed
    }

    /// Put chunks from a failed batch at the head of the open batch, using
    /// only the room the queued chunks leave. Returns the chunks that did
    /// not fit.
    pub fn seed_retries(&mut self, retries: Vec<PendingChunk>) -> Vec<PendingChunk> {
        let mut accepted = 0usize;
        let mut rejected = Vec::new();

        for chunk in retries {
            if self.current.is_empty() || self.blocking_cap(&chunk).is_none() {
                self.add(chunk);
                accepted += 1;
            } else {
                rejected.push(chunk);
            }
        }

        // Accepted retries were appended behind the queued chunks
        self.current.rotate_right(accepted);
        rejected
    }

    /// Drain the open batch, even if it is not full.
    pub fn take(&mut self) -> Vec<PendingChunk> {
        self.content_bytes = 0;
        std::mem::take(&mut self.current)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    fn add(&mut self, chunk: PendingChunk) {
        self.content_bytes += chunk.text.len();
        self.current.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(items: usize, content: usize, embedding: usize, per: usize) -> BatchLimits {
        BatchLimits {
            max_items: items,
            max_content_bytes: content,
            max_embedding_bytes: embedding,
            bytes_per_embedding: per,
        }
    }

    fn chunk(index: usize, text: &str) -> PendingChunk {
        PendingChunk {
            page: 0,
            index,
            text: text.to_string(),
            retried: false,
        }
    }

    #[test]
    fn closes_on_item_count() {
        let mut planner = BatchPlanner::new(limits(2, 1000, 1000, 1));
        assert!(planner.push(chunk(0, "a")).is_none());
        assert!(planner.push(chunk(1, "b")).is_none());
        let closed = planner.push(chunk(2, "c")).unwrap();
        assert_eq!(closed.len(), 2);
        assert_eq!(planner.len(), 1);
    }

    #[test]
    fn closes_on_content_bytes() {
        let mut planner = BatchPlanner::new(limits(100, 10, 1000, 1));
        assert!(planner.push(chunk(0, "12345678")).is_none());
        let closed = planner.push(chunk(1, "123")).unwrap();
        assert_eq!(closed.len(), 1);
    }

    #[test]
    fn closes_on_embedding_bytes() {
        let mut planner = BatchPlanner::new(limits(100, 1000, 8, 4));
        planner.push(chunk(0, "a"));
        planner.push(chunk(1, "b"));
        let closed = planner.push(chunk(2, "c")).unwrap();
        assert_eq!(closed.len(), 2);
    }

    #[test]
    fn item_cap_is_checked_before_byte_caps() {
        let mut planner = BatchPlanner::new(limits(1, 1, 1, 100));
        planner.push(chunk(0, "a"));
        assert_eq!(planner.blocking_cap(&chunk(1, "bb")), Some(Cap::Items));

        let mut planner = BatchPlanner::new(limits(10, 1, 1, 100));
        planner.push(chunk(0, "a"));
        assert_eq!(planner.blocking_cap(&chunk(1, "bb")), Some(Cap::ContentBytes));
    }

    #[test]
    fn oversized_chunk_travels_alone() {
        let mut planner = BatchPlanner::new(limits(10, 4, 1000, 1));
        planner.push(chunk(0, "ab"));
        let closed = planner.push(chunk(1, "way too large")).unwrap();
        assert_eq!(closed.len(), 1);
        let alone = planner.push(chunk(2, "cd")).unwrap();
        assert_eq!(alone, vec![chunk(1, "way too large")]);
    }

    #[test]
    fn retries_go_to_the_head_when_they_fit() {
        let mut planner = BatchPlanner::new(limits(3, 1000, 1000, 1));
        planner.push(chunk(5, "queued"));

        let mut retry = chunk(1, "retry");
        retry.retried = true;
        let rejected = planner.seed_retries(vec![retry.clone()]);

        assert!(rejected.is_empty());
        let batch = planner.take();
        assert_eq!(batch[0], retry);
        assert_eq!(batch[1].index, 5);
    }

    #[test]
    fn retries_beyond_caps_are_rejected() {
        let mut planner = BatchPlanner::new(limits(2, 1000, 1000, 1));
        let retries: Vec<PendingChunk> = (0..3)
            .map(|i| PendingChunk {
                retried: true,
                ..chunk(i, "r")
            })
            .collect();

        let rejected = planner.seed_retries(retries);

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 2);
        assert_eq!(planner.len(), 2);
    }

    #[test]
    fn queued_chunks_keep_their_room() {
        let mut planner = BatchPlanner::new(limits(2, 1000, 1000, 1));
        planner.push(chunk(9, "queued"));
        let retries: Vec<PendingChunk> = (0..2)
            .map(|i| PendingChunk {
                retried: true,
                ..chunk(i, "r")
            })
            .collect();

        let rejected = planner.seed_retries(retries);

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 1);
        let batch = planner.take();
        assert_eq!(batch.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 9]);
    }
}
