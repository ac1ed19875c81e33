use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use xexec_core::OutputChunk;

/// Receives output chunks as the runner appends them
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn on_chunk(&self, chunk: &OutputChunk);
}

/// Discards everything
pub struct NullSink;

#[async_trait]
impl OutputSink for NullSink {
    async fn on_chunk(&self, _chunk: &OutputChunk) {}
}

/// Keeps every chunk in memory, in arrival order
#[derive(Clone, Default)]
pub struct CollectingSink {
    chunks: Arc<Mutex<Vec<OutputChunk>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn chunks(&self) -> Vec<OutputChunk> {
        self.chunks.lock().await.clone()
    }
}

#[async_trait]
impl OutputSink for CollectingSink {
    async fn on_chunk(&self, chunk: &OutputChunk) {
        self.chunks.lock().await.push(chunk.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xexec_core::ChunkSource;

    #[tokio::test]
    async fn test_collecting_sink_shares_chunks_between_clones() {
        let sink = CollectingSink::new();
        let clone = sink.clone();
        clone
            .on_chunk(&OutputChunk::new(ChunkSource::Stdout, "a"))
            .await;
        clone
            .on_chunk(&OutputChunk::new(ChunkSource::Stderr, "b"))
            .await;

        let chunks = sink.chunks().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "a");
        assert_eq!(chunks[1].source, ChunkSource::Stderr);
    }
}
