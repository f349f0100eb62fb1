use std::sync::Arc;

use edgesam_core::Tensor;

use crate::Size;

/// Dense embedding of one image, tagged with the image size it was computed for.
#[derive(Clone, Debug)]
pub struct Embedding {
    pub tensor: Tensor,
    pub image_size: Size,
    pub generation: u64,
}

/// Holds at most one embedding. Entries are immutable snapshots; a new image
/// replaces the whole entry, so a reader either sees the old embedding or the
/// new one.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    current: Option<Arc<Embedding>>,
    generation: u64,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<Arc<Embedding>> {
        self.current.clone()
    }

    /// Number of embeddings stored so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn replace(&mut self, tensor: Tensor, image_size: Size) -> Arc<Embedding> {
        self.generation += 1;
        let embedding = Arc::new(Embedding {
            tensor,
            image_size,
            generation: self.generation,
        });
        self.current = Some(embedding.clone());
        embedding
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
