// ============================================================================
// TEXTURE POOL: recycle scratch textures to avoid allocation churn
// ============================================================================

use std::collections::HashMap;

use super::texture::Texture;

/// Key for pooled textures: (width, height).
type PoolKey = (u32, u32);

/// A pool of scratch textures keyed by dimensions.
///
/// Brush sample windows and blend buffers are requested at the same few sizes
/// over and over; handing back a recycled texture skips the allocation and the
/// zero fill of a fresh one.
#[derive(Debug)]
pub struct TexturePool {
    pool: HashMap<PoolKey, Vec<Texture>>,
    /// Maximum number of textures to keep per key.
    max_per_key: usize,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            pool: HashMap::new(),
            max_per_key: 4,
        }
    }

    /// A cleared texture of the given size, recycled when possible.
    pub fn acquire(&mut self, width: u32, height: u32) -> Texture {
        match self.pool.get_mut(&(width, height)).and_then(|v| v.pop()) {
            Some(mut tex) => {
                tex.clear(None);
                tex
            }
            None => Texture::new(width, height),
        }
    }

    /// Return a texture to the pool for future reuse.
    /// If the pool is full for this key, the texture is simply dropped.
    pub fn release(&mut self, texture: Texture) {
        let key: PoolKey = (texture.width(), texture.height());
        let entry = self.pool.entry(key).or_default();
        if entry.len() < self.max_per_key {
            entry.push(texture);
        }
    }

    pub fn clear(&mut self) {
        self.pool.clear();
    }

    /// Total number of textures currently in the pool.
    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(|v| v.len()).sum()
    }

    /// Approximate memory held by pooled textures (bytes).
    pub fn pooled_memory_bytes(&self) -> usize {
        self.pool
            .values()
            .flat_map(|v| v.iter())
            .map(Texture::memory_bytes)
            .sum()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
