//! # llama-kv
//!
//! KV cache backing a decode context's memory.
//!
//! Supports:
//! - **Per-layer storage**: [`LayerKVCache`] holds K/V rows `[n_ctx, n_heads, head_dim]`
//! - **Synchronized positions**: [`SessionKVCache`] owns the single `seq_len`
//!   shared by every layer, so layers can never drift apart
//! - **Staged writes**: each layer writes its row for the pending position,
//!   then [`SessionKVCache::advance`] commits the position for all layers
//! - **Memory tracking**: byte accounting for allocated and active memory

/// Error type for KV cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KVError {
    #[error("KV cache capacity exceeded: {seq_len} > {max}")]
    CapacityExceeded { seq_len: usize, max: usize },

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("Layer index {index} out of range ({n_layers} layers)")]
    LayerOutOfRange { index: usize, n_layers: usize },
}

pub type KVResult<T> = Result<T, KVError>;

/// Single transformer layer's K and V storage.
///
/// # Invariants
/// - K and V buffers are always the same size: `capacity * n_heads * head_dim`
#[derive(Debug, Clone)]
pub struct LayerKVCache {
    k: Vec<f32>,
    v: Vec<f32>,
    capacity: usize,
    n_heads: usize,
    head_dim: usize,
}

impl LayerKVCache {
    /// Allocate storage for `capacity` positions.
    pub fn new(capacity: usize, n_heads: usize, head_dim: usize) -> Self {
        let buf_len = capacity * n_heads * head_dim;
        Self {
            k: vec![0.0; buf_len],
            v: vec![0.0; buf_len],
            capacity,
            n_heads,
            head_dim,
        }
    }

    /// Width of one position row (`n_heads * head_dim`).
    pub fn row_len(&self) -> usize {
        self.n_heads * self.head_dim
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write K and V rows for position `pos`.
    ///
    /// # Errors
    /// - `CapacityExceeded`: `pos` is outside the allocated capacity
    /// - `ShapeMismatch`: a row does not have `n_heads * head_dim` elements
    pub fn write(&mut self, pos: usize, k_row: &[f32], v_row: &[f32]) -> KVResult<()> {
        let row = self.row_len();
        if k_row.len() != row || v_row.len() != row {
            let got = if k_row.len() != row {
                k_row.len()
            } else {
                v_row.len()
            };
            return Err(KVError::ShapeMismatch { expected: row, got });
        }
        if pos >= self.capacity {
            return Err(KVError::CapacityExceeded {
                seq_len: pos + 1,
                max: self.capacity,
            });
        }

        let offset = pos * row;
        self.k[offset..offset + row].copy_from_slice(k_row);
        self.v[offset..offset + row].copy_from_slice(v_row);
        Ok(())
    }

    /// K rows for positions `0..len`, flattened.
    pub fn keys(&self, len: usize) -> &[f32] {
        &self.k[..len.min(self.capacity) * self.row_len()]
    }

    /// V rows for positions `0..len`, flattened.
    pub fn values(&self, len: usize) -> &[f32] {
        &self.v[..len.min(self.capacity) * self.row_len()]
    }

    /// Total memory allocated for K and V (in bytes).
    pub fn memory_bytes(&self) -> usize {
        (self.k.len() + self.v.len()) * std::mem::size_of::<f32>()
    }
}

/// Multi-layer KV cache with a single, shared position counter.
#[derive(Debug, Clone)]
pub struct SessionKVCache {
    layers: Vec<LayerKVCache>,
    seq_len: usize,
}

impl SessionKVCache {
    /// Create a cache for `n_layers` layers of `capacity` positions each.
    pub fn new(n_layers: usize, capacity: usize, n_heads: usize, head_dim: usize) -> Self {
        let layers = (0..n_layers)
            .map(|_| LayerKVCache::new(capacity, n_heads, head_dim))
            .collect();
        Self { layers, seq_len: 0 }
    }

    /// Number of committed positions.
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Positions each layer can hold.
    pub fn capacity(&self) -> usize {
        self.layers.first().map_or(0, |l| l.capacity())
    }

    pub fn remaining(&self) -> usize {
        self.capacity().saturating_sub(self.seq_len)
    }

    pub fn layer(&self, index: usize) -> Option<&LayerKVCache> {
        self.layers.get(index)
    }

    /// Write K/V rows of layer `index` for the pending position (`seq_len`).
    ///
    /// The position only becomes visible to [`SessionKVCache::seq_len`] after
    /// [`SessionKVCache::advance`].
    pub fn write_pending(&mut self, index: usize, k_row: &[f32], v_row: &[f32]) -> KVResult<()> {
        let n_layers = self.layers.len();
        let pos = self.seq_len;
        let layer = self
            .layers
            .get_mut(index)
            .ok_or(KVError::LayerOutOfRange { index, n_layers })?;
        layer.write(pos, k_row, v_row)
    }

    /// Commit the pending position for every layer.
    pub fn advance(&mut self) -> KVResult<()> {
        if self.seq_len >= self.capacity() {
            return Err(KVError::CapacityExceeded {
                seq_len: self.seq_len + 1,
                max: self.capacity(),
            });
        }
        self.seq_len += 1;
        Ok(())
    }

    /// Drop committed positions beyond `len`.
    pub fn truncate(&mut self, len: usize) {
        self.seq_len = self.seq_len.min(len);
    }

    /// Forget every position. Buffers stay allocated.
    pub fn clear(&mut self) {
        self.seq_len = 0;
    }

    /// Total memory across all layers.
    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.memory_bytes()).sum()
    }

    /// Memory covered by committed positions across all layers.
    pub fn active_memory_bytes(&self) -> usize {
        self.layers
            .iter()
            .map(|l| self.seq_len * l.row_len() * 2 * std::mem::size_of::<f32>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_write_and_read_back() {
        let mut cache = LayerKVCache::new(4, 2, 2);
        cache.write(0, &[1.0; 4], &[2.0; 4]).unwrap();
        cache.write(1, &[3.0; 4], &[4.0; 4]).unwrap();

        assert_eq!(cache.keys(2), &[1.0, 1.0, 1.0, 1.0, 3.0, 3.0, 3.0, 3.0]);
        assert_eq!(cache.values(1), &[2.0; 4]);
    }

    #[test]
    fn layer_write_out_of_capacity() {
        let mut cache = LayerKVCache::new(2, 1, 2);
        let err = cache.write(2, &[0.0; 2], &[0.0; 2]).unwrap_err();
        assert_eq!(err, KVError::CapacityExceeded { seq_len: 3, max: 2 });
    }

    #[test]
    fn layer_shape_mismatch() {
        let mut cache = LayerKVCache::new(2, 2, 4);
        let err = cache.write(0, &[0.0; 8], &[0.0; 7]).unwrap_err();
        assert_eq!(err, KVError::ShapeMismatch { expected: 8, got: 7 });
    }

    #[test]
    fn layer_memory_bytes_calculation() {
        let cache = LayerKVCache::new(10, 2, 4);
        // K and V each have 10 * 2 * 4 = 80 f32s
        assert_eq!(cache.memory_bytes(), 2 * 80 * std::mem::size_of::<f32>());
    }

    #[test]
    fn session_pending_write_then_advance() {
        let mut session = SessionKVCache::new(3, 8, 1, 2);
        for layer in 0..3 {
            session.write_pending(layer, &[0.5; 2], &[0.5; 2]).unwrap();
        }
        assert_eq!(session.seq_len(), 0);
        session.advance().unwrap();
        assert_eq!(session.seq_len(), 1);
        assert_eq!(session.remaining(), 7);
    }

    #[test]
    fn session_advance_past_capacity() {
        let mut session = SessionKVCache::new(1, 1, 1, 2);
        session.advance().unwrap();
        assert!(matches!(
            session.advance(),
            Err(KVError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn session_layer_out_of_range() {
        let mut session = SessionKVCache::new(2, 4, 1, 2);
        let err = session.write_pending(5, &[0.0; 2], &[0.0; 2]).unwrap_err();
        assert_eq!(err, KVError::LayerOutOfRange { index: 5, n_layers: 2 });
    }

    #[test]
    fn session_clear_and_truncate() {
        let mut session = SessionKVCache::new(1, 8, 1, 2);
        for _ in 0..5 {
            session.advance().unwrap();
        }
        session.truncate(3);
        assert_eq!(session.seq_len(), 3);
        session.truncate(10);
        assert_eq!(session.seq_len(), 3);
        session.clear();
        assert_eq!(session.seq_len(), 0);
        assert_eq!(session.active_memory_bytes(), 0);
    }
}
