//! Byte-plane transpose used by `+sh` compression.
//!
//! A buffer of `N` bytes is viewed as `N / k` items of `k` bytes each. The
//! shuffled form stores byte 0 of every item, then byte 1 of every item, and
//! so on, which puts the slowly-varying high bytes of neighbouring samples
//! next to each other.
//!
//! Trailing bytes that do not fill a whole item are copied through
//! unchanged, so both directions accept any length.

/// `shuffled[j * n + i] = data[i * k + j]` with `n = data.len() / k`.
pub fn shuffle(data: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 || data.len() < item_size {
        return data.to_vec();
    }
    let items = data.len() / item_size;
    let body  = items * item_size;
    let mut out = vec![0u8; data.len()];
    for (i, item) in data[..body].chunks_exact(item_size).enumerate() {
        for (j, &byte) in item.iter().enumerate() {
            out[j * items + i] = byte;
        }
    }
    out[body..].copy_from_slice(&data[body..]);
    out
}

/// Exact inverse of [`shuffle`]: `data[i * k + j] = shuffled[j * n + i]`.
pub fn unshuffle(data: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 || data.len() < item_size {
        return data.to_vec();
    }
    let items = data.len() / item_size;
    let body  = items * item_size;
    let mut out = vec![0u8; data.len()];
    for (j, plane) in data[..body].chunks_exact(items).enumerate() {
        for (i, &byte) in plane.iter().enumerate() {
            out[i * item_size + j] = byte;
        }
    }
    out[body..].copy_from_slice(&data[body..]);
    out
}
