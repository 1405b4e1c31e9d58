use std::cmp::Ordering;

/// Total order over fixed-size keys.
///
/// Whatever context the ordering needs (collation, column layout) lives in
/// the implementor, so closures capturing their state work directly.
pub trait KeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

impl<F> KeyComparator for F
where
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Plain `memcmp` order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteOrder;

impl KeyComparator for ByteOrder {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Keys holding a little-endian `u32` (row ids).
///
/// Keys must be exactly 4 bytes; the engine enforces this through its key
/// size.
#[derive(Debug, Clone, Copy, Default)]
pub struct LittleEndianU32;

impl KeyComparator for LittleEndianU32 {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        read_u32(a).cmp(&read_u32(b))
    }
}

/// Keys holding a little-endian `u64` (file positions).
///
/// Keys must be exactly 8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LittleEndianU64;

impl KeyComparator for LittleEndianU64 {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        read_u64(a).cmp(&read_u64(b))
    }
}

fn read_u32(key: &[u8]) -> u32 {
    debug_assert_eq!(key.len(), 4, "LittleEndianU32 takes 4-byte keys");
    let mut raw = [0u8; 4];
    let len = key.len().min(4);
    raw[..len].copy_from_slice(&key[..len]);
    u32::from_le_bytes(raw)
}

fn read_u64(key: &[u8]) -> u64 {
    debug_assert_eq!(key.len(), 8, "LittleEndianU64 takes 8-byte keys");
    let mut raw = [0u8; 8];
    let len = key.len().min(8);
    raw[..len].copy_from_slice(&key[..len]);
    u64::from_le_bytes(raw)
}
