//! Partition selection for produced records.

/// Picks the partition a record is written to.
///
/// Keyed writers hash the key with 32 bit FNV-1a, so records sharing a key
/// land on the same partition and keep their relative order. Records without
/// a key, and every record of an unkeyed writer, are spread round robin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partitioner {
    keyed: bool,
    next: usize,
}

impl Partitioner {
    pub fn new(keyed: bool) -> Self {
        Self { keyed, next: 0 }
    }

    /// Choose one of `partitions` for a record with `key`. `None` when the
    /// topic has no partitions.
    pub fn partition(&mut self, key: &[u8], partitions: &[i32]) -> Option<i32> {
        if partitions.is_empty() {
            return None;
        }

        if self.keyed && !key.is_empty() {
            let index = (fnv1a(key) & 0x7fff_ffff) as usize % partitions.len();
            return Some(partitions[index]);
        }

        let index = self.next % partitions.len();
        self.next = self.next.wrapping_add(1);
        Some(partitions[index])
    }
}

/// 32 bit FNV-1a.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
    })
}
