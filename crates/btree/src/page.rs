use bytes::{Buf, BufMut, BytesMut};

use crate::pos::{encode_length_code, PagePos};

/// A page's table-of-contents descriptor as recorded by the chunk that holds
/// it: which map it belongs to, where it starts, its coarse length bucket,
/// and whether it is a leaf. The store keeps an array of these per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub map_id: u32,
    pub offset: u32,
    pub length_code: u8,
    pub is_leaf: bool,
}

impl TocEntry {
    pub const ENCODED_LEN: usize = 4 + 4 + 1 + 1;

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.map_id);
        buf.put_u32_le(self.offset);
        buf.put_u8(self.length_code);
        buf.put_u8(self.is_leaf as u8);
    }

    pub fn read_from(buf: &mut &[u8]) -> Self {
        let map_id = buf.get_u32_le();
        let offset = buf.get_u32_le();
        let length_code = buf.get_u8();
        let is_leaf = buf.get_u8() != 0;
        TocEntry {
            map_id,
            offset,
            length_code,
            is_leaf,
        }
    }
}

/// A page is either a leaf (keys + values) or an interior node (keys +
/// child positions). Interior pages are never produced by [`crate::Map`]
/// today (it keeps each version's whole map in one leaf), but the variant
/// and its serialization are kept so the engine's two-pass rewrite
/// (leaves, then interior nodes) has something real to operate on.
#[derive(Debug, Clone)]
pub enum PageKind {
    Leaf { values: Vec<Vec<u8>> },
    Internal { children: Vec<PagePos>, total_count: u64 },
}

/// An immutable, copy-on-write node. Identified by its [`PagePos`] once
/// written; never mutated afterwards — any change produces a new `Page`.
#[derive(Debug, Clone)]
pub struct Page {
    pub map_id: u32,
    pub keys: Vec<Vec<u8>>,
    pub kind: PageKind,
}

impl Page {
    pub fn new_leaf(map_id: u32, keys: Vec<Vec<u8>>, values: Vec<Vec<u8>>) -> Self {
        assert_eq!(keys.len(), values.len());
        Page {
            map_id,
            keys,
            kind: PageKind::Leaf { values },
        }
    }

    pub fn new_internal(
        map_id: u32,
        keys: Vec<Vec<u8>>,
        children: Vec<PagePos>,
        total_count: u64,
    ) -> Self {
        Page {
            map_id,
            keys,
            kind: PageKind::Internal {
                children,
                total_count,
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, PageKind::Leaf { .. })
    }

    pub fn total_count(&self) -> u64 {
        match &self.kind {
            PageKind::Leaf { values } => values.len() as u64,
            PageKind::Internal { total_count, .. } => *total_count,
        }
    }

    /// Rough in-memory footprint, used for the store's unsaved-memory
    /// estimate and cache accounting.
    pub fn memory_estimate(&self) -> u32 {
        let key_bytes: usize = self.keys.iter().map(|k| k.len() + 16).sum();
        let payload = match &self.kind {
            PageKind::Leaf { values } => values.iter().map(|v| v.len() + 16).sum(),
            PageKind::Internal { children, .. } => children.len() * 8,
        };
        (key_bytes + payload + 48) as u32
    }

    /// Appends this page's encoded form to `buf` and returns the
    /// table-of-contents entry the caller (the chunk serializer) should
    /// record for it.
    pub fn write_into(&self, buf: &mut BytesMut) -> TocEntry {
        let offset = buf.len() as u32;
        let start = buf.len();

        buf.put_u8(self.is_leaf() as u8);
        buf.put_u32_le(self.keys.len() as u32);
        for key in &self.keys {
            buf.put_u32_le(key.len() as u32);
            buf.extend_from_slice(key);
        }
        match &self.kind {
            PageKind::Leaf { values } => {
                for value in values {
                    buf.put_u32_le(value.len() as u32);
                    buf.extend_from_slice(value);
                }
            }
            PageKind::Internal {
                children,
                total_count,
            } => {
                buf.put_u64_le(*total_count);
                for child in children {
                    buf.put_u64_le(child.raw());
                }
            }
        }

        let len = (buf.len() - start) as u32;
        TocEntry {
            map_id: self.map_id,
            offset,
            length_code: encode_length_code(len),
            is_leaf: self.is_leaf(),
        }
    }

    /// Reconstructs a page from the byte range a [`TocEntry`] points at.
    pub fn read_from(map_id: u32, mut bytes: &[u8]) -> Self {
        let is_leaf = bytes.get_u8() != 0;
        let key_count = bytes.get_u32_le() as usize;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let len = bytes.get_u32_le() as usize;
            keys.push(bytes[..len].to_vec());
            bytes.advance(len);
        }

        let kind = if is_leaf {
            let mut values = Vec::with_capacity(key_count);
            for _ in 0..key_count {
                let len = bytes.get_u32_le() as usize;
                values.push(bytes[..len].to_vec());
                bytes.advance(len);
            }
            PageKind::Leaf { values }
        } else {
            let total_count = bytes.get_u64_le();
            let mut children = Vec::with_capacity(key_count + 1);
            while bytes.remaining() >= 8 {
                children.push(PagePos::from_raw(bytes.get_u64_le()));
            }
            PageKind::Internal {
                children,
                total_count,
            }
        };

        Page { map_id, keys, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrips() {
        let page = Page::new_leaf(
            7,
            vec![b"a".to_vec(), b"b".to_vec()],
            vec![b"1".to_vec(), b"2".to_vec()],
        );
        let mut buf = BytesMut::new();
        let entry = page.write_into(&mut buf);
        assert_eq!(entry.map_id, 7);
        assert!(entry.is_leaf);

        let restored = Page::read_from(7, &buf[entry.offset as usize..]);
        assert_eq!(restored.keys, page.keys);
        assert!(restored.is_leaf());
        match restored.kind {
            PageKind::Leaf { values } => assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]),
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn internal_roundtrips() {
        let children = vec![PagePos::new(1, 0, 4, true), PagePos::new(1, 1, 4, true)];
        let page = Page::new_internal(3, vec![b"m".to_vec()], children.clone(), 42);
        let mut buf = BytesMut::new();
        let entry = page.write_into(&mut buf);
        assert!(!entry.is_leaf);

        let restored = Page::read_from(3, &buf[entry.offset as usize..]);
        match restored.kind {
            PageKind::Internal {
                children: restored_children,
                total_count,
            } => {
                assert_eq!(restored_children, children);
                assert_eq!(total_count, 42);
            }
            _ => panic!("expected internal"),
        }
    }

    #[test]
    fn multiple_pages_share_a_buffer() {
        let a = Page::new_leaf(1, vec![b"k".to_vec()], vec![b"v".to_vec()]);
        let b = Page::new_leaf(1, vec![b"k2".to_vec()], vec![b"v2".to_vec()]);
        let mut buf = BytesMut::new();
        let entry_a = a.write_into(&mut buf);
        let entry_b = b.write_into(&mut buf);
        assert!(entry_b.offset > entry_a.offset);

        let restored_a = Page::read_from(1, &buf[entry_a.offset as usize..entry_b.offset as usize]);
        assert_eq!(restored_a.keys, a.keys);
    }
}
