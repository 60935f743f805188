use crate::chunk::Chunk;
use crate::consts::{BLOCK_SIZE, FOOTER_LENGTH};
use crate::data_util::{format_map, get_fletcher32, parse_map};
use crate::error::StorageError;

/// The physical, never-rewritten header written at the start of a chunk: a
/// `MAX_HEADER_LENGTH`-bounded text map padded with spaces up to one block.
/// Describes the chunk as it was at write time (so it carries total counts,
/// never live counts — those live in the layout map instead, since a
/// written chunk's bytes are never mutated again).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: u32,
    pub version: u64,
    pub time: u64,
    pub block: u64,
    pub len: u64,
    pub page_count: u32,
    pub toc_pos: u32,
    pub max_len: u64,
    pub map_id: u32,
    pub layout_root_pos: u64,
    pub next: u64,
}

/// The text-map footer written at the end of a chunk, fletcher32-checksummed
/// over everything preceding the checksum field. Lets recovery detect a
/// chunk whose write was interrupted partway through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFooter {
    pub id: u32,
    pub version: u64,
    pub block: u64,
}

impl ChunkHeader {
    pub const MAGIC: &'static str = "KNCH";
    pub const LENGTH: usize = BLOCK_SIZE as usize;

    pub fn serialize(&self) -> Vec<u8> {
        let text = format_map(&[
            ("H", Self::MAGIC.to_string()),
            ("chunk", format!("{:x}", self.id)),
            ("version", format!("{:x}", self.version)),
            ("time", format!("{:x}", self.time)),
            ("block", format!("{:x}", self.block)),
            ("len", format!("{:x}", self.len)),
            ("pageCount", format!("{:x}", self.page_count)),
            ("tocPos", format!("{:x}", self.toc_pos)),
            ("maxLen", format!("{:x}", self.max_len)),
            ("mapId", format!("{:x}", self.map_id)),
            ("layoutRoot", format!("{:x}", self.layout_root_pos)),
            ("next", format!("{:x}", self.next)),
        ]);
        pad_block(text, Self::LENGTH)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::FileCorrupt(format!("chunk header not utf8: {e}")))?;
        let map = parse_map(text);
        if map.get("H").map(String::as_str) != Some(ChunkHeader::MAGIC) {
            return Err(StorageError::FileCorrupt("chunk header magic mismatch".into()));
        }
        let u = |key: &str| -> Result<u64, StorageError> {
            map.get(key)
                .ok_or_else(|| StorageError::FileCorrupt(format!("chunk header missing {key}")))
                .and_then(|v| {
                    u64::from_str_radix(v, 16)
                        .map_err(|e| StorageError::FileCorrupt(format!("bad {key}: {e}")))
                })
        };
        Ok(ChunkHeader {
            id: u("chunk")? as u32,
            version: u("version")?,
            time: u("time")?,
            block: u("block")?,
            len: u("len")?,
            page_count: u("pageCount")? as u32,
            toc_pos: u("tocPos")? as u32,
            max_len: u("maxLen")?,
            map_id: u("mapId")? as u32,
            layout_root_pos: u("layoutRoot")?,
            next: u("next")?,
        })
    }
}

impl ChunkFooter {
    pub const LENGTH: usize = FOOTER_LENGTH;

    pub fn serialize(&self) -> Vec<u8> {
        let body = format_map(&[
            ("chunk", format!("{:x}", self.id)),
            ("version", format!("{:x}", self.version)),
            ("block", format!("{:x}", self.block)),
        ]);
        let checksum = get_fletcher32(body.as_bytes(), 0, body.len());
        let text = format!("{body},fletcher:{checksum:x}");
        pad_block(text, Self::LENGTH)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::FileCorrupt(format!("chunk footer not utf8: {e}")))?;
        if !Self::verify(text) {
            return Err(StorageError::FileCorrupt("chunk footer checksum mismatch".into()));
        }
        let map = parse_map(text);
        let u = |key: &str| -> Result<u64, StorageError> {
            map.get(key)
                .ok_or_else(|| StorageError::FileCorrupt(format!("chunk footer missing {key}")))
                .and_then(|v| {
                    u64::from_str_radix(v, 16)
                        .map_err(|e| StorageError::FileCorrupt(format!("bad {key}: {e}")))
                })
        };
        Ok(ChunkFooter {
            id: u("chunk")? as u32,
            version: u("version")?,
            block: u("block")?,
        })
    }

    pub fn verify(text: &str) -> bool {
        let map = parse_map(text);
        let Some(stored) = map.get("fletcher").and_then(|v| u32::from_str_radix(v, 16).ok()) else {
            return false;
        };
        let Some(comma) = text.rfind(",fletcher:") else {
            return false;
        };
        let body = &text[..comma];
        get_fletcher32(body.as_bytes(), 0, body.len()) == stored
    }
}

fn pad_block(mut text: String, block_len: usize) -> Vec<u8> {
    text.push('\n');
    let mut bytes = text.into_bytes();
    assert!(bytes.len() <= block_len, "chunk header/footer overflowed its block");
    bytes.resize(block_len, b' ');
    bytes
}

impl Chunk {
    pub fn to_header(&self) -> ChunkHeader {
        ChunkHeader {
            id: self.id,
            version: self.version,
            time: self.time,
            block: self.block,
            len: self.len,
            page_count: self.page_count,
            toc_pos: self.toc_pos,
            max_len: self.max_len,
            map_id: self.map_id,
            layout_root_pos: self.layout_root_pos,
            next: self.next,
        }
    }

    pub fn to_footer(&self) -> ChunkFooter {
        ChunkFooter {
            id: self.id,
            version: self.version,
            block: self.block,
        }
    }

    pub fn from_header(header: ChunkHeader) -> Self {
        let mut chunk = Chunk::new(header.id, header.version, header.time);
        chunk.block = header.block;
        chunk.len = header.len;
        chunk.page_count = header.page_count;
        chunk.page_count_live = header.page_count;
        chunk.max_len = header.max_len;
        chunk.max_len_live = header.max_len;
        chunk.toc_pos = header.toc_pos;
        chunk.map_id = header.map_id;
        chunk.layout_root_pos = header.layout_root_pos;
        chunk.next = header.next;
        chunk.occupancy = bitvec::vec::BitVec::repeat(false, header.page_count as usize);
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips() {
        let mut c = Chunk::new(3, 9, 12345);
        c.block = 2;
        c.len = 3;
        c.page_count = 5;
        c.toc_pos = 1000;
        c.max_len = 4096;
        c.map_id = 2;
        c.layout_root_pos = 0xabc;
        c.next = 5;

        let bytes = c.to_header().serialize();
        assert_eq!(bytes.len(), ChunkHeader::LENGTH);
        let header = ChunkHeader::deserialize(&bytes).unwrap();
        assert_eq!(header, c.to_header());
    }

    #[test]
    fn footer_roundtrips_and_detects_corruption() {
        let c = {
            let mut c = Chunk::new(3, 9, 12345);
            c.block = 2;
            c
        };
        let mut bytes = c.to_footer().serialize();
        assert_eq!(bytes.len(), ChunkFooter::LENGTH);
        let footer = ChunkFooter::deserialize(&bytes).unwrap();
        assert_eq!(footer, c.to_footer());

        bytes[0] ^= 0xff;
        assert!(ChunkFooter::deserialize(&bytes).is_err());
    }

    #[test]
    fn from_header_starts_fully_live() {
        let mut c = Chunk::new(1, 1, 1);
        c.page_count = 4;
        c.max_len = 400;
        let header = c.to_header();
        let restored = Chunk::from_header(header);
        assert_eq!(restored.page_count_live, 4);
        assert_eq!(restored.max_len_live, 400);
        assert!(restored.is_live());
    }
}
