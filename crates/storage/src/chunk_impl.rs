use crate::chunk::{Chunk, UNSET};
use crate::data_util::{format_map, parse_map};
use crate::error::StorageError;

impl Chunk {
    /// Renders the `"chunk.<hex-id>" -> <metadata-string>` value stored in
    /// the layout map: a plain `key:hexvalue,...` text line.
    pub fn to_metadata_string(&self) -> String {
        let occupancy_hex = hex_encode(self.occupancy.as_raw_slice());
        format_map(&[
            ("version", format!("{:x}", self.version)),
            ("time", format!("{:x}", self.time)),
            ("block", format!("{:x}", self.block)),
            ("len", format!("{:x}", self.len)),
            ("pageCount", format!("{:x}", self.page_count)),
            ("pageCountLive", format!("{:x}", self.page_count_live)),
            ("maxLen", format!("{:x}", self.max_len)),
            ("maxLenLive", format!("{:x}", self.max_len_live)),
            ("occupancy", occupancy_hex),
            ("layoutRoot", format!("{:x}", self.layout_root_pos)),
            ("tocPos", format!("{:x}", self.toc_pos)),
            ("mapId", format!("{:x}", self.map_id)),
            ("next", format!("{:x}", self.next)),
            ("unused", format!("{:x}", self.unused)),
            ("unusedAtVersion", format!("{:x}", self.unused_at_version)),
        ])
    }

    pub fn from_metadata_string(id: u32, text: &str) -> Result<Chunk, StorageError> {
        let map = parse_map(text);
        let get_u64 = |key: &str| -> Result<u64, StorageError> {
            let raw = map
                .get(key)
                .ok_or_else(|| StorageError::FileCorrupt(format!("chunk metadata missing {key}")))?;
            u64::from_str_radix(raw, 16)
                .map_err(|e| StorageError::FileCorrupt(format!("bad {key}: {e}")))
        };
        let get_u32 = |key: &str| -> Result<u32, StorageError> { get_u64(key).map(|v| v as u32) };

        let occupancy_hex = map
            .get("occupancy")
            .ok_or_else(|| StorageError::FileCorrupt("chunk metadata missing occupancy".into()))?;
        let occupancy_bytes = hex_decode(occupancy_hex)
            .map_err(|e| StorageError::FileCorrupt(format!("bad occupancy: {e}")))?;

        let page_count = get_u32("pageCount")?;
        let mut occupancy = bitvec::vec::BitVec::from_vec(occupancy_bytes);
        occupancy.resize(page_count as usize, false);

        Ok(Chunk {
            id,
            version: get_u64("version")?,
            time: get_u64("time")?,
            block: get_u64("block")?,
            len: get_u64("len")?,
            page_count,
            page_count_live: get_u32("pageCountLive")?,
            max_len: get_u64("maxLen")?,
            max_len_live: get_u64("maxLenLive")?,
            occupancy,
            layout_root_pos: get_u64("layoutRoot")?,
            toc_pos: get_u32("tocPos")?,
            map_id: get_u32("mapId")?,
            next: get_u64("next")?,
            unused: get_u64("unused")?,
            unused_at_version: get_u64("unusedAtVersion").unwrap_or(UNSET),
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(text: &str) -> Result<Vec<u8>, String> {
    if text.len() % 2 != 0 {
        return Err("odd length hex string".to_string());
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_string_roundtrips() {
        let mut c = Chunk::new(7, 3, 1_000);
        c.block = 2;
        c.len = 4;
        c.page_count = 3;
        c.page_count_live = 2;
        c.max_len = 300;
        c.max_len_live = 200;
        c.occupancy = bitvec::bitvec![u8, bitvec::order::Lsb0; 0, 1, 0];
        c.layout_root_pos = 0xdead;
        c.toc_pos = 99;
        c.map_id = 5;
        c.next = 11;

        let text = c.to_metadata_string();
        let restored = Chunk::from_metadata_string(7, &text).unwrap();
        assert_eq!(restored.version, c.version);
        assert_eq!(restored.block, c.block);
        assert_eq!(restored.page_count_live, c.page_count_live);
        assert_eq!(restored.occupancy, c.occupancy);
        assert_eq!(restored.layout_root_pos, c.layout_root_pos);
    }
}
