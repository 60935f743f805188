/// Calculate the Fletcher32 checksum.
///
/// # Arguments
/// * `bytes` - The byte slice to calculate checksum for
/// * `offset` - Initial offset into the byte slice
/// * `length` - The message length (if odd, 0 is appended)
///
/// # Returns
/// The 32-bit Fletcher32 checksum as u32
///
/// # Panics
/// Panics if offset + length exceeds the bounds of the byte slice
pub fn get_fletcher32(bytes: &[u8], offset: usize, length: usize) -> u32 {
    let (mut sum1, mut sum2) = (0xffff_u32, 0xffff_u32);
    let (mut i, len) = (offset, offset + (length & !1));

    // Ensure we don't go out of bounds
    assert!(len <= bytes.len(), "offset + length exceeds byte slice bounds");

    while i < len {
        // reduce after 360 words (each word is two bytes)
        let end = std::cmp::min(i + 720, len);
        while i < end {
            let x = ((bytes[i] as u32) << 8) | (bytes[i + 1] as u32);
            i += 2;
            sum1 += x;
            sum2 += sum1;
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    // Handle odd length: append 0
    if (length & 1) != 0 {
        assert!(i < bytes.len(), "odd length handling: index out of bounds");
        let x = (bytes[i] as u32) << 8;
        sum1 += x;
        sum2 += sum1;
    }

    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);

    (sum2 << 16) | sum1
}

/// Parses a `key:value,key2:value2` text map, the format used by the store
/// header and by every layout/meta map entry. Commas inside values are not
/// supported (none of the values the engine writes ever contain one).
pub fn parse_map(text: &str) -> std::collections::HashMap<String, String> {
    let text = text.split('\n').next().unwrap_or(text);
    text.split(',')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| entry.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Renders a text map back into `key:value,...` form, key order preserved as
/// given (callers pass already-sorted pairs where ordering matters).
pub fn format_map(entries: &[(&str, String)]) -> String {
    entries
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod map_tests {
    use super::*;

    #[test]
    fn parse_and_format_roundtrip() {
        let rendered = format_map(&[("a", "1".to_string()), ("b", "ff".to_string())]);
        assert_eq!(rendered, "a:1,b:ff");
        let parsed = parse_map(&rendered);
        assert_eq!(parsed.get("a").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("b").map(String::as_str), Some("ff"));
    }

    #[test]
    fn parse_ignores_trailing_newline() {
        let parsed = parse_map("h:2,block:4096\n");
        assert_eq!(parsed.get("h").map(String::as_str), Some("2"));
    }
}
