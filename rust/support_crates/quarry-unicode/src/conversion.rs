const REPLACEMENT_CHAR_BYTES: [u8; 3] = [0xEF, 0xBF, 0xBD];

/// Appends the UTF-8 encoding of `input` to `target`.
///
/// With `LOSSY`, unpaired surrogates become U+FFFD; otherwise they fail with
/// `InvalidInput`.
pub fn utf16_to_utf8<const LOSSY: bool, I: Iterator<Item = u16>>(
    input: I,
    target: &mut Vec<u8>,
) -> std::io::Result<()> {
    let decoded_chars = std::char::decode_utf16(input);
    let mut dst = [0u8; 4];
    for ch in decoded_chars {
        match ch {
            Ok(ch) => target.extend(ch.encode_utf8(&mut dst).as_bytes()),
            Err(_) if LOSSY => target.extend(&REPLACEMENT_CHAR_BYTES),
            Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)),
        }
    }
    Ok(())
}

/// Replaces `target` with the lossy UTF-8 encoding of `input`.
pub fn utf16_to_utf8_into(input: &[u16], target: &mut Vec<u8>) {
    target.clear();
    // Lossy conversion cannot fail.
    let _ = utf16_to_utf8::<true, _>(input.iter().copied(), target);
}

/// Lossy conversion of UTF-16 code units to an owned string.
pub fn utf16_to_string(input: &[u16]) -> String {
    String::from_utf16_lossy(input)
}

/// Length of the longest common prefix of two byte strings.
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_to_utf8_strict_and_lossy() {
        let units: Vec<u16> = "héllo".encode_utf16().collect();
        let mut out = Vec::new();
        utf16_to_utf8::<false, _>(units.iter().copied(), &mut out).unwrap();
        assert_eq!(out, "héllo".as_bytes());

        let broken = [0x61u16, 0xD800, 0x62];
        let mut out = Vec::new();
        assert!(utf16_to_utf8::<false, _>(broken.iter().copied(), &mut out).is_err());
        out.clear();
        utf16_to_utf8::<true, _>(broken.iter().copied(), &mut out).unwrap();
        assert_eq!(out, "a\u{FFFD}b".as_bytes());
    }

    #[test]
    fn test_into_replaces_contents() {
        let mut out = b"stale".to_vec();
        utf16_to_utf8_into(&[0x6F, 0x6B], &mut out);
        assert_eq!(out, b"ok");
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len(b"apple", b"apply"), 4);
        assert_eq!(common_prefix_len(b"", b"abc"), 0);
        assert_eq!(common_prefix_len(b"same", b"same"), 4);
    }
}
