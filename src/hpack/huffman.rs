//! Huffman coding for HPACK string literals (RFC 7541 Appendix B).

/// Huffman decoding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HuffmanError {
    /// Bit sequence does not decode to any symbol.
    #[error("invalid Huffman code")]
    InvalidCode,
    /// Trailing padding is not a most-significant-bit prefix of EOS.
    #[error("invalid Huffman padding")]
    InvalidPadding,
    /// The EOS symbol appeared inside the encoded body.
    #[error("unexpected EOS symbol in Huffman data")]
    UnexpectedEos,
}

/// Code table from RFC 7541 Appendix B: `(code, bit_length)` per symbol.
/// Symbol 256 is the EOS marker.
#[rustfmt::skip]
const CODES: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

/// Number of bytes `data` occupies once Huffman encoded.
pub fn encoded_len(data: &[u8]) -> usize {
    let bits: usize = data.iter().map(|&b| CODES[b as usize].1 as usize).sum();
    bits.div_ceil(8)
}

/// Huffman-encode `data`, appending to `dst`.
///
/// The final partial byte is padded with the most significant bits of the
/// EOS code (all ones), as required by RFC 7541 Section 5.2.
pub fn encode(data: &[u8], dst: &mut Vec<u8>) {
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        let (code, code_bits) = CODES[byte as usize];
        acc = (acc << code_bits) | u64::from(code);
        bits += u32::from(code_bits);

        while bits >= 8 {
            bits -= 8;
            dst.push((acc >> bits) as u8);
            acc &= (1u64 << bits) - 1;
        }
    }

    if bits > 0 {
        let padding = 8 - bits;
        acc = (acc << padding) | ((1u64 << padding) - 1);
        dst.push(acc as u8);
    }
}

/// Decode Huffman-encoded `data`, appending the raw bytes to `dst`.
pub fn decode(data: &[u8], dst: &mut Vec<u8>) -> Result<(), HuffmanError> {
    let mut code: u32 = 0;
    let mut len: u8 = 0;

    for &byte in data {
        for bit in (0..8).rev() {
            code = (code << 1) | u32::from((byte >> bit) & 1);
            len += 1;

            if let Some(symbol) = lookup(code, len) {
                if symbol == 256 {
                    return Err(HuffmanError::UnexpectedEos);
                }
                dst.push(symbol as u8);
                code = 0;
                len = 0;
            } else if len >= 30 {
                return Err(HuffmanError::InvalidCode);
            }
        }
    }

    // Leftover bits must be a prefix of EOS: all ones, at most 7 of them
    if len > 7 {
        return Err(HuffmanError::InvalidPadding);
    }
    if len > 0 && code != (1u32 << len) - 1 {
        return Err(HuffmanError::InvalidPadding);
    }

    Ok(())
}

/// Find the symbol for an exact `(code, length)` pair.
///
/// The code set is prefix-free, so matching at the shortest length that
/// fits is unambiguous.
fn lookup(code: u32, len: u8) -> Option<u16> {
    // No code is shorter than 5 bits
    if len < 5 {
        return None;
    }
    CODES
        .iter()
        .position(|&(c, l)| l == len && c == code)
        .map(|sym| sym as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();
        encode(data, &mut encoded);
        assert_eq!(encoded.len(), encoded_len(data));

        let mut decoded = Vec::new();
        decode(&encoded, &mut decoded).unwrap();
        decoded
    }

    #[test]
    fn test_rfc7541_appendix_c_vectors() {
        // www.example.com (RFC 7541 C.4.1)
        let mut encoded = Vec::new();
        encode(b"www.example.com", &mut encoded);
        assert_eq!(
            encoded,
            [0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]
        );

        // no-cache (RFC 7541 C.4.2)
        let mut encoded = Vec::new();
        encode(b"no-cache", &mut encoded);
        assert_eq!(encoded, [0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf]);

        // custom-key / custom-value (RFC 7541 C.4.3)
        let mut encoded = Vec::new();
        encode(b"custom-key", &mut encoded);
        assert_eq!(encoded, [0x25, 0xa8, 0x49, 0xe9, 0x5b, 0xa9, 0x7d, 0x7f]);

        let mut encoded = Vec::new();
        encode(b"custom-value", &mut encoded);
        assert_eq!(
            encoded,
            [0x25, 0xa8, 0x49, 0xe9, 0x5b, 0xb8, 0xe8, 0xb4, 0xbf]
        );
    }

    #[test]
    fn test_decode_rfc7541_vector() {
        let mut decoded = Vec::new();
        decode(
            &[0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff],
            &mut decoded,
        )
        .unwrap();
        assert_eq!(decoded, b"www.example.com");
    }

    #[test]
    fn test_roundtrip_ascii() {
        assert_eq!(roundtrip(b"hello world"), b"hello world");
        assert_eq!(roundtrip(b"GET /index.html HTTP/2"), b"GET /index.html HTTP/2");
        assert_eq!(roundtrip(b""), b"");
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn test_encoded_len_empty() {
        assert_eq!(encoded_len(b""), 0);
    }

    #[test]
    fn test_encoded_len_shrinks_common_text() {
        // Lowercase text uses 5-7 bit codes, so it compresses
        assert!(encoded_len(b"accept-encoding") < b"accept-encoding".len());
    }

    #[test]
    fn test_decode_bad_padding() {
        // 'a' is 00011 (5 bits); padding the byte with zeros is invalid
        let mut dst = Vec::new();
        let err = decode(&[0b0001_1000], &mut dst).unwrap_err();
        assert_eq!(err, HuffmanError::InvalidPadding);
    }

    #[test]
    fn test_decode_valid_padding() {
        // 'a' (00011) followed by three 1-bits of EOS padding
        let mut dst = Vec::new();
        decode(&[0b0001_1111], &mut dst).unwrap();
        assert_eq!(dst, b"a");
    }

    #[test]
    fn test_decode_eos_in_body() {
        // The 30-bit EOS code followed by 2 padding bits
        let mut dst = Vec::new();
        let err = decode(&[0xff, 0xff, 0xff, 0xff], &mut dst).unwrap_err();
        assert_eq!(err, HuffmanError::UnexpectedEos);
    }
}
