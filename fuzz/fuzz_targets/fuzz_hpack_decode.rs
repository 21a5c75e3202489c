#![no_main]

use http2_client::{HpackDecoder, HpackEncoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = HpackDecoder::new();

    if let Ok(headers) = decoder.decode(data) {
        if headers.is_empty() {
            return;
        }

        // Whatever decoded cleanly must survive a re-encode round trip
        let mut encoder = HpackEncoder::new();
        let mut encoded = Vec::new();
        encoder.encode(&headers, &mut encoded);

        let mut decoder2 = HpackDecoder::new();
        if let Ok(decoded) = decoder2.decode(&encoded) {
            assert_eq!(headers.len(), decoded.len(), "roundtrip header count mismatch");
            for (orig, dec) in headers.iter().zip(decoded.iter()) {
                assert_eq!(orig.name, dec.name, "roundtrip name mismatch");
                assert_eq!(orig.value, dec.value, "roundtrip value mismatch");
            }
        }
    }
    // Parse errors are expected for malformed input
});
