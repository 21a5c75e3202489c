#![no_main]

use bytes::BytesMut;
use http2_client::{Frame, FrameDecoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let decoder = FrameDecoder::new();
    let mut buf = BytesMut::from(data);

    // Decode frames until the data runs out or a parse error stops us
    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(frame)) => {
                let _ = frame.stream_id();

                if let Frame::Settings(f) = &frame {
                    for setting in &f.settings {
                        let _ = setting.id.to_u16();
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                // Malformed input must map to a code and scope, never panic
                let _ = e.error_code();
                let _ = e.scope();
                break;
            }
        }
    }
});
