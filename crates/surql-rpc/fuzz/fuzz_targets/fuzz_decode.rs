#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode or fail cleanly, never panic or overflow
    // the stack. Whatever decodes must encode again.
    if let Ok(decoded) = surql_rpc::codec::decode_with_warnings(data) {
        if decoded.value.is_finite() {
            let _ = surql_rpc::codec::encode(&decoded.value).expect("decoded value re-encodes");
        }
    }
});
