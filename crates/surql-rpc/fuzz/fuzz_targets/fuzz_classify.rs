#![no_main]

use libfuzzer_sys::fuzz_target;
use surql_rpc::protocol::Incoming;

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = surql_rpc::codec::decode_with_warnings(data) {
        let _ = Incoming::classify(value.value);
    }
});
