#![no_main]
use libfuzzer_sys::fuzz_target;
use rompatch::codec::vlq;

fuzz_target!(|data: &[u8]| {
    // Any value that decodes must re-encode to the bytes it was read from.
    if let Ok((value, used)) = vlq::read_u64(data) {
        let mut encoded = Vec::new();
        vlq::write_u64(&mut encoded, value);
        assert_eq!(&encoded[..], &data[..used]);
    }
    let _ = rompatch::engine::describe(data);
});
