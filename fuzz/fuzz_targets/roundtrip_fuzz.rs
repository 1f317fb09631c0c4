#![no_main]
use libfuzzer_sys::fuzz_target;
use rompatch::engine;
use rompatch::format::{ApplyOptions, CrcFlags, Format};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // Use first byte as the split point between base and target.
    let split = data[0] as usize % data.len();
    let payload = &data[1..];
    let (base, target) = payload.split_at(split.min(payload.len()));

    let strict = ApplyOptions {
        strict: CrcFlags::all(),
        ..Default::default()
    };

    let patch = engine::create(Format::Ups, base, target).unwrap();
    let (out, report) = engine::apply(&patch, base, &strict).unwrap();
    assert_eq!(out, target);
    assert!(report.warnings.is_empty());

    // IPS cannot shrink its output.
    if target.len() >= base.len() {
        let patch = engine::create(Format::Ips, base, target).unwrap();
        let (out, _) = engine::apply(&patch, base, &strict).unwrap();
        assert_eq!(out, target);
    }
});
