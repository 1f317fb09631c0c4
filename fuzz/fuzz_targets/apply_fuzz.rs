#![no_main]
use libfuzzer_sys::fuzz_target;
use rompatch::engine;
use rompatch::format::{ApplyOptions, CrcFlags, Format};

// Outputs past this size are skipped so garbage headers cannot exhaust memory.
const MAX_OUTPUT: u64 = 16 << 20;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks a magic to prepend and the option set.
    let flags = data[0];
    let format = Format::ALL[(flags & 3) as usize];
    let split = data[1] as usize % (data.len() - 1);
    let (input, body) = data[2..].split_at(split.min(data.len() - 2));

    let mut patch = format.magic().to_vec();
    patch.extend_from_slice(body);

    let opts = ApplyOptions {
        ignore: CrcFlags::from_bits_truncate(flags >> 2),
        strict: CrcFlags::from_bits_truncate(flags >> 5),
        allow_truncated: flags & 0x80 != 0,
    };

    // The engines must never panic, only return errors.
    let Ok(info) = engine::describe(&patch) else {
        return;
    };
    if info.target_size.is_some_and(|n| n > MAX_OUTPUT) {
        return;
    }
    if matches!(format, Format::Ips | Format::Ips32) && input.len() as u64 > MAX_OUTPUT {
        return;
    }
    let _ = engine::apply(&patch, input, &opts);
});
