use rompatch::engine;
use rompatch::format::{ApplyOptions, CrcFlags, Format};

#[derive(Debug)]
struct Vector {
    name: String,
    format: Format,
    base: Vec<u8>,
    target: Vec<u8>,
    patch: Vec<u8>,
}

fn hex_to_bytes(s: &str) -> Vec<u8> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    assert!(
        s.len().is_multiple_of(2),
        "hex string must have even length"
    );
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn parse_format(name: &str) -> Format {
    Format::ALL
        .into_iter()
        .find(|f| f.name().eq_ignore_ascii_case(name))
        .unwrap_or_else(|| panic!("unknown format {name}"))
}

fn load_vectors() -> Vec<Vector> {
    let manifest = include_str!("vectors/manifest.tsv");
    manifest
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|line| {
            let parts: Vec<_> = line.split('|').collect();
            assert_eq!(parts.len(), 5, "invalid vector row: {line}");
            Vector {
                name: parts[0].to_string(),
                format: parse_format(parts[1]),
                base: hex_to_bytes(parts[2]),
                target: hex_to_bytes(parts[3]),
                patch: hex_to_bytes(parts[4]),
            }
        })
        .collect()
}

fn strict() -> ApplyOptions {
    ApplyOptions {
        strict: CrcFlags::all(),
        ..Default::default()
    }
}

#[test]
fn vector_database_covers_every_format() {
    let vectors = load_vectors();
    for format in Format::ALL {
        assert!(
            vectors.iter().any(|v| v.format == format),
            "no vectors for {format}"
        );
    }
}

#[test]
fn create_matches_recorded_patches() {
    for v in load_vectors().iter().filter(|v| v.format != Format::Bps) {
        let patch = engine::create(v.format, &v.base, &v.target)
            .unwrap_or_else(|e| panic!("vector {} ({}): {e}", v.name, v.format));
        assert_eq!(patch, v.patch, "vector {} ({})", v.name, v.format);
    }
}

#[test]
fn apply_reproduces_all_targets() {
    for v in load_vectors() {
        let (output, report) = engine::apply(&v.patch, &v.base, &strict())
            .unwrap_or_else(|e| panic!("vector {} ({}): {e}", v.name, v.format));
        assert_eq!(report.format, v.format, "vector {}", v.name);
        assert_eq!(output, v.target, "vector {} ({})", v.name, v.format);
    }
}

#[test]
fn describe_accepts_all_vectors() {
    for v in load_vectors() {
        let info = engine::describe(&v.patch)
            .unwrap_or_else(|e| panic!("vector {} ({}): {e}", v.name, v.format));
        assert_eq!(info.patch_len, v.patch.len());
        if matches!(v.format, Format::Ups | Format::Bps) {
            assert_eq!(info.source_size, Some(v.base.len() as u64), "vector {}", v.name);
            assert_eq!(info.target_size, Some(v.target.len() as u64), "vector {}", v.name);
        }
    }
}
