use std::process::Command;
use tempfile::tempdir;

fn bin() -> String {
    env!("CARGO_BIN_EXE_rompatch").to_string()
}

#[test]
fn cli_create_apply_roundtrip() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("base.bin");
    let target = dir.path().join("target.bin");
    let output = dir.path().join("output.bin");

    std::fs::write(&base, b"abcde12345abcde12345").unwrap();
    std::fs::write(&target, b"abcdeXXXXXabcde12345!").unwrap();

    for ext in ["ips", "ups"] {
        let patch = dir.path().join(format!("hack.{ext}"));
        let st = Command::new(bin())
            .arg("--force")
            .arg("create")
            .arg(&target)
            .arg(&base)
            .arg(&patch)
            .status()
            .unwrap();
        assert!(st.success());

        let st = Command::new(bin())
            .arg("--force")
            .arg("apply")
            .arg(&patch)
            .arg(&base)
            .arg(&output)
            .status()
            .unwrap();
        assert!(st.success());
        assert_eq!(
            std::fs::read(&output).unwrap(),
            std::fs::read(&target).unwrap()
        );
    }
}

#[test]
fn cli_refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("base.bin");
    let target = dir.path().join("target.bin");
    let patch = dir.path().join("hack.ups");

    std::fs::write(&base, b"aaaa").unwrap();
    std::fs::write(&target, b"abca").unwrap();
    std::fs::write(&patch, b"keep me").unwrap();

    let out = Command::new(bin())
        .arg("create")
        .arg(&target)
        .arg(&base)
        .arg(&patch)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("-f"));
    assert_eq!(std::fs::read(&patch).unwrap(), b"keep me");
}

#[test]
fn cli_reports_colliding_paths() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("same.bin");
    let output = dir.path().join("out.bin");
    std::fs::write(&file, b"data").unwrap();

    let out = Command::new(bin())
        .arg("apply")
        .arg(&file)
        .arg(&file)
        .arg(&output)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("patch and input"));
}

#[test]
fn cli_strict_crc_fails_on_wrong_input() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("base.bin");
    let other = dir.path().join("other.bin");
    let target = dir.path().join("target.bin");
    let patch = dir.path().join("hack.ups");
    let output = dir.path().join("out.bin");

    std::fs::write(&base, b"original data").unwrap();
    std::fs::write(&other, b"something else").unwrap();
    std::fs::write(&target, b"modified data").unwrap();

    let st = Command::new(bin())
        .arg("create")
        .arg(&target)
        .arg(&base)
        .arg(&patch)
        .status()
        .unwrap();
    assert!(st.success());

    let st = Command::new(bin())
        .args(["-q", "apply", "--strict-input-crc"])
        .arg(&patch)
        .arg(&other)
        .arg(&output)
        .status()
        .unwrap();
    assert_eq!(st.code(), Some(1));

    let st = Command::new(bin())
        .args(["-q", "--force", "apply", "--ignore-crc"])
        .arg(&patch)
        .arg(&other)
        .arg(&output)
        .status()
        .unwrap();
    assert!(st.success());
}

#[test]
fn cli_bps_create_fails() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("base.bin");
    let target = dir.path().join("target.bin");
    std::fs::write(&base, b"a").unwrap();
    std::fs::write(&target, b"b").unwrap();

    let out = Command::new(bin())
        .arg("create")
        .arg(&target)
        .arg(&base)
        .arg(dir.path().join("hack.bps"))
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not implemented"));
}

#[test]
fn cli_info_json() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("base.bin");
    let target = dir.path().join("target.bin");
    let patch = dir.path().join("hack.ups");
    std::fs::write(&base, b"0123456789").unwrap();
    std::fs::write(&target, b"0123x56789").unwrap();

    let st = Command::new(bin())
        .arg("create")
        .arg(&target)
        .arg(&base)
        .arg(&patch)
        .status()
        .unwrap();
    assert!(st.success());

    let out = Command::new(bin())
        .args(["--json", "info"])
        .arg(&patch)
        .output()
        .unwrap();
    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(json["format"], "UPS");
    assert_eq!(json["source_size"], 10);
    assert_eq!(json["records"], 1);
}

#[test]
fn cli_formats_lists_registry() {
    let out = Command::new(bin()).arg("formats").output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for name in ["IPS", "IPS32", "UPS", "BPS"] {
        assert!(stdout.contains(name), "missing {name}");
    }
}
