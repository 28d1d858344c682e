//! Runs the `scorerender` binary over a mixed batch of inputs.

#![cfg(all(unix, feature = "cli"))]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const MUP: &str = r#"#!/bin/sh
# mup -f <out.ps> <input>
printf '%%!PS-Adobe-3.0\n' > "$2"
"#;

const CONVERT: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
  png:-) printf '\211PNG fake' ;;
  *) case " $* " in
       *" png:- "*) cat > "$last" ;;
       *) printf '\211PNG fake' > "$last" ;;
     esac ;;
esac
"#;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn bad_inputs_do_not_stop_the_batch() {
    let bin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let temp = TempDir::new().unwrap();
    let inputs = TempDir::new().unwrap();

    let mup = script(bin.path(), "mup", MUP);
    let convert = script(bin.path(), "convert", CONVERT);

    let missing = inputs.path().join("missing.mup");
    let latin1 = inputs.path().join("latin1.mup");
    fs::write(&latin1, [0x63u8, 0xe9, 0xff]).unwrap();
    let unknown = inputs.path().join("tune.xyz");
    fs::write(&unknown, "X:1\nK:C\nCDEF|\n").unwrap();
    let good = inputs.path().join("good.mup");
    fs::write(&good, "music\n1: c;d;e;f;\nbar\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_scorerender"))
        .env_remove("SCORERENDER_NOTATION")
        .env_remove("SCORERENDER_ON_ERROR")
        .env("RUST_LOG", "error")
        .arg("--json")
        .arg("--cache-dir")
        .arg(cache.path())
        .arg("--temp-dir")
        .arg(temp.path())
        .arg("--convert")
        .arg(&convert)
        .arg("--mup")
        .arg(&mup)
        .args([&missing, &latin1, &unknown, &good])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1), "{}", String::from_utf8_lossy(&output.stderr));

    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 4);

    for record in &records[..3] {
        assert!(record.get("output").is_none(), "{record}");
        assert!(record["error"]["message"].is_string(), "{record}");
        assert!(record["error"].get("code").is_none(), "{record}");
    }
    assert!(records[2]["error"]["message"]
        .as_str()
        .unwrap()
        .contains("--notation"));

    let file_name = records[3]["output"]["file_name"].as_str().unwrap();
    assert!(file_name.starts_with("sr-mup-"), "{file_name}");
    assert!(cache.path().join(file_name).is_file());
}
