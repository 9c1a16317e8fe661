use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use pretty_assertions::assert_eq;

fn run_cli(out_dir: &Path, input: &serde_json::Value) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_sw-precache"))
        .arg("--out-dir")
        .arg(out_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn sw-precache");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.to_string().as_bytes())
        .expect("failed to write stdin");
    child.wait_with_output().expect("failed to wait for sw-precache")
}

#[test]
fn inject_manifest_writes_assets() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sw.js"), "precacheAndRoute(self.__WB_MANIFEST);").unwrap();
    let out_dir = dir.path().join("dist");

    let output = run_cli(
        &out_dir,
        &serde_json::json!({
            "plugin": "injectManifest",
            "config": { "swSrc": "sw.js" },
            "compilation": {
                "options": { "context": dir.path() },
                "assets": [
                    { "name": "index.html", "source": "<html></html>" },
                    { "name": "js/main.js", "source": "main" }
                ]
            }
        }),
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let sw = std::fs::read_to_string(out_dir.join("sw.js")).unwrap();
    assert!(sw.contains("'url':'index.html'"));
    assert!(sw.contains("'url':'js/main.js'"));
    assert_eq!(std::fs::read_to_string(out_dir.join("js/main.js")).unwrap(), "main");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("The service worker at sw.js will precache 2 URLs"));
}

#[test]
fn repeated_builds_report_the_warning() {
    let dir = tempfile::tempdir().unwrap();

    let output = run_cli(
        dir.path(),
        &serde_json::json!({
            "plugin": "generateSW",
            "config": {},
            "builds": 2,
            "compilation": { "assets": [{ "name": "index.html", "source": "<html></html>" }] }
        }),
    );

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GenerateSW has been called multiple times"));
    assert!(dir.path().join("service-worker.js").exists());
}

#[test]
fn recorded_errors_exit_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sw.js"), "no marker here").unwrap();

    let output = run_cli(
        &dir.path().join("dist"),
        &serde_json::json!({
            "plugin": "injectManifest",
            "config": { "swSrc": "sw.js" },
            "compilation": { "options": { "context": dir.path() } }
        }),
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Can't find self.__WB_MANIFEST in your SW source."));
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn unknown_arguments_are_rejected() {
    let output = Command::new(env!("CARGO_BIN_EXE_sw-precache"))
        .arg("--watch")
        .output()
        .expect("failed to run sw-precache");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown argument '--watch'"));
}
