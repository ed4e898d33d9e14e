use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Runs the binary inside `cwd` with `stdin` piped in.
fn schemagen(cwd: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_schemagen"))
        .current_dir(cwd)
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn workspace(schema: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("schemas")).unwrap();
    fs::write(dir.path().join("schemas/main.schema"), schema).unwrap();
    dir
}

#[test]
fn test_success_writes_files() {
    let dir = workspace("struct Item { string: name; }\n");
    let output = schemagen(
        dir.path(),
        &["--schema-dir", "schemas", "--output-dir", "out", "--sql"],
        "",
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(dir.path().join("out/sql/schema.sql").exists());
    assert!(!dir.path().join("out/sql/Item_queries.sql").exists());
}

#[test]
fn test_validation_failure_exits_1() {
    let dir = workspace("struct A { B: b; }\nstruct B { A: a; }\n");
    let output = schemagen(
        dir.path(),
        &["--schema-dir", "schemas", "--output-dir", "out", "--sql"],
        "",
    );
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("error: "), "{stderr}");
    assert!(stderr.contains("embed each other"), "{stderr}");
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_declined_combinatorial_output() {
    let dir = workspace("struct Item { string: name; bool: sold; }\n");
    let output = schemagen(
        dir.path(),
        &[
            "--schema-dir",
            "schemas",
            "--output-dir",
            "out",
            "--sql",
            "--allow-combinatorial",
        ],
        "no\n",
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("will generate 3 filtered queries"), "{stdout}");
    assert!(stdout.contains("Aborted; nothing was written."));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_plugin_flag_before_plugin_path() {
    let dir = workspace("struct Item { string: name; }\n");
    let output = schemagen(
        dir.path(),
        &[
            "--demo-level",
            "3",
            "--plugin",
            "libdemo.so",
            "--schema-dir",
            "schemas",
            "--output-dir",
            "out",
        ],
        "",
    );
    // The plugin is attempted, rather than its flag being rejected first.
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load plugin libdemo.so"), "{stderr}");
}
