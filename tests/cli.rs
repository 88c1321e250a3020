use std::io::Write;
use std::process::{Command, Output, Stdio};

fn npa(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_npa"))
        .args(args)
        .output()
        .expect("failed to execute npa")
}

fn source_file(source: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

fn path(file: &tempfile::NamedTempFile) -> &str {
    file.path().to_str().unwrap()
}

#[test]
fn test_valid_file_exits_zero() {
    let file = source_file("var greeting = \"hello\";\nprint greeting;\n");
    let output = npa(&[path(&file)]);
    assert_eq!(output.status.code(), Some(0), "stderr:\n{}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn test_lexical_error_exits_65() {
    let file = source_file("var a = 1;\nvar b = @;\n");
    let output = npa(&[path(&file)]);
    assert_eq!(output.status.code(), Some(65));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[line 2] Error: Unexpected character."), "stderr:\n{}", stderr);
}

#[test]
fn test_unterminated_string_exits_65() {
    let file = source_file("print \"never closed;\n");
    let output = npa(&[path(&file)]);
    assert_eq!(output.status.code(), Some(65));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unterminated string."));
}

#[test]
fn test_missing_file_exits_74() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.lox");
    let output = npa(&[missing.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(74));
}

#[test]
fn test_bad_arguments_exit_64() {
    let output = npa(&["a.lox", "b.lox"]);
    assert_eq!(output.status.code(), Some(64));

    let output = npa(&["--no-such-flag"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn test_help_exits_zero() {
    let output = npa(&["--help"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));
}

#[test]
fn test_tokens_json() {
    let file = source_file("var x = 1.5;");
    let output = npa(&[path(&file), "--tokens=json"]);
    assert_eq!(output.status.code(), Some(0));

    let tokens: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let kinds: Vec<&str> = tokens
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, ["Var", "Identifier", "Equal", "Number", "Semicolon", "Eof"]);
    assert_eq!(tokens[3]["lexeme"], "1.5");
    assert_eq!(tokens[3]["line"], 1);
}

#[test]
fn test_tokens_human() {
    let file = source_file("fun f() {}\nreturn;");
    let output = npa(&[path(&file), "--tokens"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("   1 Fun 'fun'\n   | Identifier 'f'\n"), "stdout:\n{}", stdout);
    assert!(stdout.contains("   2 Return 'return'\n"), "stdout:\n{}", stdout);
}

#[test]
fn test_gc_stats_json_under_stress() {
    let file = source_file("var a = \"one\"; var b = \"two\"; var c = a;");
    let output = npa(&[path(&file), "--stress-gc", "--gc-stats=json"]);
    assert_eq!(output.status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert!(report["stats"]["cycles"].as_u64().unwrap() > 0);
    assert!(report["live_objects"].is_u64());
}

#[test]
fn test_config_file() {
    let config = source_file("stress_gc = true\ngc_stats = true\n");
    let file = source_file("var x;");
    let output = npa(&["--config", path(&config), path(&file)]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stderr).contains("GC Statistics:"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = source_file("gc_grow_factor = \"fast\"\n");
    let file = source_file("var x;");
    let output = npa(&["--config", path(&config), path(&file)]);
    assert_eq!(output.status.code(), Some(65));
}

#[test]
fn test_repl_scans_each_line() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_npa"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn npa");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"print 1;\nvar $;\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Print 'print'"), "stdout:\n{}", stdout);
    assert!(stdout.contains("Number '1'"), "stdout:\n{}", stdout);
    assert!(String::from_utf8_lossy(&output.stderr).contains("[line 1] Error: Unexpected character."));
}
