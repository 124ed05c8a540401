use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_canal-relay"))
}

#[test]
fn test_config_flag_is_required() {
    let output = bin().output().expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--config"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = tempdir().unwrap();
    let missing = temp_dir.path().join("relay.toml");

    let output = bin()
        .arg("--config")
        .arg(&missing)
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_unparseable_config_fails() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("relay.toml");
    fs::write(&path, "databases = [unterminated").unwrap();

    let output = bin()
        .arg("-c")
        .arg(&path)
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"));
}

#[test]
fn test_empty_schema_list_fails() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("relay.toml");
    fs::write(
        &path,
        r#"
databases = ""

[canal]
host = "127.0.0.1"
port = 1
client_id = "1001"
destination = "example"
"#,
    )
    .unwrap();

    let output = bin()
        .arg("-c")
        .arg(&path)
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("databases"));
}

#[test]
fn test_write_requires_destination_section() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("relay.toml");
    fs::write(
        &path,
        r#"
databases = "shop"

[canal]
host = "127.0.0.1"
port = 1
client_id = "1001"
destination = "example"
"#,
    )
    .unwrap();

    let output = bin()
        .arg("-c")
        .arg(&path)
        .arg("--write")
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("dest_mysql"));
}
