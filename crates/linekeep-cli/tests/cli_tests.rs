use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Settings with a cheap KDF so encrypted round-trips stay fast.
fn write_settings(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("settings.json");
    let root = dir.join("files");
    let json = serde_json::json!({
        "resume_delay_ms": 1000,
        "default_file_name": "todo.txt",
        "storage_root": root,
        "encryption": {
            "enabled": true,
            "suffix": ".jenc",
            "kdf": { "time_cost": 1, "memory_cost": 1024, "parallelism": 1 }
        }
    });
    fs::write(&path, serde_json::to_vec_pretty(&json).unwrap()).unwrap();
    path
}

fn linekeep(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("linekeep").unwrap();
    cmd.arg("--config").arg(config).env_remove("LINEKEEP_PASSWORD");
    cmd
}

#[test]
fn save_then_show_default_file() {
    let dir = tempdir().unwrap();
    let config = write_settings(dir.path());

    linekeep(&config)
        .arg("save")
        .write_stdin("(A) first\nsecond\n")
        .assert()
        .success();
    assert_eq!(
        fs::read_to_string(dir.path().join("files").join("todo.txt")).unwrap(),
        "(A) first\nsecond"
    );

    linekeep(&config)
        .arg("show")
        .assert()
        .success()
        .stdout("(A) first\nsecond\n");
}

#[test]
fn encrypted_file_roundtrip_with_env_password() {
    let dir = tempdir().unwrap();
    let config = write_settings(dir.path());
    let file = dir.path().join("files").join("secret.txt.jenc");
    fs::create_dir_all(file.parent().unwrap()).unwrap();

    linekeep(&config)
        .env("LINEKEEP_PASSWORD", "hunter2")
        .arg("save")
        .arg(&file)
        .write_stdin("pay rent\n")
        .assert()
        .success();
    assert!(!fs::read(&file).unwrap().starts_with(b"pay rent"));

    linekeep(&config)
        .env("LINEKEEP_PASSWORD", "hunter2")
        .arg("show")
        .arg(&file)
        .assert()
        .success()
        .stdout("pay rent\n");

    linekeep(&config)
        .env("LINEKEEP_PASSWORD", "wrong")
        .arg("show")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encryption failed"));
}

#[test]
fn ls_txt_only_lists_directories_and_text_files() {
    let dir = tempdir().unwrap();
    let config = write_settings(dir.path());
    let listed = dir.path().join("listing");
    fs::create_dir_all(listed.join("sub")).unwrap();
    fs::write(listed.join("todo.txt"), "").unwrap();
    fs::write(listed.join("image.png"), "").unwrap();

    linekeep(&config)
        .arg("ls")
        .arg(&listed)
        .arg("--txt-only")
        .assert()
        .success()
        .stdout("sub/\ntodo.txt\n");
}

#[test]
fn append_and_status() {
    let dir = tempdir().unwrap();
    let config = write_settings(dir.path());
    let file = dir.path().join("files").join("todo.txt");
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(&file, "one").unwrap();

    linekeep(&config)
        .arg("append")
        .arg(&file)
        .arg("two")
        .arg("three")
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&file).unwrap(), "one\ntwo\nthree");

    linekeep(&config)
        .arg("status")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("lines:      3"))
        .stdout(predicate::str::contains("needs sync: false"));
}
