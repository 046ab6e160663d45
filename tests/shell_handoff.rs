#![cfg(unix)]

use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;
use std::process::Command;

use workflow_tools::shell::init::{Shell, render};

fn bash_available() -> bool {
    Command::new("bash").arg("--version").output().is_ok()
}

/// Stand-in binary: writes its first argument's target into the wt handoff
/// file and exits with the requested code.
fn write_stub(dir: &Path) -> std::path::PathBuf {
    let stub = dir.join("fake-tools");
    std::fs::write(
        &stub,
        "#!/bin/sh\n\
         if [ -n \"$TARGET\" ]; then printf '%s' \"$TARGET\" > \"$WT_CD_FILE\"; fi\n\
         if [ -n \"$EXPORT\" ]; then printf 'export %s\\n' \"$EXPORT\" > \"$WT_ENV_FILE\"; fi\n\
         exit \"${CODE:-0}\"\n",
    )
    .expect("write stub");
    std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    stub
}

fn run_wrapper(tmp: &Path, stub: &Path, script: &str, envs: &[(&str, &str)]) -> (String, i32) {
    let wrapper = render(Shell::Bash, &stub.to_string_lossy());
    let full = format!("{wrapper}\n{script}\n");
    let out = Command::new("bash")
        .arg("-c")
        .arg(full)
        .env("TMPDIR", tmp)
        .envs(envs.iter().copied())
        .output()
        .expect("bash");
    assert!(
        out.stderr.is_empty(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    (
        String::from_utf8_lossy(&out.stdout).trim().to_owned(),
        out.status.code().unwrap_or(-1),
    )
}

#[test]
fn wrapper_changes_directory_and_removes_handoff_file() {
    if !bash_available() {
        eprintln!("skipping: bash not found");
        return;
    }
    let tmp = tempfile::tempdir().expect("tempdir");
    let target = tmp.path().join("dest");
    std::fs::create_dir_all(&target).expect("mkdir");
    let stub = write_stub(tmp.path());
    let target_str = target.to_string_lossy().into_owned();

    let (stdout, code) = run_wrapper(
        tmp.path(),
        &stub,
        r#"wt switch x; echo "$PWD"; [ -e "$WT_CD_FILE" ] && echo leftover; true"#,
        &[("TARGET", target_str.as_str())],
    );
    assert_eq!(code, 0);
    assert_eq!(stdout, target_str);
}

#[test]
fn wrapper_sources_exports_and_keeps_exit_code() {
    if !bash_available() {
        eprintln!("skipping: bash not found");
        return;
    }
    let tmp = tempfile::tempdir().expect("tempdir");
    let stub = write_stub(tmp.path());

    let (stdout, code) = run_wrapper(
        tmp.path(),
        &stub,
        r#"pr; rc=$?; echo "$WT_GITIGNORE_DECLINED"; [ -e "$WT_ENV_FILE" ] && echo leftover; exit $rc"#,
        &[("EXPORT", "WT_GITIGNORE_DECLINED=1"), ("CODE", "3")],
    );
    assert_eq!(code, 3);
    assert_eq!(stdout, "1");
}

#[test]
fn without_handoff_file_the_directory_stays() {
    if !bash_available() {
        eprintln!("skipping: bash not found");
        return;
    }
    let tmp = tempfile::tempdir().expect("tempdir");
    let start = tmp.path().join("start");
    std::fs::create_dir_all(&start).expect("mkdir");
    let stub = write_stub(tmp.path());

    let script = format!(r#"cd "{}"; tm; echo "$PWD""#, start.display());
    let (stdout, code) = run_wrapper(tmp.path(), &stub, &script, &[]);
    assert_eq!(code, 0);
    assert_eq!(stdout, start.to_string_lossy());
}
