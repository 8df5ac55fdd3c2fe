use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = format!(
        r#"
driver:
  root: {root}
  folder: {folder}
  naming: shared-by-uri
mounter:
  mountCommand: "touch {{path}}/.mounted"
  unmountCommand: "rm {{path}}/.mounted"
  uriPattern: "^nfs://"
"#,
        root = dir.join("volumes").display(),
        folder = dir.join("state").display(),
    );
    let path = dir.join("config.yaml");
    fs::write(&path, config).unwrap();
    path
}

fn rkvol(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rkvol"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_volume_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    assert!(rkvol(&config, &["create", "v1", "--voluri", "nfs://host/a"]).status.success());
    assert!(rkvol(&config, &["create", "v2", "--voluri", "nfs://host/a"]).status.success());

    let mount = rkvol(&config, &["mount", "v1", "--id", "c1"]);
    assert!(mount.status.success());
    let mountpoint = stdout_json(&mount)["Mountpoint"].as_str().unwrap().to_string();
    assert!(Path::new(&mountpoint).join(".mounted").exists());

    // second volume on the same remote shares the mount
    let mount = rkvol(&config, &["mount", "v2", "--id", "c2"]);
    assert_eq!(stdout_json(&mount)["Mountpoint"], mountpoint.as_str());

    let get = stdout_json(&rkvol(&config, &["get", "v1"]));
    assert_eq!(get["Volume"]["Status"]["mount_connections"], 2);

    let remove = rkvol(&config, &["remove", "v1"]);
    assert!(!remove.status.success());
    assert_eq!(stdout_json(&remove)["Kind"], "PreconditionFailed");

    assert!(rkvol(&config, &["unmount", "v1", "--id", "c1"]).status.success());
    assert!(Path::new(&mountpoint).join(".mounted").exists());
    assert!(rkvol(&config, &["unmount", "v2", "--id", "c2"]).status.success());
    assert!(!Path::new(&mountpoint).join(".mounted").exists());

    assert!(rkvol(&config, &["remove", "v1"]).status.success());
    let list = stdout_json(&rkvol(&config, &["list"]));
    assert_eq!(list["Volumes"].as_array().unwrap().len(), 1);
    assert_eq!(list["Volumes"][0]["Name"], "v2");
}

#[test]
fn test_rejects_uri_outside_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let out = rkvol(&config, &["create", "v1", "--voluri", "sshfs://host/a"]);
    assert!(!out.status.success());
    assert_eq!(stdout_json(&out)["Kind"], "InvalidArgument");

    let caps = stdout_json(&rkvol(&config, &["capabilities"]));
    assert_eq!(caps["Capabilities"]["Scope"], "local");
}
