use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

use disposable_transfer::codec::TUNNEL_ENV;
use disposable_transfer::server::{self, TransferState};

fn copyback() -> assert_cmd::Command {
    cargo_bin_cmd!("copyback").into()
}

fn copyfrom() -> assert_cmd::Command {
    cargo_bin_cmd!("copyfrom").into()
}

/// Host side of the tunnel, served from a background runtime so the
/// binaries under test can run synchronously.
struct Host {
    url: String,
    _runtime: tokio::runtime::Runtime,
}

fn serve_host(root: &Path) -> Host {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let addr = listener.local_addr().unwrap();
    runtime.spawn(server::serve(listener, TransferState::new(root)));
    Host {
        url: format!("http://{addr}"),
        _runtime: runtime,
    }
}

#[test]
fn copyback_sends_file_to_host() {
    let host_dir = tempfile::tempdir().unwrap();
    let droplet_dir = tempfile::tempdir().unwrap();
    fs::write(droplet_dir.path().join("notes.txt"), b"from the droplet").unwrap();
    let host = serve_host(host_dir.path());

    copyback()
        .current_dir(droplet_dir.path())
        .env(TUNNEL_ENV, &host.url)
        .arg("notes.txt")
        .assert()
        .success()
        .stdout(predicate::str::contains("host:./notes.txt"));

    assert_eq!(
        fs::read(host_dir.path().join("notes.txt")).unwrap(),
        b"from the droplet"
    );
}

#[test]
fn copyfrom_fetches_folder_from_host() {
    let host_dir = tempfile::tempdir().unwrap();
    let droplet_dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(host_dir.path().join("project/src")).unwrap();
    fs::write(host_dir.path().join("project/src/main.c"), b"int main;").unwrap();
    let host = serve_host(host_dir.path());

    copyfrom()
        .current_dir(droplet_dir.path())
        .env(TUNNEL_ENV, &host.url)
        .args(["project", "copy"])
        .assert()
        .success();

    assert_eq!(
        fs::read(droplet_dir.path().join("copy/src/main.c")).unwrap(),
        b"int main;"
    );
}

#[test]
fn copyfrom_reports_missing_host_path() {
    let host_dir = tempfile::tempdir().unwrap();
    let droplet_dir = tempfile::tempdir().unwrap();
    let host = serve_host(host_dir.path());

    copyfrom()
        .current_dir(droplet_dir.path())
        .env(TUNNEL_ENV, &host.url)
        .arg("nope")
        .assert()
        .failure()
        .stderr(predicate::str::contains("copyfrom: file or folder does not exist"));
}

#[test]
fn copyback_without_tunnel_fails() {
    let droplet_dir = tempfile::tempdir().unwrap();
    fs::write(droplet_dir.path().join("a"), b"a").unwrap();

    copyback()
        .current_dir(droplet_dir.path())
        .env(TUNNEL_ENV, "http://127.0.0.1:9")
        .arg("a")
        .assert()
        .failure()
        .stderr(predicate::str::contains("copyback:"));
}

#[test]
fn copyback_requires_source() {
    copyback().assert().failure();
}
