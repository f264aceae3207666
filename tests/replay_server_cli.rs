//! The offline binary as a web server would run it: CGI variables in,
//! response on stdout, diagnostics on stderr.

use std::path::Path;
use std::process::{Command, Output};

use replay_proxy::archive::{ArchivedRecord, RecordStore};
use replay_proxy::http::{Header, HttpMessage};

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

fn replay_server(dir: &Path, uri: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_replay-server"))
        .env_clear()
        .env("REPLAY_ARCHIVE_DIR", dir)
        .env("REQUEST_METHOD", "GET")
        .env("REQUEST_URI", uri)
        .env("SERVER_PROTOCOL", "HTTP/1.1")
        .env("HTTP_HOST", "a.com")
        .output()
        .unwrap()
}

fn recorded(dir: &Path) {
    RecordStore::new(dir)
        .save(&ArchivedRecord {
            request: HttpMessage::new("GET /here HTTP/1.1", vec![Header::new("Host", "a.com")], vec![]),
            response: HttpMessage::new(
                "HTTP/1.1 200 OK",
                vec![Header::new("Content-Length", "2")],
                b"ok".to_vec(),
            ),
        })
        .unwrap();
}

#[test]
fn match_is_written_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    recorded(dir.path());

    let out = replay_server(dir.path(), "/here");
    assert!(out.status.success());
    assert_eq!(out.stdout, RESPONSE);
}

#[test]
fn no_match_exits_one_and_names_the_request() {
    let dir = tempfile::tempdir().unwrap();
    recorded(dir.path());

    let out = replay_server(dir.path(), "/missing");
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("can't find: GET /missing"), "stderr: {stderr}");
}

#[test]
fn missing_directory_exits_one_with_a_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let gone = dir.path().join("gone");

    let out = replay_server(&gone, "/here");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("cannot access"), "stderr: {stderr}");
}
