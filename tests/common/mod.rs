#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};
use std::thread;

pub const MODELS_YAML: &str = r#"
model_list:
  - model_name: m1
    litellm_params:
      model: test/m1
  - model_name: m2
    litellm_params:
      model: test/m2
  - model_name: m3
    litellm_params:
      model: test/m3
"#;

pub const PROFILES_YAML: &str = r#"
A:
  opus_model: m1
  sonnet_model: m2
  haiku_model: m2
B:
  opus_model: m2
  sonnet_model: m3
"#;

/// Isolated directories for one CLI invocation sequence.
pub struct TestEnv {
    pub root: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tmpdir");
        let builtin = root.path().join("share");
        fs::create_dir_all(&builtin).expect("mkdir builtin");
        fs::write(builtin.join("models.yaml"), MODELS_YAML).expect("write models");
        fs::write(builtin.join("profiles.yaml"), PROFILES_YAML).expect("write profiles");
        TestEnv { root }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.path().join("state").join("run-claude")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.path().join("config").join("run-claude")
    }

    pub fn state_json(&self) -> serde_json::Value {
        let text = fs::read_to_string(self.state_dir().join("state.json")).expect("state.json");
        serde_json::from_str(&text).expect("state json")
    }

    /// Command with XDG roots, builtin assets and an unreachable proxy configured.
    pub fn command(&self, args: &[&str]) -> Command {
        let bin = env!("CARGO_BIN_EXE_run-claude");
        let mut cmd = Command::new(bin);
        cmd.args(args)
            .env("XDG_STATE_HOME", self.root.path().join("state"))
            .env("XDG_CONFIG_HOME", self.root.path().join("config"))
            .env("RUN_CLAUDE_HOME", self.root.path().join("home"))
            .env("RUN_CLAUDE_BUILTIN_DIR", self.root.path().join("share"))
            .env("LITELLM_PROXY_URL", "http://127.0.0.1:9")
            .env("LITELLM_COMMAND", "run-claude-test-no-such-litellm")
            .env("NO_COLOR", "1")
            .env_remove("RUN_CLAUDE_LOG")
            .env_remove("LITELLM_MASTER_KEY")
            .env_remove("RUN_CLAUDE_LEASE_SECONDS");
        cmd
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("failed to run run-claude")
    }
}

pub fn describe(out: &Output) -> String {
    format!(
        "status={:?}\nstdout:\n{}\nstderr:\n{}",
        out.status.code(),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    )
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// Minimal HTTP/1.1 server answering every request through `respond`
/// (`(status, body)`), with `Connection: close`.
pub struct FakeProxy {
    pub url: String,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeProxy {
    pub fn start<F>(respond: F) -> FakeProxy
    where
        F: Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let respond = Arc::new(respond);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let seen = seen.clone();
                let respond = respond.clone();
                thread::spawn(move || {
                    if let Some(req) = read_request(&stream) {
                        let (status, body) = respond(&req);
                        seen.lock().expect("lock").push(req);
                        write_response(stream, status, &body);
                    }
                });
            }
        });
        FakeProxy {
            url: format!("http://{addr}"),
            requests,
        }
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.recorded()
            .into_iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

fn read_request(stream: &TcpStream) -> Option<Recorded> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    let mut content_length = 0usize;
    let mut authorization = None;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((k, v)) = header.split_once(':') {
            let k = k.trim().to_ascii_lowercase();
            let v = v.trim().to_string();
            if k == "content-length" {
                content_length = v.parse().unwrap_or(0);
            } else if k == "authorization" {
                authorization = Some(v);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;
    Some(Recorded {
        method,
        path,
        authorization,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn write_response(mut stream: TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        404 => "Not Found",
        _ => "Error",
    };
    let resp = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(resp.as_bytes());
    let _ = stream.flush();
}

pub fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, contents).expect("write");
}
