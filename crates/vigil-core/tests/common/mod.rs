//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use vigil_core::BoxFuture;
use vigil_core::Result;
use vigil_core::config::VigilConfig;
use vigil_core::git::VersionControl;
use vigil_core::pkg::PackageManager;
use vigil_core::service::ServiceSupervisor;

/// Build a config pointed at temp dirs with fast-test overrides.
pub fn test_config(
    service_dir: &Path,
    state_dir: &Path,
    port: u16,
    extra: &[(&str, &str)],
) -> VigilConfig {
    let mut map: HashMap<String, String> = HashMap::from([
        ("VIGIL_SERVICE_DIR".to_string(), service_dir.display().to_string()),
        ("VIGIL_STATE_DIR".to_string(), state_dir.display().to_string()),
        ("VIGIL_SERVICE_PORT".to_string(), port.to_string()),
        (
            "VIGIL_PROCESS_PATTERN".to_string(),
            "no-such-process-vigil-test".to_string(),
        ),
        (
            "VIGIL_AUX_PROCESS_PATTERN".to_string(),
            "no-such-aux-vigil-test".to_string(),
        ),
        ("VIGIL_ALERTS_ENABLED".to_string(), "false".to_string()),
    ]);
    for (k, v) in extra {
        map.insert((*k).to_string(), (*v).to_string());
    }
    VigilConfig::from_lookup(|k| map.get(k).cloned()).unwrap()
}

/// Write a plausible service checkout into `dir`.
pub fn seed_service_dir(dir: &Path) {
    std::fs::write(
        dir.join("config.json"),
        r#"{"channels": ["telegram", "discord"], "model": "sonnet-large"}"#,
    )
    .unwrap();
    std::fs::write(dir.join("package.json"), r#"{"version": "1.8.2"}"#).unwrap();
    std::fs::write(dir.join("package-lock.json"), "{}").unwrap();
    std::fs::create_dir_all(dir.join("plugins")).unwrap();
    std::fs::write(dir.join("plugins/weather.plugin.js"), "weather").unwrap();
    std::fs::write(dir.join("plugins/search.plugin.js"), "search").unwrap();
}

/// A port that was just free (bind-then-drop).
pub fn unbound_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Serve plain HTTP 200s on the port until the runtime shuts down.
/// A port that is already being served is left alone.
pub async fn spawn_http_ok(port: u16) {
    let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await else {
        return;
    };
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let _ = sock
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    )
                    .await;
            });
        }
    });
}

/// Call log shared across fakes.
#[derive(Default)]
pub struct CallLog {
    entries: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// Version control fake with a mutable current revision.
pub struct FakeVcs {
    pub current: Arc<Mutex<String>>,
    pub remote_head: String,
    pub clean: bool,
    pub incoming: Vec<String>,
    pub calls: Arc<CallLog>,
}

impl FakeVcs {
    pub fn new(current: &str, remote_head: &str) -> Self {
        Self {
            current: Arc::new(Mutex::new(current.to_string())),
            remote_head: remote_head.to_string(),
            clean: true,
            incoming: Vec::new(),
            calls: Arc::new(CallLog::default()),
        }
    }

    pub fn revision(&self) -> String {
        self.current.lock().unwrap().clone()
    }
}

impl VersionControl for FakeVcs {
    fn is_repo(&self) -> bool {
        true
    }

    fn head_revision(&self) -> BoxFuture<'_, Result<String>> {
        let rev = self.revision();
        Box::pin(async move { Ok(rev) })
    }

    fn is_clean(&self) -> BoxFuture<'_, Result<bool>> {
        let clean = self.clean;
        Box::pin(async move { Ok(clean) })
    }

    fn fetch(&self) -> BoxFuture<'_, Result<()>> {
        self.calls.push("fetch");
        Box::pin(async { Ok(()) })
    }

    fn commits_behind(&self) -> BoxFuture<'_, Result<u64>> {
        let behind = u64::from(self.revision() != self.remote_head);
        Box::pin(async move { Ok(behind) })
    }

    fn incoming_messages(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let incoming = self.incoming.clone();
        Box::pin(async move { Ok(incoming) })
    }

    fn checkout<'a>(&'a self, revision: &'a str) -> BoxFuture<'a, Result<()>> {
        self.calls.push(format!("checkout {revision}"));
        *self.current.lock().unwrap() = revision.to_string();
        Box::pin(async { Ok(()) })
    }

    fn update_to_remote_head(&self) -> BoxFuture<'_, Result<String>> {
        self.calls.push("update");
        let head = self.remote_head.clone();
        *self.current.lock().unwrap() = head.clone();
        Box::pin(async move { Ok(head) })
    }
}

/// Supervisor fake that can bring up a real loopback HTTP listener.
pub struct FakeSupervisor {
    pub port: u16,
    pub serve_on_restart: bool,
    pub serve_on_start: bool,
    pub calls: Arc<CallLog>,
}

impl FakeSupervisor {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            serve_on_restart: false,
            serve_on_start: false,
            calls: Arc::new(CallLog::default()),
        }
    }
}

impl ServiceSupervisor for FakeSupervisor {
    fn kind(&self) -> &'static str {
        "fake"
    }

    fn is_active(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        self.calls.push("start");
        let serve = self.serve_on_start;
        let port = self.port;
        Box::pin(async move {
            if serve {
                spawn_http_ok(port).await;
            }
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        self.calls.push("stop");
        Box::pin(async { Ok(()) })
    }

    fn restart(&self) -> BoxFuture<'_, Result<()>> {
        self.calls.push("restart");
        let serve = self.serve_on_restart;
        let port = self.port;
        Box::pin(async move {
            if serve {
                spawn_http_ok(port).await;
            }
            Ok(())
        })
    }

    fn recent_logs(&self, _since_secs: u64) -> BoxFuture<'_, Result<String>> {
        Box::pin(async { Ok(String::new()) })
    }
}

/// Package manager fake with failure switches.
pub struct FakePkg {
    pub fail_install: bool,
    pub fail_build: bool,
    pub calls: Arc<CallLog>,
}

impl FakePkg {
    pub fn new() -> Self {
        Self {
            fail_install: false,
            fail_build: false,
            calls: Arc::new(CallLog::default()),
        }
    }
}

impl PackageManager for FakePkg {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn lockfile(&self) -> Option<String> {
        Some("package-lock.json".to_string())
    }

    fn install(&self) -> BoxFuture<'_, Result<()>> {
        self.calls.push("install");
        let fail = self.fail_install;
        Box::pin(async move {
            if fail {
                Err(vigil_core::Error::Config("install exploded".to_string()))
            } else {
                Ok(())
            }
        })
    }

    fn build(&self) -> BoxFuture<'_, Result<bool>> {
        self.calls.push("build");
        let fail = self.fail_build;
        Box::pin(async move {
            if fail {
                Err(vigil_core::Error::Config("build exploded".to_string()))
            } else {
                Ok(true)
            }
        })
    }
}
