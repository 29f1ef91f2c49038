use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt::{Display, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Report sink for the accept loop and stream handlers. Every method has a
/// no-op default so implementations pick the events they care about.
pub trait Logger: Send + Sync {
    fn listening(&self, _addr: SocketAddr, _fingerprint: &str) {}
    fn accept_failed(&self, _peer: Option<SocketAddr>, _msg: &str) {}
    fn receiving(&self, _id: Uuid, _peer: SocketAddr, _name: &[u8], _dest: &Path) {}
    fn received(&self, _id: Uuid, _peer: SocketAddr, _dest: &Path, _bytes: u64, _seconds: f64) {}
    /// `bytes` is the payload that reached `dest` before the failure.
    fn failed(&self, _id: Uuid, _peer: SocketAddr, _dest: Option<&Path>, _bytes: u64, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// `[<rfc3339>] EVENT key=value ...`
fn render(event: &str, fields: &[(&str, &dyn Display)]) -> String {
    let mut out = format!("[{}] {}", Utc::now().to_rfc3339(), event);
    for (key, value) in fields {
        let _ = write!(out, " {}={}", key, value);
    }
    out
}

fn or_dash<T: Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

fn listening_line(addr: SocketAddr, fingerprint: &str) -> String {
    render("LISTEN", &[("addr", &addr), ("cert_sha256", &fingerprint)])
}

fn accept_failed_line(peer: Option<SocketAddr>, msg: &str) -> String {
    render("ACCEPT_ERROR", &[("peer", &or_dash(peer)), ("msg", &msg)])
}

fn receiving_line(id: Uuid, peer: SocketAddr, name: &[u8], dest: &Path) -> String {
    let name = format!("{:?}", String::from_utf8_lossy(name));
    render(
        "RECV",
        &[("id", &id), ("peer", &peer), ("name", &name), ("dst", &dest.display())],
    )
}

fn received_line(id: Uuid, peer: SocketAddr, dest: &Path, bytes: u64, seconds: f64) -> String {
    let seconds = format!("{:.3}", seconds);
    render(
        "DONE",
        &[
            ("id", &id),
            ("peer", &peer),
            ("dst", &dest.display()),
            ("bytes", &bytes),
            ("seconds", &seconds),
        ],
    )
}

fn failed_line(id: Uuid, peer: SocketAddr, dest: Option<&Path>, bytes: u64, msg: &str) -> String {
    render(
        "ERROR",
        &[
            ("id", &id),
            ("peer", &peer),
            ("dst", &or_dash(dest.map(Path::display))),
            ("bytes", &bytes),
            ("msg", &msg),
        ],
    )
}

/// Human-readable lines: progress on stdout, failures on stderr.
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn listening(&self, addr: SocketAddr, fingerprint: &str) {
        println!("{}", listening_line(addr, fingerprint));
    }
    fn accept_failed(&self, peer: Option<SocketAddr>, msg: &str) {
        eprintln!("{}", accept_failed_line(peer, msg));
    }
    fn receiving(&self, id: Uuid, peer: SocketAddr, name: &[u8], dest: &Path) {
        println!("{}", receiving_line(id, peer, name, dest));
    }
    fn received(&self, id: Uuid, peer: SocketAddr, dest: &Path, bytes: u64, seconds: f64) {
        println!("{}", received_line(id, peer, dest, bytes, seconds));
    }
    fn failed(&self, id: Uuid, peer: SocketAddr, dest: Option<&Path>, bytes: u64, msg: &str) {
        eprintln!("{}", failed_line(id, peer, dest, bytes, msg));
    }
}

/// The console lines, appended to a file. Each line is written through as
/// soon as it is complete.
pub struct TextLogger {
    out: Mutex<LineWriter<File>>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        Ok(Self {
            out: Mutex::new(LineWriter::new(file)),
        })
    }

    // Write errors are dropped; the transfer outcome does not depend on them
    fn emit(&self, line: String) {
        let _ = writeln!(self.out.lock(), "{}", line);
    }
}

impl Logger for TextLogger {
    fn listening(&self, addr: SocketAddr, fingerprint: &str) {
        self.emit(listening_line(addr, fingerprint));
    }
    fn accept_failed(&self, peer: Option<SocketAddr>, msg: &str) {
        self.emit(accept_failed_line(peer, msg));
    }
    fn receiving(&self, id: Uuid, peer: SocketAddr, name: &[u8], dest: &Path) {
        self.emit(receiving_line(id, peer, name, dest));
    }
    fn received(&self, id: Uuid, peer: SocketAddr, dest: &Path, bytes: u64, seconds: f64) {
        self.emit(received_line(id, peer, dest, bytes, seconds));
    }
    fn failed(&self, id: Uuid, peer: SocketAddr, dest: Option<&Path>, bytes: u64, msg: &str) {
        self.emit(failed_line(id, peer, dest, bytes, msg));
    }
}

/// Fans every event out to each inner logger in order.
pub struct TeeLogger(pub Vec<Arc<dyn Logger>>);

impl Logger for TeeLogger {
    fn listening(&self, addr: SocketAddr, fingerprint: &str) {
        self.0.iter().for_each(|l| l.listening(addr, fingerprint));
    }
    fn accept_failed(&self, peer: Option<SocketAddr>, msg: &str) {
        self.0.iter().for_each(|l| l.accept_failed(peer, msg));
    }
    fn receiving(&self, id: Uuid, peer: SocketAddr, name: &[u8], dest: &Path) {
        self.0.iter().for_each(|l| l.receiving(id, peer, name, dest));
    }
    fn received(&self, id: Uuid, peer: SocketAddr, dest: &Path, bytes: u64, seconds: f64) {
        self.0
            .iter()
            .for_each(|l| l.received(id, peer, dest, bytes, seconds));
    }
    fn failed(&self, id: Uuid, peer: SocketAddr, dest: Option<&Path>, bytes: u64, msg: &str) {
        self.0.iter().for_each(|l| l.failed(id, peer, dest, bytes, msg));
    }
}
