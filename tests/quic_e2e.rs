use anyhow::Result;
use quicdrop::log::{TransferLog, TransferStatus};
use quicdrop::logger::{Logger, NoopLogger};
use quicdrop::net_async::{client, server};
use quicdrop::protocol::{close_code, ALPN};
use quicdrop::sink::FileSink;
use quicdrop::tls;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(20);

async fn start_server(root: &Path, logger: Arc<dyn Logger>) -> Result<(SocketAddr, JoinHandle<()>)> {
    let identity = tls::generate_server_config()?;
    let endpoint = server::bind_endpoint("127.0.0.1:0", identity.config).await?;
    let addr = endpoint.local_addr()?;
    let sink = Arc::new(FileSink::new(root));
    let task = tokio::spawn(async move {
        let _ = server::run(endpoint, sink, logger).await;
    });
    Ok((addr, task))
}

// (file name, content) for every regular file in `dir`
fn received_files(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_file())
        .map(|e| {
            (
                e.file_name().to_string_lossy().into_owned(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect();
    out.sort();
    out
}

fn assert_stamped(fname: &str, prefix: &str) {
    assert!(fname.starts_with(prefix), "{} should start with {}", fname, prefix);
    assert!(fname.ends_with(".txt"));
    let stamp = &fname[prefix.len()..fname.len() - 4];
    assert_eq!(stamp.len(), 14, "timestamp in {}", fname);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_round_trip() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, server_task) = start_server(tmp.path(), Arc::new(NoopLogger)).await?;

    let content = "This is the content of the test file.";
    let mut rd = content.as_bytes();
    let sent = timeout(LIMIT, client::send_file(&addr.to_string(), b"test_file.txt", &mut rd)).await??;
    assert_eq!(sent, content.len() as u64);

    let files = received_files(tmp.path());
    assert_eq!(files.len(), 1);
    assert_stamped(&files[0].0, "test_file.txt_");
    assert_eq!(files[0].1, content.as_bytes());

    server_task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quic_concurrent_transfers_do_not_interleave() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, server_task) = start_server(tmp.path(), Arc::new(NoopLogger)).await?;
    let addr = addr.to_string();

    // Mix of tiny and multi-packet payloads
    let payload = |i: usize| -> Vec<u8> {
        let len = if i % 2 == 0 { 64 * 1024 + i } else { 32 + i };
        (0..len).map(|j| (i * 31 + j) as u8).collect()
    };

    let mut tasks = Vec::new();
    for i in 0..8usize {
        let addr = addr.clone();
        let data = payload(i);
        tasks.push(tokio::spawn(async move {
            let name = format!("client_{}.bin", i);
            let mut rd = data.as_slice();
            client::send_file(&addr, name.as_bytes(), &mut rd).await
        }));
    }
    for t in tasks {
        timeout(LIMIT, t).await???;
    }

    let files = received_files(tmp.path());
    assert_eq!(files.len(), 8);
    for i in 0..8usize {
        let prefix = format!("client_{}.bin_", i);
        let matching: Vec<_> = files.iter().filter(|(n, _)| n.starts_with(&prefix)).collect();
        assert_eq!(matching.len(), 1, "exactly one file for client {}", i);
        assert_stamped(&matching[0].0, &prefix);
        assert_eq!(matching[0].1, payload(i), "content for client {}", i);
    }

    server_task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_truncated_header_creates_no_file() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let journal = tmp.path().join("journal.jsonl");
    let out = tmp.path().join("out");
    std::fs::create_dir(&out)?;
    let (addr, server_task) = start_server(&out, Arc::new(TransferLog::open(&journal)?)).await?;

    let (endpoint, conn) = timeout(LIMIT, client::connect(addr, ALPN)).await??;
    let (mut send, _recv) = conn.open_bi().await?;
    // Declares a 10 byte filename, delivers two
    send.write_all(&[10u8, b'a', b'b']).await?;
    send.finish()?;

    match timeout(LIMIT, conn.closed()).await? {
        quinn::ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code.into_inner(), u64::from(close_code::FAILED));
        }
        other => panic!("unexpected close: {}", other),
    }
    endpoint.wait_idle().await;

    assert!(received_files(&out).is_empty());
    let entries = TransferLog::read(&journal)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, TransferStatus::Failed);
    assert!(entries[0].destination.is_none());

    server_task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_stalled_transfer_does_not_hold_up_others() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, server_task) = start_server(tmp.path(), Arc::new(NoopLogger)).await?;

    // First sender: header plus part of the payload, then goes quiet
    let (endpoint, conn) = timeout(LIMIT, client::connect(addr, ALPN)).await??;
    let (mut send, _recv) = conn.open_bi().await?;
    send.write_all(&quicdrop::protocol_core::encode_header(b"slow")?).await?;
    send.write_all(b"first half, ").await?;

    // Its destination file exists once the server is inside the copy
    timeout(LIMIT, async {
        while received_files(tmp.path()).is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    // A second transfer completes while the first is still mid-copy
    let mut rd: &[u8] = b"fast payload";
    timeout(LIMIT, client::send_file(&addr.to_string(), b"fast", &mut rd)).await??;
    let files = received_files(tmp.path());
    assert_eq!(files.len(), 2);
    let fast = files.iter().find(|(n, _)| n.starts_with("fast_")).unwrap();
    assert_eq!(fast.1, b"fast payload");

    send.write_all(b"second half").await?;
    send.finish()?;
    match timeout(LIMIT, conn.closed()).await? {
        quinn::ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code.into_inner(), u64::from(close_code::DONE));
        }
        other => panic!("unexpected close: {}", other),
    }
    endpoint.wait_idle().await;

    let files = received_files(tmp.path());
    let slow = files.iter().find(|(n, _)| n.starts_with("slow_")).unwrap();
    assert_stamped(&slow.0, "slow_");
    assert_eq!(slow.1, b"first half, second half");

    server_task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_journal_records_success() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let journal = tmp.path().join("journal.jsonl");
    let out = tmp.path().join("out");
    std::fs::create_dir(&out)?;
    let (addr, server_task) = start_server(&out, Arc::new(TransferLog::open(&journal)?)).await?;

    let mut rd: &[u8] = b"0123456789";
    timeout(LIMIT, client::send_file(&addr.to_string(), b"digits", &mut rd)).await??;

    let entries = TransferLog::read(&journal)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, TransferStatus::Completed);
    assert_eq!(entries[0].bytes_transferred, 10);
    let dest = entries[0].destination.clone().unwrap();
    assert_eq!(std::fs::read(dest)?, b"0123456789");

    server_task.abort();
    Ok(())
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_filename_bytes_are_not_sanitized() -> Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let tmp = tempfile::tempdir()?;
    std::fs::create_dir(tmp.path().join("nested"))?;
    let (addr, server_task) = start_server(tmp.path(), Arc::new(NoopLogger)).await?;
    let addr = addr.to_string();

    let mut rd: &[u8] = b"ctrl";
    timeout(LIMIT, client::send_file(&addr, b"odd\x01\x7fname", &mut rd)).await??;
    let mut rd: &[u8] = b"sep";
    timeout(LIMIT, client::send_file(&addr, b"nested/inner", &mut rd)).await??;
    let mut rd: &[u8] = b"anon";
    timeout(LIMIT, client::send_file(&addr, b"", &mut rd)).await??;

    let top: Vec<_> = std::fs::read_dir(tmp.path())?
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_file())
        .collect();
    assert_eq!(top.len(), 2);
    let ctrl = top
        .iter()
        .find(|p| p.file_name().unwrap().as_bytes().starts_with(b"odd\x01\x7fname_"))
        .expect("control-byte name kept verbatim");
    assert_eq!(std::fs::read(ctrl)?, b"ctrl");
    let anon = top
        .iter()
        .find(|p| p.file_name().unwrap().as_bytes().starts_with(b"_"))
        .expect("empty filename yields _<timestamp>.txt");
    assert_stamped(&anon.file_name().unwrap().to_string_lossy(), "_");

    // A '/' in the filename lands in a subdirectory
    let nested = received_files(&tmp.path().join("nested"));
    assert_eq!(nested.len(), 1);
    assert_stamped(&nested[0].0, "inner_");
    assert_eq!(nested[0].1, b"sep");

    server_task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quic_wrong_alpn_is_rejected() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, server_task) = start_server(tmp.path(), Arc::new(NoopLogger)).await?;

    let res = timeout(LIMIT, client::connect(addr, b"not-quic-file-transfer")).await?;
    assert!(res.is_err());
    assert!(received_files(tmp.path()).is_empty());

    // The listener keeps serving after a failed handshake
    let mut rd: &[u8] = b"still up";
    timeout(LIMIT, client::send_file(&addr.to_string(), b"after", &mut rd)).await??;
    assert_eq!(received_files(tmp.path()).len(), 1);

    server_task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bind_conflict_is_fatal_at_startup() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let taken = std::net::UdpSocket::bind("127.0.0.1:0")?;
    let bind = taken.local_addr()?.to_string();

    let res = timeout(LIMIT, server::serve(&bind, tmp.path(), Arc::new(NoopLogger))).await?;
    let err = res.expect_err("serve must fail when the port is in use");
    assert!(format!("{:#}", err).contains("bind"));
    assert!(received_files(tmp.path()).is_empty());
    Ok(())
}
