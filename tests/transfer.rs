//! 루프백 TCP 위에서 수신자와 송신자를 함께 돌리는 시나리오

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngCore;

use sft::event::EventReceiver;
use sft::{
    Config, Credential, Error, EventSink, ListenerHandle, Receiver, Sender, TransferDirection,
    TransferEvent, TransferStatus,
};

const WAIT: Duration = Duration::from_secs(10);

async fn start_receiver(save_dir: &Path, config: Config) -> (Receiver, ListenerHandle, EventReceiver) {
    let mut config = config;
    config.save_dir = save_dir.to_path_buf();

    let (events, rx) = EventSink::channel();
    let receiver = Receiver::new(config).with_events(events);
    let handle = receiver.start_listening(0).await.unwrap();
    (receiver, handle, rx)
}

fn random_file(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    let path = dir.join(name);
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

/// 조건이 만족될 때까지 짧게 폴링
async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_single_file_progress_and_history() {
    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    let (receiver, handle, mut rx) =
        start_receiver(inbox.path(), Config::receiver(inbox.path(), "secret")).await;
    let port = handle.local_addr().port();

    let (path, data) = random_file(outbox.path(), "payload.bin", 150_000);

    let sender = Sender::new(Config::sender());
    let report = sender
        .send_files("127.0.0.1", port, &Credential::new("secret"), &[&path])
        .await
        .unwrap();
    assert_eq!(report.completed.len(), 1);
    assert!(report.skipped.is_empty());

    wait_until(|| receiver.history().len() == 1).await;

    let received = std::fs::read(inbox.path().join("payload.bin")).unwrap();
    assert_eq!(received, data);

    let history = receiver.history();
    assert_eq!(history[0].filename, "payload.bin");
    assert_eq!(history[0].size, 150_000);
    assert_eq!(history[0].direction, TransferDirection::Received);

    let sent = sender.history();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].direction, TransferDirection::Sent);

    // 성공 문구는 이력 추가 직후에 나감
    let mut percents = Vec::new();
    tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            match event {
                TransferEvent::Progress { percent, .. } => percents.push(percent),
                TransferEvent::Status { text, .. } if text == "File 'payload.bin' received successfully!" => {
                    break
                }
                _ => {}
            }
        }
    })
    .await
    .expect("no success status");
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));

    handle.shutdown();
}

#[tokio::test]
async fn test_wrong_credential_writes_nothing() {
    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    let (receiver, handle, _rx) =
        start_receiver(inbox.path(), Config::receiver(inbox.path(), "secret")).await;
    let port = handle.local_addr().port();

    let (path, _) = random_file(outbox.path(), "denied.bin", 4096);

    let sender = Sender::new(Config::sender());
    let err = sender
        .send_files("127.0.0.1", port, &Credential::new("wrong"), &[&path])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(receiver.history().is_empty());
    assert!(sender.history().is_empty());
    assert_eq!(std::fs::read_dir(inbox.path()).unwrap().count(), 0);

    handle.shutdown();
}

#[tokio::test]
async fn test_multiple_files_in_one_session() {
    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    let (receiver, handle, _rx) =
        start_receiver(inbox.path(), Config::receiver(inbox.path(), "secret")).await;
    let port = handle.local_addr().port();

    let files = [
        random_file(outbox.path(), "a.bin", 0),
        random_file(outbox.path(), "b.bin", 65_536),
        random_file(outbox.path(), "c.bin", 200_001),
    ];
    let missing = outbox.path().join("missing.bin");
    let mut paths: Vec<PathBuf> = files.iter().map(|(p, _)| p.clone()).collect();
    paths.insert(1, missing.clone());

    let sender = Sender::new(Config::sender().with_chunk_size(4096));
    let report = sender
        .send_files("127.0.0.1", port, &Credential::new("secret"), &paths)
        .await
        .unwrap();

    assert_eq!(report.completed.len(), 3);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, missing);

    wait_until(|| receiver.history().len() == 3).await;
    for (path, data) in &files {
        let name = path.file_name().unwrap();
        assert_eq!(&std::fs::read(inbox.path().join(name)).unwrap(), data);
    }

    let names: Vec<_> = receiver.history().into_iter().map(|r| r.filename).collect();
    assert_eq!(names, vec!["a.bin", "b.bin", "c.bin"]);

    handle.shutdown();
}

#[tokio::test]
async fn test_existing_file_is_renamed() {
    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    std::fs::write(inbox.path().join("report.pdf"), b"keep me").unwrap();

    let (receiver, handle, _rx) =
        start_receiver(inbox.path(), Config::receiver(inbox.path(), "secret")).await;
    let port = handle.local_addr().port();

    let (path, data) = random_file(outbox.path(), "report.pdf", 1000);
    Sender::new(Config::sender())
        .send_files("127.0.0.1", port, &Credential::new("secret"), &[&path])
        .await
        .unwrap();

    wait_until(|| receiver.history().len() == 1).await;
    assert_eq!(std::fs::read(inbox.path().join("report.pdf")).unwrap(), b"keep me");
    assert_eq!(std::fs::read(inbox.path().join("report (1).pdf")).unwrap(), data);
    assert_eq!(receiver.history()[0].filename, "report (1).pdf");

    handle.shutdown();
}

#[tokio::test]
async fn test_pause_and_resume_mid_stream() {
    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    let (receiver, handle, _rx) =
        start_receiver(inbox.path(), Config::receiver(inbox.path(), "secret")).await;
    let port = handle.local_addr().port();

    let (path, data) = random_file(outbox.path(), "big.bin", 4_000_000);

    let (events, mut sender_rx) = EventSink::channel();
    let sender = Sender::new(Config::sender().with_chunk_size(8192)).with_events(events);

    // 첫 청크가 나간 뒤에 일시정지
    let pauser = {
        let sender = sender.clone();
        tokio::spawn(async move {
            while let Some(event) = sender_rx.recv().await {
                if matches!(event, TransferEvent::Progress { percent, .. } if percent < 100) {
                    sender.pause();
                    break;
                }
            }
        })
    };

    let task = {
        let sender = sender.clone();
        tokio::spawn(async move {
            sender
                .send_files("127.0.0.1", port, &Credential::new("secret"), &[path])
                .await
        })
    };

    pauser.await.unwrap();
    wait_until(|| {
        sender
            .sessions()
            .iter()
            .any(|s| s.status == TransferStatus::Paused)
    })
    .await;

    // 파일 중간에서 멈추고 일시정지 동안은 진행하지 않음
    let before = sender.sessions()[0].bytes_moved;
    assert!(before > 0);
    assert!(before < data.len() as u64);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sender.sessions()[0].bytes_moved, before);
    assert!(receiver.history().is_empty());

    sender.resume();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.completed.len(), 1);

    wait_until(|| receiver.history().len() == 1).await;
    assert_eq!(std::fs::read(inbox.path().join("big.bin")).unwrap(), data);

    handle.shutdown();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_blocks_remaining_files() {
    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    let (receiver, handle, _rx) =
        start_receiver(inbox.path(), Config::receiver(inbox.path(), "secret")).await;
    let port = handle.local_addr().port();

    let (path, _) = random_file(outbox.path(), "never.bin", 10_000);

    let sender = Sender::new(Config::sender());
    sender.stop();
    let state = sender.control().state();
    sender.stop();
    assert_eq!(sender.control().state(), state);

    let err = sender
        .send_files("127.0.0.1", port, &Credential::new("secret"), &[&path])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Stopped));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(receiver.history().is_empty());
    assert!(!inbox.path().join("never.bin").exists());

    // 재설정 후에는 다시 보낼 수 있음
    sender.reset();
    sender
        .send_files("127.0.0.1", port, &Credential::new("secret"), &[&path])
        .await
        .unwrap();
    wait_until(|| receiver.history().len() == 1).await;

    handle.shutdown();
}

#[tokio::test]
async fn test_stop_mid_stream_removes_partial_file() {
    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    let (receiver, handle, _rx) =
        start_receiver(inbox.path(), Config::receiver(inbox.path(), "secret")).await;
    let port = handle.local_addr().port();

    let (path, _) = random_file(outbox.path(), "halted.bin", 1_000_000);

    let sender = Sender::new(Config::sender().with_chunk_size(8192));
    sender.pause();

    let task = {
        let sender = sender.clone();
        tokio::spawn(async move {
            sender
                .send_files("127.0.0.1", port, &Credential::new("secret"), &[path])
                .await
        })
    };

    wait_until(|| {
        sender
            .sessions()
            .iter()
            .any(|s| s.status == TransferStatus::Paused)
    })
    .await;

    sender.stop();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Stopped));
    assert!(sender.history().is_empty());

    // 수신측은 연결이 끊긴 것을 보고 부분 파일을 지움
    wait_until(|| receiver.sessions().is_empty()).await;
    assert!(!inbox.path().join("halted.bin").exists());
    assert!(receiver.history().is_empty());

    handle.shutdown();
}

#[tokio::test]
async fn test_concurrent_sessions_append_all_history() {
    const SESSIONS: usize = 6;

    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    let (receiver, handle, _rx) =
        start_receiver(inbox.path(), Config::receiver(inbox.path(), "secret")).await;
    let port = handle.local_addr().port();

    let sender = Sender::new(Config::sender().with_chunk_size(4096));
    let mut files = Vec::new();
    let mut tasks = Vec::new();
    for i in 0..SESSIONS {
        let (path, data) = random_file(outbox.path(), &format!("file{}.bin", i), 50_000 + i * 1000);
        files.push((path.clone(), data));

        let sender = sender.clone();
        tasks.push(tokio::spawn(async move {
            sender
                .send_files("127.0.0.1", port, &Credential::new("secret"), &[path])
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().completed.len(), 1);
    }

    wait_until(|| receiver.history().len() == SESSIONS).await;
    assert_eq!(sender.history().len(), SESSIONS);

    for (path, data) in &files {
        let name = path.file_name().unwrap();
        assert_eq!(&std::fs::read(inbox.path().join(name)).unwrap(), data);
    }

    handle.shutdown();
}

#[tokio::test]
async fn test_broadcast_pause_holds_every_session() {
    let inbox = tempfile::tempdir().unwrap();
    let outbox = tempfile::tempdir().unwrap();
    let (receiver, handle, _rx) = start_receiver(
        inbox.path(),
        Config::receiver(inbox.path(), "secret").broadcast_control(),
    )
    .await;
    let port = handle.local_addr().port();

    receiver.pause();

    let mut tasks = Vec::new();
    for i in 0..2 {
        let (path, _) = random_file(outbox.path(), &format!("held{}.bin", i), 300_000);
        let sender = Sender::new(Config::sender());
        tasks.push(tokio::spawn(async move {
            sender
                .send_files("127.0.0.1", port, &Credential::new("secret"), &[path])
                .await
        }));
    }

    wait_until(|| {
        let sessions = receiver.sessions();
        sessions.len() == 2 && sessions.iter().all(|s| s.status == TransferStatus::Paused)
    })
    .await;
    assert!(receiver.history().is_empty());

    receiver.resume();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    wait_until(|| receiver.history().len() == 2).await;

    handle.shutdown();
}
