//! SFT 송신자
//!
//! 수신자에 연결해 파일 목록을 순서대로 보낸다.
//! 전송 중 표준 입력으로 pause / resume / stop 명령을 받는다.
//!
//! 사용법:
//!   cargo run --release --bin sft-sender -- [OPTIONS] <FILES>...
//!
//! 예시:
//!   cargo run --release --bin sft-sender -- --host 192.168.1.100 --credential secret a.bin b.txt

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use sft::event::EventReceiver;
use sft::stats::{format_size, format_speed};
use sft::{Config, Credential, EventSink, Sender, TransferEvent, DEFAULT_CREDENTIAL, DEFAULT_PORT};

#[derive(Debug, Parser)]
#[command(name = "sft-sender", version, about = "SFT sender - send files over TCP")]
struct Args {
    /// 수신자 주소
    #[arg(long, env = "SFT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// 수신자 포트
    #[arg(short, long, env = "SFT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// 공유 비밀
    #[arg(short, long, env = "SFT_CREDENTIAL", default_value = DEFAULT_CREDENTIAL)]
    credential: String,

    /// 청크 크기 (바이트)
    #[arg(long, default_value_t = sft::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// 인증 타임아웃 (초)
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// 보낼 파일
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();

    let mut config = Config::sender().with_chunk_size(args.chunk_size);
    if let Some(secs) = args.handshake_timeout {
        config = config.with_handshake_timeout(Duration::from_secs(secs));
    }

    let (events, rx) = EventSink::channel();
    let sender = Sender::new(config).with_events(events);
    let credential = Credential::new(args.credential);

    tokio::spawn(print_events(rx));
    spawn_command_reader(sender.clone());

    let report = sender
        .send_files(&args.host, args.port, &credential, &args.files)
        .await
        .with_context(|| format!("{}:{} 전송 실패", args.host, args.port))?;

    info!(
        "전송 완료: {} file(s) sent, {} skipped",
        report.completed.len(),
        report.skipped.len()
    );
    for skipped in &report.skipped {
        warn!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    for record in sender.history() {
        println!("{}", record);
    }

    Ok(())
}

/// 알림 출력
async fn print_events(mut rx: EventReceiver) {
    let mut speed: Option<f64> = None;
    let mut eta: Option<f64> = None;
    let mut last_decile: Option<u8> = None;

    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::Status { text, .. } => println!("{}", text),
            TransferEvent::Progress { percent, .. } => {
                if last_decile != Some(percent / 10) {
                    last_decile = Some(percent / 10);
                    println!(
                        "{:>3}% {} eta {}",
                        percent,
                        speed.map(format_speed).unwrap_or_default(),
                        eta.map(|s| format!("{:.1}s", s)).unwrap_or_else(|| "-".to_string()),
                    );
                }
            }
            TransferEvent::Speed { bytes_per_sec, .. } => speed = Some(bytes_per_sec),
            TransferEvent::Eta { seconds, .. } => eta = Some(seconds),
            TransferEvent::HistoryAppended(record) => {
                println!("  + {} ({})", record.filename, format_size(record.size));
            }
            TransferEvent::Error { message, .. } => eprintln!("{}", message),
        }
    }
}

/// 표준 입력 명령 처리 (전용 스레드, 블로킹 읽기)
fn spawn_command_reader(sender: Sender) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "pause" => sender.pause(),
                "resume" => sender.resume(),
                "stop" => sender.stop(),
                "sessions" => {
                    for s in sender.sessions() {
                        println!(
                            "#{} {} {}/{} ({}%) eta {:.1}s",
                            s.session_id,
                            s.filename.unwrap_or_default(),
                            s.bytes_moved,
                            s.size,
                            s.percent,
                            s.eta.unwrap_or(0.0),
                        );
                    }
                }
                "" => {}
                other => eprintln!("알 수 없는 명령: {}", other),
            }
        }
    });
}
