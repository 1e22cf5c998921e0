//! SFT 수신자
//!
//! 포트 하나에서 연결을 받아 저장 디렉터리에 파일을 기록한다.
//! 표준 입력으로 제어 명령을 받는다.
//!
//! 사용법:
//!   cargo run --release --bin sft-receiver -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin sft-receiver -- --port 5000 --save-dir ./inbox --credential secret
//!
//! 명령 (표준 입력):
//!   pause | resume | stop | reset | history | sessions | dir <PATH> | quit

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::sync::oneshot;
use tracing::info;

use sft::event::EventReceiver;
use sft::stats::{format_size, format_speed};
use sft::{
    CollisionPolicy, Config, Credential, EventSink, Receiver, TransferEvent, DEFAULT_CREDENTIAL,
    DEFAULT_PORT,
};

/// 파일 이름 충돌 처리
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Collision {
    Overwrite,
    Rename,
    Reject,
}

impl From<Collision> for CollisionPolicy {
    fn from(c: Collision) -> Self {
        match c {
            Collision::Overwrite => CollisionPolicy::Overwrite,
            Collision::Rename => CollisionPolicy::Rename,
            Collision::Reject => CollisionPolicy::Reject,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "sft-receiver", version, about = "SFT receiver - accept files over TCP")]
struct Args {
    /// 수신 포트
    #[arg(short, long, env = "SFT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// 저장 디렉터리 (기본: 현재 디렉터리)
    #[arg(short = 'd', long, env = "SFT_SAVE_DIR")]
    save_dir: Option<PathBuf>,

    /// 공유 비밀
    #[arg(short, long, env = "SFT_CREDENTIAL", default_value = DEFAULT_CREDENTIAL)]
    credential: String,

    /// 모든 세션이 하나의 일시정지/중지를 공유
    #[arg(long)]
    broadcast: bool,

    /// 파일 이름 충돌 처리
    #[arg(long, value_enum, default_value_t = Collision::Rename)]
    collision: Collision,

    /// 인증 타임아웃 (초)
    #[arg(long)]
    handshake_timeout: Option<u64>,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::new();
        config.port = self.port;
        if let Some(dir) = self.save_dir {
            config.save_dir = dir;
        }
        config.credential = Credential::new(self.credential);
        if self.broadcast {
            config = config.broadcast_control();
        }
        config = config.with_collision_policy(self.collision.into());
        if let Some(secs) = self.handshake_timeout {
            config = config.with_handshake_timeout(Duration::from_secs(secs));
        }
        config
    }
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

    let config = Args::parse().into_config();
    let port = config.port;
    info!("Save directory: {}", config.save_dir.display());

    let (events, rx) = EventSink::channel();
    let receiver = Receiver::new(config).with_events(events);

    tokio::spawn(print_events(rx));

    let handle = receiver
        .start_listening(port)
        .await
        .with_context(|| format!("port {} 수신 시작 실패", port))?;

    let quit = spawn_command_reader(receiver.clone());

    tokio::select! {
        _ = quit => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    handle.shutdown();
    Ok(())
}

/// 알림 출력
async fn print_events(mut rx: EventReceiver) {
    // 세션별 마지막으로 출력한 진행률 (10% 단위)
    let mut last_decile: HashMap<u64, u8> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::Status { session, text } => match session {
                Some(id) => println!("[#{}] {}", id, text),
                None => println!("{}", text),
            },
            TransferEvent::Progress { session, percent } => {
                let decile = percent / 10;
                if last_decile.get(&session) != Some(&decile) {
                    last_decile.insert(session, decile);
                    println!("[#{}] {}%", session, percent);
                }
            }
            TransferEvent::Speed { .. } | TransferEvent::Eta { .. } => {}
            TransferEvent::HistoryAppended(record) => {
                println!("  + {} ({})", record.filename, format_size(record.size));
            }
            TransferEvent::Error { session, message } => match session {
                Some(id) => eprintln!("[#{}] {}", id, message),
                None => eprintln!("{}", message),
            },
        }
    }
}

/// 표준 입력 명령 처리
///
/// 대화형 입력은 전용 스레드에서 블로킹으로 읽는다. `quit`이나 EOF에서 끝난다.
fn spawn_command_reader(receiver: Receiver) -> oneshot::Receiver<()> {
    let (quit_tx, quit_rx) = oneshot::channel();

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let mut parts = line.trim().splitn(2, ' ');
            match (parts.next().unwrap_or(""), parts.next()) {
                ("pause", _) => receiver.pause(),
                ("resume", _) => receiver.resume(),
                ("stop", _) => receiver.stop(),
                ("reset", _) => receiver.reset(),
                ("history", _) => {
                    for record in receiver.history() {
                        println!("{}", record);
                    }
                }
                ("sessions", _) => {
                    for s in receiver.sessions() {
                        println!(
                            "#{} {} {} {}/{} ({}%) {}",
                            s.session_id,
                            s.peer.map(|p| p.to_string()).unwrap_or_default(),
                            s.filename.unwrap_or_default(),
                            s.bytes_moved,
                            s.size,
                            s.percent,
                            s.speed.map(format_speed).unwrap_or_default(),
                        );
                    }
                }
                ("dir", Some(path)) => receiver.set_save_directory(path.trim()),
                ("quit", _) | ("exit", _) => break,
                ("", _) => {}
                (other, _) => eprintln!("알 수 없는 명령: {}", other),
            }
        }
        let _ = quit_tx.send(());
    });

    quit_rx
}
