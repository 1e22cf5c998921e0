//! # SFT (Simple File Transfer)
//!
//! 공유 비밀 기반 TCP 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **인증 핸드셰이크**: 연결 직후 공유 비밀 문자열 비교
//! - **길이 접두 프레이밍**: 메타데이터가 잘리거나 합쳐지지 않음
//! - **청크 스트리밍**: 64KB 단위 전송, 속도/남은 시간 계산
//! - **일시정지/재개/중지**: 청크 경계에서 확인, 대기 중 CPU 사용 없음
//! - **동시 세션**: 연결마다 독립 태스크, 이력은 직렬화된 추가만 허용

pub mod chunk;
pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod stats;

pub use chunk::ChunkStreamer;
pub use config::{CollisionPolicy, Config, ControlMode, Credential};
pub use control::{ControlState, TransferControl};
pub use error::{Error, Result};
pub use event::{EventSink, TransferEvent};
pub use history::{HistoryLedger, HistoryRecord, HistoryStore, TransferDirection};
pub use message::{Token, TransferRequest};
pub use receiver::{ListenerHandle, Receiver};
pub use sender::{SendReport, Sender, SenderSession};
pub use stats::{TransferSnapshot, TransferState, TransferStatus};

/// 세션 식별자 (프로세스 내 단조 증가)
pub type SessionId = u64;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 65536; // 64KB

/// 기본 최대 프레임 크기 (바이트)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024;

/// 기본 수신 포트
pub const DEFAULT_PORT: u16 = 5000;

/// 기본 공유 비밀
pub const DEFAULT_CREDENTIAL: &str = "default_password";
