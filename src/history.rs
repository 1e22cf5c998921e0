//! 전송 이력
//!
//! 완료된 파일 전송만 추가되는 기록. 기본 구현은 프로세스 메모리에만 있고
//! 재시작하면 사라진다. 영속 저장이 필요하면 `HistoryStore`를 구현해 주입한다.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Sent,
    Received,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => f.pad("Sent"),
            Self::Received => f.pad("Received"),
        }
    }
}

/// 완료된 전송 기록 (추가 후 불변)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub filename: String,
    pub size: u64,
    pub direction: TransferDirection,
    pub peer: Option<SocketAddr>,
    pub completed_at: DateTime<Local>,
}

impl HistoryRecord {
    pub fn new(
        filename: impl Into<String>,
        size: u64,
        direction: TransferDirection,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            filename: filename.into(),
            size,
            direction,
            peer,
            completed_at: Local::now(),
        }
    }
}

impl fmt::Display for HistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {:<8}  {}  {} bytes",
            self.completed_at.format("%Y-%m-%d %H:%M:%S"),
            self.direction,
            self.filename,
            self.size
        )
    }
}

/// 추가 전용 이력 저장소
pub trait HistoryStore: Send + Sync {
    /// 기록 추가 (동시 호출 안전)
    fn append(&self, record: HistoryRecord);

    /// 추가된 순서대로 전체 기록
    fn records(&self) -> Vec<HistoryRecord>;

    fn len(&self) -> usize {
        self.records().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 메모리 이력
#[derive(Debug, Default)]
pub struct HistoryLedger {
    records: Mutex<Vec<HistoryRecord>>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for HistoryLedger {
    fn append(&self, record: HistoryRecord) {
        debug!("history append: {}", record);
        self.records.lock().push(record);
    }

    fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().clone()
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }
}
