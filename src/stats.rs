//! 전송 상태와 통계

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::message::TransferRequest;
use crate::SessionId;

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Idle,
    Authenticating,
    AwaitingAck,
    Streaming,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Idle => "idle",
            TransferStatus::Authenticating => "authenticating",
            TransferStatus::AwaitingAck => "awaiting ack",
            TransferStatus::Streaming => "streaming",
            TransferStatus::Paused => "paused",
            TransferStatus::Stopped => "stopped",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 세션이 소유하는 전송 상태
///
/// 세션 핸들러만 수정하고, 외부에는 `snapshot()`으로 읽기 전용 사본을 넘긴다.
#[derive(Debug, Clone)]
pub struct TransferState {
    pub session_id: SessionId,

    /// 상대 주소
    pub peer: Option<SocketAddr>,

    /// 현재 파일 이름
    pub filename: Option<String>,

    /// 현재 파일 크기
    pub size: u64,

    /// 현재 파일에서 이동한 바이트
    pub bytes_moved: u64,

    /// 현재 파일 시작 시간
    pub start_time: Instant,

    pub status: TransferStatus,
}

impl TransferState {
    pub fn new(session_id: SessionId, peer: Option<SocketAddr>) -> Self {
        Self {
            session_id,
            peer,
            filename: None,
            size: 0,
            bytes_moved: 0,
            start_time: Instant::now(),
            status: TransferStatus::Idle,
        }
    }

    /// 새 파일 시작
    pub fn begin_file(&mut self, request: &TransferRequest) {
        self.filename = Some(request.filename.clone());
        self.size = request.size;
        self.bytes_moved = 0;
        self.start_time = Instant::now();
    }

    /// 청크 기록
    pub fn record_chunk(&mut self, len: usize) {
        self.bytes_moved += len as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_moved == self.size
    }

    /// 진행률 (정수 나눗셈, 내림)
    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.bytes_moved, self.size)
    }

    /// 현재 진행 지표 계산
    pub fn sample(&self) -> ProgressSample {
        ProgressSample::compute(self.bytes_moved, self.size, self.elapsed())
    }

    /// 읽기 전용 사본
    pub fn snapshot(&self) -> TransferSnapshot {
        let sample = self.sample();
        TransferSnapshot {
            session_id: self.session_id,
            peer: self.peer,
            filename: self.filename.clone(),
            size: self.size,
            bytes_moved: self.bytes_moved,
            status: self.status,
            percent: sample.percent,
            speed: sample.speed,
            eta: sample.eta,
        }
    }
}

/// 표시 계층에 공개되는 상태 사본
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSnapshot {
    pub session_id: SessionId,
    pub peer: Option<SocketAddr>,
    pub filename: Option<String>,
    pub size: u64,
    pub bytes_moved: u64,
    pub status: TransferStatus,
    pub percent: u8,
    /// bytes/sec
    pub speed: Option<f64>,
    /// 초
    pub eta: Option<f64>,
}

/// 청크 하나 이후의 진행 지표
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub percent: u8,

    /// 경과 시간이 0이면 None
    pub speed: Option<f64>,

    /// 속도가 0이면 None
    pub eta: Option<f64>,
}

impl ProgressSample {
    pub fn compute(bytes_moved: u64, size: u64, elapsed: Duration) -> Self {
        let percent = progress_percent(bytes_moved, size);

        let secs = elapsed.as_secs_f64();
        let speed = (secs > 0.0).then(|| bytes_moved as f64 / secs);
        let eta = speed
            .filter(|&s| s > 0.0)
            .map(|s| size.saturating_sub(bytes_moved) as f64 / s);

        Self {
            percent,
            speed,
            eta,
        }
    }
}

/// `bytes_moved * 100 / size` (내림). 빈 파일은 100%.
pub fn progress_percent(bytes_moved: u64, size: u64) -> u8 {
    if size == 0 {
        return 100;
    }
    let percent = (bytes_moved as u128 * 100) / size as u128;
    percent.min(100) as u8
}

/// 속도 표시 (KB/s, MB/s)
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec >= 1024.0 * 1024.0 {
        format!("{:.2} MB/s", bytes_per_sec / (1024.0 * 1024.0))
    } else {
        format!("{:.2} KB/s", bytes_per_sec / 1024.0)
    }
}

/// 크기 표시
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_truncates() {
        // 150,000 바이트를 64KB 청크로
        let size = 150_000;
        let steps: Vec<u8> = [65_536u64, 131_072, 150_000]
            .iter()
            .map(|&moved| progress_percent(moved, size))
            .collect();
        assert_eq!(steps, vec![43, 87, 100]);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[test]
    fn test_sample_speed_and_eta() {
        let sample = ProgressSample::compute(500, 1000, Duration::from_secs(2));
        assert_eq!(sample.percent, 50);
        assert_eq!(sample.speed, Some(250.0));
        assert_eq!(sample.eta, Some(2.0));
    }

    #[test]
    fn test_sample_without_elapsed_time() {
        let sample = ProgressSample::compute(500, 1000, Duration::ZERO);
        assert!(sample.speed.is_none());
        assert!(sample.eta.is_none());

        // 속도 0이면 남은 시간도 계산하지 않음
        let sample = ProgressSample::compute(0, 1000, Duration::from_secs(1));
        assert_eq!(sample.speed, Some(0.0));
        assert!(sample.eta.is_none());
    }

    #[test]
    fn test_state_lifecycle() {
        let mut state = TransferState::new(7, None);
        state.begin_file(&TransferRequest::new("a.bin", 100));
        state.record_chunk(60);
        assert!(!state.is_complete());
        state.record_chunk(40);
        assert!(state.is_complete());

        let snapshot = state.snapshot();
        assert_eq!(snapshot.session_id, 7);
        assert_eq!(snapshot.filename.as_deref(), Some("a.bin"));
        assert_eq!(snapshot.percent, 100);
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(2048.0), "2.00 KB/s");
        assert_eq!(format_speed(3.0 * 1024.0 * 1024.0), "3.00 MB/s");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(150_000), "146.48 KB");
    }
}
