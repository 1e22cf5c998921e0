//! 표시 계층으로 나가는 알림

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::history::HistoryRecord;
use crate::stats::{TransferSnapshot, TransferState, TransferStatus};
use crate::SessionId;

/// 알림 수신기 타입
pub type EventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

/// 활성 세션 상태 사본 레지스트리
pub type SessionRegistry = Arc<DashMap<SessionId, TransferSnapshot>>;

/// 알림
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// 상태 문구 (수신 대기 같은 세션 밖 상태는 session 없음)
    Status {
        session: Option<SessionId>,
        text: String,
    },

    /// 진행률 (%)
    Progress { session: SessionId, percent: u8 },

    /// 속도 (bytes/sec)
    Speed { session: SessionId, bytes_per_sec: f64 },

    /// 남은 시간 (초)
    Eta { session: SessionId, seconds: f64 },

    /// 완료된 전송 기록 추가
    HistoryAppended(HistoryRecord),

    /// 에러 (바인드 실패처럼 세션이 없을 수도 있음)
    Error {
        session: Option<SessionId>,
        message: String,
    },
}

/// 알림 송신 핸들
///
/// 구독자가 없거나 수신기가 닫혔으면 조용히 버린다.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl EventSink {
    /// 버리는 싱크
    pub fn discard() -> Self {
        Self::default()
    }

    /// 싱크와 수신기 쌍 생성
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, session: Option<SessionId>, text: impl Into<String>) {
        self.emit(TransferEvent::Status {
            session,
            text: text.into(),
        });
    }

    pub fn error(&self, session: Option<SessionId>, message: impl Into<String>) {
        self.emit(TransferEvent::Error {
            session,
            message: message.into(),
        });
    }
}

/// 세션 하나의 상태/진행 알림 발행기
#[derive(Debug, Clone)]
pub struct SessionReporter {
    session_id: SessionId,
    events: EventSink,
    registry: SessionRegistry,
}

impl SessionReporter {
    pub fn new(session_id: SessionId, events: EventSink, registry: SessionRegistry) -> Self {
        Self {
            session_id,
            events,
            registry,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// 상태 전환 + 상태 문구 알림
    pub fn transition(&self, state: &mut TransferState, status: TransferStatus, text: impl Into<String>) {
        state.status = status;
        self.publish(state);
        self.events.status(Some(self.session_id), text);
    }

    /// 사본만 갱신
    pub fn publish(&self, state: &TransferState) {
        self.registry.insert(self.session_id, state.snapshot());
    }

    /// 청크 이후 진행률/속도/남은 시간 알림
    pub fn progress(&self, state: &TransferState) {
        let snapshot = state.snapshot();
        let session = self.session_id;

        self.events.emit(TransferEvent::Progress {
            session,
            percent: snapshot.percent,
        });
        if let Some(bytes_per_sec) = snapshot.speed {
            self.events.emit(TransferEvent::Speed {
                session,
                bytes_per_sec,
            });
        }
        if let Some(seconds) = snapshot.eta {
            self.events.emit(TransferEvent::Eta { session, seconds });
        }

        self.registry.insert(session, snapshot);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.events.error(Some(self.session_id), message);
    }

    /// 세션 종료 시 레지스트리에서 제거
    pub fn finish(&self) {
        self.registry.remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TransferRequest;

    #[test]
    fn test_discard_sink_is_silent() {
        let sink = EventSink::discard();
        sink.status(Some(1), "nothing listens");
    }

    #[test]
    fn test_reporter_publishes_snapshot() {
        let (sink, mut rx) = EventSink::channel();
        let registry = SessionRegistry::default();
        let reporter = SessionReporter::new(3, sink, registry.clone());

        let mut state = TransferState::new(3, None);
        state.begin_file(&TransferRequest::new("x.bin", 10));
        reporter.transition(&mut state, TransferStatus::Streaming, "Transferring x.bin");

        assert_eq!(registry.get(&3).unwrap().status, TransferStatus::Streaming);
        assert_eq!(
            rx.try_recv().unwrap(),
            TransferEvent::Status {
                session: Some(3),
                text: "Transferring x.bin".into()
            }
        );

        state.record_chunk(5);
        reporter.progress(&state);
        assert_eq!(
            rx.try_recv().unwrap(),
            TransferEvent::Progress {
                session: 3,
                percent: 50
            }
        );
        assert_eq!(registry.get(&3).unwrap().bytes_moved, 5);

        reporter.finish();
        assert!(registry.is_empty());
    }
}
