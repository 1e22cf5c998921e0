//! 송신자 (클라이언트측)
//!
//! - 연결 → 인증 → 파일 목록 순서대로 (메타데이터 → ACK → 본문)
//! - 한 세션 안의 파일은 하나의 태스크에서 순차 처리
//! - 중지 신호를 보면 남은 목록은 시도하지 않음

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::chunk::ChunkStreamer;
use crate::config::Credential;
use crate::control::TransferControl;
use crate::event::{EventSink, SessionRegistry, SessionReporter, TransferEvent};
use crate::history::{HistoryLedger, HistoryRecord, HistoryStore, TransferDirection};
use crate::message::{self, Token, TransferRequest};
use crate::stats::{TransferSnapshot, TransferState, TransferStatus};
use crate::{Config, Error, Result, SessionId};

/// 건너뛴 파일
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// 파일 목록 전송 결과
#[derive(Debug, Clone, Default)]
pub struct SendReport {
    /// 완료된 파일 (목록 순서)
    pub completed: Vec<HistoryRecord>,

    /// 로컬 에러나 수신측 거부로 건너뛴 파일
    pub skipped: Vec<SkippedFile>,
}

/// 송신자
#[derive(Clone)]
pub struct Sender {
    /// 설정
    config: Arc<Config>,

    /// 완료 이력
    history: Arc<dyn HistoryStore>,

    /// 알림
    events: EventSink,

    /// 이 송신자의 모든 세션이 확인하는 제어
    control: TransferControl,

    /// 활성 세션 상태 사본
    registry: SessionRegistry,

    /// 다음 세션 ID
    next_session_id: Arc<AtomicU64>,
}

impl Sender {
    /// 새 송신자 생성
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            history: Arc::new(HistoryLedger::new()),
            events: EventSink::discard(),
            control: TransferControl::new(),
            registry: SessionRegistry::default(),
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// 이력 저장소 주입
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = history;
        self
    }

    /// 알림 싱크 주입
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// 외부 제어 객체 사용 (다른 송신자/수신자와 공유할 때)
    pub fn with_control(mut self, control: TransferControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> &TransferControl {
        &self.control
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn reset(&self) {
        self.control.reset();
    }

    /// 완료 이력
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.history.records()
    }

    /// 활성 세션 상태 사본
    pub fn sessions(&self) -> Vec<TransferSnapshot> {
        self.registry.iter().map(|entry| entry.value().clone()).collect()
    }

    /// TCP 연결 후 인증
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        credential: &Credential,
    ) -> Result<SenderSession<TcpStream>> {
        let target = format!("{}:{}", host, port);
        info!("connecting to {}", target);
        self.events.status(None, format!("Connecting to {}...", target));

        let stream = match TcpStream::connect((host, port)).await {
            Ok(stream) => stream,
            Err(source) => {
                let err = Error::Connection {
                    addr: target,
                    source,
                };
                warn!("{}", err);
                self.events.error(None, format!("Error: {}", err));
                return Err(err);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay 실패: {}", e);
        }
        let peer = stream.peer_addr().ok();

        self.handshake(stream, peer, credential).await
    }

    /// 이미 열린 스트림에서 인증
    pub async fn handshake<S>(
        &self,
        mut stream: S,
        peer: Option<SocketAddr>,
        credential: &Credential,
    ) -> Result<SenderSession<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let reporter = SessionReporter::new(session_id, self.events.clone(), self.registry.clone());
        let mut state = TransferState::new(session_id, peer);

        reporter.transition(&mut state, TransferStatus::Authenticating, "Authenticating...");
        let auth = message::authenticate_initiator(
            &mut stream,
            credential,
            self.config.max_frame_size,
            self.config.handshake_timeout,
        )
        .await;

        if let Err(e) = auth {
            warn!("session {}: {}", session_id, e);
            reporter.transition(&mut state, TransferStatus::Failed, "Authentication failed.");
            reporter.error(format!("Error: {}", e));
            reporter.finish();
            return Err(e);
        }

        info!("session {}: authenticated", session_id);
        reporter.transition(&mut state, TransferStatus::Idle, "Authenticated");

        Ok(SenderSession {
            sender: self.clone(),
            stream,
            state,
            reporter,
        })
    }

    /// 연결, 전송, 종료를 한 번에
    pub async fn send_files<P: AsRef<Path>>(
        &self,
        host: &str,
        port: u16,
        credential: &Credential,
        paths: &[P],
    ) -> Result<SendReport> {
        let mut session = self.connect(host, port, credential).await?;
        let report = session.send_files(paths).await?;
        session.finish().await?;
        Ok(report)
    }
}

/// 인증된 송신 세션
pub struct SenderSession<S> {
    sender: Sender,
    stream: S,
    state: TransferState,
    reporter: SessionReporter,
}

impl<S> SenderSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn session_id(&self) -> SessionId {
        self.reporter.session_id()
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// 목록 순서대로 전송
    ///
    /// 로컬 파일 에러와 수신측 거부는 해당 파일만 건너뛴다. 중지나 스트림 에러는
    /// 남은 목록을 포기하고 에러를 반환한다.
    pub async fn send_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<SendReport> {
        let mut report = SendReport::default();

        for path in paths {
            let path = path.as_ref();

            if self.sender.control.is_stopped() {
                self.stopped();
                return Err(Error::Stopped);
            }

            let (file, request) = match open_source(path).await {
                Ok(opened) => opened,
                Err(e) => {
                    warn!("skip {}: {}", path.display(), e);
                    self.reporter
                        .error(format!("Error: {}: {}", path.display(), e));
                    report.skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match self.transfer(file, request).await {
                Ok(record) => report.completed.push(record),
                Err(e) if !e.is_session_fatal() => {
                    report.skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// 파일 하나 전송
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<HistoryRecord> {
        if self.sender.control.is_stopped() {
            self.stopped();
            return Err(Error::Stopped);
        }
        let (file, request) = open_source(path.as_ref()).await?;
        self.transfer(file, request).await
    }

    async fn transfer(&mut self, mut file: File, request: TransferRequest) -> Result<HistoryRecord> {
        let config = &self.sender.config;

        self.state.begin_file(&request);
        self.reporter.transition(
            &mut self.state,
            TransferStatus::AwaitingAck,
            format!("Sending '{}' ({} bytes)", request.filename, request.size),
        );

        message::write_request(&mut self.stream, &request).await?;
        match message::read_token(&mut self.stream, config.max_frame_size).await? {
            Token::Ack => {}
            Token::Rejected => {
                warn!("receiver rejected {}", request.filename);
                self.reporter.transition(
                    &mut self.state,
                    TransferStatus::Idle,
                    format!("File '{}' rejected by receiver", request.filename),
                );
                return Err(Error::Rejected {
                    filename: request.filename,
                });
            }
            other => {
                return Err(Error::UnexpectedToken {
                    expected: Token::Ack.to_string(),
                    got: other.to_string(),
                })
            }
        }

        self.reporter
            .transition(&mut self.state, TransferStatus::Streaming, "Status: Transferring");

        let result = ChunkStreamer::new(config.chunk_size, &self.sender.control, &self.reporter)
            .stream(&mut file, &mut self.stream, &mut self.state)
            .await;

        if let Err(e) = result {
            match e {
                Error::Stopped => self.stopped(),
                _ => self.reporter.transition(
                    &mut self.state,
                    TransferStatus::Failed,
                    format!("Error: {}", e),
                ),
            }
            return Err(e);
        }

        let record = HistoryRecord::new(
            request.filename.clone(),
            request.size,
            TransferDirection::Sent,
            self.state.peer,
        );
        self.sender.history.append(record.clone());
        self.sender
            .events
            .emit(TransferEvent::HistoryAppended(record.clone()));

        info!("송신 완료: {} ({} bytes)", request.filename, request.size);
        self.reporter.transition(
            &mut self.state,
            TransferStatus::Completed,
            format!("File '{}' sent successfully!", request.filename),
        );

        Ok(record)
    }

    fn stopped(&mut self) {
        self.reporter
            .transition(&mut self.state, TransferStatus::Stopped, "Status: Transfer Stopped");
    }

    /// 더 보낼 파일이 없음을 알리고 연결 종료
    pub async fn finish(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        debug!("session {}: finished", self.session_id());
        Ok(())
    }
}

impl<S> Drop for SenderSession<S> {
    fn drop(&mut self) {
        self.reporter.finish();
    }
}

/// 로컬 파일 열기 + 메타데이터 생성
async fn open_source(path: &Path) -> Result<(File, TransferRequest)> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?
        .to_string();

    let file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(Error::InvalidFileName(path.display().to_string()));
    }

    Ok((file, TransferRequest::new(filename, metadata.len())))
}
