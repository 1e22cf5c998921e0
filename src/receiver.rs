//! 수신자 (서버측)
//!
//! - 포트 하나에서 무한 수락, 연결마다 독립 태스크
//! - 인증 → (메타데이터 → ACK → 본문) 반복 → 상대가 닫으면 종료
//! - 이력 추가는 저장소 내부에서 직렬화

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunk::ChunkStreamer;
use crate::config::{CollisionPolicy, ControlMode};
use crate::control::TransferControl;
use crate::event::{EventSink, SessionRegistry, SessionReporter, TransferEvent};
use crate::history::{HistoryLedger, HistoryRecord, HistoryStore, TransferDirection};
use crate::message::{self, Token, TransferRequest};
use crate::stats::{TransferSnapshot, TransferState, TransferStatus};
use crate::{Config, Error, Result, SessionId};

/// 이름 변경 시도 상한
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// 수락 에러 후 재시도 간격
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// 수신자
///
/// 복제본은 모두 같은 저장 디렉터리, 이력, 제어 객체를 공유한다.
#[derive(Clone)]
pub struct Receiver {
    /// 설정
    config: Arc<Config>,

    /// 저장 디렉터리 (실행 중 변경 가능)
    save_dir: Arc<RwLock<PathBuf>>,

    /// 완료 이력
    history: Arc<dyn HistoryStore>,

    /// 알림
    events: EventSink,

    /// Broadcast 모드에서 모든 세션이 공유하는 제어
    broadcast: TransferControl,

    /// 세션별 제어
    controls: Arc<DashMap<SessionId, TransferControl>>,

    /// 활성 세션 상태 사본
    registry: SessionRegistry,

    /// 다음 세션 ID
    next_session_id: Arc<AtomicU64>,
}

/// 수락 루프 핸들
pub struct ListenerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// 실제 바인드된 주소 (포트 0으로 열었을 때 유용)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 수락 중단 (진행 중인 세션은 계속됨)
    pub fn shutdown(&self) {
        self.task.abort();
    }

    /// 수락 루프가 끝날 때까지 대기
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::Io(std::io::Error::new(ErrorKind::Other, e.to_string()))),
        }
    }
}

impl Receiver {
    /// 새 수신자 생성
    pub fn new(config: Config) -> Self {
        Self {
            save_dir: Arc::new(RwLock::new(config.save_dir.clone())),
            config: Arc::new(config),
            history: Arc::new(HistoryLedger::new()),
            events: EventSink::discard(),
            broadcast: TransferControl::new(),
            controls: Arc::new(DashMap::new()),
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

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_save_directory(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!("save directory: {}", path.display());
        *self.save_dir.write() = path;
    }

    pub fn save_directory(&self) -> PathBuf {
        self.save_dir.read().clone()
    }

    /// 완료 이력
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.history.records()
    }

    /// 활성 세션 상태 사본
    pub fn sessions(&self) -> Vec<TransferSnapshot> {
        self.registry.iter().map(|entry| entry.value().clone()).collect()
    }

    /// 세션 하나의 제어 핸들
    pub fn session_control(&self, session_id: SessionId) -> Option<TransferControl> {
        self.controls.get(&session_id).map(|c| c.value().clone())
    }

    /// 모든 활성 전송 일시정지
    pub fn pause(&self) {
        self.for_each_control(TransferControl::pause);
    }

    pub fn resume(&self) {
        self.for_each_control(TransferControl::resume);
    }

    pub fn stop(&self) {
        self.for_each_control(TransferControl::stop);
    }

    /// 중지 상태 해제
    pub fn reset(&self) {
        self.broadcast.reset();
        for entry in self.controls.iter() {
            entry.value().reset();
        }
    }

    fn for_each_control(&self, f: impl Fn(&TransferControl)) {
        match self.config.control_mode {
            ControlMode::Broadcast => f(&self.broadcast),
            ControlMode::PerSession => {
                for entry in self.controls.iter() {
                    f(entry.value());
                }
            }
        }
    }

    fn control_for_session(&self, session_id: SessionId) -> TransferControl {
        let control = match self.config.control_mode {
            ControlMode::Broadcast => self.broadcast.clone(),
            ControlMode::PerSession => TransferControl::new(),
        };
        self.controls.insert(session_id, control.clone());
        control
    }

    /// 바인드 후 수락 루프를 백그라운드로 시작
    ///
    /// 바인드 실패는 알림으로 보고하고 재시도하지 않는다. 다시 호출하면 재시작된다.
    pub async fn start_listening(&self, port: u16) -> Result<ListenerHandle> {
        let addr = SocketAddr::new(self.config.bind_ip, port);

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                let err = Error::Bind {
                    addr: addr.to_string(),
                    source,
                };
                warn!("{}", err);
                self.events.error(None, format!("Error: {}", err));
                return Err(err);
            }
        };

        let local_addr = listener.local_addr()?;
        info!("SFT Receiver started on {}", local_addr);
        self.events.status(None, "Waiting for connection...");

        let receiver = self.clone();
        let task = tokio::spawn(async move { receiver.accept_loop(listener).await });

        Ok(ListenerHandle { local_addr, task })
    }

    /// 바인드 후 현재 태스크에서 계속 수락
    pub async fn listen(&self, port: u16) -> Result<()> {
        self.start_listening(port).await?.join().await
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let receiver = self.clone();
                    tokio::spawn(async move {
                        // 세션 결과는 내부에서 이미 보고됨
                        let _ = receiver.serve_tcp(stream, peer).await;
                    });
                }
                Err(e) => {
                    warn!("수락 에러: {}", e);
                    self.events.error(None, format!("accept failed: {}", e));
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    async fn serve_tcp(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay 실패: {}", e);
        }
        self.serve_connection(stream, Some(peer)).await
    }

    /// 연결 하나를 세션 끝까지 처리
    ///
    /// 모든 실패는 여기서 로그/알림으로 보고된 뒤 반환된다. 반환 시 스트림은 닫힌다.
    pub async fn serve_connection<S>(&self, stream: S, peer: Option<SocketAddr>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let peer_label = peer.map_or_else(|| "peer".to_string(), |p| p.to_string());

        info!("클라이언트 연결: {} (session {})", peer_label, session_id);
        self.events
            .status(Some(session_id), format!("Connected to {}", peer_label));

        let control = self.control_for_session(session_id);
        let reporter = SessionReporter::new(session_id, self.events.clone(), self.registry.clone());
        let mut state = TransferState::new(session_id, peer);

        let result = self
            .run_session(stream, &peer_label, &control, &reporter, &mut state)
            .await;

        match &result {
            Ok(()) => info!("클라이언트 연결 종료: {} (session {})", peer_label, session_id),
            Err(Error::Stopped) => info!("session {} stopped", session_id),
            Err(e) => {
                warn!("session {} 에러: {}", session_id, e);
                reporter.error(format!("Error: {}", e));
            }
        }

        self.controls.remove(&session_id);
        reporter.finish();
        result
    }

    async fn run_session<S>(
        &self,
        mut stream: S,
        peer_label: &str,
        control: &TransferControl,
        reporter: &SessionReporter,
        state: &mut TransferState,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let config = &self.config;

        reporter.transition(state, TransferStatus::Authenticating, "Authenticating...");
        if let Err(e) = message::authenticate_responder(
            &mut stream,
            &config.credential,
            config.max_frame_size,
            config.handshake_timeout,
        )
        .await
        {
            reporter.transition(
                state,
                TransferStatus::Failed,
                format!("Authentication failed from {}.", peer_label),
            );
            return Err(e);
        }
        reporter.transition(state, TransferStatus::Idle, format!("Authenticated {}", peer_label));

        loop {
            // 파일 경계에서도 중지 확인
            if control.is_stopped() {
                reporter.transition(state, TransferStatus::Stopped, "Status: Transfer Stopped");
                return Err(Error::Stopped);
            }

            let request = match message::read_request(&mut stream, config.max_frame_size).await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("session {}: 상대가 세션 종료", state.session_id);
                    return Ok(());
                }
                Err(e) => {
                    reporter.transition(state, TransferStatus::Failed, format!("Error: {}", e));
                    return Err(e);
                }
            };

            // 메타데이터를 기다리는 동안 중지되었으면 응답하지 않고 닫음
            if control.is_stopped() {
                debug!("session {}: {} 무시 (중지됨)", state.session_id, request.filename);
                reporter.transition(state, TransferStatus::Stopped, "Status: Transfer Stopped");
                return Err(Error::Stopped);
            }

            match self
                .receive_file(&mut stream, request, control, reporter, state)
                .await
            {
                Ok(_) => {}
                Err(e) if !e.is_session_fatal() => {
                    reporter.error(format!("Error: {}", e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 파일 하나 수신
    async fn receive_file<S>(
        &self,
        stream: &mut S,
        request: TransferRequest,
        control: &TransferControl,
        reporter: &SessionReporter,
        state: &mut TransferState,
    ) -> Result<HistoryRecord>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let filename = match request.validate() {
            Ok(name) => name.to_string(),
            Err(e) => {
                warn!("session {}: 파일 이름 거부: {:?}", state.session_id, request.filename);
                message::write_token(stream, Token::Rejected).await?;
                return Err(e);
            }
        };

        let save_dir = self.save_directory();
        let (mut file, path) =
            match open_destination(&save_dir, &filename, self.config.collision_policy).await {
                Ok(opened) => opened,
                Err(e) => {
                    warn!("session {}: {} 열기 실패: {}", state.session_id, filename, e);
                    message::write_token(stream, Token::Rejected).await?;
                    return Err(Error::Rejected { filename });
                }
            };
        let saved_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.clone());

        state.begin_file(&request);
        if let Err(e) = message::write_token(stream, Token::Ack).await {
            drop(file);
            remove_partial(&path).await;
            reporter.transition(state, TransferStatus::Failed, format!("Error: {}", e));
            return Err(e);
        }
        reporter.transition(
            state,
            TransferStatus::Streaming,
            format!("Receiving '{}' ({} bytes)", saved_name, request.size),
        );

        let result = ChunkStreamer::new(self.config.chunk_size, control, reporter)
            .stream(stream, &mut file, state)
            .await;
        drop(file);

        if let Err(e) = result {
            remove_partial(&path).await;
            let status = match e {
                Error::Stopped => TransferStatus::Stopped,
                _ => TransferStatus::Failed,
            };
            let text = match status {
                TransferStatus::Stopped => "Status: Transfer Stopped".to_string(),
                _ => format!("Error: {}", e),
            };
            reporter.transition(state, status, text);
            return Err(e);
        }

        debug_assert!(state.is_complete());
        let record = HistoryRecord::new(
            saved_name.clone(),
            request.size,
            TransferDirection::Received,
            state.peer,
        );
        self.history.append(record.clone());
        self.events.emit(TransferEvent::HistoryAppended(record.clone()));

        info!("수신 완료: {} ({} bytes) -> {}", saved_name, request.size, path.display());
        reporter.transition(
            state,
            TransferStatus::Completed,
            format!("File '{}' received successfully!", saved_name),
        );

        Ok(record)
    }
}

/// 충돌 정책에 따라 저장 파일 열기
async fn open_destination(
    dir: &Path,
    filename: &str,
    policy: CollisionPolicy,
) -> std::io::Result<(File, PathBuf)> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(filename);

    match policy {
        CollisionPolicy::Overwrite => Ok((File::create(&path).await?, path)),
        CollisionPolicy::Reject => Ok((create_new(&path).await?, path)),
        CollisionPolicy::Rename => {
            for attempt in 0..MAX_RENAME_ATTEMPTS {
                let candidate = if attempt == 0 {
                    path.clone()
                } else {
                    dir.join(numbered_name(filename, attempt))
                };
                match create_new(&candidate).await {
                    Ok(file) => return Ok((file, candidate)),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("no free name for {}", filename),
            ))
        }
    }
}

/// 불완전한 저장 파일 삭제
async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("부분 파일 삭제 실패 {}: {}", path.display(), e);
    }
}

async fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path).await
}

/// `report.pdf` -> `report (n).pdf`
fn numbered_name(filename: &str, n: u32) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    }
}
