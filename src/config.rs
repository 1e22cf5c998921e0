//! 프로토콜 설정

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_CREDENTIAL, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

/// 공유 비밀
///
/// 해시나 키 유도 없이 정확히 일치하는지만 비교한다. 보안 수단이 아니라
/// 양측이 같은 토큰을 알고 있는지 확인하는 관문이다.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// 상대가 제시한 값과 비교
    pub fn matches(&self, presented: &str) -> bool {
        self.0 == presented
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL)
    }
}

// 로그에 비밀이 새지 않도록 값은 숨긴다
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// 같은 이름의 파일이 이미 있을 때의 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// 기존 파일 덮어쓰기
    Overwrite,

    /// `name (1).ext` 형태로 새 이름 부여
    #[default]
    Rename,

    /// 거부 (송신측은 해당 파일을 건너뜀)
    Reject,
}

/// 일시정지/중지 제어 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// 세션마다 독립된 제어 객체
    #[default]
    PerSession,

    /// 모든 세션이 하나의 제어 객체를 공유
    Broadcast,
}

/// SFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 프레임 최대 크기 (인증 문자열, 메타데이터, 토큰)
    pub max_frame_size: usize,

    /// 수신 바인드 주소
    pub bind_ip: IpAddr,

    /// 수신 포트
    pub port: u16,

    /// 수신 파일 저장 디렉터리
    pub save_dir: PathBuf,

    /// 수신측이 요구하는 공유 비밀
    pub credential: Credential,

    /// 제어 범위
    pub control_mode: ControlMode,

    /// 파일 이름 충돌 처리
    pub collision_policy: CollisionPolicy,

    /// 인증 교환 타임아웃
    /// None이면 무제한 대기
    pub handshake_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            save_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            credential: Credential::default(),
            control_mode: ControlMode::default(),
            collision_policy: CollisionPolicy::default(),
            handshake_timeout: None,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 수신측 설정
    pub fn receiver(save_dir: impl Into<PathBuf>, credential: impl Into<Credential>) -> Self {
        Self {
            save_dir: save_dir.into(),
            credential: credential.into(),
            ..Self::default()
        }
    }

    /// 송신측 설정 (공유 비밀은 연결 시 지정)
    pub fn sender() -> Self {
        Self::default()
    }

    /// 모든 세션이 하나의 일시정지/중지 버튼을 공유하는 설정
    pub fn broadcast_control(mut self) -> Self {
        self.control_mode = ControlMode::Broadcast;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}
