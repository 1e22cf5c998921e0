//! 에러 타입 정의

use thiserror::Error;

/// SFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("인증 실패")]
    AuthenticationFailed,

    #[error("연결 실패: {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("바인드 실패: {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("전송 중단: expected {expected} bytes, received {received} bytes")]
    ShortTransfer { expected: u64, received: u64 },

    #[error("프로토콜 동기화 실패: {0}")]
    ProtocolDesync(String),

    #[error("유효하지 않은 파일 이름: {0:?}")]
    InvalidFileName(String),

    #[error("수신측 거부: {filename}")]
    Rejected { filename: String },

    #[error("토큰 불일치: expected {expected}, got {got}")]
    UnexpectedToken { expected: String, got: String },

    #[error("타임아웃")]
    Timeout,

    #[error("전송 중지됨")]
    Stopped,
}

impl Error {
    /// 이 에러 이후 세션 스트림을 계속 쓸 수 없는지 여부
    ///
    /// 파일 단위 에러(거부, 로컬 파일 열기 실패 등)는 스트림 동기화를 깨지 않는다.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, Error::Rejected { .. } | Error::InvalidFileName(_))
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        assert!(Error::AuthenticationFailed.is_session_fatal());
        assert!(Error::Stopped.is_session_fatal());
        assert!(Error::ShortTransfer { expected: 10, received: 3 }.is_session_fatal());
        assert!(!Error::Rejected { filename: "a.txt".into() }.is_session_fatal());
        assert!(!Error::InvalidFileName("../x".into()).is_session_fatal());
    }
}
