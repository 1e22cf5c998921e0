//! 프로토콜 메시지 정의
//!
//! 모든 메시지는 `u32` 리틀엔디언 길이 접두 프레임으로 전송된다.
//! 파일 본문만 예외로, `ACK` 이후 정확히 `size` 바이트가 프레임 없이 이어진다.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::Credential;
use crate::{Error, Result};

/// 프레임 헤더 크기 (길이 필드)
pub const FRAME_HEADER_SIZE: usize = 4;

/// 고정 응답 토큰
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// 인증 성공
    AuthSuccess,

    /// 인증 실패
    AuthFailed,

    /// 메타데이터 수락, 본문 전송 허용
    Ack,

    /// 메타데이터 거부, 본문 없이 다음 파일로
    Rejected,
}

impl Token {
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::AuthSuccess => "AUTH_SUCCESS",
            Token::AuthFailed => "AUTH_FAILED",
            Token::Ack => "ACK",
            Token::Rejected => "REJECTED",
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"AUTH_SUCCESS" => Some(Token::AuthSuccess),
            b"AUTH_FAILED" => Some(Token::AuthFailed),
            b"ACK" => Some(Token::Ack),
            b"REJECTED" => Some(Token::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 파일 메타데이터 (파일마다 본문 전에 한 번)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// 경로 없는 파일 이름
    pub filename: String,

    /// 본문 크기 (바이트)
    pub size: u64,
}

impl TransferRequest {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// 바이트에서 역직렬화
    ///
    /// 해석할 수 없는 메타데이터는 스트림이 어긋났다는 뜻이다.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::ProtocolDesync(format!("메타데이터 해석 실패: {}", e)))
    }

    /// 디렉터리 이동이 없는 순수 파일 이름인지 검증
    pub fn validate(&self) -> Result<&str> {
        validate_file_name(&self.filename)
    }
}

/// 파일 이름 검증
///
/// 경로 구분자, `.`/`..`, NUL, 빈 문자열을 거부한다.
pub fn validate_file_name(name: &str) -> Result<&str> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || (cfg!(windows) && name.contains(':'));

    if invalid {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    Ok(name)
}

/// 프레임 쓰기
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::ProtocolDesync(format!("프레임이 너무 큼: {} bytes", payload.len())))?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32_le(len);
    buf.put_slice(payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// 프레임 읽기
///
/// 프레임 경계에서 스트림이 닫히면 `None`을 반환한다 (정상 종료 신호).
/// 프레임 중간에서 닫히거나 `max_size`를 넘으면 `ProtocolDesync`.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::ProtocolDesync("프레임 헤더 도중 연결 종료".into()));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > max_size {
        return Err(Error::ProtocolDesync(format!(
            "프레임 크기 초과: {} > {}",
            len, max_size
        )));
    }

    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ProtocolDesync("프레임 본문 도중 연결 종료".into())
        } else {
            Error::Io(e)
        }
    })?;

    Ok(Some(payload.freeze()))
}

/// 프레임을 반드시 읽어야 하는 위치에서의 읽기
async fn expect_frame<R>(reader: &mut R, max_size: usize, what: &str) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    read_frame(reader, max_size)
        .await?
        .ok_or_else(|| Error::ProtocolDesync(format!("{} 대기 중 연결 종료", what)))
}

/// 토큰 쓰기
pub async fn write_token<W>(writer: &mut W, token: Token) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, token.as_str().as_bytes()).await
}

/// 토큰 읽기
pub async fn read_token<R>(reader: &mut R, max_size: usize) -> Result<Token>
where
    R: AsyncRead + Unpin,
{
    let frame = expect_frame(reader, max_size, "토큰").await?;
    Token::parse(&frame).ok_or_else(|| {
        Error::ProtocolDesync(format!(
            "알 수 없는 토큰: {:?}",
            String::from_utf8_lossy(&frame)
        ))
    })
}

/// 메타데이터 쓰기
pub async fn write_request<W>(writer: &mut W, request: &TransferRequest) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &request.to_bytes()?).await
}

/// 메타데이터 읽기 (`None` = 상대가 세션을 끝냄)
pub async fn read_request<R>(reader: &mut R, max_size: usize) -> Result<Option<TransferRequest>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, max_size).await? {
        Some(frame) => TransferRequest::from_bytes(&frame).map(Some),
        None => Ok(None),
    }
}

/// 선택적 타임아웃 적용
async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout)?,
        None => fut.await,
    }
}

/// 핸드셰이크 (연결을 시작한 측)
///
/// `AUTH_SUCCESS` 외의 응답은 모두 세션에 치명적이다.
pub async fn authenticate_initiator<S>(
    stream: &mut S,
    credential: &Credential,
    max_size: usize,
    timeout: Option<Duration>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_timeout(timeout, async {
        write_frame(stream, credential.as_str().as_bytes()).await?;
        match read_token(stream, max_size).await? {
            Token::AuthSuccess => Ok(()),
            Token::AuthFailed => Err(Error::AuthenticationFailed),
            other => Err(Error::UnexpectedToken {
                expected: Token::AuthSuccess.to_string(),
                got: other.to_string(),
            }),
        }
    })
    .await
}

/// 핸드셰이크 (연결을 받은 측)
///
/// 불일치 시 `AUTH_FAILED`를 보낸 뒤 `AuthenticationFailed`를 반환한다.
pub async fn authenticate_responder<S>(
    stream: &mut S,
    credential: &Credential,
    max_size: usize,
    timeout: Option<Duration>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_timeout(timeout, async {
        let frame = expect_frame(stream, max_size, "인증").await?;
        let accepted = std::str::from_utf8(&frame)
            .map(|presented| credential.matches(presented))
            .unwrap_or(false);

        if accepted {
            write_token(stream, Token::AuthSuccess).await?;
            debug!("인증 성공");
            Ok(())
        } else {
            write_token(stream, Token::AuthFailed).await?;
            warn!("인증 실패");
            Err(Error::AuthenticationFailed)
        }
    })
    .await
}
