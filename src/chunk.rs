//! 청크 스트리머
//!
//! 소스에서 목표 바이트 수만큼 고정 크기 청크로 읽어 싱크에 쓴다.
//! 청크를 요청하기 전에 제어 상태를 확인하므로 일시정지는 다음 청크만 막고
//! 이미 읽은 청크는 항상 끝까지 쓴다.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::control::TransferControl;
use crate::event::SessionReporter;
use crate::stats::{TransferState, TransferStatus};
use crate::{Error, Result};

/// 청크 스트리머
pub struct ChunkStreamer<'a> {
    chunk_size: usize,
    control: &'a TransferControl,
    reporter: &'a SessionReporter,
    buf: Vec<u8>,
}

impl<'a> ChunkStreamer<'a> {
    pub fn new(chunk_size: usize, control: &'a TransferControl, reporter: &'a SessionReporter) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            control,
            reporter,
            buf: vec![0u8; chunk_size],
        }
    }

    /// `state.size - state.bytes_moved` 바이트를 옮긴다.
    ///
    /// - 소스가 먼저 끝나면 `ShortTransfer`
    /// - 중지되면 현재 파일을 끝내지 않고 `Stopped`
    pub async fn stream<R, W>(&mut self, reader: &mut R, writer: &mut W, state: &mut TransferState) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while state.bytes_moved < state.size {
            self.gate(state).await?;

            let remaining = state.size - state.bytes_moved;
            let want = (self.chunk_size as u64).min(remaining) as usize;

            let n = reader.read(&mut self.buf[..want]).await?;
            if n == 0 {
                return Err(Error::ShortTransfer {
                    expected: state.size,
                    received: state.bytes_moved,
                });
            }

            writer.write_all(&self.buf[..n]).await?;
            state.record_chunk(n);
            trace!(
                "session {}: chunk {} bytes ({}/{})",
                state.session_id,
                n,
                state.bytes_moved,
                state.size
            );

            self.reporter.progress(state);
        }

        writer.flush().await?;

        // 빈 파일은 청크가 없으므로 진행률을 한 번 알린다
        if state.size == 0 {
            self.reporter.progress(state);
        }

        Ok(())
    }

    /// 청크 경계에서 제어 상태 확인
    ///
    /// 대기에 들어가는 순간 `Paused`로, 깨어나면 다시 `Streaming`으로 전환한다.
    async fn gate(&self, state: &mut TransferState) -> Result<()> {
        let reporter = self.reporter;
        let waited = self
            .control
            .checkpoint_with(|| {
                debug!("session {}: paused at {} bytes", state.session_id, state.bytes_moved);
                reporter.transition(state, TransferStatus::Paused, "Status: Paused");
            })
            .await?;

        if waited {
            debug!("session {}: resumed at {} bytes", state.session_id, state.bytes_moved);
            reporter.transition(state, TransferStatus::Streaming, "Status: Transferring");
        }
        Ok(())
    }
}
