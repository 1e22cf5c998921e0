//! 전송 제어 (일시정지/재개/중지)
//!
//! 스트리머는 청크마다 `checkpoint()`를 호출한다. 일시정지 중에는 상태 변경
//! 알림을 기다리며 잠들고, 재개되면 이미 보낸 오프셋 그대로 이어간다.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::{Error, Result};

/// 제어 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlState {
    pub paused: bool,
    pub stop_requested: bool,
}

/// 전송 제어 핸들
///
/// 복제본은 모두 같은 상태를 공유한다. 세션 하나에만 줄 수도 있고
/// 여러 세션에 나눠 줘서 한 번에 제어할 수도 있다.
#[derive(Debug, Clone)]
pub struct TransferControl {
    tx: Arc<watch::Sender<ControlState>>,
}

impl TransferControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState::default());
        Self { tx: Arc::new(tx) }
    }

    /// 현재 상태
    pub fn state(&self) -> ControlState {
        *self.tx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stop_requested
    }

    /// 일시정지 (중지 이후에는 무시)
    pub fn pause(&self) {
        self.tx.send_if_modified(|state| {
            let changed = !state.paused && !state.stop_requested;
            state.paused |= changed;
            changed
        });
        debug!("transfer control: pause");
    }

    /// 재개
    pub fn resume(&self) {
        self.tx.send_if_modified(|state| {
            let changed = state.paused;
            state.paused = false;
            changed
        });
        debug!("transfer control: resume");
    }

    /// 중지 (여러 번 호출해도 한 번과 같음, `reset()` 전까지 유지)
    pub fn stop(&self) {
        self.tx.send_if_modified(|state| {
            let changed = !state.stop_requested;
            state.stop_requested = true;
            state.paused = false;
            changed
        });
        debug!("transfer control: stop");
    }

    /// 초기 상태로 되돌림
    pub fn reset(&self) {
        self.tx.send_replace(ControlState::default());
        debug!("transfer control: reset");
    }

    /// 청크 경계 확인
    ///
    /// - 중지: 즉시 `Err(Stopped)`
    /// - 일시정지: 재개 또는 중지될 때까지 대기
    /// - 그 외: 즉시 반환
    pub async fn checkpoint(&self) -> Result<()> {
        self.checkpoint_with(|| {}).await.map(|_| ())
    }

    /// `checkpoint()`와 같지만 대기에 들어가기 직전에 `on_pause`를 한 번 호출한다.
    ///
    /// 일시정지 판단과 대기가 같은 구독에서 일어나므로 그 사이의 변경을 놓치지 않는다.
    /// 반환값은 실제로 대기했는지 여부.
    pub async fn checkpoint_with(&self, mut on_pause: impl FnMut()) -> Result<bool> {
        let mut rx = self.tx.subscribe();
        let mut waited = false;

        loop {
            let state = *rx.borrow_and_update();
            if state.stop_requested {
                return Err(Error::Stopped);
            }
            if !state.paused {
                return Ok(waited);
            }
            if !waited {
                on_pause();
                waited = true;
            }
            rx.changed().await.map_err(|_| Error::Stopped)?;
        }
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}
