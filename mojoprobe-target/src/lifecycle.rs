//! バックエンドのライフサイクル管理
//!
//! `initialize` と `terminate` を必ず1回ずつ対にして呼び出します。
//! プロセス全体で状態を持つバックエンド（`Backend::PROCESS_WIDE`）については、
//! 同時に2つのガードが存在しないことも保証します。

use crate::backend::Backend;
use crate::errors::ERR_LIFECYCLE_ACTIVE;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// プロセス全体の初期化状態
static PROCESS_WIDE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// 初期化済みのバックエンド
///
/// ドロップ時に `terminate` を呼び出します。
pub struct LifecycleGuard<B: Backend> {
    backend: B,
    terminated: bool,
}

impl<B: Backend> LifecycleGuard<B> {
    /// バックエンドを初期化してガードを取得する
    pub fn acquire(mut backend: B) -> Result<Self> {
        if B::PROCESS_WIDE
            && PROCESS_WIDE_ACTIVE
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(anyhow::anyhow!(ERR_LIFECYCLE_ACTIVE));
        }

        if let Err(e) = backend.initialize() {
            if B::PROCESS_WIDE {
                PROCESS_WIDE_ACTIVE.store(false, Ordering::SeqCst);
            }
            return Err(e);
        }

        debug!("debugger backend initialized");
        Ok(Self {
            backend,
            terminated: false,
        })
    }

    /// バックエンドへの参照を取得する
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// バックエンドを可変参照で取得する
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// バックエンドを終了する
    ///
    /// 2回目以降の呼び出しは何もしません。
    pub fn release(&mut self) {
        if self.terminated {
            return;
        }
        self.backend.terminate();
        self.terminated = true;
        if B::PROCESS_WIDE {
            PROCESS_WIDE_ACTIVE.store(false, Ordering::SeqCst);
        }
        debug!("debugger backend terminated");
    }
}

impl<B: Backend> Drop for LifecycleGuard<B> {
    fn drop(&mut self) {
        self.release();
    }
}
