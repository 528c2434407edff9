//! エラー定義

use mojoprobe_target::ProcessState;
use std::path::PathBuf;
use thiserror::Error;

/// プロセスが起動されていない場合のエラーメッセージ
pub const ERR_NOT_LAUNCHED: &str = "Process has not been launched";

/// セッションが既に終了している場合のエラーメッセージ
pub const ERR_TORN_DOWN: &str = "Session has been torn down";

/// 補助ライブラリの読み込みに失敗した場合のエラーメッセージ
pub const ERR_SIDELOAD_FAILED: &str = "Failed to load auxiliary library";

/// セッションを中断させる致命的なエラー
///
/// 再試行はせず、プローブを実行せずに後始末へ進みます。
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create debugger host: {0}")]
    HostCreation(String),
    #[error("failed to create target from {path:?}: {reason}")]
    TargetCreation { path: PathBuf, reason: String },
    #[error("inferior did not reach a stopped state (state: {0})")]
    NotStopped(ProcessState),
}

impl SessionError {
    /// anyhow のエラーが致命的なセッションエラーかどうか
    pub fn is_fatal(error: &anyhow::Error) -> bool {
        error.downcast_ref::<SessionError>().is_some()
    }
}
