//! `lldb` 実行ファイルを疑似端末越しに操作するバックエンド
//!
//! SB API を直接リンクする代わりに、lldb のコマンドインタプリタを対話的に駆動します。
//! 各ハンドルは1本の lldb 接続を共有します。
//! 推論対象プロセスの標準出力・標準エラーは一時ファイルへ振り向け、
//! ドレインはそのファイルを前回の位置から末尾まで読むことで実現します。

mod connection;
mod handles;
pub mod pty;
pub mod transcript;

pub use connection::{LldbConnection, COMMAND_PROMPT};
pub use handles::{LldbHost, LldbProcess, LldbTarget};

use crate::backend::Backend;
use crate::Result;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

/// lldb バックエンドの設定
#[derive(Debug, Clone)]
pub struct LldbConfig {
    /// lldb 実行ファイル（名前だけなら PATH から探す）
    pub executable: PathBuf,
    /// 起動直後に実行する追加コマンド
    pub startup_commands: Vec<String>,
    /// プロンプト待ちの上限（None なら無制限）
    pub response_timeout: Option<Duration>,
}

impl Default for LldbConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("lldb"),
            startup_commands: Vec::new(),
            response_timeout: None,
        }
    }
}

/// lldb バックエンド
pub struct LldbBackend {
    config: LldbConfig,
}

impl LldbBackend {
    pub fn new(config: LldbConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LldbConfig {
        &self.config
    }
}

impl Backend for LldbBackend {
    type Host = LldbHost;

    // ホストごとに別の lldb プロセスを使うので、プロセス全体の状態はない
    const PROCESS_WIDE: bool = false;

    fn initialize(&mut self) -> Result<()> {
        let resolved = resolve_executable(&self.config.executable).ok_or_else(|| {
            anyhow::anyhow!("lldb executable not found: {:?}", self.config.executable)
        })?;
        debug!("using lldb at {:?}", resolved);
        self.config.executable = resolved;
        Ok(())
    }

    fn create_host(&mut self) -> Result<LldbHost> {
        let conn = LldbConnection::open(&self.config)?;
        info!("debugger host created");
        Ok(LldbHost::new(Rc::new(RefCell::new(conn))))
    }

    fn destroy_host(&mut self, host: LldbHost) {
        host.connection().borrow_mut().quit();
        info!("debugger host destroyed");
    }

    fn terminate(&mut self) {}
}

/// 実行ファイルのパスを解決する
///
/// 区切り文字を含むパスはそのまま、名前だけなら PATH を順に探します。
fn resolve_executable(executable: &Path) -> Option<PathBuf> {
    if executable.components().count() > 1 {
        return executable.is_file().then(|| executable.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_executable() {
        assert!(resolve_executable(Path::new("/nonexistent/lldb")).is_none());
        assert!(resolve_executable(Path::new("definitely-not-a-real-lldb-binary")).is_none());
        let exe = std::env::current_exe().unwrap();
        assert_eq!(resolve_executable(&exe), Some(exe.clone()));
    }
}
