//! プロセス状態

use std::fmt;

/// デバッグ対象プロセスの状態
///
/// 数値コードは LLDB の `StateType` と同じ並びです。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// 無効（プロセスが存在しない）
    Invalid,
    /// 起動中
    Launching,
    /// 停止中（式評価を受け付けられる）
    Stopped,
    /// 実行中
    Running,
    /// クラッシュ
    Crashed,
    /// デタッチ済み
    Detached,
    /// 終了（終了コード付き）
    Exited(i32),
}

impl ProcessState {
    /// LLDB の `StateType` に対応する数値コードを返す
    pub fn code(&self) -> u32 {
        match self {
            ProcessState::Invalid => 0,
            ProcessState::Launching => 4,
            ProcessState::Stopped => 5,
            ProcessState::Running => 6,
            ProcessState::Crashed => 8,
            ProcessState::Detached => 9,
            ProcessState::Exited(_) => 10,
        }
    }

    /// 式評価を受け付けられる状態かどうか
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessState::Stopped)
    }

    /// これ以上状態が変化しない状態かどうか
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Invalid
                | ProcessState::Crashed
                | ProcessState::Detached
                | ProcessState::Exited(_)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Invalid => write!(f, "invalid"),
            ProcessState::Launching => write!(f, "launching"),
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Crashed => write!(f, "crashed"),
            ProcessState::Detached => write!(f, "detached"),
            ProcessState::Exited(code) => write!(f, "exited with status {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        assert_eq!(ProcessState::Stopped.code(), 5);
        assert_eq!(ProcessState::Exited(3).code(), 10);
        assert!(ProcessState::Stopped.is_stopped());
        assert!(ProcessState::Exited(0).is_terminal());
        assert!(!ProcessState::Running.is_terminal());
    }
}
