//! mojoprobe デバッガホスト制御
//!
//! このクレートは、デバッガホスト（LLDB）を外部の協調者として扱うための低レベル機能を提供します。
//! ホスト/ターゲット/プロセスの境界トレイト、プロセス全体のライフサイクル管理、
//! 出力チャネルのドレイン、式評価オプションを定義し、
//! 疑似端末越しに `lldb` を操作するバックエンドとインプロセスの模擬バックエンドを実装します。

pub mod backend;
pub mod errors;
pub mod expression;
pub mod image;
pub mod lifecycle;
pub mod lldb;
pub mod output;
pub mod sim;
pub mod state;

pub use backend::{
    Backend, Breakpoint, Channel, CommandReturn, ExpressionValue, FailureKind, Host, HostSettings, Language,
    Process, ProcessOf, ScriptLanguage, Target, TargetOf,
};
pub use expression::ExpressionOptions;
pub use lifecycle::LifecycleGuard;
pub use lldb::{LldbBackend, LldbConfig};
pub use output::drain;
pub use sim::{SimBackend, SimConfig, SimLedger, SimPersistence};
pub use state::ProcessState;

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
