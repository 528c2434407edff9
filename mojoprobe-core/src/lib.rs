//! mojoprobe のコア機能
//!
//! デバッガホストの上に永続的な式評価セッションを組み立てます。
//! ホストの立ち上げ、推論対象プロセスの起動、断片の評価と出力の捕捉、
//! プローブ手順の実行と報告、JSON 行プロトコルのサーバを提供します。

pub mod bootstrap;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod errors;
pub mod evaluator;
pub mod launcher;
pub mod probe;
pub mod server;
pub mod session;
pub mod sideload;
pub mod status;

pub use bootstrap::BootstrapReport;
pub use config::{ModularRoot, SessionConfig};
pub use driver::{Driver, ModeReport, ProbePlan, RunReport};
pub use errors::SessionError;
pub use evaluator::{EvalMode, EvaluationConfig, EvaluationRequest, EvaluationResult};
pub use launcher::LaunchReport;
pub use probe::{Expectation, Persistence, ProbeScript, ProbeStep, StepReport};
pub use server::Server;
pub use sideload::AuxiliaryLibrary;
pub use session::Session;

/// セッションの結果型
pub type Result<T> = anyhow::Result<T>;
