//! デバッガバックエンドとの境界
//!
//! デバッガライブラリ本体（LLDB の SB API 相当）は外部の協調者として扱い、
//! セッションが必要とする操作だけをトレイトとして切り出します。
//! ハンドルの寿命は `Backend` → `Host` → `Target` → `Process` の順に入れ子になります。

use crate::expression::ExpressionOptions;
use crate::state::ProcessState;
use crate::Result;
use std::fmt;
use std::path::Path;

/// ソース言語の識別子
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Language {
    /// ホストが知らない言語
    Unknown,
    /// 名前で識別される言語
    Named(String),
}

impl Language {
    /// 言語名を取得する
    pub fn name(&self) -> &str {
        match self {
            Language::Unknown => "unknown",
            Language::Named(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Language::Unknown)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// ホストに組み込まれたスクリプト言語
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    None,
    Default,
}

/// ホストの動作設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    /// 非同期イベント配送を使うかどうか
    pub async_mode: bool,
    /// 組み込みスクリプト言語
    pub script_language: ScriptLanguage,
}

impl Default for HostSettings {
    /// すべての呼び出しが停止イベントまでブロックする同期設定
    fn default() -> Self {
        Self {
            async_mode: false,
            script_language: ScriptLanguage::None,
        }
    }
}

/// コマンドインタプリタの実行結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReturn {
    pub succeeded: bool,
    /// 通常出力
    pub output: String,
    /// エラー出力
    pub error: String,
}

impl CommandReturn {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            output: String::new(),
            error: error.into(),
        }
    }
}

/// 評価が失敗した原因
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// 断片自体のエラー（コンパイルエラーや実行時エラー）
    #[default]
    Evaluation,
    /// 評価エンジン（デバッガや REPL）が失われた
    EngineLost,
    /// 応答が時間内に返らなかった
    Timeout,
}

impl FailureKind {
    /// 断片ではなく評価エンジン側の失敗か
    pub fn is_engine_failure(&self) -> bool {
        !matches!(self, FailureKind::Evaluation)
    }
}

/// 式評価の結果値
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionValue {
    /// 評価エラー（成功時は None）
    pub error: Option<String>,
    /// 失敗の原因（成功時は意味を持たない）
    pub failure: FailureKind,
    /// 値の文字列表現
    pub summary: Option<String>,
}

impl ExpressionValue {
    pub fn ok(summary: Option<String>) -> Self {
        Self {
            error: None,
            failure: FailureKind::Evaluation,
            summary,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self::failed(FailureKind::Evaluation, message)
    }

    pub fn failed(failure: FailureKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            failure,
            summary: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// 設定されたブレークポイント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: u32,
    /// 解決されたロケーション数（0 なら保留中）
    pub locations: usize,
}

/// プロセスの出力チャネル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Stdout => f.write_str("stdout"),
            Channel::Stderr => f.write_str("stderr"),
        }
    }
}

/// デバッガライブラリ全体（プロセス全体で共有される状態を持つ）
pub trait Backend {
    type Host: Host;

    /// プロセス全体で一度だけ実行される
    const PROCESS_WIDE: bool;

    /// ライブラリを初期化する
    fn initialize(&mut self) -> Result<()>;

    /// ホストを作成する
    fn create_host(&mut self) -> Result<Self::Host>;

    /// ホストを破棄する
    fn destroy_host(&mut self, host: Self::Host);

    /// ライブラリを終了する
    fn terminate(&mut self);
}

/// デバッガホスト
pub trait Host {
    type Target: Target;

    /// 同期モードやスクリプト言語を設定する
    fn configure(&mut self, settings: &HostSettings) -> Result<()>;

    /// コマンドインタプリタに1行のコマンドを渡す
    ///
    /// 改行を含むコマンドは複数行入力として扱われます。
    fn handle_command(&mut self, command: &str) -> CommandReturn;

    /// 実行中の評価を中断する
    fn interrupt(&mut self) -> Result<()>;

    /// 言語名から言語識別子を引く
    fn language_from_name(&self, name: &str) -> Language;

    /// REPL で使う言語を設定する
    fn set_repl_language(&mut self, language: &Language);

    /// 実行イメージからターゲットを作成する
    fn create_target(&mut self, image: &Path) -> Result<Self::Target>;
}

/// 起動前のターゲット
pub trait Target {
    type Process: Process;

    /// シンボル名でブレークポイントを設定する
    fn breakpoint_create_by_name(&mut self, symbol: &str) -> Result<Breakpoint>;

    /// 引数・環境変数・標準入力を上書きせずに起動する
    ///
    /// 同期モードでは停止イベントまでブロックします。
    fn launch_simple(&mut self) -> Result<Self::Process>;

    /// 停止中のプロセスの文脈で式を評価する
    fn evaluate_expression(&mut self, fragment: &str, options: &ExpressionOptions) -> ExpressionValue;
}

/// 起動済みのプロセス
pub trait Process {
    fn state(&mut self) -> ProcessState;

    /// バッファ済みの出力を読み出す
    ///
    /// 現在バッファにある分だけを返し、新しい出力を待ちません。0 はバッファが空であることを示します。
    fn read_output(&mut self, channel: Channel, buf: &mut [u8]) -> Result<usize>;

    fn destroy(&mut self) -> Result<()>;
}

/// バックエンドのターゲット型
pub type TargetOf<B> = <<B as Backend>::Host as Host>::Target;

/// バックエンドのプロセス型
pub type ProcessOf<B> = <TargetOf<B> as Target>::Process;
