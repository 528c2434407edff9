//! 断片の評価と出力の捕捉
//!
//! 3つの評価経路を持ちます。
//! - `Api`: 評価 API を言語とオプション付きで直接呼び出す
//! - `Command`: コマンドインタプリタに `expression -l <lang> -- <fragment>` を渡す
//! - `Repl`: `Api` に REPL の永続化フラグを加えたもの
//!
//! 評価の後は必ず標準出力、標準エラーの順に読み出して結果に添付します。

use mojoprobe_target::expression::internal;
use mojoprobe_target::{
    drain, Channel, ExpressionOptions, FailureKind, Host, Language, Process, Target,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// 評価経路
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalMode {
    Api,
    Command,
    Repl,
}

impl EvalMode {
    pub const ALL: [EvalMode; 3] = [EvalMode::Api, EvalMode::Command, EvalMode::Repl];

    pub fn name(&self) -> &'static str {
        match self {
            EvalMode::Api => "api",
            EvalMode::Command => "command",
            EvalMode::Repl => "repl",
        }
    }

    /// 報告用の見出し
    pub fn title(&self) -> &'static str {
        match self {
            EvalMode::Api => "Mode A: EvaluateExpression",
            EvalMode::Command => "Mode B: HandleCommand",
            EvalMode::Repl => "Mode C: EvaluateExpression + REPL flag",
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EvalMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" | "a" => Ok(EvalMode::Api),
            "command" | "b" => Ok(EvalMode::Command),
            "repl" | "c" => Ok(EvalMode::Repl),
            _ => Err(anyhow::anyhow!("Unknown evaluation mode: {}", s)),
        }
    }
}

/// 評価オプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationConfig {
    pub language: Language,
    /// REPL の永続化フラグ
    pub persistence: bool,
    pub unwind_on_error: bool,
    pub generate_debug_info: bool,
    /// None はタイムアウトなし
    pub timeout: Option<Duration>,
}

impl EvaluationConfig {
    /// プローブで使う設定
    ///
    /// タイムアウトなし、エラー時に巻き戻さない、デバッグ情報を生成する。
    /// 永続化フラグは `Repl` のときだけ立てます。
    pub fn probe(language: Language, mode: EvalMode) -> Self {
        Self {
            language,
            persistence: mode == EvalMode::Repl,
            unwind_on_error: false,
            generate_debug_info: true,
            timeout: None,
        }
    }

    /// 評価 API のオプションに変換する
    pub fn to_options(&self) -> ExpressionOptions {
        let mut options = ExpressionOptions::new();
        options.set_language(self.language.clone());
        options.set_unwind_on_error(self.unwind_on_error);
        options.set_generate_debug_info(self.generate_debug_info);
        options.set_timeout(self.timeout);
        if self.persistence {
            internal::enable_repl_persistence(&mut options);
        }
        options
    }
}

/// 評価要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub fragment: String,
    pub mode: EvalMode,
    pub config: EvaluationConfig,
}

impl EvaluationRequest {
    pub fn new(fragment: impl Into<String>, mode: EvalMode, language: Language) -> Self {
        Self {
            fragment: fragment.into(),
            mode,
            config: EvaluationConfig::probe(language, mode),
        }
    }
}

/// 評価結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationResult {
    pub succeeded: bool,
    /// 成功時は空
    pub error_message: String,
    /// 失敗の原因
    pub failure: FailureKind,
    /// 値の文字列表現
    pub value: Option<String>,
    pub captured_stdout: String,
    pub captured_stderr: String,
}

impl EvaluationResult {
    /// 空の断片に対する結果
    pub fn empty() -> Self {
        Self {
            succeeded: true,
            ..Default::default()
        }
    }

    /// 評価前に失敗した場合の結果
    pub fn failure(message: impl Into<String>) -> Self {
        Self::failed(FailureKind::Evaluation, message)
    }

    pub fn failed(failure: FailureKind, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error_message: message.into(),
            failure,
            ..Default::default()
        }
    }
}

/// 断片を1つ評価する
///
/// 評価の失敗は結果に記録され、呼び出し元には伝播しません。
/// プロセスが停止状態でなければ評価せずに失敗を返します。
pub fn evaluate<H: Host>(
    host: &mut H,
    target: &mut H::Target,
    process: &mut <H::Target as Target>::Process,
    request: &EvaluationRequest,
) -> EvaluationResult {
    if request.fragment.trim().is_empty() {
        return EvaluationResult::empty();
    }

    let state = process.state();
    if !state.is_stopped() {
        // 終了したプロセスでは以後どの断片も評価できない
        let failure = if state.is_terminal() {
            FailureKind::EngineLost
        } else {
            FailureKind::Evaluation
        };
        return EvaluationResult::failed(
            failure,
            format!("error: process is not stopped (state: {})", state),
        );
    }

    debug!("evaluating ({}): {:?}", request.mode, request.fragment);
    let mut failure = FailureKind::Evaluation;
    let (succeeded, error_message, value) = match request.mode {
        EvalMode::Api | EvalMode::Repl => {
            let options = request.config.to_options();
            let value = target.evaluate_expression(&request.fragment, &options);
            failure = value.failure;
            match value.error {
                None => (true, String::new(), value.summary),
                Some(error) => (false, error, None),
            }
        }
        EvalMode::Command => {
            let command = format!(
                "expression -l {} -- {}",
                request.config.language.name(),
                request.fragment
            );
            let ret = host.handle_command(&command);
            let output = ret.output.trim();
            let value = (!output.is_empty()).then(|| output.to_string());
            if ret.succeeded {
                (true, String::new(), value)
            } else {
                (false, ret.error, None)
            }
        }
    };

    let captured_stdout = drain(process, Channel::Stdout);
    let captured_stderr = drain(process, Channel::Stderr);

    EvaluationResult {
        succeeded,
        error_message,
        failure,
        value,
        captured_stdout,
        captured_stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mojo() -> Language {
        Language::Named("mojo".to_string())
    }

    #[test]
    fn test_probe_config() {
        let config = EvaluationConfig::probe(mojo(), EvalMode::Api);
        assert!(!config.persistence);
        assert!(!config.unwind_on_error);
        assert!(config.generate_debug_info);
        assert_eq!(config.timeout, None);

        let config = EvaluationConfig::probe(mojo(), EvalMode::Repl);
        assert!(config.persistence);
    }

    #[test]
    fn test_to_options() {
        let options = EvaluationConfig::probe(mojo(), EvalMode::Repl).to_options();
        assert!(internal::repl_persistence_enabled(&options));
        assert!(!options.unwind_on_error());
        assert_eq!(options.language(), Some(&mojo()));

        let options = EvaluationConfig::probe(mojo(), EvalMode::Command).to_options();
        assert!(!internal::repl_persistence_enabled(&options));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("api".parse::<EvalMode>().unwrap(), EvalMode::Api);
        assert_eq!("B".to_lowercase().parse::<EvalMode>().unwrap(), EvalMode::Command);
        assert_eq!("repl".parse::<EvalMode>().unwrap(), EvalMode::Repl);
        assert!("all".parse::<EvalMode>().is_err());
    }
}
