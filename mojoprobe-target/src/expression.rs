//! 式評価オプション

use crate::backend::Language;
use std::time::Duration;

/// 式評価オプション
///
/// 公開されている設定項目は LLDB の `SBExpressionOptions` に揃えています。
/// REPL の永続化フラグは公開面には出さず、[`internal`] からのみ操作できます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionOptions {
    language: Option<Language>,
    unwind_on_error: bool,
    generate_debug_info: bool,
    timeout: Option<Duration>,
    evaluate: EvaluateOptions,
}

/// バックエンド内部の評価オプション
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EvaluateOptions {
    repl_enabled: bool,
}

impl ExpressionOptions {
    pub fn new() -> Self {
        Self {
            language: None,
            unwind_on_error: true,
            generate_debug_info: false,
            timeout: None,
            evaluate: EvaluateOptions::default(),
        }
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = Some(language);
    }

    pub fn language(&self) -> Option<&Language> {
        self.language.as_ref()
    }

    /// エラー時に式の副作用を巻き戻すかどうか
    pub fn set_unwind_on_error(&mut self, unwind: bool) {
        self.unwind_on_error = unwind;
    }

    pub fn unwind_on_error(&self) -> bool {
        self.unwind_on_error
    }

    pub fn set_generate_debug_info(&mut self, generate: bool) {
        self.generate_debug_info = generate;
    }

    pub fn generate_debug_info(&self) -> bool {
        self.generate_debug_info
    }

    /// タイムアウトを設定する（None はタイムアウトなし）
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Default for ExpressionOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// 公開面に出ていない評価フラグへのアダプタ
///
/// 永続化フラグに触れるのはこのモジュールだけです。
#[doc(hidden)]
pub mod internal {
    use super::ExpressionOptions;

    /// REPL の永続化フラグを有効にする
    pub fn enable_repl_persistence(options: &mut ExpressionOptions) {
        options.evaluate.repl_enabled = true;
    }

    /// REPL の永続化フラグが有効かどうか
    pub fn repl_persistence_enabled(options: &ExpressionOptions) -> bool {
        options.evaluate.repl_enabled
    }
}
