//! ホストの立ち上げ

use crate::config::SessionConfig;
use mojoprobe_target::{Host, HostSettings, Language};
use tracing::{info, warn};

/// 立ち上げの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// プラグインが読み込めたかどうか
    pub plugin_loaded: bool,
    /// プラグイン読み込みのエラー出力
    pub plugin_error: String,
    /// 評価に使う言語
    pub language: Language,
}

/// 作成済みのホストを設定し、言語サポートプラグインを導入する
///
/// ホストはコールバックを使わずに明示的な呼び出しで操作するので、同期モードにし、
/// 組み込みスクリプト言語を無効にします。
/// プラグインの読み込み失敗は報告だけして続行します（以降の評価が診断用に失敗します）。
pub fn install<H: Host>(host: &mut H, config: &SessionConfig) -> BootstrapReport {
    if let Err(e) = host.configure(&HostSettings::default()) {
        warn!("failed to configure debugger host: {}", e);
    }

    let ret = host.handle_command(&format!("plugin load {}", config.plugin.display()));
    if ret.succeeded {
        info!("plugin loaded: {:?}", config.plugin);
    } else {
        warn!("plugin load failed: {}", ret.error);
    }

    let language = host.language_from_name(&config.language);
    if !language.is_known() {
        warn!("language '{}' is unknown to the debugger host", config.language);
    }
    host.set_repl_language(&language);

    BootstrapReport {
        plugin_loaded: ret.succeeded,
        plugin_error: ret.error,
        language,
    }
}
