//! セッション設定とインストールルートの配置

use std::path::{Path, PathBuf};

/// 推論対象プロセスの実行イメージ名
pub const ENTRY_POINT: &str = "mojo-repl-entry-point";

/// 評価を受け付けられる状態を示すシンボル
pub const ENTRY_SYMBOL: &str = "mojo_repl_main";

/// 評価に使う言語名
pub const LANGUAGE_NAME: &str = "mojo";

/// 言語サポートプラグインのライブラリ名（拡張子なし）
pub const PLUGIN_NAME: &str = "libMojoLLDB";

/// 補助ライブラリ名（拡張子なし）
pub const AUXILIARY_NAME: &str = "libMojoJupyter";

/// 推論対象プロセス内の言語ランタイムが参照する環境変数
pub const ENV_MAX_PACKAGE_ROOT: &str = "MODULAR_MAX_PACKAGE_ROOT";
pub const ENV_MOJO_MAX_PACKAGE_ROOT: &str = "MODULAR_MOJO_MAX_PACKAGE_ROOT";
pub const ENV_MOJO_MAX_DRIVER_PATH: &str = "MODULAR_MOJO_MAX_DRIVER_PATH";
pub const ENV_MOJO_MAX_IMPORT_PATH: &str = "MODULAR_MOJO_MAX_IMPORT_PATH";

/// 共有ライブラリの拡張子
#[cfg(target_os = "macos")]
const SHARED_LIBRARY_SUFFIX: &str = "dylib";
#[cfg(not(target_os = "macos"))]
const SHARED_LIBRARY_SUFFIX: &str = "so";

/// インストールルート
///
/// 各ファイルの位置はルートからの固定の相対パスで決まります。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModularRoot {
    root: PathBuf,
}

impl ModularRoot {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `lib/mojo-repl-entry-point`
    pub fn entry_point(&self) -> PathBuf {
        self.root.join("lib").join(ENTRY_POINT)
    }

    /// `lib/libMojoLLDB.{so,dylib}`
    pub fn plugin(&self) -> PathBuf {
        self.shared_library(PLUGIN_NAME)
    }

    /// `lib/libMojoJupyter.{so,dylib}`
    pub fn auxiliary_library(&self) -> PathBuf {
        self.shared_library(AUXILIARY_NAME)
    }

    /// `bin/mojo`
    pub fn driver(&self) -> PathBuf {
        self.root.join("bin").join(LANGUAGE_NAME)
    }

    /// `lib/mojo`
    pub fn import_path(&self) -> PathBuf {
        self.root.join("lib").join(LANGUAGE_NAME)
    }

    fn shared_library(&self, name: &str) -> PathBuf {
        self.root
            .join("lib")
            .join(format!("{}.{}", name, SHARED_LIBRARY_SUFFIX))
    }

    /// 言語ランタイムに渡す環境変数
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        let root = self.root.display().to_string();
        vec![
            (ENV_MAX_PACKAGE_ROOT, root.clone()),
            (ENV_MOJO_MAX_PACKAGE_ROOT, root),
            (ENV_MOJO_MAX_DRIVER_PATH, self.driver().display().to_string()),
            (ENV_MOJO_MAX_IMPORT_PATH, self.import_path().display().to_string()),
        ]
    }

    /// 環境変数を現在のプロセスに設定する
    ///
    /// デバッガホストの作成前に呼び出す必要があります。推論対象プロセスはこれを継承します。
    pub fn export_environment(&self) {
        for (key, value) in self.environment() {
            std::env::set_var(key, value);
        }
    }
}

/// セッション設定
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub root: ModularRoot,
    /// 評価に使う言語名
    pub language: String,
    /// 起動後に停止させるシンボル
    pub entry_symbol: String,
    /// 推論対象プロセスの実行イメージ
    pub entry_point: PathBuf,
    /// 言語サポートプラグイン
    pub plugin: PathBuf,
}

impl SessionConfig {
    /// ルートから既定の配置で設定を作る
    pub fn for_root(root: ModularRoot) -> Self {
        Self {
            language: LANGUAGE_NAME.to_string(),
            entry_symbol: ENTRY_SYMBOL.to_string(),
            entry_point: root.entry_point(),
            plugin: root.plugin(),
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_layout() {
        let root = ModularRoot::new("/opt/modroot");
        assert_eq!(root.entry_point(), PathBuf::from("/opt/modroot/lib/mojo-repl-entry-point"));
        assert_eq!(root.driver(), PathBuf::from("/opt/modroot/bin/mojo"));
        assert_eq!(root.import_path(), PathBuf::from("/opt/modroot/lib/mojo"));

        let plugin = root.plugin();
        assert!(plugin.starts_with("/opt/modroot/lib"));
        let name = plugin.file_name().unwrap().to_str().unwrap();
        assert!(name == "libMojoLLDB.so" || name == "libMojoLLDB.dylib");
    }

    #[test]
    fn test_environment() {
        let root = ModularRoot::new("/opt/modroot");
        let env = root.environment();
        assert_eq!(env.len(), 4);
        assert_eq!(env[0], (ENV_MAX_PACKAGE_ROOT, "/opt/modroot".to_string()));
        assert_eq!(env[1], (ENV_MOJO_MAX_PACKAGE_ROOT, "/opt/modroot".to_string()));
        assert_eq!(env[2], (ENV_MOJO_MAX_DRIVER_PATH, "/opt/modroot/bin/mojo".to_string()));
        assert_eq!(env[3], (ENV_MOJO_MAX_IMPORT_PATH, "/opt/modroot/lib/mojo".to_string()));
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::for_root(ModularRoot::new("/opt/modroot"));
        assert_eq!(config.language, "mojo");
        assert_eq!(config.entry_symbol, "mojo_repl_main");
        assert_eq!(config.entry_point, config.root.entry_point());
    }
}
