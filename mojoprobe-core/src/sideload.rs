//! 補助ライブラリの直接読み込み
//!
//! デバッガを介さずにこのプロセスへ共有ライブラリを読み込み、
//! 評価セッションとの干渉を確かめるために使います。

use crate::errors::ERR_SIDELOAD_FAILED;
use crate::Result;
use libloading::Library;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 読み込み済みの補助ライブラリ
///
/// ドロップ時に解放されます。
#[derive(Debug)]
pub struct AuxiliaryLibrary {
    path: PathBuf,
    library: Option<Library>,
}

impl AuxiliaryLibrary {
    /// ライブラリを読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // 初期化子がプロセス内で走る
        let library = unsafe { Library::new(&path) }
            .map_err(|e| anyhow::anyhow!("{} {:?}: {}", ERR_SIDELOAD_FAILED, path, e))?;
        info!("auxiliary library loaded: {:?}", path);
        Ok(Self {
            path,
            library: Some(library),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ライブラリを解放する（2回目以降は何もしない）
    pub fn release(&mut self) -> Result<()> {
        if let Some(library) = self.library.take() {
            library
                .close()
                .map_err(|e| anyhow::anyhow!("Failed to close {:?}: {}", self.path, e))?;
            debug!("auxiliary library released: {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_library() {
        let err = AuxiliaryLibrary::load("/nonexistent/libMojoJupyter.so").unwrap_err();
        assert!(err.to_string().starts_with(ERR_SIDELOAD_FAILED));
    }
}
