//! 実行イメージの検査

use crate::Result;
use object::{Object, ObjectSymbol};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// 実行イメージの概要
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub format: object::BinaryFormat,
    pub architecture: object::Architecture,
    symbols: HashSet<String>,
}

impl ImageInfo {
    /// 実行イメージを読み込んで検査する
    ///
    /// ファイルが存在しない、または実行イメージとして解釈できない場合はエラーになります。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read image {:?}: {}", path, e))?;
        let file = object::File::parse(&*data)
            .map_err(|e| anyhow::anyhow!("Failed to parse image {:?}: {}", path, e))?;

        // 静的シンボルと動的シンボルの両方を集める
        let symbols = file
            .symbols()
            .chain(file.dynamic_symbols())
            .filter_map(|sym| sym.name().ok().map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            format: file.format(),
            architecture: file.architecture(),
            symbols,
        })
    }

    /// シンボルが定義されているかどうか
    ///
    /// Mach-O の先頭アンダースコアは無視します。
    pub fn defines(&self, name: &str) -> bool {
        self.symbols.contains(name) || self.symbols.contains(&format!("_{}", name))
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_image() {
        assert!(ImageInfo::load("/nonexistent/mojo-repl-entry-point").is_err());
    }

    #[test]
    fn test_not_an_image() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"#!/bin/sh\necho not an object file\n").unwrap();
        assert!(ImageInfo::load(file.path()).is_err());
    }

    #[test]
    fn test_running_test_binary() {
        // テストバイナリ自身は必ず解釈できる
        let exe = std::env::current_exe().unwrap();
        let info = ImageInfo::load(&exe).unwrap();
        assert!(info.symbol_count() > 0);
        assert!(!info.defines("mojo_repl_main"));
    }
}
