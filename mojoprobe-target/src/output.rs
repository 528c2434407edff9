//! 出力チャネルのドレイン

use crate::backend::{Channel, Process};
use tracing::warn;

/// 1回の読み出しで要求するバイト数
pub const DRAIN_CHUNK_SIZE: usize = 65536;

/// チャネルにバッファされている出力をすべて読み出す
///
/// 読み出しが0バイトを返すまで固定長のチャンクを読み続け、順に連結します。
/// 新しい出力の到着は待ちません。読み出した分だけチャネルのカーソルが進むため、
/// 同じバイトが2回返されることはありません。
/// UTF-8 としての解釈は連結後に行うので、チャンク境界で分割された文字も壊れません。
pub fn drain<P: Process + ?Sized>(process: &mut P, channel: Channel) -> String {
    let mut collected = Vec::new();
    let mut buf = vec![0u8; DRAIN_CHUNK_SIZE];

    loop {
        match process.read_output(channel, &mut buf) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(e) => {
                warn!("failed to read {}: {}", channel, e);
                break;
            }
        }
    }

    String::from_utf8_lossy(&collected).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ProcessState;
    use crate::Result;

    /// 1回の読み出しで最大 `max_read` バイトだけ返すプロセス
    struct BufferedProcess {
        stdout: Vec<u8>,
        cursor: usize,
        max_read: usize,
    }

    impl BufferedProcess {
        fn new(max_read: usize) -> Self {
            Self {
                stdout: Vec::new(),
                cursor: 0,
                max_read,
            }
        }

        fn write(&mut self, text: &str) {
            self.stdout.extend_from_slice(text.as_bytes());
        }
    }

    impl Process for BufferedProcess {
        fn state(&mut self) -> ProcessState {
            ProcessState::Stopped
        }

        fn read_output(&mut self, channel: Channel, buf: &mut [u8]) -> Result<usize> {
            if channel == Channel::Stderr {
                return Ok(0);
            }
            let available = &self.stdout[self.cursor..];
            let n = available.len().min(buf.len()).min(self.max_read);
            buf[..n].copy_from_slice(&available[..n]);
            self.cursor += n;
            Ok(n)
        }

        fn destroy(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_drain_twice_returns_empty() {
        let mut process = BufferedProcess::new(DRAIN_CHUNK_SIZE);
        process.write("42\n");
        assert_eq!(drain(&mut process, Channel::Stdout), "42\n");
        assert_eq!(drain(&mut process, Channel::Stdout), "");
    }

    #[test]
    fn test_drain_concatenation_matches_written() {
        let mut process = BufferedProcess::new(3);
        let writes = ["banner\n", "", "42\n", "99\nmore output\n", "héllo wörld\n"];
        let mut drained = String::new();
        for w in writes {
            process.write(w);
            drained.push_str(&drain(&mut process, Channel::Stdout));
        }
        assert_eq!(drained, writes.concat());
    }

    #[test]
    fn test_drain_multibyte_split_across_chunks() {
        let mut process = BufferedProcess::new(1);
        process.write("日本語");
        assert_eq!(drain(&mut process, Channel::Stdout), "日本語");
    }

    #[test]
    fn test_drain_empty_channel() {
        let mut process = BufferedProcess::new(DRAIN_CHUNK_SIZE);
        process.write("only stdout");
        assert_eq!(drain(&mut process, Channel::Stderr), "");
    }
}
