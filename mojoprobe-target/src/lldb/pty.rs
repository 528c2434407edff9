//! 疑似端末越しの子プロセス操作

use crate::Result;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::openpty;
use nix::sys::signal::{kill, Signal};
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};
use nix::unistd::Pid;
use regex::Regex;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// poll の1回あたりの待ち時間（ミリ秒）
const POLL_INTERVAL_MS: u16 = 100;

/// 疑似端末の読み出しエラー
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("{}", crate::errors::ERR_CONNECTION_CLOSED)]
    Closed,
    #[error("{} after {:?}", crate::errors::ERR_RESPONSE_TIMEOUT, .0)]
    Timeout(Duration),
    #[error("lldb exited unexpectedly ({0})")]
    ChildExited(ExitStatus),
}

/// 疑似端末に接続された子プロセス
pub struct PtyChild {
    master: File,
    child: Child,
    /// まだ消費していない出力
    pending: String,
    /// UTF-8 として不完全な末尾バイト
    partial: Vec<u8>,
}

impl PtyChild {
    /// 疑似端末を標準入出力にして子プロセスを起動する
    ///
    /// 端末のエコーは無効にします。
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        let pty = openpty(None, None)?;

        let mut termios = tcgetattr(pty.slave.as_fd())?;
        termios.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(pty.slave.as_fd(), SetArg::TCSANOW, &termios)?;

        let stdin = pty.slave.try_clone()?;
        let stdout = pty.slave.try_clone()?;
        let child = Command::new(program)
            .args(args)
            .env("TERM", "dumb")
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(pty.slave))
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn {:?}: {}", program, e))?;

        debug!("spawned {:?} (pid {})", program, child.id());

        Ok(Self {
            master: File::from(pty.master),
            child,
            pending: String::new(),
            partial: Vec::new(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// 1行書き込む
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        self.master.write_all(line.as_bytes())?;
        self.master.write_all(b"\n")?;
        self.master.flush()?;
        Ok(())
    }

    /// 子プロセスに SIGINT を送る
    pub fn interrupt(&mut self) -> std::result::Result<(), PtyError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(PtyError::ChildExited(status));
        }
        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGINT).map_err(|_| PtyError::Closed)?;
        debug!("sent SIGINT to pid {}", self.child.id());
        Ok(())
    }

    /// 待たずに読める出力をすべて読み捨てる
    ///
    /// 捨てた文字数を返します。
    pub fn discard_available(&mut self) -> std::result::Result<usize, PtyError> {
        while self.fill(0)? {}
        let stale = std::mem::take(&mut self.pending);
        self.partial.clear();
        if !stale.is_empty() {
            debug!("discarded stray output: {:?}", stale);
        }
        Ok(stale.len())
    }

    /// バッファ末尾がプロンプトに一致するまで読み続ける
    ///
    /// プロンプトが見えた後も `settle` の間は出力が続かないことを確認します。
    /// 戻り値はプロンプトより前の出力で、プロンプト自体は消費されます。
    /// タイムアウトした場合、それまでに読んだ出力はバッファに残ります。
    pub fn read_until_prompt(
        &mut self,
        prompt: &Regex,
        settle: Duration,
        deadline: Option<Duration>,
    ) -> std::result::Result<String, PtyError> {
        let start = Instant::now();
        let mut prompt_seen: Option<Instant> = None;

        loop {
            let got_data = self.fill(POLL_INTERVAL_MS)?;

            if got_data {
                prompt_seen = prompt.is_match(&self.pending).then(Instant::now);
            } else if prompt_seen.is_none() && prompt.is_match(&self.pending) {
                prompt_seen = Some(Instant::now());
            }

            if let Some(seen) = prompt_seen {
                if seen.elapsed() >= settle {
                    let text = std::mem::take(&mut self.pending);
                    let cut = prompt
                        .find_iter(&text)
                        .last()
                        .map(|m| m.start())
                        .unwrap_or(text.len());
                    return Ok(text[..cut].to_string());
                }
            }

            if let Some(limit) = deadline {
                if start.elapsed() > limit {
                    return Err(PtyError::Timeout(limit));
                }
            }
        }
    }

    /// 読み出せる出力をバッファに追加する
    ///
    /// データを受け取った場合は true を返します。
    fn fill(&mut self, timeout_ms: u16) -> std::result::Result<bool, PtyError> {
        let ready = {
            let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(n) => n,
                Err(Errno::EINTR) => 0,
                Err(_) => return Err(PtyError::Closed),
            }
        };

        if ready == 0 {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(PtyError::ChildExited(status));
            }
            return Ok(false);
        }

        let mut buf = [0u8; 4096];
        let n = match self.master.read(&mut buf) {
            Ok(0) => return Err(PtyError::Closed),
            Ok(n) => n,
            // スレーブ側が全て閉じられると EIO になる
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => return Err(PtyError::Closed),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(false),
            Err(_) => return Err(PtyError::Closed),
        };

        self.partial.extend_from_slice(&buf[..n]);
        let valid = match std::str::from_utf8(&self.partial) {
            Ok(s) => s.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.partial.len(),
        };
        let rest = self.partial.split_off(valid);
        self.pending.push_str(&String::from_utf8_lossy(&self.partial));
        self.partial = rest;
        Ok(true)
    }

    /// 子プロセスの終了を一定時間待ち、終わらなければ強制終了する
    pub fn shutdown(&mut self, grace: Duration) {
        let start = Instant::now();
        while start.elapsed() < grace {
            if let Ok(Some(status)) = self.child.try_wait() {
                debug!("lldb exited: {}", status);
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for PtyChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
