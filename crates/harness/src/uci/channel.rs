use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{HarnessError, Result};

pub const READY_PROBE: &str = "isready";
pub const READY_ACK: &str = "readyok";

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(50);
const QUIT_TIMEOUT: Duration = Duration::from_millis(300);
const QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

/// 子プロセスの標準入出力を行単位の要求/応答チャンネルとして包む。
///
/// 同時に送れるコマンドは常に1つ(パイプライン化しない)。標準出力は専用
/// スレッドで行ごとに吸い上げ、受信側は期限付きで取り出す。プロセスが
/// 応答前に死んだ場合は読み込みをブロックし続けず ProcessLifecycle にする。
pub struct LineChannel {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    rx: Receiver<String>,
    killed: bool,
    pub label: String,
}

impl LineChannel {
    pub fn spawn(path: &Path, args: &[String], label: &str) -> Result<Self> {
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| HarnessError::ProcessLifecycle {
                engine: label.to_string(),
                reason: format!("failed to spawn {}: {}", path.display(), e),
            })?;
        let stdin = child.stdin.take().ok_or_else(|| HarnessError::ProcessLifecycle {
            engine: label.to_string(),
            reason: "no stdin handle".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| HarnessError::ProcessLifecycle {
            engine: label.to_string(),
            reason: "no stdout handle".to_string(),
        })?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            rx,
            killed: false,
            label: label.to_string(),
        })
    }

    /// コマンド1行と readiness プローブを書き込んで flush する。
    pub fn send(&mut self, cmd: &str) -> Result<()> {
        self.write_line(cmd)?;
        self.write_line(READY_PROBE)?;
        self.flush()
    }

    /// プローブを付けずに1行送る。再プローブや quit に使う。
    pub fn send_raw(&mut self, cmd: &str) -> Result<()> {
        self.write_line(cmd)?;
        self.flush()
    }

    fn write_line(&mut self, msg: &str) -> Result<()> {
        trace!("{} <- {}", self.label, msg);
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(HarnessError::ProcessLifecycle {
                engine: self.label.clone(),
                reason: "stdin already closed".to_string(),
            });
        };
        let res = stdin
            .write_all(msg.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"));
        // 書き込み失敗はパイプの切断、つまりプロセス側の異常
        res.map_err(|e| HarnessError::ProcessLifecycle {
            engine: self.label.clone(),
            reason: format!("failed to write to engine: {e}"),
        })
    }

    fn flush(&mut self) -> Result<()> {
        let res = match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        };
        res.map_err(|e| HarnessError::ProcessLifecycle {
            engine: self.label.clone(),
            reason: format!("failed to flush engine input: {e}"),
        })
    }

    /// 入力側を閉じて子プロセスへ EOF を伝える。
    /// 単発のコマンド列を処理したら終了するタイプのエンジンに使う。
    pub fn close_stdin(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().map_err(|e| HarnessError::ProcessLifecycle {
                engine: self.label.clone(),
                reason: format!("failed to flush engine input: {e}"),
            })?;
        }
        Ok(())
    }

    /// 1行を期限付きで受け取る。期限内に何も来なければ None。
    /// プロセスの死亡と出力ストリームの切断は即座に ProcessLifecycle になる。
    pub fn poll_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => {
                trace!("{} -> {}", self.label, line);
                Ok(Some(line))
            }
            Err(RecvTimeoutError::Timeout) => {
                // 応答が遅いだけか、プロセスごと死んでいるのかを区別する
                if let Ok(Some(status)) = self.child.try_wait() {
                    // 終了直前に書かれた行が残っていれば先に返す
                    if let Ok(line) = self.rx.try_recv() {
                        trace!("{} -> {}", self.label, line);
                        return Ok(Some(line));
                    }
                    return Err(HarnessError::ProcessLifecycle {
                        engine: self.label.clone(),
                        reason: format!("engine exited ({status}) while a response was pending"),
                    });
                }
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(HarnessError::ProcessLifecycle {
                engine: self.label.clone(),
                reason: "engine closed its output stream".to_string(),
            }),
        }
    }

    /// readyok が来るまで応答行を読み流し、その前に現れた最初の bestmove を返す。
    ///
    /// 期限超過は Timeout。cancel が立った場合は Cancelled で抜ける
    /// (探索中のエンジンを待ち続けないための脱出路)。
    pub fn receive_until_ready(
        &mut self,
        deadline: Instant,
        cancel: Option<&AtomicBool>,
    ) -> Result<Option<String>> {
        let started = Instant::now();
        let mut best: Option<String> = None;
        loop {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(HarnessError::Cancelled);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::Timeout {
                    engine: self.label.clone(),
                    waited_ms: duration_to_millis(started.elapsed()),
                });
            }
            let step = RECV_POLL_INTERVAL.min(deadline - now);
            let Some(line) = self.poll_line(step)? else {
                continue;
            };
            let trimmed = line.trim();
            if trimmed == READY_ACK {
                return Ok(best);
            }
            if best.is_none() {
                let mut tokens = trimmed.split_whitespace();
                if tokens.next() == Some("bestmove") {
                    best = tokens.next().map(str::to_string);
                }
            }
        }
    }

    /// プロセスを強制終了する。複数回呼んでも安全。
    pub fn terminate(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for LineChannel {
    fn drop(&mut self) {
        if self.killed {
            return;
        }
        // quit で自発終了の猶予を与えてから kill に落とす
        let _ = self.send_raw("quit");
        let deadline = Instant::now() + QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                self.killed = true;
                return;
            }
            std::thread::sleep(QUIT_POLL_INTERVAL);
        }
        self.terminate();
    }
}
