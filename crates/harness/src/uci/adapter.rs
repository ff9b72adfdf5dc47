use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use log::debug;

use super::channel::{LineChannel, READY_PROBE, duration_to_millis};
use crate::config::{EngineDescriptor, PositionSpec};
use crate::error::{HarnessError, Result};

/// 握手・局面設定などの同期コマンドに許す応答時間。
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// bestmove 待ちの再プローブ間隔。
pub const SEARCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// UCI エンジン1本に対する最小のコマンド列を受け持つ。
/// 握手、局面設定、時間制限付き探索の3つができれば足りる。
pub struct EngineAdapter {
    channel: LineChannel,
}

impl EngineAdapter {
    /// プロセスを起動して握手を済ませる。
    pub fn spawn(desc: &EngineDescriptor) -> Result<Self> {
        let channel = LineChannel::spawn(&desc.path, &desc.args, &desc.name)?;
        let mut adapter = Self { channel };
        adapter.new_game()?;
        Ok(adapter)
    }

    /// 握手と新規対局リセット。`uciok` は待たず、プローブ応答で同期する。
    pub fn new_game(&mut self) -> Result<()> {
        self.command("uci")?;
        self.command("ucinewgame")?;
        Ok(())
    }

    pub fn set_position(&mut self, pos: &PositionSpec) -> Result<()> {
        self.command(&pos.command())?;
        Ok(())
    }

    /// 時間制限付き探索。
    ///
    /// `go movetime` を発行した後、bestmove が返るまで一定間隔で
    /// readiness プローブを出し直す。deadline 超過は Timeout、cancel が
    /// 立てば Cancelled で抜ける。成功時は readyok まで消費済みなので、
    /// チャンネルは次のコマンドを受け付けられる状態にある。
    pub fn search_best_move(
        &mut self,
        movetime_ms: u64,
        limit: Duration,
        cancel: &AtomicBool,
    ) -> Result<String> {
        let started = Instant::now();
        let deadline = started + limit;
        self.channel.send(&format!("go movetime {movetime_ms}"))?;
        loop {
            match self.channel.receive_until_ready(deadline, Some(cancel)) {
                Ok(Some(mv)) => {
                    debug!(
                        "{}: bestmove {} ({}ms)",
                        self.channel.label,
                        mv,
                        duration_to_millis(started.elapsed())
                    );
                    return Ok(mv);
                }
                Ok(None) => {}
                Err(HarnessError::Cancelled) => {
                    // 走りっぱなしの探索を止めてから抜ける
                    let _ = self.channel.send_raw("stop");
                    return Err(HarnessError::Cancelled);
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::Timeout {
                    engine: self.channel.label.clone(),
                    waited_ms: duration_to_millis(started.elapsed()),
                });
            }
            std::thread::sleep(SEARCH_POLL_INTERVAL);
            self.channel.send_raw(READY_PROBE)?;
        }
    }

    /// 明示的にプロセスを止める。Drop 経由でも同じ経路に落ちる。
    pub fn terminate(&mut self) {
        self.channel.terminate();
    }

    pub fn name(&self) -> &str {
        &self.channel.label
    }

    /// コマンドを送り、readyok まで応答を読み流して同期を取る。
    fn command(&mut self, cmd: &str) -> Result<Option<String>> {
        self.channel.send(cmd)?;
        self.channel.receive_until_ready(Instant::now() + COMMAND_TIMEOUT, None)
    }
}
