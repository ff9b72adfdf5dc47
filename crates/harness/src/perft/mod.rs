use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::debug;

use crate::config::{EngineDescriptor, PositionSpec};
use crate::error::{HarnessError, Result};
use crate::uci::LineChannel;
use crate::uci::channel::duration_to_millis;

/// 1回の集計に許す既定の応答時間。深い perft は分単位かかる。
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(600);

/// 1つの (局面, depth) に対する指し手別のノード数。構築後は変更しない。
///
/// キーは BTreeMap でソート順に保持する。比較側が「ソート順で最初の
/// 食い違い」を要求するため、ここで順序を固定しておく。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerftResult {
    counts: BTreeMap<String, u64>,
}

impl PerftResult {
    /// 1エントリ追加する。既存トークンと重複していたら false。
    pub fn insert(&mut self, mv: String, nodes: u64) -> bool {
        if self.counts.contains_key(&mv) {
            return false;
        }
        self.counts.insert(mv, nodes);
        true
    }

    pub fn get(&self, mv: &str) -> Option<u64> {
        self.counts.get(mv).copied()
    }

    pub fn contains(&self, mv: &str) -> bool {
        self.counts.contains_key(mv)
    }

    /// ソート順の指し手トークン。
    pub fn moves(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(mv, nodes)| (mv.as_str(), *nodes))
    }

    /// 全指し手のノード数合計。
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// 新しいプロセスを起動して1回だけ perft 集計を取る。
///
/// 測定間の状態持ち越しを避けるため、呼び出しごとにプロセスを使い捨てる。
/// 長命のエンジンを使い回す最適化はしない。
pub fn collect(desc: &EngineDescriptor, pos: &PositionSpec, depth: u32) -> Result<PerftResult> {
    collect_with_timeout(desc, pos, depth, DEFAULT_COLLECT_TIMEOUT)
}

pub fn collect_with_timeout(
    desc: &EngineDescriptor,
    pos: &PositionSpec,
    depth: u32,
    timeout: Duration,
) -> Result<PerftResult> {
    debug!("{}: perft depth {} after [{}]", desc.name, depth, pos.moves.join(" "));
    let mut channel = LineChannel::spawn(&desc.path, &desc.args, &desc.name)?;
    for line in desc.render_perft_command(pos.fen(), &pos.moves, depth) {
        channel.send_raw(&line)?;
    }
    // EOF を渡して、コマンド処理後に自発終了するエンジンにも対応する
    channel.close_stdin()?;

    let deadline = Instant::now() + timeout;
    let mut lines: Vec<String> = Vec::new();
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(HarnessError::Timeout {
                engine: desc.name.clone(),
                waited_ms: duration_to_millis(timeout),
            });
        }
        match channel.poll_line(deadline - now)? {
            None => continue,
            Some(line) => {
                // ヘッダ行より後の最初の空行が集計の終端
                if !lines.is_empty() && line.trim().is_empty() {
                    break;
                }
                lines.push(line);
            }
        }
    }
    parse_breakdown(&lines, &desc.name)
}

/// 集計出力をパースする。先頭行はヘッダとして読み捨て、以降は
/// `<move>: <count>` 以外を受け付けない。重複トークンも不正。
pub fn parse_breakdown(lines: &[String], engine: &str) -> Result<PerftResult> {
    let mut entries = lines.iter();
    if entries.next().is_none() {
        return Err(HarnessError::ProcessLifecycle {
            engine: engine.to_string(),
            reason: "no perft output before the stream closed".to_string(),
        });
    }
    let mut result = PerftResult::default();
    for line in entries {
        let Some((mv, nodes)) = split_entry(line) else {
            return Err(HarnessError::ProtocolParse {
                engine: engine.to_string(),
                line: line.clone(),
            });
        };
        if !result.insert(mv.to_string(), nodes) {
            return Err(HarnessError::DuplicateMove {
                engine: engine.to_string(),
                mv: mv.to_string(),
            });
        }
    }
    Ok(result)
}

fn split_entry(line: &str) -> Option<(&str, u64)> {
    let (mv, count) = line.split_once(':')?;
    let mv = mv.trim();
    if mv.is_empty() || mv.contains(' ') {
        return None;
    }
    let nodes = count.trim().parse::<u64>().ok()?;
    Some((mv, nodes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_breakdown_discards_header_and_keeps_counts() {
        let result = parse_breakdown(
            &lines(&["Perft results:", "a2a3: 20", "b2b4: 21", "e2e4: 8031647685"]),
            "candidate",
        )
        .unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.get("a2a3"), Some(20));
        // 32bit を超える値もそのまま保持する
        assert_eq!(result.get("e2e4"), Some(8_031_647_685));
        assert_eq!(result.total(), 8_031_647_726);
        assert!(!result.contains("Perft"));
    }

    #[test]
    fn parse_breakdown_rejects_malformed_lines() {
        let err =
            parse_breakdown(&lines(&["header", "a2a3: 20", "garbage"]), "candidate").unwrap_err();
        assert!(matches!(err, HarnessError::ProtocolParse { ref line, .. } if line == "garbage"));

        let err = parse_breakdown(&lines(&["header", "a2a3: -4"]), "candidate").unwrap_err();
        assert!(matches!(err, HarnessError::ProtocolParse { .. }));

        let err = parse_breakdown(&lines(&["header", "two tokens: 4"]), "candidate").unwrap_err();
        assert!(matches!(err, HarnessError::ProtocolParse { .. }));
    }

    #[test]
    fn parse_breakdown_rejects_duplicate_moves() {
        let err = parse_breakdown(
            &lines(&["header", "e2e4: 20", "e2e4: 20"]),
            "candidate",
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateMove { ref mv, .. } if mv == "e2e4"));
    }

    #[test]
    fn parse_breakdown_requires_a_header() {
        let err = parse_breakdown(&[], "candidate").unwrap_err();
        assert!(matches!(err, HarnessError::ProcessLifecycle { .. }));

        // ヘッダだけの出力は空の集計(指し手なしの局面)
        let result = parse_breakdown(&lines(&["header"]), "candidate").unwrap();
        assert!(result.is_empty());
        assert_eq!(result.total(), 0);
    }

    #[test]
    fn perft_result_keeps_sorted_order() {
        let mut result = PerftResult::default();
        assert!(result.insert("g1f3".to_string(), 3));
        assert!(result.insert("a2a3".to_string(), 1));
        assert!(!result.insert("a2a3".to_string(), 9));
        assert_eq!(result.moves().collect::<Vec<_>>(), vec!["a2a3", "g1f3"]);
        assert_eq!(result.get("a2a3"), Some(1));
    }
}
