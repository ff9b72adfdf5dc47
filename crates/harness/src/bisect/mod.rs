use std::collections::BTreeSet;
use std::time::Duration;

use log::{debug, info};

use crate::config::{EngineDescriptor, PositionSpec};
use crate::error::{HarnessError, Result};
use crate::perft::{self, PerftResult};

/// perft 集計の供給元。
///
/// プロセス実装とテスト用スタブを差し替えるための継ぎ目。`moves` は
/// 基準局面からの追加手順で、探索の絞り込みごとに1手ずつ伸びる。
pub trait PerftSource {
    fn name(&self) -> &str;
    fn collect(&self, root: &PositionSpec, moves: &[String], depth: u32) -> Result<PerftResult>;
}

/// EngineDescriptor を背にした供給元。呼び出しごとに新しいプロセスを使う。
pub struct ProcessSource<'a> {
    desc: &'a EngineDescriptor,
    timeout: Duration,
}

impl<'a> ProcessSource<'a> {
    pub fn new(desc: &'a EngineDescriptor, timeout: Duration) -> Self {
        Self { desc, timeout }
    }
}

impl PerftSource for ProcessSource<'_> {
    fn name(&self) -> &str {
        &self.desc.name
    }

    fn collect(&self, root: &PositionSpec, moves: &[String], depth: u32) -> Result<PerftResult> {
        let pos = root.with_appended(moves);
        perft::collect_with_timeout(self.desc, &pos, depth, self.timeout)
    }
}

/// 2つの集計の比較結果。lhs が candidate、rhs が reference。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveDiff {
    /// 全トークンの個数が一致した。
    Match,
    /// ソート順で最初に個数が食い違ったトークン。
    Counts { mv: String, lhs: u64, rhs: u64 },
    /// 片側にしか存在しないトークン。side は欠けていた側。
    Missing { mv: String, side: Side },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Candidate,
    Reference,
}

/// 指し手トークンの和集合をソート順に走査して比較する。
/// 欠落手の検出は個数の食い違いより優先する。
pub fn diff(lhs: &PerftResult, rhs: &PerftResult) -> MoveDiff {
    let union: BTreeSet<&str> = lhs.moves().chain(rhs.moves()).collect();
    for mv in &union {
        if !lhs.contains(mv) {
            return MoveDiff::Missing {
                mv: (*mv).to_string(),
                side: Side::Candidate,
            };
        }
        if !rhs.contains(mv) {
            return MoveDiff::Missing {
                mv: (*mv).to_string(),
                side: Side::Reference,
            };
        }
    }
    for mv in &union {
        let l = lhs.get(mv).unwrap_or(0);
        let r = rhs.get(mv).unwrap_or(0);
        if l != r {
            return MoveDiff::Counts {
                mv: (*mv).to_string(),
                lhs: l,
                rhs: r,
            };
        }
    }
    MoveDiff::Match
}

/// 1回の (深さ, 手順接頭辞) 比較ごとに呼ばれるイベント。
pub struct RoundEvent<'a> {
    /// この比較の残り探索深さ。
    pub depth: u32,
    /// 基準局面からの手順接頭辞。
    pub moves: &'a [String],
    pub candidate_total: u64,
    pub reference_total: u64,
    pub diff: &'a MoveDiff,
}

/// 確認された divergence witness。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    /// 基準局面から食い違い地点までの手順。
    pub moves: Vec<String>,
    /// 食い違う個数を測定したときの残り深さ。
    pub depth: u32,
    /// 食い違った個数 (candidate, reference)。
    pub counts: (u64, u64),
}

/// 1回の bisection ランの結論。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivergenceReport {
    /// 要求深さまで両エンジンの集計が完全に一致した。
    Consistent { depth: u32 },
    Diverged(Witness),
}

/// 深さ剥がしで最小の divergence witness を特定する。
///
/// 各ラウンドで両エンジンの perft 集計を取り、ソート順で最初に食い違う
/// 指し手の部分木へ深さを1つ減らして潜る。一度食い違いを見た後に一致が
/// 返れば、その枝の特定が完了したことを意味する(前ラウンドの測定値が
/// witness になる)。深さ d の比較は部分木のどこかに不一致があることしか
/// 言わないので、この絞り込みはエンジン起動 O(depth) 回で収束する。
/// 欠落手はノード数の不一致と違って絞り込めないため、即座にランを
/// 中断して MissingMove にする。
pub fn localize(
    candidate: &dyn PerftSource,
    reference: &dyn PerftSource,
    root: &PositionSpec,
    depth: u32,
    on_round: &mut dyn FnMut(&RoundEvent<'_>),
) -> Result<DivergenceReport> {
    let mut moves: Vec<String> = Vec::new();
    let mut remaining = depth;
    // 直近の食い違い (測定深さ, candidate, reference)。None なら未検出
    let mut last: Option<(u32, u64, u64)> = None;

    while remaining > 0 {
        let r1 = candidate.collect(root, &moves, remaining)?;
        let r2 = reference.collect(root, &moves, remaining)?;
        let d = diff(&r1, &r2);
        on_round(&RoundEvent {
            depth: remaining,
            moves: &moves,
            candidate_total: r1.total(),
            reference_total: r2.total(),
            diff: &d,
        });
        match d {
            MoveDiff::Missing { mv, side } => {
                let engine = match side {
                    Side::Candidate => candidate.name(),
                    Side::Reference => reference.name(),
                };
                return Err(HarnessError::MissingMove {
                    engine: engine.to_string(),
                    mv,
                    moves: moves.join(" "),
                    depth: remaining,
                });
            }
            MoveDiff::Counts { mv, lhs, rhs } => {
                debug!(
                    "depth {} after [{}]: {} differs ({} vs {})",
                    remaining,
                    moves.join(" "),
                    mv,
                    lhs,
                    rhs
                );
                last = Some((remaining, lhs, rhs));
                moves.push(mv);
                remaining -= 1;
            }
            MoveDiff::Match => {
                return Ok(match last {
                    // 食い違いを見た後の一致は、直前の枝が確定したことを意味する
                    Some((d, lhs, rhs)) => DivergenceReport::Diverged(Witness {
                        moves,
                        depth: d,
                        counts: (lhs, rhs),
                    }),
                    None => DivergenceReport::Consistent { depth },
                });
            }
        }
    }

    // 深さを使い切ってもまだ食い違っている。蓄積した手順全体が witness
    Ok(match last {
        Some((d, lhs, rhs)) => DivergenceReport::Diverged(Witness {
            moves,
            depth: d,
            counts: (lhs, rhs),
        }),
        None => DivergenceReport::Consistent { depth },
    })
}

/// 深さ 1..=max_depth で localize を繰り返し、最初に確定した witness で止める。
pub fn sweep(
    candidate: &dyn PerftSource,
    reference: &dyn PerftSource,
    root: &PositionSpec,
    max_depth: u32,
    on_round: &mut dyn FnMut(&RoundEvent<'_>),
    on_depth: &mut dyn FnMut(u32, &DivergenceReport),
) -> Result<DivergenceReport> {
    let mut last = DivergenceReport::Consistent { depth: 0 };
    for depth in 1..=max_depth {
        info!("comparing {} vs {} at depth {}", candidate.name(), reference.name(), depth);
        let report = localize(candidate, reference, root, depth, on_round)?;
        on_depth(depth, &report);
        if matches!(report, DivergenceReport::Diverged(_)) {
            return Ok(report);
        }
        last = report;
    }
    Ok(last)
}
