//! スクリプト製モックエンジンに対する結合テスト。
//!
//! 実エンジンのバイナリは外部依存なので、決定的な応答を返すシェル
//! スクリプトを立ててプロトコル経路(起動、コマンド送出、応答パース、
//! 終了処理)を通す。

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use perftdiff::bisect::{DivergenceReport, ProcessSource, RoundEvent, Witness, localize, sweep};
use perftdiff::config::{EngineDescriptor, PositionSpec};
use perftdiff::error::HarnessError;
use perftdiff::perft::collect_with_timeout;
use perftdiff::uci::EngineAdapter;
use tempfile::TempDir;

const COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

fn script_engine(dir: &TempDir, name: &str, body: &str) -> EngineDescriptor {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    EngineDescriptor::new(name, &path)
}

/// 固定の perft 集計を返すモック。コマンド2行を読んでから出力する。
fn perft_mock(dir: &TempDir, name: &str, entries: &[(&str, u64)]) -> EngineDescriptor {
    let mut body = String::from("read _position\nread _go\necho 'perft breakdown'\n");
    for (mv, nodes) in entries {
        body.push_str(&format!("echo '{mv}: {nodes}'\n"));
    }
    body.push_str("echo ''");
    script_engine(dir, name, &body)
}

/// 最小限の UCI 応答ループ。`go` への反応は `go_action` で差し替える。
fn uci_mock(dir: &TempDir, name: &str, go_action: &str) -> EngineDescriptor {
    let body = format!(
        r#"while read line; do
  case "$line" in
    uci) echo 'id name mock'; echo 'uciok' ;;
    isready) echo 'readyok' ;;
    go*) {go_action} ;;
    quit) exit 0 ;;
    *) : ;;
  esac
done"#
    );
    script_engine(dir, name, &body)
}

fn no_round() -> impl FnMut(&RoundEvent<'_>) {
    |_| {}
}

#[test]
fn collect_parses_a_breakdown() {
    let dir = TempDir::new().unwrap();
    let engine = perft_mock(&dir, "simple", &[("a2a3", 20), ("b2b4", 21)]);
    let result =
        collect_with_timeout(&engine, &PositionSpec::startpos(), 2, COLLECT_TIMEOUT).unwrap();
    assert_eq!(result.get("a2a3"), Some(20));
    assert_eq!(result.get("b2b4"), Some(21));
    assert_eq!(result.total(), 41);
}

#[test]
fn collect_is_deterministic_across_calls() {
    let dir = TempDir::new().unwrap();
    let engine = perft_mock(&dir, "stable", &[("a2a3", 20), ("e2e4", 4865609)]);
    let pos = PositionSpec::startpos();
    let first = collect_with_timeout(&engine, &pos, 5, COLLECT_TIMEOUT).unwrap();
    let second = collect_with_timeout(&engine, &pos, 5, COLLECT_TIMEOUT).unwrap();
    assert_eq!(first, second);
}

#[test]
fn collect_rejects_duplicate_moves() {
    // 同じ手を2度出力するエンジンは 20 にも 40 にもせずエラーにする
    let dir = TempDir::new().unwrap();
    let engine = script_engine(
        &dir,
        "duplicated",
        "read _position\nread _go\necho 'header'\necho 'e2e4: 20'\necho 'e2e4: 20'\necho ''",
    );
    let err =
        collect_with_timeout(&engine, &PositionSpec::startpos(), 1, COLLECT_TIMEOUT).unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateMove { ref mv, .. } if mv == "e2e4"));
}

#[test]
fn collect_rejects_malformed_lines() {
    let dir = TempDir::new().unwrap();
    let engine = script_engine(
        &dir,
        "garbled",
        "read _position\nread _go\necho 'header'\necho 'not a perft line'\necho ''",
    );
    let err =
        collect_with_timeout(&engine, &PositionSpec::startpos(), 1, COLLECT_TIMEOUT).unwrap_err();
    assert!(matches!(err, HarnessError::ProtocolParse { .. }));
}

#[test]
fn collect_surfaces_engine_death_instead_of_hanging() {
    let dir = TempDir::new().unwrap();
    let engine = script_engine(&dir, "dying", "read _position\nread _go\nexit 3");
    let err =
        collect_with_timeout(&engine, &PositionSpec::startpos(), 1, COLLECT_TIMEOUT).unwrap_err();
    assert!(matches!(err, HarnessError::ProcessLifecycle { .. }));
}

#[test]
fn collect_times_out_on_a_silent_engine() {
    let dir = TempDir::new().unwrap();
    let engine = script_engine(&dir, "silent", "read _position\nread _go\nsleep 5");
    let err = collect_with_timeout(
        &engine,
        &PositionSpec::startpos(),
        1,
        Duration::from_millis(300),
    )
    .unwrap_err();
    assert!(matches!(err, HarnessError::Timeout { .. }));
}

#[test]
fn adapter_returns_a_best_move() {
    let dir = TempDir::new().unwrap();
    let desc = uci_mock(&dir, "instant", "echo 'bestmove e2e4'");
    let mut engine = EngineAdapter::spawn(&desc).unwrap();
    engine.set_position(&PositionSpec::startpos()).unwrap();
    let cancel = AtomicBool::new(false);
    let mv = engine
        .search_best_move(100, Duration::from_secs(5), &cancel)
        .unwrap();
    assert_eq!(mv, "e2e4");
}

#[test]
fn adapter_polls_until_the_best_move_appears() {
    // bestmove は探索終了後に遅れて届く。プローブの出し直しで拾えること、
    // その後もチャンネルが同期状態にあることを確認する
    let dir = TempDir::new().unwrap();
    let desc = uci_mock(&dir, "slow", "( sleep 1; echo 'bestmove g1f3' ) &");
    let mut engine = EngineAdapter::spawn(&desc).unwrap();
    engine.set_position(&PositionSpec::startpos()).unwrap();
    let cancel = AtomicBool::new(false);
    let mv = engine
        .search_best_move(100, Duration::from_secs(10), &cancel)
        .unwrap();
    assert_eq!(mv, "g1f3");

    let mv = engine
        .search_best_move(100, Duration::from_secs(10), &cancel)
        .unwrap();
    assert_eq!(mv, "g1f3");
}

#[test]
fn adapter_times_out_when_no_best_move_arrives() {
    let dir = TempDir::new().unwrap();
    let desc = uci_mock(&dir, "mute", ":");
    let mut engine = EngineAdapter::spawn(&desc).unwrap();
    engine.set_position(&PositionSpec::startpos()).unwrap();
    let cancel = AtomicBool::new(false);
    let err = engine
        .search_best_move(100, Duration::from_millis(500), &cancel)
        .unwrap_err();
    assert!(matches!(err, HarnessError::Timeout { .. }));
}

#[test]
fn adapter_honors_cancellation() {
    let dir = TempDir::new().unwrap();
    let desc = uci_mock(&dir, "cancellable", ":");
    let mut engine = EngineAdapter::spawn(&desc).unwrap();
    engine.set_position(&PositionSpec::startpos()).unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::Relaxed);
    let err = engine
        .search_best_move(100, Duration::from_secs(30), &cancel)
        .unwrap_err();
    assert!(matches!(err, HarnessError::Cancelled));
}

#[test]
fn sweep_agrees_through_depth_four() {
    let dir = TempDir::new().unwrap();
    let entries: &[(&str, u64)] = &[("a2a3", 20), ("e2e4", 20), ("g1f3", 20)];
    let candidate_desc = perft_mock(&dir, "candidate", entries);
    let reference_desc = perft_mock(&dir, "reference", entries);
    let candidate = ProcessSource::new(&candidate_desc, COLLECT_TIMEOUT);
    let reference = ProcessSource::new(&reference_desc, COLLECT_TIMEOUT);

    let mut depths = Vec::new();
    let report = sweep(
        &candidate,
        &reference,
        &PositionSpec::startpos(),
        4,
        &mut no_round(),
        &mut |depth, _| depths.push(depth),
    )
    .unwrap();
    assert_eq!(report, DivergenceReport::Consistent { depth: 4 });
    assert_eq!(depths, vec![1, 2, 3, 4]);
}

#[test]
fn sweep_pinpoints_a_single_move_divergence() {
    // アンパッサン1手分だけ集計がずれるエンジン同士: depth 1 で witness になる
    let dir = TempDir::new().unwrap();
    let candidate_desc = perft_mock(&dir, "candidate", &[("e5d6", 1), ("e5e6", 1)]);
    let reference_desc = perft_mock(&dir, "reference", &[("e5d6", 2), ("e5e6", 1)]);
    let candidate = ProcessSource::new(&candidate_desc, COLLECT_TIMEOUT);
    let reference = ProcessSource::new(&reference_desc, COLLECT_TIMEOUT);

    let report = sweep(
        &candidate,
        &reference,
        &PositionSpec::from_fen("8/8/8/3pP3/8/8/8/8 w - d6 0 2"),
        1,
        &mut no_round(),
        &mut |_, _| {},
    )
    .unwrap();
    assert_eq!(
        report,
        DivergenceReport::Diverged(Witness {
            moves: vec!["e5d6".to_string()],
            depth: 1,
            counts: (1, 2),
        })
    );
}

#[test]
fn localize_aborts_when_a_move_is_missing() {
    let dir = TempDir::new().unwrap();
    let candidate_desc = perft_mock(&dir, "candidate", &[("a2a3", 1), ("b2b4", 1)]);
    let reference_desc = perft_mock(&dir, "reference", &[("a2a3", 1)]);
    let candidate = ProcessSource::new(&candidate_desc, COLLECT_TIMEOUT);
    let reference = ProcessSource::new(&reference_desc, COLLECT_TIMEOUT);

    let err = localize(
        &candidate,
        &reference,
        &PositionSpec::startpos(),
        1,
        &mut no_round(),
    )
    .unwrap_err();
    match err {
        HarnessError::MissingMove { engine, mv, .. } => {
            assert_eq!(engine, "reference");
            assert_eq!(mv, "b2b4");
        }
        other => panic!("unexpected error: {other}"),
    }
}
