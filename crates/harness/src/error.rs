use thiserror::Error;

/// ハーネス全体のエラー分類。
///
/// エンジン出力の異常(パース不能・重複手・欠落手)とプロセス自体の異常
/// (起動失敗・予期しない終了・応答期限超過)を呼び出し側で区別できるようにする。
/// パース系のエラーはリトライせず、そのまま上位へ伝播させる。
#[derive(Debug, Error)]
pub enum HarnessError {
    /// perft 出力行が `<move>: <count>` 形式に一致しない。
    #[error("{engine}: malformed perft line: {line:?}")]
    ProtocolParse { engine: String, line: String },

    /// 同一の集計内で指し手トークンが重複した。
    #[error("{engine}: duplicate move in perft output: {mv}")]
    DuplicateMove { engine: String, mv: String },

    /// 片方のエンジンにしか存在しない指し手が見つかった。比較続行は不能。
    #[error("move {mv} missing in {engine} (after [{moves}], depth {depth})")]
    MissingMove {
        engine: String,
        mv: String,
        moves: String,
        depth: u32,
    },

    /// プロセスの起動失敗、または応答途中での終了・パイプ切断。
    #[error("{engine}: {reason}")]
    ProcessLifecycle { engine: String, reason: String },

    /// 応答待ちが呼び出し側の期限を超えた。
    #[error("{engine}: no response within {waited_ms}ms")]
    Timeout { engine: String, waited_ms: u64 },

    /// 呼び出し側からのキャンセル要求で探索を打ち切った。
    #[error("search cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, HarnessError>;
