//! UCI チェスエンジン向けの perft 差分テストハーネス。
//!
//! candidate / reference の2エンジンに同じ局面の perft を発行して集計を
//! 突き合わせ、食い違いが出たら最初に食い違う指し手の部分木へ深さを
//! 1つ減らしながら潜ることで、最小の再現手順 (divergence witness) を
//! 特定する。エンジンはプロセスとして起動し、行単位の要求/応答で駆動する。

pub mod bisect;
pub mod config;
pub mod error;
pub mod perft;
pub mod report;
pub mod uci;

pub use bisect::{
    DivergenceReport, MoveDiff, PerftSource, ProcessSource, RoundEvent, Side, Witness, diff,
    localize, sweep,
};
pub use config::{
    DEFAULT_ROOT_FEN, EngineDescriptor, FEN_STARTPOS, HarnessConfig, PositionSpec, load_config,
    parse_config,
};
pub use error::{HarnessError, Result};
pub use perft::{DEFAULT_COLLECT_TIMEOUT, PerftResult, collect, collect_with_timeout};
pub use report::{RunLog, default_log_path};
pub use uci::{EngineAdapter, LineChannel};
