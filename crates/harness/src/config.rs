use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;

/// チェス初期局面の FEN。
pub const FEN_STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// 既定の比較基準局面。キャスリング・アンパッサン・プロモーションが
/// 同時に現れるため、move generator の検証に向く。
pub const DEFAULT_ROOT_FEN: &str =
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

/// エンジン1本の起動とコマンド定義。
#[derive(Debug, Clone, Deserialize)]
pub struct EngineDescriptor {
    /// 表示名。レポートとエラー文脈で使う。
    pub name: String,
    /// 実行ファイルのパス。
    pub path: PathBuf,
    /// 追加の起動引数。
    #[serde(default)]
    pub args: Vec<String>,
    /// perft 複合コマンドのテンプレート。
    /// `{fen}` `{moves}` `{depth}` を置換し、改行でプロトコル行を区切る。
    /// `perft <d>` 形式と `go perft <d>` 形式の両方のエンジンを吸収する。
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_template() -> String {
    "position fen {fen} moves {moves}\ngo perft {depth}".to_string()
}

impl EngineDescriptor {
    pub fn new(name: &str, path: &Path) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            args: Vec::new(),
            template: default_template(),
        }
    }

    /// テンプレートを具体的なコマンド行の列に展開する。
    /// シェル経由で渡されたリテラルの `\n` も行区切りとして扱う。
    pub fn render_perft_command(&self, fen: &str, moves: &[String], depth: u32) -> Vec<String> {
        let rendered = self
            .template
            .replace("\\n", "\n")
            .replace("{fen}", fen)
            .replace("{moves}", &moves.join(" "))
            .replace("{depth}", &depth.to_string());
        rendered
            .lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

/// 比較の基準局面。FEN(または初期局面)と、そこからの手順。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSpec {
    pub startpos: bool,
    pub fen: Option<String>,
    pub moves: Vec<String>,
}

impl PositionSpec {
    pub fn startpos() -> Self {
        Self {
            startpos: true,
            fen: None,
            moves: Vec::new(),
        }
    }

    pub fn from_fen(fen: &str) -> Self {
        Self {
            startpos: false,
            fen: Some(fen.to_string()),
            moves: Vec::new(),
        }
    }

    /// CLI 引数の局面指定を解釈する。`startpos` か生の FEN 文字列を受け付ける。
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            bail!("empty position");
        }
        if trimmed == "startpos" {
            return Ok(Self::startpos());
        }
        // FEN は最低でも盤面と手番の2フィールドを持つ
        if trimmed.split_whitespace().count() < 2 {
            bail!("invalid FEN: {trimmed}");
        }
        Ok(Self::from_fen(trimmed))
    }

    /// テンプレート置換に使う FEN。初期局面指定は標準 FEN に落とす。
    pub fn fen(&self) -> &str {
        self.fen.as_deref().unwrap_or(FEN_STARTPOS)
    }

    /// `position ...` コマンド行を組み立てる。
    pub fn command(&self) -> String {
        let mut buf = String::from("position ");
        if self.startpos {
            buf.push_str("startpos");
        } else {
            buf.push_str("fen ");
            buf.push_str(self.fen());
        }
        if !self.moves.is_empty() {
            buf.push_str(" moves ");
            buf.push_str(&self.moves.join(" "));
        }
        buf
    }

    /// 追加の手順を連結した局面指定を返す。
    pub fn with_appended(&self, extra: &[String]) -> Self {
        let mut spec = self.clone();
        spec.moves.extend(extra.iter().cloned());
        spec
    }
}

/// 1回の比較ランに必要な設定一式。
/// モジュールレベルの可変状態は持たず、参照で各コンポーネントへ渡す。
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub root: PositionSpec,
    pub candidate: EngineDescriptor,
    pub reference: EngineDescriptor,
    pub max_depth: u32,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    root_fen: Option<String>,
    max_depth: Option<u32>,
    #[serde(default)]
    engines: Vec<EngineDescriptor>,
}

/// TOML 設定文字列から HarnessConfig を組み立てる。
/// `[[engines]]` は candidate, reference の順でちょうど2つ必要。
pub fn parse_config(text: &str) -> anyhow::Result<HarnessConfig> {
    let file: ConfigFile = toml::from_str(text)?;
    if file.engines.len() != 2 {
        bail!(
            "expected exactly two [[engines]] entries (candidate, reference), found {}",
            file.engines.len()
        );
    }
    let mut engines = file.engines.into_iter();
    let candidate = engines.next().unwrap();
    let reference = engines.next().unwrap();
    let root = match file.root_fen.as_deref() {
        Some(s) => PositionSpec::parse(s)?,
        None => PositionSpec::from_fen(DEFAULT_ROOT_FEN),
    };
    Ok(HarnessConfig {
        root,
        candidate,
        reference,
        max_depth: file.max_depth.unwrap_or(6),
    })
}

pub fn load_config(path: &Path) -> anyhow::Result<HarnessConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_config(&text).with_context(|| format!("failed to parse {}", path.display()))
}
