use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::bisect::{DivergenceReport, MoveDiff, RoundEvent};
use crate::config::HarnessConfig;

#[derive(Serialize)]
struct MetaRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    root: String,
    max_depth: u32,
    candidate: EngineMeta<'a>,
    reference: EngineMeta<'a>,
}

#[derive(Serialize)]
struct EngineMeta<'a> {
    name: &'a str,
    path: String,
    args: &'a [String],
    template: &'a str,
}

#[derive(Serialize)]
struct RoundRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    depth: u32,
    moves: &'a [String],
    candidate_nodes: u64,
    reference_nodes: u64,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mv: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_count: Option<u64>,
}

#[derive(Serialize)]
struct OutcomeRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    moves: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_nodes: Option<u64>,
}

/// 1回のスイープを JSONL で記録する。meta 1行、round を比較ごとに1行、
/// 最後に witness または consistent を1行。
pub struct RunLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn meta(&mut self, cfg: &HarnessConfig, timestamp: &DateTime<Local>) -> Result<()> {
        self.write(&MetaRecord {
            kind: "meta",
            timestamp: timestamp.to_rfc3339(),
            root: cfg.root.command(),
            max_depth: cfg.max_depth,
            candidate: EngineMeta {
                name: &cfg.candidate.name,
                path: cfg.candidate.path.display().to_string(),
                args: &cfg.candidate.args,
                template: &cfg.candidate.template,
            },
            reference: EngineMeta {
                name: &cfg.reference.name,
                path: cfg.reference.path.display().to_string(),
                args: &cfg.reference.args,
                template: &cfg.reference.template,
            },
        })
    }

    pub fn round(&mut self, ev: &RoundEvent<'_>) -> Result<()> {
        let (outcome, mv, candidate_count, reference_count) = match ev.diff {
            MoveDiff::Match => ("match", None, None, None),
            MoveDiff::Counts { mv, lhs, rhs } => {
                ("counts", Some(mv.as_str()), Some(*lhs), Some(*rhs))
            }
            MoveDiff::Missing { mv, .. } => ("missing", Some(mv.as_str()), None, None),
        };
        self.write(&RoundRecord {
            kind: "round",
            depth: ev.depth,
            moves: ev.moves,
            candidate_nodes: ev.candidate_total,
            reference_nodes: ev.reference_total,
            outcome,
            mv,
            candidate_count,
            reference_count,
        })
    }

    pub fn outcome(&mut self, report: &DivergenceReport) -> Result<()> {
        match report {
            DivergenceReport::Consistent { depth } => self.write(&OutcomeRecord {
                kind: "consistent",
                depth: *depth,
                moves: None,
                candidate_nodes: None,
                reference_nodes: None,
            }),
            DivergenceReport::Diverged(witness) => self.write(&OutcomeRecord {
                kind: "witness",
                depth: witness.depth,
                moves: Some(&witness.moves),
                candidate_nodes: Some(witness.counts.0),
                reference_nodes: Some(witness.counts.1),
            }),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

/// 既定の出力先。runs/perftdiff/<timestamp>-diff.jsonl
pub fn default_log_path(timestamp: &DateTime<Local>) -> PathBuf {
    PathBuf::from("runs/perftdiff")
        .join(format!("{}-diff.jsonl", timestamp.format("%Y%m%d-%H%M%S")))
}
