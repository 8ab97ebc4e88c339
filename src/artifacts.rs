//! Readers for the files a training run leaves in its folder.
//!
//! Every reader returns `Ok(None)` (or an empty list) when its input is
//! absent; only unreadable or structurally broken files surface as errors.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::drivers::mine_drivers;
use crate::model::{DriverScore, PredictionRecord, PredictionTable, ReportedMetrics, Scope};
use crate::util::{parse_optional_f64, read_optional_text};

pub const MASTER_TABLE: &str = "output_final/output_final_master.csv";
pub const DISTRIBUTION_TABLE: &str =
    "output_final/relatorios_visuais/table_distribution_comparative.csv";
pub const ELASTICITY_DIR: &str = "relatorios_finais";
const ELASTICITY_PREFIX: &str = "elasticidade_";
const PROBABILITY_PREFIX: &str = "prob_fcu_";

/// Patterns for the free-text training log fallbacks.
#[derive(Debug, Clone)]
pub struct LogPatterns {
    metrics: Regex,
    shapes: Regex,
}

impl LogPatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            metrics: Regex::new(r"AUC=(\d+\.\d+), Brier=(\d+\.\d+)")
                .context("failed to compile training-log metrics regex")?,
            shapes: Regex::new(r"Shapes: Treino=\(\d+, (\d+)\)")
                .context("failed to compile training-log shapes regex")?,
        })
    }

    pub fn parse_metrics(&self, text: &str) -> Option<ReportedMetrics> {
        let captures = self.metrics.captures(text)?;
        let auc = captures.get(1)?.as_str().parse::<f64>().ok()?;
        let brier = captures.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
        Some(ReportedMetrics { auc, brier })
    }

    pub fn parse_feature_count(&self, text: &str) -> Option<usize> {
        self.shapes
            .captures(text)?
            .get(1)?
            .as_str()
            .parse::<usize>()
            .ok()
    }
}

#[derive(Debug, Deserialize)]
struct MetricsFile {
    auc: Option<f64>,
    brier_score: Option<f64>,
}

/// A CSV table kept as raw strings for verbatim rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElasticityImage {
    pub scope: String,
    pub feature: String,
    pub path: PathBuf,
}

pub struct RunArtifacts<'a> {
    dir: PathBuf,
    patterns: &'a LogPatterns,
}

impl<'a> RunArtifacts<'a> {
    pub fn new(dir: PathBuf, patterns: &'a LogPatterns) -> Self {
        Self { dir, patterns }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn training_log(&self, scope: &Scope) -> Result<Option<String>> {
        let path = self
            .dir
            .join("treinamento")
            .join(format!("log_treino_{}.txt", scope.file_token()));
        read_optional_text(&path)
    }

    /// AUC and Brier from `modelos/metrics_<scope>.json`, falling back to the
    /// training log line `AUC=<f>, Brier=<f>`.
    pub fn reported_metrics(&self, scope: &Scope) -> Result<Option<ReportedMetrics>> {
        let path = self
            .dir
            .join("modelos")
            .join(format!("metrics_{}.json", scope.file_token()));

        if let Some(raw) = read_optional_text(&path)? {
            match serde_json::from_str::<MetricsFile>(&raw) {
                Ok(MetricsFile {
                    auc: Some(auc),
                    brier_score,
                }) => {
                    return Ok(Some(ReportedMetrics {
                        auc,
                        brier: brier_score,
                    }));
                }
                Ok(_) => warn!(path = %path.display(), "metrics file has no auc"),
                Err(err) => warn!(path = %path.display(), error = %err, "malformed metrics file"),
            }
        }

        Ok(self
            .training_log(scope)?
            .and_then(|text| self.patterns.parse_metrics(&text)))
    }

    /// Selected feature count: length of `features_config/selected_features_<scope>.json`,
    /// falling back to the second dimension of `Shapes: Treino=(n, m)`.
    pub fn feature_count(&self, scope: &Scope) -> Result<Option<usize>> {
        let path = self
            .dir
            .join("features_config")
            .join(format!("selected_features_{}.json", scope.file_token()));

        if let Some(raw) = read_optional_text(&path)? {
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Array(items)) => return Ok(Some(items.len())),
                Ok(Value::Object(map)) => return Ok(Some(map.len())),
                Ok(_) => warn!(path = %path.display(), "feature list is neither array nor object"),
                Err(err) => warn!(path = %path.display(), error = %err, "malformed feature list"),
            }
        }

        Ok(self
            .training_log(scope)?
            .and_then(|text| self.patterns.parse_feature_count(&text)))
    }

    pub fn drivers(&self, scope: &Scope) -> Result<Vec<DriverScore>> {
        let path = self
            .dir
            .join("relatorios")
            .join(format!("relatorio_analise_{}.txt", scope.file_token()));

        match read_optional_text(&path)? {
            Some(text) => Ok(mine_drivers(&text)),
            None => {
                debug!(path = %path.display(), "driver report missing");
                Ok(Vec::new())
            }
        }
    }

    pub fn distribution_table(&self) -> Result<Option<CsvTable>> {
        let path = self.dir.join(DISTRIBUTION_TABLE);
        if !path.exists() {
            return Ok(None);
        }
        read_csv_table(&path).map(Some)
    }

    pub fn master_table(&self) -> Result<Option<PredictionTable>> {
        let path = self.dir.join(MASTER_TABLE);
        if !path.exists() {
            return Ok(None);
        }
        read_prediction_table(&path).map(Some)
    }

    /// Images named `elasticidade_<scope token>_<feature>.<ext>`, sorted by
    /// file name. The longest matching scope token wins.
    pub fn elasticity_images(&self, scopes: &[Scope]) -> Result<Vec<ElasticityImage>> {
        let dir = self.dir.join(ELASTICITY_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let entries =
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    matches!(
                        ext.to_ascii_lowercase().as_str(),
                        "png" | "svg" | "jpg" | "jpeg"
                    )
                })
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            }
        }
        paths.sort();

        let mut images = Vec::new();
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let Some(rest) = stem.strip_prefix(ELASTICITY_PREFIX) else {
                continue;
            };

            let matched = scopes
                .iter()
                .filter_map(|scope| {
                    let token = scope.file_token();
                    rest.strip_prefix(&format!("{token}_"))
                        .map(|feature| (token.len(), scope, feature.to_string()))
                })
                .max_by_key(|(len, _, _)| *len);

            match matched {
                Some((_, scope, feature)) if !feature.is_empty() => images.push(ElasticityImage {
                    scope: scope.name.clone(),
                    feature,
                    path: path.clone(),
                }),
                _ => debug!(path = %path.display(), "elasticity image matches no scope"),
            }
        }

        Ok(images)
    }
}

pub fn read_csv_table(path: &Path) -> Result<CsvTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(ToOwned::to_owned)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("failed to read row in {}", path.display()))?;
        rows.push(record.iter().map(ToOwned::to_owned).collect());
    }

    Ok(CsvTable { headers, rows })
}

/// Master prediction table: `ID`, `FCU` and one `prob_fcu_<scope>` column per scope.
pub fn read_prediction_table(path: &Path) -> Result<PredictionTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open master table {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect::<Vec<_>>();

    let Some(id_idx) = headers.iter().position(|header| header == "ID") else {
        bail!("master table {} has no ID column", path.display());
    };
    let label_idx = headers.iter().position(|header| header == "FCU");
    let probability_columns = headers
        .iter()
        .enumerate()
        .filter(|(_, header)| header.starts_with(PROBABILITY_PREFIX))
        .map(|(idx, header)| (idx, header.clone()))
        .collect::<Vec<_>>();

    let mut table = PredictionTable {
        columns: headers.iter().cloned().collect::<HashSet<_>>(),
        records: Vec::new(),
    };

    for record in reader.records() {
        let record =
            record.with_context(|| format!("failed to read row in {}", path.display()))?;
        let id = record.get(id_idx).map(str::trim).unwrap_or_default();
        if id.is_empty() {
            continue;
        }

        let probabilities = probability_columns
            .iter()
            .filter_map(|(idx, column)| {
                let value = record.get(*idx).and_then(parse_optional_f64)?;
                Some((column.clone(), value))
            })
            .collect();

        table.records.push(PredictionRecord {
            id: id.to_string(),
            label: label_idx
                .and_then(|idx| record.get(idx))
                .and_then(parse_optional_f64),
            probabilities,
        });
    }

    Ok(table)
}
