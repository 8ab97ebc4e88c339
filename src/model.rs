use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A trained model variant under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub key: String,
    pub name: String,
    pub folder: String,
    pub threshold: f64,
    pub interactions: bool,
    #[serde(default = "default_true")]
    pub evaluate: bool,
}

fn default_true() -> bool {
    true
}

impl Run {
    /// Short tab label: the display name up to the first parenthesis.
    pub fn label(&self) -> &str {
        self.name.split('(').next().unwrap_or(&self.name).trim()
    }

    pub fn threshold_label(&self) -> String {
        format!("{:.2}", self.threshold)
    }

    pub fn dir(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.folder)
    }
}

/// A geographic evaluation partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    #[serde(default)]
    pub national: bool,
}

impl Scope {
    pub fn national(name: &str) -> Self {
        Self {
            name: name.to_string(),
            national: true,
        }
    }

    pub fn local(name: &str) -> Self {
        Self {
            name: name.to_string(),
            national: false,
        }
    }

    /// Token used in file names: spaces become underscores.
    pub fn file_token(&self) -> String {
        sanitize_scope_name(&self.name)
    }

    /// Probability column of the master prediction table for this scope.
    pub fn column_for(&self) -> String {
        format!("prob_fcu_{}", self.file_token())
    }

    pub fn matches(&self, raw: &str) -> bool {
        let raw = raw.trim();
        raw == self.name || raw == self.file_token()
    }
}

pub fn sanitize_scope_name(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// One scored entity from a run's master prediction table.
#[derive(Debug, Clone, Default)]
pub struct PredictionRecord {
    pub id: String,
    pub label: Option<f64>,
    pub probabilities: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct PredictionTable {
    pub columns: HashSet<String>,
    pub records: Vec<PredictionRecord>,
}

/// A held-out row with both label and probability present.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSample {
    pub id: String,
    pub label: f64,
    pub prob: f64,
}

impl PredictionTable {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    /// Rows whose ID is in `ids` and which carry both a label and a value in
    /// `column`, ordered by ID. Returns `None` when the column is absent.
    pub fn held_out_samples(
        &self,
        ids: &BTreeSet<String>,
        column: &str,
    ) -> Option<Vec<ScoredSample>> {
        if !self.has_column(column) {
            return None;
        }

        let mut samples = self
            .records
            .iter()
            .filter(|record| ids.contains(&record.id))
            .filter_map(|record| {
                let label = record.label?;
                let prob = *record.probabilities.get(column)?;
                Some(ScoredSample {
                    id: record.id.clone(),
                    label,
                    prob,
                })
            })
            .collect::<Vec<_>>();
        samples.sort_by(|left, right| left.id.cmp(&right.id));
        Some(samples)
    }
}

/// Train/test partition of entity IDs for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitAssignment {
    pub scope: String,
    pub test_ids: BTreeSet<String>,
    pub train_ids: BTreeSet<String>,
    pub group_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverScore {
    pub feature: String,
    pub score: f64,
}

/// Evaluation outcome for a (run, scope); `None` marks an undefined metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    pub auc: Option<f64>,
    pub brier: Option<f64>,
    pub auprc: Option<f64>,
    pub recall_at_1: Option<f64>,
    pub recall_at_5: Option<f64>,
    pub precision_at_1: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityRecord {
    #[serde(rename = "Driver")]
    pub feature: String,
    #[serde(rename = "Frequency")]
    pub count: usize,
}

/// One row of `advanced_metrics.csv`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetricRow {
    #[serde(rename = "Run")]
    pub run: String,
    #[serde(rename = "AUC (Global)")]
    pub auc: Option<f64>,
    #[serde(rename = "Brier (Global)")]
    pub brier: Option<f64>,
    #[serde(rename = "AUPRC (Global)")]
    pub auprc: Option<f64>,
    #[serde(rename = "Recall@1% (Global)")]
    pub recall_at_1: Option<f64>,
    #[serde(rename = "Precision@1% (Global)")]
    pub precision_at_1: Option<f64>,
    #[serde(rename = "Recall@5% (Global)")]
    pub recall_at_5: Option<f64>,
    #[serde(rename = "AUPRC (Média Local)")]
    pub auprc_local_mean: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impact {
    Positive,
    NegativeOrNeutral,
}

impl Impact {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Self::Positive
        } else {
            Self::NegativeOrNeutral
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "Positivo",
            Self::NegativeOrNeutral => "Negativo/Neutro",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AblationRow {
    pub threshold: String,
    pub with_interactions: String,
    pub without_interactions: String,
    pub auc_with: f64,
    pub auc_without: f64,
    pub delta: f64,
    pub impact: Impact,
}

/// Metrics reported by the training step for a (run, scope).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedMetrics {
    pub auc: f64,
    pub brier: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramEntry {
    pub run_key: String,
    pub scope: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagramManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub entries: Vec<DiagramEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitManifestEntry {
    pub scope: String,
    pub status: String,
    pub group_count: usize,
    pub test_count: usize,
    pub train_count: usize,
    pub test_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub dataset: String,
    pub dataset_sha256: String,
    pub seed: u64,
    pub test_fraction: f64,
    pub cell_size: f64,
    pub scopes: Vec<SplitManifestEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_column_replaces_spaces() {
        let scope = Scope::local("Belo Horizonte");
        assert_eq!(scope.file_token(), "Belo_Horizonte");
        assert_eq!(scope.column_for(), "prob_fcu_Belo_Horizonte");
        assert!(scope.matches("Belo Horizonte"));
        assert!(scope.matches("Belo_Horizonte "));
        assert!(!scope.matches("Recife"));
        assert_eq!(Scope::national("BRASIL").column_for(), "prob_fcu_BRASIL");
    }

    #[test]
    fn run_label_drops_parenthesised_suffix() {
        let run = Run {
            key: "run8".to_string(),
            name: "Run 8 (0.60, NoInt)".to_string(),
            folder: "log_v3_60_noint".to_string(),
            threshold: 0.6,
            interactions: false,
            evaluate: true,
        };
        assert_eq!(run.label(), "Run 8");
        assert_eq!(run.threshold_label(), "0.60");
    }

    #[test]
    fn held_out_samples_requires_label_probability_and_membership() {
        let mut table = PredictionTable::default();
        table.columns.insert("prob_fcu_BRASIL".to_string());
        let record = |id: &str, label: Option<f64>, prob: Option<f64>| PredictionRecord {
            id: id.to_string(),
            label,
            probabilities: prob
                .map(|value| HashMap::from([("prob_fcu_BRASIL".to_string(), value)]))
                .unwrap_or_default(),
        };
        table.records = vec![
            record("b", Some(1.0), Some(0.9)),
            record("a", Some(0.0), Some(0.2)),
            record("c", None, Some(0.5)),
            record("d", Some(1.0), None),
            record("e", Some(1.0), Some(0.7)),
        ];

        let ids = ["a", "b", "c", "d"]
            .iter()
            .map(|id| id.to_string())
            .collect::<BTreeSet<_>>();
        let samples = table
            .held_out_samples(&ids, "prob_fcu_BRASIL")
            .expect("column exists");
        let kept = samples.iter().map(|s| s.id.as_str()).collect::<Vec<_>>();
        assert_eq!(kept, vec!["a", "b"]);

        assert!(table.held_out_samples(&ids, "prob_fcu_Recife").is_none());
    }
}
