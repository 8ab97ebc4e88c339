//! Folds per-(run, scope) metrics and driver tables into comparative views.

use std::collections::HashMap;

use crate::model::{
    AblationRow, DriverScore, GlobalMetricRow, Impact, MetricSet, Run, StabilityRecord,
};

/// Outcome for one scope of one run; `metrics` is `None` when the scope could
/// not be evaluated (missing column, empty partition).
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEvaluation {
    pub scope: String,
    pub national: bool,
    pub metrics: Option<MetricSet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunEvaluation {
    pub run_name: String,
    pub scopes: Vec<ScopeEvaluation>,
}

impl RunEvaluation {
    pub fn national(&self) -> Option<&MetricSet> {
        self.scopes
            .iter()
            .find(|scope| scope.national)
            .and_then(|scope| scope.metrics.as_ref())
    }

    /// Mean AUPRC over local scopes with a defined value.
    pub fn local_auprc_mean(&self) -> Option<f64> {
        let values = self
            .scopes
            .iter()
            .filter(|scope| !scope.national)
            .filter_map(|scope| scope.metrics.as_ref()?.auprc)
            .collect::<Vec<_>>();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn global_metric_table(evaluations: &[RunEvaluation]) -> Vec<GlobalMetricRow> {
    evaluations
        .iter()
        .map(|evaluation| {
            let national = evaluation.national().cloned().unwrap_or_default();
            GlobalMetricRow {
                run: evaluation.run_name.clone(),
                auc: national.auc,
                brier: national.brier,
                auprc: national.auprc,
                recall_at_1: national.recall_at_1,
                precision_at_1: national.precision_at_1,
                recall_at_5: national.recall_at_5,
                auprc_local_mean: evaluation.local_auprc_mean(),
            }
        })
        .collect()
}

/// Counts, per feature, the driver tables where `|score| > threshold`.
/// Sorted by descending count; ties keep first-seen order.
pub fn driver_stability<'a, I>(tables: I, threshold: f64) -> Vec<StabilityRecord>
where
    I: IntoIterator<Item = &'a [DriverScore]>,
{
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for table in tables {
        for driver in table {
            let count = counts.entry(driver.feature.clone()).or_insert_with(|| {
                order.push(driver.feature.clone());
                0
            });
            if driver.score.abs() > threshold {
                *count += 1;
            }
        }
    }

    let mut records = order
        .into_iter()
        .map(|feature| {
            let count = counts.get(&feature).copied().unwrap_or(0);
            StabilityRecord { feature, count }
        })
        .collect::<Vec<_>>();
    records.sort_by(|left, right| right.count.cmp(&left.count));
    records
}

/// Pairs each interaction-enabled run with the first interaction-free run at
/// the same threshold. Pairs missing either AUC are omitted.
pub fn ablation_table(runs: &[Run], national_auc: &HashMap<String, f64>) -> Vec<AblationRow> {
    runs.iter()
        .filter(|run| run.interactions)
        .filter_map(|with| {
            let without = runs.iter().find(|candidate| {
                !candidate.interactions && candidate.threshold_label() == with.threshold_label()
            })?;
            let auc_with = *national_auc.get(&with.key)?;
            let auc_without = *national_auc.get(&without.key)?;
            let delta = auc_with - auc_without;

            Some(AblationRow {
                threshold: with.threshold_label(),
                with_interactions: with.name.clone(),
                without_interactions: without.name.clone(),
                auc_with,
                auc_without,
                delta,
                impact: Impact::from_delta(delta),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverMatrixRow {
    pub feature: String,
    pub values: Vec<Option<f64>>,
}

impl DriverMatrixRow {
    fn max_abs(&self) -> f64 {
        self.values
            .iter()
            .flatten()
            .map(|value| value.abs())
            .fold(0.0, f64::max)
    }
}

/// Feature × scope importance matrix for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverMatrix {
    pub scopes: Vec<String>,
    pub rows: Vec<DriverMatrixRow>,
}

impl DriverMatrix {
    /// Rows are display names (from `label`), ordered by the largest |score|
    /// across scopes; ties keep first-seen order.
    pub fn build<F>(per_scope: &[(String, Vec<DriverScore>)], label: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        let scopes = per_scope
            .iter()
            .map(|(scope, _)| scope.clone())
            .collect::<Vec<_>>();
        let mut rows: Vec<DriverMatrixRow> = Vec::new();
        let mut index_by_feature: HashMap<String, usize> = HashMap::new();

        for (column, (_, drivers)) in per_scope.iter().enumerate() {
            for driver in drivers {
                let feature = label(&driver.feature);
                let row_index = *index_by_feature.entry(feature.clone()).or_insert_with(|| {
                    rows.push(DriverMatrixRow {
                        feature,
                        values: vec![None; scopes.len()],
                    });
                    rows.len() - 1
                });
                rows[row_index].values[column] = Some(driver.score);
            }
        }

        rows.sort_by(|left, right| right.max_abs().total_cmp(&left.max_abs()));
        Self { scopes, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
