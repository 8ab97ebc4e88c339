//! Deterministic re-derivation of the held-out partition used at training time.
//!
//! Rows are cleaned per scope, bucketed into square grid cells, and whole
//! cells are assigned to the test side by a seeded shuffle. The grouping and
//! the RNG family must match the training step exactly; nothing here is
//! persisted, so every invocation recomputes the same assignment.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{DatasetColumns, SplitSettings};
use crate::model::{Scope, SplitAssignment};
use crate::util::parse_optional_f64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("scope {scope} has {groups} spatial group(s), too few to split")]
    TooFewGroups { scope: String, groups: usize },
    #[error("scope {scope} has an empty test partition")]
    EmptyPartition { scope: String },
}

/// A cleaned dataset row: stable ID, label and planar coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRow {
    pub id: String,
    pub label: f64,
    pub x: f64,
    pub y: f64,
}

pub type GroupKey = (i64, i64);

pub trait DatasetSource {
    fn load_clean(&self, scope: &Scope) -> Result<Vec<CleanRow>>;
}

pub trait SpatialGrouper {
    fn group_keys(&self, rows: &[CleanRow]) -> Vec<GroupKey>;
}

#[derive(Debug, Clone, Copy)]
pub struct GridGrouper {
    pub cell_size: f64,
}

impl SpatialGrouper for GridGrouper {
    fn group_keys(&self, rows: &[CleanRow]) -> Vec<GroupKey> {
        rows.iter()
            .map(|row| {
                (
                    (row.x / self.cell_size).floor() as i64,
                    (row.y / self.cell_size).floor() as i64,
                )
            })
            .collect()
    }
}

/// Cleaned dataset stored as CSV with ID, label, coordinate and scope columns.
#[derive(Debug, Clone)]
pub struct CsvDatasetSource {
    path: PathBuf,
    columns: DatasetColumns,
}

impl CsvDatasetSource {
    pub fn new(path: &Path, columns: DatasetColumns) -> Self {
        Self {
            path: path.to_path_buf(),
            columns,
        }
    }
}

impl DatasetSource for CsvDatasetSource {
    fn load_clean(&self, scope: &Scope) -> Result<Vec<CleanRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to open dataset {}", self.path.display()))?;

        let headers = reader
            .headers()
            .with_context(|| format!("failed to read header of {}", self.path.display()))?
            .clone();
        let position = |name: &str| headers.iter().position(|header| header.trim() == name);

        let (Some(id_idx), Some(label_idx), Some(x_idx), Some(y_idx)) = (
            position(&self.columns.id),
            position(&self.columns.label),
            position(&self.columns.x),
            position(&self.columns.y),
        ) else {
            bail!(
                "dataset {} must provide columns {}, {}, {}, {}",
                self.path.display(),
                self.columns.id,
                self.columns.label,
                self.columns.x,
                self.columns.y
            );
        };
        let scope_idx = position(&self.columns.scope);
        if !scope.national && scope_idx.is_none() {
            bail!(
                "dataset {} has no scope column {}",
                self.path.display(),
                self.columns.scope
            );
        }

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        let mut dropped = 0_usize;

        for record in reader.records() {
            let record = record
                .with_context(|| format!("failed to read record in {}", self.path.display()))?;

            if !scope.national {
                let in_scope = scope_idx
                    .and_then(|idx| record.get(idx))
                    .map(|value| scope.matches(value))
                    .unwrap_or(false);
                if !in_scope {
                    continue;
                }
            }

            let id = record.get(id_idx).map(str::trim).unwrap_or_default();
            let label = record.get(label_idx).and_then(parse_optional_f64);
            let x = record.get(x_idx).and_then(parse_optional_f64);
            let y = record.get(y_idx).and_then(parse_optional_f64);

            let (Some(label), Some(x), Some(y)) = (label, x, y) else {
                dropped += 1;
                continue;
            };
            if id.is_empty() || (label != 0.0 && label != 1.0) {
                dropped += 1;
                continue;
            }
            if !seen.insert(id.to_string()) {
                dropped += 1;
                continue;
            }

            rows.push(CleanRow {
                id: id.to_string(),
                label,
                x,
                y,
            });
        }

        debug!(
            scope = %scope.name,
            kept = rows.len(),
            dropped,
            "cleaned dataset rows"
        );
        Ok(rows)
    }
}

/// Marks each row as test (`true`) or train. Distinct group keys are sorted,
/// permuted by a seeded ChaCha8 RNG, and the first `ceil(fraction * groups)`
/// groups form the test side.
pub fn group_shuffle_split(
    scope: &str,
    keys: &[GroupKey],
    test_fraction: f64,
    seed: u64,
) -> Result<Vec<bool>, SplitError> {
    let groups = keys.iter().copied().collect::<BTreeSet<_>>();
    let group_count = groups.len();
    let test_count = (test_fraction * group_count as f64).ceil() as usize;

    if group_count < 2 || test_count == 0 || test_count >= group_count {
        return Err(SplitError::TooFewGroups {
            scope: scope.to_string(),
            groups: group_count,
        });
    }

    let ordered = groups.into_iter().collect::<Vec<_>>();
    let mut permutation = (0..ordered.len()).collect::<Vec<_>>();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    permutation.shuffle(&mut rng);

    let test_groups = permutation[..test_count]
        .iter()
        .map(|&index| ordered[index])
        .collect::<HashSet<_>>();

    Ok(keys.iter().map(|key| test_groups.contains(key)).collect())
}

pub struct SplitReplicator<'a, D: DatasetSource, G: SpatialGrouper> {
    source: &'a D,
    grouper: G,
    settings: SplitSettings,
}

impl<'a, D: DatasetSource> SplitReplicator<'a, D, GridGrouper> {
    pub fn with_grid(source: &'a D, settings: SplitSettings) -> Self {
        let grouper = GridGrouper {
            cell_size: settings.cell_size,
        };
        Self::new(source, grouper, settings)
    }
}

impl<'a, D: DatasetSource, G: SpatialGrouper> SplitReplicator<'a, D, G> {
    pub fn new(source: &'a D, grouper: G, settings: SplitSettings) -> Self {
        Self {
            source,
            grouper,
            settings,
        }
    }

    /// Full partition for `scope`. An empty cleaned dataset yields an empty
    /// assignment rather than an error.
    pub fn replicate(&self, scope: &Scope) -> Result<SplitAssignment> {
        let rows = self.source.load_clean(scope)?;
        if rows.is_empty() {
            return Ok(SplitAssignment {
                scope: scope.name.clone(),
                ..SplitAssignment::default()
            });
        }

        let keys = self.grouper.group_keys(&rows);
        let group_count = keys.iter().collect::<HashSet<_>>().len();
        let is_test = group_shuffle_split(
            &scope.name,
            &keys,
            self.settings.test_fraction,
            self.settings.seed,
        )?;

        let mut assignment = SplitAssignment {
            scope: scope.name.clone(),
            group_count,
            ..SplitAssignment::default()
        };
        for (row, test) in rows.into_iter().zip(is_test) {
            if test {
                assignment.test_ids.insert(row.id);
            } else {
                assignment.train_ids.insert(row.id);
            }
        }

        info!(
            scope = %scope.name,
            groups = group_count,
            test = assignment.test_ids.len(),
            train = assignment.train_ids.len(),
            "replicated split"
        );
        Ok(assignment)
    }

    pub fn replicate_test_ids(&self, scope: &Scope) -> Result<BTreeSet<String>> {
        Ok(self.replicate(scope)?.test_ids)
    }
}

/// Test IDs about to be scored; an empty test side cannot be.
pub fn scorable_test_ids(
    scope: &Scope,
    test_ids: BTreeSet<String>,
) -> Result<BTreeSet<String>, SplitError> {
    if test_ids.is_empty() {
        return Err(SplitError::EmptyPartition {
            scope: scope.name.clone(),
        });
    }
    Ok(test_ids)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use super::*;

    struct VecSource(Vec<CleanRow>);

    impl DatasetSource for VecSource {
        fn load_clean(&self, _scope: &Scope) -> Result<Vec<CleanRow>> {
            Ok(self.0.clone())
        }
    }

    fn grid_rows() -> Vec<CleanRow> {
        let mut rows = Vec::new();
        for cell_x in 0..4 {
            for cell_y in 0..3 {
                for member in 0..5 {
                    rows.push(CleanRow {
                        id: format!("{cell_x}-{cell_y}-{member}"),
                        label: f64::from(member % 2),
                        x: cell_x as f64 * 20.0 + member as f64,
                        y: cell_y as f64 * 20.0 + 1.5,
                    });
                }
            }
        }
        rows
    }

    #[test]
    fn replication_is_deterministic() {
        let source = VecSource(grid_rows());
        let replicator = SplitReplicator::with_grid(&source, SplitSettings::default());
        let scope = Scope::national("BRASIL");

        let first = replicator.replicate(&scope).unwrap();
        let second = replicator.replicate(&scope).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            replicator.replicate_test_ids(&scope).unwrap(),
            first.test_ids
        );
    }

    #[test]
    fn groups_never_straddle_the_boundary() {
        let rows = grid_rows();
        let source = VecSource(rows.clone());
        let replicator = SplitReplicator::with_grid(&source, SplitSettings::default());
        let assignment = replicator.replicate(&Scope::national("BRASIL")).unwrap();

        let keys = GridGrouper { cell_size: 20.0 }.group_keys(&rows);
        let mut side_by_group: HashMap<GroupKey, bool> = HashMap::new();
        for (row, key) in rows.iter().zip(keys) {
            let in_test = assignment.test_ids.contains(&row.id);
            let side = *side_by_group.entry(key).or_insert(in_test);
            assert_eq!(side, in_test, "group {key:?} straddles the split");
        }

        assert_eq!(assignment.group_count, 12);
        // ceil(0.25 * 12) = 3 groups of 5 rows each.
        assert_eq!(assignment.test_ids.len(), 15);
        assert_eq!(assignment.train_ids.len(), 45);
        assert!(assignment.test_ids.is_disjoint(&assignment.train_ids));
    }

    #[test]
    fn row_order_does_not_change_the_partition() {
        let rows = grid_rows();
        let mut reversed = rows.clone();
        reversed.reverse();

        let settings = SplitSettings::default();
        let forward = VecSource(rows);
        let backward = VecSource(reversed);
        let scope = Scope::national("BRASIL");

        let left = SplitReplicator::with_grid(&forward, settings.clone())
            .replicate_test_ids(&scope)
            .unwrap();
        let right = SplitReplicator::with_grid(&backward, settings)
            .replicate_test_ids(&scope)
            .unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn different_seed_changes_partition() {
        let source = VecSource(grid_rows());
        let scope = Scope::national("BRASIL");
        let base = SplitReplicator::with_grid(&source, SplitSettings::default())
            .replicate_test_ids(&scope)
            .unwrap();

        let differs = (0..16_u64).any(|seed| {
            let settings = SplitSettings {
                seed: 1000 + seed,
                ..SplitSettings::default()
            };
            SplitReplicator::with_grid(&source, settings)
                .replicate_test_ids(&scope)
                .unwrap()
                != base
        });
        assert!(differs);
    }

    #[test]
    fn empty_dataset_yields_empty_partition() {
        let source = VecSource(Vec::new());
        let replicator = SplitReplicator::with_grid(&source, SplitSettings::default());
        let scope = Scope::local("Recife");

        let assignment = replicator.replicate(&scope).unwrap();
        assert!(assignment.train_ids.is_empty());

        let ids = replicator.replicate_test_ids(&scope).unwrap();
        assert!(ids.is_empty());
        assert_eq!(
            scorable_test_ids(&scope, ids),
            Err(SplitError::EmptyPartition {
                scope: "Recife".to_string()
            })
        );
    }

    #[test]
    fn single_group_is_rejected() {
        let err = group_shuffle_split("Recife", &[(0, 0), (0, 0)], 0.25, 42).unwrap_err();
        assert_eq!(
            err,
            SplitError::TooFewGroups {
                scope: "Recife".to_string(),
                groups: 1
            }
        );
    }

    #[test]
    fn csv_source_filters_scope_and_cleans_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(
            &path,
            "ID,FCU,x,y,polo\n\
             a1,1,1.0,2.0,Porto Alegre\n\
             a2,0,3.0,4.0,Porto_Alegre\n\
             a2,1,3.0,4.0,Porto Alegre\n\
             a3,,5.0,6.0,Porto Alegre\n\
             a4,0,nan,6.0,Porto Alegre\n\
             b1,1,7.0,8.0,Recife\n\
             ,0,1.0,1.0,Recife\n",
        )
        .unwrap();

        let source = CsvDatasetSource::new(&path, DatasetColumns::default());
        let local = source.load_clean(&Scope::local("Porto Alegre")).unwrap();
        let ids = local.iter().map(|row| row.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(local[1].label, 0.0);

        let national = source.load_clean(&Scope::national("BRASIL")).unwrap();
        assert_eq!(national.len(), 3);
    }

    #[test]
    fn csv_source_requires_core_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(&path, "ID,FCU,lat\n1,0,3.0\n").unwrap();

        let source = CsvDatasetSource::new(&path, DatasetColumns::default());
        assert!(source.load_clean(&Scope::national("BRASIL")).is_err());
    }
}
