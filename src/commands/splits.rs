use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::{SplitsArgs, default_dataset};
use crate::config::ReportConfig;
use crate::model::{Scope, SplitManifest, SplitManifestEntry};
use crate::split::{CsvDatasetSource, DatasetSource, GridGrouper, SplitError, SplitReplicator};
use crate::util::{now_utc_string, sha256_file, sha256_ids, write_json_pretty};

pub fn run(args: SplitsArgs) -> Result<()> {
    let config = ReportConfig::load(args.common.config.as_deref())?;
    let dataset = args
        .dataset
        .clone()
        .unwrap_or_else(|| default_dataset(&args.common.base_dir));
    if !dataset.is_file() {
        bail!("dataset not found: {}", dataset.display());
    }

    let source = CsvDatasetSource::new(&dataset, config.dataset.clone());
    let manifest = build_manifest(&config, &source, &dataset)?;

    let manifest_path = args.common.output_dir().join("split_manifest.json");
    write_json_pretty(&manifest_path, &manifest)?;
    info!(
        path = %manifest_path.display(),
        scopes = manifest.scopes.len(),
        "wrote split manifest"
    );

    Ok(())
}

pub fn build_manifest<D: DatasetSource>(
    config: &ReportConfig,
    source: &D,
    dataset: &Path,
) -> Result<SplitManifest> {
    let replicator = SplitReplicator::<D, GridGrouper>::with_grid(source, config.split.clone());

    let mut scopes = Vec::with_capacity(config.scopes.len());
    for scope in &config.scopes {
        scopes.push(scope_entry(&replicator, scope)?);
    }

    Ok(SplitManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        dataset: dataset.display().to_string(),
        dataset_sha256: sha256_file(dataset)?,
        seed: config.split.seed,
        test_fraction: config.split.test_fraction,
        cell_size: config.split.cell_size,
        scopes,
    })
}

fn scope_entry<D: DatasetSource>(
    replicator: &SplitReplicator<'_, D, GridGrouper>,
    scope: &Scope,
) -> Result<SplitManifestEntry> {
    let assignment = match replicator.replicate(scope) {
        Ok(assignment) => assignment,
        Err(err) => {
            let status = match err.downcast_ref::<SplitError>() {
                Some(SplitError::TooFewGroups { .. }) => "too_few_groups",
                Some(SplitError::EmptyPartition { .. }) => "empty",
                None => "unreadable",
            };
            warn!(
                scope = %scope.name,
                error = %format!("{err:#}"),
                "split not reproducible for scope"
            );
            return Ok(SplitManifestEntry {
                scope: scope.name.clone(),
                status: status.to_string(),
                group_count: 0,
                test_count: 0,
                train_count: 0,
                test_fingerprint: None,
            });
        }
    };

    if assignment.test_ids.is_empty() {
        warn!(scope = %scope.name, "empty test partition");
        return Ok(SplitManifestEntry {
            scope: assignment.scope,
            status: "empty".to_string(),
            group_count: assignment.group_count,
            test_count: 0,
            train_count: assignment.train_ids.len(),
            test_fingerprint: None,
        });
    }

    let fingerprint = sha256_ids(&assignment.test_ids);
    info!(
        scope = %scope.name,
        test = assignment.test_ids.len(),
        train = assignment.train_ids.len(),
        fingerprint = %fingerprint,
        "split fingerprint"
    );

    Ok(SplitManifestEntry {
        status: "ok".to_string(),
        group_count: assignment.group_count,
        test_count: assignment.test_ids.len(),
        train_count: assignment.train_ids.len(),
        test_fingerprint: Some(fingerprint),
        scope: assignment.scope,
    })
}
