use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::aggregate::{DriverMatrix, ablation_table};
use crate::artifacts::{LogPatterns, RunArtifacts};
use crate::cli::{ConsolidateArgs, default_report_path};
use crate::commands::evaluate::{
    ADVANCED_METRICS_FILE, DIAGRAM_MANIFEST_FILE, DRIVER_STABILITY_FILE,
};
use crate::config::ReportConfig;
use crate::model::{DiagramManifest, GlobalMetricRow, Run, Scope, StabilityRecord};
use crate::render::{
    CalibrationGallery, ElasticityGallery, Figure, ReportInputs, RunSection, RunSummary,
    StabilityRow, render_document,
};
use crate::util::{relative_reference, report_timestamp, write_text};

pub fn run(args: ConsolidateArgs) -> Result<()> {
    let config = ReportConfig::load(args.common.config.as_deref())?;
    let base_dir = args.common.base_dir.clone();
    let output_dir = args.common.output_dir();
    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| default_report_path(&base_dir));

    info!(
        base_dir = %base_dir.display(),
        runs = config.runs.len(),
        "consolidation started"
    );

    let inputs = collect_inputs(&config, &base_dir, &output_dir, report_timestamp())?;
    let document = render_document(&inputs, config.heatmap);
    write_text(&report_path, &document)?;

    info!(
        path = %report_path.display(),
        bytes = document.len(),
        "wrote sensitivity report"
    );
    Ok(())
}

/// Reads every artefact the report needs. Missing inputs degrade to
/// placeholders; only configuration problems fail the command.
pub fn collect_inputs(
    config: &ReportConfig,
    base_dir: &Path,
    output_dir: &Path,
    generated_at: String,
) -> Result<ReportInputs> {
    let patterns = LogPatterns::new()?;
    let national = config
        .national_scope()
        .context("configuration has no national scope")?;

    let mut summaries = Vec::with_capacity(config.runs.len());
    let mut runs = Vec::with_capacity(config.runs.len());
    let mut national_auc = HashMap::new();

    for run in &config.runs {
        let artifacts = RunArtifacts::new(run.dir(base_dir), &patterns);

        let reported = degrade(
            run,
            national,
            "reported metrics",
            artifacts.reported_metrics(national),
        );
        if reported.is_none() {
            warn!(run = %run.name, dir = %artifacts.dir().display(), "reported metrics missing");
        }
        if let Some(metrics) = reported {
            national_auc.insert(run.key.clone(), metrics.auc);
        }
        summaries.push(RunSummary {
            name: run.name.clone(),
            feature_count: degrade(
                run,
                national,
                "feature count",
                artifacts.feature_count(national),
            ),
            reported,
        });

        let per_scope = config
            .scopes
            .iter()
            .map(|scope| {
                let drivers = match artifacts.drivers(scope) {
                    Ok(drivers) => drivers,
                    Err(err) => {
                        warn!(
                            run = %run.name,
                            scope = %scope.name,
                            error = %format!("{err:#}"),
                            "driver report unreadable"
                        );
                        Vec::new()
                    }
                };
                (scope.name.clone(), drivers)
            })
            .collect::<Vec<_>>();

        let distribution = match artifacts.distribution_table() {
            Ok(table) => table,
            Err(err) => {
                warn!(
                    run = %run.name,
                    error = %format!("{err:#}"),
                    "distribution table unreadable"
                );
                None
            }
        };

        runs.push(RunSection {
            name: run.name.clone(),
            label: run.label().to_string(),
            distribution,
            drivers: DriverMatrix::build(&per_scope, |feature| config.pretty_name(feature)),
        });
    }

    let stability = read_csv_rows::<StabilityRecord>(&output_dir.join(DRIVER_STABILITY_FILE))
        .map(|records| {
            records
                .into_iter()
                .take(config.stability_rows)
                .map(|record| StabilityRow {
                    feature: config.pretty_name(&record.feature),
                    interpretation: config.interpretation_for(&record.feature).to_string(),
                    count: record.count,
                })
                .collect()
        });

    Ok(ReportInputs {
        generated_at,
        summaries,
        runs,
        elasticity: elasticity_gallery(config, base_dir, &patterns),
        advanced_metrics: read_csv_rows::<GlobalMetricRow>(&output_dir.join(ADVANCED_METRICS_FILE)),
        calibration: calibration_galleries(
            config,
            base_dir,
            &output_dir.join(DIAGRAM_MANIFEST_FILE),
        ),
        stability,
        ablation: ablation_table(&config.runs, &national_auc),
        glossary: config
            .feature_labels
            .iter()
            .map(|(name, label)| (name.clone(), label.clone()))
            .collect(),
    })
}

fn degrade<T>(run: &Run, scope: &Scope, what: &str, result: Result<Option<T>>) -> Option<T> {
    result.unwrap_or_else(|err| {
        warn!(
            run = %run.name,
            scope = %scope.name,
            error = %format!("{err:#}"),
            "{what} unreadable"
        );
        None
    })
}

/// Rows of an `evaluate` output table; `None` when the file is absent or broken.
fn read_csv_rows<T: DeserializeOwned>(path: &Path) -> Option<Vec<T>> {
    if !path.is_file() {
        warn!(path = %path.display(), "evaluation table missing; run `evaluate` first");
        return None;
    }

    let parsed = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))
        .and_then(|mut reader| {
            reader
                .deserialize::<T>()
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("failed to parse {}", path.display()))
        });

    match parsed {
        Ok(rows) => Some(rows),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %format!("{err:#}"),
                "evaluation table unreadable"
            );
            None
        }
    }
}

fn elasticity_gallery(
    config: &ReportConfig,
    base_dir: &Path,
    patterns: &LogPatterns,
) -> Option<ElasticityGallery> {
    let key = config.elasticity_run.as_deref()?;
    let Some(run) = config.run_by_key(key) else {
        warn!(run_key = %key, "elasticity run is not registered");
        return None;
    };

    let artifacts = RunArtifacts::new(run.dir(base_dir), patterns);
    let images = match artifacts.elasticity_images(&config.scopes) {
        Ok(images) => images,
        Err(err) => {
            warn!(run = %run.name, error = %format!("{err:#}"), "elasticity images unreadable");
            return None;
        }
    };

    let mut by_scope: BTreeMap<String, Vec<Figure>> = BTreeMap::new();
    for image in images {
        by_scope.entry(image.scope).or_default().push(Figure {
            caption: config.pretty_name(&image.feature),
            src: relative_reference(&image.path, base_dir),
        });
    }

    // National scope first, the rest alphabetically.
    let mut scopes = Vec::with_capacity(by_scope.len());
    if let Some(national) = config.national_scope() {
        if let Some(figures) = by_scope.remove(&national.name) {
            scopes.push((national.name.clone(), figures));
        }
    }
    scopes.extend(by_scope);

    debug!(run = %run.name, scopes = scopes.len(), "collected elasticity images");
    Some(ElasticityGallery {
        run_name: run.name.clone(),
        scopes,
    })
}

/// Calibration figures grouped by run in registry order, taken from the
/// manifest written by `evaluate`.
fn calibration_galleries(
    config: &ReportConfig,
    base_dir: &Path,
    manifest_path: &Path,
) -> Vec<CalibrationGallery> {
    let manifest = match fs::read(manifest_path) {
        Ok(raw) => match serde_json::from_slice::<DiagramManifest>(&raw) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(path = %manifest_path.display(), error = %err, "malformed diagram manifest");
                return Vec::new();
            }
        },
        Err(err) => {
            warn!(path = %manifest_path.display(), error = %err, "diagram manifest unavailable");
            return Vec::new();
        }
    };

    for entry in &manifest.entries {
        if config.run_by_key(&entry.run_key).is_none() {
            warn!(
                run_key = %entry.run_key,
                path = %entry.path,
                "diagram for unregistered run ignored"
            );
        }
    }

    config
        .runs
        .iter()
        .filter_map(|run| {
            let figures = manifest
                .entries
                .iter()
                .filter(|entry| entry.run_key == run.key)
                .filter(|entry| {
                    let exists = base_dir.join(&entry.path).is_file();
                    if !exists {
                        warn!(
                            run = %run.name,
                            path = %entry.path,
                            "calibration diagram missing on disk"
                        );
                    }
                    exists
                })
                .map(|entry| Figure {
                    caption: entry.scope.clone(),
                    src: entry.path.clone(),
                })
                .collect::<Vec<_>>();

            if figures.is_empty() {
                return None;
            }
            Some(CalibrationGallery {
                run_name: run.name.clone(),
                run_label: run.label().to_string(),
                figures,
            })
        })
        .collect()
}
