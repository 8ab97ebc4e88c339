use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::aggregate::{RunEvaluation, ScopeEvaluation, driver_stability, global_metric_table};
use crate::artifacts::{LogPatterns, RunArtifacts};
use crate::cli::{EvaluateArgs, default_dataset};
use crate::config::ReportConfig;
use crate::diagram::{CalibrationPlot, DiagramWriter, SvgDiagramWriter};
use crate::metrics::{MetricError, auprc, brier_score, precision_at_k, recall_at_k, roc_auc};
use crate::model::{
    DiagramEntry, DiagramManifest, DriverScore, MetricSet, Run, Scope, ScoredSample,
    StabilityRecord,
};
use crate::split::{CsvDatasetSource, DatasetSource, SplitReplicator, scorable_test_ids};
use crate::util::{ensure_directory, now_utc_string, relative_reference, write_json_pretty};

pub const ADVANCED_METRICS_FILE: &str = "advanced_metrics.csv";
pub const DRIVER_STABILITY_FILE: &str = "driver_stability.csv";
pub const DIAGRAM_MANIFEST_FILE: &str = "diagram_manifest.json";

/// Everything one `evaluate` pass produces before it is written out.
#[derive(Debug, Default)]
pub struct EvaluationOutput {
    pub evaluations: Vec<RunEvaluation>,
    pub diagrams: Vec<DiagramEntry>,
    pub stability: Vec<StabilityRecord>,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    let config = ReportConfig::load(args.common.config.as_deref())?;
    let base_dir = args.common.base_dir.clone();
    let output_dir = args.common.output_dir();
    let dataset = args
        .dataset
        .clone()
        .unwrap_or_else(|| default_dataset(&base_dir));
    if !dataset.is_file() {
        bail!("dataset not found: {}", dataset.display());
    }

    let runs = select_runs(&config, &args.runs)?;
    info!(
        runs = runs.len(),
        dataset = %dataset.display(),
        output_dir = %output_dir.display(),
        "evaluation started"
    );

    let source = CsvDatasetSource::new(&dataset, config.dataset.clone());
    let test_ids = replicate_test_ids(&config, &source)?;

    ensure_directory(&output_dir)?;
    let output = evaluate_runs(
        &config,
        &runs,
        &test_ids,
        &base_dir,
        &output_dir,
        &SvgDiagramWriter,
    )?;

    write_outputs(&output, &output_dir)?;
    info!(
        runs = output.evaluations.len(),
        diagrams = output.diagrams.len(),
        "evaluation completed"
    );
    Ok(())
}

fn select_runs<'a>(config: &'a ReportConfig, keys: &[String]) -> Result<Vec<&'a Run>> {
    if keys.is_empty() {
        return Ok(config.runs.iter().filter(|run| run.evaluate).collect());
    }

    keys.iter()
        .map(|key| {
            config
                .run_by_key(key)
                .with_context(|| format!("unknown run key: {key}"))
        })
        .collect()
}

/// Test IDs per scope name. Any scope whose split cannot be reproduced, for
/// a split error or an unreadable dataset, is logged and left out; the runs
/// are then not scored on it.
pub fn replicate_test_ids<D: DatasetSource>(
    config: &ReportConfig,
    source: &D,
) -> Result<HashMap<String, BTreeSet<String>>> {
    let replicator = SplitReplicator::with_grid(source, config.split.clone());
    let mut test_ids = HashMap::new();

    for scope in &config.scopes {
        let result = replicator
            .replicate_test_ids(scope)
            .and_then(|ids| Ok(scorable_test_ids(scope, ids)?));
        match result {
            Ok(ids) => {
                test_ids.insert(scope.name.clone(), ids);
            }
            Err(err) => {
                warn!(
                    scope = %scope.name,
                    error = %format!("{err:#}"),
                    "scope left out of evaluation"
                );
            }
        }
    }

    Ok(test_ids)
}

pub fn evaluate_runs<W: DiagramWriter>(
    config: &ReportConfig,
    runs: &[&Run],
    test_ids: &HashMap<String, BTreeSet<String>>,
    base_dir: &Path,
    output_dir: &Path,
    writer: &W,
) -> Result<EvaluationOutput> {
    let patterns = LogPatterns::new()?;
    let sink = DiagramSink {
        writer,
        base_dir,
        output_dir,
        bins: config.calibration_bins,
    };
    let mut output = EvaluationOutput::default();
    let mut driver_tables: Vec<Vec<DriverScore>> = Vec::new();

    for run in runs {
        let artifacts = RunArtifacts::new(run.dir(base_dir), &patterns);

        // Stability covers every selected run, scored or not.
        for scope in &config.scopes {
            match artifacts.drivers(scope) {
                Ok(drivers) => driver_tables.push(drivers),
                Err(err) => warn!(
                    run = %run.name,
                    scope = %scope.name,
                    error = %format!("{err:#}"),
                    "driver report unreadable"
                ),
            }
        }

        let table = match artifacts.master_table() {
            Ok(Some(table)) => table,
            Ok(None) => {
                warn!(
                    run = %run.name,
                    dir = %artifacts.dir().display(),
                    "master table missing, run skipped"
                );
                continue;
            }
            Err(err) => {
                warn!(
                    run = %run.name,
                    error = %format!("{err:#}"),
                    "master table unreadable, run skipped"
                );
                continue;
            }
        };
        info!(run = %run.name, rows = table.records.len(), "evaluating run");

        let mut scopes = Vec::with_capacity(config.scopes.len());
        for scope in &config.scopes {
            let samples = test_ids.get(&scope.name).and_then(|ids| {
                let column = scope.column_for();
                let Some(samples) = table.held_out_samples(ids, &column) else {
                    warn!(
                        run = %run.name,
                        scope = %scope.name,
                        column = %column,
                        "probability column missing"
                    );
                    return None;
                };
                if samples.is_empty() {
                    warn!(run = %run.name, scope = %scope.name, "no labelled held-out rows");
                    return None;
                }
                Some(samples)
            });

            let metrics = match samples {
                Some(samples) => {
                    if config.wants_calibration_diagram(scope) {
                        match sink.write(run, scope, &samples) {
                            Ok(Some(entry)) => output.diagrams.push(entry),
                            Ok(None) => {}
                            Err(err) => warn!(
                                run = %run.name,
                                scope = %scope.name,
                                error = %format!("{err:#}"),
                                "calibration diagram not written"
                            ),
                        }
                    }
                    Some(score_samples(&run.name, &scope.name, &samples))
                }
                None => None,
            };

            let evaluation = ScopeEvaluation {
                scope: scope.name.clone(),
                national: scope.national,
                metrics,
            };
            if let Some(metrics) = &evaluation.metrics {
                info!(
                    run = %run.name,
                    scope = %evaluation.scope,
                    auc = ?metrics.auc,
                    auprc = ?metrics.auprc,
                    recall_at_1 = ?metrics.recall_at_1,
                    "scope scored"
                );
            }
            scopes.push(evaluation);
        }

        output.evaluations.push(RunEvaluation {
            run_name: run.name.clone(),
            scopes,
        });
    }

    output.stability = driver_stability(
        driver_tables.iter().map(Vec::as_slice),
        config.stability_threshold,
    );
    Ok(output)
}

fn score_samples(run: &str, scope: &str, samples: &[ScoredSample]) -> MetricSet {
    let labels = samples.iter().map(|sample| sample.label).collect::<Vec<_>>();
    let probs = samples.iter().map(|sample| sample.prob).collect::<Vec<_>>();

    let defined = |metric: &str, result: Result<f64, MetricError>| match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(run = %run, scope = %scope, metric, error = %err, "metric undefined");
            None
        }
    };

    MetricSet {
        auc: defined("auc", roc_auc(&labels, &probs)),
        brier: defined("brier", brier_score(&labels, &probs)),
        auprc: defined("auprc", auprc(&labels, &probs)),
        recall_at_1: defined("recall@1%", recall_at_k(&labels, &probs, 1.0)),
        recall_at_5: defined("recall@5%", recall_at_k(&labels, &probs, 5.0)),
        precision_at_1: defined("precision@1%", precision_at_k(&labels, &probs, 1.0)),
    }
}

/// Writes calibration diagrams and records where they landed, relative to
/// the report base directory.
struct DiagramSink<'a, W: DiagramWriter> {
    writer: &'a W,
    base_dir: &'a Path,
    output_dir: &'a Path,
    bins: usize,
}

impl<W: DiagramWriter> DiagramSink<'_, W> {
    fn write(
        &self,
        run: &Run,
        scope: &Scope,
        samples: &[ScoredSample],
    ) -> Result<Option<DiagramEntry>> {
        let labels = samples.iter().map(|sample| sample.label).collect::<Vec<_>>();
        let probs = samples.iter().map(|sample| sample.prob).collect::<Vec<_>>();

        let plot = match CalibrationPlot::from_samples(
            format!("Curva de Calibração - {}", scope.name),
            run.name.clone(),
            &labels,
            &probs,
            self.bins,
        ) {
            Ok(plot) => plot,
            Err(err) => {
                warn!(
                    run = %run.name,
                    scope = %scope.name,
                    error = %err,
                    "calibration curve undefined"
                );
                return Ok(None);
            }
        };

        let path = self.output_dir.join(format!(
            "calib_{}_{}.{}",
            run.key,
            scope.file_token(),
            self.writer.extension()
        ));
        self.writer.write_calibration(&plot, &path)?;

        Ok(Some(DiagramEntry {
            run_key: run.key.clone(),
            scope: scope.name.clone(),
            path: relative_reference(&path, self.base_dir),
        }))
    }
}

pub fn write_outputs(output: &EvaluationOutput, output_dir: &Path) -> Result<()> {
    let metrics_path = output_dir.join(ADVANCED_METRICS_FILE);
    let mut writer = csv::Writer::from_path(&metrics_path)
        .with_context(|| format!("failed to create {}", metrics_path.display()))?;
    for row in global_metric_table(&output.evaluations) {
        writer
            .serialize(&row)
            .with_context(|| format!("failed to write {}", metrics_path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", metrics_path.display()))?;
    info!(path = %metrics_path.display(), "wrote advanced metrics");

    let stability_path = output_dir.join(DRIVER_STABILITY_FILE);
    let mut writer = csv::Writer::from_path(&stability_path)
        .with_context(|| format!("failed to create {}", stability_path.display()))?;
    for record in &output.stability {
        writer
            .serialize(record)
            .with_context(|| format!("failed to write {}", stability_path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", stability_path.display()))?;
    info!(
        path = %stability_path.display(),
        drivers = output.stability.len(),
        "wrote driver stability"
    );

    let manifest = DiagramManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        entries: output.diagrams.clone(),
    };
    let manifest_path = output_dir.join(DIAGRAM_MANIFEST_FILE);
    write_json_pretty(&manifest_path, &manifest)?;
    info!(
        path = %manifest_path.display(),
        entries = manifest.entries.len(),
        "wrote diagram manifest"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::model::GlobalMetricRow;

    fn config() -> ReportConfig {
        ReportConfig {
            scopes: vec![
                Scope::national("BRASIL"),
                Scope::local("Recife"),
                Scope::local("Marabá"),
            ],
            calibration_bins: 2,
            ..ReportConfig::default()
        }
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn write_run(base: &Path, folder: &str) {
        let output = base.join(folder).join("output_final");
        fs::create_dir_all(&output).unwrap();
        fs::write(
            output.join("output_final_master.csv"),
            "ID,FCU,prob_fcu_BRASIL,prob_fcu_Recife\n\
             1,1,0.9,0.7\n\
             2,0,0.1,0.2\n\
             3,1,0.8,0.6\n\
             4,0,0.4,0.1\n\
             5,1,0.2,\n\
             6,0,0.3,0.3\n",
        )
        .unwrap();

        let reports = base.join(folder).join("relatorios");
        fs::create_dir_all(&reports).unwrap();
        fs::write(
            reports.join("relatorio_analise_BRASIL.txt"),
            "Fatores de Influência (EBM)\nfeature_pretty score\n-----\nfisico_declividade_media 0.5\nV0005 0.1\n-----\n",
        )
        .unwrap();
        fs::write(
            reports.join("relatorio_analise_Recife.txt"),
            "Fatores de Influência (EBM)\nfeature_pretty score\n-----\nfisico_declividade_media -0.3\n-----\n",
        )
        .unwrap();
    }

    #[test]
    fn evaluates_held_out_rows_and_records_diagrams() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        let output_dir = base.join("comparativo_avancado");
        let config = config();
        write_run(base, "log_v3_60_noint");

        let run = config.run_by_key("run8").unwrap();
        let test_ids = HashMap::from([
            ("BRASIL".to_string(), ids(&["1", "2", "3", "4", "5"])),
            ("Recife".to_string(), ids(&["1", "2", "5", "6"])),
            ("Marabá".to_string(), ids(&["1"])),
        ]);

        let output = evaluate_runs(
            &config,
            &[run],
            &test_ids,
            base,
            &output_dir,
            &SvgDiagramWriter,
        )
        .unwrap();

        assert_eq!(output.evaluations.len(), 1);
        let evaluation = &output.evaluations[0];
        let national = evaluation.national().unwrap();
        // Labels 1,0,1,0,1 with probabilities 0.9,0.1,0.8,0.4,0.2.
        assert!((national.auprc.unwrap() - 65.0 / 72.0).abs() < 1e-9);
        assert_eq!(national.recall_at_1, Some(0.0));

        // Recife drops row 5 (blank probability), Marabá has no column.
        assert!(evaluation.scopes[1].metrics.is_some());
        assert!(evaluation.scopes[2].metrics.is_none());

        let scopes = output
            .diagrams
            .iter()
            .map(|entry| entry.scope.as_str())
            .collect::<Vec<_>>();
        assert_eq!(scopes, vec!["BRASIL", "Recife"]);
        assert_eq!(
            output.diagrams[0].path,
            "comparativo_avancado/calib_run8_BRASIL.svg"
        );
        assert!(output_dir.join("calib_run8_Recife.svg").is_file());

        assert_eq!(
            output.stability,
            vec![
                StabilityRecord {
                    feature: "fisico_declividade_media".to_string(),
                    count: 2
                },
                StabilityRecord {
                    feature: "V0005".to_string(),
                    count: 0
                },
            ]
        );
    }

    #[test]
    fn missing_master_table_skips_scoring_but_not_stability() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let run = config.run_by_key("run6").unwrap();
        let reports = dir.path().join(&run.folder).join("relatorios");
        fs::create_dir_all(&reports).unwrap();
        fs::write(
            reports.join("relatorio_analise_BRASIL.txt"),
            "Fatores de Influência (EBM)\nfeature_pretty score\n-----\nV0005 0.9\n",
        )
        .unwrap();

        let output = evaluate_runs(
            &config,
            &[run],
            &HashMap::new(),
            dir.path(),
            &dir.path().join("out"),
            &SvgDiagramWriter,
        )
        .unwrap();
        assert!(output.evaluations.is_empty());
        assert!(output.diagrams.is_empty());
        assert_eq!(
            output.stability,
            vec![StabilityRecord {
                feature: "V0005".to_string(),
                count: 1
            }]
        );
    }

    #[test]
    fn outputs_round_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let output = EvaluationOutput {
            evaluations: vec![RunEvaluation {
                run_name: "Run 8 (0.60, NoInt)".to_string(),
                scopes: vec![ScopeEvaluation {
                    scope: "BRASIL".to_string(),
                    national: true,
                    metrics: Some(MetricSet {
                        auc: Some(0.8),
                        auprc: Some(0.3),
                        ..MetricSet::default()
                    }),
                }],
            }],
            diagrams: Vec::new(),
            stability: vec![StabilityRecord {
                feature: "V0005".to_string(),
                count: 3,
            }],
        };

        write_outputs(&output, dir.path()).unwrap();

        let mut reader = csv::Reader::from_path(dir.path().join(ADVANCED_METRICS_FILE)).unwrap();
        let rows = reader
            .deserialize::<GlobalMetricRow>()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].auc, Some(0.8));
        assert_eq!(rows[0].brier, None);
        assert_eq!(rows[0].auprc_local_mean, None);

        let stability = fs::read_to_string(dir.path().join(DRIVER_STABILITY_FILE)).unwrap();
        assert_eq!(stability, "Driver,Frequency\nV0005,3\n");
        assert!(dir.path().join(DIAGRAM_MANIFEST_FILE).is_file());
    }

    #[test]
    fn scopes_without_test_rows_are_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("dataset.csv");
        let mut content = String::from("ID,FCU,x,y,polo\n");
        for index in 0..8 {
            content.push_str(&format!("{index},{},{},0,Recife\n", index % 2, index * 25));
        }
        fs::write(&dataset, content).unwrap();

        let config = config();
        let source = CsvDatasetSource::new(&dataset, config.dataset.clone());
        let test_ids = replicate_test_ids(&config, &source).unwrap();

        assert_eq!(test_ids["BRASIL"].len(), 2);
        assert_eq!(test_ids["BRASIL"], test_ids["Recife"]);
        assert!(!test_ids.contains_key("Marabá"));
    }

    #[test]
    fn dataset_without_scope_column_still_scores_national() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("dataset.csv");
        let mut content = String::from("ID,FCU,x,y\n");
        for index in 0..8 {
            content.push_str(&format!("{index},{},{},0\n", index % 2, index * 25));
        }
        fs::write(&dataset, content).unwrap();

        let config = config();
        let source = CsvDatasetSource::new(&dataset, config.dataset.clone());
        let test_ids = replicate_test_ids(&config, &source).unwrap();

        assert_eq!(test_ids["BRASIL"].len(), 2);
        assert!(!test_ids.contains_key("Recife"));
    }

    #[test]
    fn explicit_run_selection_rejects_unknown_keys() {
        let config = config();
        let selected = select_runs(&config, &["run2".to_string()]).unwrap();
        assert_eq!(selected[0].key, "run2");
        assert!(select_runs(&config, &["run42".to_string()]).is_err());

        let defaults = select_runs(&config, &[]).unwrap();
        let keys = defaults.iter().map(|run| run.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["run1", "run6", "run7", "run8"]);
    }
}
