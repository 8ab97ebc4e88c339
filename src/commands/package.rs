use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::cli::{PackageArgs, default_report_path};
use crate::render::{html_escape, html_unescape};
use crate::util::{ensure_directory, write_text};

const ASSETS_DIR: &str = "assets";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PackageSummary {
    pub copied: usize,
    pub missing: Vec<String>,
    pub index: PathBuf,
}

pub fn run(args: PackageArgs) -> Result<()> {
    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| default_report_path(&args.base_dir));
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.base_dir.join("deploy_vercel"));

    let summary = package_report(&report_path, &args.base_dir, &output_dir)?;
    info!(
        index = %summary.index.display(),
        assets = summary.copied,
        missing = summary.missing.len(),
        "package created"
    );
    Ok(())
}

/// Flat asset file name for an image reference: both separator kinds become `_`.
pub fn asset_name(reference: &str) -> String {
    reference.replace(['/', '\\'], "_")
}

fn is_external(reference: &str) -> bool {
    reference.contains("://") || reference.starts_with("data:")
}

/// Resolves both sides through `fs::canonicalize` so `proj/../proj` or an
/// absolute spelling of a relative base still counts as the same directory.
fn guard_output_dir(report_path: &Path, base_dir: &Path, output_dir: &Path) -> Result<()> {
    if !output_dir.exists() {
        return Ok(());
    }
    let canonical = |path: &Path| {
        fs::canonicalize(path).with_context(|| format!("failed to resolve {}", path.display()))
    };
    let output = canonical(output_dir)?;
    let base = canonical(base_dir)?;
    let report = canonical(report_path)?;

    if base.starts_with(&output) || report.starts_with(&output) {
        bail!(
            "refusing to recreate {}: it holds the report sources",
            output_dir.display()
        );
    }
    Ok(())
}

/// Copies every `src='…'`/`src="…"` target of the report into
/// `<output>/assets/` and writes the rewritten document as `<output>/index.html`.
/// The output directory is removed and recreated first.
pub fn package_report(
    report_path: &Path,
    base_dir: &Path,
    output_dir: &Path,
) -> Result<PackageSummary> {
    if !report_path.is_file() {
        bail!("report not found: {}", report_path.display());
    }
    guard_output_dir(report_path, base_dir, output_dir)?;

    let content = fs::read_to_string(report_path)
        .with_context(|| format!("failed to read {}", report_path.display()))?;

    if output_dir.exists() {
        fs::remove_dir_all(output_dir)
            .with_context(|| format!("failed to clear {}", output_dir.display()))?;
    }
    let assets_dir = output_dir.join(ASSETS_DIR);
    ensure_directory(&assets_dir)?;

    let pattern = Regex::new(r#"src=(['"])(.*?)['"]"#).context("failed to compile src regex")?;
    let mut rewrites: HashMap<String, Option<String>> = HashMap::new();
    let mut summary = PackageSummary::default();

    for captures in pattern.captures_iter(&content) {
        let attribute = &captures[2];
        if rewrites.contains_key(attribute) {
            continue;
        }
        let reference = html_unescape(attribute);
        if is_external(&reference) {
            debug!(reference = %reference, "external reference kept");
            rewrites.insert(attribute.to_string(), None);
            continue;
        }

        let source = base_dir.join(&reference);
        if !source.is_file() {
            warn!(path = %source.display(), "image not found, reference left unchanged");
            summary.missing.push(reference);
            rewrites.insert(attribute.to_string(), None);
            continue;
        }

        let name = asset_name(&reference);
        fs::copy(&source, assets_dir.join(&name)).with_context(|| {
            format!("failed to copy {} into {}", source.display(), assets_dir.display())
        })?;
        summary.copied += 1;
        rewrites.insert(
            attribute.to_string(),
            Some(format!("{ASSETS_DIR}/{}", html_escape(&name))),
        );
    }

    let rewritten = pattern.replace_all(&content, |captures: &Captures<'_>| {
        let quote = &captures[1];
        match rewrites.get(&captures[2]) {
            Some(Some(target)) => format!("src={quote}{target}{quote}"),
            _ => captures[0].to_string(),
        }
    });

    summary.index = output_dir.join("index.html");
    write_text(&summary.index, &rewritten)?;
    info!(
        references = rewrites.len(),
        copied = summary.copied,
        "rewrote image references"
    );
    Ok(summary)
}
