//! Calibration diagrams written as standalone SVG files.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;

use crate::metrics::{CalibrationBin, MetricError, calibration_curve};
use crate::render::html_escape;
use crate::util::write_text;

const WIDTH: f64 = 480.0;
const HEIGHT: f64 = 480.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_BOTTOM: f64 = 60.0;
const TICKS: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

/// Reliability curve of one (run, scope) held-out set.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationPlot {
    pub title: String,
    pub series_label: String,
    pub bins: Vec<CalibrationBin>,
}

impl CalibrationPlot {
    pub fn from_samples(
        title: impl Into<String>,
        series_label: impl Into<String>,
        y_true: &[f64],
        y_prob: &[f64],
        n_bins: usize,
    ) -> Result<Self, MetricError> {
        Ok(Self {
            title: title.into(),
            series_label: series_label.into(),
            bins: calibration_curve(y_true, y_prob, n_bins)?,
        })
    }
}

pub trait DiagramWriter {
    /// File extension of the produced diagrams, without the dot.
    fn extension(&self) -> &'static str;

    fn write_calibration(&self, plot: &CalibrationPlot, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SvgDiagramWriter;

impl DiagramWriter for SvgDiagramWriter {
    fn extension(&self) -> &'static str {
        "svg"
    }

    fn write_calibration(&self, plot: &CalibrationPlot, dest: &Path) -> Result<()> {
        write_text(dest, &render_calibration_svg(plot))
    }
}

fn plot_width() -> f64 {
    WIDTH - MARGIN_LEFT - MARGIN_RIGHT
}

fn plot_height() -> f64 {
    HEIGHT - MARGIN_TOP - MARGIN_BOTTOM
}

fn to_x(value: f64) -> f64 {
    MARGIN_LEFT + value.clamp(0.0, 1.0) * plot_width()
}

fn to_y(value: f64) -> f64 {
    MARGIN_TOP + (1.0 - value.clamp(0.0, 1.0)) * plot_height()
}

pub fn render_calibration_svg(plot: &CalibrationPlot) -> String {
    let mut out = String::with_capacity(4 * 1024);
    let bottom = MARGIN_TOP + plot_height();
    let right = MARGIN_LEFT + plot_width();

    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="Arial, sans-serif">"#
    );
    let _ = writeln!(out, r##"<rect width="100%" height="100%" fill="#fff"/>"##);
    let _ = writeln!(
        out,
        r#"<text x="{:.1}" y="30" text-anchor="middle" font-size="14" font-weight="bold">{}</text>"#,
        WIDTH / 2.0,
        html_escape(&plot.title)
    );

    for tick in TICKS {
        let x = to_x(tick);
        let y = to_y(tick);
        let _ = writeln!(
            out,
            r##"<line x1="{x:.1}" y1="{MARGIN_TOP:.1}" x2="{x:.1}" y2="{bottom:.1}" stroke="#eee"/>"##
        );
        let _ = writeln!(
            out,
            r##"<line x1="{MARGIN_LEFT:.1}" y1="{y:.1}" x2="{right:.1}" y2="{y:.1}" stroke="#eee"/>"##
        );
        let _ = writeln!(
            out,
            r#"<text x="{x:.1}" y="{:.1}" text-anchor="middle" font-size="10">{tick:.1}</text>"#,
            bottom + 16.0
        );
        let _ = writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end" font-size="10">{tick:.1}</text>"#,
            MARGIN_LEFT - 6.0,
            y + 3.0
        );
    }

    let _ = writeln!(
        out,
        r##"<rect x="{MARGIN_LEFT:.1}" y="{MARGIN_TOP:.1}" width="{:.1}" height="{:.1}" fill="none" stroke="#000"/>"##,
        plot_width(),
        plot_height()
    );
    let _ = writeln!(
        out,
        r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#888" stroke-dasharray="6,4"/>"##,
        to_x(0.0),
        to_y(0.0),
        to_x(1.0),
        to_y(1.0)
    );

    if !plot.bins.is_empty() {
        let points = plot
            .bins
            .iter()
            .map(|bin| {
                format!(
                    "{:.1},{:.1}",
                    to_x(bin.mean_predicted),
                    to_y(bin.fraction_positive)
                )
            })
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            out,
            r##"<polyline points="{points}" fill="none" stroke="#1f77b4" stroke-width="2"/>"##
        );
        for bin in &plot.bins {
            let _ = writeln!(
                out,
                r##"<circle cx="{:.1}" cy="{:.1}" r="4" fill="#1f77b4"><title>n={}</title></circle>"##,
                to_x(bin.mean_predicted),
                to_y(bin.fraction_positive),
                bin.count
            );
        }
    }

    let _ = writeln!(
        out,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="11">Probabilidade Predita Média</text>"#,
        MARGIN_LEFT + plot_width() / 2.0,
        HEIGHT - 15.0
    );
    let _ = writeln!(
        out,
        r#"<text x="18" y="{:.1}" text-anchor="middle" font-size="11" transform="rotate(-90 18 {:.1})">Fração de Positivos (FCU)</text>"#,
        MARGIN_TOP + plot_height() / 2.0,
        MARGIN_TOP + plot_height() / 2.0
    );
    let _ = writeln!(
        out,
        r##"<text x="{:.1}" y="{:.1}" font-size="10" fill="#1f77b4">{}</text>"##,
        MARGIN_LEFT + 8.0,
        MARGIN_TOP + 14.0,
        html_escape(&plot.series_label)
    );
    let _ = writeln!(out, "</svg>");
    out
}
