//! Tabbed HTML comparison report.
//!
//! Rendering is a pure function of [`ReportInputs`]; all file access happens
//! in the `consolidate` command before this module is called.

use std::fmt::Write as _;

use crate::aggregate::DriverMatrix;
use crate::artifacts::CsvTable;
use crate::config::HeatmapSettings;
use crate::model::{AblationRow, GlobalMetricRow, ReportedMetrics};
use crate::util::format_optional;

const SOURCE_NOTE: &str = "<div class='source'>Fonte: Elaboração própria.</div>";

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub name: String,
    pub feature_count: Option<usize>,
    pub reported: Option<ReportedMetrics>,
}

/// Per-run material shown in the distribution and driver tabs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSection {
    pub name: String,
    pub label: String,
    pub distribution: Option<CsvTable>,
    pub drivers: DriverMatrix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub caption: String,
    pub src: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationGallery {
    pub run_name: String,
    pub run_label: String,
    pub figures: Vec<Figure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElasticityGallery {
    pub run_name: String,
    pub scopes: Vec<(String, Vec<Figure>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilityRow {
    pub feature: String,
    pub count: usize,
    pub interpretation: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportInputs {
    pub generated_at: String,
    pub summaries: Vec<RunSummary>,
    pub runs: Vec<RunSection>,
    pub elasticity: Option<ElasticityGallery>,
    pub advanced_metrics: Option<Vec<GlobalMetricRow>>,
    pub calibration: Vec<CalibrationGallery>,
    pub stability: Option<Vec<StabilityRow>>,
    pub ablation: Vec<AblationRow>,
    pub glossary: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeatColor {
    pub background: String,
    pub text: &'static str,
}

/// White-to-red ramp over `|value| / ceiling`, clamped to 1. Text switches
/// to white once the normalized magnitude exceeds the contrast threshold.
pub fn heat_color(value: f64, settings: HeatmapSettings) -> HeatColor {
    let norm = (value.abs() / settings.ceiling).min(1.0);
    let green = (255.0 * (1.0 - norm)) as u8;
    let blue = (200.0 * (1.0 - norm)) as u8;
    HeatColor {
        background: format!("rgb(255, {green}, {blue})"),
        text: if norm > settings.contrast_threshold {
            "#fff"
        } else {
            "#000"
        },
    }
}

pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Reverses [`html_escape`]; `&amp;` goes last so `&amp;lt;` reads back as `&lt;`.
pub fn html_unescape(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub fn render_document(inputs: &ReportInputs, heatmap: HeatmapSettings) -> String {
    let mut out = String::with_capacity(64 * 1024);

    render_head(&mut out);
    let _ = writeln!(
        out,
        "<h1>Relatório Final de Análise de Sensibilidade<br>Preditor FCU v3</h1>"
    );
    let _ = writeln!(
        out,
        "<p style=\"text-align: center;\">Data de Geração: {}</p>",
        html_escape(&inputs.generated_at)
    );
    let _ = writeln!(
        out,
        "<p>Este relatório consolida os resultados de {} rodadas de treinamento (Runs) do modelo Preditor FCU v3.</p>",
        inputs.summaries.len()
    );

    render_summary(&mut out, &inputs.summaries);
    render_distributions(&mut out, &inputs.runs);
    render_driver_matrices(&mut out, &inputs.runs, heatmap);
    render_elasticity(&mut out, inputs.elasticity.as_ref());

    let _ = writeln!(out, "<h2>4. Análises Avançadas e Robustez</h2>");
    render_advanced_metrics(&mut out, inputs.advanced_metrics.as_deref());
    render_calibration(&mut out, &inputs.calibration);
    render_stability(&mut out, inputs.stability.as_deref());
    render_ablation(&mut out, &inputs.ablation);
    render_glossary(&mut out, &inputs.glossary);

    let _ = writeln!(
        out,
        "<div class='footer'>Relatório gerado automaticamente pelo sistema Preditor FCU v3.</div>"
    );
    let _ = writeln!(out, "</body></html>");
    out
}

fn render_head(out: &mut String) {
    let _ = writeln!(
        out,
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
<meta charset="UTF-8">
<title>Relatório Final: Preditor FCU v3</title>
<style>
body {{ font-family: 'Arial', sans-serif; line-height: 1.5; color: #000; max-width: 210mm; margin: 0 auto; padding: 20px; background-color: #fff; }}
h1 {{ text-align: center; font-size: 16pt; font-weight: bold; margin-bottom: 40px; margin-top: 0; text-transform: uppercase; }}
h2 {{ font-size: 14pt; font-weight: bold; margin-top: 30px; border-bottom: 1px solid #ccc; padding-bottom: 5px; }}
h3 {{ font-size: 12pt; font-weight: bold; margin-top: 20px; }}
p {{ text-align: justify; font-size: 11pt; margin-bottom: 10px; }}
table {{ width: 100%; border-collapse: collapse; margin-bottom: 10px; font-size: 9pt; }}
caption {{ caption-side: top; text-align: center; font-weight: bold; margin-bottom: 5px; font-size: 10pt; }}
th {{ border-top: 1px solid #000; border-bottom: 1px solid #000; padding: 4px; text-align: center; font-weight: bold; line-height: 1.1; }}
td {{ padding: 2px 4px; text-align: center; border: none; line-height: 1.2; }}
tr:last-child td {{ border-bottom: 1px solid #000; }}
.heatmap-cell {{ font-weight: bold; border: 1px solid #fff; }}
.source {{ font-size: 8pt; text-align: left; margin-bottom: 20px; }}
.footer {{ text-align: center; font-size: 9pt; margin-top: 50px; color: #666; }}
.figure {{ width: 30%; display: inline-block; margin: 1%; }}
.tab {{ overflow: hidden; border: 1px solid #ccc; background-color: #f1f1f1; margin-bottom: 10px; }}
.tab button {{ background-color: inherit; float: left; border: none; outline: none; cursor: pointer; padding: 10px 16px; font-size: 10pt; font-weight: bold; }}
.tab button:hover {{ background-color: #ddd; }}
.tab button.active {{ background-color: #ccc; }}
.tabcontent {{ display: none; padding: 6px 12px; border: 1px solid #ccc; border-top: none; }}
</style>
<script>
function openTab(evt, tabId, contentClass, btnClass) {{
  var i, contents, buttons;
  contents = document.getElementsByClassName(contentClass);
  for (i = 0; i < contents.length; i++) {{ contents[i].style.display = "none"; }}
  buttons = document.getElementsByClassName(btnClass);
  for (i = 0; i < buttons.length; i++) {{ buttons[i].className = buttons[i].className.replace(" active", ""); }}
  document.getElementById(tabId).style.display = "block";
  evt.currentTarget.className += " active";
}}
window.onload = function() {{
  ["dist", "drivers", "elast", "calib"].forEach(function(group) {{
    var buttons = document.getElementsByClassName("tablinks-" + group);
    if (buttons.length > 0) {{ buttons[0].click(); }}
  }});
}};
</script>
</head>
<body>"#
    );
}

fn render_tab_bar(out: &mut String, group: &str, tabs: &[(String, String)]) {
    let _ = writeln!(out, "<div class='tab'>");
    for (id, label) in tabs {
        let _ = writeln!(
            out,
            "<button class='tablinks-{group}' onclick=\"openTab(event, '{id}', 'content-{group}', 'tablinks-{group}')\">{}</button>",
            html_escape(label)
        );
    }
    let _ = writeln!(out, "</div>");
}

fn open_tab_content(out: &mut String, group: &str, id: &str) {
    let _ = writeln!(out, "<div id='{id}' class='content-{group} tabcontent'>");
}

fn render_summary(out: &mut String, summaries: &[RunSummary]) {
    let _ = writeln!(out, "<h2>1. Resumo de Métricas (Escopo: BRASIL)</h2>");
    let _ = writeln!(
        out,
        "<table><caption>Tabela 1. Desempenho Global dos Modelos</caption>"
    );
    let _ = writeln!(
        out,
        "<tr><th>Run</th><th>Variáveis Selecionadas</th><th>AUC (ROC)</th><th>Brier Score</th></tr>"
    );
    for summary in summaries {
        let name = html_escape(&summary.name);
        match summary.reported {
            Some(reported) => {
                let count = summary
                    .feature_count
                    .map(|count| count.to_string())
                    .unwrap_or_else(|| "–".to_string());
                let _ = writeln!(
                    out,
                    "<tr><td style='text-align:left'>{name}</td><td>{count}</td><td>{:.4}</td><td>{}</td></tr>",
                    reported.auc,
                    format_optional(reported.brier, 4)
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "<tr><td style='text-align:left'>{name}</td><td>–</td><td>–</td><td>–</td></tr>"
                );
            }
        }
    }
    let _ = writeln!(out, "</table>");
    let _ = writeln!(out, "{SOURCE_NOTE}");
}

fn run_tabs(runs: &[RunSection], prefix: &str) -> Vec<(String, String)> {
    runs.iter()
        .enumerate()
        .map(|(index, run)| (format!("{prefix}{}", index + 1), run.label.clone()))
        .collect()
}

fn render_csv_table(out: &mut String, caption: &str, table: &CsvTable) {
    let _ = writeln!(out, "<table><caption>{}</caption>", html_escape(caption));
    let _ = write!(out, "<thead><tr>");
    for header in &table.headers {
        let _ = write!(out, "<th style=\"text-align:center\">{}</th>", html_escape(header));
    }
    let _ = writeln!(out, "</tr></thead>");
    let _ = writeln!(out, "<tbody>");
    for row in &table.rows {
        let _ = write!(out, "<tr>");
        for cell in row {
            let _ = write!(out, "<td>{}</td>", html_escape(cell));
        }
        let _ = writeln!(out, "</tr>");
    }
    let _ = writeln!(out, "</tbody></table>");
}

fn render_distributions(out: &mut String, runs: &[RunSection]) {
    let _ = writeln!(
        out,
        "<h2>2. Distribuição de Probabilidades (Local vs Global)</h2>"
    );
    let tabs = run_tabs(runs, "DistRun");
    render_tab_bar(out, "dist", &tabs);

    for (index, (run, (id, _))) in runs.iter().zip(&tabs).enumerate() {
        open_tab_content(out, "dist", id);
        let _ = writeln!(out, "<h3>{}</h3>", html_escape(&run.name));
        match &run.distribution {
            Some(table) => {
                let caption = format!("Tabela 2.{}. Distribuição - {}", index + 1, run.name);
                render_csv_table(out, &caption, table);
                let _ = writeln!(out, "{SOURCE_NOTE}");
            }
            None => {
                let _ = writeln!(out, "<p>Dados de distribuição não disponíveis.</p>");
            }
        }
        let _ = writeln!(out, "</div>");
    }
}

fn render_driver_matrices(out: &mut String, runs: &[RunSection], heatmap: HeatmapSettings) {
    let _ = writeln!(out, "<h2>3. Matriz de Drivers de Risco (Completa)</h2>");
    let tabs = run_tabs(runs, "DriverRun");
    render_tab_bar(out, "drivers", &tabs);

    for (index, (run, (id, _))) in runs.iter().zip(&tabs).enumerate() {
        open_tab_content(out, "drivers", id);
        let _ = writeln!(out, "<h3>{}</h3>", html_escape(&run.name));
        if run.drivers.is_empty() {
            let _ = writeln!(out, "<p>Dados não disponíveis para este Run.</p>");
            let _ = writeln!(out, "</div>");
            continue;
        }

        let _ = writeln!(
            out,
            "<table><caption>Tabela 3.{}. Matriz de Importância - {}</caption>",
            index + 1,
            html_escape(&run.name)
        );
        let _ = write!(out, "<tr><th style='text-align:left'>Variável</th>");
        for scope in &run.drivers.scopes {
            let _ = write!(out, "<th>{}</th>", html_escape(scope));
        }
        let _ = writeln!(out, "</tr>");

        for row in &run.drivers.rows {
            let _ = write!(
                out,
                "<tr><td style='text-align:left'>{}</td>",
                html_escape(&row.feature)
            );
            for value in &row.values {
                let value = value.unwrap_or(0.0);
                let color = heat_color(value, heatmap);
                let _ = write!(
                    out,
                    "<td class='heatmap-cell' style='background-color: {}; color: {}'>{value:.2}</td>",
                    color.background, color.text
                );
            }
            let _ = writeln!(out, "</tr>");
        }
        let _ = writeln!(out, "</table>");
        let _ = writeln!(out, "{SOURCE_NOTE}");
        let _ = writeln!(out, "</div>");
    }
}

fn render_figures(out: &mut String, figures: &[Figure], style: &str) {
    for figure in figures {
        let _ = writeln!(
            out,
            "<div class='figure'{style}><img src='{}' style='width:100%'><br><small>{}</small></div>",
            html_escape(&figure.src),
            html_escape(&figure.caption)
        );
    }
}

fn render_elasticity(out: &mut String, gallery: Option<&ElasticityGallery>) {
    let _ = writeln!(out, "<h2>3.1 Curvas de Elasticidade</h2>");
    let _ = writeln!(
        out,
        "<p>As curvas de elasticidade (ou funções de forma) ilustram como o Score EBM varia em função dos valores de cada variável preditora, mantendo as demais constantes.</p>"
    );

    let Some(gallery) = gallery.filter(|gallery| !gallery.scopes.is_empty()) else {
        let _ = writeln!(out, "<p>Imagens de elasticidade não encontradas.</p>");
        return;
    };

    let _ = writeln!(out, "<h3>{}</h3>", html_escape(&gallery.run_name));
    let tabs = gallery
        .scopes
        .iter()
        .enumerate()
        .map(|(index, (scope, _))| (format!("ElastScope{}", index + 1), scope.clone()))
        .collect::<Vec<_>>();
    render_tab_bar(out, "elast", &tabs);

    for ((scope, figures), (id, _)) in gallery.scopes.iter().zip(&tabs) {
        open_tab_content(out, "elast", id);
        let _ = writeln!(out, "<h4>{}</h4>", html_escape(scope));
        let _ = writeln!(
            out,
            "<div style='display:flex; flex-wrap:wrap; justify-content:center;'>"
        );
        render_figures(out, figures, " style='width:45%; margin:5px;'");
        let _ = writeln!(out, "</div>");
        let _ = writeln!(out, "</div>");
    }
    let _ = writeln!(out, "{SOURCE_NOTE}");
}

fn render_advanced_metrics(out: &mut String, rows: Option<&[GlobalMetricRow]>) {
    let _ = writeln!(
        out,
        "<h3>4.1 Métricas de Eventos Raros (AUPRC e Recall@k)</h3>"
    );
    let Some(rows) = rows else {
        let _ = writeln!(out, "<p>Métricas avançadas não disponíveis.</p>");
        return;
    };

    let _ = writeln!(
        out,
        "<table><caption>Tabela 4.1. Performance em Eventos Raros</caption>"
    );
    let _ = writeln!(
        out,
        "<tr><th>Run</th><th>AUC (Global)</th><th>Brier (Global)</th><th>AUPRC (Global)</th><th>Recall@1% (Global)</th><th>Precision@1% (Global)</th><th>Recall@5% (Global)</th><th>AUPRC (Média Local)</th></tr>"
    );
    for row in rows {
        let _ = write!(
            out,
            "<tr><td style='text-align:left'>{}</td>",
            html_escape(&row.run)
        );
        for value in [
            row.auc,
            row.brier,
            row.auprc,
            row.recall_at_1,
            row.precision_at_1,
            row.recall_at_5,
            row.auprc_local_mean,
        ] {
            let _ = write!(out, "<td>{}</td>", format_optional(value, 4));
        }
        let _ = writeln!(out, "</tr>");
    }
    let _ = writeln!(out, "</table>");
    let _ = writeln!(out, "{SOURCE_NOTE}");
}

fn render_calibration(out: &mut String, galleries: &[CalibrationGallery]) {
    let _ = writeln!(out, "<h3>4.2 Curvas de Calibração</h3>");
    if galleries.is_empty() {
        let _ = writeln!(out, "<p>Curvas de calibração não disponíveis.</p>");
        return;
    }

    let tabs = galleries
        .iter()
        .enumerate()
        .map(|(index, gallery)| (format!("CalibRun{}", index + 1), gallery.run_label.clone()))
        .collect::<Vec<_>>();
    render_tab_bar(out, "calib", &tabs);

    for (gallery, (id, _)) in galleries.iter().zip(&tabs) {
        open_tab_content(out, "calib", id);
        let _ = writeln!(out, "<h4>{}</h4>", html_escape(&gallery.run_name));
        let _ = writeln!(out, "<div style='text-align:center'>");
        render_figures(out, &gallery.figures, "");
        let _ = writeln!(out, "</div>");
        let _ = writeln!(out, "</div>");
    }
    let _ = writeln!(out, "{SOURCE_NOTE}");
}

fn render_stability(out: &mut String, rows: Option<&[StabilityRow]>) {
    let _ = writeln!(
        out,
        "<h3>4.3 Estabilidade dos Drivers (Consistência Global)</h3>"
    );
    let Some(rows) = rows else {
        let _ = writeln!(out, "<p>Tabela de estabilidade não disponível.</p>");
        return;
    };

    let _ = writeln!(
        out,
        "<p>Frequência com que cada variável apresentou |Score| acima do limiar de relevância nas matrizes de importância EBM, considerando todos os runs e escopos avaliados.</p>"
    );
    let _ = writeln!(
        out,
        "<table><caption>Tabela 4.3. Drivers Mais Robustos</caption>"
    );
    let _ = writeln!(
        out,
        "<tr><th>Rank</th><th>Variável</th><th>Frequência</th><th>Interpretação</th></tr>"
    );
    for (index, row) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "<tr><td>{}º</td><td style='text-align:left'>{}</td><td>{}</td><td style='text-align:left'>{}</td></tr>",
            index + 1,
            html_escape(&row.feature),
            row.count,
            html_escape(&row.interpretation)
        );
    }
    let _ = writeln!(out, "</table>");
    let _ = writeln!(out, "{SOURCE_NOTE}");
}

fn render_ablation(out: &mut String, rows: &[AblationRow]) {
    let _ = writeln!(
        out,
        "<h2>5. Análise de Ablação (Impacto das Interações)</h2>"
    );
    let _ = writeln!(
        out,
        "<p>Comparativo direto entre modelos com interações (Standard) e sem interações (NoInt) para avaliar o ganho de performance.</p>"
    );
    let _ = writeln!(
        out,
        "<table><caption>Tabela 5. Impacto das Interações na Performance (AUC)</caption>"
    );
    let _ = writeln!(
        out,
        "<tr><th>Threshold</th><th>AUC (Com Interações)</th><th>AUC (Sem Interações)</th><th>Delta</th><th>Impacto</th></tr>"
    );
    for row in rows {
        let color = if row.delta > 0.0 { "green" } else { "red" };
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{:.4}</td><td>{:.4}</td><td style='color:{color}'><b>{:+.4}</b></td><td>{}</td></tr>",
            html_escape(&row.threshold),
            row.auc_with,
            row.auc_without,
            row.delta,
            row.impact.as_str()
        );
    }
    let _ = writeln!(out, "</table>");
    let _ = writeln!(
        out,
        "<div class='source'>Fonte: Elaboração própria a partir dos dados do Preditor FCU v3.</div>"
    );
}

fn render_glossary(out: &mut String, glossary: &[(String, String)]) {
    if glossary.is_empty() {
        return;
    }
    let _ = writeln!(out, "<h2>Apêndice A. Glossário de Variáveis</h2>");
    let _ = writeln!(
        out,
        "<table><caption>Tabela A.1. Dicionário de Dados</caption>"
    );
    let _ = writeln!(
        out,
        "<tr><th style='text-align:left'>Nome Técnico</th><th style='text-align:left'>Nome Descritivo</th></tr>"
    );
    for (name, label) in glossary {
        let _ = writeln!(
            out,
            "<tr><td style='text-align:left'>{}</td><td style='text-align:left'>{}</td></tr>",
            html_escape(name),
            html_escape(label)
        );
    }
    let _ = writeln!(out, "</table>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DriverMatrixRow;
    use crate::model::Impact;

    fn sample_inputs() -> ReportInputs {
        ReportInputs {
            generated_at: "18/10/2026 10:00 UTC".to_string(),
            summaries: vec![
                RunSummary {
                    name: "Run 1 (0.95, Std)".to_string(),
                    feature_count: Some(42),
                    reported: Some(ReportedMetrics {
                        auc: 0.81234,
                        brier: Some(0.05),
                    }),
                },
                RunSummary {
                    name: "Run 5 (0.95, NoInt)".to_string(),
                    feature_count: None,
                    reported: None,
                },
            ],
            runs: vec![RunSection {
                name: "Run 1 (0.95, Std)".to_string(),
                label: "Run 1".to_string(),
                distribution: Some(CsvTable {
                    headers: vec!["Faixa".to_string(), "Local".to_string()],
                    rows: vec![vec!["<0.1".to_string(), "120".to_string()]],
                }),
                drivers: DriverMatrix {
                    scopes: vec!["BRASIL".to_string(), "Recife".to_string()],
                    rows: vec![DriverMatrixRow {
                        feature: "Déficit de Arborização".to_string(),
                        values: vec![Some(1.5), None],
                    }],
                },
            }],
            elasticity: None,
            advanced_metrics: Some(vec![GlobalMetricRow {
                run: "Run 1 (0.95, Std)".to_string(),
                auprc: Some(0.3),
                ..GlobalMetricRow::default()
            }]),
            calibration: vec![CalibrationGallery {
                run_name: "Run 1 (0.95, Std)".to_string(),
                run_label: "Run 1".to_string(),
                figures: vec![Figure {
                    caption: "BRASIL".to_string(),
                    src: "comparativo_avancado/calib_run1_BRASIL.svg".to_string(),
                }],
            }],
            stability: Some(vec![StabilityRow {
                feature: "Declividade Média do Terreno".to_string(),
                count: 5,
                interpretation: "Topografia acidentada".to_string(),
            }]),
            ablation: vec![AblationRow {
                threshold: "0.95".to_string(),
                with_interactions: "Run 1 (0.95, Std)".to_string(),
                without_interactions: "Run 5 (0.95, NoInt)".to_string(),
                auc_with: 0.81,
                auc_without: 0.79,
                delta: 0.02,
                impact: Impact::Positive,
            }],
            glossary: vec![("V0005".to_string(), "Total de Moradores".to_string())],
        }
    }

    #[test]
    fn heat_color_saturates_and_switches_text() {
        let settings = HeatmapSettings::default();
        assert_eq!(
            heat_color(0.0, settings),
            HeatColor {
                background: "rgb(255, 255, 200)".to_string(),
                text: "#000"
            }
        );
        assert_eq!(
            heat_color(-3.0, settings),
            HeatColor {
                background: "rgb(255, 0, 0)".to_string(),
                text: "#fff"
            }
        );
        // 0.75 / 1.5 = 0.5 stays below the contrast threshold.
        assert_eq!(heat_color(0.75, settings).text, "#000");
        assert_eq!(heat_color(0.75, settings).background, "rgb(255, 127, 100)");
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(
            html_escape("<a href=\"x\">'&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn unescape_reverses_escape() {
        for raw in ["<a href=\"x\">'&'</a>", "elasticidade_BRASIL_a & b.png", "&lt;"] {
            assert_eq!(html_unescape(&html_escape(raw)), raw);
        }
    }

    #[test]
    fn document_contains_every_section() {
        let html = render_document(&sample_inputs(), HeatmapSettings::default());

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("function openTab"));
        for heading in [
            "1. Resumo de Métricas",
            "2. Distribuição de Probabilidades",
            "3. Matriz de Drivers de Risco",
            "3.1 Curvas de Elasticidade",
            "4.1 Métricas de Eventos Raros",
            "4.2 Curvas de Calibração",
            "4.3 Estabilidade dos Drivers",
            "5. Análise de Ablação",
            "Apêndice A. Glossário",
        ] {
            assert!(html.contains(heading), "missing section {heading}");
        }
        assert!(html.trim_end().ends_with("</body></html>"));
    }

    #[test]
    fn document_renders_placeholders_and_values() {
        let html = render_document(&sample_inputs(), HeatmapSettings::default());

        assert!(html.contains("<td>42</td><td>0.8123</td><td>0.0500</td>"));
        assert!(html.contains("Run 5 (0.95, NoInt)</td><td>–</td><td>–</td><td>–</td>"));
        assert!(html.contains("<td>&lt;0.1</td>"));
        assert!(html.contains("background-color: rgb(255, 0, 0); color: #fff'>1.50</td>"));
        assert!(html.contains("background-color: rgb(255, 255, 200); color: #000'>0.00</td>"));
        assert!(html.contains("<b>+0.0200</b></td><td>Positivo</td>"));
        assert!(html.contains("<td>1º</td>"));
        assert!(html.contains("src='comparativo_avancado/calib_run1_BRASIL.svg'"));
        assert!(html.contains("Imagens de elasticidade não encontradas."));
        assert!(html.contains("<td>0.3000</td>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let inputs = sample_inputs();
        let settings = HeatmapSettings::default();
        assert_eq!(
            render_document(&inputs, settings),
            render_document(&inputs, settings)
        );
    }
}
