use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{Run, Scope};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    pub test_fraction: f64,
    pub seed: u64,
    pub cell_size: f64,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            test_fraction: 0.25,
            seed: 42,
            cell_size: 20.0,
        }
    }
}

/// Column names of the cleaned dataset CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetColumns {
    pub id: String,
    pub label: String,
    pub x: String,
    pub y: String,
    pub scope: String,
}

impl Default for DatasetColumns {
    fn default() -> Self {
        Self {
            id: "ID".to_string(),
            label: "FCU".to_string(),
            x: "x".to_string(),
            y: "y".to_string(),
            scope: "polo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapSettings {
    pub ceiling: f64,
    pub contrast_threshold: f64,
}

impl Default for HeatmapSettings {
    fn default() -> Self {
        Self {
            ceiling: 1.5,
            contrast_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub key: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub runs: Vec<Run>,
    pub scopes: Vec<Scope>,
    pub split: SplitSettings,
    pub dataset: DatasetColumns,
    pub stability_threshold: f64,
    pub stability_rows: usize,
    pub heatmap: HeatmapSettings,
    pub calibration_bins: usize,
    pub calibration_scopes: Vec<String>,
    pub elasticity_run: Option<String>,
    pub feature_labels: BTreeMap<String, String>,
    pub interpretations: Vec<Interpretation>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            runs: default_runs(),
            scopes: default_scopes(),
            split: SplitSettings::default(),
            dataset: DatasetColumns::default(),
            stability_threshold: 0.2,
            stability_rows: 10,
            heatmap: HeatmapSettings::default(),
            calibration_bins: 10,
            calibration_scopes: vec!["Recife".to_string(), "Porto Alegre".to_string()],
            elasticity_run: Some("run8".to_string()),
            feature_labels: default_feature_labels(),
            interpretations: default_interpretations(),
        }
    }
}

impl ReportConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                let config: ReportConfig = serde_json::from_slice(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?;
                info!(path = %path.display(), runs = config.runs.len(), "loaded report config");
                config
            }
            None => ReportConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut keys = HashSet::new();
        for run in &self.runs {
            if !keys.insert(run.key.as_str()) {
                bail!("duplicate run key in config: {}", run.key);
            }
        }

        let national = self.scopes.iter().filter(|scope| scope.national).count();
        if national != 1 {
            bail!("config must declare exactly one national scope, found {national}");
        }

        if !(self.split.test_fraction > 0.0 && self.split.test_fraction < 1.0) {
            bail!(
                "split test_fraction must be in (0, 1), got {}",
                self.split.test_fraction
            );
        }
        if !(self.split.cell_size > 0.0) {
            bail!("split cell_size must be positive, got {}", self.split.cell_size);
        }
        if self.calibration_bins == 0 {
            bail!("calibration_bins must be positive");
        }

        Ok(())
    }

    pub fn national_scope(&self) -> Option<&Scope> {
        self.scopes.iter().find(|scope| scope.national)
    }

    pub fn run_by_key(&self, key: &str) -> Option<&Run> {
        self.runs.iter().find(|run| run.key == key)
    }

    pub fn wants_calibration_diagram(&self, scope: &Scope) -> bool {
        scope.national
            || self
                .calibration_scopes
                .iter()
                .any(|name| scope.matches(name))
    }

    /// Human-readable feature name; interaction terms are mapped part-wise.
    pub fn pretty_name(&self, feature: &str) -> String {
        if feature.contains('&') {
            return feature
                .split('&')
                .map(|part| self.lookup_label(part.trim()))
                .collect::<Vec<_>>()
                .join(" & ");
        }
        self.lookup_label(feature)
    }

    fn lookup_label(&self, feature: &str) -> String {
        self.feature_labels
            .get(feature)
            .cloned()
            .unwrap_or_else(|| feature.to_string())
    }

    /// Exact key match first, then the first key contained in the feature name.
    pub fn interpretation_for(&self, feature: &str) -> &str {
        if let Some(entry) = self.interpretations.iter().find(|entry| entry.key == feature) {
            return &entry.text;
        }
        self.interpretations
            .iter()
            .find(|entry| feature.contains(entry.key.as_str()))
            .map(|entry| entry.text.as_str())
            .unwrap_or("-")
    }
}

fn default_runs() -> Vec<Run> {
    let registry = [
        ("run1", "Run 1 (0.95, Std)", "log_v3_95_std", 0.95, true, true),
        ("run2", "Run 2 (0.80, Std)", "log_v3_80_std", 0.80, true, false),
        ("run3", "Run 3 (0.70, Std)", "log_v3_70_std", 0.70, true, false),
        ("run4", "Run 4 (0.60, Std)", "log_v3_60_std", 0.60, true, false),
        ("run5", "Run 5 (0.95, NoInt)", "log_v3_95_noint", 0.95, false, false),
        ("run6", "Run 6 (0.80, NoInt)", "log_v3_80_noint", 0.80, false, true),
        ("run7", "Run 7 (0.70, NoInt)", "log_v3_70_noint", 0.70, false, true),
        ("run8", "Run 8 (0.60, NoInt)", "log_v3_60_noint", 0.60, false, true),
    ];

    registry
        .iter()
        .map(
            |(key, name, folder, threshold, interactions, evaluate)| Run {
                key: key.to_string(),
                name: name.to_string(),
                folder: folder.to_string(),
                threshold: *threshold,
                interactions: *interactions,
                evaluate: *evaluate,
            },
        )
        .collect()
}

fn default_scopes() -> Vec<Scope> {
    vec![
        Scope::national("BRASIL"),
        Scope::local("Belo Horizonte"),
        Scope::local("Brasília"),
        Scope::local("Juazeiro do Norte"),
        Scope::local("Marabá"),
        Scope::local("Porto Alegre"),
        Scope::local("Recife"),
    ]
}

fn default_feature_labels() -> BTreeMap<String, String> {
    [
        ("media_banheiros_hab", "Densidade Sanitária (Banheiros/Hab)"),
        ("banheiro_exclusivo", "Acesso Sanitário Exclusivo"),
        ("entorno_pavimentada_sim", "Infraestrutura Viária (Pavimentada)"),
        ("agua_outra_soma", "Abastecimento Hídrico Alternativo"),
        ("censo_entorno_caminhao", "Fluxo Logístico Pesado"),
        ("AREA_KM2", "Área da Célula (km²)"),
        ("n_cel_s", "Densidade Demográfica Relativa"),
        ("entorno_arborizacao_sim", "Índice de Arborização Urbana"),
        ("entorno_arborizacao_nao", "Déficit de Arborização"),
        ("esgoto_adequado_soma", "Saneamento Adequado"),
        ("esgoto_inadequado_soma", "Saneamento Inadequado"),
        ("fisico_declividade_media", "Declividade Média do Terreno"),
        ("entorno_iluminacao_nao", "Déficit de Iluminação Pública"),
        ("entorno_bueiro_nao", "Déficit de Drenagem Pluvial"),
        ("entorno_via_leve", "Acessibilidade Viária (Leve)"),
        ("entorno_calcada_nao", "Déficit de Calçadas"),
        ("banheiro_multiplo", "Instalações Sanitárias Compartilhadas"),
        ("censo_lixo_cacamba", "Coleta de Resíduos (Caçamba)"),
        ("rate_banheiro_exclusivo", "Taxa de Exclusividade Sanitária"),
        ("entorno_obstaculo_sim", "Obstrução de Vias"),
        ("entorno_obstaculo_nao", "Ausência de Obstrução Viária"),
        ("V06004", "Renda Média Domiciliar"),
        ("cad_renda_media_pc", "Renda Média Per Capita (CadÚnico)"),
        ("cad_qtde_pessoas", "Total de Pessoas (CadÚnico)"),
        ("prob_fcu", "Probabilidade FCU (Local)"),
        ("prob_fcu_BRASIL", "Probabilidade FCU (Global)"),
        ("VB002_rate", "Taxa de Banheiro Exclusivo"),
        ("VB003_rate", "Taxa de Banheiro Compartilhado"),
        ("V00398_rate", "Taxa de Lixo em Caçamba"),
        ("VL001_rate", "Taxa de Coleta de Lixo Regular"),
        ("VL002_rate", "Taxa de Lixo Irregular"),
        ("VE001_rate", "Taxa de Esgoto Adequado"),
        ("VE002_rate", "Taxa de Esgoto Inadequado"),
        ("V06001_rate", "Taxa de Responsável por Domicílio"),
        ("V00314_rate", "Taxa de Esgoto em Rio/Vala"),
        ("VA002_rate", "Taxa de Abastecimento de Água Alternativo"),
        ("V00309_rate", "Taxa de Esgoto na Rede Geral"),
        ("V0001", "Total de Domicílios Ocupados"),
        ("V0005", "Total de Moradores"),
        ("V0007", "Total de Domicílios Particulares"),
        ("cad_ilum_eletrica_s_medidor", "Iluminação Elétrica sem Medidor (CadÚnico)"),
        ("cad_calcamento_inexistente", "Calçamento Inexistente (CadÚnico)"),
        ("lixo_irregular_soma", "Lixo Irregular (Soma)"),
        ("entorno_via_pesada", "Vias Pesadas (Caminhões/Ônibus)"),
        ("lixo_regular_bin", "Coleta de Lixo Regular (Binário)"),
        ("censo_esgoto_rio", "Esgoto em Rio/Vala (Censo)"),
        ("censo_resp_domicilio", "Responsável pelo Domicílio (Censo)"),
        ("fisico_indice_forma_medio", "Índice de Forma Médio (Físico)"),
        ("agua_rede_bin", "Água da Rede (Binário)"),
        ("cad_ilum_precario_soma", "Iluminação Precária (CadÚnico)"),
        ("fisico_pct_vias_50m", "Densidade de Vias (50m)"),
        ("cad_pessoas_por_dom", "Média de Pessoas por Domicílio (CadÚnico)"),
        ("cad_renda_media_pc_fam", "Renda Média Familiar Per Capita (CadÚnico)"),
        ("cad_qtde_pessoas_fam", "Tamanho da Família (CadÚnico)"),
        ("V00238_rate", "Taxa de Banheiro (V00238)"),
        ("entorno_bueiro_sim", "Presença de Bueiro"),
        ("censo_esgoto_rede", "Esgoto na Rede (Censo)"),
        ("entorno_calcada_sim", "Presença de Calçada"),
        ("entorno_pavimentada_nao", "Déficit de Pavimentação"),
    ]
    .iter()
    .map(|(key, label)| (key.to_string(), label.to_string()))
    .collect()
}

fn default_interpretations() -> Vec<Interpretation> {
    [
        ("fisico_pct_app_30m", "Restrição ambiental (APP)"),
        ("fisico_declividade_media", "Topografia acidentada"),
        ("entorno_arborizacao_nao", "Déficit de arborização (indicador ambiental)"),
        ("banheiro_exclusivo", "Saneamento/Infraestrutura consolidada"),
        ("entorno_pavimentada_nao", "Precariedade viária"),
        ("entorno_via_leve", "Acessibilidade local"),
        ("censo_moradores_total", "Densidade populacional"),
        ("media_banheiros_hab", "Densidade sanitária"),
    ]
    .iter()
    .map(|(key, text)| Interpretation {
        key: key.to_string(),
        text: text.to_string(),
    })
    .collect()
}
