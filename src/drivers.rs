//! Extraction of signed driver scores from the EBM diagnostic text report.

use crate::model::DriverScore;

pub const SECTION_MARKER: &str = "Fatores de Influência";
pub const COLUMN_HEADER: &str = "feature_pretty";
const HEADER_LINES: usize = 2;
const RULE_CHARS: &[char] = &['─', '━', '-', '=', '_'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MinerState {
    Seek,
    SkipHeader { remaining: usize },
    Parse,
    Done,
}

#[derive(Debug, Clone)]
pub struct DriverReportMiner {
    marker: String,
    column_header: String,
    header_lines: usize,
}

impl Default for DriverReportMiner {
    fn default() -> Self {
        Self {
            marker: SECTION_MARKER.to_string(),
            column_header: COLUMN_HEADER.to_string(),
            header_lines: HEADER_LINES,
        }
    }
}

impl DriverReportMiner {
    /// Drivers of the first marked section, in source order. A feature that
    /// appears twice keeps its first position and its last value. Returns an
    /// empty list when the marker is absent.
    pub fn mine(&self, text: &str) -> Vec<DriverScore> {
        let mut drivers: Vec<DriverScore> = Vec::new();
        let mut state = MinerState::Seek;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            state = match state {
                MinerState::Seek => {
                    if line.contains(self.marker.as_str()) {
                        self.after_marker()
                    } else {
                        MinerState::Seek
                    }
                }
                MinerState::SkipHeader { remaining } => {
                    // A shorter header than expected: the first row is already data.
                    if !self.is_column_header(line) && parse_row(line).is_some() {
                        self.parse_line(line, &mut drivers)
                    } else if remaining > 1 {
                        MinerState::SkipHeader {
                            remaining: remaining - 1,
                        }
                    } else {
                        MinerState::Parse
                    }
                }
                MinerState::Parse => self.parse_line(line, &mut drivers),
                MinerState::Done => break,
            };
        }

        drivers
    }

    fn after_marker(&self) -> MinerState {
        if self.header_lines == 0 {
            MinerState::Parse
        } else {
            MinerState::SkipHeader {
                remaining: self.header_lines,
            }
        }
    }

    fn is_column_header(&self, line: &str) -> bool {
        line.contains(self.column_header.as_str())
    }

    fn parse_line(&self, line: &str, drivers: &mut Vec<DriverScore>) -> MinerState {
        if line.is_empty() || self.is_column_header(line) {
            return MinerState::Parse;
        }
        if is_rule(line) {
            return MinerState::Done;
        }

        if let Some((feature, score)) = parse_row(line) {
            match drivers.iter_mut().find(|driver| driver.feature == feature) {
                Some(existing) => existing.score = score,
                None => drivers.push(DriverScore {
                    feature: feature.to_string(),
                    score,
                }),
            }
        }
        MinerState::Parse
    }
}

pub fn mine_drivers(text: &str) -> Vec<DriverScore> {
    DriverReportMiner::default().mine(text)
}

fn is_rule(line: &str) -> bool {
    line.chars().count() >= 3 && line.chars().all(|ch| RULE_CHARS.contains(&ch))
}

/// Splits at the last whitespace run; the tail must be a finite float.
fn parse_row(line: &str) -> Option<(&str, f64)> {
    let (name, value) = line.trim().rsplit_once(char::is_whitespace)?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let score = value.parse::<f64>().ok()?;
    score.is_finite().then_some((name, score))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(drivers: &[DriverScore]) -> Vec<(&str, f64)> {
        drivers
            .iter()
            .map(|driver| (driver.feature.as_str(), driver.score))
            .collect()
    }

    #[test]
    fn mines_single_row_and_stops_at_rule() {
        let text = "\
Relatório de análise
Fatores de Influência (EBM)
feature_pretty                      score
──────────────────────────────────────────
feature_x 0.42
──────────────────────────────────────────
feature_after_rule 9.0
";
        let drivers = mine_drivers(text);
        assert_eq!(scores(&drivers), vec![("feature_x", 0.42)]);
    }

    #[test]
    fn keeps_multiword_names_and_signed_scores() {
        let text = "\
=== Fatores de Influência (EBM) ===
feature_pretty   score
-----------------------
Déficit de Arborização      -0.731

banheiro_exclusivo & V0005   1.25
linha sem numero
feature_pretty   score
-----------------------
";
        let drivers = mine_drivers(text);
        assert_eq!(
            scores(&drivers),
            vec![
                ("Déficit de Arborização", -0.731),
                ("banheiro_exclusivo & V0005", 1.25)
            ]
        );
    }

    #[test]
    fn missing_marker_yields_empty() {
        assert!(mine_drivers("feature_x 0.42\nother 1.0\n").is_empty());
        assert!(mine_drivers("").is_empty());
    }

    #[test]
    fn header_and_footer_never_become_features() {
        let text = "\
Fatores de Influência (EBM)
feature_pretty score
=====================
a 0.1
=====================
Total 3.0
";
        let drivers = mine_drivers(text);
        assert_eq!(scores(&drivers), vec![("a", 0.1)]);
        assert!(drivers.iter().all(|d| d.feature != "feature_pretty"));
    }

    #[test]
    fn short_header_does_not_swallow_first_row() {
        let text = "\
Fatores de Influência (EBM)
feature_x 0.42
feature_y -0.10
────────
";
        let drivers = mine_drivers(text);
        assert_eq!(
            scores(&drivers),
            vec![("feature_x", 0.42), ("feature_y", -0.10)]
        );
    }

    #[test]
    fn duplicate_feature_keeps_position_and_last_value() {
        let text = "\
Fatores de Influência (EBM)
feature_pretty score
───────
a 0.1
b 0.2
a 0.3
";
        let drivers = mine_drivers(text);
        assert_eq!(scores(&drivers), vec![("a", 0.3), ("b", 0.2)]);
    }

    #[test]
    fn non_finite_tokens_are_skipped() {
        let text = "\
Fatores de Influência (EBM)
feature_pretty score
───────
a nan
b inf
c 0.5
";
        assert_eq!(scores(&mine_drivers(text)), vec![("c", 0.5)]);
    }
}
