//! Extraction of numeric results from codeml's free-text output.
//!
//! Every extractor works on the complete text of one output file and reports a
//! miss as `None`, an empty collection or [`OmegaEstimate::Absent`]. Nothing in
//! here returns an error for unexpected text.

use crate::models::ModelFamily;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, sync::LazyLock};

pub const OMEGA_MIN: f64 = -10.0;
pub const OMEGA_MAX: f64 = 100.0;
/// codeml writes 999 for a ratio it could not estimate.
pub const NOT_ESTIMATED: f64 = 999.0;

const BRANCH_TABLE_MARKER: &str = "dN & dS for each branch";
const BRANCH_TABLE_MAX_LINES: usize = 200;
const BRANCH_TABLE_END_MARKERS: [&str; 6] = ["tree length", "ds tree", "dn tree", "---", "mlc", "model"];
const SITE_CLASS_SCAN_LINES: usize = 20;

static LNL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"lnL[^:]*:\s*([+-]?\d+\.\d+)",
        r"lnL\([^)]*\):\s*([+-]?\d+\.\d+)",
        r"lnL\s*[:=]\s*([+-]?\d+\.\d+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static NP_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"np:\s*(\d+)").ok());

static MODEL_PARAM_OMEGA_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)omega \(w\) for branches:\s*([\d.]+)",
        r"(?i)w\s*=\s*([\d.]+)",
        r"(?i)dN/dS.*?=\s*([\d.]+)",
        r"(?i)w \(dN/dS\)\s*=\s*([\d.]+)",
        r"(?i)\bw\s+=\s*([\d.]+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static BACKGROUND_W: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"background\s+w\s+([\d.\s]+?)(?:\n|$)").ok());
static FOREGROUND_W: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"foreground\s+w\s+([\d.\s]+?)(?:\n|$)").ok());
static BRANCHES_W_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)w\s*\(dN/dS\)\s*for\s+branches?\s*:\s*([\d.\s]+?)(?:\n|$)").ok()
});
static TIME_USED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Time used:\s*([\d:.]+)").ok());

fn in_bounds(value: f64) -> bool {
    (OMEGA_MIN..=OMEGA_MAX).contains(&value)
}

/// Output files can contain stray non-UTF-8 bytes from sequence names.
pub fn read_output_text(path: &Path) -> Result<String, String> {
    let bytes =
        fs::read(path).map_err(|e| format!("Could not read output '{}': {e}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// First log-likelihood on the first line containing `lnL` that any pattern matches.
pub fn extract_lnl(text: &str) -> Option<f64> {
    text.lines().filter(|l| l.contains("lnL")).find_map(|line| {
        LNL_PATTERNS.iter().find_map(|re| {
            re.captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        })
    })
}

pub fn extract_np(text: &str) -> Option<u32> {
    let re = NP_PATTERN.as_ref()?;
    text.lines()
        .filter(|l| l.contains("lnL") && l.contains("np:"))
        .find_map(|line| {
            re.captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        })
}

/// One data row of the "dN & dS for each branch" table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchRow {
    pub branch: String,
    pub t: Option<f64>,
    pub n: Option<f64>,
    pub s: Option<f64>,
    pub omega: f64,
    pub dn: Option<f64>,
    pub ds: Option<f64>,
    pub n_dn: Option<f64>,
    pub s_ds: Option<f64>,
}

/// Rows of the first branch table, including rows whose ratio is out of bounds.
pub fn parse_branch_table(text: &str) -> Vec<BranchRow> {
    let lines: Vec<&str> = text.lines().collect();
    let start = match lines.iter().position(|l| l.contains(BRANCH_TABLE_MARKER)) {
        Some(i) => i + 1,
        None => return vec![],
    };
    let end = (start + BRANCH_TABLE_MAX_LINES).min(lines.len());
    let mut rows = vec![];
    for line in &lines[start..end] {
        let line = line.trim();
        let lower = line.to_lowercase();
        if line.is_empty() || lower.contains("branch") {
            continue;
        }
        if BRANCH_TABLE_END_MARKERS.iter().any(|m| lower.contains(m)) {
            break;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            continue;
        }
        let omega = match parts[4].parse::<f64>() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let field = |i: usize| parts.get(i).and_then(|p| p.parse::<f64>().ok());
        rows.push(BranchRow {
            branch: parts[0].to_string(),
            t: field(1),
            n: field(2),
            s: field(3),
            omega,
            dn: field(5),
            ds: field(6),
            n_dn: field(7),
            s_ds: field(8),
        });
    }
    rows
}

/// Branch identifier (`7..8`) to ratio, in-bounds rows only.
pub fn extract_branch_omegas(text: &str) -> BTreeMap<String, f64> {
    parse_branch_table(text)
        .into_iter()
        .filter(|r| in_bounds(r.omega))
        .map(|r| (r.branch, r.omega))
        .collect()
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median of the in-bounds ratios of the branch table.
pub fn omega_from_branch_table(text: &str) -> Option<f64> {
    let values: Vec<f64> = parse_branch_table(text)
        .iter()
        .map(|r| r.omega)
        .filter(|v| in_bounds(*v))
        .collect();
    median(&values)
}

/// First in-bounds value of a directly labeled ratio.
pub fn omega_from_model_params(text: &str) -> Option<f64> {
    MODEL_PARAM_OMEGA_PATTERNS.iter().find_map(|re| {
        re.captures_iter(text)
            .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<f64>().ok()))
            .find(|v| in_bounds(*v))
    })
}

/// Branch-site output reports site classes with separate background and
/// foreground ratios; such output has no single global ratio.
pub fn has_site_class_signature(text: &str) -> bool {
    text.contains("site class") && text.contains("background w") && text.contains("foreground w")
}

pub fn extract_omega_robust(text: &str) -> OmegaEstimate {
    if has_site_class_signature(text) {
        return OmegaEstimate::NotApplicable;
    }
    omega_from_branch_table(text)
        .or_else(|| omega_from_model_params(text))
        .map(|value| OmegaEstimate::Global { value })
        .unwrap_or(OmegaEstimate::Absent)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSource {
    /// `background w` / `foreground w` lines of branch-site output.
    SiteClassPair,
    /// `w (dN/dS) for branches:` line of branch-model output.
    BranchLine,
    /// Distinct values of the branch table, smallest taken as background.
    BranchTable,
}

impl TagSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SiteClassPair => "site_class_pair",
            Self::BranchLine => "branch_line",
            Self::BranchTable => "branch_table",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaggedOmega {
    pub tag: String,
    pub value: f64,
}

impl TaggedOmega {
    fn new(tag: impl Into<String>, value: f64) -> Self {
        Self {
            tag: tag.into(),
            value,
        }
    }
}

fn last_number(values: &str) -> Option<f64> {
    values.split_whitespace().last()?.parse::<f64>().ok()
}

fn tags_from_site_class_pair(text: &str) -> Option<Vec<TaggedOmega>> {
    let bg = BACKGROUND_W.as_ref()?.captures(text)?.get(1)?.as_str();
    let fg = FOREGROUND_W.as_ref()?.captures(text)?.get(1)?.as_str();
    let bg = last_number(bg)?;
    let fg = last_number(fg)?;
    let mut out = vec![];
    if in_bounds(bg) {
        out.push(TaggedOmega::new("background", bg));
    }
    if in_bounds(fg) {
        out.push(TaggedOmega::new("foreground", fg));
    }
    (!out.is_empty()).then_some(out)
}

fn tags_from_branch_line(text: &str) -> Option<Vec<TaggedOmega>> {
    let values = BRANCHES_W_LINE.as_ref()?.captures(text)?.get(1)?.as_str();
    let values: Vec<f64> = values
        .split_whitespace()
        .filter_map(|v| v.parse::<f64>().ok())
        .filter(|v| in_bounds(*v) || *v == NOT_ESTIMATED)
        .collect();
    let (background, rest) = values.split_first()?;
    let mut out = vec![TaggedOmega::new("background", *background)];
    out.extend(
        rest.iter()
            .enumerate()
            .map(|(i, v)| TaggedOmega::new(format!("#{}", i + 1), *v)),
    );
    Some(out)
}

fn tags_from_branch_table(text: &str) -> Option<Vec<TaggedOmega>> {
    let mut unique: BTreeMap<String, f64> = BTreeMap::new();
    for value in extract_branch_omegas(text).into_values() {
        unique.entry(format!("{value:.6}")).or_insert(value);
    }
    let mut values: Vec<f64> = unique.into_values().collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let (background, rest) = values.split_first()?;
    let mut out = vec![TaggedOmega::new("background", *background)];
    out.extend(
        rest.iter()
            .enumerate()
            .map(|(i, v)| TaggedOmega::new(format!("#{}", i + 1), *v)),
    );
    Some(out)
}

/// Ratios per foreground tag. Shapes are tried in a fixed order: the
/// branch-site background/foreground pair, then the per-tag branches line,
/// then distinct values of the branch table.
pub fn extract_omega_by_tags(text: &str) -> Option<(Vec<TaggedOmega>, TagSource)> {
    if let Some(tags) = tags_from_site_class_pair(text) {
        return Some((tags, TagSource::SiteClassPair));
    }
    if let Some(tags) = tags_from_branch_line(text) {
        return Some((tags, TagSource::BranchLine));
    }
    tags_from_branch_table(text).map(|tags| (tags, TagSource::BranchTable))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteClassOmega {
    pub label: String,
    pub proportion: f64,
    pub background_w: f64,
    pub foreground_w: f64,
}

fn values_after_label(line: &str, label: &Regex) -> Vec<String> {
    label
        .replace(line.trim(), "")
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

/// Site-class table of branch-site output: labels, proportions and the
/// background and foreground ratio of each class. Empty unless all rows are found.
pub fn extract_site_classes(text: &str) -> Vec<SiteClassOmega> {
    let (Ok(class_re), Ok(prop_re), Ok(bg_re), Ok(fg_re)) = (
        Regex::new(r"(?i)site\s+class"),
        Regex::new(r"(?i)proportion"),
        Regex::new(r"(?i)background\s+w"),
        Regex::new(r"(?i)foreground\s+w"),
    ) else {
        return vec![];
    };
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if !line.to_lowercase().contains("site class") {
            continue;
        }
        let Some(prop_line) = lines.get(i + 1) else {
            continue;
        };
        if !prop_line.to_lowercase().contains("proportion") {
            continue;
        }
        let labels = values_after_label(line, &class_re);
        let proportions = values_after_label(prop_line, &prop_re);
        let mut bg_line = None;
        let mut fg_line = None;
        for candidate in lines.iter().take((i + SITE_CLASS_SCAN_LINES).min(lines.len())).skip(i + 2) {
            let lower = candidate.to_lowercase();
            if lower.contains("background w") {
                bg_line = Some(*candidate);
            }
            if lower.contains("foreground w") {
                fg_line = Some(*candidate);
            }
        }
        let (Some(bg_line), Some(fg_line)) = (bg_line, fg_line) else {
            return vec![];
        };
        let bg = values_after_label(bg_line, &bg_re);
        let fg = values_after_label(fg_line, &fg_re);
        return labels
            .iter()
            .enumerate()
            .filter_map(|(idx, label)| {
                Some(SiteClassOmega {
                    label: label.clone(),
                    proportion: proportions.get(idx)?.parse().ok()?,
                    background_w: bg.get(idx)?.parse().ok()?,
                    foreground_w: fg.get(idx)?.parse().ok()?,
                })
            })
            .collect();
    }
    vec![]
}

/// The ratio representation of one run. Exactly one variant applies per model family.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OmegaEstimate {
    #[default]
    Absent,
    NotApplicable,
    Global {
        value: f64,
    },
    PerBranch {
        values: BTreeMap<String, f64>,
    },
    PerTag {
        values: Vec<TaggedOmega>,
        source: TagSource,
    },
    SiteClasses {
        classes: Vec<SiteClassOmega>,
    },
}

impl OmegaEstimate {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::NotApplicable => "not_applicable",
            Self::Global { .. } => "global",
            Self::PerBranch { .. } => "per_branch",
            Self::PerTag { .. } => "per_tag",
            Self::SiteClasses { .. } => "site_classes",
        }
    }

    pub fn global(&self) -> Option<f64> {
        match self {
            Self::Global { value } => Some(*value),
            _ => None,
        }
    }

    /// Summary-table cell: a number, `tag=value;...`, or `NA`.
    pub fn cell(&self) -> String {
        match self {
            Self::Absent | Self::NotApplicable => "NA".to_string(),
            Self::Global { value } => format!("{value:.6}"),
            Self::PerBranch { values } if !values.is_empty() => values
                .iter()
                .map(|(k, v)| format!("{k}={v:.6}"))
                .collect::<Vec<_>>()
                .join(";"),
            Self::PerTag { values, .. } if !values.is_empty() => values
                .iter()
                .map(|t| format!("{}={:.6}", t.tag, t.value))
                .collect::<Vec<_>>()
                .join(";"),
            Self::SiteClasses { classes } if !classes.is_empty() => classes
                .iter()
                .map(|c| format!("{}:bg={:.6},fg={:.6}", c.label, c.background_w, c.foreground_w))
                .collect::<Vec<_>>()
                .join(";"),
            _ => "NA".to_string(),
        }
    }
}

/// Picks the ratio representation belonging to `family`. Per-tag results whose
/// shape does not fit the family are kept but reported in `warnings`.
pub fn estimate_omega(text: &str, family: ModelFamily, warnings: &mut Vec<String>) -> OmegaEstimate {
    match family {
        ModelFamily::Site => extract_omega_robust(text),
        ModelFamily::FreeRatio => {
            let values = extract_branch_omegas(text);
            if values.is_empty() {
                OmegaEstimate::Absent
            } else {
                OmegaEstimate::PerBranch { values }
            }
        }
        ModelFamily::Branch => match extract_omega_by_tags(text) {
            Some((values, source)) => {
                match source {
                    TagSource::BranchLine => {}
                    TagSource::BranchTable => warnings.push(
                        "tag ratios derived from the branch table; background assumed to be the smallest value"
                            .to_string(),
                    ),
                    TagSource::SiteClassPair => warnings.push(
                        "branch model output carries background/foreground site-class ratios".to_string(),
                    ),
                }
                OmegaEstimate::PerTag { values, source }
            }
            None => OmegaEstimate::Absent,
        },
        ModelFamily::BranchSite => {
            let classes = extract_site_classes(text);
            if classes.is_empty() {
                if extract_omega_by_tags(text).is_some() {
                    warnings.push(
                        "branch-site output without a complete site-class table".to_string(),
                    );
                }
                OmegaEstimate::Absent
            } else {
                OmegaEstimate::SiteClasses { classes }
            }
        }
    }
}

/// Seconds from the `Time used: m:ss` (or `h:mm:ss`) trailer.
pub fn extract_time_used(text: &str) -> Option<f64> {
    let raw = TIME_USED.as_ref()?.captures(text)?.get(1)?.as_str();
    let mut total = 0.0;
    for part in raw.split(':') {
        total = total * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(total)
}

pub fn count_stop_codon_mentions(text: &str) -> usize {
    text.lines()
        .filter(|l| l.to_lowercase().contains("stop codon"))
        .count()
}

/// First Newick tree printed in the output.
pub fn extract_tree(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| l.starts_with('(') && l.contains(')') && l.ends_with(';'))
        .map(|l| l.to_string())
}

/// Everything read from one output file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub lnl: Option<f64>,
    pub np: Option<u32>,
    pub omega: OmegaEstimate,
    pub time_used_secs: Option<f64>,
    pub stop_codon_mentions: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub fn parse_output(text: &str, family: ModelFamily) -> ParsedOutput {
    let mut warnings = vec![];
    let omega = estimate_omega(text, family, &mut warnings);
    ParsedOutput {
        lnl: extract_lnl(text),
        np: extract_np(text),
        omega,
        time_used_secs: extract_time_used(text),
        stop_codon_mentions: count_stop_codon_mentions(text),
        warnings,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn table(values: &[&str]) -> String {
        let mut out = String::from("dN & dS for each branch\n\n branch t N S dN/dS dN dS N*dN S*dS\n\n");
        for (i, v) in values.iter().enumerate() {
            out.push_str(&format!("   {}..{}  0.1 200.0 70.0 {v} 0.01 0.02 2.0 1.0\n", i + 5, i + 1));
        }
        out.push_str("\ntree length for dN: 0.1\n");
        out
    }

    #[test]
    fn lnl_and_np_from_summary_line() {
        assert_eq!(extract_lnl(M0_OUTPUT), Some(-1234.56789));
        assert_eq!(extract_np(M0_OUTPUT), Some(5));
        assert_eq!(extract_lnl("lnL = -10.5\n"), Some(-10.5));
        assert_eq!(extract_lnl("no likelihood here"), None);
        assert_eq!(extract_np("np: 4 without marker"), None);
    }

    #[test]
    fn branch_table_median_ignores_out_of_bounds() {
        assert_eq!(omega_from_branch_table(&table(&["0.40", "0.42", "0.44"])), Some(0.42));
        assert_eq!(
            omega_from_branch_table(&table(&["0.40", "0.42", "0.44", "999"])),
            Some(0.42)
        );
        assert_eq!(omega_from_branch_table(M0_OUTPUT), Some(0.42));
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(omega_from_branch_table("nothing"), None);
    }

    #[test]
    fn branch_table_keeps_full_rows() {
        let rows = parse_branch_table(M0_OUTPUT);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].branch, "5..1");
        assert_eq!(rows[1].t, Some(0.1));
        assert_eq!(rows[1].s_ds, Some(3.3));
        assert_eq!(rows[3].omega, 999.0);
        let map = extract_branch_omegas(M0_OUTPUT);
        assert_eq!(map.len(), 3);
        assert!(!map.contains_key("4..3"));
    }

    #[test]
    fn model_param_strategy_skips_out_of_bounds_matches() {
        let text = "w = 250.0\nomega (dN/dS) = 0.35\n";
        assert_eq!(omega_from_model_params(text), Some(0.35));
        assert_eq!(
            extract_omega_robust("omega (dN/dS) =  0.41235\n"),
            OmegaEstimate::Global { value: 0.41235 }
        );
    }

    #[test]
    fn robust_extractor_is_not_applicable_for_site_classes() {
        assert_eq!(extract_omega_robust(BRANCH_SITE_OUTPUT), OmegaEstimate::NotApplicable);
        assert_eq!(extract_omega_robust(M0_OUTPUT), OmegaEstimate::Global { value: 0.42 });
        assert_eq!(extract_omega_robust(""), OmegaEstimate::Absent);
    }

    #[test]
    fn per_tag_keeps_not_estimated_marker() {
        let (tags, source) =
            extract_omega_by_tags("w (dN/dS) for branches:  0.35 0.06 999.00\n").unwrap();
        assert_eq!(source, TagSource::BranchLine);
        assert_eq!(
            tags,
            vec![
                TaggedOmega::new("background", 0.35),
                TaggedOmega::new("#1", 0.06),
                TaggedOmega::new("#2", 999.0),
            ]
        );
        let (tags, _) = extract_omega_by_tags("w (dN/dS) for branches: 0.5\n").unwrap();
        assert_eq!(tags, vec![TaggedOmega::new("background", 0.5)]);
    }

    #[test]
    fn per_tag_prefers_site_class_pair() {
        let (tags, source) = extract_omega_by_tags(BRANCH_SITE_OUTPUT).unwrap();
        assert_eq!(source, TagSource::SiteClassPair);
        assert_eq!(
            tags,
            vec![
                TaggedOmega::new("background", 1.0),
                TaggedOmega::new("foreground", 1.81018),
            ]
        );
    }

    #[test]
    fn per_tag_falls_back_to_distinct_table_values() {
        let (tags, source) = extract_omega_by_tags(&table(&["0.8", "0.2", "0.2", "0.8"])).unwrap();
        assert_eq!(source, TagSource::BranchTable);
        assert_eq!(
            tags,
            vec![TaggedOmega::new("background", 0.2), TaggedOmega::new("#1", 0.8)]
        );
        assert!(extract_omega_by_tags("nothing").is_none());
    }

    #[test]
    fn site_classes_zip_positionally() {
        let classes = extract_site_classes(BRANCH_SITE_OUTPUT);
        assert_eq!(classes.len(), 4);
        assert_eq!(classes[2].label, "2a");
        assert_eq!(classes[2].proportion, 0.01156);
        assert_eq!(classes[2].background_w, 0.09233);
        assert_eq!(classes[2].foreground_w, 1.81018);
        let truncated = "site class 0 1\nproportion 0.5 0.5\nbackground w 0.1 1.0\n";
        assert!(extract_site_classes(truncated).is_empty());
    }

    #[test]
    fn family_selects_one_representation() {
        let mut warnings = vec![];
        assert_eq!(
            estimate_omega(BRANCH_SITE_OUTPUT, ModelFamily::BranchSite, &mut warnings).kind(),
            "site_classes"
        );
        assert_eq!(
            estimate_omega(M0_OUTPUT, ModelFamily::FreeRatio, &mut warnings).kind(),
            "per_branch"
        );
        assert!(warnings.is_empty());
        let branch = estimate_omega(M0_OUTPUT, ModelFamily::Branch, &mut warnings);
        assert_eq!(branch.kind(), "per_tag");
        assert_eq!(warnings.len(), 1);
        assert_eq!(branch.cell(), "background=0.400000;#1=0.420000;#2=0.440000");
    }

    #[test]
    fn time_tree_and_stop_mentions() {
        assert_eq!(extract_time_used(M0_OUTPUT), Some(5.0));
        assert_eq!(extract_time_used("Time used: 1:02:03"), Some(3723.0));
        assert_eq!(extract_tree(M0_OUTPUT).unwrap(), "((1: 0.1, 2: 0.2): 0.05, 3: 0.3);");
        assert_eq!(count_stop_codon_mentions("Stop codon TAG\nno\nstop codon TGA"), 2);
    }

    #[test]
    fn parse_output_collects_everything() {
        let parsed = parse_output(M0_OUTPUT, ModelFamily::Site);
        assert_eq!(parsed.lnl, Some(-1234.56789));
        assert_eq!(parsed.np, Some(5));
        assert_eq!(parsed.omega.global(), Some(0.42));
        assert_eq!(parsed.omega.cell(), "0.420000");
        assert_eq!(OmegaEstimate::NotApplicable.cell(), "NA");
    }
}
