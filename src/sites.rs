//! Positively selected sites from the BEB and NEB tables, plus the codon
//! lookup against the alignment.

use crate::error::BatchError;
use bio::io::fasta;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{path::Path, sync::LazyLock};

static BEB_SECTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?is)BEB\)?.*?analysis.*?Positively selected sites.*?\n\s*\(amino acids refer to.*?\)\s*\n\s*Pr\(w>1\).*?\n\n(.*?)(?:\n\n|Time used:|$)",
    )
    .ok()
});

static NEB_SECTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?is)NEB\)?\s*analysis.*?Positively selected sites.*?\n\s*\(amino acids refer to.*?\)\s*\n\s*Pr\(w>1\).*?\n\n(.*?)(?:\n\n|Bayes|Time used:|$)",
    )
    .ok()
});

static SITE_ROW: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\s*(\d+)\s+([A-Z])\s+([\d.]+)(\**)\s+([\d.]+)\s*(?:\+-|±)\s*([\d.]+)").ok()
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PosteriorMethod {
    #[serde(rename = "BEB")]
    Beb,
    #[serde(rename = "NEB")]
    Neb,
}

impl PosteriorMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beb => "BEB",
            Self::Neb => "NEB",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectedSite {
    /// 1-based amino-acid position.
    pub position: u32,
    pub amino_acid: char,
    /// Posterior probability that w > 1.
    pub probability: f64,
    pub significance: String,
    pub post_mean: f64,
    pub post_se: f64,
    pub omega_lower: f64,
    pub omega_upper: f64,
    pub significant_95: bool,
    pub significant_99: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codon: Option<String>,
}

fn parse_site_row(line: &str) -> Option<SelectedSite> {
    let caps = SITE_ROW.as_ref()?.captures(line)?;
    let probability: f64 = caps.get(3)?.as_str().parse().ok()?;
    let post_mean: f64 = caps.get(5)?.as_str().parse().ok()?;
    let post_se: f64 = caps.get(6)?.as_str().parse().ok()?;
    Some(SelectedSite {
        position: caps.get(1)?.as_str().parse().ok()?,
        amino_acid: caps.get(2)?.as_str().chars().next()?,
        probability,
        significance: caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
        post_mean,
        post_se,
        omega_lower: (post_mean - post_se).max(0.0),
        omega_upper: post_mean + post_se,
        significant_95: probability >= 0.95,
        significant_99: probability >= 0.99,
        codon: None,
    })
}

/// Rows of the BEB or NEB "Positively selected sites" table; empty when the
/// section is missing.
pub fn parse_selected_sites(text: &str, method: PosteriorMethod) -> Vec<SelectedSite> {
    let section = match method {
        PosteriorMethod::Beb => BEB_SECTION.as_ref(),
        PosteriorMethod::Neb => NEB_SECTION.as_ref(),
    };
    let Some(body) = section
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
    else {
        return vec![];
    };
    body.as_str()
        .trim()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(parse_site_row)
        .collect()
}

/// BEB rows when present, NEB rows otherwise.
pub fn parse_best_selected_sites(text: &str) -> Option<(PosteriorMethod, Vec<SelectedSite>)> {
    [PosteriorMethod::Beb, PosteriorMethod::Neb]
        .into_iter()
        .map(|m| (m, parse_selected_sites(text, m)))
        .find(|(_, sites)| !sites.is_empty())
}

/// Sites at or above `threshold`, most probable first.
pub fn filter_by_probability(sites: &[SelectedSite], threshold: f64) -> Vec<SelectedSite> {
    let mut out: Vec<SelectedSite> = sites
        .iter()
        .filter(|s| s.probability >= threshold)
        .cloned()
        .collect();
    out.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    out
}

/// Nucleotide sequence of the first record of an alignment.
pub fn first_sequence(path: &Path) -> Result<Option<Vec<u8>>, BatchError> {
    let reader = fasta::Reader::from_file(path).map_err(|e| BatchError::Fasta {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    match reader.records().next() {
        Some(Ok(record)) => Ok(Some(record.seq().to_vec())),
        Some(Err(e)) => Err(BatchError::Fasta {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
        None => Ok(None),
    }
}

pub fn codon_at(sequence: &[u8], position: u32) -> Option<String> {
    let start = (position.checked_sub(1)? as usize) * 3;
    let codon = sequence.get(start..start + 3)?;
    Some(String::from_utf8_lossy(codon).to_ascii_uppercase())
}

/// Fills `codon` from the first sequence of `fasta`. Positions past the end get `N/A`.
pub fn enrich_with_codons(sites: &mut [SelectedSite], fasta: &Path) -> Result<(), BatchError> {
    let Some(sequence) = first_sequence(fasta)? else {
        return Ok(());
    };
    for site in sites.iter_mut() {
        site.codon = Some(codon_at(&sequence, site.position).unwrap_or_else(|| "N/A".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const BEB_OUTPUT: &str = "\
Naive Empirical Bayes (NEB) analysis
Positively selected sites (*: P>95%; **: P>99%)
(amino acids refer to 1st sequence: human)

            Pr(w>1)     post mean +- SE for w

     3 K      0.700         1.500 +- 0.300

Bayes Empirical Bayes (BEB) analysis (Yang, Wong & Nielsen 2005. Mol. Biol. Evol. 22:1107-1118)
Positively selected sites (*: P>95%; **: P>99%)
(amino acids refer to 1st sequence: human)

            Pr(w>1)     post mean +- SE for w

     2 R      0.962*        2.345 +- 0.567
     4 S      0.995**       2.890 +- 3.100


The grid (see ternary graph for p0-p1)
";
}
