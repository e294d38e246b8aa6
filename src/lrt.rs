//! Likelihood-ratio tests between nested models of the same gene.

use crate::{
    models::{LrtComparison, ModelCatalog},
    runner::{BatchResults, RunResult},
};
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

pub const ALPHA_05: f64 = 0.05;
pub const ALPHA_01: f64 = 0.01;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LrtTest {
    pub gene: String,
    pub null: String,
    pub alternative: String,
    pub null_lnl: f64,
    pub alt_lnl: f64,
    pub null_np: Option<u32>,
    pub alt_np: Option<u32>,
    /// 2 * (alt lnL - null lnL)
    pub statistic: f64,
    pub df: u32,
    pub p_value: f64,
    pub significant_05: bool,
    pub significant_01: bool,
}

/// Why a gene does not contribute to a comparison.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LrtRejection {
    MissingResult { model: String },
    MissingLnl { model: String },
    ZeroDf,
    NegativeStatistic { statistic: f64 },
}

/// Upper tail of the chi-square distribution; 1.0 for a statistic of zero.
pub fn chi_square_p_value(statistic: f64, df: u32) -> f64 {
    if statistic <= 0.0 || df == 0 {
        return 1.0;
    }
    match ChiSquared::new(df as f64) {
        Ok(dist) => dist.sf(statistic).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

fn usable_lnl(result: Option<&RunResult>, model: &str) -> Result<(f64, Option<u32>), LrtRejection> {
    let result = result.ok_or_else(|| LrtRejection::MissingResult {
        model: model.to_string(),
    })?;
    let lnl = result.usable_lnl().ok_or_else(|| LrtRejection::MissingLnl {
        model: model.to_string(),
    })?;
    Ok((lnl, result.np))
}

/// df is the parameter-count difference; the comparison's fallback df is used
/// only when either count is unknown.
pub fn likelihood_ratio_test(
    gene: &str,
    comparison: &LrtComparison,
    null: Option<&RunResult>,
    alternative: Option<&RunResult>,
) -> Result<LrtTest, LrtRejection> {
    let (null_lnl, null_np) = usable_lnl(null, &comparison.null)?;
    let (alt_lnl, alt_np) = usable_lnl(alternative, &comparison.alternative)?;
    let df = match (null_np, alt_np) {
        (Some(n), Some(a)) => n.abs_diff(a),
        _ => comparison.df,
    };
    if df == 0 {
        return Err(LrtRejection::ZeroDf);
    }
    let statistic = 2.0 * (alt_lnl - null_lnl);
    if statistic < 0.0 {
        return Err(LrtRejection::NegativeStatistic { statistic });
    }
    let p_value = chi_square_p_value(statistic, df);
    Ok(LrtTest {
        gene: gene.to_string(),
        null: comparison.null.clone(),
        alternative: comparison.alternative.clone(),
        null_lnl,
        alt_lnl,
        null_np,
        alt_np,
        statistic,
        df,
        p_value,
        significant_05: p_value < ALPHA_05,
        significant_01: p_value < ALPHA_01,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub comparison: LrtComparison,
    pub tests: Vec<LrtTest>,
    pub rejected: Vec<(String, LrtRejection)>,
}

impl ComparisonSummary {
    pub fn valid(&self) -> usize {
        self.tests.len()
    }

    pub fn significant_05(&self) -> usize {
        self.tests.iter().filter(|t| t.significant_05).count()
    }

    pub fn significant_01(&self) -> usize {
        self.tests.iter().filter(|t| t.significant_01).count()
    }

    /// Share of valid genes, in percent; 0 when no gene was valid.
    pub fn percent(&self, count: usize) -> f64 {
        if self.tests.is_empty() {
            0.0
        } else {
            100.0 * count as f64 / self.tests.len() as f64
        }
    }

    pub fn test_for(&self, gene: &str) -> Option<&LrtTest> {
        self.tests.iter().find(|t| t.gene == gene)
    }
}

/// Runs every catalog comparison whose two models are both in `models`,
/// over every gene.
pub fn run_lrt(catalog: &ModelCatalog, results: &BatchResults, models: &[String]) -> Vec<ComparisonSummary> {
    catalog
        .applicable_comparisons(models)
        .into_iter()
        .map(|comparison| {
            let mut summary = ComparisonSummary {
                comparison: comparison.clone(),
                tests: vec![],
                rejected: vec![],
            };
            for (gene, set) in results {
                match likelihood_ratio_test(
                    gene,
                    comparison,
                    set.get(&comparison.null),
                    set.get(&comparison.alternative),
                ) {
                    Ok(test) => summary.tests.push(test),
                    Err(reason) => {
                        log::debug!(
                            "LRT {} vs {} skipped for {gene}: {reason:?}",
                            comparison.null,
                            comparison.alternative
                        );
                        summary.rejected.push((gene.clone(), reason));
                    }
                }
            }
            summary
        })
        .collect()
}
