//! Summary tables and LRT reports, written live by the orchestrator or
//! rebuilt from the model directories of an earlier batch.

use crate::{
    error::BatchError,
    lrt::{ComparisonSummary, likelihood_ratio_test, run_lrt},
    models::{LrtComparison, ModelCatalog, ModelFamily},
    output_parser::{OmegaEstimate, parse_output, read_output_text},
    run_log::BATCH_LOG_FILE_NAME,
    runner::{BatchResults, GeneResultSet, RunResult, RunStatus},
};
use itertools::Itertools;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

pub const SUMMARY_FILE_NAME: &str = "analysis_summary.tsv";
pub const LRT_REPORT_FILE_NAME: &str = "LRT_results.txt";
pub const LRT_DETAILED_FILE_NAME: &str = "lrt_comparisons_detailed.tsv";
pub const SITE_CLASS_LABELS: [&str; 4] = ["0", "1", "2a", "2b"];
pub const NA: &str = "NA";

const RULE: &str = "================================================================================";

pub fn output_file_name(gene: &str, model: &str) -> String {
    format!("{gene}_{model}_results.txt")
}

pub fn sidecar_path(model_dir: &Path, gene: &str, model: &str) -> PathBuf {
    model_dir.join(format!("{gene}_{model}_run.json"))
}

pub fn write_run_sidecar(model_dir: &Path, result: &RunResult) -> Result<PathBuf, BatchError> {
    let path = sidecar_path(model_dir, &result.gene, &result.model);
    let text = serde_json::to_string_pretty(result)?;
    fs::write(&path, text).map_err(|e| BatchError::io_at("write", &path, e))?;
    Ok(path)
}

pub fn read_run_sidecar(path: &Path) -> Option<RunResult> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(result) => Some(result),
        Err(e) => {
            log::debug!("Ignoring unreadable run record '{}': {e}", path.display());
            None
        }
    }
}

fn opt_cell<T>(value: Option<T>, f: impl Fn(T) -> String) -> String {
    value.map(f).unwrap_or_else(|| NA.to_string())
}

/// Branch-site models and any model whose results carry site classes get
/// per-class columns.
fn shows_site_classes(catalog: &ModelCatalog, model: &str, results: &BatchResults) -> bool {
    catalog
        .profile(model)
        .is_some_and(|p| p.family() == ModelFamily::BranchSite)
        || results.values().any(|set| {
            set.get(model)
                .is_some_and(|r| matches!(r.omega, OmegaEstimate::SiteClasses { .. }))
        })
}

struct SummaryLayout<'a> {
    models: &'a [String],
    class_columns: Vec<bool>,
    comparisons: Vec<&'a LrtComparison>,
}

impl<'a> SummaryLayout<'a> {
    fn new(catalog: &'a ModelCatalog, models: &'a [String], results: &BatchResults) -> Self {
        Self {
            models,
            class_columns: models
                .iter()
                .map(|m| shows_site_classes(catalog, m, results))
                .collect(),
            comparisons: catalog.applicable_comparisons(models),
        }
    }

    fn header(&self) -> Vec<String> {
        let mut out = vec!["gene".to_string()];
        for (model, classes) in self.models.iter().zip(&self.class_columns) {
            for metric in ["lnL", "np", "omega", "time", "stops"] {
                out.push(format!("{model}_{metric}"));
            }
            if *classes {
                for label in SITE_CLASS_LABELS {
                    for part in ["prop", "bg_w", "fg_w"] {
                        out.push(format!("{model}_class{label}_{part}"));
                    }
                }
            }
        }
        out.extend(self.comparisons.iter().map(|c| c.column_name()));
        out
    }

    fn row(&self, gene: &str, set: &GeneResultSet) -> Vec<String> {
        let mut out = vec![gene.to_string()];
        for (model, classes) in self.models.iter().zip(&self.class_columns) {
            let result = set.get(model).filter(|r| r.status.has_output());
            out.push(opt_cell(result.and_then(|r| r.lnl), |v| format!("{v:.6}")));
            out.push(opt_cell(result.and_then(|r| r.np), |v| v.to_string()));
            out.push(
                result
                    .map(|r| r.omega.cell())
                    .unwrap_or_else(|| NA.to_string()),
            );
            out.push(opt_cell(result.map(|r| r.elapsed_secs), |v| format!("{v:.2}")));
            out.push(opt_cell(result.map(|r| r.stop_count), |v| v.to_string()));
            if *classes {
                let classes = match result.map(|r| &r.omega) {
                    Some(OmegaEstimate::SiteClasses { classes }) => classes.as_slice(),
                    _ => &[],
                };
                for label in SITE_CLASS_LABELS {
                    let class = classes.iter().find(|c| c.label == label);
                    out.push(opt_cell(class, |c| format!("{:.6}", c.proportion)));
                    out.push(opt_cell(class, |c| format!("{:.6}", c.background_w)));
                    out.push(opt_cell(class, |c| format!("{:.6}", c.foreground_w)));
                }
            }
        }
        for comparison in &self.comparisons {
            let test = likelihood_ratio_test(
                gene,
                comparison,
                set.get(&comparison.null),
                set.get(&comparison.alternative),
            );
            out.push(opt_cell(test.ok(), |t| format!("{:.6}", t.statistic)));
        }
        out
    }
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<fs::File>, BatchError> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_path(path)?)
}

/// One row per gene; cells without a usable result are `NA`.
pub fn write_summary(
    path: &Path,
    catalog: &ModelCatalog,
    models: &[String],
    results: &BatchResults,
) -> Result<(), BatchError> {
    let layout = SummaryLayout::new(catalog, models, results);
    let mut writer = tsv_writer(path)?;
    writer.write_record(layout.header())?;
    for (gene, set) in results {
        writer.write_record(layout.row(gene, set))?;
    }
    writer.flush().map_err(|e| BatchError::io_at("write", path, e))?;
    Ok(())
}

fn verdict(test: &crate::lrt::LrtTest) -> String {
    if test.significant_01 {
        format!("{} significantly better (p < 0.01)", test.alternative)
    } else if test.significant_05 {
        format!("{} significantly better (p < 0.05)", test.alternative)
    } else {
        "No significant difference".to_string()
    }
}

pub fn render_lrt_report(summaries: &[ComparisonSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}\nLIKELIHOOD RATIO TEST (LRT) RESULTS\n{RULE}\n");
    if summaries.is_empty() {
        out.push_str("No valid model comparisons found.\n");
        out.push_str("For LRT, you need pairs of nested models.\n");
        return out;
    }
    for summary in summaries {
        let c = &summary.comparison;
        let _ = writeln!(
            out,
            "\n{RULE}\nCOMPARISON: {} (null) vs {} (alternative)\nDescription: {}\n{RULE}\n",
            c.null, c.alternative, c.description
        );
        for test in &summary.tests {
            let np = |v: Option<u32>| opt_cell(v, |n| n.to_string());
            let _ = writeln!(out, "Gene: {}", test.gene);
            let _ = writeln!(out, "  lnL {}: {:.6} (np={})", c.null, test.null_lnl, np(test.null_np));
            let _ = writeln!(out, "  lnL {}: {:.6} (np={})", c.alternative, test.alt_lnl, np(test.alt_np));
            let _ = writeln!(out, "  2Δl = {:.6}", test.statistic);
            let _ = writeln!(out, "  df = {}", test.df);
            let _ = writeln!(out, "  p-value = {:.6e}", test.p_value);
            let _ = writeln!(out, "  Result: {}", verdict(test));
            let _ = writeln!(out, "\n{}\n", "-".repeat(60));
        }
        let (s05, s01) = (summary.significant_05(), summary.significant_01());
        let _ = writeln!(out, "\nSUMMARY:");
        let _ = writeln!(out, "  Total genes analyzed: {}", summary.valid());
        let _ = writeln!(out, "  Significant at p < 0.05: {s05} ({:.1}%)", summary.percent(s05));
        let _ = writeln!(out, "  Significant at p < 0.01: {s01} ({:.1}%)", summary.percent(s01));
        if !summary.rejected.is_empty() {
            let _ = writeln!(out, "  Excluded genes: {}", summary.rejected.len());
        }
        out.push('\n');
    }
    out
}

pub fn write_lrt_report(path: &Path, summaries: &[ComparisonSummary]) -> Result<(), BatchError> {
    fs::write(path, render_lrt_report(summaries)).map_err(|e| BatchError::io_at("write", path, e))
}

/// One row per valid (gene, comparison).
pub fn write_lrt_detailed(
    path: &Path,
    summaries: &[ComparisonSummary],
    results: &BatchResults,
) -> Result<(), BatchError> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "gene",
        "comparison",
        "null",
        "alternative",
        "null_lnL",
        "alt_lnL",
        "statistic",
        "df",
        "p_value",
        "significant_0.05",
        "significant_0.01",
        "null_omega",
        "alt_omega",
    ])?;
    for summary in summaries {
        for test in &summary.tests {
            let omega = |model: &str| {
                results
                    .get(&test.gene)
                    .and_then(|set| set.get(model))
                    .map(|r| r.omega.cell())
                    .unwrap_or_else(|| NA.to_string())
            };
            writer.write_record([
                test.gene.clone(),
                summary.comparison.group.clone(),
                test.null.clone(),
                test.alternative.clone(),
                format!("{:.6}", test.null_lnl),
                format!("{:.6}", test.alt_lnl),
                format!("{:.6}", test.statistic),
                test.df.to_string(),
                format!("{:.6e}", test.p_value),
                test.significant_05.to_string(),
                test.significant_01.to_string(),
                omega(&test.null),
                omega(&test.alternative),
            ])?;
        }
    }
    writer.flush().map_err(|e| BatchError::io_at("write", path, e))?;
    Ok(())
}

/// An output file found below a results directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredRun {
    pub gene: String,
    /// Current model name, even when stored under a legacy one.
    pub model: String,
    pub model_dir: PathBuf,
    pub output_file: PathBuf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Catalog order.
    pub models: Vec<String>,
    pub genes: Vec<String>,
    pub runs: Vec<DiscoveredRun>,
}

impl Discovery {
    pub fn run(&self, gene: &str, model: &str) -> Option<&DiscoveredRun> {
        self.runs.iter().find(|r| r.gene == gene && r.model == model)
    }
}

/// Finds `{gene}_{model}_results.txt` files in every model directory, under
/// current and legacy model names alike.
pub fn discover_runs(root: &Path, catalog: &ModelCatalog) -> Result<Discovery, BatchError> {
    if !root.is_dir() {
        return Err(BatchError::config(format!(
            "Results directory '{}' does not exist",
            root.display()
        )));
    }
    let mut discovery = Discovery::default();
    let mut genes = BTreeSet::new();
    for profile in catalog.profiles() {
        let variants = catalog.name_variants(&profile.id);
        for dir_name in &variants {
            let model_dir = root.join(dir_name);
            let Ok(entries) = fs::read_dir(&model_dir) else {
                continue;
            };
            let names = entries
                .flatten()
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .sorted();
            for name in names {
                let gene = variants.iter().find_map(|variant| {
                    name.strip_suffix(&output_file_name("", variant))
                        .filter(|g| !g.is_empty())
                });
                let Some(gene) = gene else {
                    continue;
                };
                if discovery.run(gene, &profile.id).is_some() {
                    continue;
                }
                genes.insert(gene.to_string());
                discovery.runs.push(DiscoveredRun {
                    gene: gene.to_string(),
                    model: profile.id.clone(),
                    model_dir: model_dir.clone(),
                    output_file: model_dir.join(&name),
                });
            }
        }
        if discovery.runs.iter().any(|r| r.model == profile.id) {
            discovery.models.push(profile.id.clone());
        }
    }
    discovery.genes = genes.into_iter().collect();
    Ok(discovery)
}

/// Re-parses one output file. A run record next to it supplies status and
/// exit code when present.
pub fn result_from_output(catalog: &ModelCatalog, run: &DiscoveredRun) -> RunResult {
    let text = match read_output_text(&run.output_file) {
        Ok(text) => text,
        Err(e) => {
            let mut result = RunResult::empty(&run.gene, &run.model, RunStatus::Failed);
            result.warnings.push(e);
            return result;
        }
    };
    let family = catalog
        .profile(&run.model)
        .map(|p| p.family())
        .unwrap_or(ModelFamily::Site);
    let parsed = parse_output(&text, family);
    let record = read_run_sidecar(&sidecar_path(&run.model_dir, &run.gene, &run.model));
    let status = record
        .as_ref()
        .map(|r| r.status)
        .filter(|s| s.has_output())
        .unwrap_or(RunStatus::Success);
    RunResult {
        gene: run.gene.clone(),
        model: run.model.clone(),
        status,
        exit_code: record.as_ref().and_then(|r| r.exit_code),
        lnl: parsed.lnl,
        np: parsed.np,
        omega: parsed.omega,
        elapsed_secs: parsed
            .time_used_secs
            .or(record.as_ref().map(|r| r.elapsed_secs))
            .unwrap_or(0.0),
        stop_count: parsed.stop_codon_mentions,
        prompts_answered: record.as_ref().map(|r| r.prompts_answered).unwrap_or(0),
        stop_details: record.map(|r| r.stop_details).unwrap_or_default(),
        output_file: Some(run.output_file.clone()),
        warnings: parsed.warnings,
    }
}

fn render_regenerated_log(root: &Path, models: &[String], results: &BatchResults) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}\nCODEML BATCH ANALYSIS LOG (REGENERATED)\n{RULE}");
    let _ = writeln!(
        out,
        "Regenerated at: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "Results folder: {}\n{RULE}\n", root.display());
    let _ = writeln!(out, "ANALYSIS SUMMARY:\n{}", "-".repeat(80));
    let _ = writeln!(out, "Models found: {}", models.join(", "));
    let _ = writeln!(out, "Genes found: {} genes\n", results.len());
    let _ = writeln!(out, "DETAILED RESULTS:\n{}\n", "-".repeat(80));
    for (gene, set) in results {
        let _ = writeln!(out, "Gene: {gene}\n{}", "-".repeat(40));
        for model in models {
            match set.get(model) {
                Some(r) => {
                    let lnl = opt_cell(r.lnl, |v| format!("{v:.6}"));
                    let np = opt_cell(r.np, |v| v.to_string());
                    let _ = writeln!(out, "  {model:20} | lnL = {lnl:>12} | np = {np:>2}");
                }
                None => {
                    let _ = writeln!(out, "  {model:20} | Not found");
                }
            }
        }
        out.push('\n');
    }
    let _ = writeln!(out, "{RULE}\nEND OF LOG\n{RULE}");
    out
}

#[derive(Clone, Debug)]
pub struct Regeneration {
    pub models: Vec<String>,
    pub results: BatchResults,
    pub comparisons: Vec<ComparisonSummary>,
    pub files: Vec<PathBuf>,
}

/// Rebuilds the summary, both LRT reports and the batch log from the output
/// files of an earlier batch, without running codeml.
pub fn regenerate_from_disk(root: &Path, catalog: &ModelCatalog) -> Result<Regeneration, BatchError> {
    let discovery = discover_runs(root, catalog)?;
    if discovery.models.is_empty() {
        return Err(BatchError::Message(format!(
            "No model folders with results found in '{}'",
            root.display()
        )));
    }
    let mut results: BatchResults = BTreeMap::new();
    for run in &discovery.runs {
        let result = result_from_output(catalog, run);
        log::info!(
            "{} {}: lnL={}",
            run.gene,
            run.model,
            opt_cell(result.lnl, |v| v.to_string())
        );
        results
            .entry(run.gene.clone())
            .or_default()
            .insert(run.model.clone(), result);
    }
    let comparisons = run_lrt(catalog, &results, &discovery.models);

    let summary = root.join(SUMMARY_FILE_NAME);
    write_summary(&summary, catalog, &discovery.models, &results)?;
    let report = root.join(LRT_REPORT_FILE_NAME);
    write_lrt_report(&report, &comparisons)?;
    let detailed = root.join(LRT_DETAILED_FILE_NAME);
    write_lrt_detailed(&detailed, &comparisons, &results)?;
    let log_path = root.join(BATCH_LOG_FILE_NAME);
    fs::write(&log_path, render_regenerated_log(root, &discovery.models, &results))
        .map_err(|e| BatchError::io_at("write", &log_path, e))?;

    Ok(Regeneration {
        models: discovery.models,
        results,
        comparisons,
        files: vec![summary, log_path, report, detailed],
    })
}
