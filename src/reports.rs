//! Structured per-model reports: branch tables, positively selected sites
//! and trees annotated with branch ratios.

use crate::{
    branch_tree::{TreeNode, tree_with_omega},
    error::BatchError,
    models::{ModelCatalog, ModelFamily},
    output_parser::{BranchRow, extract_branch_omegas, parse_branch_table, read_output_text},
    sites::{
        PosteriorMethod, SelectedSite, enrich_with_codons, filter_by_probability,
        parse_best_selected_sites,
    },
    summary::{DiscoveredRun, NA, discover_runs},
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

pub const REPORTS_DIR_NAME: &str = "reports";
/// Posterior cut-off for `{model}_significant_sites.tsv`.
pub const SIGNIFICANT_SITE_PROBABILITY: f64 = 0.95;

#[derive(Clone, Debug, Default)]
pub struct ReportOptions {
    /// Defaults to `{results}/reports`.
    pub output_dir: Option<PathBuf>,
    /// Alignments named `{gene}.{ext}`, used to attach codons to selected sites.
    pub alignment_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct GeneTree {
    branch_omegas: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tree: Option<TreeNode>,
}

#[derive(Clone, Debug, Serialize)]
struct TreeReport<'a> {
    model: &'a str,
    genes: BTreeMap<String, GeneTree>,
}

fn reports_for_family(family: ModelFamily) -> bool {
    matches!(family, ModelFamily::Branch | ModelFamily::FreeRatio)
}

fn alignment_for(dir: &Path, gene: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.file_stem().is_some_and(|s| s == gene))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn float_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| NA.to_string())
}

fn write_branch_summary(path: &Path, rows: &[(String, BranchRow)]) -> Result<(), BatchError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["gene", "branch", "t", "N", "S", "dN/dS", "dN", "dS", "N*dN", "S*dS"])?;
    for (gene, row) in rows {
        writer.write_record([
            gene.clone(),
            row.branch.clone(),
            float_cell(row.t),
            float_cell(row.n),
            float_cell(row.s),
            row.omega.to_string(),
            float_cell(row.dn),
            float_cell(row.ds),
            float_cell(row.n_dn),
            float_cell(row.s_ds),
        ])?;
    }
    writer.flush().map_err(|e| BatchError::io_at("write", path, e))?;
    Ok(())
}

fn write_selected_sites(
    path: &Path,
    rows: &[(String, PosteriorMethod, SelectedSite)],
) -> Result<(), BatchError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "gene",
        "method",
        "position",
        "amino_acid",
        "codon",
        "probability",
        "significance",
        "post_mean",
        "post_se",
        "omega_lower",
        "omega_upper",
        "significant_95",
        "significant_99",
    ])?;
    for (gene, method, site) in rows {
        writer.write_record([
            gene.clone(),
            method.as_str().to_string(),
            site.position.to_string(),
            site.amino_acid.to_string(),
            site.codon.clone().unwrap_or_else(|| NA.to_string()),
            format!("{:.3}", site.probability),
            site.significance.clone(),
            format!("{:.3}", site.post_mean),
            format!("{:.3}", site.post_se),
            format!("{:.3}", site.omega_lower),
            format!("{:.3}", site.omega_upper),
            site.significant_95.to_string(),
            site.significant_99.to_string(),
        ])?;
    }
    writer.flush().map_err(|e| BatchError::io_at("write", path, e))?;
    Ok(())
}

struct ModelReport {
    branch_rows: Vec<(String, BranchRow)>,
    sites: Vec<(String, PosteriorMethod, SelectedSite)>,
    significant: Vec<(String, PosteriorMethod, SelectedSite)>,
    trees: BTreeMap<String, GeneTree>,
}

fn collect_model(runs: &[&DiscoveredRun], family: ModelFamily, options: &ReportOptions) -> ModelReport {
    let mut report = ModelReport {
        branch_rows: vec![],
        sites: vec![],
        significant: vec![],
        trees: BTreeMap::new(),
    };
    for run in runs {
        let text = match read_output_text(&run.output_file) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("{e}");
                continue;
            }
        };
        if reports_for_family(family) {
            report
                .branch_rows
                .extend(parse_branch_table(&text).into_iter().map(|r| (run.gene.clone(), r)));
            let branch_omegas = extract_branch_omegas(&text);
            if !branch_omegas.is_empty() {
                report.trees.insert(
                    run.gene.clone(),
                    GeneTree {
                        branch_omegas,
                        tree: tree_with_omega(&text),
                    },
                );
            }
        }
        if let Some((method, mut sites)) = parse_best_selected_sites(&text) {
            if let Some(fasta) = options
                .alignment_dir
                .as_deref()
                .and_then(|dir| alignment_for(dir, &run.gene))
            {
                if let Err(e) = enrich_with_codons(&mut sites, &fasta) {
                    log::warn!("{e}");
                }
            }
            report.significant.extend(
                filter_by_probability(&sites, SIGNIFICANT_SITE_PROBABILITY)
                    .into_iter()
                    .map(|s| (run.gene.clone(), method, s)),
            );
            report
                .sites
                .extend(sites.into_iter().map(|s| (run.gene.clone(), method, s)));
        }
    }
    report
}

/// Writes every report that has content and returns the files written.
pub fn generate_reports(
    results_root: &Path,
    catalog: &ModelCatalog,
    options: &ReportOptions,
) -> Result<Vec<PathBuf>, BatchError> {
    let discovery = discover_runs(results_root, catalog)?;
    let out_dir = options
        .output_dir
        .clone()
        .unwrap_or_else(|| results_root.join(REPORTS_DIR_NAME));
    fs::create_dir_all(&out_dir).map_err(|e| BatchError::io_at("create", &out_dir, e))?;

    let mut written = vec![];
    for model in &discovery.models {
        let family = catalog
            .profile(model)
            .map(|p| p.family())
            .unwrap_or(ModelFamily::Site);
        let runs: Vec<&DiscoveredRun> = discovery.runs.iter().filter(|r| &r.model == model).collect();
        let report = collect_model(&runs, family, options);

        if !report.branch_rows.is_empty() {
            let path = out_dir.join(format!("{model}_branches_summary.tsv"));
            write_branch_summary(&path, &report.branch_rows)?;
            written.push(path);
        }
        if !report.sites.is_empty() {
            let path = out_dir.join(format!("{model}_positively_selected_sites.tsv"));
            write_selected_sites(&path, &report.sites)?;
            written.push(path);
        }
        if !report.significant.is_empty() {
            let path = out_dir.join(format!("{model}_significant_sites.tsv"));
            write_selected_sites(&path, &report.significant)?;
            written.push(path);
        }
        if !report.trees.is_empty() {
            let path = out_dir.join(format!("{model}_tree_omega.json"));
            let text = serde_json::to_string_pretty(&TreeReport {
                model,
                genes: report.trees,
            })?;
            fs::write(&path, text).map_err(|e| BatchError::io_at("write", &path, e))?;
            written.push(path);
        }
    }
    log::info!("Wrote {} report file(s) to '{}'", written.len(), out_dir.display());
    Ok(written)
}
