//! Drives the gene × model matrix: one codeml run at a time, with pause,
//! continue and abort signals from the caller.

use crate::{
    about,
    branch_tree::has_foreground_tags,
    config::{BatchConfig, BatchPlan, gene_name},
    control_file::{ControlFiles, patch_caller_control_file, render_control_file},
    error::BatchError,
    executable::resolve_codeml,
    lrt::{ComparisonSummary, run_lrt},
    models::{ModelCatalog, ModelFamily, ModelProfile},
    output_parser::{parse_output, read_output_text},
    reports::{ReportOptions, generate_reports},
    run_log::{BATCH_LOG_FILE_NAME, BatchEvent, EventSink, RunLog},
    runner::{
        BatchResults, GeneResultSet, RunRequest, RunResult, RunStatus, TreeInput, run_codeml,
    },
    signals::BatchSignals,
    summary::{
        LRT_DETAILED_FILE_NAME, LRT_REPORT_FILE_NAME, SUMMARY_FILE_NAME, output_file_name,
        write_lrt_detailed, write_lrt_report, write_run_sidecar, write_summary,
    },
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Foreground-tagged tree texts, read once per batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabeledTrees {
    pub branch: Option<String>,
    pub branch_site: Option<String>,
}

impl LabeledTrees {
    pub fn load(config: &BatchConfig) -> Result<Self, BatchError> {
        let read = |path: &Option<PathBuf>| -> Result<Option<String>, BatchError> {
            path.as_deref()
                .map(|p| {
                    fs::read_to_string(p)
                        .map(|t| t.trim().to_string())
                        .map_err(|e| BatchError::io_at("read", p, e))
                })
                .transpose()
        };
        Ok(Self {
            branch: read(&config.labeled_tree)?,
            branch_site: read(&config.labeled_tree_branchsite)?,
        })
    }

    /// Branch models use the branch tree; branch-site models prefer their own
    /// tree and fall back to a branch tree that carries `#1` tags.
    pub fn for_family(&self, family: ModelFamily) -> Option<&str> {
        match family {
            ModelFamily::Branch => self.branch.as_deref(),
            ModelFamily::BranchSite => self
                .branch_site
                .as_deref()
                .or_else(|| self.branch.as_deref().filter(|t| has_foreground_tags(t))),
            ModelFamily::Site | ModelFamily::FreeRatio => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchOutcome {
    pub models: Vec<String>,
    pub results: BatchResults,
    pub comparisons: Vec<ComparisonSummary>,
    pub processed: usize,
    pub total: usize,
    pub aborted: bool,
    pub summary_path: PathBuf,
    pub reports: Vec<PathBuf>,
}

/// Relative paths with a directory part are made absolute, since codeml runs
/// inside its working directory.
fn absolute_program(program: &str) -> String {
    let path = Path::new(program);
    if path.components().count() > 1 && path.is_relative() {
        if let Ok(abs) = fs::canonicalize(path) {
            return abs.display().to_string();
        }
    }
    program.to_string()
}

pub struct BatchOrchestrator<'a> {
    catalog: &'a ModelCatalog,
    config: BatchConfig,
    signals: Arc<BatchSignals>,
    sink: Option<EventSink>,
    base_dir: PathBuf,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(catalog: &'a ModelCatalog, config: BatchConfig, signals: Arc<BatchSignals>) -> Self {
        Self {
            catalog,
            config,
            signals,
            sink: None,
            base_dir: std::env::current_dir().unwrap_or_default(),
        }
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Directory searched for a bundled `bin/codeml`.
    pub fn with_base_dir(mut self, base_dir: PathBuf) -> Self {
        self.base_dir = base_dir;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn resolve_profiles(&self, models: &[String]) -> Result<Vec<ModelProfile>, BatchError> {
        models
            .iter()
            .map(|m| {
                self.catalog
                    .resolve(m, self.config.override_for(self.catalog, m), self.config.omega)
            })
            .collect()
    }

    /// Validates the configuration, then runs every gene and model in order.
    /// Configuration problems are returned before anything is spawned; run
    /// failures end up as `NA` cells.
    pub fn run(&self) -> Result<BatchOutcome, BatchError> {
        let BatchPlan {
            sequence_files,
            models,
        } = self.config.validate(self.catalog)?;
        let profiles = self.resolve_profiles(&models)?;
        let trees = LabeledTrees::load(&self.config)?;
        let output_dir = &self.config.output_dir;
        fs::create_dir_all(output_dir).map_err(|e| BatchError::io_at("create", output_dir, e))?;
        let log = Arc::new(RunLog::open(
            &output_dir.join(BATCH_LOG_FILE_NAME),
            self.sink.clone(),
        )?);

        let executable = resolve_codeml(self.config.codeml_path.as_deref(), &self.base_dir);
        let command = vec![absolute_program(&executable.program)];
        log.line(&about::log_banner());
        log.line(&format!(
            "Batch started {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        log.line(&format!("codeml: {}", executable.label()));
        log.line(&format!("Genes: {}", sequence_files.len()));
        log.line(&format!("Models: {}", models.join(", ")));
        let requested: Vec<String> = self
            .config
            .models
            .iter()
            .map(|m| self.catalog.canonical_id(m))
            .collect();
        for model in models.iter().filter(|m| !requested.contains(m)) {
            log.line(&format!("Added {model} to complete nested comparisons"));
        }
        log.emit(&BatchEvent::BatchStarted {
            genes: sequence_files.len(),
            models: models.clone(),
        });

        let total = sequence_files.len();
        let summary_path = output_dir.join(SUMMARY_FILE_NAME);
        let mut results = BatchResults::new();
        let mut processed = 0;
        let mut aborted = false;

        'genes: for sequence_file in &sequence_files {
            if !self.signals.wait_while_paused() {
                aborted = true;
                break;
            }
            self.signals.clear_continue_all();
            let gene = gene_name(sequence_file);
            log.line(&format!("\n=== {gene} ({}/{total}) ===", processed + 1));
            log.emit(&BatchEvent::GeneStarted {
                gene: gene.clone(),
                processed,
                total,
            });

            let mut set = GeneResultSet::new();
            for profile in &profiles {
                if !self.signals.wait_while_paused() {
                    aborted = true;
                }
                let result = if aborted {
                    RunResult::empty(&gene, &profile.id, RunStatus::Aborted)
                } else {
                    self.run_one(&gene, sequence_file, profile, &trees, &command, &log)
                };
                log.emit(&BatchEvent::RunFinished {
                    gene: gene.clone(),
                    model: profile.id.clone(),
                    status: result.status,
                });
                set.insert(profile.id.clone(), result);
                if self.signals.is_aborted() {
                    aborted = true;
                    log.line("Abort requested; stopping batch");
                    results.insert(gene.clone(), set);
                    self.write_partial_summary(&summary_path, &models, &results, &log);
                    break 'genes;
                }
            }
            results.insert(gene.clone(), set);
            processed += 1;
            self.write_partial_summary(&summary_path, &models, &results, &log);
            log.emit(&BatchEvent::GeneFinished {
                gene,
                processed,
                total,
            });
        }

        let comparisons = if self.config.run_lrt {
            let comparisons = run_lrt(self.catalog, &results, &models);
            write_lrt_report(&output_dir.join(LRT_REPORT_FILE_NAME), &comparisons)?;
            write_lrt_detailed(&output_dir.join(LRT_DETAILED_FILE_NAME), &comparisons, &results)?;
            for c in &comparisons {
                log.line(&format!(
                    "LRT {} vs {}: {} valid, {} significant at 0.05",
                    c.comparison.null,
                    c.comparison.alternative,
                    c.valid(),
                    c.significant_05()
                ));
            }
            comparisons
        } else {
            vec![]
        };
        write_summary(&summary_path, self.catalog, &models, &results)?;

        let reports = if self.config.generate_reports {
            let options = ReportOptions {
                output_dir: None,
                alignment_dir: Some(self.config.input_dir.clone()),
            };
            match generate_reports(output_dir, self.catalog, &options) {
                Ok(files) => files,
                Err(e) => {
                    log.warn(&format!("Reports not generated: {e}"));
                    vec![]
                }
            }
        } else {
            vec![]
        };

        log.line(&format!(
            "Batch {} ({processed}/{total} genes)",
            if aborted { "aborted" } else { "finished" }
        ));
        log.emit(&BatchEvent::BatchFinished {
            processed,
            total,
            aborted,
        });
        Ok(BatchOutcome {
            models,
            results,
            comparisons,
            processed,
            total,
            aborted,
            summary_path,
            reports,
        })
    }

    fn write_partial_summary(&self, path: &Path, models: &[String], results: &BatchResults, log: &RunLog) {
        if let Err(e) = write_summary(path, self.catalog, models, results) {
            log.warn(&format!("Could not update summary: {e}"));
        }
    }

    fn control_text(&self, gene: &str, profile: &ModelProfile, files: &ControlFiles, log: &RunLog) -> String {
        if let Some(path) = self.config.ctl_path_for(self.catalog, &profile.id) {
            match fs::read_to_string(path) {
                Ok(text) => {
                    log.run_line(&profile.id, gene, &format!("Using control file {}", path.display()));
                    return patch_caller_control_file(self.catalog, &profile.id, &text, files);
                }
                Err(e) => log.warn(&format!(
                    "Could not read control file '{}': {e}; using generated file",
                    path.display()
                )),
            }
        }
        render_control_file(self.catalog, profile, files, self.config.cleandata)
    }

    fn tree_input(&self, gene: &str, profile: &ModelProfile, trees: &LabeledTrees, log: &RunLog) -> TreeInput {
        let family = profile.family();
        match trees.for_family(family) {
            Some(text) => TreeInput::Labeled(text.to_string()),
            None => {
                if family.uses_labeled_tree() {
                    log.warn(&format!(
                        "[{}] {gene}: no foreground-labeled tree; using {}",
                        profile.id,
                        self.config.tree_file.display()
                    ));
                }
                TreeInput::File(self.config.tree_file.clone())
            }
        }
    }

    /// One (gene, model) run. Never fails: every problem becomes the status
    /// and warnings of the returned result.
    fn run_one(
        &self,
        gene: &str,
        sequence_file: &Path,
        profile: &ModelProfile,
        trees: &LabeledTrees,
        command: &[String],
        log: &Arc<RunLog>,
    ) -> RunResult {
        let model = profile.id.as_str();
        let model_dir = self.config.output_dir.join(model);
        let tree = self.tree_input(gene, profile, trees, log);
        let files = ControlFiles {
            seqfile: sequence_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            treefile: tree.file_name(),
            outfile: output_file_name(gene, model),
        };
        let ctl_text = self.control_text(gene, profile, &files, log);
        let ctl_path = model_dir.join(format!("{gene}_{model}.ctl"));
        if let Err(e) = fs::create_dir_all(&model_dir).and_then(|_| fs::write(&ctl_path, &ctl_text)) {
            let err = BatchError::io_at("write", &ctl_path, e);
            log.run_line(model, gene, &format!("ERROR - {err}"));
            let mut result = RunResult::empty(gene, model, RunStatus::Failed);
            result.warnings.push(err.to_string());
            return result;
        }

        log.run_line(model, gene, "Starting codeml");
        let request = RunRequest {
            gene: gene.to_string(),
            model: model.to_string(),
            command: command.to_vec(),
            ctl_path,
            sequence_file: sequence_file.to_path_buf(),
            tree,
            model_dir: model_dir.clone(),
            output_name: files.outfile.clone(),
            timeout: self.config.timeout(),
            auto_continue: self.config.auto_continue_prompts,
        };
        let outcome = match run_codeml(&request, &self.signals, log) {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut result = RunResult::empty(gene, model, RunStatus::Failed);
                result.warnings.push(e.to_string());
                return result;
            }
        };

        let mut result = RunResult::empty(gene, model, outcome.status());
        result.exit_code = outcome.exit_code;
        result.elapsed_secs = outcome.elapsed_secs;
        result.stop_count = outcome.stop_count();
        result.prompts_answered = outcome.prompts_answered;
        result.stop_details = outcome.stop_details.clone();
        result.warnings.extend(outcome.error.clone());
        if let Some(path) = &outcome.output_file {
            match read_output_text(path) {
                Ok(text) => {
                    let parsed = parse_output(&text, profile.family());
                    result.lnl = parsed.lnl;
                    result.np = parsed.np;
                    result.omega = parsed.omega;
                    result.warnings.extend(parsed.warnings);
                }
                Err(e) => result.warnings.push(e),
            }
            result.output_file = Some(path.clone());
        }
        if result.status.has_output() && result.lnl.is_none() {
            log.run_line(model, gene, "lnL not found in output");
        }
        for warning in &result.warnings {
            log.run_line(model, gene, &format!("note: {warning}"));
        }
        log.run_line(
            model,
            gene,
            &format!(
                "lnL={} np={} omega={}",
                result.lnl.map(|v| format!("{v:.6}")).unwrap_or_else(|| "NA".to_string()),
                result.np.map(|v| v.to_string()).unwrap_or_else(|| "NA".to_string()),
                result.omega.cell()
            ),
        );
        if let Err(e) = write_run_sidecar(&model_dir, &result) {
            log.warn(&format!("Could not save run record: {e}"));
        }
        result
    }
}
