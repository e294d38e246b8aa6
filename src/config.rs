//! Caller-facing batch configuration: a JSON file, optionally overridden from
//! the command line, validated before anything is spawned.

use crate::{
    error::BatchError,
    models::{ExpansionOptions, ModelCatalog, ModelOverride},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_TIMEOUT_SECS: u64 = 1600;
pub const DEFAULT_CLEANDATA: u8 = 1;

fn default_true() -> bool {
    true
}

fn default_cleandata() -> u8 {
    DEFAULT_CLEANDATA
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_sequence_extensions() -> Vec<String> {
    vec!["fas".to_string()]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub input_dir: PathBuf,
    #[serde(default)]
    pub tree_file: PathBuf,
    #[serde(default)]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub model_overrides: BTreeMap<String, ModelOverride>,
    /// Initial omega for every model without an explicit override.
    #[serde(default)]
    pub omega: Option<f64>,
    #[serde(default = "default_cleandata")]
    pub cleandata: u8,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub run_lrt: bool,
    #[serde(default = "default_true")]
    pub auto_complete_nulls: bool,
    #[serde(default = "default_true")]
    pub include_neutral_models: bool,
    #[serde(default = "default_true")]
    pub auto_continue_prompts: bool,
    #[serde(default)]
    pub labeled_tree: Option<PathBuf>,
    #[serde(default)]
    pub labeled_tree_branchsite: Option<PathBuf>,
    #[serde(default)]
    pub model_ctl_paths: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub codeml_path: Option<String>,
    #[serde(default = "default_sequence_extensions")]
    pub sequence_extensions: Vec<String>,
    #[serde(default)]
    pub generate_reports: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            tree_file: PathBuf::new(),
            output_dir: PathBuf::new(),
            models: vec![],
            model_overrides: BTreeMap::new(),
            omega: None,
            cleandata: DEFAULT_CLEANDATA,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            run_lrt: true,
            auto_complete_nulls: true,
            include_neutral_models: true,
            auto_continue_prompts: true,
            labeled_tree: None,
            labeled_tree_branchsite: None,
            model_ctl_paths: BTreeMap::new(),
            codeml_path: None,
            sequence_extensions: default_sequence_extensions(),
            generate_reports: false,
        }
    }
}

/// Command-line values that replace file values when present.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigOverrides {
    pub input_dir: Option<PathBuf>,
    pub tree_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub models: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub omega: Option<f64>,
    pub cleandata: Option<u8>,
    pub codeml_path: Option<String>,
    pub no_lrt: bool,
    pub no_auto_nulls: bool,
    pub no_neutral: bool,
    pub interactive: bool,
    pub reports: bool,
}

/// Genes and models of a validated batch, in processing order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    pub sequence_files: Vec<PathBuf>,
    pub models: Vec<String>,
}

/// Gene name of a sequence file: its file stem.
pub fn gene_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl BatchConfig {
    pub fn from_json_str(text: &str) -> Result<Self, BatchError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let text = fs::read_to_string(path).map_err(|e| BatchError::io_at("read config", path, e))?;
        Self::from_json_str(&text)
    }

    pub fn apply_overrides(&mut self, over: ConfigOverrides) {
        if let Some(v) = over.input_dir {
            self.input_dir = v;
        }
        if let Some(v) = over.tree_file {
            self.tree_file = v;
        }
        if let Some(v) = over.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = over.models {
            self.models = v;
        }
        if let Some(v) = over.timeout_secs {
            self.timeout_secs = v;
        }
        if let Some(v) = over.omega {
            self.omega = Some(v);
        }
        if let Some(v) = over.cleandata {
            self.cleandata = v;
        }
        if let Some(v) = over.codeml_path {
            self.codeml_path = Some(v);
        }
        if over.no_lrt {
            self.run_lrt = false;
        }
        if over.no_auto_nulls {
            self.auto_complete_nulls = false;
        }
        if over.no_neutral {
            self.include_neutral_models = false;
        }
        if over.interactive {
            self.auto_continue_prompts = false;
        }
        if over.reports {
            self.generate_reports = true;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn expansion_options(&self) -> ExpansionOptions {
        ExpansionOptions {
            complete_nulls: self.auto_complete_nulls,
            include_neutral: self.include_neutral_models,
        }
    }

    /// Override for a model, looked up under its current or legacy name.
    pub fn override_for(&self, catalog: &ModelCatalog, model: &str) -> Option<&ModelOverride> {
        catalog
            .name_variants(model)
            .iter()
            .find_map(|name| self.model_overrides.get(name))
    }

    pub fn ctl_path_for(&self, catalog: &ModelCatalog, model: &str) -> Option<&PathBuf> {
        catalog
            .name_variants(model)
            .iter()
            .find_map(|name| self.model_ctl_paths.get(name))
    }

    fn matches_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.sequence_extensions
            .iter()
            .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Sequence files of the input directory, sorted by path.
    pub fn sequence_files(&self) -> Result<Vec<PathBuf>, BatchError> {
        let entries = fs::read_dir(&self.input_dir)
            .map_err(|e| BatchError::io_at("list", &self.input_dir, e))?;
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && self.matches_extension(p))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Checks every input and model before a run starts.
    pub fn validate(&self, catalog: &ModelCatalog) -> Result<BatchPlan, BatchError> {
        if self.input_dir.as_os_str().is_empty() || !self.input_dir.is_dir() {
            return Err(BatchError::config(format!(
                "Input directory '{}' does not exist",
                self.input_dir.display()
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(BatchError::config("No output directory given"));
        }
        if !self.tree_file.is_file() {
            return Err(BatchError::config(format!(
                "Tree file '{}' does not exist",
                self.tree_file.display()
            )));
        }
        for labeled in [&self.labeled_tree, &self.labeled_tree_branchsite]
            .into_iter()
            .flatten()
        {
            if !labeled.is_file() {
                return Err(BatchError::config(format!(
                    "Labeled tree file '{}' does not exist",
                    labeled.display()
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(BatchError::config("Timeout must be at least one second"));
        }
        if self.cleandata > 1 {
            return Err(BatchError::config(format!(
                "cleandata must be 0 or 1, got {}",
                self.cleandata
            )));
        }
        if self.models.is_empty() {
            return Err(BatchError::config("No models selected"));
        }
        for model in self.models.iter().chain(self.model_overrides.keys()) {
            if catalog.profile(model).is_none() {
                return Err(BatchError::config(format!("Unknown model '{model}'")));
            }
        }
        let sequence_files = self.sequence_files()?;
        if sequence_files.is_empty() {
            return Err(BatchError::config(format!(
                "No sequence files ({}) in '{}'",
                self.sequence_extensions.join(", "),
                self.input_dir.display()
            )));
        }
        Ok(BatchPlan {
            sequence_files,
            models: catalog.expand_selection(&self.models, self.expansion_options()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::builtin_catalog;

    fn valid_config(root: &Path) -> BatchConfig {
        fs::create_dir_all(root.join("seqs")).unwrap();
        fs::write(root.join("seqs").join("geneB.fas"), ">a\nATG\n").unwrap();
        fs::write(root.join("seqs").join("geneA.FAS"), ">a\nATG\n").unwrap();
        fs::write(root.join("seqs").join("notes.txt"), "x").unwrap();
        fs::write(root.join("tree.nwk"), "(a,b);").unwrap();
        BatchConfig {
            input_dir: root.join("seqs"),
            tree_file: root.join("tree.nwk"),
            output_dir: root.join("out"),
            models: vec!["M2a".to_string()],
            ..BatchConfig::default()
        }
    }

    #[test]
    fn json_defaults() {
        let config = BatchConfig::from_json_str(
            r#"{"input_dir": "seqs", "tree_file": "t.nwk", "output_dir": "out",
                "models": ["M0"], "model_overrides": {"M0": {"CodonFreq": 3}}}"#,
        )
        .unwrap();
        assert_eq!(config.cleandata, 1);
        assert_eq!(config.timeout_secs, 1600);
        assert!(config.run_lrt && config.auto_complete_nulls && config.include_neutral_models);
        assert!(config.auto_continue_prompts);
        assert!(!config.generate_reports);
        assert_eq!(config.sequence_extensions, vec!["fas"]);
        assert_eq!(config.model_overrides["M0"].codon_freq, Some(3));
    }

    #[test]
    fn cli_overrides_replace_file_values() {
        let mut config = BatchConfig::default();
        config.apply_overrides(ConfigOverrides {
            models: Some(vec!["M8".to_string()]),
            timeout_secs: Some(30),
            no_lrt: true,
            interactive: true,
            ..ConfigOverrides::default()
        });
        assert_eq!(config.models, vec!["M8"]);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(!config.run_lrt);
        assert!(!config.auto_continue_prompts);
        assert!(config.auto_complete_nulls);
    }

    #[test]
    fn validation_finds_sorted_genes_and_expands_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = valid_config(dir.path());
        let plan = config.validate(builtin_catalog()).unwrap();
        let genes: Vec<String> = plan.sequence_files.iter().map(|p| gene_name(p)).collect();
        assert_eq!(genes, vec!["geneA", "geneB"]);
        assert_eq!(plan.models, vec!["M2a", "M1a"]);
    }

    #[test]
    fn validation_errors_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = builtin_catalog();
        let base = valid_config(dir.path());

        let mut c = base.clone();
        c.input_dir = dir.path().join("missing");
        assert!(c.validate(catalog).unwrap_err().is_config());

        let mut c = base.clone();
        c.tree_file = dir.path().join("missing.nwk");
        assert!(c.validate(catalog).unwrap_err().is_config());

        let mut c = base.clone();
        c.labeled_tree = Some(dir.path().join("labeled.nwk"));
        assert!(c.validate(catalog).unwrap_err().is_config());

        let mut c = base.clone();
        c.models = vec!["M99".to_string()];
        assert!(c.validate(catalog).unwrap_err().to_string().contains("M99"));

        let mut c = base.clone();
        c.timeout_secs = 0;
        assert!(c.validate(catalog).unwrap_err().is_config());

        let mut c = base;
        c.sequence_extensions = vec!["phy".to_string()];
        assert!(c.validate(catalog).unwrap_err().is_config());
    }

    #[test]
    fn overrides_found_under_legacy_names() {
        let mut config = BatchConfig::default();
        config.model_overrides.insert(
            "BranchSite_A".to_string(),
            ModelOverride {
                omega: Some(2.0),
                ..ModelOverride::default()
            },
        );
        let found = config.override_for(builtin_catalog(), "Branch-site").unwrap();
        assert_eq!(found.omega, Some(2.0));
    }
}
