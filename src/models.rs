//! The built-in codeml model catalog and the rules that pick null models,
//! neutral models and LRT pairs from it.

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const BUILTIN_MODELS_JSON: &str = include_str!("../assets/codeml_models.json");

static BUILTIN_CATALOG: LazyLock<ModelCatalog> = LazyLock::new(ModelCatalog::default);

/// The model catalog shipped with the crate, parsed once per process.
pub fn builtin_catalog() -> &'static ModelCatalog {
    &BUILTIN_CATALOG
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Site,
    Branch,
    BranchSite,
    FreeRatio,
}

impl ModelFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Site => "site",
            Self::Branch => "branch",
            Self::BranchSite => "branch_site",
            Self::FreeRatio => "free_ratio",
        }
    }

    /// Branch and branch-site models need a tree with `#n` foreground tags.
    pub fn uses_labeled_tree(self) -> bool {
        matches!(self, Self::Branch | Self::BranchSite)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub full_name: String,
    pub test_type: String,
    pub parameters: String,
    pub purpose: String,
    pub interpretation: String,
    #[serde(default)]
    pub use_case: String,
    pub references: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub model: i32,
    #[serde(rename = "NSsites")]
    pub ns_sites: i32,
    #[serde(rename = "CodonFreq")]
    pub codon_freq: i32,
    pub fix_omega: i32,
    pub omega: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ModelInfo>,
}

impl ModelProfile {
    pub fn family(&self) -> ModelFamily {
        match (self.model, self.ns_sites) {
            (2, 2) => ModelFamily::BranchSite,
            (2, 0) => ModelFamily::Branch,
            (1, _) => ModelFamily::FreeRatio,
            _ => ModelFamily::Site,
        }
    }

    pub fn apply_override(&mut self, over: &ModelOverride) {
        if let Some(v) = over.model {
            self.model = v;
        }
        if let Some(v) = over.ns_sites {
            self.ns_sites = v;
        }
        if let Some(v) = over.codon_freq {
            self.codon_freq = v;
        }
        if let Some(v) = over.fix_omega {
            self.fix_omega = v;
        }
        if let Some(v) = over.omega {
            self.omega = v;
        }
    }

    pub fn force_neutral(&mut self) {
        self.fix_omega = 1;
        self.omega = 1.0;
    }
}

/// Partial profile supplied by the caller; present keys replace catalog values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<i32>,
    #[serde(
        default,
        rename = "NSsites",
        alias = "ns_sites",
        skip_serializing_if = "Option::is_none"
    )]
    pub ns_sites: Option<i32>,
    #[serde(
        default,
        rename = "CodonFreq",
        alias = "codon_freq",
        skip_serializing_if = "Option::is_none"
    )]
    pub codon_freq: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_omega: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omega: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullPair {
    pub alternative: String,
    pub null: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeutralProfile {
    pub id: String,
    pub alternative: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrtComparison {
    pub group: String,
    pub null: String,
    pub alternative: String,
    pub description: String,
    /// Used only when a parameter count could not be read from the output.
    pub df: u32,
}

impl LrtComparison {
    pub fn column_name(&self) -> String {
        format!("lrt_{}_vs_{}", self.null, self.alternative)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAlias {
    pub legacy: String,
    pub current: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpansionOptions {
    pub complete_nulls: bool,
    pub include_neutral: bool,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            complete_nulls: true,
            include_neutral: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    profiles: Vec<ModelProfile>,
    #[serde(default)]
    null_pairs: Vec<NullPair>,
    #[serde(default)]
    neutral: Vec<NeutralProfile>,
    #[serde(default)]
    lrt_comparisons: Vec<LrtComparison>,
    #[serde(default)]
    aliases: Vec<ModelAlias>,
}

impl ModelCatalog {
    pub fn from_json_str(text: &str) -> Result<Self, BatchError> {
        let catalog: ModelCatalog = serde_json::from_str(text)?;
        for pair in &catalog.null_pairs {
            for id in [&pair.alternative, &pair.null] {
                if catalog.profile(id).is_none() {
                    return Err(BatchError::config(format!(
                        "Null pair references unknown model '{id}'"
                    )));
                }
            }
        }
        Ok(catalog)
    }

    pub fn profiles(&self) -> &[ModelProfile] {
        &self.profiles
    }

    pub fn null_pairs(&self) -> &[NullPair] {
        &self.null_pairs
    }

    pub fn lrt_comparisons(&self) -> &[LrtComparison] {
        &self.lrt_comparisons
    }

    /// Maps a legacy identifier to its current name; unknown names pass through.
    pub fn canonical_id(&self, id: &str) -> String {
        let id = id.trim();
        self.aliases
            .iter()
            .find(|a| a.legacy == id)
            .map(|a| a.current.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Every name a model has been stored under, current name first.
    pub fn name_variants(&self, id: &str) -> Vec<String> {
        let current = self.canonical_id(id);
        let mut out = vec![current.clone()];
        for alias in self.aliases.iter().filter(|a| a.current == current) {
            if !out.contains(&alias.legacy) {
                out.push(alias.legacy.clone());
            }
        }
        out
    }

    pub fn profile(&self, id: &str) -> Option<&ModelProfile> {
        let id = self.canonical_id(id);
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn null_for(&self, alternative: &str) -> Option<&str> {
        let alternative = self.canonical_id(alternative);
        self.null_pairs
            .iter()
            .find(|p| p.alternative == alternative)
            .map(|p| p.null.as_str())
    }

    pub fn is_neutral(&self, id: &str) -> bool {
        let id = self.canonical_id(id);
        self.neutral.iter().any(|n| n.id == id)
    }

    /// Catalog profile merged with the caller's override and initial omega.
    /// Neutral profiles always end up with `fix_omega = 1` and `omega = 1.0`.
    pub fn resolve(
        &self,
        id: &str,
        over: Option<&ModelOverride>,
        initial_omega: Option<f64>,
    ) -> Result<ModelProfile, BatchError> {
        let mut profile = self
            .profile(id)
            .cloned()
            .ok_or_else(|| BatchError::config(format!("Unknown model '{id}'")))?;
        if let Some(omega) = initial_omega {
            profile.omega = omega;
        }
        if let Some(over) = over {
            profile.apply_override(over);
        }
        if self.is_neutral(&profile.id) {
            profile.force_neutral();
        }
        Ok(profile)
    }

    /// Adds missing null counterparts (and neutral nulls) for every selected
    /// alternative. Caller order is kept; added models follow in discovery order.
    pub fn expand_selection(&self, requested: &[String], options: ExpansionOptions) -> Vec<String> {
        let mut out: Vec<String> = vec![];
        for id in requested {
            let id = self.canonical_id(id);
            if !id.is_empty() && !out.contains(&id) {
                out.push(id);
            }
        }
        let selected = out.clone();
        if options.complete_nulls {
            for id in &selected {
                if let Some(null) = self.null_for(id) {
                    if !out.iter().any(|m| m == null) {
                        out.push(null.to_string());
                    }
                }
            }
        }
        if options.include_neutral {
            for neutral in &self.neutral {
                if selected.contains(&neutral.alternative) && !out.contains(&neutral.id) {
                    out.push(neutral.id.clone());
                }
            }
        }
        out
    }

    /// Comparisons whose null and alternative are both in `models`.
    pub fn applicable_comparisons(&self, models: &[String]) -> Vec<&LrtComparison> {
        let models: Vec<String> = models.iter().map(|m| self.canonical_id(m)).collect();
        self.lrt_comparisons
            .iter()
            .filter(|c| models.contains(&c.null) && models.contains(&c.alternative))
            .collect()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::from_json_str(BUILTIN_MODELS_JSON).expect("Invalid embedded model catalog")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builtin_catalog_has_all_models() {
        let catalog = builtin_catalog();
        let names: Vec<&str> = catalog.profiles().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            names,
            vec!["M0", "M1a", "M2a", "M7", "M8", "Branch", "Branch-site", "Branch-site_null"]
        );
        let bs = catalog.profile("Branch-site").unwrap();
        assert_eq!(bs.codon_freq, 7);
        assert_eq!(bs.family(), ModelFamily::BranchSite);
        assert_eq!(catalog.lrt_comparisons().len(), 5);
    }

    #[test]
    fn family_follows_overrides() {
        let catalog = builtin_catalog();
        let over = ModelOverride {
            model: Some(1),
            ..ModelOverride::default()
        };
        let profile = catalog.resolve("M0", Some(&over), None).unwrap();
        assert_eq!(profile.family(), ModelFamily::FreeRatio);
        assert_eq!(
            catalog.profile("Branch").unwrap().family(),
            ModelFamily::Branch
        );
        assert_eq!(catalog.profile("M8").unwrap().family(), ModelFamily::Site);
    }

    #[test]
    fn neutral_profiles_ignore_overrides() {
        let catalog = builtin_catalog();
        let over = ModelOverride {
            fix_omega: Some(0),
            omega: Some(2.5),
            ..ModelOverride::default()
        };
        for id in ["M1a", "Branch-site_null", "BranchSite_A_null"] {
            let p = catalog.resolve(id, Some(&over), Some(0.3)).unwrap();
            assert_eq!(p.fix_omega, 1, "{id}");
            assert_eq!(p.omega, 1.0, "{id}");
        }
        let m0 = catalog.resolve("M0", Some(&over), Some(0.3)).unwrap();
        assert_eq!(m0.fix_omega, 0);
        assert_eq!(m0.omega, 2.5);
        let m2a = catalog.resolve("M2a", None, Some(0.3)).unwrap();
        assert_eq!(m2a.omega, 0.3);
    }

    #[test]
    fn m0_keeps_a_free_omega() {
        let catalog = builtin_catalog();
        assert!(!catalog.is_neutral("M0"));
        let m0 = catalog.resolve("M0", None, None).unwrap();
        assert_eq!(m0.fix_omega, 0);
        assert_eq!(m0.omega, 0.5);
    }

    #[test]
    fn unknown_model_is_config_error() {
        let err = builtin_catalog().resolve("M99", None, None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn expansion_adds_nulls_after_caller_order() {
        let catalog = builtin_catalog();
        let out = catalog.expand_selection(&ids(&["M8", "M2a", "Branch"]), ExpansionOptions::default());
        assert_eq!(out, ids(&["M8", "M2a", "Branch", "M7", "M1a", "M0"]));
    }

    #[test]
    fn expansion_is_idempotent() {
        let catalog = builtin_catalog();
        let inputs = [
            ids(&["M2a"]),
            ids(&["Branch-site", "M8"]),
            ids(&["BranchSite_A", "M0", "M1a"]),
            ids(&["M7", "M7", "Branch"]),
            ids(&[]),
        ];
        for options in [
            ExpansionOptions::default(),
            ExpansionOptions {
                complete_nulls: false,
                include_neutral: true,
            },
            ExpansionOptions {
                complete_nulls: false,
                include_neutral: false,
            },
        ] {
            for input in &inputs {
                let once = catalog.expand_selection(input, options);
                let twice = catalog.expand_selection(&once, options);
                assert_eq!(once, twice);
                if options.complete_nulls {
                    for id in &once {
                        if let Some(null) = catalog.null_for(id) {
                            assert!(once.iter().any(|m| m == null));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn neutral_toggle_only_adds_neutral_nulls() {
        let catalog = builtin_catalog();
        let options = ExpansionOptions {
            complete_nulls: false,
            include_neutral: true,
        };
        let out = catalog.expand_selection(&ids(&["Branch", "Branch-site", "M2a"]), options);
        assert_eq!(out, ids(&["Branch", "Branch-site", "M2a", "M1a", "Branch-site_null"]));
    }

    #[test]
    fn legacy_names_map_both_ways() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.canonical_id("BranchSite_A"), "Branch-site");
        assert_eq!(
            catalog.name_variants("Branch-site_null"),
            ids(&["Branch-site_null", "BranchSite_A_null"])
        );
        assert_eq!(catalog.name_variants("M0"), ids(&["M0"]));
    }

    #[test]
    fn applicable_comparisons_need_both_models() {
        let catalog = builtin_catalog();
        let found = catalog.applicable_comparisons(&ids(&["M0", "M1a", "M8"]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].column_name(), "lrt_M0_vs_M1a");
    }

    #[test]
    fn override_accepts_snake_case_keys() {
        let over: ModelOverride = serde_json::from_str(r#"{"ns_sites": 3, "CodonFreq": 1}"#).unwrap();
        assert_eq!(over.ns_sites, Some(3));
        assert_eq!(over.codon_freq, Some(1));
    }
}
