pub const CODEML_BATCH_DISPLAY_VERSION: &str = env!("CODEML_BATCH_DISPLAY_VERSION");
pub const CODEML_BATCH_BUILD_N: &str = env!("CODEML_BATCH_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "codeml_batch {}\nBuild {}\nBatch selection analyses with PAML codeml",
        CODEML_BATCH_DISPLAY_VERSION, CODEML_BATCH_BUILD_N
    )
}

/// First line written to every batch log, so regenerated and live logs can be
/// told apart from logs written by other tools.
pub fn log_banner() -> String {
    format!("codeml_batch {CODEML_BATCH_DISPLAY_VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_text_mentions_build() {
        let text = version_cli_text();
        assert!(text.starts_with("codeml_batch "));
        assert!(text.contains("Build "));
        assert!(log_banner().contains(CODEML_BATCH_DISPLAY_VERSION));
    }
}
