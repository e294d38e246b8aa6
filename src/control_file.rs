//! Rendering codeml control files, and rewriting caller-supplied ones.

use crate::models::{ModelCatalog, ModelProfile};
use regex::{Captures, Regex};

/// File names written into the control file, relative to the run's working directory
/// unless given as absolute paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlFiles {
    pub seqfile: String,
    pub treefile: String,
    pub outfile: String,
}

/// Formats a control-file float; whole numbers keep one decimal (`1.0`).
pub fn format_ctl_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn ctl_line(key: &str, value: &str, comment: &str) -> String {
    if comment.is_empty() {
        format!("{key:>13} = {value}\n")
    } else {
        format!("{key:>13} = {value:<12} * {comment}\n")
    }
}

/// Renders the full control file for one run. Every key codeml expects is
/// written even when the model does not use it.
pub fn render_control_file(
    catalog: &ModelCatalog,
    profile: &ModelProfile,
    files: &ControlFiles,
    cleandata: u8,
) -> String {
    let (fix_omega, omega) = if catalog.is_neutral(&profile.id) {
        (1, 1.0)
    } else {
        (profile.fix_omega, profile.omega)
    };
    let mut out = String::new();
    out.push_str(&ctl_line("seqfile", &files.seqfile, ""));
    out.push_str(&ctl_line("treefile", &files.treefile, ""));
    out.push_str(&ctl_line("outfile", &files.outfile, ""));
    out.push('\n');
    out.push_str(&ctl_line("noisy", "3", "how much rubbish on the screen"));
    out.push_str(&ctl_line("verbose", "1", "more or less detailed report"));
    out.push_str(&ctl_line("seqtype", "1", "codons"));
    out.push_str(&ctl_line("ndata", "1", "number of data sets"));
    out.push_str(&ctl_line("icode", "0", "universal genetic code"));
    out.push_str(&ctl_line(
        "cleandata",
        &cleandata.to_string(),
        "remove sites with ambiguity data",
    ));
    out.push('\n');
    out.push_str(&ctl_line(
        "model",
        &profile.model.to_string(),
        "w varying across lineages",
    ));
    out.push_str(&ctl_line(
        "NSsites",
        &profile.ns_sites.to_string(),
        "w varying across sites",
    ));
    out.push_str(&ctl_line(
        "CodonFreq",
        &profile.codon_freq.to_string(),
        "codon frequencies",
    ));
    out.push_str(&ctl_line("estFreq", "0", "observed codon frequencies"));
    out.push_str(&ctl_line("clock", "0", "no clock"));
    out.push_str(&ctl_line(
        "fix_omega",
        &fix_omega.to_string(),
        "estimate or fix omega",
    ));
    out.push_str(&ctl_line(
        "omega",
        &format_ctl_float(omega),
        "initial or fixed omega",
    ));
    out
}

/// Replaces the right-hand side of `key = ...` lines. Keys missing from the
/// text are appended so the result always carries them.
pub fn patch_control_file(text: &str, settings: &[(&str, String)]) -> String {
    let mut out = text.to_string();
    for (key, value) in settings {
        let pattern = format!(r"(?m)^(\s*{}\s*=)[^\r\n]*", regex::escape(key));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };
        if re.is_match(&out) {
            out = re
                .replace_all(&out, |caps: &Captures| format!("{} {value}", &caps[1]))
                .into_owned();
        } else {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&ctl_line(key, value, ""));
        }
    }
    out
}

/// Adapts a caller-supplied control file to one run: input and output names are
/// replaced, and neutral models get their fixed omega forced.
pub fn patch_caller_control_file(
    catalog: &ModelCatalog,
    model_id: &str,
    text: &str,
    files: &ControlFiles,
) -> String {
    let mut settings = vec![
        ("seqfile", files.seqfile.clone()),
        ("treefile", files.treefile.clone()),
        ("outfile", files.outfile.clone()),
    ];
    if catalog.is_neutral(model_id) {
        settings.push(("fix_omega", "1".to_string()));
        settings.push(("omega", format_ctl_float(1.0)));
    }
    patch_control_file(text, &settings)
}
