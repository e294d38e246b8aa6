#![cfg(unix)]

use codeml_batch::{
    builtin_catalog,
    config::BatchConfig,
    orchestrator::BatchOrchestrator,
    run_log::{BatchEvent, EventSink},
    runner::RunStatus,
    signals::BatchSignals,
    summary::{LRT_REPORT_FILE_NAME, SUMMARY_FILE_NAME, regenerate_from_disk},
};
use std::{
    collections::BTreeMap,
    fs,
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::{Arc, Mutex},
};

/// Stand-in for codeml: stops at a stop-codon prompt, then writes a result
/// whose likelihood depends on NSsites.
const FAKE_CODEML: &str = r#"#!/bin/sh
out=$(sed -n 's/^ *outfile *= *\([^ *]*\).*/\1/p' "$1")
ns=$(sed -n 's/^ *NSsites *= *\([0-9]*\).*/\1/p' "$1")
case "$ns" in
  0) lnl=-1000.000000; np=5 ;;
  1) lnl=-990.000000; np=6 ;;
  *) lnl=-985.000000; np=8 ;;
esac
echo "stop codon TAG in seq. # 2 (b), nucleotide site 3"
read answer
cat > "$out" <<EOF
lnL(ntime:  3  np:  $np):  $lnl  +0.000000
Time used:  0:02
EOF
"#;

fn setup(root: &Path) -> BatchConfig {
    let seqs = root.join("seqs");
    fs::create_dir_all(&seqs).unwrap();
    for gene in ["geneB", "geneA"] {
        fs::write(seqs.join(format!("{gene}.fas")), ">a\nATGTAG\n>b\nATGATG\n").unwrap();
    }
    fs::write(root.join("tree.nwk"), "(a,b);\n").unwrap();
    let exe = root.join("codeml");
    fs::write(&exe, FAKE_CODEML).unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
    BatchConfig {
        input_dir: seqs,
        tree_file: root.join("tree.nwk"),
        output_dir: root.join("results"),
        models: vec!["M2a".to_string(), "M0".to_string()],
        codeml_path: Some(exe.display().to_string()),
        timeout_secs: 30,
        ..BatchConfig::default()
    }
}

fn read_summary(path: &Path) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .unwrap();
    let header = reader.headers().unwrap().clone();
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            let row: BTreeMap<String, String> = header
                .iter()
                .zip(r.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect();
            (row["gene"].clone(), row)
        })
        .collect()
}

#[test]
fn batch_then_regenerate_gives_the_same_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let results_dir = config.output_dir.clone();

    let stops = Arc::new(Mutex::new(0));
    let sink: EventSink = {
        let stops = stops.clone();
        Arc::new(move |event: &BatchEvent| {
            if let BatchEvent::StopCodon { detail, .. } = event {
                assert_eq!(detail.site, Some(3));
                *stops.lock().unwrap() += 1;
            }
        })
    };
    let outcome = BatchOrchestrator::new(builtin_catalog(), config, Arc::new(BatchSignals::new()))
        .with_event_sink(sink)
        .run()
        .unwrap();

    assert_eq!(outcome.models, vec!["M2a", "M0", "M1a"]);
    assert_eq!(outcome.processed, 2);
    assert!(!outcome.aborted);
    assert_eq!(*stops.lock().unwrap(), 6);
    for set in outcome.results.values() {
        for result in set.values() {
            assert_eq!(result.status, RunStatus::Success);
            assert_eq!(result.stop_count, 1);
        }
    }
    let m1a_ctl = fs::read_to_string(results_dir.join("M1a").join("geneA_M1a.ctl")).unwrap();
    assert!(m1a_ctl.contains("fix_omega = 1"));
    assert!(!results_dir.join("M0").join("temp_geneA").exists());

    let live = read_summary(&results_dir.join(SUMMARY_FILE_NAME));
    assert_eq!(live.len(), 2);
    assert_eq!(live["geneA"]["M0_lnL"], "-1000.000000");
    assert_eq!(live["geneA"]["lrt_M0_vs_M1a"], "20.000000");
    assert_eq!(live["geneB"]["lrt_M1a_vs_M2a"], "10.000000");
    let report = fs::read_to_string(results_dir.join(LRT_REPORT_FILE_NAME)).unwrap();
    assert!(report.contains("COMPARISON: M1a (null) vs M2a (alternative)"));
    assert!(report.contains("Significant at p < 0.01: 2 (100.0%)"));

    let regen = regenerate_from_disk(&results_dir, builtin_catalog()).unwrap();
    assert_eq!(regen.models, vec!["M0", "M1a", "M2a"]);
    let rebuilt = read_summary(&results_dir.join(SUMMARY_FILE_NAME));
    for gene in ["geneA", "geneB"] {
        for column in [
            "M0_lnL",
            "M1a_lnL",
            "M2a_lnL",
            "M2a_np",
            "lrt_M0_vs_M1a",
            "lrt_M1a_vs_M2a",
        ] {
            assert_eq!(live[gene][column], rebuilt[gene][column], "{gene} {column}");
        }
    }
}

#[test]
fn prompts_wait_for_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(dir.path());
    config.models = vec!["M0".to_string()];
    config.auto_continue_prompts = false;
    config.run_lrt = false;

    let signals = Arc::new(BatchSignals::with_continue_channel());
    let sink: EventSink = {
        let signals = signals.clone();
        Arc::new(move |event: &BatchEvent| {
            if let BatchEvent::StopCodon { .. } = event {
                signals.request_continue();
            }
        })
    };
    let outcome = BatchOrchestrator::new(builtin_catalog(), config, signals)
        .with_event_sink(sink)
        .run()
        .unwrap();
    assert_eq!(outcome.results["geneA"]["M0"].status, RunStatus::Success);
    assert_eq!(outcome.results["geneB"]["M0"].prompts_answered, 1);
    assert!(outcome.comparisons.is_empty());
    let log = fs::read_to_string(dir.path().join("results").join("batch_analysis_log.txt")).unwrap();
    assert!(log.contains("Waiting for manual continue signal"));
    assert!(log.contains("[M0] geneA: Sent Enter to subprocess (manual continue)"));
}
