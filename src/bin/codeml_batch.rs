use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use codeml_batch::{
    about, builtin_catalog,
    config::{BatchConfig, ConfigOverrides},
    control_file::{ControlFiles, render_control_file},
    orchestrator::BatchOrchestrator,
    reports::{ReportOptions, generate_reports},
    run_log::{BatchEvent, EventSink},
    signals::BatchSignals,
    summary::regenerate_from_disk,
};
use std::{
    io::{self, BufRead},
    path::PathBuf,
    sync::Arc,
    thread,
};

#[derive(Parser, Debug)]
#[command(
    name = "codeml_batch",
    version = about::CODEML_BATCH_DISPLAY_VERSION,
    about = "Batch selection analyses with PAML codeml"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every gene against every selected model
    Run(RunArgs),
    /// Rebuild summary, LRT report and log from an existing results directory
    Regenerate { dir: PathBuf },
    /// Write branch, site and tree reports for a results directory
    Reports {
        dir: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Directory with `{gene}.fas` alignments, used for codons
        #[arg(long)]
        alignments: Option<PathBuf>,
    },
    /// Print the model catalog as JSON
    Models,
    /// Print the control file for one model
    Ctl {
        #[arg(long)]
        model: String,
        #[arg(long)]
        seqfile: String,
        #[arg(long)]
        treefile: String,
        #[arg(long)]
        outfile: String,
        #[arg(long)]
        omega: Option<f64>,
        #[arg(long, default_value_t = 1)]
        cleandata: u8,
    },
    /// Print version and build number
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    tree: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, value_delimiter = ',')]
    models: Option<Vec<String>>,
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    omega: Option<f64>,
    #[arg(long)]
    cleandata: Option<u8>,
    #[arg(long)]
    codeml: Option<String>,
    #[arg(long)]
    no_lrt: bool,
    #[arg(long)]
    no_auto_nulls: bool,
    #[arg(long)]
    no_neutral: bool,
    /// Answer codeml prompts from stdin: c, a, p, r, q
    #[arg(long)]
    interactive: bool,
    #[arg(long)]
    reports: bool,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            input_dir: self.input.clone(),
            tree_file: self.tree.clone(),
            output_dir: self.output.clone(),
            models: self.models.clone(),
            timeout_secs: self.timeout,
            omega: self.omega,
            cleandata: self.cleandata,
            codeml_path: self.codeml.clone(),
            no_lrt: self.no_lrt,
            no_auto_nulls: self.no_auto_nulls,
            no_neutral: self.no_neutral,
            interactive: self.interactive,
            reports: self.reports,
        }
    }
}

const INTERACTIVE_HELP: &str = "Commands: c = continue prompt, a = continue all for this gene, \
p = pause, r = resume, q = abort";

fn spawn_command_reader(signals: Arc<BatchSignals>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.trim() {
                "c" => signals.request_continue(),
                "a" => signals.set_continue_all(),
                "p" => {
                    signals.pause();
                    eprintln!("Paused before the next run; 'r' resumes");
                }
                "r" => signals.resume(),
                "q" => {
                    signals.abort();
                    break;
                }
                "" => {}
                _ => eprintln!("{INTERACTIVE_HELP}"),
            }
        }
    });
}

fn console_sink() -> EventSink {
    Arc::new(|event: &BatchEvent| match event {
        BatchEvent::Log { line } => println!("{line}"),
        BatchEvent::StopCodon {
            gene,
            model,
            detail,
            count,
        } => eprintln!(
            "[{model}] {gene}: stop codon #{count} {} (seq {}, site {})",
            detail.codon.as_deref().unwrap_or("?"),
            detail
                .sequence_number
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string()),
            detail
                .site
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string()),
        ),
        BatchEvent::GeneFinished {
            gene,
            processed,
            total,
        } => log::info!("{gene} done ({processed}/{total})"),
        _ => {}
    })
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => BatchConfig::load(path)
            .with_context(|| format!("Could not load config '{}'", path.display()))?,
        None => BatchConfig::default(),
    };
    config.apply_overrides(args.overrides());
    let signals = Arc::new(if args.interactive {
        BatchSignals::with_continue_channel()
    } else {
        BatchSignals::new()
    });
    if args.interactive {
        eprintln!("{INTERACTIVE_HELP}");
        spawn_command_reader(signals.clone());
    }
    let outcome = BatchOrchestrator::new(builtin_catalog(), config, signals)
        .with_event_sink(console_sink())
        .run()
        .context("Batch failed")?;
    log::info!(
        "{} of {} genes processed; summary in {}",
        outcome.processed,
        outcome.total,
        outcome.summary_path.display()
    );
    for c in &outcome.comparisons {
        log::info!(
            "{} vs {}: {}/{} significant at p < 0.05",
            c.comparison.null,
            c.comparison.alternative,
            c.significant_05(),
            c.valid()
        );
    }
    if outcome.aborted {
        log::warn!("Batch aborted; the summary is partial");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let catalog = builtin_catalog();
    match cli.command {
        Command::Run(args) => run(args)?,
        Command::Regenerate { dir } => {
            let regen = regenerate_from_disk(&dir, catalog)
                .with_context(|| format!("Could not regenerate '{}'", dir.display()))?;
            for file in regen.files {
                println!("{}", file.display());
            }
        }
        Command::Reports {
            dir,
            output,
            alignments,
        } => {
            let options = ReportOptions {
                output_dir: output,
                alignment_dir: alignments,
            };
            for file in generate_reports(&dir, catalog, &options)? {
                println!("{}", file.display());
            }
        }
        Command::Models => println!("{}", serde_json::to_string_pretty(catalog)?),
        Command::Ctl {
            model,
            seqfile,
            treefile,
            outfile,
            omega,
            cleandata,
        } => {
            let profile = catalog.resolve(&model, None, omega)?;
            let files = ControlFiles {
                seqfile,
                treefile,
                outfile,
            };
            print!("{}", render_control_file(catalog, &profile, &files, cleandata));
        }
        Command::Version => println!("{}", about::version_cli_text()),
    }
    Ok(())
}
