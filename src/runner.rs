//! Runs one codeml process: working directory, stream readers with prompt
//! answering, timeout, artifact collection and cleanup.

use crate::{
    cleanup::{
        FINAL_CLEANUP_POLICY, KILL_POLICY, ReleaseOutcome, STALE_DIR_POLICY, release_with_retry,
        remove_dir_with_retry,
    },
    error::BatchError,
    output_parser::OmegaEstimate,
    run_log::{BatchEvent, RunLog},
    signals::{BatchSignals, Continuation, WaitOutcome, decide_continuation},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, VecDeque},
    fs,
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
    sync::{
        Arc, LazyLock, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

pub const STREAM_TAIL_LINES: usize = 200;
pub const READER_JOIN_WAIT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(25);
pub const LABELED_TREE_FILE_NAME: &str = "labeled.nwk";
const ARTIFACT_EXTENSIONS: [&str; 2] = ["rst", "txt"];

static STOP_CODON_DETAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)stop codon\s+(\w+)\s+in seq\.\s*#\s*(\d+).*?site\s*(\d+)").ok()
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Exit code 0 and an output file.
    Success,
    /// Non-zero exit code, but an output file was produced.
    Partial,
    Failed,
    TimedOut,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
        }
    }

    /// Whether results of this run can be summarized and tested.
    pub fn has_output(self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCodonDetail {
    pub codon: Option<String>,
    pub sequence_number: Option<u32>,
    pub site: Option<u32>,
    pub line: String,
}

/// A line that leaves codeml waiting for a newline on stdin.
pub fn is_prompt_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    (lower.contains("stop") && lower.contains("codon"))
        || (lower.contains("press") && lower.contains("enter"))
}

pub fn is_stop_codon_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("stop") && lower.contains("codon")
}

/// Codon, sequence number and site from `stop codon TAG in seq. # 2 ... site 214`.
pub fn parse_stop_codon_detail(line: &str) -> StopCodonDetail {
    let caps = STOP_CODON_DETAIL.as_ref().and_then(|re| re.captures(line));
    let group = |i: usize| caps.as_ref().and_then(|c| c.get(i)).map(|m| m.as_str());
    StopCodonDetail {
        codon: group(1).map(|s| s.to_string()),
        sequence_number: group(2).and_then(|s| s.parse().ok()),
        site: group(3).and_then(|s| s.parse().ok()),
        line: line.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeInput {
    File(PathBuf),
    /// Foreground-tagged Newick text, written as `labeled.nwk`.
    Labeled(String),
}

impl TreeInput {
    pub fn file_name(&self) -> String {
        match self {
            Self::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Self::Labeled(_) => LABELED_TREE_FILE_NAME.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub gene: String,
    pub model: String,
    /// Program followed by any leading arguments; the control file name is appended.
    pub command: Vec<String>,
    /// Control file already written to `model_dir`.
    pub ctl_path: PathBuf,
    pub sequence_file: PathBuf,
    pub tree: TreeInput,
    pub model_dir: PathBuf,
    pub output_name: String,
    pub timeout: Duration,
    pub auto_continue: bool,
}

/// Process-level outcome of one run, before output parsing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: Option<RunStatus>,
    pub exit_code: Option<i32>,
    pub output_file: Option<PathBuf>,
    pub elapsed_secs: f64,
    pub prompts_detected: usize,
    pub prompts_answered: usize,
    pub stop_details: Vec<StopCodonDetail>,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
    pub moved_files: Vec<PathBuf>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.status.unwrap_or(RunStatus::Failed)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_details.len()
    }

    fn failed(error: String) -> Self {
        Self {
            status: Some(RunStatus::Failed),
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Outcome of one (gene, model) run with its parsed results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub gene: String,
    pub model: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub lnl: Option<f64>,
    pub np: Option<u32>,
    #[serde(default)]
    pub omega: OmegaEstimate,
    pub elapsed_secs: f64,
    pub stop_count: usize,
    #[serde(default)]
    pub prompts_answered: usize,
    #[serde(default)]
    pub stop_details: Vec<StopCodonDetail>,
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RunResult {
    pub fn empty(gene: &str, model: &str, status: RunStatus) -> Self {
        Self {
            gene: gene.to_string(),
            model: model.to_string(),
            status,
            exit_code: None,
            lnl: None,
            np: None,
            omega: OmegaEstimate::Absent,
            elapsed_secs: 0.0,
            stop_count: 0,
            prompts_answered: 0,
            stop_details: vec![],
            output_file: None,
            warnings: vec![],
        }
    }

    /// lnL when the run produced usable output.
    pub fn usable_lnl(&self) -> Option<f64> {
        if self.status.has_output() {
            self.lnl
        } else {
            None
        }
    }
}

/// Results of one gene, keyed by model id.
pub type GeneResultSet = BTreeMap<String, RunResult>;
/// Results of a batch, keyed by gene name.
pub type BatchResults = BTreeMap<String, GeneResultSet>;

#[derive(Debug, Default)]
struct PromptTracker {
    detected: usize,
    answered: usize,
    stop_details: Vec<StopCodonDetail>,
}

type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;
type SharedTail = Arc<Mutex<VecDeque<String>>>;

struct PromptContext {
    gene: String,
    model: String,
    auto_continue: bool,
    stdin: SharedStdin,
    signals: Arc<BatchSignals>,
    log: Arc<RunLog>,
    tracker: Mutex<PromptTracker>,
    release: AtomicBool,
}

impl PromptContext {
    fn log(&self, text: &str) {
        self.log.run_line(&self.model, &self.gene, text);
    }

    fn send_newline(&self, reason: &str) {
        let mut guard = self.stdin.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match guard.as_mut() {
            Some(stdin) => stdin.write_all(b"\n").and_then(|_| stdin.flush()),
            None => Err(std::io::Error::new(ErrorKind::BrokenPipe, "stdin already closed")),
        };
        drop(guard);
        match result {
            Ok(()) => {
                self.tracker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .answered += 1;
                self.log(&format!("Sent Enter to subprocess ({reason})"));
            }
            Err(e) => self.log(&format!("Failed to send Enter ({reason}): {e}")),
        }
    }

    fn handle_prompt(&self, line: &str) {
        self.log(&format!("Detected prompt line: {line}"));
        let stop_count = {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.detected += 1;
            if is_stop_codon_line(line) {
                let detail = parse_stop_codon_detail(line);
                tracker.stop_details.push(detail.clone());
                Some((detail, tracker.stop_details.len()))
            } else {
                None
            }
        };
        if let Some((detail, count)) = stop_count {
            self.log.emit(&BatchEvent::StopCodon {
                gene: self.gene.clone(),
                model: self.model.clone(),
                detail,
                count,
            });
        }
        let decision = decide_continuation(
            self.auto_continue,
            self.signals.continue_all_active(),
            self.signals.has_continue_channel(),
        );
        match decision {
            Continuation::WaitForSignal => {
                self.log("Waiting for manual continue signal...");
                match self.signals.wait_for_continue(&self.release) {
                    WaitOutcome::Continue => self.send_newline("manual continue"),
                    WaitOutcome::ContinueAll => self.send_newline(Continuation::ContinueAll.as_str()),
                    WaitOutcome::Aborted => self.log("Batch aborted while waiting at prompt"),
                    WaitOutcome::Released => self.log("Process ended while waiting at prompt"),
                }
            }
            other => self.send_newline(other.as_str()),
        }
    }
}

fn push_tail(tail: &SharedTail, line: String) {
    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
    if tail.len() == STREAM_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

fn spawn_reader(
    stream: impl Read + Send + 'static,
    tail: SharedTail,
    context: Arc<PromptContext>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = vec![];
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if is_prompt_line(&line) {
                        context.handle_prompt(&line);
                    }
                    push_tail(&tail, line);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    context.log(&format!("Stream read error: {e}"));
                    break;
                }
            }
        }
    })
}

/// Joins a reader, giving up after `wait`; a reader still blocked is left detached.
fn join_bounded(handle: JoinHandle<()>, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
    handle.join().is_ok()
}

fn snapshot(tail: &SharedTail) -> Vec<String> {
    tail.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect()
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.exists() {
        fs::remove_file(dest)?;
    }
    if fs::rename(src, dest).is_err() {
        fs::copy(src, dest)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

fn kill_child(child: &mut Child) -> ReleaseOutcome {
    release_with_retry(
        KILL_POLICY,
        || match child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => match child.kill() {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err((e.kind(), format!("Could not kill process: {e}"))),
            },
        },
        |_, _| {},
    )
}

fn log_tail(log: &RunLog, label: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    log.line(&format!("  {label} (last {STREAM_TAIL_LINES} lines):"));
    log.lines(lines.iter().map(String::as_str));
}

/// Working directory for one run; a stale one that cannot be removed is
/// replaced by a fresh, timestamped directory.
fn prepare_work_dir(request: &RunRequest, log: &RunLog) -> Result<PathBuf, BatchError> {
    let mut work_dir = request.model_dir.join(format!("temp_{}", request.gene));
    if work_dir.exists() {
        let outcome = remove_dir_with_retry(&work_dir, STALE_DIR_POLICY, |n, msg| {
            log.warn(&format!(
                "{msg} (attempt {n}/{})",
                STALE_DIR_POLICY.attempts
            ))
        });
        if !outcome.is_released() {
            let fresh = request
                .model_dir
                .join(format!("temp_{}_{}", request.gene, unix_secs()));
            log.warn(&format!(
                "failed to remove {}; using new temp dir {}",
                work_dir.display(),
                fresh.display()
            ));
            work_dir = fresh;
        }
    }
    fs::create_dir_all(&work_dir).map_err(|e| BatchError::io_at("create", &work_dir, e))?;
    Ok(work_dir)
}

fn stage_inputs(request: &RunRequest, work_dir: &Path) -> Result<(), BatchError> {
    let copy = |src: &Path| -> Result<(), BatchError> {
        let dest = work_dir.join(file_name_of(src));
        fs::copy(src, &dest)
            .map(|_| ())
            .map_err(|e| BatchError::io_at("copy", src, e))
    };
    copy(&request.ctl_path)?;
    copy(&request.sequence_file)?;
    match &request.tree {
        TreeInput::File(path) => copy(path)?,
        TreeInput::Labeled(text) => {
            let dest = work_dir.join(LABELED_TREE_FILE_NAME);
            fs::write(&dest, text).map_err(|e| BatchError::io_at("write", &dest, e))?;
        }
    }
    Ok(())
}

/// Moves the output file and `.rst`/`.txt` artifacts to the model directory.
/// Input files stay where they are.
fn collect_artifacts(request: &RunRequest, work_dir: &Path, log: &RunLog) -> Vec<PathBuf> {
    let inputs = [
        file_name_of(&request.ctl_path),
        file_name_of(&request.sequence_file),
        request.tree.file_name(),
    ];
    let entries = match fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log.warn(&format!("Could not list '{}': {e}", work_dir.display()));
            return vec![];
        }
    };
    let mut moved = vec![];
    for entry in entries.flatten() {
        let src = entry.path();
        let name = file_name_of(&src);
        if !src.is_file() || inputs.contains(&name) {
            continue;
        }
        let wanted = name == request.output_name
            || src
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| ARTIFACT_EXTENSIONS.contains(&e));
        if !wanted {
            continue;
        }
        let dest = request.model_dir.join(&name);
        match move_file(&src, &dest) {
            Ok(()) => moved.push(dest),
            Err(e) => log.warn(&format!(
                "Failed to move {} -> {}: {e}",
                src.display(),
                dest.display()
            )),
        }
    }
    moved
}

enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Aborted,
    WaitFailed(String),
}

fn execute(
    request: &RunRequest,
    work_dir: &Path,
    signals: &Arc<BatchSignals>,
    log: &Arc<RunLog>,
) -> Result<RunOutcome, BatchError> {
    stage_inputs(request, work_dir)?;
    let (program, leading) = request
        .command
        .split_first()
        .ok_or_else(|| BatchError::config("No codeml executable configured"))?;
    let ctl_name = file_name_of(&request.ctl_path);
    log.run_line(
        &request.model,
        &request.gene,
        &format!(
            "Running command: {} {ctl_name} in {}",
            request.command.join(" "),
            work_dir.display()
        ),
    );
    let started = Instant::now();
    let mut child = Command::new(program)
        .args(leading)
        .arg(&ctl_name)
        .current_dir(work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BatchError::Spawn {
            executable: program.clone(),
            source: e,
        })?;

    let context = Arc::new(PromptContext {
        gene: request.gene.clone(),
        model: request.model.clone(),
        auto_continue: request.auto_continue,
        stdin: Arc::new(Mutex::new(child.stdin.take())),
        signals: signals.clone(),
        log: log.clone(),
        tracker: Mutex::new(PromptTracker::default()),
        release: AtomicBool::new(false),
    });
    let stdout_tail: SharedTail = Arc::default();
    let stderr_tail: SharedTail = Arc::default();
    let mut readers = vec![];
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, stdout_tail.clone(), context.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, stderr_tail.clone(), context.clone()));
    }

    let deadline = started + request.timeout;
    let ending = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ending::Exited(status),
            Ok(None) => {}
            Err(e) => break Ending::WaitFailed(e.to_string()),
        }
        if signals.is_aborted() {
            break Ending::Aborted;
        }
        if Instant::now() >= deadline {
            break Ending::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    };
    if !matches!(ending, Ending::Exited(_)) {
        if let ReleaseOutcome::Abandoned { last_error, .. } = kill_child(&mut child) {
            log.warn(&last_error);
        }
        if let Err(e) = child.wait() {
            log.warn(&format!("Could not reap process {}: {e}", child.id()));
        }
    }
    let elapsed_secs = started.elapsed().as_secs_f64();

    context.release.store(true, Ordering::SeqCst);
    signals.notify();
    context
        .stdin
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    for reader in readers {
        if !join_bounded(reader, READER_JOIN_WAIT) {
            log.run_line(
                &request.model,
                &request.gene,
                "Stream reader still blocked after exit; detached",
            );
        }
    }

    let tracker = std::mem::take(&mut *context.tracker.lock().unwrap_or_else(PoisonError::into_inner));
    let mut outcome = RunOutcome {
        elapsed_secs,
        prompts_detected: tracker.detected,
        prompts_answered: tracker.answered,
        stop_details: tracker.stop_details,
        stdout_tail: snapshot(&stdout_tail),
        stderr_tail: snapshot(&stderr_tail),
        ..RunOutcome::default()
    };

    let status = match ending {
        Ending::TimedOut => {
            log.run_line(
                &request.model,
                &request.gene,
                &format!("TIMEOUT after {}s", request.timeout.as_secs_f64()),
            );
            log_tail(log, "Captured stdout", &outcome.stdout_tail);
            log_tail(log, "Captured stderr", &outcome.stderr_tail);
            outcome.status = Some(RunStatus::TimedOut);
            return Ok(outcome);
        }
        Ending::Aborted => {
            log.run_line(&request.model, &request.gene, "Aborted; process terminated");
            outcome.status = Some(RunStatus::Aborted);
            return Ok(outcome);
        }
        Ending::WaitFailed(e) => {
            log.run_line(&request.model, &request.gene, &format!("Could not wait for process: {e}"));
            outcome.error = Some(e);
            None
        }
        Ending::Exited(status) => Some(status),
    };

    outcome.exit_code = status.and_then(|s| s.code());
    log.run_line(
        &request.model,
        &request.gene,
        &format!(
            "process returncode={}",
            outcome
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        ),
    );
    log_tail(log, "stdout", &outcome.stdout_tail);
    log_tail(log, "stderr", &outcome.stderr_tail);
    let clean_exit = outcome.exit_code == Some(0);
    if !clean_exit {
        log.run_line(
            &request.model,
            &request.gene,
            "Non-zero return code; looking for output anyway",
        );
    }

    outcome.moved_files = collect_artifacts(request, work_dir, log);
    let output_path = request.model_dir.join(&request.output_name);
    outcome.status = Some(if output_path.is_file() {
        outcome.output_file = Some(output_path);
        if clean_exit {
            RunStatus::Success
        } else {
            RunStatus::Partial
        }
    } else {
        log.run_line(
            &request.model,
            &request.gene,
            &format!("expected output file not found: {}", output_path.display()),
        );
        RunStatus::Failed
    });
    Ok(outcome)
}

/// Runs codeml for one (gene, model). Only an empty command or a failed
/// launch is returned as an error; every other problem ends up in the outcome.
pub fn run_codeml(
    request: &RunRequest,
    signals: &Arc<BatchSignals>,
    log: &Arc<RunLog>,
) -> Result<RunOutcome, BatchError> {
    if !signals.wait_while_paused() {
        return Ok(RunOutcome {
            status: Some(RunStatus::Aborted),
            ..RunOutcome::default()
        });
    }
    if let Err(e) = fs::create_dir_all(&request.model_dir) {
        let err = BatchError::io_at("create", &request.model_dir, e);
        log.run_line(&request.model, &request.gene, &err.to_string());
        return Ok(RunOutcome::failed(err.to_string()));
    }
    let work_dir = match prepare_work_dir(request, log) {
        Ok(dir) => dir,
        Err(e) => {
            log.run_line(&request.model, &request.gene, &format!("EXCEPTION - {e}"));
            return Ok(RunOutcome::failed(e.to_string()));
        }
    };

    let result = execute(request, &work_dir, signals, log);

    let outcome = remove_dir_with_retry(&work_dir, FINAL_CLEANUP_POLICY, |n, msg| {
        log.line(&format!(
            "Cleanup: {msg} (attempt {n}/{})",
            FINAL_CLEANUP_POLICY.attempts
        ))
    });
    if !outcome.is_released() {
        log.warn(&format!(
            "Cleanup: failed to remove {} after retries; leaving it in place",
            work_dir.display()
        ));
    }

    match result {
        Ok(outcome) => {
            log.run_line(
                &request.model,
                &request.gene,
                &format!(
                    "FINISHED (status={}, time={:.1}s, stop_count={})",
                    outcome.status().as_str(),
                    outcome.elapsed_secs,
                    outcome.stop_count()
                ),
            );
            if !outcome.stop_details.is_empty() {
                log.line("  Stop details:");
                for detail in &outcome.stop_details {
                    log.line(&format!("    {}", detail.line));
                }
            }
            Ok(outcome)
        }
        Err(e @ (BatchError::Spawn { .. } | BatchError::Config(_))) => {
            log.run_line(&request.model, &request.gene, &format!("ERROR - {e}"));
            Err(e)
        }
        Err(e) => {
            log.run_line(&request.model, &request.gene, &format!("EXCEPTION - {e}"));
            Ok(RunOutcome::failed(e.to_string()))
        }
    }
}

#[cfg(all(test, unix))]
pub(crate) mod fake_codeml {
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};

    /// Executable stand-in for codeml; `$out` holds the control file's outfile.
    pub fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        let header = r#"out=$(sed -n 's/^ *outfile *= *\([^ *]*\).*/\1/p' "$1")"#;
        fs::write(&path, format!("#!/bin/sh\n{header}\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::fake_codeml::write_script;
    use super::*;
    use crate::run_log::EventSink;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            fs::write(root.join("geneA.fas"), ">a\nATGATG\n>b\nATGATG\n").unwrap();
            fs::write(root.join("species.tree"), "(a,b);\n").unwrap();
            fs::create_dir_all(root.join("M0")).unwrap();
            fs::write(
                root.join("M0").join("geneA_M0.ctl"),
                "seqfile = geneA.fas\ntreefile = species.tree\noutfile = geneA_M0_results.txt\n",
            )
            .unwrap();
            Self { _dir: dir, root }
        }

        fn request(&self, body: &str, timeout_ms: u64, auto_continue: bool) -> RunRequest {
            let script = write_script(&self.root, "fake_codeml.sh", body);
            RunRequest {
                gene: "geneA".to_string(),
                model: "M0".to_string(),
                command: vec!["/bin/sh".to_string(), script],
                ctl_path: self.root.join("M0").join("geneA_M0.ctl"),
                sequence_file: self.root.join("geneA.fas"),
                tree: TreeInput::File(self.root.join("species.tree")),
                model_dir: self.root.join("M0"),
                output_name: "geneA_M0_results.txt".to_string(),
                timeout: Duration::from_millis(timeout_ms),
                auto_continue,
            }
        }

        fn log(&self) -> Arc<RunLog> {
            Arc::new(RunLog::open(&self.root.join("batch_analysis_log.txt"), None).unwrap())
        }

        fn log_text(&self) -> String {
            fs::read_to_string(self.root.join("batch_analysis_log.txt")).unwrap()
        }
    }

    const WRITE_OUTPUT: &str = "echo 'lnL(ntime: 3  np: 5):  -100.5  +0.0' > \"$out\"\necho 'extra' > rst1.txt";

    #[test]
    fn successful_run_moves_artifacts_and_cleans_up() {
        let fx = Fixture::new();
        let request = fx.request(&format!("echo working\n{WRITE_OUTPUT}"), 10_000, true);
        let outcome = run_codeml(&request, &Arc::new(BatchSignals::new()), &fx.log()).unwrap();
        assert_eq!(outcome.status(), RunStatus::Success);
        assert_eq!(outcome.exit_code, Some(0));
        let output = fx.root.join("M0").join("geneA_M0_results.txt");
        assert_eq!(outcome.output_file.as_deref(), Some(output.as_path()));
        assert!(fx.root.join("M0").join("rst1.txt").exists());
        assert!(!fx.root.join("M0").join("temp_geneA").exists());
        assert!(!fx.root.join("M0").join("geneA.fas").exists());
        assert_eq!(outcome.stdout_tail, vec!["working"]);
        assert!(fx.log_text().contains("[M0] geneA: process returncode=0"));
    }

    #[test]
    fn stop_codon_prompt_is_answered_automatically() {
        let fx = Fixture::new();
        let body = format!(
            "echo 'stop codon TAG in seq. # 2 (b), nucleotide site 214'\nread answer\n{WRITE_OUTPUT}"
        );
        let events = Arc::new(Mutex::new(vec![]));
        let sink: EventSink = {
            let events = events.clone();
            Arc::new(move |e: &BatchEvent| {
                if let BatchEvent::StopCodon { detail, .. } = e {
                    events.lock().unwrap().push(detail.clone());
                }
            })
        };
        let log = Arc::new(RunLog::open(&fx.root.join("batch_analysis_log.txt"), Some(sink)).unwrap());
        let request = fx.request(&body, 10_000, true);
        let outcome = run_codeml(&request, &Arc::new(BatchSignals::with_continue_channel()), &log)
            .unwrap();
        assert_eq!(outcome.status(), RunStatus::Success);
        assert_eq!(outcome.stop_count(), 1);
        assert_eq!(outcome.prompts_answered, 1);
        assert_eq!(outcome.stop_details[0].site, Some(214));
        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(fx.log_text().contains("Sent Enter to subprocess (auto-continue)"));
    }

    #[test]
    fn prompt_waits_for_explicit_continue() {
        let fx = Fixture::new();
        let body = format!("echo 'Press Enter to continue' >&2\nread answer\n{WRITE_OUTPUT}");
        let signals = Arc::new(BatchSignals::with_continue_channel());
        let releaser = {
            let signals = signals.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                signals.request_continue();
            })
        };
        let outcome = run_codeml(&fx.request(&body, 10_000, false), &signals, &fx.log()).unwrap();
        releaser.join().unwrap();
        assert_eq!(outcome.status(), RunStatus::Success);
        assert_eq!(outcome.prompts_detected, 1);
        assert_eq!(outcome.stop_count(), 0);
        assert!(fx.log_text().contains("Waiting for manual continue signal"));
    }

    #[test]
    fn prompt_without_channel_falls_back_to_auto() {
        let fx = Fixture::new();
        let body = format!("echo 'stop codon found'\nread answer\n{WRITE_OUTPUT}");
        let outcome =
            run_codeml(&fx.request(&body, 10_000, false), &Arc::new(BatchSignals::new()), &fx.log())
                .unwrap();
        assert_eq!(outcome.status(), RunStatus::Success);
        assert!(fx.log_text().contains("no-channel fallback"));
    }

    #[test]
    fn non_zero_exit_with_output_is_partial() {
        let fx = Fixture::new();
        let body = format!("{WRITE_OUTPUT}\nexit 3");
        let outcome =
            run_codeml(&fx.request(&body, 10_000, true), &Arc::new(BatchSignals::new()), &fx.log())
                .unwrap();
        assert_eq!(outcome.status(), RunStatus::Partial);
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[test]
    fn missing_output_is_failed() {
        let fx = Fixture::new();
        let outcome =
            run_codeml(&fx.request("echo nothing", 10_000, true), &Arc::new(BatchSignals::new()), &fx.log())
                .unwrap();
        assert_eq!(outcome.status(), RunStatus::Failed);
        assert!(fx.log_text().contains("expected output file not found"));
    }

    #[test]
    fn timeout_kills_the_process() {
        let fx = Fixture::new();
        let started = Instant::now();
        let outcome =
            run_codeml(&fx.request("echo started\nexec sleep 30", 300, true), &Arc::new(BatchSignals::new()), &fx.log())
                .unwrap();
        assert_eq!(outcome.status(), RunStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(fx.log_text().contains("TIMEOUT after"));
        assert!(!fx.log_text().contains("Could not reap"));
        assert!(!fx.root.join("M0").join("temp_geneA").exists());
    }

    #[test]
    fn stale_work_dir_is_replaced() {
        let fx = Fixture::new();
        let stale = fx.root.join("M0").join("temp_geneA");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.txt"), "old").unwrap();
        let outcome =
            run_codeml(&fx.request(WRITE_OUTPUT, 10_000, true), &Arc::new(BatchSignals::new()), &fx.log())
                .unwrap();
        assert_eq!(outcome.status(), RunStatus::Success);
        assert!(!fx.root.join("M0").join("old.txt").exists());
    }

    #[test]
    fn aborted_batch_never_starts() {
        let fx = Fixture::new();
        let signals = Arc::new(BatchSignals::new());
        signals.abort();
        let outcome = run_codeml(&fx.request(WRITE_OUTPUT, 10_000, true), &signals, &fx.log()).unwrap();
        assert_eq!(outcome.status(), RunStatus::Aborted);
        assert!(!fx.root.join("M0").join("temp_geneA").exists());
    }

    #[test]
    fn missing_executable_is_spawn_error() {
        let fx = Fixture::new();
        let mut request = fx.request(WRITE_OUTPUT, 10_000, true);
        request.command = vec!["/nonexistent/codeml".to_string()];
        let err = run_codeml(&request, &Arc::new(BatchSignals::new()), &fx.log()).unwrap_err();
        assert!(matches!(err, BatchError::Spawn { .. }));
        assert!(!fx.root.join("M0").join("temp_geneA").exists());
    }
}
