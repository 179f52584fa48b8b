//! Interactive playground shell.
//!
//! Reads one command per line from stdin. Program output is printed as it
//! arrives; when a file is given, saving it on disk counts as an edit, so
//! auto-run picks it up.

use crate::render::{print_records, render_source};
use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use playground_core::config::Config;
use playground_core::orchestrator::{DispatchError, RunHandle, RunOrchestrator};
use playground_core::samples::{SampleLibrary, CHOOSE_ENTRY, DEFAULT_ENTRY};
use std::io::IsTerminal;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "\
commands:
  run              run the current source (throttled)
  stop             stop the running program
  auto on|off      toggle running after edits
  sample <name>    load and run a sample (`choose` restores your source)
  samples          list samples
  input <text>     send a line of input to the running program
  save             save and run the current source
  load <file>      replace the source with a file's contents
  show             print the source with error lines marked
  quit             leave the playground";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Run,
    Stop,
    Auto(bool),
    Sample(String),
    Samples,
    Input(String),
    Save,
    Load(PathBuf),
    Show,
    Help,
    Quit,
}

impl ShellCommand {
    /// Parse one input line; blank lines parse to `None`
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let command = match (name, rest) {
            ("run", "") => Self::Run,
            ("stop", "") => Self::Stop,
            ("auto", "on") => Self::Auto(true),
            ("auto", "off") => Self::Auto(false),
            ("auto", _) => return Err("usage: auto on|off".to_string()),
            ("sample", "") => return Err("usage: sample <name>".to_string()),
            ("sample", sample) => Self::Sample(sample.to_string()),
            ("samples", "") => Self::Samples,
            ("input", text) => Self::Input(text.to_string()),
            ("save", "") => Self::Save,
            ("load", "") => return Err("usage: load <file>".to_string()),
            ("load", path) => Self::Load(PathBuf::from(path)),
            ("show", "") => Self::Show,
            ("help" | "?", _) => Self::Help,
            ("quit" | "exit", "") => Self::Quit,
            _ => return Err(format!("unknown command: {line} (try `help`)")),
        };
        Ok(Some(command))
    }
}

pub async fn interactive_shell(config: &Config, file: Option<&Path>, auto_run: bool) -> Result<()> {
    let playground = super::open_playground(config)?;
    if auto_run {
        playground.set_auto_run(true);
    }
    let color = std::io::stdout().is_terminal();

    // Output pane: print what changed since the last notification
    let cursor = Mutex::new(PaneCursor::default());
    let log = Arc::downgrade(playground.log());
    playground.log().subscribe(move |records| {
        let Some(log) = log.upgrade() else { return };
        let unseen = cursor.lock().unseen(records.len(), log.clear_count());
        print_records(&records[unseen], color);
    });
    playground.subscribe(|state| eprintln!("[{state}]"));

    let (file_tx, mut file_rx) = mpsc::unbounded_channel();
    let _watcher = match file {
        Some(path) => {
            let code = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            playground.editor().load(code);
            Some(watch_file(path, file_tx)?)
        }
        None => None,
    };

    println!("Lox playground. Type `help` for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read command")? else {
                    break;
                };
                match ShellCommand::parse(&line) {
                    Ok(Some(command)) => {
                        if !execute(&playground, command, color).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                }
            }
            Some(()) = file_rx.recv() => {
                if let Some(path) = file {
                    reload_file(&playground, path);
                }
            }
        }
    }

    playground.stop().await;
    Ok(())
}

/// What the output pane has printed so far
#[derive(Debug, Default)]
struct PaneCursor {
    printed: usize,
    clears: u64,
}

impl PaneCursor {
    /// Records to print for a log of `len` records that has been cleared
    /// `clears` times; a clear since the last call reprints from the top
    fn unseen(&mut self, len: usize, clears: u64) -> Range<usize> {
        let start = if clears != self.clears || len < self.printed {
            0
        } else {
            self.printed
        };
        self.printed = len;
        self.clears = clears;
        start..len
    }
}

/// Returns false when the shell should exit
async fn execute(playground: &RunOrchestrator, command: ShellCommand, color: bool) -> bool {
    match command {
        ShellCommand::Run => match playground.run_clicked() {
            Some(dispatched) => report(dispatched),
            None => eprintln!("run ignored: clicked too soon after the last run"),
        },
        ShellCommand::Stop => {
            if !playground.stop().await {
                eprintln!("nothing is running");
            }
        }
        ShellCommand::Auto(enabled) => {
            playground.set_auto_run(enabled);
            println!("auto-run {}", if enabled { "on" } else { "off" });
        }
        ShellCommand::Sample(name) => report(playground.select_sample(&name)),
        ShellCommand::Samples => {
            println!("{CHOOSE_ENTRY}");
            println!("{DEFAULT_ENTRY}");
            for name in playground.samples().names() {
                println!("{}", SampleLibrary::display_name(name));
            }
        }
        ShellCommand::Input(text) => {
            if let Err(err) = playground.provide_input(&text).await {
                eprintln!("{err}");
            }
        }
        ShellCommand::Save => report(playground.save_shortcut()),
        ShellCommand::Load(path) => match std::fs::read_to_string(&path) {
            Ok(code) => {
                playground.editor().edit(code);
            }
            Err(err) => eprintln!("Failed to read {:?}: {err}", path),
        },
        ShellCommand::Show => {
            let editor = playground.editor();
            println!(
                "{}",
                render_source(
                    &editor.text(),
                    &editor.decorations(),
                    &editor.keyword_decorations(),
                    color
                )
            );
        }
        ShellCommand::Help => println!("{HELP}"),
        ShellCommand::Quit => return false,
    }
    true
}

/// Print a summary once a dispatched run ends
fn report(dispatched: Result<RunHandle, DispatchError>) {
    let handle = match dispatched {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    tokio::spawn(async move {
        match handle.wait().await {
            Ok(outcome) if !outcome.error_locations.is_empty() => {
                let lines: Vec<String> = outcome
                    .error_locations
                    .iter()
                    .map(|loc| loc.line.to_string())
                    .collect();
                eprintln!("errors on line {} (`show` to see them)", lines.join(", "));
            }
            Ok(_) => {}
            Err(err) => eprintln!("run failed: {err}"),
        }
    });
}

/// Watch the directory holding `path`; editors often save by replacing the
/// file, which a watch on the file itself would miss
fn watch_file(path: &Path, changed: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
    let file_name = path.file_name().map(|name| name.to_os_string());
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if relevant {
                    let _ = changed.send(());
                }
            }
            Err(err) => tracing::warn!("Watcher error: {}", err),
        },
        notify::Config::default(),
    )
    .context("Failed to initialize file watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {:?}", dir))?;
    Ok(watcher)
}

/// Mirror the file into the editor as a user edit
fn reload_file(playground: &RunOrchestrator, path: &Path) {
    match std::fs::read_to_string(path) {
        Ok(code) if code != playground.editor().text() => {
            tracing::debug!(path = %path.display(), "source changed on disk");
            playground.editor().edit(code);
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(path = %path.display(), "Failed to reload source: {}", err),
    }
}
