//! One-shot run: dispatch a program, print the output pane, and show the
//! source with its error lines when the run reported any.

use crate::render::{print_records, render_source};
use anyhow::{bail, Context, Result};
use playground_core::config::Config;
use playground_core::orchestrator::{DispatchOptions, Trigger};
use std::io::IsTerminal;
use std::path::Path;

pub async fn run_once(config: &Config, file: Option<&Path>, no_save: bool) -> Result<()> {
    let playground = super::open_playground(config)?;
    let editor = playground.editor();

    if let Some(file) = file {
        let code = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {:?}", file))?;
        editor.load(code);
    }

    let mut options = DispatchOptions::new(Trigger::Direct);
    if no_save {
        options = options.skip_save();
    }
    let handle = playground.dispatch(&editor.text(), options)?;
    let result = handle.wait().await;

    let color = std::io::stderr().is_terminal();
    print_records(&playground.log().records(), color);

    let error_lines = editor.error_lines();
    if !error_lines.is_empty() {
        eprintln!();
        eprintln!(
            "{}",
            render_source(
                &editor.text(),
                &editor.decorations(),
                &editor.keyword_decorations(),
                color
            )
        );
    }

    let outcome = result.context("Run failed")?;
    if outcome.has_errors() {
        let count = outcome.records.iter().filter(|r| r.is_error).count();
        bail!("program reported {} error line(s)", count);
    }
    Ok(())
}
