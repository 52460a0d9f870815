//! Output formatting: text, JSON, YAML.
//!
//! Renders the dependency view in the format selected by `--output`. Text
//! is a compact per-manifest listing; structured formats use serde.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use owo_colors::OwoColorize;
use serde::Serialize;

use depsync_core::{
    CondaDependencies, DepsController, SliceKind, SliceState, SyncError, UvDependencies,
};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

#[derive(Clone, Copy)]
struct Painter {
    enabled: bool,
}

impl Painter {
    fn heading(self, text: &str) -> String {
        if self.enabled {
            text.bold().cyan().to_string()
        } else {
            text.to_owned()
        }
    }

    fn dim(self, text: &str) -> String {
        if self.enabled {
            text.dimmed().to_string()
        } else {
            text.to_owned()
        }
    }

    fn error(self, text: &str) -> String {
        if self.enabled {
            text.red().to_string()
        } else {
            text.to_owned()
        }
    }
}

// ── View model ───────────────────────────────────────────────────────

/// A failure recorded against one slice.
#[derive(Debug, Clone, Serialize)]
pub struct SliceFailure {
    pub slice: SliceKind,
    #[serde(flatten)]
    pub error: SyncError,
}

/// Everything the CLI prints about the dependencies.
#[derive(Debug, Clone, Serialize)]
pub struct DepsView {
    pub uv: Option<Arc<UvDependencies>>,
    pub conda: Option<Arc<CondaDependencies>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SliceFailure>,
}

impl DepsView {
    pub fn capture(controller: &DepsController) -> Self {
        Self::from_states(&controller.uv_state(), &controller.conda_state())
    }

    pub fn from_states(
        uv: &SliceState<UvDependencies>,
        conda: &SliceState<CondaDependencies>,
    ) -> Self {
        let errors = [
            (SliceKind::Uv, uv.error.clone()),
            (SliceKind::Conda, conda.error.clone()),
        ]
        .into_iter()
        .filter_map(|(slice, error)| error.map(|error| SliceFailure { slice, error }))
        .collect();

        Self {
            uv: uv.value.clone(),
            conda: conda.value.clone(),
            errors,
        }
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render the view in the chosen format.
pub fn render_view(format: OutputFormat, view: &DepsView, color: bool) -> String {
    match format {
        OutputFormat::Text => render_text(view, Painter { enabled: color }),
        OutputFormat::Json => render_json_pretty(view),
        OutputFormat::Yaml => render_yaml(view),
    }
}

/// Render the view for a line-oriented feed: JSON becomes one compact
/// object per line.
pub fn render_feed_entry(format: OutputFormat, view: &DepsView, color: bool) -> String {
    match format {
        OutputFormat::Json => render_json_compact(view),
        other => render_view(other, view, color),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_text(view: &DepsView, paint: Painter) -> String {
    let mut lines = Vec::new();

    match &view.uv {
        Some(uv) => {
            let mut header = paint.heading("uv");
            if let Some(req) = &uv.requires_python {
                header.push_str(&paint.dim(&format!("  requires-python {req}")));
            }
            lines.push(header);
            push_entries(&mut lines, &uv.dependencies, paint);
        }
        None => lines.push(format!("{}  {}", paint.heading("uv"), paint.dim("(no manifest)"))),
    }

    match &view.conda {
        Some(conda) => {
            let mut header = paint.heading("conda");
            if !conda.channels.is_empty() {
                header.push_str(&paint.dim(&format!("  channels {}", conda.channels.join(", "))));
            }
            if let Some(python) = &conda.python {
                header.push_str(&paint.dim(&format!("  python {python}")));
            }
            lines.push(header);
            push_entries(&mut lines, &conda.dependencies, paint);
        }
        None => lines.push(format!(
            "{}  {}",
            paint.heading("conda"),
            paint.dim("(no manifest)")
        )),
    }

    for failure in &view.errors {
        lines.push(paint.error(&format!("! {}: {}", failure.slice, failure.error)));
    }

    lines.join("\n")
}

fn push_entries(lines: &mut Vec<String>, entries: &[String], paint: Painter) {
    if entries.is_empty() {
        lines.push(format!("  {}", paint.dim("(no dependencies)")));
    } else {
        lines.extend(entries.iter().map(|dep| format!("  {dep}")));
    }
}

/// Pretty-printed JSON.
pub(crate) fn render_json_pretty<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).expect("serialization should not fail")
}

/// Compact single-line JSON.
pub(crate) fn render_json_compact<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string(data).expect("serialization should not fail")
}

/// YAML output.
pub(crate) fn render_yaml<T: Serialize + ?Sized>(data: &T) -> String {
    serde_yaml::to_string(data).expect("serialization should not fail")
}
