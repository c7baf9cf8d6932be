#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Static HTML dashboard.
//!
//! The analysis notebooks save each plot next to a small JSON metadata
//! file in a `dashboard_plots/` directory. This crate reads that metadata
//! and renders a single self-contained `index.html` with one card per
//! plot, ordered by creation time.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Deserialize;

/// Directory (relative to the HTML page) that holds plot assets.
pub const PLOTS_DIR_NAME: &str = "dashboard_plots";

/// Errors that can occur while building the dashboard.
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// I/O error (directory listing, file write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A metadata file is not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The plots directory holds no readable metadata.
    #[error("No plots found in {}", dir.display())]
    NoPlots {
        /// The directory that was scanned.
        dir: PathBuf,
    },
}

/// How a plot is embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    /// Static image, embedded with `<img>`.
    #[default]
    Matplotlib,
    /// Interactive HTML, embedded with `<iframe>`.
    Plotly,
}

/// Metadata saved alongside each plot.
///
/// Every field is optional in the saved JSON; missing text falls back to
/// the placeholders the cards show.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlotMetadata {
    /// Card heading.
    #[serde(default = "untitled")]
    pub title: String,
    /// Text shown under the heading.
    #[serde(default)]
    pub description: String,
    /// Plot name, shown on the card and used to locate the asset when no
    /// explicit path was saved.
    #[serde(default)]
    pub filename: String,
    /// Creation timestamp; cards are ordered by this string.
    #[serde(default)]
    pub created: Option<String>,
    /// Optional grouping label shown on the card.
    #[serde(default)]
    pub category: Option<String>,
    /// Embedding style.
    #[serde(default, rename = "type")]
    pub kind: PlotKind,
    /// Saved image path of a static plot.
    #[serde(default)]
    pub image_path: Option<String>,
    /// Saved HTML path of an interactive plot.
    #[serde(default)]
    pub html_path: Option<String>,
}

fn untitled() -> String {
    "Untitled Plot".to_string()
}

impl PlotMetadata {
    /// Path of the plot asset relative to the dashboard page.
    ///
    /// Prefers the saved `image_path` (static) or `html_path`
    /// (interactive). Paths saved as `images/...` are relative to the
    /// plots directory and get its prefix. Without a saved path the asset
    /// is assumed to be `filename` inside the plots directory.
    #[must_use]
    pub fn asset_path(&self) -> String {
        let saved = match self.kind {
            PlotKind::Matplotlib => self.image_path.as_deref(),
            PlotKind::Plotly => self.html_path.as_deref(),
        }
        .filter(|path| !path.is_empty());

        match saved {
            Some(path) if path.starts_with("images/") => format!("{PLOTS_DIR_NAME}/{path}"),
            Some(path) => path.to_string(),
            None => format!("{PLOTS_DIR_NAME}/{}", self.filename.trim_start_matches('/')),
        }
    }

    /// The creation timestamp, or `Unknown`.
    #[must_use]
    pub fn created_label(&self) -> &str {
        self.created.as_deref().unwrap_or("Unknown")
    }
}

/// Loads every `*.json` metadata file in `dir`, sorted by `created`.
///
/// Files that cannot be read or parsed are logged and skipped.
///
/// # Errors
///
/// Returns [`DashboardError::Io`] if `dir` cannot be listed.
pub fn load_plots(dir: &Path) -> Result<Vec<PlotMetadata>, DashboardError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut plots: Vec<PlotMetadata> = paths
        .iter()
        .filter_map(|path| match read_metadata(path) {
            Ok(plot) => Some(plot),
            Err(e) => {
                log::warn!("Could not load {}: {e}", path.display());
                None
            }
        })
        .collect();

    plots.sort_by(|a, b| {
        a.created
            .as_deref()
            .unwrap_or_default()
            .cmp(b.created.as_deref().unwrap_or_default())
    });
    log::debug!("Loaded {} plots from {}", plots.len(), dir.display());
    Ok(plots)
}

fn read_metadata(path: &Path) -> Result<PlotMetadata, DashboardError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Escapes text for safe inclusion in HTML content and attributes.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const STYLE: &str = r"
    body {
        font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif;
        margin: 0;
        padding: 20px;
        background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
        min-height: 100vh;
    }
    .container { max-width: 1200px; margin: 0 auto; }
    .header { text-align: center; color: white; margin-bottom: 40px; }
    .header h1 { font-size: 2.5rem; margin-bottom: 10px; }
    .plots-section { margin-bottom: 40px; }
    .section-title { color: white; font-size: 1.8rem; margin-bottom: 20px; }
    .plots-grid { display: grid; grid-template-columns: repeat(2, 1fr); gap: 30px; }
    .plot-card {
        background: white;
        border-radius: 10px;
        padding: 20px;
        box-shadow: 0 4px 6px rgba(0,0,0,0.1);
        display: flex;
        flex-direction: column;
    }
    .plot-card h3 { margin-top: 0; color: #333; }
    .plot-card img { width: 100%; height: auto; border-radius: 5px; object-fit: contain; }
    .plot-card iframe { width: 100%; height: 400px; border: none; border-radius: 5px; }
    .category { font-size: 0.8rem; text-transform: uppercase; color: #764ba2; }
    .metadata { font-size: 0.9rem; color: #666; margin-top: 10px; }
";

impl PlotKind {
    const fn section_title(self) -> &'static str {
        match self {
            Self::Matplotlib => "Static Visualizations",
            Self::Plotly => "Interactive Visualizations",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Matplotlib => "Static Visualization",
            Self::Plotly => "Interactive Visualization",
        }
    }
}

fn render_card(html: &mut String, plot: &PlotMetadata) {
    let title = escape_html(&plot.title);
    let src = escape_html(&plot.asset_path());

    html.push_str("          <div class=\"plot-card\">\n");
    if let Some(category) = &plot.category {
        let _ = writeln!(
            html,
            "            <div class=\"category\">{}</div>",
            escape_html(category)
        );
    }
    let _ = writeln!(html, "            <h3>{title}</h3>");
    if !plot.description.is_empty() {
        let _ = writeln!(html, "            <p>{}</p>", escape_html(&plot.description));
    }
    match plot.kind {
        PlotKind::Matplotlib => {
            let _ = writeln!(html, "            <img src=\"{src}\" alt=\"{title}\">");
        }
        PlotKind::Plotly => {
            let _ = writeln!(
                html,
                "            <iframe src=\"{src}\" title=\"{title}\"></iframe>"
            );
        }
    }
    let file = if plot.filename.is_empty() {
        "Unknown"
    } else {
        plot.filename.as_str()
    };
    let _ = writeln!(
        html,
        "            <div class=\"metadata\"><strong>Type:</strong> {}<br><strong>Created:</strong> {}<br><strong>File:</strong> {}</div>",
        plot.kind.label(),
        escape_html(plot.created_label()),
        escape_html(file)
    );
    html.push_str("          </div>\n");
}

fn render_section(html: &mut String, kind: PlotKind, plots: &[PlotMetadata]) {
    let mut cards = plots.iter().filter(|p| p.kind == kind).peekable();
    if cards.peek().is_none() {
        return;
    }

    html.push_str("      <div class=\"plots-section\">\n");
    let _ = writeln!(
        html,
        "        <h2 class=\"section-title\">{}</h2>",
        kind.section_title()
    );
    html.push_str("        <div class=\"plots-grid\">\n");
    for plot in cards {
        render_card(html, plot);
    }
    html.push_str("        </div>\n      </div>\n");
}

/// Renders the dashboard page for `plots` (already in display order).
///
/// Static and interactive plots get separate sections; a kind with no
/// plots gets no section.
#[must_use]
pub fn render_dashboard(plots: &[PlotMetadata], generated_at: NaiveDateTime) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("  <meta charset=\"UTF-8\">\n");
    html.push_str(
        "  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    html.push_str("  <title>Backyard Ecology Dashboard</title>\n");
    let _ = writeln!(html, "  <style>{STYLE}  </style>");
    html.push_str("</head>\n<body>\n  <div class=\"container\">\n");
    html.push_str("    <div class=\"header\">\n      <h1>Backyard Ecology Dashboard</h1>\n");
    let _ = writeln!(
        html,
        "      <p>Last updated: {} &middot; {} plots</p>",
        generated_at.format("%Y-%m-%d %H:%M"),
        plots.len()
    );
    html.push_str("    </div>\n");
    render_section(&mut html, PlotKind::Matplotlib, plots);
    render_section(&mut html, PlotKind::Plotly, plots);
    html.push_str("  </div>\n</body>\n</html>\n");
    html
}

/// Loads the plots in `plots_dir` and writes the dashboard page to `out`.
/// Returns the number of plots rendered.
///
/// # Errors
///
/// * [`DashboardError::NoPlots`] if no metadata could be loaded.
/// * [`DashboardError::Io`] if the directory or output cannot be accessed.
pub fn write_dashboard(plots_dir: &Path, out: &Path) -> Result<usize, DashboardError> {
    let plots = load_plots(plots_dir)?;
    if plots.is_empty() {
        return Err(DashboardError::NoPlots {
            dir: plots_dir.to_path_buf(),
        });
    }

    let html = render_dashboard(&plots, chrono::Local::now().naive_local());
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, html)?;
    log::info!("Dashboard written to {} ({} plots)", out.display(), plots.len());
    Ok(plots.len())
}
