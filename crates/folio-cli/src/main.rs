use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use folio_common::config::{FileStore, Loader};
use folio_common::telemetry::{self, TelemetryConfig};
use folio_common::RenderConfig;
use folio_renderer::enrich::highlight::theme_css;
use folio_renderer::{RenderOptions, RenderedDocument, Renderer};
use miette::{IntoDiagnostic, Result};

#[derive(Parser)]
#[command(version, about = "Folio - render folio Markdown to sanitized HTML", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (.json or .toml). FOLIO_* environment variables override it.
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a document and print `{ html, tocItems }` as JSON
    Render {
        /// Markdown file, or `-` for stdin
        file: PathBuf,

        /// Render as a reader comment
        #[arg(long)]
        comment: bool,

        /// Skip link previews; links become fallback cards
        #[arg(long)]
        offline: bool,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Print the stylesheet for highlighted code
    Css,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette();
    telemetry::init_tracing(TelemetryConfig::from_env("folio-cli"));

    let cli = Cli::parse();
    match cli.command {
        Commands::Render {
            file,
            comment,
            offline,
            pretty,
        } => {
            let config = load_config(cli.config.as_deref()).await?;
            let source = read_source(&file)?;
            let mut renderer = Renderer::new(config)?;
            if offline {
                let options = renderer.options() - RenderOptions::LINK_PREVIEWS;
                renderer = renderer.with_options(options);
            }

            let doc = if comment {
                RenderedDocument {
                    html: renderer.render_comment(&source),
                    toc_items: Vec::new(),
                }
            } else {
                renderer.render_article(&source).await
            };
            tracing::info!(
                bytes = doc.html.len(),
                headings = doc.toc_items.len(),
                "rendered {}",
                file.display()
            );

            let json = if pretty {
                serde_json::to_string_pretty(&doc)
            } else {
                serde_json::to_string(&doc)
            }
            .into_diagnostic()?;
            println!("{json}");
        }
        Commands::Css => print!("{}", theme_css()),
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<RenderConfig> {
    let base = match path {
        Some(path) => FileStore::new(path).load().await?,
        None => RenderConfig::default(),
    };
    Ok(base.merge_env(|key| std::env::var(key).ok())?)
}

fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .into_diagnostic()?;
        Ok(source)
    } else {
        std::fs::read_to_string(file)
            .into_diagnostic()
            .map_err(|e| e.wrap_err(format!("reading {}", file.display())))
    }
}

fn init_miette() {
    let _ = miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }));
    miette::set_panic_hook();
}
