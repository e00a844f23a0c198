//! hierarchy-browser - browse a server-resident taxonomy from the terminal

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hierarchy_browser::{
    config::{Args, Command},
    result_count_message, HierarchyBrowser, HttpTaxonomyService, InMemoryTaxonomy, NodeKind,
    TaxonomyService, TreeController, VisibleRow,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hierarchy_browser={},info", log_level).into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let service: Arc<dyn TaxonomyService> = match &args.taxonomy_file {
        Some(path) => {
            info!("Taxonomy file: {}", path.display());
            Arc::new(InMemoryTaxonomy::load(path)?)
        }
        None => {
            info!("API root: {}", args.api_root);
            Arc::new(HttpTaxonomyService::new(args.http_config())?)
        }
    };

    let browser = HierarchyBrowser::new(service, args.browser_config()?);
    info!("Scope: {}", browser.config().initial_scope);

    match &args.command {
        Command::Tree { open, focus, json } => {
            let tree = browser.open_tree("main", None).await;
            if let Some(id) = focus {
                let path = browser.fetcher().resolve_path(id).await?;
                let outcome = tree.set_focus(path).await?;
                if outcome.degraded {
                    eprintln!(
                        "{} is not available under this scope; showing {}",
                        id,
                        outcome.focused_id.as_deref().unwrap_or("the root")
                    );
                }
            }
            for id in open {
                tree.toggle_open(id).await?;
            }
            print_tree(&tree, *json)?;
        }

        Command::Search { text, more, pick } => {
            let scope = browser.config().initial_scope.clone();
            let search = browser.search();
            let results = if *more {
                search.query(text, &scope).await;
                search.load_more(&scope).await
            } else {
                search.query(text, &scope).await
            };
            let Some(results) = results else {
                anyhow::bail!("search for '{}' was superseded", text);
            };

            if results.no_results {
                println!("No Results");
                return Ok(());
            }
            println!("{}", result_count_message(&results));
            let candidates = results.candidates();
            for (index, candidate) in candidates.iter().enumerate() {
                let kind = if candidate.is_leaf() { "var" } else { "group" };
                println!("{:>4}  [{}] {}  ({})", index, kind, candidate.name(), candidate.id());
            }
            if results.has_more {
                println!("      ... more results available with --more");
            }

            if let Some(index) = pick {
                let Some(candidate) = candidates.get(*index) else {
                    anyhow::bail!("no candidate at index {} ({} available)", index, candidates.len());
                };
                let tree = browser.open_tree("main", None).await;
                search.pick_candidate(candidate).await?;
                println!();
                print_tree(&tree, false)?;
            }
        }

        Command::Path { id } => {
            let path = browser.fetcher().resolve_path(id).await?;
            println!("{}", path.join(" > "));
        }
    }

    Ok(())
}

fn print_tree(tree: &TreeController, json: bool) -> anyhow::Result<()> {
    let rows = tree.visible_rows()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in &rows {
        println!("{}", render_row(row));
    }
    Ok(())
}

fn render_row(row: &VisibleRow) -> String {
    let indent = "  ".repeat(row.depth);
    let marker = match (row.kind, row.expanded) {
        (NodeKind::Group, true) => "▾",
        (NodeKind::Group, false) => "▸",
        (NodeKind::Leaf, _) if row.selected => "■",
        (NodeKind::Leaf, _) => "□",
    };
    let mut line = format!("{}{} {}", indent, marker, row.title);
    if row.highlighted {
        line.push_str("  <");
    }
    if row.selection_count > 0 {
        line.push_str(&format!("  ({} selected)", row.selection_count));
    }
    if let Some(reason) = row.error() {
        line.push_str(&format!("  [error: {}]", reason));
    }
    line
}
