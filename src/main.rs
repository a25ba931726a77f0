//! Space biology explorer
//!
//! Command-line front end over the data layer: publication search and
//! details, favorites, knowledge gaps, data integrations, quotes and the
//! research assistant.

use std::error::Error;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use spacebio::cli::{log_filter, search_query, Cli, Command, FavAction};
use spacebio::config::Config;
use spacebio::data::{Publication, PublicationRef};
use spacebio::favorites::Favorites;
use spacebio::query::{QueryState, QueryStatus};
use spacebio::service::{Dashboard, DataLayer};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Installs the stderr log subscriber
///
/// Without `-v` the filter comes from `RUST_LOG`, defaulting to warnings.
fn init_logging(verbose: u8) {
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter(0)))
    } else {
        EnvFilter::new(log_filter(verbose))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Unwraps a settled query, turning a failed state into an error
fn settled<P, T>(state: QueryState<P, T>) -> CliResult<(T, bool)> {
    let QueryState {
        results,
        status,
        degraded,
        ..
    } = state;
    match status {
        QueryStatus::Ready => results
            .map(|results| (results, degraded))
            .ok_or_else(|| "query returned no results".into()),
        QueryStatus::Failed(message) => Err(message.into()),
        QueryStatus::Idle | QueryStatus::Loading => Err("query did not complete".into()),
    }
}

fn print_degraded_notice(degraded: bool) {
    if degraded {
        eprintln!("note: live source unavailable, showing offline data");
    }
}

fn favorite_marker(favorites: &Favorites, id: &str) -> &'static str {
    if favorites.is_favorite(id) {
        "★"
    } else {
        " "
    }
}

fn print_publications(publications: &[Publication], favorites: &Favorites) {
    if publications.is_empty() {
        println!("No publications found.");
        return;
    }
    for p in publications {
        println!("{} [{}] {}", favorite_marker(favorites, &p.id), p.id, p.title);
        println!("    {} / {} · {}", p.category, p.subcategory, p.year);
    }
}

fn print_publication(p: &Publication, favorites: &Favorites) {
    println!("{} {}", favorite_marker(favorites, &p.id), p.title);
    println!();
    println!("  Id:          {}", p.id);
    println!("  Category:    {} / {}", p.category, p.subcategory);
    println!("  Year:        {}", p.year);
    if let Some(authors) = &p.authors {
        println!("  Authors:     {}", authors.join(", "));
    }
    if let Some(journal) = &p.journal {
        println!("  Journal:     {}", journal);
    }
    if let Some(doi) = &p.doi {
        println!("  DOI:         {}", doi);
    }
    if let Some(osdr) = &p.osdr_id {
        println!("  OSDR:        {}", osdr);
    }
    if let Some(task_book) = &p.task_book_id {
        println!("  Task Book:   {}", task_book);
    }
    if let Some(related) = p.related_ids.as_ref().filter(|r| !r.is_empty()) {
        println!("  Related:     {}", related.join(", "));
    }
    if let Some(summary) = &p.summary {
        println!();
        println!("{}", summary);
    }
}

fn print_dashboard(dashboard: &Dashboard) {
    println!("Recently viewed");
    if dashboard.recently_viewed.is_empty() {
        println!("  (none)");
    }
    for p in &dashboard.recently_viewed {
        println!("  [{}] {}", p.id, p.title);
    }

    println!();
    println!("Knowledge gaps");
    match (&dashboard.knowledge_gaps.results, dashboard.knowledge_gaps.error()) {
        (_, Some(message)) => println!("  unavailable: {}", message),
        (Some(gaps), None) => {
            for gap in gaps {
                println!("  {:?}: {}", gap.priority, gap.title);
            }
        }
        (None, None) => println!("  (none)"),
    }

    println!();
    println!("Data integrations");
    if let Some(integrations) = &dashboard.data_integrations.results {
        for i in integrations {
            println!("  {:<10} {:?}", i.name, i.status);
        }
    }

    if let Some(quote) = &dashboard.quote.results {
        println!();
        println!("\"{}\" - {}", quote.content, quote.display_author());
    }
}

async fn lookup_publication(layer: &DataLayer, id: &str) -> CliResult<Publication> {
    let details = layer.publication_details();
    let state = details
        .query(PublicationRef {
            id: id.to_string(),
            title: None,
        })
        .await;
    let (publication, degraded) = settled(state)?;
    print_degraded_notice(degraded);
    Ok(publication)
}

async fn run(layer: &DataLayer, command: Command) -> CliResult<()> {
    let favorites = layer.favorites();

    match command {
        Command::Search { query, category } => {
            let params = search_query(query.as_deref(), category.as_deref())?;
            let search = layer.publication_search();
            let (publications, degraded) = settled(search.query(params).await)?;
            print_degraded_notice(degraded);
            print_publications(&publications, &favorites);
        }
        Command::Show { id } => {
            let publication = lookup_publication(layer, &id).await?;
            print_publication(&publication, &favorites);
        }
        Command::Fav(action) => match action {
            FavAction::List => {
                let ids = favorites.ids();
                if ids.is_empty() {
                    println!("No favorites yet.");
                }
                for id in ids {
                    println!("{}", id);
                }
            }
            FavAction::Toggle { id } => {
                if favorites.toggle_favorite(&id) {
                    println!("★ {} added to favorites", id);
                } else {
                    println!("  {} removed from favorites", id);
                }
            }
            FavAction::Add { id } => {
                favorites.set_favorite(&id, true);
                println!("★ {} added to favorites", id);
            }
            FavAction::Remove { id } => {
                favorites.set_favorite(&id, false);
                println!("  {} removed from favorites", id);
            }
        },
        Command::Gaps => {
            let gaps = layer.knowledge_gaps();
            let (gaps, degraded) = settled(gaps.query(()).await)?;
            print_degraded_notice(degraded);
            for gap in gaps {
                println!("[{:?}] {} ({})", gap.priority, gap.title, gap.category);
                println!("    {}", gap.description);
                println!("    {} related publications", gap.related_publications);
            }
        }
        Command::Integrations => {
            let integrations = layer.data_integrations();
            let (integrations, degraded) = settled(integrations.query(()).await)?;
            print_degraded_notice(degraded);
            for i in integrations {
                let last_sync = i.last_sync.as_deref().unwrap_or("never");
                println!("{} - {} [{:?}]", i.name, i.full_name, i.status);
                println!("    {} datasets, last sync {}", i.datasets, last_sync);
                println!("    {}", i.url);
            }
        }
        Command::Quote => {
            let quotes = layer.quotes();
            let (quote, degraded) = settled(quotes.query(()).await)?;
            print_degraded_notice(degraded);
            println!("\"{}\"", quote.content);
            println!("    - {}", quote.display_author());
        }
        Command::Dashboard => {
            let dashboard = layer.dashboard().await;
            print_degraded_notice(dashboard.degraded());
            print_dashboard(&dashboard);
        }
        Command::Ask { message, about } => {
            let mut session = match about {
                Some(id) => layer.chat_about(&lookup_publication(layer, &id).await?),
                None => layer.chat(),
            };
            let reply = session.send(layer.fetcher(), &message.join(" ")).await?;
            print_degraded_notice(reply.degraded);
            println!("{}", reply.value.content);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::from_env()?;
    config.offline |= cli.offline;

    let layer = DataLayer::open(config)?;
    let result = run(&layer, cli.command.unwrap_or(Command::Dashboard)).await;
    layer.shutdown().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
