use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use uutiset::config::Config;
use uutiset::controller::{ArticleSource, FeedRefreshController, RefreshState};
use uutiset::feed::Article;
use uutiset::storage::KvStore;

/// Get the config directory path (~/.config/uutiset/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("uutiset"))
}

#[derive(Parser, Debug)]
#[command(
    name = "uutiset",
    about = "Yle news reader with a request quota and offline fallback cache"
)]
struct Args {
    /// Feed key to display (see --list)
    feed: Option<String>,

    /// List the configured feed keys
    #[arg(long)]
    list: bool,

    /// Force a live refresh instead of serving a cached feed
    #[arg(long)]
    refresh: bool,

    /// Path to an alternative config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    if config.feeds.is_empty() {
        anyhow::bail!("No valid feeds configured in {}", config_path.display());
    }

    let db_path = config_dir.join("uutiset.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let store = KvStore::open(db_path_str)
        .await
        .context("Failed to open storage")?;

    let controller = FeedRefreshController::new(&config, reqwest::Client::new(), store);

    if args.list {
        println!("Syötteet:");
        for key in controller.feed_keys() {
            println!("  {key}");
        }
        return Ok(());
    }

    // Default to the main news feed when configured, else the first key
    let key = match args.feed {
        Some(key) => key,
        None => {
            if config.feeds.contains_key("uutiset") {
                "uutiset".to_string()
            } else {
                controller.feed_keys().remove(0)
            }
        }
    };

    let now_ms = Utc::now().timestamp_millis();
    let state = if args.refresh {
        controller.refresh(&key, now_ms).await?
    } else {
        controller.select(&key, now_ms).await?
    };

    render(&key, &state);

    if let RefreshState::Ready {
        source: ArticleSource::Live,
        ..
    } = state
    {
        let remaining = controller.remaining(&key, now_ms).await?;
        println!();
        println!("Pyyntöjä jäljellä tässä ikkunassa: {remaining}");
    }

    if matches!(
        state,
        RefreshState::Blocked { cached: None } | RefreshState::Failed { cached: None }
    ) {
        std::process::exit(1);
    }

    Ok(())
}

fn render(key: &str, state: &RefreshState) {
    match state {
        RefreshState::Ready { articles, source } => {
            match source {
                ArticleSource::Live => println!("Yle RSS Uutiset — {key}"),
                ArticleSource::Cached => {
                    println!("Yle RSS Uutiset — {key} (välimuistista)");
                }
            }
            println!();
            print_articles(articles);
        }
        RefreshState::Blocked { cached } => {
            eprintln!("Liikaa pyyntöjä, yritä hetken päästä uudelleen.");
            if let Some(articles) = cached {
                eprintln!("Näytetään viimeksi haetut uutiset.");
                println!();
                print_articles(articles);
            }
        }
        RefreshState::Failed { cached } => {
            eprintln!("Uutisten haku epäonnistui.");
            if let Some(articles) = cached {
                eprintln!("Näytetään viimeksi haetut uutiset.");
                println!();
                print_articles(articles);
            }
        }
        // A blocking CLI run always ends in one of the states above
        RefreshState::Idle | RefreshState::Loading => {}
    }
}

fn print_articles(articles: &[Article]) {
    if articles.is_empty() {
        println!("(ei uutisia)");
        return;
    }
    for article in articles {
        println!("{}", article.title);
        println!("  {}", article.link);
        if !article.description.is_empty() {
            println!("  {}", article.description);
        }
        if let Some(published) = &article.published_at {
            println!("  Julkaistu: {}", format_published(published));
        }
        println!();
    }
}

/// Presentation-time localization of the raw feed timestamp; anything
/// unparseable is shown verbatim.
fn format_published(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc2822(raw)
        .map(|dt| dt.format("%d.%m.%Y %H.%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}
