use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod ai;
mod app;
mod bookmarks;
mod cli;
mod config;
mod db;
mod purge;
#[cfg(test)]
mod tests;
mod web;

use app::App;
use bookmarks::BookmarkCreate;
use cli::{CacheAction, Command};
use config::Config;

pub fn parse_tags(tags: String) -> Vec<String> {
    tags.split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config = Config::load_with(&config::default_base_path()?)?;
    let app = Arc::new(App::new(config)?);

    match args.command {
        Command::Add {
            url,
            title,
            description,
            tags,
        } => {
            let bmark = app.bookmarks.create(BookmarkCreate {
                title,
                description,
                tags: tags.map(parse_tags),
                url,
            })?;
            print_json(&bmark)
        }

        Command::List {} => print_json(&app.bookmarks.list()?),

        Command::Tag {
            id,
            apply,
            no_cache,
        } => print_json(&app.tag_bookmark(id, apply, !no_cache)?),

        Command::Describe { id } => print_json(&app.describe_bookmark(id)?),

        Command::Embed { id: Some(id), .. } => {
            let embedding = app.search.embed_bookmark(id)?;
            println!("embedded bookmark {id} ({} dimensions)", embedding.len());
            Ok(())
        }

        Command::Embed { id: None, all } => print_json(&app.search.reindex(!all)?),

        Command::Search {
            query,
            limit,
            threshold,
        } => print_json(&app.search.search(&query, limit, threshold)?),

        Command::Similar { id, limit } => print_json(&app.search.similar(id, limit)?),

        Command::Cache { action } => match action {
            CacheAction::Cleanup { days } => {
                let removed = app.cache_cleanup(days);
                println!("{removed} cache entries removed");
                Ok(())
            }
            CacheAction::Stats {} => print_json(&app.cache.stats()),
        },

        Command::Status {} => print_json(&app.status()),

        Command::Daemon { addr } => web::start_daemon(app.clone(), &addr),
    }
}
