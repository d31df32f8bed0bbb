use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Delete tag cache entries older than the retention window
    Cleanup {
        /// Keep entries younger than this many days
        /// (defaults to tagging.retention_days)
        #[clap(long)]
        days: Option<u32>,
    },
    /// Show tag cache counters
    Stats {},
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a bookmark
    Add {
        url: String,

        /// Bookmark title
        #[clap(short, long)]
        title: Option<String>,

        /// Bookmark description
        #[clap(short, long)]
        description: Option<String>,

        /// Comma separated tags
        #[clap(long)]
        tags: Option<String>,
    },

    /// List stored bookmarks
    List {},

    /// Suggest tags for a bookmark
    Tag {
        id: u64,

        /// Store generated tags on the bookmark
        #[clap(long, default_value = "false")]
        apply: bool,

        /// Skip the tag cache for this request
        #[clap(long, default_value = "false")]
        no_cache: bool,
    },

    /// Generate a description for a bookmark
    Describe { id: u64 },

    /// Compute and store embeddings
    Embed {
        /// Bookmark to embed
        id: Option<u64>,

        /// Re-embed every bookmark, not only those missing a vector
        #[clap(long, default_value = "false")]
        all: bool,
    },

    /// Semantic search over embedded bookmarks
    Search {
        query: String,

        #[clap(short, long, default_value = "10")]
        limit: usize,

        /// Minimum similarity [0.0, 1.0]
        /// (defaults to embeddings.default_threshold)
        #[clap(long)]
        threshold: Option<f64>,
    },

    /// Bookmarks similar to a given one
    Similar {
        id: u64,

        #[clap(short, long, default_value = "10")]
        limit: usize,
    },

    /// Tag cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the selected AI backend
    Status {},

    /// Serve the AI API over HTTP
    Daemon {
        #[clap(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}
