use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::api::HttpMethod;
use crate::features::queue::OperationType;

#[derive(Parser)]
#[command(name = "farmsync")]
#[command(about = "Offline write queue, read cache and sync for the FarmSync record keeper")]
#[command(long_about = "farmsync - offline resilience for FarmSync

Queues mutating API calls and form submissions while offline, caches reads
with a time-to-live, and replays the queue against the backend when the
network comes back.

QUICK START:
  farmsync queue add create /api/expenses --payload '{\"amount\": 12}'
  farmsync queue status          Show what is waiting
  farmsync sync run              Replay the queue now
  farmsync cache get weather     Read a cached value

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

Logging goes to stderr and is controlled by FARMSYNC_LOG (default: info).")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Use 'pretty' for human-readable colored output (default),
    /// or 'json' for machine-readable output suitable for scripting.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the operation queue
    ///
    /// Mutating API calls made while offline wait here until a sync pass
    /// replays them in the order they were queued.
    ///
    /// # Examples
    ///
    ///   farmsync queue add create /api/crops --payload '{"name": "Maize"}'
    ///   farmsync queue list
    ///   farmsync queue status -o json
    #[command(alias = "q")]
    Queue(QueueArgs),

    /// Manage queued form submissions
    Forms(FormsArgs),

    /// Read and write the TTL cache
    ///
    /// Entries older than the configured TTL (default 5 minutes) are never
    /// returned and are deleted when read or swept.
    Cache(CacheArgs),

    /// Replay the operation queue
    Sync(SyncArgs),

    /// Fetch a URL through the offline interceptor
    ///
    /// GET requests are served from the active response cache when
    /// possible. With --navigate, an unreachable page falls back to the
    /// cached root document.
    ///
    /// # Examples
    ///
    ///   farmsync fetch /dashboard
    ///   farmsync fetch /fields/12 --navigate
    Fetch {
        /// URL or path relative to api.base_url
        url: String,

        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
    },

    /// Manage the push notification subscription
    Push(PushArgs),
}

/// Arguments for the operation queue.
#[derive(Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommands,
}

/// Operation queue subcommands.
#[derive(Subcommand)]
pub enum QueueCommands {
    /// Queue a mutating API call
    Add {
        /// Operation type (create, update, delete)
        op_type: OperationType,

        /// Endpoint path, e.g. /api/expenses
        endpoint: String,

        /// JSON payload
        #[arg(long, short = 'p')]
        payload: Option<String>,

        /// HTTP method; defaults to POST, PUT or DELETE by type
        #[arg(long, short = 'm')]
        method: Option<HttpMethod>,
    },

    /// List pending operations in replay order
    List {
        /// Only operations of this type
        #[arg(long, short = 't')]
        r#type: Option<OperationType>,
    },

    /// Show queue statistics
    Status,

    /// Remove an operation as successfully replayed
    Ack {
        /// Operation ID
        id: i64,
    },

    /// Record a failed replay attempt
    Fail {
        /// Operation ID
        id: i64,

        /// Error message to record
        #[arg(long, short = 'e', default_value = "failed manually")]
        error: String,
    },

    /// Remove every pending operation
    Clear {
        /// Skip confirmation
        #[arg(long, short = 'f')]
        force: bool,
    },
}

/// Arguments for the form queue.
#[derive(Args)]
pub struct FormsArgs {
    #[command(subcommand)]
    pub command: FormsCommands,
}

/// Form queue subcommands.
#[derive(Subcommand)]
pub enum FormsCommands {
    /// Queue a form submission
    Add {
        /// Form type, e.g. expense
        form_type: String,

        /// Form data as JSON
        data: String,
    },

    /// List form submissions
    List {
        /// Include submissions already synced
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Mark a submission as synced
    MarkSynced {
        /// Submission ID
        id: i64,
    },

    /// Delete submissions already synced
    Purge,
}

/// Arguments for the TTL cache.
#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub enum CacheCommands {
    /// Read a cached value
    Get {
        /// Cache key
        key: String,
    },

    /// Store a value
    Set {
        /// Cache key
        key: String,

        /// Value as JSON; plain text is stored as a string
        value: String,
    },

    /// Remove one entry, or everything with --all
    Clear {
        /// Cache key
        key: Option<String>,

        /// Remove every entry
        #[arg(long, conflicts_with = "key")]
        all: bool,
    },

    /// Delete expired entries
    Sweep,

    /// Delete every cache entry and every stored response generation
    ///
    /// The next fetch reinstalls the configured generation from the network.
    Reset,
}

/// Arguments for sync.
#[derive(Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommands,
}

/// Sync subcommands.
#[derive(Subcommand)]
pub enum SyncCommands {
    /// Replay pending operations once
    Run,

    /// Keep replaying on an interval until interrupted
    Watch {
        /// Seconds between passes; defaults to sync.interval_secs
        #[arg(long, short = 'i')]
        interval: Option<u64>,
    },
}

/// Arguments for push subscriptions.
#[derive(Args)]
pub struct PushArgs {
    #[command(subcommand)]
    pub command: PushCommands,
}

/// Push subscription subcommands.
#[derive(Subcommand)]
pub enum PushCommands {
    /// Register a push endpoint with the backend
    Subscribe {
        /// Push service endpoint URL
        #[arg(long)]
        endpoint: String,

        /// Client public key (base64)
        #[arg(long)]
        p256dh: String,

        /// Client auth secret (base64)
        #[arg(long)]
        auth: String,
    },

    /// Remove the local registration and revoke it with the backend
    Unsubscribe,

    /// Show the local registration
    Status,
}
