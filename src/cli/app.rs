use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "ibdscan")]
#[command(about = "Offline decoder for InnoDB .ibd tablespaces")]
#[command(version)]
pub struct Cli {
    /// Control colored output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Write output to a file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<String>,

    /// Log debug diagnostics to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Read the file through a memory map
    #[arg(long, global = true)]
    pub mmap: bool,

    /// Number of pages kept in the page cache (0 disables it)
    #[arg(long = "cache-pages", default_value_t = 1024, global = true)]
    pub cache_pages: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify every page and summarize page types
    Pages {
        /// Path to InnoDB data file (.ibd)
        #[arg(short, long)]
        file: String,

        /// Display a specific page number
        #[arg(short, long)]
        page: Option<u64>,

        /// List never-written pages too
        #[arg(short = 'e', long = "show-empty")]
        show_empty: bool,

        /// Hex dump the page selected with --page
        #[arg(long, requires = "page")]
        hex: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Override page size (default: auto-detect)
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },

    /// Check checksums, LSNs, page directories and record lists of every page
    Check {
        /// Path to InnoDB data file (.ibd)
        #[arg(short, long)]
        file: String,

        /// Only list pages with problems
        #[arg(long = "errors")]
        errors_only: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Override page size (default: auto-detect)
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },

    /// Decode the rows of an index in key order
    Scan {
        /// Path to InnoDB data file (.ibd)
        #[arg(short, long)]
        file: String,

        /// Table schema as JSON (default: read from SDI)
        #[arg(short, long)]
        schema: Option<String>,

        /// Root page of the index (default: clustered index)
        #[arg(short, long)]
        root: Option<u64>,

        /// Include delete-marked records
        #[arg(long)]
        deleted: bool,

        /// Include DB_ROW_ID, DB_TRX_ID and DB_ROLL_PTR
        #[arg(long = "system-columns")]
        system_columns: bool,

        /// Leave off-page columns unresolved
        #[arg(long = "no-resolve")]
        no_resolve: bool,

        /// Do not verify page checksums
        #[arg(long = "no-verify")]
        no_verify: bool,

        /// Read leaf pages in file order instead of following the tree
        #[arg(long)]
        forensic: bool,

        /// Stop after this many rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output rows as JSON lines
        #[arg(long)]
        json: bool,

        /// Override page size (default: auto-detect)
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },

    /// Find the first row whose key is at or after the given key
    Seek {
        /// Path to InnoDB data file (.ibd)
        #[arg(short, long)]
        file: String,

        /// Table schema as JSON (default: read from SDI)
        #[arg(short, long)]
        schema: Option<String>,

        /// Root page of the index (default: clustered index)
        #[arg(short, long)]
        root: Option<u64>,

        /// Key values, one per leading key column (NULL for SQL NULL)
        #[arg(short, long, required = true, num_args = 1..)]
        key: Vec<String>,

        /// Print this many rows starting at the key
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Output rows as JSON lines
        #[arg(long)]
        json: bool,

        /// Override page size (default: auto-detect)
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },

    /// Show the table definition stored in the tablespace's SDI
    Schema {
        /// Path to InnoDB data file (.ibd)
        #[arg(short, long)]
        file: String,

        /// Print the raw SDI records instead of the derived schema
        #[arg(long)]
        raw: bool,

        /// Print the schema as JSON (the format `scan --schema` reads)
        #[arg(long)]
        json: bool,

        /// Override page size (default: auto-detect)
        #[arg(long = "page-size")]
        page_size: Option<u32>,
    },
}
