mod output;

use anyhow::{Context, Result};
use arbor_core::{
    Algorithm, Cancellable, CommitOptions, EntryType, Store, TreeSource, parse_parent,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use output::{
    CheckoutOutput, CommitInfo, CommitOutput, InitOutput, JournalEntryInfo, LogOutput, LsOutput,
    OutputWriter, RefInfo, RefsListOutput, RefsRmOutput, ReflogOutput, RevParseOutput,
    ShowOutput, TreeEntryInfo,
};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Arbor - A transactional, content-addressed commit store
#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Transactional commit store using BLAKE3", long_about = None)]
#[command(version)]
struct Cli {
    /// Store root directory (defaults to ARBOR_ROOT env var or ./arbor-store)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new store
    Init {
        /// Hash algorithm to use
        #[arg(long, default_value = "blake3")]
        algo: String,
    },

    /// Commit a snapshot and publish it on a branch
    Commit {
        /// Directory to commit (merged below any --tree sources)
        path: Option<PathBuf>,

        /// Branch to update
        #[arg(short, long)]
        branch: String,

        /// One-line subject
        #[arg(short, long, default_value = "")]
        subject: String,

        /// Full description
        #[arg(long, default_value = "")]
        body: String,

        /// Parent checksum ("none" for a root commit; defaults to the branch tip)
        #[arg(long)]
        parent: Option<String>,

        /// Extra source: dir=PATH, tar=PATH or ref=REV (repeatable, later wins)
        #[arg(long = "tree")]
        trees: Vec<String>,

        /// Create missing parent directories for tar sources
        #[arg(long)]
        tar_autocreate_parents: bool,

        /// Commit time as RFC 3339 or Unix seconds (defaults to now)
        #[arg(long)]
        timestamp: Option<String>,

        /// Extra metadata as KEY=VALUE (repeatable)
        #[arg(long = "add-metadata-string")]
        metadata: Vec<String>,
    },

    /// Show the history of a branch or commit
    Log {
        /// Branch name or commit checksum
        rev: String,

        /// Limit the number of commits shown
        #[arg(short = 'n', long)]
        max_count: Option<usize>,
    },

    /// Show one commit
    Show {
        /// Branch name or commit checksum
        rev: String,
    },

    /// List the tree of a commit or tree
    Ls {
        /// Branch name, commit or tree checksum
        rev: String,

        /// Recurse into subdirectories
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Show type, mode and checksum
        #[arg(short, long)]
        long: bool,
    },

    /// Output blob content to stdout
    Cat {
        /// Checksum of the blob
        checksum: String,
    },

    /// Write a commit, tree or blob to the filesystem
    Checkout {
        /// Branch name or checksum
        rev: String,

        /// Destination path (must not exist)
        dest: PathBuf,
    },

    /// Resolve a branch name or checksum
    RevParse {
        /// Branch name or checksum
        rev: String,
    },

    /// Show recent ref updates
    Reflog {
        /// Only entries for this branch
        branch: Option<String>,

        /// Maximum number of entries
        #[arg(short = 'n', long, default_value_t = 20)]
        max_count: usize,
    },

    /// Manage branches
    #[command(subcommand)]
    Refs(RefsCommands),
}

#[derive(Subcommand)]
enum RefsCommands {
    /// List all branches
    List,

    /// Remove a branch
    Rm {
        /// Branch name
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = OutputWriter::new(cli.json);

    // Determine store root: CLI arg > ARBOR_ROOT env var > ./arbor-store default
    let root = cli
        .root
        .or_else(|| std::env::var("ARBOR_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./arbor-store"));

    let result = match cli.command {
        Commands::Init { algo } => cmd_init(&output, &root, &algo),
        Commands::Commit {
            path,
            branch,
            subject,
            body,
            parent,
            trees,
            tar_autocreate_parents,
            timestamp,
            metadata,
        } => build_commit_options(
            path,
            subject,
            body,
            parent,
            trees,
            tar_autocreate_parents,
            timestamp,
            metadata,
        )
        .and_then(|options| cmd_commit(&output, &root, &branch, &options)),
        Commands::Log { rev, max_count } => cmd_log(&output, &root, &rev, max_count),
        Commands::Show { rev } => cmd_show(&output, &root, &rev),
        Commands::Ls {
            rev,
            recursive,
            long,
        } => cmd_ls(&output, &root, &rev, recursive, long),
        Commands::Cat { checksum } => cmd_cat(&output, &root, &checksum),
        Commands::Checkout { rev, dest } => cmd_checkout(&output, &root, &rev, &dest),
        Commands::RevParse { rev } => cmd_rev_parse(&output, &root, &rev),
        Commands::Reflog { branch, max_count } => {
            cmd_reflog(&output, &root, branch.as_deref(), max_count)
        }
        Commands::Refs(refs_cmd) => match refs_cmd {
            RefsCommands::List => cmd_refs_list(&output, &root),
            RefsCommands::Rm { name } => cmd_refs_rm(&output, &root, &name),
        },
    };

    if let Err(e) = result {
        output.write_error(&e, 1);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn open_store(root: &Path) -> Result<Store> {
    debug!(root = %root.display(), "opening store");
    Store::open(root).with_context(|| format!("Failed to open store at {}", root.display()))
}

fn cmd_init(output: &OutputWriter, root: &Path, algo: &str) -> Result<()> {
    let algorithm = match algo {
        "blake3" => Algorithm::Blake3,
        _ => anyhow::bail!("Unsupported algorithm: {}", algo),
    };

    Store::init(root, algorithm)
        .with_context(|| format!("Failed to initialize store at {}", root.display()))?;
    info!(root = %root.display(), algorithm = algorithm.as_str(), "initialized store");

    let data = InitOutput {
        success: true,
        result_code: 0,
        root: root.display().to_string(),
        algorithm: algorithm.as_str().to_string(),
    };
    output.write(&data, || {
        format!(
            "Initialized arbor store at {}\nAlgorithm: {}\n",
            root.display(),
            algorithm.as_str()
        )
    })
}

#[allow(clippy::too_many_arguments)]
fn build_commit_options(
    path: Option<PathBuf>,
    subject: String,
    body: String,
    parent: Option<String>,
    trees: Vec<String>,
    tar_auto_create_parents: bool,
    timestamp: Option<String>,
    metadata: Vec<String>,
) -> Result<CommitOptions> {
    let mut options = CommitOptions::new(subject)
        .body(body)
        .tar_auto_create_parents(tar_auto_create_parents);

    if let Some(path) = path {
        options = options.source(TreeSource::Directory(path));
    }

    for spec in &trees {
        let source = TreeSource::parse(spec).with_context(|| format!("Invalid --tree: {}", spec))?;
        options = options.source(source);
    }

    if let Some(parent) = parent {
        // An explicit "none" starts a new history instead of using the branch tip
        match parse_parent(&parent).with_context(|| format!("Invalid parent: {}", parent))? {
            Some(checksum) => options = options.parent(Some(checksum)),
            None => options = options.orphan(true),
        }
    }

    if let Some(ts) = timestamp {
        options = options.timestamp(parse_timestamp(&ts)?);
    }

    for pair in &metadata {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Metadata must be KEY=VALUE: {}", pair))?;
        options = options.metadata(key, value);
    }

    Ok(options)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(seconds) = s.parse::<i64>() {
        return DateTime::from_timestamp(seconds, 0)
            .with_context(|| format!("Timestamp out of range: {}", s));
    }

    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {}", s))?
        .with_timezone(&Utc))
}

fn cmd_commit(
    output: &OutputWriter,
    root: &Path,
    branch: &str,
    options: &CommitOptions,
) -> Result<()> {
    let store = open_store(root)?;
    debug!(branch, sources = options.tree.len(), "committing");

    let finalized = store
        .commit_to_branch(branch, options, &Cancellable::new())
        .with_context(|| format!("Failed to commit to {}", branch))?;
    info!(branch, commit = %finalized.commit, "committed");

    let text = format!("{}\n", finalized.commit);
    let data = CommitOutput {
        success: true,
        result_code: 0,
        commit: finalized.commit,
        branch: finalized.branch,
        previous: finalized.previous,
        stats: finalized.stats,
    };
    output.write(&data, || text)
}

fn cmd_log(output: &OutputWriter, root: &Path, rev: &str, max_count: Option<usize>) -> Result<()> {
    let store = open_store(root)?;

    let mut history = store
        .log(rev)
        .with_context(|| format!("Failed to read history of {}", rev))?;
    if let Some(max) = max_count {
        history.truncate(max);
    }

    let commits: Vec<CommitInfo> = history
        .into_iter()
        .map(|(checksum, commit)| CommitInfo::new(checksum, commit))
        .collect();

    let data = LogOutput {
        success: true,
        result_code: 0,
        commits,
    };
    output.write(&data, || {
        let mut text = String::new();
        for commit in &data.commits {
            let _ = writeln!(text, "commit {}", commit.checksum);
            if let Some(parent) = &commit.parent {
                let _ = writeln!(text, "Parent: {}", parent);
            }
            let _ = writeln!(text, "Date:   {}\n", commit.timestamp);
            let _ = writeln!(text, "    {}\n", commit.subject);
        }
        text
    })
}

fn cmd_show(output: &OutputWriter, root: &Path, rev: &str) -> Result<()> {
    let store = open_store(root)?;

    let checksum = store
        .resolve_rev(rev)
        .with_context(|| format!("Failed to resolve {}", rev))?;
    let commit = store
        .get_commit(&checksum)
        .with_context(|| format!("Failed to read commit {}", checksum))?;

    let data = ShowOutput {
        success: true,
        result_code: 0,
        commit: CommitInfo::new(checksum, commit),
    };
    output.write(&data, || {
        let commit = &data.commit;
        let mut text = String::new();
        let _ = writeln!(text, "commit {}", commit.checksum);
        let _ = writeln!(text, "Tree:   {}", commit.tree);
        if let Some(parent) = &commit.parent {
            let _ = writeln!(text, "Parent: {}", parent);
        }
        let _ = writeln!(text, "Date:   {}", commit.timestamp);
        for (key, value) in &commit.metadata {
            let _ = writeln!(text, "Meta:   {}={}", key, value);
        }
        let _ = writeln!(text, "\n    {}", commit.subject);
        if !commit.body.is_empty() {
            let _ = writeln!(text);
            for line in commit.body.lines() {
                let _ = writeln!(text, "    {}", line);
            }
        }
        text
    })
}

fn cmd_ls(
    output: &OutputWriter,
    root: &Path,
    rev: &str,
    recursive: bool,
    long: bool,
) -> Result<()> {
    let store = open_store(root)?;

    let checksum = store
        .resolve_rev(rev)
        .with_context(|| format!("Failed to resolve {}", rev))?;

    // Commits list their root tree
    let tree = match store.get_commit(&checksum) {
        Ok(commit) => commit.tree,
        Err(_) => checksum,
    };

    let entries: Vec<TreeEntryInfo> = if recursive {
        store
            .walk_tree(&tree)
            .with_context(|| format!("Failed to walk tree {}", tree))?
            .into_iter()
            .map(|(path, entry)| TreeEntryInfo::new(path, &entry))
            .collect()
    } else {
        store
            .get_tree(&tree)
            .with_context(|| format!("Failed to read tree {}", tree))?
            .iter()
            .map(|entry| TreeEntryInfo::new(entry.name.clone(), entry))
            .collect()
    };

    let data = LsOutput {
        success: true,
        result_code: 0,
        tree,
        entries,
    };
    output.write(&data, || {
        let mut text = String::new();
        for entry in &data.entries {
            if long {
                let type_char = match entry.entry_type.as_str() {
                    t if t == EntryType::Tree.as_str() => 't',
                    t if t == EntryType::Symlink.as_str() => 'l',
                    t if t == EntryType::Special.as_str() => 's',
                    _ => 'b',
                };
                let _ = writeln!(
                    text,
                    "{} {} {} {}",
                    type_char, entry.mode, entry.checksum, entry.path
                );
            } else {
                let _ = writeln!(text, "{}", entry.path);
            }
        }
        text
    })
}

fn cmd_cat(output: &OutputWriter, root: &Path, checksum: &str) -> Result<()> {
    if output.is_json() {
        anyhow::bail!("cat writes raw content and does not support --json");
    }

    let store = open_store(root)?;
    let checksum = store
        .resolve_rev(checksum)
        .with_context(|| format!("Failed to resolve {}", checksum))?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();

    store
        .cat_blob(&checksum, &mut handle)
        .with_context(|| format!("Failed to output blob {}", checksum))?;

    Ok(())
}

fn cmd_checkout(output: &OutputWriter, root: &Path, rev: &str, dest: &Path) -> Result<()> {
    let store = open_store(root)?;

    let checksum = store
        .checkout(rev, dest)
        .with_context(|| format!("Failed to check out {} to {}", rev, dest.display()))?;
    info!(rev, checksum = %checksum, dest = %dest.display(), "checked out");

    let data = CheckoutOutput {
        success: true,
        result_code: 0,
        checksum,
        destination: dest.display().to_string(),
    };
    output.write(&data, || {
        format!("Checked out {} to {}\n", checksum, dest.display())
    })
}

fn cmd_rev_parse(output: &OutputWriter, root: &Path, rev: &str) -> Result<()> {
    let store = open_store(root)?;

    let checksum = store
        .resolve_rev(rev)
        .with_context(|| format!("Failed to resolve {}", rev))?;

    let data = RevParseOutput {
        success: true,
        result_code: 0,
        rev: rev.to_string(),
        checksum,
    };
    output.write(&data, || format!("{}\n", checksum))
}

fn cmd_reflog(
    output: &OutputWriter,
    root: &Path,
    branch: Option<&str>,
    max_count: usize,
) -> Result<()> {
    let store = open_store(root)?;

    let entries = match branch {
        Some(branch) => {
            let mut entries = store
                .journal()
                .for_target(branch)
                .with_context(|| "Failed to read journal")?;
            let skip = entries.len().saturating_sub(max_count);
            entries.drain(..skip);
            entries
        }
        None => store
            .journal()
            .read_recent(max_count)
            .with_context(|| "Failed to read journal")?,
    };

    // Newest first
    let entries: Vec<JournalEntryInfo> = entries.into_iter().rev().map(Into::into).collect();

    let data = ReflogOutput {
        success: true,
        result_code: 0,
        entries,
    };
    output.write(&data, || {
        let mut text = String::new();
        for entry in &data.entries {
            let _ = writeln!(
                text,
                "{} {} {} {}",
                entry.timestamp_human, entry.operation, entry.branch, entry.checksum
            );
        }
        text
    })
}

fn cmd_refs_list(output: &OutputWriter, root: &Path) -> Result<()> {
    let store = open_store(root)?;

    let refs = store
        .refs()
        .list()
        .with_context(|| "Failed to list references")?;

    let data = RefsListOutput {
        success: true,
        result_code: 0,
        refs: refs
            .into_iter()
            .map(|(name, checksum)| RefInfo { name, checksum })
            .collect(),
    };
    output.write(&data, || {
        if data.refs.is_empty() {
            return "No branches\n".to_string();
        }
        let mut text = String::new();
        for info in &data.refs {
            let _ = writeln!(text, "{} -> {}", info.name, info.checksum);
        }
        text
    })
}

fn cmd_refs_rm(output: &OutputWriter, root: &Path, name: &str) -> Result<()> {
    let store = open_store(root)?;

    store
        .refs()
        .remove(name)
        .with_context(|| format!("Failed to remove branch: {}", name))?;
    info!(branch = name, "removed branch");

    let data = RefsRmOutput {
        success: true,
        result_code: 0,
        name: name.to_string(),
    };
    output.write(&data, || format!("Removed branch: {}\n", name))
}
