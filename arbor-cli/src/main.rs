//! Arbor CLI - recursive summaries of source trees

mod progress;

use arbor_core::config::DEFAULT_CONFIG;
use arbor_core::{
    answer_question, select_context, AnalysisRunner, ArborError, Caller, Config, LexicalScorer,
    NodeIndex, NodeKind, RetryPolicy, SummaryCache, TaskStatus, TreeNode,
};
use clap::{Parser, Subcommand};
use progress::ProgressPrinter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Recursive, cache-first summaries of source trees", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true, env = "ARBOR_CONFIG", default_value = "arbor.toml")]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Summarize a local directory or git URL
    Analyze {
        /// Directory path or git URL
        origin: String,

        /// Passphrase for quota-controlled setups
        #[arg(long)]
        passphrase: Option<String>,
    },

    /// Show an analysis task
    Status {
        task_id: String,
    },

    /// List analyzed snapshots
    Snapshots,

    /// Print a snapshot's tree with summaries
    Tree {
        snapshot_id: String,

        /// Only print this many levels below the root
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Search summaries
    Search {
        query: String,

        /// Restrict to one snapshot
        #[arg(long)]
        snapshot: Option<String>,

        /// Override default result limit
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ask a question about a snapshot
    Ask {
        snapshot_id: String,
        question: String,
    },

    /// Rebuild a snapshot's index rows from its summary files
    Rebuild {
        snapshot_id: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    let result = match cli.command {
        Commands::Init { force } => cmd_init(&cli.config, force),
        Commands::Analyze { origin, passphrase } => {
            cmd_analyze(&cli.config, &origin, passphrase, json)
        }
        Commands::Status { task_id } => cmd_status(&cli.config, &task_id, json),
        Commands::Snapshots => cmd_snapshots(&cli.config, json),
        Commands::Tree { snapshot_id, depth } => cmd_tree(&cli.config, &snapshot_id, depth, json),
        Commands::Search {
            query,
            snapshot,
            limit,
        } => cmd_search(&cli.config, &query, snapshot.as_deref(), limit, json),
        Commands::Ask {
            snapshot_id,
            question,
        } => cmd_ask(&cli.config, &snapshot_id, &question, json),
        Commands::Rebuild { snapshot_id } => cmd_rebuild(&cli.config, &snapshot_id, json),
    };

    if let Err(e) = result {
        if json {
            let code = match &e {
                ArborError::NotFound(_) => "not_found",
                ArborError::AccessDenied(_) => "access_denied",
                ArborError::InvalidPath(_) => "invalid_request",
                _ => "error",
            };
            eprintln!(
                "{}",
                serde_json::json!({ "code": code, "message": e.to_string(), "hint": "" })
            );
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn open(config_path: &Path) -> arbor_core::Result<(Config, Arc<NodeIndex>)> {
    let config = Config::load_or_default(config_path)?;
    let index = Arc::new(NodeIndex::open(&config.storage.database)?);
    debug!(
        config = %config_path.display(),
        database = %config.storage.database.display(),
        "opened node index"
    );
    Ok((config, index))
}

fn runtime() -> arbor_core::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

fn print_json<T: serde::Serialize>(value: &T) -> arbor_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

fn cmd_init(config_path: &Path, force: bool) -> arbor_core::Result<()> {
    use colored::Colorize;

    if config_path.exists() && !force {
        return Err(ArborError::InvalidPath(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )));
    }
    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, DEFAULT_CONFIG)?;
    println!("{} {}", "Created".green(), config_path.display());
    Ok(())
}

fn cmd_analyze(
    config_path: &Path,
    origin: &str,
    passphrase: Option<String>,
    json: bool,
) -> arbor_core::Result<()> {
    use colored::Colorize;

    let (config, index) = open(config_path)?;
    let runner = AnalysisRunner::from_config(config, index)?;
    let caller = Caller { passphrase };
    let printer = ProgressPrinter::new(json);

    let task = runtime()?.block_on(runner.run(origin, caller, &printer))?;
    info!(task_id = %task.id, status = task.status.as_str(), "analysis finished");

    if json {
        return print_json(&task);
    }
    match task.status {
        TaskStatus::Completed => {
            println!(
                "{}: {}",
                "Snapshot".green(),
                task.result_id.as_deref().unwrap_or(&task.snapshot_id)
            );
            Ok(())
        }
        _ => Err(ArborError::Summarizer(
            task.error.unwrap_or_else(|| task.message.clone()),
        )),
    }
}

fn cmd_status(config_path: &Path, task_id: &str, json: bool) -> arbor_core::Result<()> {
    use colored::Colorize;

    let (_, index) = open(config_path)?;
    let task = index
        .get_task(task_id)?
        .ok_or_else(|| ArborError::NotFound(format!("task {}", task_id)))?;

    if json {
        return print_json(&task);
    }
    println!("{}: {}", "Task".blue(), task.id);
    println!("{}: {}", "Origin".blue(), task.origin);
    println!("{}: {} ({}%)", "Status".blue(), task.status.as_str(), task.progress);
    println!("{}: {}", "Message".blue(), task.message);
    if let Some(error) = &task.error {
        println!("{}: {}", "Error".red(), error);
    }
    if let Some(result) = &task.result_id {
        println!("{}: {}", "Snapshot".blue(), result);
    }
    println!("{}: {}", "Updated".blue(), task.updated_at);
    Ok(())
}

fn cmd_snapshots(config_path: &Path, json: bool) -> arbor_core::Result<()> {
    use colored::Colorize;

    let (_, index) = open(config_path)?;
    let snapshots = index.list_snapshots()?;
    if json {
        return print_json(&snapshots);
    }
    if snapshots.is_empty() {
        println!("No snapshots");
        return Ok(());
    }
    for snapshot in snapshots {
        println!(
            "{}  {:<10} {}  {}",
            snapshot.id.cyan(),
            snapshot.status.as_str(),
            snapshot.display_name.bold(),
            snapshot.origin.dimmed()
        );
    }
    Ok(())
}

fn cmd_tree(
    config_path: &Path,
    snapshot_id: &str,
    depth: Option<usize>,
    json: bool,
) -> arbor_core::Result<()> {
    let (_, index) = open(config_path)?;
    let tree = index
        .tree(snapshot_id)?
        .ok_or_else(|| ArborError::NotFound(format!("snapshot {}", snapshot_id)))?;
    if json {
        return print_json(&tree);
    }
    print_tree(&tree, 0, depth.unwrap_or(usize::MAX));
    Ok(())
}

fn print_tree(node: &TreeNode, level: usize, max_depth: usize) {
    use colored::Colorize;

    let indent = "  ".repeat(level);
    let name = if node.path.is_empty() {
        "/".bold()
    } else if node.kind == NodeKind::Folder {
        format!("{}/", node.name).blue()
    } else {
        node.name.normal()
    };
    let summary = node.summary.as_deref().map(first_line).unwrap_or("");
    println!("{}{} {}", indent, name, summary.dimmed());

    if level < max_depth {
        for child in &node.children {
            print_tree(child, level + 1, max_depth);
        }
    }
}

fn cmd_search(
    config_path: &Path,
    query: &str,
    snapshot: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> arbor_core::Result<()> {
    use colored::Colorize;

    let (config, index) = open(config_path)?;
    let hits = arbor_core::search(&index, &LexicalScorer, query, snapshot, limit, &config.search)?;
    if json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("No matches");
        return Ok(());
    }
    for hit in hits {
        println!(
            "{} {} {}",
            format!("{:.1}", hit.score).yellow(),
            hit.path.cyan(),
            format!("({})", hit.snapshot_id).dimmed()
        );
        println!("    {}", first_line(&hit.snippet));
    }
    Ok(())
}

fn cmd_ask(
    config_path: &Path,
    snapshot_id: &str,
    question: &str,
    json: bool,
) -> arbor_core::Result<()> {
    use colored::Colorize;

    let (config, index) = open(config_path)?;
    let snapshot = index
        .get_snapshot(snapshot_id)?
        .ok_or_else(|| ArborError::NotFound(format!("snapshot {}", snapshot_id)))?;
    let cache = SummaryCache::for_snapshot(&snapshot, &config.storage.sidecar_extension);
    let context = select_context(
        &index,
        &LexicalScorer,
        &snapshot.id,
        &cache,
        question,
        config.search.qa_top_k,
    )?;

    let summarizer = arbor_core::summarizer::from_config(&config.summarizer)?;
    let retry = RetryPolicy::from_config(&config.summarizer);
    let answer = runtime()?.block_on(answer_question(
        summarizer.as_ref(),
        &retry,
        &context,
        question,
    ))?;

    if json {
        return print_json(&answer);
    }
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("{}", "Sources:".blue());
        for source in &answer.sources {
            let shown = if source.is_empty() { "(overview)" } else { source };
            println!("  {}", shown.cyan());
        }
    }
    Ok(())
}

fn cmd_rebuild(config_path: &Path, snapshot_id: &str, json: bool) -> arbor_core::Result<()> {
    use colored::Colorize;

    let (config, index) = open(config_path)?;
    let restored = index.rebuild_snapshot(
        snapshot_id,
        &config.ignore,
        &config.storage.sidecar_extension,
    )?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "snapshot_id": snapshot_id, "restored": restored })
        );
    } else {
        println!("{}: {} summaries restored", "Rebuilt".green(), restored);
    }
    Ok(())
}
