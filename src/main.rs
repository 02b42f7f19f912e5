use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::Value;

use dialogue_tree::dialogue::validate::PublishError;
use dialogue_tree::directory::{DirectorySource, JsonFileDirectory};
use dialogue_tree::terminal::Terminal;
use dialogue_tree::{
    validate, DataInjection, InjectionPayload, Interpreter, MemoryStore, Tree, TreeStore,
};

#[derive(Parser)]
#[command(name = "dialogue-tree", version, about = "Validate and run JSON dialogue trees")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the validation reports of a tree as JSON
    Validate {
        /// Tree definition file
        tree: PathBuf,
    },
    /// Run one dialogue session in the terminal
    Run {
        /// Tree definition file
        tree: PathBuf,
        /// JSON list of workspace users for slack-user questions
        #[arg(long, env = "DIALOGUE_USERS")]
        users: Option<PathBuf>,
        /// Numeric id of the tree's author
        #[arg(long, env = "DIALOGUE_AUTHOR", default_value_t = 1)]
        author: i64,
        /// Who is answering, recorded with the session
        #[arg(long, env = "DIALOGUE_RESPONDENT", default_value = "terminal")]
        respondent: String,
    },
}

fn main() -> Result<ExitCode> {
    // Control verbosity with RUST_LOG:
    //   RUST_LOG=debug                             # + answers and every report
    //   RUST_LOG=dialogue_tree::tamper=warn,off    # only malformed-data signals
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { tree } => validate_tree(&tree),
        Command::Run {
            tree,
            users,
            author,
            respondent,
        } => run_tree(&tree, users, author, respondent).map(|()| ExitCode::SUCCESS),
    }
}

fn validate_tree(path: &Path) -> Result<ExitCode> {
    let tree = Tree::from_path(path).context("failed to load tree")?;
    let summary = validate(&tree);

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.is_clean() {
        info!("Tree {} is publishable", tree.id);
        return Ok(ExitCode::SUCCESS);
    }
    Ok(ExitCode::FAILURE)
}

fn run_tree(path: &Path, users: Option<PathBuf>, author: i64, respondent: String) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let definition: Value = serde_json::from_str(&raw).context("failed to parse tree")?;
    let title = path
        .file_stem()
        .map_or_else(|| "untitled".into(), |s| s.to_string_lossy());

    let mut store = MemoryStore::new();
    let tree_id = store.save_tree(None, author, &title, definition)?;
    let mut tree = match store.publish(tree_id, author) {
        Ok(tree) => tree,
        Err(err) => {
            if let Some(PublishError::Rejected { summary, .. }) = err.downcast_ref::<PublishError>() {
                for report in summary.iter() {
                    eprintln!("  node {}: {}", report.node_id, report);
                }
                bail!("tree {} has {} validation report(s)", path.display(), summary.len());
            }
            return Err(err);
        }
    };

    for request in tree.requested_data_injections() {
        match request {
            DataInjection::SlackUsers => {
                let path = users
                    .as_ref()
                    .context("tree asks for workspace users; pass --users <USERS_JSON>")?;
                let directory = JsonFileDirectory::new(path).fetch_users()?;
                tree.inject_data(InjectionPayload::SlackUsers(Arc::new(directory)));
            }
        }
    }

    println!("\n========================================");
    println!("   DIALOGUE {}{}", tree.id, if tree.urgent { " (urgent)" } else { "" });
    println!("========================================");
    println!("Type your answers. Type quit to leave.");

    let session_id = store
        .open_sessions(tree_id, &[respondent])?
        .into_iter()
        .next()
        .context("no session opened")?;

    let terminal = Terminal::new(io::stdin().lock(), io::stdout());
    let transcript = Interpreter::new(&tree, terminal)?.run()?;
    store.finish_session(session_id, &transcript)?;

    println!("{}", transcript.to_json_string()?);
    Ok(())
}
