//! Legacy digital library migration loader (bibmigrate)

use bibmigrate::config::Config;
use bibmigrate::db::{self, Stats};
use bibmigrate::dump::{pids::parse_fetchers, DumpOptions, MigrationRecord, SchemaVersion, SourceType};
use bibmigrate::loader::batch::{
    run_batch, run_concurrent, select_items, BatchOptions, CommunityTask, DepositTask, FeaturedTask, LoadTask,
    RecordTask, RemoteAccountTask, RemoteTokenTask, UserIdentityTask, UserTask,
};
use bibmigrate::loader::communities::LogoOptions;
use bibmigrate::loader::records::clean_record;
use bibmigrate::loader::users::DuplicatePolicy;
use bibmigrate::source;
use bibmigrate::store::{MemoryStore, PgSession, Session};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bibmigrate")]
#[command(about = "Load legacy digital library dumps into the new storage model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Load dump files
    Load {
        #[command(subcommand)]
        command: LoadCommands,
    },
    /// Inspect records in dump files
    Inspect {
        /// Dump files or directories
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Show a single record
        #[arg(long)]
        recid: Option<i64>,
        /// Show only the record's files
        #[arg(long, requires = "recid", conflicts_with_all = ["json", "marcxml"])]
        files: bool,
        /// Show every revision as JSON
        #[arg(long, requires = "recid", conflicts_with = "marcxml")]
        json: bool,
        /// Show every revision as MARCXML
        #[arg(long, requires = "recid")]
        marcxml: bool,
        /// Schema used to render MARCXML revisions as JSON
        #[arg(long)]
        schema: Option<SchemaVersion>,
    },
    /// Remove a loaded record and everything derived from it
    Clean {
        recid: i64,
    },
    /// Show counts of loaded entities
    Stats,
    /// Reset database (remove all loaded data)
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum LoadCommands {
    /// Load bibliographic records
    Records {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Revision representation to load
        #[arg(long)]
        source_type: Option<SourceType>,
        /// Legacy schema of MARCXML revisions
        #[arg(long)]
        schema: Option<SchemaVersion>,
        /// Load a single record
        #[arg(long)]
        recid: Option<i64>,
        /// Only load the latest revision of each record
        #[arg(long)]
        latest_only: bool,
        /// Comma separated pid fetchers, e.g. "doi,oai"
        #[arg(long)]
        pid_fetchers: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load deposits with their SIPs
    Deposits {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Load a single deposit
        #[arg(long)]
        depid: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load user accounts (always sequential)
    Users {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Duplicate email/username handling: rename or fail
        #[arg(long, default_value = "rename")]
        on_duplicate: DuplicatePolicy,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load remote accounts, optionally paired with user identities
    Remoteaccounts {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load user identities (legacy UserEXT)
    Userexts {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load remote account tokens
    Remotetokens {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load communities
    Communities {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Directory holding legacy logos named <id>.<ext>
        #[arg(long)]
        logos_dir: Option<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load featured communities
    Featured {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Log failed items and keep going
    #[arg(long)]
    continue_on_error: bool,
    /// Load into memory only and report what would be stored
    #[arg(long)]
    dry_run: bool,
    /// Concurrent workers
    #[arg(long)]
    jobs: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bibmigrate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Migrate => {
            run_migrations(&config).await?;
        }
        Commands::Load { command } => {
            load(&config, command).await?;
        }
        Commands::Inspect {
            sources,
            recid,
            files,
            json,
            marcxml,
            schema,
        } => {
            let schema = schema.unwrap_or(config.schema_version);
            inspect(&sources, recid, files, json, marcxml, schema)?;
        }
        Commands::Clean { recid } => {
            clean(&config, recid).await?;
        }
        Commands::Stats => {
            let pool = db::create_pool(&config.database_url, config.max_connections).await?;
            print_stats(&db::get_stats(&pool).await?);
        }
        Commands::Reset { force } => {
            reset_database(&config, force).await?;
        }
    }

    Ok(())
}

async fn run_migrations(config: &Config) -> anyhow::Result<()> {
    println!("running migrations...");
    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    db::run_migrations(&pool).await?;
    println!("migrations complete");
    Ok(())
}

async fn load(config: &Config, command: LoadCommands) -> anyhow::Result<()> {
    match command {
        LoadCommands::Records {
            sources,
            source_type,
            schema,
            recid,
            latest_only,
            pid_fetchers,
            run,
        } => {
            let options = DumpOptions {
                source_type: source_type.unwrap_or(config.source_type),
                schema: schema.unwrap_or(config.schema_version),
                latest_only,
                pid_fetchers: parse_fetchers(pid_fetchers.as_deref().unwrap_or(&config.pid_fetchers))?,
            };
            let task = RecordTask { options };
            let items = source::read_sources(&sources)?;
            let items = match recid {
                Some(recid) => {
                    let selected = select_items(&task, items, &recid.to_string());
                    if selected.is_empty() {
                        anyhow::bail!("record {} not found in dump", recid);
                    }
                    selected
                }
                None => items,
            };
            run_task(config, Arc::new(task), items, &run, recid.is_some()).await
        }
        LoadCommands::Deposits { sources, depid, run } => {
            let items = source::read_sources(&sources)?;
            let items = match &depid {
                Some(depid) => {
                    let selected = select_items(&DepositTask, items, depid);
                    if selected.is_empty() {
                        anyhow::bail!("deposit {} not found in dump", depid);
                    }
                    selected
                }
                None => items,
            };
            run_task(config, Arc::new(DepositTask), items, &run, depid.is_some()).await
        }
        LoadCommands::Users {
            sources,
            on_duplicate,
            run,
        } => {
            let items = source::read_sources(&sources)?;
            let task = UserTask { policy: on_duplicate };
            run_task(config, Arc::new(task), items, &run, true).await
        }
        LoadCommands::Remoteaccounts { sources, run } => {
            let items = source::read_sources(&sources)?;
            run_task(config, Arc::new(RemoteAccountTask), items, &run, false).await
        }
        LoadCommands::Userexts { sources, run } => {
            let items = source::read_sources(&sources)?;
            run_task(config, Arc::new(UserIdentityTask), items, &run, false).await
        }
        LoadCommands::Remotetokens { sources, run } => {
            let items = source::read_sources(&sources)?;
            run_task(config, Arc::new(RemoteTokenTask), items, &run, false).await
        }
        LoadCommands::Communities { sources, logos_dir, run } => {
            let items = source::read_sources(&sources)?;
            let logos = LogoOptions {
                logos_dir,
                storage_dir: if run.dry_run {
                    None
                } else {
                    Some(config.logo_storage_path.clone())
                },
            };
            run_task(config, Arc::new(CommunityTask { logos }), items, &run, false).await
        }
        LoadCommands::Featured { sources, run } => {
            let items = source::read_sources(&sources)?;
            run_task(config, Arc::new(FeaturedTask), items, &run, false).await
        }
    }
}

async fn run_task<T>(config: &Config, task: Arc<T>, items: Vec<Value>, run: &RunArgs, sequential: bool) -> anyhow::Result<()>
where
    T: LoadTask + 'static,
{
    let jobs = if run.dry_run || sequential {
        1
    } else {
        run.jobs.unwrap_or(config.jobs).max(1)
    };
    let options = BatchOptions {
        continue_on_error: run.continue_on_error || config.continue_on_error,
        jobs,
    };

    println!("loading {} {} item(s) with {} worker(s)...", items.len(), task.entity(), jobs);
    let progress = progress_bar(items.len() as u64);

    let report = if run.dry_run {
        let mut store = MemoryStore::new();
        let report = run_batch(&mut store, task.as_ref(), items, &options, &progress).await;
        progress.finish_and_clear();
        let report = report?;
        println!("dry run, nothing was written. would store:");
        print_stats(&store.committed().stats());
        report
    } else {
        let pool = db::create_pool(&config.database_url, config.max_connections).await?;
        let report = run_concurrent(|| PgSession::new(pool.clone()), task.clone(), items, &options, &progress).await;
        progress.finish_and_clear();
        report?
    };

    println!("{} loaded, {} failed", report.loaded, report.failed.len());
    for failed in &report.failed {
        println!("  {} {}: {}", task.entity(), failed.key, failed.error);
    }
    if !report.is_success() {
        anyhow::bail!("{} {} item(s) failed to load", report.failed.len(), task.entity());
    }
    Ok(())
}

fn progress_bar(len: u64) -> ProgressBar {
    let progress = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}") {
        progress.set_style(style);
    }
    progress
}

fn inspect(
    sources: &[PathBuf],
    recid: Option<i64>,
    files: bool,
    json: bool,
    marcxml: bool,
    schema: SchemaVersion,
) -> anyhow::Result<()> {
    let items = source::read_sources(sources)?;

    let Some(recid) = recid else {
        println!("record identifiers");
        let mut total = 0;
        for item in &items {
            println!("{}", item.get("recid").cloned().unwrap_or(Value::Null));
            total += 1;
        }
        println!("{} records found in dump", total);
        return Ok(());
    };

    let task = RecordTask {
        options: DumpOptions::default(),
    };
    let selected = select_items(&task, items, &recid.to_string());
    if selected.is_empty() {
        println!("record not found");
        return Ok(());
    }

    for item in selected {
        if !(files || json || marcxml) {
            println!("{}", serde_json::to_string_pretty(&item)?);
            continue;
        }
        let record = MigrationRecord::from_value(item)?;
        if files {
            println!("files");
            println!("{}", serde_json::to_string_pretty(&record.files)?);
        }
        if json {
            println!("records (json)");
            for revision in &record.record {
                println!("revision {}", revision.modification_datetime);
                let rendered = match (&revision.json, &revision.marcxml) {
                    (Some(json), _) => json.clone(),
                    (None, Some(xml)) => schema.transform(xml)?,
                    (None, None) => Value::Null,
                };
                println!("{}", serde_json::to_string_pretty(&rendered)?);
            }
        }
        if marcxml {
            println!("records (marcxml)");
            for revision in &record.record {
                println!("revision {}", revision.modification_datetime);
                println!("{}", revision.marcxml.as_deref().unwrap_or(""));
            }
        }
    }
    Ok(())
}

async fn clean(config: &Config, recid: i64) -> anyhow::Result<()> {
    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    let mut session = PgSession::new(pool);
    let report = match clean_record(&mut session, recid).await {
        Ok(report) => report,
        Err(err) => {
            session.rollback().await?;
            return Err(err.into());
        }
    };
    session.checkpoint().await?;
    println!(
        "record {} removed ({} record(s), {} deposit(s), {} sip(s), {} bucket(s), {} file instance(s))",
        recid, report.records, report.deposits, report.sips, report.buckets, report.file_instances
    );
    Ok(())
}

fn print_stats(stats: &Stats) {
    println!("records:          {} ({} deleted)", stats.records, stats.deleted_records);
    println!("revisions:        {}", stats.revisions);
    println!(
        "pids:             {} registered, {} reserved, {} deleted",
        stats.registered_pids, stats.reserved_pids, stats.deleted_pids
    );
    println!("buckets:          {}", stats.buckets);
    println!("objects:          {}", stats.objects);
    println!("file instances:   {}", stats.file_instances);
    println!("users:            {}", stats.users);
    println!(
        "remote accounts:  {} ({} identities, {} tokens)",
        stats.remote_accounts, stats.user_identities, stats.remote_tokens
    );
    println!("communities:      {} ({} featured)", stats.communities, stats.featured);
    println!("sips:             {}", stats.sips);
}

async fn reset_database(config: &Config, force: bool) -> anyhow::Result<()> {
    if !force {
        println!("this will DELETE ALL LOADED DATA.");
        println!("type 'yes' to confirm: ");

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "yes" {
            println!("aborted");
            return Ok(());
        }
    }

    println!("resetting database...");
    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    db::reset(&pool).await?;
    println!("database reset complete");

    Ok(())
}
