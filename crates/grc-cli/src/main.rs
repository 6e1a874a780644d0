use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grc_api::GrcApi;
use grc_schemas::{AuthMethod, ConflictResolution};
use grc_store::PageRequest;
use grc_vault::ConfigInput;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "grc")]
#[command(about = "GRC sync core CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// SOR connection configuration and health
    Connection {
        #[command(subcommand)]
        cmd: ConnectionCmd,
    },
    /// Local system mirrors
    Systems {
        #[command(subcommand)]
        cmd: SystemsCmd,
    },
    /// Statement overlay editing
    Statements {
        #[command(subcommand)]
        cmd: StatementsCmd,
    },
    /// SOR -> local sync
    Pull {
        #[command(subcommand)]
        cmd: PullCmd,
    },
    /// local -> SOR sync
    Push {
        #[command(subcommand)]
        cmd: PushCmd,
    },
    /// Audit log query/export/stats
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum ConnectionCmd {
    Status,
    Configure {
        #[arg(long)]
        instance_url: String,
        #[arg(long, value_enum)]
        auth_method: CliAuthMethod,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        client_secret: Option<String>,
        #[arg(long)]
        token_url: Option<String>,
    },
    Test {
        #[arg(long)]
        connection_id: Uuid,
    },
    Delete,
}

#[derive(Clone, clap::ValueEnum)]
enum CliAuthMethod {
    Basic,
    Oauth,
}

#[derive(Subcommand)]
enum SystemsCmd {
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 25)]
        page_size: i64,
        #[arg(long)]
        search: Option<String>,
    },
    Discover,
    Import {
        #[arg(long = "sor-id", required = true)]
        sor_ids: Vec<String>,
    },
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum StatementsCmd {
    Modified {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 25)]
        page_size: i64,
    },
    Conflicts {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 25)]
        page_size: i64,
    },
    UpdateLocal {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        content: String,
        #[arg(long)]
        user: Option<String>,
    },
    ResolveConflict {
        #[arg(long)]
        id: Uuid,
        #[arg(long, value_enum)]
        choice: CliResolutionChoice,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
    RevertToRemote {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum CliResolutionChoice {
    KeepLocal,
    KeepRemote,
    Merge,
}

#[derive(Subcommand)]
enum PullCmd {
    Start {
        #[arg(long = "system", required = true)]
        system_ids: Vec<Uuid>,
    },
    Status {
        #[arg(long)]
        job_id: Uuid,
    },
    Cancel {
        #[arg(long)]
        job_id: Uuid,
    },
}

#[derive(Subcommand)]
enum PushCmd {
    Start {
        #[arg(long = "statement", required = true)]
        statement_ids: Vec<Uuid>,
        #[arg(long, default_value_t = 5)]
        concurrency: usize,
    },
    Status {
        #[arg(long)]
        job_id: Uuid,
    },
    Cancel {
        #[arg(long)]
        job_id: Uuid,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    Query {
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 25)]
        page_size: i64,
    },
    Get {
        #[arg(long)]
        id: Uuid,
    },
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = grc_config::Settings::from_env().context("loading settings")?;
    let api = GrcApi::connect(&settings).await.context("connecting GrcApi")?;

    match cli.cmd {
        Commands::Connection { cmd } => match cmd {
            ConnectionCmd::Status => {
                let status = api.connection_get_status().await?;
                println!("{status:?}");
            }
            ConnectionCmd::Configure {
                instance_url,
                auth_method,
                username,
                password,
                client_id,
                client_secret,
                token_url,
            } => {
                let input = ConfigInput {
                    instance_url,
                    auth_method: match auth_method {
                        CliAuthMethod::Basic => AuthMethod::Basic,
                        CliAuthMethod::Oauth => AuthMethod::Oauth,
                    },
                    username,
                    password,
                    client_id,
                    client_secret,
                    token_url,
                };
                let row = api.connection_save_config(input).await.map_err(|e| anyhow::anyhow!("{e}"))?;
                println!("connection_id={}", row.id);
            }
            ConnectionCmd::Test { connection_id } => {
                let result = api.connection_test(connection_id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
                println!("version={} build_tag={} response_time_ms={}", result.version, result.build_tag, result.response_time_ms);
            }
            ConnectionCmd::Delete => {
                api.connection_delete().await?;
                println!("deleted=true");
            }
        },

        Commands::Systems { cmd } => match cmd {
            SystemsCmd::List { page, page_size, search } => {
                let result = api.systems_list(PageRequest { page, page_size }, search.as_deref(), None).await?;
                for s in result.items {
                    println!("{} {} {}", s.id, s.sor_id, s.name);
                }
                println!("total={}", result.total);
            }
            SystemsCmd::Discover => {
                let discovered = api.systems_discover().await.map_err(|e| anyhow::anyhow!("{e}"))?;
                for s in discovered {
                    println!("{} {}", s.sys_id, s.name);
                }
            }
            SystemsCmd::Import { sor_ids } => {
                let imported = api.systems_import(&sor_ids).await.map_err(|e| anyhow::anyhow!("{e}"))?;
                for s in imported {
                    println!("{} {} {}", s.id, s.sor_id, s.name);
                }
            }
            SystemsCmd::Delete { id } => {
                api.systems_delete(id).await?;
                println!("deleted=true");
            }
        },

        Commands::Statements { cmd } => match cmd {
            StatementsCmd::Modified { page, page_size } => {
                let result = api.statements_modified(PageRequest { page, page_size }).await?;
                for s in result.items {
                    println!("{} {} {}", s.id, s.sor_id, s.sync_status);
                }
                println!("total={}", result.total);
            }
            StatementsCmd::Conflicts { page, page_size } => {
                let result = api.statements_conflicts(PageRequest { page, page_size }).await?;
                for s in result.items {
                    println!("{} {} {}", s.id, s.sor_id, s.sync_status);
                }
                println!("total={}", result.total);
            }
            StatementsCmd::UpdateLocal { id, content, user } => {
                let result = api.statements_update_local(id, &content, user.as_deref()).await?;
                match result {
                    Ok(row) => println!("sync_status={}", row.sync_status),
                    Err(e) => anyhow::bail!("{e}"),
                }
            }
            StatementsCmd::ResolveConflict { id, choice, text, user } => {
                let resolution = match choice {
                    CliResolutionChoice::KeepLocal => ConflictResolution::KeepLocal,
                    CliResolutionChoice::KeepRemote => ConflictResolution::KeepRemote,
                    CliResolutionChoice::Merge => ConflictResolution::Merge { text: text.unwrap_or_default() },
                };
                let result = api.statements_resolve_conflict(id, resolution, user.as_deref()).await?;
                match result {
                    Ok(row) => println!("sync_status={}", row.sync_status),
                    Err(e) => anyhow::bail!("{e}"),
                }
            }
            StatementsCmd::RevertToRemote { id } => {
                let row = api.statements_revert_to_remote(id).await?;
                println!("sync_status={}", row.sync_status);
            }
        },

        Commands::Pull { cmd } => match cmd {
            PullCmd::Start { system_ids } => {
                let job_id = api.pull_start(system_ids, None).await.map_err(|e| anyhow::anyhow!("{e}"))?;
                println!("job_id={job_id}");
            }
            PullCmd::Status { job_id } => {
                let snapshot = api.pull_status(job_id).await?;
                println!("{snapshot:?}");
            }
            PullCmd::Cancel { job_id } => {
                let cancelled = api.pull_cancel(job_id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
                println!("cancelled={cancelled}");
            }
        },

        Commands::Push { cmd } => match cmd {
            PushCmd::Start { statement_ids, concurrency } => {
                let job_id = api.push_start(statement_ids, concurrency).await.map_err(|e| anyhow::anyhow!("{e}"))?;
                println!("job_id={job_id}");
            }
            PushCmd::Status { job_id } => {
                let snapshot = api.push_status(job_id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
                println!("status={:?} succeeded={} failed={}", snapshot.status, snapshot.succeeded, snapshot.failed);
            }
            PushCmd::Cancel { job_id } => {
                api.push_cancel(job_id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
                println!("cancelled=true");
            }
        },

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Query { entity_id, page, page_size } => {
                let filter = grc_audit::Filter {
                    entity_id,
                    page,
                    page_size,
                    ..Default::default()
                };
                let (items, total) = api.audit_query(&filter).await?;
                for e in items {
                    println!("{} {} {} {}", e.created_at.to_rfc3339(), e.event_type, e.action, e.status);
                }
                println!("total={total}");
            }
            AuditCmd::Get { id } => match api.audit_get(id).await? {
                Some(e) => println!("{} {} {} {} {}", e.created_at.to_rfc3339(), e.event_type, e.entity_id, e.action, e.status),
                None => println!("not found"),
            },
            AuditCmd::Stats => {
                let stats = api.audit_stats().await?;
                println!("total={} today={} this_week={} this_month={}", stats.total, stats.today, stats.this_week, stats.this_month);
            }
        },
    }

    Ok(())
}
