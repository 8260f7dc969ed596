//! Operator CLI: campaign lifecycle + ad hoc single calls + DB maintenance,
//! without going through the daemon's HTTP surface. Grounded on
//! `mqk-cli`'s `Cli`/`Commands` split, one subcommand per lifecycle action.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dialer")]
#[command(about = "Outbound dialer engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Campaign lifecycle commands
    Campaign {
        #[command(subcommand)]
        cmd: CampaignCmd,
    },

    /// Ad hoc single-call commands
    Calls {
        #[command(subcommand)]
        cmd: CallsCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum CampaignCmd {
    /// Insert a new campaign row. The campaign is picked up by whichever
    /// dialer-daemon next claims runnership (§4.5) — this command does not
    /// dial anything itself.
    Create {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        list_id: String,
        #[arg(long)]
        from_number: String,
        #[arg(long)]
        provider_hint: Option<String>,
        #[arg(long)]
        bot_endpoint: String,
        /// Path to a JSON file of `{ listId: [contact, ...] }`.
        #[arg(long)]
        contacts_file: String,
    },
    Pause {
        #[arg(long)]
        campaign_id: String,
    },
    Resume {
        #[arg(long)]
        campaign_id: String,
    },
    Cancel {
        #[arg(long)]
        campaign_id: String,
        #[arg(long)]
        cancelled_by: Option<String>,
    },
    Status {
        #[arg(long)]
        campaign_id: String,
        /// Layered config paths, used only to compute heartbeat health.
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CallsCmd {
    /// Admit, warm up, and dial a single ad hoc call.
    Place {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        bot_endpoint: String,
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let pool = dialer_db::connect_from_env().await?;

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => commands::db::status(&pool).await?,
            DbCmd::Migrate => commands::db::migrate(&pool).await?,
        },

        Commands::Campaign { cmd } => match cmd {
            CampaignCmd::Create { tenant_id, name, list_id, from_number, provider_hint, bot_endpoint, contacts_file } => {
                commands::campaign::create(
                    &pool,
                    commands::campaign::CreateArgs {
                        tenant_id,
                        name,
                        list_id,
                        from_number,
                        provider_hint,
                        bot_endpoint,
                        contacts_file,
                    },
                )
                .await?
            }
            CampaignCmd::Pause { campaign_id } => {
                commands::campaign::pause(&pool, parse_campaign_id(&campaign_id)?).await?
            }
            CampaignCmd::Resume { campaign_id } => {
                commands::campaign::resume(&pool, parse_campaign_id(&campaign_id)?).await?
            }
            CampaignCmd::Cancel { campaign_id, cancelled_by } => {
                commands::campaign::cancel(&pool, parse_campaign_id(&campaign_id)?, cancelled_by).await?
            }
            CampaignCmd::Status { campaign_id, config_paths } => {
                let config = load_engine_config(&config_paths)?;
                commands::campaign::status(&pool, parse_campaign_id(&campaign_id)?, config.orphan_threshold_ms).await?
            }
        },

        Commands::Calls { cmd } => match cmd {
            CallsCmd::Place { tenant_id, from, to, bot_endpoint, config_paths } => {
                let config = load_engine_config(&config_paths)?;
                let provider = commands::build_provider();
                commands::calls::place(
                    &pool,
                    provider.as_ref(),
                    &config,
                    &commands::webhook_base_url(),
                    commands::calls::PlaceArgs { tenant_id, from, to, bot_endpoint },
                )
                .await?
            }
        },
    }

    Ok(())
}

fn parse_campaign_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).context("invalid campaign_id uuid")
}

fn load_engine_config(config_paths: &[String]) -> Result<dialer_config::EngineConfig> {
    if config_paths.is_empty() {
        return Ok(dialer_config::EngineConfig::default());
    }
    let path_refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
    dialer_config::load_layered_yaml(&path_refs)?.engine_config()
}
