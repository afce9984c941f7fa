use a365_config::{AgentRegistration, ProactiveConfig, ScheduledTask};
use a365_mcp::{extract_chat_id, McpClient};
use a365_proactive::ProactiveScheduler;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "a365-agent")]
#[command(about = "Agent 365 proactive agent: delegated token exchange and MCP tool calls", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "a365.yaml")]
    config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and report incomplete agents
    Check,

    /// Run the token exchange for one agent and tool server
    Token {
        /// Agent user principal name
        #[arg(short, long)]
        agent: String,

        /// Tool server name from the configuration
        #[arg(short, long)]
        server: String,
    },

    /// List the tools a server exposes to an agent
    Tools {
        #[arg(short, long)]
        agent: String,

        #[arg(short, long)]
        server: String,
    },

    /// Call a single tool as an agent
    Call {
        #[arg(short, long)]
        agent: String,

        #[arg(short, long)]
        server: String,

        /// Tool name, e.g. createChat
        #[arg(short, long)]
        tool: String,

        /// Tool arguments as a JSON object; placeholders are rendered
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,

        /// Print only the chat id from the tool result
        #[arg(long, action = clap::ArgAction::SetTrue)]
        chat_id: bool,
    },

    /// Run the proactive scheduler
    Run {
        /// Run a single tick and exit
        #[arg(long, action = clap::ArgAction::SetTrue)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    info!("Loading configuration from: {:?}", cli.config);
    let config = ProactiveConfig::from_yaml(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Check => check(&config),
        Commands::Token { agent, server } => {
            let scheduler = ProactiveScheduler::from_config(config)?;
            print_token(&scheduler, &agent, &server).await
        }
        Commands::Tools { agent, server } => {
            let scheduler = ProactiveScheduler::from_config(config)?;
            list_tools(&scheduler, &agent, &server).await
        }
        Commands::Call { agent, server, tool, args, chat_id } => {
            let scheduler = ProactiveScheduler::from_config(config)?;
            call_tool(&scheduler, &agent, &server, &tool, &args, chat_id).await
        }
        Commands::Run { once } => {
            let scheduler = ProactiveScheduler::from_config(config)?;
            run(&scheduler, once).await
        }
    }
}

fn check(config: &ProactiveConfig) -> Result<()> {
    println!("\n🔍 Configuration");
    println!("═══════════════════════════════════════");
    println!("Tenant: {}", config.tenant_id);
    println!("Authority: {}", config.identity_provider.authority);

    let mut servers: Vec<_> = config.tool_servers.iter().collect();
    servers.sort_by(|a, b| a.0.cmp(b.0));
    println!("\n📦 Tool servers:");
    for (name, server) in servers {
        println!("  {} -> {} ({}/{})", name, server.url, server.audience, server.scope);
    }

    println!("\n👤 Agents:");
    let mut incomplete = 0;
    for agent in &config.agents {
        let missing = config.missing_fields(agent);
        let enabled = agent.enabled_tasks().count();
        if missing.is_empty() {
            println!("  ✅ {} ({} enabled task(s))", agent.agent_user_upn, enabled);
        } else {
            incomplete += 1;
            println!(
                "  ❌ {} missing: {}",
                agent.agent_user_upn,
                missing.join(", ")
            );
        }
    }
    println!();

    if incomplete > 0 {
        bail!("{} agent(s) are missing credentials", incomplete);
    }
    Ok(())
}

fn find_agent<'a>(config: &'a ProactiveConfig, upn: &str) -> Result<&'a AgentRegistration> {
    config
        .find_agent(upn)
        .ok_or_else(|| anyhow!("Agent '{}' is not registered", upn))
}

async fn print_token(scheduler: &ProactiveScheduler, agent: &str, server: &str) -> Result<()> {
    let config = scheduler.config();
    let agent = find_agent(config, agent)?;
    let server = config.tool_server(server)?;

    let tokens = scheduler
        .pipeline()
        .acquire_token_set(
            &config.credentials_for(agent),
            &config.identity_for(agent),
            &server,
        )
        .await?;

    println!("\n🔑 Token exchange for {}", agent.agent_user_upn);
    println!("═══════════════════════════════════════");
    println!("Exchange token: {} chars", tokens.exchange.len());
    println!("Resource token: {} chars ({})", tokens.resource.len(), tokens.resource.scope());
    println!("Tool token:     {} chars", tokens.final_token.len());
    println!("  Scope:   {}", tokens.final_token.scope());
    println!("  Expires: {}", tokens.final_token.expires_at());
    Ok(())
}

async fn list_tools(scheduler: &ProactiveScheduler, agent: &str, server: &str) -> Result<()> {
    let config = scheduler.config();
    let agent = find_agent(config, agent)?;
    let tool_server = config.tool_server(server)?;
    let settings = config
        .tool_servers
        .get(server)
        .ok_or_else(|| anyhow!("Unknown tool server '{}'", server))?;

    let token = scheduler
        .pipeline()
        .acquire_tool_token(
            &config.credentials_for(agent),
            &config.identity_for(agent),
            &tool_server,
        )
        .await?;
    let mut client = McpClient::connect(
        &tool_server,
        &token,
        &settings.headers,
        Duration::from_secs(settings.timeout_secs),
    )?;
    client.initialize().await?;

    println!("\n🛠️  Tools on {}:", tool_server.name);
    println!("═══════════════════════════════════════");
    for tool in client.list_tools().await? {
        println!("\n📦 {}", tool.name);
        if !tool.description.is_empty() {
            println!("   {}", tool.description);
        }
    }
    println!();
    Ok(())
}

async fn call_tool(
    scheduler: &ProactiveScheduler,
    agent: &str,
    server: &str,
    tool: &str,
    args: &str,
    chat_id: bool,
) -> Result<()> {
    let agent = find_agent(scheduler.config(), agent)?;
    let arguments: Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    if !arguments.is_object() {
        bail!("--args must be a JSON object");
    }

    let task = ScheduledTask {
        name: format!("cli:{tool}"),
        server: server.to_string(),
        tool: tool.to_string(),
        arguments,
        enabled: true,
    };
    let result = scheduler.run_operation(agent, &task).await?;

    if chat_id {
        println!("{}", extract_chat_id(&result)?);
    } else {
        println!("{}", result.text());
    }
    Ok(())
}

async fn run(scheduler: &ProactiveScheduler, once: bool) -> Result<()> {
    if once {
        let summary = scheduler.tick().await;
        println!(
            "Tick finished: {} succeeded, {} failed, {} consent pending",
            summary.succeeded, summary.failed, summary.consent_pending
        );
        if summary.failed > 0 || summary.consent_pending > 0 {
            bail!(
                "{} of {} operation(s) did not succeed",
                summary.failed + summary.consent_pending,
                summary.operations()
            );
        }
        return Ok(());
    }

    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received, shutting down");
        })
        .await;
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter))
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
