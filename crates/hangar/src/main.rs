use std::env;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, error, info, warn};
use tokio::net::TcpListener;

use hangar::api::{self, AppState};
use hangar::auth::TokenValidator;
use hangar::bridge::{SessionEventBridge, SystemEventPublisher, TaskEventBridge};
use hangar::config::{
    APP_NAME, AppConfig, load_config, load_or_init_config, resolve_config_path,
    write_default_config,
};
use hangar::container::ContainerSessionManager;
use hangar::gateway::Gateway;
use hangar::task::InMemoryTaskManager;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone(), &cli.command)?;
    ctx.init_logging()?;
    debug!("resolved config path: {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_main(ctx, cmd),
        Command::Token(cmd) => handle_token(&ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Hangar - real-time event gateway for agent containers.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Include file and line information in log output
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the gateway server
    Serve(ServeCommand),
    /// Mint a token for connecting a client
    Token(TokenCommand),
    /// Create the default configuration file
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct TokenCommand {
    /// User id to put in the token subject
    #[arg(long, value_name = "ID")]
    user: String,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts, command: &Command) -> Result<Self> {
        let config_file = resolve_config_path(common.config.clone())?;
        // `init` decides for itself whether to write the file.
        let config = match command {
            Command::Init(_) => load_config(&config_file)?,
            _ => load_or_init_config(&config_file)?,
        };
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level},tower_http={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // `log` macros in the gateway and bridges go through env_logger.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
        builder.filter_module(APP_NAME, self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    /// CLI flags win over `logging.level`.
    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    info!("Starting {} gateway...", APP_NAME);

    ctx.config.validate().context("invalid configuration")?;

    let gateway = Arc::new(Gateway::new(ctx.config.gateway.clone()));
    gateway.start();

    let validator =
        TokenValidator::new(ctx.config.auth.clone()).context("initializing token validator")?;
    if validator.is_dev_mode() {
        warn!("Auth dev mode is enabled; dev:<user> tokens are accepted");
    }
    gateway.set_auth_func(Arc::new(validator));

    let system = SystemEventPublisher::new(Arc::clone(&gateway));
    let tasks = Arc::new(InMemoryTaskManager::new().with_notifier(system));
    let task_bridge = Arc::new(TaskEventBridge::new(Arc::clone(&gateway), tasks));
    gateway.set_task_action_func(task_bridge.clone());

    let sessions = Arc::new(ContainerSessionManager::new(&ctx.config.container));
    info!(
        "Session commands run via {} ({})",
        ctx.config.container.binary(),
        sessions.runtime()
    );
    gateway.set_session_exec_func(Arc::new(SessionEventBridge::new(
        Arc::clone(&gateway),
        sessions,
    )));

    let state = AppState::new(Arc::clone(&gateway))
        .with_allowed_origins(ctx.config.server.allowed_origins.clone())
        .with_dev_mode(ctx.config.auth.dev_mode);
    let app = api::create_router(state);

    let host = cmd.host.unwrap_or_else(|| ctx.config.server.host.clone());
    let port = cmd.port.unwrap_or(ctx.config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("invalid address")?;

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;
    info!("Listening on http://{}", addr);

    let shutdown_gateway = Arc::clone(&gateway);
    let shutdown_signal = async move {
        wait_for_shutdown_signal().await;

        info!("Shutdown signal received, closing gateway connections...");
        task_bridge.stop_all();
        shutdown_gateway.stop();
        info!("Shutdown complete");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM. A handler that fails to install is logged
/// and never fires.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn handle_token(ctx: &RuntimeContext, cmd: TokenCommand) -> Result<()> {
    if cmd.user.trim().is_empty() {
        return Err(anyhow!("--user must not be empty"));
    }

    let validator =
        TokenValidator::new(ctx.config.auth.clone()).context("initializing token validator")?;
    let token = validator
        .generate_token(&cmd.user)
        .context("generating token")?;

    if ctx.common.json {
        let body = serde_json::json!({
            "user_id": cmd.user,
            "token": token,
            "expires_in": ctx.config.auth.token_ttl_secs,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).context("serializing token")?
        );
    } else {
        println!("{token}");
    }
    Ok(())
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.config_file.display()
        ));
    }

    write_default_config(&ctx.config_file)?;
    info!("Wrote default config to {}", ctx.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => write_default_config(&ctx.config_file),
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}
