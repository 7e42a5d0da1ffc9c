use clap::{Args, Parser, Subcommand};
use pivpn_reporter::config::Overrides;
use pivpn_reporter::reconcile::{get_attributes, list_clients};
use pivpn_reporter::source::PivpnCommand;
use pivpn_reporter::{Backend, Config};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "pivpn-reporter")]
#[command(about = "Publishes PiVPN client presence and traffic to Home Assistant over MQTT")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ./pivpn-reporter.toml, then ~/.pivpn-reporter/config.toml)
    #[arg(short, long, global = true, env = "PIVPN_REPORTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: OverrideArgs,

    /// Enable debug output
    #[arg(short, long, visible_alias = "debug", global = true, env = "DEBUG")]
    verbose: bool,
}

#[derive(Args)]
struct OverrideArgs {
    /// MQTT host
    #[arg(short = 'H', long, global = true, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// MQTT port
    #[arg(short = 'P', long, global = true, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// MQTT user
    #[arg(short = 'u', long, global = true, env = "MQTT_USER")]
    mqtt_user: Option<String>,

    /// MQTT password
    #[arg(
        short = 'p',
        long,
        global = true,
        env = "MQTT_PASSWORD",
        hide_env_values = true
    )]
    mqtt_password: Option<String>,

    /// Discovery topic prefix
    #[arg(short = 'd', long, global = true, env = "DISCOVERY_TOPIC_PREFIX")]
    discovery_topic_prefix: Option<String>,

    /// Topic prefix
    #[arg(short = 't', long, global = true, env = "TOPIC_PREFIX")]
    topic_prefix: Option<String>,

    /// Update interval in seconds
    #[arg(short = 'i', long, global = true, env = "UPDATE_INTERVAL")]
    update_interval: Option<u64>,

    /// VPN type, either 'WireGuard' or 'OpenVPN' (case sensitive)
    #[arg(long, global = true, env = "VPN_TYPE")]
    vpn_type: Option<Backend>,
}

impl From<OverrideArgs> for Overrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            mqtt_host: args.mqtt_host,
            mqtt_port: args.mqtt_port,
            mqtt_user: args.mqtt_user,
            mqtt_password: args.mqtt_password,
            discovery_topic_prefix: args.discovery_topic_prefix,
            topic_prefix: args.topic_prefix,
            update_interval: args.update_interval,
            vpn_type: args.vpn_type,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Report clients to the MQTT broker until interrupted (default)
    Run,
    /// Print each client's attributes once, without connecting to the broker
    Clients,
    /// Generate default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = load_config(cli.config.as_deref(), cli.overrides)?;
            if let Err(e) = pivpn_reporter::run(config).await {
                error!("Reporter failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Clients => {
            let config = load_config(cli.config.as_deref(), cli.overrides)?;
            print_clients(&config).await?;
        }
        Commands::Init => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from("pivpn-reporter.toml"));
            if path.exists() {
                println!("Config already exists: {}", path.display());
                return Ok(());
            }
            info!("Generating default config...");
            Config::default().save(&path)?;
            println!("Created default config: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(
    path: Option<&Path>,
    overrides: OverrideArgs,
) -> Result<Config, pivpn_reporter::config::ConfigError> {
    let mut config = Config::discover(path)?;
    config.apply(overrides.into());
    config.normalize()
}

async fn print_clients(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let source = PivpnCommand::new(&config.vpn.command, config.command_timeout());
    let layout = config.vpn.backend.layout();

    let snapshot = list_clients(&source, layout).await?;
    info!("{} {} clients", snapshot.len(), config.vpn.backend);

    for client in &snapshot {
        match get_attributes(&source, layout, client).await {
            Ok(attributes) => println!("{}", serde_json::to_string(&attributes)?),
            Err(e) => warn!("Skipping {}: {}", client, e),
        }
    }

    Ok(())
}
