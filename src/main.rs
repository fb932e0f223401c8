use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ucsf_vpn::backend::PulseGui;
use ucsf_vpn::config::CONFIG_FILE_NAME;
use ucsf_vpn::credentials::{CredentialError, CredentialResolver, Credentials, TerminalPrompter};
use ucsf_vpn::logs::{self, LogSource, DEFAULT_TAIL};
use ucsf_vpn::{notify, Action, AnyBackend, Config, Dispatcher, IpInfoProber, Overrides, RunConfig};

#[derive(Parser)]
#[command(name = "ucsf-vpn")]
#[command(about = "Connect to and disconnect from the UCSF VPN")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// VPN client to use: openconnect or pulse
    #[arg(long, env = "UCSF_VPN_METHOD", global = true)]
    method: Option<String>,

    /// VPN username
    #[arg(long, global = true)]
    user: Option<String>,

    /// VPN password
    #[arg(long = "pwd", global = true)]
    password: Option<String>,

    /// Second factor: push, phone[1-9], sms[1-9], a 6-7 digit code, a YubiKey code, or false
    #[arg(long, env = "UCSF_VPN_TOKEN", global = true)]
    token: Option<String>,

    /// VPN server (also the credentials file machine name)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Authentication realm
    #[arg(long, global = true)]
    realm: Option<String>,

    /// VPN login URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Start or stop regardless of the current state
    #[arg(long, global = true)]
    force: bool,

    /// Succeed quietly when already connected
    #[arg(long, global = true)]
    skip: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output, including the VPN client's
    #[arg(long, global = true)]
    debug: bool,

    /// Print commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Use the Pulse Secure GUI (default)
    #[arg(long, global = true, overrides_with = "no_gui")]
    gui: bool,

    /// Do not use the Pulse Secure GUI
    #[arg(long, global = true, overrides_with = "gui")]
    no_gui: bool,

    /// Show a desktop notification with the result
    #[arg(long, global = true)]
    notification: bool,

    /// Slow down (>1) or speed up (<1) GUI automation
    #[arg(long, default_value_t = 1.0, global = true)]
    speed: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the VPN
    Start,
    /// Disconnect from the VPN
    Stop,
    /// Disconnect, then connect again
    Restart,
    /// Connect if disconnected, otherwise disconnect
    Toggle,
    /// Show whether the VPN is connected
    Status,
    /// Show everything known about the public IP address
    Details,
    /// Show the tail of the VPN client log
    Log {
        /// Number of lines to show
        #[arg(long, default_value_t = DEFAULT_TAIL)]
        tail: usize,
    },
    /// Look for known problems in the VPN client log
    Troubleshoot,
    /// Launch the Pulse Secure GUI
    OpenGui,
    /// Close the Pulse Secure GUI
    CloseGui,
    /// Generate default config file
    Init,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            method: self.method.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            token: self.token.clone(),
            server: self.server.clone(),
            realm: self.realm.clone(),
            url: self.url.clone(),
            force: self.force,
            skip: self.skip,
            debug: self.debug,
            dry_run: self.dry_run,
            gui: self.gui || !self.no_gui,
            notification: self.notification,
            speed: self.speed,
        }
    }

    fn action(&self) -> Option<Action> {
        match self.command {
            Commands::Start => Some(Action::Start),
            Commands::Stop => Some(Action::Stop),
            Commands::Restart => Some(Action::Restart),
            Commands::Toggle => Some(Action::Toggle),
            Commands::Status => Some(Action::Status),
            Commands::Details => Some(Action::Details),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the command-line verbosity
    let level = if cli.debug {
        Level::TRACE
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match run(&cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            if cli.notification {
                notify::send("UCSF VPN error", &e.to_string(), true);
            }
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<i32, Box<dyn std::error::Error>> {
    if let Commands::Init = cli.command {
        info!("Generating default config...");
        let path = std::path::PathBuf::from(CONFIG_FILE_NAME);
        Config::default().save(&path)?;
        println!("Created default config: {}", CONFIG_FILE_NAME);
        return Ok(0);
    }

    let file = Config::discover()?;
    let config = RunConfig::new(&file, cli.overrides())?;

    if let Some(action) = cli.action() {
        return dispatch(&config, action).await;
    }

    match cli.command {
        Commands::Log { tail } => {
            let lines = LogSource::for_config(&config).read_lines()?;
            for line in logs::tail(&lines, tail) {
                println!("{}", line);
            }
        }
        Commands::Troubleshoot => {
            let lines = LogSource::for_config(&config).read_lines()?;
            let findings = logs::troubleshoot(&lines);
            if findings.is_empty() {
                println!("No known problems found in the {} log", config.method);
            }
            for finding in findings {
                println!("{}", finding.line);
                println!("  -> {}", finding.hint);
            }
        }
        Commands::OpenGui => PulseGui::new(&config).open_gui(&config)?,
        Commands::CloseGui => PulseGui::new(&config).close_gui(&config)?,
        _ => {}
    }

    Ok(0)
}

async fn dispatch(config: &RunConfig, action: Action) -> Result<i32, Box<dyn std::error::Error>> {
    let prober = IpInfoProber::from_config(config)?;
    let backend = AnyBackend::for_config(config);
    let prompter = TerminalPrompter;
    let credentials = || -> Result<Credentials, CredentialError> {
        CredentialResolver::from_config(config, &prompter)?.resolve()
    };

    let outcome = Dispatcher::new(config, &prober, &backend, &credentials)
        .run(action)
        .await?;

    if config.notification && action.changes_state() {
        if let Some(summary) = &outcome.summary {
            notify::send("UCSF VPN", summary, outcome.code != 0);
        }
    }
    Ok(outcome.code)
}
