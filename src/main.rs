//! SDS Volume Agent
//!
//! Command-line front end: log in to the Controller, attach and detach
//! volumes on this host, and resolve names to Controller identifiers.
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sds_volume_agent::domain::types::{is_urn, VolumePath};
use sds_volume_agent::host::prompt;
use sds_volume_agent::{
    AgentConfig, AuthController, ConnectionDescriptor, ControllerSession, Credentials,
    DeviceScanner, Endpoint, FileTokenStore, GuidProbe, HostIdentitySource, NameResolver,
    QosPolicy, ReqwestTransport, SystemCommandRunner, VolumeOrchestrator, VpoolKind,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Attach and detach Controller volumes on this host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "SDS_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Controller address (host, host:port or https://host:port)
    #[arg(long, env = "SDS_CONTROLLER")]
    endpoint: Option<String>,

    /// Controller user
    #[arg(long, env = "SDS_USER")]
    user: Option<String>,

    /// Controller password
    #[arg(long, env = "SDS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Read the password from the first line of stdin. Without this flag or
    /// --password, a terminal is prompted when a user is known.
    #[arg(long, conflicts_with = "password")]
    password_stdin: bool,

    /// Skip TLS certificate verification
    #[arg(long, env = "SDS_INSECURE")]
    insecure: bool,

    /// Directory holding the cookie/ token index
    #[arg(long, env = "SDS_INSTALL_DIR")]
    install_dir: Option<PathBuf>,

    /// Directory receiving the session token file
    #[arg(long, env = "SDS_TOKEN_DIR")]
    token_dir: Option<PathBuf>,

    /// Session token file name
    #[arg(long)]
    token_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store a session token
    Login,
    /// Invalidate and forget the stored session token
    Logout,
    /// Map a volume to this host and wait for its device
    Attach {
        /// Controller volume name
        volume: String,
        #[command(flatten)]
        host: HostArgs,
        #[arg(long)]
        iops_limit: Option<u64>,
        #[arg(long)]
        bandwidth_limit_kbps: Option<u64>,
    },
    /// Unmap a volume from this host
    Detach {
        /// Controller volume name
        volume: String,
        #[command(flatten)]
        host: HostArgs,
    },
    /// Resolve a name to a Controller identifier
    Resolve {
        #[command(subcommand)]
        target: ResolveTarget,
    },
}

#[derive(ClapArgs, Debug)]
struct HostArgs {
    /// Identify this host by the client registered under this IP
    #[arg(long, env = "SDS_SDC_IP")]
    sdc_ip: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ResolveTarget {
    /// `tenant/project/volume`, `project/volume`, or a bare name in the default project
    Volume { name: String },
    Vpool {
        name: String,
        #[arg(long, default_value = "block")]
        kind: VpoolKind,
    },
    Varray { name: String },
    Host { name: String },
    Network {
        name: String,
        #[arg(long)]
        varray: Option<String>,
    },
    ExportGroup {
        name: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;
    debug!("{} {}", sds_volume_agent::NAME, sds_volume_agent::VERSION);

    let mut config = load_config(&args)?;
    if let Some(password) = read_password(&args, &config)? {
        config.credentials.password = Some(password);
    }
    config.validate()?;
    let agent = Agent::new(config)?;

    match args.command {
        Command::Login => {
            let credentials = agent
                .credentials
                .clone()
                .context("login needs --user and a password")?;
            let message = agent.auth().authenticate(&credentials).await?;
            print_json(&json!({ "message": message }))?;
        }
        Command::Logout => {
            agent.auth().logout().await?;
            print_json(&json!({ "message": "logged out" }))?;
        }
        Command::Attach {
            volume,
            host,
            iops_limit,
            bandwidth_limit_kbps,
        } => {
            let qos = QosPolicy {
                iops_limit: iops_limit.or(agent.config.qos.iops_limit),
                bandwidth_limit_kbps: bandwidth_limit_kbps.or(agent.config.qos.bandwidth_limit_kbps),
            };
            let descriptor =
                ConnectionDescriptor::new(volume, agent.host_identity(&host)).with_qos(qos);
            let device = agent.orchestrator().attach(&descriptor).await?;
            print_json(&device)?;
        }
        Command::Detach { volume, host } => {
            let descriptor = ConnectionDescriptor::new(volume.clone(), agent.host_identity(&host));
            agent.orchestrator().detach(&descriptor).await?;
            print_json(&json!({ "volume": volume, "detached": true }))?;
        }
        Command::Resolve { target } => {
            let id = agent.resolve(target).await?;
            print_json(&json!({ "id": id }))?;
        }
    }

    Ok(())
}

// =============================================================================
// Wiring
// =============================================================================

struct Agent {
    config: AgentConfig,
    endpoint: Endpoint,
    transport: Arc<ReqwestTransport>,
    tokens: Arc<FileTokenStore>,
    credentials: Option<Credentials>,
}

impl Agent {
    fn new(config: AgentConfig) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.transport_config())
            .context("building HTTPS client")?;
        let tokens = FileTokenStore::new(config.token_store_config());

        Ok(Self {
            endpoint: config.endpoint(),
            transport: Arc::new(transport),
            tokens: Arc::new(tokens),
            credentials: config.credentials(),
            config,
        })
    }

    fn auth(&self) -> AuthController {
        let auth = AuthController::new(
            self.endpoint.clone(),
            self.transport.clone(),
            self.tokens.clone(),
        );
        match &self.credentials {
            Some(creds) => auth.with_credentials(creds.clone()),
            None => auth,
        }
    }

    /// Session that re-logs in on expiry when credentials are known
    fn session(&self) -> Arc<ControllerSession> {
        let session = ControllerSession::new(
            self.endpoint.clone(),
            self.transport.clone(),
            self.tokens.clone(),
        );
        let session = if self.credentials.is_some() {
            session.with_reauthenticator(Arc::new(self.auth()))
        } else {
            session
        };
        Arc::new(session)
    }

    fn orchestrator(&self) -> VolumeOrchestrator {
        let runner = Arc::new(SystemCommandRunner::with_root_helper(
            self.config.host.root_helper.as_deref(),
        ));
        VolumeOrchestrator::new(
            self.session(),
            GuidProbe::new(runner, self.config.host.guid_helper.clone()),
            DeviceScanner::new(self.config.scanner_config()),
        )
    }

    fn host_identity(&self, host: &HostArgs) -> HostIdentitySource {
        match &host.sdc_ip {
            Some(ip) => HostIdentitySource::SdcIp(ip.clone()),
            None => self.config.host_identity(),
        }
    }

    async fn resolve(&self, target: ResolveTarget) -> anyhow::Result<String> {
        let resolver = NameResolver::new(self.session());
        let defaults = &self.config.defaults;

        let id = match target {
            ResolveTarget::Volume { name } if is_urn(&name) => {
                resolver.resolve_volume_path(&name).await?
            }
            ResolveTarget::Volume { name } if name.contains('/') => {
                let path = VolumePath::parse(&name)?;
                let tenant = path.tenant.as_deref().or(defaults.tenant.as_deref());
                resolver
                    .resolve_volume(tenant, &path.project, &path.volume)
                    .await?
            }
            ResolveTarget::Volume { name } => {
                let project = defaults
                    .project
                    .as_deref()
                    .context("bare volume names need a default project")?;
                resolver
                    .resolve_volume(defaults.tenant.as_deref(), project, &name)
                    .await?
            }
            ResolveTarget::Vpool { name, kind } => resolver.resolve_virtual_pool(&name, kind).await?,
            ResolveTarget::Varray { name } => resolver.resolve_virtual_array(&name).await?,
            ResolveTarget::Host { name } => resolver.resolve_host(&name).await?,
            ResolveTarget::Network { name, varray } => {
                let varray = varray.or_else(|| defaults.virtual_array.clone());
                resolver.resolve_network(&name, varray.as_deref()).await?
            }
            ResolveTarget::ExportGroup {
                name,
                project,
                tenant,
            } => {
                let project = project
                    .or_else(|| defaults.project.clone())
                    .context("export group lookup needs --project")?;
                let tenant = tenant.or_else(|| defaults.tenant.clone());
                let project_id = resolver.resolve_project(tenant.as_deref(), &project).await?;
                resolver.resolve_export_group(&project_id, &name).await?
            }
        };

        info!("Resolved to {}", id);
        Ok(id)
    }
}

fn load_config(args: &Args) -> anyhow::Result<AgentConfig> {
    let mut config = AgentConfig::load(args.config.as_deref())?;

    if let Some(endpoint) = &args.endpoint {
        let endpoint = Endpoint::parse(endpoint)?;
        config.endpoint.hostname = endpoint.hostname;
        config.endpoint.port = endpoint.port;
    }
    if let Some(user) = &args.user {
        config.credentials.username = Some(user.clone());
    }
    if args.insecure {
        config.endpoint.verify_tls = false;
    }
    if let Some(dir) = &args.install_dir {
        config.install_dir = dir.clone();
    }
    if let Some(dir) = &args.token_dir {
        config.token_dir = Some(dir.clone());
    }
    if let Some(name) = &args.token_file {
        config.token_filename = Some(name.clone());
    }

    Ok(config)
}

/// Password from --password-stdin, --password, or an interactive prompt
fn read_password(args: &Args, config: &AgentConfig) -> anyhow::Result<Option<String>> {
    if args.password_stdin {
        let password = prompt::read_line(&mut std::io::stdin().lock())
            .context("reading password from stdin")?;
        if password.is_empty() {
            bail!("empty password on stdin");
        }
        return Ok(Some(password));
    }
    if args.password.is_some() {
        return Ok(args.password.clone());
    }

    let user = match &config.credentials.username {
        Some(user) if config.credentials.password.is_none() => user,
        _ => return Ok(None),
    };
    if matches!(args.command, Command::Logout) || !prompt::stdin_is_terminal() {
        return Ok(None);
    }
    let password = prompt::prompt_password(&format!("Password for {}: ", user))
        .context("reading password from terminal")?;
    Ok(Some(password))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("rustls=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}
