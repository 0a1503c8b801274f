use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use fleet_autoscaler::{
    auth::Auth,
    cloud::{CloudError, rackspace::RackspaceCloud},
    config::{Config, read_config_file},
    util::check_file,
    version,
};
use tracing::{debug, error, info, level_filters::LevelFilter};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const REGIONS: [&str; 6] = ["SYD", "HKG", "DFW", "ORD", "IAD", "LON"];

#[derive(Clone, Parser)]
#[command(version, about = "Download the autoscaler config from an object-store container")]
struct Args {
    /// Container the config file is stored in
    #[arg(long)]
    container: Option<String>,

    /// Cloud user name
    #[arg(long, env = "OS_USERNAME")]
    os_username: Option<String>,

    /// Cloud account API key
    #[arg(long, env = "OS_PASSWORD", hide_env_values = true)]
    os_password: Option<String>,

    /// Region the container is in
    #[arg(long, env = "OS_REGION_NAME", value_parser = REGIONS)]
    os_region_name: Option<String>,

    /// Name of the config file, locally and in the container
    #[arg(long, default_value = "config.json")]
    config_file: String,

    /// Directory to save the config file to
    #[arg(long, default_value = "/etc/rax-autoscaler/")]
    config_directory: PathBuf,

    /// Timeout of each remote call, in seconds
    #[arg(long, env = "AUTOSCALE_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("fleet_autoscaler", level),
        ("autoscale_config", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(true),
        )
        .with(filter)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);

    info!("{}", version());

    match download(args).await {
        Ok(path) => {
            info!("config saved to {}", path.display());
            info!("completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            info!("completed with an error");
            ExitCode::FAILURE
        }
    }
}

async fn download(args: Args) -> anyhow::Result<PathBuf> {
    // credentials may come entirely from the command line
    let config = match check_file(&args.config_file) {
        Some(path) => read_config_file(path)?,
        None => {
            info!("no config file found, checking to see if we have credentials");
            if args.os_username.is_none() && args.os_password.is_none() {
                bail!("if there is no config file you must specify a username and password");
            }
            Config::default()
        }
    };

    let container = args
        .container
        .or_else(|| config.auth.container.clone())
        .context("no container name defined")?;
    let credentials =
        config.credentials(args.os_username, args.os_password, args.os_region_name)?;
    let timeout = Duration::from_secs(args.timeout);

    let session = Auth::new(
        credentials.username,
        credentials.api_key,
        credentials.region,
        timeout,
    )
    .context("unable to create identity client")?
    .authenticate()
    .await?;
    let cloud = RackspaceCloud::new(session, timeout).context("unable to create cloud client")?;

    debug!("downloading {} from container {container}", args.config_file);
    let content = match cloud.download_object(&container, &args.config_file).await {
        Ok(content) => content,
        Err(CloudError::NotFound(_)) => bail!(
            "config file {} does not exist in container {container}",
            args.config_file
        ),
        Err(e) => return Err(e).context("unable to download config file"),
    };

    let target = args.config_directory.join(&args.config_file);
    std::fs::write(&target, content)
        .with_context(|| format!("unable to write {}", target.display()))?;
    Ok(target)
}
