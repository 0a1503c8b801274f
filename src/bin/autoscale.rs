use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, builder::RangedU64ValueParser};
use fleet_autoscaler::{
    ScalingGroup,
    auth::Auth,
    cloud::rackspace::RackspaceCloud,
    config::read_config_file,
    executor::ScalingExecutor,
    plugins::{DEFAULT_MAX_SAMPLE, PluginOptions, load_plugins},
    runner::{Autoscaler, RunOutcome},
    util::check_file,
    version,
    webhook::WebhookNotifier,
};
use tracing::{debug, error, info, level_filters::LevelFilter};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const REGIONS: [&str; 6] = ["SYD", "HKG", "DFW", "ORD", "IAD", "LON"];

#[derive(Clone, Parser)]
#[command(version, about = "Evaluate a scaling group and scale it when needed")]
struct Args {
    /// The autoscale group name in the config file
    #[arg(long)]
    as_group: String,

    /// Cloud user name
    #[arg(long, env = "OS_USERNAME")]
    os_username: Option<String>,

    /// Cloud account API key
    #[arg(long, env = "OS_PASSWORD", hide_env_values = true)]
    os_password: Option<String>,

    /// Region of the scaling group
    #[arg(long, env = "OS_REGION_NAME", value_parser = REGIONS)]
    os_region_name: Option<String>,

    /// Config file, also looked up in /etc/rax-autoscaler
    #[arg(long, default_value = "config.json")]
    config_file: String,

    /// Only act when this node is one of the group's masters
    #[arg(long)]
    cluster: bool,

    /// Do not execute policies or call webhooks
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of servers sampled for metrics
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_SAMPLE,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    max_sample: usize,

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
        ("fleet_autoscale", level),
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
    debug!(
        "group: {}, config file: {}, cluster: {}, dry run: {}, max sample: {}",
        args.as_group, args.config_file, args.cluster, args.dry_run, args.max_sample
    );

    match autoscale(args).await {
        Ok(outcome) if outcome.is_success() => {
            info!("completed successfully");
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            if let Some(cause) = &outcome.cause {
                error!("{cause}");
            }
            info!("completed with an error");
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(e) => {
            error!("{e:#}");
            info!("completed with an error");
            ExitCode::FAILURE
        }
    }
}

async fn autoscale(args: Args) -> anyhow::Result<RunOutcome> {
    let config_file = check_file(&args.config_file).with_context(|| {
        format!(
            "either file is missing or is not readable: '{}'",
            args.config_file
        )
    })?;
    let config = read_config_file(&config_file)?;

    let group_config = config.group(&args.as_group)?;
    let plugins = load_plugins(
        &group_config,
        &PluginOptions {
            max_sample: args.max_sample,
        },
    )?;

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

    let webhooks = WebhookNotifier::new(timeout).context("unable to create webhook client")?;
    let group = ScalingGroup::new(group_config, Arc::new(cloud), webhooks);
    let autoscaler = Autoscaler::new(plugins, ScalingExecutor::new(args.dry_run), args.cluster);

    Ok(autoscaler.run(&group).await)
}
