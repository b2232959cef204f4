mod backends;
mod config;
mod interface;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::backends::executor::{CommandExecutor, DryRunExecutor, SystemExecutor};
use crate::backends::shaping::params::Percent;
use crate::backends::shaping::{Direction, ErrorClass, MarkRequest, RuleManager, ShapeError};
use crate::config::Config;

const EXIT_OPERATIONAL: i32 = 1;
const EXIT_BAD_REQUEST: i32 = 2;

/// netshaper - bandwidth, loss, delay and per-flow shaping for one interface
#[derive(Parser, Debug)]
#[command(name = "netshaper")]
#[command(version)]
#[command(about = "Simulate degraded links with tc and iptables", long_about = None)]
struct Args {
    /// Interface to shape (default: config file, then auto-detect)
    #[arg(long, short = 'i', value_name = "IFACE", global = true)]
    interface: Option<String>,

    /// IFB device used for ingress shaping
    #[arg(long, value_name = "DEVICE", global = true)]
    redirect_device: Option<String>,

    /// Print the commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    timeout: Option<u64>,

    /// Clear any existing shaping before handling the request
    #[arg(long, global = true)]
    reset: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read requests line by line from stdin, keeping state between them
    Shell,

    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },

    #[command(flatten)]
    Request(Request),
}

/// One shaping operation
#[derive(Subcommand, Debug, Clone)]
enum Request {
    /// Show interface, shaping mode and mark rules
    Status,

    /// Limit egress bandwidth (kbit/s)
    Bandwidth {
        #[arg(allow_negative_numbers = true)]
        rate_kbit: i64,
    },

    /// Drop a percentage of egress packets
    LossOut {
        #[arg(allow_negative_numbers = true)]
        percent: i64,
    },

    /// Delay egress packets (ms)
    DelayOut {
        #[arg(allow_negative_numbers = true)]
        ms: i64,
    },

    /// Drop a percentage of ingress packets through the redirect device
    LossIn {
        #[arg(allow_negative_numbers = true)]
        percent: i64,
    },

    /// Mark TCP traffic to a host and port and shape only that flow
    Mark {
        remote_ip: String,
        #[arg(allow_negative_numbers = true)]
        port: i64,
        #[arg(allow_negative_numbers = true)]
        mark: i64,

        /// Only `out` is supported; `in` is rejected as a bad request
        #[arg(long, value_enum, default_value_t = Direction::Out)]
        direction: Direction,

        /// Loss applied to the marked flow (default from config)
        #[arg(long, allow_negative_numbers = true)]
        loss: Option<i64>,
    },

    /// Remove all shaping and the redirect device
    Clear,

    /// Flush all mark rules
    ClearMarks,
}

/// A request line inside `shell`
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct ShellLine {
    #[command(subcommand)]
    request: Request,
}

/// Merge file config with command-line overrides
fn effective_config(args: &Args) -> Result<Config> {
    let mut config = Config::load().unwrap_or_else(|e| {
        log::warn!("Ignoring config file: {:#}", e);
        Config::default()
    });

    if let Some(ref interface) = args.interface {
        config.interface = Some(interface.clone());
    }
    if let Some(ref device) = args.redirect_device {
        config.redirect_device = device.clone();
    }
    if let Some(timeout) = args.timeout {
        config.command_timeout_secs = timeout;
    }
    if args.reset {
        config.reset_on_start = true;
    }

    Percent::named("mark_loss_percent", config.mark_loss_percent.into())
        .context("Invalid config")?;

    Ok(config)
}

fn build_manager(config: &Config, executor: Box<dyn CommandExecutor>) -> Result<RuleManager> {
    let interface = match config.interface {
        Some(ref name) => name.clone(),
        None => interface::detect_interface(&config.preferred_interfaces),
    };
    let mark_loss = Percent::named("mark_loss_percent", config.mark_loss_percent.into())?;

    Ok(RuleManager::new(interface, config.redirect_device.clone(), executor).with_mark_loss(mark_loss))
}

async fn handle(manager: &RuleManager, request: Request) -> Result<serde_json::Value, ShapeError> {
    let status = match request {
        Request::Status => manager.status(),
        Request::Bandwidth { rate_kbit } => manager.set_egress_bandwidth(rate_kbit).await?,
        Request::LossOut { percent } => manager.set_egress_loss(percent).await?,
        Request::DelayOut { ms } => manager.set_egress_delay(ms).await?,
        Request::LossIn { percent } => manager.set_ingress_loss(percent).await?,
        Request::Mark {
            remote_ip,
            port,
            mark,
            direction,
            loss,
        } => {
            manager
                .mark_and_limit(MarkRequest {
                    remote: remote_ip,
                    port,
                    mark,
                    direction,
                    loss_percent: loss,
                })
                .await?
        }
        Request::Clear => manager.clear_shaping().await?,
        Request::ClearMarks => manager.clear_marks().await?,
    };

    Ok(json!({ "status": "ok", "result": status }))
}

fn error_body(error: &ShapeError) -> serde_json::Value {
    json!({
        "status": "error",
        "class": error.class(),
        "detail": error.detail(),
    })
}

fn exit_code(error: &ShapeError) -> i32 {
    match error.class() {
        ErrorClass::BadRequest => EXIT_BAD_REQUEST,
        ErrorClass::Operational => EXIT_OPERATIONAL,
    }
}

/// Run one request and print its JSON outcome. Returns the exit code.
async fn run_request(
    manager: &RuleManager,
    dry_run: Option<&DryRunExecutor>,
    request: Request,
) -> i32 {
    let (mut body, code) = match handle(manager, request).await {
        Ok(body) => (body, 0),
        Err(e) => {
            log::warn!("Request failed: {}", e);
            (error_body(&e), exit_code(&e))
        }
    };

    if let Some(dry) = dry_run {
        let commands: Vec<String> = dry.take_issued().iter().map(|c| c.to_string()).collect();
        body["commands"] = json!(commands);
    }

    println!("{}", body);
    code
}

async fn run_shell(manager: &RuleManager, dry_run: Option<&DryRunExecutor>) -> Result<i32> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_code = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }

        match ShellLine::try_parse_from(line.split_whitespace()) {
            Ok(parsed) => last_code = run_request(manager, dry_run, parsed.request).await,
            Err(e) => {
                let detail = e.to_string();
                println!(
                    "{}",
                    json!({ "status": "error", "class": ErrorClass::BadRequest, "detail": detail.trim() })
                );
                last_code = EXIT_BAD_REQUEST;
            }
        }
    }

    Ok(last_code)
}

#[cfg(target_os = "linux")]
fn warn_if_unprivileged() {
    if !nix::unistd::geteuid().is_root() {
        log::warn!("Not running as root: tc, ip and iptables calls will likely fail");
    }
}

#[cfg(not(target_os = "linux"))]
fn warn_if_unprivileged() {
    log::warn!("Traffic shaping needs Linux tc/iptables; use --dry-run elsewhere");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }

    let config = effective_config(&args)?;

    if let Command::Config { save } = args.command {
        if save {
            let path = config.save()?;
            log::info!("Configuration written to {:?}", path);
        }
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let dry_run = args.dry_run.then(DryRunExecutor::new);
    let executor: Box<dyn CommandExecutor> = match dry_run {
        Some(ref dry) => Box::new(dry.clone()),
        None => {
            warn_if_unprivileged();
            Box::new(SystemExecutor::new(Duration::from_secs(
                config.command_timeout_secs,
            )))
        }
    };

    let manager = build_manager(&config, executor)?;
    log::info!("Shaping interface {}", manager.interface());

    if config.reset_on_start {
        if let Err(e) = manager.reconcile().await {
            log::warn!("Startup reset failed: {}", e);
        }
    }

    let code = match args.command {
        Command::Shell => run_shell(&manager, dry_run.as_ref()).await?,
        Command::Request(request) => run_request(&manager, dry_run.as_ref(), request).await,
        Command::Config { .. } => 0,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_requests() {
        let args = Args::try_parse_from(["netshaper", "--dry-run", "bandwidth", "500"]).unwrap();
        assert!(args.dry_run);
        assert!(matches!(
            args.command,
            Command::Request(Request::Bandwidth { rate_kbit: 500 })
        ));

        let args = Args::try_parse_from(["netshaper", "loss-out", "-1"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Request(Request::LossOut { percent: -1 })
        ));
    }

    #[test]
    fn test_shell_line_parses_mark() {
        let line = "mark 10.0.0.5 5760 3 --direction in --loss 20";
        let parsed = ShellLine::try_parse_from(line.split_whitespace()).unwrap();
        match parsed.request {
            Request::Mark {
                remote_ip,
                port,
                mark,
                direction,
                loss,
            } => {
                assert_eq!(remote_ip, "10.0.0.5");
                assert_eq!((port, mark), (5760, 3));
                assert_eq!(direction, Direction::In);
                assert_eq!(loss, Some(20));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_request_outcome() {
        let dry = DryRunExecutor::new();
        let manager = RuleManager::new("eth0", "ifb0", Box::new(dry.clone()));

        let body = handle(&manager, Request::DelayOut { ms: 100 }).await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["result"]["mode"], "egress-delay");
        assert_eq!(body["result"]["delay_ms"], 100);
        assert_eq!(
            dry.take_issued()[0].to_string(),
            "tc qdisc replace dev eth0 root netem delay 100ms"
        );
    }

    #[tokio::test]
    async fn test_validation_failure_maps_to_bad_request() {
        let manager = RuleManager::new("eth0", "ifb0", Box::new(DryRunExecutor::new()));

        let err = handle(&manager, Request::Bandwidth { rate_kbit: 0 })
            .await
            .unwrap_err();
        assert_eq!(exit_code(&err), EXIT_BAD_REQUEST);
        let body = error_body(&err);
        assert_eq!(body["class"], "bad-request");
        assert_eq!(body["detail"], "rate_kbit must be > 0 (got 0)");
    }
}
