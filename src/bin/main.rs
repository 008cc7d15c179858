use clap::Parser;
use edgeperf3::interval_reporter::{run_reporter_task, IntervalReporter};
use edgeperf3::{Config, Server};
use log::{info, warn};
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "edgeperf3")]
#[command(about = "iperf3-compatible test server, one session at a time", long_about = None)]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "5201")]
    port: u16,

    /// Bind to specific address
    #[arg(short = 'B', long)]
    bind: Option<IpAddr>,

    /// Interval for periodic reports in seconds
    #[arg(short, long, default_value = "1")]
    interval: f64,

    /// Transfer buffer size in bytes; half of it is sent or received per step
    #[arg(short = 'l', long, default_value = "8192")]
    length: usize,

    /// Largest parameter JSON accepted from a client, in bytes
    #[arg(long, default_value = "4096")]
    param_buffer: usize,

    /// Receive buffer for the client's result JSON, in bytes
    #[arg(long, default_value = "1024")]
    result_buffer: usize,

    /// Abort a test that runs longer than this many seconds
    #[arg(short, long)]
    deadline: Option<u64>,

    /// Abort sessions whose data-channel cookie differs from the control cookie
    #[arg(long)]
    verify_cookie: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let interval = match Duration::try_from_secs_f64(self.interval) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => anyhow::bail!(
                "interval must be a positive number of seconds, got {}",
                self.interval
            ),
        };

        let mut config = Config::server(self.port)
            .with_interval(interval)
            .with_transfer_buffer_size(self.length)
            .with_param_buffer_size(self.param_buffer)
            .with_result_buffer_size(self.result_buffer)
            .with_verify_cookie(self.verify_cookie);

        if let Some(addr) = self.bind {
            config = config.with_bind_addr(addr);
        }
        if let Some(secs) = self.deadline {
            config = config.with_test_deadline(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config()?;

    let (reporter, receiver) = IntervalReporter::new();
    let printer = tokio::spawn(run_reporter_task(receiver));

    let server = Server::bind(config).await?.with_reporter(reporter);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping after the current session");
                on_signal.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    server.run_until(shutdown).await?;
    printer.await?;

    Ok(())
}
