use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use gbn_sim::simulation::{self, DataRate, SimulationConfig, SimulationReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gbn-sim", about = "Go-Back-N ARQ link simulation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single simulation.
    Run(RunArgs),
    /// Run a parallel parameter sweep over window sizes and error rates.
    Sweep(SweepArgs),
}

#[derive(Args)]
struct LinkArgs {
    /// Link serialization rate, e.g. 5Mbps; 0b/s means instantaneous.
    #[arg(long, default_value = "5Mbps")]
    rate: DataRate,

    /// Channel propagation delay in seconds.
    #[arg(long, default_value_t = 0.002)]
    delay: f64,

    /// Retransmission timeout in seconds.
    #[arg(long, default_value_t = 1.0)]
    rto: f64,

    /// Number of payloads the application offers.
    #[arg(long, default_value_t = 500)]
    count: u64,

    /// Payload size in octets.
    #[arg(long, default_value_t = 1024)]
    payload_size: usize,

    /// Seed for the receiver error model.
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

impl LinkArgs {
    fn config(&self) -> SimulationConfig {
        SimulationConfig {
            data_rate: self.rate.bits_per_second(),
            delay: self.delay,
            rto: self.rto,
            count: self.count,
            payload_size: self.payload_size,
            seed: self.seed,
            ..SimulationConfig::default()
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    link: LinkArgs,

    /// Sender window size.
    #[arg(long, default_value_t = 10)]
    window: usize,

    /// Receiver frame corruption probability.
    #[arg(long, default_value_t = 0.0)]
    error_rate: f64,
}

#[derive(Args)]
struct SweepArgs {
    #[command(flatten)]
    link: LinkArgs,

    /// Window sizes to sweep.
    #[arg(long, value_delimiter = ',', default_value = "1,2,4,8,16")]
    windows: Vec<usize>,

    /// Error rates to sweep.
    #[arg(long, value_delimiter = ',', default_value = "0,0.1,0.25,0.5")]
    error_rates: Vec<f64>,
}

fn print_report(report: &SimulationReport) {
    println!("offered payloads    {}", report.offered);
    println!("admitted payloads   {}", report.admitted);
    println!("delivered payloads  {}", report.delivered_frames);
    println!("delivered bytes     {}", report.delivered_bytes);
    println!("data frames sent    {}", report.data_frames_sent);
    println!("retransmissions     {}", report.retransmissions);
    println!("timeouts            {}", report.timeouts);
    println!("acks sent           {}", report.acks_sent);
    println!("corrupt drops       {}", report.corrupt_drops);
    println!("finished at         {:.6}s", report.finished_at);
    println!("goodput             {:.0}bps", report.goodput_bps);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=error", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Run(args) => {
            let mut config = args.link.config();
            config.window_size = args.window;
            config.error_rate = args.error_rate;

            let report = simulation::run(&config)?;
            print_report(&report);
        }
        Command::Sweep(args) => {
            let base = args.link.config();
            let points = simulation::sweep(&base, &args.windows, &args.error_rates)?;

            println!("{:>8} {:>12} {:>12} {:>16} {:>14}", "window", "error rate", "delivered", "retransmissions", "goodput");
            for point in points {
                println!(
                    "{:>8} {:>12.3} {:>12} {:>16} {:>12.0}bps",
                    point.window_size,
                    point.error_rate,
                    point.report.delivered_frames,
                    point.report.retransmissions,
                    point.report.goodput_bps,
                );
            }
        }
    }

    Ok(())
}
