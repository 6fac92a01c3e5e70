//! End-to-end simulation harness.

use std::{fmt, rc::Rc, str::FromStr};

use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::info;

use crate::{
    app::{AppReceiver, AppSender},
    channel::{AttachError, Channel},
    common,
    endpoint::LinkEndpoint,
    error_model::RateErrorModel,
    event_loop::EventLoop,
    frame::MacAddress,
};

/// A link rate parsed from strings such as `5Mbps` or `0b/s`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataRate(u64);

impl DataRate {
    /// Rate in bits per second; 0 means instantaneous.
    pub fn bits_per_second(&self) -> u64 {
        self.0
    }
}

/// Errors from parsing a [`DataRate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseDataRateError {
    /// The numeric part failed to parse or was negative.
    BadNumber,
    /// Unrecognized unit suffix.
    BadUnit,
}

impl fmt::Display for ParseDataRateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseDataRateError::BadNumber => write!(f, "invalid rate value"),
            ParseDataRateError::BadUnit => {
                write!(f, "invalid rate unit, expected b/s, bps, kbps, Mbps or Gbps")
            }
        }
    }
}

impl std::error::Error for ParseDataRateError {}

impl FromStr for DataRate {
    type Err = ParseDataRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static UNITS: [(&str, f64); 5] = [
            ("Gbps", 1e9),
            ("Mbps", 1e6),
            ("kbps", 1e3),
            ("bps", 1.0),
            ("b/s", 1.0),
        ];

        for (suffix, multiplier) in UNITS {
            if let Some(prefix) = s.strip_suffix(suffix) {
                let value: f64 = prefix
                    .trim()
                    .parse()
                    .map_err(|_| ParseDataRateError::BadNumber)?;
                if !value.is_finite() || value < 0.0 {
                    return Err(ParseDataRateError::BadNumber);
                }
                return Ok(DataRate((value * multiplier) as u64));
            }
        }

        Err(ParseDataRateError::BadUnit)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.0;
        if bps == 0 {
            write!(f, "0b/s")
        } else if bps % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", bps / 1_000_000_000)
        } else if bps % 1_000_000 == 0 {
            write!(f, "{}Mbps", bps / 1_000_000)
        } else if bps % 1_000 == 0 {
            write!(f, "{}kbps", bps / 1_000)
        } else {
            write!(f, "{bps}bps")
        }
    }
}

/// Parameters of one simulated run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Link serialization rate in bits per second; 0 means instantaneous.
    pub data_rate: u64,
    /// Channel propagation delay in seconds.
    pub delay: f64,
    /// Receiver-side frame corruption probability.
    pub error_rate: f64,
    /// Sender window size.
    pub window_size: usize,
    /// Fixed retransmission timeout in seconds.
    pub rto: f64,
    /// Maximum frame size in octets.
    pub mtu: usize,
    /// Sequence number modulus.
    pub max_seq: u64,
    /// Application payload size in octets.
    pub payload_size: usize,
    /// Application send interval in seconds.
    pub interval: f64,
    /// Number of payloads the application offers.
    pub count: u64,
    /// Simulated time the application starts at.
    pub start: f64,
    /// Seed for the receiver error model.
    pub seed: u64,
    /// Transmit queue bound; `None` keeps it unbounded.
    pub queue_capacity: Option<usize>,
    /// Hard ceiling on simulated time.
    pub time_limit: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            data_rate: common::DATA_RATE,
            delay: common::DELAY,
            error_rate: 0.0,
            window_size: common::WINDOW_SIZE,
            rto: common::RTO,
            mtu: common::MTU,
            max_seq: common::MAX_SEQ,
            payload_size: common::PAYLOAD_SIZE,
            interval: common::SEND_INTERVAL,
            count: 500,
            start: 2.0,
            seed: 1,
            queue_capacity: None,
            time_limit: 1_000.0,
        }
    }
}

/// Outcome of one simulated run.
#[derive(Clone, Copy, Debug)]
pub struct SimulationReport {
    /// Payloads the application offered.
    pub offered: u64,
    /// Payloads the endpoint admitted.
    pub admitted: u64,
    /// Payloads delivered in order at the sink.
    pub delivered_frames: u64,
    /// Octets delivered in order at the sink.
    pub delivered_bytes: u64,
    /// Data frames the sender put on the wire, retransmissions included.
    pub data_frames_sent: u64,
    /// Retransmitted data frames.
    pub retransmissions: u64,
    /// Go-back-N timeout events at the sender.
    pub timeouts: u64,
    /// Acknowledgments the receiver emitted.
    pub acks_sent: u64,
    /// Frames the receiver's error model corrupted.
    pub corrupt_drops: u64,
    /// Simulated time of the last in-order delivery.
    pub finished_at: f64,
    /// Delivered bits per second of simulated time.
    pub goodput_bps: f64,
}

/// Runs one point-to-point sender/receiver simulation to quiescence.
pub fn run(config: &SimulationConfig) -> Result<SimulationReport, AttachError> {
    let event_loop = Rc::new(EventLoop::default());
    let channel = Channel::new(Rc::clone(&event_loop), config.delay);

    let sender = LinkEndpoint::new(Rc::clone(&event_loop), MacAddress::from_index(1));
    let receiver = LinkEndpoint::new(Rc::clone(&event_loop), MacAddress::from_index(2));

    for endpoint in [&sender, &receiver] {
        let mut endpoint = endpoint.borrow_mut();
        endpoint.set_point_to_point_mode(true);
        endpoint.set_data_rate(config.data_rate);
        endpoint.set_rto(config.rto);
        endpoint.set_window_size(config.window_size);
        endpoint.set_mtu(config.mtu);
        endpoint.set_max_seq(config.max_seq);
        if let Some(capacity) = config.queue_capacity {
            endpoint.set_queue_capacity(capacity);
        }
    }

    if config.error_rate > 0.0 {
        receiver
            .borrow_mut()
            .set_error_model(Box::new(RateErrorModel::with_seed(
                config.error_rate,
                config.seed,
            )));
    }

    channel.attach(&sender)?;
    channel.attach(&receiver)?;

    let sink = AppReceiver::install(&event_loop, &receiver);
    let dest = receiver.borrow().address();
    let source = AppSender::new(Rc::clone(&event_loop), Rc::clone(&sender), dest);
    {
        let mut source = source.borrow_mut();
        source.set_payload_size(config.payload_size);
        source.set_interval(config.interval);
        source.set_count(config.count);
        source.start(config.start);
    }

    event_loop.run_until(config.time_limit);

    let sender_stats = sender.borrow().stats();
    let receiver_stats = receiver.borrow().stats();

    let report = SimulationReport {
        offered: source.borrow().sent(),
        admitted: source.borrow().admitted(),
        delivered_frames: receiver_stats.delivered_frames,
        delivered_bytes: receiver_stats.delivered_bytes,
        data_frames_sent: sender_stats.data_frames_sent,
        retransmissions: sender_stats.retransmissions,
        timeouts: sender_stats.timeouts,
        acks_sent: receiver_stats.acks_sent,
        corrupt_drops: receiver_stats.corrupt_drops,
        finished_at: sink.last_rx(),
        goodput_bps: sink.throughput_bps(config.start),
    };

    info!(
        delivered = report.delivered_frames,
        retransmissions = report.retransmissions,
        goodput_bps = report.goodput_bps,
        "simulation finished"
    );

    Ok(report)
}

/// One cell of a parameter sweep.
#[derive(Clone, Copy, Debug)]
pub struct SweepPoint {
    /// Window size of this run.
    pub window_size: usize,
    /// Error rate of this run.
    pub error_rate: f64,
    /// The run's outcome.
    pub report: SimulationReport,
}

/// Runs every (window, error-rate) combination as an independent seeded
/// simulation, in parallel.
pub fn sweep(
    base: &SimulationConfig,
    windows: &[usize],
    error_rates: &[f64],
) -> Result<Vec<SweepPoint>, AttachError> {
    let grid: Vec<(usize, f64)> = windows
        .iter()
        .flat_map(|&window| error_rates.iter().map(move |&rate| (window, rate)))
        .collect();

    let bar = ProgressBar::new(grid.len() as u64);

    let points = grid
        .par_iter()
        .map(|&(window_size, error_rate)| {
            let mut config = base.clone();
            config.window_size = window_size;
            config.error_rate = error_rate;
            config.seed = base
                .seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(window_size as u64)
                ^ error_rate.to_bits();

            let report = run(&config)?;
            bar.inc(1);

            Ok(SweepPoint {
                window_size,
                error_rate,
                report,
            })
        })
        .collect::<Result<Vec<_>, AttachError>>()?;

    bar.finish_and_clear();
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_data_rate_parsing() {
        assert_eq!("5Mbps".parse(), Ok(DataRate(5_000_000)));
        assert_eq!("0b/s".parse(), Ok(DataRate(0)));
        assert_eq!("2.5Mbps".parse(), Ok(DataRate(2_500_000)));
        assert_eq!("100kbps".parse(), Ok(DataRate(100_000)));
        assert_eq!("1Gbps".parse(), Ok(DataRate(1_000_000_000)));
        assert_eq!("9600bps".parse(), Ok(DataRate(9_600)));

        assert_eq!(
            "fastMbps".parse::<DataRate>(),
            Err(ParseDataRateError::BadNumber)
        );
        assert_eq!(
            "-1Mbps".parse::<DataRate>(),
            Err(ParseDataRateError::BadNumber)
        );
        assert_eq!("5".parse::<DataRate>(), Err(ParseDataRateError::BadUnit));
    }

    #[test_log::test]
    fn test_data_rate_display_round_trips() {
        for rate in [0, 9_600, 100_000, 5_000_000, 1_000_000_000] {
            let shown = DataRate(rate).to_string();
            assert_eq!(shown.parse(), Ok(DataRate(rate)), "via {shown}");
        }
    }

    #[test_log::test]
    fn test_lossless_run_delivers_everything() {
        let config = SimulationConfig {
            count: 20,
            window_size: 4,
            ..SimulationConfig::default()
        };

        let report = run(&config).unwrap();

        assert_eq!(report.offered, 20);
        assert_eq!(report.admitted, 20);
        assert_eq!(report.delivered_frames, 20);
        assert_eq!(report.delivered_bytes, 20 * 1024);
        assert_eq!(report.retransmissions, 0);
        assert_eq!(report.timeouts, 0);
        assert!(report.goodput_bps > 0.0);
        assert!(report.finished_at > config.start);
    }

    #[test_log::test]
    fn test_lossy_run_still_delivers_everything() {
        let config = SimulationConfig {
            count: 50,
            window_size: 8,
            error_rate: 0.2,
            seed: 3,
            ..SimulationConfig::default()
        };

        let report = run(&config).unwrap();

        assert_eq!(report.delivered_frames, 50);
        assert!(report.retransmissions > 0);
        assert!(report.corrupt_drops > 0);
        assert_eq!(report.data_frames_sent, 50 + report.retransmissions);
    }

    #[test_log::test]
    fn test_sweep_covers_the_grid() {
        let base = SimulationConfig {
            count: 5,
            ..SimulationConfig::default()
        };

        let points = sweep(&base, &[1, 4], &[0.0, 0.1]).unwrap();

        assert_eq!(points.len(), 4);
        assert!(points.iter().all(|p| p.report.delivered_frames == 5));
    }
}
