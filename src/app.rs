//! Core run loop for `scale-listener`.
//!
//! Kept apart from CLI parsing and process exit codes so it can be driven
//! by a fake scanner and in-memory output streams in tests.

use crate::advertisement::Advertisement;
use crate::config::{Settings, parse_duration, parse_nonzero_duration};
use crate::liveness::{DEFAULT_CHIPSEA_TIMEOUT, DEFAULT_FELICITA_TIMEOUT, Timeouts};
use crate::output::OutputFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use crate::protocol::DecodeError;
use crate::registry::DeviceRegistry;
use crate::scanner::{Backend, ScanError};
use crate::stability::DEFAULT_STABILITY_THRESHOLD;
use crate::state::DeviceState;
use crate::units::DisplayUnit;
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Command line configuration for the run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "scale")]
    pub influxdb_measurement: String,

    /// Mark a Felicita scale unavailable after this much silence.
    /// Accepts duration with suffix: 500ms, 6s, 1m, 2h.
    #[arg(long, value_parser = parse_duration, default_value = "6s")]
    pub felicita_timeout: Duration,

    /// Mark a Chipsea scale unavailable after this much silence.
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub chipsea_timeout: Duration,

    /// Consecutive identical readings required before a weight is stable
    #[arg(long, default_value_t = DEFAULT_STABILITY_THRESHOLD,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub stability_threshold: u32,

    /// Unit used for the `weight` field
    #[arg(long, default_value_t, value_enum)]
    pub unit: DisplayUnit,

    /// How often silent scales are checked for expiry
    #[arg(long, value_parser = parse_nonzero_duration, default_value = "1s")]
    pub tick: Duration,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Verbose output, print rejected frames and debug logs
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            influxdb_measurement: "scale".to_string(),
            felicita_timeout: DEFAULT_FELICITA_TIMEOUT,
            chipsea_timeout: DEFAULT_CHIPSEA_TIMEOUT,
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
            unit: DisplayUnit::default(),
            tick: Duration::from_secs(1),
            backend: Backend::default(),
            verbose: false,
        }
    }
}

impl Options {
    /// The subset of options the device registry consumes.
    pub fn settings(&self) -> Settings {
        Settings {
            timeouts: Timeouts {
                felicita: self.felicita_timeout,
                chipsea: self.chipsea_timeout,
            },
            stability_threshold: self.stability_threshold,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ScanFuture<'a> = Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + 'a>>;

/// Source of advertisements, so the loop runs without Bluetooth hardware in tests.
pub trait Scanner: Send + Sync {
    fn start_scan(&self, backend: Backend) -> ScanFuture<'_>;
}

/// Scanner that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(&self, backend: Backend) -> ScanFuture<'_> {
        Box::pin(crate::scanner::start_scan(backend))
    }
}

fn write_state(
    formatter: &dyn OutputFormatter,
    state: &DeviceState,
    unit: DisplayUnit,
    out: &mut dyn Write,
) -> io::Result<()> {
    writeln!(out, "{}", formatter.format(state, unit))
}

/// Run until the scanner's channel closes.
///
/// - Every decoded advertisement produces one line on `out`.
/// - Every `options.tick`, scales silent past their timeout produce an
///   `available=false` line.
/// - Rejected frames go to `err` only when `options.verbose` is set;
///   advertisements from other devices are dropped silently.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let registry = DeviceRegistry::new(options.settings());
    let formatter = InfluxDbFormatter::new(options.influxdb_measurement.clone());

    let mut advertisements = scanner.start_scan(options.backend).await?;

    // `interval` panics on a zero period
    let mut tick = tokio::time::interval(options.tick.max(Duration::from_millis(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            adv = advertisements.recv() => {
                let Some(adv) = adv else { break };
                match registry.on_advertisement(&adv) {
                    Ok(state) => write_state(&formatter, &state, options.unit, out)?,
                    Err(DecodeError::UnrecognizedProtocol) => {}
                    Err(decode_err) => {
                        if options.verbose {
                            writeln!(err, "{}: {decode_err}", adv.address)?;
                        }
                    }
                }
            }
            _ = tick.tick() => {
                for state in registry.expire(SystemTime::now()) {
                    write_state(&formatter, &state, options.unit, out)?;
                }
            }
        }
    }

    tracing::info!(devices = registry.len(), "advertisement stream closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CHIPSEA_COMPANY_ID, CHIPSEA_SERVICE_UUID, FELICITA_COMPANY_ID};
    use crate::test_utils::{TEST_MAC, chipsea_frame, chipsea_status, felicita_frame};
    use std::sync::Mutex;
    use tokio_test::{assert_pending, assert_ready_ok};

    #[derive(Debug)]
    struct FakeScanner {
        advertisements: Mutex<Vec<Advertisement>>,
        hold_open: Duration,
    }

    impl FakeScanner {
        fn new(advertisements: Vec<Advertisement>) -> Self {
            Self {
                advertisements: Mutex::new(advertisements),
                hold_open: Duration::ZERO,
            }
        }

        /// Keep the channel open for a while after the last advertisement.
        fn holding_open(mut self, hold_open: Duration) -> Self {
            self.hold_open = hold_open;
            self
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(&self, _backend: Backend) -> ScanFuture<'_> {
            let advertisements = self.advertisements.lock().unwrap().clone();
            let hold_open = self.hold_open;
            Box::pin(async move {
                let (tx, rx) = mpsc::channel(advertisements.len().max(1));
                tokio::spawn(async move {
                    for adv in advertisements {
                        let _ = tx.send(adv).await;
                    }
                    tokio::time::sleep(hold_open).await;
                });
                Ok(rx)
            })
        }
    }

    fn felicita(timestamp: SystemTime) -> Advertisement {
        Advertisement::new(TEST_MAC, timestamp)
            .with_name("FELICITA")
            .with_manufacturer_data(FELICITA_COMPANY_ID, felicita_frame(b'+', b"001250", b"g ", 1, true, 76))
    }

    fn chipsea(status: u8, weight: u16) -> Advertisement {
        let frame = chipsea_frame(status, weight);
        Advertisement::new(TEST_MAC, SystemTime::now())
            .with_service_uuid(CHIPSEA_SERVICE_UUID)
            .with_manufacturer_data(CHIPSEA_COMPANY_ID, frame[2..].to_vec())
    }

    /// Hands out a receiver whose sender the test keeps.
    struct ChannelScanner(Mutex<Option<mpsc::Receiver<Advertisement>>>);

    impl Scanner for ChannelScanner {
        fn start_scan(&self, _backend: Backend) -> ScanFuture<'_> {
            let rx = self.0.lock().unwrap().take();
            Box::pin(async move { rx.ok_or_else(|| ScanError::Bluetooth("scan already started".to_string())) })
        }
    }

    async fn run(options: Options, scanner: &FakeScanner) -> (String, String) {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(options, scanner, &mut out, &mut err).await.unwrap();
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn options_parse_defaults() {
        let options = Options::try_parse_from(["scale-listener"]).unwrap();
        assert_eq!(options.influxdb_measurement, "scale");
        assert_eq!(options.settings(), Settings::default());
        assert_eq!(options.unit, DisplayUnit::Grams);
        assert_eq!(options.tick, Duration::from_secs(1));
    }

    #[test]
    fn options_parse_overrides() {
        let options = Options::try_parse_from([
            "scale-listener",
            "--felicita-timeout",
            "3s",
            "--chipsea-timeout",
            "1m",
            "--stability-threshold",
            "2",
            "--unit",
            "ounces",
        ])
        .unwrap();
        let settings = options.settings();
        assert_eq!(settings.timeouts.felicita, Duration::from_secs(3));
        assert_eq!(settings.timeouts.chipsea, Duration::from_secs(60));
        assert_eq!(settings.stability_threshold, 2);
        assert_eq!(options.unit, DisplayUnit::Ounces);
    }

    #[test]
    fn options_reject_zero_threshold() {
        assert!(Options::try_parse_from(["scale-listener", "--stability-threshold", "0"]).is_err());
    }

    #[test]
    fn options_reject_zero_tick() {
        assert!(Options::try_parse_from(["scale-listener", "--tick", "0"]).is_err());
        assert!(Options::try_parse_from(["scale-listener", "--tick", "0ms"]).is_err());
        let options = Options::try_parse_from(["scale-listener", "--tick", "250ms"]).unwrap();
        assert_eq!(options.tick, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn run_writes_readings_to_out() {
        let scanner = FakeScanner::new(vec![felicita(SystemTime::now())]);
        let (out, err) = run(Options::default(), &scanner).await;

        assert!(err.is_empty());
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("scale,family=felicita,mac=C8:47:8C:00:11:22,native_unit=g,unit=g "));
        assert!(out.contains("weight=125,"));
        assert!(out.contains("battery=76i"));
        assert!(out.ends_with('\n'));
    }

    #[tokio::test]
    async fn run_reports_stable_after_threshold() {
        let status = chipsea_status(false, 0, 0, true);
        let scanner = FakeScanner::new((0..4).map(|_| chipsea(status, 500)).collect());
        let (out, _) = run(Options::default(), &scanner).await;

        let stable: Vec<_> = out.lines().map(|l| l.contains("stable=true")).collect();
        assert_eq!(stable, vec![false, false, false, true]);
    }

    #[tokio::test]
    async fn run_converts_to_display_unit() {
        let status = chipsea_status(false, 8, 1, false);
        let scanner = FakeScanner::new(vec![chipsea(status, 5)]);
        let options = Options {
            unit: DisplayUnit::Ounces,
            ..Options::default()
        };
        let (out, _) = run(options, &scanner).await;

        assert!(out.contains("native_unit=kg,unit=oz"));
        assert!(out.contains(",weight_grams=500 "));
        assert!(out.contains("weight=17.63"));
    }

    #[tokio::test]
    async fn run_prints_rejected_frames_only_when_verbose() {
        let mut tampered = felicita(SystemTime::now());
        if let Some(frame) = tampered.manufacturer_data.get_mut(&FELICITA_COMPANY_ID) {
            frame[17] ^= 0xFF;
        }
        let unrelated = Advertisement::new(TEST_MAC, SystemTime::now()).with_name("Sauna");
        let scanner = FakeScanner::new(vec![tampered, unrelated]);

        let (out, err) = run(Options::default(), &scanner).await;
        assert!(out.is_empty());
        assert!(err.is_empty());

        let verbose = Options {
            verbose: true,
            ..Options::default()
        };
        let (out, err) = run(verbose, &scanner).await;
        assert!(out.is_empty());
        assert_eq!(err.lines().count(), 1);
        assert!(err.starts_with("C8:47:8C:00:11:22: Checksum mismatch"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_silent_scale_unavailable_on_tick() {
        let long_ago = SystemTime::now() - Duration::from_secs(60);
        let scanner = FakeScanner::new(vec![felicita(long_ago)]).holding_open(Duration::from_millis(1500));
        let (out, _) = run(Options::default(), &scanner).await;

        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("available=true"));
        assert!(lines[1].ends_with(&format!(
            "available=false {}",
            long_ago.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_nanos()
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_for_advertisements_until_channel_closes() {
        let (tx, rx) = mpsc::channel(4);
        let scanner = ChannelScanner(Mutex::new(Some(rx)));
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();

        {
            let mut run = tokio_test::task::spawn(run_with_io(Options::default(), &scanner, &mut out, &mut err));
            assert_pending!(run.poll());

            tx.send(felicita(SystemTime::now())).await.unwrap();
            assert!(run.is_woken());
            assert_pending!(run.poll());

            drop(tx);
            assert!(run.is_woken());
            assert_ready_ok!(run.poll());
        }

        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn run_with_zero_tick_does_not_panic() {
        let scanner = FakeScanner::new(vec![felicita(SystemTime::now())]);
        let options = Options {
            tick: Duration::ZERO,
            ..Options::default()
        };
        let (out, _) = run(options, &scanner).await;
        assert_eq!(out.lines().count(), 1);
    }
}
