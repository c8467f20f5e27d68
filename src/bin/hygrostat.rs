use clap::{App, Arg, ArgMatches};
use colored::*;
use hygrostat::config::{HygrostatConfig, TelemetryConfig};
use hygrostat::control_loop::{self, ChannelHardware, TelemetryLink};
use hygrostat::error::{ConfigError, ControlError};
use hygrostat::hardware::simulated::SimulatedSensorConfig;
use hygrostat::hardware::{SimulatedRelay, SimulatedResetLine, SimulatedSensor};
use hygrostat::identity::{CpuInfoIdentity, EndpointBinding, EndpointTable, IdentityResolver, StaticIdentity};
use hygrostat::telemetry::{HttpTelemetrySink, LogTelemetrySink, TelemetryReporter, TelemetrySink};
use hygrostat::Shutdown;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SIMULATED_SERIAL: &str = "simulated";
// A DHT22 cannot be read faster than once every two seconds.
const SIMULATED_POLL_MS: u64 = 2000;

#[tokio::main]
async fn main() {
    let matches = App::new("hygrostat")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Space Systems Engineering Team")
        .about("Humidity-driven engine controller")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("SECS")
                .help("Control loop poll interval in seconds")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(n) if n > 0 => Ok(()),
                    _ => Err("Interval must be a positive number of seconds".into()),
                }),
        )
        .arg(
            Arg::with_name("telemetry")
                .short("t")
                .long("telemetry")
                .value_name("SINK")
                .help("Where telemetry reports go")
                .takes_value(true)
                .possible_values(&["http", "log"])
                .default_value("log"),
        )
        .arg(
            Arg::with_name("no-telemetry")
                .long("no-telemetry")
                .help("Disable telemetry reporting"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let default_level = if matches.is_present("verbose") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    if let Err(e) = run(&matches).await {
        error!(error = %e, "hygrostat stopped with an error");
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_config(matches: &ArgMatches<'_>) -> Result<HygrostatConfig, ControlError> {
    let mut config = match matches.value_of("config") {
        Some(path) => HygrostatConfig::load(path)?,
        None => HygrostatConfig::standard(),
    };

    if let Some(secs) = matches.value_of("interval") {
        config.control.poll_interval_secs = secs
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad interval {secs}")))?;
    }
    if matches.is_present("no-telemetry") {
        config.telemetry.enabled = false;
    }
    config.validate()?;
    Ok(config)
}

fn telemetry_link(config: &TelemetryConfig, sink_kind: &str) -> Option<TelemetryLink> {
    if !config.enabled {
        return None;
    }

    let sink: Box<dyn TelemetrySink>;
    let resolver: Box<dyn IdentityResolver>;
    let table;
    if sink_kind == "http" {
        sink = Box::new(HttpTelemetrySink::from_config(config));
        resolver = Box::new(CpuInfoIdentity::new());
        table = EndpointTable::from_config(config);
    } else {
        let mut keys = config.endpoints.clone();
        keys.entry(SIMULATED_SERIAL.to_string())
            .or_insert_with(|| "LOCAL".to_string());
        sink = Box::new(LogTelemetrySink);
        resolver = Box::new(StaticIdentity(SIMULATED_SERIAL.to_string()));
        table = EndpointTable::new(config.base_url.clone(), keys);
    }

    Some(TelemetryLink {
        reporter: TelemetryReporter::new(sink, config.field_order),
        endpoint: EndpointBinding::new(resolver, table),
    })
}

async fn run(matches: &ArgMatches<'_>) -> Result<(), ControlError> {
    let mut config = load_config(matches)?;
    if config.sampling.poll_interval_ms == 0 {
        config.sampling.poll_interval_ms = SIMULATED_POLL_MS;
    }

    println!("{}", "Hygrostat - humidity engine control".bright_blue().bold());
    println!(
        "   Thresholds: start > {:.1}%  stop < {:.1}%  debounce {}",
        config.control.start_threshold, config.control.stop_threshold, config.control.debounce_count
    );
    println!(
        "   Window: {} samples, {:.1} sigma",
        config.sampling.window_size, config.sampling.std_factor
    );
    for channel in &config.sensors {
        let role = if channel.controls_engine { "engine".green() } else { "monitor".yellow() };
        println!("   Sensor {} (reset GPIO {}): {}", channel.id, channel.reset_line, role);
    }
    println!("{}", "Press Ctrl+C to stop".bright_green());

    let shutdown = Shutdown::new();
    let token = shutdown.token();

    let hardware = config.sensors.iter().map(|channel| ChannelHardware {
        sensor: SimulatedSensor::new(SimulatedSensorConfig {
            seed: 0x1234_5678_9ABC_DEF0 ^ u64::from(channel.id),
            base_humidity: 63.0,
            humidity_swing: 8.0,
            ..SimulatedSensorConfig::default()
        }),
        reset_line: SimulatedResetLine::new(),
    });

    let sink_kind = matches.value_of("telemetry").unwrap_or("log");
    let telemetry = telemetry_link(&config.telemetry, sink_kind);
    let (control, samplers) =
        control_loop::assemble(&config, SimulatedRelay::new(), hardware, telemetry, &token)?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received"),
            Err(e) => error!(error = %e, "failed to listen for interrupt, shutting down"),
        }
        shutdown.trigger();
    });

    let stats = control.run(samplers, token).await?;
    println!(
        "{} {} cycles, {} engine transitions",
        "Stopped:".bright_blue(),
        stats.cycles,
        stats.transitions
    );
    Ok(())
}
