use hygrostat::config::{ControlConfig, FieldOrder};
use hygrostat::engine::{EngineController, EngineState, EngineStatus};
use hygrostat::error::{IdentityError, TelemetryError};
use hygrostat::identity::{CpuInfoIdentity, EndpointBinding, EndpointTable, IdentityResolver, StaticIdentity};
use hygrostat::telemetry::*;
use hygrostat::FilteredEstimate;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

fn estimate(humidity: f64, temperature: f64) -> FilteredEstimate {
    FilteredEstimate {
        sensor_id: 9,
        temperature,
        humidity,
        samples_used: 10,
        produced_at: SystemTime::now(),
    }
}

fn state(status: EngineStatus, on_minutes: f64, off_minutes: f64) -> EngineState {
    let mut state = EngineController::with_status(ControlConfig::default(), status, Instant::now())
        .state()
        .clone();
    state.on_elapsed_minutes = on_minutes;
    state.off_elapsed_minutes = off_minutes;
    state
}

fn values(report: &TelemetryReport) -> Vec<(&'static str, f64)> {
    report.fields.iter().map(|f| (f.name, f.value)).collect()
}

#[test]
fn test_state_dependent_order_when_on() {
    let report = TelemetryReport::build(
        &estimate(68.2, 21.4),
        &state(EngineStatus::On, 12.5, 40.0),
        FieldOrder::StateDependent,
    );
    assert_eq!(
        values(&report),
        vec![
            ("field1", 68.2),
            ("field2", 21.4),
            ("field3", 1.0),
            ("field4", 12.5),
            ("field5", 40.0)
        ]
    );
}

#[test]
fn test_state_dependent_order_when_off() {
    let report = TelemetryReport::build(
        &estimate(58.0, 19.0),
        &state(EngineStatus::Off, 12.5, 3.2),
        FieldOrder::StateDependent,
    );
    assert_eq!(report.get("field3"), Some(0.0));
    // While OFF the running counter goes first.
    assert_eq!(report.get("field4"), Some(3.2));
    assert_eq!(report.get("field5"), Some(12.5));
}

#[test]
fn test_fixed_order_never_swaps() {
    for status in [EngineStatus::On, EngineStatus::Off] {
        let report = TelemetryReport::build(&estimate(60.0, 20.0), &state(status, 7.0, 9.0), FieldOrder::Fixed);
        assert_eq!(report.get("field4"), Some(7.0));
        assert_eq!(report.get("field5"), Some(9.0));
    }
}

#[test]
fn test_failed_upload_is_counted_and_next_succeeds() {
    let sink = MemorySink::new();
    let mut reporter = TelemetryReporter::new(Box::new(sink.clone()), FieldOrder::StateDependent);
    let st = state(EngineStatus::Off, 0.0, 1.0);

    sink.set_failing(true);
    assert_eq!(
        reporter.report(Some("http://x/update?api_key=K"), &estimate(61.0, 20.0), &st),
        ReportOutcome::Failed
    );
    assert!(sink.reports().is_empty());

    sink.set_failing(false);
    assert_eq!(
        reporter.report(Some("http://x/update?api_key=K"), &estimate(62.0, 20.0), &st),
        ReportOutcome::Sent
    );

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, "http://x/update?api_key=K");
    assert_eq!(reports[0].1.get("field1"), Some(62.0));
    assert_eq!(
        reporter.stats(),
        TelemetryStats {
            sent: 1,
            failed: 1,
            skipped: 0
        }
    );
}

#[test]
fn test_unresolved_endpoint_skips_report() {
    let sink = MemorySink::new();
    let mut reporter = TelemetryReporter::new(Box::new(sink.clone()), FieldOrder::Fixed);
    let outcome = reporter.report(None, &estimate(61.0, 20.0), &state(EngineStatus::Off, 0.0, 0.0));
    assert_eq!(outcome, ReportOutcome::Skipped);
    assert!(sink.reports().is_empty());
    assert_eq!(reporter.stats().skipped, 1);
}

/// Fails a set number of times before yielding an id.
struct FlakyIdentity {
    failures_left: u32,
}

impl IdentityResolver for FlakyIdentity {
    fn hardware_id(&mut self) -> Result<String, IdentityError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(IdentityError::SerialNotFound("/proc/cpuinfo".into()));
        }
        Ok("000000001296c725".into())
    }
}

fn table() -> EndpointTable {
    let mut keys = BTreeMap::new();
    keys.insert("000000001296c725".to_string(), "WRITEKEY".to_string());
    EndpointTable::new("https://api.thingspeak.com/update", keys)
}

#[test]
fn test_endpoint_binding_retries_until_resolved() {
    let mut binding = EndpointBinding::new(Box::new(FlakyIdentity { failures_left: 2 }), table());

    assert_eq!(binding.ensure_resolved(), None);
    assert_eq!(binding.ensure_resolved(), None);
    assert_eq!(
        binding.ensure_resolved(),
        Some("https://api.thingspeak.com/update?api_key=WRITEKEY")
    );
    assert_eq!(binding.attempts(), 3);

    // Cached from here on.
    binding.ensure_resolved();
    assert_eq!(binding.attempts(), 3);
}

#[test]
fn test_unknown_serial_stays_unresolved() {
    let mut binding = EndpointBinding::new(Box::new(StaticIdentity("deadbeef".into())), table());
    assert_eq!(binding.ensure_resolved(), None);
    assert_eq!(binding.url(), None);
    assert_eq!(binding.attempts(), 1);
}

#[test]
fn test_cpuinfo_identity_reads_serial_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cpuinfo");
    std::fs::write(&path, "processor\t: 0\nSerial\t\t: 000000001296c725\n").unwrap();

    let mut binding = EndpointBinding::new(Box::new(CpuInfoIdentity::with_path(&path)), table());
    assert!(binding.ensure_resolved().is_some());

    let mut missing = CpuInfoIdentity::with_path(dir.path().join("nope"));
    assert!(matches!(missing.hardware_id(), Err(IdentityError::Io(_))));
}

/// Answer a single HTTP request with `body` and hand back the request line.
fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/update?api_key=KEY", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
        }
        stream.write_all(response.as_bytes()).unwrap();
        let text = String::from_utf8_lossy(&request).to_string();
        text.lines().next().unwrap_or_default().to_string()
    });
    (url, handle)
}

fn sample_report() -> TelemetryReport {
    TelemetryReport::build(
        &estimate(67.5, 20.5),
        &state(EngineStatus::On, 2.0, 1.5),
        FieldOrder::StateDependent,
    )
}

#[test]
fn test_http_sink_sends_fields_as_query() {
    let (url, server) = serve_once("200 OK", "1842");
    let mut sink = HttpTelemetrySink::new(Duration::from_secs(5));

    sink.send(&url, &sample_report()).unwrap();

    let request_line = server.join().unwrap();
    assert!(request_line.starts_with("GET /update?api_key=KEY"));
    assert!(request_line.contains("field1=67.5"));
    assert!(request_line.contains("field3=1"));
    assert!(request_line.contains("field5=1.5"));
}

#[test]
fn test_http_sink_zero_body_is_rejection() {
    let (url, server) = serve_once("200 OK", "0");
    let mut sink = HttpTelemetrySink::new(Duration::from_secs(5));

    let result = sink.send(&url, &sample_report());
    server.join().unwrap();
    assert!(matches!(result, Err(TelemetryError::Rejected)));
}

#[test]
fn test_http_sink_reports_status_code() {
    let (url, server) = serve_once("500 Internal Server Error", "oops");
    let mut sink = HttpTelemetrySink::new(Duration::from_secs(5));

    let result = sink.send(&url, &sample_report());
    server.join().unwrap();
    assert!(matches!(result, Err(TelemetryError::Status(500))));
}

#[test]
fn test_http_sink_unreachable_is_transport_error() {
    // Bind then drop to get a port nobody listens on.
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let mut sink = HttpTelemetrySink::new(Duration::from_secs(2));

    let result = sink.send(&format!("http://127.0.0.1:{port}/update"), &sample_report());
    assert!(matches!(result, Err(TelemetryError::Transport(_))));
}
