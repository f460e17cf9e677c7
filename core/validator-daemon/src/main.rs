//! Validator daemon entrypoint.
//!
//! A small service that owns the violation store for the current
//! demand-response event: a socket listener with strict request validation,
//! an idle monitor that closes out quiet events, and an ordered shutdown that
//! drains final reports before exit.

use fs_err as fs;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use validator_core::{
    drain, load_config, state_dir, Dispatcher, FaultNotifier, IdleMonitor, MonitorHandle,
    RecipientDirectory, SpoolFaultSink, SpoolReportSender, SummaryStore, ValidatorConfig,
    ValidatorService,
};
use validator_protocol::{
    parse_batch, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod logging;
mod signals;

use signals::TerminationSignals;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const IN_FLIGHT_POLL_MS: u64 = 10;

struct Daemon {
    service: Arc<ValidatorService>,
    dispatcher: Dispatcher,
    config: ValidatorConfig,
}

fn main() {
    let signals = match TerminationSignals::block() {
        Ok(signals) => signals,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let state_dir = match state_dir() {
        Ok(path) => path,
        Err(err) => {
            eprintln!("Failed to resolve state directory: {}", err);
            std::process::exit(1);
        }
    };
    let _log_guard = logging::init(&state_dir.join("logs"));

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load validator config");
            std::process::exit(1);
        }
    };

    let socket_path = config.socket_path(&state_dir);
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare socket directory");
        std::process::exit(1);
    }
    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind validator socket");
            std::process::exit(1);
        }
    };

    let daemon = build_daemon(config, &state_dir);
    let monitor = IdleMonitor::new(
        Arc::clone(daemon.service.store()),
        daemon.dispatcher.clone(),
        daemon.config.monitor.check_interval(),
        daemon.config.monitor.idle_threshold(),
    )
    .spawn();

    let stop = Arc::new(AtomicBool::new(false));
    signals.spawn_listener(Arc::clone(&stop), socket_path.clone(), listener.as_raw_fd());

    info!(
        path = %socket_path.display(),
        check_interval_secs = daemon.config.monitor.check_interval_secs,
        idle_threshold_secs = daemon.config.monitor.idle_threshold_secs,
        "Validator daemon started"
    );

    let in_flight = Arc::new(AtomicUsize::new(0));
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let service = Arc::clone(&daemon.service);
                let guard = InFlightGuard::enter(Arc::clone(&in_flight));
                thread::spawn(move || {
                    let _guard = guard;
                    handle_connection(stream, service);
                });
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept validator connection");
            }
        }
    }

    shutdown(daemon, monitor, &in_flight);

    if let Err(err) = remove_existing_socket(&socket_path) {
        warn!(error = %err, "Failed to remove socket on exit");
    }
    info!("Validator daemon stopped");
}

fn build_daemon(config: ValidatorConfig, state_dir: &Path) -> Daemon {
    let store = Arc::new(SummaryStore::new());
    let fault_sink = Arc::new(SpoolFaultSink::new(config.faults_outbox_path(state_dir)));
    info!(spool = %fault_sink.path().display(), "Fault spool configured");
    let notifier = Arc::new(FaultNotifier::start(
        fault_sink,
        config.notifier.queue_capacity,
    ));
    let service = Arc::new(ValidatorService::new(
        store,
        notifier,
        config.tracking,
    ));

    let resolver = Arc::new(RecipientDirectory::new(config.recipients.clone()));
    let sender = Arc::new(SpoolReportSender::from_config(&config, state_dir));
    info!(
        outbox = %sender.outbox_dir().display(),
        recipients = config.recipients.len(),
        "Report spool configured"
    );
    let dispatcher = Dispatcher::new(resolver, sender);

    Daemon {
        service,
        dispatcher,
        config,
    }
}

/// Stop order: let in-flight requests land, stop the monitor, drain final
/// reports, then flush notifications. Every step is bounded; a monitor tick
/// stuck in delivery keeps the project it holds and the drain takes the rest.
fn shutdown(daemon: Daemon, monitor: MonitorHandle, in_flight: &AtomicUsize) {
    info!("Shutting down validator daemon");

    wait_for_in_flight(in_flight, Duration::from_secs(READ_TIMEOUT_SECS + 1));
    monitor.stop(daemon.config.shutdown.monitor_stop_wait());

    let outcome = drain(
        Arc::clone(daemon.service.store()),
        daemon.dispatcher.clone(),
        daemon.config.shutdown.drain_timeout(),
    );
    if outcome.is_complete() {
        info!(
            finalized = outcome.finalized.len(),
            failed = outcome.failed.len(),
            "Final reports drained"
        );
    } else {
        warn!(
            finalized = outcome.finalized.len(),
            failed = outcome.failed.len(),
            abandoned = ?outcome.abandoned,
            "Final report drain incomplete"
        );
    }

    let stats = daemon
        .service
        .notifier()
        .shutdown(daemon.config.notifier.shutdown_wait());
    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        dropped = stats.dropped,
        "Fault notifier closed"
    );
}

fn wait_for_in_flight(in_flight: &AtomicUsize, limit: Duration) {
    let deadline = Instant::now() + limit;
    while in_flight.load(Ordering::SeqCst) > 0 {
        if Instant::now() >= deadline {
            warn!(
                in_flight = in_flight.load(Ordering::SeqCst),
                "Proceeding with shutdown while requests are in flight"
            );
            return;
        }
        thread::sleep(Duration::from_millis(IN_FLIGHT_POLL_MS));
    }
}

struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, service: Arc<ValidatorService>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Validator request received");
    let response = handle_request(request, &service);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, service: &ValidatorService) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "tracked_projects": service.tracked_projects(),
            });
            if let Ok(value) = serde_json::to_value(service.notifier().stats()) {
                data["fault_notifier"] = value;
            }
            Response::ok(request.id, data)
        }
        Method::ValidateAverageOutputs => {
            let batch = match parse_batch(request.params) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(code = %err.code, message = %err.message, "Rejected reading batch");
                    return Response::error_with_info(request.id, err);
                }
            };
            info!(readings = batch.len(), "Received validation request");
            let result = service.validate_average_outputs(&batch);
            match serde_json::to_value(result) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize validation result: {}", err),
                ),
            }
        }
        Method::GetSummaries => {
            let summaries = service.summaries();
            tracing::debug!(projects = summaries.len(), "Summaries snapshot");
            match serde_json::to_value(&summaries) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize summaries: {}", err),
                ),
            }
        }
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
