use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::coordinator::{command_from_request, Command, Coordinator, Reply};
use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, LOG_FORMAT_ENV};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::worker::{run_worker, WorkerLaunch};

/// Everything the daemon needs to serve one agency.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Directory holding `.agency/` (normally `$HOME`).
    pub home: PathBuf,
    pub config_path: PathBuf,
    /// Working directory workers are started in.
    pub workdir: PathBuf,
    /// Optional directory of `.tera` overrides for briefs.
    pub templates: Option<PathBuf>,
}

struct Job {
    command: Command,
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<Value, String>>>,
}

#[derive(Clone)]
struct WorkerContext {
    jobs: mpsc::Sender<Job>,
    workdir: PathBuf,
    timeout: Option<Duration>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(options: DaemonOptions) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options))
}

/// Run the daemon runtime.
///
/// The run lock and the socket are both claimed before any worker starts or
/// any record is written, so a second daemon for the same agency exits
/// without touching the run.
pub async fn run(options: DaemonOptions) -> Result<(), DaemonError> {
    let coordinator = Coordinator::open(
        &options.home,
        &options.config_path,
        options.templates.as_deref(),
    )?;
    let agency = coordinator.agency().name.clone();
    let socket = socket_path(&options.home, &agency);
    prepare_socket_for_bind(&socket)?;
    let started_at = Utc::now();
    tracing::info!(agency = %agency, socket = %socket.display(), "starting coordinator daemon");

    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let workers = WorkerContext {
        jobs: job_tx.clone(),
        workdir: options.workdir.clone(),
        timeout: coordinator
            .agency()
            .runtime
            .worker_timeout_secs
            .map(Duration::from_secs),
    };

    let coordinator_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = coordinator_task(coordinator, workers, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                socket,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };
    drop(job_tx);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (coordinator_result, socket_result, signal_result) =
        tokio::join!(coordinator_handle, socket_handle, signal_handle);

    handle_join("coordinator", coordinator_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!(agency = %agency, "daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Coordinator task
// ---------------------------------------------------------------------------

/// Sole owner of the [`Coordinator`]; every transition is serialized here.
async fn coordinator_task(
    mut coordinator: Coordinator,
    workers: WorkerContext,
    mut jobs: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let startup = coordinator.startup()?;
    spawn_workers(&workers, startup.launches);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = jobs.recv() => {
                let Some(job) = maybe_job else { break };
                let cmd = job.command.name();
                let outcome = match coordinator.handle(job.command) {
                    Ok(Reply { data, launches }) => {
                        spawn_workers(&workers, launches);
                        Ok(data)
                    }
                    Err(err) => {
                        tracing::warn!(cmd, source = job.source, error = %err, "command rejected");
                        Err(err.to_string())
                    }
                };
                if let Some(respond_to) = job.respond_to {
                    let _ = respond_to.send(outcome);
                }
                if coordinator.scheduler().is_finished() {
                    tracing::debug!("run finished; waiting for commands");
                }
            }
        }
    }
    Ok(())
}

fn spawn_workers(workers: &WorkerContext, launches: Vec<WorkerLaunch>) {
    for launch in launches {
        let ctx = workers.clone();
        tokio::spawn(async move {
            tracing::info!(role = %launch.role, argv = ?launch.argv, "starting worker");
            let report = run_worker(&launch, &ctx.workdir, ctx.timeout).await;
            tracing::info!(role = %report.role, status = ?report.status, "worker finished");
            let job = Job {
                command: Command::Complete(report),
                source: "worker",
                respond_to: None,
            };
            if ctx.jobs.send(job).await.is_err() {
                tracing::warn!(role = %launch.role, "coordinator gone; dropping worker report");
            }
        });
    }
}

async fn enqueue(
    jobs: &mpsc::Sender<Job>,
    command: Command,
    source: &'static str,
) -> Result<Value, DaemonError> {
    let (tx, rx) = oneshot::channel();
    jobs.send(Job {
        command,
        source,
        respond_to: Some(tx),
    })
    .await
    .map_err(|_| DaemonError::ChannelClosed("coordinator queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("coordinator response"))?;
    outcome.map_err(DaemonError::Rejected)
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    socket: PathBuf,
    jobs: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    if let Some(dir) = socket.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let jobs = jobs.clone();
                let shutdown_tx = shutdown_tx.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, jobs, shutdown_tx, socket, started_at).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    jobs: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    socket: PathBuf,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        if request.cmd == "stop" {
            let _ = shutdown_tx.send(());
            write_response(&mut writer, &DaemonResponse::ok(json!({ "stopping": true }))).await?;
            break;
        }

        let response = match command_from_request(&request) {
            Ok(command) => {
                let is_status = command == Command::Status;
                match enqueue(&jobs, command, "socket").await {
                    Ok(mut data) if is_status => {
                        data["daemon"] = daemon_info(&socket, started_at);
                        DaemonResponse::ok(data)
                    }
                    Ok(data) => DaemonResponse::ok(data),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            Err(err) => DaemonResponse::error(err.to_string()),
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

fn daemon_info(socket: &Path, started_at: DateTime<Utc>) -> Value {
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at": started_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "socket": socket.display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn wants_json_logs(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("json"))
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`), text
/// or JSON output depending on `AGENCY_LOG_FORMAT`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var(LOG_FORMAT_ENV).ok();
    if wants_json_logs(format.as_deref()) {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
