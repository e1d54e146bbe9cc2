//! Background daemon serving one task graph store over a Unix socket.
//!
//! Clients send JSON lines over async tokio sockets; each request runs on
//! the blocking pool against a shared `Store`, so requests for different
//! owners proceed in parallel while the store serializes mutations within
//! one owner. Idle connections cost a task, not a thread.

use crate::protocol::{Request, Response};
use crate::storage::TASKGRAPH_DIR;
use crate::store::Store;
use eyre::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

/// Socket file name within the .taskgraph directory.
const SOCKET_FILE: &str = "daemon.sock";

/// PID file name within the .taskgraph directory.
const PID_FILE: &str = "daemon.pid";

/// Default number of requests buffered ahead of the dispatcher.
const DEFAULT_QUEUE_DEPTH: usize = 100;

/// Configuration for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root directory containing .taskgraph
    pub root: PathBuf,

    /// Requests buffered before connections wait
    pub queue_depth: usize,
}

impl DaemonConfig {
    /// Create config with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.root.join(TASKGRAPH_DIR).join(SOCKET_FILE)
    }

    /// Get the PID file path.
    pub fn pid_path(&self) -> PathBuf {
        self.root.join(TASKGRAPH_DIR).join(PID_FILE)
    }
}

type Envelope = (Request, mpsc::Sender<Response>);

/// The taskgraph daemon.
pub struct Daemon {
    config: DaemonConfig,
    store: Store,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let store = Store::open(&config.root).context("Failed to open store")?;

        Ok(Self {
            config,
            store,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get a shutdown handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the daemon until a shutdown request arrives.
    pub async fn run(&mut self) -> Result<()> {
        // Clean up any stale socket
        let socket_path = self.config.socket_path();
        if socket_path.exists() {
            fs::remove_file(&socket_path).ok();
        }

        let pid_path = self.config.pid_path();
        fs::write(&pid_path, std::process::id().to_string()).context("Failed to write PID file")?;

        let listener = UnixListener::bind(&socket_path).context("Failed to bind to Unix socket")?;

        log::info!("Daemon listening on {:?}", socket_path);

        let (tx, mut rx) = mpsc::channel::<Envelope>(self.config.queue_depth);

        let acceptor = tokio::spawn(Self::accept_connections(listener, tx));

        while let Some((request, response_tx)) = rx.recv().await {
            if matches!(request, Request::Shutdown) {
                self.shutdown.store(true, Ordering::Relaxed);
                let _ = response_tx.send(Response::Ok).await;
            } else {
                let store = self.store.clone();
                tokio::spawn(async move {
                    let response = match tokio::task::spawn_blocking(move || handle_request(&store, request)).await {
                        Ok(response) => response,
                        Err(e) => Response::error(format!("Request handler failed: {}", e)),
                    };
                    let _ = response_tx.send(response).await;
                });
            }

            if self.shutdown.load(Ordering::Relaxed) {
                log::info!("Daemon shutting down");
                break;
            }
        }

        acceptor.abort();
        fs::remove_file(&socket_path).ok();
        fs::remove_file(&pid_path).ok();

        Ok(())
    }

    /// Accept connections until the task is aborted.
    async fn accept_connections(listener: UnixListener, tx: mpsc::Sender<Envelope>) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let tx_clone = tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, tx_clone).await {
                            log::warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle a single client connection.
    ///
    /// Reads and writes are async, so an idle client holds no worker thread.
    async fn handle_connection(stream: UnixStream, tx: mpsc::Sender<Envelope>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await.context("Failed to read line")? {
            if line.is_empty() {
                continue;
            }

            let request: Request = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    let response = Response::error(format!("Malformed request: {}", e));
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            let is_shutdown = matches!(request, Request::Shutdown);

            let (resp_tx, mut resp_rx) = mpsc::channel(1);
            tx.send((request, resp_tx))
                .await
                .context("Failed to send request to daemon")?;

            if let Some(response) = resp_rx.recv().await {
                write_response(&mut writer, &response).await?;
            }

            if is_shutdown {
                break;
            }
        }

        Ok(())
    }
}

/// Write one response as a JSON line.
async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Execute one graph request against the store.
pub fn handle_request(store: &Store, request: Request) -> Response {
    log::debug!("Handling {:?}", request);

    let result = match request {
        Request::CreateTask {
            owner,
            title,
            parent_id,
        } => store.create_task(owner, &title, parent_id).map(|task| Response::Task { task }),

        Request::GetTask { owner, id } => store.get_task(owner, id).map(|task| match task {
            Some(task) => Response::Task { task },
            None => Response::NotFound { id },
        }),

        Request::ListTasks {
            owner,
            include_inactive,
        } => store
            .list_tasks(owner, include_inactive)
            .map(|tasks| Response::Tasks { tasks }),

        Request::SetCompletion { owner, id, percentage } => store
            .set_completion(owner, id, percentage)
            .map(|task| Response::Task { task }),

        Request::SetParent { owner, id, parent_id } => {
            store.set_parent(owner, id, parent_id).map(|task| Response::Task { task })
        }

        Request::ListChildren { owner, id } => store.list_children(owner, id).map(|tasks| Response::Tasks { tasks }),

        Request::CountDescendants { owner, id } => {
            store.count_descendants(owner, id).map(|count| Response::Count { count })
        }

        Request::Ancestors { owner, id } => store.ancestors(owner, id).map(|tasks| Response::Tasks { tasks }),

        Request::SoftDelete { owner, id } => store.soft_delete(owner, id).map(|ids| Response::Deleted { ids }),

        Request::CreateDependency {
            owner,
            dependent_id,
            prerequisite_id,
            dependency_type,
            description,
        } => store
            .create_dependency(owner, dependent_id, prerequisite_id, dependency_type, description.as_deref())
            .map(|dependency| Response::Dependency { dependency }),

        Request::UpdateDependency {
            owner,
            id,
            dependency_type,
            description,
            clear_description,
        } => {
            let description = if clear_description {
                Some(None)
            } else {
                description.as_deref().map(Some)
            };
            store
                .update_dependency(owner, id, dependency_type, description)
                .map(|dependency| Response::Dependency { dependency })
        }

        Request::DeleteDependency { owner, id } => {
            store.delete_dependency(owner, id).map(|value| Response::Bool { value })
        }

        Request::ListDependents { owner, id } => store
            .list_dependents(owner, id)
            .map(|dependencies| Response::Dependencies { dependencies }),

        Request::ListPrerequisites { owner, id } => store
            .list_prerequisites(owner, id)
            .map(|dependencies| Response::Dependencies { dependencies }),

        Request::Readiness { owner, id } => store.readiness(owner, id).map(|readiness| Response::Readiness { readiness }),

        Request::Shutdown => Ok(Response::Ok),

        Request::Ping => Ok(Response::Pong),
    };

    result.unwrap_or_else(|e| {
        log::debug!("Request failed: {:#}", e);
        Response::from_report(&e)
    })
}

/// Check if a daemon is running for the given store path.
pub fn is_daemon_running(root: &Path) -> bool {
    let config = DaemonConfig::new(root);
    let socket_path = config.socket_path();
    let pid_path = config.pid_path();

    if !socket_path.exists() {
        return false;
    }

    if let Ok(pid_str) = fs::read_to_string(&pid_path)
        && let Ok(pid) = pid_str.trim().parse::<i32>()
    {
        // Signal 0 only checks that the process exists
        unsafe {
            if libc::kill(pid, 0) == 0 {
                return true;
            }
        }
    }

    // Stale socket, clean up
    fs::remove_file(&socket_path).ok();
    fs::remove_file(&pid_path).ok();
    false
}

/// Start the daemon as a background process.
pub fn start_daemon(root: &Path) -> Result<()> {
    use std::process::Command;

    let exe = std::env::current_exe().context("Failed to get current executable")?;

    Command::new(exe)
        .args(["--dir", root.to_str().unwrap_or("."), "daemon"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;

    // Give it a moment to bind the socket
    std::thread::sleep(Duration::from_millis(100));

    Ok(())
}
