//! Client for connecting to the taskgraph daemon.

use crate::daemon::{DaemonConfig, is_daemon_running, start_daemon};
use crate::protocol::{Request, Response};
use crate::types::{Dependency, DependencyId, DependencyType, OwnerId, Readiness, Task, TaskId};
use eyre::{Context, Result, bail};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client for communicating with the taskgraph daemon.
pub struct Client {
    root: PathBuf,
    stream: UnixStream,
}

/// Turn an error response into a report; anything else is unexpected.
fn unexpected(response: Response) -> eyre::Report {
    match response {
        Response::Error { code, message } => eyre::eyre!("{} ({})", message, code),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}

impl Client {
    /// Connect to the daemon, optionally auto-starting it if not running.
    pub fn connect(root: &Path, auto_start: bool) -> Result<Self> {
        let config = DaemonConfig::new(root);
        let socket_path = config.socket_path();

        let stream = match UnixStream::connect(&socket_path) {
            Ok(stream) => stream,
            Err(_) if auto_start => {
                if !is_daemon_running(root) {
                    start_daemon(root).context("Failed to auto-start daemon")?;

                    let mut attempts = 0;
                    loop {
                        if attempts > 20 {
                            bail!("Daemon failed to start in time");
                        }
                        std::thread::sleep(Duration::from_millis(50));
                        if let Ok(stream) = UnixStream::connect(&socket_path) {
                            break stream;
                        }
                        attempts += 1;
                    }
                } else {
                    UnixStream::connect(&socket_path).context("Failed to connect to daemon")?
                }
            }
            Err(e) => {
                bail!("Failed to connect to daemon: {}. Is it running?", e);
            }
        };

        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .context("Failed to set read timeout")?;

        Ok(Self {
            root: root.to_path_buf(),
            stream,
        })
    }

    /// Get the store root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Send a request and receive a response.
    fn request(&mut self, request: Request) -> Result<Response> {
        let request_json = serde_json::to_string(&request)?;
        writeln!(self.stream, "{}", request_json)?;
        self.stream.flush()?;

        let mut reader = BufReader::new(&self.stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line)?;

        let response: Response = serde_json::from_str(&response_line).context("Failed to parse response")?;
        Ok(response)
    }

    fn task(&mut self, request: Request) -> Result<Task> {
        match self.request(request)? {
            Response::Task { task } => Ok(task),
            other => Err(unexpected(other)),
        }
    }

    fn tasks(&mut self, request: Request) -> Result<Vec<Task>> {
        match self.request(request)? {
            Response::Tasks { tasks } => Ok(tasks),
            other => Err(unexpected(other)),
        }
    }

    fn dependencies(&mut self, request: Request) -> Result<Vec<Dependency>> {
        match self.request(request)? {
            Response::Dependencies { dependencies } => Ok(dependencies),
            other => Err(unexpected(other)),
        }
    }

    /// Create a task.
    pub fn create_task(&mut self, owner: OwnerId, title: &str, parent_id: Option<TaskId>) -> Result<Task> {
        self.task(Request::CreateTask {
            owner,
            title: title.to_string(),
            parent_id,
        })
    }

    /// Get a task by ID.
    pub fn get_task(&mut self, owner: OwnerId, id: TaskId) -> Result<Option<Task>> {
        match self.request(Request::GetTask { owner, id })? {
            Response::Task { task } => Ok(Some(task)),
            Response::NotFound { .. } => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    /// List an owner's tasks.
    pub fn list_tasks(&mut self, owner: OwnerId, include_inactive: bool) -> Result<Vec<Task>> {
        self.tasks(Request::ListTasks {
            owner,
            include_inactive,
        })
    }

    /// Record progress on a task.
    pub fn set_completion(&mut self, owner: OwnerId, id: TaskId, percentage: u8) -> Result<Task> {
        self.task(Request::SetCompletion { owner, id, percentage })
    }

    /// Move a task.
    pub fn set_parent(&mut self, owner: OwnerId, id: TaskId, parent_id: Option<TaskId>) -> Result<Task> {
        self.task(Request::SetParent { owner, id, parent_id })
    }

    pub fn list_children(&mut self, owner: OwnerId, id: TaskId) -> Result<Vec<Task>> {
        self.tasks(Request::ListChildren { owner, id })
    }

    pub fn count_descendants(&mut self, owner: OwnerId, id: TaskId) -> Result<usize> {
        match self.request(Request::CountDescendants { owner, id })? {
            Response::Count { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    pub fn ancestors(&mut self, owner: OwnerId, id: TaskId) -> Result<Vec<Task>> {
        self.tasks(Request::Ancestors { owner, id })
    }

    /// Soft-delete a task and its subtree.
    pub fn soft_delete(&mut self, owner: OwnerId, id: TaskId) -> Result<Vec<TaskId>> {
        match self.request(Request::SoftDelete { owner, id })? {
            Response::Deleted { ids } => Ok(ids),
            other => Err(unexpected(other)),
        }
    }

    /// Add a dependency edge.
    pub fn create_dependency(
        &mut self,
        owner: OwnerId,
        dependent_id: TaskId,
        prerequisite_id: TaskId,
        dependency_type: DependencyType,
        description: Option<&str>,
    ) -> Result<Dependency> {
        let response = self.request(Request::CreateDependency {
            owner,
            dependent_id,
            prerequisite_id,
            dependency_type,
            description: description.map(String::from),
        })?;

        match response {
            Response::Dependency { dependency } => Ok(dependency),
            other => Err(unexpected(other)),
        }
    }

    /// Change an edge's type and/or description.
    pub fn update_dependency(
        &mut self,
        owner: OwnerId,
        id: DependencyId,
        dependency_type: Option<DependencyType>,
        description: Option<Option<&str>>,
    ) -> Result<Dependency> {
        let response = self.request(Request::UpdateDependency {
            owner,
            id,
            dependency_type,
            description: description.flatten().map(String::from),
            clear_description: matches!(description, Some(None)),
        })?;

        match response {
            Response::Dependency { dependency } => Ok(dependency),
            other => Err(unexpected(other)),
        }
    }

    /// Remove an edge; false if there was none.
    pub fn delete_dependency(&mut self, owner: OwnerId, id: DependencyId) -> Result<bool> {
        match self.request(Request::DeleteDependency { owner, id })? {
            Response::Bool { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub fn list_dependents(&mut self, owner: OwnerId, id: TaskId) -> Result<Vec<Dependency>> {
        self.dependencies(Request::ListDependents { owner, id })
    }

    pub fn list_prerequisites(&mut self, owner: OwnerId, id: TaskId) -> Result<Vec<Dependency>> {
        self.dependencies(Request::ListPrerequisites { owner, id })
    }

    /// Start and finish readiness of a task.
    pub fn readiness(&mut self, owner: OwnerId, id: TaskId) -> Result<Readiness> {
        match self.request(Request::Readiness { owner, id })? {
            Response::Readiness { readiness } => Ok(readiness),
            other => Err(unexpected(other)),
        }
    }

    /// Shutdown the daemon.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.request(Request::Shutdown)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Ping the daemon.
    pub fn ping(&mut self) -> Result<()> {
        match self.request(Request::Ping)? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
