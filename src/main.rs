//! tg: command-line front end for the task graph.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use taskgraph::{Client, Daemon, DaemonConfig, Dependency, Store, Task, TaskId, is_daemon_running};

mod cli;

use cli::{Cli, Command};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskgraph")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("taskgraph.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_store_dir(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn format_state(task: &Task) -> ColoredString {
    if !task.is_active {
        "deleted".dimmed()
    } else if task.is_completed {
        "done".green()
    } else if task.completion_percentage > 0 {
        format!("{:>3}%", task.completion_percentage).yellow()
    } else {
        "todo".normal()
    }
}

fn print_task_line(task: &Task) {
    println!(
        "{} {} {}",
        format!("#{}", task.id).cyan(),
        format_state(task),
        task.title
    );
}

fn print_dependency_line(dependency: &Dependency, other: TaskId) {
    println!(
        "  {} {} #{}{}",
        format!("[{}]", dependency.id).dimmed(),
        dependency.dependency_type.to_string().yellow(),
        other,
        dependency
            .description
            .as_ref()
            .map(|d| format!(" {}", d.dimmed()))
            .unwrap_or_default()
    );
}

fn yes_no(value: bool) -> ColoredString {
    if value { "yes".green() } else { "no".red() }
}

fn run(cli: Cli) -> Result<()> {
    let store_dir = get_store_dir(&cli);
    let owner = cli.owner;
    let open = || Store::open(&store_dir).context("Failed to open store");

    match cli.command {
        Command::Init => {
            Store::init(&store_dir).context("Failed to initialize taskgraph store")?;
            println!("{} Initialized taskgraph store in {}", "✓".green(), store_dir.display());
        }

        Command::Create { title, parent } => {
            let task = open()?
                .create_task(owner, &title, parent)
                .context("Failed to create task")?;
            println!("{} Created: {} {}", "✓".green(), format!("#{}", task.id).cyan(), task.title);
        }

        Command::List { all } => {
            let tasks = open()?.list_tasks(owner, all).context("Failed to list tasks")?;

            if tasks.is_empty() {
                println!("{}", "No tasks found".dimmed());
            } else {
                for task in &tasks {
                    print_task_line(task);
                }
            }
        }

        Command::Get { id } => {
            let store = open()?;
            match store.get_task(owner, id).context("Failed to get task")? {
                Some(task) => {
                    println!("{}: {}", "ID".bold(), format!("#{}", task.id).cyan());
                    println!("{}: {}", "Title".bold(), task.title);
                    println!("{}: {}", "State".bold(), format_state(&task));
                    println!("{}: {}%", "Progress".bold(), task.completion_percentage);
                    if task.is_active {
                        let path: Vec<String> = store
                            .ancestors(owner, id)
                            .context("Failed to load ancestors")?
                            .iter()
                            .rev()
                            .map(|t| format!("#{}", t.id))
                            .collect();
                        if !path.is_empty() {
                            println!("{}: {}", "Path".bold(), path.join(" > "));
                        }
                    }
                    println!("{}: {}", "Created".bold(), task.created_at);
                    println!("{}: {}", "Updated".bold(), task.updated_at);
                }
                None => {
                    eprintln!("{} Task not found: {}", "✗".red(), id);
                    std::process::exit(1);
                }
            }
        }

        Command::Progress { id, percentage } => {
            let task = open()?
                .set_completion(owner, id, percentage)
                .context("Failed to update progress")?;
            println!("{} {} {}", "→".blue(), format_state(&task), task.title);
        }

        Command::Complete { id } => {
            let task = open()?.complete(owner, id).context("Failed to complete task")?;
            println!("{} Completed: {} {}", "✓".green(), format!("#{}", task.id).cyan(), task.title);
        }

        Command::Move { id, parent } => {
            let task = open()?.set_parent(owner, id, parent).context("Failed to move task")?;
            match parent {
                Some(parent) => println!("{} #{} is now a child of #{}", "✓".green(), task.id, parent),
                None => println!("{} #{} is now a top-level task", "✓".green(), task.id),
            }
        }

        Command::Children { id } => {
            let store = open()?;
            let children = store.list_children(owner, id).context("Failed to list children")?;
            let total = store
                .count_descendants(owner, id)
                .context("Failed to count descendants")?;

            if children.is_empty() {
                println!("{}", "No subtasks".dimmed());
            } else {
                for child in &children {
                    print_task_line(child);
                }
                println!("{}", format!("{} descendant(s) in total", total).dimmed());
            }
        }

        Command::Delete { id } => {
            let ids = open()?.soft_delete(owner, id).context("Failed to delete task")?;
            println!("{} Deleted {} task(s)", "✓".green(), ids.len());
        }

        Command::Depend {
            dependent_id,
            prerequisite_id,
            dependency_type,
            description,
        } => {
            let dependency = open()?
                .create_dependency(owner, dependent_id, prerequisite_id, dependency_type, description.as_deref())
                .context("Failed to add dependency")?;
            println!(
                "{} [{}] #{} waits on #{} ({})",
                "✓".green(),
                dependency.id,
                dependent_id,
                prerequisite_id,
                dependency.dependency_type
            );
        }

        Command::Retype {
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
            let dependency = open()?
                .update_dependency(owner, id, dependency_type, description)
                .context("Failed to update dependency")?;
            println!("{} [{}] is now {}", "✓".green(), dependency.id, dependency.dependency_type);
        }

        Command::Undepend { id } => {
            if open()?.delete_dependency(owner, id).context("Failed to remove dependency")? {
                println!("{} Removed dependency [{}]", "✓".green(), id);
            } else {
                eprintln!("{} Dependency not found: {}", "✗".red(), id);
                std::process::exit(1);
            }
        }

        Command::Deps { id } => {
            let store = open()?;
            let prerequisites = store
                .list_prerequisites(owner, id)
                .context("Failed to list prerequisites")?;
            let dependents = store.list_dependents(owner, id).context("Failed to list dependents")?;

            println!("{}", "Waits on:".bold());
            if prerequisites.is_empty() {
                println!("  {}", "nothing".dimmed());
            }
            for dependency in &prerequisites {
                print_dependency_line(dependency, dependency.prerequisite_task_id);
            }

            println!("{}", "Waited on by:".bold());
            if dependents.is_empty() {
                println!("  {}", "nothing".dimmed());
            }
            for dependency in &dependents {
                print_dependency_line(dependency, dependency.dependent_task_id);
            }
        }

        Command::Status { id } => {
            let readiness = open()?.readiness(owner, id).context("Failed to evaluate readiness")?;
            println!("{}: {}", "Can start".bold(), yes_no(readiness.can_start));
            println!("{}: {}", "Can finish".bold(), yes_no(readiness.can_finish));
        }

        Command::Daemon => {
            println!("{} Starting daemon for {}", "→".blue(), store_dir.display());

            let config = DaemonConfig::new(&store_dir);
            let mut daemon = Daemon::new(config).context("Failed to create daemon")?;

            let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
            rt.block_on(async { daemon.run().await }).context("Daemon error")?;
        }

        Command::DaemonStop => {
            if !is_daemon_running(&store_dir) {
                println!("{} Daemon is not running", "✗".red());
                std::process::exit(1);
            }

            let mut client = Client::connect(&store_dir, false).context("Failed to connect to daemon")?;
            client.shutdown().context("Failed to shutdown daemon")?;
            println!("{} Daemon stopped", "✓".green());
        }

        Command::DaemonStatus => {
            if is_daemon_running(&store_dir) {
                println!("{} Daemon is running", "✓".green());

                if let Ok(mut client) = Client::connect(&store_dir, false)
                    && client.ping().is_ok()
                {
                    println!("  {} Responding to requests", "✓".green());
                }
            } else {
                println!("{} Daemon is not running", "✗".red());
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
