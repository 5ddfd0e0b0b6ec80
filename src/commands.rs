use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::cli::{parse_task_line, RetrieveMode};
use crate::client::{ServiceClient, TaskService};
use crate::config::ClientConfig;
use crate::controller::{PollExit, PollOptions, TaskController};
use crate::presentation::{spawn_renderer, ProgressView};
use crate::retrieval::{PrintLocation, Retrieved, Retriever, SaveArtifact};
use crate::state::{DownloadRequest, TaskId};

fn build_retriever(
    client: &ServiceClient,
    config: &ClientConfig,
    mode: RetrieveMode,
    show_progress: bool,
) -> Result<Arc<dyn Retriever>> {
    match mode {
        RetrieveMode::Print => Ok(Arc::new(PrintLocation)),
        RetrieveMode::Save => {
            let saver = SaveArtifact::new(
                client.clone(),
                config.download_dir.clone(),
                config.rate_limit()?,
            );
            if show_progress {
                Ok(Arc::new(saver))
            } else {
                Ok(Arc::new(saver.without_progress()))
            }
        }
    }
}

pub fn build_controller(
    config: &ClientConfig,
    mode: RetrieveMode,
    show_progress: bool,
) -> Result<TaskController> {
    let client = ServiceClient::new(config).context("Failed to create service client")?;
    let retriever = build_retriever(&client, config, mode, show_progress)?;
    Ok(TaskController::new(
        Arc::new(client),
        retriever,
        PollOptions::from(config),
    ))
}

fn report(retrieved: &Retrieved) {
    match retrieved {
        Retrieved::Saved(path) => println!("Saved {}", path.display()),
        Retrieved::Located(_) => {}
    }
}

/// Submits one job and follows it until it ends. The controller is left
/// holding the finished session; callers reset it before the next job.
pub async fn run_job(
    controller: &mut TaskController,
    request: DownloadRequest,
    show_progress: bool,
) -> Result<Retrieved> {
    let url = request.url().to_string();
    let task_id = match controller.submit(request).await {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Failed to connect to the backend server. Make sure it's running.");
            return Err(e).context(format!("Failed to submit {}", url));
        }
    };

    let view = if show_progress {
        ProgressView::new()
    } else {
        ProgressView::with_draw_target(indicatif::ProgressDrawTarget::hidden())
    };
    let renderer = spawn_renderer(controller.subscribe(), view);
    let exit = controller.wait().await;
    debug!(task_id = %task_id, view = ?controller.view(), "tracking finished");

    // The renderer only stops by itself once the session is terminal.
    if controller.session().is_terminal() {
        if let Err(e) = renderer.await {
            warn!(task_id = %task_id, error = %e, "progress renderer did not finish cleanly");
        }
    } else {
        renderer.abort();
    }

    match exit {
        Some(PollExit::Completed(Ok(retrieved))) => Ok(retrieved),
        Some(PollExit::Completed(Err(e))) => {
            Err(e).context(format!("Failed to retrieve artifact of task {}", task_id))
        }
        Some(PollExit::Failed) => bail!("Task {} failed to extract {}", task_id, url),
        Some(PollExit::Unreachable {
            consecutive_failures,
        }) => bail!(
            "Gave up on task {} after {} failed status polls",
            task_id,
            consecutive_failures
        ),
        Some(PollExit::Cancelled) | None => bail!("Tracking of task {} was cancelled", task_id),
    }
}

pub async fn run_single_download(
    config: ClientConfig,
    request: DownloadRequest,
    mode: RetrieveMode,
) -> Result<()> {
    let mut controller = build_controller(&config, mode, true)?;
    let retrieved = run_job(&mut controller, request, true).await?;
    report(&retrieved);
    controller.reset();
    Ok(())
}

async fn read_tasks_file(input: &PathBuf) -> Result<Vec<DownloadRequest>> {
    let file = fs::File::open(input)
        .await
        .context(format!("Failed to open tasks file: {:?}", input))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let mut requests = vec![];
    let mut invalid = vec![];
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_task_line(&line) {
            Ok(Some(request)) => requests.push(request),
            Ok(None) => {}
            Err(e) => invalid.push(format!("line {}: {}", line_no, e)),
        }
    }

    if !invalid.is_empty() {
        bail!("Invalid entries in {:?}: {:?}", input, invalid);
    }
    Ok(requests)
}

/// Runs every job of a tasks file, one after the other.
pub async fn run_downloads(
    input: PathBuf,
    config: ClientConfig,
    mode: RetrieveMode,
) -> Result<()> {
    let requests = read_tasks_file(&input).await?;
    let total = requests.len();
    info!(total, file = ?input, "processing tasks file");

    let mut controller = build_controller(&config, mode, true)?;
    let mut completed = 0;
    let mut failed = vec![];

    for request in requests {
        let url = request.url().to_string();
        match run_job(&mut controller, request, true).await {
            Ok(retrieved) => {
                report(&retrieved);
                completed += 1;
            }
            Err(e) => {
                eprintln!("Failed to download {}: {:#}", url, e);
                failed.push(url);
            }
        }
        controller.reset();
    }

    println!(
        "Summary: Completed: {}/{} | Failed: {}",
        completed,
        total,
        failed.len()
    );
    if !failed.is_empty() {
        bail!("{} of {} jobs failed", failed.len(), total);
    }
    Ok(())
}

pub async fn show_status(config: ClientConfig, task_id: String) -> Result<()> {
    let client = ServiceClient::new(&config).context("Failed to create service client")?;
    let id = TaskId::new(task_id);
    let status = client
        .query_status(&id)
        .await
        .context(format!("Failed to query status of task {}", id))?;

    println!("{:<40} {:<15} {:<15}", "Task", "Status", "Progress");
    println!("{:-<40} {:-<15} {:-<15}", "", "", "");
    println!(
        "{:<40} {:<15} {:<15}",
        id,
        status.status,
        format!("{:.1}%", status.progress)
    );
    Ok(())
}

/// Retrieves the artifact of a task that already completed.
pub async fn fetch_artifact(config: ClientConfig, task_id: String, mode: RetrieveMode) -> Result<()> {
    let client = ServiceClient::new(&config).context("Failed to create service client")?;
    let retriever = build_retriever(&client, &config, mode, true)?;
    let id = TaskId::new(task_id);
    let location = client.artifact_location(&id);

    let retrieved = retriever
        .retrieve(&id, &location)
        .await
        .context(format!("Failed to retrieve artifact of task {}", id))?;
    report(&retrieved);
    Ok(())
}
