use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::state::{Session, Stage, TaskStatus};

/// What the user is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Submission form (nothing tracked yet, or still queued)
    Form,
    /// Progress card, including terminal success and failure
    Progress,
}

pub fn select(session: &Session) -> View {
    match session.status() {
        None => View::Form,
        Some(status) if status.status == Stage::Queued => View::Form,
        Some(_) => View::Progress,
    }
}

pub fn describe(status: &TaskStatus) -> String {
    match status.status {
        Stage::Queued => "Preparing download...".to_string(),
        Stage::Downloading => format!("Downloading video... {:.1}%", status.progress),
        Stage::Processing => "Processing with FFmpeg...".to_string(),
        Stage::Completed => "Extraction complete! Starting download...".to_string(),
        Stage::Failed => "Failed to extract video.".to_string(),
    }
}

/// Bar fill for a non-terminal snapshot. Never drawn below 5% so the bar
/// stays visible while queued.
pub fn bar_position(status: &TaskStatus) -> u64 {
    status.progress.clamp(5.0, 100.0).round() as u64
}

/// Terminal renderer for a session: a spinner while in the form view, a
/// percentage bar once the job is moving.
pub struct ProgressView {
    bar: ProgressBar,
}

impl ProgressView {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr_with_hz(5))
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(100), target);
        Self { bar }
    }

    pub fn render(&self, session: &Session) {
        let Some(status) = session.status() else {
            self.bar.set_style(spinner_style());
            self.bar.set_message("Waiting for a URL...");
            return;
        };

        match select(session) {
            View::Form => {
                self.bar.set_style(spinner_style());
                self.bar.set_message(describe(status));
                self.bar.tick();
            }
            View::Progress if status.status.is_terminal() => {
                self.bar.set_style(spinner_style());
                let hint = if status.status == Stage::Failed {
                    "try again with the same URL"
                } else {
                    "extract another video"
                };
                self.bar
                    .finish_with_message(format!("{} ({})", describe(status), hint));
            }
            View::Progress => {
                self.bar.set_style(bar_style());
                self.bar.set_position(bar_position(status));
                self.bar.set_message(format!(
                    "{} [{}]",
                    describe(status),
                    status.status.as_str().to_uppercase()
                ));
            }
        }
    }
}

impl Default for ProgressView {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Re-renders `view` on every session change until the session ends or
/// becomes terminal.
pub fn spawn_renderer(
    mut updates: watch::Receiver<Session>,
    view: ProgressView,
) -> JoinHandle<ProgressView> {
    tokio::spawn(async move {
        view.render(&updates.borrow_and_update());
        loop {
            let session = updates.borrow_and_update().clone();
            if session.is_terminal() || session.is_empty() {
                view.render(&session);
                break;
            }
            if updates.changed().await.is_err() {
                break;
            }
            view.render(&updates.borrow());
        }
        view
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ActiveTask, TaskId};

    fn active(stage: Stage, progress: f64) -> Session {
        Session::Active(ActiveTask {
            task_id: TaskId::new("abc"),
            status: TaskStatus {
                status: stage,
                progress,
            },
        })
    }

    fn hidden() -> ProgressView {
        ProgressView::with_draw_target(ProgressDrawTarget::hidden())
    }

    #[test]
    fn test_select_form_until_the_job_moves() {
        assert_eq!(select(&Session::Empty), View::Form);
        assert_eq!(select(&active(Stage::Queued, 0.0)), View::Form);
        assert_eq!(select(&active(Stage::Downloading, 42.5)), View::Progress);
        assert_eq!(select(&active(Stage::Processing, 50.0)), View::Progress);
        assert_eq!(select(&active(Stage::Completed, 100.0)), View::Progress);
        assert_eq!(select(&active(Stage::Failed, 0.0)), View::Progress);
    }

    #[test]
    fn test_describe_per_stage() {
        let msg = |stage, progress| {
            describe(&TaskStatus {
                status: stage,
                progress,
            })
        };
        assert_eq!(msg(Stage::Queued, 0.0), "Preparing download...");
        assert_eq!(msg(Stage::Downloading, 42.5), "Downloading video... 42.5%");
        assert_eq!(msg(Stage::Processing, 50.0), "Processing with FFmpeg...");
        assert_eq!(msg(Stage::Failed, 0.0), "Failed to extract video.");
    }

    #[test]
    fn test_bar_position_has_a_floor() {
        let at = |progress| {
            bar_position(&TaskStatus {
                status: Stage::Downloading,
                progress,
            })
        };
        assert_eq!(at(0.0), 5);
        assert_eq!(at(42.5), 43);
        assert_eq!(at(250.0), 100);
    }

    #[test]
    fn test_render_tracks_progress_and_finishes_on_terminal() {
        let view = hidden();

        view.render(&active(Stage::Downloading, 42.5));
        assert_eq!(view.bar.position(), 43);
        assert!(view.bar.message().starts_with("Downloading video... 42.5%"));
        assert!(!view.bar.is_finished());

        view.render(&active(Stage::Failed, 0.0));
        assert!(view.bar.is_finished());
        assert!(view.bar.message().contains("try again"));
    }

    #[tokio::test]
    async fn test_renderer_stops_on_terminal_session() {
        let (tx, rx) = watch::channel(active(Stage::Queued, 0.0));
        let handle = spawn_renderer(rx, hidden());

        tx.send_replace(active(Stage::Processing, 50.0));
        tx.send_replace(active(Stage::Completed, 100.0));

        let view = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(view.bar.is_finished());
        assert!(view.bar.message().starts_with("Extraction complete!"));
    }
}
