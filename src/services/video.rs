use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::gateway::{GatewayError, VideoJobs, VideoRequest, VideoTaskStatus};

pub const MAX_POLL_ATTEMPTS: u32 = 120;
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    Failed(String),

    #[error("Video generation timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },

    #[error("Video generation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: MAX_POLL_ATTEMPTS,
            interval: POLL_INTERVAL,
        }
    }
}

/// Snapshot handed to the progress callback before each status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProgress {
    pub attempt: u32,
    pub elapsed: Duration,
}

impl PollProgress {
    /// Elapsed time as `"{m}m {s}s"`.
    pub fn elapsed_label(&self) -> String {
        let secs = self.elapsed.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Query `task_id` until it succeeds, fails, or the attempt budget runs out.
///
/// `delay` is awaited between attempts (never before the first), so tests can
/// substitute an instant future for `tokio::time::sleep`.
pub async fn poll_video<J, D, Fut, P>(
    jobs: &J,
    task_id: &str,
    options: PollOptions,
    mut delay: D,
    mut on_progress: P,
    cancel_token: &CancellationToken,
) -> Result<Option<String>, PollError>
where
    J: VideoJobs + ?Sized,
    D: FnMut(Duration) -> Fut,
    Fut: Future<Output = ()>,
    P: FnMut(PollProgress),
{
    for attempt in 1..=options.max_attempts {
        if attempt > 1 {
            tokio::select! {
                _ = cancel_token.cancelled() => return Err(PollError::Cancelled),
                _ = delay(options.interval) => {}
            }
        }

        on_progress(PollProgress {
            attempt,
            elapsed: options.interval * attempt,
        });

        match jobs.query_video_task(task_id).await? {
            VideoTaskStatus::Succeeded { url } => {
                tracing::info!("Video task {} finished after {} attempts", task_id, attempt);
                return Ok(url);
            }
            VideoTaskStatus::Failed { message } => {
                return Err(PollError::Failed(
                    message.unwrap_or_else(|| "Video generation failed".to_string()),
                ));
            }
            VideoTaskStatus::Running(status) => {
                tracing::debug!("Video task {} still {} (attempt {})", task_id, status, attempt);
            }
        }
    }

    Err(PollError::TimedOut {
        attempts: options.max_attempts,
    })
}

/// Submit a job and poll it with the production delay.
pub async fn generate_video<J, P>(
    jobs: &J,
    request: VideoRequest,
    on_progress: P,
    cancel_token: &CancellationToken,
) -> Result<Option<String>, PollError>
where
    J: VideoJobs + ?Sized,
    P: FnMut(PollProgress),
{
    let task_id = jobs.create_video_task(request).await?;
    tracing::info!("Created video task {}", task_id);

    poll_video(
        jobs,
        &task_id,
        PollOptions::default(),
        tokio::time::sleep,
        on_progress,
        cancel_token,
    )
    .await
}
