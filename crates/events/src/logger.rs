//! Background subscriber that writes every pipeline event to the trace log.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::PipelineEvent;

/// Traces each [`PipelineEvent`] it receives at `info` level.
pub struct EventLogger;

impl EventLogger {
    /// Run until the bus is dropped or `cancel` fires. Returns the number of
    /// events logged.
    pub async fn run(
        mut receiver: broadcast::Receiver<PipelineEvent>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut logged = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(logged, "Event logger stopping");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(event) => {
                        tracing::info!(
                            event_type = %event.event_type,
                            job_id = event.job_id,
                            scene_id = ?event.scene_id,
                            payload = %event.payload,
                            "Pipeline event"
                        );
                        logged += 1;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, logger shutting down");
                        break;
                    }
                },
            }
        }
        logged
    }
}
