use super::{OndemandOrchestrator, ShutdownReason};
use crate::error::{ControllerError, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl OndemandOrchestrator {
    /// Run until a signal or a fatal component error, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("On-demand controller is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| ControllerError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(Arc::clone(&self.shutdown_sender));

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| ControllerError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let mut exit_code = self.shutdown().await?;
        if matches!(shutdown_reason, ShutdownReason::Error(_)) {
            exit_code = exit_code.max(1);
        }

        info!("On-demand controller shutdown complete");
        Ok(exit_code)
    }

    /// Ask a running `run()` to shut down
    pub async fn request_shutdown(&self, reason: ShutdownReason) {
        if let Some(sender) = self.shutdown_sender.lock().await.take() {
            let _ = sender.send(reason);
        }
    }

    fn setup_signal_handlers(&self, shutdown_sender: ShutdownSender) {
        // SIGTERM (container stop)
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let terminate = signal::unix::SignalKind::terminate();
                let mut sigterm = match signal::unix::signal(terminate) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // SIGINT (Ctrl+C)
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
