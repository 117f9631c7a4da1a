//! Service supervisor.
//!
//! Wires the recorder and router together around one cancellation token,
//! installs the shutdown signal adapter and drives the orderly stop sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::{CamError, CamResult};
use crate::constants::{AUTO_START_SETTLE, TASK_JOIN_TIMEOUT};
use crate::recorder::{CameraHandle, CameraRecorder};
use crate::router::CommandRouter;

/// Owns the service tasks and their shared cancellation token.
pub struct SystemSupervisor {
    settings: Settings,
    cancel: CancellationToken,
    camera: CameraHandle,
    recorder: Option<CameraRecorder>,
    router: Option<CommandRouter>,
    tasks: Vec<(&'static str, JoinHandle<CamResult<()>>)>,
    stopped: AtomicBool,
}

impl SystemSupervisor {
    pub fn new(settings: Settings) -> Self {
        let cancel = CancellationToken::new();
        let (recorder, camera) = CameraRecorder::new(settings.clone(), cancel.clone());
        let router = CommandRouter::new(settings.serial.clone(), camera.clone(), cancel.clone());

        Self {
            settings,
            cancel,
            camera,
            recorder: Some(recorder),
            router: Some(router),
            tasks: Vec::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Initialize both subsystems and spawn their run loops. Any
    /// initialization failure aborts startup before tasks are spawned, and
    /// a repeated start is rejected.
    pub async fn start(&mut self) -> CamResult<()> {
        info!("Starting camera control system");

        let (Some(mut recorder), Some(mut router)) = (self.recorder.take(), self.router.take())
        else {
            return Err(CamError::App(
                "camera control system already started".to_string(),
            ));
        };

        recorder.initialize()?;
        router.initialize()?;

        self.tasks.push(("recorder", tokio::spawn(recorder.run())));
        self.tasks.push(("router", tokio::spawn(router.run())));
        self.spawn_signal_adapter();

        if self.settings.auto_start_recording {
            let camera = self.camera.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(AUTO_START_SETTLE) => {
                        info!("Auto-starting recording");
                        if let Err(e) = camera.start_recording().await {
                            error!("Auto-start recording failed: {e}");
                        }
                    }
                }
            });
        }

        info!("Camera control system started");
        Ok(())
    }

    /// The single place signals are translated into cancellation.
    fn spawn_signal_adapter(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            cancel.cancel();
        });
    }

    /// Block until the service is asked to shut down, then stop it.
    pub async fn run(&mut self) {
        self.cancel.cancelled().await;
        self.stop().await;
    }

    /// Cancel all tasks and wait briefly for each to finish. Safe to call
    /// more than once.
    pub async fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping camera control system");
        self.cancel.cancel();

        for (name, task) in self.tasks.drain(..) {
            match timeout(TASK_JOIN_TIMEOUT, task).await {
                Ok(Ok(Ok(()))) => info!("Task {name} finished"),
                Ok(Ok(Err(e))) => warn!("Task {name} finished with error: {e}"),
                Ok(Err(e)) => warn!("Task {name} panicked: {e}"),
                Err(_) => warn!("Task {name} did not stop in time"),
            }
        }

        info!("Camera control system stopped");
    }

    /// Handle for tests and embedding.
    pub fn camera(&self) -> CameraHandle {
        self.camera.clone()
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            if let Err(e) = ctrl_c.await {
                error!("Failed to listen for SIGINT: {e}");
            } else {
                info!("Received SIGINT");
            }
        }
    }
}
