//! Best-effort branch deletion when the process is interrupted.
//!
//! A guard is armed once a branch exists and disarmed when teardown takes
//! over. While armed, Ctrl-C / SIGTERM or a panic triggers exactly one
//! delete attempt, after which the process exits.
//!
//! The panic hook and the signal listener are installed once per process
//! and read a shared slot, so repeated setup/teardown cycles never stack
//! handlers. The listener keeps the usual meaning of a termination signal
//! when nothing is armed: the process exits with 130 (SIGINT) or 143
//! (SIGTERM).

use std::sync::mpsc;
use std::sync::{Mutex, Once};
use std::time::Duration;

use crate::services::neon_client::NeonClient;

/// Upper bound on the delete attempted before a forced exit.
const CLEANUP_BUDGET: Duration = Duration::from_secs(15);

/// Exit code after a panic while a branch was armed, as for an uncaught panic.
pub const PANIC_EXIT_CODE: i32 = 101;

struct ArmedBranch {
    client: NeonClient,
    branch_id: String,
}

static ARMED: Mutex<Option<ArmedBranch>> = Mutex::new(None);
static PANIC_HOOK: Once = Once::new();
static SIGNAL_LISTENER: Once = Once::new();

pub struct EmergencyCleanupGuard {
    branch_id: String,
    armed: bool,
}

impl EmergencyCleanupGuard {
    /// Arm cleanup for `branch_id`.
    pub fn arm(client: &NeonClient, branch_id: &str) -> Self {
        install_panic_hook();
        install_signal_listener();
        if let Ok(mut slot) = ARMED.lock() {
            *slot = Some(ArmedBranch {
                client: client.clone(),
                branch_id: branch_id.to_string(),
            });
        }
        tracing::debug!(branch_id, "Emergency cleanup armed");

        Self {
            branch_id: branch_id.to_string(),
            armed: true,
        }
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// Stop guarding; normal teardown owns the branch from here.
    pub fn disarm(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Ok(mut slot) = ARMED.lock() {
            if slot.as_ref().is_some_and(|armed| armed.branch_id == self.branch_id) {
                *slot = None;
            }
        }
        tracing::debug!(branch_id = %self.branch_id, "Emergency cleanup disarmed");
    }
}

impl Drop for EmergencyCleanupGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for EmergencyCleanupGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyCleanupGuard")
            .field("branch_id", &self.branch_id)
            .field("armed", &self.armed)
            .finish()
    }
}

fn take_armed() -> Option<ArmedBranch> {
    ARMED.lock().ok().and_then(|mut slot| slot.take())
}

async fn delete_within_budget(armed: ArmedBranch) {
    let delete = armed.client.delete_test_branch(&armed.branch_id);
    if tokio::time::timeout(CLEANUP_BUDGET, delete).await.is_err() {
        tracing::error!(branch_id = %armed.branch_id, "Emergency branch deletion timed out");
    }
}

/// Runs `cleanup` on a fresh thread with its own runtime and waits for it.
///
/// The caller may sit inside (or be) a runtime worker, where blocking on a
/// nested runtime is not allowed.
fn block_on_fresh_runtime<F>(cleanup: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let handle = std::thread::spawn(move || {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(cleanup),
            Err(e) => tracing::error!("Cannot build runtime for emergency cleanup: {e}"),
        }
    });
    let _ = handle.join();
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let armed = take_armed();
            previous(info);
            // A panic while armed ends the process even if something up the
            // stack would catch it; the branch is gone after this.
            if let Some(armed) = armed {
                tracing::warn!(branch_id = %armed.branch_id, "Panic during test run, deleting test branch");
                block_on_fresh_runtime(delete_within_budget(armed));
                std::process::exit(PANIC_EXIT_CODE);
            }
        }));
    });
}

fn install_signal_listener() {
    SIGNAL_LISTENER.call_once(|| {
        let (ready_tx, ready_rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("branch-signals".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::warn!("Cannot build runtime for signal listener: {e}");
                        return;
                    }
                };
                runtime.block_on(listen_for_signals(ready_tx));
            });
        match spawned {
            // Handlers must be registered before the first guard is handed out.
            Ok(_) => {
                let _ = ready_rx.recv_timeout(Duration::from_secs(5));
            }
            Err(e) => tracing::warn!("Cannot start signal listener: {e}"),
        }
    });
}

async fn listen_for_signals(ready: mpsc::Sender<()>) {
    let Some(exit_code) = wait_for_signal(ready).await else {
        return;
    };
    match take_armed() {
        Some(armed) => {
            tracing::warn!(branch_id = %armed.branch_id, "Interrupted, deleting test branch before exit");
            delete_within_budget(armed).await;
        }
        None => tracing::debug!("Interrupted with no test branch armed"),
    }
    std::process::exit(exit_code);
}

/// Resolve on the first termination signal with the conventional exit code.
///
/// `None` when the handlers could not be registered.
#[cfg(unix)]
async fn wait_for_signal(ready: mpsc::Sender<()>) -> Option<i32> {
    use tokio::signal::unix::{signal, SignalKind};

    let registered = signal(SignalKind::interrupt())
        .and_then(|interrupt| Ok((interrupt, signal(SignalKind::terminate())?)));
    let (mut interrupt, mut terminate) = match registered {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!("Failed to install signal handlers: {e}");
            return None;
        }
    };
    let _ = ready.send(());

    tokio::select! {
        _ = interrupt.recv() => Some(130),
        _ = terminate.recv() => Some(143),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(ready: mpsc::Sender<()>) -> Option<i32> {
    let ctrl_c = tokio::signal::ctrl_c();
    let _ = ready.send(());
    match ctrl_c.await {
        Ok(()) => Some(130),
        Err(e) => {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            None
        }
    }
}
