//! Context spawn.
//!
//! Each context gets a dedicated OS thread running a current-thread tokio
//! runtime. Spawning is asynchronous: the caller awaits the worker's init
//! report instead of blocking on it.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64};
use std::thread;

use hive_types::ContextId;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::command::MediatorLink;
use crate::engine::EngineFactory;
use crate::error::ContextError;
use crate::handle::ContextHandle;
use crate::manager::ContextState;
use crate::mode::ContextMode;
use crate::worker::{WorkerInit, run_worker};

pub(crate) async fn spawn_context<Mode: ContextMode>(
    id: ContextId,
    factory: Arc<dyn EngineFactory>,
    outbound: MediatorLink,
) -> Result<ContextHandle<Mode>, ContextError> {
    tracing::debug!(context = %id, kind = %Mode::KIND, "spawning context");

    let terminated = Arc::new(AtomicBool::new(false));
    let epoch = Arc::new(AtomicU64::new(0));
    let state = Arc::new(AtomicU8::new(ContextState::Creating as u8));

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (init_tx, init_rx) = oneshot::channel::<Result<(), String>>();

    let init = WorkerInit {
        id,
        kind: Mode::KIND,
        factory,
        outbound,
        epoch: epoch.clone(),
        state: state.clone(),
    };

    let thread_name = format!("hive-{}-{}", Mode::KIND, id.0);
    let thread_handle = thread::Builder::new()
        .name(thread_name)
        .spawn(move || -> Result<(), ContextError> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(ContextError::SpawnFailed)?;

            let result = rt.block_on(run_worker(init, cmd_rx, shutdown_rx, init_tx));

            rt.shutdown_background();
            tracing::debug!(context = %id, "context thread exiting");
            result
        })?;

    let handle = ContextHandle {
        id,
        cmd_tx,
        shutdown_tx,
        terminated,
        epoch,
        state,
        thread_handle: Mutex::new(Some(thread_handle)),
        _mode: PhantomData,
    };

    // On failure the handle is dropped here, which joins the thread.
    match init_rx.await {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => Err(ContextError::CreationFailed(e)),
        Err(_) => Err(ContextError::CreationFailed(
            "context thread exited during init".to_string(),
        )),
    }
}
