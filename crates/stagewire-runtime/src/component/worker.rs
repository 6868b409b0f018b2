//! Active-mode worker: parks on the component's wake-flag word and runs
//! the event-processing routine whenever a command or data bit is set.

use std::sync::Arc;

use crossbeam_channel::bounded;
use tracing::{debug, error};

use stagewire_core::error::{ComponentError, CoreResult};

use crate::component::{process, wake, ComponentInner, WorkerHandle};

pub(crate) fn spawn(inner: Arc<ComponentInner>) -> CoreResult<WorkerHandle> {
    let (done_tx, done_rx) = bounded::<()>(1);
    let name = format!("stagewire-{}", inner.config.name);
    let join = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            debug!(worker = %name, "worker started");
            loop {
                let matched = match inner.wake.wait_any(wake::CMD | wake::DATA | wake::EXIT, None)
                {
                    Ok(matched) => matched,
                    Err(_) => break,
                };
                if matched & wake::EXIT != 0 {
                    break;
                }
                process::process_events(&inner);
            }
            debug!(worker = %name, "worker exiting");
            let _ = done_tx.send(());
        })
        .map_err(|source| {
            error!(%source, "failed to spawn component worker");
            ComponentError::InsufficientResources
        })?;
    Ok(WorkerHandle { join, done_rx })
}
