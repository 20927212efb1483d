// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::Result;

use super::orchestrator::Orchestrator;
use super::{ControlEvent, Flow};

/// Control thread: feeds [`ControlEvent`]s to the [`Orchestrator`] one at a
/// time until it asks to exit.
pub struct Runtime {
    orchestrator: Orchestrator,
    event_rx: mpsc::UnboundedReceiver<ControlEvent>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(orchestrator: Orchestrator, event_rx: mpsc::UnboundedReceiver<ControlEvent>) -> Self {
        Self {
            orchestrator,
            event_rx,
        }
    }

    /// Main event loop.
    ///
    /// On exit the control queue is closed first, so worker steps still
    /// running see their posts fail and unwind, and then the worker is
    /// drained.
    pub async fn run(self) -> Result<()> {
        let Self {
            mut orchestrator,
            mut event_rx,
        } = self;

        info!("warden runtime started");
        orchestrator.show_running();

        loop {
            let event = match event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("control queue closed; exiting");
                    orchestrator.handle(ControlEvent::Destroy);
                    break;
                }
            };

            debug!(?event, "runtime received event");

            if orchestrator.handle(event) == Flow::Exit {
                info!("orchestrator requested exit; stopping runtime");
                break;
            }
        }

        drop(event_rx);
        orchestrator.shutdown().await;

        info!("runtime exiting");
        Ok(())
    }
}
