//! The On-Demand Request Coordinator.

use crossbeam_channel::{bounded, Receiver, Sender};
use log::trace;

use crate::engine::Engine;
use crate::entry_point::{BuiltHandler, EntryPointKey, RebuildPriority};
use crate::error::RequestError;

pub struct BuiltHandlerRequest {
    pub key: EntryPointKey,
    pub respond: Sender<Result<BuiltHandler, RequestError>>,
}

impl BuiltHandlerRequest {
    /// Creates a request and its matching blocking receiver.
    pub fn new(key: EntryPointKey) -> (Self, Receiver<Result<BuiltHandler, RequestError>>) {
        let (tx, rx) = bounded(1);
        (BuiltHandlerRequest { key, respond: tx }, rx)
    }
}

impl Engine {
    pub(crate) fn on_get_built_handler(&mut self, req: BuiltHandlerRequest) {
        let key = req.key;
        let ep = match self.registries.entry_points.get_mut(&key) {
            Some(ep) => ep,
            None => {
                let _ = req.respond.send(Err(RequestError::UnknownEntryPoint {
                    src_path: key.src_path,
                    handler: key.handler,
                }));
                return;
            }
        };

        if !ep.is_building() && ep.rebuild_priority == RebuildPriority::Off {
            if let Some(artifact) = ep.out_artifact.clone() {
                trace!("getBuiltHandler({}): already clean", key_display(&key));
                let _ = req.respond.send(Ok(BuiltHandler { runtime: ep.runtime, artifact }));
                return;
            }
            // Not yet built even once (shouldn't happen post-`start`, but
            // fall through to queuing rather than panicking).
        }

        trace!("getBuiltHandler({}): dirty, elevating to HIGH and queuing waiter", key_display(&key));
        ep.raise_priority(RebuildPriority::High);
        ep.pending_requests.push_back(req.respond);
    }
}

fn key_display(key: &EntryPointKey) -> String {
    key.to_string()
}
