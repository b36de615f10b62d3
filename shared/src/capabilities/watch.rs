//! Subscriptions to the shell's notifiers.
//!
//! Notifiers are shared across cases. The shell answers subscriptions by
//! sending `Event::FolderChanged` and `Event::JobListUpdated` until the
//! matching unsubscribe arrives.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::event::RemotePath;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchOperation {
    WatchFolder { path: RemotePath },
    UnwatchFolder { path: RemotePath },
    WatchJobs,
    UnwatchJobs,
}

impl Operation for WatchOperation {
    type Output = ();
}

pub struct Watch<Ev> {
    context: CapabilityContext<WatchOperation, Ev>,
}

impl<Ev> Capability<Ev> for Watch<Ev> {
    type Operation = WatchOperation;
    type MappedSelf<MappedEv> = Watch<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Watch::new(self.context.map_event(f))
    }
}

impl<Ev> Watch<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<WatchOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn watch_folder(&self, path: RemotePath) {
        self.notify(WatchOperation::WatchFolder { path });
    }

    pub fn unwatch_folder(&self, path: RemotePath) {
        self.notify(WatchOperation::UnwatchFolder { path });
    }

    pub fn watch_jobs(&self) {
        self.notify(WatchOperation::WatchJobs);
    }

    pub fn unwatch_jobs(&self) {
        self.notify(WatchOperation::UnwatchJobs);
    }

    fn notify(&self, operation: WatchOperation) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(operation).await;
        });
    }
}
