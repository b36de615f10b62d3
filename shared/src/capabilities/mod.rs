//! Shell-facing capabilities.
//!
//! Rendering uses Crux's built-in `Render`; remote operations and notifier
//! subscriptions are defined here.

mod remote;
mod watch;

pub use self::remote::{
    CaseData, FailureKind, RemoteFailure, RemoteOperation, RemoteOps, RemoteOutcome,
    RemotePayload, RemoteRequest, RequestKind,
};
pub use self::watch::{Watch, WatchOperation};

pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub remote: RemoteOps<Event>,
    pub watch: Watch<Event>,
}
