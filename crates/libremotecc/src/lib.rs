pub mod broker;
pub mod classifier;
pub mod coalesce;
pub mod error;
pub mod extract;
pub mod hub;
pub mod output;
pub mod pty;
pub mod strip;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use broker::{ClientId, Outbound};
pub use classifier::StateClassifier;
pub use coalesce::{CoalescerConfig, FrameCoalescer};
pub use error::RelayError;
pub use extract::extract;
pub use hub::{ClientRegistration, Hub, HubConfig, NoMirror, OutputMirror, SessionPhase};
pub use output::OutputBacklog;
pub use pty::{CommandSpec, NativeSpawner, PtyEvent, PtyExit, Spawner};
