// Use cases layer: match protocol, reconciliation and the connection flow.

pub mod flow;
pub mod protocol;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod snapshot;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use flow::{ConnectionFlow, FlowSettings};
pub use protocol::{ListenerId, MatchProtocol, ProtocolEvent, ProtocolListener};
pub use queue::{ActionResult, DrainReport, MainThreadQueue, PendingAction};
pub use reconcile::{EntityAction, EntityEvent, EntityReconciler, RemoteEntities, RemoteEntity};
pub use registry::{HandlerResult, OpcodeHandler, OpcodeRegistry, Registered};
pub use snapshot::{DECODE_ORDER, DecodeStrategy, NormalizedSnapshot, SnapshotShape};
pub use sync::{MatchSync, SyncContext, SyncSettings, TickReport};
