//! otalink-services — the transfer protocol roles and the storage they drive.
//!
//! Both roles are sans-IO: they consume decoded packets and hand back the
//! packet to transmit. Sockets, timers and process restarts belong to the
//! binaries.

pub mod receiver;
pub mod sender;
pub mod storage;

pub use receiver::{Receiver, Reply, TransferState};
pub use sender::{Sender, SenderConfig, SenderState, Step, TransferError};
pub use storage::{SinkError, SlotSink, StorageSink};
