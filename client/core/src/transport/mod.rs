//! Transport Layer
//!
//! Two competing paths to the generation service:
//!
//! - [`PushTransport`]: persistent WebSocket, delta chunks, shared by all turns
//! - [`PullTransport`]: one HTTP event-stream request per turn, cumulative chunks
//!
//! Both implement [`TransportChannel`] and produce [`Fragment`]s.

pub mod config;
pub mod frame;
pub mod pull;
pub mod push;
pub mod traits;

pub use config::{PullConfig, PushConfig};
pub use frame::{Fragment, FragmentKind, LineDecoder, PushFrame};
pub use pull::PullTransport;
pub use push::PushTransport;
pub use traits::{FrameResult, StreamHandle, TransportChannel, TransportError, TransportKind};
