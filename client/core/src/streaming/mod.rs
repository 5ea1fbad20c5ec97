//! Streaming Infrastructure
//!
//! Per-turn reassembly and orchestration:
//!
//! ```text
//!  StreamSession ── open ──> PushTransport ─┐
//!       │   └──── fallback ─> PullTransport ─┤ Fragments
//!       │                                    ▼
//!       │                           FragmentAssembler
//!       │                                    │
//!       └───────── SessionUpdate <───────────┘
//! ```
//!
//! The session task owns the transport handle. The assembler is shared with
//! the driver so cancellation can settle it synchronously.

mod assembler;
mod session;

pub use assembler::{Applied, AssemblerState, AssemblyMode, FragmentAssembler, Outcome};
pub use session::{SessionUpdate, SharedAssembler, StreamSession, TransportSet};
