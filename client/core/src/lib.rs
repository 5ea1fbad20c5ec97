//! Chatstream Core - Streaming Response Protocol Handler
//!
//! This crate delivers a user's message to a remote generation service and
//! reassembles the answer, which arrives as an ordered sequence of partial
//! fragments over one of two competing transports. It is completely
//! independent of any UI: presentation consumes a reactive message list and a
//! "can submit" flag, nothing else.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ConversationDriver                        │
//! │   messages · history window (50) · single-flight gate        │
//! └───────────────┬──────────────────────────────▲───────────────┘
//!          submit │                              │ SessionUpdate
//! ┌───────────────▼──────────────────────────────┴───────────────┐
//! │                       StreamSession                           │
//! │        try push ──(unavailable / open failed)──> pull         │
//! │                           │                                   │
//! │                  FragmentAssembler                            │
//! │           append (push) · replace (pull)                      │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │                              │
//!        ┌────────▼────────┐            ┌────────▼────────┐
//!        │  PushTransport  │            │  PullTransport  │
//!        │   (WebSocket)   │            │ (HTTP stream)   │
//!        └─────────────────┘            └─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use chatstream_core::{config::load_config, ConversationDriver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let mut driver = ConversationDriver::from_config(&config)?;
//!
//!     driver.submit("Summarize today's headlines")?;
//!     while !driver.can_send() {
//!         driver.next_update().await;
//!     }
//!     println!("{}", driver.messages()[1].content);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`messages`]: Message model exposed to presentation
//! - [`error`]: Failure taxonomy and user-facing notices
//! - [`turn`]: Outbound turn parameters and envelopes
//! - [`transport`]: Push and pull transports
//! - [`streaming`]: Fragment assembler and stream session
//! - [`driver`]: Conversation driver
//! - [`config`]: TOML/env/CLI configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod driver;
pub mod error;
pub mod messages;
pub mod streaming;
pub mod transport;
pub mod turn;

pub use driver::{ConversationDriver, ConversationView, SubmitError, TurnProgress};
pub use error::{classify_message, classify_transport, FailureKind, Locale, NoticeCatalog};
pub use messages::{
    ConversationId, HistoryEntry, Message, MessageId, MessageRole, MessageStatus, Source,
    StreamId,
};
pub use streaming::{
    Applied, AssemblerState, AssemblyMode, FragmentAssembler, Outcome, SessionUpdate,
    StreamSession, TransportSet,
};
pub use transport::{
    Fragment, FragmentKind, PullConfig, PullTransport, PushConfig, PushTransport, StreamHandle,
    TransportChannel, TransportError, TransportKind,
};
pub use turn::{PromptCard, TurnRequest};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ConfigError,
    ConfigOverrides, ConfigSource, ConversationConfig,
};
