//! # mlsdk-core
//!
//! Client library for recording analytics events (sessions, conversations,
//! turns, usage) to the Mindlytics backend without blocking the caller.
//!
//! This library provides:
//! - A session state machine that turns lifecycle calls into wire messages
//! - A per-session background worker delivering messages in order
//! - An HTTP transport with retry/backoff and normalized outcomes
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use mlsdk_core::{Client, ClientConfig, SessionConfig, TrackEvent};
//!
//! # async fn demo() -> mlsdk_core::Result<()> {
//! let client = Client::new(ClientConfig::new("ml_live_xxxx"))?;
//! let mut session = client.create_session(SessionConfig::new("my-project"))?;
//!
//! session.track_event(TrackEvent::new("signed_in").with_property("plan", "pro"))?;
//! session.end_session(None).await?;
//!
//! for outcome in session.errors() {
//!     eprintln!("delivery failed: {}", outcome.message);
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use client::Client;
pub use config::{ClientConfig, Config, SessionConfig};
pub use error::{Error, Result};
pub use session::{Session, SessionStart, SessionState};
pub use types::*;

// Public modules
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod session;
pub mod types;
