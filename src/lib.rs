//! chatdeck: client-side chat session core.
//!
//! Owns the conversation threads of one chat surface, streams assistant
//! replies into them, and keeps them in line with the server.
//!
//! ```rust,ignore
//! let transport = Arc::new(HttpTransport::new(&config.api_url, config.api_token.clone())?);
//! let session = ChatSession::new(transport, Arc::new(LogNotifier), persistence, config.session_config());
//! session.load_threads().await?;
//! let outcome = session.send(SendRequest::new("Hello")).await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod persistence;
pub mod reconcile;
pub mod retry;
pub mod session;
pub mod status;
pub mod threads;
pub mod transport;

pub use error::{ChatError, TransportError};
pub use session::{ChatSession, SendOutcome, SendRequest, SessionConfig};
