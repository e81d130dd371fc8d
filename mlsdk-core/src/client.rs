//! Entry point for applications
//!
//! A [`Client`] holds the configuration and one shared [`Transport`]; it
//! outlives the sessions it creates.

use std::sync::Arc;

use crate::config::{ClientConfig, SessionConfig};
use crate::delivery::transport::{HttpTransport, Transport};
use crate::error::{Error, Result};
use crate::logging::LogHandle;
use crate::session::Session;

/// Client for the Mindlytics analytics service
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    log: LogHandle,
}

impl Client {
    /// Create a client that delivers over HTTP
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let log = LogHandle::new(config.debug);
        let transport = HttpTransport::new(&config, log.for_component("transport"))?;
        tracing::debug!(
            parent: log.span(),
            endpoint = %transport.base_url(),
            "Client initialized"
        );
        Ok(Self {
            config,
            transport: Arc::new(transport),
            log,
        })
    }

    /// Create a client with a caller-supplied transport
    ///
    /// The configuration is validated the same way as in [`Client::new`].
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let log = LogHandle::new(config.debug);
        Ok(Self {
            config,
            transport,
            log,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create an inert session
    ///
    /// The project falls back to the client's default; having neither is an
    /// error.
    pub fn create_session(&self, config: SessionConfig) -> Result<Session> {
        let project_id = config
            .project_id
            .or_else(|| self.config.project_id.clone())
            .ok_or_else(|| Error::Config("project_id is required to create a session".to_string()))?;

        if config.session_id.as_deref() == Some("") {
            return Err(Error::Config("session_id cannot be empty".to_string()));
        }

        let mut session = Session::new(
            project_id,
            Arc::clone(&self.transport),
            self.config.max_pending,
            self.log.clone(),
        );
        session.preset(config.session_id, config.user_id, config.attributes);
        Ok(session)
    }
}
