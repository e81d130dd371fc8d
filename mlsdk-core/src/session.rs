//! Session lifecycle and event recording
//!
//! A [`Session`] starts inert. [`Session::start_session`] assigns the session
//! id, spawns the delivery worker and enqueues `start_session`. Tracking calls
//! validate their input, auto-start the session if needed, build a
//! [`WireMessage`] and push it onto the queue without waiting for delivery.
//! [`Session::end_session`] closes any open conversation, enqueues
//! `end_session` and waits for the worker to drain.
//!
//! ```text
//! Inert --start_session--> Active --end_session--> Ended
//!                            |  ^
//!           start_conversation  end_conversation
//! ```
//!
//! Delivery failures never surface as errors here; inspect
//! [`Session::has_errors`] and [`Session::errors`] instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::delivery::message::{
    ConversationMessage, SessionMessage, TrackMessage, WireMessage, CONVERSATION_TURN_EVENT,
    CONVERSATION_USAGE_EVENT,
};
use crate::delivery::transport::Transport;
use crate::delivery::worker::{DeliveryWorker, Outbound};
use crate::error::{Error, Result};
use crate::logging::LogHandle;
use crate::types::{Attributes, DeliveryOutcome, Properties, TrackEvent, Turn, Usage};

/// Attribute key the user id is merged under
pub const USER_ID_ATTRIBUTE: &str = "user_id";

/// Lifecycle state of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no queue yet
    Inert,
    /// Queue and worker running
    Active,
    /// Drained and closed; cannot be restarted
    Ended,
}

/// Options for [`Session::start_session`]
#[derive(Debug, Clone, Default)]
pub struct SessionStart {
    /// Used only if the session has no id yet
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub attributes: Option<Attributes>,
}

/// A bounded period of analytics tracking
pub struct Session {
    session_id: Option<String>,
    project_id: String,
    user_id: Option<String>,
    attributes: Attributes,
    conversation_id: Option<String>,
    state: SessionState,
    worker: DeliveryWorker,
    root_log: LogHandle,
    log: LogHandle,
}

impl Session {
    /// Create an inert session
    ///
    /// Usually called through [`crate::Client::create_session`].
    pub fn new(
        project_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        max_pending: Option<usize>,
        log: LogHandle,
    ) -> Self {
        Self {
            session_id: None,
            project_id: project_id.into(),
            user_id: None,
            attributes: Attributes::new(),
            conversation_id: None,
            state: SessionState::Inert,
            worker: DeliveryWorker::new(transport, max_pending, log.clone()),
            root_log: log.clone(),
            log,
        }
    }

    pub(crate) fn preset(
        &mut self,
        session_id: Option<String>,
        user_id: Option<String>,
        attributes: Option<Attributes>,
    ) {
        self.session_id = session_id;
        self.user_id = user_id;
        if let Some(attributes) = attributes {
            self.attributes = attributes;
        }
    }

    // ============================================
    // Accessors
    // ============================================

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Currently open conversation, if any
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Whether a live delivery queue exists
    pub fn has_queue(&self) -> bool {
        self.worker.is_running()
    }

    /// Whether the worker task handle is held
    pub fn has_worker(&self) -> bool {
        self.worker.has_task()
    }

    /// Messages enqueued but not yet delivered
    pub fn pending_count(&self) -> usize {
        self.worker.pending_count()
    }

    /// Wait for every message enqueued so far, keeping the session open
    pub async fn flush(&self) {
        self.worker.flush().await;
    }

    pub fn has_errors(&self) -> bool {
        self.worker.error_count() > 0
    }

    /// Every delivery outcome so far, in delivery order
    pub fn history(&self) -> Vec<DeliveryOutcome> {
        self.worker.history()
    }

    /// Errored delivery outcomes, in delivery order
    pub fn errors(&self) -> Vec<DeliveryOutcome> {
        self.worker.errors()
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Start the session, or update its mutable fields if already active
    ///
    /// On an active session this updates project, user and attributes but
    /// does not enqueue a second `start_session` message.
    pub fn start_session(&mut self, options: SessionStart) -> Result<()> {
        if self.state == SessionState::Ended {
            return Err(Error::SessionEnded);
        }

        if let Some(project_id) = options.project_id {
            self.project_id = project_id;
        }
        if options.user_id.is_some() {
            self.user_id = options.user_id;
        }
        if let Some(attributes) = options.attributes {
            self.attributes.merge(attributes);
        }
        if let Some(user_id) = &self.user_id {
            if !self.attributes.contains_key(USER_ID_ATTRIBUTE) {
                self.attributes.insert(USER_ID_ATTRIBUTE, user_id.clone());
            }
        }

        if self.state == SessionState::Active {
            tracing::debug!(parent: self.log.span(), "Session already active, updated fields");
            return Ok(());
        }

        let session_id = match (&self.session_id, options.session_id) {
            (Some(assigned), _) => assigned.clone(),
            (None, Some(requested)) => requested,
            (None, None) => uuid::Uuid::new_v4().to_string(),
        };
        if session_id.is_empty() {
            return Err(Error::Config("session_id cannot be empty".to_string()));
        }
        self.session_id = Some(session_id.clone());

        // start message heads the queue and ignores the bound
        let message = WireMessage::StartSession(SessionMessage {
            timestamp: Utc::now(),
            session_id: session_id.clone(),
            attributes: self.attributes.clone(),
        });
        let start = self.outbound(&message)?;

        self.log = self.root_log.for_session(&session_id);
        self.worker.set_log(self.log.clone());
        self.worker.start()?;
        if let Err(e) = self.worker.enqueue_unbounded(start) {
            self.worker.close();
            return Err(e);
        }
        self.state = SessionState::Active;
        tracing::debug!(parent: self.log.span(), project_id = %self.project_id, "Session started");
        Ok(())
    }

    /// End the session and wait for every queued message to be delivered
    ///
    /// Closes an open conversation first. Does nothing if the session never
    /// started or has already ended.
    pub async fn end_session(&mut self, attributes: Option<Attributes>) -> Result<()> {
        if self.state != SessionState::Active {
            return Ok(());
        }
        if let Some(attributes) = attributes {
            self.attributes.merge(attributes);
        }

        let closing = self.enqueue_closing();
        self.worker.shutdown().await;
        self.state = SessionState::Ended;
        tracing::debug!(
            parent: self.log.span(),
            delivered = self.worker.history().len(),
            errors = self.worker.error_count(),
            "Session ended"
        );
        closing
    }

    /// Enqueue the implicit conversation end and the session end
    fn enqueue_closing(&mut self) -> Result<()> {
        let session_id = self.require_session_id()?;

        if let Some(conversation_id) = self.conversation_id.take() {
            let message = WireMessage::EndConversation(ConversationMessage {
                timestamp: Utc::now(),
                session_id: session_id.clone(),
                conversation_id,
                properties: Properties::new(),
            });
            self.worker.enqueue_unbounded(self.outbound(&message)?)?;
        }

        let message = WireMessage::EndSession(SessionMessage {
            timestamp: Utc::now(),
            session_id,
            attributes: self.attributes.clone(),
        });
        self.worker.enqueue_unbounded(self.outbound(&message)?)
    }

    /// Run `body` inside a started session, ending it afterwards
    ///
    /// The session is ended whether `body` succeeds or fails, so queued
    /// messages are always drained. An error from `body` takes precedence
    /// over one from ending the session.
    ///
    /// ```rust,no_run
    /// # use mlsdk_core::{Client, ClientConfig, SessionConfig, TrackEvent};
    /// # async fn demo() -> mlsdk_core::Result<()> {
    /// let client = Client::new(ClientConfig::new("ml_live_key"))?;
    /// let mut session = client.create_session(SessionConfig::new("project"))?;
    /// session
    ///     .scoped(|s| {
    ///         Box::pin(async move {
    ///             s.track_event(TrackEvent::new("signed_in"))?;
    ///             Ok::<_, mlsdk_core::Error>(())
    ///         })
    ///     })
    ///     .await?;
    /// assert!(!session.has_errors());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scoped<F, T, E>(&mut self, body: F) -> std::result::Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, std::result::Result<T, E>>,
        E: From<Error>,
    {
        self.start_session(SessionStart::default())?;
        let result = body(&mut *self).await;
        let closed = self.end_session(None).await;
        let value = result?;
        closed?;
        Ok(value)
    }

    // ============================================
    // Conversations
    // ============================================

    /// Open a conversation, returning its id
    ///
    /// If one is already open its id is reused and another start message is
    /// enqueued for it.
    pub fn start_conversation(&mut self, properties: Properties) -> Result<String> {
        properties.validate()?;
        self.ensure_started()?;
        let session_id = self.require_session_id()?;

        let conversation_id = self
            .conversation_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        let message = WireMessage::StartConversation(ConversationMessage {
            timestamp: Utc::now(),
            session_id,
            conversation_id: conversation_id.clone(),
            properties,
        });
        self.enqueue(&message)?;
        Ok(conversation_id)
    }

    /// Close the open conversation; no-op when none is open
    pub fn end_conversation(&mut self, properties: Properties) -> Result<()> {
        if self.state != SessionState::Active || self.conversation_id.is_none() {
            return Ok(());
        }
        properties.validate()?;
        let session_id = self.require_session_id()?;
        let conversation_id = self.conversation_id.clone().unwrap_or_default();

        let message = WireMessage::EndConversation(ConversationMessage {
            timestamp: Utc::now(),
            session_id,
            conversation_id,
            properties,
        });
        self.enqueue(&message)?;
        self.conversation_id = None;
        Ok(())
    }

    // ============================================
    // Events
    // ============================================

    /// Record a user-defined event
    ///
    /// Validation runs before anything is enqueued, including the implicit
    /// session start.
    pub fn track_event(&mut self, event: TrackEvent) -> Result<()> {
        event.validate()?;
        self.track(
            event.event,
            event.properties,
            event.timestamp,
            event.conversation_id,
        )
    }

    /// Record one user/assistant exchange
    pub fn track_turn(&mut self, turn: Turn) -> Result<()> {
        let timestamp = turn.timestamp;
        let conversation_id = turn.conversation_id.clone();
        let properties = turn.into_properties()?;
        properties.validate()?;
        self.track(
            CONVERSATION_TURN_EVENT.to_string(),
            properties,
            timestamp,
            conversation_id,
        )
    }

    /// Record model usage or cost for a conversation
    pub fn track_usage(&mut self, usage: Usage) -> Result<()> {
        let properties = usage.to_properties();
        properties.validate()?;
        self.track(
            CONVERSATION_USAGE_EVENT.to_string(),
            properties,
            usage.timestamp,
            usage.conversation_id,
        )
    }

    fn track(
        &mut self,
        event: String,
        properties: Properties,
        timestamp: Option<DateTime<Utc>>,
        conversation_id: Option<String>,
    ) -> Result<()> {
        self.ensure_started()?;
        let session_id = self.require_session_id()?;

        let message = WireMessage::Track(TrackMessage {
            timestamp: timestamp.unwrap_or_else(Utc::now),
            session_id,
            conversation_id: conversation_id.or_else(|| self.conversation_id.clone()),
            event,
            properties,
        });
        self.enqueue(&message)
    }

    /// Send an arbitrary JSON payload through the delivery queue
    ///
    /// Requires a started session; the payload is not validated.
    pub fn enqueue_raw(&self, payload: serde_json::Value) -> Result<()> {
        self.worker.enqueue(Outbound {
            app_id: self.project_id.clone(),
            body: payload,
        })
    }

    /// Queue a marker that passes through the worker without being sent
    pub fn enqueue_marker(&self, payload: serde_json::Value) -> Result<()> {
        self.worker.enqueue_marker(payload)
    }

    // ============================================
    // Internals
    // ============================================

    fn ensure_started(&mut self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Inert => self.start_session(SessionStart::default()),
            SessionState::Ended => Err(Error::SessionEnded),
        }
    }

    fn require_session_id(&self) -> Result<String> {
        self.session_id.clone().ok_or(Error::NotStarted)
    }

    fn outbound(&self, message: &WireMessage) -> Result<Outbound> {
        Ok(Outbound {
            app_id: self.project_id.clone(),
            body: message.to_value()?,
        })
    }

    fn enqueue(&self, message: &WireMessage) -> Result<()> {
        if self.log.is_debug() {
            tracing::debug!(
                parent: self.log.span(),
                kind = message.kind(),
                event = message.event().unwrap_or_default(),
                "Enqueueing message"
            );
        }
        self.worker.enqueue(self.outbound(message)?)
    }
}

impl Drop for Session {
    /// Close an active session without waiting
    ///
    /// The closing messages and the sentinel are queued; the detached worker
    /// keeps draining on the runtime.
    fn drop(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        tracing::warn!(
            parent: self.log.span(),
            pending = self.worker.pending_count(),
            "Session dropped while active, closing in the background"
        );
        if let Err(e) = self.enqueue_closing() {
            tracing::warn!(parent: self.log.span(), error = %e, "Failed to enqueue session end");
        }
        self.worker.close();
    }
}
