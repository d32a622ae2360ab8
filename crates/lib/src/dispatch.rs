//! Action dispatch: for a qualifying message, place the call and post the webhook.
//!
//! Both actions run concurrently and each captures its own result, so a failure or
//! timeout in one never prevents or cancels the other. Nothing here is retried and no
//! error escapes to the stream consumer.

use crate::ami::{ActionAck, AmiClient, AmiError, OriginateRequest, Originator};
use crate::config::{CallSettings, Settings};
use crate::ntfy::InboundMessage;
use crate::webhook::{HttpWebhook, WebhookError, WebhookSender};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Ami(#[from] AmiError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error("action timed out after {0:?}")]
    TimedOut(Duration),
}

/// Result of one action within a dispatch.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The action is not configured.
    Skipped,
    Completed(T),
    Failed(ActionError),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped)
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DispatchReport {
    pub call: Outcome<ActionAck>,
    pub webhook: Outcome<()>,
}

impl DispatchReport {
    /// True if no configured action failed.
    pub fn all_ok(&self) -> bool {
        self.call.error().is_none() && self.webhook.error().is_none()
    }
}

/// Fires the configured actions for a message.
pub struct Dispatcher {
    originator: Option<Arc<dyn Originator>>,
    webhook: Option<Arc<dyn WebhookSender>>,
    call: CallSettings,
    action_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        originator: Option<Arc<dyn Originator>>,
        webhook: Option<Arc<dyn WebhookSender>>,
        call: CallSettings,
        action_timeout: Duration,
    ) -> Self {
        Self {
            originator,
            webhook,
            call,
            action_timeout,
        }
    }

    /// AMI client and HTTP webhook as configured in settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let originator = settings
            .ami
            .as_ref()
            .map(|ami| Arc::new(AmiClient::new(ami)) as Arc<dyn Originator>);
        let webhook = settings
            .webhook
            .as_ref()
            .map(|w| Arc::new(HttpWebhook::new(w)) as Arc<dyn WebhookSender>);
        Self::new(
            originator,
            webhook,
            settings.call.clone(),
            settings.bridge.dispatch_timeout,
        )
    }

    /// Run both actions for `msg`. Never fails; outcomes are logged and reported.
    pub async fn dispatch(&self, msg: &InboundMessage) -> DispatchReport {
        let call = async {
            let Some(ref originator) = self.originator else {
                return Outcome::Skipped;
            };
            let request = OriginateRequest::from_settings(&self.call);
            log::info!(
                "priority {} alert; placing call to {}",
                msg.priority,
                request.channel
            );
            bounded(self.action_timeout, originator.originate(&request)).await
        };
        let webhook = async {
            let Some(ref sender) = self.webhook else {
                return Outcome::Skipped;
            };
            bounded(self.action_timeout, sender.send(msg)).await
        };
        let (call, webhook) = tokio::join!(call, webhook);

        match &call {
            Outcome::Completed(ack) => log::info!("originate accepted ({})", ack.action_id),
            Outcome::Failed(e) => log::warn!("AMI originate failed: {}", e),
            Outcome::Skipped => {}
        }
        match &webhook {
            Outcome::Completed(()) => log::info!("webhook delivered"),
            Outcome::Failed(e) => log::warn!("webhook failed: {}", e),
            Outcome::Skipped => {}
        }
        DispatchReport { call, webhook }
    }
}

async fn bounded<T, E, F>(limit: Duration, action: F) -> Outcome<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ActionError>,
{
    match tokio::time::timeout(limit, action).await {
        Err(_) => Outcome::Failed(ActionError::TimedOut(limit)),
        Ok(Err(e)) => Outcome::Failed(e.into()),
        Ok(Ok(v)) => Outcome::Completed(v),
    }
}
