use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::directory::UserDirectory;
use crate::model::Booking;
use crate::notify::{Notice, Notifier};
use crate::observability;

use super::ServiceError;

pub const DEFAULT_URGE_COOLDOWN: Duration = Duration::from_secs(30 * 60);

const ADMIN_EMAIL_KEY: &str = "admin_email";

fn urge_key(booking: &Booking) -> String {
    format!("urge_{}", booking.id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrgeOutcome {
    Sent,
    Throttled,
}

impl UrgeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgeOutcome::Sent => "sent",
            UrgeOutcome::Throttled => "throttled",
        }
    }
}

/// Per-booking rate limit on reminder mails to the administrator.
pub struct UrgeThrottle {
    cache: Arc<dyn Cache>,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
    cooldown: Duration,
}

impl UrgeThrottle {
    pub fn new(
        cache: Arc<dyn Cache>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
        cooldown: Duration,
    ) -> Self {
        Self {
            cache,
            users,
            notifier,
            cooldown,
        }
    }

    /// Human-readable text for an outcome.
    pub fn message(&self, outcome: UrgeOutcome) -> String {
        match outcome {
            UrgeOutcome::Sent => "reminder sent to the administrator".to_string(),
            UrgeOutcome::Throttled => format!(
                "a booking can only be urged once every {} minutes",
                self.cooldown.as_secs() / 60
            ),
        }
    }

    /// Claim the cooldown slot for `booking`, then notify the administrator.
    ///
    /// The claim is a single conditional set, so concurrent calls for the same
    /// booking produce exactly one `Sent`. Delivery runs detached; its failure
    /// is logged and never reaches the caller.
    pub async fn urge(&self, booking: &Booking) -> Result<UrgeOutcome, ServiceError> {
        let key = urge_key(booking);
        if !self.cache.set_if_absent(&key, "1", Some(self.cooldown)).await? {
            metrics::counter!(observability::URGES_THROTTLED_TOTAL).increment(1);
            tracing::debug!("urge for booking {} throttled", booking.id);
            return Ok(UrgeOutcome::Throttled);
        }

        let to = match self.admin_email().await {
            Ok(to) => to,
            Err(e) => {
                // Nothing was sent, so give the slot back.
                if let Err(release) = self.cache.delete(&key).await {
                    tracing::warn!("cannot release urge claim {key}: {release}");
                }
                return Err(e);
            }
        };

        let notice = Notice {
            to,
            subject: "Meeting room booking reminder".to_string(),
            body: format!(
                "Booking {} for room {} ({} - {}) has been urged by its requester. Please process it as soon as possible.",
                booking.id, booking.room_id, booking.span.start, booking.span.end
            ),
        };
        let notifier = self.notifier.clone();
        let id = booking.id;
        tokio::spawn(async move {
            if let Err(e) = notifier.send(notice).await {
                metrics::counter!(observability::NOTIFY_FAILURES_TOTAL).increment(1);
                tracing::warn!("urge notification for booking {id} failed: {e}");
            }
        });

        metrics::counter!(observability::URGES_SENT_TOTAL).increment(1);
        tracing::info!("urge for booking {} dispatched", booking.id);
        Ok(UrgeOutcome::Sent)
    }

    /// Administrator address, memoized in the cache without expiry.
    async fn admin_email(&self) -> Result<String, ServiceError> {
        if let Some(email) = self.cache.get(ADMIN_EMAIL_KEY).await? {
            return Ok(email);
        }
        let admin = self
            .users
            .find_admin_user()
            .await
            .ok_or(ServiceError::AdminNotFound)?;
        self.cache.set(ADMIN_EMAIL_KEY, &admin.email, None).await?;
        Ok(admin.email)
    }
}
