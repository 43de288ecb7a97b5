//! Realtime Notification Pipeline.
//!
//! Observes the donation-insert and NGO-verification feeds for exactly one
//! activation (bounded by an `Authenticated` session), correlates each event
//! against the signed-in identity, and emits transient notifications to a
//! display sink. Subscription handles live and die with the activation;
//! they are never reused across identities.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fundtracker_types::events::{DonationInserted, NgoUpdated, Notification, Severity};
use fundtracker_types::models::{AppRole, Identity};

use crate::dispatcher::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The store answered but the row is gone.
    #[error("row not found")]
    NotFound,
    #[error("lookup failed: {0}")]
    Transient(String),
}

/// Result of the one-hop project -> owning-NGO join the donation feed's
/// payload does not carry directly.
#[derive(Debug, Clone)]
pub struct ProjectOwner {
    pub ngo_id: Uuid,
    pub project_name: String,
}

/// Repository seam for the correlation lookups, decoupling the pipeline from
/// the shape of any particular query response.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn ngo_for_project(&self, project_id: Uuid)
    -> Result<Option<ProjectOwner>, LookupError>;

    async fn ngo_owned_by(&self, user_id: Uuid) -> Result<Option<Uuid>, LookupError>;
}

/// Display surface the pipeline emits into. The surface owns queuing,
/// stacking, and dismissal.
pub trait NotificationSink: Send + Sync {
    fn display(&self, notification: Notification);
}

/// Handle for one activation. Dropping it (or calling `deactivate`) releases
/// both feed subscriptions and suppresses any in-flight correlation.
pub struct PipelineHandle {
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Release both subscription handles and stop correlating. Waits for the
    /// worker to wind down so no handle outlives the activation.
    pub async fn deactivate(mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Activate the pipeline for an authenticated identity. Resolves the owned
/// NGO once, up front — the cache is valid for the duration of this
/// activation only (an operator whose NGO changes mid-session will not see
/// the cache refresh until the next activation).
pub async fn activate(
    identity: &Identity,
    role: AppRole,
    dispatcher: &Dispatcher,
    directory: Arc<dyn ProjectDirectory>,
    sink: Arc<dyn NotificationSink>,
) -> PipelineHandle {
    let owned_ngo = if role == AppRole::Ngo {
        match directory.ngo_owned_by(identity.user_id).await {
            Ok(owned) => owned,
            Err(e) => {
                warn!("Could not resolve owned NGO for {}: {}", identity.user_id, e);
                None
            }
        }
    } else {
        None
    };

    let mut donations_rx = dispatcher.subscribe_donations();
    let mut ngos_rx = dispatcher.subscribe_ngo_updates();

    let active = Arc::new(AtomicBool::new(true));
    let worker_active = active.clone();
    let user_id = identity.user_id;

    info!(
        "Notification pipeline activated for {} (role {}, owned NGO {:?})",
        user_id, role, owned_ngo
    );

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = donations_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Donation feed lagged by {} events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    let notification =
                        correlate_donation(role, owned_ngo, &event, directory.as_ref()).await;
                    // The lookup suspends; a deactivation may have landed
                    // while it was in flight.
                    if !worker_active.load(Ordering::Acquire) {
                        break;
                    }
                    if let Some(n) = notification {
                        sink.display(n);
                    }
                }
                result = ngos_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Verification feed lagged by {} events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if !worker_active.load(Ordering::Acquire) {
                        break;
                    }
                    if let Some(n) = correlate_verification(role, user_id, &event) {
                        sink.display(n);
                    }
                }
            }
        }
    });

    PipelineHandle {
        active,
        task: Some(task),
    }
}

/// Donation inserts only concern an operator whose NGO owns the target
/// project. A failed or empty lookup is "no match", never a surfaced error.
async fn correlate_donation(
    role: AppRole,
    owned_ngo: Option<Uuid>,
    event: &DonationInserted,
    directory: &dyn ProjectDirectory,
) -> Option<Notification> {
    if role != AppRole::Ngo {
        return None;
    }
    let owned_ngo = owned_ngo?;

    match directory.ngo_for_project(event.project_id).await {
        Ok(Some(owner)) if owner.ngo_id == owned_ngo => Some(Notification {
            severity: Severity::Success,
            title: "New donation received".into(),
            description: format!(
                "\u{20b9}{} donated to \"{}\"",
                event.amount, owner.project_name
            ),
        }),
        Ok(_) => None,
        Err(e) => {
            debug!(
                "Suppressing donation notification, project {} lookup failed: {}",
                event.project_id, e
            );
            None
        }
    }
}

/// Verification-flag transitions: owners hear about their own NGO in both
/// directions; admins get a low-urgency note on any NGO becoming verified.
fn correlate_verification(
    role: AppRole,
    user_id: Uuid,
    event: &NgoUpdated,
) -> Option<Notification> {
    let was = event.old.is_verified;
    let now = event.new.is_verified;

    if role == AppRole::Ngo && event.new.owner_id == user_id {
        if !was && now {
            return Some(Notification {
                severity: Severity::Success,
                title: "NGO verified".into(),
                description: format!(
                    "Your NGO \"{}\" has been verified. You can now receive donations.",
                    event.new.name
                ),
            });
        }
        if was && !now {
            return Some(Notification {
                severity: Severity::Urgent,
                title: "Verification revoked".into(),
                description: format!(
                    "Verification for your NGO \"{}\" has been revoked.",
                    event.new.name
                ),
            });
        }
        return None;
    }

    if role == AppRole::Admin && !was && now {
        return Some(Notification {
            severity: Severity::Info,
            title: "NGO verified".into(),
            description: format!(
                "\"{}\" is now verified and can receive donations.",
                event.new.name
            ),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use chrono::Utc;
    use fundtracker_types::events::NgoState;
    use tokio::sync::Notify;

    struct MapDirectory {
        projects: HashMap<Uuid, ProjectOwner>,
        owners: HashMap<Uuid, Uuid>,
        fail_project_lookup: bool,
        gate: Option<Arc<Notify>>,
    }

    impl MapDirectory {
        fn new() -> Self {
            Self {
                projects: HashMap::new(),
                owners: HashMap::new(),
                fail_project_lookup: false,
                gate: None,
            }
        }
    }

    #[async_trait]
    impl ProjectDirectory for MapDirectory {
        async fn ngo_for_project(
            &self,
            project_id: Uuid,
        ) -> Result<Option<ProjectOwner>, LookupError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_project_lookup {
                return Err(LookupError::Transient("store offline".into()));
            }
            Ok(self.projects.get(&project_id).cloned())
        }

        async fn ngo_owned_by(&self, user_id: Uuid) -> Result<Option<Uuid>, LookupError> {
            Ok(self.owners.get(&user_id).copied())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<Notification>>,
    }

    impl NotificationSink for RecordingSink {
        fn display(&self, notification: Notification) {
            self.seen.lock().unwrap().push(notification);
        }
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
        fn last(&self) -> Option<Notification> {
            self.seen.lock().unwrap().last().cloned()
        }
    }

    fn donation(project_id: Uuid, amount: i64) -> DonationInserted {
        DonationInserted {
            id: Uuid::new_v4(),
            project_id,
            donor_id: None,
            amount,
            created_at: Utc::now(),
        }
    }

    fn verification_flip(ngo_id: Uuid, owner_id: Uuid, was: bool, now: bool) -> NgoUpdated {
        let state = |verified| NgoState {
            id: ngo_id,
            owner_id,
            name: "Clean Water Trust".into(),
            is_verified: verified,
        };
        NgoUpdated {
            old: state(was),
            new: state(now),
        }
    }

    fn operator(user_id: Uuid) -> Identity {
        Identity {
            user_id,
            email: "op@example.org".into(),
        }
    }

    async fn settle() {
        // Broadcast delivery plus correlation runs on the spawned worker.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn donation_for_owned_project_notifies_once() {
        let owner_id = Uuid::new_v4();
        let ngo_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();

        let mut directory = MapDirectory::new();
        directory.owners.insert(owner_id, ngo_id);
        directory.projects.insert(
            project_id,
            ProjectOwner {
                ngo_id,
                project_name: "Well Drilling".into(),
            },
        );

        let dispatcher = Dispatcher::new();
        let sink = Arc::new(RecordingSink::default());
        let handle = activate(
            &operator(owner_id),
            AppRole::Ngo,
            &dispatcher,
            Arc::new(directory),
            sink.clone(),
        )
        .await;

        dispatcher.publish_donation(donation(project_id, 1500));
        settle().await;

        assert_eq!(sink.count(), 1);
        let n = sink.last().unwrap();
        assert_eq!(n.severity, Severity::Success);
        assert!(n.description.contains("Well Drilling"));
        assert!(n.description.contains("1500"));

        handle.deactivate().await;
    }

    #[tokio::test]
    async fn donation_for_unrelated_project_is_silent() {
        let owner_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();

        let mut directory = MapDirectory::new();
        directory.owners.insert(owner_id, Uuid::new_v4());
        directory.projects.insert(
            project_id,
            ProjectOwner {
                ngo_id: Uuid::new_v4(), // someone else's NGO
                project_name: "Other Project".into(),
            },
        );

        let dispatcher = Dispatcher::new();
        let sink = Arc::new(RecordingSink::default());
        let handle = activate(
            &operator(owner_id),
            AppRole::Ngo,
            &dispatcher,
            Arc::new(directory),
            sink.clone(),
        )
        .await;

        dispatcher.publish_donation(donation(project_id, 900));
        settle().await;

        assert_eq!(sink.count(), 0);
        handle.deactivate().await;
    }

    #[tokio::test]
    async fn failed_lookup_downgrades_to_no_match() {
        let owner_id = Uuid::new_v4();
        let mut directory = MapDirectory::new();
        directory.owners.insert(owner_id, Uuid::new_v4());
        directory.fail_project_lookup = true;

        let dispatcher = Dispatcher::new();
        let sink = Arc::new(RecordingSink::default());
        let handle = activate(
            &operator(owner_id),
            AppRole::Ngo,
            &dispatcher,
            Arc::new(directory),
            sink.clone(),
        )
        .await;

        dispatcher.publish_donation(donation(Uuid::new_v4(), 100));
        settle().await;

        assert_eq!(sink.count(), 0);
        handle.deactivate().await;
    }

    #[tokio::test]
    async fn verification_transitions_route_by_role_and_ownership() {
        let owner_id = Uuid::new_v4();
        let ngo_id = Uuid::new_v4();

        // Owner: verified.
        let event = verification_flip(ngo_id, owner_id, false, true);
        let n = correlate_verification(AppRole::Ngo, owner_id, &event).unwrap();
        assert_eq!(n.severity, Severity::Success);

        // Owner: revoked, higher urgency.
        let event = verification_flip(ngo_id, owner_id, true, false);
        let n = correlate_verification(AppRole::Ngo, owner_id, &event).unwrap();
        assert_eq!(n.severity, Severity::Urgent);

        // Admin: informational on any NGO becoming verified.
        let event = verification_flip(ngo_id, owner_id, false, true);
        let n = correlate_verification(AppRole::Admin, Uuid::new_v4(), &event).unwrap();
        assert_eq!(n.severity, Severity::Info);

        // Admin does not hear about revocations.
        let event = verification_flip(ngo_id, owner_id, true, false);
        assert!(correlate_verification(AppRole::Admin, Uuid::new_v4(), &event).is_none());

        // Unrelated operator hears nothing.
        let event = verification_flip(ngo_id, owner_id, false, true);
        assert!(correlate_verification(AppRole::Ngo, Uuid::new_v4(), &event).is_none());

        // No-op update (flag unchanged) is silent even for the owner.
        let event = verification_flip(ngo_id, owner_id, true, true);
        assert!(correlate_verification(AppRole::Ngo, owner_id, &event).is_none());

        // Donors are never an interested party here.
        let event = verification_flip(ngo_id, owner_id, false, true);
        assert!(correlate_verification(AppRole::Donor, owner_id, &event).is_none());
    }

    #[tokio::test]
    async fn repeated_events_are_not_deduplicated() {
        let owner_id = Uuid::new_v4();
        let ngo_id = Uuid::new_v4();

        let mut directory = MapDirectory::new();
        directory.owners.insert(owner_id, ngo_id);

        let dispatcher = Dispatcher::new();
        let sink = Arc::new(RecordingSink::default());
        let handle = activate(
            &operator(owner_id),
            AppRole::Ngo,
            &dispatcher,
            Arc::new(directory),
            sink.clone(),
        )
        .await;

        let event = verification_flip(ngo_id, owner_id, false, true);
        dispatcher.publish_ngo_update(event.clone());
        dispatcher.publish_ngo_update(event);
        settle().await;

        assert_eq!(sink.count(), 2);
        handle.deactivate().await;
    }

    #[tokio::test]
    async fn deactivation_releases_both_subscriptions() {
        let dispatcher = Dispatcher::new();
        let sink = Arc::new(RecordingSink::default());
        let directory = Arc::new(MapDirectory::new());

        let first = activate(
            &operator(Uuid::new_v4()),
            AppRole::Donor,
            &dispatcher,
            directory.clone(),
            sink.clone(),
        )
        .await;
        assert_eq!(dispatcher.donation_subscriber_count(), 1);
        assert_eq!(dispatcher.ngo_subscriber_count(), 1);

        first.deactivate().await;
        assert_eq!(dispatcher.donation_subscriber_count(), 0);
        assert_eq!(dispatcher.ngo_subscriber_count(), 0);

        // Reactivation under a new identity opens fresh handles; never more
        // than one per feed per activation.
        let second = activate(
            &operator(Uuid::new_v4()),
            AppRole::Donor,
            &dispatcher,
            directory,
            sink,
        )
        .await;
        assert_eq!(dispatcher.donation_subscriber_count(), 1);
        assert_eq!(dispatcher.ngo_subscriber_count(), 1);
        second.deactivate().await;
    }

    #[tokio::test]
    async fn no_notification_after_deactivation() {
        let owner_id = Uuid::new_v4();
        let ngo_id = Uuid::new_v4();

        let mut directory = MapDirectory::new();
        directory.owners.insert(owner_id, ngo_id);

        let dispatcher = Dispatcher::new();
        let sink = Arc::new(RecordingSink::default());
        let handle = activate(
            &operator(owner_id),
            AppRole::Ngo,
            &dispatcher,
            Arc::new(directory),
            sink.clone(),
        )
        .await;

        handle.deactivate().await;

        // A matching event arriving after sign-out reaches nobody.
        dispatcher.publish_ngo_update(verification_flip(ngo_id, owner_id, false, true));
        settle().await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn in_flight_lookup_is_dropped_on_deactivation() {
        let owner_id = Uuid::new_v4();
        let ngo_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let gate = Arc::new(Notify::new());

        let mut directory = MapDirectory::new();
        directory.owners.insert(owner_id, ngo_id);
        directory.projects.insert(
            project_id,
            ProjectOwner {
                ngo_id,
                project_name: "Well Drilling".into(),
            },
        );
        directory.gate = Some(gate.clone());

        let dispatcher = Dispatcher::new();
        let sink = Arc::new(RecordingSink::default());
        let handle = activate(
            &operator(owner_id),
            AppRole::Ngo,
            &dispatcher,
            Arc::new(directory),
            sink.clone(),
        )
        .await;

        // The correlation lookup parks on the gate; deactivate while it is
        // in flight, then let it complete.
        dispatcher.publish_donation(donation(project_id, 1500));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.deactivate().await;
        gate.notify_one();
        settle().await;

        assert_eq!(sink.count(), 0);
    }
}
