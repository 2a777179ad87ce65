//! Feature state events.
//!
//! Every store shares the manager's [`EventDispatcher`]. Events are fanned out
//! over a `tokio::sync::broadcast` channel; dispatching with no subscriber is
//! a no-op. Scopes appear by their serialized key.

use serde_json::Value;
use tokio::sync::broadcast;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Signals emitted by stores and drivers.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureEvent {
    /// A value was returned to a caller.
    FeatureRetrieved {
        feature: String,
        scope: String,
        value: Value,
    },

    /// A resolver ran and its value was stored.
    FeatureResolved {
        feature: String,
        scope: String,
        value: Value,
    },

    /// A feature without a resolver was checked.
    UnknownFeatureResolved { feature: String, scope: String },

    /// A feature type was defined on first use.
    DynamicallyRegisteringFeature { class: String },

    FeatureUpdated {
        feature: String,
        scope: String,
        value: Value,
    },

    FeatureUpdatedForAllScopes { feature: String, value: Value },

    FeatureDeleted { feature: String, scope: String },

    FeaturesPurged { features: Vec<String> },

    AllFeaturesPurged,
}

impl FeatureEvent {
    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FeatureRetrieved { .. } => "feature_retrieved",
            Self::FeatureResolved { .. } => "feature_resolved",
            Self::UnknownFeatureResolved { .. } => "unknown_feature_resolved",
            Self::DynamicallyRegisteringFeature { .. } => "dynamically_registering_feature",
            Self::FeatureUpdated { .. } => "feature_updated",
            Self::FeatureUpdatedForAllScopes { .. } => "feature_updated_for_all_scopes",
            Self::FeatureDeleted { .. } => "feature_deleted",
            Self::FeaturesPurged { .. } => "features_purged",
            Self::AllFeaturesPurged => "all_features_purged",
        }
    }
}

/// Broadcasts [`FeatureEvent`]s to subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<FeatureEvent>,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeatureEvent> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, event: FeatureEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_without_subscribers() {
        let events = EventDispatcher::default();
        events.dispatch(FeatureEvent::AllFeaturesPurged);
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_events() {
        let events = EventDispatcher::new(8);
        let mut receiver = events.subscribe();

        events.dispatch(FeatureEvent::FeatureDeleted {
            feature: "foo".to_string(),
            scope: "null".to_string(),
        });

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.name(), "feature_deleted");
        assert!(receiver.try_recv().is_err());
    }
}
