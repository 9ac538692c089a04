/// A destination subscription retained for replay after reconnect.
///
/// `headers` is the full SUBSCRIBE header set, destination and ack mode
/// included, so replay can resend the frame exactly as originally issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Local subscription id; defaults to the destination when the caller
    /// did not pick one.
    pub id: String,
    pub destination: String,
    pub headers: Vec<(String, String)>,
}

impl Subscription {
    /// The ack mode requested at subscribe time ("auto" when unspecified).
    pub fn ack_mode(&self) -> &str {
        self.headers
            .iter()
            .find(|(k, _)| k == "ack")
            .map(|(_, v)| v.as_str())
            .unwrap_or("auto")
    }
}

/// Registry of active subscriptions, keyed by id and kept in original
/// subscribe order so replay after a reconnect matches the order the
/// application subscribed in.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    /// Record a subscription. Re-subscribing under an existing id replaces
    /// the entry in place, keeping its original replay position.
    pub(crate) fn insert(&mut self, subscription: Subscription) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == subscription.id) {
            *existing = subscription;
        } else {
            self.entries.push(subscription);
        }
    }

    pub(crate) fn remove(&mut self, id: &str) {
        self.entries.retain(|e| e.id != id);
    }

    /// First subscription registered for a destination, if any.
    pub(crate) fn find_by_destination(&self, destination: &str) -> Option<&Subscription> {
        self.entries.iter().find(|e| e.destination == destination)
    }

    /// Entries in original subscribe order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: &str, destination: &str, ack: Option<&str>) -> Subscription {
        let mut headers = vec![("destination".to_string(), destination.to_string())];
        if let Some(mode) = ack {
            headers.push(("ack".to_string(), mode.to_string()));
        }
        Subscription {
            id: id.to_string(),
            destination: destination.to_string(),
            headers,
        }
    }

    #[test]
    fn replay_order_matches_subscribe_order() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(sub("/queue/b", "/queue/b", None));
        registry.insert(sub("/queue/a", "/queue/a", None));
        registry.insert(sub("/queue/c", "/queue/c", None));
        let order: Vec<&str> = registry.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["/queue/b", "/queue/a", "/queue/c"]);
    }

    #[test]
    fn reinsert_keeps_original_position() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(sub("one", "/queue/one", None));
        registry.insert(sub("two", "/queue/two", None));
        registry.insert(sub("one", "/queue/one", Some("client")));
        let order: Vec<&str> = registry.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["one", "two"]);
        assert_eq!(
            registry.find_by_destination("/queue/one").unwrap().ack_mode(),
            "client"
        );
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(sub("/queue/x", "/queue/x", None));
        registry.remove("/queue/x");
        assert!(registry.iter().next().is_none());
        assert!(registry.find_by_destination("/queue/x").is_none());
    }

    #[test]
    fn ack_mode_defaults_to_auto() {
        assert_eq!(sub("s", "/queue/s", None).ack_mode(), "auto");
        assert_eq!(sub("s", "/queue/s", Some("client")).ack_mode(), "client");
    }
}
