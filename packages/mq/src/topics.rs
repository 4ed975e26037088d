/// Builds every topic the orchestrator speaks, under a configurable prefix.
///
/// Layout (prefix `bots`):
/// - work queue:    `bots/queue/<vendor>`        (QoS 1, non-retained)
/// - queue wildcard: `bots/queue/+`
/// - dead letter:   `bots/dlq/<vendor>`          (QoS 1, non-retained)
/// - DLQ wildcard:  `bots/dlq/#`
/// - client status: `bots/clients/status`        (retained, LWT)
/// - heartbeat:     `bots/heartbeat`             (QoS 0)
///
/// Shared subscriptions wrap any of these as `$share/<group>/<topic>`.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    prefix: String,
}

impl TopicScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Work queue for one vendor.
    pub fn queue(&self, vendor: &str) -> String {
        format!("{}/queue/{}", self.prefix, vendor)
    }

    /// Single-level wildcard over every vendor queue.
    pub fn queue_wildcard(&self) -> String {
        format!("{}/queue/+", self.prefix)
    }

    /// Dead-letter queue for one vendor.
    pub fn dlq(&self, vendor: &str) -> String {
        format!("{}/dlq/{}", self.prefix, vendor)
    }

    /// Multi-level wildcard over every DLQ topic.
    pub fn dlq_wildcard(&self) -> String {
        format!("{}/dlq/#", self.prefix)
    }

    /// Shared-subscription form: the broker delivers each message to exactly
    /// one subscriber within `group`.
    pub fn shared(&self, group: &str, topic: &str) -> String {
        format!("$share/{}/{}", group, topic)
    }

    /// Retained client status topic (also the Last-Will target).
    pub fn status(&self) -> String {
        format!("{}/clients/status", self.prefix)
    }

    /// QoS-0 heartbeat topic used by the health probe.
    pub fn heartbeat(&self) -> String {
        format!("{}/heartbeat", self.prefix)
    }

    /// Vendor token from a queue or DLQ topic's trailing segment.
    pub fn vendor_from_topic<'t>(&self, topic: &'t str) -> Option<&'t str> {
        topic.rsplit('/').next().filter(|s| !s.is_empty())
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("bots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_topics() {
        let t = TopicScheme::default();
        assert_eq!(t.queue("hdi"), "bots/queue/hdi");
        assert_eq!(t.queue_wildcard(), "bots/queue/+");
    }

    #[test]
    fn test_dlq_topics() {
        let t = TopicScheme::default();
        assert_eq!(t.dlq("sura"), "bots/dlq/sura");
        assert_eq!(t.dlq_wildcard(), "bots/dlq/#");
    }

    #[test]
    fn test_shared_subscription_form() {
        let t = TopicScheme::default();
        assert_eq!(
            t.shared("workers", &t.queue_wildcard()),
            "$share/workers/bots/queue/+"
        );
        assert_eq!(
            t.shared("workers-hdi", &t.queue("hdi")),
            "$share/workers-hdi/bots/queue/hdi"
        );
    }

    #[test]
    fn test_status_and_heartbeat() {
        let t = TopicScheme::default();
        assert_eq!(t.status(), "bots/clients/status");
        assert_eq!(t.heartbeat(), "bots/heartbeat");
    }

    #[test]
    fn test_custom_prefix() {
        let t = TopicScheme::new("staging");
        assert_eq!(t.queue("axa"), "staging/queue/axa");
        assert_eq!(t.status(), "staging/clients/status");
    }

    #[test]
    fn test_vendor_extraction() {
        let t = TopicScheme::default();
        assert_eq!(t.vendor_from_topic("bots/queue/hdi"), Some("hdi"));
        assert_eq!(t.vendor_from_topic("bots/dlq/sbs"), Some("sbs"));
        assert_eq!(t.vendor_from_topic("bots/queue/"), None);
    }
}
