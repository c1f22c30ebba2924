//! MQTT topic definitions

/// MQTT topic patterns
pub struct Topics;

impl Topics {
    /// Subscription filter for the job topic.
    ///
    /// With a share group, the broker balances jobs across every worker in the
    /// group instead of delivering each job to all of them.
    pub fn job_subscription(job_topic: &str, share_group: Option<&str>) -> String {
        match share_group.filter(|g| !g.is_empty()) {
            Some(group) => format!("$share/{}/{}", group, job_topic),
            None => job_topic.to_string(),
        }
    }

    /// Check a topic name is usable for publishing and subscribing
    pub fn is_valid_topic(topic: &str) -> bool {
        !topic.is_empty()
            && !topic.starts_with('$')
            && !topic.contains(['+', '#', '\0'])
    }
}
