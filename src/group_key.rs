use std::fmt;

/// Destination identity of a record: records with equal keys share an open
/// batch and travel in the same `put_logs` call.
///
/// Topic, source and shard hash may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    project: String,
    log_store: String,
    topic: String,
    source: String,
    shard_hash: String,
}

impl GroupKey {
    pub fn new(
        project: impl Into<String>,
        log_store: impl Into<String>,
        topic: impl Into<String>,
        source: impl Into<String>,
        shard_hash: impl Into<String>,
    ) -> Self {
        GroupKey {
            project: project.into(),
            log_store: log_store.into(),
            topic: topic.into(),
            source: source.into(),
            shard_hash: shard_hash.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn log_store(&self) -> &str {
        &self.log_store
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn shard_hash(&self) -> &str {
        &self.shard_hash
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.project, self.log_store, self.topic, self.source, self.shard_hash
        )
    }
}
