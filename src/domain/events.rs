//! Domain Events
//!
//! Immutable records of storage and calculation occurrences, published for
//! audit logging and for tests that observe evictions.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::file_evicted(&OwnerScope::Guest, &hash, 300);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::model::{CalculationConfig, ComputationId, ContentHash, OwnerScope};

/// Domain event representing a significant occurrence in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // File Events
    // =========================================================================
    /// A file was stored (or an identical one was reused).
    FileStored {
        scope: String,
        content_hash: String,
        size_bytes: u64,
        deduplicated: bool,
        timestamp: DateTime<Utc>,
    },

    /// A guest file was evicted to make room.
    FileEvicted {
        scope: String,
        content_hash: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// A file was deleted by its owner.
    FileDeleted {
        scope: String,
        content_hash: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Computation Events
    // =========================================================================
    /// A computation set was created.
    ComputationCreated {
        computation_id: String,
        scope: String,
        file_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// One configuration of a computation finished.
    CalculationCompleted {
        computation_id: String,
        config: String,
        computed: usize,
        cached: usize,
        failed: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A guest computation was evicted to make room.
    ComputationEvicted {
        computation_id: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// A computation was deleted by its owner.
    ComputationDeleted {
        computation_id: String,
        records_released: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::FileStored { timestamp, .. }
            | DomainEvent::FileEvicted { timestamp, .. }
            | DomainEvent::FileDeleted { timestamp, .. }
            | DomainEvent::ComputationCreated { timestamp, .. }
            | DomainEvent::CalculationCompleted { timestamp, .. }
            | DomainEvent::ComputationEvicted { timestamp, .. }
            | DomainEvent::ComputationDeleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::FileStored { .. } => "FileStored",
            DomainEvent::FileEvicted { .. } => "FileEvicted",
            DomainEvent::FileDeleted { .. } => "FileDeleted",
            DomainEvent::ComputationCreated { .. } => "ComputationCreated",
            DomainEvent::CalculationCompleted { .. } => "CalculationCompleted",
            DomainEvent::ComputationEvicted { .. } => "ComputationEvicted",
            DomainEvent::ComputationDeleted { .. } => "ComputationDeleted",
        }
    }

    /// Get the computation id if applicable.
    pub fn computation_id(&self) -> Option<&str> {
        match self {
            DomainEvent::ComputationCreated { computation_id, .. }
            | DomainEvent::CalculationCompleted { computation_id, .. }
            | DomainEvent::ComputationEvicted { computation_id, .. }
            | DomainEvent::ComputationDeleted { computation_id, .. } => Some(computation_id),
            _ => None,
        }
    }

    /// Get the content hash if applicable.
    pub fn content_hash(&self) -> Option<&str> {
        match self {
            DomainEvent::FileStored { content_hash, .. }
            | DomainEvent::FileEvicted { content_hash, .. }
            | DomainEvent::FileDeleted { content_hash, .. } => Some(content_hash),
            _ => None,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    pub fn file_stored(scope: &OwnerScope, hash: &ContentHash, size_bytes: u64, deduplicated: bool) -> Self {
        DomainEvent::FileStored {
            scope: scope.to_string(),
            content_hash: hash.to_string(),
            size_bytes,
            deduplicated,
            timestamp: Utc::now(),
        }
    }

    pub fn file_evicted(scope: &OwnerScope, hash: &ContentHash, size_bytes: u64) -> Self {
        DomainEvent::FileEvicted {
            scope: scope.to_string(),
            content_hash: hash.to_string(),
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    pub fn file_deleted(scope: &OwnerScope, hash: &ContentHash) -> Self {
        DomainEvent::FileDeleted {
            scope: scope.to_string(),
            content_hash: hash.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn computation_created(id: &ComputationId, scope: &OwnerScope, file_count: usize) -> Self {
        DomainEvent::ComputationCreated {
            computation_id: id.to_string(),
            scope: scope.to_string(),
            file_count,
            timestamp: Utc::now(),
        }
    }

    pub fn calculation_completed(
        id: &ComputationId,
        config: &CalculationConfig,
        computed: usize,
        cached: usize,
        failed: usize,
        duration: Duration,
    ) -> Self {
        DomainEvent::CalculationCompleted {
            computation_id: id.to_string(),
            config: config.to_string(),
            computed,
            cached,
            failed,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn computation_evicted(id: &ComputationId, size_bytes: u64) -> Self {
        DomainEvent::ComputationEvicted {
            computation_id: id.to_string(),
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    pub fn computation_deleted(id: &ComputationId, records_released: usize) -> Self {
        DomainEvent::ComputationDeleted {
            computation_id: id.to_string(),
            records_released,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> ContentHash {
        ContentHash::parse(&"f".repeat(64)).unwrap()
    }

    #[test]
    fn test_event_serialization() {
        let event = DomainEvent::file_stored(&OwnerScope::Guest, &hash(), 300, false);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("FileStored"));
        assert!(json.contains("guest"));

        let deserialized: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "FileStored");
    }

    #[test]
    fn test_accessors() {
        let id = ComputationId::new();
        let event = DomainEvent::computation_evicted(&id, 4096);
        assert_eq!(event.computation_id(), Some(id.to_string().as_str()));
        assert_eq!(event.content_hash(), None);

        let event = DomainEvent::file_evicted(&OwnerScope::Guest, &hash(), 10);
        assert_eq!(event.content_hash(), Some(hash().as_str()));
    }

    #[test]
    fn test_timestamp() {
        let before = Utc::now();
        let event = DomainEvent::computation_created(&ComputationId::new(), &OwnerScope::Guest, 3);
        let after = Utc::now();

        assert!(event.timestamp() >= before);
        assert!(event.timestamp() <= after);
    }

    #[test]
    fn test_calculation_completed() {
        let event = DomainEvent::calculation_completed(
            &ComputationId::new(),
            &CalculationConfig::with_parameters("eem", "p1"),
            3,
            2,
            1,
            Duration::from_millis(150),
        );
        assert_eq!(event.event_type(), "CalculationCompleted");
        match event {
            DomainEvent::CalculationCompleted { config, duration_ms, .. } => {
                assert_eq!(config, "eem/p1");
                assert_eq!(duration_ms, 150);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
