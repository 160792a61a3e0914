//! Retention policy per memory layer.

use crate::model::MemoryLayer;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Default time-to-live for each non-permanent layer, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPolicy {
    pub ephemeral_secs: u64,
    pub session_secs: u64,
    pub short_term_secs: u64,
    pub long_term_secs: u64,
}

impl Default for LayerPolicy {
    fn default() -> Self {
        Self {
            ephemeral_secs: 5 * MINUTE,
            session_secs: 4 * HOUR,
            short_term_secs: 7 * DAY,
            long_term_secs: 90 * DAY,
        }
    }
}

impl LayerPolicy {
    /// Default TTL for `layer`; `None` means the layer never expires.
    pub fn ttl_secs(&self, layer: MemoryLayer) -> Option<u64> {
        match layer {
            MemoryLayer::Ephemeral => Some(self.ephemeral_secs),
            MemoryLayer::Session => Some(self.session_secs),
            MemoryLayer::ShortTerm => Some(self.short_term_secs),
            MemoryLayer::LongTerm => Some(self.long_term_secs),
            MemoryLayer::Permanent => None,
        }
    }

    /// Compute `expires_at` for a write at `now`.
    ///
    /// An explicit TTL wins over the layer default, including on the
    /// permanent layer. Zero seconds yields an entry that is already expired.
    pub fn expires_at(
        &self,
        layer: MemoryLayer,
        now: DateTime<Utc>,
        explicit_secs: Option<u64>,
    ) -> Option<DateTime<Utc>> {
        let secs = explicit_secs.or_else(|| self.ttl_secs(layer))?;
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        let ttl = Duration::try_seconds(secs).unwrap_or(Duration::MAX);
        Some(now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

#[cfg(test)]
mod tests {
    use super::LayerPolicy;
    use crate::model::MemoryLayer;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    #[test]
    fn permanent_layer_has_no_default_expiry() {
        let policy = LayerPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.expires_at(MemoryLayer::Permanent, now, None), None);
        assert_eq!(
            policy.expires_at(MemoryLayer::Session, now, None),
            Some(now + Duration::hours(4))
        );
    }

    #[test]
    fn explicit_ttl_overrides_layer_default() {
        let policy = LayerPolicy::default();
        let now = Utc::now();
        assert_eq!(
            policy.expires_at(MemoryLayer::LongTerm, now, Some(10)),
            Some(now + Duration::seconds(10))
        );
        assert_eq!(
            policy.expires_at(MemoryLayer::Permanent, now, Some(0)),
            Some(now)
        );
    }

    #[test]
    fn huge_ttl_saturates_instead_of_overflowing() {
        let policy = LayerPolicy::default();
        let expires = policy
            .expires_at(MemoryLayer::Ephemeral, Utc::now(), Some(u64::MAX))
            .expect("expiry");
        assert!(expires > Utc::now());
    }
}
