use serde::Deserialize;
use std::time::Duration;

/// Options of a nested-attributes association.
///
/// Built with chainable setters, or deserialized from JSON where every key is
/// optional:
///
/// ```
/// use nestsync::ReconcileConfig;
///
/// let config = ReconcileConfig::new().limit(50).reject_if_all_blank(true);
/// assert_eq!(config.limit, Some(50));
///
/// let from_json: ReconcileConfig = serde_json::from_str(r#"{"allow_destroy": false}"#).unwrap();
/// assert!(!from_json.allow_destroy);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Honour the removal flag. When off, a matched entry is always an update.
    pub allow_destroy: bool,

    /// Maximum number of entries accepted in one batch
    pub limit: Option<usize>,

    /// Drop identity-less rows whose fields are all blank before planning
    pub reject_if_all_blank: bool,

    /// How long a save waits for another save on the same parent
    #[serde(with = "millis")]
    pub lock_timeout: Duration,

    /// Field carrying the child identity in raw attribute maps
    pub id_field: String,

    /// Field carrying the removal flag in raw attribute maps
    pub destroy_field: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileConfig {
    pub fn new() -> Self {
        Self {
            allow_destroy: true,
            limit: None,
            reject_if_all_blank: false,
            lock_timeout: Duration::from_secs(5),
            id_field: "id".to_string(),
            destroy_field: "_destroy".to_string(),
        }
    }

    pub fn allow_destroy(mut self, allow: bool) -> Self {
        self.allow_destroy = allow;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reject_if_all_blank(mut self, reject: bool) -> Self {
        self.reject_if_all_blank = reject;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn id_field(mut self, field: &str) -> Self {
        self.id_field = field.to_string();
        self
    }

    pub fn destroy_field(mut self, field: &str) -> Self {
        self.destroy_field = field.to_string();
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
