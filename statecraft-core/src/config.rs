//! Store configuration

use serde::Deserialize;

/// Options fixed at store construction.
///
/// Deserializable so hosts can keep them next to the rest of their config:
///
/// ```
/// use statecraft_core::StoreOptions;
///
/// let options: StoreOptions = serde_json::from_str(r#"{ "name": "session" }"#).unwrap();
/// assert!(options.skip_repeats);
/// assert_eq!(options.name.as_deref(), Some("session"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Append a structural-equality `skip_repeats` stage to every subscription
    pub skip_repeats: bool,
    /// Label used in log output
    pub name: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            skip_repeats: true,
            name: None,
        }
    }
}

impl StoreOptions {
    /// Default options with a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Set whether subscriptions deduplicate repeated states
    pub fn skip_repeats(mut self, skip_repeats: bool) -> Self {
        self.skip_repeats = skip_repeats;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StoreOptions::default();
        assert!(options.skip_repeats);
        assert!(options.name.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let options: StoreOptions = serde_json::from_str(r#"{ "skip_repeats": false }"#).unwrap();
        assert!(!options.skip_repeats);
        assert!(options.name.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let options = StoreOptions::named("cart").skip_repeats(false);
        assert_eq!(options.name.as_deref(), Some("cart"));
        assert!(!options.skip_repeats);
    }
}
