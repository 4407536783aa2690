//! Context enrichment for classified errors
//!
//! Augments a diagnostic context map with ambient environment data:
//! timestamp, client identity, location, session, an inferred feature tag,
//! a correlation id, and an uptime snapshot. Enrichment is non-destructive:
//! a key the caller already set is never overwritten.

use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Session lookup boundary. Ambient session storage (cookie jar, keychain,
/// whatever the host application uses) sits behind this.
pub trait SessionProvider: Send + Sync {
    fn session_id(&self) -> Option<String>;
}

impl<F> SessionProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn session_id(&self) -> Option<String> {
        self()
    }
}

/// Location-path prefixes mapped to feature tags, matched in order.
pub const DEFAULT_FEATURE_ROUTES: &[(&str, &str)] = &[
    ("/attractions", "attractions"),
    ("/cities", "cities"),
    ("/itineraries", "itineraries"),
    ("/search", "search"),
    ("/profile", "profile"),
    ("/auth", "auth"),
];

/// Non-destructive context enricher.
pub struct Enricher {
    client: String,
    location: Option<String>,
    session: Option<Box<dyn SessionProvider>>,
    feature_routes: Vec<(String, String)>,
    started_at: Instant,
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new()
    }
}

impl Enricher {
    pub fn new() -> Self {
        Self {
            client: format!(
                "{}/{} ({})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            ),
            location: None,
            session: None,
            feature_routes: DEFAULT_FEATURE_ROUTES
                .iter()
                .map(|(prefix, feature)| (prefix.to_string(), feature.to_string()))
                .collect(),
            started_at: Instant::now(),
        }
    }

    /// Override the client identity string.
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = client.into();
        self
    }

    /// Current location/URL, when the host runs in a UI context.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_session_provider(mut self, provider: impl SessionProvider + 'static) -> Self {
        self.session = Some(Box::new(provider));
        self
    }

    /// Replace the feature-route table used for `feature` inference.
    pub fn with_feature_routes(mut self, routes: Vec<(String, String)>) -> Self {
        self.feature_routes = routes;
        self
    }

    /// Enrich a context map. Existing keys always win; a caller-provided
    /// `feature` or `session_id` is never replaced.
    pub fn enrich(&self, mut context: Map<String, Value>) -> Map<String, Value> {
        insert_absent(
            &mut context,
            "timestamp",
            Value::String(Utc::now().to_rfc3339()),
        );
        insert_absent(&mut context, "client", Value::String(self.client.clone()));

        if let Some(location) = &self.location {
            insert_absent(&mut context, "location", Value::String(location.clone()));
            if let Some(feature) = self.infer_feature(location) {
                insert_absent(&mut context, "feature", Value::String(feature));
            }
        }

        if let Some(provider) = &self.session
            && let Some(session_id) = provider.session_id()
        {
            insert_absent(&mut context, "session_id", Value::String(session_id));
        }

        insert_absent(
            &mut context,
            "correlation_id",
            Value::String(Uuid::new_v4().to_string()),
        );
        insert_absent(
            &mut context,
            "uptime_ms",
            Value::from(self.started_at.elapsed().as_millis() as u64),
        );

        context
    }

    fn infer_feature(&self, location: &str) -> Option<String> {
        self.feature_routes
            .iter()
            .find(|(prefix, _)| location.contains(prefix.as_str()))
            .map(|(_, feature)| feature.clone())
    }
}

fn insert_absent(context: &mut Map<String, Value>, key: &str, value: Value) {
    if !context.contains_key(key) {
        context.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enrich_adds_ambient_keys() {
        let enricher = Enricher::new().with_location("https://example.com/cities/oslo");
        let ctx = enricher.enrich(Map::new());

        assert!(ctx.contains_key("timestamp"));
        assert!(ctx.contains_key("client"));
        assert!(ctx.contains_key("correlation_id"));
        assert!(ctx.contains_key("uptime_ms"));
        assert_eq!(ctx.get("feature"), Some(&json!("cities")));
    }

    #[test]
    fn test_enrich_never_overwrites_existing_keys() {
        let enricher = Enricher::new().with_location("https://example.com/attractions/1");
        let mut ctx = Map::new();
        ctx.insert("feature".to_string(), json!("checkout"));
        ctx.insert("correlation_id".to_string(), json!("abc-123"));

        let enriched = enricher.enrich(ctx);
        assert_eq!(enriched.get("feature"), Some(&json!("checkout")));
        assert_eq!(enriched.get("correlation_id"), Some(&json!("abc-123")));
    }

    #[test]
    fn test_session_provider_feeds_session_id() {
        let enricher =
            Enricher::new().with_session_provider(|| Some("session-42".to_string()));
        let ctx = enricher.enrich(Map::new());
        assert_eq!(ctx.get("session_id"), Some(&json!("session-42")));
    }

    #[test]
    fn test_no_feature_without_matching_route() {
        let enricher = Enricher::new().with_location("https://example.com/admin");
        let ctx = enricher.enrich(Map::new());
        assert!(!ctx.contains_key("feature"));
    }

    #[test]
    fn test_feature_route_prefix_matching_order() {
        let enricher = Enricher::new()
            .with_location("https://example.com/attractions/search")
            .with_feature_routes(vec![
                ("/attractions".to_string(), "attractions".to_string()),
                ("/search".to_string(), "search".to_string()),
            ]);
        let ctx = enricher.enrich(Map::new());
        assert_eq!(ctx.get("feature"), Some(&json!("attractions")));
    }
}
