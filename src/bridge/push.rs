use super::message::PushMessage;
use super::transport::{Endpoint, Subscription, Transport};
use crate::config::SourceConfig;
use std::sync::Arc;

/// Uncorrelated host-to-extension stream. Every host-tagged message on the
/// push channel reaches the handler in transport order; filtering by session
/// state is left to the consumer.
pub struct PushChannel;

impl PushChannel {
    pub fn listen(
        transport: Arc<dyn Transport>,
        channel: &str,
        sources: &SourceConfig,
        handler: impl Fn(PushMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let endpoint = Endpoint::new(
            transport,
            sources.content_source.clone(),
            sources.host_source.clone(),
        );
        let channel_name = channel.to_string();
        tracing::debug!("listening for pushes on {}", channel);

        endpoint.subscribe(channel, move |detail| {
            match serde_json::from_value::<PushMessage>(detail.clone()) {
                Ok(push) => handler(push),
                Err(e) => tracing::warn!("ignoring malformed push on {}: {}", channel_name, e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::transport::PageWindow;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_push_delivered_in_order_until_unsubscribed() {
        let window = PageWindow::new();
        let sources = SourceConfig::default();
        let host = Endpoint::new(window.clone(), "schema-editor-host", "schema-editor-content");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut sub = PushChannel::listen(window.clone(), "SCHEMA_PUSH", &sources, move |push| {
            sink.lock().unwrap().push(push);
        });

        host.send("SCHEMA_PUSH", json!({"data": "A", "params": "p"}));
        host.send("SCHEMA_PUSH", json!({"success": false}));
        host.send("SCHEMA_PUSH", json!([1, 2]));
        sub.unsubscribe();
        host.send("SCHEMA_PUSH", json!({"data": "C"}));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].data, Some(json!("A")));
        assert_eq!(seen[0].params.as_deref(), Some("p"));
        assert!(!seen[1].success);
        assert!(seen[1].data.is_none());
    }

    #[test]
    fn test_push_from_content_side_is_not_delivered() {
        let window = PageWindow::new();
        let sources = SourceConfig::default();
        let echo = Endpoint::new(window.clone(), "schema-editor-content", "schema-editor-host");

        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let _sub = PushChannel::listen(window.clone(), "SCHEMA_PUSH", &sources, move |_| {
            *sink.lock().unwrap() += 1;
        });

        echo.send("SCHEMA_PUSH", json!({"data": "A"}));
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
