use async_trait::async_trait;
use signoff_core::ports::{DomainEvent, EventPublisher, PublishError};
use tracing::info;

/// Publishes domain events onto the log stream. Stands in for a broker until
/// one is wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        let payload =
            serde_json::to_string(&event).map_err(|error| PublishError(error.to_string()))?;
        info!(
            event_name = event.name(),
            request_id = %event.request_id(),
            payload = %payload,
            "domain event published"
        );
        Ok(())
    }
}
