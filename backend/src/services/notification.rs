//! Notification sender.
//!
//! An in-process event handler that turns workflow and leave events into
//! emails. Rendering is intentionally minimal; templating belongs to an
//! external collaborator. Deliveries are idempotent per `event_id` on the
//! consumer side: the SMTP relay sees at most one message per event because
//! the handler runs from the dispatcher, which marks rows processed in the
//! same transaction as the fan-out.

use crate::config::Config;
use crate::services::events::{pattern_matches, EventEnvelope, EventHandler};
use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};

pub struct NotificationService {
    mailer: SmtpTransport,
    from_address: String,
    skip_send: bool,
}

impl NotificationService {
    pub fn new(config: &Config) -> Result<Self> {
        let mailer = SmtpTransport::builder_dangerous(&config.smtp_host)
            .port(config.smtp_port)
            .build();
        Ok(Self {
            mailer,
            from_address: config.smtp_from_address.clone(),
            skip_send: config.smtp_skip_send,
        })
    }

    fn subject_line(event_name: &str) -> String {
        match event_name {
            "leave.approved" => "Your leave request was approved".to_string(),
            "leave.rejected" => "Your leave request was rejected".to_string(),
            "workflow.task_created" => "An approval is waiting for you".to_string(),
            "workflow.task_sla_warning" => "Approval deadline approaching".to_string(),
            "workflow.task_escalated" => "An approval was escalated to you".to_string(),
            "attendance.regularized" => "Your attendance correction was applied".to_string(),
            other => format!("Update: {}", other),
        }
    }

    fn send(&self, to_email: &str, subject: &str, body: String) -> Result<()> {
        if self.skip_send {
            tracing::debug!(to = to_email, subject = subject, "notification send skipped");
            return Ok(());
        }
        let email = Message::builder()
            .from(self.from_address.parse()?)
            .to(to_email.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;
        self.mailer.send(&email)?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for NotificationService {
    fn name(&self) -> &'static str {
        "notification_sender"
    }

    fn handles(&self, event_name: &str) -> bool {
        pattern_matches("notification.*", event_name)
            || pattern_matches("leave.*", event_name)
            || pattern_matches("workflow.*", event_name)
            || pattern_matches("attendance.*", event_name)
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        // Events without a recipient in the payload are observability-only.
        let Some(to_email) = envelope.payload.get("notify_email").and_then(|v| v.as_str())
        else {
            return Ok(());
        };
        let subject = Self::subject_line(&envelope.event_name);
        let body = format!(
            "Event: {}\nReference: {}/{}\n\nThis is an automated notification.\n",
            envelope.event_name, envelope.aggregate_type, envelope.aggregate_id
        );
        self.send(to_email, &subject, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_subscribes_to_the_expected_patterns() {
        let service = NotificationService::new(&Config::for_tests()).unwrap();
        assert!(service.handles("leave.approved"));
        assert!(service.handles("workflow.task_escalated"));
        assert!(service.handles("notification.queued"));
        assert!(!service.handles("payroll.run_paid"));
    }

    #[tokio::test]
    async fn events_without_recipients_are_ignored() {
        let service = NotificationService::new(&Config::for_tests()).unwrap();
        let envelope = EventEnvelope {
            event_id: crate::types::EventId::new(),
            event_name: "leave.approved".to_string(),
            organization_id: crate::types::OrganizationId::new(),
            aggregate_type: "leave_request".to_string(),
            aggregate_id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            payload: serde_json::json!({}),
            metadata: serde_json::json!({}),
        };
        assert!(service.handle(&envelope).await.is_ok());
    }
}
