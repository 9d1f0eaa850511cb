use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Info,
    Warning,
    Campaign,
    Budget,
    Billing,
    Dashboard,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationTarget {
    Roles(Vec<String>),
    User(String),
}

impl NotificationTarget {
    /// Comma-joined form used by the CRM's `to` parameter.
    pub fn describe(&self) -> String {
        match self {
            NotificationTarget::Roles(roles) => roles.join(","),
            NotificationTarget::User(user) => user.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub target: NotificationTarget,
    pub related_entity_id: Option<String>,
    pub additional_data: Option<String>,
}

impl NotificationEvent {
    pub fn new(
        notification_type: NotificationType,
        target: NotificationTarget,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            notification_type,
            target,
            related_entity_id: None,
            additional_data: None,
        }
    }

    pub fn related_to(mut self, id: impl ToString) -> Self {
        self.related_entity_id = Some(id.to_string());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.additional_data = Some(data.into());
        self
    }

    /// Human-readable block relayed to the CRM.
    pub fn format_block(&self) -> String {
        let mut block = format!(
            "[{}] {}\n{}",
            self.notification_type, self.title, self.message
        );
        if let Some(id) = &self.related_entity_id {
            block.push_str(&format!("\nRelated: {}", id));
        }
        if let Some(data) = &self.additional_data {
            block.push_str(&format!("\nDetails: {}", data));
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_block_includes_optional_parts() {
        let event = NotificationEvent::new(
            NotificationType::Budget,
            NotificationTarget::User("42".to_string()),
            "Budget updated",
            "Budget raised to 1200.00",
        )
        .related_to(17)
        .with_data("factor=1.20");

        assert_eq!(
            event.format_block(),
            "[BUDGET] Budget updated\nBudget raised to 1200.00\nRelated: 17\nDetails: factor=1.20"
        );
    }

    #[test]
    fn test_format_block_minimal() {
        let event = NotificationEvent::new(
            NotificationType::Info,
            NotificationTarget::Roles(vec!["ADMIN".to_string()]),
            "Hello",
            "World",
        );
        assert_eq!(event.format_block(), "[INFO] Hello\nWorld");
        assert_eq!(event.target.describe(), "ADMIN");
    }
}
