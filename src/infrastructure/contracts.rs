use crate::domain::{
    AssembledDashboard, BillingRequest, ClickEvent, DashboardGenerationRequest, NotificationEvent,
};
use crate::infrastructure::broker::{destinations, QueueMessage};

impl QueueMessage for ClickEvent {
    const DESTINATION: &'static str = destinations::GEO_PROCESSING;
    const TYPE_ID: &'static str = "ClickEvent";
}

impl QueueMessage for BillingRequest {
    const DESTINATION: &'static str = destinations::BILLING_PROCESSING;
    const TYPE_ID: &'static str = "BillingRequest";
}

impl QueueMessage for DashboardGenerationRequest {
    const DESTINATION: &'static str = destinations::DASHBOARD_GENERATION;
    const TYPE_ID: &'static str = "DashboardGenerationRequest";
}

impl QueueMessage for AssembledDashboard {
    const DESTINATION: &'static str = destinations::DASHBOARD_SAVE;
    const TYPE_ID: &'static str = "AssembledDashboard";
}

impl QueueMessage for NotificationEvent {
    const DESTINATION: &'static str = destinations::NOTIFICATION;
    const TYPE_ID: &'static str = "NotificationEvent";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broker::{BrokerMessage, DeliveryTag, Headers, TYPE_HEADER};

    fn message(type_id: &str, payload: &str) -> BrokerMessage {
        let mut headers = Headers::new();
        headers.insert(TYPE_HEADER.to_string(), type_id.to_string());
        BrokerMessage {
            id: "m-1".to_string(),
            destination: destinations::GEO_PROCESSING.to_string(),
            headers,
            payload: payload.as_bytes().to_vec(),
            delivery: DeliveryTag::Memory(0),
        }
    }

    #[test]
    fn test_click_event_wire_format() {
        let msg = message(
            "ClickEvent",
            r#"{"ip":"8.8.8.8","referralHash":"abc","campaignId":7}"#,
        );
        let event: ClickEvent = msg.decode().unwrap();
        assert_eq!(event.ip, "8.8.8.8");
        assert_eq!(event.referral_hash.as_deref(), Some("abc"));
        assert_eq!(event.campaign_id, Some(7));
    }

    #[test]
    fn test_decode_rejects_foreign_type() {
        let msg = message("BillingRequest", r#"{"ip":"8.8.8.8"}"#);
        assert!(msg.decode::<ClickEvent>().is_err());
    }

    #[test]
    fn test_each_contract_has_its_own_queue() {
        let mut queues = vec![
            ClickEvent::DESTINATION,
            BillingRequest::DESTINATION,
            DashboardGenerationRequest::DESTINATION,
            AssembledDashboard::DESTINATION,
            NotificationEvent::DESTINATION,
        ];
        queues.sort();
        queues.dedup();
        assert_eq!(queues.len(), destinations::ALL.len());
    }
}
