//! Inbound cloud command routing

use serde_json::Value;

/// What an inbound topic asks the device to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `…/thing/service/property/set`
    PropertySet,
    /// `…/rrpc/request/{msg_id}`
    Rrpc { msg_id: String },
    /// `…/thing/service/{service}`
    Service { service: String },
    /// `/ota/device/upgrade/…` or `…/ota/firmware/get_reply`
    Ota,
    Unknown,
}

impl Command {
    pub fn route(topic: &str) -> Command {
        if topic.ends_with("/property/set") {
            return Command::PropertySet;
        }
        if topic.contains("/rrpc/request/") {
            return Command::Rrpc {
                msg_id: last_segment(topic).to_string(),
            };
        }
        if topic.contains("/thing/service/") {
            return Command::Service {
                service: last_segment(topic).to_string(),
            };
        }
        if topic.starts_with("/ota/device/upgrade/") || topic.ends_with("/ota/firmware/get_reply") {
            return Command::Ota;
        }
        Command::Unknown
    }
}

fn last_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// Message id of a request payload; numeric ids are echoed as text
pub fn message_id(payload: &Value) -> String {
    match payload.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_property_set() {
        assert_eq!(
            Command::route("/sys/pk/dev/thing/service/property/set"),
            Command::PropertySet
        );
    }

    #[test]
    fn test_route_rrpc_extracts_msg_id() {
        assert_eq!(
            Command::route("/sys/pk/dev/rrpc/request/1544352711"),
            Command::Rrpc {
                msg_id: "1544352711".to_string()
            }
        );
    }

    #[test]
    fn test_route_service_extracts_name() {
        assert_eq!(
            Command::route("/sys/pk/dev/thing/service/reboot"),
            Command::Service {
                service: "reboot".to_string()
            }
        );
    }

    #[test]
    fn test_route_ota_topics() {
        assert_eq!(Command::route("/ota/device/upgrade/pk/dev"), Command::Ota);
        assert_eq!(
            Command::route("/sys/pk/dev/thing/ota/firmware/get_reply"),
            Command::Ota
        );
    }

    #[test]
    fn test_route_unknown() {
        assert_eq!(Command::route("/sys/pk/dev/thing/event/post_reply"), Command::Unknown);
        assert_eq!(Command::route(""), Command::Unknown);
    }

    #[test]
    fn test_message_id() {
        assert_eq!(message_id(&json!({"id": "42"})), "42");
        assert_eq!(message_id(&json!({"id": 42})), "42");
        assert_eq!(message_id(&json!({})), "");
    }
}
