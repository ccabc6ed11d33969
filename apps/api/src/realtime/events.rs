use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ROOM_PREFIXES: &[&str] = &["opportunity", "team", "chat"];
const MAX_CHAT_CHARS: usize = 2000;

/// Messages a client may send over the socket.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Join { room: String },
    Leave { room: String },
    Chat { room: String, text: String },
    Ping,
}

/// Messages the server pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Joined {
        room: String,
    },
    Left {
        room: String,
    },
    Chat {
        room: String,
        from: Uuid,
        text: String,
        sent_at: DateTime<Utc>,
    },
    Notification {
        id: Uuid,
        kind: String,
        title: String,
        body: String,
        link: Option<String>,
    },
    ApplicationUpdated {
        application_id: Uuid,
        status: String,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Rooms are `<prefix>:<uuid>`; per-user delivery never goes through rooms.
pub fn validate_room(room: &str) -> Result<(), String> {
    let (prefix, id) = room
        .split_once(':')
        .ok_or_else(|| format!("Room '{room}' must look like '<kind>:<id>'"))?;

    if !ROOM_PREFIXES.contains(&prefix) {
        return Err(format!(
            "Unknown room kind '{prefix}', expected one of {}",
            ROOM_PREFIXES.join(", ")
        ));
    }
    Uuid::parse_str(id).map_err(|_| format!("Room id '{id}' is not a valid UUID"))?;
    Ok(())
}

pub fn validate_chat_text(text: &str) -> Result<&str, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("Message cannot be empty".to_string());
    }
    if text.chars().count() > MAX_CHAT_CHARS {
        return Err(format!("Message exceeds {MAX_CHAT_CHARS} characters"));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_parses_tagged_json() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type": "chat", "room": "team:x", "text": "hi"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::Chat {
                room: "team:x".to_string(),
                text: "hi".to_string()
            }
        );
        let ping: ClientEvent = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(ping, ClientEvent::Ping);
    }

    #[test]
    fn test_server_event_serializes_snake_case_tag() {
        let json = serde_json::to_value(ServerEvent::ApplicationUpdated {
            application_id: Uuid::nil(),
            status: "shortlisted".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "application_updated");
    }

    #[test]
    fn test_valid_rooms() {
        let id = Uuid::new_v4();
        assert!(validate_room(&format!("team:{id}")).is_ok());
        assert!(validate_room(&format!("opportunity:{id}")).is_ok());
    }

    #[test]
    fn test_user_rooms_cannot_be_joined() {
        let id = Uuid::new_v4();
        assert!(validate_room(&format!("user:{id}")).is_err());
    }

    #[test]
    fn test_malformed_rooms_rejected() {
        assert!(validate_room("lobby").is_err());
        assert!(validate_room("team:not-a-uuid").is_err());
    }

    #[test]
    fn test_chat_text_trimmed_and_bounded() {
        assert_eq!(validate_chat_text("  hello ").unwrap(), "hello");
        assert!(validate_chat_text("   ").is_err());
        assert!(validate_chat_text(&"a".repeat(MAX_CHAT_CHARS + 1)).is_err());
    }
}
