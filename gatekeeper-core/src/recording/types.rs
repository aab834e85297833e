use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    pub timestamp: String,      // ISO 8601 timestamp
    pub correlation_id: String, // Unique ID to group related events
    pub event_type: EventType,
    pub direction: Direction,
    pub operation: String,       // e.g. "MESSAGE_CREATE", "PATCH /channels/1/messages/2"
    pub data: serde_json::Value, // Sanitized request/response data
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum EventType {
    GatewayDispatch,
    InteractionReceived,
    DiscordApiCall,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Direction {
    Request,
    Response,
}

// Correlation ID type for better type safety
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

// Header name for correlation ID propagation
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";
