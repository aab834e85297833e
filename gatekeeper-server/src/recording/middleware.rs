use super::{
    CorrelationId, Direction, EventType, RecordedEvent, RecordingLogger, Sanitizer,
    CORRELATION_ID_HEADER,
};
use axum::http::{self, HeaderValue};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use std::collections::HashMap;
use uuid::Uuid;

/// Records every outbound Discord REST call and its response.
pub struct RecordingMiddleware {
    logger: RecordingLogger,
}

impl RecordingMiddleware {
    pub fn new(logger: RecordingLogger) -> Self {
        Self { logger }
    }
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        // Reuse an existing correlation ID when the caller set one
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| extensions.get::<CorrelationId>().map(|id| id.0.clone()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let request_data = extract_request_data(&req);
        self.record(
            Direction::Request,
            format!("{} {}", request_data.method, extract_path(&request_data.url)),
            serde_json::to_value(&request_data).unwrap_or(serde_json::Value::Null),
            &correlation_id,
        );

        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => {
                let response_data = extract_response_data(resp);
                self.record(
                    Direction::Response,
                    format!("response_{}", response_data.status_code),
                    serde_json::to_value(&response_data).unwrap_or(serde_json::Value::Null),
                    &correlation_id,
                );
            }
            Err(err) => {
                self.record(
                    Direction::Response,
                    "error".to_string(),
                    serde_json::json!({
                        "error": err.to_string(),
                        "error_type": format!("{:?}", err)
                    }),
                    &correlation_id,
                );
            }
        }

        response
    }
}

impl RecordingMiddleware {
    fn record(
        &self,
        direction: Direction,
        operation: String,
        data: serde_json::Value,
        correlation_id: &str,
    ) {
        self.logger.record(RecordedEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.to_string(),
            event_type: EventType::DiscordApiCall,
            direction,
            operation,
            data,
            metadata: HashMap::new(),
        });
    }
}

#[derive(Debug, serde::Serialize)]
struct RequestData {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
struct ResponseData {
    status_code: u16,
    headers: HashMap<String, String>,
    body_size: u64,
}

fn header_map(headers: &http::HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value_str) = value.to_str() {
            map.insert(name.to_string(), value_str.to_string());
        }
    }
    Sanitizer::sanitize_headers(&map)
}

fn extract_request_data(request: &Request) -> RequestData {
    // Discord request bodies are small JSON documents
    let body = match request.body().and_then(|b| b.as_bytes()) {
        Some(bytes) => serde_json::from_slice::<serde_json::Value>(bytes)
            .map(|v| Sanitizer::sanitize_json(&v))
            .unwrap_or_else(|_| serde_json::Value::String(format!("[BODY_{}b]", bytes.len()))),
        None => serde_json::Value::Null,
    };

    let mut url = request.url().clone();
    url.set_path(&Sanitizer::sanitize_path(request.url().path()));

    RequestData {
        method: request.method().to_string(),
        url: url.to_string(),
        headers: header_map(request.headers()),
        body,
    }
}

fn extract_response_data(response: &Response) -> ResponseData {
    ResponseData {
        status_code: response.status().as_u16(),
        headers: header_map(response.headers()),
        body_size: response.content_length().unwrap_or(0),
    }
}

fn extract_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}
