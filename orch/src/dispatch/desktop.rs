//! Desktop actions forwarded to the remote desktop-control driver

use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::{ActionKind, ActionResult, Params};

/// HTTP client for the desktop driver endpoint
pub struct DesktopDriver {
    url: String,
    http: Client,
    timeout: Duration,
}

impl DesktopDriver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            http,
            timeout,
        })
    }

    /// POST `{action, ...params}`; the driver's status is passed through
    ///
    /// Transport failures become 503 (408 on timeout) so the retry loop can react.
    pub async fn send(&self, action: ActionKind, params: &Params) -> ActionResult {
        debug!(%action, url = %self.url, "DesktopDriver::send: called");
        let mut body = params.clone();
        body.insert("action".to_string(), json!(action.as_str()));

        let response = match self.http.post(&self.url).json(&body).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(%action, "DesktopDriver::send: timed out");
                return ActionResult::new(
                    408,
                    json!({"error": format!("timeout after {}ms", self.timeout.as_millis())}),
                );
            }
            Err(e) => {
                warn!(%action, error = %e, "DesktopDriver::send: driver unreachable");
                return ActionResult::new(
                    503,
                    json!({"error": "desktop_driver_unreachable", "message": e.to_string()}),
                );
            }
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(%action, error = %e, "DesktopDriver::send: body read failed");
                return ActionResult::new(
                    503,
                    json!({"error": "desktop_driver_unreachable", "message": e.to_string()}),
                );
            }
        };
        let data = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({"raw": text}));
        debug!(%action, status, "DesktopDriver::send: response");
        ActionResult::new(status, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one response, handing the raw request back through the join handle
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // read until the JSON body has arrived
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if n == 0 || (text.contains("\r\n\r\n") && text.trim_end().ends_with('}')) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}/computer-use", addr), handle)
    }

    fn params(v: Value) -> Params {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_send_posts_action_and_params() {
        let (url, server) = one_shot_server("200 OK", r#"{"ok":true,"x":10}"#).await;
        let driver = DesktopDriver::new(url, Duration::from_secs(5)).unwrap();

        let result = driver.send(ActionKind::MoveMouse, &params(json!({"x": 10, "y": 20}))).await;
        assert_eq!(result.status, 200);
        assert_eq!(result.ok_flag(), Some(true));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /computer-use"));
        assert!(request.contains("\"action\":\"move_mouse\""));
        assert!(request.contains("\"y\":20"));
    }

    #[tokio::test]
    async fn test_non_json_body_is_wrapped() {
        let (url, _server) = one_shot_server("500 Internal Server Error", "driver exploded").await;
        let driver = DesktopDriver::new(url, Duration::from_secs(5)).unwrap();

        let result = driver.send(ActionKind::Screenshot, &Params::new()).await;
        assert_eq!(result.status, 500);
        assert_eq!(result.field("raw"), Some(&json!("driver exploded")));
    }

    #[tokio::test]
    async fn test_unreachable_driver_is_503() {
        // bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let driver = DesktopDriver::new(format!("http://127.0.0.1:{}/computer-use", port), Duration::from_secs(5)).unwrap();

        let result = driver.send(ActionKind::ClickMouse, &Params::new()).await;
        assert_eq!(result.status, 503);
        assert_eq!(result.text("error"), "desktop_driver_unreachable");
    }
}
