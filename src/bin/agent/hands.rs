use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

use screen_guide::{
    ConfigurationError, ElementProbe, Frame, FrameSource, IntrospectionError, MappingError, Point,
    Rect,
};

/// Latest frame pushed by the screen-share shell.
pub struct FrameStore {
    latest: watch::Sender<Option<Arc<Frame>>>,
    next_id: AtomicU64,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            latest,
            next_id: AtomicU64::new(1),
        }
    }

    /// Decodes the PNG header and makes the frame the latest one.
    pub fn push_png(&self, png: Vec<u8>) -> Result<Arc<Frame>, MappingError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Arc::new(Frame::from_png(id, png)?);
        debug!(id, width = frame.width, height = frame.height, "frame received");
        self.latest.send_replace(Some(frame.clone()));
        Ok(frame)
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest.borrow().clone()
    }

    /// Drops the held frame when sharing stops.
    pub fn clear(&self) {
        self.latest.send_replace(None);
    }
}

#[async_trait]
impl FrameSource for FrameStore {
    async fn fresh_frame(&self, wait: Duration) -> Result<Arc<Frame>, ConfigurationError> {
        let requested_at = Instant::now();
        let mut rx = self.latest.subscribe();
        let fresh = tokio::time::timeout(wait, async move {
            rx.wait_for(|frame| {
                frame
                    .as_ref()
                    .is_some_and(|frame| frame.captured_at >= requested_at)
            })
            .await
            .ok()
            .and_then(|frame| (*frame).clone())
        })
        .await;

        match fresh {
            Ok(Some(frame)) => Ok(frame),
            _ => {
                debug!("no fresh frame in time, using latest");
                self.latest().ok_or(ConfigurationError::NoFrame)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ElementInfo {
    bounding_rect: Option<BoundingRect>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BoundingRect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Asks the UI-automation helper for the element under a physical point.
pub struct UiaProbe {
    client: Client,
    url: String,
}

impl UiaProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ElementProbe for UiaProbe {
    async fn element_at(&self, point: Point) -> Result<Option<Rect>, IntrospectionError> {
        let url = format!(
            "{}?x={}&y={}",
            self.url,
            point.x.round() as i64,
            point.y.round() as i64
        );
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| IntrospectionError::Unavailable(e.to_string()))?
            .text()
            .await
            .map_err(|e| IntrospectionError::Unavailable(e.to_string()))?;
        parse_element(&body)
    }
}

/// `null`, an element without bounds, and zero-sized bounds all mean "nothing usable".
fn parse_element(body: &str) -> Result<Option<Rect>, IntrospectionError> {
    let info: Option<ElementInfo> = serde_json::from_str(body.trim())
        .map_err(|e| IntrospectionError::Malformed(e.to_string()))?;
    Ok(info
        .and_then(|info| info.bounding_rect)
        .filter(|rect| rect.width > 0.0 && rect.height > 0.0)
        .map(|rect| Rect::new(rect.x, rect.y, rect.width, rect.height)))
}
