use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RequestError;

/// Identifier handed out by the service on submission. Opaque to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stage of a job as reported by the service.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Queued,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl Stage {
    /// `completed` and `failed` end the lifecycle; nothing is polled afterwards.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Downloading => "downloading",
            Stage::Processing => "processing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status snapshot. Stage and progress always travel together.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TaskStatus {
    pub status: Stage,
    /// Percentage in `[0, 100]`, only meaningful while downloading
    pub progress: f64,
}

impl TaskStatus {
    /// The snapshot a session starts with right after submission.
    pub fn queued() -> Self {
        Self {
            status: Stage::Queued,
            progress: 0.0,
        }
    }
}

/// Crop rectangle in pixels, sent to the service as-is.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// Raw crop fields as the user supplied them. Any of them may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropInput {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x: Option<u32>,
    pub y: Option<u32>,
}

impl CropInput {
    /// A crop exists only when both dimensions are given and non-zero.
    /// Offsets default to 0.
    pub fn resolve(self) -> Option<Crop> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some(Crop {
                width,
                height,
                x: self.x.unwrap_or(0),
                y: self.y.unwrap_or(0),
            }),
            _ => None,
        }
    }
}

impl FromStr for CropInput {
    type Err = RequestError;

    /// Parses `WxH` or `WxH+X+Y` (`WxH+X` leaves Y at its default).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RequestError::InvalidCrop(s.to_string());
        let mut parts = s.trim().split('+');

        let dims = parts.next().ok_or_else(invalid)?;
        let (w, h) = dims
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;

        let mut offset = || -> Result<Option<u32>, RequestError> {
            match parts.next() {
                Some(v) => v.trim().parse::<u32>().map(Some).map_err(|_| invalid()),
                None => Ok(None),
            }
        };
        let x = offset()?;
        let y = offset()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(CropInput {
            width: Some(width),
            height: Some(height),
            x,
            y,
        })
    }
}

/// Body of `POST /download`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crop: Option<Crop>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Result<Self, RequestError> {
        let url = url.into().trim().to_string();
        if url.is_empty() {
            return Err(RequestError::EmptyUrl);
        }
        Ok(Self {
            url,
            start_time: None,
            end_time: None,
            crop: None,
        })
    }

    /// Empty timecodes mean "no boundary" and are dropped.
    pub fn with_trim(mut self, start: Option<String>, end: Option<String>) -> Self {
        fn non_empty(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        self.start_time = non_empty(start);
        self.end_time = non_empty(end);
        self
    }

    pub fn with_crop(mut self, crop: CropInput) -> Self {
        self.crop = crop.resolve();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn start_time(&self) -> Option<&str> {
        self.start_time.as_deref()
    }

    pub fn end_time(&self) -> Option<&str> {
        self.end_time.as_deref()
    }

    pub fn crop(&self) -> Option<Crop> {
        self.crop
    }
}

/// Task currently tracked by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTask {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Client-side record of at most one task.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Session {
    #[default]
    Empty,
    Active(ActiveTask),
}

impl Session {
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Session::Empty => None,
            Session::Active(task) => Some(&task.task_id),
        }
    }

    pub fn status(&self) -> Option<&TaskStatus> {
        match self {
            Session::Empty => None,
            Session::Active(task) => Some(&task.status),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Session::Empty)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(|s| s.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_request_has_only_url() {
        let req = DownloadRequest::new("https://x.test/v").unwrap();
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({ "url": "https://x.test/v" })
        );
    }

    #[test]
    fn test_request_uses_camel_case_timecodes() {
        let req = DownloadRequest::new("https://x.test/v")
            .unwrap()
            .with_trim(Some("00:01:30".into()), Some("00:02:00".into()));
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({ "url": "https://x.test/v", "startTime": "00:01:30", "endTime": "00:02:00" })
        );
    }

    #[test]
    fn test_empty_timecodes_are_omitted() {
        let req = DownloadRequest::new("https://x.test/v")
            .unwrap()
            .with_trim(Some(String::new()), Some("  ".into()));
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("startTime").is_none());
        assert!(value.get("endTime").is_none());
    }

    #[test]
    fn test_width_without_height_omits_crop() {
        let req = DownloadRequest::new("https://x.test/v")
            .unwrap()
            .with_crop(CropInput {
                width: Some(640),
                height: None,
                x: Some(10),
                y: None,
            });
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("crop").is_none());
    }

    #[test]
    fn test_crop_offsets_default_to_zero() {
        let req = DownloadRequest::new("https://x.test/v")
            .unwrap()
            .with_crop(CropInput {
                width: Some(640),
                height: Some(360),
                ..Default::default()
            });
        assert_eq!(
            serde_json::to_value(&req).unwrap()["crop"],
            json!({ "width": 640, "height": 360, "x": 0, "y": 0 })
        );
    }

    #[test]
    fn test_zero_dimension_is_not_a_crop() {
        let crop = CropInput {
            width: Some(0),
            height: Some(360),
            ..Default::default()
        };
        assert_eq!(crop.resolve(), None);
    }

    #[test]
    fn test_empty_url_rejected() {
        assert_eq!(DownloadRequest::new("   "), Err(RequestError::EmptyUrl));
    }

    #[test]
    fn test_parse_crop_string() {
        let full: CropInput = "1280x720+10+20".parse().unwrap();
        assert_eq!(
            full.resolve(),
            Some(Crop { width: 1280, height: 720, x: 10, y: 20 })
        );

        let dims_only: CropInput = "640X480".parse().unwrap();
        assert_eq!(
            dims_only.resolve(),
            Some(Crop { width: 640, height: 480, x: 0, y: 0 })
        );

        let x_only: CropInput = "640x480+5".parse().unwrap();
        assert_eq!(x_only.x, Some(5));
        assert_eq!(x_only.y, None);
    }

    #[test]
    fn test_parse_crop_string_rejects_garbage() {
        for bad in ["", "640", "ax480", "640x480+1+2+3", "640x480+-1"] {
            assert!(bad.parse::<CropInput>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_status_decodes_lowercase_stages() {
        let status: TaskStatus =
            serde_json::from_str(r#"{"status":"downloading","progress":42.5}"#).unwrap();
        assert_eq!(status.status, Stage::Downloading);
        assert_eq!(status.progress, 42.5);

        let unknown = serde_json::from_str::<TaskStatus>(r#"{"status":"paused","progress":0}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_session_accessors() {
        let empty = Session::Empty;
        assert!(empty.is_empty());
        assert!(empty.task_id().is_none());
        assert!(empty.status().is_none());

        let active = Session::Active(ActiveTask {
            task_id: TaskId::new("abc"),
            status: TaskStatus {
                status: Stage::Failed,
                progress: 0.0,
            },
        });
        assert_eq!(active.task_id().map(TaskId::as_str), Some("abc"));
        assert!(active.is_terminal());
    }
}
