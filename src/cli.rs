use clap::ValueEnum;

use crate::error::RequestError;
use crate::state::{CropInput, DownloadRequest};

/// What to do with the artifact of a completed task.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetrieveMode {
    /// Download it into the download directory
    #[default]
    Save,
    /// Only print its address
    Print,
}

/// Parses one tasks-file line: `url[|start|end|WxH+X+Y]`.
///
/// Blank lines and `#` comments yield `Ok(None)`. Empty fields are treated as
/// absent, so `url|||640x360` crops without trimming.
pub fn parse_task_line(line: &str) -> Result<Option<DownloadRequest>, RequestError> {
    let raw = line.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return Ok(None);
    }

    let mut parts = raw.splitn(4, '|').map(str::trim);
    let url = parts.next().unwrap_or_default();
    let start = parts.next().map(str::to_string);
    let end = parts.next().map(str::to_string);
    let crop = match parts.next().filter(|c| !c.is_empty()) {
        Some(rect) => rect.parse::<CropInput>()?,
        None => CropInput::default(),
    };

    let request = DownloadRequest::new(url)?
        .with_trim(start, end)
        .with_crop(crop);
    Ok(Some(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Crop;

    #[test]
    fn test_plain_url_line() {
        let req = parse_task_line("  https://x.test/v  ").unwrap().unwrap();
        assert_eq!(req.url(), "https://x.test/v");
        assert_eq!(req.start_time(), None);
        assert_eq!(req.crop(), None);
    }

    #[test]
    fn test_full_line() {
        let req = parse_task_line("https://x.test/v|00:01:30|00:02:00|1280x720+0+40")
            .unwrap()
            .unwrap();
        assert_eq!(req.start_time(), Some("00:01:30"));
        assert_eq!(req.end_time(), Some("00:02:00"));
        assert_eq!(
            req.crop(),
            Some(Crop { width: 1280, height: 720, x: 0, y: 40 })
        );
    }

    #[test]
    fn test_empty_fields_are_absent() {
        let req = parse_task_line("https://x.test/v|||640x360").unwrap().unwrap();
        assert_eq!(req.start_time(), None);
        assert_eq!(req.end_time(), None);
        assert_eq!(req.crop().map(|c| (c.width, c.height)), Some((640, 360)));
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        assert_eq!(parse_task_line("   "), Ok(None));
        assert_eq!(parse_task_line("# later"), Ok(None));
    }

    #[test]
    fn test_bad_lines_are_errors() {
        assert_eq!(parse_task_line("|00:00:01"), Err(RequestError::EmptyUrl));
        assert!(matches!(
            parse_task_line("https://x.test/v|||wide"),
            Err(RequestError::InvalidCrop(_))
        ));
    }
}
