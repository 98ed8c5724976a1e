//! HTTP headers for streaming a stored file back to a client

use crate::metadata::OCTET_STREAM;
use crate::model::FileRecord;

/// How the client should present the content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Save to disk
    Attachment,
    /// Display in the browser
    Inline,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::Inline => "inline",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Attachment => "Download File",
            Self::Inline => "View File",
        }
    }
}

/// Header name/value pairs for delivering `record`
pub fn delivery_headers(record: &FileRecord, disposition: Disposition) -> Vec<(&'static str, String)> {
    let mime_type = record
        .meta
        .mime_type
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(OCTET_STREAM);

    vec![
        ("Content-Description", disposition.description().to_string()),
        ("Content-Type", mime_type.to_string()),
        ("Cache-Control", "must-revalidate".to_string()),
        ("Expires", "-1".to_string()),
        ("Content-Disposition", content_disposition(record.display_name(), disposition)),
        ("Content-Length", record.meta.size.to_string()),
        ("Pragma", "public".to_string()),
        ("Accept-Ranges", "bytes".to_string()),
    ]
}

/// `attachment; filename="..."` with the filename quoted
pub fn content_disposition(filename: &str, disposition: Disposition) -> String {
    let escaped: String = filename
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            _ => vec![c],
        })
        .collect();

    format!("{}; filename=\"{}\"", disposition.as_str(), escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileMeta;

    fn record(filename: &str, mime: Option<&str>, size: i64) -> FileRecord {
        let mut record = FileRecord::provision();
        record.meta = FileMeta {
            filename: Some(filename.to_string()),
            mime_type: mime.map(str::to_string),
            size,
            ..Default::default()
        };
        record
    }

    fn header<'a>(headers: &'a [(&'static str, String)], name: &str) -> &'a str {
        headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn test_download_headers() {
        let headers = delivery_headers(&record("report.pdf", Some("application/pdf"), 1234), Disposition::Attachment);

        assert_eq!(headers.len(), 8);
        assert_eq!(header(&headers, "Content-Description"), "Download File");
        assert_eq!(header(&headers, "Content-Type"), "application/pdf");
        assert_eq!(header(&headers, "Cache-Control"), "must-revalidate");
        assert_eq!(header(&headers, "Expires"), "-1");
        assert_eq!(header(&headers, "Content-Disposition"), "attachment; filename=\"report.pdf\"");
        assert_eq!(header(&headers, "Content-Length"), "1234");
        assert_eq!(header(&headers, "Pragma"), "public");
        assert_eq!(header(&headers, "Accept-Ranges"), "bytes");
    }

    #[test]
    fn test_view_headers() {
        let headers = delivery_headers(&record("cat.png", Some("image/png"), 10), Disposition::Inline);

        assert_eq!(header(&headers, "Content-Description"), "View File");
        assert_eq!(header(&headers, "Content-Disposition"), "inline; filename=\"cat.png\"");
    }

    #[test]
    fn test_missing_mime_type() {
        let headers = delivery_headers(&record("blob", None, 0), Disposition::Attachment);
        assert_eq!(header(&headers, "Content-Type"), OCTET_STREAM);
    }

    #[test]
    fn test_filename_escaping() {
        assert_eq!(
            content_disposition("say \"hi\".txt", Disposition::Attachment),
            "attachment; filename=\"say \\\"hi\\\".txt\""
        );
        assert_eq!(
            content_disposition("evil\r\nSet-Cookie: x.txt", Disposition::Inline),
            "inline; filename=\"evilSet-Cookie: x.txt\""
        );
    }
}
