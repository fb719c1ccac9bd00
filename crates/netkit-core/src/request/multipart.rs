//! `multipart/form-data` body assembly for uploads.

use uuid::Uuid;

const CRLF: &str = "\r\n";

/// A single part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Field {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime_type: String,
        data: Vec<u8>,
    },
}

/// Builder for `multipart/form-data` payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<Part>,
}

impl MultipartBody {
    /// Empty body with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(format!("Boundary-{}", Uuid::new_v4()))
    }

    /// Empty body with a fixed boundary.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Single-file body. The form field name is the file name without its
    /// extension.
    #[must_use]
    pub fn for_file(file_name: &str, mime_type: &str, data: Vec<u8>) -> Self {
        let field = file_name.split('.').next().unwrap_or(file_name);
        Self::new().file(field, file_name, mime_type, data)
    }

    /// Append a text field.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part::Field {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Append a file part.
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.parts.push(Part::File {
            name: name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        });
        self
    }

    /// Boundary separating parts.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Serialise all parts followed by the closing boundary.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend_from_slice(format!("--{}{CRLF}", self.boundary).as_bytes());
            match part {
                Part::Field { name, value } => {
                    out.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"{CRLF}{CRLF}")
                            .as_bytes(),
                    );
                    out.extend_from_slice(value.as_bytes());
                }
                Part::File {
                    name,
                    file_name,
                    mime_type,
                    data,
                } => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"{CRLF}"
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(format!("Content-Type: {mime_type}{CRLF}{CRLF}").as_bytes());
                    out.extend_from_slice(data);
                }
            }
            out.extend_from_slice(CRLF.as_bytes());
        }
        out.extend_from_slice(format!("--{}--{CRLF}", self.boundary).as_bytes());
        out
    }
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fields_and_files_with_crlf_delimiters() {
        let body = MultipartBody::with_boundary("XYZ")
            .text("title", "report")
            .file("doc", "report.txt", "text/plain", b"hello".to_vec());

        let expected = concat!(
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
            "report\r\n",
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"doc\"; filename=\"report.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "hello\r\n",
            "--XYZ--\r\n",
        );
        assert_eq!(String::from_utf8_lossy(&body.encode()), expected);
        assert_eq!(body.content_type(), "multipart/form-data; boundary=XYZ");
    }

    #[test]
    fn single_file_body_uses_stem_as_field_name() {
        let body = MultipartBody::for_file("avatar.png", "image/png", vec![0x89, 0x50]);
        assert!(body.boundary().starts_with("Boundary-"));
        let encoded = body.encode();
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.contains("name=\"avatar\"; filename=\"avatar.png\""));
        assert!(text.contains("Content-Type: image/png"));
        assert!(text.ends_with(&format!("--{}--\r\n", body.boundary())));
    }
}
