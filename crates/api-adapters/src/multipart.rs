//! Multipart form collection shared by the upload endpoints.

use std::collections::HashMap;

use axum::extract::Multipart;
use domains::FileUpload;
use mime::Mime;

use crate::error::ApiError;

/// Text fields by name, and files in upload order.
#[derive(Debug, Default)]
pub struct Form {
    pub fields: HashMap<String, String>,
    pub files: Vec<(String, FileUpload)>,
}

impl Form {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Files submitted under `name`, keeping their order.
    pub fn take_files(&mut self, name: &str) -> Vec<FileUpload> {
        let (matching, rest) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(field, _)| field == name);
        self.files = rest;
        matching.into_iter().map(|(_, f)| f).collect()
    }

    /// Per-file values such as captions: only a JSON array keeps positions.
    pub fn positional(&self, name: &str) -> Vec<String> {
        self.text(name)
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default()
    }

    /// A JSON array of strings, or a comma separated list.
    pub fn list(&self, name: &str) -> Vec<String> {
        match self.text(name).map(str::trim) {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|_| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
        }
    }
}

pub async fn read_form(mut multipart: Multipart) -> Result<Form, ApiError> {
    let mut form = Form::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field
                    .content_type()
                    .and_then(|c| c.parse::<Mime>().ok())
                    .unwrap_or(mime::APPLICATION_OCTET_STREAM);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read {name}: {e}")))?;
                form.files.push((
                    name,
                    FileUpload {
                        filename,
                        content_type,
                        bytes,
                    },
                ));
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read {name}: {e}")))?;
                form.fields.insert(name, text);
            }
        }
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_accept_json_or_commas() {
        let mut form = Form::default();
        form.fields.insert("tags".into(), r#"["rust","axum"]"#.into());
        form.fields.insert("topics".into(), "one, two,,".into());
        assert_eq!(form.list("tags"), ["rust", "axum"]);
        assert_eq!(form.list("topics"), ["one", "two"]);
        assert!(form.list("missing").is_empty());
    }

    #[test]
    fn positional_values_keep_blanks() {
        let mut form = Form::default();
        form.fields.insert("captions".into(), r#"["", "second, with comma"]"#.into());
        assert_eq!(form.positional("captions"), ["", "second, with comma"]);
        form.fields.insert("captions".into(), "not json".into());
        assert!(form.positional("captions").is_empty());
    }
}
