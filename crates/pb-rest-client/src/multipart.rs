//! Multipart body encoding

use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::request::FileAttachment;

/// MIME type sent when the file name has no recognised extension
pub const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

/// Best-effort MIME type from the file name's extension
pub fn mime_for_file_name(file_name: &str) -> &'static str {
    let ext = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return UNKNOWN_MIME_TYPE,
    };
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/vnd.microsoft.icon",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => UNKNOWN_MIME_TYPE,
    }
}

/// Flatten a JSON body into multipart text fields.
///
/// Arrays become indexed keys (`tags0`, `tags1`, ...) because repeated keys
/// are not read back as arrays. Null and blank values are left out.
pub fn flatten_fields(body: &Map<String, Value>) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    for (key, value) in body {
        match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if let Some(text) = field_text(item) {
                        fields.push((format!("{key}{index}"), text));
                    }
                }
            }
            other => {
                if let Some(text) = field_text(other) {
                    fields.push((key.clone(), text));
                }
            }
        }
    }
    fields
}

fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    };
    (!text.trim().is_empty()).then_some(text)
}

pub(crate) fn build_form(body: &Map<String, Value>, files: &[FileAttachment]) -> ClientResult<Form> {
    let mut form = Form::new();

    for file in files {
        if !file.is_attachable() {
            debug!(field = %file.field_name, file = %file.file_name, "skipping unnamed attachment");
            continue;
        }
        let part = Part::bytes(file.content.to_vec())
            .file_name(file.file_name.clone())
            .mime_str(file.mime_type())
            .map_err(|e| ClientError::InvalidHeader(format!("content-type: {e}")))?;
        form = form.part(file.field_name.clone(), part);
    }

    for (key, value) in flatten_fields(body) {
        form = form.text(key, value);
    }

    Ok(form)
}
