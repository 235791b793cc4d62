//! VES "FileReady" notification parsing
//!
//! Turns one notify event into a `NotificationMessage`. Files whose location
//! does not parse are dropped individually; an event without any usable file
//! is rejected as a whole.

use crate::error::NotificationError;
use crate::logging::{log_at, Level};
use crate::model::{FileDescriptor, MessageMetaData, NotificationMessage};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

const FILE_READY: &str = "FileReady";

/// `Noti_<product>-<vendor>_FileReady`
static EVENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Noti_([^-]+)-(.+)_FileReady$").expect("event name pattern"));

#[derive(Deserialize)]
struct Envelope {
    event: Event,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Event {
    common_event_header: CommonEventHeader,
    notification_fields: NotificationFields,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommonEventHeader {
    source_name: String,
    event_name: String,
    last_epoch_microsec: Value,
    start_epoch_microsec: Value,
    time_zone_offset: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationFields {
    change_identifier: String,
    change_type: String,
    #[serde(default)]
    array_of_named_hash_map: Vec<NamedHashMap>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedHashMap {
    name: String,
    hash_map: FileInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileInfo {
    location: String,
    compression: String,
    file_format_type: String,
    file_format_version: String,
}

/// Epoch fields arrive as numbers or strings depending on the producer
fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn product_and_vendor(event_name: &str) -> (String, String) {
    match EVENT_NAME.captures(event_name) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => (String::new(), String::new()),
    }
}

/// Parses one event, given either as a JSON object or a JSON-encoded string
pub fn parse_event(raw: &Value) -> Result<NotificationMessage, NotificationError> {
    let envelope: Envelope = match raw {
        Value::String(text) => serde_json::from_str(text)?,
        other => serde_json::from_value(other.clone())?,
    };
    let header = envelope.event.common_event_header;
    let fields = envelope.event.notification_fields;

    if fields.change_type != FILE_READY {
        return Err(NotificationError::WrongChangeType(fields.change_type));
    }

    let (product_name, vendor_name) = product_and_vendor(&header.event_name);
    let metadata = MessageMetaData {
        source_name: header.source_name,
        product_name,
        vendor_name,
        last_epoch_microsec: scalar_text(&header.last_epoch_microsec),
        start_epoch_microsec: scalar_text(&header.start_epoch_microsec),
        time_zone_offset: header.time_zone_offset,
        change_identifier: fields.change_identifier,
        change_type: fields.change_type,
    };

    let files: Vec<FileDescriptor> = fields
        .array_of_named_hash_map
        .into_iter()
        .filter_map(|entry| match to_descriptor(entry, &metadata) {
            Ok(d) => Some(d),
            Err(e) => {
                log_at(Level::Warn, &format!("Dropping file from notification: {}", e));
                None
            }
        })
        .collect();

    if files.is_empty() {
        return Err(NotificationError::MissingField("arrayOfNamedHashMap"));
    }
    Ok(NotificationMessage { metadata, files })
}

fn to_descriptor(
    entry: NamedHashMap,
    metadata: &MessageMetaData,
) -> Result<FileDescriptor, NotificationError> {
    let info = entry.hash_map;
    if entry.name.is_empty() || entry.name == ".." || entry.name.contains('/') {
        return Err(NotificationError::InvalidLocation {
            location: info.location,
            reason: format!("unusable file name '{}'", entry.name),
        });
    }
    Url::parse(&info.location).map_err(|e| NotificationError::InvalidLocation {
        location: info.location.clone(),
        reason: e.to_string(),
    })?;
    Ok(FileDescriptor {
        name: entry.name,
        location: info.location,
        compression: info.compression,
        file_format_type: info.file_format_type,
        file_format_version: info.file_format_version,
        metadata: metadata.clone(),
    })
}

/// Parses a poll response body: a JSON array of events
///
/// Malformed events are logged and skipped; the rest of the batch survives.
pub fn parse_batch(body: &str) -> Vec<NotificationMessage> {
    let events: Vec<Value> = match serde_json::from_str(body) {
        Ok(events) => events,
        Err(e) => {
            log_at(Level::Error, &format!("Poll response is not a JSON array: {}", e));
            return Vec::new();
        }
    };
    events
        .iter()
        .filter_map(|event| match parse_event(event) {
            Ok(message) => Some(message),
            Err(e) => {
                log_at(Level::Warn, &format!("Dropping notification: {}", e));
                None
            }
        })
        .collect()
}
