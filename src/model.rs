//! Data carried through the pipeline
//!
//! A notification names one or more remote files. Each of those becomes a
//! `FileDescriptor`, which a worker turns into a `CollectedFile` once the
//! bytes are staged locally.

use chrono::{DateTime, Utc};
use reqwest::Url;
use secrecy::SecretString;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Protocol used to reach a network element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// FTP with explicit TLS
    Ftpes,
    /// SSH File Transfer Protocol
    Sftp,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ftpes => 21,
            Scheme::Sftp => 22,
        }
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ftpes" => Ok(Scheme::Ftpes),
            "sftp" => Ok(Scheme::Sftp),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Ftpes => write!(f, "ftpes"),
            Scheme::Sftp => write!(f, "sftp"),
        }
    }
}

/// Address and credentials of a remote file server
#[derive(Debug)]
pub struct FileServerData {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<SecretString>,
}

/// Event-level data shared by every file of one notification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetaData {
    pub source_name: String,
    pub product_name: String,
    pub vendor_name: String,
    pub last_epoch_microsec: String,
    pub start_epoch_microsec: String,
    pub time_zone_offset: String,
    pub change_identifier: String,
    pub change_type: String,
}

/// One remote file named by a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    /// Full URI, e.g. `sftp://user:pw@10.0.0.1:22/pm/A2024.xml.gz`
    pub location: String,
    pub compression: String,
    pub file_format_type: String,
    pub file_format_version: String,
    pub metadata: MessageMetaData,
}

impl FileDescriptor {
    fn url(&self) -> Result<Url, String> {
        Url::parse(&self.location).map_err(|e| e.to_string())
    }

    /// Scheme of the location, `Err` carrying the raw scheme when unsupported
    pub fn scheme(&self) -> Result<Scheme, String> {
        match self.location.split_once("://") {
            Some((scheme, _)) => scheme.parse(),
            None => Err(self.location.clone()),
        }
    }

    pub fn server(&self) -> Result<FileServerData, String> {
        let url = self.url()?;
        let host = url
            .host_str()
            .ok_or_else(|| format!("no host in '{}'", self.location))?
            .to_string();
        let user = match url.username() {
            "" => None,
            u => Some(u.to_string()),
        };
        Ok(FileServerData {
            host,
            port: url.port(),
            user,
            password: url.password().map(|p| SecretString::new(p.to_string())),
        })
    }

    /// Path of the file on the remote server
    pub fn remote_path(&self) -> Result<String, String> {
        Ok(self.url()?.path().to_string())
    }

    /// Staging path below `scratch_dir`; also the dedup identity
    pub fn local_path(&self, scratch_dir: &Path) -> PathBuf {
        scratch_dir.join(&self.name)
    }

    pub fn change_identifier(&self) -> &str {
        &self.metadata.change_identifier
    }
}

/// Files announced together by one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub metadata: MessageMetaData,
    pub files: Vec<FileDescriptor>,
}

/// A file whose bytes sit in the scratch directory, ready to publish
#[derive(Debug, Clone)]
pub struct CollectedFile {
    pub descriptor: FileDescriptor,
    pub local_path: PathBuf,
    pub collected_at: DateTime<Utc>,
}

/// Metadata sent alongside the file bytes to the file router
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishMetadata<'a> {
    pub product_name: &'a str,
    pub vendor_name: &'a str,
    pub last_epoch_microsec: &'a str,
    pub source_name: &'a str,
    pub start_epoch_microsec: &'a str,
    pub time_zone_offset: &'a str,
    pub location: &'a str,
    pub compression: &'a str,
    pub file_format_type: &'a str,
    pub file_format_version: &'a str,
}

impl CollectedFile {
    pub fn publish_metadata(&self) -> PublishMetadata<'_> {
        let d = &self.descriptor;
        PublishMetadata {
            product_name: &d.metadata.product_name,
            vendor_name: &d.metadata.vendor_name,
            last_epoch_microsec: &d.metadata.last_epoch_microsec,
            source_name: &d.metadata.source_name,
            start_epoch_microsec: &d.metadata.start_epoch_microsec,
            time_zone_offset: &d.metadata.time_zone_offset,
            location: &d.location,
            compression: &d.compression,
            file_format_type: &d.file_format_type,
            file_format_version: &d.file_format_version,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_descriptor(name: &str, location: &str, change_identifier: &str) -> FileDescriptor {
    FileDescriptor {
        name: name.to_string(),
        location: location.to_string(),
        compression: "gzip".to_string(),
        file_format_type: "org.3GPP.32.435#measCollec".to_string(),
        file_format_version: "V10".to_string(),
        metadata: MessageMetaData {
            source_name: "oteNB5309".to_string(),
            product_name: "RnNode".to_string(),
            vendor_name: "Ericsson".to_string(),
            last_epoch_microsec: "8745745764578".to_string(),
            start_epoch_microsec: "8745745764578".to_string(),
            time_zone_offset: "UTC+05:00".to_string(),
            change_identifier: change_identifier.to_string(),
            change_type: "FileReady".to_string(),
        },
    }
}
