//! Addressing and identity of remote portal resources.
//!
//! A [`ResourceDescriptor`] is built by the list crawlers and the container extractors,
//! handed to exactly one downloader and then dropped. Its storage path is a pure function
//! of category, name and extension, and names are derived from the parent's name plus a
//! stable numeric upstream id, so re-crawling the same remote item always lands on the
//! same path.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::config::FolderConfig;
use crate::error::MirrorError;

/// Form field whose presence marks a descriptor as a form-submitted attachment document.
pub const DOCUMENT_OPTIONS_FIELD: &str = "options";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    SessionList,
    Session,
    AgendaItem,
    Proposal,
    ProposalList,
    Attachment,
    AttachmentDocument,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::SessionList,
        Category::Session,
        Category::AgendaItem,
        Category::Proposal,
        Category::ProposalList,
        Category::Attachment,
        Category::AttachmentDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::SessionList => "SessionList",
            Category::Session => "Session",
            Category::AgendaItem => "AgendaItem",
            Category::Proposal => "Proposal",
            Category::ProposalList => "ProposalList",
            Category::Attachment => "Attachment",
            Category::AttachmentDocument => "AttachmentDocument",
        }
    }

    /// Containers list further child resources on their page.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Category::Session | Category::AgendaItem | Category::Proposal
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| MirrorError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    category: Category,
    name: String,
    extension: String,
    created: DateTime<Utc>,
    request_uri: String,
    form_payload: Vec<(String, String)>,
    redownload: bool,
}

impl ResourceDescriptor {
    /// A plain GET resource. An empty `extension` means the name already carries one.
    pub fn new(
        category: Category,
        name: impl Into<String>,
        extension: impl Into<String>,
        created: DateTime<Utc>,
        request_uri: impl Into<String>,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            extension: extension.into(),
            created,
            request_uri: request_uri.into(),
            form_payload: Vec::new(),
            redownload: false,
        }
    }

    /// Calendar-only entry of a list page: shown upstream, but nothing to fetch.
    pub fn placeholder(category: Category, name: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self::new(category, name, "", created, "")
    }

    pub fn with_form_payload(mut self, form_payload: Vec<(String, String)>) -> Self {
        self.form_payload = form_payload;
        self
    }

    pub fn with_redownload(mut self, redownload: bool) -> Self {
        self.redownload = redownload;
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    pub fn form_payload(&self) -> &[(String, String)] {
        &self.form_payload
    }

    pub fn redownload(&self) -> bool {
        self.redownload
    }

    pub fn is_placeholder(&self) -> bool {
        self.request_uri.is_empty()
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form_payload
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True for attachment documents that must be POSTed with their form.
    pub fn has_document_options(&self) -> bool {
        self.form_value(DOCUMENT_OPTIONS_FIELD)
            .is_some_and(|v| !v.is_empty())
    }

    pub fn storage_path(&self, folders: &FolderConfig) -> String {
        format!(
            "{}{}{}",
            folders.folder_for(self.category),
            self.name,
            self.extension
        )
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.category, self.name, self.extension)
    }
}

// Naming scheme. Every name below is parent name + kind marker + upstream id, never display text.

pub fn session_name(id: u64) -> String {
    format!("session-{id}")
}

pub fn proposal_name(id: u64) -> String {
    format!("proposal-{id}")
}

pub fn agenda_item_prefix(parent: &str) -> String {
    format!("{parent}-agenda-")
}

pub fn agenda_item_name(parent: &str, id: u64) -> String {
    format!("{}{id}", agenda_item_prefix(parent))
}

/// Shared by attachments and attachment documents of one container.
pub fn attachment_prefix(parent: &str) -> String {
    format!("{parent}-attachment-")
}

/// The size is normalised (`12 KB` becomes `12kb`). The file token is kept verbatim so
/// distinct upstream files never share a name; see [`escape_path_component`].
pub fn attachment_name(parent: &str, size: &str, file_token: &str) -> String {
    format!(
        "{}{}-{}",
        attachment_prefix(parent),
        size_token(size),
        escape_path_component(file_token)
    )
}

/// `id % 100` only spreads documents over name buckets; it carries no meaning.
pub fn attachment_document_name(parent: &str, id: u64) -> String {
    format!("{}doc-{id}-{}", attachment_prefix(parent), id % 100)
}

fn size_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Percent-encodes the characters that cannot appear inside one path component
/// (separators, control characters) plus `%` itself, so the mapping stays reversible.
pub fn escape_path_component(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '/' | '\\' | '%') || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}
