use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::descriptor::Category;
use crate::error::MirrorError;

const ID_PLACEHOLDER: &str = "{id}";

/// Everything the crawlers and downloaders need to know about the portal and the storage
/// layout. Passed explicitly to every component; nothing reads it from globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub portal: PortalConfig,
    pub folders: FolderConfig,
    /// Refetch leaves even when the stored copy is current.
    pub redownload: bool,
    /// Fan out inline (depth-first, in the caller's task) instead of through the queue.
    pub debug: bool,
    /// Concurrent queue consumers.
    pub workers: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            folders: FolderConfig::default(),
            redownload: false,
            debug: false,
            workers: 4,
        }
    }
}

impl MirrorConfig {
    pub fn validate(&self) -> Result<(), MirrorError> {
        self.portal.validate()?;
        self.folders.validate()?;
        if self.workers == 0 {
            return Err(MirrorError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            base_url = %self.portal.base_url,
            timezone = %self.portal.timezone,
            debug = self.debug,
            workers = self.workers,
            redownload = self.redownload,
            "Loaded MirrorConfig"
        );
        debug!(?self, "MirrorConfig loaded (full debug)");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Every relative link found on a portal page is resolved against this URL.
    pub base_url: String,
    pub session_long_list: String,
    pub session_list: String,
    pub proposal_list: String,
    /// Query appended to the proposal list for every page after the first.
    pub proposal_list_next_query: String,
    pub attachment_document: String,
    pub session_template: String,
    pub agenda_item_template: String,
    pub proposal_template: String,
    pub timezone: String,
    pub date_format: String,
    pub date_time_format: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ris.example.org/bi/".into(),
            session_long_list: "si0046.asp".into(),
            session_list: "si0040.asp".into(),
            proposal_list: "vo0040.asp".into(),
            proposal_list_next_query: "shownext=true".into(),
            attachment_document: "do027.asp".into(),
            session_template: "si0057.asp?SILFDNR={id}".into(),
            agenda_item_template: "to020.asp?TOLFDNR={id}".into(),
            proposal_template: "vo020.asp?VOLFDNR={id}".into(),
            timezone: "Europe/Berlin".into(),
            date_format: "%d.%m.%Y".into(),
            date_time_format: "%d.%m.%Y %H:%M:%S".into(),
            user_agent: concat!("ris-mirror/", env!("CARGO_PKG_VERSION")).into(),
            request_timeout_secs: 60,
        }
    }
}

impl PortalConfig {
    pub fn validate(&self) -> Result<(), MirrorError> {
        self.base()?;
        self.tz()?;
        for (field, template) in [
            ("session_template", &self.session_template),
            ("agenda_item_template", &self.agenda_item_template),
            ("proposal_template", &self.proposal_template),
        ] {
            if !template.contains(ID_PLACEHOLDER) {
                return Err(MirrorError::Config(format!(
                    "{field} must contain {ID_PLACEHOLDER}: {template}"
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(MirrorError::Config("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    fn base(&self) -> Result<Url, MirrorError> {
        Url::parse(&self.base_url)
            .map_err(|e| MirrorError::Config(format!("invalid base_url {}: {e}", self.base_url)))
    }

    pub fn tz(&self) -> Result<Tz, MirrorError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| MirrorError::Config(format!("unknown timezone {}: {e}", self.timezone)))
    }

    /// Resolves a link as found on a portal page into an absolute URL.
    pub fn resolve(&self, link: &str) -> Result<Url, MirrorError> {
        self.base()?.join(link).map_err(|e| MirrorError::Parse {
            what: format!("link {link}"),
            reason: e.to_string(),
        })
    }

    fn from_template(&self, template: &str, id: u64) -> Result<String, MirrorError> {
        Ok(self
            .resolve(&template.replace(ID_PLACEHOLDER, &id.to_string()))?
            .to_string())
    }

    pub fn session_url(&self, id: u64) -> Result<String, MirrorError> {
        self.from_template(&self.session_template, id)
    }

    pub fn agenda_item_url(&self, id: u64) -> Result<String, MirrorError> {
        self.from_template(&self.agenda_item_template, id)
    }

    pub fn proposal_url(&self, id: u64) -> Result<String, MirrorError> {
        self.from_template(&self.proposal_template, id)
    }

    /// Relative link prefix that identifies agenda-item links on a session page.
    pub fn agenda_item_link_prefix(&self) -> &str {
        self.agenda_item_template
            .split(ID_PLACEHOLDER)
            .next()
            .unwrap_or_default()
    }

    /// Page 0 is the plain list; every later page asks the portal to "show more".
    pub fn proposal_list_url(&self, page: usize) -> Result<String, MirrorError> {
        let link = if page == 0 {
            self.proposal_list.clone()
        } else {
            format!("{}?{}", self.proposal_list, self.proposal_list_next_query)
        };
        Ok(self.resolve(&link)?.to_string())
    }

    pub fn parse_local_date(&self, text: &str) -> Result<DateTime<Utc>, MirrorError> {
        let date = NaiveDate::parse_from_str(text.trim(), &self.date_format).map_err(|e| {
            MirrorError::Parse {
                what: format!("date {text:?}"),
                reason: e.to_string(),
            }
        })?;
        self.local_midnight(date)
    }

    pub fn parse_local_date_time(&self, text: &str) -> Result<DateTime<Utc>, MirrorError> {
        let naive = NaiveDateTime::parse_from_str(text.trim(), &self.date_time_format).map_err(
            |e| MirrorError::Parse {
                what: format!("date/time {text:?}"),
                reason: e.to_string(),
            },
        )?;
        self.localize(naive)
    }

    /// Start of `date` in the portal's timezone.
    pub fn local_midnight(&self, date: NaiveDate) -> Result<DateTime<Utc>, MirrorError> {
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| MirrorError::Parse {
            what: format!("date {date}"),
            reason: "no midnight".into(),
        })?;
        self.localize(midnight)
    }

    fn localize(&self, naive: NaiveDateTime) -> Result<DateTime<Utc>, MirrorError> {
        self.tz()?
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| MirrorError::Parse {
                what: format!("local time {naive}"),
                reason: format!("does not exist in {}", self.timezone),
            })
    }
}

/// Storage folder per category. Agenda items and attachments live below the session
/// folder, which is why session-wide reconciliation has to exclude them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    pub sessions: String,
    pub agenda_items: String,
    pub attachments: String,
    pub proposals: String,
    pub lists: String,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            sessions: "sessions/".into(),
            agenda_items: "sessions/agenda-items/".into(),
            attachments: "sessions/attachments/".into(),
            proposals: "proposals/".into(),
            lists: "lists/".into(),
        }
    }
}

impl FolderConfig {
    pub fn folder_for(&self, category: Category) -> &str {
        match category {
            Category::SessionList | Category::ProposalList => &self.lists,
            Category::Session => &self.sessions,
            Category::AgendaItem => &self.agenda_items,
            Category::Proposal => &self.proposals,
            Category::Attachment | Category::AttachmentDocument => &self.attachments,
        }
    }

    /// Sub-folders reserved for child kinds, never touched by a parent-level reconciliation.
    pub fn child_folders(&self) -> Vec<String> {
        vec![self.attachments.clone(), self.agenda_items.clone()]
    }

    fn validate(&self) -> Result<(), MirrorError> {
        for folder in [
            &self.sessions,
            &self.agenda_items,
            &self.attachments,
            &self.proposals,
            &self.lists,
        ] {
            if folder.is_empty() || !folder.ends_with('/') {
                return Err(MirrorError::Config(format!(
                    "folder {folder:?} must be non-empty and end with '/'"
                )));
            }
        }
        Ok(())
    }
}
