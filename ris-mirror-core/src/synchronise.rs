//! Top-level crawls: discover sessions and proposals from the portal's index pages.
//!
//! Each crawl fetches one or more index pages, keeps the rows created after a time floor,
//! hands the batch to a [`FanOut`] and, for authoritative crawls, reconciles the whole
//! category folder against what was just discovered.
//!
//! # Entry points
//! - [`SessionListCrawler::synchronize_since`]: long session list, fails on an empty list.
//! - [`SessionListCrawler::download_last_n_per_committee`]: bounded refresh per committee,
//!   tolerant of committees that fail; never deletes anything.
//! - [`ProposalListCrawler::synchronize_since`]: paginated proposal list, newest first.
//!
//! Every fetched index page is stored under the lists folder as well.
//!
//! # Error Handling
//! A failing top-level index fetch or parse aborts the crawl. Malformed rows are skipped
//! while parsing. Reconciliation only runs after a complete, uncancelled discovery.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::change::{page_fingerprint, persist_if_changed};
use crate::config::MirrorConfig;
use crate::contract::{content_type, Fetcher, HttpMethod, Storage};
use crate::descriptor::{Category, ResourceDescriptor};
use crate::dispatch::FanOut;
use crate::download::fetch_resource;
use crate::error::MirrorError;
use crate::extract::{parse_committee_options, parse_proposal_page, parse_session_rows};
use crate::reconcile::{reconcile, ReconciliationSet};

/// Runaway guard for proposal pagination.
pub const MAX_PROPOSAL_PAGES: usize = 1000;

/// Committee code that selects every committee in the long session list.
const ALL_COMMITTEES: &str = "99999999";

/// Sessions discovered for one committee option during a last-N refresh.
#[derive(Debug, Clone)]
pub struct Committee {
    pub code: u32,
    pub sessions: Vec<ResourceDescriptor>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Index pages fetched.
    pub pages: usize,
    /// Fetchable rows handed to the fan-out.
    pub kept: usize,
    /// Calendar-only rows seen after the floor; logged, never dispatched.
    pub placeholders: usize,
    pub fanned_out: usize,
    /// Committees skipped because their list could not be fetched or parsed.
    pub skipped_committees: usize,
    pub deleted: Vec<String>,
}

/// An index page as fetched: raw bytes for storage, a lossy decode for parsing.
struct FetchedIndex {
    body: Vec<u8>,
    html: String,
}

impl FetchedIndex {
    fn new(body: Vec<u8>) -> Self {
        let html = String::from_utf8_lossy(&body).into_owned();
        Self { body, html }
    }
}

/// Collaborators shared by both crawlers.
struct Crawl {
    config: Arc<MirrorConfig>,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn Storage>,
    fan_out: Arc<dyn FanOut>,
}

impl Crawl {
    fn index_page(
        &self,
        category: Category,
        name: impl Into<String>,
        url: String,
        form: &[(&str, String)],
    ) -> ResourceDescriptor {
        ResourceDescriptor::new(category, name, ".html", Utc::now(), url).with_form_payload(
            form.iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        )
    }

    async fn fetch_index(
        &self,
        page: &ResourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<FetchedIndex, MirrorError> {
        let method = if page.form_payload().is_empty() {
            HttpMethod::Get
        } else {
            HttpMethod::Post
        };
        let body = fetch_resource(
            self.fetcher.as_ref(),
            method,
            page,
            content_type::HTML,
            cancel,
        )
        .await
        .map_err(|e| e.context(format!("fetching index page {}", page.name())))?;
        Ok(FetchedIndex::new(body))
    }

    /// Stores an index page once it has parsed. The fetched bytes are stored as-is.
    async fn persist_index(
        &self,
        page: &ResourceDescriptor,
        fetched: &FetchedIndex,
    ) -> Result<(), MirrorError> {
        persist_if_changed(
            self.storage.as_ref(),
            &page.storage_path(&self.config.folders),
            &fetched.body,
            &page_fingerprint(&fetched.html),
            page.created(),
        )
        .await?;
        Ok(())
    }

    fn with_redownload(&self, batch: Vec<ResourceDescriptor>) -> Vec<ResourceDescriptor> {
        let redownload = self.config.redownload;
        batch
            .into_iter()
            .map(|resource| resource.with_redownload(redownload))
            .collect()
    }

    fn paths(&self, batch: &[ResourceDescriptor]) -> ReconciliationSet {
        batch
            .iter()
            .map(|resource| resource.storage_path(&self.config.folders))
            .collect()
    }

    /// Fans out `batch`, then reconciles `folder` against it. Skips the deletion pass when
    /// the crawl was cancelled on the way.
    async fn fan_out_and_reconcile(
        &self,
        batch: Vec<ResourceDescriptor>,
        folder: &str,
        min_time: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), MirrorError> {
        let keep = self.paths(&batch);
        report.fanned_out = self.fan_out.fan_out(batch, cancel).await?;
        if cancel.is_cancelled() {
            warn!(folder, "[CRAWL] Cancelled after fan-out, skipping reconciliation");
            return Err(MirrorError::Cancelled {
                operation: format!("reconciliation of {folder}"),
            });
        }
        report.deleted = reconcile(
            self.storage.as_ref(),
            folder,
            &keep,
            &self.config.folders.child_folders(),
            Some(min_time),
            cancel,
        )
        .await?;
        Ok(())
    }
}

pub struct SessionListCrawler {
    crawl: Crawl,
}

impl SessionListCrawler {
    pub fn new(
        config: Arc<MirrorConfig>,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn Storage>,
        fan_out: Arc<dyn FanOut>,
    ) -> Self {
        Self {
            crawl: Crawl {
                config,
                fetcher,
                storage,
                fan_out,
            },
        }
    }

    /// Full session sync: every session of the long list created after `min_time` is
    /// fanned out, then stale sessions at or after `min_time` are deleted.
    pub async fn synchronize_since(
        &self,
        min_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, MirrorError> {
        let portal = &self.crawl.config.portal;
        info!(since = %min_time, "[CRAWL] Synchronising sessions");

        let index = self.crawl.index_page(
            Category::SessionList,
            "all-sessions",
            portal.resolve(&portal.session_long_list)?.to_string(),
            &[("GRA", ALL_COMMITTEES.to_string()), ("filtGRA", "filter".to_string())],
        );
        let fetched = self.crawl.fetch_index(&index, cancel).await?;
        let rows = parse_session_rows(&fetched.html, portal)?;
        if rows.is_empty() {
            error!(url = %index.request_uri(), "[CRAWL] Session long list has no rows");
            return Err(MirrorError::EmptyIndex {
                url: index.request_uri().to_string(),
            });
        }
        self.crawl.persist_index(&index, &fetched).await?;

        let mut report = SyncReport {
            pages: 1,
            ..SyncReport::default()
        };
        let mut batch = Vec::new();
        for row in rows.into_iter().filter(|row| row.created() > min_time) {
            if row.is_placeholder() {
                report.placeholders += 1;
            } else {
                batch.push(row);
            }
        }
        report.kept = batch.len();
        info!(
            kept = report.kept,
            placeholders = report.placeholders,
            "[CRAWL] Sessions after floor"
        );

        let batch = self.crawl.with_redownload(batch);
        let sessions = self.crawl.config.folders.sessions.clone();
        self.crawl
            .fan_out_and_reconcile(batch, &sessions, min_time, cancel, &mut report)
            .await?;
        info!(
            fanned_out = report.fanned_out,
            deleted = report.deleted.len(),
            "[CRAWL] Session sync finished"
        );
        Ok(report)
    }

    /// Refreshes the `n` most recent sessions of every committee. A committee whose list
    /// fails is logged and skipped. Nothing is deleted.
    pub async fn download_last_n_per_committee(
        &self,
        n: usize,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, MirrorError> {
        let portal = &self.crawl.config.portal;
        let list_url = portal.resolve(&portal.session_list)?.to_string();
        info!(n, "[CRAWL] Refreshing last sessions per committee");

        let options_page =
            self.crawl
                .index_page(Category::SessionList, "committee-options", list_url.clone(), &[]);
        let fetched = self.crawl.fetch_index(&options_page, cancel).await?;
        let codes = parse_committee_options(&fetched.html)?;
        self.crawl.persist_index(&options_page, &fetched).await?;

        let mut report = SyncReport {
            pages: 1,
            ..SyncReport::default()
        };
        let mut committees = Vec::new();
        for code in codes {
            if cancel.is_cancelled() {
                return Err(MirrorError::Cancelled {
                    operation: "committee crawl".into(),
                });
            }
            let page = self.crawl.index_page(
                Category::SessionList,
                format!("committee-{code}"),
                list_url.clone(),
                &[("GRA", code.to_string()), ("filtGRA", "filter".to_string())],
            );
            match self.committee(code, &page, n, cancel).await {
                Ok((committee, placeholders)) => {
                    report.pages += 1;
                    report.placeholders += placeholders;
                    committees.push(committee);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(code, error = %e, "[CRAWL] Skipping committee");
                    report.skipped_committees += 1;
                }
            }
        }

        let mut seen = HashSet::new();
        let folders = &self.crawl.config.folders;
        let batch: Vec<ResourceDescriptor> = committees
            .into_iter()
            .flat_map(|committee| committee.sessions)
            .filter(|session| seen.insert(session.storage_path(folders)))
            .collect();
        report.kept = batch.len();

        let batch = self.crawl.with_redownload(batch);
        report.fanned_out = self.crawl.fan_out.fan_out(batch, cancel).await?;
        info!(
            fanned_out = report.fanned_out,
            skipped_committees = report.skipped_committees,
            "[CRAWL] Last-N refresh finished"
        );
        Ok(report)
    }

    /// First `n` fetchable rows of one committee's list, plus the placeholders passed over.
    async fn committee(
        &self,
        code: u32,
        page: &ResourceDescriptor,
        n: usize,
        cancel: &CancellationToken,
    ) -> Result<(Committee, usize), MirrorError> {
        let fetched = self.crawl.fetch_index(page, cancel).await?;
        let rows = parse_session_rows(&fetched.html, &self.crawl.config.portal)?;
        if rows.is_empty() {
            return Err(MirrorError::EmptyIndex {
                url: format!("{} (committee {code})", page.request_uri()),
            });
        }
        self.crawl.persist_index(page, &fetched).await?;

        let mut placeholders = 0;
        let mut sessions = Vec::new();
        for row in rows {
            if sessions.len() == n {
                break;
            }
            if row.is_placeholder() {
                placeholders += 1;
            } else {
                sessions.push(row);
            }
        }
        info!(code, sessions = sessions.len(), placeholders, "[CRAWL] Committee listed");
        Ok((Committee { code, sessions }, placeholders))
    }
}

pub struct ProposalListCrawler {
    crawl: Crawl,
}

impl ProposalListCrawler {
    pub fn new(
        config: Arc<MirrorConfig>,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn Storage>,
        fan_out: Arc<dyn FanOut>,
    ) -> Self {
        Self {
            crawl: Crawl {
                config,
                fetcher,
                storage,
                fan_out,
            },
        }
    }

    /// Pages through the newest-first proposal list until a page has no row after
    /// `min_time` or holds a row at or before it, then fans out and reconciles.
    pub async fn synchronize_since(
        &self,
        min_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, MirrorError> {
        let portal = &self.crawl.config.portal;
        info!(since = %min_time, "[CRAWL] Synchronising proposals");

        let mut report = SyncReport::default();
        let mut batch = Vec::new();
        for page_number in 0..MAX_PROPOSAL_PAGES {
            if cancel.is_cancelled() {
                return Err(MirrorError::Cancelled {
                    operation: "proposal list crawl".into(),
                });
            }
            let index = self.crawl.index_page(
                Category::ProposalList,
                format!("proposals-{page_number}"),
                portal.proposal_list_url(page_number)?,
                &[],
            );
            let fetched = self.crawl.fetch_index(&index, cancel).await?;
            let page = parse_proposal_page(&fetched.html, portal, min_time)
                .map_err(|e| e.context(format!("parsing proposal page {page_number}")))?;
            self.crawl.persist_index(&index, &fetched).await?;
            report.pages += 1;

            let new_rows = page.rows.len() + page.placeholders;
            report.placeholders += page.placeholders;
            batch.extend(page.rows);
            info!(
                page = page_number,
                new_rows,
                limit_reached = page.limit_reached,
                "[CRAWL] Proposal page parsed"
            );
            if new_rows == 0 || page.limit_reached {
                break;
            }
        }
        report.kept = batch.len();

        let batch = self.crawl.with_redownload(batch);
        let proposals = self.crawl.config.folders.proposals.clone();
        self.crawl
            .fan_out_and_reconcile(batch, &proposals, min_time, cancel, &mut report)
            .await?;
        info!(
            pages = report.pages,
            kept = report.kept,
            deleted = report.deleted.len(),
            "[CRAWL] Proposal sync finished"
        );
        Ok(report)
    }
}
