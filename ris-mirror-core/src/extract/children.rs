use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, info, warn};

use super::{cells, input_int, selector, text_of};
use crate::config::PortalConfig;
use crate::descriptor::{
    agenda_item_name, attachment_document_name, attachment_name, Category, ResourceDescriptor,
    DOCUMENT_OPTIONS_FIELD,
};
use crate::error::MirrorError;

/// Content area of session, agenda-item and proposal pages.
pub const CONTAINER_SELECTOR: &str = "#allriscontainer";

const DEFAULT_SIZE: &str = "0 kb";

/// Child descriptors found on one container page, per kind.
#[derive(Debug, Default)]
pub struct ContainerChildren {
    pub attachments: Vec<ResourceDescriptor>,
    pub documents: Vec<ResourceDescriptor>,
    pub agenda_items: Vec<ResourceDescriptor>,
}

impl ContainerChildren {
    pub fn len(&self) -> usize {
        self.attachments.len() + self.documents.len() + self.agenda_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extracts all children of `parent` from its page. A kind whose markup is broken yields
/// no children; the other kinds are unaffected.
pub fn extract_children(
    html: &str,
    parent: &ResourceDescriptor,
    portal: &PortalConfig,
) -> ContainerChildren {
    let document = Html::parse_document(html);
    let mut children = ContainerChildren::default();

    match selector(CONTAINER_SELECTOR) {
        Ok(content) => {
            for container in document.select(&content) {
                children.attachments.extend(per_kind(
                    "attachments",
                    parent,
                    extract_attachments(container, parent, portal),
                ));
                children.documents.extend(per_kind(
                    "attachment documents",
                    parent,
                    extract_documents(container, parent, portal),
                ));
            }
        }
        Err(e) => warn!(error = %e, "[EXPAND] Content selector unusable"),
    }

    if parent.category() == Category::Session {
        children.agenda_items = per_kind(
            "agenda items",
            parent,
            extract_agenda_items(&document, parent, portal),
        );
    }

    info!(
        parent = %parent,
        attachments = children.attachments.len(),
        documents = children.documents.len(),
        agenda_items = children.agenda_items.len(),
        "[EXPAND] Extracted children"
    );
    children
}

fn per_kind(
    kind: &str,
    parent: &ResourceDescriptor,
    extracted: Result<Vec<ResourceDescriptor>, MirrorError>,
) -> Vec<ResourceDescriptor> {
    extracted.unwrap_or_else(|e| {
        warn!(kind, parent = %parent, error = %e, "[EXPAND] Extraction failed, no children of this kind");
        Vec::new()
    })
}

fn size_pattern() -> &'static Regex {
    static SIZE: OnceLock<Regex> = OnceLock::new();
    SIZE.get_or_init(|| Regex::new(r"(.*)\(([0-9]+\s*KB)\)").expect("size pattern is valid"))
}

/// Attachments sit in the last `table.tk1` of the content area, one per row from the
/// fourth row on; the third cell links the file and states its size, e.g. `Plan (12 KB)`.
fn extract_attachments(
    container: ElementRef<'_>,
    parent: &ResourceDescriptor,
    portal: &PortalConfig,
) -> Result<Vec<ResourceDescriptor>, MirrorError> {
    let tables: Vec<ElementRef<'_>> = container.select(&selector("table.tk1")?).collect();
    if tables.len() <= 1 {
        return Ok(Vec::new());
    }
    let Some(table) = tables.last() else {
        return Ok(Vec::new());
    };

    let rows: Vec<ElementRef<'_>> = table.select(&selector("tr")?).collect();
    if rows.len() < 2 || cells(rows[1]).len() < 2 {
        debug!(parent = %parent, "[EXPAND] Attachment table too short");
        return Ok(Vec::new());
    }

    let td = selector("td")?;
    let mut attachments = Vec::new();
    for row in rows.iter().skip(3) {
        let tds: Vec<ElementRef<'_>> = row.select(&td).collect();
        if tds.len() < 3 {
            continue;
        }
        let Some(link) = tds[2].children().find_map(ElementRef::wrap) else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default().trim();
        if href.is_empty() {
            continue;
        }

        let description = text_of(link);
        let size = size_pattern()
            .captures(&description)
            .and_then(|c| c.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| DEFAULT_SIZE.to_string());
        let file_token = href.rsplit('/').next().unwrap_or(href);

        let url = match portal.resolve(href) {
            Ok(url) => url,
            Err(e) => {
                warn!(href, error = %e, "[EXPAND] Skipping attachment with unusable link");
                continue;
            }
        };
        attachments.push(
            ResourceDescriptor::new(
                Category::Attachment,
                attachment_name(parent.name(), &size, file_token),
                "",
                parent.created(),
                url.to_string(),
            )
            .with_redownload(parent.redownload()),
        );
    }
    Ok(attachments)
}

/// Attachment documents are rendered on request: each is a form in the first
/// `.me1 > table.tk1` that POSTs `options`, `DOLFDNR` and `annots` to a fixed endpoint.
fn extract_documents(
    container: ElementRef<'_>,
    parent: &ResourceDescriptor,
    portal: &PortalConfig,
) -> Result<Vec<ResourceDescriptor>, MirrorError> {
    let Some(table) = container.select(&selector(".me1 > table.tk1")?).next() else {
        return Ok(Vec::new());
    };
    let forms = selector(&format!(
        r#"form[action="{}"]"#,
        portal.attachment_document
    ))?;
    let endpoint = portal.resolve(&portal.attachment_document)?.to_string();

    let mut documents = Vec::new();
    for form in table.select(&forms) {
        let document_id = input_int(form, "DOLFDNR")?.unwrap_or(0);
        if document_id <= 0 {
            warn!(parent = %parent, "[EXPAND] Skipping document form without DOLFDNR");
            continue;
        }
        let options = input_int(form, DOCUMENT_OPTIONS_FIELD)?.unwrap_or(0);
        let annots = input_int(form, "annots")?.unwrap_or(0);
        let document_id = document_id as u64;

        documents.push(
            ResourceDescriptor::new(
                Category::AttachmentDocument,
                attachment_document_name(parent.name(), document_id),
                ".pdf",
                parent.created(),
                endpoint.clone(),
            )
            .with_form_payload(vec![
                (DOCUMENT_OPTIONS_FIELD.to_string(), options.to_string()),
                ("DOLFDNR".to_string(), document_id.to_string()),
                ("annots".to_string(), annots.to_string()),
            ])
            .with_redownload(parent.redownload()),
        );
    }
    Ok(documents)
}

/// Agenda items are the table links of a session page that point at the agenda-item
/// endpoint. The same item linked twice is emitted once.
fn extract_agenda_items(
    document: &Html,
    parent: &ResourceDescriptor,
    portal: &PortalConfig,
) -> Result<Vec<ResourceDescriptor>, MirrorError> {
    let links = selector("table a")?;
    let prefix = portal.agenda_item_link_prefix();
    let id_pattern =
        Regex::new(&format!("^{}([0-9]+)", regex::escape(prefix))).map_err(|e| {
            MirrorError::Parse {
                what: format!("agenda link prefix {prefix}"),
                reason: e.to_string(),
            }
        })?;

    let mut seen = HashSet::new();
    let mut agenda_items = Vec::new();
    for link in document.select(&links) {
        let href = link.value().attr("href").unwrap_or_default().trim();
        let Some(id) = id_pattern
            .captures(href)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        else {
            continue;
        };
        if id == 0 || !seen.insert(id) {
            continue;
        }
        agenda_items.push(
            ResourceDescriptor::new(
                Category::AgendaItem,
                agenda_item_name(parent.name(), id),
                ".html",
                parent.created(),
                portal.agenda_item_url(id)?,
            )
            .with_redownload(parent.redownload()),
        );
    }
    Ok(agenda_items)
}
