use chrono::{DateTime, Utc};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use super::{cells, input_int, selector, text_of};
use crate::config::PortalConfig;
use crate::descriptor::{proposal_name, session_name, Category, ResourceDescriptor};
use crate::error::MirrorError;

/// Data rows of every portal list, alternating between two row classes.
pub const ROW_SELECTOR: &str = "tr.zl11, tr.zl12";

/// Rows with fewer cells are layout rows, not list entries.
pub const MIN_ROW_CELLS: usize = 8;

/// Committee option codes from here on are calendar pseudo-entries.
pub const CALENDAR_OPTION_FLOOR: u32 = 1000;

const SESSION_ID_PARAM: &str = "SILFDNR";
const PROPOSAL_ID_INPUT: &str = "VOLFDNR";
const COMMITTEE_OPTIONS: &str = r#"select[name="GRA"] option"#;

/// Parses a session list (long list or per-committee list) in page order.
///
/// Rows without a session id but with a date come back as placeholders (empty URL).
/// A row whose date cannot be parsed is logged and skipped.
pub fn parse_session_rows(
    html: &str,
    portal: &PortalConfig,
) -> Result<Vec<ResourceDescriptor>, MirrorError> {
    let document = Html::parse_document(html);
    let rows = selector(ROW_SELECTOR)?;
    let anchor = selector("a")?;

    let mut sessions = Vec::new();
    for row in document.select(&rows) {
        let cells = cells(row);
        if cells.len() < MIN_ROW_CELLS {
            continue;
        }
        match parse_session_row(&cells, &anchor, portal) {
            Ok(Some(session)) => sessions.push(session),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "[CRAWL] Skipping malformed session row"),
        }
    }
    Ok(sessions)
}

fn parse_session_row(
    cells: &[ElementRef<'_>],
    anchor: &Selector,
    portal: &PortalConfig,
) -> Result<Option<ResourceDescriptor>, MirrorError> {
    let link = cells[1].select(anchor).next();
    let href = link
        .and_then(|a| a.value().attr("href"))
        .unwrap_or_default()
        .trim();
    let title = link.map(text_of).unwrap_or_default();
    let date_text = cells[5]
        .select(anchor)
        .next()
        .map(text_of)
        .unwrap_or_else(|| text_of(cells[5]));
    let time_cell = text_of(cells[6]);
    let start_time = time_cell.split(" - ").next().unwrap_or_default().trim();

    let session_id = if href.is_empty() {
        None
    } else {
        query_param(&portal.resolve(href)?, SESSION_ID_PARAM)
    };

    match session_id {
        Some(raw_id) => {
            let id = raw_id.parse::<u64>().map_err(|e| MirrorError::Parse {
                what: format!("session id {raw_id:?}"),
                reason: e.to_string(),
            })?;
            let created = session_start(portal, &date_text, start_time)?;
            info!(id, title = %title, date = %date_text, "[CRAWL] Found session");
            Ok(Some(ResourceDescriptor::new(
                Category::Session,
                session_name(id),
                ".html",
                created,
                portal.session_url(id)?,
            )))
        }
        None if !date_text.is_empty() => {
            let created = session_start(portal, &date_text, start_time)?;
            let label = text_of(cells[1]);
            info!(label = %label, date = %date_text, "[CRAWL] Found calendar entry");
            Ok(Some(ResourceDescriptor::placeholder(
                Category::Session,
                label,
                created,
            )))
        }
        None => {
            debug!(title = %title, "[CRAWL] Empty session row");
            Ok(None)
        }
    }
}

fn session_start(
    portal: &PortalConfig,
    date: &str,
    start_time: &str,
) -> Result<DateTime<Utc>, MirrorError> {
    let time = if start_time.is_empty() { "00:00" } else { start_time };
    portal.parse_local_date_time(&format!("{date} {time}:00"))
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Committee option codes of the session list's committee selector, calendar
/// pseudo-entries (codes at or above [`CALENDAR_OPTION_FLOOR`]) removed.
pub fn parse_committee_options(html: &str) -> Result<Vec<u32>, MirrorError> {
    let document = Html::parse_document(html);
    let options = selector(COMMITTEE_OPTIONS)?;

    let mut codes = Vec::new();
    for option in document.select(&options) {
        let Some(value) = option.value().attr("value") else {
            continue;
        };
        match value.trim().parse::<u32>() {
            Ok(code) if code < CALENDAR_OPTION_FLOOR => codes.push(code),
            Ok(code) => debug!(code, "[CRAWL] Ignoring calendar pseudo-committee"),
            Err(e) => warn!(value, error = %e, "[CRAWL] Ignoring non-numeric committee option"),
        }
    }
    Ok(codes)
}

/// One page of the proposal list, split at the time floor.
#[derive(Debug, Default)]
pub struct ProposalPage {
    /// Fetchable proposals created strictly after the floor.
    pub rows: Vec<ResourceDescriptor>,
    /// Calendar-only rows after the floor; counted, never dispatched.
    pub placeholders: usize,
    /// Some row was at or before the floor. The list is newest-first, so nothing
    /// further down (or on later pages) can be new.
    pub limit_reached: bool,
}

pub fn parse_proposal_page(
    html: &str,
    portal: &PortalConfig,
    min_time: DateTime<Utc>,
) -> Result<ProposalPage, MirrorError> {
    let document = Html::parse_document(html);
    let rows = selector(ROW_SELECTOR)?;

    let mut page = ProposalPage::default();
    for row in document.select(&rows) {
        let cells = cells(row);
        if cells.len() < MIN_ROW_CELLS {
            continue;
        }
        let proposal = match parse_proposal_row(row, &cells, portal) {
            Ok(proposal) => proposal,
            Err(e) => {
                warn!(error = %e, "[CRAWL] Skipping malformed proposal row");
                continue;
            }
        };
        if proposal.created() > min_time {
            if proposal.is_placeholder() {
                page.placeholders += 1;
            } else {
                page.rows.push(proposal);
            }
        } else {
            page.limit_reached = true;
        }
    }
    Ok(page)
}

fn parse_proposal_row(
    row: ElementRef<'_>,
    cells: &[ElementRef<'_>],
    portal: &PortalConfig,
) -> Result<ResourceDescriptor, MirrorError> {
    let date_text = text_of(cells[3]);
    if date_text.is_empty() {
        return Err(MirrorError::Parse {
            what: "proposal row".into(),
            reason: "no created date".into(),
        });
    }
    let created = portal.parse_local_date(&date_text)?;

    match input_int(row, PROPOSAL_ID_INPUT)?.filter(|id| *id > 0) {
        Some(id) => {
            let id = id as u64;
            Ok(ResourceDescriptor::new(
                Category::Proposal,
                proposal_name(id),
                ".html",
                created,
                portal.proposal_url(id)?,
            ))
        }
        None => Ok(ResourceDescriptor::placeholder(
            Category::Proposal,
            text_of(cells[1]),
            created,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session_row(id: Option<u64>, label: &str, date: &str, time: &str) -> String {
        let link = match id {
            Some(id) => format!(r#"<a href="si0057.asp?__ksinr=1&amp;SILFDNR={id}">{label}</a>"#),
            None => label.to_string(),
        };
        format!(
            r#"<tr class="zl11"><td>1</td><td>{link}</td><td>-</td><td>-</td><td>-</td><td><a href="cal">{date}</a></td><td>{time}</td><td>-</td></tr>"#
        )
    }

    fn table(rows: &[String]) -> String {
        format!("<html><body><table>{}</table></body></html>", rows.join(""))
    }

    #[test]
    fn session_rows_become_descriptors_and_placeholders() {
        let html = table(&[
            session_row(Some(101), "Council", "10.01.2024", "18:00 - 20:00"),
            session_row(None, "Holiday", "11.01.2024", ""),
            session_row(None, "", "", ""),
        ]);
        let rows = parse_session_rows(&html, &PortalConfig::default()).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].name(), "session-101");
        assert_eq!(
            rows[0].request_uri(),
            "https://ris.example.org/bi/si0057.asp?SILFDNR=101"
        );
        assert_eq!(
            rows[0].created(),
            Utc.with_ymd_and_hms(2024, 1, 10, 17, 0, 0).unwrap()
        );
        assert!(rows[1].is_placeholder());
        assert_eq!(rows[1].name(), "Holiday");
    }

    #[test]
    fn short_rows_and_bad_dates_are_skipped() {
        let short = r#"<tr class="zl12"><td><a href="si0057.asp?SILFDNR=7">x</a></td><td>y</td></tr>"#;
        let html = table(&[
            short.to_string(),
            session_row(Some(8), "Bad date", "31.02.2024", "10:00"),
            session_row(Some(9), "Good", "01.02.2024", "10:00"),
        ]);
        let rows = parse_session_rows(&html, &PortalConfig::default()).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["session-9"]);
    }

    #[test]
    fn committee_options_stop_below_calendar_codes() {
        let html = r#"<form><select name="GRA">
            <option value="1">Council</option>
            <option value="999">Last committee</option>
            <option value="1000">Calendar</option>
            <option value="4711">Holidays</option>
            <option value="abc">Broken</option>
            <option>No value</option>
        </select></form>"#;
        assert_eq!(parse_committee_options(html).unwrap(), vec![1, 999]);
    }

    fn proposal_row(id: Option<u64>, date: &str) -> String {
        let input = id
            .map(|id| format!(r#"<input type="hidden" name="VOLFDNR" value="{id}">"#))
            .unwrap_or_default();
        format!(
            r#"<tr class="zl12"><td>{input}</td><td>Title</td><td>-</td><td>{date}</td><td>-</td><td>-</td><td>-</td><td>-</td></tr>"#
        )
    }

    #[test]
    fn proposal_page_splits_at_floor() {
        let html = table(&[
            proposal_row(Some(3), "12.01.2024"),
            proposal_row(None, "11.01.2024"),
            proposal_row(Some(2), "09.01.2024"),
            proposal_row(Some(1), "kein Datum"),
        ]);
        let floor = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let page = parse_proposal_page(&html, &PortalConfig::default(), floor).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].name(), "proposal-3");
        assert_eq!(page.placeholders, 1);
        assert!(page.limit_reached);
    }
}
