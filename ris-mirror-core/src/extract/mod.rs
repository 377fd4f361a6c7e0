//! Page parsers, one per resource kind.
//!
//! All selectors and DOM-position rules tied to the portal's HTML layout live here, so the
//! crawl and reconciliation logic never sees a DOM. Parsing is synchronous and the parsed
//! document never outlives the call, which keeps the async callers `Send`.

mod children;
mod rows;

pub use children::{extract_children, ContainerChildren, CONTAINER_SELECTOR};
pub use rows::{
    parse_committee_options, parse_proposal_page, parse_session_rows, ProposalPage,
    CALENDAR_OPTION_FLOOR, MIN_ROW_CELLS, ROW_SELECTOR,
};

use scraper::{ElementRef, Selector};

use crate::error::MirrorError;

pub(crate) fn selector(css: &str) -> Result<Selector, MirrorError> {
    Selector::parse(css).map_err(|e| MirrorError::Parse {
        what: format!("selector {css}"),
        reason: format!("{e:?}"),
    })
}

/// Text content with whitespace runs collapsed.
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Direct element children (table cells of a row).
pub(crate) fn cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children().filter_map(ElementRef::wrap).collect()
}

/// Integer value of the first `<input name=...>` below `scope`; `None` when the input is
/// missing or not numeric.
pub(crate) fn input_int(scope: ElementRef<'_>, name: &str) -> Result<Option<i64>, MirrorError> {
    let input = selector(&format!(r#"input[name="{name}"]"#))?;
    Ok(scope
        .select(&input)
        .next()
        .and_then(|el| el.value().attr("value"))
        .and_then(|value| value.trim().parse::<i64>().ok()))
}
