#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use ris_mirror_core::contract::{MockFetcher, StoredResource};
use ris_mirror_core::descriptor::ResourceDescriptor;

pub const BASE: &str = "https://ris.example.org/bi/";

pub fn url(relative: &str) -> String {
    format!("{BASE}{relative}")
}

pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn stored(path: &str, created: DateTime<Utc>) -> StoredResource {
    StoredResource {
        path: path.to_string(),
        content: b"stored".to_vec(),
        fingerprint: "stored".to_string(),
        created,
    }
}

/// A data row of a session list: 8 cells, link in the second, date in the sixth.
pub fn session_row(id: Option<u64>, label: &str, date: &str, time: &str) -> String {
    let link = match id {
        Some(id) => format!(r#"<a href="si0057.asp?SILFDNR={id}">{label}</a>"#),
        None => label.to_string(),
    };
    format!(
        r#"<tr class="zl11"><td>1</td><td>{link}</td><td>-</td><td>-</td><td>-</td><td><a href="si0040.asp?day=1">{date}</a></td><td>{time}</td><td>-</td></tr>"#
    )
}

/// A data row of the proposal list, id in a hidden input, date in the fourth cell.
pub fn proposal_row(id: u64, date: &str) -> String {
    format!(
        r#"<tr class="zl12"><td><input type="hidden" name="VOLFDNR" value="{id}"></td><td>Proposal {id}</td><td>-</td><td>{date}</td><td>-</td><td>-</td><td>-</td><td>-</td></tr>"#
    )
}

pub fn list_page(rows: &[String]) -> String {
    format!(
        "<html><body><table><tr><th>Header</th></tr>{}</table></body></html>",
        rows.join("\n")
    )
}

pub fn committee_options_page(codes: &[u32]) -> String {
    let options: String = codes
        .iter()
        .map(|code| format!(r#"<option value="{code}">Committee {code}</option>"#))
        .collect();
    format!(r#"<html><body><form><select name="GRA">{options}</select></form></body></html>"#)
}

/// A container page with attachments (`(file, label)`) and agenda-item links.
pub fn container_page(attachments: &[(&str, &str)], agenda_items: &[u64]) -> String {
    let agenda: String = agenda_items
        .iter()
        .map(|id| format!(r#"<tr><td><a href="to020.asp?TOLFDNR={id}">TOP {id}</a></td></tr>"#))
        .collect();
    let rows: String = attachments
        .iter()
        .enumerate()
        .map(|(i, (file, label))| {
            format!(
                r#"<tr><td>{i}</td><td>{label}</td><td><a href="images/anlagen/{file}">{label}</a></td></tr>"#
            )
        })
        .collect();
    format!(
        r#"<html><body><div id="allriscontainer">
<table class="tk1"><tr><td>Details</td></tr></table>
<table>{agenda}</table>
<table class="tk1"><tr><th>Anlagen</th></tr><tr><td>Nr</td><td>Name</td></tr><tr><td>-</td><td>-</td></tr>{rows}</table>
</div></body></html>"#
    )
}

/// Key under which the fake portal serves a request: URL plus committee code for list POSTs.
pub fn page_key(resource: &ResourceDescriptor) -> String {
    match resource.form_value("GRA") {
        Some(code) => format!("{}#GRA={code}", resource.request_uri()),
        None => resource.request_uri().to_string(),
    }
}

/// A fetcher serving fixed pages by [`page_key`]; unknown keys fail like a 404.
/// The returned log records every requested key in order.
pub fn fake_portal(pages: Vec<(String, String)>) -> (MockFetcher, Arc<Mutex<Vec<String>>>) {
    let pages: HashMap<String, String> = pages.into_iter().collect();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();
    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .returning(move |_, resource, _, _| {
            let key = page_key(resource);
            log.lock().unwrap().push(key.clone());
            pages
                .get(&key)
                .map(|page| page.clone().into_bytes())
                .ok_or_else(|| format!("404 Not Found: {key}").into())
        });
    (fetcher, requests)
}
