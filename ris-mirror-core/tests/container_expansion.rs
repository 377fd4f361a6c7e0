mod common;

use std::sync::Arc;

use ris_mirror_core::change::page_fingerprint;
use ris_mirror_core::config::MirrorConfig;
use ris_mirror_core::contract::{Fetcher, Storage, StoredResource};
use ris_mirror_core::descriptor::{Category, ResourceDescriptor};
use ris_mirror_core::dispatch::{DispatchOutcome, Dispatcher, FanOutMode, MockFanOut};
use ris_mirror_core::download::ContainerDownloader;
use ris_mirror_core::storage::MemoryStorage;
use ris_mirror_core::MirrorError;
use tokio_util::sync::CancellationToken;

use common::*;

fn session_101() -> ResourceDescriptor {
    ResourceDescriptor::new(
        Category::Session,
        "session-101",
        ".html",
        utc(2024, 1, 10),
        url("si0057.asp?SILFDNR=101"),
    )
}

fn session_101_page() -> String {
    container_page(&[("plan.pdf", "Plan (12 KB)"), ("karte.pdf", "Karte (3 KB)")], &[55])
}

/// Storage holding, for session 101, one stale attachment and one stale agenda item,
/// next to children of other containers that must survive.
fn seeded_storage() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    for path in [
        "sessions/attachments/session-101-attachment-1kb-old.pdf",
        "sessions/attachments/session-101-attachment-12kb-plan.pdf",
        "sessions/attachments/session-1010-attachment-2kb-other.pdf",
        "sessions/attachments/session-101-agenda-55-attachment-4kb-top.pdf",
        "sessions/agenda-items/session-101-agenda-54.html",
        "sessions/agenda-items/session-12-agenda-54.html",
        "sessions/session-99.html",
    ] {
        storage.insert(stored(path, utc(2023, 6, 1))).unwrap();
    }
    storage
}

fn counting_fan_out() -> MockFanOut {
    let mut fan_out = MockFanOut::new();
    fan_out
        .expect_fan_out()
        .returning(|batch, _| Ok(batch.len()));
    fan_out
}

#[tokio::test]
async fn reconciliation_is_scoped_to_the_container_namespace() {
    let (fetcher, _) = fake_portal(vec![(url("si0057.asp?SILFDNR=101"), session_101_page())]);
    let storage = seeded_storage();
    let downloader = ContainerDownloader::new(
        Arc::new(MirrorConfig::default()),
        Arc::new(fetcher),
        storage.clone(),
    );

    let report = downloader
        .expand(&session_101(), &counting_fan_out(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.written);
    assert_eq!(report.children, 3);
    assert_eq!(
        report.deleted,
        vec![
            "sessions/attachments/session-101-attachment-1kb-old.pdf",
            "sessions/agenda-items/session-101-agenda-54.html",
        ]
    );
    assert_eq!(
        storage.paths().unwrap(),
        vec![
            "sessions/agenda-items/session-12-agenda-54.html",
            "sessions/attachments/session-101-agenda-55-attachment-4kb-top.pdf",
            "sessions/attachments/session-101-attachment-12kb-plan.pdf",
            "sessions/attachments/session-1010-attachment-2kb-other.pdf",
            "sessions/session-101.html",
            "sessions/session-99.html",
        ]
    );
}

#[tokio::test]
async fn cancellation_during_fan_out_deletes_nothing() {
    let (fetcher, _) = fake_portal(vec![(url("si0057.asp?SILFDNR=101"), session_101_page())]);
    let storage = seeded_storage();
    let before = storage.paths().unwrap();

    let mut fan_out = MockFanOut::new();
    fan_out.expect_fan_out().returning(|batch, cancel| {
        cancel.cancel();
        Ok(batch.len() / 2)
    });

    let downloader = ContainerDownloader::new(
        Arc::new(MirrorConfig::default()),
        Arc::new(fetcher),
        storage.clone(),
    );
    let err = downloader
        .expand(&session_101(), &fan_out, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "got {err}");
    for path in before {
        assert!(storage.exists(&path).await.unwrap(), "{path} was deleted");
    }
}

#[tokio::test]
async fn failing_child_aborts_before_reconciliation() {
    // The plan attachment is missing upstream, so its leaf download fails.
    let (fetcher, _) = fake_portal(vec![
        (url("si0057.asp?SILFDNR=101"), session_101_page()),
        (url("images/anlagen/karte.pdf"), "%PDF karte".to_string()),
        (url("to020.asp?TOLFDNR=55"), container_page(&[], &[])),
    ]);
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert(stored(
            "sessions/attachments/session-101-attachment-1kb-old.pdf",
            utc(2023, 6, 1),
        ))
        .unwrap();
    let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
    let dispatcher = Dispatcher::new(
        Arc::new(MirrorConfig::default()),
        fetcher,
        storage.clone(),
        FanOutMode::Inline,
    );

    let err = dispatcher
        .dispatch(&session_101(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(!err.is_fatal());
    assert!(err.to_string().contains("images/anlagen/plan.pdf"), "got {err}");
    assert!(storage
        .exists("sessions/attachments/session-101-attachment-1kb-old.pdf")
        .await
        .unwrap());
}

#[tokio::test]
async fn unchanged_page_is_not_rewritten_but_still_expanded() {
    let page = session_101_page();
    let (fetcher, _) = fake_portal(vec![(url("si0057.asp?SILFDNR=101"), page.clone())]);
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert(StoredResource {
            path: "sessions/session-101.html".into(),
            content: page.clone().into_bytes(),
            fingerprint: page_fingerprint(&page),
            created: utc(2024, 1, 10),
        })
        .unwrap();

    let downloader = ContainerDownloader::new(
        Arc::new(MirrorConfig::default()),
        Arc::new(fetcher),
        storage.clone(),
    );
    let report = downloader
        .expand(&session_101(), &counting_fan_out(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.written);
    assert_eq!(report.fanned_out, 3);
}

#[tokio::test]
async fn proposals_reconcile_attachments_but_have_no_agenda_items() {
    let proposal = ResourceDescriptor::new(
        Category::Proposal,
        "proposal-7",
        ".html",
        utc(2024, 1, 10),
        url("vo020.asp?VOLFDNR=7"),
    );
    let (fetcher, _) = fake_portal(vec![(
        url("vo020.asp?VOLFDNR=7"),
        container_page(&[("antrag.pdf", "Antrag (40 KB)")], &[55]),
    )]);
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert(stored(
            "sessions/attachments/proposal-7-attachment-1kb-old.pdf",
            utc(2023, 6, 1),
        ))
        .unwrap();
    let downloader = ContainerDownloader::new(
        Arc::new(MirrorConfig::default()),
        Arc::new(fetcher),
        storage.clone(),
    );

    let report = downloader
        .expand(&proposal, &counting_fan_out(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.children, 1);
    assert_eq!(
        report.deleted,
        vec!["sessions/attachments/proposal-7-attachment-1kb-old.pdf"]
    );
    assert!(storage.exists("proposals/proposal-7.html").await.unwrap());
}

#[tokio::test]
async fn dispatching_an_index_page_is_fatal() {
    let dispatcher = Dispatcher::new(
        Arc::new(MirrorConfig::default()),
        Arc::new(ris_mirror_core::contract::MockFetcher::new()),
        Arc::new(MemoryStorage::new()),
        FanOutMode::Inline,
    );
    let index = ResourceDescriptor::new(
        Category::ProposalList,
        "proposals-0",
        ".html",
        utc(2024, 1, 10),
        url("vo0040.asp"),
    );
    let err = dispatcher
        .dispatch(&index, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, MirrorError::Context { .. } | MirrorError::Unroutable { .. }));
}

#[tokio::test]
async fn leaves_dispatch_to_the_leaf_downloader() {
    let (fetcher, requests) = fake_portal(vec![(url("images/anlagen/plan.pdf"), "%PDF".into())]);
    let storage = Arc::new(MemoryStorage::new());
    let dispatcher = Dispatcher::new(
        Arc::new(MirrorConfig::default()),
        Arc::new(fetcher),
        storage.clone(),
        FanOutMode::Inline,
    );
    let attachment = ResourceDescriptor::new(
        Category::Attachment,
        "session-101-attachment-12kb-plan.pdf",
        "",
        utc(2024, 1, 10),
        url("images/anlagen/plan.pdf"),
    );

    let outcome = dispatcher
        .dispatch(&attachment, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, DispatchOutcome::Leaf(_)));
    assert_eq!(requests.lock().unwrap().len(), 1);
    assert!(storage
        .exists("sessions/attachments/session-101-attachment-12kb-plan.pdf")
        .await
        .unwrap());
}

#[tokio::test]
async fn dispatching_the_same_container_twice_changes_nothing() {
    let (fetcher, requests) = fake_portal(vec![
        (url("si0057.asp?SILFDNR=101"), session_101_page()),
        (url("to020.asp?TOLFDNR=55"), container_page(&[], &[])),
        (url("images/anlagen/plan.pdf"), "plan".to_string()),
        (url("images/anlagen/karte.pdf"), "karte".to_string()),
    ]);
    let storage = Arc::new(MemoryStorage::new());
    let dispatcher = Dispatcher::new(
        Arc::new(MirrorConfig::default()),
        Arc::new(fetcher),
        storage.clone(),
        FanOutMode::Inline,
    );
    let cancel = CancellationToken::new();

    let snapshot = |storage: &MemoryStorage| {
        let mut paths = storage.paths().unwrap();
        paths.sort();
        paths
            .into_iter()
            .map(|path| {
                let stored = storage.get(&path).unwrap().unwrap();
                (path, stored.fingerprint, stored.created)
            })
            .collect::<Vec<_>>()
    };

    let first = dispatcher.dispatch(&session_101(), &cancel).await.unwrap();
    let after_first = snapshot(&storage);
    let fetches_after_first = requests.lock().unwrap().len();
    let second = dispatcher.dispatch(&session_101(), &cancel).await.unwrap();
    let after_second = snapshot(&storage);

    let (DispatchOutcome::Container(first), DispatchOutcome::Container(second)) = (first, second)
    else {
        panic!("sessions expand as containers");
    };
    assert!(first.written);
    assert!(!second.written);
    assert!(second.deleted.is_empty());
    assert_eq!(after_first.len(), 4);
    assert_eq!(after_first, after_second);

    // Containers are re-read, current leaves are not fetched again.
    assert_eq!(fetches_after_first, 4);
    let second_run: Vec<String> = requests.lock().unwrap()[fetches_after_first..].to_vec();
    assert_eq!(
        second_run,
        vec![url("si0057.asp?SILFDNR=101"), url("to020.asp?TOLFDNR=55")]
    );
}
