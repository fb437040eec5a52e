//! End-to-end pipeline tests over in-memory sources and backend.

use chrono::NaiveDateTime;
use devdash::backend::{Backend, MemoryBackend, StoredCall};
use devdash::bulk::PublishOptions;
use devdash::config::load_config;
use devdash::ingest::{process_dashboard, ReportTarget, Sinks};
use devdash::models::{Table, Value};
use devdash::query::{ActivitySource, MemorySource};
use devdash::scm::ScmOptions;
use devdash::serialize::DateMode;

fn ts(s: &str) -> Value {
    Value::Timestamp(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
}

fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
    Table::from_rows("fixture", columns, rows).unwrap()
}

fn identities() -> Table {
    table(
        &["uuid", "name", "bot"],
        vec![
            vec!["u1".into(), "Jane Doe".into(), Value::Int(0)],
            vec!["u2".into(), Value::Null, Value::Null],
        ],
    )
}

fn affiliations() -> Table {
    table(
        &["uuid", "org_id", "org_name", "start", "end"],
        vec![
            vec![
                "u1".into(),
                Value::Int(7),
                "Acme Corp".into(),
                ts("2015-01-01 00:00:00"),
                ts("2015-07-01 00:00:00"),
            ],
            vec![
                "u1".into(),
                Value::Int(8),
                "Globex".into(),
                ts("2015-07-01 00:00:00"),
                Value::Null,
            ],
        ],
    )
}

fn scm_source() -> MemorySource {
    let commits: Vec<Vec<Value>> = (1..=7)
        .map(|i| {
            let author = if i % 2 == 0 { "u2" } else { "u1" };
            let date = if i <= 3 { "2015-03-01 10:00:00" } else { "2015-09-01 10:00:00" };
            vec![
                Value::Int(i),
                ts(date),
                ts(date),
                Value::Int(3600),
                Value::Int(3600),
                author.into(),
                Value::Int(10),
                format!("commit {}", i).into(),
                format!("hash{}", i).into(),
                "master".into(),
            ]
        })
        .collect();
    MemorySource::new()
        .with_table(
            "commits",
            table(
                &[
                    "id",
                    "author_date",
                    "commit_date",
                    "author_tz",
                    "commit_tz",
                    "author_uuid",
                    "repo_id",
                    "message",
                    "hash",
                    "branch_name",
                ],
                commits,
            ),
        )
        .with_table(
            "commit_lines",
            table(
                &["id", "added", "removed"],
                vec![vec![Value::Int(1), Value::Int(10), Value::Int(2)]],
            ),
        )
        .with_table("commit_identities", identities())
        .with_table("affiliations", affiliations())
        .with_table(
            "repos",
            table(&["repo_id", "repo_name"], vec![vec![Value::Int(10), "core".into()]]),
        )
}

fn scr_source() -> MemorySource {
    MemorySource::new()
        .with_table(
            "retrieval",
            table(&["retrieved_on"], vec![vec![ts("2016-01-01 00:00:00")]]),
        )
        .with_table(
            "reviews",
            table(
                &["id", "review", "summary", "submitter", "status", "uuid"],
                vec![vec![
                    Value::Int(1),
                    "I1".into(),
                    "Fix".into(),
                    Value::Int(1),
                    "MERGED".into(),
                    "u1".into(),
                ]],
            ),
        )
        .with_table(
            "review_opened",
            table(&["id", "opened"], vec![vec![Value::Int(1), ts("2015-08-01 00:00:00")]]),
        )
        .with_table(
            "review_events",
            table(
                &["id", "review", "uuid", "field", "patchset", "tag", "event_date"],
                vec![
                    vec![
                        Value::Int(100),
                        "I1".into(),
                        "u2".into(),
                        "Code-Review".into(),
                        "1".into(),
                        "+2".into(),
                        ts("2015-08-02 00:00:00"),
                    ],
                    vec![
                        Value::Int(101),
                        "I-missing".into(),
                        "u2".into(),
                        "Code-Review".into(),
                        "1".into(),
                        "+1".into(),
                        ts("2015-08-02 00:00:00"),
                    ],
                ],
            ),
        )
        .with_table("review_identities", identities())
        .with_table("affiliations", affiliations())
}

fn sinks(backend: &MemoryBackend, batch_size: usize, full_refresh: bool) -> Sinks<'_> {
    Sinks {
        backend: Some((
            backend as &dyn Backend,
            PublishOptions {
                collection: "acme-activity".into(),
                batch_size,
                full_refresh,
            },
        )),
        reports: None,
    }
}

#[tokio::test]
async fn test_two_incremental_runs_equal_one() {
    let scm = scm_source();
    let scr = scr_source();
    let backend = MemoryBackend::new();
    let sinks = sinks(&backend, 3, false);
    let options = ScmOptions::default();

    let run = || {
        process_dashboard(
            "Acme",
            Some(&scm as &dyn ActivitySource),
            Some(&scr as &dyn ActivitySource),
            &options,
            &sinks,
        )
    };

    let first = run().await.unwrap();
    let after_first = (
        backend.count("acme-activity", None),
        backend.document("acme-activity", "commit", "4"),
    );
    let second = run().await.unwrap();

    assert_eq!(first.commits, 7);
    assert_eq!(second.commits, 7);
    assert_eq!(backend.count("acme-activity", None), after_first.0);
    assert_eq!(backend.document("acme-activity", "commit", "4"), after_first.1);
    // 1 repo + 7 commits + 1 review + 1 event
    assert_eq!(after_first.0, 10);
}

#[tokio::test]
async fn test_batches_per_type() {
    let scm = scm_source();
    let backend = MemoryBackend::new();
    let summary = process_dashboard(
        "Acme",
        Some(&scm as &dyn ActivitySource),
        None,
        &ScmOptions::default(),
        &sinks(&backend, 3, false),
    )
    .await
    .unwrap();

    let bulks: Vec<usize> = backend
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            StoredCall::Bulk { items } => Some(items),
            _ => None,
        })
        .collect();
    // repos: 1 → [1]; commits: 7 with batch 3 → [3, 3, 1]
    assert_eq!(bulks, vec![1, 3, 3, 1]);
    assert_eq!(summary.published.unwrap().batches, 4);
}

#[tokio::test]
async fn test_documents_carry_affiliation_and_dashboard() {
    let scm = scm_source();
    let scr = scr_source();
    let backend = MemoryBackend::new();
    process_dashboard(
        "Acme",
        Some(&scm as &dyn ActivitySource),
        Some(&scr as &dyn ActivitySource),
        &ScmOptions::default(),
        &sinks(&backend, 100, false),
    )
    .await
    .unwrap();

    let early = backend.document("acme-activity", "commit", "1").unwrap();
    assert_eq!(early["org_name"], "Acme Corp");
    assert_eq!(early["name"], "Jane Doe (Acme Corp)");
    assert_eq!(early["tz"], 1);
    assert_eq!(early["utc_author"], "2015-03-01T09:00:00");
    assert_eq!(early["dashboard"], "Acme");

    let late = backend.document("acme-activity", "commit", "5").unwrap();
    assert_eq!(late["org_name"], "Globex");

    // no profile name: the canonical id stands in, no affiliation
    let anonymous = backend.document("acme-activity", "commit", "2").unwrap();
    assert_eq!(anonymous["author_name"], "u2");
    assert_eq!(anonymous["org_id"], 0);
    assert_eq!(anonymous["bot"], 0);

    let review = backend.document("acme-activity", "review", "1").unwrap();
    assert_eq!(review["org_name"], "Globex");
    assert_eq!(review["label"], "Jane Doe (Globex)");
    assert_eq!(review["closed"], "2016-01-01T00:00:00");
    assert_eq!(review["patchsets"], 0);

    assert!(backend.document("acme-activity", "event", "100").is_some());
    assert!(backend.document("acme-activity", "event", "101").is_none());
}

#[tokio::test]
async fn test_full_refresh_of_missing_collection() {
    let scr = scr_source();
    let backend = MemoryBackend::new();
    let summary = process_dashboard(
        "Acme",
        None,
        Some(&scr as &dyn ActivitySource),
        &ScmOptions::default(),
        &sinks(&backend, 100, true),
    )
    .await
    .unwrap();

    assert_eq!(summary.reviews, 1);
    assert_eq!(summary.events, 1);
    assert_eq!(backend.calls()[0], StoredCall::Delete("acme-activity".into()));
    assert!(backend.mapping("acme-activity", "event").is_some());
    assert!(backend.mapping("acme-activity", "commit").is_none());
}

#[tokio::test]
async fn test_reports_written_alongside_upload() {
    let dir = tempfile::tempdir().unwrap();
    let scm = scm_source();
    let backend = MemoryBackend::new();
    let mut sinks = sinks(&backend, 100, false);
    sinks.reports = Some(ReportTarget {
        dir: dir.path().to_path_buf(),
        date_mode: DateMode::Iso,
    });

    let summary = process_dashboard(
        "Acme",
        Some(&scm as &dyn ActivitySource),
        None,
        &ScmOptions::default(),
        &sinks,
    )
    .await
    .unwrap();
    assert_eq!(summary.reports.len(), 5);

    let text = std::fs::read_to_string(dir.path().join("acme").join("scm-orgs.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["values"][0], serde_json::json!([0, "Unknown"]));
}

const TWO_DASHBOARDS: &str = r#"
[database]
user = "reader"

[backend]
url = "http://localhost:9200"
full_refresh = true

[[dashboards]]
name = "Acme"
scm_db = "acme_scm"
identity_db = "acme_sh"

[[dashboards]]
name = "Globex"
scm_db = "globex_scm"
identity_db = "globex_sh"
"#;

#[test]
fn test_dashboards_cannot_share_a_collection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devdash.toml");
    let shared = TWO_DASHBOARDS.replace(
        "full_refresh = true",
        "full_refresh = true\ncollection = \"shared\"",
    );
    std::fs::write(&path, shared).unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("shared"));
}

#[tokio::test]
async fn test_dashboards_with_same_row_ids_stay_apart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devdash.toml");
    std::fs::write(&path, TWO_DASHBOARDS).unwrap();
    let config = load_config(&path).unwrap();
    let backend_config = config.backend.as_ref().unwrap();

    let backend = MemoryBackend::new();
    let options = ScmOptions::default();
    // both sources hold commits with ids 1..=7
    let scm = scm_source();
    for dashboard in &config.dashboards {
        let sinks = Sinks {
            backend: Some((
                &backend as &dyn Backend,
                PublishOptions {
                    collection: dashboard.collection(backend_config),
                    batch_size: backend_config.batch_size,
                    full_refresh: backend_config.full_refresh,
                },
            )),
            reports: None,
        };
        process_dashboard(
            &dashboard.name,
            Some(&scm as &dyn ActivitySource),
            None,
            &options,
            &sinks,
        )
        .await
        .unwrap();
    }

    assert_eq!(backend.count("acme-activity", Some("commit")), 7);
    assert_eq!(backend.count("globex-activity", Some("commit")), 7);
    let acme = backend.document("acme-activity", "commit", "1").unwrap();
    assert_eq!(acme["dashboard"], "Acme");
    let globex = backend.document("globex-activity", "commit", "1").unwrap();
    assert_eq!(globex["dashboard"], "Globex");
}
