//! Version-control analysis: commits and repositories.
//!
//! Reads the activity log (`scmlog` and friends), resolves each commit's
//! author to an identity and to the organization they belonged to on the
//! commit date, and produces `repo` and `commit` documents plus the
//! `scm-*` report tables.

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime, TimeDelta};
use tracing::info;

use crate::merge::{field, merge, project, renamed, required, Field, Join, Projection};
use crate::models::{
    Analysis, DocType, Sentinel, Table, Value, NO_PROJECT, UNCLASSIFIED_PROJECT,
    UNKNOWN_ORGANIZATION, UNKNOWN_REPOSITORY,
};
use crate::query::{affiliations_query, ActivitySource, Capability, Param, Query};
use crate::resolve::{tz_bucket, Resolver};

/// Commit selection.
#[derive(Debug, Clone, Default)]
pub struct ScmOptions {
    /// Count commits on every branch instead of only `master`.
    pub all_branches: bool,
    /// Only commits authored on or after this day.
    pub since: Option<NaiveDate>,
}

const COMMIT_COLUMNS: &[&str] = &[
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
];

const COMMIT_FIELDS: &[Field] = &[
    required("id"),
    required("author_date"),
    field("commit_date"),
    field("utc_author"),
    field("utc_commit"),
    field("message"),
    required("hash"),
    field("tz"),
    required("author_uuid"),
    renamed("name", "author_name"),
    renamed("label", "name"),
    field("bot"),
    field("added"),
    field("removed"),
    field("org_id"),
    field("org_name"),
    field("repo_id"),
    field("repo_name"),
    field("project_id"),
    field("project_name"),
    field("branch_name"),
];

const REPO_FIELDS: &[Field] = &[
    required("repo_id"),
    field("repo_name"),
    field("project_id"),
    field("project_name"),
];

pub const COMMITS: Projection = Projection {
    doc_type: DocType::Commit,
    fields: COMMIT_FIELDS,
};

pub const REPOS: Projection = Projection {
    doc_type: DocType::Repo,
    fields: REPO_FIELDS,
};

/// `WHERE` clause restricting the joined `scmlog`/`branches` rows.
fn selection(options: &ScmOptions) -> (String, Vec<Param>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if !options.all_branches {
        clauses.push("branches.name = ?");
        params.push(Param::Text("master".to_string()));
    }
    if let Some(since) = options.since {
        clauses.push("scmlog.author_date >= ?");
        params.push(Param::Timestamp(since.and_time(NaiveTime::MIN)));
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}\n", clauses.join(" AND ")), params)
    }
}

fn with_params(mut query: Query, params: Vec<Param>) -> Query {
    for param in params {
        query = query.bind(param);
    }
    query
}

pub fn commits_query(options: &ScmOptions) -> Query {
    let (filter, params) = selection(options);
    let sql = format!(
        "SELECT scmlog.id AS id,
  scmlog.author_date AS author_date,
  scmlog.date AS commit_date,
  scmlog.author_date_tz AS author_tz,
  scmlog.date_tz AS commit_tz,
  people_uidentities.uuid AS author_uuid,
  scmlog.repository_id AS repo_id,
  LEFT(LTRIM(scmlog.message), 30) AS message,
  scmlog.rev AS hash,
  branches.name AS branch_name
FROM {{main_db}}.scmlog
  JOIN {{main_db}}.people_uidentities
    ON people_uidentities.people_id = scmlog.author_id
  JOIN {{main_db}}.actions
    ON scmlog.id = actions.commit_id
  JOIN {{main_db}}.branches
    ON branches.id = actions.branch_id
{}GROUP BY scmlog.rev ORDER BY scmlog.author_date",
        filter
    );
    with_params(Query::new("commits", sql, COMMIT_COLUMNS), params)
}

pub fn lines_query(options: &ScmOptions) -> Query {
    let (filter, params) = selection(options);
    let sql = format!(
        "SELECT commits_lines.commit_id AS id,
  commits_lines.added AS added,
  commits_lines.removed AS removed
FROM {{main_db}}.commits_lines
  JOIN {{main_db}}.scmlog
    ON commits_lines.commit_id = scmlog.id
  JOIN {{main_db}}.actions
    ON scmlog.id = actions.commit_id
  JOIN {{main_db}}.branches
    ON branches.id = actions.branch_id
{}GROUP BY scmlog.rev ORDER BY scmlog.author_date",
        filter
    );
    with_params(Query::new("commit_lines", sql, &["id", "added", "removed"]), params)
}

/// Identities of commit authors, in canonical-id order.
pub fn identities_query(options: &ScmOptions) -> Query {
    let (filter, params) = selection(options);
    let sql = format!(
        "SELECT uidentities.uuid AS uuid,
  profiles.name AS name,
  profiles.is_bot AS bot
FROM {{main_db}}.scmlog
  JOIN {{main_db}}.people_uidentities
    ON people_uidentities.people_id = scmlog.author_id
  JOIN {{sh_db}}.uidentities
    ON uidentities.uuid = people_uidentities.uuid
  LEFT JOIN {{sh_db}}.profiles
    ON uidentities.uuid = profiles.uuid
  JOIN {{main_db}}.actions
    ON scmlog.id = actions.commit_id
  JOIN {{main_db}}.branches
    ON branches.id = actions.branch_id
{}GROUP BY uidentities.uuid ORDER BY uidentities.uuid",
        filter
    );
    with_params(Query::new("commit_identities", sql, &["uuid", "name", "bot"]), params)
}

pub fn repos_query() -> Query {
    Query::new(
        "repos",
        "SELECT repositories.id AS repo_id,
  repositories.name AS repo_name
FROM {main_db}.repositories
ORDER BY repo_id",
        &["repo_id", "repo_name"],
    )
}

/// Project of each git repository. Only valid when the source has the
/// project tables (see [`Capability::ProjectGrouping`]).
pub fn repo_projects_query() -> Query {
    Query::new(
        "repo_projects",
        "SELECT repositories.id AS repo_id,
  projects.project_id AS project_id,
  projects.id AS project_name
FROM {main_db}.repositories
  JOIN {prj_db}.project_repositories
    ON repositories.uri = project_repositories.repository_name
      AND repositories.type = 'git'
  JOIN {prj_db}.projects
    ON projects.project_id = project_repositories.project_id
ORDER BY repo_id, project_id",
        &["repo_id", "project_id", "project_name"],
    )
}

/// Shift a local wall-clock time to UTC given its offset in seconds.
fn to_utc(local: &Value, offset: &Value) -> Value {
    match (local.as_timestamp(), offset.as_i64()) {
        (Some(t), Some(secs)) => TimeDelta::try_seconds(secs)
            .and_then(|d| t.checked_sub_signed(d))
            .into(),
        _ => Value::Null,
    }
}

fn project_join<'a>(projects: &'a Table, sentinel: Sentinel) -> Join<'a> {
    Join::left(projects, "repo_id", "repo_id", &["project_id", "project_name"])
        .fill("project_id", sentinel.id_value())
        .fill("project_name", sentinel.name_value())
}

/// Organizations seen in `commits`, with the unknown organization first and
/// the rest by id.
fn organizations(commits: &Table) -> Result<Table> {
    let mut seen: Vec<(i64, String)> = commits
        .records()
        .filter_map(|r| Some((r.get("org_id").as_i64()?, r.get("org_name").as_str()?.to_string())))
        .filter(|(id, _)| *id != UNKNOWN_ORGANIZATION.id)
        .collect();
    seen.sort();
    seen.dedup_by_key(|(id, _)| *id);

    let mut rows = vec![vec![
        UNKNOWN_ORGANIZATION.id_value(),
        UNKNOWN_ORGANIZATION.name_value(),
    ]];
    rows.extend(
        seen.into_iter()
            .map(|(id, name)| vec![Value::Int(id), Value::Text(name)]),
    );
    Table::from_rows("scm-orgs", &["org_id", "org_name"], rows)
}

/// Run the commit analysis against `source`.
pub async fn analyze(source: &dyn ActivitySource, options: &ScmOptions, dashboard: &str) -> Result<Analysis> {
    info!(
        source = source.label(),
        all_branches = options.all_branches,
        since = ?options.since,
        "analyzing commits"
    );

    let commits = source.fetch(&commits_query(options)).await?.distinct_on("hash")?;
    let lines = source.fetch(&lines_query(options)).await?.distinct_on("id")?;
    let identities = source.fetch(&identities_query(options)).await?;
    let affiliations = source.fetch(&affiliations_query()).await?;
    let resolver = Resolver::from_tables(&identities, &affiliations)?;
    let repos = source.fetch(&repos_query()).await?.distinct_on("repo_id")?;

    let (projects, sentinel) = if source.probe(Capability::ProjectGrouping).await? {
        info!("project tables found, grouping repositories by project");
        let projects = source.fetch(&repo_projects_query()).await?.distinct_on("repo_id")?;
        (projects, UNCLASSIFIED_PROJECT)
    } else {
        info!("no project tables, using a single default project");
        (
            Table::new("repo_projects", &["repo_id", "project_id", "project_name"]),
            NO_PROJECT,
        )
    };

    let repos = merge(repos, &[project_join(&projects, sentinel)])?;

    let commits = merge(
        commits,
        &[
            Join::left(&repos, "repo_id", "repo_id", &["repo_name"])
                .fill("repo_name", UNKNOWN_REPOSITORY.name_value()),
            Join::left(&lines, "id", "id", &["added", "removed"]),
        ],
    )?;
    let commits = resolver
        .resolve(commits, "author_uuid", "commit_date")?
        .derive("tz", |r| Ok(r.get("author_tz").as_i64().map(tz_bucket).into()))?
        .derive("utc_author", |r| Ok(to_utc(r.get("author_date"), r.get("author_tz"))))?
        .derive("utc_commit", |r| Ok(to_utc(r.get("commit_date"), r.get("commit_tz"))))?;
    let commits = merge(commits, &[project_join(&projects, sentinel)])?;

    info!(commits = commits.len(), repos = repos.len(), identities = resolver.len(), "commits merged");

    let mut documents = project(&repos, &REPOS, dashboard)?;
    documents.extend(project(&commits, &COMMITS, dashboard)?);

    let reports = vec![
        commits
            .select(&["id", "author_date", "identity_id", "org_id", "repo_id", "tz"])?
            .rename(&[
                ("author_date", "date"),
                ("identity_id", "author"),
                ("org_id", "org"),
                ("repo_id", "repo"),
            ])?
            .with_name("scm-commits"),
        commits.select(&["id", "message", "hash"])?.with_name("scm-messages"),
        organizations(&commits)?,
        repos.clone().with_name("scm-repos"),
        resolver.persons_table().with_name("scm-persons"),
    ];

    Ok(Analysis { documents, reports })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping;
    use crate::query::MemorySource;
    use chrono::NaiveDateTime;

    fn ts(s: &str) -> Value {
        Value::Timestamp(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
    }

    fn commit(id: i64, hash: &str, uuid: &str, repo: i64, date: &str, tz: i64) -> Vec<Value> {
        vec![
            Value::Int(id),
            ts(date),
            ts(date),
            Value::Int(tz),
            Value::Int(tz),
            uuid.into(),
            Value::Int(repo),
            "Fix the thing".into(),
            hash.into(),
            "master".into(),
        ]
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with_table(
                "commits",
                Table::from_rows(
                    "commits",
                    COMMIT_COLUMNS,
                    vec![
                        commit(1, "aaa", "u1", 10, "2015-06-01 10:00:00", 7200),
                        commit(2, "bbb", "u2", 11, "2016-06-01 10:00:00", -18000),
                        // same revision reached through a second branch row
                        commit(3, "aaa", "u1", 10, "2015-06-01 10:00:00", 7200),
                    ],
                )
                .unwrap(),
            )
            .with_table(
                "commit_lines",
                Table::from_rows(
                    "commit_lines",
                    &["id", "added", "removed"],
                    vec![vec![Value::Int(1), Value::Int(5), Value::Int(2)]],
                )
                .unwrap(),
            )
            .with_table(
                "commit_identities",
                Table::from_rows(
                    "commit_identities",
                    &["uuid", "name", "bot"],
                    vec![
                        vec!["u1".into(), "Jane Doe".into(), Value::Int(0)],
                        vec!["u2".into(), Value::Null, Value::Int(1)],
                    ],
                )
                .unwrap(),
            )
            .with_table(
                "affiliations",
                Table::from_rows(
                    "affiliations",
                    &["uuid", "org_id", "org_name", "start", "end"],
                    vec![vec![
                        "u1".into(),
                        Value::Int(7),
                        "Acme Corp".into(),
                        ts("2015-01-01 00:00:00"),
                        ts("2016-01-01 00:00:00"),
                    ]],
                )
                .unwrap(),
            )
            .with_table(
                "repos",
                Table::from_rows(
                    "repos",
                    &["repo_id", "repo_name"],
                    vec![vec![Value::Int(10), "core".into()]],
                )
                .unwrap(),
            )
    }

    fn docs_of(analysis: &Analysis, doc_type: DocType) -> Vec<&crate::models::Document> {
        analysis
            .documents
            .iter()
            .filter(|d| d.doc_type == doc_type)
            .collect()
    }

    #[test]
    fn test_selection_binds_parameters() {
        let q = commits_query(&ScmOptions {
            all_branches: false,
            since: NaiveDate::from_ymd_opt(2015, 3, 1),
        });
        assert!(q.sql.contains("WHERE branches.name = ? AND scmlog.author_date >= ?"));
        assert_eq!(q.params.len(), 2);
        assert_eq!(q.params[0], Param::Text("master".into()));

        let q = lines_query(&ScmOptions {
            all_branches: true,
            since: None,
        });
        assert!(!q.sql.contains("WHERE"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_to_utc() {
        assert_eq!(
            to_utc(&ts("2015-06-01 10:00:00"), &Value::Int(7200)),
            ts("2015-06-01 08:00:00")
        );
        assert_eq!(
            to_utc(&ts("2015-06-01 10:00:00"), &Value::Int(-18000)),
            ts("2015-06-01 15:00:00")
        );
        assert!(to_utc(&Value::Null, &Value::Int(0)).is_null());
    }

    #[tokio::test]
    async fn test_analyze_commits() {
        let analysis = analyze(&source(), &ScmOptions::default(), "Acme").await.unwrap();

        let commits = docs_of(&analysis, DocType::Commit);
        assert_eq!(commits.len(), 2, "duplicate revision collapsed");

        let first = commits[0];
        assert_eq!(first.get("author_name"), Some(&Value::from("Jane Doe")));
        assert_eq!(first.get("name"), Some(&Value::from("Jane Doe (Acme Corp)")));
        assert_eq!(first.get("org_id"), Some(&Value::Int(7)));
        assert_eq!(first.get("tz"), Some(&Value::Int(2)));
        assert_eq!(first.get("utc_author"), Some(&ts("2015-06-01 08:00:00")));
        assert_eq!(first.get("added"), Some(&Value::Int(5)));
        assert_eq!(first.get("repo_name"), Some(&Value::from("core")));
        assert_eq!(first.get("project_name"), Some(&Value::from("No project")));
        assert_eq!(first.get("dashboard"), Some(&Value::from("Acme")));

        let second = commits[1];
        assert_eq!(second.get("org_name"), Some(&Value::from("Unknown")));
        assert_eq!(second.get("author_name"), Some(&Value::from("u2")));
        assert_eq!(second.get("bot"), Some(&Value::Int(1)));
        assert_eq!(second.get("tz"), Some(&Value::Int(-5)));
        assert_eq!(second.get("repo_name"), Some(&Value::from("Unknown")));
        assert_eq!(second.get("added"), Some(&Value::Null));

        let repos = docs_of(&analysis, DocType::Repo);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].get("project_id"), Some(&Value::Int(0)));
    }

    #[tokio::test]
    async fn test_projects_when_tables_exist() {
        let source = source()
            .with_capability(Capability::ProjectGrouping)
            .with_table(
                "repos",
                Table::from_rows(
                    "repos",
                    &["repo_id", "repo_name"],
                    vec![
                        vec![Value::Int(10), "core".into()],
                        vec![Value::Int(11), "docs".into()],
                    ],
                )
                .unwrap(),
            )
            .with_table(
                "repo_projects",
                Table::from_rows(
                    "repo_projects",
                    &["repo_id", "project_id", "project_name"],
                    vec![
                        vec![Value::Int(10), Value::Int(3), "Platform".into()],
                        vec![Value::Int(10), Value::Int(4), "Listed twice".into()],
                    ],
                )
                .unwrap(),
            );
        let analysis = analyze(&source, &ScmOptions::default(), "Acme").await.unwrap();
        let repos = docs_of(&analysis, DocType::Repo);
        assert_eq!(repos[0].get("project_name"), Some(&Value::from("Platform")));
        assert_eq!(repos[1].get("project_name"), Some(&Value::from("Unclassified")));
    }

    #[tokio::test]
    async fn test_reports() {
        let analysis = analyze(&source(), &ScmOptions::default(), "Acme").await.unwrap();
        let names: Vec<_> = analysis.reports.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(
            names,
            vec!["scm-commits", "scm-messages", "scm-orgs", "scm-repos", "scm-persons"]
        );

        let packed = &analysis.reports[0];
        assert_eq!(packed.columns(), &["id", "date", "author", "org", "repo", "tz"].map(String::from));

        let orgs = &analysis.reports[2];
        assert_eq!(orgs.rows()[0], vec![Value::Int(0), Value::from("Unknown")]);
        assert_eq!(orgs.rows()[1], vec![Value::Int(7), Value::from("Acme Corp")]);
        assert_eq!(orgs.len(), 2);
    }

    #[test]
    fn test_projections_match_mappings() {
        for projection in [COMMITS, REPOS] {
            let mut targets: Vec<_> = projection.fields.iter().map(|f| f.target).collect();
            targets.push("dashboard");
            let declared: Vec<_> = mapping::fields(projection.doc_type).iter().map(|(n, _)| *n).collect();
            assert_eq!(targets, declared, "{}", projection.doc_type);
        }
    }
}
