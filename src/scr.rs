//! Code-review analysis: reviews and their events.
//!
//! A review is one tracker issue. Its timing comes from the change log:
//! opened at the latest upload, closed at the latest merge or abandon,
//! otherwise still open as of the tracker's last retrieval. Events are the
//! change-log rows other than uploads; an event whose review cannot be
//! found is dropped.

use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::merge::{field, merge, project, report_table, required, Field, Join, Projection};
use crate::models::{Analysis, DocType, Table, Value};
use crate::query::{affiliations_query, ActivitySource, Query};
use crate::resolve::Resolver;

const REVIEW_FIELDS: &[Field] = &[
    required("id"),
    required("review"),
    field("summary"),
    field("submitter"),
    field("status"),
    field("uuid"),
    field("branch"),
    field("url"),
    field("githash"),
    field("project"),
    field("opened"),
    field("closed"),
    field("timeopen"),
    field("patchsets"),
    field("name"),
    field("label"),
    field("bot"),
    field("org_id"),
    field("org_name"),
];

const EVENT_FIELDS: &[Field] = &[
    required("id"),
    required("review"),
    field("uuid"),
    field("field"),
    field("patchset"),
    field("tag"),
    required("event_date"),
    field("name"),
    field("label"),
    field("bot"),
    field("org_id"),
    field("org_name"),
    required("opened"),
    required("closed"),
    field("branch"),
    field("project"),
    field("patchsets"),
    field("status"),
    field("timeopen"),
];

pub const REVIEWS: Projection = Projection {
    doc_type: DocType::Review,
    fields: REVIEW_FIELDS,
};

pub const EVENTS: Projection = Projection {
    doc_type: DocType::Event,
    fields: EVENT_FIELDS,
};

/// Review columns copied onto each of its events.
const EVENT_CONTEXT: &[&str] = &[
    "opened",
    "closed",
    "branch",
    "project",
    "patchsets",
    "status",
    "timeopen",
];

pub fn retrieval_query() -> Query {
    Query::new(
        "retrieval",
        "SELECT MAX(retrieved_on) AS retrieved_on FROM {main_db}.trackers",
        &["retrieved_on"],
    )
}

pub fn reviews_query() -> Query {
    Query::new(
        "reviews",
        "SELECT i.id AS id,
  i.issue AS review,
  i.summary AS summary,
  i.submitted_by AS submitter,
  i.status AS status,
  pu.uuid AS uuid
FROM {main_db}.issues i
  JOIN {main_db}.trackers t ON i.tracker_id = t.id
  JOIN {main_db}.people_uidentities pu ON i.submitted_by = pu.people_id
GROUP BY i.issue
ORDER BY i.id",
        &["id", "review", "summary", "submitter", "status", "uuid"],
    )
}

pub fn review_extras_query() -> Query {
    Query::new(
        "review_extras",
        "SELECT issue_id AS id,
  branch,
  url,
  change_id AS githash,
  project
FROM {main_db}.issues_ext_gerrit",
        &["id", "branch", "url", "githash", "project"],
    )
}

pub fn opened_query() -> Query {
    Query::new(
        "review_opened",
        "SELECT issue_id AS id,
  MAX(changed_on) AS opened
FROM {main_db}.changes
WHERE (field = 'status' AND new_value = 'UPLOADED' AND old_value = '1')
  OR field = 'Upload'
GROUP BY issue_id",
        &["id", "opened"],
    )
}

pub fn closed_query() -> Query {
    Query::new(
        "review_closed",
        "SELECT issue_id AS id,
  MAX(changed_on) AS closed
FROM {main_db}.changes
WHERE field = 'status' AND new_value IN ('ABANDONED', 'MERGED')
GROUP BY issue_id",
        &["id", "closed"],
    )
}

pub fn patchsets_query() -> Query {
    Query::new(
        "review_patchsets",
        "SELECT issue_id AS id,
  COUNT(DISTINCT old_value) AS patchsets
FROM {main_db}.changes
WHERE old_value <> ''
GROUP BY issue_id",
        &["id", "patchsets"],
    )
}

/// Identities of everyone who submitted a review or produced an event.
pub fn identities_query() -> Query {
    Query::new(
        "review_identities",
        "SELECT uidentities.uuid AS uuid,
  profiles.name AS name,
  profiles.is_bot AS bot
FROM {sh_db}.uidentities
  LEFT JOIN {sh_db}.profiles
    ON uidentities.uuid = profiles.uuid
WHERE uidentities.uuid IN (
    SELECT pu.uuid FROM {main_db}.people_uidentities pu
      JOIN {main_db}.issues i ON i.submitted_by = pu.people_id
    UNION
    SELECT pu.uuid FROM {main_db}.people_uidentities pu
      JOIN {main_db}.changes c ON c.changed_by = pu.people_id)
ORDER BY uidentities.uuid",
        &["uuid", "name", "bot"],
    )
}

pub fn events_query() -> Query {
    Query::new(
        "review_events",
        "SELECT c.id AS id,
  i.issue AS review,
  pup.uuid AS uuid,
  c.field AS field,
  c.old_value AS patchset,
  c.new_value AS tag,
  c.changed_on AS event_date
FROM {main_db}.changes c
  JOIN {main_db}.issues i ON i.id = c.issue_id
  JOIN {main_db}.people_uidentities pup ON c.changed_by = pup.people_id
WHERE c.field <> 'Upload'
ORDER BY review, patchset, event_date",
        &["id", "review", "uuid", "field", "patchset", "tag", "event_date"],
    )
}

fn retrieval_time(table: &Table) -> NaiveDateTime {
    match table.records().next().and_then(|r| r.get("retrieved_on").as_timestamp()) {
        Some(t) => t,
        None => {
            warn!("tracker has no retrieval time, treating open reviews as open until now");
            Utc::now().naive_utc()
        }
    }
}

/// Patchset numbers arrive as text from the change log.
fn patchset_number(value: &Value) -> Value {
    match value {
        Value::Text(s) => s.trim().parse::<i64>().ok().into(),
        other => other.as_i64().into(),
    }
}

/// Run the review analysis against `source`.
pub async fn analyze(source: &dyn ActivitySource, dashboard: &str) -> Result<Analysis> {
    info!(source = source.label(), "analyzing reviews");

    let retrieved = retrieval_time(&source.fetch(&retrieval_query()).await?);
    info!(retrieved = %retrieved, "tracker retrieval time");

    let reviews = source.fetch(&reviews_query()).await?.distinct_on("review")?;
    let extras = source.fetch(&review_extras_query()).await?.distinct_on("id")?;
    let opened = source.fetch(&opened_query()).await?.distinct_on("id")?;
    let closed = source.fetch(&closed_query()).await?.distinct_on("id")?;
    let patchsets = source.fetch(&patchsets_query()).await?.distinct_on("id")?;
    let events = source.fetch(&events_query()).await?.distinct_on("id")?;
    let identities = source.fetch(&identities_query()).await?;
    let affiliations = source.fetch(&affiliations_query()).await?;
    let resolver = Resolver::from_tables(&identities, &affiliations)?;

    let times = merge(
        opened,
        &[Join::left(&closed, "id", "id", &["closed"]).fill("closed", Value::Timestamp(retrieved))],
    )?
    .derive("timeopen", |r| {
        Ok(match (r.get("opened").as_timestamp(), r.get("closed").as_timestamp()) {
            (Some(opened), Some(closed)) => Value::Duration(closed - opened),
            _ => Value::Null,
        })
    })?;
    info!(reviews = times.len(), "reviews with timing");

    let reviews = merge(
        reviews,
        &[
            Join::left(&extras, "id", "id", &["branch", "url", "githash", "project"]),
            Join::left(&times, "id", "id", &["opened", "closed", "timeopen"]),
            Join::left(&patchsets, "id", "id", &["patchsets"]).fill("patchsets", Value::Int(0)),
        ],
    )?;
    let reviews = resolver.resolve(reviews, "uuid", "opened")?;

    let events = resolver
        .resolve(events, "uuid", "event_date")?
        .derive("patchset", |r| Ok(patchset_number(r.get("patchset"))))?;
    let events = merge(
        events,
        &[Join::inner(&reviews, "review", "review", EVENT_CONTEXT)],
    )?;

    info!(reviews = reviews.len(), events = events.len(), "reviews merged");

    let mut documents = project(&reviews, &REVIEWS, dashboard)?;
    documents.extend(project(&events, &EVENTS, dashboard)?);

    let reports = vec![report_table(&reviews, &REVIEWS, "scr-reviews", dashboard)?];

    Ok(Analysis { documents, reports })
}
