//! Identity and affiliation resolution.
//!
//! Activity rows name their actor by canonical identity (a UUID-like
//! string). The [`Resolver`] attaches the identity's profile and the
//! organization the actor belonged to when the event happened:
//!
//! | Column | Meaning |
//! |--------|---------|
//! | `identity_id` | dense per-run surrogate, by identity row order |
//! | `name` | plain profile name (falls back to the canonical id) |
//! | `label` | `"Name (Organization)"` for display |
//! | `bot` | `1` for automated accounts, else `0` |
//! | `org_id`, `org_name` | affiliation valid at the event time, or [`UNKNOWN_ORGANIZATION`] |
//!
//! `identity_id` is only meaningful inside one run. Anything that outlives
//! the run should key on the canonical id.

use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::models::{Record, Table, Value, UNKNOWN_ORGANIZATION};

/// A canonical contributor.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub uuid: String,
    pub name: Option<String>,
    pub bot: bool,
}

impl Identity {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uuid)
    }
}

/// Membership of an identity in an organization over a time interval.
/// Either bound may be open.
#[derive(Debug, Clone, PartialEq)]
pub struct Affiliation {
    pub uuid: String,
    pub org_id: i64,
    pub org_name: String,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl Affiliation {
    /// Both bounds are exclusive. An event without a timestamp only falls
    /// inside an interval that is open at both ends.
    pub fn contains(&self, at: Option<NaiveDateTime>) -> bool {
        match at {
            Some(t) => {
                self.start.map_or(true, |start| t > start) && self.end.map_or(true, |end| t < end)
            }
            None => self.start.is_none() && self.end.is_none(),
        }
    }
}

struct Resolved<'a> {
    identity: Option<(i64, &'a Identity)>,
    org_id: i64,
    org_name: &'a str,
}

pub struct Resolver {
    identities: Vec<Identity>,
    by_uuid: HashMap<String, usize>,
    affiliations: HashMap<String, Vec<Affiliation>>,
}

impl Resolver {
    pub fn new(identities: Vec<Identity>, affiliations: Vec<Affiliation>) -> Self {
        let mut by_uuid = HashMap::with_capacity(identities.len());
        let mut unique = Vec::with_capacity(identities.len());
        for identity in identities {
            if by_uuid.contains_key(&identity.uuid) {
                continue;
            }
            by_uuid.insert(identity.uuid.clone(), unique.len());
            unique.push(identity);
        }

        let mut grouped: HashMap<String, Vec<Affiliation>> = HashMap::new();
        for affiliation in affiliations {
            grouped
                .entry(affiliation.uuid.clone())
                .or_default()
                .push(affiliation);
        }
        // Latest start first (open start last), then lowest org id, so the
        // first interval containing an instant is the one that wins.
        for list in grouped.values_mut() {
            list.sort_by(|a, b| b.start.cmp(&a.start).then(a.org_id.cmp(&b.org_id)));
        }

        Self {
            identities: unique,
            by_uuid,
            affiliations: grouped,
        }
    }

    /// Build from the identity (`uuid`, `name`, `bot`) and affiliation
    /// (`uuid`, `org_id`, `org_name`, `start`, `end`) result sets.
    pub fn from_tables(identities: &Table, affiliations: &Table) -> Result<Self> {
        for column in ["uuid", "name", "bot"] {
            identities.require_column(column)?;
        }
        for column in ["uuid", "org_id", "org_name", "start", "end"] {
            affiliations.require_column(column)?;
        }

        let people = identities
            .records()
            .filter_map(|r| {
                let uuid = r.get("uuid").as_str()?.to_string();
                Some(Identity {
                    uuid,
                    name: r.get("name").as_str().map(str::to_string),
                    bot: r.get("bot").as_i64().unwrap_or(0) != 0,
                })
            })
            .collect();

        let mut enrollments = Vec::with_capacity(affiliations.len());
        for r in affiliations.records() {
            let (Some(uuid), Some(org_id)) = (r.get("uuid").as_str(), r.get("org_id").as_i64())
            else {
                debug!("skipping affiliation row without identity or organization");
                continue;
            };
            enrollments.push(Affiliation {
                uuid: uuid.to_string(),
                org_id,
                org_name: r
                    .get("org_name")
                    .as_str()
                    .unwrap_or(UNKNOWN_ORGANIZATION.name)
                    .to_string(),
                start: r.get("start").as_timestamp(),
                end: r.get("end").as_timestamp(),
            });
        }

        Ok(Self::new(people, enrollments))
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Surrogate id and profile for a canonical id.
    pub fn identity(&self, uuid: &str) -> Option<(i64, &Identity)> {
        self.by_uuid
            .get(uuid)
            .map(|&i| (i as i64, &self.identities[i]))
    }

    /// Organization of `uuid` at `at`, or the unknown-organization sentinel.
    pub fn organization_at(&self, uuid: &str, at: Option<NaiveDateTime>) -> (i64, &str) {
        self.affiliations
            .get(uuid)
            .and_then(|list| list.iter().find(|a| a.contains(at)))
            .map(|a| (a.org_id, a.org_name.as_str()))
            .unwrap_or((UNKNOWN_ORGANIZATION.id, UNKNOWN_ORGANIZATION.name))
    }

    /// Attach identity and organization columns to `events`. The actor is
    /// read from `actor_column` and the event time from `time_column`.
    /// Rows whose actor is not a known identity are dropped.
    pub fn resolve(&self, events: Table, actor_column: &str, time_column: &str) -> Result<Table> {
        events.require_column(actor_column)?;
        events.require_column(time_column)?;

        let before = events.len();
        let events = events.retain(|r| {
            r.get(actor_column)
                .as_str()
                .is_some_and(|uuid| self.by_uuid.contains_key(uuid))
        });
        if events.len() < before {
            warn!(
                table = %events.name(),
                dropped = before - events.len(),
                "dropped rows whose actor has no identity"
            );
        }

        events
            .derive("identity_id", |r| {
                let found = self.lookup(r, actor_column, time_column);
                Ok(found.identity.map(|(id, _)| Value::Int(id)).into())
            })?
            .derive("name", |r| {
                let found = self.lookup(r, actor_column, time_column);
                Ok(found.identity.map(|(_, p)| p.display_name()).into())
            })?
            .derive("label", |r| {
                let found = self.lookup(r, actor_column, time_column);
                Ok(found
                    .identity
                    .map(|(_, p)| display_label(p.display_name(), found.org_name))
                    .into())
            })?
            .derive("bot", |r| {
                let found = self.lookup(r, actor_column, time_column);
                Ok(found.identity.map(|(_, p)| i64::from(p.bot)).into())
            })?
            .derive("org_id", |r| {
                Ok(Value::Int(self.lookup(r, actor_column, time_column).org_id))
            })?
            .derive("org_name", |r| {
                Ok(Value::from(self.lookup(r, actor_column, time_column).org_name))
            })
    }

    fn lookup(&self, r: Record<'_>, actor_column: &str, time_column: &str) -> Resolved<'_> {
        let uuid = r.get(actor_column).as_str().unwrap_or_default();
        let (org_id, org_name) = self.organization_at(uuid, r.get(time_column).as_timestamp());
        Resolved {
            identity: self.identity(uuid),
            org_id,
            org_name,
        }
    }

    /// Identity listing for reports: `id`, `uuid`, `name`, `bot`.
    pub fn persons_table(&self) -> Table {
        let rows = self
            .identities
            .iter()
            .enumerate()
            .map(|(i, p)| {
                vec![
                    Value::Int(i as i64),
                    Value::from(p.uuid.as_str()),
                    Value::from(p.display_name()),
                    Value::Int(i64::from(p.bot)),
                ]
            })
            .collect();
        Table::from_parts(
            "persons".to_string(),
            ["id", "uuid", "name", "bot"].map(String::from).to_vec(),
            rows,
        )
    }
}

pub fn display_label(name: &str, org_name: &str) -> String {
    format!("{} ({})", name, org_name)
}

/// Hour bucket in `[-12, 11]` for a UTC offset in seconds. Division
/// truncates toward zero, so half-hour zones fold toward UTC.
pub fn tz_bucket(offset_seconds: i64) -> i64 {
    ((offset_seconds / 3600 + 36) % 24) - 12
}
