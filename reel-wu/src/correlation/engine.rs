//! Grouping engine
//!
//! Produces a consistent assignment of sessions to work units. The
//! pass is pure over snapshots (sessions + existing units) so it can
//! be computed outside any lock and committed atomically afterwards.
//!
//! Determinism rules:
//! - Free sessions are processed ordered by (start_time, session_id).
//! - Candidate units are scanned before candidate sessions; a later
//!   candidate only wins with a strictly greater score, so equal
//!   scores resolve to the earliest-seeded unit.
//! - Produced groups reuse the id of the existing unit they overlap
//!   the most (largest overlap first, then smallest unit id), so a
//!   recompute over unchanged data reproduces the prior ids exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use reel_common::model::{Agent, Session, WorkUnit, WorkUnitSession};
use uuid::Uuid;

use crate::correlation::scorer::{score_pair, CorrelationConfig};
use crate::correlation::signals::{extract_signals, normalize_path, CorrelationProfile};

/// Result of a full regrouping pass
#[derive(Debug)]
pub struct RecomputeOutcome {
    /// Complete replacement unit set, ordered by (start_time, id)
    pub units: Vec<WorkUnit>,
    /// Units whose id did not exist before this pass
    pub created: usize,
    /// Units whose id survived but whose content changed
    pub updated: usize,
    pub sessions_processed: usize,
}

/// In-flight group during the clustering pass
struct Cluster {
    /// Unit id preserved from a pinned membership, if any
    reserved_id: Option<Uuid>,
    reserved_created_at: Option<DateTime<Utc>>,
    members: Vec<WorkUnitSession>,
    sessions: Vec<Session>,
    profile: CorrelationProfile,
}

impl Cluster {
    fn push(&mut self, session: &Session, member: WorkUnitSession) {
        self.members.push(member);
        self.profile.absorb(session);
        self.sessions.push(session.clone());
    }

    fn session_ids(&self) -> BTreeSet<String> {
        self.members.iter().map(|m| m.session_id.clone()).collect()
    }
}

/// Run the full regrouping pass.
///
/// Pinned memberships (manual_override) are preserved as-is; every
/// other session is reassigned greedily. Idempotent: a second pass
/// over unchanged data produces identical ids, memberships, and
/// scores, and reports zero created/updated units.
pub fn regroup(
    sessions: &[Session],
    existing: &[WorkUnit],
    config: &CorrelationConfig,
    now: DateTime<Utc>,
) -> RecomputeOutcome {
    let session_by_id: HashMap<&str, &Session> = sessions
        .iter()
        .map(|s| (s.session_id.as_str(), s))
        .collect();

    // Step 1+2: seed clusters from pinned memberships, ordered by unit
    // id for stable cluster ordinals. Pinned memberships whose session
    // no longer exists in the store are dropped (store is authoritative).
    let mut existing_sorted: Vec<&WorkUnit> = existing.iter().collect();
    existing_sorted.sort_by_key(|u| u.id);

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut pinned_ids: BTreeSet<String> = BTreeSet::new();

    for unit in &existing_sorted {
        let mut cluster: Option<Cluster> = None;
        for membership in &unit.sessions {
            if !membership.is_pinned() {
                continue;
            }
            let Some(session) = session_by_id.get(membership.session_id.as_str()) else {
                tracing::warn!(
                    session_id = %membership.session_id,
                    work_unit_id = %unit.id,
                    "Pinned session missing from session store, dropping membership"
                );
                continue;
            };
            // Preserve the pinned score and reasons; refresh the
            // denormalized snapshot from the current session row.
            let member = WorkUnitSession::from_session(
                session,
                membership.correlation_score,
                membership.join_reasons.clone(),
            );
            pinned_ids.insert(session.session_id.clone());
            match cluster.as_mut() {
                Some(c) => c.push(session, member),
                None => {
                    let mut profile = CorrelationProfile::from_session(session);
                    // Unit-level profiles carry no cwd signal
                    profile.cwd = None;
                    cluster = Some(Cluster {
                        reserved_id: Some(unit.id),
                        reserved_created_at: Some(unit.created_at),
                        members: vec![member],
                        sessions: vec![(*session).clone()],
                        profile,
                    });
                }
            }
        }
        if let Some(c) = cluster {
            clusters.push(c);
        }
    }

    // Step 3: greedy pass over free sessions in (start_time, id) order
    let mut free: Vec<&Session> = sessions
        .iter()
        .filter(|s| !pinned_ids.contains(&s.session_id))
        .collect();
    free.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    let mut paired_away: BTreeSet<String> = BTreeSet::new();

    for idx in 0..free.len() {
        let session = free[idx];
        if paired_away.contains(&session.session_id) {
            continue;
        }
        let profile = CorrelationProfile::from_session(session);

        enum Target {
            Cluster(usize),
            Session(usize),
        }
        let mut best: Option<(crate::correlation::scorer::PairScore, Target)> = None;

        // Existing clusters first: at equal score a unit target beats a
        // session target, and the earliest-seeded unit wins.
        for (ci, cluster) in clusters.iter().enumerate() {
            let pair = score_pair(
                &extract_signals(&profile, &cluster.profile, config.time_horizon_seconds),
                config,
            );
            if config.eligible(&pair)
                && best.as_ref().map_or(true, |(b, _)| pair.score > b.score)
            {
                best = Some((pair, Target::Cluster(ci)));
            }
        }

        // Still-unassigned free sessions later in the order
        for (oi, other) in free.iter().enumerate().skip(idx + 1) {
            if paired_away.contains(&other.session_id) {
                continue;
            }
            let other_profile = CorrelationProfile::from_session(other);
            let pair = score_pair(
                &extract_signals(&profile, &other_profile, config.time_horizon_seconds),
                config,
            );
            if config.eligible(&pair)
                && best.as_ref().map_or(true, |(b, _)| pair.score > b.score)
            {
                best = Some((pair, Target::Session(oi)));
            }
        }

        match best {
            Some((pair, Target::Cluster(ci))) => {
                let member =
                    WorkUnitSession::from_session(session, pair.score, pair.reasons.clone());
                clusters[ci].push(session, member);
            }
            Some((pair, Target::Session(oi))) => {
                let other = free[oi];
                let mut unit_profile = CorrelationProfile::from_session(session);
                unit_profile.absorb(other);
                let members = vec![
                    WorkUnitSession::from_session(session, pair.score, pair.reasons.clone()),
                    WorkUnitSession::from_session(other, pair.score, pair.reasons.clone()),
                ];
                paired_away.insert(other.session_id.clone());
                clusters.push(Cluster {
                    reserved_id: None,
                    reserved_created_at: None,
                    members,
                    sessions: vec![session.clone(), other.clone()],
                    profile: unit_profile,
                });
            }
            None => {
                // No eligible target: start a singleton. The member
                // score is the session's self-correlation (its span
                // always overlaps itself, so reasons are never empty).
                let self_pair = score_pair(
                    &extract_signals(&profile, &profile, config.time_horizon_seconds),
                    config,
                );
                let member =
                    WorkUnitSession::from_session(session, self_pair.score, self_pair.reasons);
                let mut unit_profile = profile.clone();
                unit_profile.cwd = None;
                clusters.push(Cluster {
                    reserved_id: None,
                    reserved_created_at: None,
                    members: vec![member],
                    sessions: vec![session.clone()],
                    profile: unit_profile,
                });
            }
        }
    }

    // Step 5 guard: drop clusters that ended up empty (pinned seeds
    // whose sessions all vanished from the store).
    clusters.retain(|c| !c.members.is_empty());

    // Id reconciliation: reserved ids are already claimed; remaining
    // clusters claim the existing unit they overlap the most, largest
    // overlap first, smallest unit id on ties.
    let existing_members: BTreeMap<Uuid, BTreeSet<String>> = existing
        .iter()
        .map(|u| {
            (
                u.id,
                u.sessions.iter().map(|m| m.session_id.clone()).collect(),
            )
        })
        .collect();
    let mut claimed: BTreeSet<Uuid> = clusters.iter().filter_map(|c| c.reserved_id).collect();

    let mut candidates: Vec<(usize, Uuid, usize)> = Vec::new(); // (overlap, cluster idx encoded below)
    for (ci, cluster) in clusters.iter().enumerate() {
        if cluster.reserved_id.is_some() {
            continue;
        }
        let ids = cluster.session_ids();
        for (unit_id, members) in &existing_members {
            if claimed.contains(unit_id) {
                continue;
            }
            let overlap = ids.intersection(members).count();
            if overlap > 0 {
                candidates.push((overlap, *unit_id, ci));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)).then_with(|| a.2.cmp(&b.2)));

    let mut assigned_ids: HashMap<usize, (Uuid, DateTime<Utc>)> = HashMap::new();
    let existing_by_id: HashMap<Uuid, &WorkUnit> = existing.iter().map(|u| (u.id, u)).collect();
    for (_, unit_id, ci) in candidates {
        if claimed.contains(&unit_id) || assigned_ids.contains_key(&ci) {
            continue;
        }
        claimed.insert(unit_id);
        assigned_ids.insert(ci, (unit_id, existing_by_id[&unit_id].created_at));
    }

    // Build the final unit set
    let mut created = 0;
    let mut updated = 0;
    let mut units: Vec<WorkUnit> = Vec::new();

    for (ci, cluster) in clusters.iter().enumerate() {
        let (id, created_at, is_new) = match (cluster.reserved_id, assigned_ids.get(&ci)) {
            (Some(id), _) => (id, cluster.reserved_created_at.unwrap_or(now), false),
            (None, Some((id, created_at))) => (*id, *created_at, false),
            (None, None) => (Uuid::new_v4(), now, true),
        };

        let mut unit = rebuild_unit(
            id,
            created_at,
            cluster.members.clone(),
            &cluster.sessions,
            config,
            now,
        );

        if is_new {
            created += 1;
        } else if let Some(previous) = existing_by_id.get(&id) {
            if unit_content_equal(&unit, previous) {
                unit.updated_at = previous.updated_at;
            } else {
                updated += 1;
            }
        } else {
            // Reserved id whose prior unit disappeared between loads;
            // treat as updated.
            updated += 1;
        }

        units.push(unit);
    }

    units.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });

    RecomputeOutcome {
        units,
        created,
        updated,
        sessions_processed: sessions.len(),
    }
}

/// Recompute a unit's derived fields from its memberships.
///
/// `member_sessions` supplies the current session rows for file-union
/// and representative-path derivation; memberships whose session row
/// is unavailable still contribute their denormalized aggregates.
pub fn rebuild_unit(
    id: Uuid,
    created_at: DateTime<Utc>,
    mut members: Vec<WorkUnitSession>,
    member_sessions: &[Session],
    config: &CorrelationConfig,
    now: DateTime<Utc>,
) -> WorkUnit {
    members.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    let start_time = members
        .iter()
        .map(|m| m.start_time)
        .min()
        .unwrap_or(now);
    let end_time = members.iter().map(|m| m.end_time).max().unwrap_or(now);
    let total_duration_seconds = members.iter().map(|m| m.duration_seconds).sum();
    let total_frames = members.iter().map(|m| m.frame_count).sum();

    let mut agents: Vec<Agent> = members.iter().map(|m| m.agent).collect();
    agents.sort();
    agents.dedup();

    let min_score = members
        .iter()
        .map(|m| m.correlation_score)
        .fold(f64::INFINITY, f64::min);
    let confidence = config.tier_for(min_score);

    let mut files_touched = BTreeSet::new();
    for session in member_sessions {
        files_touched.extend(session.files_touched.iter().cloned());
    }

    // Representative path: most recent member session's project path
    let project_path = member_sessions
        .iter()
        .max_by(|a, b| {
            a.end_time
                .cmp(&b.end_time)
                .then_with(|| a.session_id.cmp(&b.session_id))
        })
        .map(|s| normalize_path(&s.project_path))
        .unwrap_or_default();

    let name = WorkUnit::derive_name(&project_path, start_time);

    WorkUnit {
        id,
        name,
        project_path,
        sessions: members,
        agents,
        confidence,
        start_time,
        end_time,
        total_duration_seconds,
        total_frames,
        files_touched,
        created_at,
        updated_at: now,
    }
}

/// Structural equality ignoring created_at/updated_at.
fn unit_content_equal(a: &WorkUnit, b: &WorkUnit) -> bool {
    if a.id != b.id
        || a.name != b.name
        || a.project_path != b.project_path
        || a.agents != b.agents
        || a.confidence != b.confidence
        || a.start_time != b.start_time
        || a.end_time != b.end_time
        || a.total_duration_seconds != b.total_duration_seconds
        || a.total_frames != b.total_frames
        || a.files_touched != b.files_touched
        || a.sessions.len() != b.sessions.len()
    {
        return false;
    }
    a.sessions.iter().zip(b.sessions.iter()).all(|(x, y)| {
        x.session_id == y.session_id
            && x.agent == y.agent
            && x.model == y.model
            && x.correlation_score == y.correlation_score
            && x.join_reasons == y.join_reasons
            && x.start_time == y.start_time
            && x.end_time == y.end_time
            && x.duration_seconds == y.duration_seconds
            && x.frame_count == y.frame_count
    })
}
