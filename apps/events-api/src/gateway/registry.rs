//! Team → connections membership map and the broadcast gate.
//!
//! Uses `DashMap` to find a team's group and a `parking_lot::Mutex` per team
//! for the member set itself. Join, leave and broadcast on one team are
//! serialized by that team's lock; different teams never share a lock.
//!
//! Lock order: a team lock may be taken while nothing else is held, and the
//! map may be touched while holding a team lock. Never lock a team while
//! holding a map guard.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use utoipa::ToSchema;

use super::fanout::{EventSender, GroupEvent};

pub type ConnectionId = String;

/// Reference to one live connection's outbound queue.
///
/// Compared and hashed by connection id only.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: Option<String>,
    tx: EventSender,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, user_id: Option<String>, tx: EventSender) -> Self {
        Self { id, user_id, tx }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// True once the connection has dropped its receiving end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Non-blocking delivery into the connection's queue.
    pub fn try_deliver(&self, event: &Arc<GroupEvent>) -> Result<(), DeliveryError> {
        self.tx.try_send(Arc::clone(event)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl std::hash::Hash for ConnectionHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection is not draining fast enough.
    QueueFull,
    /// The connection has already gone away.
    Closed,
}

impl DeliveryError {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryError::QueueFull => "queue_full",
            DeliveryError::Closed => "closed",
        }
    }
}

/// What one broadcast did. Failures are informational only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<(ConnectionId, DeliveryError)>,
}

/// Per-team view used by the stats endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TeamSummary {
    pub team: String,
    pub connections: usize,
    pub users: usize,
}

#[derive(Default)]
struct TeamGroup {
    members: HashMap<ConnectionId, ConnectionHandle>,
    /// Set when the group is emptied and unlinked from the map. A retired
    /// group is always empty; anyone who locks one must look the team up
    /// again.
    retired: bool,
}

impl TeamGroup {
    fn summary(&self, team: &str) -> TeamSummary {
        let users: HashSet<&str> = self.members.values().filter_map(|h| h.user_id()).collect();
        TeamSummary {
            team: team.to_string(),
            connections: self.members.len(),
            users: users.len(),
        }
    }
}

/// Shared registry of team broadcast groups.
pub struct GroupRegistry {
    teams: DashMap<String, Arc<Mutex<TeamGroup>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            teams: DashMap::new(),
        }
    }

    fn existing(&self, team: &str) -> Option<Arc<Mutex<TeamGroup>>> {
        self.teams.get(team).map(|group| Arc::clone(group.value()))
    }

    fn existing_or_new(&self, team: &str) -> Arc<Mutex<TeamGroup>> {
        if let Some(group) = self.existing(team) {
            return group;
        }
        Arc::clone(self.teams.entry(team.to_string()).or_default().value())
    }

    /// Add a connection to a team's group.
    ///
    /// Returns `true` if the handle was newly added. Empty team names and
    /// already-closed handles are ignored; joining twice is a no-op.
    pub fn join(&self, team: &str, handle: ConnectionHandle) -> bool {
        if team.is_empty() || handle.is_closed() {
            return false;
        }
        loop {
            let group = self.existing_or_new(team);
            let mut g = group.lock();
            if g.retired {
                continue;
            }
            return match g.members.entry(handle.id.clone()) {
                std::collections::hash_map::Entry::Occupied(_) => false,
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(handle);
                    true
                }
            };
        }
    }

    /// Remove a connection from a team's group.
    ///
    /// Returns `true` if it was a member. Removing the last member drops the
    /// team's entry.
    pub fn leave(&self, team: &str, connection_id: &str) -> bool {
        if team.is_empty() {
            return false;
        }
        loop {
            let Some(group) = self.existing(team) else {
                return false;
            };
            let mut g = group.lock();
            if g.retired {
                continue;
            }
            let removed = g.members.remove(connection_id).is_some();
            if removed && g.members.is_empty() {
                g.retired = true;
                self.teams
                    .remove_if(team, |_, current| Arc::ptr_eq(current, &group));
            }
            return removed;
        }
    }

    /// Deliver an event to every current member of a team.
    ///
    /// Delivery happens under the team lock with non-blocking sends, so a
    /// member that has finished [`leave`](Self::leave) never receives it and
    /// a stuck member cannot stall the others.
    pub fn broadcast(&self, team: &str, event: GroupEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        if team.is_empty() {
            return report;
        }
        let Some(group) = self.existing(team) else {
            return report;
        };

        let event = Arc::new(event);
        {
            let g = group.lock();
            for handle in g.members.values() {
                match handle.try_deliver(&event) {
                    Ok(()) => report.delivered += 1,
                    Err(err) => report.failed.push((handle.id.clone(), err)),
                }
            }
        }

        for (connection_id, err) in &report.failed {
            match err {
                DeliveryError::QueueFull => tracing::warn!(
                    %team,
                    %connection_id,
                    event = %event.event_name,
                    "connection queue full, event dropped"
                ),
                DeliveryError::Closed => tracing::debug!(
                    %team,
                    %connection_id,
                    event = %event.event_name,
                    "connection already closed, event dropped"
                ),
            }
        }
        report
    }

    pub fn is_member(&self, team: &str, connection_id: &str) -> bool {
        self.existing(team)
            .map(|group| group.lock().members.contains_key(connection_id))
            .unwrap_or(false)
    }

    pub fn member_count(&self, team: &str) -> usize {
        self.existing(team)
            .map(|group| group.lock().members.len())
            .unwrap_or(0)
    }

    /// Number of teams with at least one member.
    pub fn team_count(&self) -> usize {
        self.teams.len()
    }

    pub fn summary(&self, team: &str) -> TeamSummary {
        match self.existing(team) {
            Some(group) => group.lock().summary(team),
            None => TeamSummary {
                team: team.to_string(),
                connections: 0,
                users: 0,
            },
        }
    }

    /// Summaries of every non-empty team, sorted by name.
    pub fn snapshot(&self) -> Vec<TeamSummary> {
        let groups: Vec<(String, Arc<Mutex<TeamGroup>>)> = self
            .teams
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut summaries: Vec<TeamSummary> = groups
            .into_iter()
            .map(|(team, group)| group.lock().summary(&team))
            .filter(|summary| summary.connections > 0)
            .collect();
        summaries.sort_by(|a, b| a.team.cmp(&b.team));
        summaries
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fanout::{outbound_channel, EventReceiver};
    use std::thread;

    fn handle(id: &str) -> (ConnectionHandle, EventReceiver) {
        handle_with_capacity(id, 16)
    }

    fn handle_with_capacity(id: &str, capacity: usize) -> (ConnectionHandle, EventReceiver) {
        let (tx, rx) = outbound_channel(capacity);
        (
            ConnectionHandle::new(id.to_string(), Some(format!("usr_{id}")), tx),
            rx,
        )
    }

    fn event(team: &str, name: &str) -> GroupEvent {
        GroupEvent::new(team, name, serde_json::json!({ "n": name }))
    }

    fn drain(rx: &mut EventReceiver) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            names.push(ev.event_name.clone());
        }
        names
    }

    #[test]
    fn join_is_idempotent() {
        let registry = GroupRegistry::new();
        let (a, mut rx) = handle("a");

        assert!(registry.join("red", a.clone()));
        assert!(!registry.join("red", a.clone()));
        assert_eq!(registry.member_count("red"), 1);

        let report = registry.broadcast("red", event("red", "M"));
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx), vec!["M"]);
    }

    #[test]
    fn leave_is_idempotent() {
        let registry = GroupRegistry::new();
        let (a, _rx) = handle("a");

        registry.join("red", a);
        assert!(registry.leave("red", "a"));
        assert!(!registry.leave("red", "a"));
        assert!(!registry.leave("red", "never-joined"));
        assert!(!registry.leave("blue", "a"));
        assert_eq!(registry.member_count("red"), 0);
    }

    #[test]
    fn empty_team_is_a_no_op() {
        let registry = GroupRegistry::new();
        let (a, mut rx) = handle("a");

        assert!(!registry.join("", a));
        assert!(!registry.leave("", "a"));
        let report = registry.broadcast("", event("", "M"));
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(registry.team_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn closed_handle_cannot_join() {
        let registry = GroupRegistry::new();
        let (a, rx) = handle("a");
        drop(rx);

        assert!(!registry.join("red", a));
        assert_eq!(registry.team_count(), 0);
    }

    #[test]
    fn membership_follows_last_operation() {
        let registry = GroupRegistry::new();
        let (a, _ra) = handle("a");
        let (b, _rb) = handle("b");
        let (c, _rc) = handle("c");

        registry.join("red", a.clone());
        registry.join("red", b.clone());
        registry.leave("red", "a");
        registry.join("red", c.clone());
        registry.join("red", a.clone());
        registry.leave("red", "b");
        registry.leave("red", "b");
        registry.join("red", c.clone());

        assert!(registry.is_member("red", "a"));
        assert!(!registry.is_member("red", "b"));
        assert!(registry.is_member("red", "c"));
        assert_eq!(registry.member_count("red"), 2);
    }

    #[test]
    fn broadcast_reaches_only_team_members() {
        let registry = GroupRegistry::new();
        let (a, mut ra) = handle("a");
        let (b, mut rb) = handle("b");
        let (c, mut rc) = handle("c");
        let (_never, mut rn) = handle("never");

        registry.join("red", a);
        registry.join("red", b);
        registry.join("blue", c);

        let report = registry.broadcast("red", event("red", "M"));
        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());

        assert_eq!(drain(&mut ra), vec!["M"]);
        assert_eq!(drain(&mut rb), vec!["M"]);
        assert!(drain(&mut rc).is_empty());
        assert!(drain(&mut rn).is_empty());
    }

    #[test]
    fn left_member_receives_nothing() {
        let registry = GroupRegistry::new();
        let (a, mut ra) = handle("a");
        let (b, mut rb) = handle("b");

        registry.join("red", a);
        registry.join("red", b);
        registry.leave("red", "a");

        registry.broadcast("red", event("red", "M"));
        assert!(drain(&mut ra).is_empty());
        assert_eq!(drain(&mut rb), vec!["M"]);
    }

    #[test]
    fn broadcast_to_unknown_team_is_safe() {
        let registry = GroupRegistry::new();
        let report = registry.broadcast("nobody", event("nobody", "M"));
        assert_eq!(report.delivered, 0);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn failed_delivery_does_not_abort_broadcast() {
        let registry = GroupRegistry::new();
        let (full, mut r_full) = handle_with_capacity("full", 1);
        let (gone, r_gone) = handle("gone");
        let (ok, mut r_ok) = handle("ok");

        registry.join("red", full);
        registry.join("red", gone);
        registry.join("red", ok);
        drop(r_gone);

        registry.broadcast("red", event("red", "first"));
        let report = registry.broadcast("red", event("red", "second"));

        assert_eq!(report.delivered, 1);
        let mut failed = report.failed.clone();
        failed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            failed,
            vec![
                ("full".to_string(), DeliveryError::QueueFull),
                ("gone".to_string(), DeliveryError::Closed),
            ]
        );
        assert_eq!(drain(&mut r_ok), vec!["first", "second"]);
        assert_eq!(drain(&mut r_full), vec!["first"]);

        // Broadcast never prunes; that is the connection's job.
        assert_eq!(registry.member_count("red"), 3);
    }

    #[test]
    fn last_leave_drops_team_entry() {
        let registry = GroupRegistry::new();
        let (a, _ra) = handle("a");

        registry.join("red", a.clone());
        assert_eq!(registry.team_count(), 1);
        registry.leave("red", "a");
        assert_eq!(registry.team_count(), 0);

        // The team comes back on the next join.
        assert!(registry.join("red", a));
        assert_eq!(registry.member_count("red"), 1);
    }

    #[test]
    fn summaries_count_connections_and_users() {
        let registry = GroupRegistry::new();
        let (tx1, _r1) = outbound_channel(4);
        let (tx2, _r2) = outbound_channel(4);
        let (tx3, _r3) = outbound_channel(4);

        // Same user on two tabs.
        registry.join("red", ConnectionHandle::new("c1".into(), Some("u1".into()), tx1));
        registry.join("red", ConnectionHandle::new("c2".into(), Some("u1".into()), tx2));
        registry.join("blue", ConnectionHandle::new("c3".into(), Some("u2".into()), tx3));

        assert_eq!(
            registry.summary("red"),
            TeamSummary {
                team: "red".into(),
                connections: 2,
                users: 1,
            }
        );
        assert_eq!(registry.summary("green").connections, 0);

        let teams: Vec<String> = registry.snapshot().into_iter().map(|s| s.team).collect();
        assert_eq!(teams, vec!["blue", "red"]);
    }

    #[test]
    fn concurrent_join_leave_with_broadcasts() {
        let registry = Arc::new(GroupRegistry::new());
        let (target, mut target_rx) = handle_with_capacity("target", 100_000);
        let (bystander, mut bystander_rx) = handle_with_capacity("bystander", 100_000);
        registry.join("red", bystander);

        let mut workers = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let target = target.clone();
            workers.push(thread::spawn(move || {
                for _ in 0..500 {
                    registry.join("red", target.clone());
                    registry.leave("red", "target");
                }
            }));
        }
        for i in 0..4 {
            let registry = Arc::clone(&registry);
            workers.push(thread::spawn(move || {
                for j in 0..500 {
                    let name = format!("b{i}-{j}");
                    let ev = GroupEvent::new("red", name, serde_json::Value::Null);
                    registry.broadcast("red", ev);
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(!registry.is_member("red", "target"));
        assert!(registry.is_member("red", "bystander"));

        // The steady member saw every broadcast exactly once.
        let seen = drain(&mut bystander_rx);
        assert_eq!(seen.len(), 4 * 500);
        let unique: HashSet<&String> = seen.iter().collect();
        assert_eq!(unique.len(), seen.len());

        // The churning member never saw any broadcast twice.
        let churn = drain(&mut target_rx);
        let unique: HashSet<&String> = churn.iter().collect();
        assert_eq!(unique.len(), churn.len());
    }

    #[test]
    fn join_racing_last_leave_is_never_lost() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let registry = Arc::new(GroupRegistry::new());
        let done = Arc::new(AtomicBool::new(false));
        let (churn, _churn_rx) = handle_with_capacity("churn", 16);

        // Keep emptying "red" so its group is retired and recreated over and over.
        let mut churners = Vec::new();
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            let done = Arc::clone(&done);
            let churn = churn.clone();
            churners.push(thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    registry.join("red", churn.clone());
                    registry.leave("red", "churn");
                }
            }));
        }

        let joiner = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut lost = 0;
                for i in 0..20_000 {
                    let id = format!("fresh-{i}");
                    let (h, _rx) = handle(&id);
                    assert!(registry.join("red", h));
                    if !registry.is_member("red", &id) {
                        lost += 1;
                    }
                    assert!(registry.leave("red", &id));
                }
                lost
            })
        };

        let lost = joiner.join().unwrap();
        done.store(true, Ordering::Relaxed);
        for churner in churners {
            churner.join().unwrap();
        }

        assert_eq!(lost, 0);
        assert!(!registry.is_member("red", "churn"));
        assert_eq!(registry.team_count(), 0);
    }

    #[test]
    fn concurrent_churn_across_teams_leaves_no_members() {
        let registry = Arc::new(GroupRegistry::new());
        let mut workers = Vec::new();
        let mut receivers = Vec::new();

        for t in 0..4 {
            for c in 0..4 {
                let id = format!("t{t}-c{c}");
                let (h, rx) = handle_with_capacity(&id, 1024);
                receivers.push(rx);
                let registry = Arc::clone(&registry);
                let team = format!("team{t}");
                workers.push(thread::spawn(move || {
                    for _ in 0..300 {
                        registry.join(&team, h.clone());
                        let tick = GroupEvent::new(team.as_str(), "tick", serde_json::Value::Null);
                        registry.broadcast(&team, tick);
                        registry.leave(&team, &id);
                    }
                }));
            }
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.team_count(), 0);
        assert!(registry.snapshot().is_empty());
    }
}
