//! Connection records and the subscription indices that point at them.
//!
//! [`SubscriptionRegistry`] owns every live [`Connection`] together with
//! three reverse indices: route to connections, trip to connections and
//! user to connections. Every mutation updates the connection's own sets
//! and the matching index bucket in the same call, and empty buckets are
//! removed at once, so for every connection `c` and key `k`:
//!
//! ```text
//! c in index[k]  <=>  k in c.subscribed
//! ```
//!
//! The registry is a plain data structure. The hub wraps it in a lock and
//! only ever hands out copies of subscriber sets.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use transit_types::{ConnectionId, RouteId, ServerMessage, TripId, UserId};

use crate::error::HubError;

/// Outbound queue of one connection.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// A live client session.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Session identifier.
    pub id: ConnectionId,
    /// Identity the handshake token resolved to, if any.
    pub user_id: Option<UserId>,
    /// Routes this session follows.
    pub subscribed_routes: BTreeSet<RouteId>,
    /// Trips this session follows.
    pub subscribed_trips: BTreeSet<TripId>,
    /// When the handshake completed.
    pub connected_at: DateTime<Utc>,
    outbox: Outbox,
}

impl Connection {
    /// A fresh session with no subscriptions.
    pub fn new(
        id: ConnectionId,
        user_id: Option<UserId>,
        connected_at: DateTime<Utc>,
        outbox: Outbox,
    ) -> Self {
        Self {
            id,
            user_id,
            subscribed_routes: BTreeSet::new(),
            subscribed_trips: BTreeSet::new(),
            connected_at,
            outbox,
        }
    }

    /// Whether the handshake token was accepted.
    pub const fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Handle for queueing messages to this session.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

/// A copied delivery target: the connection id and its outbox.
pub type Target = (ConnectionId, Outbox);

/// Live connections and their subscription indices.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
    routes: BTreeMap<RouteId, BTreeSet<ConnectionId>>,
    trips: BTreeMap<TripId, BTreeSet<ConnectionId>>,
    users: BTreeMap<UserId, BTreeSet<ConnectionId>>,
}

impl SubscriptionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. An authenticated connection joins its user's
    /// bucket straight away.
    pub fn insert(&mut self, connection: Connection) {
        let id = connection.id;
        if let Some(user_id) = connection.user_id {
            self.users.entry(user_id).or_default().insert(id);
        }
        for route_id in &connection.subscribed_routes {
            self.routes.entry(*route_id).or_default().insert(id);
        }
        for trip_id in &connection.subscribed_trips {
            self.trips.entry(*trip_id).or_default().insert(id);
        }
        self.connections.insert(id, connection);
    }

    /// Remove a connection from every bucket it appears in, then drop it.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        if let Some(user_id) = connection.user_id {
            detach(&mut self.users, user_id, id);
        }
        for route_id in &connection.subscribed_routes {
            detach(&mut self.routes, *route_id, id);
        }
        for trip_id in &connection.subscribed_trips {
            detach(&mut self.trips, *trip_id, id);
        }
        Some(connection)
    }

    /// Follow a route. Returns `false` if already following it.
    pub fn subscribe_route(&mut self, id: ConnectionId, route_id: RouteId) -> Result<bool, HubError> {
        let connection = self.connection_mut(id)?;
        let added = connection.subscribed_routes.insert(route_id);
        self.routes.entry(route_id).or_default().insert(id);
        Ok(added)
    }

    /// Stop following a route. Returns `false` if it was not followed.
    pub fn unsubscribe_route(
        &mut self,
        id: ConnectionId,
        route_id: RouteId,
    ) -> Result<bool, HubError> {
        let connection = self.connection_mut(id)?;
        let removed = connection.subscribed_routes.remove(&route_id);
        detach(&mut self.routes, route_id, id);
        Ok(removed)
    }

    /// Follow a trip. Returns `false` if already following it.
    pub fn subscribe_trip(&mut self, id: ConnectionId, trip_id: TripId) -> Result<bool, HubError> {
        let connection = self.connection_mut(id)?;
        let added = connection.subscribed_trips.insert(trip_id);
        self.trips.entry(trip_id).or_default().insert(id);
        Ok(added)
    }

    /// Stop following a trip. Returns `false` if it was not followed.
    pub fn unsubscribe_trip(&mut self, id: ConnectionId, trip_id: TripId) -> Result<bool, HubError> {
        let connection = self.connection_mut(id)?;
        let removed = connection.subscribed_trips.remove(&trip_id);
        detach(&mut self.trips, trip_id, id);
        Ok(removed)
    }

    /// Put a connection in the bucket of `user_id`.
    ///
    /// The connection must be authenticated as that same user.
    pub fn join_user(&mut self, id: ConnectionId, user_id: UserId) -> Result<(), HubError> {
        let connection = self
            .connections
            .get(&id)
            .ok_or(HubError::UnknownConnection(id))?;
        match connection.user_id {
            None => Err(HubError::AuthenticationRequired),
            Some(own) if own != user_id => Err(HubError::Unauthorized),
            Some(_) => {
                self.users.entry(user_id).or_default().insert(id);
                Ok(())
            }
        }
    }

    /// A connection by id.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Every connection, in id order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connections following `trip_id` or `route_id`, each once.
    pub fn trip_update_targets(&self, trip_id: TripId, route_id: RouteId) -> Vec<Target> {
        let by_trip = self.trips.get(&trip_id).into_iter().flatten();
        let by_route = self.routes.get(&route_id).into_iter().flatten();
        let ids: BTreeSet<ConnectionId> = by_trip.chain(by_route).copied().collect();
        self.targets(ids)
    }

    /// Connections following `route_id`.
    pub fn route_targets(&self, route_id: RouteId) -> Vec<Target> {
        self.targets(self.routes.get(&route_id).into_iter().flatten().copied())
    }

    /// Connections of `user_id`.
    pub fn user_targets(&self, user_id: UserId) -> Vec<Target> {
        self.targets(self.users.get(&user_id).into_iter().flatten().copied())
    }

    /// Every live connection.
    pub fn all_targets(&self) -> Vec<Target> {
        self.connections
            .values()
            .map(|c| (c.id, c.outbox.clone()))
            .collect()
    }

    /// Connections older than `max_age` at `now`.
    pub fn expired(&self, now: DateTime<Utc>, max_age: chrono::TimeDelta) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| now.signed_duration_since(c.connected_at) > max_age)
            .map(|c| c.id)
            .collect()
    }

    /// Number of distinct routes with at least one follower.
    pub fn route_keys(&self) -> usize {
        self.routes.len()
    }

    /// Number of distinct trips with at least one follower.
    pub fn trip_keys(&self) -> usize {
        self.trips.len()
    }

    /// Number of distinct users with at least one connection.
    pub fn user_keys(&self) -> usize {
        self.users.len()
    }

    /// Number of authenticated connections.
    pub fn authenticated(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }

    /// Check the index invariant in both directions.
    ///
    /// Returns a description of the first violation found.
    pub fn check_consistency(&self) -> Result<(), String> {
        for c in self.connections.values() {
            for r in &c.subscribed_routes {
                if !self.routes.get(r).is_some_and(|b| b.contains(&c.id)) {
                    return Err(format!("{} follows route {r} but is not indexed", c.id));
                }
            }
            for t in &c.subscribed_trips {
                if !self.trips.get(t).is_some_and(|b| b.contains(&c.id)) {
                    return Err(format!("{} follows trip {t} but is not indexed", c.id));
                }
            }
            if let Some(u) = c.user_id {
                if !self.users.get(&u).is_some_and(|b| b.contains(&c.id)) {
                    return Err(format!("{} is user {u} but is not indexed", c.id));
                }
            }
        }
        let live = &self.connections;
        check_buckets(&self.routes, "route", live, |c, k| c.subscribed_routes.contains(k))?;
        check_buckets(&self.trips, "trip", live, |c, k| c.subscribed_trips.contains(k))?;
        check_buckets(&self.users, "user", live, |c, k| c.user_id == Some(*k))?;
        Ok(())
    }

    fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, HubError> {
        self.connections
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))
    }

    fn targets(&self, ids: impl IntoIterator<Item = ConnectionId>) -> Vec<Target> {
        ids.into_iter()
            .filter_map(|id| self.connections.get(&id).map(|c| (id, c.outbox.clone())))
            .collect()
    }
}

/// Remove `id` from `index[key]`, pruning the bucket if it empties.
fn detach<K: Ord>(index: &mut BTreeMap<K, BTreeSet<ConnectionId>>, key: K, id: ConnectionId) {
    if let Some(bucket) = index.get_mut(&key) {
        bucket.remove(&id);
        if bucket.is_empty() {
            index.remove(&key);
        }
    }
}

fn check_buckets<K: Ord + std::fmt::Display>(
    index: &BTreeMap<K, BTreeSet<ConnectionId>>,
    label: &str,
    connections: &BTreeMap<ConnectionId, Connection>,
    holds: impl Fn(&Connection, &K) -> bool,
) -> Result<(), String> {
    for (key, bucket) in index {
        if bucket.is_empty() {
            return Err(format!("empty {label} bucket {key}"));
        }
        for id in bucket {
            match connections.get(id) {
                Some(c) if holds(c, key) => {}
                Some(_) => {
                    return Err(format!("{label} bucket {key} holds {id} without a subscription"));
                }
                None => return Err(format!("{label} bucket {key} holds dead connection {id}")),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn connection(user_id: Option<UserId>) -> (Connection, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(ConnectionId::new(), user_id, Utc::now(), tx), rx)
    }

    #[test]
    fn subscribe_and_unsubscribe_keep_indices_in_step() {
        let mut registry = SubscriptionRegistry::new();
        let (c, _rx) = connection(None);
        let id = c.id;
        registry.insert(c);

        let route = RouteId::new();
        assert!(registry.subscribe_route(id, route).unwrap());
        assert!(!registry.subscribe_route(id, route).unwrap());
        assert_eq!(registry.route_targets(route).len(), 1);
        registry.check_consistency().unwrap();

        assert!(registry.unsubscribe_route(id, route).unwrap());
        assert!(registry.route_targets(route).is_empty());
        assert_eq!(registry.route_keys(), 0);
        registry.check_consistency().unwrap();
    }

    #[test]
    fn remove_cascades_through_every_bucket() {
        let mut registry = SubscriptionRegistry::new();
        let user = UserId::new();
        let (c, _rx) = connection(Some(user));
        let id = c.id;
        registry.insert(c);
        let (route, trip) = (RouteId::new(), TripId::new());
        registry.subscribe_route(id, route).unwrap();
        registry.subscribe_trip(id, trip).unwrap();

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.subscribed_routes.len(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.route_keys(), 0);
        assert_eq!(registry.trip_keys(), 0);
        assert_eq!(registry.user_keys(), 0);
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn unknown_connection_is_rejected() {
        let mut registry = SubscriptionRegistry::new();
        let ghost = ConnectionId::new();
        assert!(matches!(
            registry.subscribe_trip(ghost, TripId::new()),
            Err(HubError::UnknownConnection(id)) if id == ghost
        ));
        assert_eq!(registry.trip_keys(), 0);
    }

    #[test]
    fn join_user_requires_matching_identity() {
        let mut registry = SubscriptionRegistry::new();
        let user = UserId::new();
        let (anon, _a) = connection(None);
        let (authed, _b) = connection(Some(user));
        let (anon_id, authed_id) = (anon.id, authed.id);
        registry.insert(anon);
        registry.insert(authed);

        assert!(matches!(
            registry.join_user(anon_id, user),
            Err(HubError::AuthenticationRequired)
        ));
        assert!(matches!(
            registry.join_user(authed_id, UserId::new()),
            Err(HubError::Unauthorized)
        ));
        registry.join_user(authed_id, user).unwrap();
        assert_eq!(registry.user_targets(user).len(), 1);
        registry.check_consistency().unwrap();
    }

    #[test]
    fn trip_update_targets_are_a_union_without_duplicates() {
        let mut registry = SubscriptionRegistry::new();
        let (route, trip) = (RouteId::new(), TripId::new());
        let (both, _a) = connection(None);
        let (route_only, _b) = connection(None);
        let (neither, _c) = connection(None);
        let ids = [both.id, route_only.id, neither.id];
        registry.insert(both);
        registry.insert(route_only);
        registry.insert(neither);

        registry.subscribe_trip(ids[0], trip).unwrap();
        registry.subscribe_route(ids[0], route).unwrap();
        registry.subscribe_route(ids[1], route).unwrap();

        let targets: Vec<ConnectionId> = registry
            .trip_update_targets(trip, route)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&ids[0]));
        assert!(targets.contains(&ids[1]));
        assert!(!targets.contains(&ids[2]));
    }

    #[test]
    fn expired_uses_connection_age() {
        let mut registry = SubscriptionRegistry::new();
        let now = Utc::now();
        let (tx, _rx) = mpsc::channel(1);
        let old = Connection::new(
            ConnectionId::new(),
            None,
            now.checked_sub_signed(chrono::TimeDelta::hours(2)).unwrap(),
            tx.clone(),
        );
        let old_id = old.id;
        registry.insert(old);
        registry.insert(Connection::new(ConnectionId::new(), None, now, tx));

        let expired = registry.expired(now, chrono::TimeDelta::hours(1));
        assert_eq!(expired, vec![old_id]);
    }

    #[test]
    fn random_operation_sequences_stay_consistent() {
        let mut rng = SmallRng::seed_from_u64(7);
        let routes: Vec<RouteId> = (0..4).map(|_| RouteId::new()).collect();
        let trips: Vec<TripId> = (0..4).map(|_| TripId::new()).collect();
        let users: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
        let mut registry = SubscriptionRegistry::new();
        let mut live: Vec<ConnectionId> = Vec::new();
        let mut receivers = Vec::new();

        for _ in 0..2_000 {
            let op = rng.random_range(0..7u8);
            if op == 0 || live.is_empty() {
                let user = if rng.random::<bool>() {
                    Some(users[rng.random_range(0..users.len())])
                } else {
                    None
                };
                let (c, rx) = connection(user);
                live.push(c.id);
                receivers.push(rx);
                registry.insert(c);
                continue;
            }
            let id = live[rng.random_range(0..live.len())];
            let route = routes[rng.random_range(0..routes.len())];
            let trip = trips[rng.random_range(0..trips.len())];
            match op {
                1 => {
                    registry.subscribe_route(id, route).unwrap();
                }
                2 => {
                    registry.unsubscribe_route(id, route).unwrap();
                }
                3 => {
                    registry.subscribe_trip(id, trip).unwrap();
                }
                4 => {
                    registry.unsubscribe_trip(id, trip).unwrap();
                }
                5 => {
                    // Rejections are expected for anonymous or mismatched users.
                    let _ = registry.join_user(id, users[rng.random_range(0..users.len())]);
                }
                _ => {
                    registry.remove(id).unwrap();
                    live.retain(|c| *c != id);
                }
            }
            registry.check_consistency().unwrap();
        }

        for id in live {
            registry.remove(id);
        }
        assert!(registry.is_empty());
        assert_eq!(registry.route_keys(), 0);
        assert_eq!(registry.trip_keys(), 0);
        assert_eq!(registry.user_keys(), 0);
    }
}
