//! In-memory implementation of every collaborator trait.
//!
//! Uses `HashMap`, `HashSet`, and `Vec` behind one `std::sync::RwLock` for
//! thread safety. Used by the core test-suite and by embedders that want a
//! zero-setup backend. Fail points let tests exercise the engine's
//! degrade-gracefully paths.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Anchor, Item, Notification, UserProfile};
use crate::query::ContentQuery;
use crate::score::score_for;

use super::{
    ContentReader, Counter, CounterWriter, EdgeWriter, EngagementReader, IdentityReader,
    NotificationSink, SocialGraphReader,
};

/// A collaborator call the in-memory store can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Query,
    Identity,
    Engagement,
    Previews,
    Watermarks,
    Notifications,
}

struct LikeEdge {
    user_id: Uuid,
    anchor_id: Uuid,
    seq: u64,
}

struct AnchorFollow {
    notify_on_update: bool,
    seen_version: i64,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, UserProfile>,
    anchors: HashMap<Uuid, Anchor>,
    items: Vec<Item>,
    follows: HashSet<(Uuid, Uuid)>,
    anchor_follows: HashMap<(Uuid, Uuid), AnchorFollow>,
    likes: Vec<LikeEdge>,
    clones: HashMap<(Uuid, Uuid), Uuid>,
    notifications: Vec<Notification>,
    next_seq: u64,
    failing: HashSet<FailPoint>,
}

impl State {
    fn check(&self, point: FailPoint) -> Result<()> {
        if self.failing.contains(&point) {
            bail!("injected failure at {:?}", point);
        }
        Ok(())
    }

    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// In-memory store for tests and embedding.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    // Seeding helpers. They bypass counters; set counts on the models directly.
    // A poisoned lock here is a test bug, so these helpers panic.

    pub fn insert_user(&self, user: UserProfile) {
        self.state.write().unwrap().users.insert(user.id, user);
    }

    pub fn remove_user(&self, id: Uuid) {
        self.state.write().unwrap().users.remove(&id);
    }

    pub fn insert_anchor(&self, anchor: Anchor) {
        self.state.write().unwrap().anchors.insert(anchor.id, anchor);
    }

    pub fn insert_item(&self, item: Item) {
        self.state.write().unwrap().items.push(item);
    }

    pub fn add_follow(&self, follower_id: Uuid, followee_id: Uuid) {
        self.state
            .write()
            .unwrap()
            .follows
            .insert((follower_id, followee_id));
    }

    pub fn add_anchor_follow(&self, user_id: Uuid, anchor_id: Uuid, notify: bool, seen: i64) {
        self.state.write().unwrap().anchor_follows.insert(
            (user_id, anchor_id),
            AnchorFollow {
                notify_on_update: notify,
                seen_version: seen,
            },
        );
    }

    /// Record a like edge; later calls are more recent.
    pub fn add_like(&self, user_id: Uuid, anchor_id: Uuid) {
        let mut state = self.state.write().unwrap();
        let seq = state.seq();
        state.likes.push(LikeEdge {
            user_id,
            anchor_id,
            seq,
        });
    }

    pub fn add_clone(&self, user_id: Uuid, source_anchor_id: Uuid) {
        self.state
            .write()
            .unwrap()
            .clones
            .insert((user_id, source_anchor_id), Uuid::new_v4());
    }

    pub fn fail(&self, point: FailPoint) {
        self.state.write().unwrap().failing.insert(point);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.read().unwrap().notifications.clone()
    }

    pub fn like_edge_count(&self, anchor_id: Uuid) -> usize {
        self.state
            .read()
            .unwrap()
            .likes
            .iter()
            .filter(|l| l.anchor_id == anchor_id)
            .count()
    }

    pub fn is_following(&self, follower_id: Uuid, followee_id: Uuid) -> bool {
        self.state
            .read()
            .unwrap()
            .follows
            .contains(&(follower_id, followee_id))
    }

    pub fn user(&self, id: Uuid) -> Option<UserProfile> {
        self.state.read().unwrap().users.get(&id).cloned()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentReader for InMemoryStore {
    async fn query(&self, query: &ContentQuery) -> Result<Vec<Anchor>> {
        let state = self.read()?;
        state.check(FailPoint::Query)?;
        let mut rows: Vec<Anchor> = state
            .anchors
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        rows.sort_by(|a, b| query.sort.compare(a, b));
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn get_anchor(&self, id: Uuid) -> Result<Option<Anchor>> {
        Ok(self.read()?.anchors.get(&id).cloned())
    }

    async fn get_preview_items(
        &self,
        anchor_ids: &[Uuid],
        per_anchor: usize,
    ) -> Result<HashMap<Uuid, Vec<Item>>> {
        let state = self.read()?;
        state.check(FailPoint::Previews)?;
        let mut out: HashMap<Uuid, Vec<Item>> = HashMap::new();
        for item in state.items.iter().filter(|i| anchor_ids.contains(&i.anchor_id)) {
            out.entry(item.anchor_id).or_default().push(item.clone());
        }
        for items in out.values_mut() {
            items.sort_by_key(|i| i.position);
            items.truncate(per_anchor);
        }
        Ok(out)
    }

    async fn list_anchor_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.read()?.anchors.keys().copied().collect())
    }
}

#[async_trait]
impl SocialGraphReader for InMemoryStore {
    async fn get_following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.read()?;
        let mut ids: Vec<Uuid> = state
            .follows
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .map(|(_, followee)| *followee)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_following_status(
        &self,
        user_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>> {
        let state = self.read()?;
        state.check(FailPoint::Engagement)?;
        Ok(candidate_ids
            .iter()
            .map(|c| (*c, state.follows.contains(&(user_id, *c))))
            .collect())
    }

    async fn get_notification_enabled_followers(&self, anchor_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.read()?;
        let mut ids: Vec<Uuid> = state
            .anchor_follows
            .iter()
            .filter(|((_, a), f)| *a == anchor_id && f.notify_on_update)
            .map(|((u, _), _)| *u)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_anchor_watermarks(
        &self,
        user_id: Uuid,
        anchor_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, i64>> {
        let state = self.read()?;
        state.check(FailPoint::Watermarks)?;
        Ok(anchor_ids
            .iter()
            .filter_map(|a| {
                state
                    .anchor_follows
                    .get(&(user_id, *a))
                    .map(|f| (*a, f.seen_version))
            })
            .collect())
    }
}

#[async_trait]
impl IdentityReader for InMemoryStore {
    async fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>> {
        let state = self.read()?;
        state.check(FailPoint::Identity)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn get_users_by_usernames(&self, usernames: &[String]) -> Result<Vec<UserProfile>> {
        let state = self.read()?;
        state.check(FailPoint::Identity)?;
        Ok(state
            .users
            .values()
            .filter(|u| usernames.iter().any(|n| n.eq_ignore_ascii_case(&u.username)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EngagementReader for InMemoryStore {
    async fn get_liked_anchor_ids(
        &self,
        user_id: Uuid,
        anchor_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>> {
        let state = self.read()?;
        state.check(FailPoint::Engagement)?;
        Ok(state
            .likes
            .iter()
            .filter(|l| l.user_id == user_id && anchor_ids.contains(&l.anchor_id))
            .map(|l| l.anchor_id)
            .collect())
    }

    async fn get_cloned_anchor_ids(
        &self,
        user_id: Uuid,
        anchor_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>> {
        let state = self.read()?;
        state.check(FailPoint::Engagement)?;
        Ok(anchor_ids
            .iter()
            .filter(|a| state.clones.contains_key(&(user_id, **a)))
            .copied()
            .collect())
    }

    async fn get_recent_likers(
        &self,
        anchor_ids: &[Uuid],
        per_anchor: usize,
    ) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        let state = self.read()?;
        state.check(FailPoint::Engagement)?;
        let mut edges: Vec<&LikeEdge> = state
            .likes
            .iter()
            .filter(|l| anchor_ids.contains(&l.anchor_id))
            .collect();
        edges.sort_by(|a, b| b.seq.cmp(&a.seq));

        let mut out: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for edge in edges {
            let likers = out.entry(edge.anchor_id).or_default();
            if likers.len() < per_anchor {
                likers.push(edge.user_id);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl EdgeWriter for InMemoryStore {
    async fn insert_like(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool> {
        let mut state = self.write()?;
        if state
            .likes
            .iter()
            .any(|l| l.user_id == user_id && l.anchor_id == anchor_id)
        {
            return Ok(false);
        }
        let seq = state.seq();
        state.likes.push(LikeEdge {
            user_id,
            anchor_id,
            seq,
        });
        Ok(true)
    }

    async fn delete_like(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool> {
        let mut state = self.write()?;
        let before = state.likes.len();
        state
            .likes
            .retain(|l| !(l.user_id == user_id && l.anchor_id == anchor_id));
        Ok(state.likes.len() != before)
    }

    async fn insert_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        Ok(self.write()?.follows.insert((follower_id, followee_id)))
    }

    async fn delete_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        Ok(self.write()?.follows.remove(&(follower_id, followee_id)))
    }

    async fn upsert_anchor_follow(
        &self,
        user_id: Uuid,
        anchor_id: Uuid,
        notify_on_update: bool,
        seen_version: i64,
    ) -> Result<bool> {
        let previous = self.write()?.anchor_follows.insert(
            (user_id, anchor_id),
            AnchorFollow {
                notify_on_update,
                seen_version,
            },
        );
        Ok(previous.is_none())
    }

    async fn delete_anchor_follow(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool> {
        Ok(self
            .write()?
            .anchor_follows
            .remove(&(user_id, anchor_id))
            .is_some())
    }

    async fn set_seen_version(&self, user_id: Uuid, anchor_id: Uuid, version: i64) -> Result<bool> {
        let mut state = self.write()?;
        match state.anchor_follows.get_mut(&(user_id, anchor_id)) {
            Some(f) => {
                f.seen_version = version;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_clone(
        &self,
        user_id: Uuid,
        source_anchor_id: Uuid,
        clone_anchor_id: Uuid,
    ) -> Result<bool> {
        let mut state = self.write()?;
        if state.clones.contains_key(&(user_id, source_anchor_id)) {
            return Ok(false);
        }
        state
            .clones
            .insert((user_id, source_anchor_id), clone_anchor_id);
        Ok(true)
    }
}

#[async_trait]
impl CounterWriter for InMemoryStore {
    async fn increment_counter(&self, counter: Counter, id: Uuid, delta: i64) -> Result<i64> {
        let mut state = self.write()?;
        let slot = counter_slot(&mut state, counter, id)
            .ok_or_else(|| anyhow!("no row for {:?} counter on {}", counter, id))?;
        *slot += delta;
        Ok(*slot)
    }

    async fn clamp_counter(&self, counter: Counter, id: Uuid) -> Result<()> {
        let mut state = self.write()?;
        if let Some(slot) = counter_slot(&mut state, counter, id) {
            if *slot < 0 {
                *slot = 0;
            }
        }
        Ok(())
    }

    async fn recompute_engagement_score(&self, anchor_id: Uuid) -> Result<Option<i64>> {
        let mut state = self.write()?;
        Ok(state.anchors.get_mut(&anchor_id).map(|a| {
            a.engagement_score = score_for(a);
            a.engagement_score
        }))
    }

    async fn record_item_added(&self, anchor_id: Uuid, at: DateTime<Utc>) -> Result<i64> {
        let mut state = self.write()?;
        let anchor = state
            .anchors
            .get_mut(&anchor_id)
            .ok_or_else(|| anyhow!("anchor {} not found", anchor_id))?;
        anchor.version += 1;
        anchor.item_count += 1;
        anchor.last_item_added_at = at;
        anchor.updated_at = at;
        Ok(anchor.version)
    }
}

fn counter_slot(state: &mut State, counter: Counter, id: Uuid) -> Option<&mut i64> {
    match counter {
        Counter::Likes => state.anchors.get_mut(&id).map(|a| &mut a.like_count),
        Counter::Clones => state.anchors.get_mut(&id).map(|a| &mut a.clone_count),
        Counter::Comments => state.anchors.get_mut(&id).map(|a| &mut a.comment_count),
        Counter::Followers => state.users.get_mut(&id).map(|u| &mut u.follower_count),
        Counter::Following => state.users.get_mut(&id).map(|u| &mut u.following_count),
    }
}

#[async_trait]
impl NotificationSink for InMemoryStore {
    async fn create_notifications(&self, notifications: &[Notification]) -> Result<()> {
        let mut state = self.write()?;
        state.check(FailPoint::Notifications)?;
        state.notifications.extend_from_slice(notifications);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_anchor(owner_id: Uuid, title: &str) -> Anchor {
    Anchor::new(owner_id, title, crate::models::Visibility::Public)
}

#[cfg(test)]
pub(crate) fn test_user(username: &str) -> UserProfile {
    UserProfile {
        id: Uuid::new_v4(),
        username: username.to_string(),
        display_name: username.to_uppercase(),
        avatar_url: None,
        follower_count: 0,
        following_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_edges_are_idempotent() {
        let store = InMemoryStore::new();
        let (u, a) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(store.insert_like(u, a).await.unwrap());
        assert!(!store.insert_like(u, a).await.unwrap());
        assert_eq!(store.like_edge_count(a), 1);
        assert!(store.delete_like(u, a).await.unwrap());
        assert!(!store.delete_like(u, a).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_likers_newest_first_and_capped() {
        let store = InMemoryStore::new();
        let anchor = Uuid::new_v4();
        let likers: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for l in &likers {
            store.add_like(*l, anchor);
        }
        let out = store.get_recent_likers(&[anchor], 3).await.unwrap();
        assert_eq!(out[&anchor], vec![likers[4], likers[3], likers[2]]);
    }

    #[tokio::test]
    async fn test_clamp_counter() {
        let store = InMemoryStore::new();
        let anchor = test_anchor(Uuid::new_v4(), "a");
        let id = anchor.id;
        store.insert_anchor(anchor);
        assert_eq!(store.increment_counter(Counter::Likes, id, -1).await.unwrap(), -1);
        store.clamp_counter(Counter::Likes, id).await.unwrap();
        assert_eq!(store.get_anchor(id).await.unwrap().unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn test_fail_point() {
        let store = InMemoryStore::new();
        store.fail(FailPoint::Identity);
        assert!(store.get_users_by_ids(&[Uuid::new_v4()]).await.is_err());
    }
}
