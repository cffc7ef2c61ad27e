//! Authoritative record of who is in the room.
//!
//! All access goes through [`Registry`]. Mutations take the write half of a
//! readers-writer lock; roster snapshots and fan-out iterations take the read
//! half, so a broadcast never observes a half-applied join or leave.

use std::collections::{HashMap, hash_map::Entry};

use tokio::sync::{
    RwLock,
    mpsc::{self, UnboundedReceiver, UnboundedSender, error::SendError},
};

/// Sending side of a connection's outgoing line queue.
///
/// Lines are picked up by the connection's writer task, so queueing never
/// waits on the peer's socket.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: UnboundedSender<String>,
}

impl Outbound {
    pub fn channel() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fails once the writer task has stopped, i.e. the peer is gone.
    pub fn send(&self, line: String) -> Result<(), SendError<String>> {
        self.tx.send(line)
    }
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub outbound: Outbound,
}

impl Member {
    pub fn new(name: impl Into<String>, outbound: Outbound) -> Self {
        Self {
            name: name.into(),
            outbound,
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    members: RwLock<HashMap<String, Outbound>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `member` unless its name is already taken.
    ///
    /// The check and the insert happen under a single write guard; two racing
    /// joins with the same name cannot both succeed.
    pub async fn add_if_absent(&self, member: Member) -> bool {
        self.add_if_absent_with(member, |_, _| {}).await
    }

    /// [`Registry::add_if_absent`], calling `on_admit` with the sorted names
    /// of everyone already present before the write guard is released.
    ///
    /// Anything `on_admit` queues on the newcomer's outbound handle is ahead
    /// of every broadcast that can reach it.
    pub async fn add_if_absent_with<F>(&self, member: Member, on_admit: F) -> bool
    where
        F: FnOnce(&[String], &Outbound),
    {
        let mut members = self.members.write().await;
        let mut others: Vec<String> = members.keys().cloned().collect();
        match members.entry(member.name) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                others.sort_unstable();
                on_admit(&others, &member.outbound);
                slot.insert(member.outbound);
                true
            }
        }
    }

    /// Drops the entry for `name`, if any.
    pub async fn remove(&self, name: &str) {
        self.members.write().await.remove(name);
    }

    /// Names of everyone present except `name`, sorted.
    pub async fn snapshot_excluding(&self, name: &str) -> Vec<String> {
        let members = self.members.read().await;
        let mut names: Vec<String> = members
            .keys()
            .filter(|present| present.as_str() != name)
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    /// Calls `visit` with every member's name and outbound handle, skipping
    /// `name`. The read guard is held for the whole iteration.
    pub async fn for_each_except<F>(&self, name: &str, mut visit: F)
    where
        F: FnMut(&str, &Outbound),
    {
        let members = self.members.read().await;
        for (present, outbound) in members.iter() {
            if present != name {
                visit(present, outbound);
            }
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.members.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn member(name: &str) -> Member {
        let (outbound, _rx) = Outbound::channel();
        Member::new(name, outbound)
    }

    #[tokio::test]
    async fn rejects_duplicate_names() {
        let registry = Registry::new();
        assert!(registry.add_if_absent(member("alice")).await);
        assert!(!registry.add_if_absent(member("alice")).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn names_are_case_sensitive() {
        let registry = Registry::new();
        assert!(registry.add_if_absent(member("alice")).await);
        assert!(registry.add_if_absent(member("Alice")).await);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = Registry::new();
        registry.add_if_absent(member("alice")).await;

        registry.remove("alice").await;
        registry.remove("alice").await;
        registry.remove("nobody").await;

        assert!(registry.is_empty().await);
        assert!(registry.add_if_absent(member("alice")).await);
    }

    #[tokio::test]
    async fn snapshot_leaves_out_the_excluded_name() {
        let registry = Registry::new();
        for name in ["carol", "alice", "bob"] {
            registry.add_if_absent(member(name)).await;
        }

        assert_eq!(registry.snapshot_excluding("bob").await, vec!["alice", "carol"]);
        assert_eq!(
            registry.snapshot_excluding("dave").await,
            vec!["alice", "bob", "carol"]
        );
    }

    #[tokio::test]
    async fn admit_hook_sees_others_and_runs_only_on_success() {
        let registry = Registry::new();
        registry.add_if_absent(member("carol")).await;
        registry.add_if_absent(member("alice")).await;

        let (bob, mut bob_rx) = Outbound::channel();
        let admitted = registry
            .add_if_absent_with(Member::new("bob", bob), |others, outbound| {
                outbound.send(others.join(",")).unwrap();
            })
            .await;
        assert!(admitted);
        assert_eq!(bob_rx.recv().await.as_deref(), Some("alice,carol"));

        let mut called = false;
        let admitted = registry
            .add_if_absent_with(member("bob"), |_, _| called = true)
            .await;
        assert!(!admitted);
        assert!(!called);
    }

    #[tokio::test]
    async fn admit_hook_output_precedes_later_broadcasts() {
        let registry = Registry::new();
        let (bob, mut bob_rx) = Outbound::channel();
        registry
            .add_if_absent_with(Member::new("bob", bob), |_, outbound| {
                outbound.send("first".to_string()).unwrap();
            })
            .await;
        registry
            .for_each_except("alice", |_, outbound| {
                outbound.send("second".to_string()).unwrap();
            })
            .await;

        assert_eq!(bob_rx.recv().await.as_deref(), Some("first"));
        assert_eq!(bob_rx.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn for_each_except_skips_the_excluded_member() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = Outbound::channel();
        let (bob, mut bob_rx) = Outbound::channel();
        registry.add_if_absent(Member::new("alice", alice)).await;
        registry.add_if_absent(Member::new("bob", bob)).await;

        let mut visited = Vec::new();
        registry
            .for_each_except("alice", |name, outbound| {
                visited.push(name.to_string());
                outbound.send(format!("to {name}")).unwrap();
            })
            .await;

        assert_eq!(visited, vec!["bob"]);
        assert_eq!(bob_rx.recv().await.as_deref(), Some("to bob"));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_with_one_name_admit_exactly_one() {
        let registry = Arc::new(Registry::new());

        let attempts: Vec<_> = (0..64)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.add_if_absent(member("alice")).await })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(registry.len().await, 1);
    }
}
