//! Cross-crate integration test helpers.
//!
//! [`GraphHarness`] drives a people database with [`SessionOp`]s while
//! tracking the expected object graph, then checks the database against it.

use crate::fixtures::{people, TestDatabase};
use crate::generators::SessionOp;
use objdb_core::{CommitId, Criterion, ObjId, Session, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Expected state of the people graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphState {
    /// Live people in creation order.
    pub people: Vec<ObjId>,
    /// Name per person.
    pub names: BTreeMap<ObjId, String>,
    /// Age per person.
    pub ages: BTreeMap<ObjId, i64>,
    /// Friendships as ordered pairs `(low, high)`.
    pub friends: BTreeSet<(ObjId, ObjId)>,
}

impl GraphState {
    fn pick(&self, slot: usize) -> Option<ObjId> {
        if self.people.is_empty() {
            None
        } else {
            Some(self.people[slot % self.people.len()])
        }
    }

    fn remove(&mut self, id: ObjId) {
        self.people.retain(|p| *p != id);
        self.names.remove(&id);
        self.ages.remove(&id);
        self.friends.retain(|(a, b)| *a != id && *b != id);
    }

    /// Friends of `id`, ordered by id.
    pub fn friends_of(&self, id: ObjId) -> Vec<ObjId> {
        let mut out: Vec<ObjId> = self
            .friends
            .iter()
            .filter_map(|&(a, b)| {
                if a == id {
                    Some(b)
                } else if b == id {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

fn pair(a: ObjId, b: ObjId) -> (ObjId, ObjId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A test harness comparing a database with a tracked model of it.
pub struct GraphHarness {
    /// The database under test.
    pub db: TestDatabase,
    committed: GraphState,
    commits: Vec<CommitId>,
}

impl GraphHarness {
    /// Creates a harness over a fresh people database.
    pub fn new() -> Self {
        Self {
            db: TestDatabase::people(),
            committed: GraphState::default(),
            commits: Vec::new(),
        }
    }

    /// The committed state as tracked by the harness.
    pub fn committed(&self) -> &GraphState {
        &self.committed
    }

    /// Ids of the commits published through the harness.
    pub fn commits(&self) -> &[CommitId] {
        &self.commits
    }

    /// Runs `ops` in one session, checking the session view after each
    /// operation. Changes pending at the end are rolled back.
    pub fn run(&mut self, ops: &[SessionOp]) {
        let mut session = self.db.session().expect("Failed to open session");
        let mut pending = self.committed.clone();

        for op in ops {
            match op {
                SessionOp::Create => {
                    let id = session
                        .create_obj(people::PERSON, None)
                        .expect("Failed to create person");
                    pending.people.push(id);
                }
                SessionOp::Delete(slot) => {
                    if let Some(id) = pending.pick(*slot) {
                        assert!(session.delete_obj(id).expect("Failed to delete person"));
                        pending.remove(id);
                    }
                }
                SessionOp::SetName(slot, name) => {
                    if let Some(id) = pending.pick(*slot) {
                        session
                            .set_fld_value(id, people::NAME, &Value::from(name.as_str()).encode())
                            .expect("Failed to set name");
                        pending.names.insert(id, name.clone());
                    }
                }
                SessionOp::SetAge(slot, age) => {
                    if let Some(id) = pending.pick(*slot) {
                        session
                            .set_fld_value(id, people::AGE, &Value::from(*age).encode())
                            .expect("Failed to set age");
                        pending.ages.insert(id, *age);
                    }
                }
                SessionOp::ClearName(slot) => {
                    if let Some(id) = pending.pick(*slot) {
                        session
                            .set_fld_value(id, people::NAME, &[])
                            .expect("Failed to clear name");
                        pending.names.remove(&id);
                    }
                }
                SessionOp::Befriend(a, b) => {
                    if let (Some(a), Some(b)) = (pending.pick(*a), pending.pick(*b)) {
                        session
                            .create_aso(a, people::FRIENDS, b, people::FRIENDS)
                            .expect("Failed to link friends");
                        pending.friends.insert(pair(a, b));
                    }
                }
                SessionOp::Unfriend(a, b) => {
                    if let (Some(a), Some(b)) = (pending.pick(*a), pending.pick(*b)) {
                        let removed = session
                            .remove_aso(a, people::FRIENDS, b, people::FRIENDS)
                            .expect("Failed to unlink friends");
                        assert_eq!(removed, pending.friends.remove(&pair(a, b)));
                    }
                }
                SessionOp::Commit => {
                    if let Some(id) = session.commit().expect("Failed to commit") {
                        if let Some(last) = self.commits.last() {
                            assert!(id > *last, "commit ids must increase");
                        }
                        self.commits.push(id);
                    }
                    self.committed = pending.clone();
                }
                SessionOp::Rollback => {
                    session.rollback();
                    pending = self.committed.clone();
                }
            }
            verify_session(&session, &pending);
        }
        session.rollback();
    }

    /// Checks the committed database, including the search index, against
    /// the tracked state.
    pub fn verify(&self) {
        let session = self.db.read_session().expect("Failed to open read session");
        verify_session(&session, &self.committed);

        let mut by_name: BTreeMap<&str, BTreeSet<ObjId>> = BTreeMap::new();
        for (id, name) in &self.committed.names {
            by_name.entry(name.as_str()).or_default().insert(*id);
        }
        for (name, expected) in &by_name {
            let hits = self
                .db
                .search(people::NAME, &Criterion::Exact((*name).to_string()))
                .expect("Failed to search");
            assert_eq!(&hits, expected, "search hits for {name:?}");
        }

        let everyone = self
            .db
            .search(people::NAME, &Criterion::Prefix(String::new()))
            .expect("Failed to search");
        let named: BTreeSet<ObjId> = self.committed.names.keys().copied().collect();
        assert_eq!(everyone, named, "index holds entries of unnamed or deleted people");
    }
}

impl Default for GraphHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks a session's view against `state`.
pub fn verify_session(session: &Session<'_>, state: &GraphState) {
    let mut expected: Vec<ObjId> = state.people.clone();
    expected.sort();
    assert_eq!(
        session.enumerate_objs(people::PERSON).expect("Failed to enumerate"),
        expected
    );

    for &id in &state.people {
        assert_eq!(session.get_typ_id(id).expect("Failed to read type"), people::PERSON);

        let name = Value::decode(&session.get_fld_value(id, people::NAME).expect("Failed to read name"))
            .expect("Malformed name");
        assert_eq!(name, state.names.get(&id).map(|n| Value::from(n.as_str())));

        let age = Value::decode(&session.get_fld_value(id, people::AGE).expect("Failed to read age"))
            .expect("Malformed age");
        assert_eq!(age, state.ages.get(&id).map(|a| Value::Integer(*a)));

        assert_eq!(
            session
                .enumerate_aso(id, people::FRIENDS)
                .expect("Failed to enumerate friends"),
            state.friends_of(id)
        );
    }
}
