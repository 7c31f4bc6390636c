//! The `AssignmentBook`: every active assignment plus reverse indexes.

use rustc_hash::{FxHashMap, FxHashSet};

use ef_core::{AssignmentId, DestinationId, EdgeId, FamilyId, GeoPoint, PathId, RequesterId};
use ef_solver::{Assignment, AssignmentFlags, AssignmentStatus};

use crate::{RerouteError, RerouteResult};

/// A committed change to one assignment.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AssignmentUpdate {
    pub assignment:           AssignmentId,
    pub requester:            RequesterId,
    pub previous_destination: DestinationId,
    pub destination:          DestinationId,
    pub previous_path:        PathId,
    pub path:                 PathId,
    pub revision:             u32,
    pub trigger_version:      u64,
    /// `TriggerKind::name` of the trigger that caused the change.
    pub cause:                &'static str,
    pub flags:                AssignmentFlags,
}

/// Active assignments keyed by requester.
///
/// `by_edge`, `by_dest`, and `families` are reverse indexes kept in step with
/// `active`; they answer "who is affected" for a breach without scanning
/// every assignment.  Arrived assignments stay in the book (they still hold
/// a seat and pin their family) until the event ends.
#[derive(Default)]
pub struct AssignmentBook {
    active:   FxHashMap<RequesterId, Assignment>,
    by_edge:  FxHashMap<EdgeId, FxHashSet<RequesterId>>,
    by_dest:  FxHashMap<DestinationId, FxHashSet<RequesterId>>,
    families: FxHashMap<FamilyId, FxHashSet<RequesterId>>,
    archive:  Vec<Assignment>,
}

impl AssignmentBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn get(&self, requester: RequesterId) -> Option<&Assignment> {
        self.active.get(&requester)
    }

    pub fn contains(&self, requester: RequesterId) -> bool {
        self.active.contains_key(&requester)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Assignment> {
        self.active.values()
    }

    /// Assignments not yet arrived.
    pub fn open_count(&self) -> usize {
        self.active.values().filter(|a| a.status.is_open()).count()
    }

    /// Insert or replace the assignment for `a.requester()`.
    pub fn insert(&mut self, a: Assignment) -> Option<Assignment> {
        let prev = self.remove(a.requester());
        self.index(&a);
        self.active.insert(a.requester(), a);
        prev
    }

    pub fn remove(&mut self, requester: RequesterId) -> Option<Assignment> {
        let a = self.active.remove(&requester)?;
        self.unindex(&a);
        Some(a)
    }

    fn index(&mut self, a: &Assignment) {
        let r = a.requester();
        for &e in &a.path.edges {
            self.by_edge.entry(e).or_default().insert(r);
        }
        self.by_dest.entry(a.destination).or_default().insert(r);
        if let Some(f) = a.request.family {
            self.families.entry(f).or_default().insert(r);
        }
    }

    fn unindex(&mut self, a: &Assignment) {
        let r = a.requester();
        for e in &a.path.edges {
            if let Some(set) = self.by_edge.get_mut(e) {
                set.remove(&r);
                if set.is_empty() {
                    self.by_edge.remove(e);
                }
            }
        }
        if let Some(set) = self.by_dest.get_mut(&a.destination) {
            set.remove(&r);
        }
        if let Some(f) = a.request.family {
            if let Some(set) = self.families.get_mut(&f) {
                set.remove(&r);
            }
        }
    }

    // ── Reverse lookups (sorted for determinism) ──────────────────────────

    /// Non-arrived requesters whose path uses `edge`.
    pub fn open_on_edge(&self, edge: EdgeId) -> Vec<RequesterId> {
        self.open_in(self.by_edge.get(&edge))
    }

    /// Non-arrived requesters assigned to `dest`.
    pub fn open_at_destination(&self, dest: DestinationId) -> Vec<RequesterId> {
        self.open_in(self.by_dest.get(&dest))
    }

    /// Every member of `family` in the book, arrived or not.
    pub fn family_members(&self, family: FamilyId) -> Vec<RequesterId> {
        let mut v: Vec<RequesterId> = self
            .families
            .get(&family)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        v.sort_unstable();
        v
    }

    /// Open assignments whose seat was released and never replaced.
    pub fn stranded(&self) -> Vec<RequesterId> {
        let mut v: Vec<RequesterId> = self
            .active
            .values()
            .filter(|a| a.status.is_open() && !a.holds_reservation)
            .map(|a| a.requester())
            .collect();
        v.sort_unstable();
        v
    }

    fn open_in(&self, set: Option<&FxHashSet<RequesterId>>) -> Vec<RequesterId> {
        let Some(set) = set else { return Vec::new() };
        let mut v: Vec<RequesterId> = set
            .iter()
            .copied()
            .filter(|r| self.active.get(r).is_some_and(|a| a.status.is_open()))
            .collect();
        v.sort_unstable();
        v
    }

    // ── Mutation ──────────────────────────────────────────────────────────

    /// Record a check-in.  Arrived is final; moving an arrived assignment
    /// back is rejected.
    pub fn set_status(&mut self, requester: RequesterId, status: AssignmentStatus) -> RerouteResult<&Assignment> {
        let a = self
            .active
            .get_mut(&requester)
            .ok_or(RerouteError::UnknownRequester(requester))?;
        if a.status == AssignmentStatus::Arrived && status != AssignmentStatus::Arrived {
            return Err(RerouteError::AlreadyArrived(requester));
        }
        a.status = status;
        Ok(a)
    }

    /// Mark a seat as released without touching routes.
    pub(crate) fn drop_reservation(&mut self, requester: RequesterId) {
        if let Some(a) = self.active.get_mut(&requester) {
            a.holds_reservation = false;
        }
    }

    pub fn update_location(&mut self, requester: RequesterId, location: GeoPoint) -> RerouteResult<()> {
        let a = self
            .active
            .get_mut(&requester)
            .ok_or(RerouteError::UnknownRequester(requester))?;
        a.request.location = location;
        Ok(())
    }

    /// Install a recomputed assignment in place of the current one.
    ///
    /// The assignment id is kept and the revision incremented; the new
    /// destination, path, flags, and epoch are taken from `fresh`.
    pub fn replace_route(
        &mut self,
        fresh:           Assignment,
        trigger_version: u64,
        cause:           &'static str,
    ) -> RerouteResult<AssignmentUpdate> {
        let requester = fresh.requester();
        let old = self
            .remove(requester)
            .ok_or(RerouteError::UnknownRequester(requester))?;
        let next = Assignment {
            id:       old.id,
            revision: old.revision + 1,
            status:   AssignmentStatus::Assigned,
            ..fresh
        };
        let update = AssignmentUpdate {
            assignment:           next.id,
            requester,
            previous_destination: old.destination,
            destination:          next.destination,
            previous_path:        old.path_id,
            path:                 next.path_id,
            revision:             next.revision,
            trigger_version,
            cause,
            flags:                next.flags,
        };
        self.insert(next);
        Ok(update)
    }

    /// Move every assignment to the archive.  Returns how many were moved.
    pub fn archive_all(&mut self) -> usize {
        let n = self.active.len();
        let mut all: Vec<Assignment> = self.active.drain().map(|(_, a)| a).collect();
        all.sort_unstable_by_key(|a| a.id);
        self.archive.extend(all);
        self.by_edge.clear();
        self.by_dest.clear();
        self.families.clear();
        n
    }

    pub fn archived(&self) -> &[Assignment] {
        &self.archive
    }
}
