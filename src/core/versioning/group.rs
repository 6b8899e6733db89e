//! Concept groups
//!
//! A concept groups every version of the same work under one concept PID. The
//! children are ordered oldest first; at most one child is an unpublished draft and
//! it is always last. The concept redirects to the last published child.

use crate::domain::{LineageError, PidKey, Result, VersionEntry};

/// Status a concept PID should have for its current children
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptState {
    /// No published version yet
    Reserved,
    /// Resolves to the latest published version
    Redirected(PidKey),
    /// No versions left; the concept is retired
    Retired,
}

/// Ordered versions of one concept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptGroup {
    concept: PidKey,
    children: Vec<VersionEntry>,
}

impl ConceptGroup {
    /// An empty group
    pub fn new(concept: PidKey) -> Self {
        Self {
            concept,
            children: Vec::new(),
        }
    }

    /// A group with children as read from the registry
    ///
    /// # Errors
    ///
    /// [`LineageError::IdentifierConflict`] when the children list a PID twice or a
    /// draft anywhere but last.
    pub fn with_children(concept: PidKey, children: Vec<VersionEntry>) -> Result<Self> {
        for (i, child) in children.iter().enumerate() {
            if children[..i].iter().any(|c| c.pid == child.pid) {
                return Err(LineageError::IdentifierConflict(format!(
                    "{} appears twice under {concept}",
                    child.pid
                )));
            }
            if child.draft && i + 1 != children.len() {
                return Err(LineageError::IdentifierConflict(format!(
                    "draft {} is not the last version of {concept}",
                    child.pid
                )));
            }
        }
        Ok(Self { concept, children })
    }

    /// The concept PID
    pub fn concept(&self) -> &PidKey {
        &self.concept
    }

    /// Every child, oldest first
    pub fn children(&self) -> &[VersionEntry] {
        &self.children
    }

    /// Published children, oldest first
    pub fn published(&self) -> impl Iterator<Item = &PidKey> + '_ {
        self.children.iter().filter(|c| !c.draft).map(|c| &c.pid)
    }

    /// The unpublished draft, if any
    pub fn draft(&self) -> Option<&PidKey> {
        self.children.last().filter(|c| c.draft).map(|c| &c.pid)
    }

    /// Whether the PID is a child of this group
    pub fn contains(&self, pid: &PidKey) -> bool {
        self.children.iter().any(|c| &c.pid == pid)
    }

    /// Whether the group has no children
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Latest published child, the concept's redirect target
    pub fn redirect_target(&self) -> Option<&PidKey> {
        self.published().last()
    }

    /// Concept status implied by the children
    pub fn state(&self) -> ConceptState {
        match self.redirect_target() {
            Some(target) => ConceptState::Redirected(target.clone()),
            None if self.is_empty() => ConceptState::Retired,
            None => ConceptState::Reserved,
        }
    }

    /// Appends a published version
    ///
    /// A trailing draft stays last. Inserting the current draft publishes it in
    /// place. Returns whether anything changed.
    pub fn insert_child(&mut self, pid: PidKey) -> bool {
        if let Some(existing) = self.children.iter_mut().find(|c| c.pid == pid) {
            let changed = existing.draft;
            existing.draft = false;
            return changed;
        }
        let entry = VersionEntry::published(pid);
        if self.draft().is_some() {
            let at = self.children.len() - 1;
            self.children.insert(at, entry);
        } else {
            self.children.push(entry);
        }
        true
    }

    /// Appends an unpublished draft version
    ///
    /// Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// [`LineageError::IdentifierConflict`] if another draft exists or the PID is
    /// already a published version.
    pub fn insert_draft_child(&mut self, pid: PidKey) -> Result<bool> {
        if let Some(draft) = self.draft() {
            if draft == &pid {
                return Ok(false);
            }
            return Err(LineageError::IdentifierConflict(format!(
                "{} already has the draft {draft}",
                self.concept
            )));
        }
        if self.contains(&pid) {
            return Err(LineageError::IdentifierConflict(format!(
                "{pid} is already a published version of {}",
                self.concept
            )));
        }
        self.children.push(VersionEntry::draft(pid));
        Ok(true)
    }

    /// Detaches a version; returns whether it was a child
    pub fn remove_child(&mut self, pid: &PidKey) -> bool {
        let before = self.children.len();
        self.children.retain(|c| &c.pid != pid);
        self.children.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> ConceptGroup {
        ConceptGroup::new(PidKey::recid(100))
    }

    #[test]
    fn test_redirect_follows_last_published() {
        let mut g = group();
        assert_eq!(g.state(), ConceptState::Retired);

        g.insert_child(PidKey::recid(1));
        g.insert_child(PidKey::recid(2));
        assert_eq!(g.state(), ConceptState::Redirected(PidKey::recid(2)));

        g.insert_draft_child(PidKey::recid(3)).unwrap();
        assert_eq!(g.redirect_target(), Some(&PidKey::recid(2)));
        assert_eq!(g.draft(), Some(&PidKey::recid(3)));
    }

    #[test]
    fn test_published_child_goes_before_draft() {
        let mut g = group();
        g.insert_draft_child(PidKey::recid(3)).unwrap();
        assert_eq!(g.state(), ConceptState::Reserved);

        g.insert_child(PidKey::recid(1));
        let order: Vec<_> = g.children().iter().map(|c| c.pid.clone()).collect();
        assert_eq!(order, vec![PidKey::recid(1), PidKey::recid(3)]);
        assert_eq!(g.draft(), Some(&PidKey::recid(3)));
    }

    #[test]
    fn test_publishing_the_draft() {
        let mut g = group();
        g.insert_child(PidKey::recid(1));
        g.insert_draft_child(PidKey::recid(2)).unwrap();

        assert!(g.insert_child(PidKey::recid(2)));
        assert!(!g.insert_child(PidKey::recid(2)));
        assert_eq!(g.draft(), None);
        assert_eq!(g.state(), ConceptState::Redirected(PidKey::recid(2)));
    }

    #[test]
    fn test_second_draft_rejected() {
        let mut g = group();
        g.insert_draft_child(PidKey::recid(1)).unwrap();
        assert!(!g.insert_draft_child(PidKey::recid(1)).unwrap());
        assert!(g.insert_draft_child(PidKey::recid(2)).is_err());
    }

    #[test]
    fn test_removing_last_child_retires() {
        let mut g = group();
        g.insert_child(PidKey::recid(1));
        g.insert_child(PidKey::recid(2));

        assert!(g.remove_child(&PidKey::recid(2)));
        assert_eq!(g.state(), ConceptState::Redirected(PidKey::recid(1)));
        assert!(!g.remove_child(&PidKey::recid(2)));
        assert!(g.remove_child(&PidKey::recid(1)));
        assert_eq!(g.state(), ConceptState::Retired);
    }

    #[test]
    fn test_with_children_validates() {
        let misplaced = vec![
            VersionEntry::draft(PidKey::recid(1)),
            VersionEntry::published(PidKey::recid(2)),
        ];
        assert!(ConceptGroup::with_children(PidKey::recid(9), misplaced).is_err());

        let twice = vec![
            VersionEntry::published(PidKey::recid(1)),
            VersionEntry::published(PidKey::recid(1)),
        ];
        assert!(ConceptGroup::with_children(PidKey::recid(9), twice).is_err());
    }
}
