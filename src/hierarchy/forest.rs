// In-memory view of one organisation's pool tree.
//
// The rows are loaded once per transaction and all ancestor/descendant
// walks happen here as iterative loops over the parent-pointer map, keeping
// the traversal logic independent of the storage engine.
use std::collections::{HashMap, HashSet};

use uuid::Uuid;

/// Adjacency structure over one organisation's pools: each pool maps to its
/// optional parent, plus a reverse index for child walks. The root pool is
/// the single entry with no parent.
#[derive(Debug, Default)]
pub struct PoolForest {
    parent: HashMap<Uuid, Option<Uuid>>,
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl PoolForest {
    pub fn from_links(links: impl IntoIterator<Item = (Uuid, Option<Uuid>)>) -> Self {
        let mut forest = PoolForest::default();
        for (id, parent_id) in links {
            forest.parent.insert(id, parent_id);
            if let Some(p) = parent_id {
                forest.children.entry(p).or_default().push(id);
            }
        }
        forest
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn contains(&self, pool_id: Uuid) -> bool {
        self.parent.contains_key(&pool_id)
    }

    pub fn parent_of(&self, pool_id: Uuid) -> Option<Uuid> {
        self.parent.get(&pool_id).copied().flatten()
    }

    /// True for the organisation's default pool (parent IS NULL).
    pub fn is_root(&self, pool_id: Uuid) -> bool {
        matches!(self.parent.get(&pool_id), Some(None))
    }

    /// The organisation's root pool, if any pools exist.
    pub fn root(&self) -> Option<Uuid> {
        self.parent
            .iter()
            .find(|(_, parent)| parent.is_none())
            .map(|(id, _)| *id)
    }

    /// Ordered chain from `pool_id` up to the root, `pool_id` first.
    /// Returns an empty chain for an unknown pool. The visited set guards
    /// against a corrupted parent chain looping forever.
    pub fn ancestors_of(&self, pool_id: Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(pool_id);
        while let Some(id) = cursor {
            if !self.contains(id) || !seen.insert(id) {
                break;
            }
            chain.push(id);
            cursor = self.parent_of(id);
        }
        chain
    }

    /// Closed descendant set of `pool_id`: the pool itself plus everything
    /// reachable through child links.
    pub fn descendants_of(&self, pool_id: Uuid) -> Vec<Uuid> {
        if !self.contains(pool_id) {
            return Vec::new();
        }
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = vec![pool_id];
        while let Some(id) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            result.push(id);
            if let Some(kids) = self.children.get(&id) {
                queue.extend(kids.iter().copied());
            }
        }
        result
    }

    /// Deletion closure for a pool: its closed descendant set minus any
    /// root. The root pool survives every delete, so requesting deletion of
    /// the root prunes the tree down to just the default pool.
    pub fn deletable_descendants(&self, pool_id: Uuid) -> Vec<Uuid> {
        self.descendants_of(pool_id)
            .into_iter()
            .filter(|id| !self.is_root(*id))
            .collect()
    }

    /// Every pool in the organisation, walked from the root. Pools detached
    /// from the root (which the creation rules make impossible) are excluded.
    pub fn all_from_root(&self) -> Vec<Uuid> {
        match self.root() {
            Some(root) => self.descendants_of(root),
            None => Vec::new(),
        }
    }
}

/// The single-branch rule: an entity may only extend along the chain it
/// already occupies. Holds when every currently-held pool lies on the
/// target's ancestor chain.
pub fn branch_compatible(current: &[Uuid], target_chain: &[Uuid]) -> bool {
    let chain: HashSet<Uuid> = target_chain.iter().copied().collect();
    current.iter().all(|p| chain.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    /// root -> a -> b, root -> c
    fn sample() -> (PoolForest, Uuid, Uuid, Uuid, Uuid) {
        let v = ids(4);
        let (root, a, b, c) = (v[0], v[1], v[2], v[3]);
        let forest = PoolForest::from_links([
            (root, None),
            (a, Some(root)),
            (b, Some(a)),
            (c, Some(root)),
        ]);
        (forest, root, a, b, c)
    }

    #[test]
    fn ancestors_walk_to_the_root() {
        let (forest, root, a, b, _) = sample();
        assert_eq!(forest.ancestors_of(b), vec![b, a, root]);
        assert_eq!(forest.ancestors_of(root), vec![root]);
        assert!(forest.ancestors_of(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn descendants_form_a_closed_set() {
        let (forest, root, a, b, c) = sample();
        let mut all = forest.descendants_of(root);
        all.sort();
        let mut expected = vec![root, a, b, c];
        expected.sort();
        assert_eq!(all, expected);

        let mut sub = forest.descendants_of(a);
        sub.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(sub, expected);

        assert_eq!(forest.descendants_of(b), vec![b]);
    }

    #[test]
    fn root_detection() {
        let (forest, root, a, _, _) = sample();
        assert_eq!(forest.len(), 4);
        assert!(!forest.is_empty());
        assert!(forest.is_root(root));
        assert!(!forest.is_root(a));
        assert_eq!(forest.root(), Some(root));
        assert_eq!(PoolForest::default().root(), None);
    }

    #[test]
    fn deletable_descendants_never_include_the_root() {
        let (forest, root, a, b, c) = sample();

        let mut doomed = forest.deletable_descendants(root);
        doomed.sort();
        let mut expected = vec![a, b, c];
        expected.sort();
        assert_eq!(doomed, expected);

        // a non-root subtree is deleted whole
        let mut sub = forest.deletable_descendants(a);
        sub.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(sub, expected);

        // a bare root yields nothing to delete
        let lone = ids(1)[0];
        let forest = PoolForest::from_links([(lone, None)]);
        assert!(forest.deletable_descendants(lone).is_empty());
    }

    #[test]
    fn all_from_root_covers_the_tree() {
        let (forest, _, _, _, _) = sample();
        assert_eq!(forest.all_from_root().len(), 4);
    }

    #[test]
    fn corrupted_parent_cycle_terminates() {
        let v = ids(2);
        let (a, b) = (v[0], v[1]);
        let forest = PoolForest::from_links([(a, Some(b)), (b, Some(a))]);
        let chain = forest.ancestors_of(a);
        assert_eq!(chain, vec![a, b]);
    }

    #[test]
    fn branch_compatibility_rules() {
        let (forest, root, a, b, c) = sample();

        // device in {root} may move into the a-branch
        assert!(branch_compatible(&[root], &forest.ancestors_of(a)));
        // device in {root, a} may deepen to b
        assert!(branch_compatible(&[root, a], &forest.ancestors_of(b)));
        // device in {root, a} may not jump to sibling branch c
        assert!(!branch_compatible(&[root, a], &forest.ancestors_of(c)));
        // device in no pools may go anywhere
        assert!(branch_compatible(&[], &forest.ancestors_of(c)));
    }
}
