//! Fault domains and the compressed fault-domain tree handed to engines on
//! pool create.
//!
//! A fault domain is a path such as `/rack0/pdu1/host3`. Members hang off
//! their domain as rank leaves. The compressed form is a breadth-first walk
//! emitting `[level, id, nchildren]` per domain followed by the rank list.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use strata_core::Rank;

use crate::error::{StateError, StateResult};

const SEPARATOR: char = '/';

/// Hierarchical fault domain path. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FaultDomain {
    levels: Vec<String>,
}

impl FaultDomain {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn is_root(&self) -> bool {
        self.levels.is_empty()
    }
}

impl FromStr for FaultDomain {
    type Err = StateError;

    fn from_str(s: &str) -> StateResult<Self> {
        let s = s.trim();
        if s.is_empty() || s == "/" {
            return Ok(Self::root());
        }
        let Some(rest) = s.strip_prefix(SEPARATOR) else {
            return Err(StateError::FaultDomain(format!(
                "{s:?} must start with {SEPARATOR:?}"
            )));
        };

        let mut levels = Vec::new();
        for level in rest.split(SEPARATOR) {
            let level = level.trim();
            if level.is_empty() {
                return Err(StateError::FaultDomain(format!("{s:?} has an empty level")));
            }
            if level.chars().any(char::is_whitespace) {
                return Err(StateError::FaultDomain(format!(
                    "{s:?} level {level:?} contains whitespace"
                )));
            }
            levels.push(level.to_lowercase());
        }
        Ok(Self { levels })
    }
}

impl fmt::Display for FaultDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.levels.is_empty() {
            return f.write_str("/");
        }
        for level in &self.levels {
            write!(f, "{SEPARATOR}{level}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Node {
    id: u32,
    name: String,
    rank: Option<Rank>,
    depth: usize,
    /// Indices into the node arena, ordered by name.
    children: Vec<usize>,
}

/// Tree of fault domains with optional rank leaves.
#[derive(Debug)]
pub struct FaultDomainTree {
    nodes: Vec<Node>,
}

impl Default for FaultDomainTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultDomainTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                id: 1,
                name: String::new(),
                rank: None,
                depth: 0,
                children: Vec::new(),
            }],
        }
    }

    /// Insert every level of `domain`, creating missing nodes.
    pub fn add_domain(&mut self, domain: &FaultDomain) -> usize {
        let mut cur = 0;
        for level in domain.levels() {
            cur = self.child(cur, level, None);
        }
        cur
    }

    /// Hang `rank` as a leaf under `domain`.
    pub fn add_rank(&mut self, domain: &FaultDomain, rank: Rank) -> StateResult<()> {
        if self.nodes.iter().any(|n| n.rank == Some(rank)) {
            return Err(StateError::FaultDomain(format!(
                "rank {rank} already present in tree"
            )));
        }
        let parent = self.add_domain(domain);
        self.child(parent, &format!("rank{}", rank.0), Some(rank));
        Ok(())
    }

    fn child(&mut self, parent: usize, name: &str, rank: Option<Rank>) -> usize {
        let existing = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name && self.nodes[c].rank == rank);
        if let Some(idx) = existing {
            return idx;
        }

        let idx = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes.push(Node {
            id: idx as u32 + 1,
            name: name.to_string(),
            rank,
            depth,
            children: Vec::new(),
        });
        let pos = self.nodes[parent]
            .children
            .iter()
            .position(|&c| self.nodes[c].name.as_str() > name)
            .unwrap_or(self.nodes[parent].children.len());
        self.nodes[parent].children.insert(pos, idx);
        idx
    }

    fn leaf_depths(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .filter(|n| n.children.is_empty())
            .map(|n| n.depth)
    }

    /// Distance from the root to the deepest leaf.
    pub fn height(&self) -> usize {
        self.leaf_depths().max().unwrap_or(0)
    }

    /// True when every leaf sits at the same depth.
    pub fn is_balanced(&self) -> bool {
        let mut depths = self.leaf_depths();
        match depths.next() {
            Some(first) => depths.all(|d| d == first),
            None => true,
        }
    }

    /// Breadth-first compressed encoding: `[level, id, nchildren]` per
    /// domain, then the rank leaves in walk order.
    pub fn to_compressed(&self) -> StateResult<Vec<u32>> {
        if !self.is_balanced() {
            return Err(StateError::FaultDomain(
                "fault domain tree is not balanced".to_string(),
            ));
        }

        let height = self.height();
        let mut domains = Vec::new();
        let mut ranks = Vec::new();
        let mut queue = VecDeque::from([0usize]);
        while let Some(idx) = queue.pop_front() {
            let node = &self.nodes[idx];
            if let Some(rank) = node.rank {
                ranks.push(rank.0);
                continue;
            }
            domains.extend([
                (height - node.depth) as u32,
                node.id,
                node.children.len() as u32,
            ]);
            queue.extend(node.children.iter().copied());
        }
        domains.extend(ranks);
        Ok(domains)
    }
}
