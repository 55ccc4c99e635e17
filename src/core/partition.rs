//! Population partition
//!
//! The partition groups areas into nested spatial clusters. Level 0 holds the root, which covers
//! every area; the last level holds the leaves, and leaf `c` is area `c`. Clusters are split
//! alternately along the x and y coordinates of their areas, such that nearby areas share
//! ancestors. The partition is built once and read-only thereafter.

use smallvec::SmallVec;

use crate::errors::{EpiError, Result};

pub type Children = SmallVec<[usize; 4]>;

/// A node of the partition tree.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionNode {
    pub parent: Option<usize>,
    pub children: Children,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PopulationPartition {
    levels: Vec<Vec<PartitionNode>>,
    demographics: usize,
    members: Vec<Vec<usize>>,
}

impl PopulationPartition {
    /// Build the partition from area coordinates and the individuals living in each
    /// area × demographic cell.
    ///
    /// `members[area * demographics + dp]` lists the individuals of that cell.
    pub fn build(
        coordinates: &[(f64, f64)],
        demographics: usize,
        members: Vec<Vec<usize>>,
        branching: usize,
    ) -> Result<Self> {
        let n_areas = coordinates.len();
        if n_areas == 0 {
            return Err(EpiError::InitializationError(
                "Partition requires at least one area".to_string(),
            ));
        }
        if branching < 2 {
            return Err(EpiError::InitializationError(format!(
                "Partition branching must be at least 2, got {branching}"
            )));
        }
        if members.len() != n_areas * demographics {
            return Err(EpiError::InitializationError(format!(
                "Expected {} population cells, got {}",
                n_areas * demographics,
                members.len()
            )));
        }

        let mut groups: Vec<Vec<usize>> = vec![(0..n_areas).collect()];
        let mut levels: Vec<Vec<PartitionNode>> = vec![vec![PartitionNode {
            parent: None,
            children: Children::new(),
        }]];

        let mut depth = 0;
        while groups.iter().any(|group| group.len() > 1) {
            let mut next_groups = Vec::new();
            let mut next_nodes = Vec::new();

            for (index, group) in groups.iter().enumerate() {
                let chunks = match group.len() {
                    1 => vec![group.clone()],
                    _ => split_group(group, coordinates, branching, depth % 2 == 0),
                };
                for chunk in chunks {
                    levels[depth][index].children.push(next_groups.len());
                    next_nodes.push(PartitionNode {
                        parent: Some(index),
                        children: Children::new(),
                    });
                    next_groups.push(chunk);
                }
            }

            levels.push(next_nodes);
            groups = next_groups;
            depth += 1;
        }

        // renumber the leaves such that leaf `c` is area `c`
        let leaf_area: Vec<usize> = groups.iter().map(|group| group[0]).collect();
        let mut leaves: Vec<Option<PartitionNode>> = vec![None; n_areas];
        for (index, node) in levels[depth].drain(..).enumerate() {
            leaves[leaf_area[index]] = Some(node);
        }
        levels[depth] = leaves.into_iter().flatten().collect();
        if depth > 0 {
            for node in levels[depth - 1].iter_mut() {
                for child in node.children.iter_mut() {
                    *child = leaf_area[*child];
                }
            }
        }

        log::debug!(
            "Built partition over {n_areas} areas with {} levels",
            levels.len()
        );

        Ok(Self {
            levels,
            demographics,
            members,
        })
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn leaf_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn level_size(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    pub fn n_leaves(&self) -> usize {
        self.levels[self.leaf_level()].len()
    }

    pub fn node(&self, level: usize, index: usize) -> &PartitionNode {
        &self.levels[level][index]
    }

    pub fn parent(&self, level: usize, index: usize) -> Option<usize> {
        self.levels[level][index].parent
    }

    pub fn children(&self, level: usize, index: usize) -> &[usize] {
        &self.levels[level][index].children
    }

    pub fn n_demographics(&self) -> usize {
        self.demographics
    }

    /// Individuals of a leaf in the given demographic position.
    pub fn members(&self, leaf: usize, demographic: usize) -> &[usize] {
        &self.members[leaf * self.demographics + demographic]
    }

    /// Population count of a leaf per demographic position.
    pub fn leaf_population(&self, leaf: usize) -> Vec<usize> {
        (0..self.demographics)
            .map(|dp| self.members(leaf, dp).len())
            .collect()
    }
}

fn split_group(
    group: &[usize],
    coordinates: &[(f64, f64)],
    branching: usize,
    along_x: bool,
) -> Vec<Vec<usize>> {
    let mut sorted = group.to_vec();
    sorted.sort_by(|&a, &b| {
        let (ka, kb) = match along_x {
            true => (coordinates[a].0, coordinates[b].0),
            false => (coordinates[a].1, coordinates[b].1),
        };
        ka.total_cmp(&kb).then(a.cmp(&b))
    });

    let n_chunks = branching.min(sorted.len());
    (0..n_chunks)
        .map(|chunk| {
            let lower = chunk * sorted.len() / n_chunks;
            let upper = (chunk + 1) * sorted.len() / n_chunks;
            sorted[lower..upper].to_vec()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> Vec<(f64, f64)> {
        (0..n).map(|i| ((i % 4) as f64, (i / 4) as f64)).collect()
    }

    #[test]
    fn single_area() {
        let partition = PopulationPartition::build(&[(0., 0.)], 1, vec![vec![0, 1]], 4).unwrap();
        assert_eq!(partition.n_levels(), 1);
        assert_eq!(partition.n_leaves(), 1);
        assert_eq!(partition.members(0, 0), &[0, 1]);
    }

    #[test]
    fn leaves_are_areas() {
        let n_areas = 13;
        let members = (0..n_areas).map(|area| vec![area]).collect();
        let partition = PopulationPartition::build(&grid(n_areas), 1, members, 4).unwrap();
        assert_eq!(partition.n_leaves(), n_areas);
        for leaf in 0..n_areas {
            assert_eq!(partition.members(leaf, 0), &[leaf]);
            assert!(partition.children(partition.leaf_level(), leaf).is_empty());
        }
    }

    #[test]
    fn parent_child_consistency() {
        let n_areas = 21;
        let members = vec![vec![]; n_areas * 2];
        let partition = PopulationPartition::build(&grid(n_areas), 2, members, 3).unwrap();
        for level in 0..partition.leaf_level() {
            for index in 0..partition.level_size(level) {
                for &child in partition.children(level, index) {
                    assert_eq!(partition.parent(level + 1, child), Some(index));
                }
            }
        }
        // every leaf reachable from the root exactly once
        let mut reached = vec![0; n_areas];
        let mut frontier = vec![0];
        for level in 0..partition.leaf_level() {
            frontier = frontier
                .iter()
                .flat_map(|&index| partition.children(level, index).to_vec())
                .collect();
        }
        for leaf in frontier {
            reached[leaf] += 1;
        }
        assert!(reached.iter().all(|&count| count == 1));
    }

    #[test]
    fn rejects_invalid() {
        assert!(PopulationPartition::build(&[], 1, vec![], 4).is_err());
        assert!(PopulationPartition::build(&[(0., 0.)], 1, vec![vec![]], 1).is_err());
        assert!(PopulationPartition::build(&[(0., 0.)], 2, vec![vec![]], 4).is_err());
    }
}
