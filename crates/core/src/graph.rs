//! Dependency graph construction and derived queries.
//!
//! Forward and reverse graphs are never materialized as distinct entities;
//! both are pure functions of the project collection, recomputed per run.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::discovery::absolute_path_table;
use crate::project::{to_forward_slash, Project, Solution};

/// The project collection plus the edge lists derived from it. Holds no
/// state beyond what `Vec<Project>` already implies; cheap to recompute.
pub struct Graph {
    pub projects: Vec<Project>,
    /// `forward[i]` = indices of projects that project `i` references.
    forward: Vec<Vec<usize>>,
    /// `reverse[i]` = indices of projects that reference project `i`.
    reverse: Vec<Vec<usize>>,
    id_to_index: HashMap<String, usize>,
}

impl Graph {
    /// Build the forward/reverse edge lists for `projects`, resolving
    /// references against `repo_root` — never against the process working
    /// directory — a critical correctness requirement.
    pub fn build(repo_root: &Path, projects: Vec<Project>) -> Self {
        let abs_table = absolute_path_table(repo_root, &projects);
        let abs_to_index: HashMap<PathBuf, usize> = abs_table.into_iter().collect();

        let mut forward = vec![Vec::new(); projects.len()];
        let mut reverse = vec![Vec::new(); projects.len()];

        for (p_idx, project) in projects.iter().enumerate() {
            for reference in &project.references {
                if let Some(&r_idx) = abs_to_index.get(reference) {
                    // References to unknown paths are silently dropped.
                    forward[p_idx].push(r_idx);
                    reverse[r_idx].push(p_idx);
                }
            }
        }

        let id_to_index = projects
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.id_str(), idx))
            .collect();

        Graph {
            projects,
            forward,
            reverse,
            id_to_index,
        }
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.id_to_index.get(id).copied()
    }

    pub fn project(&self, idx: usize) -> &Project {
        &self.projects[idx]
    }

    pub fn forward_edges(&self, idx: usize) -> &[usize] {
        &self.forward[idx]
    }

    pub fn reverse_edges(&self, idx: usize) -> &[usize] {
        &self.reverse[idx]
    }

    /// Transitive closure of `start` over the forward graph (a project and
    /// everything it depends on, directly or indirectly).
    pub fn forward_closure(&self, start: &[usize]) -> HashSet<usize> {
        self.closure(start, &self.forward)
    }

    /// `Affected(C)`: the reverse-graph BFS closure of the directly-changed
    /// set `C`. Always contains every member of
    /// `C`, and for every `q` in the result there is a reverse-graph path
    /// from some member of `C` to `q`.
    pub fn affected(&self, changed: &[usize]) -> HashSet<usize> {
        self.closure(changed, &self.reverse)
    }

    fn closure(&self, start: &[usize], edges: &[Vec<usize>]) -> HashSet<usize> {
        let mut visited: HashSet<usize> = start.iter().copied().collect();
        let mut queue: VecDeque<usize> = start.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            for &next in &edges[current] {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        visited
    }

    /// A non-test project `u` is "untested" iff no test project's
    /// transitive forward closure contains `u`.
    pub fn untested_projects(&self) -> HashSet<usize> {
        let test_indices: Vec<usize> = self
            .projects
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_test)
            .map(|(idx, _)| idx)
            .collect();

        let mut covered: HashSet<usize> = HashSet::new();
        for &t in &test_indices {
            covered.extend(self.forward_closure(&[t]));
        }

        self.projects
            .iter()
            .enumerate()
            .filter(|(idx, p)| !p.is_test && !covered.contains(idx))
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// The outcome of grouping a target set into solution invocations plus
/// per-project fallbacks.
#[derive(Debug, Default, Clone)]
pub struct SolutionGrouping {
    /// Solutions whose member set is fully covered by the target set.
    pub solutions: Vec<usize>,
    /// Target-set project indices not claimed by any solution above.
    pub unassigned: Vec<usize>,
}

/// Strict-match grouping: a solution qualifies iff every one of its member
/// projects is in the target set and it has at least two members.
pub fn strict_match(
    solutions: &[Solution],
    graph: &Graph,
    repo_root: &Path,
    target: &HashSet<usize>,
) -> SolutionGrouping {
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut chosen = Vec::new();

    for (sol_idx, solution) in solutions.iter().enumerate() {
        let member_indices = solution_member_indices(solution, graph, repo_root);
        if member_indices.len() < 2 {
            continue;
        }
        if member_indices.iter().all(|idx| target.contains(idx)) {
            chosen.push(sol_idx);
            claimed.extend(member_indices);
        }
    }

    let unassigned = target.iter().filter(|i| !claimed.contains(i)).copied().collect();
    SolutionGrouping {
        solutions: chosen,
        unassigned,
    }
}

/// Best-fit grouping: solutions are sorted by member-count-in-target
/// descending; each greedily claims its members if doing so would claim at
/// least two previously-unassigned projects.
pub fn best_fit(
    solutions: &[Solution],
    graph: &Graph,
    repo_root: &Path,
    target: &HashSet<usize>,
) -> SolutionGrouping {
    let mut candidates: Vec<(usize, Vec<usize>)> = solutions
        .iter()
        .enumerate()
        .map(|(idx, s)| (idx, solution_member_indices(s, graph, repo_root)))
        .collect();
    candidates.sort_by(|a, b| {
        let a_count = a.1.iter().filter(|i| target.contains(i)).count();
        let b_count = b.1.iter().filter(|i| target.contains(i)).count();
        b_count.cmp(&a_count)
    });

    let mut claimed: HashSet<usize> = HashSet::new();
    let mut chosen = Vec::new();

    for (sol_idx, members) in &candidates {
        let unclaimed_in_target: Vec<usize> = members
            .iter()
            .copied()
            .filter(|i| target.contains(i) && !claimed.contains(i))
            .collect();
        if unclaimed_in_target.len() >= 2 {
            chosen.push(*sol_idx);
            claimed.extend(unclaimed_in_target);
        }
    }

    let unassigned = target.iter().filter(|i| !claimed.contains(i)).copied().collect();
    SolutionGrouping {
        solutions: chosen,
        unassigned,
    }
}

fn solution_member_indices(solution: &Solution, graph: &Graph, repo_root: &Path) -> Vec<usize> {
    solution
        .members
        .iter()
        .filter_map(|abs| {
            let rel = abs.strip_prefix(repo_root).unwrap_or(abs);
            graph.index_of(&to_forward_slash(rel))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn project(id: &str, refs: Vec<&str>, is_test: bool) -> Project {
        Project {
            id: PathBuf::from(id),
            name: id.to_string(),
            directory: PathBuf::from("/repo").join(id).parent().unwrap().to_path_buf(),
            references: refs
                .into_iter()
                .map(|r| PathBuf::from("/repo").join(r))
                .collect(),
            packages: vec![],
            is_test,
        }
    }

    #[test]
    fn affected_contains_self_and_dependents() {
        let root = PathBuf::from("/repo");
        let projects = vec![
            project("Core/Core.csproj", vec![], false),
            project("Core.Tests/Core.Tests.csproj", vec!["Core/Core.csproj"], true),
        ];
        let graph = Graph::build(&root, projects);
        let core_idx = graph.index_of("Core/Core.csproj").unwrap();
        let affected = graph.affected(&[core_idx]);
        assert!(affected.contains(&core_idx));
        let tests_idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        assert!(affected.contains(&tests_idx));
    }

    #[test]
    fn zero_outbound_references_still_reachable() {
        let root = PathBuf::from("/repo");
        let projects = vec![project("Lonely/Lonely.csproj", vec![], false)];
        let graph = Graph::build(&root, projects);
        let idx = graph.index_of("Lonely/Lonely.csproj").unwrap();
        assert!(graph.forward_edges(idx).is_empty());
        assert!(graph.affected(&[idx]).contains(&idx));
    }

    #[test]
    fn unknown_references_are_dropped() {
        let root = PathBuf::from("/repo");
        let projects = vec![project("A/A.csproj", vec!["Missing/Missing.csproj"], false)];
        let graph = Graph::build(&root, projects);
        let idx = graph.index_of("A/A.csproj").unwrap();
        assert!(graph.forward_edges(idx).is_empty());
    }

    #[test]
    fn untested_detection() {
        let root = PathBuf::from("/repo");
        let projects = vec![
            project("Core/Core.csproj", vec![], false),
            project("Untested/Untested.csproj", vec![], false),
            project("Core.Tests/Core.Tests.csproj", vec!["Core/Core.csproj"], true),
        ];
        let graph = Graph::build(&root, projects);
        let untested = graph.untested_projects();
        let untested_idx = graph.index_of("Untested/Untested.csproj").unwrap();
        let core_idx = graph.index_of("Core/Core.csproj").unwrap();
        assert!(untested.contains(&untested_idx));
        assert!(!untested.contains(&core_idx));
    }

    #[test]
    fn no_infinite_recursion_on_cycle_like_closure() {
        // Self-loops are impossible by construction (no project references
        // itself), but the closure must still terminate on any graph shape.
        let root = PathBuf::from("/repo");
        let projects = vec![
            project("A/A.csproj", vec!["B/B.csproj"], false),
            project("B/B.csproj", vec!["A/A.csproj"], false),
        ];
        let graph = Graph::build(&root, projects);
        let a = graph.index_of("A/A.csproj").unwrap();
        let closure = graph.forward_closure(&[a]);
        assert_eq!(closure.len(), 2);
    }
}
