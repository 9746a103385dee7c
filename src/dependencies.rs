//! Task dependency graph checks. Edges point from a task to the tasks that
//! block it.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

#[derive(Debug, PartialEq, Eq)]
pub enum DependencyError {
    SelfReference,
    UnknownTask(Uuid),
    Cycle(Uuid),
}

impl std::fmt::Display for DependencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyError::SelfReference => write!(f, "a task cannot block itself"),
            DependencyError::UnknownTask(id) => {
                write!(f, "task {id} does not belong to the same brief")
            }
            DependencyError::Cycle(id) => {
                write!(f, "blocking on task {id} would create a dependency cycle")
            }
        }
    }
}

/// Validates replacing the blockers of `task_id` with `blockers`.
///
/// `siblings` holds every task id of the brief. `edges` is the current
/// adjacency map; the existing edges of `task_id` are ignored since they are
/// being replaced.
pub fn validate_blockers(
    task_id: Uuid,
    blockers: &[Uuid],
    siblings: &HashSet<Uuid>,
    edges: &HashMap<Uuid, Vec<Uuid>>,
) -> Result<(), DependencyError> {
    for blocker in blockers {
        if *blocker == task_id {
            return Err(DependencyError::SelfReference);
        }
        if !siblings.contains(blocker) {
            return Err(DependencyError::UnknownTask(*blocker));
        }
    }

    for blocker in blockers {
        if reaches(*blocker, task_id, edges) {
            return Err(DependencyError::Cycle(*blocker));
        }
    }

    Ok(())
}

fn reaches(from: Uuid, target: Uuid, edges: &HashMap<Uuid, Vec<Uuid>>) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![from];

    while let Some(current) = stack.pop() {
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = edges.get(&current) {
            stack.extend(next.iter().copied().filter(|id| *id != current));
        }
    }

    false
}

pub fn adjacency(pairs: impl IntoIterator<Item = (Uuid, Uuid)>) -> HashMap<Uuid, Vec<Uuid>> {
    let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (task, blocker) in pairs {
        map.entry(task).or_default().push(blocker);
    }
    map
}
