// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution plan construction.
//!
//! Turns the dependency path strings read from the store into a layered plan:
//! a sequence of stages, each holding per-processor tasks whose nodes carry
//! their upstream dependencies and lookback settings. Layering follows Kahn's
//! algorithm over an arena of nodes, so two builds over the same input
//! produce identical plans.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// Errors raised while assembling an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The five path arrays have different lengths.
    #[error(
        "number of graph paths do not match: algo={algo}, window={window}, proc={proc}, \
         lookback_count={lookback_count}, lookback_timedelta={lookback_timedelta}"
    )]
    PathCountMismatch {
        /// Number of algorithm id paths.
        algo: usize,
        /// Number of window type id paths.
        window: usize,
        /// Number of processor id paths.
        proc: usize,
        /// Number of count lookback paths.
        lookback_count: usize,
        /// Number of timedelta lookback paths.
        lookback_timedelta: usize,
    },

    /// The five paths at one index have different segment counts.
    #[error(
        "number of path segments do not match in path {path}: algo={algo}, window={window}, \
         proc={proc}, lookback_count={lookback_count}, lookback_timedelta={lookback_timedelta}"
    )]
    SegmentCountMismatch {
        /// Index of the offending path.
        path: usize,
        /// Segment count of the algorithm id path.
        algo: usize,
        /// Segment count of the window type id path.
        window: usize,
        /// Segment count of the processor id path.
        proc: usize,
        /// Segment count of the count lookback path.
        lookback_count: usize,
        /// Segment count of the timedelta lookback path.
        lookback_timedelta: usize,
    },

    /// A path segment is not a valid id.
    #[error("invalid id segment '{segment}' in path {path}")]
    InvalidSegment {
        /// Index of the offending path.
        path: usize,
        /// The segment that failed to parse.
        segment: String,
    },

    /// A processor appeared with two different window type ids inside one
    /// path.
    #[error("window type id mismatch on processor {proc_id} in path {path}: saw {saw}, then {then}")]
    WindowIdMismatchOnProcessor {
        /// The processor id.
        proc_id: i64,
        /// Index of the offending path.
        path: usize,
        /// Window type id first seen for the processor.
        saw: i64,
        /// Conflicting window type id seen later.
        then: i64,
    },

    /// The same directed edge appeared twice with different lookback
    /// settings.
    #[error("conflicting lookback parameters between algorithm {from} and algorithm {to}")]
    DuplicateLookbackMismatch {
        /// Upstream algorithm id.
        from: i64,
        /// Downstream algorithm id.
        to: i64,
    },

    /// An edge requests both a count and a timedelta lookback.
    #[error("both count and timedelta lookback set between algorithm {from} and algorithm {to}")]
    LookbackConflict {
        /// Upstream algorithm id.
        from: i64,
        /// Downstream algorithm id.
        to: i64,
    },

    /// The node graph contains a cycle. Registration keeps the stored edge
    /// set acyclic, so this is a safety net.
    #[error("cycle detected in graph: topological layering not possible")]
    CycleDetected,
}

/// History requested along one dependency edge. At most one of the two
/// fields is non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lookback {
    /// Number of most recent historical results to include.
    pub count: i64,
    /// Width, in seconds, of the historical interval to include.
    pub timedelta: i64,
}

/// An upstream dependency of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgoDep {
    /// Upstream algorithm id.
    pub algo_id: i64,
    /// History requested along the edge.
    pub lookback: Lookback,
}

/// One algorithm execution inside a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// The algorithm to execute.
    pub algo_id: i64,
    /// The processor owning the algorithm.
    pub proc_id: i64,
    /// The window type the algorithm is bound to.
    pub window_type_id: i64,
    /// Upstream dependencies, sorted by algorithm id.
    pub deps: Vec<AlgoDep>,
    path_idx: usize,
}

/// The nodes of one stage owned by a single processor, dispatched as one
/// streaming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorTask {
    /// The owning processor id.
    pub proc_id: i64,
    /// Nodes ordered by the first path they appeared on.
    pub nodes: Vec<Node>,
}

/// A set of processor tasks with no data dependencies between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Tasks ordered by processor id.
    pub tasks: Vec<ProcessorTask>,
}

/// The full execution plan: stages in dependency order plus the sorted set
/// of processors any stage touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Stages in execution order.
    pub stages: Vec<Stage>,
    /// Sorted, deduplicated ids of every processor appearing in any stage.
    pub affected_processors: Vec<i64>,
    /// The window type id the plan was built for.
    pub target_window_type_id: i64,
}

struct NodeBuild {
    algo_id: i64,
    proc_id: i64,
    window_type_id: i64,
    path_idx: usize,
}

/// Build a layered execution plan from parallel dependency path strings.
///
/// All five arrays must have the same length, and within one index the same
/// segment count. The lookback segments describe each node's incoming edge,
/// so the lookback of edge `u -> v` sits at `v`'s position.
pub fn build_plan(
    algo_paths: &[String],
    window_type_paths: &[String],
    proc_paths: &[String],
    lookback_count_paths: &[String],
    lookback_timedelta_paths: &[String],
    target_window_type_id: i64,
) -> Result<Plan, PlanError> {
    let k = algo_paths.len();
    if window_type_paths.len() != k
        || proc_paths.len() != k
        || lookback_count_paths.len() != k
        || lookback_timedelta_paths.len() != k
    {
        return Err(PlanError::PathCountMismatch {
            algo: algo_paths.len(),
            window: window_type_paths.len(),
            proc: proc_paths.len(),
            lookback_count: lookback_count_paths.len(),
            lookback_timedelta: lookback_timedelta_paths.len(),
        });
    }

    let mut nodes: Vec<NodeBuild> = Vec::new();
    let mut index_of: HashMap<i64, usize> = HashMap::new();
    let mut succs: Vec<Vec<usize>> = Vec::new();
    let mut preds: Vec<Vec<usize>> = Vec::new();
    let mut edge_lookbacks: HashMap<(i64, i64), Lookback> = HashMap::new();

    for (path_idx, algo_path) in algo_paths.iter().enumerate() {
        let algo_segments = split_path(algo_path, path_idx)?;
        let window_segments = split_path(&window_type_paths[path_idx], path_idx)?;
        let proc_segments = split_path(&proc_paths[path_idx], path_idx)?;
        let lookback_count_segments = split_path(&lookback_count_paths[path_idx], path_idx)?;
        let lookback_timedelta_segments =
            split_path(&lookback_timedelta_paths[path_idx], path_idx)?;

        let n = algo_segments.len();
        if window_segments.len() != n
            || proc_segments.len() != n
            || lookback_count_segments.len() != n
            || lookback_timedelta_segments.len() != n
        {
            return Err(PlanError::SegmentCountMismatch {
                path: path_idx,
                algo: algo_segments.len(),
                window: window_segments.len(),
                proc: proc_segments.len(),
                lookback_count: lookback_count_segments.len(),
                lookback_timedelta: lookback_timedelta_segments.len(),
            });
        }

        let mut window_by_proc: HashMap<i64, i64> = HashMap::new();
        let mut prev: Option<usize> = None;

        for i in 0..n {
            let algo_id = algo_segments[i];
            let proc_id = proc_segments[i];
            let window_type_id = window_segments[i];

            match window_by_proc.entry(proc_id) {
                Entry::Occupied(seen) => {
                    if *seen.get() != window_type_id {
                        return Err(PlanError::WindowIdMismatchOnProcessor {
                            proc_id,
                            path: path_idx,
                            saw: *seen.get(),
                            then: window_type_id,
                        });
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(window_type_id);
                }
            }

            let ix = match index_of.entry(algo_id) {
                Entry::Occupied(entry) => *entry.get(),
                Entry::Vacant(entry) => {
                    nodes.push(NodeBuild {
                        algo_id,
                        proc_id,
                        window_type_id,
                        path_idx,
                    });
                    succs.push(Vec::new());
                    preds.push(Vec::new());
                    *entry.insert(nodes.len() - 1)
                }
            };

            if let Some(prev_ix) = prev {
                let from = nodes[prev_ix].algo_id;
                let lookback = Lookback {
                    count: lookback_count_segments[i],
                    timedelta: lookback_timedelta_segments[i],
                };
                if lookback.count > 0 && lookback.timedelta > 0 {
                    return Err(PlanError::LookbackConflict { from, to: algo_id });
                }
                match edge_lookbacks.entry((from, algo_id)) {
                    Entry::Occupied(existing) => {
                        // The edge is already in the graph; a repeat across
                        // paths is fine as long as its lookback agrees.
                        if *existing.get() != lookback {
                            return Err(PlanError::DuplicateLookbackMismatch { from, to: algo_id });
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(lookback);
                        succs[prev_ix].push(ix);
                        preds[ix].push(prev_ix);
                    }
                }
            }
            prev = Some(ix);
        }
    }

    let layers = layered_topo_sort(&nodes, &succs)?;

    let mut plan = Plan {
        stages: Vec::with_capacity(layers.len()),
        affected_processors: Vec::new(),
        target_window_type_id,
    };

    for layer in layers {
        let mut task_map: BTreeMap<i64, Vec<Node>> = BTreeMap::new();

        for ix in layer {
            let build = &nodes[ix];
            let mut deps = Vec::with_capacity(preds[ix].len());
            for &pred_ix in &preds[ix] {
                let from = nodes[pred_ix].algo_id;
                // Every recorded edge carries a lookback entry.
                let lookback = edge_lookbacks[&(from, build.algo_id)];
                deps.push(AlgoDep {
                    algo_id: from,
                    lookback,
                });
            }
            deps.sort_by_key(|dep| dep.algo_id);

            task_map.entry(build.proc_id).or_default().push(Node {
                algo_id: build.algo_id,
                proc_id: build.proc_id,
                window_type_id: build.window_type_id,
                deps,
                path_idx: build.path_idx,
            });
        }

        let mut stage = Stage {
            tasks: Vec::with_capacity(task_map.len()),
        };
        for (proc_id, mut task_nodes) in task_map {
            if !plan.affected_processors.contains(&proc_id) {
                plan.affected_processors.push(proc_id);
            }
            task_nodes.sort_by_key(|node| node.path_idx);
            stage.tasks.push(ProcessorTask {
                proc_id,
                nodes: task_nodes,
            });
        }
        plan.affected_processors.sort_unstable();
        plan.stages.push(stage);
    }

    Ok(plan)
}

/// Group the graph nodes into layers where each layer only depends on
/// earlier ones.
fn layered_topo_sort(nodes: &[NodeBuild], succs: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, PlanError> {
    let mut in_degree = vec![0usize; nodes.len()];
    for outgoing in succs {
        for &target in outgoing {
            in_degree[target] += 1;
        }
    }

    let mut current: Vec<usize> = (0..nodes.len())
        .filter(|&ix| in_degree[ix] == 0)
        .collect();

    let mut layers: Vec<Vec<usize>> = Vec::new();
    let mut processed = 0;

    while !current.is_empty() {
        let mut next = Vec::new();
        for &ix in &current {
            processed += 1;
            for &target in &succs[ix] {
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    next.push(target);
                }
            }
        }
        layers.push(std::mem::replace(&mut current, next));
    }

    if processed != nodes.len() {
        return Err(PlanError::CycleDetected);
    }

    Ok(layers)
}

fn split_path(path: &str, path_idx: usize) -> Result<Vec<i64>, PlanError> {
    path.split('.')
        .map(|segment| {
            segment.parse::<i64>().map_err(|_| PlanError::InvalidSegment {
                path: path_idx,
                segment: segment.to_string(),
            })
        })
        .collect()
}
