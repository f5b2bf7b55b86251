//! Branch-and-bound selection of a bounded super-instruction set.

use crate::parallel::total_savings;
use crate::set::InstructionSet;
use opfuse_catalog::{BlockStructure, Catalog, SuperInstructionId, SuperInstructionIndex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, info};

/// A candidate super instruction and its raw saving potential: aggregated
/// block frequency times the dispatches removed per full-length adoption.
/// The raw saving is the upper bound on the candidate's contribution.
#[derive(Debug, Clone, Copy)]
pub struct InstructionInfo {
    pub id: SuperInstructionId,
    pub savings: u64,
}

/// The selection problem: candidates with their raw savings, the interning
/// index, the block catalog, and the maximum set size.
pub struct SelectionProblem {
    pub instructions: Vec<InstructionInfo>,
    pub index: SuperInstructionIndex,
    pub blocks: Vec<BlockStructure>,
    pub budget: usize,
}

impl SelectionProblem {
    /// Raw savings per candidate are aggregated frequency × (length − 1);
    /// the reserved empty value contributes 0.
    pub fn from_catalog(catalog: Catalog, budget: usize) -> Self {
        let Catalog {
            index,
            raw_frequencies,
            blocks,
        } = catalog;

        let instructions = raw_frequencies
            .iter()
            .enumerate()
            .map(|(slot, &frequency)| {
                let id = SuperInstructionId::from_u32(slot as u32);
                let length = index.get(id).len() as u64;
                InstructionInfo {
                    id,
                    savings: frequency * length.saturating_sub(1),
                }
            })
            .collect();

        Self {
            instructions,
            index,
            blocks,
            budget,
        }
    }
}

/// Result of a selection run.
#[derive(Debug, Clone)]
pub struct Selection {
    pub set: InstructionSet,
    pub savings: i64,
}

/// Frontier entry: a partial set with bounds on what it and its extensions
/// can still achieve.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) set: InstructionSet,
    pub(crate) min_potential: i64,
    pub(crate) max_potential: i64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.min_potential == other.min_potential && self.max_potential == other.max_potential
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on (min_potential, max_potential): the strongest realized
        // lower bound surfaces first, broader remaining potential breaks ties.
        (self.min_potential, self.max_potential).cmp(&(other.min_potential, other.max_potential))
    }
}

/// Exact search for the instruction set of at most `budget` ids with the
/// highest true savings.
///
/// Candidates are explored in canonical order: an extension may only add an
/// id at least as large as the set's current maximum, so no subset is
/// reached twice. Extensions run over the raw-savings-sorted candidate
/// list and stop at the first one whose optimistic bound cannot beat the
/// incumbent.
pub fn branch_and_bound(problem: &mut SelectionProblem, workers: usize) -> Selection {
    // The pruning order needs candidates sorted by raw savings; big blocks
    // go first so the evaluator fan-out stays balanced.
    problem
        .instructions
        .sort_by(|a, b| b.savings.cmp(&a.savings));
    problem
        .blocks
        .sort_by(|a, b| b.structure.rows().cmp(&a.structure.rows()));

    let instructions = &problem.instructions;
    let blocks = &problem.blocks;
    let budget = problem.budget;

    let max_savings = upper_bound_extra_saving(&InstructionSet::empty(), instructions, budget);
    info!(budget, upper_bound = max_savings, "saving potential estimated");

    // Greedy seed: the top candidates by raw savings.
    let mut seed = InstructionSet::empty();
    for inst in instructions.iter().take(budget) {
        if inst.savings == 0 {
            break;
        }
        debug!(id = %inst.id, raw_savings = inst.savings, "seeding");
        seed = seed.add(inst.id);
    }
    let mut best_set = seed.clone();
    let mut best_savings = total_savings(blocks, &seed, workers);
    info!(set = %seed, savings = best_savings, "greedy seed evaluated");

    let mut steps = 0usize;
    let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
    frontier.push(Candidate {
        set: InstructionSet::empty(),
        min_potential: 0,
        max_potential: max_savings,
    });

    while let Some(cur) = frontier.pop() {
        // A better incumbent may have appeared since this was pushed.
        if cur.max_potential < best_savings {
            debug!(set = %cur.set, "pruned: maximum potential below incumbent");
            continue;
        }

        steps += 1;
        info!(
            step = steps,
            frontier = frontier.len(),
            set = %cur.set,
            min_potential = cur.min_potential,
            max_potential = cur.max_potential,
            "expanding"
        );

        let value = total_savings(blocks, &cur.set, workers);
        if value > best_savings {
            best_savings = value;
            best_set = cur.set.clone();
            info!(savings = value, set = %cur.set, "new best");
        } else {
            debug!(savings = value, best = best_savings, "no improvement");
        }

        if cur.set.size() < budget {
            let max_id = cur.set.max_id().unwrap_or(SuperInstructionId::INVALID);
            for inst in instructions {
                if inst.id < max_id {
                    continue;
                }
                if cur.set.contains(inst.id) {
                    continue;
                }
                if inst.savings == 0 {
                    continue;
                }

                let new_set = cur.set.add(inst.id);
                let min_potential = value;
                let max_potential = value
                    + inst.savings as i64
                    + upper_bound_extra_saving(&new_set, instructions, budget);
                if max_potential > best_savings {
                    frontier.push(Candidate {
                        set: new_set,
                        min_potential,
                        max_potential,
                    });
                } else {
                    // Sorted by raw savings: every later extension is weaker.
                    break;
                }
            }
        }
    }

    info!(steps, savings = best_savings, "search finished");
    Selection {
        set: best_set,
        savings: best_savings,
    }
}

/// Sum of the strongest raw savings outside `set` until the set would reach
/// `budget` ids. `instructions` must be sorted by raw savings descending.
pub fn upper_bound_extra_saving(
    set: &InstructionSet,
    instructions: &[InstructionInfo],
    budget: usize,
) -> i64 {
    let mut count = set.size();
    let mut res = 0i64;
    if count >= budget {
        return res;
    }
    for cur in instructions {
        if !set.contains(cur.id) {
            res += cur.savings as i64;
            count += 1;
            if count >= budget {
                return res;
            }
        }
    }
    res
}
