//! Staged selection: solve budgets 0..=B in order, reusing smaller
//! solutions to sharpen the bounds for larger ones.
//!
//! The stage for budget `s` runs the branch-and-bound search with an upper
//! bound that consults memoized best sets of smaller budgets instead of
//! summing raw saving potentials, which prunes much earlier. Stages are
//! built up strictly in budget order, so a bound query never touches an
//! unsolved stage; sub-problems with novel exclusion sets are solved on
//! demand through the same memoized entry point (their budget is always
//! strictly smaller, so the recursion bottoms out).

use crate::parallel::total_savings;
use crate::search::{Candidate, InstructionInfo, Selection, SelectionProblem};
use crate::set::InstructionSet;
use ahash::AHashMap;
use opfuse_catalog::{BlockStructure, SuperInstructionId};
use std::collections::BinaryHeap;
use tracing::{debug, info};

/// Key of a memoized sub-solution: the best set of `budget` ids drawn from
/// the candidates outside `excluding`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubProblem {
    budget: usize,
    excluding: InstructionSet,
}

impl SubProblem {
    fn unrestricted(budget: usize) -> Self {
        Self {
            budget,
            excluding: InstructionSet::empty(),
        }
    }
}

struct StagedSolver<'a> {
    /// Candidates sorted by raw savings descending.
    instructions: &'a [InstructionInfo],
    blocks: &'a [BlockStructure],
    workers: usize,
    /// Memoized true savings per evaluated set.
    eval_cache: AHashMap<InstructionSet, i64>,
    /// Memoized best set per sub-problem.
    sub_best: AHashMap<SubProblem, InstructionSet>,
}

/// Alternative driver for [`SelectionProblem`]: equivalent result to
/// [`crate::branch_and_bound`], reached through staged bounds and shared
/// evaluation caches.
pub fn staged_search(problem: &mut SelectionProblem, workers: usize) -> Selection {
    problem
        .instructions
        .sort_by(|a, b| b.savings.cmp(&a.savings));
    problem
        .blocks
        .sort_by(|a, b| b.structure.rows().cmp(&a.structure.rows()));

    let solver = StagedSolver {
        instructions: &problem.instructions,
        blocks: &problem.blocks,
        workers,
        eval_cache: AHashMap::new(),
        sub_best: AHashMap::new(),
    };
    solver.solve(problem.budget)
}

impl StagedSolver<'_> {
    fn solve(mut self, budget: usize) -> Selection {
        info!(stage = 0usize, "staged search");
        self.eval(&InstructionSet::empty());
        self.sub_best
            .insert(SubProblem::unrestricted(0), InstructionSet::empty());

        if budget >= 1 {
            self.solve_singletons();
        }
        for stage in 2..=budget {
            info!(stage, "staged search");
            self.best_for(&SubProblem::unrestricted(stage));
        }

        // Report the strongest pair the caches have seen anywhere.
        let mut best_set = InstructionSet::empty();
        let mut best_savings = 0i64;
        for (set, &savings) in &self.eval_cache {
            if savings > best_savings {
                best_savings = savings;
                best_set = set.clone();
            }
        }
        info!(
            savings = best_savings,
            evaluations = self.eval_cache.len(),
            "staged search finished"
        );
        Selection {
            set: best_set,
            savings: best_savings,
        }
    }

    /// Stage 1: evaluate every candidate singleton and remember the two
    /// strongest, the runner-up keyed by the winner's exclusion.
    fn solve_singletons(&mut self) {
        info!(stage = 1usize, "staged search");
        let instructions = self.instructions;

        let mut best: Option<(SuperInstructionId, i64)> = None;
        let mut second: Option<(SuperInstructionId, i64)> = None;
        for inst in instructions {
            if inst.savings == 0 {
                continue;
            }
            let savings = self.eval(&InstructionSet::singleton(inst.id));
            debug!(id = %inst.id, savings, "singleton evaluated");
            match best {
                None => best = Some((inst.id, savings)),
                Some((_, top)) if savings > top => {
                    second = best;
                    best = Some((inst.id, savings));
                }
                _ => match second {
                    None => second = Some((inst.id, savings)),
                    Some((_, next)) if savings > next => second = Some((inst.id, savings)),
                    _ => {}
                },
            }
        }

        if let Some((winner, _)) = best {
            self.sub_best.insert(
                SubProblem::unrestricted(1),
                InstructionSet::singleton(winner),
            );
            if let Some((runner_up, _)) = second {
                self.sub_best.insert(
                    SubProblem {
                        budget: 1,
                        excluding: InstructionSet::singleton(winner),
                    },
                    InstructionSet::singleton(runner_up),
                );
            }
        }
    }

    /// Memoized true savings of a set.
    fn eval(&mut self, set: &InstructionSet) -> i64 {
        if let Some(&savings) = self.eval_cache.get(set) {
            return savings;
        }
        let savings = total_savings(self.blocks, set, self.workers);
        self.eval_cache.insert(set.clone(), savings);
        savings
    }

    /// Memoized best set of `sub.budget` ids disjoint from `sub.excluding`.
    fn best_for(&mut self, sub: &SubProblem) -> InstructionSet {
        if let Some(found) = self.sub_best.get(sub) {
            return found.clone();
        }
        let best = match sub.budget {
            0 => InstructionSet::empty(),
            1 => self.best_singleton(&sub.excluding),
            _ => self.find_best(sub),
        };
        self.sub_best.insert(sub.clone(), best.clone());
        best
    }

    /// Strongest non-excluded singleton by true savings. Stage 1 has every
    /// singleton in the evaluation cache, so this never re-evaluates.
    fn best_singleton(&mut self, excluding: &InstructionSet) -> InstructionSet {
        let instructions = self.instructions;
        let mut best = InstructionSet::empty();
        let mut best_savings = 0i64;
        for inst in instructions {
            if inst.savings == 0 || excluding.contains(inst.id) {
                continue;
            }
            let single = InstructionSet::singleton(inst.id);
            let savings = self.eval(&single);
            if savings > best_savings {
                best_savings = savings;
                best = single;
            }
        }
        best
    }

    /// Branch-and-bound restricted to candidates outside `sub.excluding`,
    /// bounded by the staged estimates. Only called for budgets >= 2.
    fn find_best(&mut self, sub: &SubProblem) -> InstructionSet {
        let instructions = self.instructions;
        let target = sub.budget;
        let excluding = sub.excluding.clone();
        debug!(budget = target, excluding = %excluding, "solving sub-problem");

        // Greedy seed: extend the best smaller solution with the top
        // remaining candidates.
        let mut seed = self.best_for(&SubProblem {
            budget: target - 1,
            excluding: excluding.clone(),
        });
        for inst in instructions {
            if seed.size() >= target {
                break;
            }
            if inst.savings == 0 {
                break;
            }
            if excluding.contains(inst.id) || seed.contains(inst.id) {
                continue;
            }
            seed = seed.add(inst.id);
        }
        let mut best_set = seed.clone();
        let mut best_savings = self.eval(&seed);

        let root_bound = self.extra_savings_bound(target, &InstructionSet::empty(), &excluding);
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        frontier.push(Candidate {
            set: InstructionSet::empty(),
            min_potential: 0,
            max_potential: root_bound,
        });

        while let Some(cur) = frontier.pop() {
            if cur.max_potential < best_savings {
                continue;
            }
            let value = self.eval(&cur.set);
            if value > best_savings {
                best_savings = value;
                best_set = cur.set.clone();
                debug!(savings = value, set = %cur.set, "sub-problem best improved");
            }

            if cur.set.size() < target {
                let max_id = cur.set.max_id().unwrap_or(SuperInstructionId::INVALID);
                for inst in instructions {
                    if inst.id < max_id {
                        continue;
                    }
                    if cur.set.contains(inst.id) || excluding.contains(inst.id) {
                        continue;
                    }
                    if inst.savings == 0 {
                        continue;
                    }

                    let new_set = cur.set.add(inst.id);
                    // Unlike the raw-savings bound, the staged bound is not
                    // monotone along the sorted candidate list, so every
                    // extension is tested instead of breaking early.
                    let max_potential = value
                        + inst.savings as i64
                        + self.extra_savings_bound(target, &new_set, &excluding);
                    if max_potential > best_savings {
                        frontier.push(Candidate {
                            set: new_set,
                            min_potential: value,
                            max_potential,
                        });
                    }
                }
            }
        }

        debug!(budget = target, savings = best_savings, set = %best_set, "sub-problem solved");
        best_set
    }

    /// Upper bound on the extra savings obtainable by growing `set` to
    /// `target` ids without touching `excluding`.
    ///
    /// For an empty set: the best `target - 1` solution plus one more raw
    /// saving. Otherwise: the true savings of the best solution filling the
    /// remaining space, with the exclusion widened until that solution is
    /// disjoint from `set`.
    fn extra_savings_bound(
        &mut self,
        target: usize,
        set: &InstructionSet,
        excluding: &InstructionSet,
    ) -> i64 {
        if set.is_empty() {
            let best = self.best_for(&SubProblem {
                budget: target - 1,
                excluding: excluding.clone(),
            });
            let base = self.eval(&best);
            return base + self.best_remaining_raw(set, excluding);
        }

        let space = target - set.size();
        let mut excluding = excluding.clone();
        loop {
            let best = self.best_for(&SubProblem {
                budget: space,
                excluding: excluding.clone(),
            });
            let overlap = best.intersect(set);
            if overlap.is_empty() {
                return self.eval(&best);
            }
            excluding = excluding.union(&overlap);
        }
    }

    /// Raw saving of the strongest candidate outside `set` and `excluding`.
    fn best_remaining_raw(&self, set: &InstructionSet, excluding: &InstructionSet) -> i64 {
        self.instructions
            .iter()
            .find(|inst| !excluding.contains(inst.id) && !set.contains(inst.id))
            .map(|inst| inst.savings as i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfuse_catalog::{build_catalog, BlockInfo, OpCode};

    const A: OpCode = OpCode(0x01);
    const B: OpCode = OpCode(0x02);
    const C: OpCode = OpCode(0x50);

    fn problem(budget: usize) -> SelectionProblem {
        let catalog = build_catalog(&[
            BlockInfo {
                block: vec![A, B, A, B],
                frequency: 4,
            },
            BlockInfo {
                block: vec![B, C, B, C, A],
                frequency: 3,
            },
            BlockInfo {
                block: vec![C, A, C],
                frequency: 5,
            },
        ]);
        SelectionProblem::from_catalog(catalog, budget)
    }

    #[test]
    fn test_zero_budget_stage() {
        let mut p = problem(0);
        let selection = staged_search(&mut p, 2);
        assert!(selection.set.is_empty());
        assert_eq!(selection.savings, 0);
    }

    #[test]
    fn test_singleton_stage_picks_best() {
        let mut p = problem(1);
        let selection = staged_search(&mut p, 2);
        assert_eq!(selection.set.size(), 1);
        assert_eq!(
            selection.savings,
            total_savings(&p.blocks, &selection.set, 2)
        );
    }

    #[test]
    fn test_agrees_with_plain_search() {
        for budget in 1..=3 {
            let mut plain = problem(budget);
            let expected = crate::search::branch_and_bound(&mut plain, 2);

            let mut staged = problem(budget);
            let got = staged_search(&mut staged, 2);

            assert_eq!(got.savings, expected.savings, "budget {budget}");
            assert_eq!(
                got.savings,
                total_savings(&staged.blocks, &got.set, 2),
                "budget {budget}"
            );
        }
    }
}
