//! Per-block savings: dynamic programming over block dissections.

use crate::set::SetMembership;
use opfuse_catalog::{BlockStructure, SuperInstructionId, Triangle};

/// Maximum savings realizable on `block` when only the super instructions
/// in `set` may be adopted. Replacing an `l`-opcode interval by one super
/// instruction saves `l - 1` dispatches; intervals shorter than 2 save 0.
///
/// Phase A marks in O(rows²) every interval whose dissection can contain a
/// selected instruction; blocks the set cannot touch return 0 without
/// running the O(rows³) recurrence of phase B. The function is pure and
/// safe to call from any number of workers.
pub fn block_saving(block: &BlockStructure, set: &SetMembership) -> i32 {
    let rows = block.structure.rows();
    if rows == 0 {
        return 0;
    }
    let block_length = rows + 2;

    let instruction_at = |start: usize, end: usize| -> SuperInstructionId {
        let length = end - start;
        if length < 2 {
            return SuperInstructionId::INVALID;
        }
        block.structure.get(rows + 1 - length, start)
    };

    // Phase A: can the interval contain a selected instruction at all?
    let mut affected = Triangle::<bool>::new(rows);
    for start in 0..rows {
        if set.contains(instruction_at(start, start + 2)) {
            interval_set(&mut affected, rows, start, start + 2, true);
        }
    }
    for length in 3..block_length {
        for start in 0..block_length - length {
            let end = start + length;
            if set.contains(instruction_at(start, end))
                || interval_get(&affected, rows, start, end - 1, false)
                || interval_get(&affected, rows, start + 1, end, false)
            {
                interval_set(&mut affected, rows, start, end, true);
            }
        }
    }
    if !interval_get(&affected, rows, 0, rows + 1, false) {
        return 0;
    }

    // Phase B: maximum saving per affected interval, shortest first.
    let mut savings = Triangle::<i32>::new(rows);
    for start in 0..rows {
        let saving = if set.contains(instruction_at(start, start + 2)) {
            1
        } else {
            0
        };
        interval_set(&mut savings, rows, start, start + 2, saving);
    }
    for length in 3..block_length {
        for start in 0..block_length - length {
            let end = start + length;
            if !interval_get(&affected, rows, start, end, false) {
                continue;
            }
            // Either the whole interval is one selected instruction ...
            let mut saving = 0i32;
            if set.contains(instruction_at(start, end)) {
                saving = (length - 1) as i32;
            }
            // ... or the best split dominates.
            for mid in 1..length {
                let split = interval_get(&savings, rows, start, start + mid, 0)
                    + interval_get(&savings, rows, start + mid, end, 0);
                if split > saving {
                    saving = split;
                }
            }
            interval_set(&mut savings, rows, start, end, saving);
        }
    }

    interval_get(&savings, rows, 0, rows + 1, 0)
}

/// Read the triangle slot of interval `[start, end)`; intervals shorter
/// than 2 yield `short`.
#[inline]
fn interval_get<T: Copy>(t: &Triangle<T>, rows: usize, start: usize, end: usize, short: T) -> T {
    let length = end - start;
    if length < 2 {
        short
    } else {
        t.get(rows + 1 - length, start)
    }
}

#[inline]
fn interval_set<T: Copy>(t: &mut Triangle<T>, rows: usize, start: usize, end: usize, value: T) {
    let length = end - start;
    t.set(rows + 1 - length, start, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::InstructionSet;
    use opfuse_catalog::{build_catalog, BlockInfo, OpCode};

    const A: OpCode = OpCode(0x01);
    const B: OpCode = OpCode(0x02);

    fn saving_of(block: &[OpCode], picked: &[u32]) -> i32 {
        let catalog = build_catalog(&[BlockInfo {
            block: block.to_vec(),
            frequency: 1,
        }]);
        let ids: Vec<_> = picked
            .iter()
            .map(|&id| opfuse_catalog::SuperInstructionId::from_u32(id))
            .collect();
        block_saving(&catalog.blocks[0], &InstructionSet::from_ids(&ids).decode())
    }

    // [A,B,A,B] interns AB=1, ABA=2, ABAB=3, BA=4, BAB=5.

    #[test]
    fn test_two_disjoint_pairs() {
        assert_eq!(saving_of(&[A, B, A, B], &[1]), 2);
    }

    #[test]
    fn test_three_opcode_match_with_leftover() {
        assert_eq!(saving_of(&[A, B, A, B], &[2]), 2);
    }

    #[test]
    fn test_best_dissection_wins() {
        assert_eq!(saving_of(&[A, B, A, B], &[1, 2]), 2);
        // The whole-block candidate dominates every split.
        assert_eq!(saving_of(&[A, B, A, B], &[1, 2, 3]), 3);
    }

    #[test]
    fn test_unaffected_block_fast_path() {
        assert_eq!(saving_of(&[A, B, A, B], &[99]), 0);
        assert_eq!(saving_of(&[A, B, A, B], &[]), 0);
    }

    #[test]
    fn test_trivial_blocks() {
        assert_eq!(saving_of(&[A], &[1]), 0);
        assert_eq!(saving_of(&[A, B], &[1]), 1);
        assert_eq!(saving_of(&[A, B], &[99]), 0);
    }

    #[test]
    fn test_monotone_in_the_set() {
        let block = [A, B, B, A, B, A, A];
        let base = saving_of(&block, &[1]);
        let wider = saving_of(&block, &[1, 4]);
        let widest = saving_of(&block, &[1, 4, 2, 7]);
        assert!(base <= wider);
        assert!(wider <= widest);
    }
}
