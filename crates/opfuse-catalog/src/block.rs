//! Block structures: triangular candidate maps per basic block.

use crate::index::SuperInstructionIndex;
use crate::opcode::OpCode;
use crate::si::{SuperInstruction, SuperInstructionId, MAX_SI_LENGTH};
use crate::triangle::Triangle;
use tracing::info;

/// A basic block as delivered by the block store.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub block: Vec<OpCode>,
    pub frequency: i64,
}

/// A block re-expressed for the evaluator: for every sub-interval
/// `[start, end)` with `end - start >= 2`, the triangle holds the id of the
/// super instruction matching those opcodes, at row `rows + 1 - length`,
/// column `start`, where `rows = block length - 1`. Immutable once built.
#[derive(Debug, Clone)]
pub struct BlockStructure {
    pub structure: Triangle<SuperInstructionId>,
    pub frequency: i64,
}

/// Output of [`build_catalog`]: the interning index, per-id aggregated
/// block frequencies, and one structure per input block.
pub struct Catalog {
    pub index: SuperInstructionIndex,
    /// Summed frequency of every block containing the id, indexed by id.
    pub raw_frequencies: Vec<u64>,
    pub blocks: Vec<BlockStructure>,
}

/// Intern every candidate sub-sequence of every block and build the
/// per-block triangular structures.
pub fn build_catalog(blocks: &[BlockInfo]) -> Catalog {
    let mut index = SuperInstructionIndex::new();
    let mut frequencies: Vec<u64> = Vec::new();
    let mut structures = Vec::with_capacity(blocks.len());

    for info in blocks {
        let rows = info.block.len() - 1;
        let mut structure = Triangle::new(rows);
        for_each_super_instruction(&info.block, |start, end, si| {
            let id = index.add(si);
            structure.set(rows + 1 - (end - start), start, id);
            let slot = id.as_u32() as usize;
            if frequencies.len() <= slot {
                frequencies.resize(slot + 1, 0);
            }
            frequencies[slot] += info.frequency as u64;
        });
        structures.push(BlockStructure {
            structure,
            frequency: info.frequency,
        });
    }

    info!(
        super_instructions = index.len(),
        blocks = structures.len(),
        "catalog indexed"
    );
    Catalog {
        index,
        raw_frequencies: frequencies,
        blocks: structures,
    }
}

/// Visit every candidate interval `[start, end)` of `block` with
/// `2 <= end - start <= MAX_SI_LENGTH`. A leading JUMPDEST is not a useful
/// prefix, so intervals starting there are skipped.
fn for_each_super_instruction(
    block: &[OpCode],
    mut visit: impl FnMut(usize, usize, SuperInstruction),
) {
    for start in 0..block.len() {
        if start == 0 && block[0] == OpCode::JUMPDEST {
            continue;
        }
        let last = (start + MAX_SI_LENGTH).min(block.len());
        for end in (start + 2)..=last {
            visit(start, end, SuperInstruction::new(&block[start..end]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: OpCode = OpCode(0x01);
    const B: OpCode = OpCode(0x02);
    const C: OpCode = OpCode(0x50);

    #[test]
    fn test_build_simple_block() {
        let catalog = build_catalog(&[BlockInfo {
            block: vec![A, B, C],
            frequency: 2,
        }]);

        // Interned in visit order: AB, ABC, BC.
        assert_eq!(catalog.index.len(), 4);
        let ab = SuperInstructionId::from_u32(1);
        let abc = SuperInstructionId::from_u32(2);
        let bc = SuperInstructionId::from_u32(3);
        assert_eq!(catalog.index.get(ab).to_string(), "ADD_MUL");
        assert_eq!(catalog.index.get(abc).to_string(), "ADD_MUL_POP");
        assert_eq!(catalog.index.get(bc).to_string(), "MUL_POP");

        let triangle = &catalog.blocks[0].structure;
        assert_eq!(triangle.rows(), 2);
        assert_eq!(triangle.get(1, 0), ab);
        assert_eq!(triangle.get(0, 0), abc);
        assert_eq!(triangle.get(1, 1), bc);

        assert_eq!(catalog.raw_frequencies, vec![0, 2, 2, 2]);
    }

    #[test]
    fn test_leading_jumpdest_skipped() {
        let catalog = build_catalog(&[BlockInfo {
            block: vec![OpCode::JUMPDEST, A, B],
            frequency: 1,
        }]);

        // Only [1,3) survives; nothing starts at the jump target.
        assert_eq!(catalog.index.len(), 2);
        assert_eq!(
            catalog.index.get(SuperInstructionId::from_u32(1)).to_string(),
            "ADD_MUL"
        );
        let triangle = &catalog.blocks[0].structure;
        assert_eq!(triangle.get(1, 1), SuperInstructionId::from_u32(1));
        assert_eq!(triangle.get(0, 0), SuperInstructionId::INVALID);
    }

    #[test]
    fn test_frequencies_accumulate_across_blocks() {
        let catalog = build_catalog(&[
            BlockInfo {
                block: vec![A, B],
                frequency: 3,
            },
            BlockInfo {
                block: vec![A, B],
                frequency: 4,
            },
        ]);
        assert_eq!(catalog.index.len(), 2);
        assert_eq!(catalog.raw_frequencies, vec![0, 7]);
    }

    #[test]
    fn test_single_opcode_block_has_no_candidates() {
        let catalog = build_catalog(&[BlockInfo {
            block: vec![A],
            frequency: 9,
        }]);
        assert_eq!(catalog.index.len(), 1);
        assert_eq!(catalog.blocks[0].structure.rows(), 0);
        assert!(catalog.raw_frequencies.is_empty());
    }

    #[test]
    fn test_interval_length_capped() {
        let block: Vec<OpCode> = (0..16).map(|_| A).collect();
        let catalog = build_catalog(&[BlockInfo {
            block,
            frequency: 1,
        }]);
        // One distinct sequence per length 2..=10.
        assert_eq!(catalog.index.len(), 1 + (MAX_SI_LENGTH - 1));
    }
}
