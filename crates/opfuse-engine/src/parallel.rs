//! Frequency-weighted savings of a set across the whole catalog.

use crate::eval::block_saving;
use crate::set::InstructionSet;
use crossbeam_channel::bounded;
use opfuse_catalog::BlockStructure;
use std::thread;

/// Capacity of the queues between the submitter, the workers, and the
/// aggregator.
const QUEUE_DEPTH: usize = 100;

/// True savings obtainable by `set`: the optimal dissection saving of every
/// block, weighted by the block's frequency, summed over the catalog.
///
/// `workers` evaluator threads drain a shared input queue; one aggregator
/// sums exactly `blocks.len()` partial results and hands back the total.
/// The caller submits every block, drops its sender and waits for the
/// single aggregate. Per-block evaluation is pure and the decoded set is
/// read-only, so the fan-out is race-free; the summation order does not
/// matter.
pub fn total_savings(blocks: &[BlockStructure], set: &InstructionSet, workers: usize) -> i64 {
    let membership = set.decode();
    let workers = workers.max(1);

    let (block_tx, block_rx) = bounded::<&BlockStructure>(QUEUE_DEPTH);
    let (sum_tx, sum_rx) = bounded::<i64>(QUEUE_DEPTH);

    thread::scope(|scope| {
        for _ in 0..workers {
            let block_rx = block_rx.clone();
            let sum_tx = sum_tx.clone();
            let membership = &membership;
            scope.spawn(move || {
                for block in block_rx {
                    let saving = block_saving(block, membership);
                    sum_tx
                        .send(i64::from(saving) * block.frequency)
                        .expect("aggregator hung up early");
                }
            });
        }
        drop(block_rx);
        drop(sum_tx);

        let expected = blocks.len();
        let aggregator = scope.spawn(move || {
            let mut sum = 0i64;
            for _ in 0..expected {
                sum += sum_rx.recv().expect("worker pool terminated early");
            }
            sum
        });

        for block in blocks {
            block_tx.send(block).expect("no evaluator workers alive");
        }
        drop(block_tx);

        aggregator.join().expect("aggregator panicked")
    })
}
