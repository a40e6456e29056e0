use tracing::warn;

use crate::input::pacaya::BatchInfo;

/// Distributes txs to each block by its tx count.
/// e.g. txs = [tx1, tx2, tx3, tx4, tx5, tx6, tx7, tx8, tx9, tx10]
///     tx_num_sizes = [2, 3, 5]
///    then the result will be [[tx1, tx2], [tx3, tx4, tx5], [tx6, tx7, tx8, tx9, tx10]]
/// special case: if txs.len() < tx_num_sizes.sum(), the rest blocks either empty or with the rest txs
///               if txs.len() > tx_num_sizes.sum(), the rest txs will be ignored
pub fn distribute_txs<T: Clone>(data: &[T], tx_num_sizes: &[usize]) -> Vec<Vec<T>> {
    let proposal_txs_count: usize = tx_num_sizes.iter().sum();
    if data.len() != proposal_txs_count {
        warn!(
            "txs.len() != tx_num_sizes.sum(), txs.len(): {}, tx_num_sizes.sum(): {}",
            data.len(),
            proposal_txs_count
        );
    }

    let mut txs_list = Vec::with_capacity(tx_num_sizes.len());
    let total_tx_count = data.len();
    tx_num_sizes.iter().fold(0, |acc, size| {
        if acc + size <= total_tx_count {
            txs_list.push(data[acc..acc + size].to_vec());
        } else if acc < total_tx_count {
            txs_list.push(data[acc..].to_vec());
        } else {
            txs_list.push(Vec::new());
        }
        acc + size
    });
    txs_list
}

/// Splits a batch's transactions over its blocks.
pub fn distribute_batch_txs<T: Clone>(data: &[T], info: &BatchInfo) -> Vec<Vec<T>> {
    let sizes = info
        .blocks
        .iter()
        .map(|b| b.numTransactions as usize)
        .collect::<Vec<_>>();
    distribute_txs(data, &sizes)
}

/// Timestamp of every block in a batch, counted back from the last one.
pub fn block_timestamps(info: &BatchInfo) -> Vec<u64> {
    let mut timestamps = vec![0u64; info.blocks.len()];
    let mut timestamp = info.lastBlockTimestamp;
    for (i, block) in info.blocks.iter().enumerate().rev() {
        timestamps[i] = timestamp;
        timestamp = timestamp.saturating_sub(block.timeShift as u64);
    }
    timestamps
}
