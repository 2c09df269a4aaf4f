//! The match-chain table: one column per binary, plus the identity
//! propagation pass that threads chain-wide ids through all columns.

use tracing::debug;

use crate::column::MatchColumn;
use crate::types::{Ident, MemoryAddress};

/// Ordered sequence of match columns. Index 0 is the first binary of the
/// chain (the "master" column); a chain built from N pairwise diffs holds
/// N+1 columns, the last of which is populated via
/// [`MatchColumn::finish_chain`].
#[derive(Debug, Default)]
pub struct MatchChainTable {
    columns: Vec<MatchColumn>,
}

impl MatchChainTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table of `count` empty columns, ready for population.
    pub fn with_columns(count: usize) -> Self {
        let mut columns = Vec::with_capacity(count);
        columns.resize_with(count, MatchColumn::new);
        Self { columns }
    }

    pub fn push_column(&mut self, column: MatchColumn) {
        self.columns.push(column);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<&MatchColumn> {
        self.columns.get(index)
    }

    pub fn column_mut(&mut self, index: usize) -> Option<&mut MatchColumn> {
        self.columns.get_mut(index)
    }

    /// Mutable access to column `index` and its successor at once, as needed
    /// by diff loaders that insert into one column while terminating the
    /// chain into the next.
    pub fn column_pair_mut(
        &mut self,
        index: usize,
    ) -> Option<(&mut MatchColumn, &mut MatchColumn)> {
        if index + 1 >= self.columns.len() {
            return None;
        }
        let (left, right) = self.columns.split_at_mut(index + 1);
        Some((&mut left[index], &mut right[0]))
    }

    /// Iterate columns in chain order.
    pub fn columns(&self) -> impl Iterator<Item = &MatchColumn> {
        self.columns.iter()
    }

    /// Impose a consistent identity space on the whole table.
    ///
    /// The first column is the master column: its functions are enumerated
    /// in ascending address order and their rank becomes their identity, and
    /// each of its functions independently enumerates its basic blocks the
    /// same way (block identities are scoped to their function). Identities
    /// are then threaded forward column by column: an entity carrying an id
    /// hands it to the entity at its successor address in the next column.
    /// A missing successor, or no entity at the successor address, simply
    /// ends that id's chain; both are ordinary outcomes of independently
    /// computed diffs and never errors.
    ///
    /// Net effect: per column, every identity maps to at most one function,
    /// and per (column, function identity) to at most one basic block, so
    /// the ids of each column form a partial permutation of the master
    /// column's.
    pub fn propagate_ids(&mut self) {
        if self.columns.is_empty() {
            return;
        }
        self.seed_master_column();
        for index in 1..self.columns.len() {
            let (left, right) = self.columns.split_at_mut(index);
            Self::thread_forward(&left[index - 1], &mut right[0], index);
        }
    }

    /// Build the identity indices of every column. Requires
    /// [`MatchChainTable::propagate_ids`] to have run for the indices to
    /// hold anything useful.
    pub fn build_id_indices(&mut self) {
        for column in &mut self.columns {
            column.build_id_indices();
        }
    }

    fn seed_master_column(&mut self) {
        let master = &mut self.columns[0];
        let function_addresses: Vec<MemoryAddress> =
            master.functions().map(|f| f.addr.address).collect();
        for (rank, &address) in function_addresses.iter().enumerate() {
            master.assign_function_id(address, rank as Ident);
        }
        for &address in &function_addresses {
            let block_addresses: Vec<MemoryAddress> = match master.find_function_by_address(address)
            {
                Some(function) => function.basic_blocks.iter().copied().collect(),
                None => continue,
            };
            for (rank, &block_address) in block_addresses.iter().enumerate() {
                master.assign_basic_block_id(block_address, rank as Ident);
            }
        }
        debug!(functions = function_addresses.len(), "seeded master column identities");
    }

    fn thread_forward(prev: &MatchColumn, column: &mut MatchColumn, index: usize) {
        let mut threaded = 0usize;
        let mut terminated = 0usize;
        let mut lost = 0usize;
        for function in prev.functions() {
            let Some(id) = function.addr.id else {
                continue;
            };
            match function.addr.address_in_next {
                None => terminated += 1,
                Some(successor) => {
                    if column.assign_function_id(successor, id) {
                        threaded += 1;
                    } else {
                        lost += 1;
                    }
                }
            }
        }
        for block in prev.basic_blocks() {
            let Some(id) = block.addr.id else {
                continue;
            };
            if let Some(successor) = block.addr.address_in_next {
                column.assign_basic_block_id(successor, id);
            }
        }
        debug!(column = index, threaded, terminated, lost, "threaded identities forward");
    }
}
