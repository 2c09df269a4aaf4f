use std::collections::HashMap;

use sigchain_core::chain::MatchChainTable;
use sigchain_core::types::{Ident, MemoryAddress, RawAddressPair};

fn pair(address: MemoryAddress, next: MemoryAddress) -> RawAddressPair {
    RawAddressPair::new(address, next)
}

#[test]
fn master_column_ids_are_address_ranks() {
    let mut table = MatchChainTable::with_columns(1);
    let column = table.column_mut(0).unwrap();
    // Inserted out of order on purpose.
    for address in [0x3000u64, 0x1000, 0x2000] {
        column.insert_function(pair(address, 0)).unwrap().unwrap();
    }

    table.propagate_ids();

    let column = table.column(0).unwrap();
    assert_eq!(column.find_function_by_address(0x1000).unwrap().addr.id, Some(0));
    assert_eq!(column.find_function_by_address(0x2000).unwrap().addr.id, Some(1));
    assert_eq!(column.find_function_by_address(0x3000).unwrap().addr.id, Some(2));
}

#[test]
fn identities_thread_through_every_column() {
    // Three binaries, two diffs: 0x1000 -> 0x2000 -> 0x3000 plus a second
    // function that survives the first hop only.
    let mut table = MatchChainTable::with_columns(3);
    {
        let column = table.column_mut(0).unwrap();
        column.insert_function(pair(0x1000, 0x2000)).unwrap().unwrap();
        column.insert_function(pair(0x1800, 0x2800)).unwrap().unwrap();
    }
    {
        let column = table.column_mut(1).unwrap();
        column.insert_function(pair(0x2000, 0x3000)).unwrap().unwrap();
        column.insert_function(pair(0x2800, 0)).unwrap().unwrap();
    }
    {
        let column = table.column_mut(2).unwrap();
        column.insert_function(pair(0x3000, 0)).unwrap().unwrap();
    }

    table.propagate_ids();

    assert_eq!(table.column(1).unwrap().find_function_by_address(0x2000).unwrap().addr.id, Some(0));
    assert_eq!(table.column(1).unwrap().find_function_by_address(0x2800).unwrap().addr.id, Some(1));
    assert_eq!(table.column(2).unwrap().find_function_by_address(0x3000).unwrap().addr.id, Some(0));
    // Identity 1 terminated at column 1 (sentinel successor); it must not
    // reappear in column 2.
    let ids: Vec<_> = table.column(2).unwrap().functions().filter_map(|f| f.addr.id).collect();
    assert_eq!(ids, vec![0]);
}

#[test]
fn missing_successor_entity_drops_the_identity_without_error() {
    let mut table = MatchChainTable::with_columns(2);
    table.column_mut(0).unwrap().insert_function(pair(0x1000, 0x2000)).unwrap().unwrap();
    // Column 1 has no entity at 0x2000: the pairwise diff disagreed.
    table.column_mut(1).unwrap().insert_function(pair(0x2222, 0x3000)).unwrap().unwrap();

    table.propagate_ids();

    let column = table.column(1).unwrap();
    assert_eq!(column.find_function_by_address(0x2222).unwrap().addr.id, None);
    assert!(column.functions().all(|f| f.addr.id != Some(0)));
}

#[test]
fn at_most_one_entity_per_identity_per_column() {
    // Two master functions claim the same successor address; the lower
    // address wins and the other identity disappears from column 1.
    let mut table = MatchChainTable::with_columns(2);
    {
        let column = table.column_mut(0).unwrap();
        column.insert_function(pair(0x1000, 0x5000)).unwrap().unwrap();
        column.insert_function(pair(0x2000, 0x5000)).unwrap().unwrap();
    }
    table.column_mut(1).unwrap().insert_function(pair(0x5000, 0)).unwrap().unwrap();

    table.propagate_ids();

    let mut seen: HashMap<Ident, usize> = HashMap::new();
    for function in table.column(1).unwrap().functions() {
        if let Some(id) = function.addr.id {
            *seen.entry(id).or_default() += 1;
        }
    }
    assert!(seen.values().all(|&count| count == 1));
    assert_eq!(table.column(1).unwrap().find_function_by_address(0x5000).unwrap().addr.id, Some(0));
}

#[test]
fn basic_block_identities_are_scoped_per_function() {
    let mut table = MatchChainTable::with_columns(1);
    {
        let column = table.column_mut(0).unwrap();
        column.insert_function(pair(0x1000, 0)).unwrap().unwrap();
        column.insert_basic_block(0x1000, pair(0x1000, 0)).unwrap();
        column.insert_basic_block(0x1000, pair(0x1020, 0)).unwrap();

        column.insert_function(pair(0x2000, 0)).unwrap().unwrap();
        column.insert_basic_block(0x2000, pair(0x2000, 0)).unwrap();
    }

    table.propagate_ids();
    table.build_id_indices();

    let column = table.column(0).unwrap();
    // Both functions own a block with identity 0, without collision.
    assert_eq!(column.find_basic_block_by_address(0x1000).unwrap().addr.id, Some(0));
    assert_eq!(column.find_basic_block_by_address(0x2000).unwrap().addr.id, Some(0));
    assert_eq!(column.find_basic_block_by_id(0, 0).unwrap().addr.address, 0x1000);
    assert_eq!(column.find_basic_block_by_id(1, 0).unwrap().addr.address, 0x2000);
    assert_eq!(column.find_basic_block_by_id(0, 1).unwrap().addr.address, 0x1020);
}

#[test]
fn basic_block_identities_thread_within_their_function_chain() {
    let mut table = MatchChainTable::with_columns(2);
    {
        let column = table.column_mut(0).unwrap();
        column.insert_function(pair(0x1000, 0x2000)).unwrap().unwrap();
        column.insert_basic_block(0x1000, pair(0x1000, 0x2000)).unwrap();
        column.insert_basic_block(0x1000, pair(0x1020, 0x2020)).unwrap();
    }
    {
        let column = table.column_mut(1).unwrap();
        column.insert_function(pair(0x2000, 0)).unwrap().unwrap();
        column.insert_basic_block(0x2000, pair(0x2000, 0)).unwrap();
        column.insert_basic_block(0x2000, pair(0x2020, 0)).unwrap();
    }

    table.propagate_ids();
    table.build_id_indices();

    let column = table.column(1).unwrap();
    assert_eq!(column.find_basic_block_by_id(0, 0).unwrap().addr.address, 0x2000);
    assert_eq!(column.find_basic_block_by_id(0, 1).unwrap().addr.address, 0x2020);
}

#[test]
fn propagation_on_an_empty_table_is_a_no_op() {
    let mut table = MatchChainTable::new();
    table.propagate_ids();
    table.build_id_indices();
    assert!(table.is_empty());
}
