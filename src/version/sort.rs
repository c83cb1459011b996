//! Stable descending insertion sort used while filtering release lists

use std::cmp::Ordering;

use semver::Version;

use crate::version::semver::compare;

/// Insert `item` into `sorted`, which is kept in descending order of `key`.
///
/// Scans from the tail and places the item directly after the last entry that
/// is greater than or equal to it, so entries with equal versions keep their
/// original relative order.
pub fn insert_descending<T>(sorted: &mut Vec<T>, item: T, key: impl Fn(&T) -> &Version) {
    let mut position = sorted.len();
    while position > 0 && compare(key(&sorted[position - 1]), key(&item)) == Ordering::Less {
        position -= 1;
    }
    sorted.insert(position, item);
}
