// Steptrace - EVM Execution Trace Reconstruction
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use steptrace_common::TraceItem;

/// Rewrite item depths into a dense, gap-free sequence.
///
/// Distinct depths are mapped onto `0..n` preserving order, then each item is
/// clamped to at most one level deeper than its predecessor so that the list
/// always describes a tree in pre-order.
pub fn normalize_depths(items: &mut [TraceItem]) {
    let mut distinct: Vec<usize> = items.iter().map(TraceItem::depth).collect();
    distinct.sort_unstable();
    distinct.dedup();

    let mut previous: Option<usize> = None;
    for item in items.iter_mut() {
        let rank = distinct.partition_point(|depth| *depth < item.depth());
        let depth = match previous {
            Some(previous) => rank.min(previous + 1),
            None => rank,
        };
        item.set_depth(depth);
        previous = Some(depth);
    }
}
