//! Displacement-table perfect hash with O(1) worst-case lookup.
//!
//! Keys are split into a row (`key / t`) and a column (`key % t`) of a
//! `t × t` grid with `t` a power of two. Rows are shifted right until no
//! two occupied columns collide, then compressed into a single table:
//! `value = table[displacement[key / t] + key % t]`.

/// Marker for unused table slots.
const EMPTY: i32 = -1;

/// Perfect hash from `u32` keys to non-negative `i32` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfectHashMap {
    t: u32,
    displacement: Vec<i32>,
    table: Vec<i32>,
}

impl PerfectHashMap {
    /// Build a map of `keys[i] -> values[i]`. Keys must be unique and
    /// values non-negative.
    pub fn new(keys: &[u32], values: &[i32]) -> Self {
        debug_assert_eq!(keys.len(), values.len());
        let max_key = keys.iter().copied().max().unwrap_or(0) as u64;
        let t = ((max_key + 1) as f64).sqrt().ceil().max(1.0) as u64;
        let t = t.next_power_of_two();

        // Sparse rows; a dense t*t grid would not fit for 32-bit keys.
        let mut rows: Vec<Vec<(u32, i32)>> = vec![Vec::new(); t as usize];
        for (&key, &value) in keys.iter().zip(values) {
            debug_assert!(value >= 0);
            let key = key as u64;
            rows[(key / t) as usize].push(((key & (t - 1)) as u32, value));
        }

        let mut order: Vec<usize> = (0..rows.len()).filter(|&r| !rows[r].is_empty()).collect();
        // Most populated rows first; stable for a deterministic layout.
        order.sort_by_key(|&r| std::cmp::Reverse(rows[r].len()));

        let mut displacement = vec![0i32; t as usize];
        let mut table: Vec<i32> = Vec::new();
        let mut first_free = 0usize;
        for r in order {
            let row = &rows[r];
            let min_col = row.iter().map(|&(c, _)| c as usize).min().unwrap_or(0);
            // Any smaller offset puts the leftmost column on an occupied slot.
            let mut offset = first_free.saturating_sub(min_col);
            while row
                .iter()
                .any(|&(c, _)| table.get(offset + c as usize).is_some_and(|&v| v != EMPTY))
            {
                offset += 1;
            }
            displacement[r] = offset as i32;
            for &(c, value) in row {
                let slot = offset + c as usize;
                if slot >= table.len() {
                    table.resize(slot + 1, EMPTY);
                }
                table[slot] = value;
            }
            while table.get(first_free).is_some_and(|&v| v != EMPTY) {
                first_free += 1;
            }
        }
        if table.is_empty() {
            table.push(EMPTY);
        }

        Self {
            t: t as u32,
            displacement,
            table,
        }
    }

    /// Value stored for `key`. Keys not passed at construction map to
    /// an arbitrary slot.
    pub fn get(&self, key: u32) -> i32 {
        let t = self.t as u64;
        let key = key as u64;
        let row = (key / t) as usize;
        if row >= self.displacement.len() {
            return EMPTY;
        }
        let slot = self.displacement[row] as usize + (key & (t - 1)) as usize;
        self.table.get(slot).copied().unwrap_or(EMPTY)
    }

    /// Row width `t`.
    pub fn width(&self) -> u32 {
        self.t
    }

    /// Row displacements, `t` entries.
    pub fn displacement(&self) -> &[i32] {
        &self.displacement
    }

    /// Compressed value table.
    pub fn table(&self) -> &[i32] {
        &self.table
    }

    /// Displacements followed by the table, as uploaded to the device.
    pub fn to_device_layout(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.displacement.len() + self.table.len());
        out.extend_from_slice(&self.displacement);
        out.extend_from_slice(&self.table);
        out
    }
}
