//! Stable LSD radix sort of 32-bit keys.

use raycast_calc::{Buffer, Event, Result};

use crate::{check_capacity, check_len, num_blocks, PrimitiveLibrary, RADIX, RADIX_BITS, WG_SIZE};

const PASSES: u32 = 32 / RADIX_BITS;

impl PrimitiveLibrary {
    /// Sort `n` keys, ordered as unsigned 32-bit integers.
    ///
    /// `keys_in` is left unmodified. `keys_out` may alias `keys_in`.
    pub fn sort_radix_int(
        &mut self,
        queue: u32,
        keys_in: &Buffer,
        keys_out: &Buffer,
        n: usize,
    ) -> Result<Event> {
        self.sort_radix(queue, keys_in, None, keys_out, None, n)
    }

    /// Sort `n` key/value pairs by key. Equal keys keep their input order.
    pub fn sort_radix_key_value_int(
        &mut self,
        queue: u32,
        keys_in: &Buffer,
        values_in: &Buffer,
        keys_out: &Buffer,
        values_out: &Buffer,
        n: usize,
    ) -> Result<Event> {
        check_len(values_in, n, "sort values input")?;
        check_len(values_out, n, "sort values output")?;
        self.sort_radix(queue, keys_in, Some(values_in), keys_out, Some(values_out), n)
    }

    fn sort_radix(
        &mut self,
        queue: u32,
        keys_in: &Buffer,
        values_in: Option<&Buffer>,
        keys_out: &Buffer,
        values_out: Option<&Buffer>,
        n: usize,
    ) -> Result<Event> {
        check_len(keys_in, n, "sort keys input")?;
        check_len(keys_out, n, "sort keys output")?;
        if n == 0 {
            return Ok(Event::complete());
        }
        let groups = num_blocks(n);
        let histogram_len = RADIX * groups;
        check_capacity(histogram_len)?;
        tracing::trace!(n, groups, with_values = values_in.is_some(), "radix sort");

        let values = values_in.zip(values_out);
        let keys_tmp = self.acquire(n)?;
        let values_len = if values.is_some() { n } else { 1 };
        let values_tmp = self.acquire(values_len)?;
        // Separate placeholders so no dispatch binds one buffer twice.
        let placeholder_in = self.acquire(1)?;
        let placeholder_out = self.acquire(1)?;
        let histogram = self.acquire(histogram_len)?;
        let offsets = self.acquire(histogram_len)?;

        // Ping-pong in -> tmp -> out -> tmp ... so the last (odd) pass lands in out.
        let mut done = Event::complete();
        for pass in 0..PASSES {
            let (src_keys, dst_keys) = match pass {
                0 => (keys_in, &keys_tmp),
                p if p % 2 == 1 => (&keys_tmp, keys_out),
                _ => (keys_out, &keys_tmp),
            };
            let (src_values, dst_values) = match (pass, values) {
                (_, None) => (&placeholder_in, &placeholder_out),
                (0, Some((vi, _))) => (vi, &values_tmp),
                (p, Some((_, vo))) if p % 2 == 1 => (&values_tmp, vo),
                (_, Some((_, vo))) => (vo, &values_tmp),
            };
            let shift = pass * RADIX_BITS;

            self.dispatch("radix_histogram", queue, groups * WG_SIZE, |f| {
                f.set_buffer(0, src_keys)?.set_buffer(1, &histogram)?;
                f.set_u32(2, n as u32)?.set_u32(3, shift)?.set_u32(4, groups as u32)?;
                Ok(())
            })?;
            self.scan_level::<i32>(queue, &histogram, &offsets, histogram_len)?;
            done = self.dispatch("radix_scatter", queue, groups * WG_SIZE, |f| {
                f.set_buffer(0, src_keys)?.set_buffer(1, src_values)?.set_buffer(2, &offsets)?;
                f.set_buffer(3, dst_keys)?.set_buffer(4, dst_values)?;
                f.set_u32(5, n as u32)?.set_u32(6, shift)?.set_u32(7, groups as u32)?;
                f.set_u32(8, values.is_some() as u32)?;
                Ok(())
            })?;
        }

        self.cache.reclaim(keys_tmp, n);
        self.cache.reclaim(values_tmp, values_len);
        self.cache.reclaim(placeholder_in, 1);
        self.cache.reclaim(placeholder_out, 1);
        self.cache.reclaim(histogram, histogram_len);
        self.cache.reclaim(offsets, histogram_len);
        Ok(done)
    }
}
