//! Offset/limit pagination helpers (§4.2, §6).

/// Default page size used when a caller doesn't specify one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound the client clamps requested page sizes to, mirroring the
/// SOR's own `sysparm_limit` ceiling.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Clamp a caller-requested page size into `1..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(requested: usize) -> usize {
    requested.clamp(1, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_zero_up_to_one() {
        assert_eq!(clamp_page_size(0), 1);
    }

    #[test]
    fn clamps_large_down_to_max() {
        assert_eq!(clamp_page_size(50_000), MAX_PAGE_SIZE);
    }

    #[test]
    fn passes_through_in_range_values() {
        assert_eq!(clamp_page_size(250), 250);
    }
}
