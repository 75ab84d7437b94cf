//! Option negotiation (RFC 2347, RFC 2348, RFC 2349).
//!
//! Only `blksize`, `tsize` and `timeout` are recognized. Anything else is
//! left out of the OACK, which tells the client the option is unsupported.

use std::time::Duration;

/// Block size used when no `blksize` option is accepted
pub const DEFAULT_BLOCK_SIZE: u16 = 512;
/// Smallest block size accepted (RFC 2348)
pub const MIN_BLOCK_SIZE: u16 = 8;
/// Largest block size accepted (RFC 2348)
pub const MAX_BLOCK_SIZE: u16 = 65464;
/// Acknowledgment timeout used when no `timeout` option is accepted
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Accepted range for the `timeout` option, in seconds (RFC 2349)
pub const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=255;

const BLKSIZE: &str = "blksize";
const TSIZE: &str = "tsize";
const TIMEOUT: &str = "timeout";

/// Parameters fixed for the lifetime of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    /// Bytes per DATA block
    pub block_size: u16,
    /// How long to wait for each acknowledgment
    pub timeout: Duration,
}

impl Default for TransferParams {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Outcome of negotiating a read request's options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Parameters the transfer will run with
    pub params: TransferParams,
    /// Options to echo in the OACK; empty means no OACK is sent
    pub acknowledged: Vec<(String, String)>,
}

/// Computes the accepted options and transfer parameters.
///
/// Names match case-insensitively and the first occurrence of a name wins.
/// The OACK lists accepted options in the order `blksize`, `tsize`, `timeout`
/// regardless of request order.
pub fn negotiate(
    requested: &[(String, String)],
    file_size: u64,
    defaults: TransferParams,
) -> Negotiation {
    let mut params = defaults;
    let mut acknowledged = Vec::new();

    if let Some((name, value)) = find(requested, BLKSIZE) {
        if let Some((block_size, echoed)) = accept_block_size(value) {
            params.block_size = block_size;
            acknowledged.push((name.clone(), echoed));
        }
    }

    if find(requested, TSIZE).is_some() {
        acknowledged.push((TSIZE.to_string(), file_size.to_string()));
    }

    if let Some((name, value)) = find(requested, TIMEOUT) {
        if let Ok(secs) = value.parse::<u64>() {
            if TIMEOUT_RANGE_SECS.contains(&secs) {
                params.timeout = Duration::from_secs(secs);
                acknowledged.push((name.clone(), secs.to_string()));
            }
        }
    }

    Negotiation {
        params,
        acknowledged,
    }
}

fn find<'a>(requested: &'a [(String, String)], name: &str) -> Option<&'a (String, String)> {
    requested
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
}

/// Accepted block size and the value to echo, in canonical decimal form.
/// Oversized requests are lowered to the maximum; undersized or unparseable
/// ones are refused.
fn accept_block_size(value: &str) -> Option<(u16, String)> {
    let requested = value.parse::<u64>().ok()?;
    if requested < u64::from(MIN_BLOCK_SIZE) {
        return None;
    }
    match u16::try_from(requested) {
        Ok(size) if size <= MAX_BLOCK_SIZE => Some((size, size.to_string())),
        _ => Some((MAX_BLOCK_SIZE, MAX_BLOCK_SIZE.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| ((*n).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_blksize_is_applied_and_echoed() {
        let result = negotiate(&opts(&[("blksize", "1024")]), 0, TransferParams::default());
        assert_eq!(result.params.block_size, 1024);
        assert_eq!(result.params.timeout, DEFAULT_TIMEOUT);
        assert_eq!(result.acknowledged, opts(&[("blksize", "1024")]));
    }

    #[test]
    fn test_tsize_reports_real_file_size() {
        let result = negotiate(&opts(&[("tsize", "0")]), 1_234_567, TransferParams::default());
        assert_eq!(result.acknowledged, opts(&[("tsize", "1234567")]));
        assert_eq!(result.params, TransferParams::default());
    }

    #[test]
    fn test_timeout_is_applied_and_echoed() {
        let result = negotiate(&opts(&[("timeout", "2")]), 0, TransferParams::default());
        assert_eq!(result.params.timeout, Duration::from_secs(2));
        assert_eq!(result.acknowledged, opts(&[("timeout", "2")]));
    }

    #[test]
    fn test_unknown_options_are_dropped() {
        let result = negotiate(
            &opts(&[("windowsize", "8"), ("multicast", ""), ("utimeout", "500")]),
            10,
            TransferParams::default(),
        );
        assert!(result.acknowledged.is_empty());
        assert_eq!(result.params, TransferParams::default());
    }

    #[test]
    fn test_ack_order_is_fixed() {
        let result = negotiate(
            &opts(&[("timeout", "3"), ("tsize", "0"), ("foo", "bar"), ("blksize", "1468")]),
            99,
            TransferParams::default(),
        );
        assert_eq!(
            result.acknowledged,
            opts(&[("blksize", "1468"), ("tsize", "99"), ("timeout", "3")])
        );
    }

    #[test]
    fn test_names_match_case_insensitively_and_echo_verbatim() {
        let result = negotiate(&opts(&[("BlkSize", "800")]), 0, TransferParams::default());
        assert_eq!(result.params.block_size, 800);
        assert_eq!(result.acknowledged, opts(&[("BlkSize", "800")]));
    }

    #[test]
    fn test_first_occurrence_wins() {
        let result = negotiate(
            &opts(&[("blksize", "1024"), ("blksize", "2048")]),
            0,
            TransferParams::default(),
        );
        assert_eq!(result.params.block_size, 1024);
        assert_eq!(result.acknowledged.len(), 1);
    }

    #[test]
    fn test_invalid_blksize_values() {
        for value in ["", "abc", "-1", "0", "7"] {
            let result = negotiate(&opts(&[("blksize", value)]), 0, TransferParams::default());
            assert!(result.acknowledged.is_empty(), "blksize {value:?} should be refused");
            assert_eq!(result.params.block_size, DEFAULT_BLOCK_SIZE);
        }
    }

    #[test]
    fn test_oversized_blksize_is_lowered() {
        let result = negotiate(&opts(&[("blksize", "70000")]), 0, TransferParams::default());
        assert_eq!(result.params.block_size, MAX_BLOCK_SIZE);
        assert_eq!(result.acknowledged, opts(&[("blksize", "65464")]));
    }

    #[test]
    fn test_values_are_echoed_in_canonical_form() {
        let result = negotiate(
            &opts(&[("blksize", "+1024"), ("timeout", "03")]),
            0,
            TransferParams::default(),
        );
        assert_eq!(result.params.block_size, 1024);
        assert_eq!(result.params.timeout, Duration::from_secs(3));
        assert_eq!(
            result.acknowledged,
            opts(&[("blksize", "1024"), ("timeout", "3")])
        );
    }

    #[test]
    fn test_out_of_range_timeout_is_refused() {
        for value in ["0", "256", "soon"] {
            let result = negotiate(&opts(&[("timeout", value)]), 0, TransferParams::default());
            assert!(result.acknowledged.is_empty(), "timeout {value:?} should be refused");
            assert_eq!(result.params.timeout, DEFAULT_TIMEOUT);
        }
    }
}
