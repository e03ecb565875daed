use crate::core::BlockHeader;
use crate::utils::hash_to_hex;
use log::{debug, info};
use num_bigint::BigUint;

/// How many nonces are tried between two checks of the abort predicate.
const ABORT_CHECK_INTERVAL: u64 = 4_096;

/// Nonce search over a fixed header.
pub struct ProofOfWork {
    header: BlockHeader,
    target: BigUint,
}

impl ProofOfWork {
    pub fn new(header: BlockHeader) -> ProofOfWork {
        let target = Self::target_for(header.get_difficulty());
        ProofOfWork { header, target }
    }

    /// `2^(256 - difficulty)`: a hash must be strictly below this.
    pub fn target_for(difficulty: u32) -> BigUint {
        BigUint::from(1u8) << (256 - difficulty.min(256)) as usize
    }

    /// One hash and one comparison, no search.
    pub fn verify(header: &BlockHeader, difficulty: u32) -> bool {
        let hash = header.hash();
        BigUint::from_bytes_be(&hash) < Self::target_for(difficulty)
    }

    /// Verify against the difficulty the header itself claims.
    pub fn validate(header: &BlockHeader) -> bool {
        Self::verify(header, header.get_difficulty())
    }

    /// Searches for a nonce that meets the target. Returns `None` once
    /// `should_abort` says so; never returns a header that fails [`Self::validate`].
    /// If the nonce space runs out the timestamp is bumped and the search restarts.
    pub fn run(&self, should_abort: impl Fn() -> bool) -> Option<BlockHeader> {
        let mut header = self.header.clone();
        debug!(
            "Mining height {} at difficulty {}",
            header.get_height(),
            header.get_difficulty()
        );
        let mut nonce: u64 = 0;
        loop {
            if nonce % ABORT_CHECK_INTERVAL == 0 && should_abort() {
                debug!("Mining at height {} aborted", header.get_height());
                return None;
            }
            let hash = header.hash_with_nonce(nonce);
            if BigUint::from_bytes_be(&hash) < self.target {
                header.set_nonce(nonce);
                info!(
                    "Found block {} at height {} (nonce {nonce})",
                    hash_to_hex(&hash),
                    header.get_height()
                );
                return Some(header);
            }
            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => {
                    header.set_timestamp(header.get_timestamp() + 1);
                    0
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn header(difficulty: u32) -> BlockHeader {
        BlockHeader::new(1, [3u8; 32], [4u8; 32], 1_000, difficulty)
    }

    #[test]
    fn test_higher_difficulty_means_smaller_target() {
        assert!(ProofOfWork::target_for(2) < ProofOfWork::target_for(1));
        assert_eq!(ProofOfWork::target_for(0), BigUint::from(1u8) << 256usize);
    }

    #[test]
    fn test_mined_header_validates() {
        let mined = ProofOfWork::new(header(8)).run(|| false).unwrap();
        assert!(ProofOfWork::validate(&mined));
        assert!(ProofOfWork::verify(&mined, 8));
    }

    #[test]
    fn test_perturbed_nonce_fails() {
        // 2^-16 chance that the neighbouring nonce also qualifies
        let mined = ProofOfWork::new(header(16)).run(|| false).unwrap();
        let mut perturbed = mined.clone();
        perturbed.set_nonce(mined.get_nonce().wrapping_add(1));
        assert!(!ProofOfWork::verify(&perturbed, 16));
    }

    #[test]
    fn test_verify_uses_supplied_difficulty() {
        let mined = ProofOfWork::new(header(4)).run(|| false).unwrap();
        // a 4-bit solution is very unlikely to also have 40 leading zero bits
        assert!(!ProofOfWork::verify(&mined, 40));
    }

    #[test]
    fn test_abort_stops_the_search() {
        let calls = Cell::new(0);
        let result = ProofOfWork::new(header(200)).run(|| {
            calls.set(calls.get() + 1);
            calls.get() > 2
        });
        assert!(result.is_none());
        assert_eq!(calls.get(), 3);
    }
}
