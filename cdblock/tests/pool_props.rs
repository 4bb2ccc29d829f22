//! Property tests for the partition pool

mod common;

use cdblock::{
    BlockIoDisc, CdBlockError, DriveConfig, Fad, PartitionId, PartitionPool, SectorWindow,
    SubheaderPattern, UserId,
};
use common::DiscImage;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Acquire), (0u8..8).prop_map(Op::Release)]
}

proptest! {
    #[test]
    fn pool_never_exceeds_capacity(size in 1usize..8, ops in prop::collection::vec(op(), 0..64)) {
        let mut disc = BlockIoDisc::with_config(DiscImage::numbered(4), DriveConfig::instant());
        let mut pool = PartitionPool::new(size, 24);
        let mut held: Vec<PartitionId> = Vec::new();

        for (n, op) in ops.into_iter().enumerate() {
            match op {
                Op::Acquire => {
                    let window = SectorWindow::new(Fad(n as u32 * 10), 4);
                    match pool.acquire_partition(&mut disc, UserId(n as u32), SubheaderPattern::ANY, window) {
                        Ok(id) => {
                            prop_assert!(!held.contains(&id), "partition handed out twice");
                            held.push(id);
                        }
                        Err(err) => {
                            prop_assert_eq!(err, CdBlockError::OutOfPartitions);
                            prop_assert_eq!(held.len(), size);
                        }
                    }
                }
                Op::Release(i) => {
                    let id = PartitionId(i);
                    pool.release_partition(&mut disc, id);
                    // second release is a no-op
                    pool.release_partition(&mut disc, id);
                    held.retain(|&h| h != id);
                }
            }
            prop_assert!(pool.in_use() <= size);
            prop_assert_eq!(pool.in_use(), held.len());
        }
    }
}
