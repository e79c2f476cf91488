//! # Cluster usage
//!
//! Two independent layers of bookkeeping, indexed by
//! [`ClusterStore::flat_index`](crate::clusters::store::ClusterStore::flat_index):
//!
//! * **provisional** claims, a counter per cluster incremented by candidates while they
//!   grow. Used only as a sharing hint during following.
//! * **authoritative** ownership, written exclusively by the
//!   [`Consolidator`](crate::consolidator::Consolidator). It is cleared and recomputed
//!   from the surviving tracks at every consolidation, so repeated consolidations of the
//!   same track set produce the same table.

use serde::{Deserialize, Serialize};

/// Observable usage state of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusterUsage {
    #[default]
    Unused,
    /// Claimed by at least one growing candidate, owned by no surviving track
    ProvisionallyClaimed,
    /// Owned by exactly one surviving track
    Owned,
    /// Owned by two or more surviving tracks
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Authority {
    #[default]
    Free,
    Owned,
    Shared,
}

#[derive(Debug, Clone, Default)]
pub struct UsageTable {
    provisional: Vec<u16>,
    authoritative: Vec<Authority>,
}

impl UsageTable {
    pub fn new(n_clusters: usize) -> Self {
        UsageTable {
            provisional: vec![0; n_clusters],
            authoritative: vec![Authority::Free; n_clusters],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.provisional.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.provisional.is_empty()
    }

    pub fn state(&self, flat: usize) -> ClusterUsage {
        match self.authoritative[flat] {
            Authority::Shared => ClusterUsage::Shared,
            Authority::Owned => ClusterUsage::Owned,
            Authority::Free if self.provisional[flat] > 0 => ClusterUsage::ProvisionallyClaimed,
            Authority::Free => ClusterUsage::Unused,
        }
    }

    #[inline]
    pub fn provisional_count(&self, flat: usize) -> u16 {
        self.provisional[flat]
    }

    /// True if a surviving track owns the cluster.
    #[inline]
    pub fn is_owned(&self, flat: usize) -> bool {
        self.authoritative[flat] != Authority::Free
    }

    /// True if the cluster counts as used by someone else for a candidate about to claim it.
    #[inline]
    pub fn is_taken(&self, flat: usize, provisional_threshold: u16) -> bool {
        self.is_owned(flat) || self.provisional[flat] >= provisional_threshold
    }

    #[inline]
    pub fn claim_provisional(&mut self, flat: usize) {
        self.provisional[flat] = self.provisional[flat].saturating_add(1);
    }

    #[inline]
    pub fn release_provisional(&mut self, flat: usize) {
        self.provisional[flat] = self.provisional[flat].saturating_sub(1);
    }

    pub(crate) fn clear_provisional(&mut self) {
        self.provisional.iter_mut().for_each(|c| *c = 0);
    }

    pub(crate) fn reset_authoritative(&mut self) {
        self.authoritative
            .iter_mut()
            .for_each(|a| *a = Authority::Free);
    }

    /// Record ownership by one more surviving track.
    pub(crate) fn claim_authoritative(&mut self, flat: usize) {
        let slot = &mut self.authoritative[flat];
        *slot = match *slot {
            Authority::Free => Authority::Owned,
            Authority::Owned | Authority::Shared => Authority::Shared,
        };
    }

    /// Number of clusters per observable state, in the order
    /// `[Unused, ProvisionallyClaimed, Owned, Shared]`.
    pub fn census(&self) -> [usize; 4] {
        let mut counts = [0; 4];
        for flat in 0..self.len() {
            let k = match self.state(flat) {
                ClusterUsage::Unused => 0,
                ClusterUsage::ProvisionallyClaimed => 1,
                ClusterUsage::Owned => 2,
                ClusterUsage::Shared => 3,
            };
            counts[k] += 1;
        }
        counts
    }
}
