//! Proposal statistics read back from the chain.
//!
//! `grantProposals(id)` does not tell "never started" apart from "no votes
//! yet" through a clean value: reading an unstarted proposal either fails to
//! decode or yields a zero `endTime`. Both cases report `votingStarted: false`
//! with zeroed vote totals, while donations, which can arrive before voting
//! starts, are still summed from `Donated` events.

use ethers::types::U256;
use ethers::utils::format_ether;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chain::{Donation, GrantChain};
use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalStats {
    pub voting_started: bool,
    pub total_votes: String,
    pub total_donations: String,
    pub donor_count: usize,
    pub end_time: String,
    pub executed: bool,
}

/// Ether-denominated decimal string without trailing zeros ("1.5", "0").
pub fn ether_string(amount: U256) -> String {
    let formatted = format_ether(amount);
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

fn sum_donations(donations: &[Donation]) -> U256 {
    donations
        .iter()
        .fold(U256::zero(), |acc, d| acc.saturating_add(d.amount))
}

pub async fn get_stats(chain: &dyn GrantChain, proposal_id: U256) -> Result<ProposalStats> {
    match chain.grant_proposal(proposal_id).await {
        Ok(proposal) if !proposal.end_time.is_zero() => {
            let donations = chain.donations(proposal_id).await?;
            Ok(ProposalStats {
                voting_started: true,
                total_votes: ether_string(proposal.total_votes),
                total_donations: ether_string(sum_donations(&donations)),
                donor_count: donations.len(),
                end_time: proposal.end_time.to_string(),
                executed: proposal.executed,
            })
        }
        Ok(_) => {
            debug!("Proposal {proposal_id} exists but endTime is 0");
            Ok(not_started(chain, proposal_id).await)
        }
        Err(e) if e.is_soft_not_found() => {
            debug!("Proposal {proposal_id} has no voting record yet: {e}");
            Ok(not_started(chain, proposal_id).await)
        }
        Err(e) => Err(e.into()),
    }
}

async fn not_started(chain: &dyn GrantChain, proposal_id: U256) -> ProposalStats {
    let (total_donations, donor_count) = match chain.donations(proposal_id).await {
        Ok(donations) => (sum_donations(&donations), donations.len()),
        Err(e) => {
            warn!("Could not fetch donations for proposal {proposal_id}: {e}");
            (U256::zero(), 0)
        }
    };
    ProposalStats {
        voting_started: false,
        total_votes: "0".to_string(),
        total_donations: ether_string(total_donations),
        donor_count,
        end_time: "0".to_string(),
        executed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ChainError, GrantError};
    use crate::testing::{ether, FakeChain};

    #[test]
    fn ether_strings() {
        assert_eq!(ether_string(U256::zero()), "0");
        assert_eq!(ether_string(ether(1)), "1");
        assert_eq!(ether_string(ether(3) / 2), "1.5");
    }

    #[tokio::test]
    async fn never_started_still_aggregates_donations() {
        let chain = FakeChain::default();
        chain.add_donation(7, ether(1)).await;
        chain.add_donation(7, ether(2)).await;
        chain.add_donation(8, ether(5)).await;

        let stats = get_stats(&chain, U256::from(7u64)).await.unwrap();
        assert!(!stats.voting_started);
        assert_eq!(stats.total_votes, "0");
        assert_eq!(stats.end_time, "0");
        assert_eq!(stats.total_donations, "3");
        assert_eq!(stats.donor_count, 2);
        assert!(!stats.executed);
    }

    #[tokio::test]
    async fn zero_end_time_counts_as_not_started() {
        let chain = FakeChain::default();
        chain.set_proposal(2, 0, ether(9)).await;
        let stats = get_stats(&chain, U256::from(2u64)).await.unwrap();
        assert!(!stats.voting_started);
        assert_eq!(stats.total_votes, "0");
    }

    #[tokio::test]
    async fn started_proposal_reports_totals() {
        let chain = FakeChain::default();
        chain.set_proposal(1, 1_700_000_000, ether(150)).await;
        chain.add_donation(1, ether(1) / 4).await;

        let stats = get_stats(&chain, U256::from(1u64)).await.unwrap();
        assert!(stats.voting_started);
        assert_eq!(stats.total_votes, "150");
        assert_eq!(stats.total_donations, "0.25");
        assert_eq!(stats.donor_count, 1);
        assert_eq!(stats.end_time, "1700000000");
    }

    #[tokio::test]
    async fn donation_query_failure_falls_back_to_zero() {
        let chain = FakeChain::default();
        chain.add_donation(3, ether(1)).await;
        chain
            .fail_donations(ChainError::new(ChainError::TRANSPORT, "logs unavailable"))
            .await;

        let stats = get_stats(&chain, U256::from(3u64)).await.unwrap();
        assert!(!stats.voting_started);
        assert_eq!(stats.total_donations, "0");
        assert_eq!(stats.donor_count, 0);
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let chain = FakeChain::default();
        chain
            .fail_reads(ChainError::new(ChainError::TRANSPORT, "connection refused"))
            .await;
        let err = get_stats(&chain, U256::from(1u64)).await.unwrap_err();
        assert!(matches!(err, GrantError::Chain(ref e) if e.code == ChainError::TRANSPORT));
    }
}
