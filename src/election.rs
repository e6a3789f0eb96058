//! Deterministic master election.

use std::collections::BTreeSet;

/// Elect a coordinating peer from a set of peer ids plus the local id.
///
/// The local id is unioned into the set (duplicates do not change the
/// outcome) and the lexicographically smallest id wins. Every peer running
/// this over the same effective set obtains the same result, which is the
/// basis for leaderless coordination such as deciding which side initiates
/// a handshake.
pub fn elect_master(local_id: &str, peers: &[String]) -> String {
    let mut candidates: BTreeSet<&str> = peers.iter().map(String::as_str).collect();
    candidates.insert(local_id);
    candidates
        .iter()
        .next()
        .copied()
        .unwrap_or(local_id)
        .to_string()
}
