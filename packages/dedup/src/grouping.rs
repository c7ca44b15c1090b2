//! Seed-based duplicate grouping.
//!
//! Each unassigned incident becomes the seed of a new group and absorbs
//! every later unassigned incident that is a duplicate *of the seed*. Two
//! members of one group are therefore not necessarily duplicates of each
//! other, and an incident that only matches a non-seed member starts its
//! own group. The pass is `O(n²)` in the batch size.

use incident_hub_incident_models::PredicateHits;

use crate::DedupConfig;
use crate::predicates::{DuplicateVerdict, IncidentFeatures};

/// Incidents judged duplicates of one seed during one call.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentGroup {
    /// Batch positions, seed first, then in batch order.
    pub members: Vec<usize>,
    /// Verdict of each non-seed member against the seed, aligned with
    /// `members[1..]`.
    pub seed_verdicts: Vec<DuplicateVerdict>,
}

impl IncidentGroup {
    fn seeded(seed: usize) -> Self {
        Self {
            members: vec![seed],
            seed_verdicts: Vec::new(),
        }
    }

    /// Whether the group is a lone incident.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// Verdict between the first two members, if there are two.
    #[must_use]
    pub fn leading_verdict(&self) -> Option<&DuplicateVerdict> {
        self.seed_verdicts.first()
    }
}

/// Result of one grouping pass.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    /// Every batch position appears in exactly one group.
    pub groups: Vec<IncidentGroup>,
    /// Pairwise comparisons performed.
    pub comparisons: u64,
    /// Predicate hit counters across all comparisons.
    pub hits: PredicateHits,
}

/// Groups a batch by comparing each seed with every later unassigned
/// incident.
#[must_use]
pub fn group(features: &[IncidentFeatures], config: &DedupConfig) -> Grouping {
    let mut assigned = vec![false; features.len()];
    let mut grouping = Grouping::default();

    for seed in 0..features.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut current = IncidentGroup::seeded(seed);

        for candidate in (seed + 1)..features.len() {
            if assigned[candidate] {
                continue;
            }

            let verdict = DuplicateVerdict::evaluate(&features[seed], &features[candidate], config);
            grouping.comparisons += 1;
            grouping.hits.geographic += u64::from(verdict.geographic);
            grouping.hits.textual += u64::from(verdict.textual);
            grouping.hits.temporal += u64::from(verdict.temporal);

            log::trace!(
                "Compared #{seed} with #{candidate}: {} vote(s), {}",
                verdict.votes(),
                verdict.reason()
            );

            if verdict.is_duplicate(config.min_votes) {
                assigned[candidate] = true;
                current.members.push(candidate);
                current.seed_verdicts.push(verdict);
            }
        }

        grouping.groups.push(current);
    }

    grouping
}

#[cfg(test)]
mod tests {
    use incident_hub_incident_models::Coordinates;

    use super::*;
    use crate::text;

    fn at(lat: f64, lon: f64, words: &str) -> IncidentFeatures {
        IncidentFeatures {
            coordinates: Coordinates::new(lat, lon),
            tokens: text::tokens(words),
            timestamp: None,
        }
    }

    #[test]
    fn every_position_lands_in_exactly_one_group() {
        let features = vec![
            at(54.9750, -1.6140, "one"),
            at(54.9751, -1.6141, "two"),
            at(55.0500, -1.4500, "three"),
            at(54.9750, -1.6140, "four"),
        ];
        let grouping = group(&features, &DedupConfig::default());
        let mut seen: Vec<usize> = grouping
            .groups
            .iter()
            .flat_map(|g| g.members.iter().copied())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(grouping.groups.len(), 2);
        assert_eq!(grouping.groups[0].members, vec![0, 1, 3]);
    }

    #[test]
    fn grouping_is_seed_based_not_transitive() {
        // B is ~90 m from A, C is ~90 m from B but ~180 m from A.
        let features = vec![
            at(54.9750, -1.6140, "alpha"),
            at(54.97581, -1.6140, "bravo"),
            at(54.97662, -1.6140, "charlie"),
        ];
        let grouping = group(&features, &DedupConfig::default());
        assert_eq!(grouping.groups.len(), 2);
        assert_eq!(grouping.groups[0].members, vec![0, 1]);
        assert_eq!(grouping.groups[1].members, vec![2]);
        assert_eq!(grouping.comparisons, 2);
    }

    #[test]
    fn seed_verdicts_align_with_members() {
        let features = vec![at(54.9750, -1.6140, "a"), at(54.9750, -1.6140, "b")];
        let grouping = group(&features, &DedupConfig::default());
        let g = &grouping.groups[0];
        assert_eq!(g.seed_verdicts.len(), g.members.len() - 1);
        assert!(g.leading_verdict().is_some_and(|v| v.geographic && v.temporal));
    }

    #[test]
    fn empty_batch_yields_no_groups() {
        let grouping = group(&[], &DedupConfig::default());
        assert!(grouping.groups.is_empty());
        assert_eq!(grouping.comparisons, 0);
    }
}
