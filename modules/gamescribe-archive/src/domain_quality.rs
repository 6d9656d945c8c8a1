// Domain tiers and auto-exclusion, computed from a full re-aggregation.
//
// Nothing here is incremental: callers hand in the aggregate over every
// stored row for the domain and get a fresh DomainQuality back.

use chrono::{DateTime, Utc};

use gamescribe_common::config::DomainSettings;

use crate::model::{DomainAggregate, DomainQuality, DomainTier, ProviderCounts, ProviderStats};

pub fn compute_domain_quality(
    domain: &str,
    aggregate: &DomainAggregate,
    providers: &[ProviderCounts],
    settings: &DomainSettings,
    now: DateTime<Utc>,
) -> DomainQuality {
    let exclusion_reason = global_exclusion_reason(aggregate, settings);
    let is_excluded = exclusion_reason.is_some();
    let tier = if is_excluded {
        DomainTier::Excluded
    } else {
        tier_for(aggregate.avg_quality, settings)
    };

    DomainQuality {
        domain: domain.to_string(),
        avg_quality: aggregate.avg_quality,
        avg_relevance: aggregate.avg_relevance,
        total_samples: aggregate.total_samples,
        quality_samples: aggregate.quality_samples,
        relevance_samples: aggregate.relevance_samples,
        tier,
        is_excluded,
        exclusion_reason,
        provider_stats: providers
            .iter()
            .map(|counts| provider_stats(counts, settings))
            .collect(),
        updated_at: now,
    }
}

/// Fixed score bands over average quality. Domains with no scored rows are poor.
pub fn tier_for(avg_quality: Option<f64>, settings: &DomainSettings) -> DomainTier {
    match avg_quality {
        Some(q) if q >= settings.tier_excellent_min => DomainTier::Excellent,
        Some(q) if q >= settings.tier_good_min => DomainTier::Good,
        Some(q) if q >= settings.tier_average_min => DomainTier::Average,
        _ => DomainTier::Poor,
    }
}

/// Either rule alone excludes. Relevance needs fewer samples than quality
/// because it is largely a property of the whole site.
pub fn global_exclusion_reason(
    aggregate: &DomainAggregate,
    settings: &DomainSettings,
) -> Option<String> {
    let mut reasons = Vec::new();

    if let Some(avg) = aggregate.avg_quality {
        if aggregate.quality_samples >= settings.min_quality_samples
            && avg < settings.exclude_quality_below
        {
            reasons.push(format!(
                "average quality {avg:.1} below {} over {} samples",
                settings.exclude_quality_below, aggregate.quality_samples
            ));
        }
    }

    if let Some(avg) = aggregate.avg_relevance {
        if aggregate.relevance_samples >= settings.min_relevance_samples
            && avg < settings.exclude_relevance_below
        {
            reasons.push(format!(
                "average relevance {avg:.1} below {} over {} samples",
                settings.exclude_relevance_below, aggregate.relevance_samples
            ));
        }
    }

    (!reasons.is_empty()).then(|| reasons.join("; "))
}

pub fn provider_stats(counts: &ProviderCounts, settings: &DomainSettings) -> ProviderStats {
    let mut stats = ProviderStats {
        provider: counts.provider.clone(),
        attempts: counts.attempts,
        failures: counts.failures,
        is_excluded: false,
        exclusion_reason: None,
    };

    let rate = stats.failure_rate();
    if counts.attempts >= settings.min_provider_attempts && rate > settings.max_provider_failure_rate
    {
        stats.is_excluded = true;
        stats.exclusion_reason = Some(format!(
            "scrape failure rate {:.0}% over {} attempts via {}",
            rate * 100.0,
            counts.attempts,
            counts.provider
        ));
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DomainSettings {
        DomainSettings::default()
    }

    fn quality_only(samples: u32, avg: f64) -> DomainAggregate {
        DomainAggregate {
            total_samples: samples,
            quality_samples: samples,
            avg_quality: Some(avg),
            relevance_samples: 0,
            avg_relevance: None,
        }
    }

    #[test]
    fn four_low_quality_samples_do_not_exclude() {
        let q = compute_domain_quality("spam.example", &quality_only(4, 12.0), &[], &settings(), Utc::now());
        assert!(!q.is_excluded);
        assert_eq!(q.tier, DomainTier::Poor);
    }

    #[test]
    fn fifth_low_quality_sample_excludes() {
        let q = compute_domain_quality("spam.example", &quality_only(5, 12.0), &[], &settings(), Utc::now());
        assert!(q.is_excluded);
        assert_eq!(q.tier, DomainTier::Excluded);
        assert!(q.exclusion_reason.unwrap().contains("quality"));
    }

    #[test]
    fn low_relevance_needs_fewer_samples() {
        let agg = DomainAggregate {
            total_samples: 3,
            quality_samples: 3,
            avg_quality: Some(85.0),
            relevance_samples: 3,
            avg_relevance: Some(10.0),
        };
        let q = compute_domain_quality("offtopic.example", &agg, &[], &settings(), Utc::now());
        assert!(q.is_excluded);
        let reason = q.exclusion_reason.unwrap();
        assert!(reason.contains("relevance"));
        assert!(!reason.contains("quality"));
    }

    #[test]
    fn both_conditions_are_named() {
        let agg = DomainAggregate {
            total_samples: 6,
            quality_samples: 6,
            avg_quality: Some(10.0),
            relevance_samples: 6,
            avg_relevance: Some(10.0),
        };
        let reason = global_exclusion_reason(&agg, &settings()).unwrap();
        assert!(reason.contains("quality") && reason.contains("relevance"));
    }

    #[test]
    fn tiers_follow_fixed_bands() {
        let s = settings();
        assert_eq!(tier_for(Some(80.0), &s), DomainTier::Excellent);
        assert_eq!(tier_for(Some(79.9), &s), DomainTier::Good);
        assert_eq!(tier_for(Some(65.0), &s), DomainTier::Good);
        assert_eq!(tier_for(Some(45.0), &s), DomainTier::Average);
        assert_eq!(tier_for(Some(44.0), &s), DomainTier::Poor);
        assert_eq!(tier_for(None, &s), DomainTier::Poor);
    }

    #[test]
    fn provider_exclusion_is_scoped_to_the_failing_provider() {
        let counts = [
            ProviderCounts { provider: "exa".into(), attempts: 4, failures: 3 },
            ProviderCounts { provider: "tavily".into(), attempts: 6, failures: 1 },
        ];
        let q = compute_domain_quality("flaky.example", &quality_only(3, 70.0), &counts, &settings(), Utc::now());

        assert!(!q.is_excluded);
        assert!(q.provider_stats[0].is_excluded);
        assert!(!q.provider_stats[1].is_excluded);
        assert!(q.has_any_exclusion());
    }

    #[test]
    fn provider_needs_minimum_attempts() {
        let counts = ProviderCounts { provider: "exa".into(), attempts: 3, failures: 3 };
        assert!(!provider_stats(&counts, &settings()).is_excluded);
    }

    #[test]
    fn failure_rate_at_threshold_is_not_excluded() {
        let mut s = settings();
        s.max_provider_failure_rate = 0.5;
        let counts = ProviderCounts { provider: "exa".into(), attempts: 4, failures: 2 };
        assert!(!provider_stats(&counts, &s).is_excluded);
    }
}
