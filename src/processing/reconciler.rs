use crate::models::NcmCode;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Working set of codes present in both sources.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reconciliation {
    /// Sorted ascending.
    pub codes: Vec<NcmCode>,
    pub normalized_a: usize,
    pub normalized_b: usize,
    pub dropped_a: usize,
    pub dropped_b: usize,
}

/// Normalize every member, returning the valid set and how many were dropped.
pub fn normalize_codes<I, S>(raw: I) -> (BTreeSet<NcmCode>, usize)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = BTreeSet::new();
    let mut dropped = 0usize;
    for item in raw {
        match NcmCode::parse(item.as_ref()) {
            Some(code) => {
                set.insert(code);
            }
            None => dropped += 1,
        }
    }
    (set, dropped)
}

pub fn reconcile<A, B, S, T>(source_a: A, source_b: B) -> Reconciliation
where
    A: IntoIterator<Item = S>,
    B: IntoIterator<Item = T>,
    S: AsRef<str>,
    T: AsRef<str>,
{
    let (set_a, dropped_a) = normalize_codes(source_a);
    let (set_b, dropped_b) = normalize_codes(source_b);

    if dropped_a > 0 || dropped_b > 0 {
        warn!("codes dropped during normalization: {} from first source, {} from second", dropped_a, dropped_b);
    }

    let codes: Vec<NcmCode> = set_a.intersection(&set_b).cloned().collect();
    info!("{} codes in common ({} vs {} normalized)", codes.len(), set_a.len(), set_b.len());

    Reconciliation {
        codes,
        normalized_a: set_a.len(),
        normalized_b: set_b.len(),
        dropped_a,
        dropped_b,
    }
}
