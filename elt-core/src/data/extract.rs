//! Extraction orchestrator: fetch every requested symbol, then normalize the
//! combined observation set before it is handed to the loader.

use super::provider::{DataError, ExtractProgress, PriceObservation, PriceProvider};
use chrono::NaiveDate;
use std::collections::HashSet;

/// Fetch several symbols in order.
///
/// Failures are collected rather than returned so the caller decides whether a
/// partial result may be loaded. Once the provider reports itself unavailable
/// the remaining symbols are marked failed without being requested.
pub fn extract_symbols(
    provider: &dyn PriceProvider,
    symbols: &[&str],
    start: NaiveDate,
    end: NaiveDate,
    progress: &dyn ExtractProgress,
) -> ExtractSummary {
    let total = symbols.len();
    let mut succeeded = 0;
    let mut failed = 0;
    let mut errors: Vec<(String, DataError)> = Vec::new();
    let mut observations = Vec::new();

    for (i, symbol) in symbols.iter().enumerate() {
        progress.on_start(symbol, i, total);

        let result = provider
            .fetch(symbol, start, end)
            .map(|fetched| fetched.observations);
        let reported = result.as_ref().map(|obs| obs.len()).map_err(Clone::clone);
        progress.on_complete(symbol, i, total, &reported);

        match result {
            Ok(obs) => {
                observations.extend(obs);
                succeeded += 1;
            }
            Err(e) => {
                errors.push((symbol.to_string(), e));
                failed += 1;
            }
        }

        if !provider.is_available() {
            for sym in &symbols[(i + 1)..total] {
                errors.push((sym.to_string(), DataError::CircuitBreakerTripped));
                failed += 1;
            }
            break;
        }
    }

    progress.on_batch_complete(succeeded, failed, total);

    ExtractSummary {
        total,
        succeeded,
        failed,
        errors,
        observations,
    }
}

/// Outcome of a multi-symbol extraction.
#[derive(Debug)]
pub struct ExtractSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(String, DataError)>,
    pub observations: Vec<PriceObservation>,
}

impl ExtractSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// What normalization changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizeReport {
    pub kept: usize,
    pub duplicates: usize,
    pub invalid_closes: usize,
}

/// Sort by `(symbol, date)`, keep the first observation per key, and drop
/// closes that are NaN or infinite.
///
/// Zero and negative closes are real prices (WTI settled at -37.63 on
/// 2020-04-20) and are kept.
///
/// An empty result is an error: loading it would wipe the raw table.
pub fn normalize(
    observations: Vec<PriceObservation>,
) -> Result<(Vec<PriceObservation>, NormalizeReport), DataError> {
    let mut report = NormalizeReport::default();

    let mut valid: Vec<PriceObservation> = observations
        .into_iter()
        .filter(|o| {
            let ok = o.close.is_finite();
            if !ok {
                report.invalid_closes += 1;
            }
            ok
        })
        .collect();

    // Stable sort keeps provider order among equal keys, so "first" is well defined.
    valid.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.date.cmp(&b.date)));

    let mut seen: HashSet<(String, NaiveDate)> = HashSet::with_capacity(valid.len());
    valid.retain(|o| {
        let fresh = seen.insert((o.symbol.clone(), o.date));
        if !fresh {
            report.duplicates += 1;
        }
        fresh
    });

    if valid.is_empty() {
        return Err(DataError::ValidationError(
            "no valid observations to load".into(),
        ));
    }

    if report.invalid_closes > 0 || report.duplicates > 0 {
        tracing::warn!(
            invalid_closes = report.invalid_closes,
            duplicates = report.duplicates,
            "dropped observations during normalization"
        );
    }

    report.kept = valid.len();
    Ok((valid, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(symbol: &str, day: u32, close: f64) -> PriceObservation {
        PriceObservation {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            close,
            symbol: symbol.to_string(),
        }
    }

    #[test]
    fn normalize_sorts_by_symbol_then_date() {
        let (out, report) = normalize(vec![
            obs("SI=F", 2, 23.1),
            obs("GC=F", 4, 2100.0),
            obs("GC=F", 1, 2080.0),
        ])
        .unwrap();

        let keys: Vec<(&str, u32)> = out
            .iter()
            .map(|o| (o.symbol.as_str(), chrono::Datelike::day(&o.date)))
            .collect();
        assert_eq!(keys, vec![("GC=F", 1), ("GC=F", 4), ("SI=F", 2)]);
        assert_eq!(report.kept, 3);
    }

    #[test]
    fn normalize_keeps_first_duplicate() {
        let (out, report) = normalize(vec![obs("GC=F", 1, 2080.0), obs("GC=F", 1, 9999.0)]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].close, 2080.0);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn normalize_drops_non_finite_closes() {
        let (out, report) = normalize(vec![
            obs("CL=F", 1, f64::NAN),
            obs("CL=F", 2, f64::NEG_INFINITY),
            obs("CL=F", 4, 80.5),
        ])
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(report.invalid_closes, 2);
    }

    #[test]
    fn normalize_keeps_negative_and_zero_closes() {
        let (out, report) = normalize(vec![
            obs("CL=F", 17, 18.27),
            obs("CL=F", 20, -37.63),
            obs("CL=F", 21, 0.0),
        ])
        .unwrap();
        let closes: Vec<f64> = out.iter().map(|o| o.close).collect();
        assert_eq!(closes, vec![18.27, -37.63, 0.0]);
        assert_eq!(report.invalid_closes, 0);
        assert_eq!(report.kept, 3);
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(matches!(
            normalize(vec![obs("CL=F", 1, f64::INFINITY)]),
            Err(DataError::ValidationError(_))
        ));
        assert!(normalize(Vec::new()).is_err());
    }
}
