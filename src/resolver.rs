use crate::price_source::PriceDataSource;
use dashmap::DashMap;
use log::debug;

/// Exchange suffixes probed when a ticker carries none, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSuffixes {
    pub primary: String,
    pub secondary: String,
}

impl Default for ExchangeSuffixes {
    fn default() -> Self {
        Self {
            primary: ".NS".to_string(),
            secondary: ".BO".to_string(),
        }
    }
}

impl ExchangeSuffixes {
    pub fn matches(&self, symbol: &str) -> bool {
        symbol.ends_with(&self.primary) || symbol.ends_with(&self.secondary)
    }
}

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Maps free-form tickers to exchange-qualified symbols by probing the price
/// source for a latest quote.
///
/// A probe that errors counts as "does not exist", so a transient outage
/// during resolution surfaces as an unresolved symbol rather than a failed
/// run.
pub struct SymbolResolver<'a, S: ?Sized> {
    source: &'a S,
    suffixes: ExchangeSuffixes,
}

impl<'a, S> SymbolResolver<'a, S>
where
    S: PriceDataSource + ?Sized,
{
    pub fn new(source: &'a S, suffixes: ExchangeSuffixes) -> Self {
        Self { source, suffixes }
    }

    pub async fn resolve(&self, raw_symbol: &str) -> Option<String> {
        let symbol = normalize_ticker_symbol(raw_symbol)?;

        if self.suffixes.matches(&symbol) {
            return if self.exists(&symbol).await {
                Some(symbol)
            } else {
                None
            };
        }

        for suffix in [&self.suffixes.primary, &self.suffixes.secondary] {
            let candidate = format!("{}{}", symbol, suffix);
            if self.exists(&candidate).await {
                return Some(candidate);
            }
        }

        None
    }

    /// Resolves through `memo`, probing only on the first sighting of a
    /// normalized symbol. Failures are memoized too.
    pub async fn resolve_memoized(
        &self,
        raw_symbol: &str,
        memo: &DashMap<String, Option<String>>,
    ) -> Option<String> {
        let key = normalize_ticker_symbol(raw_symbol)?;
        if let Some(hit) = memo.get(&key) {
            return hit.value().clone();
        }

        let resolved = self.resolve(&key).await;
        memo.insert(key, resolved.clone());
        resolved
    }

    async fn exists(&self, candidate: &str) -> bool {
        match self.source.latest_price(candidate).await {
            Ok(price) => price.is_some(),
            Err(err) => {
                debug!("Existence probe for {} failed: {}", candidate, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceBar;
    use crate::price_source::InMemoryPriceSource;
    use chrono::NaiveDate;

    fn listed(symbols: &[&str]) -> InMemoryPriceSource {
        let bar = PriceBar {
            date: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            open: 10.0,
            high: 10.0,
            low: 10.0,
            close: 10.0,
        };
        symbols
            .iter()
            .fold(InMemoryPriceSource::new(), |source, symbol| {
                source.with_bars(symbol, vec![bar])
            })
    }

    #[tokio::test]
    async fn prefers_primary_exchange() {
        let source = listed(&["TCS.NS", "TCS.BO"]);
        let resolver = SymbolResolver::new(&source, ExchangeSuffixes::default());
        assert_eq!(resolver.resolve(" tcs ").await.as_deref(), Some("TCS.NS"));
        assert_eq!(source.latest_calls(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_secondary_exchange() {
        let source = listed(&["SMALLCAP.BO"]);
        let resolver = SymbolResolver::new(&source, ExchangeSuffixes::default());
        assert_eq!(
            resolver.resolve("smallcap").await.as_deref(),
            Some("SMALLCAP.BO")
        );
    }

    #[tokio::test]
    async fn qualified_symbols_are_verified_unchanged() {
        let source = listed(&["INFY.BO"]);
        let resolver = SymbolResolver::new(&source, ExchangeSuffixes::default());
        assert_eq!(
            resolver.resolve("infy.bo").await.as_deref(),
            Some("INFY.BO")
        );
        assert_eq!(resolver.resolve("INFY.NS").await, None);
        assert_eq!(source.latest_calls(), 2);
    }

    #[tokio::test]
    async fn unknown_and_blank_symbols_fail() {
        let source = listed(&["TCS.NS"]);
        let resolver = SymbolResolver::new(&source, ExchangeSuffixes::default());
        assert_eq!(resolver.resolve("FAKESYMBOL").await, None);
        assert_eq!(resolver.resolve("   ").await, None);
        assert_eq!(source.latest_calls(), 2);
    }

    #[tokio::test]
    async fn probe_errors_count_as_missing() {
        let source = listed(&["FLAKY.BO"]).with_failure("FLAKY.NS");
        let resolver = SymbolResolver::new(&source, ExchangeSuffixes::default());
        assert_eq!(resolver.resolve("flaky").await.as_deref(), Some("FLAKY.BO"));
    }

    #[tokio::test]
    async fn memoized_resolution_probes_once() {
        let source = listed(&["TCS.NS"]);
        let resolver = SymbolResolver::new(&source, ExchangeSuffixes::default());
        let memo = DashMap::new();

        let first = resolver.resolve_memoized("tcs", &memo).await;
        let second = resolver.resolve_memoized("TCS ", &memo).await;
        let missing = resolver.resolve_memoized("FAKESYMBOL", &memo).await;
        let missing_again = resolver.resolve_memoized("fakesymbol", &memo).await;

        assert_eq!(first, second);
        assert_eq!(first.as_deref(), Some("TCS.NS"));
        assert_eq!(missing, None);
        assert_eq!(missing_again, None);
        // One probe for TCS, two for FAKESYMBOL.
        assert_eq!(source.latest_calls(), 3);
    }

    #[test]
    fn normalizes_tickers() {
        assert_eq!(normalize_ticker_symbol(" reliance "), Some("RELIANCE".to_string()));
        assert_eq!(normalize_ticker_symbol("  "), None);
    }
}
