use std::collections::BTreeMap;
use surge_core::error::PipelineError;
use surge_core::ingest::{Constituent, ConstituentSource};

// Large-cap KRX names used when every constituent source is down.
const FALLBACK_TICKERS: &[(&str, &str)] = &[
    ("005930", "삼성전자"),
    ("000660", "SK하이닉스"),
    ("373220", "LG에너지솔루션"),
    ("207940", "삼성바이오로직스"),
    ("005380", "현대차"),
    ("000270", "기아"),
    ("068270", "셀트리온"),
    ("035420", "NAVER"),
    ("005490", "POSCO홀딩스"),
    ("051910", "LG화학"),
    ("035720", "카카오"),
    ("105560", "KB금융"),
];

const ETF_BRANDS: &[&str] = &[
    "KODEX", "TIGER", "KOSEF", "KBSTAR", "ARIRANG", "HANARO", "SOL", "ACE", "TIMEFOLIO",
    "PLUS", "1Q", "RISE", "KIWOOM", "TREX", "FOCUS", "WON",
];

#[derive(Debug, Clone)]
pub struct UniverseOptions {
    /// Keep at most this many names from each source, in source order.
    pub max_per_source: Option<usize>,

    pub fallback: Vec<Constituent>,
}

impl Default for UniverseOptions {
    fn default() -> Self {
        Self {
            max_per_source: None,
            fallback: FALLBACK_TICKERS
                .iter()
                .map(|(ticker, name)| Constituent {
                    ticker: ticker.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        }
    }
}

impl UniverseOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("UNIVERSE_MAX_PER_SOURCE") {
            if let Ok(n) = s.trim().parse::<usize>() {
                if n > 0 {
                    out.max_per_source = Some(n);
                }
            }
        }

        out
    }
}

/// Builds the ticker -> name universe from every source.
///
/// Sources are loaded independently; the first source to list a ticker names
/// it. An empty union falls back to the built-in large-cap list.
pub async fn load_universe(
    sources: &[Box<dyn ConstituentSource>],
    opts: &UniverseOptions,
) -> Result<BTreeMap<String, String>, PipelineError> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    let mut failed_sources = 0usize;

    for source in sources {
        let name = source.source_name();
        let listed = match source.fetch_constituents().await {
            Ok(v) => v,
            Err(err) => {
                failed_sources += 1;
                tracing::warn!(source = %name, error = %format!("{err:#}"), "constituent source failed; skipping");
                continue;
            }
        };

        let total = listed.len();
        let kept = merge_source(&mut out, listed, opts.max_per_source);
        tracing::info!(source = %name, total, kept, "constituent source loaded");
    }

    if !out.is_empty() {
        tracing::info!(
            universe_size = out.len(),
            sources = sources.len(),
            failed_sources,
            "universe assembled"
        );
        return Ok(out);
    }

    tracing::warn!(
        sources = sources.len(),
        failed_sources,
        fallback_size = opts.fallback.len(),
        "no constituents loaded; using fallback universe"
    );

    merge_source(&mut out, opts.fallback.clone(), None);
    if out.is_empty() {
        return Err(PipelineError::fatal(
            "universe",
            "every constituent source failed and the fallback list is empty",
        ));
    }
    Ok(out)
}

fn merge_source(
    out: &mut BTreeMap<String, String>,
    listed: Vec<Constituent>,
    cap: Option<usize>,
) -> usize {
    let mut kept = 0usize;
    for c in listed {
        if cap.is_some_and(|cap| kept >= cap) {
            break;
        }

        let ticker = c.ticker.trim();
        if ticker.is_empty() || is_etf_or_etn_name(&c.name) {
            continue;
        }

        kept += 1;
        out.entry(ticker.to_string())
            .or_insert_with(|| c.name.trim().to_string());
    }
    kept
}

fn is_etf_or_etn_name(name: &str) -> bool {
    let mut tokens = name.split_whitespace();
    let Some(first) = tokens.next() else {
        return false;
    };

    // Fund brands lead the name, e.g. "KODEX 200".
    let first_upper = first.to_ascii_uppercase();
    if ETF_BRANDS.contains(&first_upper.as_str()) {
        return true;
    }

    std::iter::once(first).chain(tokens).any(|t| {
        let t = t.to_ascii_uppercase();
        t.starts_with("ETF") || t.starts_with("ETN")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource {
        name: &'static str,
        items: Option<Vec<(&'static str, &'static str)>>,
    }

    #[async_trait::async_trait]
    impl ConstituentSource for FixedSource {
        fn source_name(&self) -> String {
            self.name.to_string()
        }

        async fn fetch_constituents(&self) -> anyhow::Result<Vec<Constituent>> {
            let Some(items) = &self.items else {
                anyhow::bail!("upstream down");
            };
            Ok(items
                .iter()
                .map(|(t, n)| Constituent {
                    ticker: t.to_string(),
                    name: n.to_string(),
                })
                .collect())
        }
    }

    fn source(name: &'static str, items: &[(&'static str, &'static str)]) -> Box<dyn ConstituentSource> {
        Box::new(FixedSource {
            name,
            items: Some(items.to_vec()),
        })
    }

    fn broken(name: &'static str) -> Box<dyn ConstituentSource> {
        Box::new(FixedSource { name, items: None })
    }

    #[tokio::test]
    async fn partial_failure_keeps_other_sources_and_first_name_wins() {
        let sources = vec![
            broken("kospi"),
            source("a", &[("005930", "삼성전자"), ("069500", "KODEX 200")]),
            source("b", &[("005930", "Samsung"), ("000660", "SK하이닉스")]),
        ];

        let out = load_universe(&sources, &UniverseOptions::default()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["005930"], "삼성전자");
        assert!(!out.contains_key("069500"));
    }

    #[tokio::test]
    async fn total_failure_uses_fallback() {
        let sources = vec![broken("kospi"), broken("kosdaq")];
        let out = load_universe(&sources, &UniverseOptions::default()).await.unwrap();
        assert_eq!(out.len(), FALLBACK_TICKERS.len());
        assert!(out.contains_key("005930"));
    }

    #[tokio::test]
    async fn empty_fallback_is_fatal() {
        let opts = UniverseOptions {
            max_per_source: None,
            fallback: Vec::new(),
        };
        let err = load_universe(&[broken("kospi")], &opts).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn caps_each_source_after_etf_exclusion() {
        let sources = vec![source(
            "a",
            &[("069500", "KODEX 200"), ("000001", "A"), ("000002", "B"), ("000003", "C")],
        )];
        let opts = UniverseOptions {
            max_per_source: Some(2),
            ..UniverseOptions::default()
        };
        let out = load_universe(&sources, &opts).await.unwrap();
        assert_eq!(out.keys().cloned().collect::<Vec<_>>(), vec!["000001", "000002"]);
    }

    #[test]
    fn excludes_obvious_etf_names() {
        assert!(is_etf_or_etn_name("KODEX 코스닥150레버리지"));
        assert!(is_etf_or_etn_name("TIGER 미국S&P500"));
        assert!(is_etf_or_etn_name("Foo ETF"));
        assert!(is_etf_or_etn_name("신한 레버리지 WTI원유 선물 ETN(H)"));
        assert!(!is_etf_or_etn_name("삼성전자"));
        assert!(!is_etf_or_etn_name("SOLUM"));
    }
}
