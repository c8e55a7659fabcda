/// JustWatch GraphQL endpoint
pub const JUSTWATCH_GRAPHQL_URL: &str = "https://apis.justwatch.com/graphql";

/// Prefix of every title URL stored in the catalog
pub const JUSTWATCH_SITE_URL: &str = "https://www.justwatch.com";

/// Titles need more than this many IMDb votes to count toward quality metrics
pub const MIN_IMDB_VOTES: u64 = 1000;

/// A streaming platform as shown on the dashboard
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderInfo {
    /// Short package code used by the GraphQL API
    pub id: &'static str,
    /// Path segment used by the provider listing pages
    pub slug: &'static str,
    pub display_name: &'static str,
    pub color: &'static str,
    /// Monthly subscription price in BRL
    pub monthly_price: f64,
}

pub const PROVIDERS: [ProviderInfo; 7] = [
    ProviderInfo { id: "nfx", slug: "netflix", display_name: "Netflix", color: "#E50914", monthly_price: 49.90 },
    ProviderInfo { id: "prv", slug: "amazon-prime-video", display_name: "Amazon Prime Video", color: "#00A8E1", monthly_price: 19.90 },
    ProviderInfo { id: "dnp", slug: "disney-plus", display_name: "Disney+", color: "#0063E5", monthly_price: 33.90 },
    ProviderInfo { id: "mxx", slug: "max", display_name: "MAX", color: "#5822B4", monthly_price: 34.90 },
    ProviderInfo { id: "pmp", slug: "paramount-plus", display_name: "Paramount+", color: "#0064FF", monthly_price: 24.90 },
    ProviderInfo { id: "atp", slug: "apple-tv-plus", display_name: "Apple TV+", color: "#000000", monthly_price: 21.90 },
    ProviderInfo { id: "gop", slug: "globoplay", display_name: "Globoplay", color: "#FB8B24", monthly_price: 29.90 },
];

/// Look up a provider by API code or listing slug
pub fn provider(key: &str) -> Option<&'static ProviderInfo> {
    let key = key.trim();
    PROVIDERS
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(key) || p.slug.eq_ignore_ascii_case(key))
}

/// Display name for a stored provider key, falling back to the key itself
pub fn display_name(key: &str) -> String {
    provider(key)
        .map(|p| p.display_name.to_string())
        .unwrap_or_else(|| key.to_string())
}
