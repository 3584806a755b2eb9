//! URL sanitization for links and attribute values.

use tracing::trace;
use url::Url;

use super::HARD_DENIED_PROTOCOLS;

/// Schemes accepted when the caller does not supply its own list.
pub const DEFAULT_ALLOWED_PROTOCOLS: &[&str] = &["http", "https", "mailto"];

/// Parse and vet an absolute URL.
///
/// Returns the normalized URL, or `None` if it does not parse or its scheme
/// is not in `allowed_protocols`. Protocols may be given with or without the
/// trailing colon, in any case. `javascript`, `data` and `vbscript` are
/// rejected even when allow-listed.
pub fn sanitize_url<I, S>(input: &str, allowed_protocols: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let url = match Url::parse(input.trim()) {
        Ok(url) => url,
        Err(e) => {
            trace!(error = %e, "Rejected unparsable URL");
            return None;
        }
    };

    let scheme = url.scheme();
    if HARD_DENIED_PROTOCOLS.contains(&scheme) {
        trace!(scheme = %scheme, "Rejected hard-denied URL scheme");
        return None;
    }

    let allowed = allowed_protocols.into_iter().any(|p| {
        p.as_ref()
            .trim()
            .trim_end_matches(':')
            .eq_ignore_ascii_case(scheme)
    });
    if !allowed {
        trace!(scheme = %scheme, "Rejected URL scheme not on the allow-list");
        return None;
    }

    Some(url.to_string())
}
