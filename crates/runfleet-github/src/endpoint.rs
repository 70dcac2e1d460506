//! API endpoint resolution for hosted and GHES deployments.

/// Resolve the REST API base URL.
///
/// No GHES URL targets the hosted service. A GHES host under `.ghe.com`
/// serves its API on the `api.` subdomain; every other GHES deployment
/// serves it under `/api/v3`.
pub fn api_base_url(ghes_url: Option<&str>) -> String {
    let Some(base) = ghes_url else {
        return "https://api.github.com".to_string();
    };

    let trimmed = base.trim_end_matches('/');
    let host = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    if host.ends_with(".ghe.com") {
        format!("https://api.{host}")
    } else {
        format!("{trimmed}/api/v3")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_service_without_ghes_url() {
        assert_eq!(api_base_url(None), "https://api.github.com");
    }

    #[test]
    fn ghe_com_hosts_use_api_subdomain() {
        assert_eq!(
            api_base_url(Some("https://acme.ghe.com")),
            "https://api.acme.ghe.com"
        );
        assert_eq!(
            api_base_url(Some("https://acme.ghe.com/")),
            "https://api.acme.ghe.com"
        );
    }

    #[test]
    fn self_hosted_ghes_uses_api_v3_path() {
        assert_eq!(
            api_base_url(Some("https://github.example.com")),
            "https://github.example.com/api/v3"
        );
    }
}
