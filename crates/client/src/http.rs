//! HTTP endpoints next to the job socket.

use depoview::config::ComponentCatalog;
use reqwest::header::COOKIE;
use tracing::debug;
use url::Url;

use crate::connection::cookie_value;
use crate::error::ClientError;

pub fn molecules_url(server: &Url) -> Result<Url, ClientError> {
    Ok(server.join("/molecules")?)
}

/// Fetch the components the server can deposit.
pub async fn fetch_catalog(
    client: &reqwest::Client,
    server: &Url,
    token: Option<&str>,
) -> Result<ComponentCatalog, ClientError> {
    let url = molecules_url(server)?;
    debug!("GET {}", url);
    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.header(COOKIE, cookie_value(token));
    }
    let catalog = request
        .send()
        .await?
        .error_for_status()?
        .json::<ComponentCatalog>()
        .await?;
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn molecules_endpoint_is_at_server_root() {
        let server = Url::parse("http://127.0.0.1:8080/viewer/").unwrap();
        assert_eq!(
            molecules_url(&server).unwrap().as_str(),
            "http://127.0.0.1:8080/molecules"
        );
    }
}
